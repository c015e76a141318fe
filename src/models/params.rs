//! Parameters of one sync run and the payload shapes they arrive in.

use crate::errors::{SyncError, SyncResult};
use crate::models::period::BillingPeriod;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

pub const DEFAULT_ENVIRONMENT: &str = "uat";
pub const DEFAULT_MODULE: &str = "analytics";
pub const DEFAULT_APP: &str = "aws_az_analytics_application_refresh";

/// Validated run parameters.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RunParams {
    pub period: BillingPeriod,
    /// Payer ids exactly as requested, duplicates included.
    pub requested_payer_ids: Vec<String>,
    pub partner_id: i64,
    pub environment: String,
    pub module: String,
    pub app: String,
}

impl RunParams {
    pub fn new(
        year: i32,
        month: u32,
        payer_ids: Vec<String>,
        partner_id: i64,
        environment: &str,
        module: &str,
    ) -> SyncResult<Self> {
        let period = BillingPeriod::new(year, month)?;
        let payer_ids: Vec<String> = payer_ids
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        if payer_ids.is_empty() {
            return Err(SyncError::InvalidParams(
                "the payer list must be non-empty".into(),
            ));
        }
        Ok(Self {
            period,
            requested_payer_ids: payer_ids,
            partner_id,
            environment: environment.trim().to_lowercase(),
            module: module.trim().to_lowercase(),
            app: DEFAULT_APP.to_string(),
        })
    }

    /// Sorted, de-duplicated payer ids to analyse.
    pub fn unique_payer_ids(&self) -> Vec<String> {
        unique_sorted(&self.requested_payer_ids)
    }

    pub fn has_duplicates(&self) -> bool {
        self.unique_payer_ids().len() != self.requested_payer_ids.len()
    }

    /// Validate a JSON task payload.
    ///
    /// Accepts numbers or numeric strings for `year`, `month` and
    /// `partnerId`, and the legacy `payerAccountIds` key when `payers` is
    /// absent.
    pub fn from_payload(payload: &Value) -> SyncResult<Self> {
        let obj = payload
            .as_object()
            .ok_or_else(|| SyncError::InvalidParams("input must be a JSON object".into()))?;

        let payers = match obj.get("payers") {
            Some(v) if !v.is_null() => Some(v),
            _ => obj.get("payerAccountIds").filter(|v| !v.is_null()),
        };

        let missing: Vec<&str> = [
            ("year", obj.get("year").filter(|v| !v.is_null())),
            ("month", obj.get("month").filter(|v| !v.is_null())),
            ("payers", payers),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.is_none().then_some(name))
        .collect();
        if !missing.is_empty() {
            return Err(SyncError::InvalidParams(format!(
                "payload is missing required non-null values for: {}",
                missing.join(", ")
            )));
        }

        let year = int_field(obj.get("year"), "year")?;
        let month = int_field(obj.get("month"), "month")?;
        let payer_ids = match payers {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    Value::Number(n) => Ok(n.to_string()),
                    other => Err(SyncError::InvalidParams(format!(
                        "payer id must be a string or number, got {other}"
                    ))),
                })
                .collect::<SyncResult<Vec<_>>>()?,
            _ => {
                return Err(SyncError::InvalidParams(
                    "the 'payers' field must be a non-empty list".into(),
                ));
            }
        };
        let partner_id = match obj.get("partnerId") {
            None | Some(Value::Null) => 0,
            Some(Value::String(s)) if s.is_empty() => 0,
            value => int_field(value, "partnerId")?,
        };
        let environment = text_field(obj.get("environment"))
            .or_else(|| text_field(obj.get("env")))
            .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string());
        let module = text_field(obj.get("module")).unwrap_or_else(|| DEFAULT_MODULE.to_string());

        let year = i32::try_from(year)
            .map_err(|_| SyncError::InvalidParams(format!("year '{year}' is not a valid year")))?;
        let month = u32::try_from(month)
            .map_err(|_| SyncError::InvalidParams(format!("month '{month}' is not a valid month")))?;

        Self::new(year, month, payer_ids, partner_id, &environment, &module)
    }
}

/// Sorted, de-duplicated copy of a payer list.
pub fn unique_sorted(payer_ids: &[String]) -> Vec<String> {
    payer_ids
        .iter()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn int_field(value: Option<&Value>, name: &str) -> SyncResult<i64> {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| SyncError::InvalidParams(format!("'{name}' must be an integer")))
}

fn text_field(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_lowercase()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_full_payload() {
        let params = RunParams::from_payload(&json!({
            "year": "2025",
            "month": 6,
            "payers": ["222", 111, "222"],
            "partnerId": "42",
            "env": "PROD",
            "module": "Analytics"
        }))
        .unwrap();

        assert_eq!(params.period, BillingPeriod { year: 2025, month: 6 });
        assert_eq!(params.requested_payer_ids, vec!["222", "111", "222"]);
        assert_eq!(params.unique_payer_ids(), vec!["111", "222"]);
        assert!(params.has_duplicates());
        assert_eq!(params.partner_id, 42);
        assert_eq!(params.environment, "prod");
        assert_eq!(params.module, "analytics");
        assert_eq!(params.app, DEFAULT_APP);
    }

    #[test]
    fn accepts_legacy_payer_key_and_defaults() {
        let params = RunParams::from_payload(&json!({
            "year": 2025,
            "month": 1,
            "payerAccountIds": ["123"]
        }))
        .unwrap();
        assert_eq!(params.requested_payer_ids, vec!["123"]);
        assert_eq!(params.partner_id, 0);
        assert_eq!(params.environment, DEFAULT_ENVIRONMENT);
        assert_eq!(params.module, DEFAULT_MODULE);
    }

    #[test]
    fn reports_missing_fields() {
        let err = RunParams::from_payload(&json!({ "month": 1 })).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("year"), "{message}");
        assert!(message.contains("payers"), "{message}");
        assert!(!message.contains("month"), "{message}");
    }

    #[test]
    fn rejects_out_of_range_and_empty_inputs() {
        assert!(RunParams::from_payload(&json!({"year": 2019, "month": 1, "payers": ["1"]})).is_err());
        assert!(RunParams::from_payload(&json!({"year": 2025, "month": 13, "payers": ["1"]})).is_err());
        assert!(RunParams::from_payload(&json!({"year": 2025, "month": 1, "payers": []})).is_err());
        assert!(RunParams::from_payload(&json!({"year": 2025, "month": 1, "payers": "1"})).is_err());
        assert!(RunParams::from_payload(&json!(["not", "an", "object"])).is_err());
    }
}
