use crate::{
    errors::{SyncError, SyncResult},
    models::{
        RunParams, RunReport,
        params::{DEFAULT_ENVIRONMENT, DEFAULT_MODULE},
    },
    services::{
        S3Settings,
        copy_engine::DEFAULT_MAX_WORKERS,
        notify::{
            SlackWebhooks, TopicSettings,
            topic::{DEFAULT_EXCHANGE, DEFAULT_ROUTING_KEY},
        },
        retry::RetryPolicy,
    },
};
use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use std::{env, fmt, path::PathBuf, str::FromStr, time::Duration};
use uuid::Uuid;

/// Env vars checked, in order, for a JSON task payload.
pub const PAYLOAD_ENV_VARS: [&str; 2] = ["event", "TASK_INPUT_JSON"];

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

/// Per-environment deployment defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvironmentProfile {
    pub staging_bucket: &'static str,
    pub region: &'static str,
    pub virtual_host: &'static str,
    pub storage_integration: &'static str,
}

impl EnvironmentProfile {
    pub fn for_environment(environment: &str) -> Self {
        let environment = environment.to_lowercase();
        if environment == "prod" {
            return Self {
                staging_bucket: "ck-data-pipeline-new-master-staging",
                region: "us-east-1",
                virtual_host: "cloudonomic_prod",
                storage_integration: "aws_s3_billdesk",
            };
        }
        let virtual_host = match environment.as_str() {
            "uat" => "cloudonomic_uat",
            "qa1" => "qa1",
            _ => "dev2",
        };
        Self {
            staging_bucket: "ck-data-pipeline-stage-bucket-airflow",
            region: "us-east-2",
            virtual_host,
            storage_integration: "AWS_S3_CK_DATAPIPELINE_NON_PROD_INC",
        }
    }
}

/// Where the run parameters come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunInput {
    Flags {
        year: Option<i32>,
        month: Option<u32>,
        payers: Vec<String>,
        partner_id: Option<i64>,
        module: Option<String>,
    },
    /// Raw JSON payload from one of [`PAYLOAD_ENV_VARS`].
    Payload(String),
    Missing,
}

/// Resolved configuration of one run.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: String,
    pub input: RunInput,
    pub s3: S3Settings,
    pub staging_bucket: String,
    pub storage_integration: String,
    pub max_copy_workers: usize,
    pub scan_previous_month: bool,
    /// SQLite URL of the warehouse holding payer configs and watermarks.
    pub warehouse_url: Option<String>,
    pub materialize_url: Option<String>,
    pub materialize_timeout: Duration,
    pub http_timeout: Duration,
    pub retry: RetryPolicy,
    pub topic: Option<TopicSettings>,
    pub slack: SlackWebhooks,
    pub fallback_config: Option<PathBuf>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Sync new payer billing exports into the staging bucket")]
pub struct Args {
    /// Billing year (with --month and --payer replaces the JSON payload)
    #[arg(long)]
    pub year: Option<i32>,

    /// Billing month, 1-12
    #[arg(long)]
    pub month: Option<u32>,

    /// Payer account id; repeatable or comma-separated
    #[arg(long = "payer", value_delimiter = ',')]
    pub payers: Vec<String>,

    #[arg(long)]
    pub partner_id: Option<i64>,

    #[arg(long)]
    pub module: Option<String>,

    /// Deployment environment (overrides payload, ENV and ENVIRONMENT)
    #[arg(long)]
    pub environment: Option<String>,

    /// Storage region (overrides BILLING_SYNC_REGION)
    #[arg(long)]
    pub region: Option<String>,

    /// S3-compatible endpoint (overrides BILLING_SYNC_S3_ENDPOINT)
    #[arg(long)]
    pub s3_endpoint: Option<String>,

    /// Staging bucket (overrides BILLING_SYNC_STAGING_BUCKET)
    #[arg(long)]
    pub staging_bucket: Option<String>,

    /// Concurrent copies (overrides BILLING_SYNC_MAX_COPY_WORKERS)
    #[arg(long)]
    pub max_copy_workers: Option<usize>,

    /// Only scan the requested month
    #[arg(long)]
    pub no_previous_month: bool,

    /// Warehouse database URL (overrides BILLING_SYNC_WAREHOUSE_URL)
    #[arg(long)]
    pub warehouse_url: Option<String>,

    /// Materialization endpoint (overrides BILLING_SYNC_MATERIALIZE_URL)
    #[arg(long)]
    pub materialize_url: Option<String>,

    /// AMQP broker URL without virtual host (overrides BILLING_SYNC_AMQP_URL)
    #[arg(long)]
    pub amqp_url: Option<String>,

    /// JSON file replacing the built-in fallback payer table
    #[arg(long)]
    pub fallback_config: Option<PathBuf>,

    /// Apply the warehouse schema and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::from_sources(args, |name| env::var(name).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge CLI args over values from `lookup` (an env var reader) over
    /// built-in defaults. Empty values count as unset.
    pub fn from_sources(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let input = if args.year.is_some() || args.month.is_some() || !args.payers.is_empty() {
            RunInput::Flags {
                year: args.year,
                month: args.month,
                payers: args.payers,
                partner_id: args.partner_id,
                module: args.module,
            }
        } else {
            PAYLOAD_ENV_VARS
                .iter()
                .find_map(|name| var(name))
                .map(RunInput::Payload)
                .unwrap_or(RunInput::Missing)
        };

        let environment =
            resolve_environment(args.environment.or_else(|| payload_environment(&input)), &var);
        let profile = EnvironmentProfile::for_environment(&environment);

        let max_copy_workers = match args.max_copy_workers {
            Some(n) => n,
            None => parse_var(&var, "BILLING_SYNC_MAX_COPY_WORKERS")?.unwrap_or(DEFAULT_MAX_WORKERS),
        };
        let scan_previous_month = !args.no_previous_month
            && parse_var(&var, "BILLING_SYNC_SCAN_PREVIOUS_MONTH")?.unwrap_or(true);
        let retry = RetryPolicy::new(
            parse_var(&var, "BILLING_SYNC_CONNECT_ATTEMPTS")?.unwrap_or(3),
            Duration::from_secs(parse_var(&var, "BILLING_SYNC_CONNECT_BACKOFF_SECS")?.unwrap_or(2)),
        );
        let http_timeout = Duration::from_secs(
            parse_var(&var, "BILLING_SYNC_HTTP_TIMEOUT_SECS")?.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
        );
        let materialize_timeout = Duration::from_secs(
            parse_var(&var, "BILLING_SYNC_MATERIALIZE_TIMEOUT_SECS")?.unwrap_or(900),
        );

        let endpoint = args.s3_endpoint.or_else(|| var("BILLING_SYNC_S3_ENDPOINT"));
        let s3 = S3Settings {
            region: args
                .region
                .or_else(|| var("BILLING_SYNC_REGION"))
                .unwrap_or_else(|| profile.region.into()),
            force_path_style: endpoint.is_some(),
            endpoint,
            max_attempts: parse_var(&var, "BILLING_SYNC_S3_MAX_ATTEMPTS")?.unwrap_or(3),
            attempt_timeout: Duration::from_secs(
                parse_var(&var, "BILLING_SYNC_S3_ATTEMPT_TIMEOUT_SECS")?.unwrap_or(120),
            ),
            ..S3Settings::default()
        };

        let topic = topic_settings(args.amqp_url, &var, &profile, retry);

        Ok(Self {
            environment,
            input,
            s3,
            staging_bucket: args
                .staging_bucket
                .or_else(|| var("BILLING_SYNC_STAGING_BUCKET"))
                .unwrap_or_else(|| profile.staging_bucket.into()),
            storage_integration: var("BILLING_SYNC_STORAGE_INTEGRATION")
                .unwrap_or_else(|| profile.storage_integration.into()),
            max_copy_workers,
            scan_previous_month,
            warehouse_url: args.warehouse_url.or_else(|| var("BILLING_SYNC_WAREHOUSE_URL")),
            materialize_url: args
                .materialize_url
                .or_else(|| var("BILLING_SYNC_MATERIALIZE_URL")),
            materialize_timeout,
            http_timeout,
            retry,
            topic,
            slack: slack_webhooks(&var),
            fallback_config: args
                .fallback_config
                .or_else(|| var("BILLING_SYNC_FALLBACK_CONFIG").map(PathBuf::from)),
        })
    }

    /// Validated parameters of this run, in the resolved environment.
    pub fn run_params(&self) -> SyncResult<RunParams> {
        match &self.input {
            RunInput::Flags {
                year,
                month,
                payers,
                partner_id,
                module,
            } => {
                let (Some(year), Some(month)) = (year, month) else {
                    return Err(SyncError::InvalidParams(
                        "--year and --month are both required with --payer".into(),
                    ));
                };
                RunParams::new(
                    *year,
                    *month,
                    payers.clone(),
                    partner_id.unwrap_or(0),
                    &self.environment,
                    module.as_deref().unwrap_or(DEFAULT_MODULE),
                )
            }
            RunInput::Payload(raw) => {
                let payload: Value = serde_json::from_str(raw).map_err(|err| {
                    SyncError::InvalidParams(format!("task payload is not valid JSON: {err}"))
                })?;
                let mut params = RunParams::from_payload(&payload)?;
                params.environment = self.environment.clone();
                Ok(params)
            }
            RunInput::Missing => Err(SyncError::InvalidParams(format!(
                "no run parameters: pass --year/--month/--payer or set one of {}",
                PAYLOAD_ENV_VARS.join(", ")
            ))),
        }
    }
}

/// What can still be resolved when the configuration itself is rejected,
/// so the failure is reported through the usual sinks.
#[derive(Debug, Clone)]
pub struct StartupFailure {
    pub environment: String,
    pub slack: SlackWebhooks,
    pub topic: Option<TopicSettings>,
    pub http_timeout: Duration,
}

impl StartupFailure {
    /// Reads only plain string variables; nothing here can fail to parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let environment = resolve_environment(None, &var);
        let profile = EnvironmentProfile::for_environment(&environment);
        Self {
            topic: topic_settings(None, &var, &profile, RetryPolicy::default()),
            slack: slack_webhooks(&var),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            environment,
        }
    }

    pub fn report(&self, run_id: Uuid, error: impl fmt::Display) -> RunReport {
        RunReport::fatal(run_id, &self.environment, None, "FatalError", error)
    }
}

fn resolve_environment(explicit: Option<String>, var: &impl Fn(&str) -> Option<String>) -> String {
    explicit
        .or_else(|| var("ENV"))
        .or_else(|| var("ENVIRONMENT"))
        .unwrap_or_else(|| DEFAULT_ENVIRONMENT.into())
        .trim()
        .to_lowercase()
}

fn slack_webhooks(var: &impl Fn(&str) -> Option<String>) -> SlackWebhooks {
    SlackWebhooks {
        prod_success: var("SLACK_WEBHOOK_URL_PROD_SUCCESS"),
        prod_failure: var("SLACK_WEBHOOK_URL_PROD_FAILURE"),
        non_prod: var("SLACK_WEBHOOK_URL_NON_PROD"),
    }
}

fn topic_settings(
    amqp_url: Option<String>,
    var: &impl Fn(&str) -> Option<String>,
    profile: &EnvironmentProfile,
    retry: RetryPolicy,
) -> Option<TopicSettings> {
    amqp_url
        .or_else(|| var("BILLING_SYNC_AMQP_URL"))
        .map(|amqp_url| TopicSettings {
            amqp_url,
            virtual_host: var("BILLING_SYNC_AMQP_VHOST")
                .unwrap_or_else(|| profile.virtual_host.into()),
            exchange: var("BILLING_SYNC_AMQP_EXCHANGE").unwrap_or_else(|| DEFAULT_EXCHANGE.into()),
            routing_key: var("BILLING_SYNC_AMQP_ROUTING_KEY")
                .unwrap_or_else(|| DEFAULT_ROUTING_KEY.into()),
            retry,
        })
}

fn payload_environment(input: &RunInput) -> Option<String> {
    let RunInput::Payload(raw) = input else {
        return None;
    };
    let payload: Value = serde_json::from_str(raw).ok()?;
    ["environment", "env"].iter().find_map(|key| {
        payload
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    })
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(name)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .with_context(|| format!("parsing {} value `{}`", name, value))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn payload_drives_environment_profile() {
        let cfg = AppConfig::from_sources(
            Args::default(),
            lookup(&[
                ("event", r#"{"year": 2025, "month": 6, "payers": ["1"], "env": "PROD"}"#),
                ("ENV", "uat"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.environment, "prod");
        assert_eq!(cfg.staging_bucket, "ck-data-pipeline-new-master-staging");
        assert_eq!(cfg.s3.region, "us-east-1");
        assert_eq!(cfg.storage_integration, "aws_s3_billdesk");
        assert!(cfg.topic.is_none());

        let params = cfg.run_params().unwrap();
        assert_eq!(params.environment, "prod");
        assert_eq!(params.requested_payer_ids, vec!["1"]);
    }

    #[test]
    fn flags_override_env_vars() {
        let args = Args {
            year: Some(2025),
            month: Some(1),
            payers: vec!["111".into(), "222".into()],
            environment: Some("qa1".into()),
            max_copy_workers: Some(8),
            amqp_url: Some("amqp://localhost:5672".into()),
            no_previous_month: true,
            ..Args::default()
        };
        let cfg = AppConfig::from_sources(
            args,
            lookup(&[
                ("BILLING_SYNC_MAX_COPY_WORKERS", "50"),
                ("TASK_INPUT_JSON", r#"{"year": 2024}"#),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.max_copy_workers, 8);
        assert!(!cfg.scan_previous_month);
        assert_eq!(cfg.topic.as_ref().unwrap().virtual_host, "qa1");
        let params = cfg.run_params().unwrap();
        assert_eq!(params.period.year, 2025);
        assert_eq!(params.module, DEFAULT_MODULE);
        assert_eq!(params.environment, "qa1");
    }

    #[test]
    fn defaults_apply_without_input() {
        let cfg = AppConfig::from_sources(Args::default(), lookup(&[])).unwrap();
        assert_eq!(cfg.environment, DEFAULT_ENVIRONMENT);
        assert_eq!(cfg.max_copy_workers, DEFAULT_MAX_WORKERS);
        assert!(cfg.scan_previous_month);
        assert_eq!(cfg.s3.region, "us-east-2");
        assert!(!cfg.s3.force_path_style);
        assert_eq!(cfg.input, RunInput::Missing);
        assert!(matches!(cfg.run_params(), Err(SyncError::InvalidParams(_))));
    }

    #[test]
    fn rejects_unparseable_numbers() {
        let err = AppConfig::from_sources(
            Args::default(),
            lookup(&[("BILLING_SYNC_MAX_COPY_WORKERS", "lots")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("BILLING_SYNC_MAX_COPY_WORKERS"));
    }

    #[test]
    fn rejected_config_still_reaches_failure_sinks() {
        let vars = [
            ("BILLING_SYNC_MAX_COPY_WORKERS", "lots"),
            ("ENVIRONMENT", "PROD"),
            ("BILLING_SYNC_AMQP_URL", "amqp://localhost:5672"),
            ("SLACK_WEBHOOK_URL_PROD_FAILURE", "https://hooks.example/prod-failure"),
        ];
        let err = AppConfig::from_sources(Args::default(), lookup(&vars)).unwrap_err();

        let startup = StartupFailure::from_lookup(lookup(&vars));
        assert_eq!(startup.environment, "prod");
        assert_eq!(startup.topic.as_ref().unwrap().virtual_host, "cloudonomic_prod");

        let report = startup.report(Uuid::new_v4(), format!("{err:#}"));
        assert_eq!(report.reason, "FatalError");
        assert_eq!(report.exit_code, 1);
        assert!(report.params.is_none());
        assert!(report.details.contains("BILLING_SYNC_MAX_COPY_WORKERS"));
        assert_eq!(
            startup.slack.for_report(&report),
            Some("https://hooks.example/prod-failure")
        );
    }

    #[test]
    fn startup_failure_defaults_environment() {
        let startup = StartupFailure::from_lookup(lookup(&[]));
        assert_eq!(startup.environment, DEFAULT_ENVIRONMENT);
        assert!(startup.topic.is_none());
    }

    #[test]
    fn flags_need_year_and_month() {
        let args = Args {
            payers: vec!["1".into()],
            ..Args::default()
        };
        let cfg = AppConfig::from_sources(args, lookup(&[])).unwrap();
        assert!(cfg.run_params().is_err());
    }

    #[test]
    fn virtual_hosts_follow_environment() {
        assert_eq!(EnvironmentProfile::for_environment("dev").virtual_host, "dev2");
        assert_eq!(EnvironmentProfile::for_environment("uat").virtual_host, "cloudonomic_uat");
        assert_eq!(EnvironmentProfile::for_environment("PROD").virtual_host, "cloudonomic_prod");
        assert_eq!(EnvironmentProfile::for_environment("other").virtual_host, "dev2");
    }

    #[test]
    fn comma_separated_payers_are_split() {
        let args = Args::try_parse_from([
            "billing-sync", "--year", "2025", "--month", "6", "--payer", "1,2", "--payer", "3",
        ])
        .unwrap();
        assert_eq!(args.payers, vec!["1", "2", "3"]);
    }
}
