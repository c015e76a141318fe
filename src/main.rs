use anyhow::{Context, Result};
use billing_sync::{
    config::{AppConfig, StartupFailure},
    models::{RunParams, RunReport, TaskResult},
    run_migrations,
    services::{
        DisabledTrigger, DownstreamTrigger, HttpTrigger, Orchestrator, PayerConfigSource,
        PayerDirectory, S3Gateway, SqlPayerConfigSource, SqlWatermarkConnector, SyncSettings,
        WatermarkConnector,
        notify::{self, CompletionEventSink, NotificationSink, SlackNotifier, TopicNotifier},
        payer_directory::{builtin_fallback, load_fallback_file},
    },
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{env, str::FromStr, sync::Arc};
use tracing::Instrument;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = match AppConfig::from_env_and_args() {
        Ok(loaded) => loaded,
        Err(err) => {
            tracing::error!("Invalid configuration: {:#}", err);
            let startup = StartupFailure::from_lookup(|name| env::var(name).ok());
            let report = startup.report(Uuid::new_v4(), format!("{err:#}"));
            let mut sinks: Vec<Box<dyn NotificationSink>> = vec![Box::new(CompletionEventSink)];
            if let Some(settings) = startup.topic.clone() {
                sinks.push(Box::new(TopicNotifier::new(settings)));
            }
            match SlackNotifier::new(startup.slack.clone(), startup.http_timeout) {
                Ok(slack) => sinks.push(Box::new(slack)),
                Err(err) => tracing::warn!("Chat notifier unavailable: {}", err),
            }
            notify::dispatch(&sinks, &report).await;
            std::process::exit(report.exit_code);
        }
    };

    if migrate {
        let url = cfg
            .warehouse_url
            .as_deref()
            .context("--migrate needs a warehouse URL (BILLING_SYNC_WAREHOUSE_URL)")?;
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("parsing warehouse URL `{}`", url))?
            .create_if_missing(true);
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("connecting to the warehouse")?;
        let applied = run_migrations(&db).await?;
        db.close().await;
        tracing::info!("Warehouse migration complete ({} statements).", applied);
        return Ok(());
    }

    let run_id = Uuid::new_v4();
    let span = tracing::info_span!("run", %run_id, environment = %cfg.environment);
    let report = execute(&cfg, run_id).instrument(span.clone()).await;

    let sinks = notification_sinks(&cfg);
    notify::dispatch(&sinks, &report).instrument(span).await;

    tracing::info!(
        "Run {} finished: {} ({}), exit code {}",
        run_id,
        report.outcome,
        report.reason,
        report.exit_code
    );
    std::process::exit(report.exit_code);
}

/// One full run. Every error ends up in the returned report.
async fn execute(cfg: &AppConfig, run_id: Uuid) -> RunReport {
    let params = match cfg.run_params() {
        Ok(params) => params,
        Err(err) => {
            tracing::error!("Invalid run parameters: {}", err);
            return RunReport::fatal(run_id, &cfg.environment, None, err.kind(), err);
        }
    };
    tracing::info!(
        "Starting sync for {} ({} payers, module {})",
        params.period,
        params.requested_payer_ids.len(),
        params.module
    );

    match sync(cfg, &params).await {
        Ok(result) => RunReport::from_result(run_id, &params, &result),
        Err(err) => {
            tracing::error!("Run aborted: {:#}", err);
            RunReport::fatal(
                run_id,
                &cfg.environment,
                Some(&params),
                "FatalError",
                format!("{err:#}"),
            )
        }
    }
}

async fn sync(cfg: &AppConfig, params: &RunParams) -> Result<TaskResult> {
    // --- Payer directory ---
    let fallback = match &cfg.fallback_config {
        Some(path) => load_fallback_file(path)
            .with_context(|| format!("loading fallback payer table {}", path.display()))?,
        None => builtin_fallback(),
    };
    let config_source = cfg.warehouse_url.clone().map(SqlPayerConfigSource::new);
    let directory = PayerDirectory::load(
        &cfg.environment,
        config_source.as_ref().map(|s| s as &dyn PayerConfigSource),
        fallback,
        &cfg.retry,
    )
    .await;

    // --- Collaborators ---
    let store = Arc::new(S3Gateway::connect(&cfg.s3).await);
    let watermarks = cfg.warehouse_url.as_ref().map(|url| {
        Arc::new(SqlWatermarkConnector::new(url.clone(), cfg.retry)) as Arc<dyn WatermarkConnector>
    });
    let trigger: Arc<dyn DownstreamTrigger> = match &cfg.materialize_url {
        Some(url) => Arc::new(
            HttpTrigger::new(url.clone(), cfg.materialize_timeout)
                .context("building materialization client")?,
        ),
        None => Arc::new(DisabledTrigger),
    };

    let settings = SyncSettings {
        max_copy_workers: cfg.max_copy_workers,
        scan_previous_month: cfg.scan_previous_month,
        ..SyncSettings::new(cfg.staging_bucket.clone(), cfg.storage_integration.clone())
    };
    let orchestrator =
        Orchestrator::new(settings, store, Arc::new(directory), watermarks, trigger);

    Ok(orchestrator.run(params).await)
}

fn notification_sinks(cfg: &AppConfig) -> Vec<Box<dyn NotificationSink>> {
    let mut sinks: Vec<Box<dyn NotificationSink>> = vec![Box::new(CompletionEventSink)];
    match &cfg.topic {
        Some(settings) => sinks.push(Box::new(TopicNotifier::new(settings.clone()))),
        None => tracing::warn!("No AMQP broker configured; topic notification disabled"),
    }
    match SlackNotifier::new(cfg.slack.clone(), cfg.http_timeout) {
        Ok(slack) => sinks.push(Box::new(slack)),
        Err(err) => tracing::warn!("Chat notifier unavailable: {}", err),
    }
    sinks
}
