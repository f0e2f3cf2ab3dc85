use std::fs;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use envconfig::Envconfig;
use serde::Deserialize;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use flag_engine::config::Config;
use flag_engine::context::UserContext;
use flag_engine::events::{EventSink, NoopEventSink, TracingEventSink};
use flag_engine::settings::settings_models::Settings;
use flag_engine::storage::{MemoryStorage, StickyRecord};
use flag_engine::FlagEvaluator;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvaluationRequest {
    feature_key: String,
    context: UserContext,
}

fn init_logging(debug: bool) {
    let log_layer = {
        let base_layer = fmt::layer()
            .with_writer(io::stderr)
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true);

        if debug {
            base_layer
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                .with_ansi(true)
                .with_filter(EnvFilter::from_default_env())
                .boxed()
        } else {
            base_layer
                .json()
                .with_filter(EnvFilter::from_default_env())
                .boxed()
        }
    };

    tracing_subscriber::registry().with(log_layer).init();
}

fn load_storage(path: Option<&str>) -> Result<MemoryStorage> {
    let Some(path) = path else {
        return Ok(MemoryStorage::default());
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read sticky records from {}", path))?;
    let records: Vec<StickyRecord> =
        serde_json::from_str(&raw).with_context(|| format!("invalid sticky records in {}", path))?;
    tracing::info!(count = records.len(), path, "preloaded sticky records");
    Ok(MemoryStorage::with_records(records))
}

fn main() -> Result<()> {
    let config = Config::init_from_env().context("Invalid configuration")?;
    init_logging(*config.debug);

    let raw = fs::read_to_string(&config.settings_path)
        .with_context(|| format!("failed to read settings from {}", config.settings_path))?;
    let settings = Settings::from_json(&raw)?;
    tracing::info!(
        account_id = settings.account_id,
        features = settings.features.len(),
        "loaded settings"
    );

    let storage = Arc::new(load_storage(config.storage_path.as_deref())?);
    let events: Arc<dyn EventSink> = if *config.emit_events {
        Arc::new(TracingEventSink)
    } else {
        Arc::new(NoopEventSink)
    };
    let evaluator = FlagEvaluator::new(storage).with_event_sink(events);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for line in io::stdin().lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let request: EvaluationRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed request");
                continue;
            }
        };
        let result = evaluator.evaluate(&settings, &request.feature_key, &request.context);
        writeln!(out, "{}", serde_json::to_string(&result)?)?;
    }
    Ok(())
}
