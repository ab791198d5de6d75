use crate::config::Config;
use anyhow::Context;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use std::env;
use tracing_stackdriver::CloudTraceConfiguration;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "info,roster_services=debug";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

pub fn init_tracing(config: &Config) -> anyhow::Result<()> {
    if config.is_local() {
        // Local development: Pretty printing
        tracing_subscriber::registry()
            .with(env_filter())
            .with(tracing_subscriber::fmt::layer())
            .try_init()?;
    } else {
        // Deployed: JSON logging with Stackdriver & Cloud Trace
        let project_id = env::var("GOOGLE_CLOUD_PROJECT").with_context(|| {
            format!(
                "GOOGLE_CLOUD_PROJECT environment variable is required in {} environment",
                config.environment()
            )
        })?;

        // W3C trace-context, so spans join the caller's trace
        opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

        let stackdriver_layer = tracing_stackdriver::layer()
            .with_cloud_trace(CloudTraceConfiguration { project_id });

        let otel_layer = tracing_opentelemetry::layer();

        tracing_subscriber::registry()
            .with(env_filter())
            .with(otel_layer)
            .with(stackdriver_layer)
            .try_init()?;
    }

    Ok(())
}
