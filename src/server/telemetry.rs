use super::observability::env_filter;
use opentelemetry::sdk::propagation::TraceContextPropagator;
use opentelemetry::sdk::{
    trace::{self, RandomIdGenerator, Sampler},
    Resource,
};
use opentelemetry::{global, KeyValue};
use std::env;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Registry};

const SERVICE_NAME: &str = "omniverse-relay";

fn telemetry_enabled() -> bool {
    env::var("ENABLE_TELEMETRY")
        .ok()
        .and_then(|value| value.parse::<bool>().ok())
        .unwrap_or(false)
}

/// JSON logs plus, with `ENABLE_TELEMETRY=true`, span export to Jaeger
pub fn init_telemetry() -> Result<(), Box<dyn std::error::Error>> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .json();

    if !telemetry_enabled() {
        Registry::default()
            .with(env_filter())
            .with(fmt_layer)
            .try_init()?;
        tracing::info!("Telemetry disabled");
        return Ok(());
    }

    global::set_text_map_propagator(TraceContextPropagator::new());

    let jaeger_endpoint = env::var("JAEGER_ENDPOINT")
        .unwrap_or_else(|_| "http://jaeger:14268/api/traces".to_string());

    let tracer = opentelemetry_jaeger::new_collector_pipeline()
        .with_service_name(SERVICE_NAME)
        .with_endpoint(&jaeger_endpoint)
        .with_isahc()
        .with_trace_config(
            trace::config()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![
                    KeyValue::new("service.name", SERVICE_NAME),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ])),
        )
        .with_timeout(Duration::from_secs(2))
        .install_batch(opentelemetry::runtime::Tokio)?;

    Registry::default()
        .with(env_filter())
        .with(fmt_layer)
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .try_init()?;

    tracing::info!(%jaeger_endpoint, "📡 Exporting spans to Jaeger");
    Ok(())
}

/// Flush pending spans
pub fn shutdown_telemetry() {
    if telemetry_enabled() {
        global::shutdown_tracer_provider();
    }
}
