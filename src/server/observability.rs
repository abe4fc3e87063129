use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub(crate) fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("omniverse=debug,omniverse_core=debug,axum=info,warn"))
}

/// Console logging for the relay binary
pub fn init_tracing(json_logs: bool) -> Result<(), Box<dyn std::error::Error>> {
    let json_layer = json_logs.then(|| {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .with_file(true)
            .json()
    });
    let text_layer = (!json_logs).then(|| {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(true)
    });

    tracing_subscriber::registry()
        .with(env_filter())
        .with(json_layer)
        .with(text_layer)
        .try_init()?;
    Ok(())
}
