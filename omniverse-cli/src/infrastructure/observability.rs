use crate::infrastructure::error::{CliError, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub default_level: tracing::Level,
    pub json_format: bool,
    pub chrome_trace: bool,
    pub show_thread_ids: bool,
    pub show_targets: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_level: tracing::Level::INFO,
            json_format: false,
            chrome_trace: false,
            show_thread_ids: false,
            show_targets: false,
        }
    }
}

impl LogConfig {
    /// Development configuration (verbose, human-readable)
    pub fn dev() -> Self {
        Self {
            default_level: tracing::Level::DEBUG,
            show_thread_ids: true,
            show_targets: true,
            ..Default::default()
        }
    }

    pub fn with_level(mut self, level: tracing::Level) -> Self {
        self.default_level = level;
        self
    }

    /// JSON lines on stderr
    pub fn with_json(mut self) -> Self {
        self.json_format = true;
        self
    }

    /// Enable Chrome tracing
    pub fn with_chrome_trace(mut self) -> Self {
        self.chrome_trace = true;
        self
    }

    /// Directives used when `RUST_LOG` is unset
    pub fn default_directives(&self) -> String {
        let level = self.default_level;
        format!(
            "omniverse_cli={level},omniverse_p2p={level},omniverse_core={level},webrtc=warn,warn"
        )
    }

    pub fn init(self) -> Result<()> {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.default_directives()));

        #[cfg(feature = "chrome-trace")]
        if self.chrome_trace {
            use tracing_chrome::ChromeLayerBuilder;

            let (chrome_layer, guard) = ChromeLayerBuilder::new().build();
            eprintln!("📊 Chrome trace enabled, view at https://ui.perfetto.dev/");

            tracing_subscriber::registry()
                .with(env_filter)
                .with(chrome_layer)
                .with(fmt::layer().with_writer(std::io::stderr).compact())
                .try_init()
                .map_err(|e| CliError::Logging(e.to_string()))?;

            // flushes on drop; the trace lives as long as the process
            std::mem::forget(guard);
            return Ok(());
        }

        let json_layer = self.json_format.then(|| {
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(self.show_targets)
                .with_thread_ids(self.show_thread_ids)
                .json()
        });
        let text_layer = (!self.json_format).then(|| {
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(self.show_targets)
                .with_thread_ids(self.show_thread_ids)
        });

        tracing_subscriber::registry()
            .with(env_filter)
            .with(json_layer)
            .with(text_layer)
            .try_init()
            .map_err(|e| CliError::Logging(e.to_string()))
    }
}
