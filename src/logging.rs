//! Tracing setup for the `ni-mio` binary.
//!
//! `RUST_LOG` wins when set; otherwise the configured level applies to
//! every target. Output is human readable or JSON lines.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;
use crate::error::{AppError, AppResult};

/// Output format for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Compact text on stderr
    Text,
    /// One JSON object per event on stderr
    Json,
}

impl OutputFormat {
    /// Format selected by the configuration.
    pub fn from_config(config: &LoggingConfig) -> Self {
        if config.json {
            Self::Json
        } else {
            Self::Text
        }
    }
}

/// Filter from `RUST_LOG`, falling back to `default_level`.
pub fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(config: &LoggingConfig) -> AppResult<()> {
    let filter = env_filter(&config.level);
    let layer = match OutputFormat::from_config(config) {
        OutputFormat::Json => fmt::layer()
            .json()
            .with_current_span(false)
            .with_writer(std::io::stderr)
            .boxed(),
        OutputFormat::Text => fmt::layer()
            .compact()
            .with_thread_names(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|e| AppError::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_follows_config() {
        let mut config = LoggingConfig::default();
        assert_eq!(OutputFormat::from_config(&config), OutputFormat::Text);
        config.json = true;
        assert_eq!(OutputFormat::from_config(&config), OutputFormat::Json);
    }
}
