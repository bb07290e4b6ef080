//! Structured logging setup
//!
//! Library code emits `tracing` events; binaries and tests call
//! [`init_logging`] once to install a subscriber. With `json` enabled every
//! event is written as one JSON object per line.

use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

fn filter_for(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber described by `config`
///
/// Returns false when a subscriber was already installed; the existing one
/// is left in place.
pub fn init_logging(config: &LogConfig) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter_for(&config.level))
        .with_target(true);

    let installed = if config.json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    };

    if installed {
        tracing::debug!(level = %config.level, json = config.json, "logging initialized");
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_falls_back() {
        assert!(EnvFilter::try_new("chunkstore=loud").is_err());
        let filter = filter_for("chunkstore=loud");
        assert_eq!(filter.to_string(), "info");
    }

    #[test]
    fn test_second_init_is_rejected() {
        let config = LogConfig {
            level: "debug".into(),
            json: true,
        };
        init_logging(&config);
        assert!(!init_logging(&LogConfig::default()));
    }
}
