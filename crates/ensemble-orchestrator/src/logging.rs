//! Structured logging setup.

use crate::config::{ConfigError, LoggingConfig};
use tracing_subscriber::EnvFilter;

/// Builds the filter for `level`, falling back to `info` when it does not
/// parse.
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global fmt subscriber.
///
/// # Errors
///
/// Returns `ConfigError::Logging` if a global subscriber is already set.
pub fn init(config: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = env_filter(&config.level);
    let installed = if config.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };
    installed.map_err(|e| ConfigError::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_level_falls_back_to_info() {
        let filter = env_filter("ensemble=notalevel");
        assert_eq!(filter.to_string(), "info");
    }

    #[test]
    fn directives_are_kept() {
        let filter = env_filter("ensemble_voice=debug,info");
        assert!(filter.to_string().contains("ensemble_voice=debug"));
    }
}
