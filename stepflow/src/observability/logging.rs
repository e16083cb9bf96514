//! Subscriber installation for applications embedding stepflow.

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Environment variable overriding the configured filter.
pub const LOG_ENV_VAR: &str = "STEPFLOW_LOG";

/// Logging output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `STEPFLOW_LOG` is unset, e.g. `info` or
    /// `stepflow=debug`.
    pub level: String,
    /// Emit one JSON object per line.
    pub json: bool,
    /// Include the event target (module path).
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            with_target: true,
        }
    }
}

impl LoggingConfig {
    /// Sets the fallback filter directive.
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Switches JSON output on or off.
    #[must_use]
    pub const fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_env(LOG_ENV_VAR)
            .or_else(|_| EnvFilter::try_new(&self.level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Installs a global `fmt` subscriber.
///
/// Returns `false` if a global subscriber was already installed, in which
/// case the existing one is kept.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(config.filter())
        .with_target(config.with_target);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert!(!config.json);
    }

    #[test]
    fn test_config_from_json() {
        let config: LoggingConfig = serde_json::from_str(r#"{"level": "stepflow=debug", "json": true}"#).unwrap();
        assert_eq!(config.level, "stepflow=debug");
        assert!(config.json);
        assert!(config.with_target);
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig::default().with_level("warn");
        init_logging(&config);
        assert!(!init_logging(&config));
    }
}
