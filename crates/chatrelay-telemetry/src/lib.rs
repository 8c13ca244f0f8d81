//! Logging setup for the relay.
//!
//! A single `tracing-subscriber` registry with an `EnvFilter` and one fmt
//! layer, either human-readable or JSON. `RUST_LOG` overrides the
//! configured level.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Output format for log lines.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown log format: {0} (expected \"text\" or \"json\")")]
pub struct UnknownLogFormat(String);

impl FromStr for LogFormat {
    type Err = UnknownLogFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(UnknownLogFormat(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid module level {0:?} (expected module=level)")]
pub struct InvalidModuleLevel(String);

/// Parse a `module=level` override such as `chatrelay_server=debug`.
pub fn parse_module_level(s: &str) -> Result<(String, Level), InvalidModuleLevel> {
    let invalid = || InvalidModuleLevel(s.to_string());
    let (module, level) = s.split_once('=').ok_or_else(invalid)?;
    let module = module.trim();
    if module.is_empty() {
        return Err(invalid());
    }
    let level = level.trim().parse::<Level>().map_err(|_| invalid())?;
    Ok((module.to_string(), level))
}

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "chatrelay_server" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            format: LogFormat::Text,
        }
    }
}

impl TelemetryConfig {
    /// The filter directive used when `RUST_LOG` is not set.
    pub fn filter_directive(&self) -> String {
        let mut filter = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter
    }
}

/// Initialize the global subscriber. Call once at startup.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_telemetry(config: &TelemetryConfig) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directive()));

    let fmt_layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .boxed(),
        LogFormat::Text => tracing_subscriber::fmt::layer().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_is_info() {
        let cfg = TelemetryConfig::default();
        assert_eq!(cfg.filter_directive(), "info");
    }

    #[test]
    fn module_levels_appended() {
        let cfg = TelemetryConfig {
            log_level: Level::WARN,
            module_levels: vec![
                ("chatrelay_server".into(), Level::DEBUG),
                ("tower_http".into(), Level::TRACE),
            ],
            ..Default::default()
        };
        assert_eq!(
            cfg.filter_directive(),
            "warn,chatrelay_server=debug,tower_http=trace"
        );
    }

    #[test]
    fn module_level_parses() {
        assert_eq!(
            parse_module_level("chatrelay_server=debug").unwrap(),
            ("chatrelay_server".to_string(), Level::DEBUG)
        );
        assert_eq!(
            parse_module_level(" tower_http = TRACE ").unwrap(),
            ("tower_http".to_string(), Level::TRACE)
        );
        assert!(parse_module_level("chatrelay_server").is_err());
        assert!(parse_module_level("=debug").is_err());
        assert!(parse_module_level("chatrelay_server=loud").is_err());
    }

    #[test]
    fn log_format_parses() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("TEXT".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn log_format_serde() {
        assert_eq!(serde_json::to_string(&LogFormat::Json).unwrap(), r#""json""#);
        let f: LogFormat = serde_json::from_str(r#""text""#).unwrap();
        assert_eq!(f, LogFormat::Text);
    }

    #[test]
    fn second_init_reports_false() {
        let cfg = TelemetryConfig::default();
        let _ = init_telemetry(&cfg);
        assert!(!init_telemetry(&cfg));
    }
}
