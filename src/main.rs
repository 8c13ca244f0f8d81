use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chatrelay_server::ServerConfig;
use chatrelay_store::{Database, MessageRepo};
use chatrelay_telemetry::{init_telemetry, parse_module_level, LogFormat, TelemetryConfig};
use clap::Parser;
use tracing::Level;

/// Minimal real-time chat relay.
#[derive(Debug, Parser)]
#[command(name = "chatrelay", version)]
struct Cli {
    /// Listen address as host:port (overrides config file and environment).
    #[arg(long)]
    listen: Option<String>,

    /// SQLite database file.
    #[arg(long)]
    db: Option<PathBuf>,

    /// JSON config file merged over the defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format: text or json.
    #[arg(long, default_value = "text")]
    log_format: LogFormat,

    /// Default log level when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: Level,

    /// Per-module level as module=level. Repeatable.
    #[arg(long = "log-module", value_parser = parse_module_level)]
    log_modules: Vec<(String, Level)>,
}

impl Cli {
    fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            log_level: self.log_level,
            module_levels: self.log_modules.clone(),
            format: self.log_format,
        }
    }

    fn server_config(&self) -> anyhow::Result<ServerConfig> {
        let mut config =
            ServerConfig::load(self.config.as_deref()).context("failed to load configuration")?;
        if let Some(listen) = &self.listen {
            config.set_listen(listen).context("invalid --listen")?;
        }
        if let Some(db) = &self.db {
            config.db_path.clone_from(db);
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _ = init_telemetry(&cli.telemetry_config());

    let config = cli.server_config()?;

    let db = Database::open(&config.db_path)
        .with_context(|| format!("failed to open database {}", config.db_path.display()))?;
    let store = Arc::new(MessageRepo::new(db));

    let handle = chatrelay_server::start(config, store)
        .await
        .context("failed to start server")?;
    tracing::info!(addr = %handle.local_addr(), "chat relay ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_flags() {
        let cli = Cli::try_parse_from(["chatrelay"]).unwrap();
        assert_eq!(cli.log_format, LogFormat::Text);
        assert!(cli.listen.is_none());
        assert!(cli.db.is_none());
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::try_parse_from([
            "chatrelay",
            "--listen",
            "127.0.0.1:9000",
            "--db",
            "/tmp/relay.db",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);

        let config = cli.server_config().unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9000);
        assert_eq!(config.db_path, PathBuf::from("/tmp/relay.db"));
    }

    #[test]
    fn log_levels_reach_telemetry_config() {
        let cli = Cli::try_parse_from([
            "chatrelay",
            "--log-level",
            "warn",
            "--log-module",
            "chatrelay_server=debug",
            "--log-module",
            "tower_http=trace",
        ])
        .unwrap();
        let telemetry = cli.telemetry_config();
        assert_eq!(telemetry.log_level, Level::WARN);
        assert_eq!(
            telemetry.filter_directive(),
            "warn,chatrelay_server=debug,tower_http=trace"
        );

        let defaults = Cli::try_parse_from(["chatrelay"]).unwrap().telemetry_config();
        assert_eq!(defaults.filter_directive(), "info");
    }

    #[test]
    fn bad_log_module_is_rejected() {
        assert!(Cli::try_parse_from(["chatrelay", "--log-module", "nolevel"]).is_err());
    }

    #[test]
    fn bad_log_format_is_rejected() {
        assert!(Cli::try_parse_from(["chatrelay", "--log-format", "xml"]).is_err());
    }

    #[test]
    fn bad_listen_is_rejected() {
        let cli = Cli::try_parse_from(["chatrelay", "--listen", "nowhere"]).unwrap();
        assert!(cli.server_config().is_err());
    }

    #[test]
    fn config_file_is_merged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.json");
        std::fs::write(&path, r#"{"history_limit": 20}"#).unwrap();
        let cli = Cli::try_parse_from(["chatrelay", "--config", path.to_str().unwrap()]).unwrap();
        assert_eq!(cli.server_config().unwrap().history_limit, 20);
    }
}
