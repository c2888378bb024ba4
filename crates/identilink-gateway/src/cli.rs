//! Command-line options shared by the gateway and operator binaries.

use std::path::{Path, PathBuf};

use clap::Args;
use identilink_core::{ServiceConfig, StoreBackend};

pub const DEFAULT_CONFIG_FILE: &str = "identilink.toml";

#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
    /// TOML config file (default: ./identilink.toml if present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Interface to bind
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind (overrides PORT)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// SQLite database path (overrides IDENTILINK_DATABASE)
    #[arg(short, long)]
    pub database: Option<PathBuf>,

    /// Keep contacts in memory instead of SQLite
    #[arg(long)]
    pub memory: bool,

    /// Also write logs to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl ServeArgs {
    /// Resolve the effective config: flags over environment over file over
    /// defaults. An explicit `--config` must exist and parse.
    pub fn resolve_config(&self) -> anyhow::Result<ServiceConfig> {
        let mut config = match &self.config {
            Some(path) => ServiceConfig::load(path)?,
            None => ServiceConfig::load_or_default(Path::new(DEFAULT_CONFIG_FILE)),
        };
        config.apply_env()?;

        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(database) = &self.database {
            config.store.backend = StoreBackend::Sqlite;
            config.store.path = database.clone();
        }
        if self.memory {
            config.store.backend = StoreBackend::Memory;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identilink.toml");
        std::fs::write(
            &path,
            "[server]\nport = 9000\n\n[store]\nbackend = \"sqlite\"\npath = \"file.db\"\n",
        )
        .unwrap();

        let args = ServeArgs {
            config: Some(path),
            host: Some("127.0.0.1".into()),
            memory: true,
            ..ServeArgs::default()
        };
        let config = args.resolve_config().unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.path, PathBuf::from("file.db"));
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let args = ServeArgs {
            config: Some(PathBuf::from("/nonexistent/identilink.toml")),
            ..ServeArgs::default()
        };
        assert!(args.resolve_config().is_err());
    }
}
