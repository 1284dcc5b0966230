//! CLI configuration, grounded on the teacher's `main.rs` `Args` struct,
//! extended with an optional TOML overlay for the values that aren't
//! appropriate as flags. Precedence is CLI flag > TOML file > built-in
//! default.

use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;

use canmaster_core::model::parse_node_id_hex;
use canmaster_core::NodeId;
use clap::Parser;
use serde::Deserialize;

use crate::error::ServerError;

const DEFAULT_PERSISTENCE_PATH: &str = "canmaster.redb";
const DEFAULT_MASTER_ID: &str = "00000001";
const DEFAULT_LOG_LEVEL: &str = "info";

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 7878))
}

/// CAN bus master controller.
#[derive(Parser, Debug)]
#[command(name = "canmaster-server")]
#[command(about = "CAN bus master controller: discovery, config writes, and operator gateway")]
#[command(version)]
pub struct Args {
    /// Address the operator gateway binds to.
    #[arg(long)]
    pub bind: Option<SocketAddr>,

    /// SocketCAN interface name (e.g. `can0`). Omit to run against an
    /// in-memory loopback bus for local testing.
    #[arg(long)]
    pub can_interface: Option<String>,

    /// Path to the message-definition CSV. Omit to seed the registry from
    /// whatever was persisted on a previous run.
    #[arg(long)]
    pub definitions_csv: Option<PathBuf>,

    /// Path to the redb persistence file.
    #[arg(long)]
    pub persistence_path: Option<PathBuf>,

    /// This master controller's own node id, as 8 hex characters.
    #[arg(long)]
    pub master_id: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to a TOML config file overlaying values not given as flags.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// The subset of [`Args`]' fields a TOML config file may supply. Any value
/// also given on the command line is overridden by the flag.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct FileConfig {
    bind: Option<SocketAddr>,
    can_interface: Option<String>,
    definitions_csv: Option<PathBuf>,
    persistence_path: Option<PathBuf>,
    master_id: Option<String>,
    log_level: Option<String>,
}

/// Fully resolved start-up configuration.
#[derive(Debug)]
pub struct ResolvedConfig {
    /// Address the operator gateway binds to.
    pub bind: SocketAddr,
    /// SocketCAN interface name, if running against real hardware.
    pub can_interface: Option<String>,
    /// Path to the message-definition CSV, if one should be (re)ingested.
    pub definitions_csv: Option<PathBuf>,
    /// Path to the redb persistence file.
    pub persistence_path: PathBuf,
    /// This master controller's own node id.
    pub master_id: NodeId,
    /// Log level passed to `tracing_subscriber`.
    pub log_level: String,
}

impl Args {
    /// Merge CLI flags with an optional TOML overlay into a
    /// [`ResolvedConfig`], applying CLI > file > default precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] if `--config` names a file that can't
    /// be read or parsed, or if the resolved master id isn't 8 hex digits.
    pub fn resolve(&self) -> Result<ResolvedConfig, ServerError> {
        let file = match &self.config {
            Some(path) => load_file_config(path)?,
            None => FileConfig::default(),
        };

        let master_id_str =
            self.master_id.clone().or(file.master_id).unwrap_or_else(|| DEFAULT_MASTER_ID.to_string());
        let master_id = parse_node_id_hex(&master_id_str)
            .map_err(|e| ServerError::Config(format!("invalid master id: {e}")))?;

        Ok(ResolvedConfig {
            bind: self.bind.or(file.bind).unwrap_or_else(default_bind),
            can_interface: self.can_interface.clone().or(file.can_interface),
            definitions_csv: self.definitions_csv.clone().or(file.definitions_csv),
            persistence_path: self
                .persistence_path
                .clone()
                .or(file.persistence_path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PERSISTENCE_PATH)),
            master_id,
            log_level: self.log_level.clone().or(file.log_level).unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        })
    }
}

fn load_file_config(path: &std::path::Path) -> Result<FileConfig, ServerError> {
    let contents = fs::read_to_string(path)
        .map_err(|e| ServerError::Config(format!("failed to read {}: {e}", path.display())))?;
    toml::from_str(&contents).map_err(|e| ServerError::Config(format!("failed to parse {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_args() -> Args {
        Args {
            bind: None,
            can_interface: None,
            definitions_csv: None,
            persistence_path: None,
            master_id: None,
            log_level: None,
            config: None,
        }
    }

    #[test]
    fn defaults_apply_when_nothing_is_given() {
        let resolved = bare_args().resolve().unwrap();
        assert_eq!(resolved.bind, default_bind());
        assert_eq!(resolved.persistence_path, PathBuf::from(DEFAULT_PERSISTENCE_PATH));
        assert_eq!(resolved.log_level, DEFAULT_LOG_LEVEL);
    }

    #[test]
    fn cli_flag_overrides_file_value() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("canmaster.toml");
        std::fs::write(&config_path, "log-level = \"debug\"\n").unwrap();

        let mut args = bare_args();
        args.config = Some(config_path);
        args.log_level = Some("trace".to_string());

        let resolved = args.resolve().unwrap();
        assert_eq!(resolved.log_level, "trace");
    }

    #[test]
    fn file_value_is_used_when_no_flag_is_given() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("canmaster.toml");
        std::fs::write(&config_path, "master-id = \"19000019\"\n").unwrap();

        let mut args = bare_args();
        args.config = Some(config_path);

        let resolved = args.resolve().unwrap();
        assert_eq!(resolved.master_id, NodeId::new([0x19, 0, 0, 0x19]));
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let mut args = bare_args();
        args.config = Some(PathBuf::from("/nonexistent/canmaster.toml"));
        assert!(args.resolve().is_err());
    }
}
