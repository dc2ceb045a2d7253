use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use veilnode_core::config::Config;
use veilnode_core::core_access::{DeviceFingerprint, HostProbe, IntegrityAuditor, TamperFlag};
use veilnode_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use veilnode_core::metrics::init_metrics;

mod demo;

#[derive(Parser, Debug)]
#[command(name = "veilnode")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Set the log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Parser, Debug)]
enum Command {
    /// Run two simulated devices through handshake, reveal, burn and duress unlock
    Demo {
        /// Burn timer for the demo message (seconds)
        #[arg(long, default_value_t = 3)]
        burn_seconds: u32,
    },
    /// Audit this host's environment and print the security status as JSON
    Audit,
    /// Print the effective configuration as TOML
    Config,
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::from_env()?,
    };
    Ok(config)
}

fn log_config(args: &Args, config: &Config) -> Result<LogConfig> {
    let mut log_config = LogConfig::from_config(&config.logging)?;
    if let Some(level) = &args.log_level {
        log_config.level = LogLevel::parse(level).unwrap_or_else(|| {
            eprintln!("Invalid log level '{}', using 'info'", level);
            LogLevel::Info
        });
    }
    Ok(log_config.json_format(args.json_logs || config.logging.json_format))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    init_logging_with_config(log_config(&args, &config)?)?;
    init_metrics();

    info!("VeilNode CLI started");

    match args.command {
        Some(Command::Demo { burn_seconds }) => {
            let report = demo::run(&config, burn_seconds).await?;
            println!("cover shown     : {}", report.cover_text);
            println!("revealed once   : {}", report.revealed_text);
            println!("after burn      : {}", report.final_status.as_str());
            println!("decoy contacts  : {}", report.decoy_contacts.join(", "));
        }
        Some(Command::Audit) => {
            let fingerprint = DeviceFingerprint::load_or_create(
                config.storage.data_dir.join("device_id"),
            )?;
            let probe = HostProbe::new(TamperFlag::new());
            let auditor =
                IntegrityAuditor::new(std::sync::Arc::new(probe), config.integrity.clone(), fingerprint);
            let status = auditor.audit();
            if !status.integrity_ok {
                warn!("environment failed the integrity audit");
            }
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Some(Command::Config) => {
            print!("{}", config.to_toml()?);
        }
        None => {
            info!("No command specified. Use --help for usage information.");
        }
    }

    info!("VeilNode CLI finished");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("veilnode.toml");
        std::fs::write(
            &path,
            "[session]\naudit_interval = \"2s\"\n\n[messages]\ndefault_expiration_seconds = 30\n",
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.session.audit_interval, std::time::Duration::from_secs(2));
        assert_eq!(config.messages.default_expiration_seconds, 30);
    }

    #[test]
    fn test_log_level_flag_overrides_config() {
        let args = Args::parse_from(["veilnode", "--log-level", "debug", "config"]);
        let log_config = log_config(&args, &Config::default()).unwrap();
        assert_eq!(log_config.level, LogLevel::Debug);
        assert!(!log_config.json_format);
    }
}
