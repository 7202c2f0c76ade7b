//! Slave clock controller binary.
//!
//! Wires the daemon loop to real relays, the on-disk offset record, and the
//! control API, then runs until `SIGINT`/`SIGTERM`.
//!
//! # Startup Sequence
//!
//! 1. Load configuration (`--config <path>`, `SLAVECLOCK_CONFIG`, or
//!    `slaveclock.yaml`; defaults if the file is missing)
//! 2. Initialize structured logging (tracing)
//! 3. Restore the dial offset from the state file
//! 4. Export the relay GPIOs and drive both lines off
//! 5. Spawn the control API
//! 6. Run the daemon loop until a termination signal
//! 7. Force both lines off and exit

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use slaveclock_api::{AppState, ServerConfig};
use slaveclock_core::config::ClockConfig;
use slaveclock_core::daemon::Daemon;
use slaveclock_core::time::LocalTime;
use slaveclock_store::JsonFileStore;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Config file used when neither the flag nor the variable names one.
const DEFAULT_CONFIG_FILE: &str = "slaveclock.yaml";

// ============================================================================
// CLI Arguments
// ============================================================================

/// Slave clock controller.
#[derive(Debug, Parser)]
#[command(name = "slaveclock")]
#[command(about = "Drives a slave clock dial and keeps it aligned with system time")]
#[command(version)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, env = "SLAVECLOCK_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
}

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration is invalid, the relays cannot be set
/// up, or they cannot be forced off at shutdown.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load configuration.
    let config_path = Cli::parse().config;
    let loaded = load_config(&config_path);

    // 2. Initialize structured logging.
    let (level, json) = loaded
        .as_ref()
        .map_or(("info", false), |c| (c.logging.level.as_str(), c.logging.json));
    init_tracing(level, json);
    let config = loaded.with_context(|| format!("loading {}", config_path.display()))?;

    info!(
        config = %config_path.display(),
        backend = ?config.relays.backend,
        api_enabled = config.api.enabled,
        "slaveclock starting"
    );

    // 3-4. Restore state, build relays.
    let state_path = config.state.resolved_path();
    info!(path = %state_path.display(), "Using state file");
    let store = Arc::new(JsonFileStore::new(state_path));
    let daemon = Daemon::from_config(&config, store, Arc::new(LocalTime))
        .context("daemon setup failed")?;

    // 5. Control API.
    let api_handle = if config.api.enabled {
        let server = ServerConfig {
            host: config.api.host.clone(),
            port: config.api.port,
        };
        let state = Arc::new(AppState::new(Arc::new(daemon.control())));
        Some(slaveclock_api::startup::spawn_api(server, state).context("control API")?)
    } else {
        info!("Control API disabled");
        None
    };

    // 6. Run.
    let result = daemon.run(shutdown_signal()).await;

    // 7. Shut down.
    if let Some(handle) = api_handle {
        handle.abort();
    }
    result.context("relays could not be forced off")?;
    info!("slaveclock shutdown complete");
    Ok(())
}

/// Load and validate configuration. A missing file means all defaults.
fn load_config(path: &Path) -> Result<ClockConfig, slaveclock_core::config::ConfigError> {
    if path.exists() {
        ClockConfig::from_file(path)
    } else {
        let mut config = ClockConfig::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Resolve on `SIGINT` (Ctrl-C) or `SIGTERM`.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Ctrl-C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("SIGINT received"),
        () = terminate => info!("SIGTERM received"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn config_flag_forms() {
        let cli = Cli::try_parse_from(["slaveclock", "--config", "/etc/clock.yaml"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/clock.yaml"));

        let cli = Cli::try_parse_from(["slaveclock", "--config=/srv/c.yaml"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("/srv/c.yaml"));
    }

    #[test]
    fn config_defaults_without_flag() {
        // The environment variable would take the place of the default.
        if std::env::var_os("SLAVECLOCK_CONFIG").is_none() {
            let cli = Cli::try_parse_from(["slaveclock"]).unwrap();
            assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
        }
    }

    #[test]
    fn unknown_flag_is_rejected() {
        assert!(Cli::try_parse_from(["slaveclock", "--bogus"]).is_err());
    }

    #[test]
    fn missing_file_means_defaults() {
        let path = std::env::temp_dir().join("slaveclock-no-such-config.yaml");
        let config = load_config(&path);
        assert!(config.is_ok());
    }
}
