use clap::Parser;
use dcae::cli::{self, Cli, Commands, KeeperOptions, SimulationOptions};
use dcae::config::AppConfig;
use dcae::error::Result;
use tokio::sync::watch;
use tracing::{error, info};

mod main_runtime;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::CheckConfig => {
            main_runtime::init_logging_simple();
            cli::check_config(&cli.config)?;
        }
        Commands::Simulate {
            participants,
            cycles,
            price,
            drift,
            hold_days,
            snapshot,
        } => {
            let config = AppConfig::load_from(&cli.config)?;
            main_runtime::init_logging(&config.logging);
            info!(config_dir = %cli.config, "Starting simulation");

            let options = SimulationOptions {
                participants,
                cycles,
                price,
                drift,
                hold_days,
                snapshot,
            };
            tokio::select! {
                result = cli::run_simulation(config, options) => {
                    if let Err(e) = &result {
                        error!(error = %e, "Simulation failed");
                    }
                    result?;
                }
                _ = shutdown_signal() => {
                    info!("Interrupted, stopping simulation");
                }
            }
        }
        Commands::Keeper {
            price,
            fee_bps,
            observe_secs,
        } => {
            let config = AppConfig::load_from(&cli.config)?;
            main_runtime::init_logging(&config.logging);
            info!(config_dir = %cli.config, "Starting keeper");

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                shutdown_signal().await;
                info!("Shutdown signal received");
                let _ = shutdown_tx.send(true);
            });

            let options = KeeperOptions {
                price,
                fee_bps,
                observe_secs,
            };
            if let Err(e) = cli::run_keeper(config, options, shutdown_rx).await {
                error!(error = %e, "Keeper failed");
                return Err(e);
            }
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
