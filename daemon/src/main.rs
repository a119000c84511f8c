use anyhow::{Context, Result};
use clap::Parser;
use nicewatch_daemon::{
    collector::LinuxProcessCollector,
    config::Config,
    controller::ThrottleController,
    daemon::{monitoring_loop, DaemonState},
    socket::{handle_client, ControlServer},
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "nicewatchd", version, about = "Keeps watched processes at a target nice value")]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run a single throttle pass, print the report and exit
    #[arg(long)]
    once: bool,
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    let explicit = path.is_some();
    let config_path = path.unwrap_or_else(Config::config_path);
    if !config_path.exists() {
        if explicit {
            anyhow::bail!("config file {:?} does not exist", config_path);
        }
        info!("No config file found, using defaults");
        return Ok(Config::default());
    }
    match Config::load(&config_path) {
        Ok(config) => {
            info!("Loaded config from {:?}", config_path);
            Ok(config)
        }
        Err(e) if !explicit => {
            warn!("Failed to load config: {}, using defaults", e);
            Ok(Config::default())
        }
        Err(e) => Err(e).with_context(|| format!("loading {:?}", config_path)),
    }
}

async fn shutdown_signal() -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("waiting for Ctrl-C")?,
        _ = sigterm.recv() => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config)?;

    let collector = LinuxProcessCollector::new(
        config.command_timeout(),
        config.escalation.command.clone(),
    );
    let mut controller = ThrottleController::from_config(&config, Arc::new(collector))
        .with_context(|| format!("opening activity log {:?}", config.log_path()))?;

    if cli.once {
        let report = controller.run_tick().await;
        controller.flush().context("flushing activity log")?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    info!("nicewatch daemon starting...");
    let server = ControlServer::bind(&config.socket_path())
        .await
        .with_context(|| format!("binding {:?}", config.socket_path()))?;
    let state = Arc::new(DaemonState::new(config, controller, server.broadcast_sender()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor = tokio::spawn(monitoring_loop(Arc::clone(&state), shutdown_rx));

    info!("Daemon ready, listening for connections...");
    let stop = shutdown_signal();
    tokio::pin!(stop);
    loop {
        tokio::select! {
            result = &mut stop => {
                if let Err(e) = result {
                    error!("Signal handling failed: {:#}", e);
                }
                info!("Shutdown requested");
                break;
            }
            accepted = server.accept() => match accepted {
                Ok(stream) => {
                    let state = Arc::clone(&state);
                    let broadcast_rx = server.broadcast_sender().subscribe();
                    tokio::spawn(async move {
                        handle_client(stream, broadcast_rx, state).await;
                    });
                }
                Err(e) => error!("Failed to accept connection: {}", e),
            },
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = monitor.await {
        error!("Monitoring loop panicked: {}", e);
    }
    Ok(())
}
