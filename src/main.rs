use anyhow::Context;
use clap::{Parser, Subcommand};
use peershare::{
    config::Settings, logging::init_logging, network::GroupHub, service::PeerShareDaemon,
    utils::format_file_size,
};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "peershare")]
#[command(about = "Distribute files to every peer in a group")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the group hub peers join
    Hub {
        /// Address to listen on
        #[arg(long)]
        bind: Option<String>,
    },
    /// Join the group and receive files until interrupted
    Join {
        /// Hub address
        #[arg(long)]
        hub: Option<String>,

        /// Receive action to register (repeatable)
        #[arg(long = "action")]
        actions: Vec<String>,
    },
    /// Send a file to every peer in the group
    Send {
        file: PathBuf,

        /// Receive action the peers should run
        #[arg(long)]
        action: String,

        /// Hub address
        #[arg(long)]
        hub: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    init_logging(cli.verbose, Some(&settings.share.failure_log))
        .context("Failed to initialize logging")?;

    info!("Starting PeerShare v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Hub { bind } => {
            if let Some(bind) = bind {
                settings.network.hub_bind = bind;
            }
            run_hub(&settings).await
        }
        Command::Join { hub, actions } => {
            if let Some(hub) = hub {
                settings.network.hub_address = hub;
            }
            run_join(settings, actions).await
        }
        Command::Send { file, action, hub } => {
            if let Some(hub) = hub {
                settings.network.hub_address = hub;
            }
            run_send(settings, &file, &action).await
        }
    }
}

async fn run_hub(settings: &Settings) -> anyhow::Result<()> {
    let listener = GroupHub::bind(&settings.network.hub_bind).await?;
    let hub = GroupHub::new();

    tokio::select! {
        result = hub.run(listener) => result?,
        signal = shutdown_signal() => {
            signal?;
            info!("Shutdown signal received, stopping hub...");
        }
    }

    info!("Hub stopped");
    Ok(())
}

async fn run_join(settings: Settings, actions: Vec<String>) -> anyhow::Result<()> {
    let daemon = PeerShareDaemon::new(settings).await?;
    let coordinator = daemon.coordinator();

    for id in actions {
        let name = id.clone();
        coordinator
            .register_receive_action(id, move |path: &Path| {
                info!("Action '{}' received {}", name, path.display());
            })
            .await;
    }
    if coordinator.registry().is_empty().await {
        warn!("No receive actions registered, received files will only be stored");
    }

    let shutdown = daemon.shutdown_handle();
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        let _ = shutdown.send(());
    });

    daemon.run().await?;
    Ok(())
}

async fn run_send(settings: Settings, file: &Path, action: &str) -> anyhow::Result<()> {
    let size = std::fs::metadata(file)
        .with_context(|| format!("Cannot read {}", file.display()))?
        .len();

    let daemon = PeerShareDaemon::new(settings).await?;
    let coordinator = daemon.coordinator();
    let shutdown = daemon.shutdown_handle();
    let mut reports = coordinator.subscribe_reports();
    let running = tokio::spawn(daemon.run());

    let port = match coordinator.send(file, action).await {
        Ok(port) => port,
        Err(e) => {
            let _ = shutdown.send(());
            let _ = running.await;
            return Err(e.into());
        }
    };
    info!(
        "Sending {} ({}) on port {}",
        file.display(),
        format_file_size(size),
        port
    );

    let report = loop {
        tokio::select! {
            received = reports.recv() => match received {
                Ok(report) if report.port == port => break Some(report),
                Ok(_) => continue,
                Err(e) => {
                    warn!("Distribution report unavailable: {}", e);
                    break None;
                }
            },
            _ = shutdown_signal() => {
                info!("Interrupted before the distribution finished");
                break None;
            }
        }
    };

    if let Some(report) = report {
        println!(
            "{}: delivered to {} peer(s), {} failed",
            report.file.display(),
            report.delivered.len(),
            report.failed.len()
        );
        for (address, reason) in &report.failed {
            println!("  {}: {}", address, reason);
        }
    }

    let _ = shutdown.send(());
    running.await??;
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal;

    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
        }
    }

    #[cfg(windows)]
    {
        signal::ctrl_c().await?;
    }

    Ok(())
}
