use crate::{
    config::Settings,
    network::{GroupLink, Message},
    share::Coordinator,
    PeerShareError, Result,
};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info, warn};

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

pub struct PeerShareDaemon {
    settings: Arc<Settings>,
    coordinator: Arc<Coordinator>,
    link: Arc<GroupLink>,
    inbound: mpsc::UnboundedReceiver<Message>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl PeerShareDaemon {
    /// Joins the configured hub and builds the coordinator on top of the link.
    pub async fn new(settings: Settings) -> Result<Self> {
        let settings = Arc::new(settings);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let (link, inbound) =
            GroupLink::connect(&settings.network.hub_address, &settings.device).await?;
        let coordinator = Coordinator::new(settings.share.clone(), link.clone())?;

        Ok(Self {
            settings,
            coordinator,
            link,
            inbound,
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub fn coordinator(&self) -> Arc<Coordinator> {
        self.coordinator.clone()
    }

    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    pub async fn run(mut self) -> Result<()> {
        info!("Starting PeerShare daemon...");
        info!("Device ID: {}", self.settings.device.id);
        info!("Device Name: {}", self.settings.device.name);
        info!("Hub: {}", self.settings.network.hub_address);
        info!(
            "Transfer ports: {}..{}",
            self.settings.share.port_range_from, self.settings.share.port_range_to
        );

        let mut keepalive = interval(KEEPALIVE_INTERVAL);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                message = self.inbound.recv() => match message {
                    Some(message) => self.coordinator.handle_message(message).await,
                    None => {
                        error!("Lost connection to hub {}", self.settings.network.hub_address);
                        break Err(PeerShareError::Transport("Hub connection closed".to_string()));
                    }
                },
                _ = keepalive.tick() => {
                    if let Err(e) = self.link.ping() {
                        warn!("Keepalive failed: {}", e);
                    }
                }
                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break Ok(());
                }
            }
        };

        self.link.disconnect();
        let purged = self.coordinator.shutdown().await;
        info!("Removed {} received file(s)", purged);
        info!("PeerShare daemon stopped");
        result
    }
}
