//! Announce, gather addresses, fan out.
//!
//! The initiator fingerprints the file, takes a port, announces it to the
//! group and asks the transport who is connected. Receivers either already
//! hold the content and dispatch at once, or start a receive session on the
//! announced port. When the address list comes back the initiator opens one
//! send session per address.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::fingerprint::Fingerprint;
use super::ledger::{ReceivedFile, ReceivedLedger};
use super::ports::{PortAllocator, PortRange};
use super::registry::ReceiveRegistry;
use super::session::{self, HostRequest};
use crate::config::ShareSettings;
use crate::network::protocol::{Announcement, Message, MessageType};
use crate::utils::normalize_peer_address;
use crate::{PeerShareError, Result};

/// What the coordinator needs from the group-messaging layer.
///
/// Both calls only enqueue; the address list arrives later as an
/// [`MessageType::AddressList`] handed to [`Coordinator::handle_message`].
pub trait GroupTransport: Send + Sync {
    fn broadcast_announcement(&self, announcement: Announcement) -> Result<()>;

    fn request_peer_addresses(&self, port: u16, file: &Path) -> Result<()>;
}

/// Outcome of one fan-out, published once every per-peer send has finished.
///
/// Purely informational: `send` never waits for it and nothing else in the
/// distribution depends on anyone subscribing.
#[derive(Debug, Clone)]
pub struct DistributionReport {
    pub port: u16,
    pub file: PathBuf,
    pub fingerprint: Fingerprint,
    pub delivered: Vec<String>,
    pub failed: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
struct Outbound {
    file: PathBuf,
    fingerprint: Fingerprint,
}

pub struct Coordinator {
    settings: ShareSettings,
    ports: PortAllocator,
    ledger: ReceivedLedger,
    registry: ReceiveRegistry,
    transport: Arc<dyn GroupTransport>,
    outbound: Mutex<HashMap<u16, Outbound>>,
    reports: broadcast::Sender<DistributionReport>,
    tasks: Mutex<JoinSet<()>>,
}

impl Coordinator {
    pub fn new(settings: ShareSettings, transport: Arc<dyn GroupTransport>) -> Result<Arc<Self>> {
        settings.validate()?;
        let range = PortRange::new(settings.port_range_from, settings.port_range_to)?;
        let (reports, _) = broadcast::channel(32);

        Ok(Arc::new(Self {
            settings,
            ports: PortAllocator::new(range),
            ledger: ReceivedLedger::new(),
            registry: ReceiveRegistry::new(),
            transport,
            outbound: Mutex::new(HashMap::new()),
            reports,
            tasks: Mutex::new(JoinSet::new()),
        }))
    }

    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    pub fn ledger(&self) -> &ReceivedLedger {
        &self.ledger
    }

    pub fn registry(&self) -> &ReceiveRegistry {
        &self.registry
    }

    pub fn subscribe_reports(&self) -> broadcast::Receiver<DistributionReport> {
        self.reports.subscribe()
    }

    pub async fn register_receive_action<F>(&self, id: impl Into<String>, callback: F)
    where
        F: Fn(&Path) + Send + Sync + 'static,
    {
        self.registry.register(id, callback).await;
    }

    pub async fn unregister_receive_action(&self, id: &str) {
        self.registry.unregister(id).await;
    }

    /// Starts distributing `file` to the group. Only port exhaustion and
    /// local failures before anything is announced reach the caller; the
    /// per-peer transfers run detached.
    pub async fn send(&self, file: impl AsRef<Path>, action_id: &str) -> Result<u16> {
        let file = file.as_ref().to_path_buf();
        let fingerprint = Fingerprint::of_file(&file, self.settings.buffer_size)?;
        let port = self.ports.allocate()?;

        info!(
            "Distributing {:?} as '{}' on port {} ({})",
            file, action_id, port, fingerprint
        );

        self.outbound.lock().await.insert(
            port,
            Outbound {
                file: file.clone(),
                fingerprint: fingerprint.clone(),
            },
        );

        let announcement = Announcement {
            fingerprint,
            action_id: action_id.to_string(),
            extension: session::extension_of(&file),
            port,
        };

        let announced = self
            .transport
            .broadcast_announcement(announcement)
            .and_then(|()| self.transport.request_peer_addresses(port, &file));

        if let Err(e) = announced {
            self.outbound.lock().await.remove(&port);
            self.ports.release(port);
            return Err(e);
        }

        Ok(port)
    }

    /// Entry point for group messages relevant to distribution.
    pub async fn handle_message(self: &Arc<Self>, message: Message) {
        match message.message_type {
            MessageType::Announce(announcement) => self.on_announcement(announcement).await,
            MessageType::AddressList {
                addresses,
                port,
                file,
            } => self.on_address_list(addresses, port, file).await,
            _ => debug!("Coordinator ignoring {} message", message.kind()),
        }
    }

    pub async fn on_announcement(self: &Arc<Self>, announcement: Announcement) {
        if let Some(known) = self.ledger.get(&announcement.fingerprint).await {
            info!(
                "Already holding {} at {:?}, skipping transfer",
                announcement.fingerprint, known.path
            );
            self.registry
                .dispatch(&announcement.action_id, &known.path)
                .await;
            return;
        }

        let request = HostRequest {
            extension: announcement.extension.clone(),
            action_id: announcement.action_id.clone(),
            port: announcement.port,
            buffer_size: self.settings.buffer_size,
            receive_dir: self.settings.receive_dir(),
            listen_timeout: self.settings.listen_timeout(),
            expected: Some(announcement.fingerprint.clone()),
        };

        let this = self.clone();
        self.track(async move {
            this.receive(announcement.fingerprint, request).await;
        })
        .await;
    }

    async fn receive(self: Arc<Self>, fingerprint: Fingerprint, request: HostRequest) {
        let port = request.port;
        let host = session::host(&request, &self.ledger);
        tokio::pin!(host);

        let file: ReceivedFile = tokio::select! {
            biased;
            Some(file) = self.ledger.wait_for(&fingerprint) => {
                self.registry.dispatch(&file.action_id, &file.path).await;
                // the session sees the same entry and gives up its port
                if let Err(e) = host.await {
                    log_session_failure("receive", &format!("port {}", port), &e);
                }
                return;
            }
            result = &mut host => match result {
                Ok(file) => {
                    if file.fingerprint != fingerprint {
                        warn!(
                            "Port {} delivered {} but {} was announced",
                            port, file.fingerprint, fingerprint
                        );
                    }
                    file
                }
                Err(e) => {
                    log_session_failure("receive", &format!("port {}", port), &e);
                    return;
                }
            },
        };

        self.registry.dispatch(&file.action_id, &file.path).await;
    }

    pub async fn on_address_list(self: &Arc<Self>, addresses: Vec<String>, port: u16, file: PathBuf) {
        let Some(outbound) = self.outbound.lock().await.remove(&port) else {
            warn!(
                "Address list for port {} ({:?}) matches no pending distribution",
                port, file
            );
            return;
        };

        if outbound.file != file {
            warn!(
                "Address list for port {} names {:?}, sending {:?}",
                port, file, outbound.file
            );
        }

        let this = self.clone();
        self.track(async move {
            this.fan_out(port, outbound, addresses).await;
        })
        .await;
    }

    async fn track<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().await;
        while tasks.try_join_next().is_some() {}
        tasks.spawn(task);
    }

    async fn fan_out(&self, port: u16, outbound: Outbound, addresses: Vec<String>) {
        let timeout = self.settings.timeout();
        let mut sessions = JoinSet::new();

        info!(
            "Sending {:?} to {} peer(s) on port {}",
            outbound.file,
            addresses.len(),
            port
        );

        for address in addresses.iter().map(|a| normalize_peer_address(a)) {
            let path = outbound.file.clone();
            sessions.spawn(async move {
                let result = session::client_send(&address, port, &path, timeout).await;
                (address, result)
            });
        }

        let mut report = DistributionReport {
            port,
            file: outbound.file,
            fingerprint: outbound.fingerprint,
            delivered: Vec::new(),
            failed: Vec::new(),
        };

        while let Some(joined) = sessions.join_next().await {
            match joined {
                Ok((address, Ok(_))) => report.delivered.push(address),
                Ok((address, Err(e))) => {
                    log_session_failure("send", &address, &e);
                    report.failed.push((address, e.to_string()));
                }
                Err(e) => error!("Send session on port {} aborted: {}", port, e),
            }
        }

        self.ports.release(port);
        info!(
            "Distribution on port {} finished: {} delivered, {} failed",
            port,
            report.delivered.len(),
            report.failed.len()
        );

        // no subscribers is fine
        let _ = self.reports.send(report);
    }

    /// Stops every session still in flight, then forgets every received
    /// file and deletes it from disk.
    pub async fn shutdown(&self) -> usize {
        let mut tasks = self.tasks.lock().await;
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
        drop(tasks);

        self.ledger.purge().await
    }
}

/// Detached sessions have no caller; the failure log is their only report.
fn log_session_failure(role: &str, target: &str, e: &PeerShareError) {
    error!(target: "peershare::session", "{} session with {} abandoned: {}", role, target, e);
}
