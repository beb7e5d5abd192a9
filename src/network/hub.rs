//! Group relay the peers join.
//!
//! Every member keeps one framed connection to the hub. Announcements are
//! relayed to all other members, address requests are answered with the
//! remote IPs of everyone else.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::connection::PeerConnection;
use super::protocol::{Message, MessageType};
use crate::{PeerShareError, Result};

#[derive(Debug, Clone)]
struct Member {
    name: String,
    addr: SocketAddr,
    tx: mpsc::UnboundedSender<Message>,
}

#[derive(Clone, Default)]
pub struct GroupHub {
    members: Arc<RwLock<HashMap<Uuid, Member>>>,
}

impl GroupHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn bind(addr: &str) -> Result<TcpListener> {
        let listener = TcpListener::bind(addr).await?;
        info!("Group hub listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    pub async fn member_count(&self) -> usize {
        self.members.read().await.len()
    }

    pub async fn run(&self, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    info!("New connection from {}", addr);
                    let hub = self.clone();

                    tokio::spawn(async move {
                        if let Err(e) = hub.handle_connection(stream).await {
                            warn!("Connection from {} ended with error: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
                }
            }
        }
    }

    async fn handle_connection(&self, stream: TcpStream) -> Result<()> {
        let mut connection = PeerConnection::new(stream);
        let addr = connection.peer_addr()?;

        let (device_id, device_name) = match connection.read_message().await? {
            Message {
                message_type:
                    MessageType::Handshake {
                        device_id,
                        device_name,
                        version,
                    },
                ..
            } => {
                info!(
                    "Received handshake from {} ({}, v{})",
                    device_name, device_id, version
                );
                (device_id, device_name)
            }
            other => {
                warn!("Expected handshake from {}, got {}", addr, other.kind());
                connection
                    .write_message(&Message::new(MessageType::HandshakeResponse {
                        accepted: false,
                        reason: Some("Expected handshake".to_string()),
                    }))
                    .await?;
                return Err(PeerShareError::Protocol("Invalid handshake".to_string()));
            }
        };

        let (tx, rx) = mpsc::unbounded_channel::<Message>();
        let accepted = {
            let mut members = self.members.write().await;
            if members.contains_key(&device_id) {
                false
            } else {
                members.insert(
                    device_id,
                    Member {
                        name: device_name.clone(),
                        addr,
                        tx,
                    },
                );
                true
            }
        };

        if !accepted {
            info!("Rejecting duplicate device {}", device_id);
            connection
                .write_message(&Message::new(MessageType::HandshakeResponse {
                    accepted: false,
                    reason: Some("Device already joined".to_string()),
                }))
                .await?;
            return Ok(());
        }

        let result = self
            .serve_member(connection, device_id, &device_name, rx)
            .await;

        self.members.write().await.remove(&device_id);
        info!("{} ({}) left the group", device_name, device_id);
        result
    }

    async fn serve_member(
        &self,
        mut connection: PeerConnection,
        device_id: Uuid,
        device_name: &str,
        mut outbound: mpsc::UnboundedReceiver<Message>,
    ) -> Result<()> {
        connection
            .write_message(&Message::new(MessageType::HandshakeResponse {
                accepted: true,
                reason: None,
            }))
            .await?;
        info!("{} ({}) joined the group", device_name, device_id);

        let (mut read_half, mut write_half) = connection.split();

        let write_peer_id = device_id;
        let write_task = tokio::spawn(async move {
            while let Some(message) = outbound.recv().await {
                if let Err(e) = write_half.write_message(&message).await {
                    error!("Failed to write message to {}: {}", write_peer_id, e);
                    break;
                }
            }
        });

        loop {
            match read_half.read_message().await {
                Ok(Message {
                    message_type: MessageType::Disconnect,
                    ..
                }) => break,
                Ok(message) => self.route(device_id, message).await,
                Err(e) => {
                    debug!("Read from {} ended: {}", device_id, e);
                    break;
                }
            }
        }

        write_task.abort();
        Ok(())
    }

    async fn route(&self, from: Uuid, message: Message) {
        match message.message_type {
            MessageType::Announce(_) => {
                let members = self.members.read().await;
                for (id, member) in members.iter().filter(|(id, _)| **id != from) {
                    if member.tx.send(message.clone()).is_err() {
                        debug!("Member {} is going away, announcement dropped", id);
                    }
                }
                debug!(
                    "Relayed announcement from {} to {} member(s)",
                    from,
                    members.len().saturating_sub(1)
                );
            }
            MessageType::GatherAddresses { port, file } => {
                let members = self.members.read().await;
                let addresses: Vec<String> = members
                    .iter()
                    .filter(|(id, _)| **id != from)
                    .map(|(_, member)| member.addr.ip().to_string())
                    .collect();

                debug!(
                    "Answering address request from {} with {} address(es)",
                    from,
                    addresses.len()
                );
                if let Some(requester) = members.get(&from) {
                    let reply = Message::new(MessageType::AddressList {
                        addresses,
                        port,
                        file,
                    });
                    if requester.tx.send(reply).is_err() {
                        debug!("Requester {} left before the address list", requester.name);
                    }
                }
            }
            MessageType::Ping => {
                if let Some(member) = self.members.read().await.get(&from) {
                    let _ = member.tx.send(Message::pong());
                }
            }
            _ => debug!("Hub ignoring {} from {}", message.kind(), from),
        }
    }
}
