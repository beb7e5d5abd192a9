use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::connection::PeerConnection;
use super::protocol::{Announcement, Message, MessageType};
use crate::config::DeviceSettings;
use crate::share::GroupTransport;
use crate::{PeerShareError, Result};

/// This peer's membership in the group, held through the hub connection.
pub struct GroupLink {
    outgoing: mpsc::UnboundedSender<Message>,
}

impl GroupLink {
    /// Joins the group at `hub_address`. Messages relayed by the hub arrive
    /// on the returned receiver, which closes when the hub connection ends.
    pub async fn connect(
        hub_address: &str,
        device: &DeviceSettings,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<Message>)> {
        info!("Connecting to group hub at {}", hub_address);
        let stream = TcpStream::connect(hub_address).await?;
        let mut connection = PeerConnection::new(stream);

        connection
            .write_message(&Message::handshake(device.id, device.name.clone()))
            .await?;

        match connection.read_message().await? {
            Message {
                message_type: MessageType::HandshakeResponse { accepted: true, .. },
                ..
            } => info!("Joined group at {} as {}", hub_address, device.name),
            Message {
                message_type:
                    MessageType::HandshakeResponse {
                        accepted: false,
                        reason,
                    },
                ..
            } => {
                return Err(PeerShareError::Transport(
                    reason.unwrap_or_else(|| "Handshake rejected".to_string()),
                ));
            }
            other => {
                warn!("Expected handshake response, got {}", other.kind());
                return Err(PeerShareError::Protocol(
                    "Invalid handshake response".to_string(),
                ));
            }
        }

        let (mut read_half, mut write_half) = connection.split();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Message>();
        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();

        tokio::spawn(async move {
            loop {
                match read_half.read_message().await {
                    Ok(message) => {
                        if inbound_tx.send(message).is_err() {
                            debug!("Inbound receiver dropped, stopping read task");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Hub connection read error: {}", e);
                        break;
                    }
                }
            }
            info!("Read task for hub connection ended");
        });

        tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                let is_disconnect = matches!(message.message_type, MessageType::Disconnect);
                if let Err(e) = write_half.write_message(&message).await {
                    error!("Failed to write {} to hub: {}", message.kind(), e);
                    break;
                }
                if is_disconnect {
                    break;
                }
            }
            debug!("Write task for hub connection ended");
        });

        let link = Arc::new(Self {
            outgoing: outgoing_tx,
        });

        Ok((link, inbound_rx))
    }

    pub fn send(&self, message: Message) -> Result<()> {
        self.outgoing.send(message)?;
        Ok(())
    }

    pub fn ping(&self) -> Result<()> {
        self.send(Message::ping())
    }

    pub fn disconnect(&self) {
        if self.send(Message::new(MessageType::Disconnect)).is_err() {
            debug!("Hub connection already closed");
        }
    }
}

impl GroupTransport for GroupLink {
    fn broadcast_announcement(&self, announcement: Announcement) -> Result<()> {
        self.send(Message::announce(announcement))
    }

    fn request_peer_addresses(&self, port: u16, file: &Path) -> Result<()> {
        self.send(Message::gather_addresses(port, file.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::hub::GroupHub;
    use crate::share::Fingerprint;
    use std::path::PathBuf;
    use std::time::Duration;
    use uuid::Uuid;

    fn device(name: &str) -> DeviceSettings {
        DeviceSettings {
            id: Uuid::new_v4(),
            name: name.to_string(),
        }
    }

    async fn start_hub() -> String {
        let listener = GroupHub::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move { GroupHub::new().run(listener).await });
        addr
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Message>) -> Message {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_link_implements_group_transport() {
        let hub = start_hub().await;
        let (alice, mut alice_rx) = GroupLink::connect(&hub, &device("alice")).await.unwrap();
        let (_bob, mut bob_rx) = GroupLink::connect(&hub, &device("bob")).await.unwrap();

        // make sure bob is registered before alice asks around
        alice.ping().unwrap();
        assert_eq!(next(&mut alice_rx).await.kind(), "Pong");

        let announcement = Announcement {
            fingerprint: Fingerprint::of_bytes(b"song", 1024),
            action_id: "onAudio".to_string(),
            extension: ".mp3".to_string(),
            port: 47100,
        };
        alice.broadcast_announcement(announcement.clone()).unwrap();
        alice
            .request_peer_addresses(47100, Path::new("song.mp3"))
            .unwrap();

        match next(&mut bob_rx).await.message_type {
            MessageType::Announce(received) => assert_eq!(received, announcement),
            other => panic!("unexpected message: {:?}", other),
        }
        match next(&mut alice_rx).await.message_type {
            MessageType::AddressList { addresses, file, .. } => {
                assert_eq!(addresses.len(), 1);
                assert_eq!(file, PathBuf::from("song.mp3"));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rejected_handshake_is_transport_error() {
        let hub = start_hub().await;
        let me = device("twin");
        let (_first, _rx) = GroupLink::connect(&hub, &me).await.unwrap();

        let second = GroupLink::connect(&hub, &me).await;
        assert!(matches!(second, Err(PeerShareError::Transport(_))));
    }
}
