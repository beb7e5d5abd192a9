use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use crate::share::Fingerprint;
use crate::{PeerShareError, Result};

/// Upper bound for one framed message.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub message_type: MessageType,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MessageType {
    // Group membership
    Handshake {
        device_id: Uuid,
        device_name: String,
        version: String,
    },
    HandshakeResponse {
        accepted: bool,
        reason: Option<String>,
    },

    // Distribution
    Announce(Announcement),
    GatherAddresses {
        port: u16,
        file: PathBuf,
    },
    AddressList {
        addresses: Vec<String>,
        port: u16,
        file: PathBuf,
    },

    // Control
    Ping,
    Pong,
    Disconnect,
}

/// Tells peers a transfer is about to start on `port`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub fingerprint: Fingerprint,
    pub action_id: String,
    pub extension: String,
    pub port: u16,
}

impl Message {
    pub fn new(message_type: MessageType) -> Self {
        Self {
            id: Uuid::new_v4(),
            message_type,
            timestamp: crate::utils::current_timestamp(),
        }
    }

    pub fn handshake(device_id: Uuid, device_name: String) -> Self {
        Self::new(MessageType::Handshake {
            device_id,
            device_name,
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    pub fn announce(announcement: Announcement) -> Self {
        Self::new(MessageType::Announce(announcement))
    }

    pub fn gather_addresses(port: u16, file: PathBuf) -> Self {
        Self::new(MessageType::GatherAddresses { port, file })
    }

    pub fn ping() -> Self {
        Self::new(MessageType::Ping)
    }

    pub fn pong() -> Self {
        Self::new(MessageType::Pong)
    }

    pub fn kind(&self) -> &'static str {
        match self.message_type {
            MessageType::Handshake { .. } => "Handshake",
            MessageType::HandshakeResponse { .. } => "HandshakeResponse",
            MessageType::Announce(_) => "Announce",
            MessageType::GatherAddresses { .. } => "GatherAddresses",
            MessageType::AddressList { .. } => "AddressList",
            MessageType::Ping => "Ping",
            MessageType::Pong => "Pong",
            MessageType::Disconnect => "Disconnect",
        }
    }
}

/// Writes `message` as a big-endian u32 length followed by its bincode body.
pub async fn write_message<W>(stream: &mut W, message: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let message_data = bincode::serialize(message)?;
    if message_data.len() > MAX_MESSAGE_SIZE {
        return Err(PeerShareError::Protocol(format!(
            "Message too large: {} bytes",
            message_data.len()
        )));
    }
    let message_len = message_data.len() as u32;

    stream.write_all(&message_len.to_be_bytes()).await?;
    stream.write_all(&message_data).await?;
    stream.flush().await?;

    Ok(())
}

pub async fn read_message<R>(stream: &mut R) -> Result<Message>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes).await?;
    let message_len = u32::from_be_bytes(len_bytes) as usize;

    if message_len > MAX_MESSAGE_SIZE {
        return Err(PeerShareError::Protocol(format!(
            "Message too large: {} bytes",
            message_len
        )));
    }

    let mut message_data = vec![0u8; message_len];
    stream.read_exact(&mut message_data).await?;

    Ok(bincode::deserialize(&message_data)?)
}
