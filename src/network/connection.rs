use std::net::SocketAddr;
use tokio::net::TcpStream;
use tracing::debug;

use super::protocol::{read_message, write_message, Message};
use crate::Result;

// Split PeerConnection into read and write halves
pub struct PeerConnection {
    stream: TcpStream,
}

pub struct PeerConnectionReadHalf {
    stream: tokio::io::ReadHalf<TcpStream>,
}

pub struct PeerConnectionWriteHalf {
    stream: tokio::io::WriteHalf<TcpStream>,
}

impl PeerConnection {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub fn peer_addr(&self) -> Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }

    pub fn split(self) -> (PeerConnectionReadHalf, PeerConnectionWriteHalf) {
        let (read_half, write_half) = tokio::io::split(self.stream);
        (
            PeerConnectionReadHalf { stream: read_half },
            PeerConnectionWriteHalf { stream: write_half },
        )
    }

    pub async fn write_message(&mut self, message: &Message) -> Result<()> {
        debug!("📤 SENDING {}", message.kind());
        write_message(&mut self.stream, message).await
    }

    pub async fn read_message(&mut self) -> Result<Message> {
        let message = read_message(&mut self.stream).await?;
        debug!("📥 RECEIVED {}", message.kind());
        Ok(message)
    }
}

impl PeerConnectionReadHalf {
    pub async fn read_message(&mut self) -> Result<Message> {
        let message = read_message(&mut self.stream).await?;
        debug!("📥 RECEIVED {}", message.kind());
        Ok(message)
    }
}

impl PeerConnectionWriteHalf {
    pub async fn write_message(&mut self, message: &Message) -> Result<()> {
        debug!("📤 SENDING {}", message.kind());
        write_message(&mut self.stream, message).await
    }
}
