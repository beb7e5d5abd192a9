use thiserror::Error;

pub type Result<T> = std::result::Result<T, PeerShareError>;

#[derive(Error, Debug)]
pub enum PeerShareError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No available port in range {from}..{to}")]
    PortsExhausted { from: u16, to: u16 },

    #[error("Could not reach {address}:{port} within {seconds}s")]
    ConnectTimeout {
        address: String,
        port: u16,
        seconds: u64,
    },

    #[error("No sender connected to port {port} within {seconds}s")]
    ListenTimeout { port: u16, seconds: u64 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for PeerShareError {
    fn from(err: tokio::sync::mpsc::error::SendError<T>) -> Self {
        PeerShareError::Transport(format!("Channel closed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_failing_resource() {
        let exhausted = PeerShareError::PortsExhausted {
            from: 47100,
            to: 47101,
        };
        assert_eq!(
            exhausted.to_string(),
            "No available port in range 47100..47101"
        );

        let timeout = PeerShareError::ConnectTimeout {
            address: "10.0.0.2".to_string(),
            port: 47100,
            seconds: 10,
        };
        assert_eq!(timeout.to_string(), "Could not reach 10.0.0.2:47100 within 10s");
    }
}
