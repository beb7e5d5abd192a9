pub mod connection;
pub mod hub;
pub mod peer;
pub mod protocol;

pub use connection::PeerConnection;
pub use hub::GroupHub;
pub use peer::GroupLink;
pub use protocol::{Announcement, Message, MessageType};
