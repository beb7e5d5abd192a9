pub mod config;
pub mod error;
pub mod logging;
pub mod network;
pub mod service;
pub mod share;
pub mod utils;

pub use error::{PeerShareError, Result};
