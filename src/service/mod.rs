pub mod daemon;

pub use daemon::PeerShareDaemon;
