pub mod coordinator;
pub mod fingerprint;
pub mod ledger;
pub mod ports;
pub mod registry;
pub mod session;

pub use coordinator::{Coordinator, DistributionReport, GroupTransport};
pub use fingerprint::Fingerprint;
pub use ledger::{Inserted, ReceivedFile, ReceivedLedger};
pub use ports::{PortAllocator, PortRange};
pub use registry::{ReceiveCallback, ReceiveRegistry};
pub use session::HostRequest;
