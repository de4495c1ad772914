pub mod api;
mod capability;
mod config;
mod endpoint;
mod error;
mod mr;
mod ope;
mod peer;
pub mod pkt;
mod protocol;
mod transport;
pub mod utils;
mod verbs;

pub use capability::CapabilityTracker;
pub use config::{ConfigError, DeviceCaps, EndpointCaps, RmaConfig};
pub use endpoint::RdmEndpoint;
pub use error::*;
pub use mr::{MemoryRegion, MrDesc, MrMode, MrTable};
pub use ope::{Ope, OpeHandle, OpePool};
pub use peer::{
    CapabilityState, HandshakeState, Peer, PeerFeatures, PeerInfo, PeerMap,
};
pub use protocol::{ProtocolSelector, ReadPlan, WritePlan};
pub use transport::RdmTransport;
pub use verbs::{RmaVerbs, rma_msg};

#[cfg(test)]
mod test_utils;

#[cfg(test)]
mod test_mr;


#[cfg(test)]
mod test_protocol;
