use std::collections::{HashMap, hash_map::Entry};

use bitflags::bitflags;
use tracing::trace;

use crate::{
    api::{FiAddr, ShmAddr},
    error::{Result, RmaError},
};

bitflags! {
    /// Extra features a peer advertises in its handshake packet.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct PeerFeatures: u64 {
        const RDMA_READ = 1 << 0;
        const DELIVERY_COMPLETE = 1 << 1;
        const CONSTANT_HEADER_LENGTH = 1 << 2;
        const CONNID_HEADER = 1 << 3;
        const RUNT = 1 << 4;
        const RDMA_WRITE = 1 << 5;
        const UNSOLICITED_WRITE_RECV = 1 << 6;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    NotStarted,
    /// The request could not be posted yet; retried on progress.
    Queued,
    Sent,
    Received(PeerFeatures),
}

/// What this endpoint knows about one optional capability of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityState {
    Unknown,
    Pending,
    Resolved(bool),
}

impl CapabilityState {
    pub fn is_supported(self) -> bool {
        self == CapabilityState::Resolved(true)
    }
}

/// Address-resolution output for a new peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerInfo {
    pub is_local: bool,
    /// Only meaningful when `is_local`.
    pub shm_addr: Option<ShmAddr>,
}

impl PeerInfo {
    pub fn remote() -> Self {
        Self { is_local: false, shm_addr: None }
    }

    pub fn local(shm_addr: ShmAddr) -> Self {
        Self { is_local: true, shm_addr: Some(shm_addr) }
    }
}

#[derive(Debug, Clone)]
pub struct Peer {
    pub addr: FiAddr,
    pub is_local: bool,
    pub shm_addr: Option<ShmAddr>,
    handshake: HandshakeState,
    in_backoff: bool,
}

impl Peer {
    fn new(addr: FiAddr, info: PeerInfo) -> Self {
        Self {
            addr,
            is_local: info.is_local,
            shm_addr: if info.is_local { info.shm_addr } else { None },
            handshake: HandshakeState::NotStarted,
            in_backoff: false,
        }
    }

    pub fn handshake(&self) -> HandshakeState {
        self.handshake
    }

    pub fn in_backoff(&self) -> bool {
        self.in_backoff
    }

    /// Features from the handshake; only trustworthy once received.
    pub fn features(&self) -> Option<PeerFeatures> {
        match self.handshake {
            HandshakeState::Received(features) => Some(features),
            _ => None,
        }
    }

    /// Derive the state of a single feature from the handshake state.
    pub fn capability(&self, feature: PeerFeatures) -> CapabilityState {
        match self.handshake {
            HandshakeState::NotStarted => CapabilityState::Unknown,
            HandshakeState::Queued | HandshakeState::Sent => CapabilityState::Pending,
            HandshakeState::Received(features) => {
                CapabilityState::Resolved(features.contains(feature))
            }
        }
    }

    pub(crate) fn set_handshake(&mut self, state: HandshakeState) {
        trace!(addr = %self.addr, from = ?self.handshake, to = ?state, "handshake state");
        self.handshake = state;
    }
}

/// Peer records of one endpoint, keyed by logical address.
#[derive(Default)]
pub struct PeerMap {
    peers: HashMap<FiAddr, Peer>,
}

impl PeerMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the record on first reference. An existing record is kept.
    pub fn insert(&mut self, addr: FiAddr, info: PeerInfo) -> &mut Peer {
        match self.peers.entry(addr) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(Peer::new(addr, info)),
        }
    }

    pub fn get(&self, addr: FiAddr) -> Result<&Peer> {
        self.peers.get(&addr).ok_or(RmaError::UnknownPeer(addr))
    }

    pub fn get_mut(&mut self, addr: FiAddr) -> Result<&mut Peer> {
        self.peers.get_mut(&addr).ok_or(RmaError::UnknownPeer(addr))
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Maintained by the transport on repeated failures to the same peer.
    pub fn set_backoff(&mut self, addr: FiAddr, in_backoff: bool) -> Result<()> {
        self.get_mut(addr)?.in_backoff = in_backoff;
        Ok(())
    }

    /// Peers whose handshake request still has to be posted.
    pub fn queued_handshakes(&self) -> Vec<FiAddr> {
        let mut addrs: Vec<_> = self
            .peers
            .values()
            .filter(|p| p.handshake == HandshakeState::Queued)
            .map(|p| p.addr)
            .collect();
        addrs.sort();
        addrs
    }
}
