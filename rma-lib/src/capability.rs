use tracing::{debug, trace};

use crate::{
    config::DeviceCaps,
    error::{Result, RmaError},
    peer::{CapabilityState, HandshakeState, Peer, PeerFeatures},
    transport::RdmTransport,
};

/// Answers "may this transfer use the device path with this peer", starting
/// the capability handshake when the answer is not known yet.
#[derive(Debug, Clone, Copy)]
pub struct CapabilityTracker {
    device: DeviceCaps,
    use_device_rdma: bool,
}

impl CapabilityTracker {
    pub fn new(device: DeviceCaps, use_device_rdma: bool) -> Self {
        Self { device, use_device_rdma }
    }

    pub fn local_rdma_read(&self) -> bool {
        self.device.rdma_read && self.use_device_rdma
    }

    pub fn local_rdma_write(&self) -> bool {
        self.device.rdma_write && self.use_device_rdma
    }

    /// Both sides are known to support RDMA read. Never sends anything.
    pub fn both_support_rdma_read(&self, peer: &Peer) -> bool {
        self.local_rdma_read()
            && !peer.in_backoff()
            && peer.capability(PeerFeatures::RDMA_READ).is_supported()
    }

    /// Both sides are known to support RDMA write. Never sends anything.
    pub fn both_support_rdma_write(&self, peer: &Peer) -> bool {
        self.local_rdma_write()
            && !peer.in_backoff()
            && peer.capability(PeerFeatures::RDMA_WRITE).is_supported()
    }

    /// Ask the peer for its features. No-op once requested or received.
    ///
    /// A request the transport cannot take right now is queued and retried by
    /// [`retry_handshake`](Self::retry_handshake).
    pub fn trigger_handshake<T: RdmTransport + ?Sized>(
        &self,
        transport: &mut T,
        peer: &mut Peer,
    ) -> Result<()> {
        if peer.handshake() != HandshakeState::NotStarted {
            return Ok(());
        }
        match transport.post_handshake(peer.addr) {
            Ok(()) => peer.set_handshake(HandshakeState::Sent),
            Err(RmaError::Again(_) | RmaError::NoBuffers) => {
                debug!(addr = %peer.addr, "handshake request queued");
                peer.set_handshake(HandshakeState::Queued);
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Post a previously queued handshake request. Returns true once sent.
    pub fn retry_handshake<T: RdmTransport + ?Sized>(
        &self,
        transport: &mut T,
        peer: &mut Peer,
    ) -> Result<bool> {
        if peer.handshake() != HandshakeState::Queued {
            return Ok(false);
        }
        match transport.post_handshake(peer.addr) {
            Ok(()) => {
                peer.set_handshake(HandshakeState::Sent);
                Ok(true)
            }
            Err(RmaError::Again(_) | RmaError::NoBuffers) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn rdma_read_support<T: RdmTransport + ?Sized>(
        &self,
        transport: &mut T,
        peer: &mut Peer,
    ) -> Result<CapabilityState> {
        if !self.local_rdma_read() {
            return Ok(CapabilityState::Resolved(false));
        }
        self.peer_feature(transport, peer, PeerFeatures::RDMA_READ)
    }

    pub fn rdma_write_support<T: RdmTransport + ?Sized>(
        &self,
        transport: &mut T,
        peer: &mut Peer,
    ) -> Result<CapabilityState> {
        if !self.local_rdma_write() {
            return Ok(CapabilityState::Resolved(false));
        }
        self.peer_feature(transport, peer, PeerFeatures::RDMA_WRITE)
    }

    /// Delivery complete is a protocol feature; the device is not involved.
    pub fn delivery_complete_support<T: RdmTransport + ?Sized>(
        &self,
        transport: &mut T,
        peer: &mut Peer,
    ) -> Result<CapabilityState> {
        self.peer_feature(transport, peer, PeerFeatures::DELIVERY_COMPLETE)
    }

    fn peer_feature<T: RdmTransport + ?Sized>(
        &self,
        transport: &mut T,
        peer: &mut Peer,
        feature: PeerFeatures,
    ) -> Result<CapabilityState> {
        if peer.in_backoff() {
            trace!(addr = %peer.addr, "peer in backoff, device path unavailable");
            return Ok(CapabilityState::Pending);
        }
        let state = peer.capability(feature);
        if state != CapabilityState::Unknown {
            return Ok(state);
        }
        self.trigger_handshake(transport, peer)?;
        Ok(peer.capability(feature))
    }
}
