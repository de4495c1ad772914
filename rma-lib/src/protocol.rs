//! Per-operation choice of wire protocol.
//!
//! The selector keeps no state of its own. Its answers depend on the peer's
//! handshake state, which it may advance by triggering a handshake.

use tracing::trace;

use crate::{
    api::{HmemIface, OpFlags},
    capability::CapabilityTracker,
    config::RmaConfig,
    error::{Result, RmaError},
    ope::Ope,
    peer::{CapabilityState, Peer, PeerFeatures},
    pkt::{PktType, Protocol, ReqHdrOpts, req_hdr_size},
    transport::RdmTransport,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadPlan {
    pub protocol: Protocol,
    /// Flow-control window for the long-CTS exchange, zero otherwise.
    pub window: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WritePlan {
    pub protocol: Protocol,
    /// Used instead when posting `protocol` fails with `RmaError::NoMemory`.
    pub fallback: Option<Protocol>,
}

impl WritePlan {
    fn single(protocol: Protocol) -> Self {
        Self { protocol, fallback: None }
    }
}

#[derive(Debug, Clone)]
pub struct ProtocolSelector {
    tracker: CapabilityTracker,
    mtu_size: usize,
    short_read_limit: usize,
    max_read_window: usize,
    min_read_write_size: [usize; HmemIface::COUNT],
    mr_cache_enable: bool,
    raw_addr_len: usize,
}

impl ProtocolSelector {
    pub fn new(
        config: &RmaConfig,
        tracker: CapabilityTracker,
        raw_addr_len: usize,
    ) -> Self {
        let ifaces =
            [HmemIface::System, HmemIface::Cuda, HmemIface::Neuron, HmemIface::SynapseAi];
        Self {
            tracker,
            mtu_size: config.mtu_size,
            short_read_limit: config.short_read_limit(),
            max_read_window: config.max_read_window().unwrap_or(usize::MAX),
            min_read_write_size: ifaces.map(|iface| config.min_read_write_size(iface)),
            mr_cache_enable: config.mr_cache_enable,
            raw_addr_len,
        }
    }

    pub fn tracker(&self) -> &CapabilityTracker {
        &self.tracker
    }

    pub fn select_read<T: RdmTransport + ?Sized>(
        &self,
        transport: &mut T,
        peer: &mut Peer,
        ope: &Ope,
    ) -> Result<ReadPlan> {
        let plan = if self.tracker.both_support_rdma_read(peer) {
            ReadPlan { protocol: Protocol::DeviceRead, window: 0 }
        } else if ope.first_desc().is_some_and(|d| d.iface().requires_device_rdma()) {
            match self.tracker.rdma_read_support(transport, peer)? {
                CapabilityState::Resolved(true) => {
                    ReadPlan { protocol: Protocol::DeviceRead, window: 0 }
                }
                CapabilityState::Resolved(false) => {
                    return Err(RmaError::NotSupported(
                        "device memory requires RDMA read, which the peer lacks",
                    ));
                }
                CapabilityState::Unknown | CapabilityState::Pending => {
                    return Err(RmaError::Again("waiting for handshake"));
                }
            }
        } else {
            self.emulated_read(ope.total_len)
        };
        trace!(
            addr = %peer.addr,
            len = ope.total_len,
            protocol = %plan.protocol,
            "read protocol"
        );
        Ok(plan)
    }

    /// Read emulated with a read request packet answered by data packets.
    pub fn emulated_read(&self, total_len: usize) -> ReadPlan {
        if total_len < self.short_read_limit {
            ReadPlan { protocol: Protocol::Pkt(PktType::ShortRtr), window: 0 }
        } else {
            ReadPlan {
                protocol: Protocol::Pkt(PktType::LongctsRtr),
                window: total_len.min(self.max_read_window),
            }
        }
    }

    /// Whether a WRITE goes through device RDMA write. May start a handshake.
    pub fn should_write_using_rdma<T: RdmTransport + ?Sized>(
        &self,
        transport: &mut T,
        peer: &mut Peer,
        ope: &Ope,
    ) -> Result<bool> {
        // The device may resend from the source buffer after the call returns.
        if ope.flags.contains(OpFlags::INJECT) {
            return Ok(false);
        }
        // Write with immediate carries a single segment.
        if ope.flags.contains(OpFlags::REMOTE_CQ_DATA)
            && (ope.iov_count() > 1 || ope.rma_iov_count() > 1)
        {
            return Ok(false);
        }
        Ok(self.tracker.rdma_write_support(transport, peer)?.is_supported())
    }

    pub fn select_write<T: RdmTransport + ?Sized>(
        &self,
        transport: &mut T,
        peer: &mut Peer,
        ope: &Ope,
    ) -> Result<WritePlan> {
        if self.should_write_using_rdma(transport, peer, ope)? {
            trace!(addr = %peer.addr, len = ope.total_len, "write protocol RDMA_WRITE");
            return Ok(WritePlan::single(Protocol::DeviceWrite));
        }

        let delivery_complete = ope.flags.contains(OpFlags::DELIVERY_COMPLETE);
        if delivery_complete {
            match self.tracker.delivery_complete_support(transport, peer)? {
                CapabilityState::Resolved(true) => {}
                CapabilityState::Resolved(false) => {
                    return Err(RmaError::NotSupported("peer lacks delivery complete"));
                }
                CapabilityState::Unknown | CapabilityState::Pending => {
                    return Err(RmaError::Again("waiting for handshake"));
                }
            }
        }

        let (eager, long) = if delivery_complete {
            (PktType::DcEagerRtw, PktType::DcLongctsRtw)
        } else {
            (PktType::EagerRtw, PktType::LongctsRtw)
        };
        let send_based = if ope.total_len <= self.max_req_data_capacity(peer, ope, eager) {
            Protocol::Pkt(eager)
        } else {
            Protocol::Pkt(long)
        };

        let desc = ope.first_desc();
        let iface = desc.map_or(HmemIface::System, |d| d.iface());
        let plan = if ope.total_len >= self.min_read_write_size[iface as usize]
            && self.tracker.rdma_read_support(transport, peer)?.is_supported()
            && (desc.is_some() || self.mr_cache_enable)
        {
            WritePlan {
                protocol: Protocol::Pkt(PktType::LongreadRtw),
                fallback: Some(send_based),
            }
        } else {
            WritePlan::single(send_based)
        };
        trace!(
            addr = %peer.addr,
            len = ope.total_len,
            protocol = %plan.protocol,
            "write protocol"
        );
        Ok(plan)
    }

    /// Payload bytes that fit in the first packet of a `pkt_type` request.
    pub fn max_req_data_capacity(
        &self,
        peer: &Peer,
        ope: &Ope,
        pkt_type: PktType,
    ) -> usize {
        let features = peer.features();
        let opts = ReqHdrOpts {
            raw_addr_len: features.is_none().then_some(self.raw_addr_len),
            connid: features.is_some_and(|f| f.contains(PeerFeatures::CONNID_HEADER)),
            cq_data: ope.flags.contains(OpFlags::REMOTE_CQ_DATA),
        };
        self.mtu_size.saturating_sub(req_hdr_size(pkt_type, opts, ope.rma_iov_count()))
    }
}
