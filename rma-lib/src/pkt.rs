//! Packet types and header sizes of the reliable-datagram protocol.
//!
//! The numeric IDs are carried on the wire and interpreted by the peer, so
//! they must not change.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PktType {
    EagerRtw = 70,
    LongctsRtw = 71,
    ShortRtr = 72,
    LongctsRtr = 73,
    LongreadRtw = 130,
    DcEagerRtw = 138,
    DcLongctsRtw = 139,
}

impl PktType {
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            PktType::EagerRtw => "EAGER_RTW",
            PktType::LongctsRtw => "LONGCTS_RTW",
            PktType::ShortRtr => "SHORT_RTR",
            PktType::LongctsRtr => "LONGCTS_RTR",
            PktType::LongreadRtw => "LONGREAD_RTW",
            PktType::DcEagerRtw => "DC_EAGER_RTW",
            PktType::DcLongctsRtw => "DC_LONGCTS_RTW",
        }
    }

    /// Fixed part of the request header, before optional headers and the
    /// remote iov array.
    pub fn base_hdr_size(self) -> usize {
        match self {
            PktType::EagerRtw => 8,
            PktType::DcEagerRtw => 16,
            PktType::LongctsRtw
            | PktType::DcLongctsRtw
            | PktType::LongreadRtw
            | PktType::ShortRtr
            | PktType::LongctsRtr => 24,
        }
    }
}

impl std::fmt::Display for PktType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name(), self.id())
    }
}

/// Header of a read-response packet.
pub const READRSP_HDR_SIZE: usize = 24;
/// Header of a data packet following a CTS.
pub const CTSDATA_HDR_SIZE: usize = 24;
pub const OPT_CONNID_HDR_SIZE: usize = 8;
pub const OPT_CQ_DATA_HDR_SIZE: usize = 8;
/// Length field preceding the raw address.
pub const OPT_RAW_ADDR_HDR_SIZE: usize = 4;
/// Wire size of one `(addr, len, key)` remote iov entry.
pub const RMA_IOV_SIZE: usize = 24;

/// Optional headers present on a request packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReqHdrOpts {
    /// Sender's raw address, until the peer has our address.
    pub raw_addr_len: Option<usize>,
    pub connid: bool,
    pub cq_data: bool,
}

/// Total request header size, including the remote iov array.
pub fn req_hdr_size(pkt_type: PktType, opts: ReqHdrOpts, rma_iov_count: usize) -> usize {
    let mut size = pkt_type.base_hdr_size();
    if let Some(raw_addr_len) = opts.raw_addr_len {
        size += OPT_RAW_ADDR_HDR_SIZE + raw_addr_len;
    } else if opts.connid {
        size += OPT_CONNID_HDR_SIZE;
    }
    if opts.cq_data {
        size += OPT_CQ_DATA_HDR_SIZE;
    }
    size + rma_iov_count * RMA_IOV_SIZE
}

/// How a transfer is put on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    /// Device-offloaded RDMA read.
    DeviceRead,
    /// Device-offloaded RDMA write (with immediate data if requested).
    DeviceWrite,
    /// Emulation over send/receive, starting with this request packet.
    Pkt(PktType),
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::DeviceRead => f.write_str("RDMA_READ"),
            Protocol::DeviceWrite => f.write_str("RDMA_WRITE"),
            Protocol::Pkt(pkt) => pkt.fmt(f),
        }
    }
}
