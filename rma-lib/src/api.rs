//! Types used in public API

use bitflags::bitflags;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{
    mr::MrDesc,
    utils::hex::{HexError, fmt_hex, from_hex},
};

pub type SmallVec<T> = ::smallvec::SmallVec<[T; 4]>;

/// Logical address of a peer in the endpoint's address vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct FiAddr(pub u64);

impl std::fmt::Display for FiAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fi_addr:{}", self.0)
    }
}

/// Address of a same-host peer on the shared-memory transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ShmAddr(pub u64);

/// Raw endpoint address as exchanged out of band.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DomainAddress(pub Bytes);

impl DomainAddress {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for DomainAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt_hex(f, &self.0)
    }
}

impl std::fmt::Display for DomainAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt_hex(f, &self.0)
    }
}

impl std::str::FromStr for DomainAddress {
    type Err = HexError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        from_hex(s).map(Self)
    }
}

/// A remote key for a memory region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct MemoryRegionRemoteKey(pub u64);

/// A local buffer segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Iov {
    pub base: u64,
    pub len: usize,
}

impl Iov {
    pub fn new(base: u64, len: usize) -> Self {
        Self { base, len }
    }
}

pub fn total_iov_len(iov: &[Iov]) -> usize {
    iov.iter().map(|v| v.len).sum()
}

/// A window into a peer's registered memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RmaIov {
    pub addr: u64,
    pub len: usize,
    pub key: MemoryRegionRemoteKey,
}

/// Kind of memory behind a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum HmemIface {
    System = 0,
    Cuda = 1,
    Neuron = 2,
    SynapseAi = 3,
}

impl HmemIface {
    pub const COUNT: usize = 4;

    /// Memory the host cannot touch; only the device can move it.
    pub fn requires_device_rdma(self) -> bool {
        matches!(self, HmemIface::Neuron | HmemIface::SynapseAi)
    }
}

bitflags! {
    /// Per-operation flags. Local only, never put on the wire.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct OpFlags: u64 {
        const REMOTE_CQ_DATA = 1 << 11;
        const INJECT = 1 << 18;
        const COMPLETION = 1 << 24;
        const DELIVERY_COMPLETE = 1 << 28;
        /// Do not generate a completion event for this operation.
        const NO_COMPLETION = 1 << 60;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct MrAccess: u64 {
        const READ = 1 << 8;
        const WRITE = 1 << 9;
        const REMOTE_READ = 1 << 10;
        const REMOTE_WRITE = 1 << 11;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RmaOp {
    Read,
    Write,
}

/// The message form every RMA verb is normalized into.
#[derive(Debug, Clone)]
pub struct RmaMsg<A> {
    pub msg_iov: SmallVec<Iov>,
    /// Either empty or one entry per `msg_iov` element.
    pub desc: SmallVec<Option<MrDesc>>,
    pub addr: A,
    pub rma_iov: SmallVec<RmaIov>,
    pub context: u64,
    pub data: u64,
}

impl<A> RmaMsg<A> {
    pub fn total_len(&self) -> usize {
        total_iov_len(&self.msg_iov)
    }

    pub fn first_desc(&self) -> Option<&MrDesc> {
        self.desc.first().and_then(Option::as_ref)
    }
}

/// Reported once an operation finishes, unless it was issued without completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RmaCompletion {
    pub op: RmaOp,
    pub context: u64,
    pub len: usize,
    pub flags: OpFlags,
}
