use std::{collections::VecDeque, sync::Arc};

use bytes::Bytes;

use crate::{
    api::{
        DomainAddress, FiAddr, HmemIface, Iov, MemoryRegionRemoteKey, MrAccess, RmaIov,
        RmaMsg, SmallVec,
    },
    config::{DeviceCaps, EndpointCaps, RmaConfig},
    endpoint::RdmEndpoint,
    error::{Result, RmaError},
    mr::{MrDesc, MrTable},
    ope::{Ope, OpeHandle},
    peer::{PeerFeatures, PeerInfo},
    pkt::Protocol,
    transport::RdmTransport,
    verbs::MockRmaVerbs,
};

pub const PEER: FiAddr = FiAddr(7);
pub const REMOTE_KEY: MemoryRegionRemoteKey = MemoryRegionRemoteKey(0x55);

/// Records everything posted and replays scripted post results.
#[derive(Default)]
pub struct RecordingTransport {
    pub posts: Vec<(OpeHandle, Protocol, usize)>,
    pub handshakes: Vec<FiAddr>,
    pub progress_calls: usize,
    /// Results for upcoming `post` calls; `Ok` once drained.
    pub post_results: VecDeque<Result<()>>,
    pub handshake_results: VecDeque<Result<()>>,
    /// Handed back by the next `progress`.
    pub finished: Vec<OpeHandle>,
}

impl RecordingTransport {
    pub fn protocols(&self) -> Vec<Protocol> {
        self.posts.iter().map(|(_, protocol, _)| *protocol).collect()
    }

    pub fn fail_next_post(&mut self, error: RmaError) {
        self.post_results.push_back(Err(error));
    }
}

impl RdmTransport for RecordingTransport {
    fn post(&mut self, handle: OpeHandle, ope: &Ope, protocol: Protocol) -> Result<()> {
        let result = self.post_results.pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            self.posts.push((handle, protocol, ope.total_len));
        }
        result
    }

    fn post_handshake(&mut self, addr: FiAddr) -> Result<()> {
        let result = self.handshake_results.pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            self.handshakes.push(addr);
        }
        result
    }

    fn progress(&mut self) -> Vec<OpeHandle> {
        self.progress_calls += 1;
        std::mem::take(&mut self.finished)
    }
}

pub type TestEndpoint<T = RecordingTransport> = RdmEndpoint<T, MockRmaVerbs>;

pub fn full_device() -> DeviceCaps {
    DeviceCaps { rdma_read: true, rdma_write: true }
}

pub fn no_device() -> DeviceCaps {
    DeviceCaps { rdma_read: false, rdma_write: false }
}

pub fn raw_addr() -> DomainAddress {
    DomainAddress(Bytes::from_static(&[0xfe; 32]))
}

pub fn open_endpoint<T: RdmTransport>(
    config: RmaConfig,
    device: DeviceCaps,
    transport: T,
    shm: Option<MockRmaVerbs>,
) -> TestEndpoint<T> {
    RdmEndpoint::open(
        config,
        EndpointCaps { rma: true },
        device,
        raw_addr(),
        Arc::new(MrTable::default()),
        transport,
        shm,
    )
    .unwrap()
}

/// Endpoint with one remote peer whose handshake has completed.
pub fn endpoint_with_peer(
    config: RmaConfig,
    device: DeviceCaps,
    features: PeerFeatures,
) -> TestEndpoint {
    let ep = open_endpoint(config, device, RecordingTransport::default(), None);
    ep.insert_peer(PEER, PeerInfo::remote());
    ep.handshake_received(PEER, features).unwrap();
    ep
}

pub fn all_features() -> PeerFeatures {
    PeerFeatures::RDMA_READ
        | PeerFeatures::RDMA_WRITE
        | PeerFeatures::DELIVERY_COMPLETE
        | PeerFeatures::CONNID_HEADER
}

/// Request of `lens.len()` local segments against one remote segment.
pub fn msg(lens: &[usize], desc: &[Option<MrDesc>]) -> RmaMsg<FiAddr> {
    let msg_iov: SmallVec<Iov> = lens
        .iter()
        .enumerate()
        .map(|(i, len)| Iov::new(0x10_0000 * (i as u64 + 1), *len))
        .collect();
    let total = msg_iov.iter().map(|v| v.len).sum();
    RmaMsg {
        msg_iov,
        desc: desc.iter().cloned().collect(),
        addr: PEER,
        rma_iov: std::iter::once(RmaIov { addr: 0x9000_0000, len: total, key: REMOTE_KEY })
            .collect(),
        context: 0xc0ffee,
        data: 0,
    }
}

pub fn host_desc(table: &MrTable, len: usize) -> MrDesc {
    table.register(0x10_0000, len, MrAccess::READ | MrAccess::WRITE, HmemIface::System, None)
}

pub fn device_desc(table: &MrTable, iface: HmemIface, len: usize) -> MrDesc {
    table.register(0x10_0000, len, MrAccess::READ | MrAccess::WRITE, iface, None)
}
