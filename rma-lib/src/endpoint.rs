use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use crate::{
    api::{
        DomainAddress, FiAddr, Iov, MrAccess, OpFlags, RmaCompletion, RmaIov, RmaMsg, RmaOp,
        ShmAddr, SmallVec,
    },
    capability::CapabilityTracker,
    config::{DeviceCaps, EndpointCaps, RmaConfig},
    error::{Result, RmaError},
    mr::{MrDesc, MrTable},
    ope::{OpeHandle, OpePool},
    peer::{HandshakeState, Peer, PeerFeatures, PeerInfo, PeerMap},
    protocol::ProtocolSelector,
    transport::RdmTransport,
    verbs::RmaVerbs,
};

/// Everything the endpoint lock guards.
struct EndpointState<T> {
    transport: T,
    peers: PeerMap,
    opes: OpePool,
    /// Filled by every transport progress pass, failed requests included.
    /// Only [`RdmEndpoint::progress`] drains it.
    completions: VecDeque<RmaCompletion>,
}

/// An RDM endpoint serving one-sided READ and WRITE.
///
/// All mutation happens under one lock, held for the whole verb. Verbs never
/// block: they either hand work to the transport or fail with
/// `RmaError::Again`.
pub struct RdmEndpoint<T: RdmTransport, S: RmaVerbs<Addr = ShmAddr>> {
    config: RmaConfig,
    caps: EndpointCaps,
    addr: DomainAddress,
    selector: ProtocolSelector,
    mr_table: Arc<MrTable>,
    shm: Option<S>,
    state: Mutex<EndpointState<T>>,
    rma_cap_warned: AtomicBool,
}

impl<T: RdmTransport, S: RmaVerbs<Addr = ShmAddr>> RdmEndpoint<T, S> {
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        config: RmaConfig,
        caps: EndpointCaps,
        device: DeviceCaps,
        addr: DomainAddress,
        mr_table: Arc<MrTable>,
        transport: T,
        shm: Option<S>,
    ) -> Result<Self> {
        config.validate()?;
        let tracker = CapabilityTracker::new(device, config.use_device_rdma);
        let selector = ProtocolSelector::new(&config, tracker, addr.len());
        debug!(
            %addr,
            rma = caps.rma,
            rdma_read = tracker.local_rdma_read(),
            rdma_write = tracker.local_rdma_write(),
            shm = shm.is_some(),
            "RdmEndpoint::open"
        );
        let opes = OpePool::new(config.tx_size);
        Ok(Self {
            config,
            caps,
            addr,
            selector,
            mr_table,
            shm,
            state: Mutex::new(EndpointState {
                transport,
                peers: PeerMap::new(),
                opes,
                completions: VecDeque::new(),
            }),
            rma_cap_warned: AtomicBool::new(false),
        })
    }

    pub fn addr(&self) -> &DomainAddress {
        &self.addr
    }

    pub fn config(&self) -> &RmaConfig {
        &self.config
    }

    pub fn mr_table(&self) -> &Arc<MrTable> {
        &self.mr_table
    }

    /// Record a resolved address. Re-inserting a known address keeps its state.
    pub fn insert_peer(&self, addr: FiAddr, info: PeerInfo) {
        self.state.lock().peers.insert(addr, info);
    }

    pub fn set_peer_backoff(&self, addr: FiAddr, in_backoff: bool) -> Result<()> {
        self.state.lock().peers.set_backoff(addr, in_backoff)
    }

    /// The peer's handshake packet arrived.
    pub fn handshake_received(&self, addr: FiAddr, features: PeerFeatures) -> Result<()> {
        let mut state = self.state.lock();
        let peer = state.peers.get_mut(addr)?;
        debug!(%addr, ?features, "handshake received");
        peer.set_handshake(HandshakeState::Received(features));
        Ok(())
    }

    pub fn peer_handshake(&self, addr: FiAddr) -> Result<HandshakeState> {
        Ok(self.state.lock().peers.get(addr)?.handshake())
    }

    /// Release an entry whose transfer finished outside `progress`.
    pub fn complete(&self, handle: OpeHandle) -> Option<RmaCompletion> {
        self.state.lock().opes.complete(handle)
    }

    /// Drive the transport once, post queued handshake requests and return
    /// the completions gathered since the last call.
    ///
    /// Failed requests also progress the transport and buffer what finished,
    /// so callers must keep polling this to keep that buffer bounded.
    pub fn progress(&self) -> Result<Vec<RmaCompletion>> {
        let mut state = self.state.lock();
        let EndpointState { transport, peers, opes, completions } = &mut *state;
        Self::progress_transport(transport, opes, completions);
        for addr in peers.queued_handshakes() {
            let peer = peers.get_mut(addr)?;
            if self.selector.tracker().retry_handshake(transport, peer)? {
                debug!(%addr, "queued handshake sent");
            }
        }
        Ok(completions.drain(..).collect())
    }

    /// Verify and translate remote iovs a peer asked us to expose.
    pub fn verify_remote_iov(
        &self,
        rma_iov: &[RmaIov],
        access: MrAccess,
    ) -> Result<(SmallVec<Iov>, SmallVec<MrDesc>)> {
        self.mr_table.verified_copy_iov(rma_iov, access)
    }

    /// Entries handed to the transport and not yet completed, oldest first.
    pub fn outstanding(&self) -> Vec<(OpeHandle, RmaOp, usize)> {
        let state = self.state.lock();
        state.opes.iter().map(|(handle, ope)| (handle, ope.op, ope.total_len)).collect()
    }

    pub fn in_use(&self) -> usize {
        self.state.lock().opes.in_use()
    }

    pub fn transport(&self) -> MappedMutexGuard<'_, T> {
        MutexGuard::map(self.state.lock(), |state| &mut state.transport)
    }

    fn progress_transport(
        transport: &mut T,
        opes: &mut OpePool,
        completions: &mut VecDeque<RmaCompletion>,
    ) {
        for handle in transport.progress() {
            completions.extend(opes.complete(handle));
        }
    }

    fn check_rma_cap(&self) -> Result<()> {
        if self.caps.rma {
            return Ok(());
        }
        if !self.rma_cap_warned.swap(true, Ordering::Relaxed) {
            warn!("RMA operation on an endpoint opened without the RMA capability");
        }
        Err(RmaError::CapabilityNotEnabled)
    }

    fn check_iov_limit(&self, msg: &RmaMsg<FiAddr>) {
        let limit = self.config.tx_iov_limit;
        assert!(
            msg.msg_iov.len() <= limit,
            "iov count {} above limit {limit}",
            msg.msg_iov.len()
        );
        assert!(
            msg.rma_iov.len() <= limit,
            "remote iov count {} above limit {limit}",
            msg.rma_iov.len()
        );
    }

    /// The shortcut transport and address for a same-host peer, if enabled.
    fn shm_route(&self, peer: &Peer) -> Option<(&S, ShmAddr)> {
        if !peer.is_local || !self.config.use_shm_for_tx {
            return None;
        }
        Some((self.shm.as_ref()?, peer.shm_addr?))
    }

    fn dispatch(&self, msg: &RmaMsg<FiAddr>, op: RmaOp, flags: OpFlags) -> Result<()> {
        debug!(
            addr = %msg.addr,
            len = msg.total_len(),
            iov_count = msg.msg_iov.len(),
            ?flags,
            ?op,
            "rma request"
        );
        self.check_rma_cap()?;
        self.check_iov_limit(msg);

        let mut state = self.state.lock();
        let EndpointState { transport, peers, opes, completions } = &mut *state;

        let peer = peers.get_mut(msg.addr)?;
        if peer.in_backoff() {
            trace!(addr = %msg.addr, "peer in backoff");
            return Err(RmaError::Again("peer in backoff"));
        }

        if let Some((shm, shm_addr)) = self.shm_route(peer) {
            let shm_msg = shm_msg(msg, shm_addr);
            trace!(addr = %msg.addr, ?shm_addr, "delegating to shm");
            return match op {
                RmaOp::Read => shm.readmsg(&shm_msg, flags),
                RmaOp::Write => shm.writemsg(&shm_msg, flags),
            };
        }

        let Some(handle) = opes.alloc(msg, op, flags) else {
            Self::progress_transport(transport, opes, completions);
            return Err(RmaError::Again("TX entries exhausted"));
        };

        let result = match op {
            RmaOp::Read => self.post_read(transport, peer, opes, handle),
            RmaOp::Write => self.post_write(transport, peer, opes, handle),
        };
        if let Err(e) = result {
            opes.release(handle);
            Self::progress_transport(transport, opes, completions);
            return Err(match e {
                RmaError::NoBuffers => RmaError::Again("transport out of packet buffers"),
                e => e,
            });
        }
        Ok(())
    }

    fn post_read(
        &self,
        transport: &mut T,
        peer: &mut Peer,
        opes: &mut OpePool,
        handle: OpeHandle,
    ) -> Result<()> {
        let plan = self.selector.select_read(transport, peer, opes.live(handle))?;
        opes.live_mut(handle).window = plan.window;
        transport.post(handle, opes.live(handle), plan.protocol)
    }

    fn post_write(
        &self,
        transport: &mut T,
        peer: &mut Peer,
        opes: &OpePool,
        handle: OpeHandle,
    ) -> Result<()> {
        let ope = opes.live(handle);
        let plan = self.selector.select_write(transport, peer, ope)?;
        match (transport.post(handle, ope, plan.protocol), plan.fallback) {
            (Err(RmaError::NoMemory), Some(fallback)) => {
                debug!(
                    addr = %peer.addr,
                    from = %plan.protocol,
                    to = %fallback,
                    "registration exhausted, falling back"
                );
                transport.post(handle, ope, fallback)
            }
            (result, _) => result,
        }
    }
}

impl<T: RdmTransport, S: RmaVerbs<Addr = ShmAddr>> RmaVerbs for RdmEndpoint<T, S> {
    type Addr = FiAddr;

    fn readmsg(&self, msg: &RmaMsg<FiAddr>, flags: OpFlags) -> Result<()> {
        self.dispatch(msg, RmaOp::Read, flags)
    }

    fn writemsg(&self, msg: &RmaMsg<FiAddr>, flags: OpFlags) -> Result<()> {
        self.dispatch(msg, RmaOp::Write, flags)
    }
}

/// Copy of `msg` addressed to the shm peer, with descriptors translated to
/// their shm registrations. The caller's message is left untouched.
fn shm_msg(msg: &RmaMsg<FiAddr>, shm_addr: ShmAddr) -> RmaMsg<ShmAddr> {
    RmaMsg {
        msg_iov: msg.msg_iov.clone(),
        desc: msg
            .desc
            .iter()
            .map(|desc| desc.as_ref().and_then(|d| d.shm_desc().cloned()))
            .collect(),
        addr: shm_addr,
        rma_iov: msg.rma_iov.clone(),
        context: msg.context,
        data: msg.data,
    }
}
