use tracing::debug;

use crate::{
    api::{
        FiAddr, Iov, OpFlags, RmaCompletion, RmaIov, RmaMsg, RmaOp, SmallVec,
        total_iov_len,
    },
    mr::MrDesc,
    utils::obj_pool::{Handle, SlotPool},
};

pub type OpeHandle = Handle;

/// Tracks one in-flight RMA request.
#[derive(Debug, Clone)]
pub struct Ope {
    pub op: RmaOp,
    pub addr: FiAddr,
    pub iov: SmallVec<Iov>,
    /// One entry per `iov` element; `None` where the caller gave no descriptor.
    pub desc: SmallVec<Option<MrDesc>>,
    pub rma_iov: SmallVec<RmaIov>,
    pub total_len: usize,
    pub flags: OpFlags,
    /// Bytes the peer may send in one long-CTS burst.
    pub window: usize,
    pub context: u64,
    pub data: u64,
}

impl Ope {
    /// Build an entry from the caller's message. Both iov lists are copied so
    /// the entry stays valid after the verb returns.
    pub fn construct(msg: &RmaMsg<FiAddr>, op: RmaOp, flags: OpFlags) -> Self {
        assert!(!msg.rma_iov.is_empty(), "RMA request without a remote iov");

        let mut desc: SmallVec<Option<MrDesc>> = msg.desc.clone();
        desc.resize(msg.msg_iov.len(), None);

        Self {
            op,
            addr: msg.addr,
            iov: msg.msg_iov.clone(),
            desc,
            rma_iov: msg.rma_iov.clone(),
            total_len: total_iov_len(&msg.msg_iov),
            flags,
            window: 0,
            context: msg.context,
            data: msg.data,
        }
    }

    pub fn iov_count(&self) -> usize {
        self.iov.len()
    }

    pub fn rma_iov_count(&self) -> usize {
        self.rma_iov.len()
    }

    pub fn first_desc(&self) -> Option<&MrDesc> {
        self.desc.first().and_then(Option::as_ref)
    }

    fn completion(&self) -> Option<RmaCompletion> {
        if self.flags.contains(OpFlags::NO_COMPLETION) {
            return None;
        }
        Some(RmaCompletion {
            op: self.op,
            context: self.context,
            len: self.total_len,
            flags: self.flags,
        })
    }
}

/// Operation entries of one endpoint. Live entries form the endpoint's
/// active-transfer list.
pub struct OpePool {
    pool: SlotPool<Ope>,
}

impl OpePool {
    pub fn new(capacity: usize) -> Self {
        Self { pool: SlotPool::with_capacity(capacity) }
    }

    pub fn in_use(&self) -> usize {
        self.pool.len()
    }

    /// `None` means the pool is exhausted; try again after progress.
    pub fn alloc(
        &mut self,
        msg: &RmaMsg<FiAddr>,
        op: RmaOp,
        flags: OpFlags,
    ) -> Option<OpeHandle> {
        if self.pool.is_full() {
            debug!("TX entries exhausted");
            return None;
        }
        self.pool.alloc(Ope::construct(msg, op, flags)).ok()
    }

    /// The entry behind a handle the caller knows to be live.
    pub fn live(&self, handle: OpeHandle) -> &Ope {
        self.pool.live(handle)
    }

    pub fn live_mut(&mut self, handle: OpeHandle) -> &mut Ope {
        self.pool.live_mut(handle)
    }

    /// Return the entry to the pool. Each entry must be released exactly once.
    pub fn release(&mut self, handle: OpeHandle) -> Ope {
        self.pool.free(handle)
    }

    /// Release after the transport finished every packet of the entry.
    pub fn complete(&mut self, handle: OpeHandle) -> Option<RmaCompletion> {
        self.release(handle).completion()
    }

    pub fn iter(&self) -> impl Iterator<Item = (OpeHandle, &Ope)> {
        self.pool.iter()
    }
}
