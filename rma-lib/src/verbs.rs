use std::fmt::Debug;

use crate::{
    api::{Iov, MemoryRegionRemoteKey, OpFlags, RmaIov, RmaMsg, SmallVec, total_iov_len},
    error::Result,
    mr::MrDesc,
};

/// The RMA verb set. Scalar and vector forms normalize into the message forms.
///
/// Implemented by the RDM endpoint and required of the shared-memory
/// transport used for same-host peers.
#[cfg_attr(test, mockall::automock(type Addr = crate::api::ShmAddr;))]
pub trait RmaVerbs {
    type Addr: Copy + Debug;

    fn readmsg(&self, msg: &RmaMsg<Self::Addr>, flags: OpFlags) -> Result<()>;

    fn writemsg(&self, msg: &RmaMsg<Self::Addr>, flags: OpFlags) -> Result<()>;

    fn read(
        &self,
        buf: Iov,
        desc: Option<MrDesc>,
        src_addr: Self::Addr,
        addr: u64,
        key: MemoryRegionRemoteKey,
        context: u64,
    ) -> Result<()> {
        self.readv(&[buf], &[desc], src_addr, addr, key, context)
    }

    fn readv(
        &self,
        iov: &[Iov],
        desc: &[Option<MrDesc>],
        src_addr: Self::Addr,
        addr: u64,
        key: MemoryRegionRemoteKey,
        context: u64,
    ) -> Result<()> {
        let msg = rma_msg(iov, desc, src_addr, addr, key, context, 0);
        self.readmsg(&msg, OpFlags::empty())
    }

    fn write(
        &self,
        buf: Iov,
        desc: Option<MrDesc>,
        dest_addr: Self::Addr,
        addr: u64,
        key: MemoryRegionRemoteKey,
        context: u64,
    ) -> Result<()> {
        self.writev(&[buf], &[desc], dest_addr, addr, key, context)
    }

    fn writev(
        &self,
        iov: &[Iov],
        desc: &[Option<MrDesc>],
        dest_addr: Self::Addr,
        addr: u64,
        key: MemoryRegionRemoteKey,
        context: u64,
    ) -> Result<()> {
        let msg = rma_msg(iov, desc, dest_addr, addr, key, context, 0);
        self.writemsg(&msg, OpFlags::empty())
    }

    /// Write delivering `data` to the target's completion queue.
    #[allow(clippy::too_many_arguments)]
    fn writedata(
        &self,
        buf: Iov,
        desc: Option<MrDesc>,
        data: u64,
        dest_addr: Self::Addr,
        addr: u64,
        key: MemoryRegionRemoteKey,
        context: u64,
    ) -> Result<()> {
        let msg = rma_msg(&[buf], &[desc], dest_addr, addr, key, context, data);
        self.writemsg(&msg, OpFlags::REMOTE_CQ_DATA)
    }

    /// The buffer may be reused as soon as this returns. No completion is
    /// generated.
    fn inject_write(
        &self,
        buf: Iov,
        dest_addr: Self::Addr,
        addr: u64,
        key: MemoryRegionRemoteKey,
    ) -> Result<()> {
        let msg = rma_msg(&[buf], &[], dest_addr, addr, key, 0, 0);
        self.writemsg(&msg, OpFlags::INJECT | OpFlags::NO_COMPLETION)
    }

    fn inject_writedata(
        &self,
        buf: Iov,
        data: u64,
        dest_addr: Self::Addr,
        addr: u64,
        key: MemoryRegionRemoteKey,
    ) -> Result<()> {
        let msg = rma_msg(&[buf], &[], dest_addr, addr, key, 0, data);
        self.writemsg(
            &msg,
            OpFlags::INJECT | OpFlags::NO_COMPLETION | OpFlags::REMOTE_CQ_DATA,
        )
    }
}

/// Single remote segment covering the whole local iov.
pub fn rma_msg<A>(
    iov: &[Iov],
    desc: &[Option<MrDesc>],
    peer: A,
    addr: u64,
    key: MemoryRegionRemoteKey,
    context: u64,
    data: u64,
) -> RmaMsg<A> {
    let rma_iov = RmaIov { addr, len: total_iov_len(iov), key };
    RmaMsg {
        msg_iov: SmallVec::from_slice(iov),
        desc: desc.iter().cloned().collect(),
        addr: peer,
        rma_iov: std::iter::once(rma_iov).collect(),
        context,
        data,
    }
}
