use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{
    api::{HmemIface, Iov, MemoryRegionRemoteKey, MrAccess, RmaIov, SmallVec},
    error::{Result, RmaError},
};

#[derive(Debug, PartialEq, Eq)]
pub struct MemoryRegion {
    addr: u64,
    len: usize,
    key: MemoryRegionRemoteKey,
    access: MrAccess,
    iface: HmemIface,
    shm: Option<MrDesc>,
}

impl MemoryRegion {
    pub fn addr(&self) -> u64 {
        self.addr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn key(&self) -> MemoryRegionRemoteKey {
        self.key
    }

    pub fn access(&self) -> MrAccess {
        self.access
    }

    pub fn iface(&self) -> HmemIface {
        self.iface
    }

    fn contains(&self, addr: u64, len: usize) -> bool {
        let Some(end) = addr.checked_add(len as u64) else {
            return false;
        };
        addr >= self.addr && end <= self.addr.saturating_add(self.len as u64)
    }
}

/// A local descriptor for a registered memory region.
///
/// Cheap to clone; the registration stays alive while any descriptor does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MrDesc(Arc<MemoryRegion>);

impl MrDesc {
    pub fn region(&self) -> &MemoryRegion {
        &self.0
    }

    pub fn key(&self) -> MemoryRegionRemoteKey {
        self.0.key
    }

    pub fn iface(&self) -> HmemIface {
        self.0.iface
    }

    /// Descriptor of the same buffer on the shared-memory transport, if any.
    pub fn shm_desc(&self) -> Option<&MrDesc> {
        self.0.shm.as_ref()
    }
}

/// How remote addresses in an `RmaIov` are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MrMode {
    /// The address is a virtual address inside the region.
    #[default]
    VirtAddr,
    /// The address is an offset from the start of the region.
    Offset,
}

/// Registration table of a domain. All lookups happen under one lock which is
/// never held across a call out of this module.
pub struct MrTable {
    mode: MrMode,
    inner: Mutex<MrTableInner>,
}

struct MrTableInner {
    next_key: u64,
    map: HashMap<MemoryRegionRemoteKey, MrDesc>,
}

impl MrTable {
    pub fn new(mode: MrMode) -> Self {
        Self {
            mode,
            inner: Mutex::new(MrTableInner { next_key: 1, map: HashMap::new() }),
        }
    }

    pub fn register(
        &self,
        addr: u64,
        len: usize,
        access: MrAccess,
        iface: HmemIface,
        shm: Option<MrDesc>,
    ) -> MrDesc {
        let mut inner = self.inner.lock();
        let key = MemoryRegionRemoteKey(inner.next_key);
        inner.next_key += 1;
        let desc = MrDesc(Arc::new(MemoryRegion { addr, len, key, access, iface, shm }));
        inner.map.insert(key, desc.clone());
        debug!(addr, len, ?key, ?iface, "registered memory region");
        desc
    }

    /// Returns false if the key was not registered.
    pub fn unregister(&self, key: MemoryRegionRemoteKey) -> bool {
        self.inner.lock().map.remove(&key).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Validate remote-memory descriptors and translate them into local
    /// segments plus the matching registration descriptors.
    ///
    /// The whole batch fails with `AccessDenied` on the first bad entry.
    pub fn verified_copy_iov(
        &self,
        rma_iov: &[RmaIov],
        access: MrAccess,
    ) -> Result<(SmallVec<Iov>, SmallVec<MrDesc>)> {
        let mut iov = SmallVec::with_capacity(rma_iov.len());
        let mut desc = SmallVec::with_capacity(rma_iov.len());
        for rma in rma_iov {
            let (addr, mr) = {
                let inner = self.inner.lock();
                self.verify_one(&inner, rma, access)
            }
            .map_err(|reason| {
                warn!(
                    addr = rma.addr,
                    key = rma.key.0,
                    reason,
                    "MR verification failed"
                );
                RmaError::AccessDenied { addr: rma.addr, key: rma.key }
            })?;
            iov.push(Iov { base: addr, len: rma.len });
            desc.push(mr);
        }
        Ok((iov, desc))
    }

    fn verify_one(
        &self,
        inner: &MrTableInner,
        rma: &RmaIov,
        access: MrAccess,
    ) -> std::result::Result<(u64, MrDesc), &'static str> {
        let mr = inner.map.get(&rma.key).ok_or("unknown key")?;
        if !mr.0.access.contains(access) {
            return Err("access not permitted");
        }
        let addr = match self.mode {
            MrMode::VirtAddr => rma.addr,
            MrMode::Offset => {
                rma.addr.checked_add(mr.0.addr).ok_or("offset overflow")?
            }
        };
        if !mr.0.contains(addr, rma.len) {
            return Err("out of registered bounds");
        }
        Ok((addr, mr.clone()))
    }
}

impl Default for MrTable {
    fn default() -> Self {
        Self::new(MrMode::default())
    }
}
