use crate::{
    api::{HmemIface, Iov, MemoryRegionRemoteKey, MrAccess, RmaIov},
    error::RmaError,
    mr::{MrMode, MrTable},
};

fn remote_table(mode: MrMode) -> (MrTable, MemoryRegionRemoteKey) {
    let table = MrTable::new(mode);
    let desc = table.register(
        0x1000,
        0x1000,
        MrAccess::REMOTE_READ | MrAccess::REMOTE_WRITE,
        HmemIface::System,
        None,
    );
    (table, desc.key())
}

#[test]
fn verifies_and_translates_virtual_addresses() {
    let (table, key) = remote_table(MrMode::VirtAddr);
    let rma_iov = [
        RmaIov { addr: 0x1000, len: 0x10, key },
        RmaIov { addr: 0x1ff0, len: 0x10, key },
    ];
    let (iov, desc) = table.verified_copy_iov(&rma_iov, MrAccess::REMOTE_WRITE).unwrap();
    assert_eq!(iov.as_slice(), &[Iov::new(0x1000, 0x10), Iov::new(0x1ff0, 0x10)]);
    assert_eq!(desc.len(), 2);
    assert_eq!(desc[0].key(), key);
}

#[test]
fn offset_mode_adds_region_base() {
    let (table, key) = remote_table(MrMode::Offset);
    let rma_iov = [RmaIov { addr: 0x20, len: 0x100, key }];
    let (iov, _) = table.verified_copy_iov(&rma_iov, MrAccess::REMOTE_READ).unwrap();
    assert_eq!(iov[0], Iov::new(0x1020, 0x100));
}

#[test]
fn rejects_unknown_key() {
    let (table, _) = remote_table(MrMode::VirtAddr);
    let bad = MemoryRegionRemoteKey(0xdead);
    let rma_iov = [RmaIov { addr: 0x1000, len: 1, key: bad }];
    assert_eq!(
        table.verified_copy_iov(&rma_iov, MrAccess::REMOTE_READ),
        Err(RmaError::AccessDenied { addr: 0x1000, key: bad })
    );
}

#[test]
fn rejects_missing_access() {
    let table = MrTable::default();
    let desc =
        table.register(0x1000, 0x1000, MrAccess::REMOTE_READ, HmemIface::System, None);
    let rma_iov = [RmaIov { addr: 0x1000, len: 8, key: desc.key() }];
    assert!(table.verified_copy_iov(&rma_iov, MrAccess::REMOTE_READ).is_ok());
    let err = table.verified_copy_iov(&rma_iov, MrAccess::REMOTE_WRITE).unwrap_err();
    assert!(matches!(err, RmaError::AccessDenied { .. }));
    assert_eq!(err.code(), -13);
}

#[test]
fn rejects_out_of_bounds() {
    let (table, key) = remote_table(MrMode::VirtAddr);
    for (addr, len) in [(0xfff, 1), (0x1ff0, 0x11), (u64::MAX, 2)] {
        let rma_iov = [RmaIov { addr, len, key }];
        assert!(
            table.verified_copy_iov(&rma_iov, MrAccess::REMOTE_READ).is_err(),
            "addr {addr:#x} len {len:#x}"
        );
    }
}

#[test]
fn one_bad_entry_fails_the_batch() {
    let (table, key) = remote_table(MrMode::VirtAddr);
    let rma_iov = [
        RmaIov { addr: 0x1000, len: 0x10, key },
        RmaIov { addr: 0x3000, len: 0x10, key },
    ];
    assert_eq!(
        table.verified_copy_iov(&rma_iov, MrAccess::REMOTE_READ),
        Err(RmaError::AccessDenied { addr: 0x3000, key })
    );
}

#[test]
fn unregistered_key_is_rejected() {
    let (table, key) = remote_table(MrMode::VirtAddr);
    assert!(table.unregister(key));
    assert!(!table.unregister(key));
    assert!(table.is_empty());
    let rma_iov = [RmaIov { addr: 0x1000, len: 1, key }];
    assert!(table.verified_copy_iov(&rma_iov, MrAccess::REMOTE_READ).is_err());
}
