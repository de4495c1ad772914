use crate::{
    api::{HmemIface, OpFlags, RmaOp},
    capability::CapabilityTracker,
    config::{DeviceCaps, RmaConfig},
    error::RmaError,
    mr::MrTable,
    ope::Ope,
    peer::{HandshakeState, PeerFeatures, PeerInfo, PeerMap},
    pkt::{PktType, Protocol},
    protocol::{ProtocolSelector, ReadPlan, WritePlan},
    test_utils::{PEER, RecordingTransport, all_features, device_desc, full_device, host_desc, msg},
};

const READ_ONLY_DEVICE: DeviceCaps = DeviceCaps { rdma_read: true, rdma_write: false };

fn selector(config: &RmaConfig, device: DeviceCaps) -> ProtocolSelector {
    ProtocolSelector::new(config, CapabilityTracker::new(device, config.use_device_rdma), 32)
}

fn peers(handshake: HandshakeState) -> PeerMap {
    let mut peers = PeerMap::new();
    peers.insert(PEER, PeerInfo::remote()).set_handshake(handshake);
    peers
}

fn received(features: PeerFeatures) -> PeerMap {
    peers(HandshakeState::Received(features))
}

fn write_ope(lens: &[usize], flags: OpFlags) -> Ope {
    Ope::construct(&msg(lens, &[]), RmaOp::Write, flags)
}

fn read_ope(len: usize) -> Ope {
    Ope::construct(&msg(&[len], &[]), RmaOp::Read, OpFlags::empty())
}

#[test]
fn inject_never_uses_rdma_write() {
    let config = RmaConfig::default();
    let selector = selector(&config, full_device());
    let mut transport = RecordingTransport::default();
    let mut peers = received(all_features());
    let peer = peers.get_mut(PEER).unwrap();

    let ope = write_ope(&[1], OpFlags::INJECT | OpFlags::NO_COMPLETION);
    assert_eq!(selector.should_write_using_rdma(&mut transport, peer, &ope), Ok(false));
    let plan = selector.select_write(&mut transport, peer, &ope).unwrap();
    assert_eq!(plan.protocol, Protocol::Pkt(PktType::EagerRtw));

    let ope = write_ope(&[1], OpFlags::empty());
    let plan = selector.select_write(&mut transport, peer, &ope).unwrap();
    assert_eq!(plan.protocol, Protocol::DeviceWrite);
}

#[test]
fn cq_data_needs_single_segment_for_rdma_write() {
    let config = RmaConfig::default();
    let selector = selector(&config, full_device());
    let mut transport = RecordingTransport::default();
    let mut peers = received(all_features());
    let peer = peers.get_mut(PEER).unwrap();

    let two = write_ope(&[64, 64], OpFlags::REMOTE_CQ_DATA);
    assert_eq!(selector.should_write_using_rdma(&mut transport, peer, &two), Ok(false));
    assert_ne!(
        selector.select_write(&mut transport, peer, &two).unwrap().protocol,
        Protocol::DeviceWrite
    );

    let one = write_ope(&[128], OpFlags::REMOTE_CQ_DATA);
    assert_eq!(selector.should_write_using_rdma(&mut transport, peer, &one), Ok(true));
    assert_eq!(
        selector.select_write(&mut transport, peer, &one).unwrap(),
        WritePlan { protocol: Protocol::DeviceWrite, fallback: None }
    );
}

#[test]
fn short_read_boundary() {
    let config = RmaConfig::default();
    let selector = selector(&config, READ_ONLY_DEVICE);
    let limit = config.mtu_size - 24;

    assert_eq!(
        selector.emulated_read(limit - 1),
        ReadPlan { protocol: Protocol::Pkt(PktType::ShortRtr), window: 0 }
    );
    assert_eq!(
        selector.emulated_read(limit),
        ReadPlan { protocol: Protocol::Pkt(PktType::LongctsRtr), window: limit }
    );
}

#[test]
fn long_read_window_is_capped_by_credits() {
    let config = RmaConfig { tx_min_credits: 2, ..Default::default() };
    let selector = selector(&config, READ_ONLY_DEVICE);
    let plan = selector.emulated_read(1 << 20);
    assert_eq!(plan.protocol, Protocol::Pkt(PktType::LongctsRtr));
    assert_eq!(plan.window, 2 * (8192 - 32));
}

#[test]
fn read_prefers_rdma_read_when_both_sides_can() {
    let config = RmaConfig::default();
    let selector = selector(&config, full_device());
    let mut transport = RecordingTransport::default();
    let mut peers = received(PeerFeatures::RDMA_READ);
    let peer = peers.get_mut(PEER).unwrap();

    let plan = selector.select_read(&mut transport, peer, &read_ope(10)).unwrap();
    assert_eq!(plan.protocol, Protocol::DeviceRead);
}

#[test]
fn host_read_without_handshake_is_emulated_and_quiet() {
    let config = RmaConfig::default();
    let selector = selector(&config, full_device());
    let mut transport = RecordingTransport::default();
    let mut peers = peers(HandshakeState::NotStarted);
    let peer = peers.get_mut(PEER).unwrap();

    let plan = selector.select_read(&mut transport, peer, &read_ope(10)).unwrap();
    assert_eq!(plan.protocol, Protocol::Pkt(PktType::ShortRtr));
    assert!(transport.handshakes.is_empty());
}

#[test]
fn device_memory_read_needs_rdma_read() {
    let config = RmaConfig::default();
    let table = MrTable::default();
    let desc = device_desc(&table, HmemIface::Neuron, 4096);
    let ope = Ope::construct(&msg(&[4096], &[Some(desc)]), RmaOp::Read, OpFlags::empty());
    let selector = selector(&config, full_device());
    let mut transport = RecordingTransport::default();

    let mut unknown = peers(HandshakeState::NotStarted);
    let peer = unknown.get_mut(PEER).unwrap();
    assert_eq!(
        selector.select_read(&mut transport, peer, &ope),
        Err(RmaError::Again("waiting for handshake"))
    );
    assert_eq!(transport.handshakes, vec![PEER]);

    let mut lacking = received(PeerFeatures::CONNID_HEADER);
    let peer = lacking.get_mut(PEER).unwrap();
    assert!(matches!(
        selector.select_read(&mut transport, peer, &ope),
        Err(RmaError::NotSupported(_))
    ));

    let no_read_device = DeviceCaps { rdma_read: false, rdma_write: true };
    let local_only = self::selector(&config, no_read_device);
    let mut capable = received(all_features());
    let peer = capable.get_mut(PEER).unwrap();
    assert!(matches!(
        local_only.select_read(&mut transport, peer, &ope),
        Err(RmaError::NotSupported(_))
    ));
    assert_eq!(transport.handshakes.len(), 1);
}

#[test]
fn delivery_complete_waits_for_handshake() {
    let config = RmaConfig::default();
    let selector = selector(&config, READ_ONLY_DEVICE);
    let mut transport = RecordingTransport::default();
    let ope = write_ope(&[100], OpFlags::DELIVERY_COMPLETE);

    let mut fresh = peers(HandshakeState::NotStarted);
    let peer = fresh.get_mut(PEER).unwrap();
    assert_eq!(
        selector.select_write(&mut transport, peer, &ope),
        Err(RmaError::Again("waiting for handshake"))
    );
    assert_eq!(peer.handshake(), HandshakeState::Sent);
    assert_eq!(
        selector.select_write(&mut transport, peer, &ope),
        Err(RmaError::Again("waiting for handshake"))
    );
    assert_eq!(transport.handshakes.len(), 1);

    peer.set_handshake(HandshakeState::Received(PeerFeatures::CONNID_HEADER));
    assert!(matches!(
        selector.select_write(&mut transport, peer, &ope),
        Err(RmaError::NotSupported(_))
    ));

    peer.set_handshake(HandshakeState::Received(PeerFeatures::DELIVERY_COMPLETE));
    assert_eq!(
        selector.select_write(&mut transport, peer, &ope).unwrap().protocol,
        Protocol::Pkt(PktType::DcEagerRtw)
    );
}

#[test]
fn eager_capacity_boundary() {
    let config = RmaConfig::default();
    let selector = selector(&config, READ_ONLY_DEVICE);
    let mut transport = RecordingTransport::default();

    // EAGER_RTW base 8 + connid 8 + one remote iov 24.
    let mut known = received(PeerFeatures::CONNID_HEADER);
    let peer = known.get_mut(PEER).unwrap();
    let capacity = 8192 - 8 - 8 - 24;
    assert_eq!(
        selector.max_req_data_capacity(peer, &write_ope(&[1], OpFlags::empty()), PktType::EagerRtw),
        capacity
    );
    let at = write_ope(&[capacity], OpFlags::empty());
    let above = write_ope(&[capacity + 1], OpFlags::empty());
    assert_eq!(
        selector.select_write(&mut transport, peer, &at).unwrap().protocol,
        Protocol::Pkt(PktType::EagerRtw)
    );
    assert_eq!(
        selector.select_write(&mut transport, peer, &above).unwrap().protocol,
        Protocol::Pkt(PktType::LongctsRtw)
    );

    // Until the handshake arrives the raw address travels in the header.
    let mut unknown = peers(HandshakeState::Sent);
    let peer = unknown.get_mut(PEER).unwrap();
    let ope = write_ope(&[1], OpFlags::REMOTE_CQ_DATA);
    assert_eq!(
        selector.max_req_data_capacity(peer, &ope, PktType::EagerRtw),
        8192 - 8 - (4 + 32) - 8 - 24
    );
}

#[test]
fn long_write_uses_read_based_protocol_with_fallback() {
    let config = RmaConfig::default();
    let selector = selector(&config, READ_ONLY_DEVICE);
    let mut transport = RecordingTransport::default();
    let mut peers = received(PeerFeatures::RDMA_READ | PeerFeatures::CONNID_HEADER);
    let peer = peers.get_mut(PEER).unwrap();

    let ope = write_ope(&[65536], OpFlags::empty());
    assert_eq!(
        selector.select_write(&mut transport, peer, &ope).unwrap(),
        WritePlan {
            protocol: Protocol::Pkt(PktType::LongreadRtw),
            fallback: Some(Protocol::Pkt(PktType::LongctsRtw)),
        }
    );

    let ope = write_ope(&[65535], OpFlags::empty());
    assert_eq!(
        selector.select_write(&mut transport, peer, &ope).unwrap(),
        WritePlan { protocol: Protocol::Pkt(PktType::LongctsRtw), fallback: None }
    );
}

#[test]
fn long_read_write_needs_descriptor_without_mr_cache() {
    let config = RmaConfig { mr_cache_enable: false, ..Default::default() };
    let selector = selector(&config, READ_ONLY_DEVICE);
    let mut transport = RecordingTransport::default();
    let mut peers = received(PeerFeatures::RDMA_READ);
    let peer = peers.get_mut(PEER).unwrap();

    let bare = write_ope(&[1 << 20], OpFlags::empty());
    assert_eq!(
        selector.select_write(&mut transport, peer, &bare).unwrap().protocol,
        Protocol::Pkt(PktType::LongctsRtw)
    );

    let table = MrTable::default();
    let registered = Ope::construct(
        &msg(&[1 << 20], &[Some(host_desc(&table, 1 << 20))]),
        RmaOp::Write,
        OpFlags::empty(),
    );
    assert_eq!(
        selector.select_write(&mut transport, peer, &registered).unwrap().protocol,
        Protocol::Pkt(PktType::LongreadRtw)
    );
}

#[test]
fn device_memory_write_goes_by_read_at_any_size() {
    let config = RmaConfig::default();
    let selector = selector(&config, READ_ONLY_DEVICE);
    let mut transport = RecordingTransport::default();
    let mut peers = received(PeerFeatures::RDMA_READ | PeerFeatures::CONNID_HEADER);
    let peer = peers.get_mut(PEER).unwrap();
    let table = MrTable::default();
    let desc = device_desc(&table, HmemIface::SynapseAi, 16);

    let ope = Ope::construct(&msg(&[16], &[Some(desc)]), RmaOp::Write, OpFlags::empty());
    assert_eq!(
        selector.select_write(&mut transport, peer, &ope).unwrap(),
        WritePlan {
            protocol: Protocol::Pkt(PktType::LongreadRtw),
            fallback: Some(Protocol::Pkt(PktType::EagerRtw)),
        }
    );
}

#[test]
fn unresolved_read_support_does_not_pick_long_read() {
    let config = RmaConfig::default();
    let selector = selector(&config, READ_ONLY_DEVICE);
    let mut transport = RecordingTransport::default();
    let mut peers = peers(HandshakeState::NotStarted);
    let peer = peers.get_mut(PEER).unwrap();

    let ope = write_ope(&[1 << 20], OpFlags::empty());
    assert_eq!(
        selector.select_write(&mut transport, peer, &ope).unwrap(),
        WritePlan { protocol: Protocol::Pkt(PktType::LongctsRtw), fallback: None }
    );
    assert_eq!(transport.handshakes, vec![PEER]);
}
