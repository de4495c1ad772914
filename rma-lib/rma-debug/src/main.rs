use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use logging_lib::LoggingOpts;
use rma_lib::{
    DeviceCaps, EndpointCaps, MrTable, Ope, OpeHandle, PeerFeatures, PeerInfo, RdmEndpoint,
    RdmTransport, RmaConfig, RmaError, RmaVerbs,
    api::{
        DomainAddress, FiAddr, HmemIface, Iov, MemoryRegionRemoteKey, MrAccess, OpFlags,
        RmaIov, RmaMsg, ShmAddr, SmallVec,
    },
    pkt::Protocol,
};
use tracing::info;

/// Run one RMA request against a simulated transport and print the protocol
/// the endpoint picks for it.
#[derive(Parser, Debug)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    op: Op,

    #[clap(flatten)]
    request: RequestOpts,

    #[clap(flatten)]
    config: RmaConfig,

    #[clap(flatten)]
    logging: LoggingOpts,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Read,
    Write,
}

#[derive(clap::Args, Debug)]
struct RequestOpts {
    /// Bytes per local segment.
    #[clap(long, default_value_t = 4096)]
    len: usize,

    #[clap(long, default_value_t = 1)]
    segments: usize,

    /// Memory kind of the local buffer. Registers it when given.
    #[clap(long, value_enum)]
    iface: Option<Iface>,

    #[clap(long)]
    inject: bool,

    #[clap(long)]
    cq_data: bool,

    #[clap(long)]
    delivery_complete: bool,

    /// Features the peer advertises in its handshake.
    #[clap(long, value_enum, value_delimiter = ',')]
    features: Vec<Feature>,

    #[clap(long, value_enum, default_value = "lazy")]
    handshake: HandshakeMode,

    /// The peer lives on this host.
    #[clap(long)]
    local: bool,

    #[clap(long, default_value_t = true, action = clap::ArgAction::Set)]
    device_rdma_read: bool,

    #[clap(long, default_value_t = true, action = clap::ArgAction::Set)]
    device_rdma_write: bool,

    /// Raw address of this endpoint in hex, 32 zero bytes by default. Its
    /// length sizes the address header carried until the handshake arrives.
    #[clap(long)]
    addr: Option<DomainAddress>,

    /// Fail the first post with this errno, e.g. 12 for ENOMEM.
    #[clap(long)]
    fail_first_post: Option<i32>,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Iface {
    System,
    Cuda,
    Neuron,
    Synapseai,
}

impl From<Iface> for HmemIface {
    fn from(iface: Iface) -> Self {
        match iface {
            Iface::System => HmemIface::System,
            Iface::Cuda => HmemIface::Cuda,
            Iface::Neuron => HmemIface::Neuron,
            Iface::Synapseai => HmemIface::SynapseAi,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Feature {
    RdmaRead,
    RdmaWrite,
    DeliveryComplete,
    ConnidHeader,
}

impl From<Feature> for PeerFeatures {
    fn from(feature: Feature) -> Self {
        match feature {
            Feature::RdmaRead => PeerFeatures::RDMA_READ,
            Feature::RdmaWrite => PeerFeatures::RDMA_WRITE,
            Feature::DeliveryComplete => PeerFeatures::DELIVERY_COMPLETE,
            Feature::ConnidHeader => PeerFeatures::CONNID_HEADER,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeMode {
    /// The handshake completed before the request.
    Done,
    /// The peer answers once asked; a deferred request is resubmitted.
    Lazy,
    /// The peer never answers.
    Silent,
}

const PEER: FiAddr = FiAddr(1);
const SHM_PEER: ShmAddr = ShmAddr(1);
const LOCAL_BUF: u64 = 0x7f00_0000_0000;
const REMOTE_BUF: u64 = 0x7e00_0000_0000;

/// Completes everything on the next progress call.
#[derive(Default)]
struct SimTransport {
    in_flight: Vec<OpeHandle>,
    fail_next: Option<RmaError>,
    protocols: Vec<Protocol>,
}

impl RdmTransport for SimTransport {
    fn post(
        &mut self,
        handle: OpeHandle,
        ope: &Ope,
        protocol: Protocol,
    ) -> rma_lib::Result<()> {
        if let Some(e) = self.fail_next.take() {
            info!(%protocol, error = %e, "post failed");
            return Err(e);
        }
        info!(?handle, %protocol, len = ope.total_len, window = ope.window, "post");
        self.in_flight.push(handle);
        self.protocols.push(protocol);
        Ok(())
    }

    fn post_handshake(&mut self, addr: FiAddr) -> rma_lib::Result<()> {
        info!(%addr, "post handshake");
        Ok(())
    }

    fn progress(&mut self) -> Vec<OpeHandle> {
        std::mem::take(&mut self.in_flight)
    }
}

struct SimShm;

impl RmaVerbs for SimShm {
    type Addr = ShmAddr;

    fn readmsg(&self, msg: &RmaMsg<ShmAddr>, flags: OpFlags) -> rma_lib::Result<()> {
        println!("shm read {} bytes from {:?} flags {flags:?}", msg.total_len(), msg.addr);
        Ok(())
    }

    fn writemsg(&self, msg: &RmaMsg<ShmAddr>, flags: OpFlags) -> rma_lib::Result<()> {
        println!("shm write {} bytes to {:?} flags {flags:?}", msg.total_len(), msg.addr);
        Ok(())
    }
}

fn build_msg(
    opts: &RequestOpts,
    mr_table: &MrTable,
    remote_key: MemoryRegionRemoteKey,
) -> RmaMsg<FiAddr> {
    let msg_iov: SmallVec<Iov> = (0..opts.segments)
        .map(|i| Iov::new(LOCAL_BUF + (i * opts.len) as u64, opts.len))
        .collect();
    let total = opts.segments * opts.len;
    let desc = match opts.iface {
        Some(iface) => {
            let desc = mr_table.register(
                LOCAL_BUF,
                total,
                MrAccess::READ | MrAccess::WRITE,
                iface.into(),
                None,
            );
            std::iter::repeat_n(Some(desc), opts.segments).collect()
        }
        None => SmallVec::new(),
    };
    RmaMsg {
        msg_iov,
        desc,
        addr: PEER,
        rma_iov: std::iter::once(RmaIov { addr: REMOTE_BUF, len: total, key: remote_key })
            .collect(),
        context: 1,
        data: if opts.cq_data { 0xfeed } else { 0 },
    }
}

fn flags(opts: &RequestOpts) -> OpFlags {
    let mut flags = OpFlags::COMPLETION;
    if opts.inject {
        flags |= OpFlags::INJECT | OpFlags::NO_COMPLETION;
    }
    if opts.cq_data {
        flags |= OpFlags::REMOTE_CQ_DATA;
    }
    if opts.delivery_complete {
        flags |= OpFlags::DELIVERY_COMPLETE;
    }
    flags
}

fn submit(
    ep: &RdmEndpoint<SimTransport, SimShm>,
    op: Op,
    msg: &RmaMsg<FiAddr>,
    flags: OpFlags,
) -> rma_lib::Result<()> {
    match op {
        Op::Read => ep.readmsg(msg, flags),
        Op::Write => ep.writemsg(msg, flags),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging_lib::init(&cli.logging)?;
    let opts = &cli.request;

    let features = opts
        .features
        .iter()
        .fold(PeerFeatures::empty(), |acc, f| acc | PeerFeatures::from(*f));
    let device =
        DeviceCaps { rdma_read: opts.device_rdma_read, rdma_write: opts.device_rdma_write };
    let mr_table = Arc::new(MrTable::default());
    let remote_key = MemoryRegionRemoteKey(0x1234);

    let transport = SimTransport {
        fail_next: opts.fail_first_post.map(|code| match code {
            12 => RmaError::NoMemory,
            105 => RmaError::NoBuffers,
            code => rma_lib::TransportError::with_code(code, "simulated").into(),
        }),
        ..Default::default()
    };
    let ep = RdmEndpoint::open(
        cli.config.clone(),
        EndpointCaps { rma: true },
        device,
        opts.addr.clone().unwrap_or_else(|| DomainAddress(vec![0u8; 32].into())),
        mr_table.clone(),
        transport,
        Some(SimShm),
    )
    .context("failed to open endpoint")?;

    let info = if opts.local { PeerInfo::local(SHM_PEER) } else { PeerInfo::remote() };
    ep.insert_peer(PEER, info);
    if opts.handshake == HandshakeMode::Done {
        ep.handshake_received(PEER, features)?;
    }

    let msg = build_msg(opts, &mr_table, remote_key);
    let flags = flags(opts);
    let mut result = submit(&ep, cli.op, &msg, flags);
    if let Err(RmaError::Again(reason)) = &result {
        println!("deferred: {reason}");
        if opts.handshake == HandshakeMode::Lazy {
            ep.handshake_received(PEER, features)?;
            ep.progress()?;
            result = submit(&ep, cli.op, &msg, flags);
        }
    }

    let op = match cli.op {
        Op::Read => "read",
        Op::Write => "write",
    };
    match result {
        Ok(()) => {
            let protocols = ep.transport().protocols.clone();
            match protocols.last() {
                Some(protocol) => println!("{op} {} bytes -> {protocol}", msg.total_len()),
                None => println!("{op} {} bytes -> shm", msg.total_len()),
            }
        }
        Err(e) => println!("{op} {} bytes -> error {} ({e})", msg.total_len(), e.code()),
    }

    for completion in ep.progress()? {
        println!("completion: {completion:?}");
    }
    Ok(())
}
