use crate::{
    api::FiAddr,
    error::Result,
    ope::{Ope, OpeHandle},
    pkt::Protocol,
};

/// The reliable-datagram transport underneath the RMA engine.
///
/// Calls are made with the endpoint lock held and must not block. Finished
/// work is handed back from `progress`.
#[cfg_attr(test, mockall::automock)]
pub trait RdmTransport {
    /// Start the transfer described by `ope` using `protocol`.
    ///
    /// `RmaError::NoBuffers` means the packet pool is exhausted;
    /// `RmaError::NoMemory` means a memory registration failed.
    fn post(&mut self, handle: OpeHandle, ope: &Ope, protocol: Protocol) -> Result<()>;

    /// Send a handshake request so the peer answers with its features.
    fn post_handshake(&mut self, addr: FiAddr) -> Result<()>;

    /// Drive completions without blocking. Returns the entries whose every
    /// packet has completed; the endpoint releases them.
    fn progress(&mut self) -> Vec<OpeHandle>;
}
