use syscalls::Errno;

use crate::{
    api::{FiAddr, MemoryRegionRemoteKey},
    config::ConfigError,
};

pub type Result<T> = std::result::Result<T, RmaError>;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RmaError {
    #[error("RmaError: try again ({0})")]
    Again(&'static str),
    #[error("RmaError: operation not supported ({0})")]
    NotSupported(&'static str),
    #[error("RmaError: operation requires the RMA capability, which was not requested")]
    CapabilityNotEnabled,
    #[error("RmaError: access denied, addr: {addr:#x} key: {key:?}")]
    AccessDenied { addr: u64, key: MemoryRegionRemoteKey },
    #[error("RmaError: transport out of packet buffers")]
    NoBuffers,
    #[error("RmaError: memory registration exhausted")]
    NoMemory,
    #[error("RmaError: unknown peer {0}")]
    UnknownPeer(FiAddr),
    #[error("RmaError: invalid config: {0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Transport(#[from] TransportError),
}

impl RmaError {
    pub fn errno(&self) -> Errno {
        match self {
            RmaError::Again(_) => Errno::EAGAIN,
            RmaError::NotSupported(_) | RmaError::CapabilityNotEnabled => {
                Errno::EOPNOTSUPP
            }
            RmaError::AccessDenied { .. } => Errno::EACCES,
            RmaError::NoBuffers => Errno::ENOBUFS,
            RmaError::NoMemory => Errno::ENOMEM,
            RmaError::UnknownPeer(_) | RmaError::Config(_) => Errno::EINVAL,
            RmaError::Transport(e) => e.code,
        }
    }

    /// Negative status code as returned by the libfabric-style verbs.
    pub fn code(&self) -> isize {
        -(self.errno().into_raw() as isize)
    }

    /// Caller should resubmit later; no state was changed.
    pub fn is_transient(&self) -> bool {
        matches!(self, RmaError::Again(_))
    }
}

/// Collapse a verb result into `0` or a negative errno.
pub fn status(result: &Result<()>) -> isize {
    match result {
        Ok(()) => 0,
        Err(e) => e.code(),
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("TransportError: code {code}, context: {context}")]
pub struct TransportError {
    pub code: Errno,
    pub context: &'static str,
}

impl TransportError {
    pub fn with_code(code: i32, context: &'static str) -> Self {
        Self { code: Errno::new(code), context }
    }
}
