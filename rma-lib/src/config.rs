//! Endpoint configuration.
//!
//! Every knob can be given as a flag or through the environment variable the
//! provider has always honoured.

use clap::{ArgAction, Args, builder::BoolishValueParser};
use serde::{Deserialize, Serialize};

use crate::{
    api::HmemIface,
    pkt::{CTSDATA_HDR_SIZE, OPT_CONNID_HDR_SIZE, READRSP_HDR_SIZE},
};

#[derive(Debug, Clone, PartialEq, Eq, Args, Serialize, Deserialize)]
#[serde(default)]
pub struct RmaConfig {
    /// Largest packet the transport can carry, headers included.
    #[clap(long, env = "FI_EFA_MTU_SIZE", default_value_t = 8192)]
    pub mtu_size: usize,

    /// Number of operation entries per endpoint.
    #[clap(long, env = "FI_EFA_TX_SIZE", default_value_t = 1024)]
    pub tx_size: usize,

    /// Maximum local or remote iov entries per request.
    #[clap(long, env = "FI_EFA_TX_IOV_LIMIT", default_value_t = 4)]
    pub tx_iov_limit: usize,

    /// Minimum credits a long-CTS sender asks for.
    #[clap(long, env = "FI_EFA_TX_MIN_CREDITS", default_value_t = 32)]
    pub tx_min_credits: usize,

    #[clap(
        long,
        env = "FI_EFA_USE_DEVICE_RDMA",
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new(),
    )]
    pub use_device_rdma: bool,

    /// Route same-host peers through the shared-memory transport.
    #[clap(
        long,
        env = "FI_EFA_ENABLE_SHM_TRANSFER",
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new(),
    )]
    pub use_shm_for_tx: bool,

    #[clap(
        long,
        env = "FI_EFA_MR_CACHE_ENABLE",
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new(),
    )]
    pub mr_cache_enable: bool,

    /// Writes of at least this many bytes from host memory use the
    /// read-based long protocol when the peer can RDMA read.
    #[clap(long, env = "FI_EFA_INTER_MIN_READ_WRITE_SIZE", default_value_t = 65536)]
    pub inter_min_read_write_size: usize,
}

impl Default for RmaConfig {
    fn default() -> Self {
        Self {
            mtu_size: 8192,
            tx_size: 1024,
            tx_iov_limit: 4,
            tx_min_credits: 32,
            use_device_rdma: true,
            use_shm_for_tx: true,
            mr_cache_enable: true,
            inter_min_read_write_size: 65536,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be > 0")]
    Zero(&'static str),
    #[error("mtu_size {0} cannot hold a data packet header")]
    MtuTooSmall(usize),
    #[error("tx_min_credits {0} overflows the long-CTS read window")]
    WindowOverflow(usize),
}

impl RmaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tx_size == 0 {
            return Err(ConfigError::Zero("tx_size"));
        }
        if self.tx_iov_limit == 0 {
            return Err(ConfigError::Zero("tx_iov_limit"));
        }
        if self.tx_min_credits == 0 {
            return Err(ConfigError::Zero("tx_min_credits"));
        }
        let min_mtu = (CTSDATA_HDR_SIZE + OPT_CONNID_HDR_SIZE).max(READRSP_HDR_SIZE);
        if self.mtu_size <= min_mtu {
            return Err(ConfigError::MtuTooSmall(self.mtu_size));
        }
        self.max_read_window()?;
        Ok(())
    }

    /// Payload bytes of one data packet.
    pub fn max_data_payload_size(&self) -> usize {
        self.mtu_size - CTSDATA_HDR_SIZE - OPT_CONNID_HDR_SIZE
    }

    /// Largest window a long-CTS read asks the peer for.
    pub fn max_read_window(&self) -> Result<usize, ConfigError> {
        self.tx_min_credits
            .checked_mul(self.max_data_payload_size())
            .ok_or(ConfigError::WindowOverflow(self.tx_min_credits))
    }

    /// Reads below this size fit in one read-response packet.
    pub fn short_read_limit(&self) -> usize {
        self.mtu_size - READRSP_HDR_SIZE
    }

    /// Threshold for the read-based long write protocol.
    pub fn min_read_write_size(&self, iface: HmemIface) -> usize {
        match iface {
            HmemIface::System | HmemIface::Cuda => self.inter_min_read_write_size,
            // The host cannot copy out of this memory, so any size goes by read.
            HmemIface::Neuron | HmemIface::SynapseAi => 0,
        }
    }
}

/// Capabilities of the local network device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCaps {
    pub rdma_read: bool,
    pub rdma_write: bool,
}

/// Capabilities the application requested when opening the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EndpointCaps {
    pub rma: bool,
}
