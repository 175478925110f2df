//! Bus endpoint port.
//!
//! A [`BusEndpoint`] performs one physical transaction against a device
//! address. The arbiter owns ordering, retries and statistics; endpoints only
//! move bytes.

pub mod discovery;
pub mod simulated;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

pub use discovery::{parse_i2c_name, DiscoveredBus, I2cDiscovery};
pub use simulated::{SimAttempt, SimOutcome, SimulatedBus};

/// Why a single attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    /// No response within the timeout.
    #[error("timed out")]
    Timeout,
    /// The device did not acknowledge its address.
    #[error("no acknowledge")]
    NoAck,
    /// Arbitration loss, bus error or driver failure.
    #[error("bus fault: {0}")]
    Fault(String),
}

/// One physical bus.
pub trait BusEndpoint: Send + Sync {
    /// Write `bytes` to `address`.
    fn write(&self, address: u16, bytes: &[u8], timeout: Duration) -> Result<(), EndpointError>;

    /// Write `bytes` then read `read_len` bytes back.
    fn write_read(
        &self,
        address: u16,
        bytes: &[u8],
        read_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, EndpointError>;

    /// Change the clock. Endpoints with a fixed clock ignore this.
    fn set_frequency(&self, hz: u32) -> Result<(), EndpointError> {
        let _ = hz;
        Ok(())
    }
}

/// A bus handed to the arbiter at construction.
#[derive(Clone)]
pub struct BusSpec {
    /// Bus number devices refer to.
    pub id: u8,
    /// Hardware clock ceiling.
    pub max_frequency_hz: u32,
    /// Transport.
    pub endpoint: Arc<dyn BusEndpoint>,
}

impl BusSpec {
    /// Describe bus `id`.
    pub fn new(id: u8, max_frequency_hz: u32, endpoint: Arc<dyn BusEndpoint>) -> Self {
        Self {
            id,
            max_frequency_hz,
            endpoint,
        }
    }
}

impl fmt::Debug for BusSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusSpec")
            .field("id", &self.id)
            .field("max_frequency_hz", &self.max_frequency_hz)
            .finish_non_exhaustive()
    }
}
