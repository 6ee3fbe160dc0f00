// Shared bus transport
//
// Provides:
// - The `Transport` contract the protocol layer is written against
// - A FIFO job queue in front of a blocking bus device
// - A serial bus bridge device
// - An in-memory bus for simulation and tests

pub mod bridge;
pub mod mock;
pub mod queue;

use async_trait::async_trait;

pub use bridge::SerialBridge;
pub use mock::MockBus;
pub use queue::QueuedBus;

/// Error types for bus communication
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response from address 0x{address:02X}: {reason}")]
    InvalidResponse { address: u8, reason: String },

    #[error("Checksum mismatch for address 0x{address:02X}")]
    ChecksumMismatch { address: u8 },

    #[error("Address 0x{address:02X} not acknowledged (bridge status 0x{status:02X})")]
    Nack { address: u8, status: u8 },

    #[error("Timeout waiting for response from address 0x{address:02X}")]
    Timeout { address: u8 },

    #[error("Bus operation cancelled before it was issued")]
    Cancelled,

    #[error("Bus worker failed: {0}")]
    Worker(String),
}

pub type Result<T> = std::result::Result<T, BusError>;

/// Queued access to the shared bus.
///
/// Operations are executed in submission order. `write_read` issues its write
/// and read back to back, with nothing from other callers in between.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn write(&self, address: u8, frame: &[u8]) -> Result<()>;

    async fn read(&self, address: u8, len: usize) -> Result<Vec<u8>>;

    async fn write_read(&self, address: u8, frame: &[u8], len: usize) -> Result<Vec<u8>>;

    /// Drop every operation that has not been issued yet. Returns how many were dropped.
    fn clear_queue(&self) -> usize;
}

/// Blocking device that performs one bus transfer at a time
pub trait BusDevice: Send + 'static {
    fn write(&mut self, address: u8, frame: &[u8]) -> Result<()>;

    fn read(&mut self, address: u8, len: usize) -> Result<Vec<u8>>;
}
