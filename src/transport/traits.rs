//! Types shared between the UART transport and the HCI layer above it

use crate::config::{ehcill, uart};
use crate::hal::HalError;

/// Errors that can occur during transport operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// open() called while the transport is already open
    AlreadyOpen,
    /// Operation needs an open transport
    NotOpen,
    /// Invalid configuration
    InvalidConfig,
    /// The controller did not answer a wake indication in time.
    /// The data was still queued.
    WakeTimeout,
    /// No room appeared in the TX buffer
    TransmitTimeout,
    /// The UART peripheral reported an error
    Uart(HalError),
}

impl From<HalError> for TransportError {
    fn from(error: HalError) -> Self {
        TransportError::Uart(error)
    }
}

/// Identifies the transport to the HCI layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportId(pub u32);

/// The only transport this driver provides
pub const TRANSPORT_ID: TransportId = TransportId(1);

/// Settings applied by open()
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub baud_rate: u32,
    /// Wait after releasing the controller from reset
    pub init_delay_ms: u32,
    /// Bound on a host initiated wakeup
    pub wake_ack_timeout_ms: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            baud_rate: uart::BAUD_RATE,
            init_delay_ms: 0,
            wake_ack_timeout_ms: ehcill::WAKE_ACK_TIMEOUT_MS,
        }
    }
}

/// Driver level reconfiguration requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconfigureCommand {
    /// Hold off the controller and stop transmitting
    DisableTxRx,
    /// Undo DisableTxRx
    EnableTxRx,
    /// Reprogram the baud rate with TX/RX held off
    ChangeBaudRate(u32),
}

/// Receives HCI bytes from the transport
pub trait HciDataSink {
    /// Called with each run of received HCI bytes.
    ///
    /// A zero-length call means the transport closed and no further calls
    /// will follow.
    fn on_data(&mut self, id: TransportId, data: &[u8]);
}
