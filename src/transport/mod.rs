//! HCI UART transport with RTS/CTS flow control and eHCILL sleep support
//!
//! The transport is split in two. [`UartShared`] holds what the UART and CTS
//! interrupt handlers need and is shared with them by reference.
//! [`UartTransport`] is the foreground handle used by the HCI layer.

pub mod driver;
pub mod ring_buffer;
pub mod shared;
pub mod traits;

pub use driver::UartTransport;
pub use ring_buffer::RingBuffer;
pub use shared::{TransportFlags, UartShared};
pub use traits::{
    HciDataSink, ReconfigureCommand, TransportConfig, TransportError, TransportId, TRANSPORT_ID,
};
