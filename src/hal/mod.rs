//! Board abstraction for the Bluetooth UART and its control lines

pub mod traits;

pub use traits::{CtsInterrupt, Edge, HalError, UartInterrupt, UartPeripheral};

#[cfg(test)]
pub use traits::mock;
