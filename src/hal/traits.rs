//! Hardware traits for the Bluetooth UART
//!
//! The transport needs a little more than a byte stream: it drives the UART
//! interrupt enables itself and re-arms the CTS edge interrupt on every edge.
//! Pins and delays come from `embedded-hal`; the UART and the CTS edge
//! control are defined here so a board crate can implement them over its PAC
//! or HAL, and tests can swap in the mocks below.

use embedded_hal::digital::InputPin;

/// Errors reported by the UART peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalError {
    /// The baud rate cannot be generated from the peripheral clock
    UnsupportedBaudRate,
    /// The peripheral rejected the request
    Peripheral,
}

/// CTS edge to interrupt on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
}

/// UART interrupt sources serviced by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UartInterrupt {
    /// A byte is waiting in the receive register
    RxReady,
    /// The transmit register can take another byte
    TxReady,
}

/// Register level view of the HCI UART
pub trait UartPeripheral {
    /// Program the baud rate for 8 data bits, no parity, one stop bit
    fn configure(&mut self, baud_rate: u32) -> Result<(), HalError>;

    /// Take the byte in the receive register, if any
    fn read_byte(&mut self) -> Option<u8>;

    /// Load the transmit register
    fn write_byte(&mut self, byte: u8);

    /// True while a byte is still being shifted out
    fn is_transmitting(&mut self) -> bool;

    fn set_rx_interrupt(&mut self, enabled: bool);

    fn set_tx_interrupt(&mut self, enabled: bool);

    /// Discard anything left in the receive FIFO
    fn flush_rx(&mut self) {
        while self.read_byte().is_some() {}
    }
}

/// CTS input with a single-edge interrupt
pub trait CtsInterrupt: InputPin {
    /// Arm the interrupt for `edge`, disarming the other one
    fn listen(&mut self, edge: Edge);
}
