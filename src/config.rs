//! Configuration constants for the CC256x UART transport and helpers

/// UART transport
pub mod uart {
    /// Default HCI baud rate after reset
    pub const BAUD_RATE: u32 = 115_200;
    pub const RX_BUFFER_SIZE: usize = 128;
    pub const TX_BUFFER_SIZE: usize = 64;

    /// RX flow is turned off once free space falls to this mark
    pub const XOFF_LIMIT: usize = RX_BUFFER_SIZE / 4;
    /// RX flow is turned back on once free space reaches this mark
    pub const XON_LIMIT: usize = RX_BUFFER_SIZE;

    /// nSHUTD low time when resetting the controller
    pub const RESET_PULSE_MS: u32 = 10;
    /// Settle time after reprogramming the baud rate
    pub const BAUD_SETTLE_MS: u32 = 1;
    /// Upper bound on waiting for room in the TX buffer
    pub const TX_SPACE_TIMEOUT_MS: u32 = 1000;
    /// Poll period while waiting for TX room or the transmitter to drain
    pub const POLL_INTERVAL_US: u32 = 100;
}

/// eHCILL sleep protocol
pub mod ehcill {
    /// How long a host-initiated wakeup may wait for the controller
    pub const WAKE_ACK_TIMEOUT_MS: u32 = 200;
    /// Poll period while waiting for the wake acknowledgement
    pub const WAKE_POLL_MS: u32 = 2;

    /// Smallest accepted inactivity/retransmit timeout
    pub const MIN_TIMEOUT_MS: u16 = 10;
    /// Default inactivity timeout before the controller requests sleep
    pub const INACTIVITY_TIMEOUT_MS: u16 = 500;
    /// Default wake indication retransmit timeout
    pub const RETRANSMIT_TIMEOUT_MS: u16 = 100;
    /// CTS pulse width passed to the controller (0xFF = maximum)
    pub const CTS_PULSE_WIDTH: u8 = 0xFF;
}

/// HCI command interface
pub mod hci {
    /// Largest return parameter block kept from a command response
    pub const MAX_RETURN_PARAMS: usize = 32;
    /// Vendor specific command group
    pub const VENDOR_OGF: u8 = 0x3F;
}

/// GATT service discovery
pub mod gatt {
    /// Bluetooth stacks that may be initialised at once
    pub const MAX_STACKS: usize = 2;
    /// Outstanding discoveries per stack
    pub const MAX_DISCOVERIES: usize = 4;
    /// Services queued per discovery
    pub const MAX_SERVICES: usize = 8;
    /// Characteristics kept per service
    pub const MAX_CHARACTERISTICS: usize = 12;
    /// Descriptors kept per characteristic
    pub const MAX_DESCRIPTORS: usize = 4;
    /// Descriptor pool carried by a single service indication
    pub const MAX_EVENT_DESCRIPTORS: usize = 24;
    /// UUIDs accepted in a discovery filter
    pub const MAX_FILTER_UUIDS: usize = 4;
}

/// Vendor bring-up
pub mod vendor {
    /// Marker byte that starts every patch record
    pub const RECORD_MARKER: u8 = 0x01;
    /// Bytes before the parameter block of a patch record
    pub const RECORD_HEADER_LEN: usize = 4;
}
