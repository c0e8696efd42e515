//! Raw HCI command interface
//!
//! The protocol stack owns the HCI command path. The adaptation layer only
//! needs to issue vendor commands and inspect their return parameters, so it
//! sees the stack through this trait.

use crate::config::hci::MAX_RETURN_PARAMS;
use core::future::Future;
use heapless::Vec;

/// Errors reported by the stack when a raw command could not be completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HciError {
    /// The Bluetooth stack id is not known to the stack
    InvalidStackId,
    /// The command was not answered in time
    Timeout,
    /// The command could not be sent
    SendFailed,
    /// Parameter block too long for a single command
    ParametersTooLong,
}

/// Command Complete payload for a raw command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCommandResponse {
    /// HCI status reported by the stack for the exchange
    pub status: u8,
    /// Return parameters that followed the command opcode
    pub return_params: Vec<u8, MAX_RETURN_PARAMS>,
}

impl RawCommandResponse {
    /// Response carrying a single return byte, the usual vendor command shape.
    pub fn with_return_byte(status: u8, value: u8) -> Self {
        let mut return_params = Vec::new();
        let _ = return_params.push(value);
        Self {
            status,
            return_params,
        }
    }
}

/// Pack an OGF/OCF pair into an HCI opcode.
pub const fn opcode(ogf: u8, ocf: u16) -> u16 {
    ((ogf as u16) << 10) | (ocf & 0x03FF)
}

/// Issue raw HCI commands and wait for their completion
pub trait HciCommandSink {
    /// Send a command and wait for its Command Complete event
    fn send_raw_command(
        &mut self,
        ogf: u8,
        ocf: u16,
        params: &[u8],
    ) -> impl Future<Output = Result<RawCommandResponse, HciError>>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_packing() {
        assert_eq!(opcode(0x3F, 0x12B), 0xFD2B);
        assert_eq!(opcode(0x03, 0x003), 0x0C03);
    }
}
