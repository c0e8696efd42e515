//! eHCILL low power protocol for TI CC256x controllers
//!
//! The controller and host negotiate sleep with single control bytes sent in
//! place of an HCI packet type. [`Ehcill`] tracks the handshake; the UART
//! transport feeds it received control bytes and transmits its replies.

pub mod configure;
pub mod state;

pub use configure::{configure, EhcillConfig, EhcillError};
pub use state::{ControlByte, Ehcill, EhcillState, PendingAction};
