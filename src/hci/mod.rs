//! HCI plumbing shared by the transport and the vendor helpers

pub mod command;
pub mod framing;

pub use command::{opcode, HciCommandSink, HciError, RawCommandResponse};
pub use framing::{ByteClass, PacketFramer};
