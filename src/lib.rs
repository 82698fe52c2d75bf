//! `swap-bridge` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, logging setup
//! and process exit codes. Frame decoding lives in [`crate::packet`], value
//! rendering in [`crate::value`] and [`crate::mote`], and the bus connection in
//! [`crate::bridge`]. [`crate::app`] ties them together so the whole pipeline
//! can be tested against an injected transport.

pub mod app;
pub mod bridge;
pub mod mote;
pub mod packet;
pub mod router;
pub mod schema;
pub mod value;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use bridge::{Bridge, BridgeError, BrokerAddress, Credentials, Event, Payload, Transport};
pub use mote::{Mote, Register};
pub use packet::{DecodeError, Function, Packet, decode_frame};
pub use router::{Reading, Router};
pub use schema::{SchemaError, load_mote, load_motes};
pub use value::{ValueDefinition, ValueError, ValueType};
