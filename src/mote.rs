//! Mote definitions and per-packet value updates.

use crate::packet::Packet;
use crate::value::{ValueDefinition, ValueError};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Declared layout of one register. Informational, used for schema checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Register {
    pub id: u8,
    /// Payload length in bytes
    pub length: u8,
}

/// A sensor node and the values it reports.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Mote {
    /// Register address the mote answers on
    pub address: u8,
    /// Topic prefix for every value of this mote
    pub location: String,
    pub registers: Vec<Register>,
    /// Value definitions in declaration order
    pub values: Vec<ValueDefinition>,
}

impl Mote {
    /// Render every value carried by the packet's register.
    ///
    /// Entries come back in declaration order, keyed `"{location}/{name}"`.
    /// Values of a type without an integer encoding render as an empty
    /// string. Values that do not fit in the payload are logged and left
    /// out. A register id no value refers to yields an empty list.
    pub fn update_values(&self, packet: &Packet) -> Vec<(String, String)> {
        self.values
            .iter()
            .filter(|value| value.register == packet.register_id)
            .filter_map(|value| {
                let key = format!("{}/{}", self.location, value.name);
                match value.extract(&packet.payload) {
                    Ok(raw) => Some((key, value.render(raw))),
                    Err(ValueError::UnsupportedType(_)) => Some((key, String::new())),
                    Err(error) => {
                        warn!(
                            location = %self.location,
                            value = %value.name,
                            %error,
                            "skipping value"
                        );
                        None
                    }
                }
            })
            .collect()
    }

    /// Declared layout for a register id, if the schema lists one.
    pub fn register(&self, id: u8) -> Option<&Register> {
        self.registers.iter().find(|r| r.id == id)
    }
}
