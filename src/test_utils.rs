use crate::mote::{Mote, Register};
use crate::packet::Packet;
use crate::value::{ValueDefinition, ValueType};

/// Address of the mote returned by [`sample_mote`].
pub const SAMPLE_ADDRESS: u8 = 0x07;

/// TOML form of [`sample_mote`].
pub const SAMPLE_MOTE_TOML: &str = r#"
[general]
address = 7
location = "Kitchen"

[[registers]]
id = 11
length = 3

[[registers]]
id = 12
length = 2

[[values]]
name = "Temperature"
register = 11
position = 0
type = "uint16"
unit = "C"
offset = 50
scale = 10

[[values]]
name = "Humidity"
register = 11
position = 2
type = "uint8"
unit = "%"

[[values]]
name = "Voltage"
register = 12
position = 0
type = "uint16"
unit = "V"
scale = 1000
"#;

pub fn value(
    name: &str,
    register: u8,
    position: u8,
    value_type: ValueType,
    offset: i32,
    scale: i32,
) -> ValueDefinition {
    ValueDefinition {
        name: name.to_string(),
        register,
        position,
        value_type,
        unit: String::new(),
        offset,
        scale,
    }
}

/// A mote with a climate register (0x0B) and a battery register (0x0C).
pub fn sample_mote() -> Mote {
    let mut temperature = value("Temperature", 0x0B, 0, ValueType::Uint16, 50, 10);
    temperature.unit = "C".to_string();
    let mut humidity = value("Humidity", 0x0B, 2, ValueType::Uint8, 0, 1);
    humidity.unit = "%".to_string();
    let mut voltage = value("Voltage", 0x0C, 0, ValueType::Uint16, 0, 1000);
    voltage.unit = "V".to_string();

    Mote {
        address: SAMPLE_ADDRESS,
        location: "Kitchen".to_string(),
        registers: vec![
            Register { id: 0x0B, length: 3 },
            Register { id: 0x0C, length: 2 },
        ],
        values: vec![temperature, humidity, voltage],
    }
}

/// Build a packet with only the addressing fields set.
pub fn packet(register_address: u8, register_id: u8, payload: Vec<u8>) -> Packet {
    Packet {
        register_address,
        register_id,
        payload,
        ..Packet::default()
    }
}

/// Encode a frame the way the gateway would, with RSSI 0x50 and LQI 0x2A.
pub fn frame(register_address: u8, register_id: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = format!("(502A)0100100000{register_address:02X}{register_id:02X}");
    for byte in payload {
        frame.push_str(&format!("{byte:02X}"));
    }
    frame.into_bytes()
}
