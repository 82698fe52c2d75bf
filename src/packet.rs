//! SWAP frame decoding.
//!
//! The gateway forwards every radio packet as a line of ASCII hex digits.
//! The first 20 characters form a fixed header, everything after it is the
//! register payload encoded two characters per byte.

use std::fmt;
use thiserror::Error;

/// Number of header characters every frame must carry.
pub const MIN_FRAME_LEN: usize = 20;

/// Errors returned when a frame cannot be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Frame is shorter than the fixed header
    #[error("Invalid SWAP data: frame has {len} characters, need at least {MIN_FRAME_LEN}")]
    TooShort { len: usize },
}

/// SWAP function carried in the packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Function {
    #[default]
    Status,
    Query,
    Command,
}

impl Function {
    /// Map a selector byte to a function, falling back to `Status` for
    /// unknown selectors.
    pub fn from_code(code: u8) -> Self {
        Self::try_from(code).unwrap_or_default()
    }
}

impl TryFrom<u8> for Function {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0x00 => Ok(Function::Status),
            0x01 => Ok(Function::Query),
            0x02 => Ok(Function::Command),
            other => Err(other),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Function::Status => write!(f, "STATUS"),
            Function::Query => write!(f, "QUERY"),
            Function::Command => write!(f, "COMMAND"),
        }
    }
}

/// A decoded SWAP packet.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Packet {
    /// Received signal strength as reported by the gateway radio
    pub rssi: u8,
    /// Link quality indicator
    pub lqi: u8,
    pub source: u8,
    pub destination: u8,
    /// Hop count (single hex digit)
    pub hops: u8,
    /// Security nibble (single hex digit)
    pub security: u8,
    pub nonce: u8,
    pub function: Function,
    /// Selector byte exactly as it appeared in the frame
    pub function_code: u8,
    pub register_address: u8,
    pub register_id: u8,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Whether the selector byte named a known function, as opposed to the
    /// `Status` fallback.
    pub fn function_recognized(&self) -> bool {
        Function::try_from(self.function_code).is_ok()
    }
}

/// Value of a single hex digit.
///
/// Characters outside `0-9A-Fa-f` are not rejected; they go through the same
/// arithmetic (wrapping) and yield meaningless values.
#[inline]
fn hex_digit(c: u8) -> u8 {
    if c >= b'a' {
        c.wrapping_sub(b'a').wrapping_add(10)
    } else if c >= b'A' {
        c.wrapping_sub(b'A').wrapping_add(10)
    } else {
        c.wrapping_sub(b'0')
    }
}

#[inline]
fn hex_byte(pair: &[u8]) -> u8 {
    hex_digit(pair[0]).wrapping_mul(16).wrapping_add(hex_digit(pair[1]))
}

/// Decode one ASCII-hex frame.
///
/// # Errors
/// Returns `DecodeError::TooShort` when the frame is shorter than
/// [`MIN_FRAME_LEN`]. Any longer frame decodes, whatever its content.
///
/// # Example
/// ```
/// use swap_bridge::packet::{decode_frame, Function};
///
/// let packet = decode_frame(b"0A0B1C0102300000070C00FA").unwrap();
/// assert_eq!(packet.register_address, 0x07);
/// assert_eq!(packet.function, Function::Status);
/// assert_eq!(packet.payload, vec![0x00, 0xFA]);
/// ```
pub fn decode_frame(frame: &[u8]) -> Result<Packet, DecodeError> {
    if frame.len() < MIN_FRAME_LEN {
        return Err(DecodeError::TooShort { len: frame.len() });
    }

    let function_code = hex_byte(&frame[14..16]);
    let payload = frame[MIN_FRAME_LEN..]
        .chunks_exact(2)
        .map(hex_byte)
        .collect();

    Ok(Packet {
        rssi: hex_byte(&frame[1..3]),
        lqi: hex_byte(&frame[3..5]),
        source: hex_byte(&frame[6..8]),
        destination: hex_byte(&frame[8..10]),
        hops: hex_digit(frame[10]),
        security: hex_digit(frame[11]),
        nonce: hex_byte(&frame[12..14]),
        function: Function::from_code(function_code),
        function_code,
        register_address: hex_byte(&frame[16..18]),
        register_id: hex_byte(&frame[18..20]),
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with_selector(selector: &str) -> Vec<u8> {
        format!("00000000000000{selector}0000").into_bytes()
    }

    #[test]
    fn test_decode_reference_frame() {
        let packet = decode_frame(b"0000001122330000000000001122").unwrap();
        assert_eq!(
            packet,
            Packet {
                rssi: 0x00,
                lqi: 0x00,
                source: 0x11,
                destination: 0x22,
                hops: 3,
                security: 3,
                nonce: 0x00,
                function: Function::Status,
                function_code: 0x00,
                register_address: 0x00,
                register_id: 0x00,
                payload: vec![0x00, 0x00, 0x11, 0x22],
            }
        );
    }

    #[test]
    fn test_decode_header_offsets() {
        // marker, RSSI=0xC4, LQI=0x2F, sep, src=0x05, dst=0x01, hops=2,
        // security=0, nonce=0x9A, fn=0x01, addr=0x07, reg=0x0B
        let packet = decode_frame(b"(C42F)0501209A01070B").unwrap();
        assert_eq!(packet.rssi, 0xC4);
        assert_eq!(packet.lqi, 0x2F);
        assert_eq!(packet.source, 0x05);
        assert_eq!(packet.destination, 0x01);
        assert_eq!(packet.hops, 2);
        assert_eq!(packet.security, 0);
        assert_eq!(packet.nonce, 0x9A);
        assert_eq!(packet.function, Function::Query);
        assert_eq!(packet.register_address, 0x07);
        assert_eq!(packet.register_id, 0x0B);
        assert!(packet.payload.is_empty());
    }

    #[test]
    fn test_header_only_frame_has_empty_payload() {
        let packet = decode_frame(b"00000000000000000000").unwrap();
        assert!(packet.payload.is_empty());
    }

    #[test]
    fn test_short_frames_rejected() {
        for len in 0..MIN_FRAME_LEN {
            let frame = vec![b'0'; len];
            assert_eq!(decode_frame(&frame), Err(DecodeError::TooShort { len }));
        }
    }

    #[test]
    fn test_lowercase_and_uppercase_hex() {
        let lower = decode_frame(b"0abcd0efab0fabcdef01ff").unwrap();
        let upper = decode_frame(b"0ABCD0EFAB0FABCDEF01FF").unwrap();
        assert_eq!(lower, upper);
        assert_eq!(lower.rssi, 0xAB);
        assert_eq!(lower.hops, 0x0);
        assert_eq!(lower.security, 0xF);
        assert_eq!(lower.payload, vec![0xFF]);
    }

    #[test]
    fn test_trailing_odd_character_dropped() {
        let packet = decode_frame(b"000000000000000000000102F").unwrap();
        assert_eq!(packet.payload, vec![0x01, 0x02]);
    }

    #[test]
    fn test_garbage_characters_do_not_panic() {
        let packet = decode_frame(b"~zz!!##$$%%^^&&**(())++__").unwrap();
        assert_eq!(packet.payload.len(), 2);
    }

    #[test]
    fn test_function_selector() {
        let cases = [
            ("00", Function::Status, true),
            ("01", Function::Query, true),
            ("02", Function::Command, true),
            ("05", Function::Status, false),
            ("FF", Function::Status, false),
        ];
        for (selector, expected, recognized) in cases {
            let packet = decode_frame(&frame_with_selector(selector)).unwrap();
            assert_eq!(packet.function, expected, "selector {selector}");
            assert_eq!(packet.function_recognized(), recognized);
        }
    }

    #[test]
    fn test_decode_is_deterministic() {
        let frame = b"0C42F00501209A01070B0012AB";
        assert_eq!(decode_frame(frame), decode_frame(frame));
    }

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError::TooShort { len: 3 };
        assert_eq!(
            err.to_string(),
            "Invalid SWAP data: frame has 3 characters, need at least 20"
        );
    }

    #[test]
    fn test_function_display() {
        assert_eq!(Function::Status.to_string(), "STATUS");
        assert_eq!(Function::Query.to_string(), "QUERY");
        assert_eq!(Function::Command.to_string(), "COMMAND");
    }
}
