//! Typed register values.
//!
//! A [`ValueDefinition`] describes where a reading lives inside a register
//! payload and how the raw integer is scaled for display.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised while extracting or interpreting a value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// The value type has no fixed byte width
    #[error("unsupported value type: {0}")]
    UnsupportedType(ValueType),
    /// The value does not fit inside the register payload
    #[error("value at {position}..{end} exceeds payload of {len} bytes")]
    OutOfBounds {
        position: usize,
        end: usize,
        len: usize,
    },
    #[error("value not an integer")]
    NotAnInteger,
}

/// Encoding of a register value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float,
    Cstring,
    Pstring,
}

impl ValueType {
    /// Number of payload bytes the value occupies, for the integer types.
    pub fn width(self) -> Option<usize> {
        match self {
            ValueType::Int8 | ValueType::Uint8 => Some(1),
            ValueType::Int16 | ValueType::Uint16 => Some(2),
            ValueType::Int32 | ValueType::Uint32 => Some(4),
            ValueType::Float | ValueType::Cstring | ValueType::Pstring => None,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, ValueType::Int8 | ValueType::Int16 | ValueType::Int32)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Int8 => "int8",
            ValueType::Uint8 => "uint8",
            ValueType::Int16 => "int16",
            ValueType::Uint16 => "uint16",
            ValueType::Int32 => "int32",
            ValueType::Uint32 => "uint32",
            ValueType::Float => "float",
            ValueType::Cstring => "cstring",
            ValueType::Pstring => "pstring",
        };
        f.write_str(name)
    }
}

fn default_scale() -> i32 {
    1
}

/// A named reading stored in one register of a mote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueDefinition {
    pub name: String,
    /// Register id the value belongs to
    pub register: u8,
    /// Byte offset into the register payload
    pub position: u8,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default)]
    pub unit: String,
    /// Subtracted after scaling
    #[serde(default)]
    pub offset: i32,
    /// Divisor, expected to be a power of ten
    #[serde(default = "default_scale")]
    pub scale: i32,
}

impl ValueDefinition {
    /// Slice this value's bytes out of a register payload.
    ///
    /// # Errors
    /// `UnsupportedType` for types without a byte width, `OutOfBounds` when
    /// `position + width` runs past the end of `payload`.
    pub fn extract<'a>(&self, payload: &'a [u8]) -> Result<&'a [u8], ValueError> {
        let width = self
            .value_type
            .width()
            .ok_or(ValueError::UnsupportedType(self.value_type))?;
        let position = usize::from(self.position);
        let end = position + width;

        payload.get(position..end).ok_or(ValueError::OutOfBounds {
            position,
            end,
            len: payload.len(),
        })
    }

    /// The raw bytes read as a big-endian unsigned integer.
    ///
    /// Signed types are not sign-extended here: `int8` 0xFF reads as 255.
    /// Use [`ValueDefinition::as_signed`] for two's complement.
    pub fn as_integer(&self, raw: &[u8]) -> Result<i64, ValueError> {
        let width = self.value_type.width().ok_or(ValueError::NotAnInteger)?;
        match (width, raw) {
            (1, [b, ..]) => Ok(i64::from(*b)),
            (2, [a, b, ..]) => Ok(i64::from(u16::from_be_bytes([*a, *b]))),
            (4, [a, b, c, d, ..]) => Ok(i64::from(u32::from_be_bytes([*a, *b, *c, *d]))),
            _ => Err(ValueError::OutOfBounds {
                position: 0,
                end: width,
                len: raw.len(),
            }),
        }
    }

    /// Like [`ValueDefinition::as_integer`], with sign extension for the
    /// signed types.
    pub fn as_signed(&self, raw: &[u8]) -> Result<i64, ValueError> {
        let n = self.as_integer(raw)?;
        if !self.value_type.is_signed() {
            return Ok(n);
        }
        Ok(match self.value_type {
            ValueType::Int8 => i64::from(n as u8 as i8),
            ValueType::Int16 => i64::from(n as u16 as i16),
            _ => i64::from(n as u32 as i32),
        })
    }

    /// Render the raw bytes for display.
    ///
    /// A scale of 1 prints an integer, any other scale prints a fixed point
    /// number with one fractional digit per power of ten. Non-integer types,
    /// short input and a zero scale all render as an empty string.
    pub fn render(&self, raw: &[u8]) -> String {
        let Ok(n) = self.as_integer(raw) else {
            return String::new();
        };

        match self.scale {
            0 => String::new(),
            1 => (n - i64::from(self.offset)).to_string(),
            scale => {
                let value = n as f64 / f64::from(scale) - f64::from(self.offset);
                format!("{:.*}", fraction_digits(scale), value)
            }
        }
    }
}

/// `floor(log10(|scale|))` for a non-zero scale.
fn fraction_digits(scale: i32) -> usize {
    let mut rest = scale.unsigned_abs();
    let mut digits = 0;
    while rest >= 10 {
        rest /= 10;
        digits += 1;
    }
    digits
}
