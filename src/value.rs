//! Typed datapoint values and host capability values.

use crate::error::{BridgeError, Result};
use crate::protocol::{DataType, Datapoint};
use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Decoded datapoint payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DpValue {
    Raw(Vec<u8>),
    Bool(bool),
    Value(i32),
    String(String),
    Enum(u8),
    Bitmap(u32),
}

impl DpValue {
    pub fn data_type(&self) -> DataType {
        match self {
            DpValue::Raw(_) => DataType::Raw,
            DpValue::Bool(_) => DataType::Bool,
            DpValue::Value(_) => DataType::Value,
            DpValue::String(_) => DataType::String,
            DpValue::Enum(_) => DataType::Enum,
            DpValue::Bitmap(_) => DataType::Bitmap,
        }
    }

    /// Interpret a datapoint record according to its type tag.
    pub fn decode(record: &Datapoint) -> Result<Self> {
        let data = record.data.as_slice();
        let short = || {
            BridgeError::DecodeError(format!(
                "DP {} ({:?}) has {} bytes",
                record.dp,
                record.data_type,
                data.len()
            ))
        };

        let value = match record.data_type {
            DataType::Raw => DpValue::Raw(data.to_vec()),
            DataType::Bool => DpValue::Bool(*data.first().ok_or_else(short)? != 0),
            // Some firmware sends 1 or 2 byte values
            DataType::Value => match data.len() {
                4 => DpValue::Value(BigEndian::read_i32(data)),
                2 => DpValue::Value(BigEndian::read_i16(data) as i32),
                1 => DpValue::Value(data[0] as i8 as i32),
                _ => return Err(short()),
            },
            DataType::String => DpValue::String(
                String::from_utf8_lossy(data)
                    .trim_end_matches('\0')
                    .to_string(),
            ),
            DataType::Enum => DpValue::Enum(*data.first().ok_or_else(short)?),
            DataType::Bitmap => match data.len() {
                1 => DpValue::Bitmap(data[0] as u32),
                2 => DpValue::Bitmap(BigEndian::read_u16(data) as u32),
                4 => DpValue::Bitmap(BigEndian::read_u32(data)),
                _ => return Err(short()),
            },
        };
        Ok(value)
    }

    /// Serialize the value into record bytes.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            DpValue::Raw(bytes) => bytes.clone(),
            DpValue::Bool(b) => vec![*b as u8],
            DpValue::Value(v) => v.to_be_bytes().to_vec(),
            DpValue::String(s) => s.as_bytes().to_vec(),
            DpValue::Enum(e) => vec![*e],
            DpValue::Bitmap(bits) => {
                if *bits <= 0xFF {
                    vec![*bits as u8]
                } else if *bits <= 0xFFFF {
                    (*bits as u16).to_be_bytes().to_vec()
                } else {
                    bits.to_be_bytes().to_vec()
                }
            }
        }
    }

    pub fn into_datapoint(self, dp: u8) -> Datapoint {
        Datapoint::new(dp, self.data_type(), self.encode())
    }

    /// Numeric view used by converters.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DpValue::Bool(b) => Some(*b as i64),
            DpValue::Value(v) => Some(*v as i64),
            DpValue::Enum(e) => Some(*e as i64),
            DpValue::Bitmap(b) => Some(*b as i64),
            DpValue::Raw(_) | DpValue::String(_) => None,
        }
    }
}

impl fmt::Display for DpValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DpValue::Raw(bytes) => write!(f, "raw:{}", hex::encode(bytes)),
            DpValue::Bool(b) => write!(f, "{}", b),
            DpValue::Value(v) => write!(f, "{}", v),
            DpValue::String(s) => write!(f, "{:?}", s),
            DpValue::Enum(e) => write!(f, "enum:{}", e),
            DpValue::Bitmap(b) => write!(f, "bitmap:0b{:b}", b),
        }
    }
}

/// Value of a host capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapabilityValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl CapabilityValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CapabilityValue::Bool(b) => Some(*b),
            CapabilityValue::Number(n) => Some(*n != 0.0),
            CapabilityValue::Text(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CapabilityValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            CapabilityValue::Number(n) => Some(*n),
            CapabilityValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CapabilityValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for CapabilityValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityValue::Bool(b) => write!(f, "{}", b),
            CapabilityValue::Number(n) => write!(f, "{}", n),
            CapabilityValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for CapabilityValue {
    fn from(value: bool) -> Self {
        CapabilityValue::Bool(value)
    }
}

impl From<f64> for CapabilityValue {
    fn from(value: f64) -> Self {
        CapabilityValue::Number(value)
    }
}

impl From<i64> for CapabilityValue {
    fn from(value: i64) -> Self {
        CapabilityValue::Number(value as f64)
    }
}

impl From<&str> for CapabilityValue {
    fn from(value: &str) -> Self {
        CapabilityValue::Text(value.to_string())
    }
}

impl From<String> for CapabilityValue {
    fn from(value: String) -> Self {
        CapabilityValue::Text(value)
    }
}
