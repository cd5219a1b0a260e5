//! Datapoint dispatch table.
//! Maps incoming Tuya datapoints to capability updates and capability writes
//! back to outgoing datapoints. A table is built once per device class and
//! shared read-only by every device of that class.

use crate::error::{BridgeError, Result};
use crate::protocol::{DataType, Datapoint};
use crate::value::{CapabilityValue, DpValue};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Which way a binding carries values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Read,
    Write,
    Both,
}

impl Direction {
    pub fn readable(self) -> bool {
        matches!(self, Direction::Read | Direction::Both)
    }

    pub fn writable(self) -> bool {
        matches!(self, Direction::Write | Direction::Both)
    }
}

pub type ParseFn = fn(&DpValue) -> Option<CapabilityValue>;
pub type FormatFn = fn(&CapabilityValue) -> Option<DpValue>;

/// Value transform between a datapoint and a capability.
#[derive(Debug, Clone, Copy)]
pub enum DpConverter {
    /// Numeric 0/1 or bool datapoint to a boolean capability.
    Bool,
    InvertedBool,
    /// Pass the number through unchanged.
    Number,
    /// Raw integer in fixed-point units (e.g. 0.1 °C -> divisor 10).
    DivideBy(f64),
    /// Linear mapping of `raw_min..raw_max` onto `min..max`.
    Scale {
        raw_min: f64,
        raw_max: f64,
        min: f64,
        max: f64,
    },
    /// Enum index to a capability string.
    Lookup(&'static [(u8, &'static str)]),
    /// Single flag inside a bitmap datapoint.
    Flag { mask: u32 },
    /// Numeric field inside a bitmap datapoint.
    Field { mask: u32, shift: u8 },
    Custom {
        parse: ParseFn,
        format: Option<FormatFn>,
    },
}

impl DpConverter {
    /// Raw datapoint value to capability value.
    pub fn parse(&self, raw: &DpValue) -> Option<CapabilityValue> {
        match *self {
            DpConverter::Bool => raw.as_i64().map(|v| CapabilityValue::Bool(v != 0)),
            DpConverter::InvertedBool => raw.as_i64().map(|v| CapabilityValue::Bool(v == 0)),
            DpConverter::Number => raw.as_i64().map(CapabilityValue::from),
            DpConverter::DivideBy(divisor) => raw
                .as_i64()
                .map(|v| CapabilityValue::Number(v as f64 / divisor)),
            DpConverter::Scale {
                raw_min,
                raw_max,
                min,
                max,
            } => raw.as_i64().map(|v| {
                let ratio = (v as f64 - raw_min) / (raw_max - raw_min);
                CapabilityValue::Number(min + ratio * (max - min))
            }),
            DpConverter::Lookup(table) => {
                let index = raw.as_i64()?;
                table
                    .iter()
                    .find(|(k, _)| *k as i64 == index)
                    .map(|(_, name)| CapabilityValue::from(*name))
            }
            DpConverter::Flag { mask } => raw
                .as_i64()
                .map(|v| CapabilityValue::Bool(v as u32 & mask != 0)),
            DpConverter::Field { mask, shift } => raw
                .as_i64()
                .map(|v| CapabilityValue::from(((v as u32 & mask) >> shift) as i64)),
            DpConverter::Custom { parse, .. } => parse(raw),
        }
    }

    /// Capability value to a raw number, before it is shaped into the
    /// datapoint's type. `previous` is the last raw value seen for the
    /// datapoint and is needed for bitmap merges.
    fn format_number(&self, value: &CapabilityValue, previous: Option<&DpValue>) -> Option<i64> {
        match *self {
            DpConverter::Bool => value.as_bool().map(|b| b as i64),
            DpConverter::InvertedBool => value.as_bool().map(|b| !b as i64),
            DpConverter::Number => value.as_f64().map(|v| v.round() as i64),
            DpConverter::DivideBy(divisor) => value.as_f64().map(|v| (v * divisor).round() as i64),
            DpConverter::Scale {
                raw_min,
                raw_max,
                min,
                max,
            } => value.as_f64().map(|v| {
                let ratio = (v - min) / (max - min);
                (raw_min + ratio * (raw_max - raw_min)).round() as i64
            }),
            DpConverter::Lookup(table) => {
                let name = value.as_str()?;
                table
                    .iter()
                    .find(|(_, n)| *n == name)
                    .map(|(k, _)| *k as i64)
            }
            DpConverter::Flag { mask } => {
                let base = previous.and_then(DpValue::as_i64).unwrap_or(0) as u32;
                let bits = if value.as_bool()? { base | mask } else { base & !mask };
                Some(bits as i64)
            }
            DpConverter::Field { mask, shift } => {
                let base = previous.and_then(DpValue::as_i64).unwrap_or(0) as u32;
                let field = (value.as_f64()?.round() as u32) << shift;
                Some(((base & !mask) | (field & mask)) as i64)
            }
            DpConverter::Custom { .. } => None,
        }
    }

    /// Capability value to a typed datapoint value.
    pub fn format(
        &self,
        value: &CapabilityValue,
        data_type: DataType,
        previous: Option<&DpValue>,
    ) -> Option<DpValue> {
        if let DpConverter::Custom { format, .. } = *self {
            return format.and_then(|f| f(value));
        }
        let n = self.format_number(value, previous)?;
        match data_type {
            DataType::Bool => Some(DpValue::Bool(n != 0)),
            DataType::Value => i32::try_from(n).ok().map(DpValue::Value),
            DataType::Enum => u8::try_from(n).ok().map(DpValue::Enum),
            DataType::Bitmap => u32::try_from(n).ok().map(DpValue::Bitmap),
            DataType::String => Some(DpValue::String(n.to_string())),
            DataType::Raw => None,
        }
    }

    pub fn supports_write(&self) -> bool {
        match self {
            DpConverter::Custom { format, .. } => format.is_some(),
            _ => true,
        }
    }
}

/// One datapoint-to-capability handler.
#[derive(Debug, Clone)]
pub struct DatapointHandler {
    pub dp: u8,
    pub capability: String,
    pub data_type: DataType,
    pub direction: Direction,
    pub converter: DpConverter,
}

/// A capability value produced from a datapoint.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityUpdate {
    pub capability: String,
    pub value: CapabilityValue,
}

/// Per-device-class datapoint routing.
#[derive(Debug, Clone, Default)]
pub struct DispatchTable {
    handlers: Vec<DatapointHandler>,
    by_dp: HashMap<u8, Vec<usize>>,
    by_capability: HashMap<String, Vec<usize>>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a read-only handler for a datapoint.
    pub fn register_datapoint_handler<C: Into<String>>(
        &mut self,
        dp: u8,
        capability: C,
        parser: DpConverter,
    ) -> &mut Self {
        self.register(DatapointHandler {
            dp,
            capability: capability.into(),
            data_type: DataType::Value,
            direction: Direction::Read,
            converter: parser,
        })
    }

    /// Register a handler with an explicit direction and wire type.
    pub fn register(&mut self, handler: DatapointHandler) -> &mut Self {
        let index = self.handlers.len();
        self.by_dp.entry(handler.dp).or_default().push(index);
        self.by_capability
            .entry(handler.capability.clone())
            .or_default()
            .push(index);
        self.handlers.push(handler);
        self
    }

    pub fn handlers(&self) -> &[DatapointHandler] {
        &self.handlers
    }

    pub fn handles_capability(&self, capability: &str) -> bool {
        self.by_capability.contains_key(capability)
    }

    pub fn is_writable(&self, capability: &str) -> bool {
        self.writer(capability).is_some()
    }

    fn writer(&self, capability: &str) -> Option<&DatapointHandler> {
        self.by_capability.get(capability).and_then(|indices| {
            indices
                .iter()
                .map(|&i| &self.handlers[i])
                .find(|h| h.direction.writable() && h.converter.supports_write())
        })
    }

    /// Route one incoming datapoint. Unknown datapoints yield no updates.
    pub fn handle_incoming_datapoint(&self, dp: u8, raw: &DpValue) -> Vec<CapabilityUpdate> {
        let Some(indices) = self.by_dp.get(&dp) else {
            debug!("Ignoring unmapped DP {} = {}", dp, raw);
            return Vec::new();
        };

        let mut updates = Vec::with_capacity(indices.len());
        for handler in indices.iter().map(|&i| &self.handlers[i]) {
            if !handler.direction.readable() {
                continue;
            }
            match handler.converter.parse(raw) {
                Some(value) => updates.push(CapabilityUpdate {
                    capability: handler.capability.clone(),
                    value,
                }),
                None => warn!(
                    "DP {} value {} does not fit converter {:?} for {}",
                    dp, raw, handler.converter, handler.capability
                ),
            }
        }
        updates
    }

    /// Datapoint write for a capability set.
    pub fn build_outgoing_command(
        &self,
        capability: &str,
        value: &CapabilityValue,
    ) -> Result<Datapoint> {
        self.build_outgoing_command_over(capability, value, None)
    }

    /// Like [`build_outgoing_command`](Self::build_outgoing_command), merging
    /// into the last known raw value of the datapoint (bitmap fields).
    pub fn build_outgoing_command_over(
        &self,
        capability: &str,
        value: &CapabilityValue,
        previous: Option<&DpValue>,
    ) -> Result<Datapoint> {
        let handler = self
            .writer(capability)
            .ok_or_else(|| BridgeError::UnsupportedCapability(capability.to_string()))?;

        let raw = handler
            .converter
            .format(value, handler.data_type, previous)
            .ok_or_else(|| BridgeError::InvalidValue {
                capability: capability.to_string(),
                reason: format!("{} cannot be encoded as {:?}", value, handler.data_type),
            })?;
        Ok(raw.into_datapoint(handler.dp))
    }

    /// Datapoint written for a capability, if any.
    pub fn datapoint_for(&self, capability: &str) -> Option<u8> {
        self.writer(capability).map(|h| h.dp)
    }
}
