//! Zigbee Cluster Library definitions used by the bridge.
//! Cluster and attribute identifiers, ZDO bind status codes, reporting
//! configuration, outgoing cluster commands and the IAS zone status bitmap.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Zigbee cluster identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterId(pub u16);

impl ClusterId {
    pub const BASIC: ClusterId = ClusterId(0x0000);
    pub const POWER_CONFIGURATION: ClusterId = ClusterId(0x0001);
    pub const ON_OFF: ClusterId = ClusterId(0x0006);
    pub const LEVEL_CONTROL: ClusterId = ClusterId(0x0008);
    pub const DOOR_LOCK: ClusterId = ClusterId(0x0101);
    pub const WINDOW_COVERING: ClusterId = ClusterId(0x0102);
    pub const COLOR_CONTROL: ClusterId = ClusterId(0x0300);
    pub const ILLUMINANCE_MEASUREMENT: ClusterId = ClusterId(0x0400);
    pub const TEMPERATURE_MEASUREMENT: ClusterId = ClusterId(0x0402);
    pub const RELATIVE_HUMIDITY: ClusterId = ClusterId(0x0405);
    pub const OCCUPANCY_SENSING: ClusterId = ClusterId(0x0406);
    pub const IAS_ZONE: ClusterId = ClusterId(0x0500);
    pub const METERING: ClusterId = ClusterId(0x0702);
    pub const ELECTRICAL_MEASUREMENT: ClusterId = ClusterId(0x0B04);
    /// Tuya manufacturer-specific datapoint cluster.
    pub const TUYA: ClusterId = ClusterId(0xEF00);

    pub fn name(self) -> &'static str {
        match self {
            ClusterId::BASIC => "basic",
            ClusterId::POWER_CONFIGURATION => "powerConfiguration",
            ClusterId::ON_OFF => "onOff",
            ClusterId::LEVEL_CONTROL => "levelControl",
            ClusterId::DOOR_LOCK => "doorLock",
            ClusterId::WINDOW_COVERING => "windowCovering",
            ClusterId::COLOR_CONTROL => "colorControl",
            ClusterId::ILLUMINANCE_MEASUREMENT => "illuminanceMeasurement",
            ClusterId::TEMPERATURE_MEASUREMENT => "temperatureMeasurement",
            ClusterId::RELATIVE_HUMIDITY => "relativeHumidity",
            ClusterId::OCCUPANCY_SENSING => "occupancySensing",
            ClusterId::IAS_ZONE => "iasZone",
            ClusterId::METERING => "metering",
            ClusterId::ELECTRICAL_MEASUREMENT => "electricalMeasurement",
            ClusterId::TUYA => "tuya",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X} ({})", self.0, self.name())
    }
}

/// Attribute identifiers, grouped per cluster.
pub mod attr {
    pub const ON_OFF: u16 = 0x0000;
    pub const CURRENT_LEVEL: u16 = 0x0000;
    pub const BATTERY_VOLTAGE: u16 = 0x0020;
    pub const BATTERY_PERCENTAGE_REMAINING: u16 = 0x0021;
    pub const LOCK_STATE: u16 = 0x0000;
    pub const CURRENT_POSITION_LIFT_PERCENTAGE: u16 = 0x0008;
    pub const CURRENT_HUE: u16 = 0x0000;
    pub const CURRENT_SATURATION: u16 = 0x0001;
    pub const COLOR_TEMPERATURE_MIREDS: u16 = 0x0007;
    pub const MEASURED_VALUE: u16 = 0x0000;
    pub const OCCUPANCY: u16 = 0x0000;
    pub const ZONE_STATE: u16 = 0x0000;
    pub const ZONE_TYPE: u16 = 0x0001;
    pub const ZONE_STATUS: u16 = 0x0002;
    pub const IAS_CIE_ADDRESS: u16 = 0x0010;
    pub const CURRENT_SUMMATION_DELIVERED: u16 = 0x0000;
    pub const RMS_VOLTAGE: u16 = 0x0505;
    pub const RMS_CURRENT: u16 = 0x0508;
    pub const ACTIVE_POWER: u16 = 0x050B;
}

define_wire_enum! {
    /// ZDO status returned by bind requests.
    pub enum ZdoStatus {
        Success = 0x00,
        InvalidRequestType = 0x80,
        DeviceNotFound = 0x81,
        InvalidEp = 0x82,
        NotActive = 0x83,
        NotSupported = 0x84,
        Timeout = 0x85,
        TableFull = 0x8C,
        NotAuthorized = 0x8D,
    }
}

impl fmt::Display for ZdoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ZdoStatus::Success => "SUCCESS",
            ZdoStatus::InvalidRequestType => "INVALID_REQUEST_TYPE",
            ZdoStatus::DeviceNotFound => "DEVICE_NOT_FOUND",
            ZdoStatus::InvalidEp => "INVALID_EP",
            ZdoStatus::NotActive => "NOT_ACTIVE",
            ZdoStatus::NotSupported => "NOT_SUPPORTED",
            ZdoStatus::Timeout => "TIMEOUT",
            ZdoStatus::TableFull => "TABLE_FULL",
            ZdoStatus::NotAuthorized => "NOT_AUTHORIZED",
        };
        f.write_str(name)
    }
}

/// Attribute reporting configuration (minInterval / maxInterval / minChange).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReportingConfig {
    pub min_interval: Duration,
    pub max_interval: Duration,
    /// Reportable change in raw attribute units; 0 for discrete attributes.
    pub min_change: u32,
}

impl ReportingConfig {
    pub const fn new(min_secs: u64, max_secs: u64, min_change: u32) -> Self {
        Self {
            min_interval: Duration::from_secs(min_secs),
            max_interval: Duration::from_secs(max_secs),
            min_change,
        }
    }

    /// Switch-like attributes: report immediately, refresh every 5 minutes.
    pub const fn on_change() -> Self {
        Self::new(0, 300, 0)
    }

    /// Slowly varying measurements (temperature, humidity, power).
    pub const fn measurement(min_change: u32) -> Self {
        Self::new(60, 3600, min_change)
    }

    /// Batteries report twice a day at most.
    pub const fn battery() -> Self {
        Self::new(3600, 43200, 2)
    }
}

/// Attribute value as reported or read from a standard cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Text(String),
    /// 64-bit IEEE address (`iasCieAddr`)
    Ieee(u64),
}

impl AttributeValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttributeValue::Bool(b) => Some(*b as i64),
            AttributeValue::Int(v) => Some(*v),
            AttributeValue::Text(_) | AttributeValue::Ieee(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(b) => Some(*b),
            AttributeValue::Int(v) => Some(*v != 0),
            AttributeValue::Text(_) | AttributeValue::Ieee(_) => None,
        }
    }
}

/// Outgoing standard cluster command.
#[derive(Debug, Clone, PartialEq)]
pub enum ZclCommand {
    On,
    Off,
    Toggle,
    MoveToLevelWithOnOff { level: u8, transition_time: u16 },
    MoveToHue { hue: u8, transition_time: u16 },
    MoveToSaturation { saturation: u8, transition_time: u16 },
    MoveToColorTemperature { mireds: u16, transition_time: u16 },
    LockDoor,
    UnlockDoor,
    UpOpen,
    DownClose,
    Stop,
    GoToLiftPercentage(u8),
    ZoneEnrollResponse { enroll_response_code: u8, zone_id: u8 },
}

impl ZclCommand {
    pub fn cluster(&self) -> ClusterId {
        match self {
            ZclCommand::On | ZclCommand::Off | ZclCommand::Toggle => ClusterId::ON_OFF,
            ZclCommand::MoveToLevelWithOnOff { .. } => ClusterId::LEVEL_CONTROL,
            ZclCommand::MoveToHue { .. }
            | ZclCommand::MoveToSaturation { .. }
            | ZclCommand::MoveToColorTemperature { .. } => ClusterId::COLOR_CONTROL,
            ZclCommand::LockDoor | ZclCommand::UnlockDoor => ClusterId::DOOR_LOCK,
            ZclCommand::UpOpen
            | ZclCommand::DownClose
            | ZclCommand::Stop
            | ZclCommand::GoToLiftPercentage(_) => ClusterId::WINDOW_COVERING,
            ZclCommand::ZoneEnrollResponse { .. } => ClusterId::IAS_ZONE,
        }
    }
}

/// IAS zone status bitmap (attribute 0x0002 of cluster 0x0500).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ZoneStatus(pub u16);

impl ZoneStatus {
    pub const ALARM1: u16 = 1 << 0;
    pub const ALARM2: u16 = 1 << 1;
    pub const TAMPER: u16 = 1 << 2;
    pub const BATTERY_LOW: u16 = 1 << 3;

    /// Either alarm bit raised.
    pub fn alarm(self) -> bool {
        self.0 & (Self::ALARM1 | Self::ALARM2) != 0
    }

    pub fn tamper(self) -> bool {
        self.0 & Self::TAMPER != 0
    }

    pub fn battery_low(self) -> bool {
        self.0 & Self::BATTERY_LOW != 0
    }
}

impl From<u16> for ZoneStatus {
    fn from(value: u16) -> Self {
        ZoneStatus(value)
    }
}
