//! Built-in device classes.
//!
//! Datapoint numbers follow the common Tuya TS0601 firmware layouts. Classes
//! that also expose standard clusters declare both paths; at pairing only the
//! bindings whose cluster the endpoint actually has are activated.

use crate::capability::ClusterConverter;
use crate::class::{DeviceClass, DeviceClassBuilder};
use crate::cluster::{ClusterId, ReportingConfig, attr};
use crate::dispatch::{Direction, DpConverter};
use crate::error::{BridgeError, Result};
use crate::protocol::DataType;
use crate::value::{CapabilityValue, DpValue};

pub const LOCK: &str = "lock";
pub const MOTION_SENSOR: &str = "motion_sensor";
pub const CONTACT_SENSOR: &str = "contact_sensor";
pub const WATER_LEAK_SENSOR: &str = "water_leak_sensor";
pub const SMOKE_DETECTOR: &str = "smoke_detector";
pub const CLIMATE_SENSOR: &str = "climate_sensor";
pub const SOIL_SENSOR: &str = "soil_sensor";
pub const SMART_PLUG: &str = "smart_plug";
pub const SWITCH_2GANG: &str = "switch_2gang";
pub const DIMMABLE_LIGHT: &str = "dimmable_light";
pub const COLOR_LIGHT: &str = "color_light";
pub const CURTAIN: &str = "curtain";
pub const GARAGE_DOOR: &str = "garage_door";

/// Names of every built-in class.
pub const CLASS_NAMES: &[&str] = &[
    LOCK,
    MOTION_SENSOR,
    CONTACT_SENSOR,
    WATER_LEAK_SENSOR,
    SMOKE_DETECTOR,
    CLIMATE_SENSOR,
    SOIL_SENSOR,
    SMART_PLUG,
    SWITCH_2GANG,
    DIMMABLE_LIGHT,
    COLOR_LIGHT,
    CURTAIN,
    GARAGE_DOOR,
];

const COVER_STATES: &[(u8, &str)] = &[(0, "up"), (1, "idle"), (2, "down")];
const LIGHT_MODES: &[(u8, &str)] = &[(0, "temperature"), (1, "color")];

/// Look up a built-in class by name.
pub fn by_name(name: &str) -> Result<DeviceClass> {
    let class = match name {
        LOCK => lock(),
        MOTION_SENSOR => motion_sensor(),
        CONTACT_SENSOR => contact_sensor(),
        WATER_LEAK_SENSOR => water_leak_sensor(),
        SMOKE_DETECTOR => smoke_detector(),
        CLIMATE_SENSOR => climate_sensor(),
        SOIL_SENSOR => soil_sensor(),
        SMART_PLUG => smart_plug(),
        SWITCH_2GANG => switch_2gang(),
        DIMMABLE_LIGHT => dimmable_light(),
        COLOR_LIGHT => color_light(),
        CURTAIN => curtain(),
        GARAGE_DOOR => garage_door(),
        other => return Err(BridgeError::UnknownDeviceClass(other.to_string())),
    };
    Ok(class)
}

fn zcl_battery(builder: DeviceClassBuilder) -> DeviceClassBuilder {
    builder
        .cluster(
            "measure_battery",
            ClusterId::POWER_CONFIGURATION,
            attr::BATTERY_PERCENTAGE_REMAINING,
            ClusterConverter::HalfPercent,
            Direction::Read,
            Some(ReportingConfig::battery()),
        )
        // Voltage-only firmware; reported unsolicited, never configured
        .cluster(
            "measure_battery",
            ClusterId::POWER_CONFIGURATION,
            attr::BATTERY_VOLTAGE,
            ClusterConverter::BatteryVoltage,
            Direction::Read,
            None,
        )
}

pub fn lock() -> DeviceClass {
    let builder = DeviceClass::builder(LOCK)
        .datapoint(1, "locked", DataType::Bool, Direction::Both, DpConverter::Bool)
        .cluster(
            "locked",
            ClusterId::DOOR_LOCK,
            attr::LOCK_STATE,
            ClusterConverter::Lock,
            Direction::Both,
            Some(ReportingConfig::on_change()),
        )
        .report(3, "measure_battery", DataType::Value, DpConverter::Number);
    zcl_battery(builder).build()
}

pub fn motion_sensor() -> DeviceClass {
    let builder = DeviceClass::builder(MOTION_SENSOR)
        .ias_zone("alarm_motion")
        .mirror_datapoint(1)
        .report(4, "measure_battery", DataType::Value, DpConverter::Number)
        .report(12, "measure_luminance", DataType::Value, DpConverter::Number)
        .cluster(
            "measure_luminance",
            ClusterId::ILLUMINANCE_MEASUREMENT,
            attr::MEASURED_VALUE,
            ClusterConverter::Illuminance,
            Direction::Read,
            Some(ReportingConfig::measurement(1000)),
        );
    zcl_battery(builder).build()
}

pub fn contact_sensor() -> DeviceClass {
    let builder = DeviceClass::builder(CONTACT_SENSOR)
        .ias_zone("alarm_contact")
        .mirror_datapoint(1)
        .report(2, "measure_battery", DataType::Value, DpConverter::Number);
    zcl_battery(builder).build()
}

pub fn water_leak_sensor() -> DeviceClass {
    let builder = DeviceClass::builder(WATER_LEAK_SENSOR)
        .ias_zone("alarm_water")
        .mirror_datapoint(1)
        .report(4, "measure_battery", DataType::Value, DpConverter::Number);
    zcl_battery(builder).build()
}

pub fn smoke_detector() -> DeviceClass {
    // smoke_state enum: 0 = alarm, 1 = normal
    let builder = DeviceClass::builder(SMOKE_DETECTOR)
        .ias_zone("alarm_smoke")
        .report(1, "alarm_smoke", DataType::Enum, DpConverter::InvertedBool)
        .report(15, "measure_battery", DataType::Value, DpConverter::Number);
    zcl_battery(builder).build()
}

pub fn climate_sensor() -> DeviceClass {
    let builder = DeviceClass::builder(CLIMATE_SENSOR)
        .report(1, "measure_temperature", DataType::Value, DpConverter::DivideBy(10.0))
        .report(2, "measure_humidity", DataType::Value, DpConverter::DivideBy(10.0))
        .report(4, "measure_battery", DataType::Value, DpConverter::Number)
        .cluster(
            "measure_temperature",
            ClusterId::TEMPERATURE_MEASUREMENT,
            attr::MEASURED_VALUE,
            ClusterConverter::Scaled { divisor: 100.0 },
            Direction::Read,
            Some(ReportingConfig::measurement(10)),
        )
        .cluster(
            "measure_humidity",
            ClusterId::RELATIVE_HUMIDITY,
            attr::MEASURED_VALUE,
            ClusterConverter::Scaled { divisor: 100.0 },
            Direction::Read,
            Some(ReportingConfig::measurement(100)),
        );
    zcl_battery(builder).build()
}

pub fn soil_sensor() -> DeviceClass {
    DeviceClass::builder(SOIL_SENSOR)
        .report(3, "measure_humidity", DataType::Value, DpConverter::Number)
        .report(5, "measure_temperature", DataType::Value, DpConverter::DivideBy(10.0))
        .report(15, "measure_battery", DataType::Value, DpConverter::Number)
        .build()
}

pub fn smart_plug() -> DeviceClass {
    DeviceClass::builder(SMART_PLUG)
        .datapoint(1, "onoff", DataType::Bool, Direction::Both, DpConverter::Bool)
        .cluster(
            "onoff",
            ClusterId::ON_OFF,
            attr::ON_OFF,
            ClusterConverter::OnOff,
            Direction::Both,
            Some(ReportingConfig::on_change()),
        )
        .report(17, "measure_current", DataType::Value, DpConverter::DivideBy(1000.0))
        .report(18, "measure_power", DataType::Value, DpConverter::DivideBy(10.0))
        .report(19, "measure_voltage", DataType::Value, DpConverter::DivideBy(10.0))
        .report(20, "meter_power", DataType::Value, DpConverter::DivideBy(100.0))
        .cluster(
            "measure_power",
            ClusterId::ELECTRICAL_MEASUREMENT,
            attr::ACTIVE_POWER,
            ClusterConverter::Scaled { divisor: 1.0 },
            Direction::Read,
            Some(ReportingConfig::measurement(5)),
        )
        .cluster(
            "measure_voltage",
            ClusterId::ELECTRICAL_MEASUREMENT,
            attr::RMS_VOLTAGE,
            ClusterConverter::Scaled { divisor: 1.0 },
            Direction::Read,
            Some(ReportingConfig::measurement(2)),
        )
        .cluster(
            "measure_current",
            ClusterId::ELECTRICAL_MEASUREMENT,
            attr::RMS_CURRENT,
            ClusterConverter::Scaled { divisor: 1000.0 },
            Direction::Read,
            Some(ReportingConfig::measurement(50)),
        )
        .cluster(
            "meter_power",
            ClusterId::METERING,
            attr::CURRENT_SUMMATION_DELIVERED,
            ClusterConverter::Scaled { divisor: 100.0 },
            Direction::Read,
            Some(ReportingConfig::measurement(1)),
        )
        .build()
}

pub fn switch_2gang() -> DeviceClass {
    DeviceClass::builder(SWITCH_2GANG)
        .datapoint(1, "onoff", DataType::Bool, Direction::Both, DpConverter::Bool)
        .datapoint(2, "onoff.gang2", DataType::Bool, Direction::Both, DpConverter::Bool)
        .cluster(
            "onoff",
            ClusterId::ON_OFF,
            attr::ON_OFF,
            ClusterConverter::OnOff,
            Direction::Both,
            Some(ReportingConfig::on_change()),
        )
        .build()
}

const LEVEL_SCALE: DpConverter = DpConverter::Scale {
    raw_min: 0.0,
    raw_max: 1000.0,
    min: 0.0,
    max: 1.0,
};

fn light(name: &str) -> DeviceClassBuilder {
    DeviceClass::builder(name)
        .datapoint(1, "onoff", DataType::Bool, Direction::Both, DpConverter::Bool)
        .datapoint(2, "dim", DataType::Value, Direction::Both, LEVEL_SCALE)
        .cluster(
            "onoff",
            ClusterId::ON_OFF,
            attr::ON_OFF,
            ClusterConverter::OnOff,
            Direction::Both,
            Some(ReportingConfig::on_change()),
        )
        .cluster(
            "dim",
            ClusterId::LEVEL_CONTROL,
            attr::CURRENT_LEVEL,
            ClusterConverter::Level,
            Direction::Both,
            Some(ReportingConfig::measurement(1)),
        )
}

pub fn dimmable_light() -> DeviceClass {
    light(DIMMABLE_LIGHT).build()
}

pub fn color_light() -> DeviceClass {
    light(COLOR_LIGHT)
        .datapoint(3, "light_temperature", DataType::Value, Direction::Both, LEVEL_SCALE)
        .datapoint(
            4,
            "light_mode",
            DataType::Enum,
            Direction::Both,
            DpConverter::Lookup(LIGHT_MODES),
        )
        .datapoint(
            5,
            "light_hue",
            DataType::Value,
            Direction::Both,
            DpConverter::Scale {
                raw_min: 0.0,
                raw_max: 360.0,
                min: 0.0,
                max: 1.0,
            },
        )
        .datapoint(6, "light_saturation", DataType::Value, Direction::Both, LEVEL_SCALE)
        .cluster(
            "light_hue",
            ClusterId::COLOR_CONTROL,
            attr::CURRENT_HUE,
            ClusterConverter::Hue,
            Direction::Both,
            Some(ReportingConfig::measurement(1)),
        )
        .cluster(
            "light_saturation",
            ClusterId::COLOR_CONTROL,
            attr::CURRENT_SATURATION,
            ClusterConverter::Saturation,
            Direction::Both,
            Some(ReportingConfig::measurement(1)),
        )
        .cluster(
            "light_temperature",
            ClusterId::COLOR_CONTROL,
            attr::COLOR_TEMPERATURE_MIREDS,
            ClusterConverter::ColorTemperature {
                min_mireds: 153,
                max_mireds: 500,
            },
            Direction::Both,
            Some(ReportingConfig::measurement(1)),
        )
        .build()
}

pub fn curtain() -> DeviceClass {
    DeviceClass::builder(CURTAIN)
        .datapoint(
            1,
            "windowcoverings_state",
            DataType::Enum,
            Direction::Both,
            DpConverter::Lookup(COVER_STATES),
        )
        .datapoint(
            2,
            "windowcoverings_set",
            DataType::Value,
            Direction::Write,
            DpConverter::DivideBy(100.0),
        )
        .report(3, "windowcoverings_set", DataType::Value, DpConverter::DivideBy(100.0))
        .report(13, "measure_battery", DataType::Value, DpConverter::Number)
        .cluster(
            "windowcoverings_set",
            ClusterId::WINDOW_COVERING,
            attr::CURRENT_POSITION_LIFT_PERCENTAGE,
            ClusterConverter::CoverLift,
            Direction::Both,
            Some(ReportingConfig::on_change()),
        )
        .build()
}

fn parse_none(_: &DpValue) -> Option<CapabilityValue> {
    None
}

/// Any set pulses the trigger datapoint; the door reports its own state.
fn trigger_pulse(_: &CapabilityValue) -> Option<DpValue> {
    Some(DpValue::Bool(true))
}

pub fn garage_door() -> DeviceClass {
    DeviceClass::builder(GARAGE_DOOR)
        .datapoint(
            1,
            "garagedoor_closed",
            DataType::Bool,
            Direction::Write,
            DpConverter::Custom {
                parse: parse_none,
                format: Some(trigger_pulse),
            },
        )
        .report(3, "garagedoor_closed", DataType::Bool, DpConverter::InvertedBool)
        .build()
}
