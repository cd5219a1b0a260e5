//! Capability bridge.
//! Binds standard cluster attribute reports and Tuya datapoint events to one
//! capability surface, and routes capability writes to whichever path the
//! endpoint supports (Tuya datapoint first, then the standard cluster command).

use crate::battery::BatteryType;
use crate::class::DeviceClass;
use crate::cluster::{AttributeValue, ClusterId, ReportingConfig, ZclCommand, ZoneStatus};
use crate::config::DeviceSettings;
use crate::dispatch::{CapabilityUpdate, Direction};
use crate::error::{BridgeError, Result};
use crate::host::ZclEndpoint;
use crate::protocol::{DpFrame, TuyaCommand, encode_set_data};
use crate::session::DeviceSession;
use crate::value::{CapabilityValue, DpValue};
use log::{debug, warn};
use parking_lot::Mutex;
use std::sync::Arc;

const COLOR_MAX: f64 = 254.0;

/// Transform between a standard cluster attribute and a capability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClusterConverter {
    /// onOff attribute <-> `onoff`
    OnOff,
    /// currentLevel 0..254 <-> 0..1
    Level,
    /// currentHue 0..254 <-> 0..1
    Hue,
    /// currentSaturation 0..254 <-> 0..1
    Saturation,
    /// colorTemperatureMireds <-> 0..1 (0 = coolest)
    ColorTemperature { min_mireds: u16, max_mireds: u16 },
    /// Fixed-point measurement (temperature /100, power /10, ...)
    Scaled { divisor: f64 },
    /// batteryPercentageRemaining in half percent
    HalfPercent,
    /// batteryVoltage in 100 mV, mapped through the battery discharge curve
    BatteryVoltage,
    /// lockState 1 = locked <-> lockDoor / unlockDoor
    Lock,
    /// currentPositionLiftPercentage 0..100 <-> 0..1
    CoverLift,
    /// measuredValue = 10000 * log10(lux) + 1
    Illuminance,
    /// occupancy bit 0
    Occupancy,
    /// IAS zone status alarm bits
    ZoneAlarm,
}

impl ClusterConverter {
    pub fn parse(&self, value: &AttributeValue) -> Option<CapabilityValue> {
        self.parse_with(value, BatteryType::default())
    }

    /// Like [`parse`](Self::parse), with the battery fitted in the device.
    pub fn parse_with(&self, value: &AttributeValue, battery: BatteryType) -> Option<CapabilityValue> {
        let parsed = match *self {
            ClusterConverter::OnOff => CapabilityValue::Bool(value.as_bool()?),
            ClusterConverter::Level | ClusterConverter::Hue | ClusterConverter::Saturation => {
                CapabilityValue::Number((value.as_i64()? as f64 / COLOR_MAX).clamp(0.0, 1.0))
            }
            ClusterConverter::ColorTemperature {
                min_mireds,
                max_mireds,
            } => {
                let span = (max_mireds - min_mireds) as f64;
                let mireds = value.as_i64()? as f64;
                CapabilityValue::Number(((mireds - min_mireds as f64) / span).clamp(0.0, 1.0))
            }
            ClusterConverter::Scaled { divisor } => {
                CapabilityValue::Number(value.as_i64()? as f64 / divisor)
            }
            ClusterConverter::HalfPercent => {
                CapabilityValue::Number((value.as_i64()? as f64 / 2.0).clamp(0.0, 100.0))
            }
            ClusterConverter::BatteryVoltage => match value.as_i64()? {
                // 0xFF: voltage unknown
                0xFF => return None,
                raw => CapabilityValue::Number(battery.percentage_from_raw(raw)),
            },
            ClusterConverter::Lock => CapabilityValue::Bool(value.as_i64()? == 1),
            ClusterConverter::CoverLift => {
                CapabilityValue::Number((value.as_i64()? as f64 / 100.0).clamp(0.0, 1.0))
            }
            ClusterConverter::Illuminance => {
                let raw = value.as_i64()?;
                let lux = if raw <= 0 {
                    0.0
                } else {
                    10f64.powf((raw as f64 - 1.0) / 10000.0)
                };
                CapabilityValue::Number(lux.round())
            }
            ClusterConverter::Occupancy => CapabilityValue::Bool(value.as_i64()? & 0x01 != 0),
            ClusterConverter::ZoneAlarm => {
                CapabilityValue::Bool(ZoneStatus(value.as_i64()? as u16).alarm())
            }
        };
        Some(parsed)
    }

    /// Cluster command realising a capability value; `None` when the
    /// attribute is read-only or the value does not fit.
    pub fn command(&self, value: &CapabilityValue) -> Option<ZclCommand> {
        let to_byte = |v: f64| (v.clamp(0.0, 1.0) * COLOR_MAX).round() as u8;
        match *self {
            ClusterConverter::OnOff => Some(if value.as_bool()? {
                ZclCommand::On
            } else {
                ZclCommand::Off
            }),
            ClusterConverter::Level => Some(ZclCommand::MoveToLevelWithOnOff {
                level: to_byte(value.as_f64()?),
                transition_time: 0,
            }),
            ClusterConverter::Hue => Some(ZclCommand::MoveToHue {
                hue: to_byte(value.as_f64()?),
                transition_time: 0,
            }),
            ClusterConverter::Saturation => Some(ZclCommand::MoveToSaturation {
                saturation: to_byte(value.as_f64()?),
                transition_time: 0,
            }),
            ClusterConverter::ColorTemperature {
                min_mireds,
                max_mireds,
            } => {
                let ratio = value.as_f64()?.clamp(0.0, 1.0);
                let mireds = min_mireds as f64 + ratio * (max_mireds - min_mireds) as f64;
                Some(ZclCommand::MoveToColorTemperature {
                    mireds: mireds.round() as u16,
                    transition_time: 0,
                })
            }
            ClusterConverter::Lock => Some(if value.as_bool()? {
                ZclCommand::LockDoor
            } else {
                ZclCommand::UnlockDoor
            }),
            ClusterConverter::CoverLift => Some(ZclCommand::GoToLiftPercentage(
                (value.as_f64()?.clamp(0.0, 1.0) * 100.0).round() as u8,
            )),
            ClusterConverter::Scaled { .. }
            | ClusterConverter::HalfPercent
            | ClusterConverter::BatteryVoltage
            | ClusterConverter::Illuminance
            | ClusterConverter::Occupancy
            | ClusterConverter::ZoneAlarm => None,
        }
    }
}

/// Standard cluster side of a capability binding.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterBinding {
    pub cluster: ClusterId,
    pub attribute: u16,
    pub converter: ClusterConverter,
    pub reporting: Option<ReportingConfig>,
}

/// Where a capability's values come from.
#[derive(Debug, Clone, PartialEq)]
pub enum BindingSource {
    Cluster(ClusterBinding),
    /// Handled through the class dispatch table.
    Datapoint(u8),
}

impl BindingSource {
    pub fn cluster(&self) -> ClusterId {
        match self {
            BindingSource::Cluster(binding) => binding.cluster,
            BindingSource::Datapoint(_) => ClusterId::TUYA,
        }
    }
}

/// One declared path between a capability and the device.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityBinding {
    pub capability: String,
    pub source: BindingSource,
    pub direction: Direction,
}

/// Translates device traffic into capability updates and capability writes
/// into device commands, for one device.
pub struct CapabilityBridge {
    device_id: String,
    class: Arc<DeviceClass>,
    endpoint: Arc<dyn ZclEndpoint>,
    session: Arc<Mutex<DeviceSession>>,
    settings: Arc<DeviceSettings>,
}

impl CapabilityBridge {
    pub fn new(
        device_id: impl Into<String>,
        class: Arc<DeviceClass>,
        endpoint: Arc<dyn ZclEndpoint>,
        session: Arc<Mutex<DeviceSession>>,
        settings: Arc<DeviceSettings>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            class,
            endpoint,
            session,
            settings,
        }
    }

    /// Activate one binding on the endpoint. Fails when the endpoint lacks
    /// the source cluster.
    pub fn register(&self, binding: &CapabilityBinding) -> Result<()> {
        let cluster = binding.source.cluster();
        let available = self
            .session
            .lock()
            .endpoint_has(self.endpoint.id(), cluster);
        if !available {
            return Err(BridgeError::ClusterUnavailable(cluster));
        }
        if let BindingSource::Datapoint(dp) = binding.source
            && !self.class.dispatch.handles_capability(&binding.capability)
        {
            return Err(BridgeError::InvalidValue {
                capability: binding.capability.clone(),
                reason: format!("DP {} has no dispatch handler", dp),
            });
        }
        self.session.lock().activate(binding.clone());
        debug!(
            "Device {}: {} bound to {}",
            self.device_id, binding.capability, cluster
        );
        Ok(())
    }

    /// Configure attribute reporting for an active cluster binding.
    pub async fn configure_reporting(&self, binding: &ClusterBinding) -> Result<()> {
        let Some(config) = binding.reporting else {
            return Ok(());
        };
        self.endpoint
            .configure_reporting(binding.cluster, binding.attribute, config)
            .await
    }

    /// Capability updates for a standard attribute report.
    pub fn on_attribute_report(
        &self,
        cluster: ClusterId,
        attribute: u16,
        value: &AttributeValue,
    ) -> Vec<CapabilityUpdate> {
        let session = self.session.lock();
        let mut updates = Vec::new();
        for binding in session.active_bindings() {
            let BindingSource::Cluster(source) = &binding.source else {
                continue;
            };
            if source.cluster != cluster
                || source.attribute != attribute
                || !binding.direction.readable()
            {
                continue;
            }
            match source
                .converter
                .parse_with(value, self.settings.battery_type)
            {
                Some(v) => updates.push(CapabilityUpdate {
                    capability: binding.capability.clone(),
                    value: v,
                }),
                None => warn!(
                    "Device {}: {} attribute 0x{:04X} value {:?} unusable for {}",
                    self.device_id, cluster, attribute, value, binding.capability
                ),
            }
        }
        if updates.is_empty() {
            debug!(
                "Device {}: no binding for {} attribute 0x{:04X}",
                self.device_id, cluster, attribute
            );
        }
        updates
    }

    /// Capability updates for a decoded Tuya report.
    pub fn on_datapoints(&self, frame: &DpFrame) -> Vec<CapabilityUpdate> {
        let mut updates = Vec::new();
        let mut session = self.session.lock();
        session.observe_seqno(&self.device_id, frame.seqno);
        for record in &frame.datapoints {
            let raw = match DpValue::decode(record) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("Device {}: {}", self.device_id, e);
                    continue;
                }
            };
            debug!("Device {}: DP {} = {}", self.device_id, record.dp, raw);
            updates.extend(
                self.class
                    .dispatch
                    .handle_incoming_datapoint(record.dp, &raw)
                    .into_iter()
                    .filter(|u| session.is_active(&u.capability)),
            );
            session.remember_datapoint(record.dp, raw);
        }
        updates
    }

    /// Push a capability value to the device. The Tuya datapoint path is
    /// tried first when available, then the standard cluster command.
    pub async fn write(&self, capability: &str, value: &CapabilityValue) -> Result<()> {
        let (tuya_ready, cluster_paths) = {
            let session = self.session.lock();
            if !session.is_active(capability) {
                return Err(if self.class.declares(capability) {
                    BridgeError::UnsupportedCapability(capability.to_string())
                } else {
                    BridgeError::UnknownCapability(capability.to_string())
                });
            }
            let tuya_ready = session
                .bindings_for(capability)
                .any(|b| matches!(b.source, BindingSource::Datapoint(_)) && b.direction.writable())
                && self.class.dispatch.is_writable(capability);
            let cluster_paths: Vec<ClusterBinding> = session
                .bindings_for(capability)
                .filter(|b| b.direction.writable())
                .filter_map(|b| match &b.source {
                    BindingSource::Cluster(c) => Some(c.clone()),
                    BindingSource::Datapoint(_) => None,
                })
                .collect();
            (tuya_ready, cluster_paths)
        };

        let mut last_err = None;

        if tuya_ready {
            match self.write_datapoint(capability, value).await {
                Ok(()) => return Ok(()),
                Err(e) if cluster_paths.is_empty() => return Err(e),
                Err(e) => {
                    warn!(
                        "Device {}: DP write of {} failed ({}), trying cluster command",
                        self.device_id, capability, e
                    );
                    last_err = Some(e);
                }
            }
        }

        for path in cluster_paths {
            let Some(command) = path.converter.command(value) else {
                last_err = Some(BridgeError::InvalidValue {
                    capability: capability.to_string(),
                    reason: format!("{} has no {} command", value, path.cluster),
                });
                continue;
            };
            debug!("Device {}: {} -> {:?}", self.device_id, capability, command);
            match self.endpoint.send_command(command).await {
                Ok(()) => return Ok(()),
                Err(e) => last_err = Some(e),
            }
        }

        Err(last_err.unwrap_or_else(|| BridgeError::UnsupportedCapability(capability.to_string())))
    }

    async fn write_datapoint(&self, capability: &str, value: &CapabilityValue) -> Result<()> {
        let (record, payload) = {
            let mut session = self.session.lock();
            let dp = self.class.dispatch.datapoint_for(capability);
            let previous = dp.and_then(|dp| session.last_datapoint(dp).cloned());
            let record = self.class.dispatch.build_outgoing_command_over(
                capability,
                value,
                previous.as_ref(),
            )?;
            let frame = encode_set_data(
                session.sequence_mut(),
                record.dp,
                record.data_type,
                record.data.clone(),
            );
            (record, frame.pack()?)
        };
        debug!(
            "Device {}: setData {} ({})",
            self.device_id,
            capability,
            hex::encode(&payload)
        );
        self.endpoint.send_tuya(TuyaCommand::SetData, payload).await?;

        // Later bitmap writes merge over what was sent
        if let Ok(raw) = DpValue::decode(&record) {
            self.session.lock().remember_datapoint(record.dp, raw);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_standard_attributes() {
        assert_eq!(
            ClusterConverter::Scaled { divisor: 100.0 }.parse(&AttributeValue::Int(2150)),
            Some(CapabilityValue::Number(21.5))
        );
        assert_eq!(
            ClusterConverter::HalfPercent.parse(&AttributeValue::Int(200)),
            Some(CapabilityValue::Number(100.0))
        );
        assert_eq!(
            ClusterConverter::Level.parse(&AttributeValue::Int(254)),
            Some(CapabilityValue::Number(1.0))
        );
        assert_eq!(
            ClusterConverter::ZoneAlarm.parse(&AttributeValue::Int(0x0001)),
            Some(CapabilityValue::Bool(true))
        );
        assert_eq!(
            ClusterConverter::Lock.parse(&AttributeValue::Int(2)),
            Some(CapabilityValue::Bool(false))
        );
        assert_eq!(ClusterConverter::OnOff.parse(&AttributeValue::Text("x".into())), None);
    }

    #[test]
    fn builds_cluster_commands() {
        assert_eq!(
            ClusterConverter::Lock.command(&CapabilityValue::Bool(true)),
            Some(ZclCommand::LockDoor)
        );
        assert_eq!(
            ClusterConverter::Level.command(&CapabilityValue::Number(0.5)),
            Some(ZclCommand::MoveToLevelWithOnOff {
                level: 127,
                transition_time: 0
            })
        );
        assert_eq!(
            ClusterConverter::ColorTemperature {
                min_mireds: 153,
                max_mireds: 500
            }
            .command(&CapabilityValue::Number(1.0)),
            Some(ZclCommand::MoveToColorTemperature {
                mireds: 500,
                transition_time: 0
            })
        );
        assert_eq!(
            ClusterConverter::Scaled { divisor: 10.0 }.command(&CapabilityValue::Number(1.0)),
            None
        );
    }

    #[test]
    fn battery_voltage_follows_battery_type() {
        let c = ClusterConverter::BatteryVoltage;
        assert_eq!(c.parse(&AttributeValue::Int(30)), Some(CapabilityValue::Number(95.0)));
        assert_eq!(
            c.parse_with(&AttributeValue::Int(30), BatteryType::TwoAaa),
            Some(CapabilityValue::Number(90.0))
        );
        assert_eq!(c.parse(&AttributeValue::Int(0xFF)), None);
        assert_eq!(c.command(&CapabilityValue::Number(50.0)), None);
    }

    #[test]
    fn illuminance_is_logarithmic() {
        assert_eq!(
            ClusterConverter::Illuminance.parse(&AttributeValue::Int(20001)),
            Some(CapabilityValue::Number(100.0))
        );
        assert_eq!(
            ClusterConverter::Illuminance.parse(&AttributeValue::Int(0)),
            Some(CapabilityValue::Number(0.0))
        );
    }
}
