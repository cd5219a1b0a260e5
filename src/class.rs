//! Device class definitions.
//!
//! A device class is an ordered list of capability bindings plus the
//! datapoint dispatch table they use. Classes are immutable once built and
//! shared by every device paired with them.

use crate::capability::{BindingSource, CapabilityBinding, ClusterBinding, ClusterConverter};
use crate::cluster::{ClusterId, ReportingConfig, attr};
use crate::dispatch::{DatapointHandler, Direction, DispatchTable, DpConverter};
use crate::protocol::DataType;

/// IAS zone alarm handling for a class.
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmConfig {
    pub cluster: ClusterId,
    /// Capability fed by the zone binding, used when the host exposes none
    /// of the standard alarm capabilities.
    pub capability: Option<String>,
    /// Tuya datapoints that mirror the zone alarm on many sensors.
    pub mirror_datapoints: Vec<u8>,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            cluster: ClusterId::IAS_ZONE,
            capability: None,
            mirror_datapoints: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeviceClass {
    pub name: String,
    pub bindings: Vec<CapabilityBinding>,
    pub dispatch: DispatchTable,
    pub alarm: Option<AlarmConfig>,
}

impl DeviceClass {
    pub fn builder(name: impl Into<String>) -> DeviceClassBuilder {
        DeviceClassBuilder {
            class: DeviceClass {
                name: name.into(),
                bindings: Vec::new(),
                dispatch: DispatchTable::new(),
                alarm: None,
            },
        }
    }

    /// Declared capability names, in declaration order.
    pub fn capabilities(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for binding in &self.bindings {
            if !names.contains(&binding.capability.as_str()) {
                names.push(&binding.capability);
            }
        }
        names
    }

    pub fn declares(&self, capability: &str) -> bool {
        self.bindings.iter().any(|b| b.capability == capability)
    }

    pub fn bindings_for<'a>(
        &'a self,
        capability: &'a str,
    ) -> impl Iterator<Item = &'a CapabilityBinding> + 'a {
        self.bindings
            .iter()
            .filter(move |b| b.capability == capability)
    }
}

pub struct DeviceClassBuilder {
    class: DeviceClass,
}

impl DeviceClassBuilder {
    /// Capability carried by a Tuya datapoint.
    pub fn datapoint(
        mut self,
        dp: u8,
        capability: &str,
        data_type: DataType,
        direction: Direction,
        converter: DpConverter,
    ) -> Self {
        self.class.dispatch.register(DatapointHandler {
            dp,
            capability: capability.to_string(),
            data_type,
            direction,
            converter,
        });
        self.push(CapabilityBinding {
            capability: capability.to_string(),
            source: BindingSource::Datapoint(dp),
            direction,
        });
        self
    }

    /// Read-only datapoint capability.
    pub fn report(self, dp: u8, capability: &str, data_type: DataType, converter: DpConverter) -> Self {
        self.datapoint(dp, capability, data_type, Direction::Read, converter)
    }

    /// Capability carried by a standard cluster attribute.
    pub fn cluster(
        mut self,
        capability: &str,
        cluster: ClusterId,
        attribute: u16,
        converter: ClusterConverter,
        direction: Direction,
        reporting: Option<ReportingConfig>,
    ) -> Self {
        self.push(CapabilityBinding {
            capability: capability.to_string(),
            source: BindingSource::Cluster(ClusterBinding {
                cluster,
                attribute,
                converter,
                reporting,
            }),
            direction,
        });
        self
    }

    /// Alarm capability driven by the IAS zone status.
    pub fn ias_zone(mut self, capability: &str) -> Self {
        self = self.cluster(
            capability,
            ClusterId::IAS_ZONE,
            attr::ZONE_STATUS,
            ClusterConverter::ZoneAlarm,
            Direction::Read,
            Some(ReportingConfig::on_change()),
        );
        self.class
            .alarm
            .get_or_insert_with(AlarmConfig::default)
            .capability = Some(capability.to_string());
        self
    }

    /// Datapoint mirroring the IAS zone alarm, used when the bind fails.
    pub fn mirror_datapoint(mut self, dp: u8) -> Self {
        let alarm = self.class.alarm.get_or_insert_with(AlarmConfig::default);
        if !alarm.mirror_datapoints.contains(&dp) {
            alarm.mirror_datapoints.push(dp);
        }
        self
    }

    pub fn build(self) -> DeviceClass {
        self.class
    }

    fn push(&mut self, binding: CapabilityBinding) {
        if !self.class.bindings.contains(&binding) {
            self.class.bindings.push(binding);
        }
    }
}
