#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use zigtuya::cluster::{AttributeValue, ClusterId, ReportingConfig, ZclCommand, ZdoStatus};
use zigtuya::protocol::{DataType, Datapoint, DpFrame};
use zigtuya::{BridgeError, CapabilityHost, CapabilityValue, Result, TuyaCommand, ZclEndpoint};

/// In-memory endpoint recording everything sent to it.
#[derive(Default)]
pub struct MockEndpoint {
    clusters: BTreeSet<ClusterId>,
    controller: Option<u64>,
    bind_failures: Mutex<HashMap<ClusterId, BridgeError>>,
    write_failure: Option<BridgeError>,
    zone_status: Mutex<u16>,
    tuya_failures: Mutex<VecDeque<BridgeError>>,
    command_failures: Mutex<VecDeque<BridgeError>>,
    command_gate: Option<Arc<Notify>>,
    read_gate: Option<Arc<Notify>>,
    /// Order of bind and attribute write requests
    pub calls: Mutex<Vec<&'static str>>,
    pub binds: Mutex<Vec<ClusterId>>,
    pub writes: Mutex<Vec<(ClusterId, u16, AttributeValue)>>,
    pub reporting: Mutex<Vec<(ClusterId, u16, ReportingConfig)>>,
    pub reads: Mutex<Vec<(ClusterId, u16)>>,
    pub commands: Mutex<Vec<ZclCommand>>,
    pub tuya: Mutex<Vec<(TuyaCommand, Vec<u8>)>>,
}

impl MockEndpoint {
    pub fn new(clusters: &[ClusterId]) -> Self {
        Self {
            clusters: clusters.iter().copied().collect(),
            ..Default::default()
        }
    }

    pub fn failing_bind(self, cluster: ClusterId) -> Self {
        self.bind_failures.lock().insert(
            cluster,
            BridgeError::BindFailed {
                cluster,
                status: ZdoStatus::InvalidEp,
            },
        );
        self
    }

    pub fn with_controller(mut self, ieee: u64) -> Self {
        self.controller = Some(ieee);
        self
    }

    pub fn failing_writes(mut self, err: BridgeError) -> Self {
        self.write_failure = Some(err);
        self
    }

    /// Hold every cluster command until the gate is notified.
    pub fn gated_commands(mut self, gate: Arc<Notify>) -> Self {
        self.command_gate = Some(gate);
        self
    }

    /// Hold every attribute read (after recording it) until the gate is
    /// notified.
    pub fn gated_reads(mut self, gate: Arc<Notify>) -> Self {
        self.read_gate = Some(gate);
        self
    }

    pub fn allow_bind(&self, cluster: ClusterId) {
        self.bind_failures.lock().remove(&cluster);
    }

    pub fn set_zone_status(&self, status: u16) {
        *self.zone_status.lock() = status;
    }

    pub fn fail_next_tuya(&self, err: BridgeError) {
        self.tuya_failures.lock().push_back(err);
    }

    pub fn fail_next_command(&self, err: BridgeError) {
        self.command_failures.lock().push_back(err);
    }

    pub fn read_count(&self) -> usize {
        self.reads.lock().len()
    }

    pub fn sent_tuya(&self) -> Vec<(TuyaCommand, Vec<u8>)> {
        self.tuya.lock().clone()
    }

    pub fn sent_commands(&self) -> Vec<ZclCommand> {
        self.commands.lock().clone()
    }
}

#[async_trait]
impl ZclEndpoint for MockEndpoint {
    fn id(&self) -> u8 {
        1
    }

    fn clusters(&self) -> BTreeSet<ClusterId> {
        self.clusters.clone()
    }

    fn controller_ieee(&self) -> Option<u64> {
        self.controller
    }

    async fn bind(&self, cluster: ClusterId) -> Result<()> {
        self.calls.lock().push("bind");
        self.binds.lock().push(cluster);
        match self.bind_failures.lock().get(&cluster) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn configure_reporting(
        &self,
        cluster: ClusterId,
        attribute: u16,
        config: ReportingConfig,
    ) -> Result<()> {
        self.reporting.lock().push((cluster, attribute, config));
        Ok(())
    }

    async fn read_attribute(&self, cluster: ClusterId, attribute: u16) -> Result<AttributeValue> {
        self.reads.lock().push((cluster, attribute));
        if let Some(gate) = &self.read_gate {
            gate.notified().await;
        }
        Ok(AttributeValue::Int(*self.zone_status.lock() as i64))
    }

    async fn write_attribute(
        &self,
        cluster: ClusterId,
        attribute: u16,
        value: AttributeValue,
    ) -> Result<()> {
        self.calls.lock().push("write");
        if let Some(err) = &self.write_failure {
            return Err(err.clone());
        }
        self.writes.lock().push((cluster, attribute, value));
        Ok(())
    }

    async fn send_command(&self, command: ZclCommand) -> Result<()> {
        if let Some(gate) = &self.command_gate {
            gate.notified().await;
        }
        if let Some(err) = self.command_failures.lock().pop_front() {
            return Err(err);
        }
        self.commands.lock().push(command);
        Ok(())
    }

    async fn send_tuya(&self, command: TuyaCommand, payload: Vec<u8>) -> Result<()> {
        if let Some(err) = self.tuya_failures.lock().pop_front() {
            return Err(err);
        }
        self.tuya.lock().push((command, payload));
        Ok(())
    }
}

/// Capability store recording every value applied.
#[derive(Default)]
pub struct MockHost {
    capabilities: HashSet<String>,
    pub values: Mutex<Vec<(String, CapabilityValue)>>,
}

impl MockHost {
    pub fn new(capabilities: &[&str]) -> Self {
        Self {
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            values: Mutex::new(Vec::new()),
        }
    }

    pub fn values_for(&self, capability: &str) -> Vec<CapabilityValue> {
        self.values
            .lock()
            .iter()
            .filter(|(c, _)| c == capability)
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }
}

#[async_trait]
impl CapabilityHost for MockHost {
    fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    async fn set_capability_value(&self, capability: &str, value: CapabilityValue) -> Result<()> {
        self.values.lock().push((capability.to_string(), value));
        Ok(())
    }
}

/// Packed `dataReport` payload.
pub fn report(seqno: u8, records: &[(u8, DataType, &[u8])]) -> Vec<u8> {
    DpFrame {
        seqno,
        datapoints: records
            .iter()
            .map(|(dp, ty, data)| Datapoint::new(*dp, *ty, data.to_vec()))
            .collect(),
    }
    .pack()
    .unwrap()
}

/// Let spawned tasks run without moving the paused clock.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

pub async fn advance(secs: u64) {
    tokio::time::advance(Duration::from_secs(secs)).await;
    settle().await;
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
