//! Per-device session state.
//! Owned by exactly one device; only its report handlers and capability
//! listeners mutate it.

use crate::capability::CapabilityBinding;
use crate::cluster::ClusterId;
use crate::protocol::SequenceCounter;
use crate::value::{CapabilityValue, DpValue};
use log::debug;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Default)]
pub struct DeviceSession {
    endpoint_map: HashMap<u8, BTreeSet<ClusterId>>,
    last_values: HashMap<String, CapabilityValue>,
    last_datapoints: HashMap<u8, DpValue>,
    fallback_mode: HashMap<ClusterId, bool>,
    active: Vec<CapabilityBinding>,
    sequence: SequenceCounter,
    last_rx_seqno: Option<u8>,
    ready: bool,
}

impl DeviceSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_endpoint(&mut self, endpoint: u8, clusters: BTreeSet<ClusterId>) {
        self.endpoint_map.insert(endpoint, clusters);
    }

    pub fn endpoint_has(&self, endpoint: u8, cluster: ClusterId) -> bool {
        self.endpoint_map
            .get(&endpoint)
            .is_some_and(|clusters| clusters.contains(&cluster))
    }

    pub fn endpoint_map(&self) -> &HashMap<u8, BTreeSet<ClusterId>> {
        &self.endpoint_map
    }

    pub fn activate(&mut self, binding: CapabilityBinding) {
        if !self.active.contains(&binding) {
            self.active.push(binding);
        }
    }

    pub fn active_bindings(&self) -> impl Iterator<Item = &CapabilityBinding> {
        self.active.iter()
    }

    pub fn bindings_for<'a>(
        &'a self,
        capability: &'a str,
    ) -> impl Iterator<Item = &'a CapabilityBinding> + 'a {
        self.active.iter().filter(move |b| b.capability == capability)
    }

    pub fn is_active(&self, capability: &str) -> bool {
        self.active.iter().any(|b| b.capability == capability)
    }

    pub fn record_value(&mut self, capability: &str, value: CapabilityValue) {
        self.last_values.insert(capability.to_string(), value);
    }

    pub fn last_value(&self, capability: &str) -> Option<&CapabilityValue> {
        self.last_values.get(capability)
    }

    pub fn last_values(&self) -> &HashMap<String, CapabilityValue> {
        &self.last_values
    }

    pub fn remember_datapoint(&mut self, dp: u8, value: DpValue) {
        self.last_datapoints.insert(dp, value);
    }

    pub fn last_datapoint(&self, dp: u8) -> Option<&DpValue> {
        self.last_datapoints.get(&dp)
    }

    pub fn set_fallback_mode(&mut self, cluster: ClusterId, enabled: bool) {
        self.fallback_mode.insert(cluster, enabled);
    }

    pub fn fallback_mode(&self, cluster: ClusterId) -> bool {
        self.fallback_mode.get(&cluster).copied().unwrap_or(false)
    }

    pub fn sequence_mut(&mut self) -> &mut SequenceCounter {
        &mut self.sequence
    }

    /// Record an incoming sequence number. Duplicates and gaps are only
    /// logged; frames are applied in arrival order regardless.
    pub fn observe_seqno(&mut self, device_id: &str, seqno: u8) {
        if let Some(last) = self.last_rx_seqno {
            let expected = last.wrapping_add(1);
            if seqno == last {
                debug!("Device {}: duplicate report seqno {}", device_id, seqno);
            } else if seqno != expected {
                debug!(
                    "Device {}: report seqno {} after {} (expected {})",
                    device_id, seqno, last, expected
                );
            }
        }
        self.last_rx_seqno = Some(seqno);
    }

    pub fn last_rx_seqno(&self) -> Option<u8> {
        self.last_rx_seqno
    }

    pub fn mark_ready(&mut self) {
        self.ready = true;
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }
}
