//! Seams to the host runtime.
//!
//! The bridge never talks to a radio or a UI directly. The host hands each
//! device a [`ZclEndpoint`] (the negotiated Zigbee endpoint) and a
//! [`CapabilityHost`] (the capability store the user and flows see), and feeds
//! incoming traffic in as [`ZclEvent`]s.

use crate::cluster::{AttributeValue, ClusterId, ReportingConfig, ZclCommand};
use crate::error::Result;
use crate::protocol::TuyaCommand;
use crate::value::CapabilityValue;
use async_trait::async_trait;
use std::collections::BTreeSet;

/// A Zigbee endpoint of a paired device.
#[async_trait]
pub trait ZclEndpoint: Send + Sync {
    /// Endpoint number (usually 1).
    fn id(&self) -> u8;

    /// Server clusters exposed by the endpoint.
    fn clusters(&self) -> BTreeSet<ClusterId>;

    fn has_cluster(&self, cluster: ClusterId) -> bool {
        self.clusters().contains(&cluster)
    }

    /// IEEE address of the controller, written to `iasCieAddr` during zone
    /// enrollment. `None` when the host does not know it.
    fn controller_ieee(&self) -> Option<u64>;

    /// Bind the cluster to the controller. Firmware that cannot bind returns
    /// [`BridgeError::BindFailed`](crate::BridgeError::BindFailed).
    async fn bind(&self, cluster: ClusterId) -> Result<()>;

    async fn configure_reporting(
        &self,
        cluster: ClusterId,
        attribute: u16,
        config: ReportingConfig,
    ) -> Result<()>;

    async fn read_attribute(&self, cluster: ClusterId, attribute: u16) -> Result<AttributeValue>;

    async fn write_attribute(
        &self,
        cluster: ClusterId,
        attribute: u16,
        value: AttributeValue,
    ) -> Result<()>;

    async fn send_command(&self, command: ZclCommand) -> Result<()>;

    /// Send a command on the Tuya cluster with an already packed payload.
    async fn send_tuya(&self, command: TuyaCommand, payload: Vec<u8>) -> Result<()>;
}

/// Capability store of the host runtime.
#[async_trait]
pub trait CapabilityHost: Send + Sync {
    fn has_capability(&self, capability: &str) -> bool;

    async fn set_capability_value(&self, capability: &str, value: CapabilityValue) -> Result<()>;
}

/// Traffic delivered by the host for one device.
#[derive(Debug, Clone, PartialEq)]
pub enum ZclEvent {
    /// Attribute report from a standard cluster.
    AttributeReport {
        cluster: ClusterId,
        attribute: u16,
        value: AttributeValue,
    },
    /// IAS zone `zoneStatusChangeNotification`.
    ZoneStatusChange { zone_status: u16 },
    /// IAS zone `zoneEnrollRequest`.
    ZoneEnrollRequest { zone_type: u16 },
    /// Command received on the Tuya cluster.
    TuyaFrame { command: TuyaCommand, payload: Vec<u8> },
}
