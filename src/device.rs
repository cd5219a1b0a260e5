//! Per-device lifecycle and event handling.
//! Sequences initialization (capability registration, reporting, alarm
//! handling), applies incoming cluster traffic in arrival order and serializes
//! capability writes.

use crate::capability::{BindingSource, CapabilityBridge};
use crate::class::DeviceClass;
use crate::cluster::{ClusterId, ZclCommand, attr};
use crate::config::DeviceSettings;
use crate::dispatch::CapabilityUpdate;
use crate::error::{BridgeError, Result};
use crate::fallback::{AlarmState, FallbackPoller, ZoneAlarm};
use crate::host::{CapabilityHost, ZclEndpoint, ZclEvent};
use crate::protocol::{TuyaCommand, decode_data_report, encode_data_query, time_sync_payload};
use crate::publish::{CapabilityEvent, Publisher};
use crate::session::DeviceSession;
use crate::value::{CapabilityValue, DpValue};
use futures_core::stream::Stream;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Assembles a [`Device`] from its class, endpoint and host seams.
pub struct DeviceBuilder {
    id: String,
    class: Arc<DeviceClass>,
    endpoint: Arc<dyn ZclEndpoint>,
    host: Arc<dyn CapabilityHost>,
    settings: DeviceSettings,
}

impl DeviceBuilder {
    pub fn new(
        id: impl Into<String>,
        class: Arc<DeviceClass>,
        endpoint: Arc<dyn ZclEndpoint>,
        host: Arc<dyn CapabilityHost>,
    ) -> Self {
        Self {
            id: id.into(),
            class,
            endpoint,
            host,
            settings: DeviceSettings::default(),
        }
    }

    pub fn settings(mut self, settings: DeviceSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Use the host's stored settings object.
    pub fn settings_json(self, value: &serde_json::Value) -> Result<Self> {
        let settings = DeviceSettings::from_json(value)?;
        Ok(self.settings(settings))
    }

    pub fn build(self) -> Device {
        Device::new(self)
    }
}

/// A paired device bridged to the host's capability store.
#[derive(Clone)]
pub struct Device {
    id: String,
    class: Arc<DeviceClass>,
    endpoint: Arc<dyn ZclEndpoint>,
    settings: Arc<DeviceSettings>,
    session: Arc<Mutex<DeviceSession>>,
    bridge: Arc<CapabilityBridge>,
    publisher: Publisher,
    alarm: Option<ZoneAlarm>,

    // Serialize event handling and writes respectively
    event_lock: Arc<tokio::sync::Mutex<()>>,
    write_lock: Arc<tokio::sync::Mutex<()>>,

    broadcast_tx: broadcast::Sender<CapabilityEvent>,
    cancel_token: CancellationToken,
}

impl Device {
    fn new(builder: DeviceBuilder) -> Self {
        let DeviceBuilder {
            id,
            class,
            endpoint,
            host,
            settings,
        } = builder;
        let settings = Arc::new(settings);
        let session = Arc::new(Mutex::new(DeviceSession::new()));
        let cancel_token = CancellationToken::new();
        let (broadcast_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let publisher = Publisher::new(
            id.clone(),
            host,
            session.clone(),
            settings.clone(),
            broadcast_tx.clone(),
            cancel_token.clone(),
        );
        let bridge = Arc::new(CapabilityBridge::new(
            id.clone(),
            class.clone(),
            endpoint.clone(),
            session.clone(),
            settings.clone(),
        ));
        let event_lock = Arc::new(tokio::sync::Mutex::new(()));
        let alarm = class.alarm.clone().map(|config| {
            ZoneAlarm::new(
                endpoint.clone(),
                publisher.clone(),
                session.clone(),
                config,
                settings.clone(),
                event_lock.clone(),
                cancel_token.child_token(),
            )
        });

        Self {
            id,
            class,
            endpoint,
            settings,
            session,
            bridge,
            publisher,
            alarm,
            event_lock,
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
            broadcast_tx,
            cancel_token,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn class(&self) -> &Arc<DeviceClass> {
        &self.class
    }

    pub fn settings(&self) -> &DeviceSettings {
        &self.settings
    }

    pub fn is_ready(&self) -> bool {
        self.session.lock().is_ready()
    }

    pub fn is_deleted(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub fn last_value(&self, capability: &str) -> Option<CapabilityValue> {
        self.session.lock().last_value(capability).cloned()
    }

    pub fn last_datapoint(&self, dp: u8) -> Option<DpValue> {
        self.session.lock().last_datapoint(dp).cloned()
    }

    pub fn is_active(&self, capability: &str) -> bool {
        self.session.lock().is_active(capability)
    }

    pub fn fallback_mode(&self, cluster: ClusterId) -> bool {
        self.session.lock().fallback_mode(cluster)
    }

    pub fn alarm_state(&self) -> Option<AlarmState> {
        self.alarm.as_ref().map(ZoneAlarm::state)
    }

    pub fn poller(&self) -> Option<FallbackPoller> {
        self.alarm.as_ref().and_then(ZoneAlarm::poller)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CapabilityEvent> {
        self.broadcast_tx.subscribe()
    }

    /// Returns a Stream of capability values applied for this device.
    pub fn stream(&self) -> impl Stream<Item = CapabilityEvent> + Send + 'static {
        let mut rx = self.broadcast_tx.subscribe();
        async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
        }
    }
}

// -------------------------------------------------------------------------
// Lifecycle
// -------------------------------------------------------------------------
impl Device {
    /// Initialize the device. Capability registration and reporting failures
    /// are logged per capability and never abort the sequence.
    pub async fn init(&self) -> Result<()> {
        if self.is_deleted() {
            return Err(BridgeError::DeviceRemoved(self.id.clone()));
        }
        info!(
            "Initializing device {} ({}) on endpoint {}",
            self.id,
            self.class.name,
            self.endpoint.id()
        );
        self.session
            .lock()
            .add_endpoint(self.endpoint.id(), self.endpoint.clusters());

        let mut registered = Vec::new();
        for binding in &self.class.bindings {
            match self.bridge.register(binding) {
                Ok(()) => registered.push(binding),
                Err(e) => warn!(
                    "Device {}: failed to register {}: {}",
                    self.id, binding.capability, e
                ),
            }
        }

        for binding in registered {
            let BindingSource::Cluster(source) = &binding.source else {
                continue;
            };
            // The zone cluster is bound by the alarm handler
            if self.is_zone_source(source.cluster, source.attribute) {
                continue;
            }
            if let Err(e) = self.bridge.configure_reporting(source).await {
                warn!(
                    "Device {}: reporting for {} on {} not configured: {}",
                    self.id, binding.capability, source.cluster, e
                );
            }
        }

        if let Some(alarm) = &self.alarm {
            let state = alarm.start().await;
            info!("Device {}: alarm handling {:?}", self.id, state);
        }

        if self.is_deleted() {
            return Err(BridgeError::DeviceRemoved(self.id.clone()));
        }
        self.session.lock().mark_ready();
        info!("Device {} ready", self.id);
        Ok(())
    }

    /// Delete the device: stops the poller and any pending timers, and
    /// discards results of commands still in flight.
    pub fn delete(&self) {
        if self.cancel_token.is_cancelled() {
            return;
        }
        info!("Deleting device {}", self.id);
        if let Some(alarm) = &self.alarm {
            alarm.stop();
        }
        self.cancel_token.cancel();
    }
}

// -------------------------------------------------------------------------
// Incoming traffic
// -------------------------------------------------------------------------
impl Device {
    /// Apply one event from the device. Events are handled strictly in
    /// arrival order.
    pub async fn handle_event(&self, event: ZclEvent) -> Result<()> {
        if self.is_deleted() {
            debug!("Device {} removed, ignoring {:?}", self.id, event);
            return Err(BridgeError::DeviceRemoved(self.id.clone()));
        }
        if !self.is_ready() {
            warn!("Device {} not initialized, rejecting {:?}", self.id, event);
            return Err(BridgeError::NotReady(self.id.clone()));
        }
        let _guard = self.event_lock.lock().await;
        let result = match event {
            ZclEvent::AttributeReport {
                cluster,
                attribute,
                value,
            } => match self.zone_alarm_for(cluster, attribute) {
                Some(alarm) => match value.as_i64() {
                    Some(status) => alarm.handle_zone_status(status as u16).await,
                    None => Err(BridgeError::DecodeError(format!(
                        "zone status {:?} is not numeric",
                        value
                    ))),
                },
                None => {
                    let updates = self.bridge.on_attribute_report(cluster, attribute, &value);
                    self.apply_updates(updates).await
                }
            },
            ZclEvent::ZoneStatusChange { zone_status } => match &self.alarm {
                Some(alarm) => alarm.handle_zone_status(zone_status).await,
                None => {
                    debug!(
                        "Device {}: zone status 0x{:04X} without alarm handling",
                        self.id, zone_status
                    );
                    Ok(())
                }
            },
            ZclEvent::ZoneEnrollRequest { zone_type } => {
                debug!(
                    "Device {}: zone enroll request (type 0x{:04X})",
                    self.id, zone_type
                );
                self.enroll_response().await
            }
            ZclEvent::TuyaFrame { command, payload } => self.handle_tuya(command, payload).await,
        };
        if let Err(e) = &result {
            error!("Device {}: failed to handle event: {}", self.id, e);
        }
        result
    }

    async fn handle_tuya(&self, command: TuyaCommand, payload: Vec<u8>) -> Result<()> {
        debug!(
            "Device {}: Tuya {:?} ({})",
            self.id,
            command,
            hex::encode(&payload)
        );
        match command {
            c if c.is_report() => {
                let frame = decode_data_report(&payload)?;
                let updates = self.bridge.on_datapoints(&frame);
                let mut result = self.apply_updates(updates).await;
                if let Some(alarm) = &self.alarm {
                    for record in &frame.datapoints {
                        let Ok(raw) = DpValue::decode(record) else {
                            continue;
                        };
                        if let Err(e) = alarm.handle_datapoint(record.dp, &raw).await {
                            result = Err(e);
                        }
                    }
                }
                result
            }
            TuyaCommand::McuSyncTime => self.sync_time(&payload).await,
            other => {
                debug!("Device {}: ignoring Tuya {:?}", self.id, other);
                Ok(())
            }
        }
    }

    async fn sync_time(&self, request: &[u8]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let utc = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let local = utc + self.settings.utc_offset_secs;
        let payload = time_sync_payload(request, utc as u32, local as u32)?;
        debug!("Device {}: answering time sync (utc={})", self.id, utc);
        self.endpoint
            .send_tuya(TuyaCommand::McuSyncTime, payload)
            .await
    }

    async fn enroll_response(&self) -> Result<()> {
        match &self.alarm {
            Some(alarm) => alarm.send_enroll_response().await,
            None => {
                self.endpoint
                    .send_command(ZclCommand::ZoneEnrollResponse {
                        enroll_response_code: 0,
                        zone_id: self.settings.zone_id,
                    })
                    .await
            }
        }
    }

    /// Publish updates in order. Every update is attempted; the last failure
    /// is returned.
    async fn apply_updates(&self, updates: Vec<CapabilityUpdate>) -> Result<()> {
        let mut result = Ok(());
        for update in updates {
            if let Err(e) = self.publisher.publish(&update.capability, update.value).await {
                result = Err(e);
            }
        }
        result
    }

    fn is_zone_source(&self, cluster: ClusterId, attribute: u16) -> bool {
        self.class
            .alarm
            .as_ref()
            .is_some_and(|a| a.cluster == cluster && attribute == attr::ZONE_STATUS)
    }

    fn zone_alarm_for(&self, cluster: ClusterId, attribute: u16) -> Option<&ZoneAlarm> {
        if self.is_zone_source(cluster, attribute) {
            self.alarm.as_ref()
        } else {
            None
        }
    }
}

// -------------------------------------------------------------------------
// Outgoing commands
// -------------------------------------------------------------------------
impl Device {
    /// Set a capability from the host. Transient failures are retried with
    /// backoff; the final failure rejects the set.
    pub async fn set_capability(
        &self,
        capability: &str,
        value: impl Into<CapabilityValue>,
    ) -> Result<()> {
        let value = value.into();
        self.ensure_ready()?;
        let _guard = self.write_lock.lock().await;

        let mut attempt = 0;
        loop {
            if self.is_deleted() {
                return Err(BridgeError::DeviceRemoved(self.id.clone()));
            }
            let result = timeout(
                self.settings.command_timeout(),
                self.bridge.write(capability, &value),
            )
            .await
            .unwrap_or(Err(BridgeError::Timeout));

            match result {
                Ok(()) if self.is_deleted() => {
                    debug!(
                        "Device {} removed while setting {}, discarding result",
                        self.id, capability
                    );
                    return Err(BridgeError::DeviceRemoved(self.id.clone()));
                }
                Ok(()) => {
                    self.session.lock().record_value(capability, value);
                    return Ok(());
                }
                Err(e) if e.is_transient() && attempt < self.settings.command_retries => {
                    let backoff = self.settings.retry_backoff(attempt);
                    warn!(
                        "Device {}: setting {} failed ({}), retry {} in {:?}",
                        self.id,
                        capability,
                        e,
                        attempt + 1,
                        backoff
                    );
                    tokio::select! {
                        _ = self.cancel_token.cancelled() => {
                            return Err(BridgeError::DeviceRemoved(self.id.clone()));
                        }
                        _ = sleep(backoff) => {}
                    }
                    attempt += 1;
                }
                Err(e) => {
                    warn!("Device {}: setting {} = {} failed: {}", self.id, capability, value, e);
                    return Err(e);
                }
            }
        }
    }

    /// Ask the device to report every datapoint.
    pub async fn query_datapoints(&self) -> Result<()> {
        self.ensure_ready()?;
        if !self.endpoint.has_cluster(ClusterId::TUYA) {
            return Err(BridgeError::ClusterUnavailable(ClusterId::TUYA));
        }
        let _guard = self.write_lock.lock().await;
        let payload = {
            let mut session = self.session.lock();
            encode_data_query(session.sequence_mut())?
        };
        debug!("Device {}: dataQuery ({})", self.id, hex::encode(&payload));
        self.endpoint.send_tuya(TuyaCommand::DataQuery, payload).await
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.is_deleted() {
            return Err(BridgeError::DeviceRemoved(self.id.clone()));
        }
        if !self.is_ready() {
            return Err(BridgeError::NotReady(self.id.clone()));
        }
        Ok(())
    }
}
