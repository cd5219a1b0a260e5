//! IAS zone alarm handling with bind fallback.
//!
//! Alarm capabilities normally follow IAS zone status reports after a
//! successful bind. Firmware that rejects the bind (typically `INVALID_EP`)
//! is polled instead, and where the class names Tuya datapoints mirroring the
//! zone alarm those are applied immediately on receipt.

use crate::class::AlarmConfig;
use crate::cluster::{AttributeValue, ClusterId, ZclCommand, ZoneStatus, attr};
use crate::config::DeviceSettings;
use crate::error::{BridgeError, Result};
use crate::host::ZclEndpoint;
use crate::publish::Publisher;
use crate::session::DeviceSession;
use crate::value::{CapabilityValue, DpValue};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep, timeout};
use tokio_util::sync::CancellationToken;

/// Alarm capabilities in priority order; the first one the device exposes
/// receives the zone alarm.
pub const ALARM_CAPABILITIES: &[&str] = &[
    "alarm_motion",
    "alarm_contact",
    "alarm_water",
    "alarm_smoke",
];

const TAMPER_CAPABILITY: &str = "alarm_tamper";
const BATTERY_CAPABILITY: &str = "alarm_battery";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmState {
    Unbound,
    Bound,
    FallbackPolling,
    FallbackMirrored,
}

impl AlarmState {
    pub fn is_fallback(self) -> bool {
        matches!(self, AlarmState::FallbackPolling | AlarmState::FallbackMirrored)
    }
}

/// Snapshot of an active poller.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackPoller {
    pub target_cluster: ClusterId,
    pub poll_interval: Duration,
    pub last_status: Option<u16>,
}

struct ZoneAlarmState {
    mode: AlarmState,
    poller: Option<FallbackPoller>,
    // Status last applied to the host; `None` once a mirrored datapoint or
    // an auto-reset overrode it.
    last_reported: Option<ZoneStatus>,
    reset_token: Option<CancellationToken>,
}

struct ZoneAlarmInner {
    device_id: String,
    endpoint: Arc<dyn ZclEndpoint>,
    publisher: Publisher,
    session: Arc<Mutex<DeviceSession>>,
    config: AlarmConfig,
    settings: Arc<DeviceSettings>,
    state: Mutex<ZoneAlarmState>,
    // Shared with the device so polled results queue behind device events
    event_lock: Arc<tokio::sync::Mutex<()>>,
    cancel_token: CancellationToken,
}

/// Alarm state machine of one device.
#[derive(Clone)]
pub struct ZoneAlarm {
    inner: Arc<ZoneAlarmInner>,
}

impl ZoneAlarm {
    /// Create the handler in the `Unbound` state. `config.capability` is
    /// used when the device exposes none of [`ALARM_CAPABILITIES`].
    pub fn new(
        endpoint: Arc<dyn ZclEndpoint>,
        publisher: Publisher,
        session: Arc<Mutex<DeviceSession>>,
        config: AlarmConfig,
        settings: Arc<DeviceSettings>,
        event_lock: Arc<tokio::sync::Mutex<()>>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(ZoneAlarmInner {
                device_id: publisher.device_id().to_string(),
                endpoint,
                publisher,
                session,
                config,
                settings,
                state: Mutex::new(ZoneAlarmState {
                    mode: AlarmState::Unbound,
                    poller: None,
                    last_reported: None,
                    reset_token: None,
                }),
                event_lock,
                cancel_token,
            }),
        }
    }

    pub fn state(&self) -> AlarmState {
        self.inner.state.lock().mode
    }

    pub fn poller(&self) -> Option<FallbackPoller> {
        self.inner.state.lock().poller.clone()
    }

    /// Enroll and bind the zone cluster, falling back to polling (and
    /// mirroring) when the bind is rejected. Also answers enrollment
    /// proactively, since the device's enroll request often arrives before
    /// listeners exist.
    pub async fn start(&self) -> AlarmState {
        let cluster = self.inner.config.cluster;
        self.write_cie_address().await;

        let mode = match self.inner.endpoint.bind(cluster).await {
            Ok(()) => {
                info!("Device {}: {} bound", self.inner.device_id, cluster);
                self.inner.session.lock().set_fallback_mode(cluster, false);
                AlarmState::Bound
            }
            Err(e) => {
                if e.is_bind_failure() {
                    warn!(
                        "Device {}: {}, falling back to polling",
                        self.inner.device_id, e
                    );
                } else {
                    warn!(
                        "Device {}: bind of {} failed unexpectedly ({}), falling back to polling",
                        self.inner.device_id, cluster, e
                    );
                }
                self.inner.session.lock().set_fallback_mode(cluster, true);
                let mirrored = !self.inner.config.mirror_datapoints.is_empty()
                    && self.inner.endpoint.has_cluster(ClusterId::TUYA);
                if mirrored {
                    AlarmState::FallbackMirrored
                } else {
                    AlarmState::FallbackPolling
                }
            }
        };

        {
            let mut state = self.inner.state.lock();
            state.mode = mode;
            if mode.is_fallback() {
                state.poller = Some(FallbackPoller {
                    target_cluster: cluster,
                    poll_interval: self.inner.settings.poll_interval(),
                    last_status: None,
                });
            }
        }
        if mode.is_fallback() {
            self.spawn_poller();
        }

        if let Err(e) = self.send_enroll_response().await {
            debug!(
                "Device {}: proactive enroll response failed: {}",
                self.inner.device_id, e
            );
        }
        mode
    }

    /// Stop the poller and any pending auto-reset.
    pub fn stop(&self) {
        self.inner.cancel_token.cancel();
        let mut state = self.inner.state.lock();
        state.poller = None;
        if let Some(token) = state.reset_token.take() {
            token.cancel();
        }
    }

    /// Write the controller's IEEE address to `iasCieAddr`. Failures are
    /// logged; enrollment continues with the enroll response.
    async fn write_cie_address(&self) {
        let Some(ieee) = self.inner.endpoint.controller_ieee() else {
            debug!(
                "Device {}: controller address unknown, skipping CIE write",
                self.inner.device_id
            );
            return;
        };
        let write = timeout(
            self.inner.settings.command_timeout(),
            self.inner.endpoint.write_attribute(
                self.inner.config.cluster,
                attr::IAS_CIE_ADDRESS,
                AttributeValue::Ieee(ieee),
            ),
        )
        .await
        .map_err(|_| BridgeError::Timeout)
        .and_then(|r| r);
        match write {
            Ok(()) => info!(
                "Device {}: CIE address {:016X} written",
                self.inner.device_id, ieee
            ),
            Err(e) => warn!(
                "Device {}: writing CIE address failed ({}), continuing",
                self.inner.device_id, e
            ),
        }
    }

    pub async fn send_enroll_response(&self) -> Result<()> {
        self.inner
            .endpoint
            .send_command(ZclCommand::ZoneEnrollResponse {
                enroll_response_code: 0,
                zone_id: self.inner.settings.zone_id,
            })
            .await
    }

    /// Apply a zone status from a report, notification or poll.
    pub async fn handle_zone_status(&self, zone_status: u16) -> Result<()> {
        let status = ZoneStatus(zone_status);
        let previous = {
            let mut state = self.inner.state.lock();
            if let Some(poller) = state.poller.as_mut() {
                poller.last_status = Some(zone_status);
            }
            state.last_reported.replace(status)
        };
        debug!(
            "Device {}: zone status 0x{:04X} (alarm={})",
            self.inner.device_id,
            zone_status,
            status.alarm()
        );

        self.apply_alarm(status.alarm()).await?;

        let host = self.inner.publisher.host().clone();
        let changed = |bit: fn(ZoneStatus) -> bool| previous.is_none_or(|p| bit(p) != bit(status));
        if host.has_capability(TAMPER_CAPABILITY) && changed(ZoneStatus::tamper) {
            self.inner
                .publisher
                .publish(TAMPER_CAPABILITY, status.tamper().into())
                .await?;
        }
        if host.has_capability(BATTERY_CAPABILITY) && changed(ZoneStatus::battery_low) {
            self.inner
                .publisher
                .publish(BATTERY_CAPABILITY, status.battery_low().into())
                .await?;
        }
        Ok(())
    }

    /// Apply a Tuya datapoint if it mirrors the zone alarm. Returns whether
    /// the datapoint was consumed.
    pub async fn handle_datapoint(&self, dp: u8, raw: &DpValue) -> Result<bool> {
        if self.state() != AlarmState::FallbackMirrored
            || !self.inner.config.mirror_datapoints.contains(&dp)
        {
            return Ok(false);
        }
        let Some(v) = raw.as_i64() else {
            return Ok(false);
        };
        debug!(
            "Device {}: DP {} mirrors zone alarm ({})",
            self.inner.device_id, dp, raw
        );
        self.inner.state.lock().last_reported = None;
        self.apply_alarm(v != 0).await?;
        Ok(true)
    }

    fn alarm_capability(&self) -> Option<String> {
        let host = self.inner.publisher.host();
        ALARM_CAPABILITIES
            .iter()
            .find(|c| host.has_capability(c))
            .map(|c| c.to_string())
            .or_else(|| self.inner.config.capability.clone())
    }

    async fn apply_alarm(&self, triggered: bool) -> Result<()> {
        let Some(capability) = self.alarm_capability() else {
            warn!(
                "Device {}: zone alarm without an alarm capability",
                self.inner.device_id
            );
            return Ok(());
        };
        self.inner
            .publisher
            .publish(&capability, CapabilityValue::Bool(triggered))
            .await?;
        if triggered {
            self.schedule_reset(capability);
        } else if let Some(token) = self.inner.state.lock().reset_token.take() {
            token.cancel();
        }
        Ok(())
    }

    fn schedule_reset(&self, capability: String) {
        let Some(delay) = self.inner.settings.alarm_auto_reset() else {
            return;
        };
        let token = self.inner.cancel_token.child_token();
        if let Some(old) = self.inner.state.lock().reset_token.replace(token.clone()) {
            old.cancel();
        }
        let alarm = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = sleep(delay) => {
                    let _guard = alarm.inner.event_lock.lock().await;
                    if token.is_cancelled() {
                        return;
                    }
                    debug!("Device {}: auto-reset of {}", alarm.inner.device_id, capability);
                    alarm.inner.state.lock().last_reported = None;
                    if let Err(e) = alarm.inner.publisher.publish(&capability, false.into()).await {
                        debug!("Device {}: auto-reset dropped: {}", alarm.inner.device_id, e);
                    }
                }
            }
        });
    }

    fn spawn_poller(&self) {
        let alarm = self.clone();
        let token = self.inner.cancel_token.clone();
        let period = self.inner.settings.poll_interval();
        let rebind_every = self.inner.settings.rebind_every_polls;

        debug!(
            "Device {}: polling zone status every {}s",
            self.inner.device_id,
            period.as_secs()
        );
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut ticks: u32 = 0;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        ticks = ticks.wrapping_add(1);
                        if rebind_every > 0 && ticks % rebind_every == 0 && alarm.try_rebind().await {
                            break;
                        }
                        alarm.poll_once().await;
                    }
                }
            }
            debug!("Device {}: zone poller stopped", alarm.inner.device_id);
        });
    }

    async fn poll_once(&self) {
        let cluster = self.inner.config.cluster;
        let read = timeout(
            self.inner.settings.command_timeout(),
            self.inner
                .endpoint
                .read_attribute(cluster, attr::ZONE_STATUS),
        )
        .await
        .map_err(|_| BridgeError::Timeout)
        .and_then(|r| r);

        if self.inner.cancel_token.is_cancelled() {
            return;
        }

        let status = match read.map(|v| v.as_i64()) {
            Ok(Some(v)) => v as u16,
            Ok(None) => {
                warn!(
                    "Device {}: zone status read returned a non-numeric value",
                    self.inner.device_id
                );
                return;
            }
            Err(e) => {
                debug!("Device {}: zone status poll failed: {}", self.inner.device_id, e);
                return;
            }
        };

        // Queue behind events in flight; a report may have landed meanwhile
        let _guard = self.inner.event_lock.lock().await;
        if self.inner.cancel_token.is_cancelled() {
            return;
        }
        let changed = {
            let mut state = self.inner.state.lock();
            let Some(poller) = state.poller.as_mut() else {
                return;
            };
            poller.last_status = Some(status);
            state.last_reported != Some(ZoneStatus(status))
        };
        if !changed {
            return;
        }
        if let Err(e) = self.handle_zone_status(status).await {
            warn!(
                "Device {}: failed to apply polled zone status: {}",
                self.inner.device_id, e
            );
        }
    }

    async fn try_rebind(&self) -> bool {
        let cluster = self.inner.config.cluster;
        match self.inner.endpoint.bind(cluster).await {
            Ok(()) => {
                info!(
                    "Device {}: late bind of {} succeeded, polling stopped",
                    self.inner.device_id, cluster
                );
                self.inner.session.lock().set_fallback_mode(cluster, false);
                let mut state = self.inner.state.lock();
                state.mode = AlarmState::Bound;
                state.poller = None;
                true
            }
            Err(e) => {
                debug!("Device {}: rebind still failing: {}", self.inner.device_id, e);
                false
            }
        }
    }
}
