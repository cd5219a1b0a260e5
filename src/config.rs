//! Device settings as stored by the host runtime.
//!
//! The host keeps settings as an opaque JSON object per device; every field
//! has a default so partial or empty objects are accepted.

use crate::battery::BatteryType;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 10;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;
const DEFAULT_ZONE_ID: u8 = 10;

// Upper bounds for host-supplied durations
const MAX_POLL_INTERVAL_SECS: u64 = 24 * 3600;
const MAX_AUTO_RESET_SECS: u64 = 24 * 3600;
const MAX_COMMAND_TIMEOUT_SECS: u64 = 300;
const MAX_RETRY_BACKOFF_MS: u64 = 60_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Zone status poll period when the IAS zone bind fails.
    pub poll_interval_secs: u64,
    /// Clear a triggered alarm after this many seconds (0 disables).
    pub alarm_auto_reset_secs: u64,
    /// Retry the failed bind every N poll ticks (0 disables).
    pub rebind_every_polls: u32,
    /// Extra attempts for commands failing with a transient error.
    pub command_retries: u32,
    pub retry_backoff_ms: u64,
    pub command_timeout_secs: u64,
    /// Zone id sent in IAS enroll responses.
    pub zone_id: u8,
    /// Local time offset used to answer time sync requests.
    pub utc_offset_secs: i64,
    /// Offset calibration added to numeric capability reports,
    /// e.g. `{"measure_temperature": -0.5}`.
    pub offsets: HashMap<String, f64>,
    /// Battery fitted in the device, for `batteryVoltage` reports.
    pub battery_type: BatteryType,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            alarm_auto_reset_secs: 0,
            rebind_every_polls: 0,
            command_retries: 0,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            zone_id: DEFAULT_ZONE_ID,
            utc_offset_secs: 0,
            offsets: HashMap::new(),
            battery_type: BatteryType::default(),
        }
    }
}

impl DeviceSettings {
    /// Parse the host's settings object. `null` yields the defaults.
    pub fn from_json(value: &Value) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_value(value.clone())?)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.clamp(1, MAX_POLL_INTERVAL_SECS))
    }

    pub fn alarm_auto_reset(&self) -> Option<Duration> {
        (self.alarm_auto_reset_secs > 0)
            .then(|| Duration::from_secs(self.alarm_auto_reset_secs.min(MAX_AUTO_RESET_SECS)))
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.clamp(1, MAX_COMMAND_TIMEOUT_SECS))
    }

    /// Backoff before retry `attempt` (0-based), doubling up to 8x and
    /// capped at one minute.
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        let backoff = self
            .retry_backoff_ms
            .saturating_mul(2u64.pow(attempt.min(3)))
            .min(MAX_RETRY_BACKOFF_MS);
        Duration::from_millis(backoff)
    }

    pub fn offset_for(&self, capability: &str) -> f64 {
        self.offsets.get(capability).copied().unwrap_or(0.0)
    }
}
