//! Device-to-host capability publishing.

use crate::config::DeviceSettings;
use crate::error::{BridgeError, Result};
use crate::host::CapabilityHost;
use crate::session::DeviceSession;
use crate::value::CapabilityValue;
use log::{debug, error};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// A capability value applied to the host.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityEvent {
    pub device_id: String,
    pub capability: String,
    pub value: CapabilityValue,
}

/// Applies capability values for one device: calibration offsets, session
/// bookkeeping, the host store and the device event stream.
#[derive(Clone)]
pub struct Publisher {
    device_id: String,
    host: Arc<dyn CapabilityHost>,
    session: Arc<Mutex<DeviceSession>>,
    settings: Arc<DeviceSettings>,
    events: broadcast::Sender<CapabilityEvent>,
    cancel_token: CancellationToken,
}

impl Publisher {
    pub fn new(
        device_id: impl Into<String>,
        host: Arc<dyn CapabilityHost>,
        session: Arc<Mutex<DeviceSession>>,
        settings: Arc<DeviceSettings>,
        events: broadcast::Sender<CapabilityEvent>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            host,
            session,
            settings,
            events,
            cancel_token,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn host(&self) -> &Arc<dyn CapabilityHost> {
        &self.host
    }

    /// Publish a value reported by the device. Values arriving after the
    /// device was removed are discarded.
    pub async fn publish(&self, capability: &str, value: CapabilityValue) -> Result<()> {
        if self.cancel_token.is_cancelled() {
            debug!(
                "Device {} removed, dropping {} = {}",
                self.device_id, capability, value
            );
            return Err(BridgeError::DeviceRemoved(self.device_id.clone()));
        }

        let value = match value {
            CapabilityValue::Number(n) => {
                CapabilityValue::Number(n + self.settings.offset_for(capability))
            }
            other => other,
        };

        self.session.lock().record_value(capability, value.clone());

        if let Err(e) = self
            .host
            .set_capability_value(capability, value.clone())
            .await
        {
            error!(
                "Device {}: failed to set {} = {}: {}",
                self.device_id, capability, value, e
            );
            return Err(e);
        }
        debug!("Device {}: {} = {}", self.device_id, capability, value);

        let _ = self.events.send(CapabilityEvent {
            device_id: self.device_id.clone(),
            capability: capability.to_string(),
            value,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[derive(Default)]
    struct RecordingHost {
        values: Mutex<Vec<(String, CapabilityValue)>>,
    }

    #[async_trait]
    impl CapabilityHost for RecordingHost {
        fn has_capability(&self, _capability: &str) -> bool {
            true
        }

        async fn set_capability_value(&self, capability: &str, value: CapabilityValue) -> Result<()> {
            self.values.lock().push((capability.to_string(), value));
            Ok(())
        }
    }

    fn publisher(host: Arc<RecordingHost>, settings: DeviceSettings) -> (Publisher, CancellationToken) {
        let (tx, _) = broadcast::channel(4);
        let token = CancellationToken::new();
        let publisher = Publisher::new(
            "dev",
            host,
            Arc::new(Mutex::new(DeviceSession::new())),
            Arc::new(settings),
            tx,
            token.clone(),
        );
        (publisher, token)
    }

    #[tokio::test]
    async fn applies_offset_to_numbers_only() {
        let host = Arc::new(RecordingHost::default());
        let mut settings = DeviceSettings::default();
        settings.offsets.insert("measure_humidity".into(), 2.0);
        let (publisher, _) = publisher(host.clone(), settings);

        publisher.publish("measure_humidity", 40.0.into()).await.unwrap();
        publisher.publish("onoff", true.into()).await.unwrap();
        assert_eq!(
            *host.values.lock(),
            vec![
                ("measure_humidity".to_string(), CapabilityValue::Number(42.0)),
                ("onoff".to_string(), CapabilityValue::Bool(true)),
            ]
        );
    }

    #[tokio::test]
    async fn drops_values_after_removal() {
        let host = Arc::new(RecordingHost::default());
        let (publisher, token) = publisher(host.clone(), DeviceSettings::default());
        let mut events = publisher.events.subscribe();

        token.cancel();
        assert_eq!(
            publisher.publish("onoff", true.into()).await,
            Err(BridgeError::DeviceRemoved("dev".into()))
        );
        assert!(host.values.lock().is_empty());
        assert!(events.try_recv().is_err());
    }
}
