//! Management of the devices paired with one device class.
//! Provides a merged capability event stream and device removal.

use crate::class::DeviceClass;
use crate::config::DeviceSettings;
use crate::device::{Device, DeviceBuilder};
use crate::error::{BridgeError, Result};
use crate::host::{CapabilityHost, ZclEndpoint, ZclEvent};
use crate::publish::CapabilityEvent;
use crate::value::CapabilityValue;
use futures_util::{Stream, StreamExt};
use log::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use tokio_util::sync::CancellationToken;

/// Driver for one device class.
///
/// Cloning is cheap; all clones share the same device table.
#[derive(Clone)]
pub struct Driver {
    inner: Arc<DriverInner>,
}

struct DriverInner {
    class: Arc<DeviceClass>,
    devices: RwLock<HashMap<String, Device>>,
    device_tokens: RwLock<HashMap<String, CancellationToken>>,
    event_tx: broadcast::Sender<CapabilityEvent>,
    cancel_token: CancellationToken,
}

impl Driver {
    pub fn new(class: DeviceClass) -> Self {
        Self::with_class(Arc::new(class))
    }

    pub fn with_class(class: Arc<DeviceClass>) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(DriverInner {
                class,
                devices: RwLock::new(HashMap::new()),
                device_tokens: RwLock::new(HashMap::new()),
                event_tx,
                cancel_token: CancellationToken::new(),
            }),
        }
    }

    pub fn class(&self) -> &Arc<DeviceClass> {
        &self.inner.class
    }

    /// Returns a Stream of capability events from all devices of the driver.
    pub fn stream(&self) -> impl Stream<Item = CapabilityEvent> + use<> {
        let mut rx = self.inner.event_tx.subscribe();
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

    /// Pair a device with the driver and run its initialization.
    ///
    /// Returns an error if a device with the same ID already exists.
    pub async fn add(
        &self,
        id: &str,
        endpoint: Arc<dyn ZclEndpoint>,
        host: Arc<dyn CapabilityHost>,
        settings: DeviceSettings,
    ) -> Result<Device> {
        let device = {
            let mut devices = self.inner.devices.write().await;
            let mut device_tokens = self.inner.device_tokens.write().await;

            if devices.contains_key(id) {
                return Err(BridgeError::DuplicateDevice(id.to_string()));
            }

            let device = DeviceBuilder::new(id, self.inner.class.clone(), endpoint, host)
                .settings(settings)
                .build();

            let device_token = self.inner.cancel_token.child_token();
            self.spawn_device_monitor(device.clone(), device_token.clone());

            devices.insert(id.to_string(), device.clone());
            device_tokens.insert(id.to_string(), device_token);
            device
        };

        info!("Device {} added to {} driver", id, self.inner.class.name);
        device.init().await?;
        Ok(device)
    }

    fn spawn_device_monitor(&self, device: Device, token: CancellationToken) {
        let event_tx = self.inner.event_tx.clone();
        let stream = device.stream();

        tokio::spawn(async move {
            tokio::pin!(stream);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    event = stream.next() => match event {
                        Some(event) => {
                            let _ = event_tx.send(event);
                        }
                        None => {
                            info!("Stream for device {} ended", device.id());
                            break;
                        }
                    }
                }
            }
        });
    }

    /// Route one incoming event to its device.
    pub async fn handle_event(&self, id: &str, event: ZclEvent) -> Result<()> {
        let device = self
            .get(id)
            .await
            .ok_or_else(|| BridgeError::DeviceNotFound(id.to_string()))?;
        device.handle_event(event).await
    }

    pub async fn set_capability(
        &self,
        id: &str,
        capability: &str,
        value: impl Into<CapabilityValue>,
    ) -> Result<()> {
        let device = self
            .get(id)
            .await
            .ok_or_else(|| BridgeError::DeviceNotFound(id.to_string()))?;
        device.set_capability(capability, value).await
    }

    /// Remove a device: stops event forwarding, cancels its poller and
    /// discards any command still in flight.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let mut devices = self.inner.devices.write().await;
        let mut device_tokens = self.inner.device_tokens.write().await;

        match devices.remove(id) {
            Some(device) => {
                if let Some(token) = device_tokens.remove(id) {
                    token.cancel();
                }
                device.delete();
                info!("Device {} removed from {} driver", id, self.inner.class.name);
                Ok(())
            }
            None => {
                warn!("Attempted to remove non-existent device {}", id);
                Err(BridgeError::DeviceNotFound(id.to_string()))
            }
        }
    }

    /// Map of device ID -> ready flag.
    pub async fn list(&self) -> HashMap<String, bool> {
        let devices = self.inner.devices.read().await;
        devices
            .iter()
            .map(|(id, device)| (id.clone(), device.is_ready()))
            .collect()
    }

    pub async fn get(&self, id: &str) -> Option<Device> {
        self.inner.devices.read().await.get(id).cloned()
    }

    /// Delete every device and stop all forwarding.
    pub async fn shutdown(self) {
        self.inner.cancel_token.cancel();

        let mut devices = self.inner.devices.write().await;
        let mut tokens = self.inner.device_tokens.write().await;
        for (id, device) in devices.drain() {
            if let Some(token) = tokens.remove(&id) {
                token.cancel();
            }
            device.delete();
        }
        tokens.clear();
        info!("{} driver shut down", self.inner.class.name);
    }
}

impl Drop for DriverInner {
    fn drop(&mut self) {
        self.cancel_token.cancel();
        if let Ok(devices) = self.devices.try_read() {
            for device in devices.values() {
                device.delete();
            }
        }
    }
}
