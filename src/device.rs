use crate::core::Device;
use crate::error::{FoundryError, Result};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

const EVENT_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Added(Device),
    Removed(Device),
}

/// Shared, cloneable collection of known devices.
#[derive(Clone)]
pub struct DeviceManager {
    devices: Arc<RwLock<Vec<Device>>>,
    events: broadcast::Sender<DeviceEvent>,
    subscriptions: Arc<AtomicUsize>,
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceManager {
    /// Creates a manager that already knows the local device.
    pub fn new() -> Self {
        let manager = Self::empty();
        manager.add_device(Device::local());
        manager
    }

    pub fn empty() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            devices: Arc::new(RwLock::new(Vec::new())),
            events,
            subscriptions: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn list_devices(&self) -> Vec<Device> {
        self.devices.read().clone()
    }

    pub fn get_device_by_id(&self, id: &str) -> Option<Device> {
        self.devices.read().iter().find(|d| d.id == id).cloned()
    }

    pub fn add_device(&self, device: Device) {
        debug!(device = %device.id, "discovered device");
        self.devices.write().push(device.clone());
        // No receivers is fine: nobody is waiting.
        let _ = self.events.send(DeviceEvent::Added(device));
    }

    pub fn remove_device(&self, id: &str) -> Option<Device> {
        let removed = {
            let mut devices = self.devices.write();
            let position = devices.iter().position(|d| d.id == id)?;
            devices.remove(position)
        };
        let _ = self.events.send(DeviceEvent::Removed(removed.clone()));
        Some(removed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.subscriptions.fetch_add(1, Ordering::Relaxed);
        self.events.subscribe()
    }

    /// Number of event subscriptions ever opened on this manager.
    pub fn subscriptions_opened(&self) -> usize {
        self.subscriptions.load(Ordering::Relaxed)
    }
}

/// Returns the device `device_id`, waiting up to `timeout` for it to be added.
///
/// A device that is already known is returned without subscribing to events.
pub async fn wait_for_device(
    devices: &DeviceManager,
    device_id: &str,
    timeout: Duration,
) -> Result<Device> {
    if let Some(device) = devices.get_device_by_id(device_id) {
        return Ok(device);
    }

    let mut events = devices.subscribe();

    // The device may have been added between the lookup and the subscription.
    if let Some(device) = devices.get_device_by_id(device_id) {
        return Ok(device);
    }

    debug!(device = device_id, ?timeout, "waiting for device to settle");

    let settle = async {
        loop {
            match events.recv().await {
                Ok(DeviceEvent::Added(device)) if device.id == device_id => return Ok(device),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "missed device events while waiting");
                    if let Some(device) = devices.get_device_by_id(device_id) {
                        return Ok(device);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return Err(FoundryError::DeviceTimeout),
            }
        }
    };

    match tokio::time::timeout(timeout, settle).await {
        Ok(result) => result,
        Err(_) => Err(FoundryError::DeviceTimeout),
    }
}
