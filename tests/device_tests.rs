use ide_build::core::{Device, DeviceKind};
use ide_build::device::{wait_for_device, DeviceEvent};
use ide_build::{DeviceManager, FoundryError};
use std::time::Duration;

fn board() -> Device {
    Device::new("board", "Dev Board", "aarch64-linux", DeviceKind::Remote)
}

#[test]
fn test_local_device_is_seeded() {
    let devices = DeviceManager::new();
    let local = devices.get_device_by_id("local").unwrap();
    assert_eq!(local.kind, DeviceKind::Local);
    assert_eq!(devices.list_devices().len(), 1);
    assert!(DeviceManager::empty().list_devices().is_empty());
}

#[tokio::test]
async fn test_present_device_needs_no_subscription() {
    let devices = DeviceManager::new();

    let device = wait_for_device(&devices, "local", Duration::from_millis(10))
        .await
        .unwrap();

    assert_eq!(device.id, "local");
    assert_eq!(devices.subscriptions_opened(), 0);
}

#[tokio::test]
async fn test_missing_device_times_out() {
    let devices = DeviceManager::new();

    let err = wait_for_device(&devices, "board", Duration::from_millis(50))
        .await
        .unwrap_err();

    assert!(matches!(err, FoundryError::DeviceTimeout));
    assert_eq!(err.to_string(), "Timed out while waiting for devices to settle.");
    assert_eq!(devices.subscriptions_opened(), 1);
}

#[tokio::test]
async fn test_device_added_later_is_returned() {
    let devices = DeviceManager::new();
    let producer = devices.clone();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        producer.add_device(Device::new("other", "Other", "x86_64-linux", DeviceKind::Remote));
        producer.add_device(board());
    });

    let device = wait_for_device(&devices, "board", Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(device, board());
}

#[tokio::test]
async fn test_remove_emits_event() {
    let devices = DeviceManager::new();
    devices.add_device(board());
    let mut events = devices.subscribe();

    let removed = devices.remove_device("board").unwrap();

    assert_eq!(removed.id, "board");
    assert_eq!(events.recv().await.unwrap(), DeviceEvent::Removed(board()));
    assert!(devices.remove_device("board").is_none());
}
