mod common;

use common::{MockEndpoint, MockHost, report, settle};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Notify;
use zigtuya::cluster::{AttributeValue, ClusterId, ZclCommand, attr};
use zigtuya::dispatch::{Direction, DpConverter};
use zigtuya::{
    BridgeError, CapabilityValue, DataType, Device, DeviceBuilder, DeviceClass, DeviceSettings,
    TuyaCommand, ZclEvent, catalog,
};

fn device(
    class: DeviceClass,
    endpoint: &Arc<MockEndpoint>,
    host: &Arc<MockHost>,
    settings: DeviceSettings,
) -> Device {
    DeviceBuilder::new("dev-1", Arc::new(class), endpoint.clone(), host.clone())
        .settings(settings)
        .build()
}

fn tuya_report(payload: Vec<u8>) -> ZclEvent {
    ZclEvent::TuyaFrame {
        command: TuyaCommand::DataReport,
        payload,
    }
}

#[tokio::test]
async fn lock_report_updates_capabilities() {
    let endpoint = Arc::new(MockEndpoint::new(&[ClusterId::TUYA]));
    let host = Arc::new(MockHost::new(&["locked", "measure_battery"]));
    let device = device(catalog::lock(), &endpoint, &host, DeviceSettings::default());
    device.init().await.unwrap();
    assert!(device.is_ready());

    device
        .handle_event(tuya_report(report(0, &[(1, DataType::Bool, &[0x01])])))
        .await
        .unwrap();
    assert_eq!(host.values_for("locked"), vec![CapabilityValue::Bool(true)]);

    // Single-byte value form
    device
        .handle_event(tuya_report(report(1, &[(3, DataType::Value, &[0x64])])))
        .await
        .unwrap();
    assert_eq!(
        host.values_for("measure_battery"),
        vec![CapabilityValue::Number(100.0)]
    );
    assert_eq!(
        device.last_value("measure_battery"),
        Some(CapabilityValue::Number(100.0))
    );
}

#[tokio::test]
async fn multi_record_report_applies_every_datapoint() {
    let endpoint = Arc::new(MockEndpoint::new(&[ClusterId::TUYA]));
    let host = Arc::new(MockHost::new(&["locked", "measure_battery"]));
    let device = device(catalog::lock(), &endpoint, &host, DeviceSettings::default());
    device.init().await.unwrap();

    // Report alias used by newer firmware
    device
        .handle_event(ZclEvent::TuyaFrame {
            command: TuyaCommand::DataReportAlt,
            payload: report(
                4,
                &[
                    (1, DataType::Bool, &[0x00]),
                    (3, DataType::Value, &[0x00, 0x00, 0x00, 0x32]),
                ],
            ),
        })
        .await
        .unwrap();
    assert_eq!(host.values_for("locked"), vec![CapabilityValue::Bool(false)]);
    assert_eq!(
        host.values_for("measure_battery"),
        vec![CapabilityValue::Number(50.0)]
    );
}

#[tokio::test]
async fn unknown_datapoint_is_ignored() {
    let endpoint = Arc::new(MockEndpoint::new(&[ClusterId::TUYA]));
    let host = Arc::new(MockHost::new(&["locked", "measure_battery"]));
    let device = device(catalog::lock(), &endpoint, &host, DeviceSettings::default());
    device.init().await.unwrap();

    device
        .handle_event(tuya_report(report(0, &[(250, DataType::Bool, &[0x01])])))
        .await
        .unwrap();
    assert!(host.is_empty());
    assert_eq!(device.last_value("locked"), None);
}

#[tokio::test]
async fn malformed_frame_is_a_decode_error() {
    let endpoint = Arc::new(MockEndpoint::new(&[ClusterId::TUYA]));
    let host = Arc::new(MockHost::new(&["locked"]));
    let device = device(catalog::lock(), &endpoint, &host, DeviceSettings::default());
    device.init().await.unwrap();

    let err = device
        .handle_event(tuya_report(vec![0x00, 0x01, 0x01]))
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::DecodeError(_)));
    assert!(host.is_empty());
}

#[tokio::test]
async fn writes_prefer_the_tuya_datapoint() {
    let endpoint = Arc::new(MockEndpoint::new(&[ClusterId::TUYA, ClusterId::DOOR_LOCK]));
    let host = Arc::new(MockHost::new(&["locked"]));
    let device = device(catalog::lock(), &endpoint, &host, DeviceSettings::default());
    device.init().await.unwrap();

    device.set_capability("locked", true).await.unwrap();
    device.set_capability("locked", false).await.unwrap();

    assert_eq!(
        endpoint.sent_tuya(),
        vec![
            (TuyaCommand::SetData, vec![0x00, 0x00, 0x01, 0x01, 0x00, 0x01, 0x01]),
            (TuyaCommand::SetData, vec![0x00, 0x01, 0x01, 0x01, 0x00, 0x01, 0x00]),
        ]
    );
    assert!(
        !endpoint
            .sent_commands()
            .iter()
            .any(|c| matches!(c, ZclCommand::LockDoor | ZclCommand::UnlockDoor))
    );
}

#[tokio::test]
async fn failed_datapoint_write_falls_back_to_cluster_command() {
    let endpoint = Arc::new(MockEndpoint::new(&[ClusterId::TUYA, ClusterId::DOOR_LOCK]));
    let host = Arc::new(MockHost::new(&["locked"]));
    let device = device(catalog::lock(), &endpoint, &host, DeviceSettings::default());
    device.init().await.unwrap();

    endpoint.fail_next_tuya(BridgeError::CommandFailed("no ack".into()));
    device.set_capability("locked", true).await.unwrap();
    assert_eq!(endpoint.sent_commands(), vec![ZclCommand::LockDoor]);
}

#[tokio::test]
async fn cluster_only_endpoint_uses_cluster_command() {
    let endpoint = Arc::new(MockEndpoint::new(&[ClusterId::DOOR_LOCK]));
    let host = Arc::new(MockHost::new(&["locked"]));
    let device = device(catalog::lock(), &endpoint, &host, DeviceSettings::default());
    device.init().await.unwrap();

    device.set_capability("locked", false).await.unwrap();
    assert!(endpoint.sent_tuya().is_empty());
    assert_eq!(endpoint.sent_commands(), vec![ZclCommand::UnlockDoor]);
}

#[tokio::test]
async fn unsupported_writes_are_rejected() {
    let endpoint = Arc::new(MockEndpoint::new(&[ClusterId::TUYA]));
    let host = Arc::new(MockHost::new(&["locked", "measure_battery"]));
    let device = device(catalog::lock(), &endpoint, &host, DeviceSettings::default());
    device.init().await.unwrap();

    assert_eq!(
        device.set_capability("measure_battery", 50.0).await,
        Err(BridgeError::UnsupportedCapability("measure_battery".into()))
    );
    assert_eq!(
        device.set_capability("onoff", true).await,
        Err(BridgeError::UnknownCapability("onoff".into()))
    );
    assert!(endpoint.sent_tuya().is_empty());
}

#[tokio::test]
async fn declared_capability_without_cluster_is_unsupported() {
    let endpoint = Arc::new(MockEndpoint::new(&[ClusterId::POWER_CONFIGURATION]));
    let host = Arc::new(MockHost::new(&["locked", "measure_battery"]));
    let device = device(catalog::lock(), &endpoint, &host, DeviceSettings::default());
    device.init().await.unwrap();

    assert!(!device.is_active("locked"));
    assert!(device.is_active("measure_battery"));
    assert_eq!(
        device.set_capability("locked", true).await,
        Err(BridgeError::UnsupportedCapability("locked".into()))
    );
}

#[tokio::test]
async fn init_configures_reporting_for_cluster_bindings() {
    let endpoint = Arc::new(MockEndpoint::new(&[
        ClusterId::TUYA,
        ClusterId::DOOR_LOCK,
        ClusterId::POWER_CONFIGURATION,
    ]));
    let host = Arc::new(MockHost::new(&["locked", "measure_battery"]));
    let device = device(catalog::lock(), &endpoint, &host, DeviceSettings::default());
    device.init().await.unwrap();

    let configured: Vec<(ClusterId, u16)> = endpoint
        .reporting
        .lock()
        .iter()
        .map(|(c, a, _)| (*c, *a))
        .collect();
    assert_eq!(
        configured,
        vec![
            (ClusterId::DOOR_LOCK, attr::LOCK_STATE),
            (ClusterId::POWER_CONFIGURATION, attr::BATTERY_PERCENTAGE_REMAINING),
        ]
    );

    device
        .handle_event(ZclEvent::AttributeReport {
            cluster: ClusterId::POWER_CONFIGURATION,
            attribute: attr::BATTERY_PERCENTAGE_REMAINING,
            value: AttributeValue::Int(150),
        })
        .await
        .unwrap();
    assert_eq!(
        host.values_for("measure_battery"),
        vec![CapabilityValue::Number(75.0)]
    );
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried() {
    let endpoint = Arc::new(MockEndpoint::new(&[ClusterId::ON_OFF]));
    let host = Arc::new(MockHost::new(&["onoff"]));
    let settings = DeviceSettings {
        command_retries: 2,
        ..Default::default()
    };
    let device = device(catalog::smart_plug(), &endpoint, &host, settings);
    device.init().await.unwrap();

    endpoint.fail_next_command(BridgeError::CommandFailed("busy".into()));
    endpoint.fail_next_command(BridgeError::Timeout);
    device.set_capability("onoff", true).await.unwrap();
    assert_eq!(endpoint.sent_commands(), vec![ZclCommand::On]);
    assert_eq!(device.last_value("onoff"), Some(CapabilityValue::Bool(true)));
}

#[tokio::test]
async fn failures_without_retry_budget_reject_the_set() {
    let endpoint = Arc::new(MockEndpoint::new(&[ClusterId::ON_OFF]));
    let host = Arc::new(MockHost::new(&["onoff"]));
    let device = device(catalog::smart_plug(), &endpoint, &host, DeviceSettings::default());
    device.init().await.unwrap();

    endpoint.fail_next_command(BridgeError::CommandFailed("busy".into()));
    assert_eq!(
        device.set_capability("onoff", true).await,
        Err(BridgeError::CommandFailed("busy".into()))
    );
}

#[tokio::test]
async fn offsets_calibrate_numeric_reports() {
    let endpoint = Arc::new(MockEndpoint::new(&[ClusterId::TUYA]));
    let host = Arc::new(MockHost::new(&["measure_temperature"]));
    let mut settings = DeviceSettings::default();
    settings.offsets.insert("measure_temperature".into(), -0.5);
    let device = device(catalog::climate_sensor(), &endpoint, &host, settings);
    device.init().await.unwrap();

    device
        .handle_event(tuya_report(report(
            0,
            &[(1, DataType::Value, &[0x00, 0x00, 0x00, 0xD7])],
        )))
        .await
        .unwrap();
    assert_eq!(
        host.values_for("measure_temperature"),
        vec![CapabilityValue::Number(21.0)]
    );
}

#[tokio::test]
async fn answers_time_sync_and_queries_datapoints() {
    let endpoint = Arc::new(MockEndpoint::new(&[ClusterId::TUYA]));
    let host = Arc::new(MockHost::new(&["onoff"]));
    let device = device(catalog::smart_plug(), &endpoint, &host, DeviceSettings::default());
    device.init().await.unwrap();

    device
        .handle_event(ZclEvent::TuyaFrame {
            command: TuyaCommand::McuSyncTime,
            payload: vec![0x00, 0x05],
        })
        .await
        .unwrap();
    device.query_datapoints().await.unwrap();

    let sent = endpoint.sent_tuya();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].0, TuyaCommand::McuSyncTime);
    assert_eq!(sent[0].1.len(), 10);
    assert_eq!(&sent[0].1[..2], &[0x00, 0x05]);
    assert_eq!(sent[1], (TuyaCommand::DataQuery, vec![0x00, 0x00]));
}

#[tokio::test]
async fn deleted_device_rejects_traffic() {
    let endpoint = Arc::new(MockEndpoint::new(&[ClusterId::TUYA]));
    let host = Arc::new(MockHost::new(&["locked"]));
    let device = device(catalog::lock(), &endpoint, &host, DeviceSettings::default());
    device.init().await.unwrap();
    device.delete();

    assert_eq!(
        device
            .handle_event(tuya_report(report(0, &[(1, DataType::Bool, &[0x01])])))
            .await,
        Err(BridgeError::DeviceRemoved("dev-1".into()))
    );
    assert_eq!(
        device.set_capability("locked", true).await,
        Err(BridgeError::DeviceRemoved("dev-1".into()))
    );
    assert!(host.is_empty());
    assert!(endpoint.sent_tuya().is_empty());
}

#[tokio::test]
async fn traffic_before_init_is_rejected() {
    let endpoint = Arc::new(MockEndpoint::new(&[ClusterId::TUYA]));
    let host = Arc::new(MockHost::new(&["locked"]));
    let device = device(catalog::lock(), &endpoint, &host, DeviceSettings::default());

    let not_ready = Err(BridgeError::NotReady("dev-1".into()));
    assert_eq!(device.set_capability("locked", true).await, not_ready);
    assert_eq!(
        device
            .handle_event(tuya_report(report(0, &[(1, DataType::Bool, &[0x01])])))
            .await,
        not_ready
    );
    assert_eq!(device.query_datapoints().await, not_ready);
    assert!(host.is_empty());
    assert!(endpoint.sent_tuya().is_empty());

    device.init().await.unwrap();
    device.set_capability("locked", true).await.unwrap();
    assert_eq!(endpoint.sent_tuya().len(), 1);
}

#[tokio::test]
async fn command_in_flight_at_delete_is_discarded() {
    let gate = Arc::new(Notify::new());
    let endpoint = Arc::new(MockEndpoint::new(&[ClusterId::ON_OFF]).gated_commands(gate.clone()));
    let host = Arc::new(MockHost::new(&["onoff"]));
    let device = device(catalog::smart_plug(), &endpoint, &host, DeviceSettings::default());
    device.init().await.unwrap();

    let pending = {
        let device = device.clone();
        tokio::spawn(async move { device.set_capability("onoff", true).await })
    };
    settle().await;
    assert!(endpoint.sent_commands().is_empty());

    device.delete();
    gate.notify_one();
    assert_eq!(
        pending.await.unwrap(),
        Err(BridgeError::DeviceRemoved("dev-1".into()))
    );
    assert_eq!(device.last_value("onoff"), None);
}

#[tokio::test]
async fn data_query_waits_for_the_write_in_flight() {
    let gate = Arc::new(Notify::new());
    let endpoint = Arc::new(
        MockEndpoint::new(&[ClusterId::TUYA, ClusterId::DOOR_LOCK]).gated_commands(gate.clone()),
    );
    let host = Arc::new(MockHost::new(&["locked"]));
    let device = device(catalog::lock(), &endpoint, &host, DeviceSettings::default());
    device.init().await.unwrap();

    // setData fails, the LockDoor fallback is held at the gate
    endpoint.fail_next_tuya(BridgeError::CommandFailed("no ack".into()));
    let write = {
        let device = device.clone();
        tokio::spawn(async move { device.set_capability("locked", true).await })
    };
    settle().await;
    let query = {
        let device = device.clone();
        tokio::spawn(async move { device.query_datapoints().await })
    };
    settle().await;
    assert!(endpoint.sent_tuya().is_empty());

    gate.notify_one();
    write.await.unwrap().unwrap();
    query.await.unwrap().unwrap();
    assert_eq!(endpoint.sent_commands(), vec![ZclCommand::LockDoor]);
    // The failed setData consumed sequence 0
    assert_eq!(
        endpoint.sent_tuya(),
        vec![(TuyaCommand::DataQuery, vec![0x00, 0x01])]
    );
}

#[tokio::test]
async fn bitmap_flags_merge_with_the_last_known_value() {
    let class = DeviceClass::builder("siren")
        .datapoint(
            13,
            "alarm_generic",
            DataType::Bitmap,
            Direction::Both,
            DpConverter::Flag { mask: 0b001 },
        )
        .datapoint(
            13,
            "onoff",
            DataType::Bitmap,
            Direction::Both,
            DpConverter::Flag { mask: 0b100 },
        )
        .build();
    let endpoint = Arc::new(MockEndpoint::new(&[ClusterId::TUYA]));
    let host = Arc::new(MockHost::new(&["alarm_generic", "onoff"]));
    let device = device(class, &endpoint, &host, DeviceSettings::default());
    device.init().await.unwrap();

    device
        .handle_event(tuya_report(report(0, &[(13, DataType::Bitmap, &[0b001])])))
        .await
        .unwrap();
    assert_eq!(host.values_for("alarm_generic"), vec![CapabilityValue::Bool(true)]);
    assert_eq!(host.values_for("onoff"), vec![CapabilityValue::Bool(false)]);

    device.set_capability("onoff", true).await.unwrap();
    device.set_capability("alarm_generic", false).await.unwrap();
    assert_eq!(
        endpoint.sent_tuya(),
        vec![
            (TuyaCommand::SetData, vec![0x00, 0x00, 13, 0x05, 0x00, 0x01, 0b101]),
            (TuyaCommand::SetData, vec![0x00, 0x01, 13, 0x05, 0x00, 0x01, 0b100]),
        ]
    );
}

#[tokio::test]
async fn battery_voltage_uses_the_configured_battery() {
    let endpoint = Arc::new(MockEndpoint::new(&[ClusterId::POWER_CONFIGURATION]));
    let host = Arc::new(MockHost::new(&["measure_battery"]));
    let device = DeviceBuilder::new(
        "dev-1",
        Arc::new(catalog::climate_sensor()),
        endpoint.clone(),
        host.clone(),
    )
    .settings_json(&json!({ "battery_type": "2xAAA" }))
    .unwrap()
    .build();
    device.init().await.unwrap();

    // batteryVoltage is never configured for reporting
    assert!(
        endpoint
            .reporting
            .lock()
            .iter()
            .all(|(_, a, _)| *a != attr::BATTERY_VOLTAGE)
    );

    device
        .handle_event(ZclEvent::AttributeReport {
            cluster: ClusterId::POWER_CONFIGURATION,
            attribute: attr::BATTERY_VOLTAGE,
            value: AttributeValue::Int(30),
        })
        .await
        .unwrap();
    assert_eq!(
        host.values_for("measure_battery"),
        vec![CapabilityValue::Number(90.0)]
    );
}
