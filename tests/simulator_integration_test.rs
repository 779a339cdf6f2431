//! End-to-end tests: a real client talking UDP to the virtual device
//!
//! Every test binds its own simulator and client on loopback port 0, with
//! the update cycle slowed down so initial values stay deterministic.

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use std::net::SocketAddr;
use std::time::Duration;
use voltage_bacnet::codec;
use voltage_bacnet::constants::{BVLL_ORIGINAL_UNICAST, SEGMENTATION_NOT_SUPPORTED, SERVICE_I_AM};
use voltage_bacnet::{
    BacnetClient, BacnetError, BacnetValue, ClientConfig, DeviceRef, ObjectIdentifier,
    SimulatorConfig, SubscriptionState, TrendRecord, VirtualDevice,
};

const DEVICE_ID: u32 = 999_999;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

async fn start_simulator() -> VirtualDevice {
    VirtualDevice::start(SimulatorConfig {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        // Slow enough that no cycle runs during a test
        update_interval: Duration::from_secs(120),
        ..SimulatorConfig::default()
    })
    .await
    .expect("simulator failed to start")
}

async fn connect_client(simulator_addr: SocketAddr) -> BacnetClient {
    BacnetClient::connect(ClientConfig {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        // Loopback has no subnet broadcast; aim Who-Is at the device
        broadcast_address: simulator_addr,
        request_timeout: Duration::from_secs(2),
        ..ClientConfig::default()
    })
    .await
    .expect("client failed to connect")
}

fn oid(text: &str) -> ObjectIdentifier {
    ObjectIdentifier::parse(text).unwrap()
}

#[tokio::test]
async fn test_discovery_and_device_id_resolution() {
    init_tracing();
    let simulator = start_simulator().await;
    let client = connect_client(simulator.local_addr()).await;

    let devices = client.who_is(None, Duration::from_millis(500)).await.unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].device_id, DEVICE_ID);
    assert_eq!(devices[0].vendor_id, 0xFFFF);

    // The cache now resolves DeviceRef::DeviceId targets
    let value = client
        .read(DeviceRef::DeviceId(DEVICE_ID), "analogInput:1", "presentValue")
        .await
        .unwrap();
    assert_eq!(value.value, BacnetValue::Real(72.5));

    // A range that excludes the device finds nothing
    let none = client
        .who_is(Some((1, 100)), Duration::from_millis(300))
        .await
        .unwrap();
    assert!(none.is_empty());

    client.close().await;
    simulator.stop().await;
}

#[tokio::test]
async fn test_duplicate_i_am_keeps_most_recent() {
    init_tracing();

    // A bare socket answering Who-Is with two I-Ams for the same instance
    let responder = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let responder_addr = responder.local_addr().unwrap();
    let announcer = tokio::spawn(async move {
        let mut buf = [0u8; 1500];
        let (_, source) = responder.recv_from(&mut buf).await.unwrap();
        for max_apdu in [480u16, 1476] {
            let iam = codec::IAm {
                device_id: ObjectIdentifier::device(1234).unwrap(),
                max_apdu,
                segmentation: SEGMENTATION_NOT_SUPPORTED,
                vendor_id: 0xFFFF,
            };
            let mut body = codec::encode_npdu(false).to_vec();
            body.extend_from_slice(
                &codec::Apdu::UnconfirmedRequest {
                    service: SERVICE_I_AM,
                    payload: iam.encode(),
                }
                .encode(),
            );
            responder
                .send_to(&codec::encode_frame(BVLL_ORIGINAL_UNICAST, &body), source)
                .await
                .unwrap();
        }
    });

    let client = connect_client(responder_addr).await;
    let devices = client.who_is(None, Duration::from_millis(500)).await.unwrap();
    announcer.await.unwrap();

    // One entry per instance, carrying the later announcement
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].device_id, 1234);
    assert_eq!(devices[0].max_apdu, 1476);

    client.close().await;
}

#[tokio::test]
async fn test_discover_fills_vendor_name() {
    init_tracing();
    let simulator = start_simulator().await;
    let client = connect_client(simulator.local_addr()).await;

    let devices = client
        .discover(Some((DEVICE_ID, DEVICE_ID)), Duration::from_millis(500))
        .await
        .unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].vendor_name.as_deref(), Some("Voltage Energy"));

    client.close().await;
    simulator.stop().await;
}

#[tokio::test]
async fn test_read_write_with_priority_arbitration() {
    init_tracing();
    let simulator = start_simulator().await;
    let client = connect_client(simulator.local_addr()).await;
    let target = DeviceRef::Address(simulator.local_addr().try_into().unwrap());
    let damper = oid("analogOutput:1");

    // Relinquish default before anything is commanded
    let value = client.read_property(target, damper, "presentValue").await.unwrap();
    assert_eq!(value.value, BacnetValue::Real(50.0));

    // Operator write at priority 8 takes effect
    client
        .write_property(target, damper, "presentValue", BacnetValue::Real(80.0), Some(8))
        .await
        .unwrap();
    let value = client.read_property(target, damper, "presentValue").await.unwrap();
    assert_eq!(value.value, BacnetValue::Real(80.0));

    // A write at lower precedence does not change the arbitrated value
    client
        .write_property(target, damper, "presentValue", BacnetValue::Real(20.0), Some(16))
        .await
        .unwrap();
    let value = client.read_property(target, damper, "presentValue").await.unwrap();
    assert_eq!(value.value, BacnetValue::Real(80.0));

    // Higher precedence overrides
    client
        .write_property(target, damper, "presentValue", BacnetValue::Real(95.0), Some(1))
        .await
        .unwrap();
    let value = client.read_property(target, damper, "presentValue").await.unwrap();
    assert_eq!(value.value, BacnetValue::Real(95.0));

    // Relinquishing every slot falls back to the default
    for priority in [1, 8, 16] {
        client.relinquish(target, damper, priority).await.unwrap();
    }
    let value = client.read_property(target, damper, "presentValue").await.unwrap();
    assert_eq!(value.value, BacnetValue::Real(50.0));

    client.close().await;
    simulator.stop().await;
}

#[tokio::test]
async fn test_priorityless_command_lands_at_lowest_slot() {
    init_tracing();
    let simulator = start_simulator().await;
    let client = connect_client(simulator.local_addr()).await;
    let target = DeviceRef::Address(simulator.local_addr().try_into().unwrap());
    let damper = oid("analogOutput:1");

    client
        .write_property(target, damper, "presentValue", BacnetValue::Real(80.0), Some(8))
        .await
        .unwrap();

    // A command without a priority cannot displace the priority-8 value
    client
        .write_property(target, damper, "presentValue", BacnetValue::Real(30.0), None)
        .await
        .unwrap();
    let value = client.read_property(target, damper, "presentValue").await.unwrap();
    assert_eq!(value.value, BacnetValue::Real(80.0));

    // It sits in slot 16 rather than replacing the relinquish default
    client.relinquish(target, damper, 8).await.unwrap();
    let value = client.read_property(target, damper, "presentValue").await.unwrap();
    assert_eq!(value.value, BacnetValue::Real(30.0));

    client.relinquish(target, damper, 16).await.unwrap();
    let value = client.read_property(target, damper, "presentValue").await.unwrap();
    assert_eq!(value.value, BacnetValue::Real(50.0));

    client.close().await;
    simulator.stop().await;
}

#[tokio::test]
async fn test_write_errors_from_the_device() {
    init_tracing();
    let simulator = start_simulator().await;
    let client = connect_client(simulator.local_addr()).await;
    let target = DeviceRef::Address(simulator.local_addr().try_into().unwrap());

    // Sensors refuse network writes
    let err = client
        .write(target, "analogInput:1", "presentValue", BacnetValue::Real(0.0), None)
        .await
        .unwrap_err();
    assert!(matches!(err, BacnetError::RejectedWrite(_)), "got {err}");

    // Unregistered object
    let err = client
        .read(target, "analogInput:55", "presentValue")
        .await
        .unwrap_err();
    assert!(matches!(err, BacnetError::UnknownProperty(_)), "got {err}");

    // Wrong value type for an analog point
    let err = client
        .write(target, "analogOutput:1", "presentValue", BacnetValue::Unsigned(3), Some(8))
        .await
        .unwrap_err();
    assert!(matches!(err, BacnetError::TypeMismatch(_)), "got {err}");

    client.close().await;
    simulator.stop().await;
}

#[tokio::test]
async fn test_object_list_and_device_info() {
    init_tracing();
    let simulator = start_simulator().await;
    let client = connect_client(simulator.local_addr()).await;
    let target = DeviceRef::Address(simulator.local_addr().try_into().unwrap());

    let objects = client.read_object_list(target, DEVICE_ID).await.unwrap();
    assert_eq!(objects.len(), 12);
    assert_eq!(objects[0], ObjectIdentifier::device(DEVICE_ID).unwrap());
    assert!(objects.contains(&oid("trendLog:1")));

    let info = client.device_info(target, DEVICE_ID).await.unwrap();
    assert_eq!(info.object_name.as_deref(), Some("Test Device"));
    assert_eq!(info.vendor_name.as_deref(), Some("Voltage Energy"));
    assert_eq!(info.model_name.as_deref(), Some("Virtual HVAC Controller"));
    assert_eq!(info.system_status, Some(0));

    let status = client
        .check_reliability(target, oid("analogInput:1"))
        .await
        .unwrap();
    assert!(!status.fault);
    assert_eq!(status.reliability, 0);

    client.close().await;
    simulator.stop().await;
}

#[tokio::test]
async fn test_multi_state_text_round_trip() {
    init_tracing();
    let simulator = start_simulator().await;
    let client = connect_client(simulator.local_addr()).await;
    let target = DeviceRef::Address(simulator.local_addr().try_into().unwrap());

    let labels = client
        .read(target, "multiStateValue:1", "stateText")
        .await
        .unwrap();
    assert_eq!(
        labels.value,
        BacnetValue::StateText(vec![
            "Off".into(),
            "Heat".into(),
            "Cool".into(),
            "Auto".into()
        ])
    );

    client.close().await;
    simulator.stop().await;
}

#[tokio::test]
async fn test_cov_subscription_receives_change() {
    init_tracing();
    let simulator = start_simulator().await;
    let client = connect_client(simulator.local_addr()).await;
    let target = DeviceRef::Address(simulator.local_addr().try_into().unwrap());
    let damper = oid("analogOutput:1");

    let mut notifications = client.notifications().await.unwrap();
    client
        .subscribe_cov(target, damper, 1, false, 3600)
        .await
        .unwrap();
    assert_eq!(
        client.subscription_state(damper, 1),
        Some(SubscriptionState::Active)
    );
    assert!(client.subscription_remaining(damper, 1).unwrap() <= Duration::from_secs(3600));

    // The device announces the current value on subscribe
    let initial = tokio::time::timeout(Duration::from_secs(1), notifications.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(initial.notification.object_id, damper);

    // A write produces a change notification
    client
        .write_property(target, damper, "presentValue", BacnetValue::Real(66.0), Some(8))
        .await
        .unwrap();
    let event = tokio::time::timeout(Duration::from_secs(1), notifications.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(!event.confirmed);
    let (_, value) = event
        .notification
        .values
        .iter()
        .find(|(property, _)| *property == 85)
        .unwrap();
    assert_eq!(value, &BacnetValue::Real(66.0));

    // Cancellation stops delivery
    client.cancel_subscription(target, damper, 1).await.unwrap();
    assert_eq!(
        client.subscription_state(damper, 1),
        Some(SubscriptionState::Cancelled)
    );
    assert_eq!(simulator.subscriber_count().await, 0);

    client.close().await;
    simulator.stop().await;
}

#[tokio::test]
async fn test_confirmed_cov_notification() {
    init_tracing();
    let simulator = start_simulator().await;
    let client = connect_client(simulator.local_addr()).await;
    let target = DeviceRef::Address(simulator.local_addr().try_into().unwrap());
    let valve = oid("analogOutput:2");

    let mut notifications = client.notifications().await.unwrap();
    client.subscribe_cov(target, valve, 7, true, 0).await.unwrap();

    let initial = tokio::time::timeout(Duration::from_secs(1), notifications.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(initial.confirmed);
    assert_eq!(initial.notification.process_id, 7);
    // Indefinite subscription reports zero time remaining
    assert_eq!(initial.notification.time_remaining, 0);

    client.close().await;
    simulator.stop().await;
}

#[tokio::test]
async fn test_expired_subscription_discards_notifications() {
    init_tracing();
    let simulator = start_simulator().await;
    let client = connect_client(simulator.local_addr()).await;
    let target = DeviceRef::Address(simulator.local_addr().try_into().unwrap());
    let damper = oid("analogOutput:1");

    let mut notifications = client.notifications().await.unwrap();
    client.subscribe_cov(target, damper, 2, false, 1).await.unwrap();

    // Drain the initial announcement while the subscription is live
    let _ = tokio::time::timeout(Duration::from_secs(1), notifications.recv()).await;

    tokio::time::sleep(Duration::from_millis(1300)).await;
    assert_eq!(
        client.subscription_state(damper, 2),
        Some(SubscriptionState::Expired)
    );

    // Changes after expiry never reach the consumer
    client
        .write_property(target, damper, "presentValue", BacnetValue::Real(42.0), Some(8))
        .await
        .unwrap();
    assert!(
        tokio::time::timeout(Duration::from_millis(300), notifications.recv())
            .await
            .is_err()
    );

    // Renewal restores delivery
    client
        .renew_subscription(target, damper, 2, 3600)
        .await
        .unwrap();
    assert_eq!(
        client.subscription_state(damper, 2),
        Some(SubscriptionState::Active)
    );

    client.close().await;
    simulator.stop().await;
}

#[tokio::test]
async fn test_trend_log_read_returns_oldest_first() {
    init_tracing();
    let simulator = start_simulator().await;
    let client = connect_client(simulator.local_addr()).await;
    let target = DeviceRef::Address(simulator.local_addr().try_into().unwrap());
    let log = oid("trendLog:1");

    // Fill the device's buffer with 200 minute-spaced samples
    let t0 = Utc.with_ymd_and_hms(2026, 8, 24, 0, 0, 0).unwrap();
    {
        let db = simulator.database();
        let mut db = db.write().await;
        for i in 0..200u32 {
            db.append_log(
                &log,
                TrendRecord::new(
                    t0 + ChronoDuration::minutes(i64::from(i)),
                    BacnetValue::Real(70.0 + (i % 10) as f32 / 10.0),
                ),
            )
            .unwrap();
        }
    }

    // A bounded read returns exactly the oldest 50
    let records = client.read_trend_log(target, log, 50, None).await.unwrap();
    assert_eq!(records.len(), 50);
    assert_eq!(records[0].timestamp, Some(t0));
    assert_eq!(
        records[49].timestamp,
        Some(t0 + ChronoDuration::minutes(49))
    );

    // A start time drops older records before counting
    let start = t0 + ChronoDuration::minutes(150);
    let recent = client
        .read_trend_log(target, log, 100, Some(start))
        .await
        .unwrap();
    assert_eq!(recent.len(), 50);
    assert_eq!(recent[0].timestamp, Some(start));

    client.close().await;
    simulator.stop().await;
}

#[tokio::test]
async fn test_request_timeout_against_dead_endpoint() {
    init_tracing();
    let client = BacnetClient::connect(ClientConfig {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        request_timeout: Duration::from_millis(200),
        ..ClientConfig::default()
    })
    .await
    .unwrap();

    // Nothing listens here
    let target = DeviceRef::Address("127.0.0.1:47999".parse::<SocketAddr>().unwrap().try_into().unwrap());
    let err = client
        .read(target, "analogInput:1", "presentValue")
        .await
        .unwrap_err();
    assert!(matches!(err, BacnetError::Timeout(_)));
    assert!(err.is_retryable());

    client.close().await;
}
