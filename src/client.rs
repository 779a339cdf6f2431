//! BACnet/IP client
//!
//! High-level operations over one [`UdpTransport`]: Who-Is discovery with a
//! device cache, ReadProperty/WriteProperty with local validation before any
//! network I/O, trend log reads, a reliability probe, and the COV
//! subscription surface backed by the [`SubscriptionManager`].

use crate::address::BacnetAddress;
use crate::codec::{
    self, CovNotification, IAm, ReadPropertyAck, ReadPropertyRequest, SubscribeCovRequest, WhoIs,
    WritePropertyRequest,
};
use crate::constants::*;
use crate::error::{BacnetError, BacnetResult};
use crate::object::{ObjectIdentifier, ObjectType};
use crate::subscription::{SubscriptionKey, SubscriptionManager, SubscriptionState};
use crate::transport::{ServiceAck, UdpTransport, UnconfirmedEvent};
use crate::trend::{self, TrendRecord};
use crate::value::{BacnetValue, PriorityArray, PropertyValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Default confirmed-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Registration through a broadcast management device (BBMD), for clients on
/// a subnet without local BACnet broadcast peers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignDeviceConfig {
    pub address: BacnetAddress,
    /// Registration time-to-live in seconds
    pub ttl: u16,
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Local bind address; port 0 lets the OS pick
    pub bind_address: SocketAddr,
    /// Where Who-Is broadcasts go
    pub broadcast_address: SocketAddr,
    /// Optional BBMD registration
    pub foreign_device: Option<ForeignDeviceConfig>,
    /// Timeout applied to every confirmed request
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 0)),
            broadcast_address: SocketAddr::from(([255, 255, 255, 255], DEFAULT_PORT)),
            foreign_device: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// How an operation names its target device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRef {
    /// Direct endpoint address
    Address(BacnetAddress),
    /// Device instance resolved through the discovery cache
    DeviceId(u32),
}

impl From<BacnetAddress> for DeviceRef {
    fn from(addr: BacnetAddress) -> Self {
        DeviceRef::Address(addr)
    }
}

impl From<u32> for DeviceRef {
    fn from(device_id: u32) -> Self {
        DeviceRef::DeviceId(device_id)
    }
}

/// A device learned from an I-Am announcement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    pub device_id: u32,
    pub address: BacnetAddress,
    pub vendor_id: u16,
    /// Filled in by [`BacnetClient::discover`], absent after plain Who-Is
    pub vendor_name: Option<String>,
    pub max_apdu: u16,
    pub discovered_at: DateTime<Utc>,
}

/// Identification properties of a device object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub object_name: Option<String>,
    pub vendor_name: Option<String>,
    pub model_name: Option<String>,
    pub firmware_revision: Option<String>,
    pub system_status: Option<u32>,
}

/// Result of a reliability probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReliabilityStatus {
    /// Raw reliability enumeration; 0 is no-fault-detected
    pub reliability: u32,
    pub fault: bool,
}

/// A COV notification accepted by an active subscription
#[derive(Debug, Clone)]
pub struct CovEvent {
    pub source: SocketAddr,
    pub confirmed: bool,
    pub notification: CovNotification,
}

/// BACnet/IP client over a single UDP socket
pub struct BacnetClient {
    transport: Arc<UdpTransport>,
    config: ClientConfig,
    devices: RwLock<HashMap<u32, DiscoveredDevice>>,
    subscriptions: Arc<SubscriptionManager>,
    notifications: Mutex<Option<mpsc::UnboundedReceiver<CovEvent>>>,
    pump: JoinHandle<()>,
}

impl BacnetClient {
    /// Bind the transport and start the notification pump
    pub async fn connect(config: ClientConfig) -> BacnetResult<Self> {
        let transport = Arc::new(UdpTransport::bind(config.bind_address).await?);

        if let Some(fd) = &config.foreign_device {
            transport
                .register_foreign_device(fd.address.socket_addr(), fd.ttl)
                .await?;
            info!(bbmd = %fd.address, ttl = fd.ttl, "registered as foreign device");
        }

        let subscriptions = Arc::new(SubscriptionManager::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let pump = tokio::spawn(notification_pump(
            transport.subscribe(),
            Arc::clone(&subscriptions),
            tx,
        ));

        Ok(Self {
            transport,
            config,
            devices: RwLock::new(HashMap::new()),
            subscriptions,
            notifications: Mutex::new(Some(rx)),
            pump,
        })
    }

    /// Local socket address
    pub fn local_addr(&self) -> BacnetResult<SocketAddr> {
        self.transport.local_addr()
    }

    /// Transport counters
    pub async fn stats(&self) -> crate::transport::TransportStats {
        self.transport.stats().await
    }

    /// Stop the pump and close the transport; outstanding requests fail with
    /// `Cancelled`
    pub async fn close(&self) {
        self.pump.abort();
        self.transport.close().await;
    }

    // ------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------

    /// Broadcast Who-Is and collect I-Am answers for the wait window
    ///
    /// Duplicate answers from the same device instance collapse to the most
    /// recent one. Discovered devices also land in the cache used to resolve
    /// [`DeviceRef::DeviceId`] targets.
    pub async fn who_is(
        &self,
        range: Option<(u32, u32)>,
        wait: Duration,
    ) -> BacnetResult<Vec<DiscoveredDevice>> {
        if let Some((low, high)) = range {
            if low > high || high > MAX_INSTANCE {
                return Err(BacnetError::invalid_object(format!(
                    "instance range {low}..={high} is not valid"
                )));
            }
        }

        // Subscribe before sending so no answer can slip past
        let mut events = self.transport.subscribe();

        let who_is = WhoIs {
            low_limit: range.map(|(l, _)| l),
            high_limit: range.map(|(_, h)| h),
        };
        let (dest, function) = match &self.config.foreign_device {
            Some(fd) => (fd.address.socket_addr(), BVLL_DISTRIBUTE_BROADCAST),
            None => (self.config.broadcast_address, BVLL_ORIGINAL_BROADCAST),
        };
        self.transport
            .send_unconfirmed(dest, function, SERVICE_WHO_IS, who_is.encode())
            .await?;
        debug!(?range, %dest, "Who-Is sent");

        let deadline = tokio::time::Instant::now() + wait;
        let mut found: HashMap<u32, DiscoveredDevice> = HashMap::new();

        use tokio::sync::broadcast::error::RecvError;
        loop {
            let event = match tokio::time::timeout_at(deadline, events.recv()).await {
                Ok(Ok(event)) => event,
                Ok(Err(RecvError::Lagged(missed))) => {
                    warn!(missed, "discovery receiver lagged");
                    continue;
                }
                Ok(Err(RecvError::Closed)) => break,
                Err(_) => break,
            };
            if event.service != SERVICE_I_AM {
                continue;
            }
            let iam = match IAm::decode(&event.payload) {
                Ok(iam) => iam,
                Err(e) => {
                    trace!(error = %e, "ignoring undecodable I-Am");
                    continue;
                }
            };
            let instance = iam.device_id.instance;
            if !who_is.matches(instance) {
                continue;
            }
            let device = DiscoveredDevice {
                device_id: instance,
                address: BacnetAddress::try_from(event.source)?,
                vendor_id: iam.vendor_id,
                vendor_name: None,
                max_apdu: iam.max_apdu,
                discovered_at: Utc::now(),
            };
            // Most recent announcement wins
            found.insert(instance, device);
        }

        {
            let mut cache = self.devices.write().await;
            for device in found.values() {
                cache.insert(device.device_id, device.clone());
            }
        }

        let mut devices: Vec<DiscoveredDevice> = found.into_values().collect();
        devices.sort_by_key(|d| d.device_id);
        info!(count = devices.len(), "discovery finished");
        Ok(devices)
    }

    /// Who-Is plus a best-effort vendorName read per discovered device
    pub async fn discover(
        &self,
        range: Option<(u32, u32)>,
        wait: Duration,
    ) -> BacnetResult<Vec<DiscoveredDevice>> {
        let mut devices = self.who_is(range, wait).await?;
        for device in &mut devices {
            let device_object = ObjectIdentifier::device(device.device_id)?;
            match self
                .read_property(device.address.into(), device_object, "vendorName")
                .await
            {
                Ok(pv) => {
                    if let BacnetValue::CharacterString(name) = pv.value {
                        device.vendor_name = Some(name);
                    }
                }
                Err(e) => trace!(device = device.device_id, error = %e, "vendorName read failed"),
            }
        }
        {
            let mut cache = self.devices.write().await;
            for device in &devices {
                cache.insert(device.device_id, device.clone());
            }
        }
        Ok(devices)
    }

    /// Resolve a device reference to an endpoint address
    pub async fn resolve(&self, device: DeviceRef) -> BacnetResult<BacnetAddress> {
        match device {
            DeviceRef::Address(addr) => Ok(addr),
            DeviceRef::DeviceId(id) => {
                self.devices
                    .read()
                    .await
                    .get(&id)
                    .map(|d| d.address)
                    .ok_or_else(|| {
                        BacnetError::connection(format!(
                            "device {id} has not been discovered; run who_is first"
                        ))
                    })
            }
        }
    }

    // ------------------------------------------------------------------
    // Property access
    // ------------------------------------------------------------------

    fn property_id(property: &str) -> BacnetResult<u32> {
        property_id_from_name(property).ok_or_else(|| {
            BacnetError::unknown_property(format!("'{property}' is not a known property name"))
        })
    }

    async fn read_property_ack(
        &self,
        device: DeviceRef,
        object_id: ObjectIdentifier,
        property_id: u32,
    ) -> BacnetResult<ReadPropertyAck> {
        let dest = self.resolve(device).await?.socket_addr();
        let request = ReadPropertyRequest {
            object_id,
            property_id,
        };
        let ack = self
            .transport
            .send_request(
                dest,
                SERVICE_READ_PROPERTY,
                request.encode(),
                self.config.request_timeout,
            )
            .await?;
        match ack {
            ServiceAck::Complex(payload) => ReadPropertyAck::decode(&payload),
            ServiceAck::Simple => Err(BacnetError::protocol(
                "ReadProperty answered with a simple ack",
            )),
        }
    }

    /// Read one property of one object
    pub async fn read_property(
        &self,
        device: DeviceRef,
        object_id: ObjectIdentifier,
        property: &str,
    ) -> BacnetResult<PropertyValue> {
        let property_id = Self::property_id(property)?;
        let ack = self.read_property_ack(device, object_id, property_id).await?;
        let value = codec::collapse_values(ack.values()?)?;
        trace!(%object_id, property, %value, "property read");
        Ok(PropertyValue::new(object_id, property, value))
    }

    /// String-boundary form of [`read_property`](Self::read_property), taking
    /// `"analogInput:1"` style object references
    pub async fn read(
        &self,
        device: DeviceRef,
        object: &str,
        property: &str,
    ) -> BacnetResult<PropertyValue> {
        self.read_property(device, ObjectIdentifier::parse(object)?, property)
            .await
    }

    /// Write one property of one object, optionally at a command priority
    ///
    /// The priority range and property name are validated before any network
    /// I/O. Writing `Null` at a priority relinquishes that slot.
    pub async fn write_property(
        &self,
        device: DeviceRef,
        object_id: ObjectIdentifier,
        property: &str,
        value: BacnetValue,
        priority: Option<u8>,
    ) -> BacnetResult<()> {
        if let Some(priority) = priority {
            PriorityArray::check_priority(priority)?;
        }
        let property_id = Self::property_id(property)?;
        let dest = self.resolve(device).await?.socket_addr();

        let request = WritePropertyRequest {
            object_id,
            property_id,
            value,
            priority,
        };
        let ack = self
            .transport
            .send_request(
                dest,
                SERVICE_WRITE_PROPERTY,
                request.encode(),
                self.config.request_timeout,
            )
            .await?;
        match ack {
            ServiceAck::Simple => {
                debug!(%object_id, property, ?priority, "property written");
                Ok(())
            }
            ServiceAck::Complex(_) => Err(BacnetError::protocol(
                "WriteProperty answered with a complex ack",
            )),
        }
    }

    /// String-boundary form of [`write_property`](Self::write_property)
    pub async fn write(
        &self,
        device: DeviceRef,
        object: &str,
        property: &str,
        value: BacnetValue,
        priority: Option<u8>,
    ) -> BacnetResult<()> {
        self.write_property(device, ObjectIdentifier::parse(object)?, property, value, priority)
            .await
    }

    /// Relinquish a command priority by writing Null at it
    pub async fn relinquish(
        &self,
        device: DeviceRef,
        object_id: ObjectIdentifier,
        priority: u8,
    ) -> BacnetResult<()> {
        self.write_property(device, object_id, "presentValue", BacnetValue::Null, Some(priority))
            .await
    }

    // ------------------------------------------------------------------
    // Device interrogation
    // ------------------------------------------------------------------

    /// Read the object list of a device
    pub async fn read_object_list(
        &self,
        device: DeviceRef,
        device_instance: u32,
    ) -> BacnetResult<Vec<ObjectIdentifier>> {
        let device_object = ObjectIdentifier::device(device_instance)?;
        let ack = self
            .read_property_ack(device, device_object, PROP_OBJECT_LIST)
            .await?;
        ack.object_identifiers()
    }

    /// Read the identification properties of a device object, each
    /// best-effort
    pub async fn device_info(
        &self,
        device: DeviceRef,
        device_instance: u32,
    ) -> BacnetResult<DeviceInfo> {
        let device_object = ObjectIdentifier::device(device_instance)?;
        let mut info = DeviceInfo::default();

        for (property, slot) in [
            ("objectName", &mut info.object_name),
            ("vendorName", &mut info.vendor_name),
            ("modelName", &mut info.model_name),
            ("firmwareRevision", &mut info.firmware_revision),
        ] {
            match self.read_property(device, device_object, property).await {
                Ok(pv) => {
                    if let BacnetValue::CharacterString(s) = pv.value {
                        *slot = Some(s);
                    }
                }
                Err(e) => trace!(property, error = %e, "device property unavailable"),
            }
        }
        if let Ok(pv) = self.read_property(device, device_object, "systemStatus").await {
            info.system_status = pv.value.as_unsigned();
        }
        Ok(info)
    }

    /// Probe the reliability of one point; any non-zero enumeration is a
    /// fault
    pub async fn check_reliability(
        &self,
        device: DeviceRef,
        object_id: ObjectIdentifier,
    ) -> BacnetResult<ReliabilityStatus> {
        let pv = self.read_property(device, object_id, "reliability").await?;
        let reliability = pv.value.as_unsigned().ok_or_else(|| {
            BacnetError::type_mismatch(format!("reliability of {object_id} is not an enumeration"))
        })?;
        Ok(ReliabilityStatus {
            reliability,
            fault: reliability != 0,
        })
    }

    // ------------------------------------------------------------------
    // Trend logs
    // ------------------------------------------------------------------

    /// Read up to `count` records from a trend log's buffer, oldest first
    ///
    /// With a start time, records before it are dropped before counting.
    /// Records with absent timestamps survive a start-time filter.
    pub async fn read_trend_log(
        &self,
        device: DeviceRef,
        log_object: ObjectIdentifier,
        count: usize,
        start: Option<DateTime<Utc>>,
    ) -> BacnetResult<Vec<TrendRecord>> {
        if log_object.object_type != ObjectType::TrendLog {
            return Err(BacnetError::invalid_object(format!(
                "{log_object} is not a trendLog object"
            )));
        }
        let ack = self.read_property_ack(device, log_object, PROP_LOG_BUFFER).await?;
        let mut records = trend::decode_log_buffer(&ack.value_octets)?;
        if let Some(start) = start {
            records.retain(|r| r.timestamp.map(|ts| ts >= start).unwrap_or(true));
        }
        records.truncate(count);
        Ok(records)
    }

    // ------------------------------------------------------------------
    // COV subscriptions
    // ------------------------------------------------------------------

    /// Subscribe for change-of-value notifications on one object
    ///
    /// `lifetime_secs` of 0 requests an indefinite subscription. The
    /// subscription is `Requested` until the device acknowledges, then
    /// `Active`.
    pub async fn subscribe_cov(
        &self,
        device: DeviceRef,
        object_id: ObjectIdentifier,
        process_id: u32,
        confirmed: bool,
        lifetime_secs: u32,
    ) -> BacnetResult<()> {
        let key = SubscriptionKey {
            process_id,
            object_id,
        };
        let lifetime = (lifetime_secs > 0).then(|| Duration::from_secs(u64::from(lifetime_secs)));
        self.subscriptions.begin(key, confirmed, lifetime);

        let request = SubscribeCovRequest {
            process_id,
            object_id,
            issue_confirmed: Some(confirmed),
            lifetime: Some(lifetime_secs),
        };
        let outcome = self
            .send_subscribe(device, request)
            .await;
        match outcome {
            Ok(()) => {
                self.subscriptions.activate(&key)?;
                info!(%object_id, process_id, lifetime_secs, "subscription active");
                Ok(())
            }
            Err(e) => {
                self.subscriptions.remove(&key);
                Err(e)
            }
        }
    }

    /// Re-issue a subscription to restart its lifetime window
    pub async fn renew_subscription(
        &self,
        device: DeviceRef,
        object_id: ObjectIdentifier,
        process_id: u32,
        lifetime_secs: u32,
    ) -> BacnetResult<()> {
        let key = SubscriptionKey {
            process_id,
            object_id,
        };
        let confirmed = self.subscriptions.is_confirmed(&key).ok_or_else(|| {
            BacnetError::protocol(format!("no subscription for {object_id}/{process_id}"))
        })?;
        let request = SubscribeCovRequest {
            process_id,
            object_id,
            issue_confirmed: Some(confirmed),
            lifetime: Some(lifetime_secs),
        };
        self.send_subscribe(device, request).await?;
        let lifetime = (lifetime_secs > 0).then(|| Duration::from_secs(u64::from(lifetime_secs)));
        self.subscriptions.renew(&key, lifetime)?;
        debug!(%object_id, process_id, lifetime_secs, "subscription renewed");
        Ok(())
    }

    /// Cancel a subscription with the parameterless SubscribeCOV form
    pub async fn cancel_subscription(
        &self,
        device: DeviceRef,
        object_id: ObjectIdentifier,
        process_id: u32,
    ) -> BacnetResult<()> {
        let key = SubscriptionKey {
            process_id,
            object_id,
        };
        let request = SubscribeCovRequest {
            process_id,
            object_id,
            issue_confirmed: None,
            lifetime: None,
        };
        self.send_subscribe(device, request).await?;
        self.subscriptions.cancel(&key);
        Ok(())
    }

    async fn send_subscribe(
        &self,
        device: DeviceRef,
        request: SubscribeCovRequest,
    ) -> BacnetResult<()> {
        let dest = self.resolve(device).await?.socket_addr();
        let ack = self
            .transport
            .send_request(
                dest,
                SERVICE_SUBSCRIBE_COV,
                request.encode(),
                self.config.request_timeout,
            )
            .await?;
        match ack {
            ServiceAck::Simple => Ok(()),
            ServiceAck::Complex(_) => Err(BacnetError::protocol(
                "SubscribeCOV answered with a complex ack",
            )),
        }
    }

    /// Current state of a subscription, applying lazy expiry
    pub fn subscription_state(
        &self,
        object_id: ObjectIdentifier,
        process_id: u32,
    ) -> Option<SubscriptionState> {
        self.subscriptions.state(&SubscriptionKey {
            process_id,
            object_id,
        })
    }

    /// Time left on an active, finite subscription
    pub fn subscription_remaining(
        &self,
        object_id: ObjectIdentifier,
        process_id: u32,
    ) -> Option<Duration> {
        self.subscriptions.remaining(&SubscriptionKey {
            process_id,
            object_id,
        })
    }

    /// Take the notification receiver; only the first caller gets it
    pub async fn notifications(&self) -> Option<mpsc::UnboundedReceiver<CovEvent>> {
        self.notifications.lock().await.take()
    }
}

/// Routes inbound COV notifications to the consumer, dropping anything that
/// no active subscription claims
async fn notification_pump(
    mut events: tokio::sync::broadcast::Receiver<UnconfirmedEvent>,
    subscriptions: Arc<SubscriptionManager>,
    tx: mpsc::UnboundedSender<CovEvent>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "notification pump lagged");
                continue;
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        };
        let confirmed = match event.service {
            SERVICE_UNCONFIRMED_COV_NOTIFICATION => false,
            SERVICE_CONFIRMED_COV_NOTIFICATION => true,
            _ => continue,
        };
        let notification = match CovNotification::decode(&event.payload) {
            Ok(n) => n,
            Err(e) => {
                debug!(error = %e, "dropping undecodable COV notification");
                continue;
            }
        };
        if !subscriptions.accepts(&notification) {
            continue;
        }
        if tx
            .send(CovEvent {
                source: event.source,
                confirmed,
                notification,
            })
            .is_err()
        {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_priority_validated_before_io() {
        let client = BacnetClient::connect(ClientConfig {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            ..ClientConfig::default()
        })
        .await
        .unwrap();
        let target = DeviceRef::Address(BacnetAddress::parse("127.0.0.1:47808").unwrap());
        let ao1 = ObjectIdentifier::parse("analogOutput:1").unwrap();

        let err = client
            .write_property(target, ao1, "presentValue", BacnetValue::Real(1.0), Some(17))
            .await
            .unwrap_err();
        assert!(matches!(err, BacnetError::PriorityOutOfRange(_)));

        // No request went out
        assert_eq!(client.stats().await.requests_sent, 0);
        client.close().await;
    }

    #[tokio::test]
    async fn test_unknown_property_name_validated_locally() {
        let client = BacnetClient::connect(ClientConfig {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            ..ClientConfig::default()
        })
        .await
        .unwrap();
        let target = DeviceRef::Address(BacnetAddress::parse("127.0.0.1:47808").unwrap());
        let ai1 = ObjectIdentifier::parse("analogInput:1").unwrap();

        let err = client
            .read_property(target, ai1, "presentVal")
            .await
            .unwrap_err();
        assert!(matches!(err, BacnetError::UnknownProperty(_)));
        assert_eq!(client.stats().await.requests_sent, 0);
        client.close().await;
    }

    #[tokio::test]
    async fn test_unresolved_device_id_fails() {
        let client = BacnetClient::connect(ClientConfig {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            ..ClientConfig::default()
        })
        .await
        .unwrap();
        let err = client.resolve(DeviceRef::DeviceId(12345)).await.unwrap_err();
        assert!(matches!(err, BacnetError::Connection(_)));
        client.close().await;
    }

    #[tokio::test]
    async fn test_invalid_discovery_range_rejected() {
        let client = BacnetClient::connect(ClientConfig {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            ..ClientConfig::default()
        })
        .await
        .unwrap();
        assert!(client
            .who_is(Some((10, 5)), Duration::from_millis(10))
            .await
            .is_err());
        assert!(client
            .who_is(Some((0, MAX_INSTANCE + 1)), Duration::from_millis(10))
            .await
            .is_err());
        client.close().await;
    }

    #[tokio::test]
    async fn test_trend_log_requires_trend_log_object() {
        let client = BacnetClient::connect(ClientConfig {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            ..ClientConfig::default()
        })
        .await
        .unwrap();
        let target = DeviceRef::Address(BacnetAddress::parse("127.0.0.1:47808").unwrap());
        let ai1 = ObjectIdentifier::parse("analogInput:1").unwrap();
        let err = client
            .read_trend_log(target, ai1, 10, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BacnetError::InvalidObjectIdentifier(_)));
        client.close().await;
    }
}
