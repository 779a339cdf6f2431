//! Virtual BACnet device
//!
//! A self-contained device for development and testing: answers Who-Is,
//! ReadProperty, WriteProperty and SubscribeCOV on its own UDP socket,
//! pushes COV notifications to subscribers, and runs a periodic HVAC
//! update cycle that keeps its points moving like a real air handler.
//!
//! The default object set models a single-zone system: zone, outside-air
//! and flow sensors, damper and chilled-water valve outputs, a setpoint,
//! occupancy and filter status, a fan command, a system-mode point and a
//! trend log of the zone temperature.

use crate::codec::{
    self, Apdu, CovNotification, IAm, ReadPropertyAck, ReadPropertyRequest, SubscribeCovRequest,
    WhoIs, WritePropertyRequest,
};
use crate::constants::*;
use crate::database::{ObjectDatabase, ObjectEntry, DEFAULT_LOG_CAPACITY};
use crate::error::{BacnetError, BacnetResult};
use crate::object::{ObjectIdentifier, ObjectType};
use crate::trend::TrendRecord;
use crate::value::{BacnetValue, ValueKind};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Priority used by the built-in control loop; operators writing at 1..=14
/// override it
pub const CONTROL_PRIORITY: u8 = 15;

/// Simulator configuration
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Device instance announced in I-Am
    pub device_id: u32,
    pub device_name: String,
    pub vendor_name: String,
    pub model_name: String,
    pub firmware_revision: String,
    pub bind_address: SocketAddr,
    /// Period of the HVAC update cycle
    pub update_interval: Duration,
    /// Replaces the default HVAC object set when given
    pub objects: Option<Vec<ObjectSpec>>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            device_id: 999_999,
            device_name: "Test Device".to_string(),
            vendor_name: "Voltage Energy".to_string(),
            model_name: "Virtual HVAC Controller".to_string(),
            firmware_revision: env!("CARGO_PKG_VERSION").to_string(),
            bind_address: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            update_interval: Duration::from_secs(5),
            objects: None,
        }
    }
}

/// Declarative object description loadable from JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectSpec {
    /// Text form, e.g. `analogInput:1`
    pub object: String,
    pub name: String,
    #[serde(default)]
    pub present_value: Option<BacnetValue>,
    #[serde(default)]
    pub units: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub state_text: Option<Vec<String>>,
}

impl ObjectSpec {
    fn to_entry(&self) -> BacnetResult<ObjectEntry> {
        let id = ObjectIdentifier::parse(&self.object)?;
        let kind = self
            .present_value
            .as_ref()
            .and_then(BacnetValue::kind)
            .unwrap_or(ValueKind::Real);
        let mut entry = ObjectEntry::new(id, self.name.clone(), kind)
            .with_property("reliability", BacnetValue::Enumerated(0))
            .with_property("statusFlags", BacnetValue::Unsigned(0));
        if let Some(value) = &self.present_value {
            entry = entry.with_present_value(value.clone());
        }
        if let Some(units) = &self.units {
            entry = entry.with_property("units", BacnetValue::CharacterString(units.clone()));
        }
        if let Some(description) = &self.description {
            entry = entry
                .with_property("description", BacnetValue::CharacterString(description.clone()));
        }
        if let Some(labels) = &self.state_text {
            entry = entry
                .with_property("stateText", BacnetValue::StateText(labels.clone()))
                .with_property("numberOfStates", BacnetValue::Unsigned(labels.len() as u32));
        }
        if id.object_type == ObjectType::TrendLog {
            entry = entry.with_log_buffer(DEFAULT_LOG_CAPACITY);
        }
        Ok(entry)
    }
}

fn analog_input(instance: u32, name: &str, value: f32, units: &str) -> BacnetResult<ObjectEntry> {
    Ok(
        ObjectEntry::new(ObjectIdentifier::new(ObjectType::AnalogInput, instance)?, name, ValueKind::Real)
            .with_present_value(BacnetValue::Real(value))
            .with_property("units", BacnetValue::CharacterString(units.to_string()))
            .with_property("reliability", BacnetValue::Enumerated(0))
            .with_property("statusFlags", BacnetValue::Unsigned(0)),
    )
}

fn analog_output(instance: u32, name: &str, value: f32, units: &str) -> BacnetResult<ObjectEntry> {
    Ok(
        ObjectEntry::new(ObjectIdentifier::new(ObjectType::AnalogOutput, instance)?, name, ValueKind::Real)
            .with_present_value(BacnetValue::Real(value))
            .with_property("units", BacnetValue::CharacterString(units.to_string()))
            .with_property("reliability", BacnetValue::Enumerated(0))
            .with_property("statusFlags", BacnetValue::Unsigned(0)),
    )
}

/// Build the device's object database: the device object, then either the
/// configured objects or the default HVAC set
pub fn build_database(config: &SimulatorConfig) -> BacnetResult<ObjectDatabase> {
    let mut db = ObjectDatabase::new();

    let device_object = ObjectIdentifier::device(config.device_id)?;
    db.insert(
        ObjectEntry::new(device_object, config.device_name.clone(), ValueKind::CharacterString)
            .with_property(
                "vendorName",
                BacnetValue::CharacterString(config.vendor_name.clone()),
            )
            .with_property("vendorIdentifier", BacnetValue::Unsigned(u32::from(VENDOR_ID)))
            .with_property(
                "modelName",
                BacnetValue::CharacterString(config.model_name.clone()),
            )
            .with_property(
                "firmwareRevision",
                BacnetValue::CharacterString(config.firmware_revision.clone()),
            )
            .with_property("systemStatus", BacnetValue::Enumerated(0))
            .with_property("reliability", BacnetValue::Enumerated(0))
            .with_property(
                "description",
                BacnetValue::CharacterString("Virtual single-zone air handler".to_string()),
            ),
    )?;

    if let Some(specs) = &config.objects {
        for spec in specs {
            db.insert(spec.to_entry()?)?;
        }
        return Ok(db);
    }

    db.insert(analog_input(1, "Zone Temperature", 72.5, "degreesFahrenheit")?)?;
    db.insert(analog_input(2, "Outside Air Temperature", 85.0, "degreesFahrenheit")?)?;
    db.insert(analog_input(3, "Supply Air Flow", 1250.0, "cubicFeetPerMinute")?)?;
    db.insert(analog_output(1, "Damper Position", 50.0, "percent")?)?;
    db.insert(analog_output(2, "Chilled Water Valve", 25.0, "percent")?)?;
    db.insert(
        ObjectEntry::new(
            ObjectIdentifier::new(ObjectType::AnalogValue, 1)?,
            "Zone Setpoint",
            ValueKind::Real,
        )
        .with_present_value(BacnetValue::Real(72.0))
        .with_property("units", BacnetValue::CharacterString("degreesFahrenheit".to_string()))
        .with_property("reliability", BacnetValue::Enumerated(0))
        .with_property("statusFlags", BacnetValue::Unsigned(0)),
    )?;
    db.insert(
        ObjectEntry::new(
            ObjectIdentifier::new(ObjectType::BinaryInput, 1)?,
            "Occupancy Sensor",
            ValueKind::Binary,
        )
        .with_present_value(BacnetValue::Binary(true))
        .with_property("reliability", BacnetValue::Enumerated(0))
        .with_property("statusFlags", BacnetValue::Unsigned(0)),
    )?;
    db.insert(
        ObjectEntry::new(
            ObjectIdentifier::new(ObjectType::BinaryInput, 2)?,
            "Filter Status",
            ValueKind::Binary,
        )
        // Inactive means the filter is clean
        .with_present_value(BacnetValue::Binary(false))
        .with_property("reliability", BacnetValue::Enumerated(0))
        .with_property("statusFlags", BacnetValue::Unsigned(0)),
    )?;
    db.insert(
        ObjectEntry::new(
            ObjectIdentifier::new(ObjectType::BinaryOutput, 1)?,
            "Supply Fan Command",
            ValueKind::Binary,
        )
        .with_present_value(BacnetValue::Binary(true))
        .with_property("reliability", BacnetValue::Enumerated(0))
        .with_property("statusFlags", BacnetValue::Unsigned(0)),
    )?;
    db.insert(
        ObjectEntry::new(
            ObjectIdentifier::new(ObjectType::MultiStateValue, 1)?,
            "System Mode",
            ValueKind::Unsigned,
        )
        .with_present_value(BacnetValue::Unsigned(3))
        .with_property(
            "stateText",
            BacnetValue::StateText(vec![
                "Off".to_string(),
                "Heat".to_string(),
                "Cool".to_string(),
                "Auto".to_string(),
            ]),
        )
        .with_property("numberOfStates", BacnetValue::Unsigned(4))
        .with_property("reliability", BacnetValue::Enumerated(0))
        .with_property("statusFlags", BacnetValue::Unsigned(0)),
    )?;
    db.insert(
        ObjectEntry::new(
            ObjectIdentifier::new(ObjectType::TrendLog, 1)?,
            "Zone Temperature Log",
            ValueKind::Real,
        )
        .with_log_buffer(DEFAULT_LOG_CAPACITY)
        .with_property("reliability", BacnetValue::Enumerated(0))
        .with_property("statusFlags", BacnetValue::Unsigned(0)),
    )?;

    Ok(db)
}

/// One COV subscriber held by the device
#[derive(Debug, Clone)]
struct Subscriber {
    process_id: u32,
    object_id: ObjectIdentifier,
    confirmed: bool,
    endpoint: SocketAddr,
    /// None for an indefinite subscription
    expires_at: Option<Instant>,
}

impl Subscriber {
    fn time_remaining(&self) -> u32 {
        match self.expires_at {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()).as_secs() as u32,
            None => 0,
        }
    }
}

/// Whether the network may command this object type's present value
fn network_writable(object_type: ObjectType) -> bool {
    matches!(
        object_type,
        ObjectType::AnalogOutput
            | ObjectType::BinaryOutput
            | ObjectType::MultiStateOutput
            | ObjectType::AnalogValue
            | ObjectType::BinaryValue
            | ObjectType::MultiStateValue
    )
}

struct Core {
    device_id: u32,
    socket: Arc<UdpSocket>,
    db: Arc<RwLock<ObjectDatabase>>,
    subscribers: Mutex<Vec<Subscriber>>,
    next_invoke_id: AtomicU8,
}

impl Core {
    async fn send_apdu(&self, function: u8, apdu: &Apdu, dest: SocketAddr) {
        let mut body = codec::encode_npdu(false).to_vec();
        body.extend_from_slice(&apdu.encode());
        let frame = codec::encode_frame(function, &body);
        if let Err(e) = self.socket.send_to(&frame, dest).await {
            warn!(%dest, error = %e, "send failed");
        }
    }

    async fn handle_datagram(&self, datagram: &[u8], source: SocketAddr) {
        let apdu = match codec::decode_frame(datagram).and_then(|frame| match frame.function {
            BVLL_ORIGINAL_UNICAST | BVLL_ORIGINAL_BROADCAST | BVLL_FORWARDED_NPDU => {
                Apdu::decode(codec::strip_npdu(frame.body)?)
            }
            other => Err(BacnetError::protocol(format!(
                "unsupported BVLL function 0x{other:02X}"
            ))),
        }) {
            Ok(apdu) => apdu,
            Err(e) => {
                trace!(%source, error = %e, payload = %hex::encode(datagram), "ignoring undecodable datagram");
                return;
            }
        };

        match apdu {
            Apdu::UnconfirmedRequest { service, payload } if service == SERVICE_WHO_IS => {
                self.handle_who_is(&payload, source).await;
            }
            Apdu::ConfirmedRequest {
                invoke_id,
                service,
                payload,
            } => {
                let reply = self.handle_confirmed(invoke_id, service, &payload, source).await;
                self.send_apdu(BVLL_ORIGINAL_UNICAST, &reply, source).await;
            }
            // Acks of our confirmed COV notifications and foreign services
            _ => {}
        }
    }

    async fn handle_who_is(&self, payload: &[u8], source: SocketAddr) {
        let who_is = match WhoIs::decode(payload) {
            Ok(w) => w,
            Err(e) => {
                trace!(%source, error = %e, "malformed Who-Is ignored");
                return;
            }
        };
        if !who_is.matches(self.device_id) {
            return;
        }
        let device_object = match ObjectIdentifier::device(self.device_id) {
            Ok(id) => id,
            Err(_) => return,
        };
        let iam = IAm {
            device_id: device_object,
            max_apdu: MAX_APDU_LENGTH,
            segmentation: SEGMENTATION_NOT_SUPPORTED,
            vendor_id: VENDOR_ID,
        };
        debug!(%source, device = self.device_id, "answering Who-Is");
        self.send_apdu(
            BVLL_ORIGINAL_BROADCAST,
            &Apdu::UnconfirmedRequest {
                service: SERVICE_I_AM,
                payload: iam.encode(),
            },
            source,
        )
        .await;
    }

    async fn handle_confirmed(
        &self,
        invoke_id: u8,
        service: u8,
        payload: &[u8],
        source: SocketAddr,
    ) -> Apdu {
        match service {
            SERVICE_READ_PROPERTY => self.handle_read(invoke_id, payload).await,
            SERVICE_WRITE_PROPERTY => self.handle_write(invoke_id, payload).await,
            SERVICE_SUBSCRIBE_COV => self.handle_subscribe(invoke_id, payload, source).await,
            other => {
                debug!(%source, service = other, "refusing unsupported service");
                Apdu::Error {
                    invoke_id,
                    service: other,
                    class: ERROR_CLASS_SERVICES,
                    code: ERROR_CODE_SERVICE_REQUEST_DENIED,
                }
            }
        }
    }

    fn error(invoke_id: u8, service: u8, class: u8, code: u8) -> Apdu {
        Apdu::Error {
            invoke_id,
            service,
            class,
            code,
        }
    }

    async fn handle_read(&self, invoke_id: u8, payload: &[u8]) -> Apdu {
        let service = SERVICE_READ_PROPERTY;
        let request = match ReadPropertyRequest::decode(payload) {
            Ok(r) => r,
            Err(_) => {
                return Apdu::Reject {
                    invoke_id,
                    reason: 0,
                }
            }
        };
        let db = self.db.read().await;
        if !db.contains(&request.object_id) {
            return Self::error(invoke_id, service, ERROR_CLASS_OBJECT, ERROR_CODE_UNKNOWN_OBJECT);
        }

        let mut value_octets = Vec::new();
        match request.property_id {
            PROP_OBJECT_LIST => {
                for id in db.list_objects() {
                    codec::encode_app_object_id(&mut value_octets, id);
                }
            }
            PROP_LOG_BUFFER => match db.log_records(&request.object_id) {
                Ok(records) => value_octets = crate::trend::encode_log_buffer(&records),
                Err(_) => {
                    return Self::error(
                        invoke_id,
                        service,
                        ERROR_CLASS_PROPERTY,
                        ERROR_CODE_UNKNOWN_PROPERTY,
                    )
                }
            },
            PROP_OBJECT_IDENTIFIER => {
                codec::encode_app_object_id(&mut value_octets, request.object_id);
            }
            other => {
                let Some(property) = property_name(other) else {
                    return Self::error(
                        invoke_id,
                        service,
                        ERROR_CLASS_PROPERTY,
                        ERROR_CODE_UNKNOWN_PROPERTY,
                    );
                };
                match db.get(&request.object_id, property) {
                    Ok(value) => codec::encode_app_value(&mut value_octets, &value),
                    Err(_) => {
                        return Self::error(
                            invoke_id,
                            service,
                            ERROR_CLASS_PROPERTY,
                            ERROR_CODE_UNKNOWN_PROPERTY,
                        )
                    }
                }
            }
        }

        let ack = ReadPropertyAck {
            object_id: request.object_id,
            property_id: request.property_id,
            value_octets,
        };
        Apdu::ComplexAck {
            invoke_id,
            service,
            payload: ack.encode(),
        }
    }

    async fn handle_write(&self, invoke_id: u8, payload: &[u8]) -> Apdu {
        let service = SERVICE_WRITE_PROPERTY;
        let request = match WritePropertyRequest::decode(payload) {
            Ok(r) => r,
            Err(_) => {
                return Apdu::Reject {
                    invoke_id,
                    reason: 0,
                }
            }
        };
        let object_id = request.object_id;

        let Some(property) = property_name(request.property_id) else {
            return Self::error(invoke_id, service, ERROR_CLASS_PROPERTY, ERROR_CODE_UNKNOWN_PROPERTY);
        };

        // A command without a priority lands in the lowest slot
        let priority = request
            .priority
            .or_else(|| object_id.object_type.is_commandable().then_some(16));

        {
            let mut db = self.db.write().await;
            if !db.contains(&object_id) {
                return Self::error(invoke_id, service, ERROR_CLASS_OBJECT, ERROR_CODE_UNKNOWN_OBJECT);
            }
            // Sensors and the device object are read-only from the network
            if property != "presentValue" || !network_writable(object_id.object_type) {
                debug!(%object_id, property, "write refused");
                return Self::error(
                    invoke_id,
                    service,
                    ERROR_CLASS_PROPERTY,
                    ERROR_CODE_WRITE_ACCESS_DENIED,
                );
            }
            match db.set(&object_id, property, request.value.clone(), priority) {
                Ok(()) => {}
                Err(BacnetError::PriorityOutOfRange(_)) => {
                    return Apdu::Reject {
                        invoke_id,
                        reason: REJECT_REASON_PARAMETER_OUT_OF_RANGE,
                    }
                }
                Err(BacnetError::TypeMismatch(_)) => {
                    return Self::error(
                        invoke_id,
                        service,
                        ERROR_CLASS_PROPERTY,
                        ERROR_CODE_INVALID_DATA_TYPE,
                    )
                }
                Err(_) => {
                    return Self::error(
                        invoke_id,
                        service,
                        ERROR_CLASS_PROPERTY,
                        ERROR_CODE_WRITE_ACCESS_DENIED,
                    )
                }
            }
        }

        info!(%object_id, property, value = %request.value, priority = ?priority, "written");
        self.notify_cov(object_id).await;
        Apdu::SimpleAck { invoke_id, service }
    }

    async fn handle_subscribe(
        &self,
        invoke_id: u8,
        payload: &[u8],
        source: SocketAddr,
    ) -> Apdu {
        let service = SERVICE_SUBSCRIBE_COV;
        let request = match SubscribeCovRequest::decode(payload) {
            Ok(r) => r,
            Err(_) => {
                return Apdu::Reject {
                    invoke_id,
                    reason: 0,
                }
            }
        };
        if !self.db.read().await.contains(&request.object_id) {
            return Self::error(invoke_id, service, ERROR_CLASS_OBJECT, ERROR_CODE_UNKNOWN_OBJECT);
        }

        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|s| {
            !(s.endpoint == source
                && s.process_id == request.process_id
                && s.object_id == request.object_id)
        });

        if request.is_cancellation() {
            debug!(%source, object = %request.object_id, "subscription cancelled");
            return Apdu::SimpleAck { invoke_id, service };
        }

        let lifetime = request.lifetime.unwrap_or(0);
        let subscriber = Subscriber {
            process_id: request.process_id,
            object_id: request.object_id,
            confirmed: request.issue_confirmed.unwrap_or(false),
            endpoint: source,
            expires_at: (lifetime > 0)
                .then(|| Instant::now() + Duration::from_secs(u64::from(lifetime))),
        };
        info!(%source, object = %request.object_id, lifetime, "subscription accepted");
        subscribers.push(subscriber);
        drop(subscribers);

        // The current value goes out right away so the subscriber starts
        // from a known state
        self.notify_cov(request.object_id).await;
        Apdu::SimpleAck { invoke_id, service }
    }

    /// Push a COV notification for one object to every live subscriber
    async fn notify_cov(&self, object_id: ObjectIdentifier) {
        let value = match self.db.read().await.get(&object_id, "presentValue") {
            Ok(v) => v,
            Err(_) => return,
        };
        let device_object = match ObjectIdentifier::device(self.device_id) {
            Ok(id) => id,
            Err(_) => return,
        };

        let targets: Vec<Subscriber> = {
            let mut subscribers = self.subscribers.lock().await;
            let now = Instant::now();
            subscribers.retain(|s| match s.expires_at {
                Some(deadline) => {
                    if deadline <= now {
                        debug!(endpoint = %s.endpoint, object = %s.object_id, "subscription expired");
                        false
                    } else {
                        true
                    }
                }
                None => true,
            });
            subscribers
                .iter()
                .filter(|s| s.object_id == object_id)
                .cloned()
                .collect()
        };

        for subscriber in targets {
            let notification = CovNotification {
                process_id: subscriber.process_id,
                device_id: device_object,
                object_id,
                time_remaining: subscriber.time_remaining(),
                values: vec![
                    (PROP_PRESENT_VALUE, value.clone()),
                    (PROP_STATUS_FLAGS, BacnetValue::Unsigned(0)),
                ],
            };
            let apdu = if subscriber.confirmed {
                // Fresh invoke id; the subscriber's ack is not awaited
                Apdu::ConfirmedRequest {
                    invoke_id: self.next_invoke_id.fetch_add(1, Ordering::Relaxed),
                    service: SERVICE_CONFIRMED_COV_NOTIFICATION,
                    payload: notification.encode(),
                }
            } else {
                Apdu::UnconfirmedRequest {
                    service: SERVICE_UNCONFIRMED_COV_NOTIFICATION,
                    payload: notification.encode(),
                }
            };
            trace!(endpoint = %subscriber.endpoint, object = %object_id, "COV notification");
            self.send_apdu(BVLL_ORIGINAL_UNICAST, &apdu, subscriber.endpoint).await;
        }
    }
}

// ----------------------------------------------------------------------
// HVAC update cycle
// ----------------------------------------------------------------------

/// Run one update cycle against the default HVAC points
///
/// Returns the objects whose present value changed. A database without the
/// standard points (custom object sets) is left untouched.
fn run_cycle(db: &mut ObjectDatabase, rng: &mut StdRng) -> BacnetResult<Vec<ObjectIdentifier>> {
    let ai_zone = ObjectIdentifier::new(ObjectType::AnalogInput, 1)?;
    let ai_outside = ObjectIdentifier::new(ObjectType::AnalogInput, 2)?;
    let ai_flow = ObjectIdentifier::new(ObjectType::AnalogInput, 3)?;
    let ao_damper = ObjectIdentifier::new(ObjectType::AnalogOutput, 1)?;
    let ao_valve = ObjectIdentifier::new(ObjectType::AnalogOutput, 2)?;
    let av_setpoint = ObjectIdentifier::new(ObjectType::AnalogValue, 1)?;
    let bi_occupancy = ObjectIdentifier::new(ObjectType::BinaryInput, 1)?;
    let bo_fan = ObjectIdentifier::new(ObjectType::BinaryOutput, 1)?;
    let tl_zone = ObjectIdentifier::new(ObjectType::TrendLog, 1)?;

    for required in [&ai_zone, &ai_outside, &ao_damper, &ao_valve, &av_setpoint] {
        if !db.contains(required) {
            return Ok(Vec::new());
        }
    }

    let read_real = |db: &ObjectDatabase, id: &ObjectIdentifier| -> BacnetResult<f32> {
        db.get(id, "presentValue")?
            .as_real()
            .ok_or_else(|| BacnetError::type_mismatch(format!("{id} is not Real")))
    };

    let mut zone = read_real(db, &ai_zone)?;
    let mut outside = read_real(db, &ai_outside)?;
    let damper = read_real(db, &ao_damper)?;
    let valve = read_real(db, &ao_valve)?;
    let setpoint = read_real(db, &av_setpoint)?;
    let mut occupied = db
        .get(&bi_occupancy, "presentValue")
        .ok()
        .and_then(|v| v.as_binary())
        .unwrap_or(false);

    // Outside air drifts slowly within a summer band
    outside = (outside + rng.gen_range(-0.5..=0.5)).clamp(70.0, 100.0);

    // Zone temperature follows outside air through the damper, cooling pulls
    // it down when above setpoint, occupancy adds internal gain
    zone += (damper / 100.0) * (outside - zone) * 0.1;
    if zone > setpoint {
        zone -= (valve / 100.0) * 2.0;
    }
    if occupied {
        zone += 0.2;
    }
    zone = (zone + rng.gen_range(-0.1..=0.1)).clamp(65.0, 85.0);

    // Proportional control nudges the actuators when the error exceeds the
    // deadband; commands go in below operator priorities
    let error = zone - setpoint;
    let mut changed = vec![ai_zone, ai_outside];
    if error.abs() > 1.0 {
        let step = if error > 0.0 { 5.0 } else { -5.0 };
        let valve_cmd = (valve + step).clamp(0.0, 100.0);
        let damper_cmd = (damper + step).clamp(0.0, 100.0);
        db.set(&ao_valve, "presentValue", BacnetValue::Real(valve_cmd), Some(CONTROL_PRIORITY))?;
        db.set(&ao_damper, "presentValue", BacnetValue::Real(damper_cmd), Some(CONTROL_PRIORITY))?;
        changed.push(ao_valve);
        changed.push(ao_damper);
    }

    // Occupancy toggles occasionally
    if db.contains(&bi_occupancy) && rng.gen_bool(0.1) {
        occupied = !occupied;
        db.set(&bi_occupancy, "presentValue", BacnetValue::Binary(occupied), None)?;
        changed.push(bi_occupancy);
    }

    if db.contains(&bo_fan) {
        let fan = occupied || error.abs() > 1.0;
        db.set(&bo_fan, "presentValue", BacnetValue::Binary(fan), Some(CONTROL_PRIORITY))?;
    }

    db.set(&ai_zone, "presentValue", BacnetValue::Real(zone), None)?;
    db.set(&ai_outside, "presentValue", BacnetValue::Real(outside), None)?;

    if db.contains(&ai_flow) {
        let damper_now = read_real(db, &ao_damper)?;
        let flow = (12.5 * damper_now + rng.gen_range(-25.0..=25.0)).max(0.0);
        db.set(&ai_flow, "presentValue", BacnetValue::Real(flow), None)?;
        changed.push(ai_flow);
    }

    if db.contains(&tl_zone) {
        db.append_log(&tl_zone, TrendRecord::new(Utc::now(), BacnetValue::Real(zone)))?;
    }

    Ok(changed)
}

/// A running virtual device
pub struct VirtualDevice {
    core: Arc<Core>,
    local_addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl VirtualDevice {
    /// Bind the socket, build the object database and start the responder
    /// and update tasks
    pub async fn start(config: SimulatorConfig) -> BacnetResult<Self> {
        let db = build_database(&config)?;
        let socket = UdpSocket::bind(config.bind_address).await.map_err(|e| {
            BacnetError::connection(format!("failed to bind {}: {e}", config.bind_address))
        })?;
        socket
            .set_broadcast(true)
            .map_err(|e| BacnetError::connection(format!("failed to enable broadcast: {e}")))?;
        let local_addr = socket.local_addr().map_err(BacnetError::from)?;

        let core = Arc::new(Core {
            device_id: config.device_id,
            socket: Arc::new(socket),
            db: Arc::new(RwLock::new(db)),
            subscribers: Mutex::new(Vec::new()),
            next_invoke_id: AtomicU8::new(0),
        });

        info!(
            device = config.device_id,
            name = %config.device_name,
            %local_addr,
            "virtual device started"
        );

        let responder = {
            let core = Arc::clone(&core);
            tokio::spawn(async move {
                let mut buf = vec![0u8; 1500];
                loop {
                    match core.socket.recv_from(&mut buf).await {
                        Ok((len, source)) => core.handle_datagram(&buf[..len], source).await,
                        Err(e) => warn!(error = %e, "socket receive failed"),
                    }
                }
            })
        };

        let updater = {
            let core = Arc::clone(&core);
            let period = config.update_interval;
            tokio::spawn(async move {
                let mut rng = StdRng::from_entropy();
                // First tick lands one full period out; initial values stay
                // readable until then
                let mut ticker =
                    tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                loop {
                    ticker.tick().await;
                    let changed = {
                        let mut db = core.db.write().await;
                        match run_cycle(&mut db, &mut rng) {
                            Ok(changed) => changed,
                            Err(e) => {
                                // One bad cycle must not stop the device
                                warn!(error = %e, "update cycle failed");
                                continue;
                            }
                        }
                    };
                    for object_id in changed {
                        core.notify_cov(object_id).await;
                    }
                }
            })
        };

        Ok(Self {
            core,
            local_addr,
            tasks: vec![responder, updater],
        })
    }

    /// Address the device is answering on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared handle to the object database
    pub fn database(&self) -> Arc<RwLock<ObjectDatabase>> {
        Arc::clone(&self.core.db)
    }

    /// Number of live COV subscribers
    pub async fn subscriber_count(&self) -> usize {
        self.core.subscribers.lock().await.len()
    }

    /// Stop both tasks; in-flight handlers finish with their socket writes
    pub async fn stop(&self) {
        for task in &self.tasks {
            task.abort();
        }
        info!(device = self.core.device_id, "virtual device stopped");
    }
}

impl Drop for VirtualDevice {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
