//! BACnet protocol constants
//!
//! Wire-level values from ASHRAE 135: BVLL functions, APDU types, service
//! choices, application tags, and the property identifier table used at the
//! string boundaries of the library.

/// Default BACnet/IP UDP port (0xBAC0)
pub const DEFAULT_PORT: u16 = 47808;

/// Maximum APDU length accepted by this implementation
pub const MAX_APDU_LENGTH: u16 = 1476;

/// BACnet protocol version carried in every NPDU
pub const NPDU_VERSION: u8 = 0x01;

/// NPDU control flag: sender expects a reply
pub const NPDU_EXPECTING_REPLY: u8 = 0x04;

/// Largest device instance number (22-bit field)
pub const MAX_INSTANCE: u32 = 4_194_303;

/// Vendor identifier reported by the virtual device (unregistered range)
pub const VENDOR_ID: u16 = 0xFFFF;

/// Segmentation-not-supported enumeration value in I-Am
pub const SEGMENTATION_NOT_SUPPORTED: u8 = 3;

// ============================================================================
// BVLL (BACnet Virtual Link Layer, Annex J)
// ============================================================================

/// BVLL type marker for BACnet/IP
pub const BVLL_TYPE_BACNET_IP: u8 = 0x81;

/// BVLC-Result
pub const BVLL_RESULT: u8 = 0x00;
/// Forwarded-NPDU (sent by a BBMD, carries the origin address)
pub const BVLL_FORWARDED_NPDU: u8 = 0x04;
/// Register-Foreign-Device
pub const BVLL_REGISTER_FOREIGN_DEVICE: u8 = 0x05;
/// Distribute-Broadcast-To-Network (via a BBMD)
pub const BVLL_DISTRIBUTE_BROADCAST: u8 = 0x09;
/// Original-Unicast-NPDU
pub const BVLL_ORIGINAL_UNICAST: u8 = 0x0A;
/// Original-Broadcast-NPDU
pub const BVLL_ORIGINAL_BROADCAST: u8 = 0x0B;

// ============================================================================
// APDU types (upper nibble of the first APDU octet)
// ============================================================================

pub const APDU_CONFIRMED_REQUEST: u8 = 0x00;
pub const APDU_UNCONFIRMED_REQUEST: u8 = 0x10;
pub const APDU_SIMPLE_ACK: u8 = 0x20;
pub const APDU_COMPLEX_ACK: u8 = 0x30;
pub const APDU_ERROR: u8 = 0x50;
pub const APDU_REJECT: u8 = 0x60;

// ============================================================================
// Service choices
// ============================================================================

/// Unconfirmed: I-Am
pub const SERVICE_I_AM: u8 = 0;
/// Unconfirmed: unconfirmed COV notification
pub const SERVICE_UNCONFIRMED_COV_NOTIFICATION: u8 = 2;
/// Unconfirmed: Who-Is
pub const SERVICE_WHO_IS: u8 = 8;

/// Confirmed: confirmed COV notification
pub const SERVICE_CONFIRMED_COV_NOTIFICATION: u8 = 1;
/// Confirmed: SubscribeCOV
pub const SERVICE_SUBSCRIBE_COV: u8 = 5;
/// Confirmed: ReadProperty
pub const SERVICE_READ_PROPERTY: u8 = 12;
/// Confirmed: WriteProperty
pub const SERVICE_WRITE_PROPERTY: u8 = 15;

// ============================================================================
// Application tags
// ============================================================================

pub const TAG_NULL: u8 = 0;
pub const TAG_BOOLEAN: u8 = 1;
pub const TAG_UNSIGNED: u8 = 2;
pub const TAG_REAL: u8 = 4;
pub const TAG_CHARACTER_STRING: u8 = 7;
pub const TAG_ENUMERATED: u8 = 9;
pub const TAG_DATE: u8 = 10;
pub const TAG_TIME: u8 = 11;
pub const TAG_OBJECT_IDENTIFIER: u8 = 12;

/// Character set octet for UTF-8 (ANSI X3.4) strings
pub const CHARSET_UTF8: u8 = 0;

// ============================================================================
// Error classes / codes carried in Error PDUs
// ============================================================================

pub const ERROR_CLASS_OBJECT: u8 = 1;
pub const ERROR_CLASS_PROPERTY: u8 = 2;
pub const ERROR_CLASS_SERVICES: u8 = 5;

pub const ERROR_CODE_UNKNOWN_OBJECT: u8 = 31;
pub const ERROR_CODE_UNKNOWN_PROPERTY: u8 = 32;
pub const ERROR_CODE_WRITE_ACCESS_DENIED: u8 = 40;
pub const ERROR_CODE_INVALID_DATA_TYPE: u8 = 9;
pub const ERROR_CODE_SERVICE_REQUEST_DENIED: u8 = 29;

/// Reject reason: a parameter was outside its permitted range
pub const REJECT_REASON_PARAMETER_OUT_OF_RANGE: u8 = 6;

/// Human-readable description of an error class/code pair
pub fn error_description(class: u8, code: u8) -> &'static str {
    match (class, code) {
        (ERROR_CLASS_OBJECT, ERROR_CODE_UNKNOWN_OBJECT) => "unknown object",
        (ERROR_CLASS_PROPERTY, ERROR_CODE_UNKNOWN_PROPERTY) => "unknown property",
        (ERROR_CLASS_PROPERTY, ERROR_CODE_WRITE_ACCESS_DENIED) => "write access denied",
        (ERROR_CLASS_PROPERTY, ERROR_CODE_INVALID_DATA_TYPE) => "invalid data type",
        (ERROR_CLASS_SERVICES, ERROR_CODE_SERVICE_REQUEST_DENIED) => "service request denied",
        _ => "unrecognized error",
    }
}

// ============================================================================
// Property identifiers
// ============================================================================

/// Well-known property identifiers, paired with their camelCase text form.
///
/// The text form is the one used at every module boundary that takes a
/// property reference as a string (e.g. `presentValue`).
pub const PROP_PRESENT_VALUE: u32 = 85;
pub const PROP_OBJECT_IDENTIFIER: u32 = 75;
pub const PROP_OBJECT_LIST: u32 = 76;
pub const PROP_OBJECT_NAME: u32 = 77;
pub const PROP_OBJECT_TYPE: u32 = 79;
pub const PROP_DESCRIPTION: u32 = 28;
pub const PROP_UNITS: u32 = 117;
pub const PROP_STATUS_FLAGS: u32 = 111;
pub const PROP_RELIABILITY: u32 = 103;
pub const PROP_PRIORITY_ARRAY: u32 = 87;
pub const PROP_RELINQUISH_DEFAULT: u32 = 104;
pub const PROP_STATE_TEXT: u32 = 110;
pub const PROP_NUMBER_OF_STATES: u32 = 74;
pub const PROP_VENDOR_NAME: u32 = 121;
pub const PROP_VENDOR_IDENTIFIER: u32 = 120;
pub const PROP_MODEL_NAME: u32 = 70;
pub const PROP_FIRMWARE_REVISION: u32 = 44;
pub const PROP_SYSTEM_STATUS: u32 = 112;
pub const PROP_LOG_BUFFER: u32 = 131;
pub const PROP_RECORD_COUNT: u32 = 141;

const PROPERTY_TABLE: &[(u32, &str)] = &[
    (PROP_PRESENT_VALUE, "presentValue"),
    (PROP_OBJECT_IDENTIFIER, "objectIdentifier"),
    (PROP_OBJECT_LIST, "objectList"),
    (PROP_OBJECT_NAME, "objectName"),
    (PROP_OBJECT_TYPE, "objectType"),
    (PROP_DESCRIPTION, "description"),
    (PROP_UNITS, "units"),
    (PROP_STATUS_FLAGS, "statusFlags"),
    (PROP_RELIABILITY, "reliability"),
    (PROP_PRIORITY_ARRAY, "priorityArray"),
    (PROP_RELINQUISH_DEFAULT, "relinquishDefault"),
    (PROP_STATE_TEXT, "stateText"),
    (PROP_NUMBER_OF_STATES, "numberOfStates"),
    (PROP_VENDOR_NAME, "vendorName"),
    (PROP_VENDOR_IDENTIFIER, "vendorIdentifier"),
    (PROP_MODEL_NAME, "modelName"),
    (PROP_FIRMWARE_REVISION, "firmwareRevision"),
    (PROP_SYSTEM_STATUS, "systemStatus"),
    (PROP_LOG_BUFFER, "logBuffer"),
    (PROP_RECORD_COUNT, "recordCount"),
];

/// Look up the wire identifier for a camelCase property name
pub fn property_id_from_name(name: &str) -> Option<u32> {
    PROPERTY_TABLE
        .iter()
        .find(|(_, n)| *n == name)
        .map(|(id, _)| *id)
}

/// Look up the camelCase name for a wire identifier
pub fn property_name(id: u32) -> Option<&'static str> {
    PROPERTY_TABLE
        .iter()
        .find(|(pid, _)| *pid == id)
        .map(|(_, n)| *n)
}
