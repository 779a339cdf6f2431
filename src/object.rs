//! BACnet object identifiers
//!
//! Object types are a closed enum; unknown type names are rejected when the
//! text form is parsed, never looked up at runtime. Instance numbers are
//! exactly 22 bits wide (0..=4194303), matching the wire encoding
//! `(type << 22) | instance`.

use crate::constants::MAX_INSTANCE;
use crate::error::{BacnetError, BacnetResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of object types supported by this library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    AnalogInput,
    AnalogOutput,
    AnalogValue,
    BinaryInput,
    BinaryOutput,
    BinaryValue,
    MultiStateInput,
    MultiStateOutput,
    MultiStateValue,
    Device,
    File,
    Group,
    Loop,
    NotificationClass,
    Program,
    Schedule,
    Averaging,
    TrendLog,
    LifeSafetyPoint,
    LifeSafetyZone,
}

impl ObjectType {
    /// Wire code from ASHRAE 135 clause 21
    pub fn code(&self) -> u16 {
        match self {
            ObjectType::AnalogInput => 0,
            ObjectType::AnalogOutput => 1,
            ObjectType::AnalogValue => 2,
            ObjectType::BinaryInput => 3,
            ObjectType::BinaryOutput => 4,
            ObjectType::BinaryValue => 5,
            ObjectType::Device => 8,
            ObjectType::File => 10,
            ObjectType::Group => 11,
            ObjectType::Loop => 12,
            ObjectType::MultiStateInput => 13,
            ObjectType::MultiStateOutput => 14,
            ObjectType::NotificationClass => 15,
            ObjectType::Program => 16,
            ObjectType::Schedule => 17,
            ObjectType::Averaging => 18,
            ObjectType::MultiStateValue => 19,
            ObjectType::TrendLog => 20,
            ObjectType::LifeSafetyPoint => 21,
            ObjectType::LifeSafetyZone => 22,
        }
    }

    /// Decode a wire code back into the closed set
    pub fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            0 => ObjectType::AnalogInput,
            1 => ObjectType::AnalogOutput,
            2 => ObjectType::AnalogValue,
            3 => ObjectType::BinaryInput,
            4 => ObjectType::BinaryOutput,
            5 => ObjectType::BinaryValue,
            8 => ObjectType::Device,
            10 => ObjectType::File,
            11 => ObjectType::Group,
            12 => ObjectType::Loop,
            13 => ObjectType::MultiStateInput,
            14 => ObjectType::MultiStateOutput,
            15 => ObjectType::NotificationClass,
            16 => ObjectType::Program,
            17 => ObjectType::Schedule,
            18 => ObjectType::Averaging,
            19 => ObjectType::MultiStateValue,
            20 => ObjectType::TrendLog,
            21 => ObjectType::LifeSafetyPoint,
            22 => ObjectType::LifeSafetyZone,
            _ => return None,
        })
    }

    /// camelCase text form used at module boundaries
    pub fn name(&self) -> &'static str {
        match self {
            ObjectType::AnalogInput => "analogInput",
            ObjectType::AnalogOutput => "analogOutput",
            ObjectType::AnalogValue => "analogValue",
            ObjectType::BinaryInput => "binaryInput",
            ObjectType::BinaryOutput => "binaryOutput",
            ObjectType::BinaryValue => "binaryValue",
            ObjectType::MultiStateInput => "multiStateInput",
            ObjectType::MultiStateOutput => "multiStateOutput",
            ObjectType::MultiStateValue => "multiStateValue",
            ObjectType::Device => "device",
            ObjectType::File => "file",
            ObjectType::Group => "group",
            ObjectType::Loop => "loop",
            ObjectType::NotificationClass => "notificationClass",
            ObjectType::Program => "program",
            ObjectType::Schedule => "schedule",
            ObjectType::Averaging => "averaging",
            ObjectType::TrendLog => "trendLog",
            ObjectType::LifeSafetyPoint => "lifeSafetyPoint",
            ObjectType::LifeSafetyZone => "lifeSafetyZone",
        }
    }

    /// Parse the camelCase text form; unknown names are rejected
    pub fn parse(name: &str) -> BacnetResult<Self> {
        Ok(match name {
            "analogInput" => ObjectType::AnalogInput,
            "analogOutput" => ObjectType::AnalogOutput,
            "analogValue" => ObjectType::AnalogValue,
            "binaryInput" => ObjectType::BinaryInput,
            "binaryOutput" => ObjectType::BinaryOutput,
            "binaryValue" => ObjectType::BinaryValue,
            "multiStateInput" => ObjectType::MultiStateInput,
            "multiStateOutput" => ObjectType::MultiStateOutput,
            "multiStateValue" => ObjectType::MultiStateValue,
            "device" => ObjectType::Device,
            "file" => ObjectType::File,
            "group" => ObjectType::Group,
            "loop" => ObjectType::Loop,
            "notificationClass" => ObjectType::NotificationClass,
            "program" => ObjectType::Program,
            "schedule" => ObjectType::Schedule,
            "averaging" => ObjectType::Averaging,
            "trendLog" => ObjectType::TrendLog,
            "lifeSafetyPoint" => ObjectType::LifeSafetyPoint,
            "lifeSafetyZone" => ObjectType::LifeSafetyZone,
            _ => {
                return Err(BacnetError::invalid_object(format!(
                    "unknown object type '{name}'"
                )))
            }
        })
    }

    /// True for point types whose present value is commanded through a
    /// priority array
    pub fn is_commandable(&self) -> bool {
        matches!(
            self,
            ObjectType::AnalogOutput | ObjectType::BinaryOutput | ObjectType::MultiStateOutput
        )
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A (type, instance) pair addressing one point within a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectIdentifier {
    pub object_type: ObjectType,
    pub instance: u32,
}

impl ObjectIdentifier {
    /// Create an identifier, enforcing the 22-bit instance range
    pub fn new(object_type: ObjectType, instance: u32) -> BacnetResult<Self> {
        if instance > MAX_INSTANCE {
            return Err(BacnetError::invalid_object(format!(
                "instance {instance} exceeds {MAX_INSTANCE}"
            )));
        }
        Ok(Self {
            object_type,
            instance,
        })
    }

    /// Parse the `<objectType>:<instance>` text form
    pub fn parse(text: &str) -> BacnetResult<Self> {
        let (type_part, instance_part) = text.split_once(':').ok_or_else(|| {
            BacnetError::invalid_object(format!("expected '<objectType>:<instance>', got '{text}'"))
        })?;

        let object_type = ObjectType::parse(type_part)?;
        let instance = instance_part.parse::<u32>().map_err(|_| {
            BacnetError::invalid_object(format!("instance '{instance_part}' is not a number"))
        })?;

        Self::new(object_type, instance)
    }

    /// Pack into the 32-bit wire form `(type << 22) | instance`
    pub fn encode(&self) -> u32 {
        (u32::from(self.object_type.code()) << 22) | self.instance
    }

    /// Unpack the 32-bit wire form; unknown type codes are rejected
    pub fn decode(raw: u32) -> BacnetResult<Self> {
        let type_code = (raw >> 22) as u16;
        let object_type = ObjectType::from_code(type_code).ok_or_else(|| {
            BacnetError::invalid_object(format!("unknown object type code {type_code}"))
        })?;
        Ok(Self {
            object_type,
            instance: raw & MAX_INSTANCE,
        })
    }

    /// Shorthand for the device object of a given instance
    pub fn device(instance: u32) -> BacnetResult<Self> {
        Self::new(ObjectType::Device, instance)
    }
}

impl fmt::Display for ObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.instance)
    }
}

impl std::str::FromStr for ObjectIdentifier {
    type Err = BacnetError;

    fn from_str(s: &str) -> BacnetResult<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_form() {
        let id = ObjectIdentifier::parse("analogInput:1").unwrap();
        assert_eq!(id.object_type, ObjectType::AnalogInput);
        assert_eq!(id.instance, 1);
        assert_eq!(id.to_string(), "analogInput:1");
    }

    #[test]
    fn test_instance_range() {
        assert!(ObjectIdentifier::new(ObjectType::Device, MAX_INSTANCE).is_ok());
        assert!(matches!(
            ObjectIdentifier::new(ObjectType::Device, MAX_INSTANCE + 1),
            Err(BacnetError::InvalidObjectIdentifier(_))
        ));
        assert!(ObjectIdentifier::parse("analogInput:4194304").is_err());
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(matches!(
            ObjectIdentifier::parse("analogueInput:1"),
            Err(BacnetError::InvalidObjectIdentifier(_))
        ));
        assert!(ObjectIdentifier::parse("analogInput").is_err());
        assert!(ObjectIdentifier::parse("analogInput:abc").is_err());
    }

    #[test]
    fn test_wire_round_trip() {
        let id = ObjectIdentifier::new(ObjectType::Device, 999_999).unwrap();
        assert_eq!(id.encode(), (8 << 22) | 999_999);
        assert_eq!(ObjectIdentifier::decode(id.encode()).unwrap(), id);
    }

    #[test]
    fn test_type_code_round_trip() {
        for name in [
            "analogInput",
            "binaryOutput",
            "multiStateValue",
            "device",
            "trendLog",
            "lifeSafetyZone",
        ] {
            let t = ObjectType::parse(name).unwrap();
            assert_eq!(ObjectType::from_code(t.code()), Some(t));
            assert_eq!(t.name(), name);
        }
    }

    #[test]
    fn test_commandable_set() {
        assert!(ObjectType::AnalogOutput.is_commandable());
        assert!(ObjectType::BinaryOutput.is_commandable());
        assert!(!ObjectType::AnalogInput.is_commandable());
        assert!(!ObjectType::Device.is_commandable());
    }
}
