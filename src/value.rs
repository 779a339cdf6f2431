//! BACnet property values and the priority array
//!
//! `BacnetValue` is the tagged union carried in reads, writes and COV
//! notifications. `PriorityArray` implements the 16-slot command arbitration
//! used by commandable points: the highest-priority (lowest-numbered)
//! populated slot wins, falling back to the relinquish default.

use crate::error::{BacnetError, BacnetResult};
use crate::object::ObjectIdentifier;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of slots in a priority array
pub const PRIORITY_SLOTS: usize = 16;

/// A BACnet application value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum BacnetValue {
    /// Null; written at a priority it relinquishes that slot
    Null,
    /// Binary state (active / inactive)
    Binary(bool),
    /// Analog value (BACnet Real is 32-bit)
    Real(f32),
    /// Unsigned integer (multi-state present values, counters)
    Unsigned(u32),
    /// Enumerated value (reliability, units, system status)
    Enumerated(u32),
    /// Character string
    CharacterString(String),
    /// Ordered list of state-text labels for multi-state points
    StateText(Vec<String>),
}

/// The kind of value an object's present value holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    Binary,
    Real,
    Unsigned,
    Enumerated,
    CharacterString,
    StateText,
}

impl BacnetValue {
    /// Kind of this value; `None` for Null
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            BacnetValue::Null => None,
            BacnetValue::Binary(_) => Some(ValueKind::Binary),
            BacnetValue::Real(_) => Some(ValueKind::Real),
            BacnetValue::Unsigned(_) => Some(ValueKind::Unsigned),
            BacnetValue::Enumerated(_) => Some(ValueKind::Enumerated),
            BacnetValue::CharacterString(_) => Some(ValueKind::CharacterString),
            BacnetValue::StateText(_) => Some(ValueKind::StateText),
        }
    }

    /// Extract an f32, accepting Real only
    pub fn as_real(&self) -> Option<f32> {
        match self {
            BacnetValue::Real(v) => Some(*v),
            _ => None,
        }
    }

    /// Extract a binary state
    pub fn as_binary(&self) -> Option<bool> {
        match self {
            BacnetValue::Binary(v) => Some(*v),
            _ => None,
        }
    }

    /// Extract an unsigned value (Unsigned or Enumerated)
    pub fn as_unsigned(&self) -> Option<u32> {
        match self {
            BacnetValue::Unsigned(v) | BacnetValue::Enumerated(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for BacnetValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BacnetValue::Null => write!(f, "null"),
            BacnetValue::Binary(true) => write!(f, "active"),
            BacnetValue::Binary(false) => write!(f, "inactive"),
            BacnetValue::Real(v) => write!(f, "{v}"),
            BacnetValue::Unsigned(v) | BacnetValue::Enumerated(v) => write!(f, "{v}"),
            BacnetValue::CharacterString(s) => f.write_str(s),
            BacnetValue::StateText(labels) => write!(f, "[{}]", labels.join(", ")),
        }
    }
}

/// A property value together with the object and property it belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyValue {
    pub object_id: ObjectIdentifier,
    pub property: String,
    pub value: BacnetValue,
}

impl PropertyValue {
    pub fn new(object_id: ObjectIdentifier, property: impl Into<String>, value: BacnetValue) -> Self {
        Self {
            object_id,
            property: property.into(),
            value,
        }
    }
}

/// 16-slot command arbitration structure for commandable points
///
/// Priority 1 is the highest precedence. Only priorities 1..=16 are
/// addressable; anything else fails validation before any network I/O.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityArray {
    slots: [Option<BacnetValue>; PRIORITY_SLOTS],
    relinquish_default: BacnetValue,
}

impl PriorityArray {
    /// Create an empty array with the given relinquish default
    pub fn new(relinquish_default: BacnetValue) -> Self {
        Self {
            slots: Default::default(),
            relinquish_default,
        }
    }

    /// Validate a priority argument without touching the array
    pub fn check_priority(priority: u8) -> BacnetResult<usize> {
        if (1..=PRIORITY_SLOTS as u8).contains(&priority) {
            Ok(usize::from(priority) - 1)
        } else {
            Err(BacnetError::priority(priority))
        }
    }

    /// Write a value into a priority slot; Null relinquishes the slot
    pub fn set(&mut self, priority: u8, value: BacnetValue) -> BacnetResult<()> {
        let idx = Self::check_priority(priority)?;
        self.slots[idx] = match value {
            BacnetValue::Null => None,
            other => Some(other),
        };
        Ok(())
    }

    /// Clear a priority slot
    pub fn relinquish(&mut self, priority: u8) -> BacnetResult<()> {
        let idx = Self::check_priority(priority)?;
        self.slots[idx] = None;
        Ok(())
    }

    /// Value at a given slot, if populated
    pub fn slot(&self, priority: u8) -> BacnetResult<Option<&BacnetValue>> {
        let idx = Self::check_priority(priority)?;
        Ok(self.slots[idx].as_ref())
    }

    /// The arbitrated present value: highest populated priority slot, or the
    /// relinquish default when all 16 slots are empty
    pub fn effective_value(&self) -> &BacnetValue {
        self.slots
            .iter()
            .find_map(|s| s.as_ref())
            .unwrap_or(&self.relinquish_default)
    }

    /// Relinquish default used when no slot is populated
    pub fn relinquish_default(&self) -> &BacnetValue {
        &self.relinquish_default
    }

    /// Replace the relinquish default
    pub fn set_relinquish_default(&mut self, value: BacnetValue) {
        self.relinquish_default = value;
    }

    /// True when no slot is populated
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.is_none())
    }
}
