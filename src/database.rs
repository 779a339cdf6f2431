//! In-memory object database
//!
//! Holds the points a device exposes: named objects with typed present
//! values, arbitrary extra properties, a priority array for commandable
//! points and a bounded log buffer for trend logs. Object order is the
//! insertion order, which is what `objectList` reports.

use crate::error::{BacnetError, BacnetResult};
use crate::object::ObjectIdentifier;
use crate::trend::TrendRecord;
use crate::value::{BacnetValue, PriorityArray, ValueKind};
use std::collections::{HashMap, VecDeque};

/// Default capacity of a trend log buffer
pub const DEFAULT_LOG_CAPACITY: usize = 200;

/// One object held by the database
#[derive(Debug, Clone)]
pub struct ObjectEntry {
    id: ObjectIdentifier,
    kind: ValueKind,
    properties: HashMap<String, BacnetValue>,
    priority_array: Option<PriorityArray>,
    log_buffer: Option<VecDeque<TrendRecord>>,
    log_capacity: usize,
}

impl ObjectEntry {
    /// Create an entry with its object name set; the present value is added
    /// with [`with_present_value`](Self::with_present_value)
    pub fn new(id: ObjectIdentifier, name: impl Into<String>, kind: ValueKind) -> Self {
        let mut properties = HashMap::new();
        properties.insert(
            "objectName".to_string(),
            BacnetValue::CharacterString(name.into()),
        );
        Self {
            id,
            kind,
            properties,
            priority_array: None,
            log_buffer: None,
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }

    /// Set the initial present value
    ///
    /// Commandable types get an empty priority array with this value as the
    /// relinquish default; everything else stores it as a plain property.
    pub fn with_present_value(mut self, value: BacnetValue) -> Self {
        if self.id.object_type.is_commandable() {
            self.priority_array = Some(PriorityArray::new(value));
        } else {
            self.properties.insert("presentValue".to_string(), value);
        }
        self
    }

    /// Attach an extra property (units, description, stateText, ...)
    pub fn with_property(mut self, name: impl Into<String>, value: BacnetValue) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    /// Attach an empty trend log buffer
    pub fn with_log_buffer(mut self, capacity: usize) -> Self {
        self.log_buffer = Some(VecDeque::with_capacity(capacity.min(1024)));
        self.log_capacity = capacity;
        self
    }

    pub fn id(&self) -> ObjectIdentifier {
        self.id
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Object name, always present
    pub fn name(&self) -> &str {
        match self.properties.get("objectName") {
            Some(BacnetValue::CharacterString(s)) => s,
            _ => "",
        }
    }

    pub fn is_commandable(&self) -> bool {
        self.priority_array.is_some()
    }

    pub fn priority_array(&self) -> Option<&PriorityArray> {
        self.priority_array.as_ref()
    }

    fn type_mismatch(&self, value: &BacnetValue) -> BacnetError {
        BacnetError::type_mismatch(format!(
            "{} holds {:?}, cannot accept {value}",
            self.id, self.kind
        ))
    }
}

/// The set of objects a device exposes
#[derive(Debug, Clone, Default)]
pub struct ObjectDatabase {
    order: Vec<ObjectIdentifier>,
    entries: HashMap<ObjectIdentifier, ObjectEntry>,
}

impl ObjectDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an object; duplicate identifiers are rejected
    pub fn insert(&mut self, entry: ObjectEntry) -> BacnetResult<()> {
        let id = entry.id;
        if self.entries.contains_key(&id) {
            return Err(BacnetError::invalid_object(format!(
                "{id} is already registered"
            )));
        }
        self.order.push(id);
        self.entries.insert(id, entry);
        Ok(())
    }

    pub fn contains(&self, id: &ObjectIdentifier) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Registered identifiers in insertion order
    pub fn list_objects(&self) -> Vec<ObjectIdentifier> {
        self.order.clone()
    }

    pub fn entry(&self, id: &ObjectIdentifier) -> Option<&ObjectEntry> {
        self.entries.get(id)
    }

    fn lookup(&self, id: &ObjectIdentifier) -> BacnetResult<&ObjectEntry> {
        self.entries
            .get(id)
            .ok_or_else(|| BacnetError::unknown_property(format!("{id} is not registered")))
    }

    fn lookup_mut(&mut self, id: &ObjectIdentifier) -> BacnetResult<&mut ObjectEntry> {
        self.entries
            .get_mut(id)
            .ok_or_else(|| BacnetError::unknown_property(format!("{id} is not registered")))
    }

    /// Read a property value
    ///
    /// `presentValue` of a commandable point resolves through the priority
    /// array. `relinquishDefault` and `recordCount` are derived, everything
    /// else is a stored property.
    pub fn get(&self, id: &ObjectIdentifier, property: &str) -> BacnetResult<BacnetValue> {
        let entry = self.lookup(id)?;
        match property {
            "presentValue" => {
                if let Some(arr) = &entry.priority_array {
                    return Ok(arr.effective_value().clone());
                }
            }
            "relinquishDefault" => {
                if let Some(arr) = &entry.priority_array {
                    return Ok(arr.relinquish_default().clone());
                }
            }
            "recordCount" => {
                if let Some(log) = &entry.log_buffer {
                    return Ok(BacnetValue::Unsigned(log.len() as u32));
                }
            }
            _ => {}
        }
        entry.properties.get(property).cloned().ok_or_else(|| {
            BacnetError::unknown_property(format!("{id} has no property '{property}'"))
        })
    }

    /// Write a property value
    ///
    /// A priority routes the write through the priority array (commandable
    /// presentValue only; Null relinquishes the slot). Without a priority the
    /// property is written directly; on a commandable point that replaces the
    /// relinquish default.
    pub fn set(
        &mut self,
        id: &ObjectIdentifier,
        property: &str,
        value: BacnetValue,
        priority: Option<u8>,
    ) -> BacnetResult<()> {
        let entry = self.lookup_mut(id)?;

        if let Some(priority) = priority {
            PriorityArray::check_priority(priority)?;
            if property != "presentValue" {
                return Err(BacnetError::type_mismatch(format!(
                    "prioritized writes only apply to presentValue, not '{property}'"
                )));
            }
            let mismatch = !matches!(value, BacnetValue::Null)
                && value.kind() != Some(entry.kind);
            if mismatch {
                return Err(entry.type_mismatch(&value));
            }
            let arr = entry.priority_array.as_mut().ok_or_else(|| {
                BacnetError::type_mismatch(format!("{id} does not accept prioritized commands"))
            })?;
            return arr.set(priority, value);
        }

        if property == "presentValue" {
            if value.kind() != Some(entry.kind) {
                return Err(entry.type_mismatch(&value));
            }
            if let Some(arr) = &mut entry.priority_array {
                arr.set_relinquish_default(value);
            } else {
                entry.properties.insert(property.to_string(), value);
            }
            return Ok(());
        }

        if !entry.properties.contains_key(property) {
            return Err(BacnetError::unknown_property(format!(
                "{id} has no property '{property}'"
            )));
        }
        entry.properties.insert(property.to_string(), value);
        Ok(())
    }

    /// Clear a priority slot on a commandable point
    pub fn relinquish(&mut self, id: &ObjectIdentifier, priority: u8) -> BacnetResult<()> {
        self.set(id, "presentValue", BacnetValue::Null, Some(priority))
    }

    /// Append a sample to an object's log buffer, evicting the oldest record
    /// once the capacity is reached
    pub fn append_log(&mut self, id: &ObjectIdentifier, record: TrendRecord) -> BacnetResult<()> {
        let entry = self.lookup_mut(id)?;
        let capacity = entry.log_capacity;
        let log = entry.log_buffer.as_mut().ok_or_else(|| {
            BacnetError::unknown_property(format!("{id} has no log buffer"))
        })?;
        if log.len() >= capacity {
            log.pop_front();
        }
        log.push_back(record);
        Ok(())
    }

    /// Log records oldest first
    pub fn log_records(&self, id: &ObjectIdentifier) -> BacnetResult<Vec<TrendRecord>> {
        let entry = self.lookup(id)?;
        let log = entry.log_buffer.as_ref().ok_or_else(|| {
            BacnetError::unknown_property(format!("{id} has no log buffer"))
        })?;
        Ok(log.iter().cloned().collect())
    }
}
