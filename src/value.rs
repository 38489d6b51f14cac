//! Runtime values and decoded structure instances.

use crate::ast::{BaseType, FieldType, StructDef};
use std::collections::BTreeMap;
use std::fmt;

/// A single decoded value (field, collection element or compound).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Unset: optional structure, unread switch field, lenient unresolved variant.
    Null,
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    Enum { name: String, index: u64 },
    Struct(Instance),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// Discriminated union: the tag that was read and the arm it selected.
    Variant { tag: Box<Value>, value: Box<Value> },
}

impl Value {
    /// Zero value for a field of this type.
    pub fn default_for(ty: &FieldType) -> Value {
        match ty {
            FieldType::Base(b) => match b {
                BaseType::Bool => Value::Bool(false),
                BaseType::I8 => Value::I8(0),
                BaseType::U8 => Value::U8(0),
                BaseType::I16 => Value::I16(0),
                BaseType::U16 => Value::U16(0),
                BaseType::I32 => Value::I32(0),
                BaseType::U32 => Value::U32(0),
                BaseType::I64 => Value::I64(0),
                BaseType::U64 => Value::U64(0),
                BaseType::Float => Value::Float(0.0),
                BaseType::Double => Value::Double(0.0),
            },
            FieldType::String | FieldType::MinString => Value::String(String::new()),
            FieldType::Bytes => Value::Bytes(Vec::new()),
            FieldType::List(_) => Value::List(Vec::new()),
            FieldType::Map(_) => Value::Map(BTreeMap::new()),
            _ => Value::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::U8(x) => Some(*x as u64),
            Value::U16(x) => Some(*x as u64),
            Value::U32(x) => Some(*x as u64),
            Value::U64(x) => Some(*x),
            Value::I8(x) if *x >= 0 => Some(*x as u64),
            Value::I16(x) if *x >= 0 => Some(*x as u64),
            Value::I32(x) if *x >= 0 => Some(*x as u64),
            Value::I64(x) if *x >= 0 => Some(*x as u64),
            Value::Enum { index, .. } => Some(*index),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I8(x) => Some(*x as i64),
            Value::I16(x) => Some(*x as i64),
            Value::I32(x) => Some(*x as i64),
            Value::I64(x) => Some(*x),
            Value::U8(x) => Some(*x as i64),
            Value::U16(x) => Some(*x as i64),
            Value::U32(x) => Some(*x as i64),
            Value::U64(x) => Some(*x as i64),
            Value::Bool(b) => Some(*b as i64),
            Value::Enum { index, .. } => Some(*index as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x as f64),
            Value::Double(x) => Some(*x),
            _ => self.as_i64().map(|n| n as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            Value::Enum { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&Instance> {
        match self {
            Value::Struct(i) => Some(i),
            Value::Variant { value, .. } => value.as_struct(),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(x) => write!(f, "{}", x),
            Value::I8(x) => write!(f, "{}", x),
            Value::U8(x) => write!(f, "{}", x),
            Value::I16(x) => write!(f, "{}", x),
            Value::U16(x) => write!(f, "{}", x),
            Value::I32(x) => write!(f, "{}", x),
            Value::U32(x) => write!(f, "{}", x),
            Value::I64(x) => write!(f, "{}", x),
            Value::U64(x) => write!(f, "{}", x),
            Value::Float(x) => write!(f, "{}", x),
            Value::Double(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Bytes(b) => {
                write!(f, "hex(")?;
                for (i, x) in b.iter().take(32).enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{:02x}", x)?;
                }
                if b.len() > 32 {
                    write!(f, " ...")?;
                }
                write!(f, ")")
            }
            Value::Enum { name, .. } => write!(f, "{}", name),
            Value::Struct(i) => write!(f, "{} {{..}}", i.type_name()),
            Value::List(v) => write!(f, "[{} item(s)]", v.len()),
            Value::Map(m) => write!(f, "{{{} entry(ies)}}", m.len()),
            Value::Variant { tag, value } => write!(f, "{} => {}", tag, value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Not reached yet; expressions may not read it.
    Pending,
    /// Read condition was false; holds its default value.
    Skipped,
    /// Collection whose elements are still being read. Expressions see the
    /// elements read so far.
    Filling,
    Decoded,
}

#[derive(Debug, Clone)]
pub struct Slot {
    pub name: String,
    pub value: Value,
    pub state: SlotState,
}

/// A decoded (or in-progress) structure: one slot per descriptor, in declared order.
#[derive(Debug, Clone)]
pub struct Instance {
    type_name: String,
    slots: Vec<Slot>,
}

impl Instance {
    /// Zero-valued instance with every slot pending.
    pub fn new(def: &StructDef) -> Self {
        Instance {
            type_name: def.name.clone(),
            slots: def
                .fields
                .iter()
                .map(|c| Slot {
                    name: c.name.clone(),
                    value: Value::default_for(&c.field_type),
                    state: SlotState::Pending,
                })
                .collect(),
        }
    }

    /// Empty instance to be filled with [`Instance::with`] (tests, hand-built values).
    pub fn named(type_name: &str) -> Self {
        Instance { type_name: type_name.to_string(), slots: Vec::new() }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, name: &str) -> Option<&Slot> {
        self.slots.iter().find(|s| s.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.slot(name).map(|s| &s.value)
    }

    pub fn state(&self, name: &str) -> Option<SlotState> {
        self.slot(name).map(|s| s.state)
    }

    /// Sets an existing slot, or appends one. Returns `false` when the slot was appended.
    pub fn set(&mut self, name: &str, value: Value) -> bool {
        if let Some(slot) = self.slots.iter_mut().find(|s| s.name == name) {
            slot.value = value;
            slot.state = SlotState::Decoded;
            true
        } else {
            self.slots.push(Slot {
                name: name.to_string(),
                value,
                state: SlotState::Decoded,
            });
            false
        }
    }

    pub fn with(mut self, name: &str, value: Value) -> Self {
        self.set(name, value);
        self
    }

    pub(crate) fn set_at(&mut self, index: usize, value: Value) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.value = value;
            slot.state = SlotState::Decoded;
        }
    }

    /// Puts an empty collection in slot `index` and marks it as filling.
    pub(crate) fn begin_collection(&mut self, index: usize, empty: Value) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.value = empty;
            slot.state = SlotState::Filling;
        }
    }

    /// Appends an element to the collection in slot `index`. Map elements need a key.
    pub(crate) fn append_at(&mut self, index: usize, key: Option<String>, element: Value) -> bool {
        match (self.slots.get_mut(index).map(|s| &mut s.value), key) {
            (Some(Value::List(items)), None) => items.push(element),
            (Some(Value::Map(entries)), Some(key)) => {
                entries.insert(key, element);
            }
            _ => return false,
        }
        true
    }

    /// Moves the value out of slot `index`, leaving `Null` behind.
    pub(crate) fn take_at(&mut self, index: usize) -> Option<Value> {
        self.slots.get_mut(index).map(|s| std::mem::replace(&mut s.value, Value::Null))
    }

    pub(crate) fn mark_decoded(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.state = SlotState::Decoded;
        }
    }

    pub(crate) fn slot_index(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.name == name)
    }

    pub(crate) fn mark_skipped(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.state = SlotState::Skipped;
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.slots.iter().map(|s| (s.name.as_str(), &s.value))
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }
}

/// Instances compare by type name and field values; slot state is ignored.
impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        self.type_name == other.type_name
            && self.slots.len() == other.slots.len()
            && self
                .slots
                .iter()
                .zip(&other.slots)
                .all(|(a, b)| a.name == b.name && a.value == b.value)
    }
}
