//! Read-context stack: the structures currently being decoded, innermost on top.
//!
//! Expressions resolve their operands here. A frame is pushed when a structure
//! starts decoding and popped when it completes, so stack depth always equals
//! structure nesting depth.

use crate::dispatch::map_key;
use crate::error::DecodeError;
use crate::expr::{FrameRef, Operand, Scalar};
use crate::value::{Instance, SlotState, Value};
use std::borrow::Cow;

#[derive(Debug, Default)]
pub struct ContextStack<'a> {
    frames: Vec<Cow<'a, Instance>>,
}

impl<'a> ContextStack<'a> {
    pub fn new() -> Self {
        ContextStack { frames: Vec::new() }
    }

    pub fn push(&mut self, instance: Instance) {
        self.frames.push(Cow::Owned(instance));
    }

    /// Push an instance the caller keeps ownership of (encoder, map keys).
    pub fn push_borrowed(&mut self, instance: &'a Instance) {
        self.frames.push(Cow::Borrowed(instance));
    }

    pub fn pop(&mut self) -> Option<Instance> {
        self.frames.pop().map(Cow::into_owned)
    }

    /// Drops the top frame without handing it back.
    pub fn pop_frame(&mut self) -> bool {
        self.frames.pop().is_some()
    }

    /// Frame `depth` levels below the top (`0` is the top).
    pub fn peek(&self, depth: usize) -> Option<&Instance> {
        let len = self.frames.len();
        if depth >= len {
            return None;
        }
        Some(self.frames[len - 1 - depth].as_ref())
    }

    pub fn top_mut(&mut self) -> Option<&mut Instance> {
        self.frames.last_mut().map(Cow::to_mut)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Nearest frame of the given structure type.
    pub fn find(&self, type_name: &str) -> Option<&Instance> {
        self.frames.iter().rev().map(|f| f.as_ref()).find(|f| f.type_name() == type_name)
    }

    pub fn resolve(&self, operand: &Operand) -> Result<&Value, DecodeError> {
        let unresolved = |reason: String| DecodeError::UnresolvedOperand {
            operand: operand.to_string(),
            reason,
        };
        let (first, rest) = operand
            .path
            .split_first()
            .ok_or_else(|| unresolved("empty operand".to_string()))?;

        match operand.frame {
            FrameRef::Depth(d) => {
                let frame = self.peek(d).ok_or_else(|| {
                    unresolved(format!("stack depth {} out of range ({} frame(s))", d, self.depth()))
                })?;
                let v = decoded_field(frame, first).map_err(unresolved)?;
                walk(v, rest).map_err(unresolved)
            }
            FrameRef::Auto => {
                if let Some(frame) = self.frames.iter().rev().find(|f| f.slot(first).is_some()) {
                    let v = decoded_field(frame, first).map_err(unresolved)?;
                    return walk(v, rest).map_err(unresolved);
                }
                if let Some((field, rest)) = rest.split_first() {
                    if let Some(frame) = self.find(first) {
                        let v = decoded_field(frame, field).map_err(unresolved)?;
                        return walk(v, rest).map_err(unresolved);
                    }
                }
                Err(unresolved(format!("no such field in {} frame(s)", self.depth())))
            }
        }
    }
}

fn decoded_field<'v>(frame: &'v Instance, name: &str) -> Result<&'v Value, String> {
    let slot = frame
        .slot(name)
        .ok_or_else(|| format!("{} has no field `{}`", frame.type_name(), name))?;
    if slot.state == SlotState::Pending {
        return Err(format!("{}.{} has not been decoded yet", frame.type_name(), name));
    }
    Ok(&slot.value)
}

fn walk<'v>(mut v: &'v Value, path: &[String]) -> Result<&'v Value, String> {
    for seg in path {
        v = select_field(v, seg)?;
    }
    Ok(v)
}

/// One `.name` step into a decoded value.
pub(crate) fn select_field<'v>(v: &'v Value, seg: &str) -> Result<&'v Value, String> {
    match v {
        Value::Struct(inst) => decoded_field(inst, seg),
        Value::Variant { value, .. } => match value.as_ref() {
            Value::Struct(inst) => decoded_field(inst, seg),
            _ => Err(format!("cannot select `{}` from a non-structure variant", seg)),
        },
        Value::Map(m) => m.get(seg).ok_or_else(|| format!("no map entry `{}`", seg)),
        Value::List(items) => {
            let i: usize = seg.parse().map_err(|_| format!("`{}` is not a list index", seg))?;
            items.get(i).ok_or_else(|| format!("list index {} out of range", i))
        }
        Value::Null => Err(format!("cannot select `{}` from an unset value", seg)),
        _ => Err(format!("cannot select `{}` from a scalar", seg)),
    }
}

/// One `[key]` step: a list position or a map key.
pub(crate) fn select_element<'v>(v: &'v Value, key: &Scalar) -> Result<&'v Value, String> {
    match v {
        Value::List(items) => {
            let i = key
                .as_int()
                .filter(|i| *i >= 0)
                .ok_or_else(|| format!("{} is not a list index", key))?;
            items
                .get(i as usize)
                .ok_or_else(|| format!("list index {} out of range ({} element(s))", i, items.len()))
        }
        Value::Map(m) => {
            let k = map_key(key.clone());
            m.get(&k).ok_or_else(|| format!("no map entry `{}`", k))
        }
        Value::Variant { value, .. } => select_element(value, key),
        Value::Null => Err(format!("cannot index an unset value with {}", key)),
        _ => Err(format!("cannot index a scalar with {}", key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(type_name: &str, fields: &[(&str, Value)]) -> Instance {
        let mut inst = Instance::named(type_name);
        for (n, v) in fields {
            inst.set(n, v.clone());
        }
        inst
    }

    #[test]
    fn lifo_and_peek_by_depth() {
        let mut stack = ContextStack::new();
        stack.push(frame("Outer", &[]));
        stack.push(frame("Inner", &[]));
        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.peek(0).map(|f| f.type_name()), Some("Inner"));
        assert_eq!(stack.peek(1).map(|f| f.type_name()), Some("Outer"));
        assert!(stack.peek(2).is_none());
        assert_eq!(stack.pop().map(|f| f.type_name().to_string()), Some("Inner".to_string()));
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn resolves_ancestor_fields() {
        let mut stack = ContextStack::new();
        stack.push(frame("Outer", &[("count", Value::U16(3))]));
        stack.push(frame("Inner", &[("x", Value::U8(1))]));
        assert_eq!(stack.resolve(&Operand::field("count")).unwrap(), &Value::U16(3));
        assert_eq!(stack.resolve(&Operand::field("Outer.count")).unwrap(), &Value::U16(3));
        assert_eq!(stack.resolve(&Operand::at_depth(1, "count")).unwrap(), &Value::U16(3));
        assert!(stack.resolve(&Operand::at_depth(0, "count")).is_err());
        assert!(stack.resolve(&Operand::at_depth(5, "count")).is_err());
    }

    #[test]
    fn pending_field_is_unresolved() {
        use crate::ast::{BaseType, ChunkDescriptor, FieldType, StructDef};
        let def = StructDef::new("T")
            .field(ChunkDescriptor::new("a", FieldType::Base(BaseType::U8)))
            .field(ChunkDescriptor::new("b", FieldType::Base(BaseType::U8)));
        let mut inst = Instance::new(&def);
        inst.set_at(0, Value::U8(9));
        let mut stack = ContextStack::new();
        stack.push(inst);
        assert_eq!(stack.resolve(&Operand::field("a")).unwrap(), &Value::U8(9));
        let err = stack.resolve(&Operand::field("b")).unwrap_err();
        assert!(matches!(err, DecodeError::UnresolvedOperand { .. }));
    }

    #[test]
    fn walks_into_decoded_structures() {
        let header = frame("Header", &[("channels", Value::I16(3))]);
        let mut stack = ContextStack::new();
        stack.push(frame("File", &[("header", Value::Struct(header))]));
        assert_eq!(stack.resolve(&Operand::field("header.channels")).unwrap(), &Value::I16(3));
    }

    #[test]
    fn indexes_lists_and_maps() {
        let list = Value::List(vec![Value::U8(4), Value::U8(5)]);
        assert_eq!(select_element(&list, &Scalar::Int(1)).unwrap(), &Value::U8(5));
        assert!(select_element(&list, &Scalar::Int(2)).is_err());
        assert!(select_element(&list, &Scalar::Int(-1)).is_err());

        let mut entries = std::collections::BTreeMap::new();
        entries.insert("1005".to_string(), Value::U16(7));
        let map = Value::Map(entries);
        assert_eq!(select_element(&map, &Scalar::Int(1005)).unwrap(), &Value::U16(7));
    }
}
