//! Encoder paired with the decode driver: writes an [`Instance`] back to bytes so
//! that decoding the output yields the same instance.
//!
//! Unset values (`Value::Null` or a missing slot) are written as the zero value of
//! the field type. Scoped fields are zero-padded to their byte count.

use crate::ast::{BaseType, ChunkDescriptor, FieldType, ResolvedSchema, StructDef, UnionSpec};
use crate::codec::{DecoderOptions, VariantPolicy};
use crate::context::ContextStack;
use crate::dispatch::{enum_width, literal_scalar, Strategy};
use crate::error::{DecodeError, EncodeError};
use crate::expr::Scalar;
use crate::stream::RangedWriter;
use crate::value::{Instance, Value};
use std::collections::BTreeMap;
use std::io::Write;

static NULL: Value = Value::Null;

#[derive(Debug, Clone)]
pub struct Encoder<'s> {
    schema: &'s ResolvedSchema,
    options: DecoderOptions,
}

impl<'s> Encoder<'s> {
    pub fn new(schema: &'s ResolvedSchema) -> Self {
        Encoder::with_options(schema, DecoderOptions::default())
    }

    pub fn with_options(schema: &'s ResolvedSchema, options: DecoderOptions) -> Self {
        Encoder { schema, options }
    }

    pub fn encode(&self, inst: &Instance) -> Result<Vec<u8>, EncodeError> {
        let mut w = RangedWriter::new(Vec::new(), self.options.endianness);
        self.encode_into(inst, &mut w)?;
        Ok(w.into_inner())
    }

    pub fn encode_into<W: Write>(&self, inst: &Instance, w: &mut RangedWriter<W>) -> Result<(), EncodeError> {
        let def = self
            .schema
            .get_struct(inst.type_name())
            .ok_or_else(|| EncodeError::UnknownStruct(inst.type_name().to_string()))?;
        let mut stack = ContextStack::new();
        self.encode_struct(def, inst, w, &mut stack)
    }

    fn encode_struct<'a, W: Write>(
        &self,
        def: &StructDef,
        inst: &'a Instance,
        w: &mut RangedWriter<W>,
        stack: &mut ContextStack<'a>,
    ) -> Result<(), EncodeError> {
        if stack.depth() >= self.options.max_depth {
            return Err(DecodeError::NestingTooDeep(self.options.max_depth).into());
        }
        stack.push_borrowed(inst);
        let outcome = self.encode_fields(def, inst, w, stack);
        stack.pop_frame();
        outcome
    }

    fn encode_fields<'a, W: Write>(
        &self,
        def: &StructDef,
        inst: &'a Instance,
        w: &mut RangedWriter<W>,
        stack: &mut ContextStack<'a>,
    ) -> Result<(), EncodeError> {
        for chunk in &def.fields {
            let stop = self
                .encode_field(chunk, inst.get(&chunk.name).unwrap_or(&NULL), w, stack)
                .map_err(|e| e.in_field(&def.name, &chunk.name))?;
            if stop {
                break;
            }
        }
        Ok(())
    }

    fn encode_field<'a, W: Write>(
        &self,
        chunk: &ChunkDescriptor,
        value: &'a Value,
        w: &mut RangedWriter<W>,
        stack: &mut ContextStack<'a>,
    ) -> Result<bool, EncodeError> {
        if let Some(cond) = &chunk.read_if {
            if !cond.eval_bool(stack)? {
                return Ok(false);
            }
        }
        let byte_count = match &chunk.byte_count {
            Some(count) => Some(count.resolve(stack)?),
            None => None,
        };
        let field_scope = byte_count.filter(|_| !chunk.scopes_elements());
        if let Some(n) = field_scope {
            w.push_range(n)?;
        }
        match Strategy::for_type(&chunk.field_type)? {
            Strategy::List(elem) | Strategy::Map(elem) => {
                self.write_elements(chunk, elem, value, byte_count, w, stack)?
            }
            _ => self.write_typed(chunk, &chunk.field_type, value, byte_count, w, stack)?,
        }
        if field_scope.is_some() {
            w.pop_range()?;
        }
        Ok(match &chunk.stop_if {
            Some(cond) => cond.eval_bool(stack)?,
            None => false,
        })
    }

    /// Writes the elements in order. The frame's collection is rebuilt as it goes,
    /// so expressions see the elements written so far, as they do when decoding.
    fn write_elements<'a, W: Write>(
        &self,
        chunk: &ChunkDescriptor,
        elem: &FieldType,
        value: &'a Value,
        byte_count: Option<u64>,
        w: &mut RangedWriter<W>,
        stack: &mut ContextStack<'a>,
    ) -> Result<(), EncodeError> {
        let items: Vec<(Option<&'a String>, &'a Value)> = match value {
            Value::List(items) => items.iter().map(|v| (None, v)).collect(),
            Value::Map(entries) => entries.iter().map(|(k, v)| (Some(k), v)).collect(),
            Value::Null => Vec::new(),
            other => return Err(mismatch("collection", other)),
        };
        if let Some(count) = &chunk.size {
            let declared = count.resolve(stack)?;
            if declared != items.len() as u64 {
                return Err(EncodeError::CountMismatch { declared, actual: items.len() as u64 });
            }
        }
        let element_bytes = byte_count.filter(|_| chunk.scopes_elements());
        let empty = match chunk.field_type {
            FieldType::Map(_) => Value::Map(BTreeMap::new()),
            _ => Value::List(Vec::new()),
        };
        let slot = stack.top_mut().and_then(|top| {
            let index = top.slot_index(&chunk.name)?;
            top.begin_collection(index, empty);
            Some(index)
        });
        for (i, (key, item)) in items.into_iter().enumerate() {
            self.write_element(chunk, elem, item, element_bytes, w, stack)
                .map_err(|e| e.in_field("", &format!("[{}]", i)))?;
            if let (Some(index), Some(top)) = (slot, stack.top_mut()) {
                top.append_at(index, key.cloned(), item.clone());
            }
        }
        if let (Some(index), Some(top)) = (slot, stack.top_mut()) {
            top.mark_decoded(index);
        }
        Ok(())
    }

    fn write_element<'a, W: Write>(
        &self,
        chunk: &ChunkDescriptor,
        elem: &FieldType,
        item: &'a Value,
        element_bytes: Option<u64>,
        w: &mut RangedWriter<W>,
        stack: &mut ContextStack<'a>,
    ) -> Result<(), EncodeError> {
        match element_bytes {
            Some(n) => {
                w.push_range(n)?;
                self.write_typed(chunk, elem, item, Some(n), w, stack)?;
                w.pop_range()
            }
            None => self.write_typed(chunk, elem, item, None, w, stack),
        }
    }

    fn write_typed<'a, W: Write>(
        &self,
        chunk: &ChunkDescriptor,
        ty: &FieldType,
        value: &'a Value,
        byte_count: Option<u64>,
        w: &mut RangedWriter<W>,
        stack: &mut ContextStack<'a>,
    ) -> Result<(), EncodeError> {
        match Strategy::for_type(ty)? {
            Strategy::Primitive(b) => write_base(w, b, value, byte_count),
            Strategy::Text => w.write_bytes(&chunk.encoding.encode(text(value)?)),
            Strategy::MinText if value.is_null() => {
                w.write_u32(0)?;
                w.write_zeros(4)
            }
            Strategy::MinText => {
                let bytes = chunk.encoding.encode(text(value)?);
                // Anything shorter than four bytes would decode with trailing NULs.
                if bytes.len() < 4 {
                    return Err(mismatch("string of at least 4 bytes", value));
                }
                // Four-character ids are stored with a zero length.
                let len = if bytes.len() == 4 { 0 } else { bytes.len() as u32 };
                w.write_u32(len)?;
                w.write_bytes(&bytes)
            }
            Strategy::Raw => match value {
                Value::Bytes(b) => w.write_bytes(b),
                Value::Null => Ok(()),
                other => Err(mismatch("bytes", other)),
            },
            Strategy::Skip => w.write_zeros(byte_count.unwrap_or(0)),
            Strategy::Enum(i) => {
                let def = self
                    .schema
                    .enum_at(i)
                    .ok_or_else(|| EncodeError::UnknownStruct(format!("enum #{}", i)))?;
                let index = match value {
                    Value::Enum { name, index } => def.index_of(name).map(|i| i as u64).unwrap_or(*index),
                    Value::Null => 0,
                    other => other.as_u64().ok_or_else(|| mismatch(&def.name, other))?,
                };
                w.write_uint(index, enum_width(byte_count) as usize)
            }
            Strategy::Nested(i) => {
                let def = self
                    .schema
                    .struct_at(i)
                    .ok_or_else(|| EncodeError::UnknownStruct(format!("struct #{}", i)))?;
                match value {
                    Value::Struct(inst) => self.encode_struct(def, inst, w, stack),
                    other => Err(mismatch(&def.name, other)),
                }
            }
            Strategy::Switched => {
                let mut target = None;
                for case in &chunk.switch {
                    if case.test.eval_bool(stack)? {
                        target = Some(&case.target);
                        break;
                    }
                }
                match target {
                    Some(t) => self.write_typed(chunk, t, value, byte_count, w, stack),
                    None => self.unresolved(format!("no switch case of `{}` matched", chunk.name), value),
                }
            }
            Strategy::Tagged(spec) => self.write_union(chunk, spec, value, w, stack),
            Strategy::List(_) | Strategy::Map(_) => Err(mismatch("plain value", value)),
        }
    }

    fn write_union<'a, W: Write>(
        &self,
        chunk: &ChunkDescriptor,
        spec: &UnionSpec,
        value: &'a Value,
        w: &mut RangedWriter<W>,
        stack: &mut ContextStack<'a>,
    ) -> Result<(), EncodeError> {
        let (tag, inner) = match value {
            Value::Variant { tag, value } => (tag.as_ref(), value.as_ref()),
            other => return Err(mismatch("union variant", other)),
        };
        self.write_typed(chunk, &spec.tag.tag_type, tag, spec.tag.byte_count, w, stack)?;
        let key = Scalar::from_value(tag);
        match spec.arms.iter().find(|(lit, _)| literal_scalar(lit).loose_eq(&key)) {
            Some((_, ty)) => self.write_typed(chunk, ty, inner, None, w, stack),
            None => self.unresolved(format!("`{}` has no arm for tag {}", chunk.name, tag), inner),
        }
    }

    fn unresolved(&self, message: String, value: &Value) -> Result<(), EncodeError> {
        match (self.options.variant_policy, value) {
            (VariantPolicy::Lenient, Value::Null) => Ok(()),
            _ => Err(EncodeError::UnresolvedVariant(message)),
        }
    }
}

fn mismatch(expected: &str, found: &Value) -> EncodeError {
    EncodeError::TypeMismatch { expected: expected.to_string(), found: found.to_string() }
}

fn text(value: &Value) -> Result<&str, EncodeError> {
    match value {
        Value::String(s) => Ok(s),
        Value::Null => Ok(""),
        other => Err(mismatch("string", other)),
    }
}

fn write_base<W: Write>(
    w: &mut RangedWriter<W>,
    b: BaseType,
    value: &Value,
    byte_count: Option<u64>,
) -> Result<(), EncodeError> {
    if b.is_float() {
        let x = match value {
            Value::Null => 0.0,
            other => other.as_f64().ok_or_else(|| mismatch("float", other))?,
        };
        return match (b, byte_count) {
            (BaseType::Float, _) | (BaseType::Double, Some(4)) => w.write_f32(x as f32),
            _ => w.write_f64(x),
        };
    }
    let raw = match value {
        Value::Null => 0,
        Value::U64(x) => *x,
        other => other.as_i64().ok_or_else(|| mismatch(&format!("{:?}", b), other))? as u64,
    };
    let natural = b.width();
    let width = match (b, byte_count) {
        (BaseType::Bool, Some(n)) => n.min(8),
        (_, Some(n)) if n < natural => n,
        _ => natural,
    };
    let raw = if b == BaseType::Bool { (raw != 0) as u64 } else { raw };
    w.write_uint(raw, width as usize)
}

/// Encode `inst` with default options.
pub fn encode(schema: &ResolvedSchema, inst: &Instance) -> Result<Vec<u8>, EncodeError> {
    Encoder::new(schema).encode(inst)
}
