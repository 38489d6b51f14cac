//! Type-reader dispatch: maps a declared field type to a reading strategy and reads
//! one value (or one collection) with it.

use crate::ast::{BaseType, ChunkDescriptor, FieldType, Literal, UnionSpec};
use crate::codec::{Decoder, VariantPolicy};
use crate::context::ContextStack;
use crate::error::DecodeError;
use crate::expr::Scalar;
use crate::stream::RangedReader;
use crate::value::Value;
use std::collections::BTreeMap;
use std::io::BufRead;

/// Width of an enum index unless the byte count is 1 or 2.
const ENUM_WIDTH: u64 = 4;

/// Bytes holding an enum index; wider byte counts leave the rest to the scope pop.
pub(crate) fn enum_width(byte_count: Option<u64>) -> u64 {
    match byte_count {
        Some(n @ (1 | 2)) => n,
        _ => ENUM_WIDTH,
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Strategy<'t> {
    Primitive(BaseType),
    Text,
    MinText,
    Raw,
    Skip,
    Enum(usize),
    Nested(usize),
    List(&'t FieldType),
    Map(&'t FieldType),
    Switched,
    Tagged(&'t UnionSpec),
}

impl<'t> Strategy<'t> {
    pub fn for_type(ty: &'t FieldType) -> Result<Self, DecodeError> {
        Ok(match ty {
            FieldType::Base(b) => Strategy::Primitive(*b),
            FieldType::String => Strategy::Text,
            FieldType::MinString => Strategy::MinText,
            FieldType::Bytes => Strategy::Raw,
            FieldType::Void => Strategy::Skip,
            FieldType::Enum(i) => Strategy::Enum(*i),
            FieldType::Struct(i) => Strategy::Nested(*i),
            FieldType::List(elem) => Strategy::List(elem),
            FieldType::Map(elem) => Strategy::Map(elem),
            FieldType::Any => Strategy::Switched,
            FieldType::Union(spec) => Strategy::Tagged(spec),
            FieldType::Named(name) => {
                return Err(DecodeError::InvalidDescriptor(format!("unresolved type {}", name)))
            }
        })
    }
}

impl Decoder<'_> {
    /// Reads the whole field in slot `index` of the top frame: a single value, or
    /// every element of a collection.
    pub(crate) fn read_field<R: BufRead>(
        &self,
        index: usize,
        chunk: &ChunkDescriptor,
        byte_count: Option<u64>,
        r: &mut RangedReader<R>,
        stack: &mut ContextStack<'_>,
    ) -> Result<Value, DecodeError> {
        match Strategy::for_type(&chunk.field_type)? {
            Strategy::List(elem) => self.read_list(index, chunk, elem, byte_count, r, stack),
            Strategy::Map(elem) => self.read_map(index, chunk, elem, byte_count, r, stack),
            _ => self.read_typed(chunk, &chunk.field_type, byte_count, r, stack),
        }
    }

    pub(crate) fn read_typed<R: BufRead>(
        &self,
        chunk: &ChunkDescriptor,
        ty: &FieldType,
        byte_count: Option<u64>,
        r: &mut RangedReader<R>,
        stack: &mut ContextStack<'_>,
    ) -> Result<Value, DecodeError> {
        match Strategy::for_type(ty)? {
            Strategy::Primitive(b) => read_base(r, b, byte_count),
            Strategy::Text => {
                let bytes = match byte_count {
                    Some(n) => r.read_bytes(n)?,
                    None => r.read_remaining()?,
                };
                Ok(Value::String(chunk.encoding.decode(&bytes)))
            }
            Strategy::MinText => Ok(Value::String(r.read_minimum_string(chunk.encoding)?)),
            Strategy::Raw => Ok(Value::Bytes(match byte_count {
                Some(n) => r.read_bytes(n)?,
                None => r.read_remaining()?,
            })),
            Strategy::Skip => {
                match byte_count {
                    Some(n) => r.skip(n)?,
                    None => r.skip_remaining()?,
                }
                Ok(Value::Null)
            }
            Strategy::Enum(i) => self.read_enum(i, byte_count, r),
            Strategy::Nested(i) => {
                let def = self.struct_at(i)?;
                Ok(Value::Struct(self.decode_struct(def, r, stack)?))
            }
            Strategy::Switched => match self.select_case(chunk, stack)? {
                Some(target) => self.read_typed(chunk, target, byte_count, r, stack),
                None => self.unresolved(format!("no switch case of `{}` matched", chunk.name), Value::Null),
            },
            Strategy::Tagged(spec) => self.read_union(chunk, spec, r, stack),
            Strategy::List(_) | Strategy::Map(_) => Err(DecodeError::InvalidDescriptor(format!(
                "`{}`: collections cannot be nested",
                chunk.name
            ))),
        }
    }

    /// First switch case whose test holds, in declared order.
    fn select_case<'c>(
        &self,
        chunk: &'c ChunkDescriptor,
        stack: &ContextStack<'_>,
    ) -> Result<Option<&'c FieldType>, DecodeError> {
        for case in &chunk.switch {
            if case.test.eval_bool(stack)? {
                return Ok(Some(&case.target));
            }
        }
        Ok(None)
    }

    fn unresolved(&self, message: String, fallback: Value) -> Result<Value, DecodeError> {
        match self.options().variant_policy {
            VariantPolicy::Strict => Err(DecodeError::UnresolvedVariant(message)),
            VariantPolicy::Lenient => {
                log::warn!("{}; leaving field unset", message);
                Ok(fallback)
            }
        }
    }

    fn read_enum<R: BufRead>(
        &self,
        index: usize,
        byte_count: Option<u64>,
        r: &mut RangedReader<R>,
    ) -> Result<Value, DecodeError> {
        let def = self.enum_at(index)?;
        let raw = r.read_uint(enum_width(byte_count) as usize)?;
        let index = if raw < def.variants.len() as u64 {
            raw
        } else {
            log::debug!("{} index {} out of range, using {}", def.name, raw, def.variants[0]);
            0
        };
        Ok(Value::Enum { name: def.variants[index as usize].clone(), index })
    }

    fn read_union<R: BufRead>(
        &self,
        chunk: &ChunkDescriptor,
        spec: &UnionSpec,
        r: &mut RangedReader<R>,
        stack: &mut ContextStack<'_>,
    ) -> Result<Value, DecodeError> {
        let tag = self.read_typed(chunk, &spec.tag.tag_type, spec.tag.byte_count, r, stack)?;
        let key = Scalar::from_value(&tag);
        let arm = spec
            .arms
            .iter()
            .find(|(lit, _)| literal_scalar(lit).loose_eq(&key))
            .map(|(_, ty)| ty);
        let value = match arm {
            Some(ty) => self.read_typed(chunk, ty, None, r, stack)?,
            None => self.unresolved(format!("`{}` has no arm for tag {}", chunk.name, tag), Value::Null)?,
        };
        Ok(Value::Variant { tag: Box::new(tag), value: Box::new(value) })
    }

    fn read_list<R: BufRead>(
        &self,
        index: usize,
        chunk: &ChunkDescriptor,
        elem: &FieldType,
        byte_count: Option<u64>,
        r: &mut RangedReader<R>,
        stack: &mut ContextStack<'_>,
    ) -> Result<Value, DecodeError> {
        fill(stack, index, Value::List(Vec::new()))?;
        self.read_elements(chunk, elem, byte_count, r, stack, |_, v, stack| append(stack, index, None, v))?;
        take(stack, index)
    }

    fn read_map<R: BufRead>(
        &self,
        index: usize,
        chunk: &ChunkDescriptor,
        elem: &FieldType,
        byte_count: Option<u64>,
        r: &mut RangedReader<R>,
        stack: &mut ContextStack<'_>,
    ) -> Result<Value, DecodeError> {
        let key_expr = chunk
            .key
            .as_ref()
            .ok_or_else(|| DecodeError::InvalidDescriptor(format!("map `{}` without key", chunk.name)))?;
        fill(stack, index, Value::Map(BTreeMap::new()))?;
        self.read_elements(chunk, elem, byte_count, r, stack, |i, v, stack| match v {
            Value::Struct(inst) => {
                stack.push(inst);
                let key = key_expr.eval(stack);
                let inst = stack.pop().ok_or(DecodeError::StackUnderflow)?;
                let key = key.map_err(|e| e.in_field("", &format!("[{}]", i)))?;
                append(stack, index, Some(map_key(key)), Value::Struct(inst))
            }
            other => Err(DecodeError::InvalidDescriptor(format!(
                "map `{}` element is not a structure: {}",
                chunk.name, other
            ))),
        })?;
        take(stack, index)
    }

    /// Reads elements until the declared size is reached or, without a size, until
    /// the innermost scope is exhausted. With a size, `byte_count` scopes each element.
    fn read_elements<R, F>(
        &self,
        chunk: &ChunkDescriptor,
        elem: &FieldType,
        byte_count: Option<u64>,
        r: &mut RangedReader<R>,
        stack: &mut ContextStack<'_>,
        mut sink: F,
    ) -> Result<(), DecodeError>
    where
        R: BufRead,
        F: FnMut(u64, Value, &mut ContextStack<'_>) -> Result<(), DecodeError>,
    {
        let size = match &chunk.size {
            Some(count) => Some(count.resolve(stack)?),
            None => None,
        };
        let element_bytes = size.and(byte_count);
        let mut empty = 0usize;
        let mut i = 0u64;
        loop {
            match size {
                Some(n) if i >= n => break,
                None if r.is_exhausted()? => break,
                _ => {}
            }
            let start = r.position();
            let v = self
                .read_element(chunk, elem, element_bytes, r, stack)
                .map_err(|e| e.in_field("", &format!("[{}]", i)))?;
            if r.position() == start {
                if size.is_none() {
                    return Err(DecodeError::InvalidDescriptor(format!(
                        "element {} of `{}` consumed no bytes",
                        i, chunk.name
                    )));
                }
                empty += 1;
                if empty > self.options().max_empty_elements {
                    return Err(DecodeError::InvalidDescriptor(format!(
                        "more than {} elements of `{}` consumed no bytes",
                        self.options().max_empty_elements,
                        chunk.name
                    )));
                }
            }
            if chunk.debug {
                let element = chunk.derive(format!("{}[{}]", chunk.name, i));
                log::debug!("{} = {}", element.name, v);
            }
            sink(i, v, stack)?;
            i += 1;
        }
        Ok(())
    }

    fn read_element<R: BufRead>(
        &self,
        chunk: &ChunkDescriptor,
        elem: &FieldType,
        element_bytes: Option<u64>,
        r: &mut RangedReader<R>,
        stack: &mut ContextStack<'_>,
    ) -> Result<Value, DecodeError> {
        match element_bytes {
            Some(n) => {
                r.push_range(n)?;
                let v = self.read_typed(chunk, elem, Some(n), r, stack)?;
                r.pop_range()?;
                Ok(v)
            }
            None => self.read_typed(chunk, elem, None, r, stack),
        }
    }
}

/// Starts the collection in slot `index` so expressions see it while it fills.
fn fill(stack: &mut ContextStack<'_>, index: usize, empty: Value) -> Result<(), DecodeError> {
    stack.top_mut().ok_or(DecodeError::StackUnderflow)?.begin_collection(index, empty);
    Ok(())
}

fn append(stack: &mut ContextStack<'_>, index: usize, key: Option<String>, v: Value) -> Result<(), DecodeError> {
    let top = stack.top_mut().ok_or(DecodeError::StackUnderflow)?;
    if top.append_at(index, key, v) {
        Ok(())
    } else {
        Err(DecodeError::InvalidDescriptor(format!("slot #{} of {} is not a collection", index, top.type_name())))
    }
}

fn take(stack: &mut ContextStack<'_>, index: usize) -> Result<Value, DecodeError> {
    stack
        .top_mut()
        .and_then(|top| top.take_at(index))
        .ok_or(DecodeError::StackUnderflow)
}

/// Primitive read honouring the field's byte count: narrower counts read a
/// zero-extended unsigned integer of that width, wider counts read the natural
/// width (the scope pop skips the rest).
fn read_base<R: BufRead>(
    r: &mut RangedReader<R>,
    b: BaseType,
    byte_count: Option<u64>,
) -> Result<Value, DecodeError> {
    let natural = b.width();
    if b == BaseType::Bool {
        let width = byte_count.unwrap_or(1).min(8);
        return Ok(Value::Bool(r.read_uint(width as usize)? != 0));
    }
    if b == BaseType::Double && byte_count == Some(4) {
        return Ok(Value::Double(r.read_f32()? as f64));
    }
    if let Some(n) = byte_count {
        if n < natural && !b.is_float() {
            return Ok(int_value(b, r.read_uint(n as usize)?));
        }
    }
    Ok(match b {
        BaseType::I8 => Value::I8(r.read_i8()?),
        BaseType::U8 => Value::U8(r.read_u8()?),
        BaseType::I16 => Value::I16(r.read_i16()?),
        BaseType::U16 => Value::U16(r.read_u16()?),
        BaseType::I32 => Value::I32(r.read_i32()?),
        BaseType::U32 => Value::U32(r.read_u32()?),
        BaseType::I64 => Value::I64(r.read_i64()?),
        BaseType::U64 => Value::U64(r.read_u64()?),
        BaseType::Float => Value::Float(r.read_f32()?),
        BaseType::Double => Value::Double(r.read_f64()?),
        BaseType::Bool => Value::Bool(r.read_u8()? != 0),
    })
}

fn int_value(b: BaseType, raw: u64) -> Value {
    match b {
        BaseType::I8 => Value::I8(raw as i8),
        BaseType::U8 => Value::U8(raw as u8),
        BaseType::I16 => Value::I16(raw as i16),
        BaseType::U16 => Value::U16(raw as u16),
        BaseType::I32 => Value::I32(raw as i32),
        BaseType::U32 => Value::U32(raw as u32),
        BaseType::I64 => Value::I64(raw as i64),
        BaseType::U64 => Value::U64(raw),
        BaseType::Bool => Value::Bool(raw != 0),
        BaseType::Float => Value::Float(raw as f32),
        BaseType::Double => Value::Double(raw as f64),
    }
}

pub(crate) fn literal_scalar(lit: &Literal) -> Scalar {
    match lit {
        Literal::Int(n) => Scalar::Int(*n),
        Literal::Bool(b) => Scalar::Bool(*b),
        Literal::String(s) => Scalar::Str(s.clone()),
    }
}

pub(crate) fn map_key(key: Scalar) -> String {
    match key {
        Scalar::Str(s) => s,
        Scalar::Enum { name, .. } => name,
        other => other.to_string(),
    }
}
