//! Decode driver: walks a structure's chunk descriptors in declared order and applies
//! read-if, byte-count scoping, dispatch, debug, match and stop-if to each field.

use crate::ast::{ChunkDescriptor, EnumDef, ResolvedSchema, StructDef};
use crate::context::ContextStack;
use crate::error::DecodeError;
use crate::expr::Scalar;
use crate::stream::{Endianness, RangedReader};
use crate::value::Instance;
use std::io::BufRead;

/// What to do when no switch case matches or a union tag has no arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VariantPolicy {
    /// Fail with `UnresolvedVariant`.
    #[default]
    Strict,
    /// Leave the field unset (`Value::Null`) and carry on.
    Lenient,
}

#[derive(Debug, Clone)]
pub struct DecoderOptions {
    pub endianness: Endianness,
    pub variant_policy: VariantPolicy,
    /// Maximum structure nesting depth.
    pub max_depth: usize,
    /// Maximum number of elements of one sized collection that may consume no bytes.
    pub max_empty_elements: usize,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        DecoderOptions {
            endianness: Endianness::Big,
            variant_policy: VariantPolicy::Strict,
            max_depth: 64,
            max_empty_elements: 1 << 16,
        }
    }
}

impl DecoderOptions {
    pub fn endianness(mut self, endianness: Endianness) -> Self {
        self.endianness = endianness;
        self
    }

    pub fn variant_policy(mut self, policy: VariantPolicy) -> Self {
        self.variant_policy = policy;
        self
    }

    pub fn lenient(self) -> Self {
        self.variant_policy(VariantPolicy::Lenient)
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn max_empty_elements(mut self, limit: usize) -> Self {
        self.max_empty_elements = limit;
        self
    }
}

/// Decodes structures of a resolved schema. Holds no per-decode state, so one
/// decoder can serve any number of independent decodes.
#[derive(Debug, Clone)]
pub struct Decoder<'s> {
    schema: &'s ResolvedSchema,
    options: DecoderOptions,
}

impl<'s> Decoder<'s> {
    pub fn new(schema: &'s ResolvedSchema) -> Self {
        Decoder::with_options(schema, DecoderOptions::default())
    }

    pub fn with_options(schema: &'s ResolvedSchema, options: DecoderOptions) -> Self {
        Decoder { schema, options }
    }

    pub fn options(&self) -> &DecoderOptions {
        &self.options
    }

    pub fn schema(&self) -> &'s ResolvedSchema {
        self.schema
    }

    /// Decode one structure of type `type_name` from the start of `bytes`.
    pub fn decode(&self, type_name: &str, bytes: &[u8]) -> Result<Instance, DecodeError> {
        self.decode_with_extent(type_name, bytes).map(|(inst, _)| inst)
    }

    /// Decode and also return the number of bytes the structure occupied.
    pub fn decode_with_extent(
        &self,
        type_name: &str,
        bytes: &[u8],
    ) -> Result<(Instance, u64), DecodeError> {
        let mut r = RangedReader::from_slice(bytes).with_endianness(self.options.endianness);
        let inst = self.decode_from(type_name, &mut r)?;
        Ok((inst, r.position()))
    }

    /// Decode from an open reader positioned at the start of the structure. On error
    /// the reader's scopes are restored but its position is unspecified.
    pub fn decode_from<R: BufRead>(
        &self,
        type_name: &str,
        r: &mut RangedReader<R>,
    ) -> Result<Instance, DecodeError> {
        let def = self
            .schema
            .get_struct(type_name)
            .ok_or_else(|| DecodeError::UnknownStruct(type_name.to_string()))?;
        r.set_endianness(self.options.endianness);
        let scopes = r.depth();
        let mut stack = ContextStack::new();
        let result = self.decode_struct(def, r, &mut stack);
        if result.is_err() {
            r.truncate_ranges(scopes);
        }
        result
    }

    pub(crate) fn struct_at(&self, index: usize) -> Result<&'s StructDef, DecodeError> {
        self.schema
            .struct_at(index)
            .ok_or_else(|| DecodeError::InvalidDescriptor(format!("no structure #{}", index)))
    }

    pub(crate) fn enum_at(&self, index: usize) -> Result<&'s EnumDef, DecodeError> {
        self.schema
            .enum_at(index)
            .ok_or_else(|| DecodeError::InvalidDescriptor(format!("no enum #{}", index)))
    }

    /// Pushes a fresh instance, decodes its fields and pops it again, on every path.
    pub(crate) fn decode_struct<R: BufRead>(
        &self,
        def: &StructDef,
        r: &mut RangedReader<R>,
        stack: &mut ContextStack<'_>,
    ) -> Result<Instance, DecodeError> {
        if stack.depth() >= self.options.max_depth {
            return Err(DecodeError::NestingTooDeep(self.options.max_depth));
        }
        log::trace!("enter {} at {} (depth {})", def.name, r.position(), stack.depth());
        stack.push(Instance::new(def));
        let outcome = self.decode_fields(def, r, stack);
        let inst = stack.pop().ok_or(DecodeError::StackUnderflow)?;
        outcome?;
        log::trace!("leave {} at {}", def.name, r.position());
        Ok(inst)
    }

    fn decode_fields<R: BufRead>(
        &self,
        def: &StructDef,
        r: &mut RangedReader<R>,
        stack: &mut ContextStack<'_>,
    ) -> Result<(), DecodeError> {
        for (index, chunk) in def.fields.iter().enumerate() {
            let stop = self
                .decode_field(def, index, chunk, r, stack)
                .map_err(|e| e.in_field(&def.name, &chunk.name))?;
            if stop {
                log::trace!("{}.{}: stop condition met", def.name, chunk.name);
                break;
            }
        }
        Ok(())
    }

    /// One field: returns `true` when its stop condition holds.
    fn decode_field<R: BufRead>(
        &self,
        def: &StructDef,
        index: usize,
        chunk: &ChunkDescriptor,
        r: &mut RangedReader<R>,
        stack: &mut ContextStack<'_>,
    ) -> Result<bool, DecodeError> {
        if let Some(cond) = &chunk.read_if {
            if !cond.eval_bool(stack)? {
                stack.top_mut().ok_or(DecodeError::StackUnderflow)?.mark_skipped(index);
                return Ok(false);
            }
        }

        let byte_count = match &chunk.byte_count {
            Some(count) => Some(count.resolve(stack)?),
            None => None,
        };
        // A sized collection applies its byte count to each element instead.
        let field_scope = byte_count.filter(|_| !chunk.scopes_elements());
        if let Some(n) = field_scope {
            r.push_range(n)?;
        }

        let value = self.read_field(index, chunk, byte_count, r, stack)?;
        if chunk.debug {
            log::debug!("{}.{} = {}", def.name, chunk.name, value);
        }
        let actual = chunk.match_value.as_ref().map(|_| Scalar::from_value(&value));
        stack.top_mut().ok_or(DecodeError::StackUnderflow)?.set_at(index, value);

        if let (Some(expected), Some(actual)) = (&chunk.match_value, actual) {
            let expected = expected.eval(stack)?;
            if !actual.loose_eq(&expected) {
                return Err(DecodeError::ValueMismatch {
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                });
            }
        }

        let stop = match &chunk.stop_if {
            Some(cond) => cond.eval_bool(stack)?,
            None => false,
        };
        if field_scope.is_some() {
            r.pop_range()?;
        }
        Ok(stop)
    }
}

/// Decode one `type_name` structure from `bytes` with default options.
pub fn decode(schema: &ResolvedSchema, type_name: &str, bytes: &[u8]) -> Result<Instance, DecodeError> {
    Decoder::new(schema).decode(type_name, bytes)
}
