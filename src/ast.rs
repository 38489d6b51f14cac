//! Chunk descriptor model: structures, enums and per-field chunk descriptors.
//!
//! A [`Schema`] is built either by [`crate::parser::parse`] or with the builder
//! methods below, then checked and indexed by [`ResolvedSchema::resolve`].

use crate::context::ContextStack;
use crate::error::DecodeError;
use crate::expr::Expr;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub structs: Vec<StructDef>,
    pub enums: Vec<EnumDef>,
}

impl Schema {
    pub fn new() -> Self {
        Schema::default()
    }

    pub fn with_struct(mut self, def: StructDef) -> Self {
        self.structs.push(def);
        self
    }

    pub fn with_enum(mut self, def: EnumDef) -> Self {
        self.enums.push(def);
        self
    }
}

/// Ordered set of symbolic values; the decoded index selects one.
#[derive(Debug, Clone)]
pub struct EnumDef {
    pub name: String,
    pub variants: Vec<String>,
}

impl EnumDef {
    pub fn new(name: &str, variants: &[&str]) -> Self {
        EnumDef {
            name: name.to_string(),
            variants: variants.iter().map(|v| v.to_string()).collect(),
        }
    }

    pub fn index_of(&self, variant: &str) -> Option<usize> {
        self.variants.iter().position(|v| v == variant)
    }
}

#[derive(Debug, Clone)]
pub struct StructDef {
    pub name: String,
    pub fields: Vec<ChunkDescriptor>,
}

impl StructDef {
    pub fn new(name: &str) -> Self {
        StructDef { name: name.to_string(), fields: Vec::new() }
    }

    pub fn field(mut self, chunk: ChunkDescriptor) -> Self {
        self.fields.push(chunk);
        self
    }

    pub fn chunk(&self, name: &str) -> Option<&ChunkDescriptor> {
        self.fields.iter().find(|c| c.name == name)
    }
}

/// How to read one field: its type plus byte count, repeat count, conditions,
/// expected value and switch cases.
#[derive(Debug, Clone)]
pub struct ChunkDescriptor {
    pub name: String,
    pub field_type: FieldType,
    pub byte_count: Option<Count>,
    pub size: Option<Count>,
    pub read_if: Option<Expr>,
    pub stop_if: Option<Expr>,
    pub match_value: Option<Expr>,
    /// Map key, evaluated with the freshly read element on top of the stack.
    pub key: Option<Expr>,
    pub switch: Vec<SwitchCase>,
    pub encoding: Encoding,
    pub debug: bool,
}

impl ChunkDescriptor {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        ChunkDescriptor {
            name: name.to_string(),
            field_type,
            byte_count: None,
            size: None,
            read_if: None,
            stop_if: None,
            match_value: None,
            key: None,
            switch: Vec::new(),
            encoding: Encoding::default(),
            debug: false,
        }
    }

    pub fn has_byte_count(&self) -> bool {
        matches!(self.byte_count, Some(Count::Fixed(_)))
    }

    pub fn has_dynamic_byte_count(&self) -> bool {
        matches!(self.byte_count, Some(Count::Dynamic(_)))
    }

    pub fn has_size(&self) -> bool {
        matches!(self.size, Some(Count::Fixed(_)))
    }

    pub fn has_dynamic_size(&self) -> bool {
        matches!(self.size, Some(Count::Dynamic(_)))
    }

    /// A collection with a size reads each element under its own byte count
    /// scope; without a size the byte count bounds the whole collection.
    pub fn scopes_elements(&self) -> bool {
        self.field_type.is_collection() && self.size.is_some()
    }

    pub fn has_switch(&self) -> bool {
        !self.switch.is_empty()
    }

    pub fn has_read_condition(&self) -> bool {
        self.read_if.is_some()
    }

    pub fn has_stop_condition(&self) -> bool {
        self.stop_if.is_some()
    }

    pub fn has_match(&self) -> bool {
        self.match_value.is_some()
    }

    /// Copy of this descriptor under another name (collection elements).
    pub fn derive(&self, name: String) -> ChunkDescriptor {
        ChunkDescriptor { name, ..self.clone() }
    }

    pub fn with_byte_count(mut self, n: u64) -> Self {
        self.byte_count = Some(Count::Fixed(n));
        self
    }

    pub fn with_dynamic_byte_count(mut self, e: Expr) -> Self {
        self.byte_count = Some(Count::Dynamic(e));
        self
    }

    pub fn with_size(mut self, n: u64) -> Self {
        self.size = Some(Count::Fixed(n));
        self
    }

    pub fn with_dynamic_size(mut self, e: Expr) -> Self {
        self.size = Some(Count::Dynamic(e));
        self
    }

    pub fn read_if(mut self, e: Expr) -> Self {
        self.read_if = Some(e);
        self
    }

    pub fn stop_if(mut self, e: Expr) -> Self {
        self.stop_if = Some(e);
        self
    }

    pub fn matching(mut self, e: Expr) -> Self {
        self.match_value = Some(e);
        self
    }

    pub fn keyed_by(mut self, e: Expr) -> Self {
        self.key = Some(e);
        self
    }

    pub fn switch_case(mut self, test: Expr, target: FieldType) -> Self {
        self.switch.push(SwitchCase { test, target });
        self
    }

    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn debug(mut self) -> Self {
        self.debug = true;
        self
    }
}

/// Byte count or element count: a literal, or an expression over decoded fields.
#[derive(Debug, Clone)]
pub enum Count {
    Fixed(u64),
    Dynamic(Expr),
}

impl Count {
    pub fn resolve(&self, stack: &ContextStack<'_>) -> Result<u64, DecodeError> {
        match self {
            Count::Fixed(n) => Ok(*n),
            Count::Dynamic(e) => e.eval_count(stack),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SwitchCase {
    pub test: Expr,
    pub target: FieldType,
}

#[derive(Debug, Clone)]
pub enum FieldType {
    Base(BaseType),
    /// Fixed-length text; without a byte count it takes the rest of the scope.
    String,
    /// `u32` length prefix then `max(len, 4)` bytes.
    MinString,
    Bytes,
    /// Consumed and discarded.
    Void,
    /// Concrete type chosen by the descriptor's switch cases.
    Any,
    /// Unresolved struct or enum name.
    Named(String),
    Struct(usize),
    Enum(usize),
    List(Box<FieldType>),
    Map(Box<FieldType>),
    Union(Box<UnionSpec>),
}

impl FieldType {
    pub fn named(name: &str) -> Self {
        FieldType::Named(name.to_string())
    }

    pub fn list(elem: FieldType) -> Self {
        FieldType::List(Box::new(elem))
    }

    pub fn map(elem: FieldType) -> Self {
        FieldType::Map(Box::new(elem))
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, FieldType::List(_) | FieldType::Map(_))
    }
}

/// Discriminated union: a tag read from the stream selects the arm.
#[derive(Debug, Clone)]
pub struct UnionSpec {
    pub tag: TagSpec,
    pub arms: Vec<(Literal, FieldType)>,
}

#[derive(Debug, Clone)]
pub struct TagSpec {
    pub tag_type: FieldType,
    pub byte_count: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseType {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    Float,
    Double,
}

impl BaseType {
    /// Natural width in bytes.
    pub fn width(self) -> u64 {
        match self {
            BaseType::Bool | BaseType::I8 | BaseType::U8 => 1,
            BaseType::I16 | BaseType::U16 => 2,
            BaseType::I32 | BaseType::U32 | BaseType::Float => 4,
            BaseType::I64 | BaseType::U64 | BaseType::Double => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, BaseType::Float | BaseType::Double)
    }

    pub fn is_signed(self) -> bool {
        matches!(self, BaseType::I8 | BaseType::I16 | BaseType::I32 | BaseType::I64)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "bool" => BaseType::Bool,
            "i8" => BaseType::I8,
            "u8" => BaseType::U8,
            "i16" => BaseType::I16,
            "u16" => BaseType::U16,
            "i32" => BaseType::I32,
            "u32" => BaseType::U32,
            "i64" => BaseType::I64,
            "u64" => BaseType::U64,
            "f32" | "float" => BaseType::Float,
            "f64" | "double" => BaseType::Double,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Bool(bool),
    String(String),
}

/// Character encoding of fixed-length and length-prefixed text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// ISO-8859-1: one byte per char.
    #[default]
    Latin1,
    Utf8,
    Utf16Be,
    Utf16Le,
}

impl Encoding {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().replace('_', "-").as_str() {
            "ISO-8859-1" | "LATIN1" | "LATIN-1" | "ASCII" => Some(Encoding::Latin1),
            "UTF-8" | "UTF8" => Some(Encoding::Utf8),
            "UTF-16" | "UTF-16BE" | "UTF16" => Some(Encoding::Utf16Be),
            "UTF-16LE" => Some(Encoding::Utf16Le),
            _ => None,
        }
    }

    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            Encoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
            Encoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Encoding::Utf16Be | Encoding::Utf16Le => {
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|c| match self {
                        Encoding::Utf16Le => LittleEndian::read_u16(c),
                        _ => BigEndian::read_u16(c),
                    })
                    .collect();
                String::from_utf16_lossy(&units)
            }
        }
    }

    pub fn encode(self, s: &str) -> Vec<u8> {
        match self {
            Encoding::Latin1 => s
                .chars()
                .map(|c| if (c as u32) <= 0xff { c as u8 } else { b'?' })
                .collect(),
            Encoding::Utf8 => s.as_bytes().to_vec(),
            Encoding::Utf16Be | Encoding::Utf16Le => {
                let mut out = Vec::with_capacity(s.len() * 2);
                for unit in s.encode_utf16() {
                    let mut b = [0u8; 2];
                    match self {
                        Encoding::Utf16Le => LittleEndian::write_u16(&mut b, unit),
                        _ => BigEndian::write_u16(&mut b, unit),
                    }
                    out.extend_from_slice(&b);
                }
                out
            }
        }
    }
}

/// Schema with named types bound to indices and descriptors validated.
#[derive(Debug, Clone)]
pub struct ResolvedSchema {
    pub schema: Schema,
    pub structs_by_name: HashMap<String, usize>,
    pub enums_by_name: HashMap<String, usize>,
}

impl ResolvedSchema {
    pub fn resolve(mut schema: Schema) -> Result<Self, String> {
        let mut structs_by_name = HashMap::new();
        let mut enums_by_name = HashMap::new();
        for (i, s) in schema.structs.iter().enumerate() {
            if structs_by_name.insert(s.name.clone(), i).is_some() {
                return Err(format!("Duplicate struct name: {}", s.name));
            }
        }
        for (i, e) in schema.enums.iter().enumerate() {
            if e.variants.is_empty() {
                return Err(format!("Enum {} has no variants", e.name));
            }
            if structs_by_name.contains_key(&e.name) || enums_by_name.insert(e.name.clone(), i).is_some() {
                return Err(format!("Duplicate type name: {}", e.name));
            }
        }

        let names = Names { structs: &structs_by_name, enums: &enums_by_name };
        for def in schema.structs.iter_mut() {
            let mut seen = Vec::new();
            for chunk in def.fields.iter_mut() {
                if seen.contains(&chunk.name) {
                    return Err(format!("Duplicate field {}.{}", def.name, chunk.name));
                }
                seen.push(chunk.name.clone());
                let at = format!("{}.{}", def.name, chunk.name);
                names.bind(&mut chunk.field_type).map_err(|e| format!("{}: {}", at, e))?;
                for case in chunk.switch.iter_mut() {
                    names.bind(&mut case.target).map_err(|e| format!("{}: {}", at, e))?;
                }
            }
        }
        for def in &schema.structs {
            for chunk in &def.fields {
                check_chunk(&schema, chunk).map_err(|e| format!("{}.{}: {}", def.name, chunk.name, e))?;
            }
        }

        Ok(ResolvedSchema { schema, structs_by_name, enums_by_name })
    }

    pub fn get_struct(&self, name: &str) -> Option<&StructDef> {
        self.structs_by_name.get(name).map(|&i| &self.schema.structs[i])
    }

    pub fn get_enum(&self, name: &str) -> Option<&EnumDef> {
        self.enums_by_name.get(name).map(|&i| &self.schema.enums[i])
    }

    pub fn struct_at(&self, index: usize) -> Option<&StructDef> {
        self.schema.structs.get(index)
    }

    pub fn enum_at(&self, index: usize) -> Option<&EnumDef> {
        self.schema.enums.get(index)
    }
}

struct Names<'a> {
    structs: &'a HashMap<String, usize>,
    enums: &'a HashMap<String, usize>,
}

impl Names<'_> {
    fn bind(&self, ty: &mut FieldType) -> Result<(), String> {
        match ty {
            FieldType::Named(name) => {
                *ty = if let Some(&i) = self.structs.get(name.as_str()) {
                    FieldType::Struct(i)
                } else if let Some(&i) = self.enums.get(name.as_str()) {
                    FieldType::Enum(i)
                } else {
                    return Err(format!("Unknown type: {}", name));
                };
                Ok(())
            }
            FieldType::List(elem) | FieldType::Map(elem) => self.bind(elem),
            FieldType::Union(spec) => {
                self.bind(&mut spec.tag.tag_type)?;
                for (_, arm) in spec.arms.iter_mut() {
                    self.bind(arm)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

fn check_chunk(schema: &Schema, chunk: &ChunkDescriptor) -> Result<(), String> {
    let ty = &chunk.field_type;
    if chunk.size.is_some() && !ty.is_collection() {
        return Err("size on a non-collection field".to_string());
    }
    match ty {
        FieldType::Map(elem) => {
            if chunk.key.is_none() {
                return Err("map without key".to_string());
            }
            if !matches!(**elem, FieldType::Struct(_)) {
                return Err("map elements must be structures".to_string());
            }
        }
        _ if chunk.key.is_some() => return Err("key on a non-map field".to_string()),
        _ => {}
    }
    let elem = match ty {
        FieldType::List(e) | FieldType::Map(e) => e.as_ref(),
        other => other,
    };
    // Fixed byte count applied to each read value.
    let element_bytes = match chunk.byte_count {
        Some(Count::Fixed(n)) if !ty.is_collection() || chunk.scopes_elements() => Some(n),
        _ => None,
    };
    match elem {
        FieldType::Any if chunk.switch.is_empty() => return Err("any without switch".to_string()),
        FieldType::Any => {
            for case in &chunk.switch {
                if matches!(case.target, FieldType::Any | FieldType::List(_) | FieldType::Map(_)) {
                    return Err("switch targets must be plain types".to_string());
                }
            }
        }
        _ if !chunk.switch.is_empty() => return Err("switch on a non-any field".to_string()),
        FieldType::Base(b) if b.is_float() => {
            if let Some(n) = element_bytes.filter(|n| *n < 4) {
                return Err(format!("byte count {} too narrow for a float", n));
            }
        }
        FieldType::Enum(_) if element_bytes == Some(3) => {
            return Err("an enum index reads 1, 2 or 4 bytes".to_string())
        }
        FieldType::Union(spec) => check_union(schema, spec)?,
        FieldType::List(_) | FieldType::Map(_) => {
            return Err("nested collections are not supported".to_string())
        }
        _ => {}
    }
    Ok(())
}

fn check_union(schema: &Schema, spec: &UnionSpec) -> Result<(), String> {
    match &spec.tag.tag_type {
        FieldType::Base(b) if !b.is_float() => {}
        FieldType::String if spec.tag.byte_count.is_some() => {}
        FieldType::Enum(i) if *i < schema.enums.len() => {}
        _ => return Err("union tag must be an integer, an enum or a sized string".to_string()),
    }
    if spec.arms.is_empty() {
        return Err("union without arms".to_string());
    }
    if spec.arms.iter().any(|(_, t)| matches!(t, FieldType::Any | FieldType::List(_) | FieldType::Map(_))) {
        return Err("union arms must be plain types".to_string());
    }
    Ok(())
}
