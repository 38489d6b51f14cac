//! Decode and encode errors.
//!
//! Every error that escapes a field is wrapped in [`DecodeError::Field`] so the caller
//! sees the full field path (`PsdFile.header.signature`). [`DecodeError::kind`] looks
//! through the wrapping and reports the underlying failure.

use std::fmt;

/// Location of a failing field: the outermost structure name followed by the chain
/// of field names (collection elements appear as `[i]` segments).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldPath {
    root: String,
    fields: Vec<String>,
}

impl FieldPath {
    pub fn new(structure: &str, field: &str) -> Self {
        FieldPath { root: structure.to_string(), fields: vec![field.to_string()] }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Re-roots a path produced inside a nested read under `structure.field`.
    fn nest_under(&mut self, structure: &str, field: &str) {
        self.root = structure.to_string();
        self.fields.insert(0, field.to_string());
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)?;
        for segment in &self.fields {
            if segment.starts_with('[') {
                write!(f, "{}", segment)?;
            } else {
                write!(f, ".{}", segment)?;
            }
        }
        Ok(())
    }
}

/// Underlying failure class of a [`DecodeError`], with field paths stripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    EndOfStream,
    RangeUnderflow,
    ValueMismatch,
    UnresolvedVariant,
    UnresolvedExpressionOperand,
    Expression,
    UnknownStruct,
    InvalidDescriptor,
    NestingTooDeep,
    StackUnderflow,
    Io,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("end of stream: needed {needed} byte(s), {available} available")]
    EndOfStream { needed: u64, available: u64 },
    #[error("range underflow: cannot scope {requested} byte(s), {available} available")]
    RangeUnderflow { requested: u64, available: u64 },
    #[error("value mismatch: expected {expected}, found {actual}")]
    ValueMismatch { expected: String, actual: String },
    #[error("unresolved variant: {0}")]
    UnresolvedVariant(String),
    #[error("unresolved operand `{operand}`: {reason}")]
    UnresolvedOperand { operand: String, reason: String },
    #[error("expression: {0}")]
    Expression(String),
    #[error("unknown struct: {0}")]
    UnknownStruct(String),
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("structures nested deeper than {0}")]
    NestingTooDeep(usize),
    #[error("context stack underflow")]
    StackUnderflow,
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("{path}: {source}")]
    Field {
        path: FieldPath,
        #[source]
        source: Box<DecodeError>,
    },
}

impl DecodeError {
    /// Attach (or extend) the field path of this error.
    pub(crate) fn in_field(self, structure: &str, field: &str) -> Self {
        match self {
            DecodeError::Field { mut path, source } => {
                path.nest_under(structure, field);
                DecodeError::Field { path, source }
            }
            other => DecodeError::Field {
                path: FieldPath::new(structure, field),
                source: Box::new(other),
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DecodeError::EndOfStream { .. } => ErrorKind::EndOfStream,
            DecodeError::RangeUnderflow { .. } => ErrorKind::RangeUnderflow,
            DecodeError::ValueMismatch { .. } => ErrorKind::ValueMismatch,
            DecodeError::UnresolvedVariant(_) => ErrorKind::UnresolvedVariant,
            DecodeError::UnresolvedOperand { .. } => ErrorKind::UnresolvedExpressionOperand,
            DecodeError::Expression(_) => ErrorKind::Expression,
            DecodeError::UnknownStruct(_) => ErrorKind::UnknownStruct,
            DecodeError::InvalidDescriptor(_) => ErrorKind::InvalidDescriptor,
            DecodeError::NestingTooDeep(_) => ErrorKind::NestingTooDeep,
            DecodeError::StackUnderflow => ErrorKind::StackUnderflow,
            DecodeError::Io(_) => ErrorKind::Io,
            DecodeError::Field { source, .. } => source.kind(),
        }
    }

    /// Dotted field path, when the error was raised while decoding a field.
    pub fn path(&self) -> Option<String> {
        match self {
            DecodeError::Field { path, .. } => Some(path.to_string()),
            _ => None,
        }
    }

    /// The error with any field-path wrapping removed.
    pub fn root_cause(&self) -> &DecodeError {
        match self {
            DecodeError::Field { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("scope overflow: {written} byte(s) written into a {declared}-byte range")]
    ScopeOverflow { declared: u64, written: u64 },
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },
    #[error("count mismatch: declared {declared}, found {actual}")]
    CountMismatch { declared: u64, actual: u64 },
    #[error("unresolved variant: {0}")]
    UnresolvedVariant(String),
    #[error("unknown struct: {0}")]
    UnknownStruct(String),
    #[error("expression evaluation: {0}")]
    Eval(#[from] DecodeError),
    #[error("{path}: {source}")]
    Field {
        path: FieldPath,
        #[source]
        source: Box<EncodeError>,
    },
}

impl EncodeError {
    pub(crate) fn in_field(self, structure: &str, field: &str) -> Self {
        match self {
            EncodeError::Field { mut path, source } => {
                path.nest_under(structure, field);
                EncodeError::Field { path, source }
            }
            other => EncodeError::Field {
                path: FieldPath::new(structure, field),
                source: Box::new(other),
            },
        }
    }

    pub fn path(&self) -> Option<String> {
        match self {
            EncodeError::Field { path, .. } => Some(path.to_string()),
            _ => None,
        }
    }

    pub fn root_cause(&self) -> &EncodeError {
        match self {
            EncodeError::Field { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
