//! # chunkio — declarative chunk decoding for binary file formats
//!
//! A binary format is described as a table of structures, each an ordered list of
//! chunk descriptors (one per field). The decoder walks that table over a byte
//! stream and produces [`Instance`]s, honouring per-field byte-count scopes, repeat
//! counts, read/stop conditions, expected-value checks and type switches.
//!
//! ## Pieces
//!
//! - [`stream::RangedReader`]: big/little-endian cursor with nested byte-range scopes
//! - [`ast`]: descriptor model (`StructDef`, `ChunkDescriptor`, `FieldType`) and
//!   [`ResolvedSchema`] validation
//! - [`expr`]: count / condition expressions evaluated against the
//!   [`context::ContextStack`] of structures being decoded
//! - [`dispatch`] and [`codec`]: type dispatch and the decode driver
//! - [`encode`]: the matching encoder
//! - [`parser`]: the textual definition language (PEST grammar)
//! - [`psd`]: a built-in table for Photoshop documents
//!
//! ## Example definitions
//!
//! ```text
//! enum ColorMode { Bitmap, Grayscale, Indexed, Rgb }
//!
//! struct Header {
//!   signature: string [byte_count = 4, match = "8BPS"];
//!   version: i16 [match = 1];
//!   reserved: void [byte_count = 6];
//!   channels: i32 [byte_count = 2];
//!   color_mode: ColorMode [byte_count = 2];
//! }
//!
//! struct Block {
//!   id: u16;
//!   length: u32;
//!   data: any [byte_count = length + (length & 1), switch {
//!     id == 0x0416 => u16,
//!     true => bytes,
//!   }];
//! }
//! ```
//!
//! ## Usage
//!
//! ```
//! let schema = chunkio::ResolvedSchema::resolve(
//!     chunkio::parse("struct Pair { a: u8; b: u16; }").unwrap(),
//! )
//! .unwrap();
//! let pair = chunkio::decode(&schema, "Pair", &[1, 0, 2]).unwrap();
//! assert_eq!(pair.get("b"), Some(&chunkio::Value::U16(2)));
//! ```

pub mod ast;
pub mod codec;
pub mod context;
pub mod dispatch;
pub mod dump;
pub mod encode;
pub mod error;
pub mod expr;
pub mod parser;
pub mod psd;
pub mod stream;
pub mod value;

pub use ast::{ResolvedSchema, Schema};
pub use codec::{decode, Decoder, DecoderOptions, VariantPolicy};
pub use encode::{encode, Encoder};
pub use error::{DecodeError, EncodeError, ErrorKind};
pub use parser::{parse, parse_expr};
pub use stream::{Endianness, RangedReader};
pub use value::{Instance, Value};
