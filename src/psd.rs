//! Built-in descriptor table for Photoshop documents.
//!
//! ```no_run
//! let schema = chunkio::psd::schema().unwrap();
//! let bytes = std::fs::read("image.psd").unwrap();
//! let file = chunkio::decode(&schema, chunkio::psd::ROOT, &bytes).unwrap();
//! println!("{}", chunkio::dump::instance_to_dump(&file, 0, 16));
//! ```

use crate::ast::ResolvedSchema;
use crate::parser::parse;

/// Chunk definitions for the PSD subset.
pub const SOURCE: &str = include_str!("../schemas/psd.chunk");

/// Structure describing a whole document.
pub const ROOT: &str = "PsdFile";

/// Image resource ids with a dedicated block layout.
pub mod resource {
    pub const RESOLUTION_INFO: u16 = 0x03ED;
    pub const GUIDES: u16 = 0x0408;
    pub const THUMBNAIL: u16 = 0x040C;
    pub const ICC_PROFILE: u16 = 0x040F;
    pub const INDEX_TABLE_COUNT: u16 = 0x0416;
    pub const INDEX_TRANSPARENCY: u16 = 0x0417;
}

/// Parse and resolve the built-in PSD table.
pub fn schema() -> Result<ResolvedSchema, String> {
    ResolvedSchema::resolve(parse(SOURCE)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_table_resolves() {
        let schema = schema().unwrap();
        for name in [ROOT, "Header", "ImageResourceBlock", "PathRecord", "BezierKnot", "UnicodeString"] {
            assert!(schema.get_struct(name).is_some(), "missing {}", name);
        }
        assert_eq!(schema.get_enum("ColorMode").map(|e| e.variants.len()), Some(10));
    }
}
