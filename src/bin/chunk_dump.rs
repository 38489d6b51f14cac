//! Decode a binary file with a chunk schema and print the decoded structure.
//!
//! Usage:
//!   chunk_dump [OPTIONS] SCHEMA FILE
//!
//! SCHEMA is a `.chunk` definition file, or `psd` for the built-in PSD table.
//!
//! Options:
//!   --root=NAME        Structure to decode (default: `PsdFile` for psd, else the first one)
//!   --lenient          Leave unmatched switch / union fields unset instead of failing
//!   --little-endian    Read multi-byte values little-endian
//!   --bytes=N          Show at most N bytes of each byte array (default 16)
//!   --verbose, -v      Log fields marked `debug`
//!   --trace            Log every structure and scope

use chunkio::dump::instance_to_dump;
use chunkio::{psd, Decoder, DecoderOptions, Endianness, RangedReader, ResolvedSchema};
use log::LevelFilter;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

fn take_flag(args: &mut Vec<String>, names: &[&str]) -> bool {
    match args.iter().position(|a| names.contains(&a.as_str())) {
        Some(pos) => {
            args.remove(pos);
            true
        }
        None => false,
    }
}

fn take_value(args: &mut Vec<String>, prefix: &str) -> Option<String> {
    let pos = args.iter().position(|a| a.starts_with(prefix))?;
    let arg = args.remove(pos);
    arg.strip_prefix(prefix).map(str::to_string)
}

fn load_schema(arg: &str) -> anyhow::Result<(ResolvedSchema, Option<String>)> {
    if arg == "psd" {
        let schema = psd::schema().map_err(|e| anyhow::anyhow!(e))?;
        return Ok((schema, Some(psd::ROOT.to_string())));
    }
    let src = std::fs::read_to_string(arg)?;
    let schema = chunkio::parse(&src).map_err(|e| anyhow::anyhow!("{}: {}", arg, e))?;
    let first = schema.structs.first().map(|s| s.name.clone());
    let resolved = ResolvedSchema::resolve(schema).map_err(|e| anyhow::anyhow!("{}: {}", arg, e))?;
    Ok((resolved, first))
}

fn main() -> anyhow::Result<()> {
    let mut raw_args: Vec<String> = std::env::args().skip(1).collect();
    let level = if take_flag(&mut raw_args, &["--trace"]) {
        LevelFilter::Trace
    } else if take_flag(&mut raw_args, &["--verbose", "-v"]) {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    simple_logger::SimpleLogger::new().with_level(level).init()?;

    let lenient = take_flag(&mut raw_args, &["--lenient"]);
    let little = take_flag(&mut raw_args, &["--little-endian"]);
    let root = take_value(&mut raw_args, "--root=");
    let max_bytes: usize = match take_value(&mut raw_args, "--bytes=") {
        Some(n) => n.parse()?,
        None => 16,
    };

    let mut args = raw_args.into_iter();
    let (schema_arg, file_path) = match (args.next(), args.next()) {
        (Some(s), Some(f)) => (s, PathBuf::from(f)),
        _ => anyhow::bail!("usage: chunk_dump [--root=NAME] [--lenient] [--little-endian] SCHEMA FILE"),
    };

    let (schema, default_root) = load_schema(&schema_arg)?;
    let root = root
        .or(default_root)
        .ok_or_else(|| anyhow::anyhow!("{} defines no structures", schema_arg))?;

    let mut options = DecoderOptions::default();
    if little {
        options = options.endianness(Endianness::Little);
    }
    if lenient {
        options = options.lenient();
    }
    let decoder = Decoder::with_options(&schema, options);

    let file = File::open(&file_path)?;
    let len = file.metadata()?.len();
    let mut reader = RangedReader::with_len(BufReader::new(file), len);
    let inst = decoder
        .decode_from(&root, &mut reader)
        .map_err(|e| anyhow::anyhow!("{}: {}", file_path.display(), e))?;

    println!("{}", instance_to_dump(&inst, 0, max_bytes));
    println!("-- {} of {} byte(s) decoded", reader.position(), len);
    Ok(())
}
