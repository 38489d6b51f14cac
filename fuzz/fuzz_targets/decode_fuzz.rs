//! Decoder fuzz target: decode arbitrary bytes as a PSD document and as single
//! layer properties. Decoding must return Ok or Err, never panic or hang.
//! Build with: cargo fuzz run decode_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let schema = match chunkio::psd::schema() {
        Ok(s) => s,
        Err(_) => return,
    };
    let lenient = chunkio::Decoder::with_options(&schema, chunkio::DecoderOptions::default().lenient());
    let _ = chunkio::decode(&schema, chunkio::psd::ROOT, data);
    let _ = lenient.decode("LayerProperty", data);
    let _ = lenient.decode("ImageResources", data);
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run decode_fuzz");
}
