//! Encode then decode: decoding the encoder's output yields the original instance.
//! Also covers file-backed sources.

use chunkio::value::SlotState;
use chunkio::{
    encode, parse, psd, Decoder, EncodeError, Encoder, ErrorKind, Instance, RangedReader, ResolvedSchema,
    Value,
};
use proptest::prelude::*;
use std::io::{BufReader, Seek, SeekFrom, Write};

const RECORD: &str = r#"
struct Point { x: i32; y: i16; }

struct Record {
  tag: string [byte_count = 4];
  version: u16;
  count: u8;
  points: list<Point> [size = count];
  flags: u8;
  extra: u32 [read_if = (flags & 1) != 0];
  name_length: u8;
  name: string [byte_count = name_length];
  payload: any [byte_count = 8, switch { version == 1 => Point, true => bytes }];
}
"#;

fn record_schema() -> ResolvedSchema {
    ResolvedSchema::resolve(parse(RECORD).expect("parse")).expect("resolve")
}

fn point(x: i32, y: i16) -> Value {
    Value::Struct(Instance::named("Point").with("x", Value::I32(x)).with("y", Value::I16(y)))
}

fn record_strategy() -> impl Strategy<Value = Instance> {
    (
        "[A-Z0-9]{4}",
        0u16..3,
        prop::collection::vec((any::<i32>(), any::<i16>()), 0..6),
        any::<u8>(),
        any::<u32>(),
        "[a-z ]{0,12}",
        (any::<i32>(), any::<i16>()),
        prop::collection::vec(any::<u8>(), 8),
    )
        .prop_map(|(tag, version, points, flags, extra, name, (px, py), raw)| {
            let payload = if version == 1 { point(px, py) } else { Value::Bytes(raw) };
            Instance::named("Record")
                .with("tag", Value::String(tag))
                .with("version", Value::U16(version))
                .with("count", Value::U8(points.len() as u8))
                .with("points", Value::List(points.into_iter().map(|(x, y)| point(x, y)).collect()))
                .with("flags", Value::U8(flags))
                .with("extra", Value::U32(if flags & 1 != 0 { extra } else { 0 }))
                .with("name_length", Value::U8(name.len() as u8))
                .with("name", Value::String(name))
                .with("payload", payload)
        })
}

proptest! {
    #[test]
    fn record_roundtrip(record in record_strategy()) {
        let schema = record_schema();
        let bytes = encode(&schema, &record).unwrap();
        let (decoded, used) = Decoder::new(&schema).decode_with_extent("Record", &bytes).unwrap();
        prop_assert_eq!(&decoded, &record);
        prop_assert_eq!(used, bytes.len() as u64);
    }

    #[test]
    fn fixed_scope_always_ends_at_its_byte_count(bytes in prop::collection::vec(any::<u8>(), 11..40)) {
        let schema = ResolvedSchema::resolve(
            parse("struct Small { v: u16; } struct Scoped { head: Small [byte_count = 10]; tail: u8; }").unwrap(),
        )
        .unwrap();
        let (inst, used) = Decoder::new(&schema).decode_with_extent("Scoped", &bytes).unwrap();
        prop_assert_eq!(used, 11);
        prop_assert_eq!(inst.get("tail"), Some(&Value::U8(bytes[10])));
    }

    #[test]
    fn bezier_knot_roundtrip(values in prop::array::uniform6(any::<i32>())) {
        let schema = psd::schema().unwrap();
        let names = ["control_enter_y", "control_enter_x", "anchor_y", "anchor_x", "control_exit_y", "control_exit_x"];
        let knot = names
            .iter()
            .zip(values)
            .fold(Instance::named("BezierKnot"), |inst, (n, v)| inst.with(n, Value::I32(v)));
        let bytes = encode(&schema, &knot).unwrap();
        prop_assert_eq!(bytes.len(), 24);
        let decoded = Decoder::new(&schema).decode("BezierKnot", &bytes).unwrap();
        prop_assert_eq!(decoded, knot);
    }
}

#[test]
fn skipped_field_is_not_written() {
    let schema = record_schema();
    let record = Instance::named("Record")
        .with("tag", Value::String("ABCD".to_string()))
        .with("version", Value::U16(1))
        .with("count", Value::U8(0))
        .with("points", Value::List(Vec::new()))
        .with("flags", Value::U8(0))
        .with("extra", Value::U32(0))
        .with("name_length", Value::U8(0))
        .with("name", Value::String(String::new()))
        .with("payload", point(1, 2));
    let bytes = encode(&schema, &record).unwrap();
    // tag + version + count + flags + name_length + payload scope
    assert_eq!(bytes.len(), 4 + 2 + 1 + 1 + 1 + 8);
    let decoded = Decoder::new(&schema).decode("Record", &bytes).unwrap();
    assert_eq!(decoded.state("extra"), Some(SlotState::Skipped));
}

#[test]
fn encoder_rejects_inconsistent_count() {
    let schema = record_schema();
    let record = Instance::named("Record")
        .with("tag", Value::String("ABCD".to_string()))
        .with("version", Value::U16(0))
        .with("count", Value::U8(2))
        .with("points", Value::List(vec![point(1, 1)]));
    let err = Encoder::new(&schema).encode(&record).unwrap_err();
    assert_eq!(err.path().as_deref(), Some("Record.points"));
}

#[test]
fn encoder_rejects_overfull_scope() {
    let schema = record_schema();
    let record = Instance::named("Record")
        .with("tag", Value::String("TOOLONG".to_string()));
    let err = encode(&schema, &record).unwrap_err();
    assert_eq!(err.path().as_deref(), Some("Record.tag"));
}

#[test]
fn encoder_rejects_short_minimum_string() {
    let schema = ResolvedSchema::resolve(parse("struct S { id: minstring; }").unwrap()).unwrap();
    let short = Instance::named("S").with("id", Value::String("ab".to_string()));
    let err = encode(&schema, &short).unwrap_err();
    assert_eq!(err.path().as_deref(), Some("S.id"));
    assert!(matches!(err.root_cause(), EncodeError::TypeMismatch { .. }));

    let id = Instance::named("S").with("id", Value::String("norm".to_string()));
    let bytes = encode(&schema, &id).unwrap();
    assert_eq!(bytes, b"\0\0\0\0norm");
    assert_eq!(Decoder::new(&schema).decode("S", &bytes).unwrap(), id);
}

#[test]
fn padded_enum_and_scoped_elements_roundtrip() {
    let schema = ResolvedSchema::resolve(
        parse("enum E { A, B, C } struct S { e: E [byte_count = 12]; items: list<u8> [size = 2, byte_count = 2]; }")
            .unwrap(),
    )
    .unwrap();
    let inst = Instance::named("S")
        .with("e", Value::Enum { name: "C".to_string(), index: 2 })
        .with("items", Value::List(vec![Value::U8(1), Value::U8(2)]));
    let bytes = encode(&schema, &inst).unwrap();
    assert_eq!(bytes, [0, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 2, 0]);
    assert_eq!(Decoder::new(&schema).decode("S", &bytes).unwrap(), inst);
}

#[test]
fn decode_from_file_with_known_length() {
    let schema = psd::schema().unwrap();
    let knot = Instance::named("BezierKnot")
        .with("control_enter_y", Value::I32(1))
        .with("control_enter_x", Value::I32(2))
        .with("anchor_y", Value::I32(3))
        .with("anchor_x", Value::I32(4))
        .with("control_exit_y", Value::I32(5))
        .with("control_exit_x", Value::I32(6));
    let bytes = encode(&schema, &knot).unwrap();

    let mut file = tempfile::tempfile().unwrap();
    file.write_all(&bytes).unwrap();
    file.write_all(&[0xAA; 3]).unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();
    let len = file.metadata().unwrap().len();

    let mut reader = RangedReader::with_len(BufReader::new(file), len);
    let decoder = Decoder::new(&schema);
    let first = decoder.decode_from("BezierKnot", &mut reader).unwrap();
    assert_eq!(first, knot);
    assert_eq!(reader.position(), 24);
    assert_eq!(reader.available(), Some(3));

    let err = decoder.decode_from("BezierKnot", &mut reader).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EndOfStream);
}

#[test]
fn decode_from_file_of_unknown_length() {
    let schema = ResolvedSchema::resolve(parse("struct S { n: u8; rest: bytes; }").unwrap()).unwrap();
    let mut file = tempfile::tempfile().unwrap();
    file.write_all(&[2, 1, 2, 3, 4]).unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();

    let mut reader = RangedReader::new(BufReader::new(file));
    let inst = Decoder::new(&schema).decode_from("S", &mut reader).unwrap();
    assert_eq!(inst.get("rest"), Some(&Value::Bytes(vec![1, 2, 3, 4])));
    assert!(reader.is_exhausted().unwrap());
}
