//! Definition language tests: syntax (parse success/failure) and resolution.

use chunkio::ast::{BaseType, Count, Encoding, FieldType, Literal};
use chunkio::expr::Expr;
use chunkio::{parse, parse_expr, ResolvedSchema};

fn resolve(src: &str) -> Result<ResolvedSchema, String> {
    ResolvedSchema::resolve(parse(src)?)
}

// ==================== Syntax: valid definitions ====================

#[test]
fn parse_empty_schema() {
    let s = parse("").expect("empty schema can parse");
    assert!(s.structs.is_empty());
    assert!(s.enums.is_empty());
}

#[test]
fn parse_minimal_struct() {
    let s = parse("struct S { x: u8; }").expect("parse");
    assert_eq!(s.structs.len(), 1);
    assert_eq!(s.structs[0].name, "S");
    assert_eq!(s.structs[0].fields.len(), 1);
    assert_eq!(s.structs[0].fields[0].name, "x");
    assert!(matches!(s.structs[0].fields[0].field_type, FieldType::Base(BaseType::U8)));
}

#[test]
fn parse_all_base_types() {
    let src = r#"
struct AllBase {
  a: bool; b: i8; c: u8; d: i16; e: u16; f: i32;
  g: u32; h: i64; i: u64; j: f32; k: f64; l: float; m: double;
}
"#;
    let s = parse(src).expect("parse");
    let kinds: Vec<BaseType> = s.structs[0]
        .fields
        .iter()
        .map(|f| match f.field_type {
            FieldType::Base(b) => b,
            ref other => panic!("not a base type: {:?}", other),
        })
        .collect();
    assert_eq!(kinds.len(), 13);
    assert_eq!(kinds[9], BaseType::Float);
    assert_eq!(kinds[12], BaseType::Double);
}

#[test]
fn parse_special_types() {
    let src = r#"
struct Special {
  s: string [byte_count = 4];
  m: minstring;
  raw: bytes;
  gap: void [byte_count = 2];
}
"#;
    let s = parse(src).expect("parse");
    let f = &s.structs[0].fields;
    assert!(matches!(f[0].field_type, FieldType::String));
    assert!(matches!(f[1].field_type, FieldType::MinString));
    assert!(matches!(f[2].field_type, FieldType::Bytes));
    assert!(matches!(f[3].field_type, FieldType::Void));
}

#[test]
fn parse_enum_with_trailing_comma() {
    let s = parse("enum Mode { A, B, C, }").expect("parse");
    assert_eq!(s.enums[0].variants, vec!["A", "B", "C"]);
}

#[test]
fn parse_comments() {
    let src = r#"
// line comment
struct S {
  /* block
     comment */
  x: u8; // trailing
}
"#;
    assert_eq!(parse(src).expect("parse").structs[0].fields.len(), 1);
}

#[test]
fn literal_counts_are_fixed_and_expressions_dynamic() {
    let src = r#"
struct S {
  n: u8;
  a: bytes [byte_count = 4];
  b: bytes [byte_count = n * 2];
  c: list<u8> [size = 3];
  d: list<u8> [size = n];
}
"#;
    let s = parse(src).expect("parse");
    let f = &s.structs[0].fields;
    assert!(matches!(f[1].byte_count, Some(Count::Fixed(4))));
    assert!(matches!(f[2].byte_count, Some(Count::Dynamic(_))));
    assert!(f[2].has_dynamic_byte_count());
    assert!(matches!(f[3].size, Some(Count::Fixed(3))));
    assert!(f[4].has_dynamic_size());
}

#[test]
fn parse_every_attribute() {
    let src = r#"
struct S {
  tag: string [byte_count = 4, match = "8BIM", debug];
  len: u32 [stop_if = len == 0];
  name: string [byte_count = len * 2, encoding = "UTF-16", read_if = len > 0];
}
"#;
    let s = parse(src).expect("parse");
    let f = &s.structs[0].fields;
    assert!(f[0].debug);
    assert!(f[0].has_match());
    assert!(f[1].has_stop_condition());
    assert!(f[2].has_read_condition());
    assert_eq!(f[2].encoding, Encoding::Utf16Be);
}

#[test]
fn parse_switch_cases_in_order() {
    let src = r#"
struct Knot { x: i32; }
struct Sub { n: u16; }
struct Record {
  selector: i16;
  data: any [byte_count = 24, switch {
    selector == 0 || selector == 3 => Sub,
    selector == 1 => Knot,
    true => bytes,
  }];
}
"#;
    let s = parse(src).expect("parse");
    let data = &s.structs[2].fields[1];
    assert_eq!(data.switch.len(), 3);
    assert!(matches!(data.switch[2].target, FieldType::Bytes));
    assert!(matches!(data.switch[2].test, Expr::Bool(true)));
}

#[test]
fn parse_union_arms() {
    let src = r#"
struct A { x: u8; }
struct M {
  body: union<u8> { 0 => A, 1 => u32, 0x10 => string, -1 => bytes };
  named: union<string(4)> { "luni" => A };
}
"#;
    let s = parse(src).expect("parse");
    match &s.structs[1].fields[0].field_type {
        FieldType::Union(spec) => {
            assert_eq!(spec.arms.len(), 4);
            assert_eq!(spec.arms[2].0, Literal::Int(16));
            assert_eq!(spec.arms[3].0, Literal::Int(-1));
        }
        other => panic!("expected union, got {:?}", other),
    }
    match &s.structs[1].fields[1].field_type {
        FieldType::Union(spec) => {
            assert_eq!(spec.tag.byte_count, Some(4));
            assert_eq!(spec.arms[0].0, Literal::String("luni".to_string()));
        }
        other => panic!("expected union, got {:?}", other),
    }
}

#[test]
fn parse_expression_precedence() {
    let e = parse_expr("1 + 2 * 3").expect("parse");
    assert_eq!(e.to_string(), "(1 + (2 * 3))");
    let e = parse_expr("length + (length & 1)").expect("parse");
    assert_eq!(e.to_string(), "(length + (length & 1))");
    let e = parse_expr("a == 1 || b == 2 && c").expect("parse");
    assert_eq!(e.to_string(), "((a == 1) || ((b == 2) && c))");
    let e = parse_expr("((n + 4) & ~3) - (n + 1)").expect("parse");
    assert_eq!(e.to_string(), "(((n + 4) & ~3) - (n + 1))");
}

#[test]
fn parse_operands_and_literals() {
    assert_eq!(parse_expr("$1.length >= 12").expect("parse").to_string(), "($1.length >= 12)");
    assert_eq!(parse_expr("Header.channels").expect("parse").to_string(), "Header.channels");
    assert_eq!(parse_expr("mode == Mode::Rgb").expect("parse").to_string(), "(mode == Mode::Rgb)");
    assert_eq!(parse_expr("max(1, n & 1)").expect("parse").to_string(), "max(1, (n & 1))");
    assert!(matches!(parse_expr("0x0408").expect("parse"), Expr::Int(0x0408)));
    assert!(matches!(parse_expr("\"8BPS\"").expect("parse"), Expr::Str(ref s) if s == "8BPS"));
}

#[test]
fn parse_element_selection() {
    let e = parse_expr("Outer.items[len(Outer.done)].sizes[0].length - 2").expect("parse");
    assert_eq!(e.to_string(), "(Outer.items[len(Outer.done)].sizes[0].length - 2)");
    assert!(matches!(parse_expr("items[ n + 1 ]").expect("parse"), Expr::Select { .. }));
    assert!(parse_expr("items[]").is_err());
    assert!(parse_expr("len(a, b)").is_ok());
}

#[test]
fn parse_string_escapes() {
    match parse_expr(r#""a\"b\x41\n""#).expect("parse") {
        Expr::Str(s) => assert_eq!(s, "a\"bA\n"),
        other => panic!("expected string, got {:?}", other),
    }
}

// ==================== Syntax: invalid definitions ====================

#[test]
fn reject_missing_semicolon() {
    assert!(parse("struct S { x: u8 }").is_err());
}

#[test]
fn reject_missing_type() {
    assert!(parse("struct S { x; }").is_err());
}

#[test]
fn reject_unknown_attribute() {
    assert!(parse("struct S { x: u8 [bogus = 1]; }").is_err());
}

#[test]
fn reject_duplicate_attribute() {
    let err = parse("struct S { x: bytes [byte_count = 1, byte_count = 2]; }").unwrap_err();
    assert!(err.contains("duplicate byte_count"), "{}", err);
}

#[test]
fn reject_unknown_function() {
    assert!(parse_expr("sqrt(4)").is_err());
}

#[test]
fn reject_unknown_encoding() {
    assert!(parse(r#"struct S { x: string [encoding = "EBCDIC"]; }"#).is_err());
}

#[test]
fn reject_empty_enum_syntax() {
    assert!(parse("enum E { }").is_err());
}

#[test]
fn reject_dangling_operator() {
    assert!(parse_expr("1 +").is_err());
    assert!(parse_expr("a ==").is_err());
}

// ==================== Resolution ====================

#[test]
fn resolve_binds_struct_and_enum_names() {
    let r = resolve("enum E { A } struct Inner { x: u8; } struct Outer { i: Inner; e: E; l: list<Inner>; }")
        .expect("resolve");
    let outer = r.get_struct("Outer").expect("Outer");
    assert!(matches!(outer.fields[0].field_type, FieldType::Struct(_)));
    assert!(matches!(outer.fields[1].field_type, FieldType::Enum(_)));
    match &outer.fields[2].field_type {
        FieldType::List(elem) => assert!(matches!(**elem, FieldType::Struct(_))),
        other => panic!("expected list, got {:?}", other),
    }
    assert!(r.get_enum("E").is_some());
}

#[test]
fn resolve_rejects_unknown_type() {
    let err = resolve("struct S { x: Missing; }").unwrap_err();
    assert!(err.contains("Unknown type: Missing"), "{}", err);
}

#[test]
fn resolve_rejects_duplicate_names() {
    assert!(resolve("struct S { x: u8; } struct S { y: u8; }").is_err());
    assert!(resolve("enum S { A } struct S { y: u8; }").is_err());
    assert!(resolve("struct S { x: u8; x: u16; }").is_err());
}

#[test]
fn resolve_rejects_size_on_scalar() {
    let err = resolve("struct S { x: u8 [size = 2]; }").unwrap_err();
    assert!(err.starts_with("S.x"), "{}", err);
}

#[test]
fn resolve_map_requires_key_and_structures() {
    assert!(resolve("struct E { id: u8; } struct S { m: map<E>; }").is_err());
    assert!(resolve("struct S { m: map<u8> [key = id]; }").is_err());
    assert!(resolve("struct S { x: u8 [key = x]; }").is_err());
    assert!(resolve("struct E { id: u8; } struct S { m: map<E> [key = id]; }").is_ok());
}

#[test]
fn resolve_any_requires_switch() {
    assert!(resolve("struct S { x: any; }").is_err());
    assert!(resolve("struct S { x: u8 [switch { true => u8 }]; }").is_err());
    assert!(resolve("struct S { x: any [switch { true => list<u8> }]; }").is_err());
}

#[test]
fn resolve_rejects_narrow_float() {
    assert!(resolve("struct S { x: f32 [byte_count = 2]; }").is_err());
    assert!(resolve("struct S { x: f64 [byte_count = 4]; }").is_ok());
}

#[test]
fn resolve_element_widths() {
    assert!(resolve("enum E { A } struct S { e: E [byte_count = 3]; }").is_err());
    assert!(resolve("enum E { A } struct S { e: E [byte_count = 12]; }").is_ok());
    assert!(resolve("struct S { x: list<f32> [size = 2, byte_count = 2]; }").is_err());
    assert!(resolve("struct S { x: list<f32> [byte_count = 2]; }").is_ok());
}

#[test]
fn resolve_rejects_nested_collections() {
    assert!(resolve("struct S { x: list<list<u8>>; }").is_err());
}

#[test]
fn resolve_union_tag_rules() {
    assert!(resolve("struct S { x: union<f32> { 0 => u8 }; }").is_err());
    assert!(resolve("struct S { x: union<string> { \"a\" => u8 }; }").is_err());
    assert!(resolve("struct S { x: union<string(4)> { \"abcd\" => u8 }; }").is_ok());
    assert!(resolve("enum K { A, B } struct S { x: union<K(1)> { 0 => u8, 1 => u16 }; }").is_ok());
}

#[test]
fn builtin_psd_schema_resolves() {
    let r = chunkio::psd::schema().expect("psd schema");
    assert!(r.get_struct(chunkio::psd::ROOT).is_some());
    assert!(r.get_struct("LayerSection").is_some());
}
