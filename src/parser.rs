//! Parse chunk definition source into a [`Schema`] using PEST.

use crate::ast::*;
use crate::expr::{BinaryOp, Expr, FrameRef, Func, Operand, Step, UnaryOp};
use pest::iterators::{Pair, Pairs};
use pest::Parser;
use pest_derive::Parser as PestParser;

#[derive(PestParser)]
#[grammar = "grammar.pest"]
struct ChunkParser;

/// Parse definition source into a schema (not yet resolved).
pub fn parse(source: &str) -> Result<Schema, String> {
    let pairs = ChunkParser::parse(Rule::schema, source).map_err(|e| format!("Parse error: {}", e))?;
    let pair = pairs.into_iter().next().ok_or("Empty parse")?;
    let mut schema = Schema::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::enum_def => schema.enums.push(build_enum(inner)?),
            Rule::struct_def => schema.structs.push(build_struct(inner)?),
            _ => {}
        }
    }
    Ok(schema)
}

/// Parse a standalone expression, e.g. `length + (length & 1)`.
pub fn parse_expr(source: &str) -> Result<Expr, String> {
    let pairs = ChunkParser::parse(Rule::expr_only, source).map_err(|e| format!("Parse error: {}", e))?;
    let top = pairs.into_iter().next().ok_or("Empty parse")?;
    let expr = top
        .into_inner()
        .find(|p| p.as_rule() == Rule::expr)
        .ok_or("expression: missing body")?;
    build_expr(expr)
}

fn build_enum(pair: Pair<Rule>) -> Result<EnumDef, String> {
    let mut idents = pair.into_inner().filter(|p| p.as_rule() == Rule::ident);
    let name = idents.next().ok_or("enum: missing name")?.as_str().to_string();
    let variants: Vec<String> = idents.map(|p| p.as_str().to_string()).collect();
    Ok(EnumDef { name, variants })
}

fn build_struct(pair: Pair<Rule>) -> Result<StructDef, String> {
    let mut name = String::new();
    let mut fields = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::ident => name = inner.as_str().to_string(),
            Rule::field => fields.push(build_field(inner)?),
            _ => {}
        }
    }
    if name.is_empty() {
        return Err("struct: missing name".to_string());
    }
    Ok(StructDef { name, fields })
}

fn build_field(pair: Pair<Rule>) -> Result<ChunkDescriptor, String> {
    let mut it = pair.into_inner();
    let name = it.next().ok_or("field: missing name")?.as_str().to_string();
    let ty = build_type(it.next().ok_or("field: missing type")?)?;
    let mut chunk = ChunkDescriptor::new(&name, ty);
    if let Some(attrs) = it.next() {
        for attr in attrs.into_inner() {
            apply_attribute(&mut chunk, attr).map_err(|e| format!("{}: {}", name, e))?;
        }
    }
    Ok(chunk)
}

fn apply_attribute(chunk: &mut ChunkDescriptor, attr: Pair<Rule>) -> Result<(), String> {
    let rule = attr.as_rule();
    let mut inner = attr.into_inner();
    match rule {
        Rule::byte_count_attr => set_once(&mut chunk.byte_count, count(expr_arg(&mut inner)?), "byte_count"),
        Rule::size_attr => set_once(&mut chunk.size, count(expr_arg(&mut inner)?), "size"),
        Rule::read_if_attr => set_once(&mut chunk.read_if, expr_arg(&mut inner)?, "read_if"),
        Rule::stop_if_attr => set_once(&mut chunk.stop_if, expr_arg(&mut inner)?, "stop_if"),
        Rule::match_attr => set_once(&mut chunk.match_value, expr_arg(&mut inner)?, "match"),
        Rule::key_attr => set_once(&mut chunk.key, expr_arg(&mut inner)?, "key"),
        Rule::encoding_attr => {
            let lit = inner.next().ok_or("encoding: missing name")?;
            let name = string_value(lit)?;
            chunk.encoding = Encoding::parse(&name).ok_or_else(|| format!("unknown encoding {}", name))?;
            Ok(())
        }
        Rule::switch_attr => {
            if chunk.has_switch() {
                return Err("duplicate switch".to_string());
            }
            for case in inner {
                let mut parts = case.into_inner();
                let test = build_expr(parts.next().ok_or("switch case: missing test")?)?;
                let target = build_type(parts.next().ok_or("switch case: missing type")?)?;
                chunk.switch.push(SwitchCase { test, target });
            }
            Ok(())
        }
        Rule::debug_attr => {
            chunk.debug = true;
            Ok(())
        }
        other => Err(format!("unexpected attribute {:?}", other)),
    }
}

fn expr_arg(inner: &mut Pairs<Rule>) -> Result<Expr, String> {
    build_expr(inner.next().ok_or("attribute: missing expression")?)
}

fn set_once<T>(slot: &mut Option<T>, value: T, what: &str) -> Result<(), String> {
    if slot.is_some() {
        return Err(format!("duplicate {}", what));
    }
    *slot = Some(value);
    Ok(())
}

/// A non-negative integer literal is a fixed count; anything else is evaluated.
fn count(e: Expr) -> Count {
    match e {
        Expr::Int(n) if n >= 0 => Count::Fixed(n as u64),
        other => Count::Dynamic(other),
    }
}

fn build_type(pair: Pair<Rule>) -> Result<FieldType, String> {
    let inner = pair.into_inner().next().ok_or("type: empty")?;
    match inner.as_rule() {
        Rule::ident => Ok(type_from_name(inner.as_str())),
        Rule::list_type => Ok(FieldType::list(build_type(inner.into_inner().next().ok_or("list: missing element")?)?)),
        Rule::map_type => Ok(FieldType::map(build_type(inner.into_inner().next().ok_or("map: missing element")?)?)),
        Rule::union_type => {
            let mut it = inner.into_inner();
            let tag = build_tag(it.next().ok_or("union: missing tag")?)?;
            let mut arms = Vec::new();
            for arm in it {
                let mut parts = arm.into_inner();
                let lit = build_arm_literal(parts.next().ok_or("union arm: missing literal")?)?;
                let ty = build_type(parts.next().ok_or("union arm: missing type")?)?;
                arms.push((lit, ty));
            }
            Ok(FieldType::Union(Box::new(UnionSpec { tag, arms })))
        }
        other => Err(format!("unexpected type {:?}", other)),
    }
}

fn type_from_name(name: &str) -> FieldType {
    if let Some(b) = BaseType::from_name(name) {
        return FieldType::Base(b);
    }
    match name {
        "string" => FieldType::String,
        "minstring" => FieldType::MinString,
        "bytes" => FieldType::Bytes,
        "void" => FieldType::Void,
        "any" => FieldType::Any,
        other => FieldType::named(other),
    }
}

fn build_tag(pair: Pair<Rule>) -> Result<TagSpec, String> {
    let mut it = pair.into_inner();
    let tag_type = type_from_name(it.next().ok_or("tag: missing type")?.as_str());
    let byte_count = match it.next() {
        Some(n) => Some(n.as_str().parse::<u64>().map_err(|e| format!("tag width: {}", e))?),
        None => None,
    };
    Ok(TagSpec { tag_type, byte_count })
}

fn build_arm_literal(pair: Pair<Rule>) -> Result<Literal, String> {
    let lit = pair.into_inner().next().ok_or("literal: empty")?;
    match lit.as_rule() {
        Rule::hex_lit => Ok(Literal::Int(parse_hex(lit.as_str())?)),
        Rule::int_lit | Rule::neg_int => {
            lit.as_str().parse::<i64>().map(Literal::Int).map_err(|e| format!("{}: {}", lit.as_str(), e))
        }
        Rule::bool_lit => Ok(Literal::Bool(lit.as_str() == "true")),
        Rule::string_lit => Ok(Literal::String(string_value(lit)?)),
        other => Err(format!("unexpected literal {:?}", other)),
    }
}

fn parse_hex(s: &str) -> Result<i64, String> {
    u64::from_str_radix(&s[2..], 16).map(|n| n as i64).map_err(|e| format!("{}: {}", s, e))
}

fn string_value(pair: Pair<Rule>) -> Result<String, String> {
    let raw = pair.into_inner().next().map(|p| p.as_str()).unwrap_or("");
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('x') => {
                let hex: String = chars.by_ref().take(2).collect();
                let b = u8::from_str_radix(&hex, 16).map_err(|_| format!("bad escape \\x{}", hex))?;
                out.push(b as char);
            }
            Some(other) => out.push(other),
            None => return Err("dangling escape".to_string()),
        }
    }
    Ok(out)
}

fn build_expr(pair: Pair<Rule>) -> Result<Expr, String> {
    match pair.as_rule() {
        Rule::expr => build_expr(pair.into_inner().next().ok_or("expr: empty")?),
        Rule::or_expr
        | Rule::and_expr
        | Rule::cmp_expr
        | Rule::bitor_expr
        | Rule::bitxor_expr
        | Rule::bitand_expr
        | Rule::shift_expr
        | Rule::sum_expr
        | Rule::product_expr => {
            let mut it = pair.into_inner();
            let mut lhs = build_expr(it.next().ok_or("expr: missing operand")?)?;
            while let Some(op) = it.next() {
                let rhs = build_expr(it.next().ok_or("expr: missing right operand")?)?;
                lhs = Expr::binary(binary_op(op.as_str())?, lhs, rhs);
            }
            Ok(lhs)
        }
        Rule::unary_expr => {
            let parts: Vec<Pair<Rule>> = pair.into_inner().collect();
            let (primary, ops) = parts.split_last().ok_or("unary: empty")?;
            let mut e = build_expr(primary.clone())?;
            for op in ops.iter().rev() {
                let op = match op.as_str() {
                    "-" => UnaryOp::Neg,
                    "!" => UnaryOp::Not,
                    _ => UnaryOp::BitNot,
                };
                e = Expr::Unary(op, Box::new(e));
            }
            Ok(e)
        }
        Rule::call => {
            let mut it = pair.into_inner();
            let name = it.next().ok_or("call: missing name")?.as_str();
            let func = Func::from_name(name).ok_or_else(|| format!("unknown function {}", name))?;
            let args = it.map(build_expr).collect::<Result<Vec<_>, _>>()?;
            Ok(Expr::Call(func, args))
        }
        Rule::hex_lit => Ok(Expr::Int(parse_hex(pair.as_str())?)),
        Rule::int_lit => pair
            .as_str()
            .parse::<i64>()
            .map(Expr::Int)
            .map_err(|e| format!("{}: {}", pair.as_str(), e)),
        Rule::bool_lit => Ok(Expr::Bool(pair.as_str() == "true")),
        Rule::string_lit => Ok(Expr::Str(string_value(pair)?)),
        Rule::enum_lit => {
            let mut it = pair.into_inner();
            let enum_name = it.next().ok_or("enum literal: missing type")?.as_str().to_string();
            let variant = it.next().ok_or("enum literal: missing variant")?.as_str().to_string();
            Ok(Expr::EnumVariant { enum_name, variant })
        }
        Rule::operand => Ok(Expr::Field(build_operand(pair)?)),
        Rule::selection => {
            let mut it = pair.into_inner();
            let base = build_operand(it.next().ok_or("selection: missing operand")?)?;
            let steps = it
                .map(|part| -> Result<Step, String> {
                    match part.as_rule() {
                        Rule::element => {
                            let index = part.into_inner().next().ok_or("element: missing index")?;
                            Ok(Step::Index(Box::new(build_expr(index)?)))
                        }
                        _ => Ok(Step::Field(part.as_str().to_string())),
                    }
                })
                .collect::<Result<Vec<_>, String>>()?;
            Ok(Expr::Select { base, steps })
        }
        other => Err(format!("unexpected expression {:?}", other)),
    }
}

fn build_operand(pair: Pair<Rule>) -> Result<Operand, String> {
    let mut frame = FrameRef::Auto;
    let mut path = Vec::new();
    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::depth => {
                let d = part.as_str().parse::<usize>().map_err(|e| format!("depth: {}", e))?;
                frame = FrameRef::Depth(d);
            }
            _ => path.push(part.as_str().to_string()),
        }
    }
    Ok(Operand { frame, path })
}

fn binary_op(s: &str) -> Result<BinaryOp, String> {
    Ok(match s {
        "||" => BinaryOp::Or,
        "&&" => BinaryOp::And,
        "==" => BinaryOp::Eq,
        "!=" => BinaryOp::Ne,
        "<" => BinaryOp::Lt,
        "<=" => BinaryOp::Le,
        ">" => BinaryOp::Gt,
        ">=" => BinaryOp::Ge,
        "|" => BinaryOp::BitOr,
        "^" => BinaryOp::BitXor,
        "&" => BinaryOp::BitAnd,
        "<<" => BinaryOp::Shl,
        ">>" => BinaryOp::Shr,
        "+" => BinaryOp::Add,
        "-" => BinaryOp::Sub,
        "*" => BinaryOp::Mul,
        "/" => BinaryOp::Div,
        "%" => BinaryOp::Rem,
        other => return Err(format!("unknown operator {}", other)),
    })
}
