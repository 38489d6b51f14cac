//! Expressions over already-decoded fields: byte counts, sizes, conditions, match
//! values and map keys.
//!
//! Expressions are small trees evaluated against the [`ContextStack`]. Where the
//! textual language is not enough, a native closure can be injected with
//! [`Expr::native`].

use crate::context::{select_element, select_field, ContextStack};
use crate::error::DecodeError;
use crate::value::Value;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum Expr {
    Int(i64),
    Str(String),
    Bool(bool),
    /// `Enum::Variant`.
    EnumVariant { enum_name: String, variant: String },
    Field(Operand),
    /// `operand[index].field...`: element of a collection, which may still be filling.
    Select { base: Operand, steps: Vec<Step> },
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
    Native(NativeExpr),
}

#[derive(Debug, Clone)]
pub enum Step {
    Index(Box<Expr>),
    Field(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Max,
    Min,
    Abs,
    /// Element count of a collection, or the length of a string or byte array.
    Len,
}

impl Func {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "max" => Some(Func::Max),
            "min" => Some(Func::Min),
            "abs" => Some(Func::Abs),
            "len" => Some(Func::Len),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Func::Max => "max",
            Func::Min => "min",
            Func::Abs => "abs",
            Func::Len => "len",
        }
    }
}

type NativeFn = dyn Fn(&ContextStack<'_>) -> Result<Scalar, DecodeError> + Send + Sync;

/// Caller-supplied evaluation closure.
#[derive(Clone)]
pub struct NativeExpr {
    pub label: String,
    pub func: Arc<NativeFn>,
}

impl fmt::Debug for NativeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeExpr({})", self.label)
    }
}

/// Field reference. `path[0]` names a field of the nearest frame that declares it
/// (or, failing that, the nearest frame of that type); further segments walk into
/// decoded sub-structures and maps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operand {
    pub frame: FrameRef,
    pub path: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRef {
    Auto,
    /// Explicit depth from the top of the stack (`$0` is the current structure).
    Depth(usize),
}

impl Operand {
    pub fn field(name: &str) -> Self {
        Operand { frame: FrameRef::Auto, path: name.split('.').map(str::to_string).collect() }
    }

    pub fn at_depth(depth: usize, name: &str) -> Self {
        Operand {
            frame: FrameRef::Depth(depth),
            path: name.split('.').map(str::to_string).collect(),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let FrameRef::Depth(d) = self.frame {
            write!(f, "${}.", d)?;
        }
        write!(f, "{}", self.path.join("."))
    }
}

/// Result of evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Bytes(Vec<u8>),
    Enum { name: String, index: Option<u64> },
    /// Compound value (structure, list, map) compared structurally.
    Ref(Value),
}

impl Scalar {
    pub fn from_value(v: &Value) -> Scalar {
        match v {
            Value::Null => Scalar::Null,
            Value::Bool(b) => Scalar::Bool(*b),
            Value::U64(x) => Scalar::Int(*x as i64),
            Value::Float(x) => Scalar::Float(*x as f64),
            Value::Double(x) => Scalar::Float(*x),
            Value::String(s) => Scalar::Str(s.clone()),
            Value::Bytes(b) => Scalar::Bytes(b.clone()),
            Value::Enum { name, index } => Scalar::Enum { name: name.clone(), index: Some(*index) },
            other => match other.as_i64() {
                Some(n) => Scalar::Int(n),
                None => Scalar::Ref(other.clone()),
            },
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Scalar::Int(n) => Some(*n),
            Scalar::Bool(b) => Some(*b as i64),
            Scalar::Enum { index: Some(i), .. } => Some(*i as i64),
            _ => None,
        }
    }

    fn as_float(&self) -> Option<f64> {
        match self {
            Scalar::Float(x) => Some(*x),
            other => other.as_int().map(|n| n as f64),
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Scalar::Null => false,
            Scalar::Int(n) => *n != 0,
            Scalar::Float(x) => *x != 0.0,
            Scalar::Bool(b) => *b,
            Scalar::Str(s) => !s.is_empty(),
            Scalar::Bytes(b) => !b.is_empty(),
            Scalar::Enum { .. } | Scalar::Ref(_) => true,
        }
    }

    /// Equality across representations: strings against raw bytes, enums against
    /// their variant name or index, integers against floats.
    pub fn loose_eq(&self, other: &Scalar) -> bool {
        use Scalar::*;
        match (self, other) {
            (Null, Null) => true,
            (Int(a), Int(b)) => a == b,
            (Bool(a), Bool(b)) => a == b,
            (Str(a), Str(b)) => a == b,
            (Bytes(a), Bytes(b)) => a == b,
            (Str(s), Bytes(b)) | (Bytes(b), Str(s)) => {
                s.chars().count() == b.len() && s.chars().zip(b).all(|(c, &x)| c as u32 == x as u32)
            }
            (Enum { name: a, .. }, Enum { name: b, .. }) => a == b,
            (Enum { name, .. }, Str(s)) | (Str(s), Enum { name, .. }) => name == s,
            (Enum { index: Some(i), .. }, Int(n)) | (Int(n), Enum { index: Some(i), .. }) => {
                *n >= 0 && *i == *n as u64
            }
            (Ref(a), Ref(b)) => a == b,
            (Float(_), _) | (_, Float(_)) => match (self.as_float(), other.as_float()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
            _ => false,
        }
    }

    fn compare(&self, other: &Scalar) -> Option<Ordering> {
        match (self, other) {
            (Scalar::Int(a), Scalar::Int(b)) => Some(a.cmp(b)),
            (Scalar::Str(a), Scalar::Str(b)) => Some(a.cmp(b)),
            _ => self.as_float()?.partial_cmp(&other.as_float()?),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Scalar::Null => "null",
            Scalar::Int(_) => "integer",
            Scalar::Float(_) => "float",
            Scalar::Bool(_) => "bool",
            Scalar::Str(_) => "string",
            Scalar::Bytes(_) => "bytes",
            Scalar::Enum { .. } => "enum",
            Scalar::Ref(_) => "compound value",
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, "null"),
            Scalar::Int(n) => write!(f, "{}", n),
            Scalar::Float(x) => write!(f, "{}", x),
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Str(s) => write!(f, "{:?}", s),
            Scalar::Bytes(b) => write!(f, "{}", Value::Bytes(b.clone())),
            Scalar::Enum { name, .. } => write!(f, "{}", name),
            Scalar::Ref(v) => write!(f, "{}", v),
        }
    }
}

impl Expr {
    pub fn int(n: i64) -> Expr {
        Expr::Int(n)
    }

    pub fn str(s: &str) -> Expr {
        Expr::Str(s.to_string())
    }

    pub fn field(name: &str) -> Expr {
        Expr::Field(Operand::field(name))
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn equals(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Eq, lhs, rhs)
    }

    pub fn native<F>(label: &str, func: F) -> Expr
    where
        F: Fn(&ContextStack<'_>) -> Result<Scalar, DecodeError> + Send + Sync + 'static,
    {
        Expr::Native(NativeExpr { label: label.to_string(), func: Arc::new(func) })
    }

    pub fn eval(&self, stack: &ContextStack<'_>) -> Result<Scalar, DecodeError> {
        match self {
            Expr::Int(n) => Ok(Scalar::Int(*n)),
            Expr::Str(s) => Ok(Scalar::Str(s.clone())),
            Expr::Bool(b) => Ok(Scalar::Bool(*b)),
            Expr::EnumVariant { variant, .. } => Ok(Scalar::Enum { name: variant.clone(), index: None }),
            Expr::Field(op) => stack.resolve(op).map(Scalar::from_value),
            Expr::Select { .. } => self.select(stack).map(Scalar::from_value),
            Expr::Unary(op, e) => {
                let v = e.eval(stack)?;
                match op {
                    UnaryOp::Not => Ok(Scalar::Bool(!v.truthy())),
                    UnaryOp::Neg => match v {
                        Scalar::Float(x) => Ok(Scalar::Float(-x)),
                        other => Ok(Scalar::Int(int_operand(&other, "-")?.wrapping_neg())),
                    },
                    UnaryOp::BitNot => Ok(Scalar::Int(!int_operand(&v, "~")?)),
                }
            }
            Expr::Binary(BinaryOp::And, l, r) => {
                Ok(Scalar::Bool(l.eval(stack)?.truthy() && r.eval(stack)?.truthy()))
            }
            Expr::Binary(BinaryOp::Or, l, r) => {
                Ok(Scalar::Bool(l.eval(stack)?.truthy() || r.eval(stack)?.truthy()))
            }
            Expr::Binary(op, l, r) => binary(*op, l.eval(stack)?, r.eval(stack)?),
            Expr::Call(Func::Len, args) => match args.as_slice() {
                [arg] => arg.length(stack),
                _ => Err(DecodeError::Expression(format!("len called with {} argument(s)", args.len()))),
            },
            Expr::Call(func, args) => {
                let args = args.iter().map(|a| a.eval(stack)).collect::<Result<Vec<_>, _>>()?;
                call(*func, &args)
            }
            Expr::Native(n) => (n.func)(stack),
        }
    }

    /// Evaluate as a byte or element count: a non-negative integer.
    pub fn eval_count(&self, stack: &ContextStack<'_>) -> Result<u64, DecodeError> {
        let v = self.eval(stack)?;
        match v.as_int() {
            Some(n) if n >= 0 => Ok(n as u64),
            Some(n) => Err(DecodeError::Expression(format!("`{}` is negative ({})", self, n))),
            None => Err(DecodeError::Expression(format!(
                "`{}` is a {}, expected an integer",
                self,
                v.kind()
            ))),
        }
    }

    pub fn eval_bool(&self, stack: &ContextStack<'_>) -> Result<bool, DecodeError> {
        Ok(self.eval(stack)?.truthy())
    }

    /// Field references resolve to the value in place, without copying it.
    fn value_ref<'v>(&self, stack: &'v ContextStack<'_>) -> Result<Option<&'v Value>, DecodeError> {
        match self {
            Expr::Field(op) => stack.resolve(op).map(Some),
            Expr::Select { .. } => self.select(stack).map(Some),
            _ => Ok(None),
        }
    }

    fn select<'v>(&self, stack: &'v ContextStack<'_>) -> Result<&'v Value, DecodeError> {
        let (base, steps) = match self {
            Expr::Select { base, steps } => (base, steps),
            other => return Err(DecodeError::Expression(format!("`{}` is not a selection", other))),
        };
        let mut v = stack.resolve(base)?;
        for step in steps {
            let next = match step {
                Step::Field(name) => select_field(v, name),
                Step::Index(e) => select_element(v, &e.eval(stack)?),
            };
            v = next.map_err(|reason| DecodeError::UnresolvedOperand { operand: self.to_string(), reason })?;
        }
        Ok(v)
    }

    fn length(&self, stack: &ContextStack<'_>) -> Result<Scalar, DecodeError> {
        let n = match self.value_ref(stack)? {
            Some(v) => value_len(v),
            None => match self.eval(stack)? {
                Scalar::Str(s) => Some(s.chars().count()),
                Scalar::Bytes(b) => Some(b.len()),
                Scalar::Ref(v) => value_len(&v),
                _ => None,
            },
        };
        n.map(|n| Scalar::Int(n as i64))
            .ok_or_else(|| DecodeError::Expression(format!("`{}` has no length", self)))
    }
}

fn value_len(v: &Value) -> Option<usize> {
    match v {
        Value::List(items) => Some(items.len()),
        Value::Map(entries) => Some(entries.len()),
        Value::Bytes(b) => Some(b.len()),
        Value::String(s) => Some(s.chars().count()),
        _ => None,
    }
}

fn int_operand(v: &Scalar, op: &str) -> Result<i64, DecodeError> {
    v.as_int()
        .ok_or_else(|| DecodeError::Expression(format!("`{}` needs an integer, found a {}", op, v.kind())))
}

fn binary(op: BinaryOp, a: Scalar, b: Scalar) -> Result<Scalar, DecodeError> {
    use BinaryOp::*;
    match op {
        Eq => return Ok(Scalar::Bool(a.loose_eq(&b))),
        Ne => return Ok(Scalar::Bool(!a.loose_eq(&b))),
        Lt | Le | Gt | Ge => {
            let ord = a.compare(&b).ok_or_else(|| {
                DecodeError::Expression(format!("cannot compare {} with {}", a.kind(), b.kind()))
            })?;
            let r = match op {
                Lt => ord == Ordering::Less,
                Le => ord != Ordering::Greater,
                Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            };
            return Ok(Scalar::Bool(r));
        }
        _ => {}
    }
    if matches!(op, Add | Sub | Mul | Div) && (matches!(a, Scalar::Float(_)) || matches!(b, Scalar::Float(_))) {
        let (x, y) = match (a.as_float(), b.as_float()) {
            (Some(x), Some(y)) => (x, y),
            _ => return Err(DecodeError::Expression(format!("{:?} on {} and {}", op, a.kind(), b.kind()))),
        };
        return Ok(Scalar::Float(match op {
            Add => x + y,
            Sub => x - y,
            Mul => x * y,
            _ => x / y,
        }));
    }
    let sym = format!("{:?}", op);
    let x = int_operand(&a, &sym)?;
    let y = int_operand(&b, &sym)?;
    let n = match op {
        Add => x.wrapping_add(y),
        Sub => x.wrapping_sub(y),
        Mul => x.wrapping_mul(y),
        Div | Rem if y == 0 => return Err(DecodeError::Expression("division by zero".to_string())),
        Div => x.wrapping_div(y),
        Rem => x.wrapping_rem(y),
        BitAnd => x & y,
        BitOr => x | y,
        BitXor => x ^ y,
        Shl => x.wrapping_shl(y as u32),
        Shr => x.wrapping_shr(y as u32),
        _ => return Err(DecodeError::Expression(format!("unsupported operator {}", op.symbol()))),
    };
    Ok(Scalar::Int(n))
}

fn call(func: Func, args: &[Scalar]) -> Result<Scalar, DecodeError> {
    let ints = args
        .iter()
        .map(|a| int_operand(a, &format!("{:?}", func)))
        .collect::<Result<Vec<_>, _>>()?;
    let r = match (func, ints.as_slice()) {
        (Func::Abs, [x]) => x.wrapping_abs(),
        (Func::Max, [first, rest @ ..]) => rest.iter().fold(*first, |m, x| m.max(*x)),
        (Func::Min, [first, rest @ ..]) => rest.iter().fold(*first, |m, x| m.min(*x)),
        _ => {
            return Err(DecodeError::Expression(format!(
                "{:?} called with {} argument(s)",
                func,
                args.len()
            )))
        }
    };
    Ok(Scalar::Int(r))
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Int(n) => write!(f, "{}", n),
            Expr::Str(s) => write!(f, "{:?}", s),
            Expr::Bool(b) => write!(f, "{}", b),
            Expr::EnumVariant { enum_name, variant } => write!(f, "{}::{}", enum_name, variant),
            Expr::Field(op) => write!(f, "{}", op),
            Expr::Unary(op, e) => {
                let sym = match op {
                    UnaryOp::Neg => "-",
                    UnaryOp::Not => "!",
                    UnaryOp::BitNot => "~",
                };
                write!(f, "{}{}", sym, e)
            }
            Expr::Binary(op, l, r) => write!(f, "({} {} {})", l, op.symbol(), r),
            Expr::Select { base, steps } => {
                write!(f, "{}", base)?;
                for step in steps {
                    match step {
                        Step::Index(e) => write!(f, "[{}]", e)?,
                        Step::Field(name) => write!(f, ".{}", name)?,
                    }
                }
                Ok(())
            }
            Expr::Call(func, args) => {
                write!(f, "{}(", func.name())?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, ")")
            }
            Expr::Native(n) => write!(f, "<{}>", n.label),
        }
    }
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Instance;

    fn stack_with(fields: &[(&str, Value)]) -> ContextStack<'static> {
        let mut inst = Instance::named("T");
        for (name, v) in fields {
            inst.set(name, v.clone());
        }
        let mut stack = ContextStack::new();
        stack.push(inst);
        stack
    }

    #[test]
    fn arithmetic_over_fields() {
        let stack = stack_with(&[("length", Value::U32(7))]);
        let e = Expr::binary(
            BinaryOp::Add,
            Expr::field("length"),
            Expr::binary(BinaryOp::BitAnd, Expr::field("length"), Expr::int(1)),
        );
        assert_eq!(e.eval_count(&stack).unwrap(), 8);
    }

    #[test]
    fn negative_count_is_an_error() {
        let stack = stack_with(&[("n", Value::I16(-3))]);
        assert!(Expr::field("n").eval_count(&stack).is_err());
        let abs = Expr::Call(Func::Abs, vec![Expr::field("n")]);
        assert_eq!(abs.eval_count(&stack).unwrap(), 3);
    }

    #[test]
    fn division_by_zero_fails() {
        let stack = ContextStack::new();
        let e = Expr::binary(BinaryOp::Div, Expr::int(1), Expr::int(0));
        assert!(matches!(e.eval(&stack), Err(DecodeError::Expression(_))));
    }

    #[test]
    fn string_matches_raw_bytes() {
        let bytes = Scalar::Bytes(b"8BPS".to_vec());
        assert!(Scalar::Str("8BPS".into()).loose_eq(&bytes));
        assert!(!Scalar::Str("8BPT".into()).loose_eq(&bytes));
    }

    #[test]
    fn enum_compares_by_name_or_index() {
        let e = Scalar::Enum { name: "Rgb".into(), index: Some(3) };
        assert!(e.loose_eq(&Scalar::Enum { name: "Rgb".into(), index: None }));
        assert!(e.loose_eq(&Scalar::Int(3)));
        assert!(!e.loose_eq(&Scalar::Str("Cmyk".into())));
    }

    #[test]
    fn native_closure_sees_stack() {
        let stack = stack_with(&[("count", Value::U8(4))]);
        let e = Expr::native("count * 2", |s| {
            let n = s.resolve(&Operand::field("count"))?.as_i64().unwrap_or(0);
            Ok(Scalar::Int(n * 2))
        });
        assert_eq!(e.eval_count(&stack).unwrap(), 8);
    }

    #[test]
    fn len_and_element_selection() {
        let layer = |channels: i16| Value::Struct(Instance::named("Layer").with("channels", Value::I16(channels)));
        let stack = stack_with(&[
            ("layers", Value::List(vec![layer(3), layer(4)])),
            ("done", Value::List(vec![Value::Null])),
        ]);
        let len = Expr::Call(Func::Len, vec![Expr::field("done")]);
        assert_eq!(len.eval_count(&stack).unwrap(), 1);
        let pick = Expr::Select {
            base: Operand::field("layers"),
            steps: vec![Step::Index(Box::new(len)), Step::Field("channels".to_string())],
        };
        assert_eq!(pick.to_string(), "layers[len(done)].channels");
        assert_eq!(pick.eval_count(&stack).unwrap(), 4);

        let out_of_range = Expr::Select {
            base: Operand::field("layers"),
            steps: vec![Step::Index(Box::new(Expr::int(2)))],
        };
        assert!(matches!(out_of_range.eval(&stack), Err(DecodeError::UnresolvedOperand { .. })));
    }

    #[test]
    fn and_short_circuits_unresolved_operand() {
        let stack = stack_with(&[("flag", Value::Bool(false))]);
        let e = Expr::binary(BinaryOp::And, Expr::field("flag"), Expr::field("missing"));
        assert!(!e.eval_bool(&stack).unwrap());
    }
}
