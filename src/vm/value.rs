use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use crate::bytecode::BinaryOp;
use crate::vm::builtins::BuiltinConstant;

/// A cubic bezier segment: start point, two control points, end point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CubicSegment {
    pub points: [(f32, f32); 4],
}

/// A composite curve assembled from consecutive cubic segments.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompositeBezier {
    pub segments: Vec<CubicSegment>,
}

/// The scalar value kinds flowing through the interpreter. No heap objects:
/// strings are shared `Rc<str>`, everything else is inline.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueKind {
    Null,
    Number(f32),
    /// A "relative delta" number: built-ins treat it as an offset from the
    /// current state rather than an absolute target.
    Delta(f32),
    Bool(bool),
    String(Rc<str>),
    BuiltinConstant(BuiltinConstant),
    Bezier(CompositeBezier),
}

impl ValueKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ValueKind::Null => "null",
            ValueKind::Number(_) => "number",
            ValueKind::Delta(_) => "delta",
            ValueKind::Bool(_) => "bool",
            ValueKind::String(_) => "string",
            ValueKind::BuiltinConstant(_) => "builtin-constant",
            ValueKind::Bezier(_) => "bezier",
        }
    }
}

/// A tagged scalar. `slot` records the global variable the value was loaded
/// from, if any; output-parameter built-ins write back through it.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub kind: ValueKind,
    pub slot: Option<u16>,
}

#[derive(Debug, Error, Clone, PartialEq)]
#[error("operator `{op}` not applicable to {lhs} and {rhs}")]
pub struct ArithmeticError {
    pub op: &'static str,
    pub lhs: &'static str,
    pub rhs: &'static str,
}

impl Value {
    pub fn null() -> Self {
        ValueKind::Null.into()
    }

    pub fn number(value: f32) -> Self {
        ValueKind::Number(value).into()
    }

    pub fn delta(value: f32) -> Self {
        ValueKind::Delta(value).into()
    }

    pub fn boolean(value: bool) -> Self {
        ValueKind::Bool(value).into()
    }

    pub fn string(value: impl Into<Rc<str>>) -> Self {
        ValueKind::String(value.into()).into()
    }

    pub fn constant(value: BuiltinConstant) -> Self {
        ValueKind::BuiltinConstant(value).into()
    }

    pub fn bezier(curve: CompositeBezier) -> Self {
        ValueKind::Bezier(curve).into()
    }

    /// Tag this value with the global slot it was loaded from.
    pub fn from_slot(mut self, slot: u16) -> Self {
        self.slot = Some(slot);
        self
    }

    pub fn is_truthy(&self) -> bool {
        match &self.kind {
            ValueKind::Null => false,
            ValueKind::Number(n) | ValueKind::Delta(n) => *n != 0.0,
            ValueKind::Bool(b) => *b,
            ValueKind::String(_) | ValueKind::BuiltinConstant(_) | ValueKind::Bezier(_) => true,
        }
    }

    pub fn as_number(&self) -> Option<f32> {
        match &self.kind {
            ValueKind::Number(n) | ValueKind::Delta(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            ValueKind::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<ValueKind> for Value {
    fn from(kind: ValueKind) -> Self {
        Value { kind, slot: None }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ValueKind::Null => write!(f, "null"),
            ValueKind::Number(n) => write!(f, "{n}"),
            ValueKind::Delta(n) => write!(f, "@{n}"),
            ValueKind::Bool(b) => write!(f, "{b}"),
            ValueKind::String(s) => write!(f, "{s}"),
            ValueKind::BuiltinConstant(c) => write!(f, "{}", c.name()),
            ValueKind::Bezier(curve) => write!(f, "<bezier {} segments>", curve.segments.len()),
        }
    }
}

/// Equality across all kind pairs. Same-kind compares by value (IEEE float
/// semantics for numbers); every cross-kind pair, null-vs-anything included,
/// compares `false` instead of erroring.
pub fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (&lhs.kind, &rhs.kind) {
        (ValueKind::Null, ValueKind::Null) => true,
        (ValueKind::Number(a), ValueKind::Number(b)) => a == b,
        (ValueKind::Delta(a), ValueKind::Delta(b)) => a == b,
        (ValueKind::Bool(a), ValueKind::Bool(b)) => a == b,
        (ValueKind::String(a), ValueKind::String(b)) => a == b,
        (ValueKind::BuiltinConstant(a), ValueKind::BuiltinConstant(b)) => a == b,
        (ValueKind::Bezier(a), ValueKind::Bezier(b)) => a == b,
        _ => false,
    }
}

/// The fixed coercion table for the generic binary operator set. Equality
/// routes through `values_equal` instead, because it must compare across
/// kinds.
pub fn apply_binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, ArithmeticError> {
    use BinaryOp::*;
    match op {
        And => return Ok(Value::boolean(lhs.is_truthy() && rhs.is_truthy())),
        Or => return Ok(Value::boolean(lhs.is_truthy() || rhs.is_truthy())),
        _ => {}
    }

    if let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) {
        let delta = matches!(lhs.kind, ValueKind::Delta(_)) || matches!(rhs.kind, ValueKind::Delta(_));
        let numeric = |v: f32| if delta { Value::delta(v) } else { Value::number(v) };
        return Ok(match op {
            Add => numeric(a + b),
            Subtract => numeric(a - b),
            Multiply => numeric(a * b),
            Divide => {
                if b == 0.0 {
                    numeric(0.0)
                } else {
                    numeric(a / b)
                }
            }
            Remainder => {
                if b == 0.0 {
                    numeric(0.0)
                } else {
                    numeric(a % b)
                }
            }
            Less => Value::boolean(a < b),
            LessOrEqual => Value::boolean(a <= b),
            Greater => Value::boolean(a > b),
            GreaterOrEqual => Value::boolean(a >= b),
            And | Or => unreachable!("handled above"),
        });
    }

    if op == Add {
        if let Some(result) = add_with_string(lhs, rhs) {
            return Ok(result);
        }
    }

    Err(ArithmeticError {
        op: op.name(),
        lhs: lhs.kind.kind_name(),
        rhs: rhs.kind.kind_name(),
    })
}

/// String-involving addition: an `"@"` left operand turns the numeric right
/// operand into a delta; any other string pairing falls back to
/// concatenation of the display forms.
fn add_with_string(lhs: &Value, rhs: &Value) -> Option<Value> {
    match (&lhs.kind, &rhs.kind) {
        (ValueKind::String(prefix), ValueKind::Number(n)) if prefix.as_ref() == "@" => {
            Some(Value::delta(*n))
        }
        (ValueKind::String(_), ValueKind::Number(_) | ValueKind::String(_))
        | (ValueKind::Number(_), ValueKind::String(_)) => {
            Some(Value::string(format!("{lhs}{rhs}")))
        }
        _ => None,
    }
}

pub fn negate(value: &Value) -> Result<Value, ArithmeticError> {
    match &value.kind {
        ValueKind::Number(n) => Ok(Value::number(-n)),
        ValueKind::Delta(n) => Ok(Value::delta(-n)),
        other => Err(ArithmeticError {
            op: "neg",
            lhs: other.kind_name(),
            rhs: "-",
        }),
    }
}

pub fn logical_not(value: &Value) -> Value {
    Value::boolean(!value.is_truthy())
}

/// The `@` delta operator: reinterprets a numeric value as a relative delta.
pub fn to_delta(value: &Value) -> Result<Value, ArithmeticError> {
    match &value.kind {
        ValueKind::Number(n) | ValueKind::Delta(n) => Ok(Value::delta(*n)),
        other => Err(ArithmeticError {
            op: "delta",
            lhs: other.kind_name(),
            rhs: "-",
        }),
    }
}
