use crate::ast::{BinaryOp, UnaryOp};
use crate::error::{DroyError, RuntimeErrorKind, Span};
use crate::value::Value;
use std::cmp::Ordering;

pub fn binary(operator: BinaryOp, left: &Value, right: &Value, span: Span) -> Result<Value, DroyError> {
    match operator {
        BinaryOp::Add => add(left, right, span),
        BinaryOp::Subtract => numeric(operator, left, right, span, |l, r| Ok(l - r)),
        BinaryOp::Multiply => numeric(operator, left, right, span, |l, r| Ok(l * r)),
        BinaryOp::Divide => numeric(operator, left, right, span, |l, r| {
            if r == 0.0 {
                Err(division_by_zero(span, "Division"))
            } else {
                Ok(l / r)
            }
        }),
        BinaryOp::Modulo => numeric(operator, left, right, span, |l, r| {
            if r == 0.0 {
                Err(division_by_zero(span, "Modulo"))
            } else {
                Ok(l % r)
            }
        }),
        BinaryOp::Power => numeric(operator, left, right, span, |l, r| Ok(l.powf(r))),
        BinaryOp::Equal => Ok(Value::Boolean(left == right)),
        BinaryOp::NotEqual => Ok(Value::Boolean(left != right)),
        BinaryOp::Less => Ok(Value::Boolean(compare(left, right) == Some(Ordering::Less))),
        BinaryOp::LessEqual => Ok(Value::Boolean(matches!(
            compare(left, right),
            Some(Ordering::Less | Ordering::Equal)
        ))),
        BinaryOp::Greater => Ok(Value::Boolean(compare(left, right) == Some(Ordering::Greater))),
        BinaryOp::GreaterEqual => Ok(Value::Boolean(matches!(
            compare(left, right),
            Some(Ordering::Greater | Ordering::Equal)
        ))),
        BinaryOp::BitAnd => integer(operator, left, right, span, |l, r| l & r),
        BinaryOp::BitOr => integer(operator, left, right, span, |l, r| l | r),
        BinaryOp::BitXor => integer(operator, left, right, span, |l, r| l ^ r),
        BinaryOp::ShiftLeft => integer(operator, left, right, span, |l, r| l.wrapping_shl(r as u32 & 63)),
        BinaryOp::ShiftRight => integer(operator, left, right, span, |l, r| l.wrapping_shr(r as u32 & 63)),
    }
}

pub fn unary(operator: UnaryOp, operand: &Value, span: Span) -> Result<Value, DroyError> {
    match operator {
        UnaryOp::Not => Ok(Value::Boolean(!operand.is_truthy())),
        UnaryOp::Negate => match operand {
            Value::Number(n) => Ok(Value::Number(-n)),
            _ => Err(type_mismatch(span, format!("Cannot negate {}", operand.type_name()))),
        },
        UnaryOp::Plus => match operand {
            Value::Number(n) => Ok(Value::Number(*n)),
            _ => Err(type_mismatch(
                span,
                format!("Unary '+' expects a number, got {}", operand.type_name()),
            )),
        },
        UnaryOp::BitNot => match operand {
            Value::Number(n) => Ok(Value::Number(!(*n as i64) as f64)),
            _ => Err(type_mismatch(
                span,
                format!("Cannot apply '~' to {}", operand.type_name()),
            )),
        },
        UnaryOp::Increment | UnaryOp::Decrement => {
            let delta = if operator == UnaryOp::Increment { 1.0 } else { -1.0 };
            match operand {
                Value::Number(n) => Ok(Value::Number(n + delta)),
                _ => Err(type_mismatch(
                    span,
                    format!("Cannot increment or decrement {}", operand.type_name()),
                )),
            }
        }
    }
}

/// Ordering between same-kind numbers or strings; `None` for every other
/// pairing, which makes all relational operators false.
pub fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.partial_cmp(r),
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        _ => None,
    }
}

fn add(left: &Value, right: &Value, span: Span) -> Result<Value, DroyError> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => Ok(Value::Number(l + r)),
        (Value::String(_), _) | (_, Value::String(_)) => {
            Ok(Value::String(format!("{}{}", left, right)))
        }
        (Value::Array(l), Value::Array(r)) => {
            let mut items = l.borrow().clone();
            items.extend(r.borrow().iter().cloned());
            Ok(Value::array(items))
        }
        (l, r) => Err(type_mismatch(
            span,
            format!("Cannot add {} and {}", l.type_name(), r.type_name()),
        )),
    }
}

fn numeric(
    operator: BinaryOp,
    left: &Value,
    right: &Value,
    span: Span,
    op: impl FnOnce(f64, f64) -> Result<f64, DroyError>,
) -> Result<Value, DroyError> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => op(*l, *r).map(Value::Number),
        (l, r) => Err(type_mismatch(
            span,
            format!(
                "Operator '{}' expects numbers, got {} and {}",
                operator.symbol(),
                l.type_name(),
                r.type_name()
            ),
        )),
    }
}

fn integer(
    operator: BinaryOp,
    left: &Value,
    right: &Value,
    span: Span,
    op: impl FnOnce(i64, i64) -> i64,
) -> Result<Value, DroyError> {
    numeric(operator, left, right, span, |l, r| Ok(op(l as i64, r as i64) as f64))
}

fn division_by_zero(span: Span, what: &str) -> DroyError {
    DroyError::runtime_error_with_help(
        RuntimeErrorKind::DivisionByZero,
        span,
        format!("{} by zero", what),
        "Check the divisor before dividing, e.g. fe (d != 0) { ... }".to_string(),
    )
}

fn type_mismatch(span: Span, message: String) -> DroyError {
    DroyError::runtime_error(RuntimeErrorKind::TypeMismatch, span, message)
}
