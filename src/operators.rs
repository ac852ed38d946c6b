//! Binary and unary operator semantics over [`Value`].
//!
//! Arithmetic is numbers-only except `+`, which also concatenates strings.
//! Ordering comparisons require both operands to be `Number` or both to be
//! `String`; any other pairing is a runtime type error. Equality (`==`/`!=`)
//! is total: comparing mismatched types is not an error, it is simply
//! `false`/`true`.

use crate::error::{Error, Result};
use crate::value::Value;

fn type_error(op: &str, left: &Value, right: &Value) -> Error {
    Error::runtime(format!(
        "cannot apply '{}' to {} and {}",
        op,
        left.type_name(),
        right.type_name()
    ))
}

pub fn add(left: &Value, right: &Value) -> Result<Value> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
        (Value::String(a), Value::String(b)) => Ok(Value::string(format!("{}{}", a, b))),
        _ => Err(type_error("+", left, right)),
    }
}

pub fn subtract(left: &Value, right: &Value) -> Result<Value> {
    numeric_binop("-", left, right, |a, b| a - b)
}

pub fn multiply(left: &Value, right: &Value) -> Result<Value> {
    numeric_binop("*", left, right, |a, b| a * b)
}

pub fn divide(left: &Value, right: &Value) -> Result<Value> {
    match (left, right) {
        (Value::Number(_), Value::Number(b)) if *b == 0.0 => {
            Err(Error::runtime("division by zero"))
        }
        (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a / b)),
        _ => Err(type_error("/", left, right)),
    }
}

fn numeric_binop(op: &str, left: &Value, right: &Value, f: impl Fn(f64, f64) -> f64) -> Result<Value> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok(Value::Number(f(*a, *b))),
        _ => Err(type_error(op, left, right)),
    }
}

pub fn negate(value: &Value) -> Result<Value> {
    match value {
        Value::Number(n) => Ok(Value::Number(-n)),
        _ => Err(Error::runtime(format!(
            "cannot negate a {}",
            value.type_name()
        ))),
    }
}

pub fn not(value: &Value) -> Value {
    Value::Bool(!value.to_boolean())
}

pub fn and(left: &Value, right: &Value) -> Value {
    Value::Bool(left.to_boolean() && right.to_boolean())
}

pub fn or(left: &Value, right: &Value) -> Value {
    Value::Bool(left.to_boolean() || right.to_boolean())
}

pub fn equals(left: &Value, right: &Value) -> Value {
    Value::Bool(left == right)
}

pub fn not_equals(left: &Value, right: &Value) -> Value {
    Value::Bool(left != right)
}

#[derive(Clone, Copy)]
enum Ordering {
    Lt,
    LtE,
    Gt,
    GtE,
}

fn compare(kind: Ordering, left: &Value, right: &Value) -> Result<Value> {
    let result = match (left, right) {
        (Value::Number(a), Value::Number(b)) => match kind {
            Ordering::Lt => a < b,
            Ordering::LtE => a <= b,
            Ordering::Gt => a > b,
            Ordering::GtE => a >= b,
        },
        (Value::String(a), Value::String(b)) => match kind {
            Ordering::Lt => a < b,
            Ordering::LtE => a <= b,
            Ordering::Gt => a > b,
            Ordering::GtE => a >= b,
        },
        _ => {
            let op = match kind {
                Ordering::Lt => "<",
                Ordering::LtE => "<=",
                Ordering::Gt => ">",
                Ordering::GtE => ">=",
            };
            return Err(type_error(op, left, right));
        }
    };
    Ok(Value::Bool(result))
}

pub fn greater(left: &Value, right: &Value) -> Result<Value> {
    compare(Ordering::Gt, left, right)
}

pub fn greater_equals(left: &Value, right: &Value) -> Result<Value> {
    compare(Ordering::GtE, left, right)
}

pub fn lesser(left: &Value, right: &Value) -> Result<Value> {
    compare(Ordering::Lt, left, right)
}

pub fn lesser_equals(left: &Value, right: &Value) -> Result<Value> {
    compare(Ordering::LtE, left, right)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_concatenates_strings_but_rejects_mixed_types() {
        assert_eq!(
            add(&Value::string("a"), &Value::string("b")).unwrap(),
            Value::string("ab")
        );
        assert!(add(&Value::string("a"), &Value::Number(1.0)).is_err());
    }

    #[test]
    fn division_by_zero_is_a_runtime_error() {
        let err = divide(&Value::Number(1.0), &Value::Number(0.0)).unwrap_err();
        assert!(err.to_string().contains("division by zero"));
    }

    #[test]
    fn ordering_rejects_mismatched_types() {
        assert!(greater(&Value::Number(1.0), &Value::string("a")).is_err());
    }

    #[test]
    fn equality_across_types_is_false_never_an_error() {
        assert_eq!(equals(&Value::Nil, &Value::Number(0.0)), Value::Bool(false));
    }
}
