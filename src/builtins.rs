//! Native functions, installed as const bindings in the root frame.
//!
//! Every native receives its already-evaluated arguments; arity is checked
//! by the evaluator from the table below before the function runs.

use crate::error::{DroyError, RuntimeErrorKind, Span};
use crate::evaluator::{io_error, property_key, Evaluator};
use crate::operators;
use crate::scope::Scope;
use crate::value::{ArrayRef, NativeFn, NativeFunction, ObjectRef, Value};
use std::cmp::Ordering;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

type NativeResult = Result<Value, DroyError>;

const MAX_RANGE_LEN: f64 = 10_000_000.0;

const NATIVES: &[(&str, usize, Option<usize>, NativeFn)] = &[
    // I/O
    ("print", 0, None, print),
    ("println", 0, None, println),
    ("input", 0, Some(1), input),
    // Types and conversions
    ("type", 1, Some(1), type_of),
    ("len", 1, Some(1), len),
    ("toString", 1, Some(1), to_string),
    ("toNumber", 1, Some(1), to_number),
    ("isNull", 1, Some(1), is_null),
    // Arrays
    ("push", 1, None, push),
    ("pop", 1, Some(1), pop),
    ("shift", 1, Some(1), shift),
    ("unshift", 1, None, unshift),
    ("slice", 2, Some(3), slice),
    ("reverse", 1, Some(1), reverse),
    ("sort", 1, Some(2), sort),
    // Strings
    ("split", 2, Some(2), split),
    ("join", 1, Some(2), join),
    ("replace", 3, Some(3), replace),
    ("contains", 2, Some(2), contains),
    ("indexOf", 2, Some(2), index_of),
    ("upper", 1, Some(1), upper),
    ("lower", 1, Some(1), lower),
    ("trim", 1, Some(1), trim),
    ("startsWith", 2, Some(2), starts_with),
    ("endsWith", 2, Some(2), ends_with),
    // Math
    ("floor", 1, Some(1), floor),
    ("ceil", 1, Some(1), ceil),
    ("round", 1, Some(1), round),
    ("abs", 1, Some(1), abs),
    ("sqrt", 1, Some(1), sqrt),
    ("pow", 2, Some(2), pow),
    ("min", 1, None, min),
    ("max", 1, None, max),
    ("range", 1, Some(3), range),
    // Objects
    ("keys", 1, Some(1), keys),
    ("values", 1, Some(1), values),
    ("entries", 1, Some(1), entries),
    ("hasKey", 2, Some(2), has_key),
    // System
    ("readFile", 1, Some(1), read_file),
    ("writeFile", 2, Some(2), write_file),
    ("appendFile", 2, Some(2), append_file),
    ("fileExists", 1, Some(1), file_exists),
    ("getEnv", 1, Some(1), get_env),
    ("time", 0, Some(0), time),
    ("exit", 0, Some(1), exit),
];

pub fn register(scope: &Scope) {
    for &(name, min_args, max_args, func) in NATIVES {
        let native = NativeFunction {
            name,
            min_args,
            max_args,
            func,
        };
        scope.define(name, Value::Native(Rc::new(native)), true);
    }
}

pub fn names() -> impl Iterator<Item = &'static str> {
    NATIVES.iter().map(|(name, ..)| *name)
}

fn type_error(span: Span, message: String) -> DroyError {
    DroyError::runtime_error(RuntimeErrorKind::TypeMismatch, span, message)
}

fn invalid_argument(span: Span, message: String) -> DroyError {
    DroyError::runtime_error(RuntimeErrorKind::InvalidArgument, span, message)
}

fn expect_array(args: &[Value], index: usize, func: &str, span: Span) -> Result<ArrayRef, DroyError> {
    match &args[index] {
        Value::Array(items) => Ok(Rc::clone(items)),
        other => Err(type_error(
            span,
            format!("'{}' expects an array, got {}", func, other.type_name()),
        )),
    }
}

fn expect_object(args: &[Value], index: usize, func: &str, span: Span) -> Result<ObjectRef, DroyError> {
    match &args[index] {
        Value::Object(map) => Ok(Rc::clone(map)),
        other => Err(type_error(
            span,
            format!("'{}' expects an object, got {}", func, other.type_name()),
        )),
    }
}

fn expect_string<'a>(args: &'a [Value], index: usize, func: &str, span: Span) -> Result<&'a str, DroyError> {
    match &args[index] {
        Value::String(s) => Ok(s),
        other => Err(type_error(
            span,
            format!("'{}' expects a string, got {}", func, other.type_name()),
        )),
    }
}

fn expect_number(args: &[Value], index: usize, func: &str, span: Span) -> Result<f64, DroyError> {
    match &args[index] {
        Value::Number(n) => Ok(*n),
        other => Err(type_error(
            span,
            format!("'{}' expects a number, got {}", func, other.type_name()),
        )),
    }
}

fn join_display(args: &[Value], separator: &str) -> String {
    args.iter()
        .map(|value| value.to_string())
        .collect::<Vec<_>>()
        .join(separator)
}

fn print(evaluator: &mut Evaluator, args: Vec<Value>, span: Span) -> NativeResult {
    evaluator.write_output(&join_display(&args, " "), span)?;
    Ok(Value::Null)
}

fn println(evaluator: &mut Evaluator, args: Vec<Value>, span: Span) -> NativeResult {
    let mut line = join_display(&args, " ");
    line.push('\n');
    evaluator.write_output(&line, span)?;
    Ok(Value::Null)
}

fn input(evaluator: &mut Evaluator, args: Vec<Value>, span: Span) -> NativeResult {
    if let Some(prompt) = args.first() {
        evaluator.write_output(&prompt.to_string(), span)?;
    }
    Ok(evaluator
        .read_input(span)?
        .map(Value::String)
        .unwrap_or(Value::Null))
}

fn type_of(_: &mut Evaluator, args: Vec<Value>, _: Span) -> NativeResult {
    Ok(Value::string(args[0].type_name()))
}

fn len(_: &mut Evaluator, args: Vec<Value>, span: Span) -> NativeResult {
    let length = match &args[0] {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.borrow().len(),
        Value::Object(map) => map.borrow().len(),
        other => {
            return Err(type_error(
                span,
                format!("'len' expects a string, array or object, got {}", other.type_name()),
            ))
        }
    };
    Ok(Value::Number(length as f64))
}

fn to_string(_: &mut Evaluator, args: Vec<Value>, _: Span) -> NativeResult {
    Ok(Value::String(args[0].to_string()))
}

fn to_number(_: &mut Evaluator, args: Vec<Value>, _: Span) -> NativeResult {
    Ok(args[0].to_number().map(Value::Number).unwrap_or(Value::Null))
}

fn is_null(_: &mut Evaluator, args: Vec<Value>, _: Span) -> NativeResult {
    Ok(Value::Boolean(matches!(args[0], Value::Null)))
}

fn push(_: &mut Evaluator, args: Vec<Value>, span: Span) -> NativeResult {
    let items = expect_array(&args, 0, "push", span)?;
    let mut items = items.borrow_mut();
    items.extend(args[1..].iter().cloned());
    Ok(Value::Number(items.len() as f64))
}

fn pop(_: &mut Evaluator, args: Vec<Value>, span: Span) -> NativeResult {
    let items = expect_array(&args, 0, "pop", span)?;
    let popped = items.borrow_mut().pop();
    Ok(popped.unwrap_or(Value::Null))
}

fn shift(_: &mut Evaluator, args: Vec<Value>, span: Span) -> NativeResult {
    let items = expect_array(&args, 0, "shift", span)?;
    let mut items = items.borrow_mut();
    if items.is_empty() {
        Ok(Value::Null)
    } else {
        Ok(items.remove(0))
    }
}

fn unshift(_: &mut Evaluator, args: Vec<Value>, span: Span) -> NativeResult {
    let items = expect_array(&args, 0, "unshift", span)?;
    let mut items = items.borrow_mut();
    items.splice(0..0, args[1..].iter().cloned());
    Ok(Value::Number(items.len() as f64))
}

/// Resolve `start`/`end` against `len`: negatives count from the end and
/// both are clamped to the sequence.
fn slice_bounds(len: usize, start: f64, end: Option<f64>) -> (usize, usize) {
    let resolve = |index: f64| -> usize {
        let index = index.trunc();
        if index < 0.0 {
            (len as f64 + index).max(0.0) as usize
        } else {
            (index as usize).min(len)
        }
    };
    let start = resolve(start);
    let end = end.map_or(len, resolve);
    (start, end.max(start))
}

fn slice(_: &mut Evaluator, args: Vec<Value>, span: Span) -> NativeResult {
    let start = expect_number(&args, 1, "slice", span)?;
    let end = match args.get(2) {
        Some(_) => Some(expect_number(&args, 2, "slice", span)?),
        None => None,
    };
    match &args[0] {
        Value::Array(items) => {
            let items = items.borrow();
            let (start, end) = slice_bounds(items.len(), start, end);
            Ok(Value::array(items[start..end].to_vec()))
        }
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let (start, end) = slice_bounds(chars.len(), start, end);
            Ok(Value::String(chars[start..end].iter().collect()))
        }
        other => Err(type_error(
            span,
            format!("'slice' expects an array or string, got {}", other.type_name()),
        )),
    }
}

fn reverse(_: &mut Evaluator, args: Vec<Value>, span: Span) -> NativeResult {
    let items = expect_array(&args, 0, "reverse", span)?;
    items.borrow_mut().reverse();
    Ok(args[0].clone())
}

/// Default element order: numbers, then strings, then everything else in
/// type-name order.
fn default_order(left: &Value, right: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Number(_) => 0,
            Value::String(_) => 1,
            _ => 2,
        }
    }
    operators::compare(left, right).unwrap_or_else(|| {
        rank(left)
            .cmp(&rank(right))
            .then_with(|| left.type_name().cmp(right.type_name()))
    })
}

/// Sorts in place. An optional comparator returns a negative, zero or
/// positive number.
fn sort(evaluator: &mut Evaluator, args: Vec<Value>, span: Span) -> NativeResult {
    let items = expect_array(&args, 0, "sort", span)?;
    // Sort a copy so a comparator that touches the array does not alias the borrow.
    let mut sorted = items.borrow().clone();
    match args.get(1) {
        None => sorted.sort_by(default_order),
        Some(comparator) => {
            if !comparator.is_callable() {
                return Err(invalid_argument(
                    span,
                    format!("'sort' comparator must be a function, got {}", comparator.type_name()),
                ));
            }
            let mut failure = None;
            sorted.sort_by(|left, right| {
                if failure.is_some() {
                    return Ordering::Equal;
                }
                let args = vec![left.clone(), right.clone()];
                match evaluator.call_value(comparator.clone(), args, span) {
                    Ok(Value::Number(n)) => n.partial_cmp(&0.0).unwrap_or(Ordering::Equal),
                    Ok(other) => {
                        failure = Some(type_error(
                            span,
                            format!("'sort' comparator must return a number, got {}", other.type_name()),
                        ));
                        Ordering::Equal
                    }
                    Err(error) => {
                        failure = Some(error);
                        Ordering::Equal
                    }
                }
            });
            if let Some(error) = failure {
                return Err(error);
            }
        }
    }
    *items.borrow_mut() = sorted;
    Ok(args[0].clone())
}

fn split(_: &mut Evaluator, args: Vec<Value>, span: Span) -> NativeResult {
    let text = expect_string(&args, 0, "split", span)?;
    let separator = expect_string(&args, 1, "split", span)?;
    let parts: Vec<Value> = if separator.is_empty() {
        text.chars().map(|c| Value::String(c.to_string())).collect()
    } else {
        text.split(separator).map(Value::string).collect()
    };
    Ok(Value::array(parts))
}

fn join(_: &mut Evaluator, args: Vec<Value>, span: Span) -> NativeResult {
    let items = expect_array(&args, 0, "join", span)?;
    let separator = match args.get(1) {
        Some(_) => expect_string(&args, 1, "join", span)?,
        None => ",",
    };
    let joined = join_display(&items.borrow(), separator);
    Ok(Value::String(joined))
}

fn replace(_: &mut Evaluator, args: Vec<Value>, span: Span) -> NativeResult {
    let text = expect_string(&args, 0, "replace", span)?;
    let from = expect_string(&args, 1, "replace", span)?;
    let to = expect_string(&args, 2, "replace", span)?;
    if from.is_empty() {
        return Ok(Value::string(text));
    }
    Ok(Value::String(text.replace(from, to)))
}

fn contains(_: &mut Evaluator, args: Vec<Value>, span: Span) -> NativeResult {
    match &args[0] {
        Value::String(text) => {
            let needle = expect_string(&args, 1, "contains", span)?;
            Ok(Value::Boolean(text.contains(needle)))
        }
        Value::Array(items) => Ok(Value::Boolean(items.borrow().contains(&args[1]))),
        other => Err(type_error(
            span,
            format!("'contains' expects a string or array, got {}", other.type_name()),
        )),
    }
}

fn index_of(_: &mut Evaluator, args: Vec<Value>, span: Span) -> NativeResult {
    let position = match &args[0] {
        Value::String(text) => {
            let needle = expect_string(&args, 1, "indexOf", span)?;
            text.find(needle).map(|byte| text[..byte].chars().count())
        }
        Value::Array(items) => items.borrow().iter().position(|item| *item == args[1]),
        other => {
            return Err(type_error(
                span,
                format!("'indexOf' expects a string or array, got {}", other.type_name()),
            ))
        }
    };
    Ok(Value::Number(position.map_or(-1.0, |p| p as f64)))
}

fn upper(_: &mut Evaluator, args: Vec<Value>, span: Span) -> NativeResult {
    Ok(Value::String(expect_string(&args, 0, "upper", span)?.to_uppercase()))
}

fn lower(_: &mut Evaluator, args: Vec<Value>, span: Span) -> NativeResult {
    Ok(Value::String(expect_string(&args, 0, "lower", span)?.to_lowercase()))
}

fn trim(_: &mut Evaluator, args: Vec<Value>, span: Span) -> NativeResult {
    Ok(Value::string(expect_string(&args, 0, "trim", span)?.trim()))
}

fn starts_with(_: &mut Evaluator, args: Vec<Value>, span: Span) -> NativeResult {
    let text = expect_string(&args, 0, "startsWith", span)?;
    let prefix = expect_string(&args, 1, "startsWith", span)?;
    Ok(Value::Boolean(text.starts_with(prefix)))
}

fn ends_with(_: &mut Evaluator, args: Vec<Value>, span: Span) -> NativeResult {
    let text = expect_string(&args, 0, "endsWith", span)?;
    let suffix = expect_string(&args, 1, "endsWith", span)?;
    Ok(Value::Boolean(text.ends_with(suffix)))
}

fn floor(_: &mut Evaluator, args: Vec<Value>, span: Span) -> NativeResult {
    Ok(Value::Number(expect_number(&args, 0, "floor", span)?.floor()))
}

fn ceil(_: &mut Evaluator, args: Vec<Value>, span: Span) -> NativeResult {
    Ok(Value::Number(expect_number(&args, 0, "ceil", span)?.ceil()))
}

fn round(_: &mut Evaluator, args: Vec<Value>, span: Span) -> NativeResult {
    Ok(Value::Number(expect_number(&args, 0, "round", span)?.round()))
}

fn abs(_: &mut Evaluator, args: Vec<Value>, span: Span) -> NativeResult {
    Ok(Value::Number(expect_number(&args, 0, "abs", span)?.abs()))
}

fn sqrt(_: &mut Evaluator, args: Vec<Value>, span: Span) -> NativeResult {
    Ok(Value::Number(expect_number(&args, 0, "sqrt", span)?.sqrt()))
}

fn pow(_: &mut Evaluator, args: Vec<Value>, span: Span) -> NativeResult {
    let base = expect_number(&args, 0, "pow", span)?;
    let exponent = expect_number(&args, 1, "pow", span)?;
    Ok(Value::Number(base.powf(exponent)))
}

/// `min`/`max` take numbers as arguments or a single array of numbers.
fn extremum(args: &[Value], func: &str, span: Span, pick: fn(f64, f64) -> f64) -> NativeResult {
    let values = match args {
        [Value::Array(items)] => items.borrow().clone(),
        _ => args.to_vec(),
    };
    let mut result: Option<f64> = None;
    for (index, _) in values.iter().enumerate() {
        let n = expect_number(&values, index, func, span)?;
        result = Some(result.map_or(n, |current| pick(current, n)));
    }
    Ok(result.map(Value::Number).unwrap_or(Value::Null))
}

fn min(_: &mut Evaluator, args: Vec<Value>, span: Span) -> NativeResult {
    extremum(&args, "min", span, f64::min)
}

fn max(_: &mut Evaluator, args: Vec<Value>, span: Span) -> NativeResult {
    extremum(&args, "max", span, f64::max)
}

/// `range(end)`, `range(start, end)` or `range(start, end, step)`; `end` is exclusive.
fn range(_: &mut Evaluator, args: Vec<Value>, span: Span) -> NativeResult {
    let numbers = (0..args.len())
        .map(|index| expect_number(&args, index, "range", span))
        .collect::<Result<Vec<f64>, DroyError>>()?;
    let (start, end, step) = match numbers.as_slice() {
        [end] => (0.0, *end, 1.0),
        [start, end] => (*start, *end, 1.0),
        [start, end, step] => (*start, *end, *step),
        _ => return Err(invalid_argument(span, "'range' takes 1 to 3 numbers".to_string())),
    };
    if step == 0.0 || !step.is_finite() {
        return Err(invalid_argument(span, "'range' step must be a non-zero number".to_string()));
    }
    let count = ((end - start) / step).ceil().max(0.0);
    if count.is_nan() || count > MAX_RANGE_LEN {
        return Err(invalid_argument(
            span,
            format!("'range' would produce more than {} elements", MAX_RANGE_LEN),
        ));
    }
    let items = (0..count as usize)
        .map(|i| Value::Number(start + step * i as f64))
        .collect();
    Ok(Value::array(items))
}

fn keys(_: &mut Evaluator, args: Vec<Value>, span: Span) -> NativeResult {
    let map = expect_object(&args, 0, "keys", span)?;
    let keys = map.borrow().keys().cloned().map(Value::String).collect();
    Ok(Value::array(keys))
}

fn values(_: &mut Evaluator, args: Vec<Value>, span: Span) -> NativeResult {
    let map = expect_object(&args, 0, "values", span)?;
    let values = map.borrow().values().cloned().collect();
    Ok(Value::array(values))
}

fn entries(_: &mut Evaluator, args: Vec<Value>, span: Span) -> NativeResult {
    let map = expect_object(&args, 0, "entries", span)?;
    let entries = map
        .borrow()
        .iter()
        .map(|(key, value)| Value::array(vec![Value::String(key.clone()), value.clone()]))
        .collect();
    Ok(Value::array(entries))
}

fn has_key(_: &mut Evaluator, args: Vec<Value>, span: Span) -> NativeResult {
    let map = expect_object(&args, 0, "hasKey", span)?;
    let key = property_key(&args[1]);
    let found = map.borrow().contains_key(&key);
    Ok(Value::Boolean(found))
}

fn read_file(_: &mut Evaluator, args: Vec<Value>, span: Span) -> NativeResult {
    let path = expect_string(&args, 0, "readFile", span)?;
    fs::read_to_string(path)
        .map(Value::String)
        .map_err(|error| io_error(span, &format!("Cannot read '{}'", path), &error))
}

fn write_file(_: &mut Evaluator, args: Vec<Value>, span: Span) -> NativeResult {
    let path = expect_string(&args, 0, "writeFile", span)?;
    fs::write(path, args[1].to_string())
        .map_err(|error| io_error(span, &format!("Cannot write '{}'", path), &error))?;
    Ok(Value::Boolean(true))
}

fn append_file(_: &mut Evaluator, args: Vec<Value>, span: Span) -> NativeResult {
    let path = expect_string(&args, 0, "appendFile", span)?;
    fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| file.write_all(args[1].to_string().as_bytes()))
        .map_err(|error| io_error(span, &format!("Cannot append to '{}'", path), &error))?;
    Ok(Value::Boolean(true))
}

fn file_exists(_: &mut Evaluator, args: Vec<Value>, span: Span) -> NativeResult {
    let path = expect_string(&args, 0, "fileExists", span)?;
    Ok(Value::Boolean(Path::new(path).exists()))
}

fn get_env(_: &mut Evaluator, args: Vec<Value>, span: Span) -> NativeResult {
    let name = expect_string(&args, 0, "getEnv", span)?;
    Ok(std::env::var(name).map(Value::String).unwrap_or(Value::Null))
}

fn time(_: &mut Evaluator, _: Vec<Value>, _: Span) -> NativeResult {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0);
    Ok(Value::Number(seconds))
}

fn exit(_: &mut Evaluator, args: Vec<Value>, span: Span) -> NativeResult {
    let code = match args.first() {
        Some(_) => expect_number(&args, 0, "exit", span)? as i32,
        None => 0,
    };
    Err(DroyError::exit(code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::parse;
    use pretty_assertions::assert_eq;

    fn eval(source: &str) -> Result<Value, DroyError> {
        let (tokens, lex_errors) = tokenize(source);
        assert!(lex_errors.is_empty());
        let (program, parse_errors) = parse(tokens);
        assert!(parse_errors.is_empty(), "{:?}", parse_errors);
        Evaluator::new().capture_output().evaluate_program(&program)
    }

    fn show(source: &str) -> String {
        match eval(source) {
            Ok(value) => value.to_string(),
            Err(error) => format!("error: {}", error),
        }
    }

    fn kind(source: &str) -> Option<RuntimeErrorKind> {
        eval(source).err().and_then(|e| e.runtime_kind())
    }

    #[test]
    fn every_native_is_a_const_global() {
        let scope = Scope::new();
        register(&scope);
        for name in names() {
            assert!(scope.is_const(name), "{} should be const", name);
            assert!(scope.get(name).map(|v| v.is_callable()).unwrap_or(false));
        }
        assert_eq!(kind("set print = 1"), Some(RuntimeErrorKind::ConstReassignment));
    }

    #[test]
    fn array_mutation_is_visible_through_aliases() {
        assert_eq!(show("set a = [1]\nset b = a\npush(b, 2, 3)\nret a"), "[1, 2, 3]");
        assert_eq!(show("set a = [1, 2, 3]\nset last = pop(a)\nret [last, a]"), "[3, [1, 2]]");
        assert_eq!(show("set a = [1, 2]\nshift(a)\nunshift(a, 0)\nret a"), "[0, 2]");
        assert_eq!(show("ret pop([])"), "null");
    }

    #[test]
    fn slice_handles_negative_and_clamped_bounds() {
        assert_eq!(show("ret slice([1, 2, 3, 4], 1, 3)"), "[2, 3]");
        assert_eq!(show("ret slice([1, 2, 3, 4], -2)"), "[3, 4]");
        assert_eq!(show("ret slice(\"droyscript\", 0, 4)"), "droy");
        assert_eq!(show("ret slice([1, 2], 5, 9)"), "[]");
    }

    #[test]
    fn sort_orders_in_place() {
        assert_eq!(show("set a = [3, 1, 2]\nsort(a)\nret a"), "[1, 2, 3]");
        assert_eq!(show("ret sort([\"pear\", \"apple\"])"), "[\"apple\", \"pear\"]");
        assert_eq!(show("ret sort([1, 3, 2], f (a, b) { ret b - a })"), "[3, 2, 1]");
        assert_eq!(
            kind("sort([1, 2], f (a, b) { ret \"x\" })"),
            Some(RuntimeErrorKind::TypeMismatch)
        );
    }

    #[test]
    fn string_helpers() {
        assert_eq!(show("ret split(\"a,b,c\", \",\")"), "[\"a\", \"b\", \"c\"]");
        assert_eq!(show("ret join([1, \"x\", true], \"-\")"), "1-x-true");
        assert_eq!(show("ret replace(\"a-b-c\", \"-\", \"+\")"), "a+b+c");
        assert_eq!(show("ret [contains(\"droy\", \"ro\"), indexOf(\"héllo\", \"l\")]"), "[true, 2]");
        assert_eq!(show("ret [upper(\"a\"), lower(\"B\"), trim(\"  c \")]"), "[\"A\", \"b\", \"c\"]");
        assert_eq!(show("ret [startsWith(\"droy\", \"dr\"), endsWith(\"droy\", \"x\")]"), "[true, false]");
        assert_eq!(show("ret indexOf([1, 2, 3], 4)"), "-1");
    }

    #[test]
    fn conversions() {
        assert_eq!(show("ret toNumber(\"42\") + 1"), "43");
        assert_eq!(show("ret toNumber(\"abc\")"), "null");
        assert_eq!(show("ret toString(12) + \"!\""), "12!");
        assert_eq!(show("ret [type(1), type(\"s\"), type([]), type({}), type(print)]"),
            "[\"number\", \"string\", \"array\", \"object\", \"function\"]");
        assert_eq!(show("ret len(\"héllo\")"), "5");
        assert_eq!(show("ret isNull(null)"), "true");
    }

    #[test]
    fn math_helpers() {
        assert_eq!(show("ret [floor(2.7), ceil(2.1), round(2.5), abs(-3), sqrt(16), pow(2, 8)]"),
            "[2, 3, 3, 3, 4, 256]");
        assert_eq!(show("ret [min(3, 1, 2), max([4, 9, 2]), min([])]"), "[1, 9, null]");
        assert_eq!(show("ret range(4)"), "[0, 1, 2, 3]");
        assert_eq!(show("ret range(5, 0, -2)"), "[5, 3, 1]");
        assert_eq!(kind("range(0, 3, 0)"), Some(RuntimeErrorKind::InvalidArgument));
    }

    #[test]
    fn object_helpers() {
        let source = "set o = {b: 1, a: 2}\nret [keys(o), values(o), entries(o), hasKey(o, \"a\"), hasKey(o, \"z\")]";
        assert_eq!(show(source), "[[\"b\", \"a\"], [1, 2], [[\"b\", 1], [\"a\", 2]], true, false]");
    }

    #[test]
    fn arity_and_type_errors() {
        assert_eq!(kind("push()"), Some(RuntimeErrorKind::InvalidArgument));
        assert_eq!(kind("upper(1, 2)"), Some(RuntimeErrorKind::InvalidArgument));
        assert_eq!(kind("upper(1)"), Some(RuntimeErrorKind::TypeMismatch));
        assert_eq!(kind("len(5)"), Some(RuntimeErrorKind::TypeMismatch));
    }

    #[test]
    fn print_and_input_use_the_evaluator_streams() {
        let (tokens, _) = tokenize("set name = input(\"? \")\nprint(\"hi\", name)\nprintln(\"!\")\nset rest = input()");
        let (program, _) = parse(tokens);
        let mut evaluator = Evaluator::new().capture_output().with_input(["droy"]);
        evaluator.evaluate_program(&program).unwrap();
        assert_eq!(evaluator.output(), "? hi droy!\n");
        assert_eq!(evaluator.lookup("rest"), Some(Value::Null));
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        let path = path.to_string_lossy().replace('\\', "/");
        let source = format!(
            "writeFile(\"{0}\", \"a\")\nappendFile(\"{0}\", 1)\nret [fileExists(\"{0}\"), readFile(\"{0}\")]",
            path
        );
        assert_eq!(show(&source), "[true, \"a1\"]");
        assert_eq!(kind("readFile(\"/definitely/not/here.droy\")"), Some(RuntimeErrorKind::Io));
    }
}
