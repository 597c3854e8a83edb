use super::natives::{NativeDecl, NativeError, Owner, RawAnnotation};
use super::types::NativeClass;
use super::vm::{to_index, Value};

const GLOBAL: Owner = Owner::Global;
const NUMBER: Owner = Owner::Class(NativeClass::Number);
const BOOLEAN: Owner = Owner::Class(NativeClass::Boolean);
const STRING: Owner = Owner::Class(NativeClass::String);
const TEXT: Owner = Owner::Class(NativeClass::Text);
const LIST: Owner = Owner::Class(NativeClass::List);
const DICT: Owner = Owner::Class(NativeClass::Dict);

/// The builtin native library: single source of truth for name, owner,
/// signature and implementation. Adding a builtin means adding ONE entry here.
pub static BUILTINS: &[NativeDecl] = &[
    // ── Global ──────────────────────────────────────────────────
    NativeDecl {
        owner: GLOBAL, name: "print", annotations: &[RawAnnotation::TypeHint("(any) -> void")],
        func: print, category: "io", description: "Write a value to the script log",
    },
    NativeDecl {
        owner: GLOBAL, name: "pi", annotations: &[RawAnnotation::TypeHint("() -> number")],
        func: pi, category: "math", description: "The constant π",
    },
    NativeDecl {
        owner: GLOBAL, name: "abs", annotations: &[RawAnnotation::TypeHint("(number) -> number")],
        func: abs, category: "math", description: "Absolute value",
    },
    NativeDecl {
        owner: GLOBAL, name: "floor", annotations: &[RawAnnotation::TypeHint("(number) -> number")],
        func: floor, category: "math", description: "Round down",
    },
    NativeDecl {
        owner: GLOBAL, name: "min", annotations: &[RawAnnotation::TypeHint("(number, number) -> number")],
        func: min, category: "math", description: "Smaller of two numbers",
    },
    NativeDecl {
        owner: GLOBAL, name: "max", annotations: &[RawAnnotation::TypeHint("(number, number) -> number")],
        func: max, category: "math", description: "Larger of two numbers",
    },
    NativeDecl {
        owner: GLOBAL, name: "not", annotations: &[RawAnnotation::TypeHint("(boolean) -> boolean")],
        func: not, category: "logic", description: "Logical negation",
    },
    NativeDecl {
        owner: GLOBAL, name: "and", annotations: &[RawAnnotation::TypeHint("(boolean, boolean) -> boolean")],
        func: and, category: "logic", description: "Logical and (both operands are evaluated)",
    },
    NativeDecl {
        owner: GLOBAL, name: "or", annotations: &[RawAnnotation::TypeHint("(boolean, boolean) -> boolean")],
        func: or, category: "logic", description: "Logical or (both operands are evaluated)",
    },
    NativeDecl {
        owner: GLOBAL, name: "new_list", annotations: &[RawAnnotation::TypeHint("() -> list[any]")],
        func: new_list, category: "collections", description: "Empty list[any]; bind `[]` to a typed local for a typed list",
    },
    NativeDecl {
        owner: GLOBAL, name: "new_dict", annotations: &[RawAnnotation::TypeHint("() -> dict[string, any]")],
        func: new_dict, category: "collections", description: "Empty dict[string, any]",
    },
    // ── number ──────────────────────────────────────────────────
    NativeDecl {
        owner: NUMBER, name: "to_string", annotations: &[RawAnnotation::TypeHint("(number) -> string")],
        func: number_to_string, category: "conversion", description: "Shortest decimal form",
    },
    NativeDecl {
        owner: NUMBER, name: "round", annotations: &[RawAnnotation::TypeHint("(number) -> number")],
        func: round, category: "math", description: "Round half away from zero",
    },
    // ── boolean ─────────────────────────────────────────────────
    NativeDecl {
        owner: BOOLEAN, name: "to_string", annotations: &[RawAnnotation::TypeHint("(boolean) -> string")],
        func: boolean_to_string, category: "conversion", description: "\"true\" or \"false\"",
    },
    // ── string ──────────────────────────────────────────────────
    NativeDecl {
        owner: STRING, name: "length", annotations: &[RawAnnotation::TypeHint("(string) -> number")],
        func: length, category: "string", description: "Number of characters",
    },
    NativeDecl {
        owner: STRING, name: "upper", annotations: &[RawAnnotation::TypeHint("(string) -> string")],
        func: upper, category: "string", description: "Uppercase copy",
    },
    NativeDecl {
        owner: STRING, name: "lower", annotations: &[RawAnnotation::TypeHint("(string) -> string")],
        func: lower, category: "string", description: "Lowercase copy",
    },
    NativeDecl {
        owner: STRING, name: "contains", annotations: &[RawAnnotation::TypeHint("(string, string) -> boolean")],
        func: contains, category: "string", description: "Whether the second string occurs in the first",
    },
    NativeDecl {
        owner: STRING, name: "to_text", annotations: &[RawAnnotation::TypeHint("(string) -> text")],
        func: to_text, category: "conversion", description: "Same characters as display text",
    },
    // ── text ────────────────────────────────────────────────────
    NativeDecl {
        owner: TEXT, name: "length", annotations: &[RawAnnotation::TypeHint("(text) -> number")],
        func: length, category: "string", description: "Number of characters",
    },
    // ── list ────────────────────────────────────────────────────
    NativeDecl {
        owner: LIST, name: "size", annotations: &[RawAnnotation::TypeHint("(list[any]) -> number")],
        func: list_size, category: "collections", description: "Number of elements",
    },
    NativeDecl {
        owner: LIST, name: "get", annotations: &[RawAnnotation::TypeHint("(list[any], number) -> any")],
        func: list_get, category: "collections", description: "Element at a zero-based index",
    },
    NativeDecl {
        owner: LIST, name: "add", annotations: &[RawAnnotation::TypeHint("(list[any], any) -> void"), RawAnnotation::InPlace],
        func: list_add, category: "collections", description: "Append an element in place",
    },
    NativeDecl {
        owner: LIST, name: "list$_number_$__sum", annotations: &[RawAnnotation::TypeHint("(list[number]) -> number")],
        func: list_sum, category: "collections", description: "Sum of a number list",
    },
    NativeDecl {
        owner: LIST, name: "list$_string_$__join", annotations: &[RawAnnotation::TypeHint("(list[string], string) -> string")],
        func: list_join, category: "collections", description: "Join a string list with a separator",
    },
    // ── dict ────────────────────────────────────────────────────
    NativeDecl {
        owner: DICT, name: "get", annotations: &[RawAnnotation::TypeHint("(dict[string, any], string) -> any")],
        func: dict_get, category: "collections", description: "Value under a key, or null",
    },
    NativeDecl {
        owner: DICT, name: "put", annotations: &[RawAnnotation::TypeHint("(dict[string, any], string, any) -> void"), RawAnnotation::InPlace],
        func: dict_put, category: "collections", description: "Insert or replace a key in place",
    },
    NativeDecl {
        owner: DICT, name: "keys", annotations: &[RawAnnotation::TypeHint("(dict[string, any]) -> list[string]")],
        func: dict_keys, category: "collections", description: "Keys in insertion order",
    },
    NativeDecl {
        owner: DICT, name: "size", annotations: &[RawAnnotation::TypeHint("(dict[string, any]) -> number")],
        func: dict_size, category: "collections", description: "Number of entries",
    },
];

fn bad_args(name: &str, args: &[Value]) -> NativeError {
    let kinds: Vec<&str> = args.iter().map(|a| a.kind().name()).collect();
    NativeError::new(format!("{name}: unexpected arguments ({})", kinds.join(", ")))
}

#[allow(clippy::cast_precision_loss)]
fn count(n: usize) -> Value {
    Value::Number(n as f64)
}

fn print(args: &[Value]) -> Result<Value, NativeError> {
    let [value] = args else { return Err(bad_args("print", args)) };
    log::info!(target: "cdata_script::print", "{value}");
    Ok(Value::Null)
}

fn pi(_: &[Value]) -> Result<Value, NativeError> {
    Ok(Value::Number(std::f64::consts::PI))
}

fn unary(name: &str, args: &[Value], op: impl FnOnce(f64) -> f64) -> Result<Value, NativeError> {
    match args {
        [Value::Number(x)] => Ok(Value::Number(op(*x))),
        _ => Err(bad_args(name, args)),
    }
}

fn binary(name: &str, args: &[Value], op: impl FnOnce(f64, f64) -> f64) -> Result<Value, NativeError> {
    match args {
        [Value::Number(a), Value::Number(b)] => Ok(Value::Number(op(*a, *b))),
        _ => Err(bad_args(name, args)),
    }
}

fn abs(args: &[Value]) -> Result<Value, NativeError> {
    unary("abs", args, f64::abs)
}

fn floor(args: &[Value]) -> Result<Value, NativeError> {
    unary("floor", args, f64::floor)
}

fn round(args: &[Value]) -> Result<Value, NativeError> {
    unary("round", args, f64::round)
}

fn min(args: &[Value]) -> Result<Value, NativeError> {
    binary("min", args, f64::min)
}

fn max(args: &[Value]) -> Result<Value, NativeError> {
    binary("max", args, f64::max)
}

fn not(args: &[Value]) -> Result<Value, NativeError> {
    let [value] = args else { return Err(bad_args("not", args)) };
    Ok(Value::from_bool(!value.is_truthy()))
}

fn and(args: &[Value]) -> Result<Value, NativeError> {
    let [a, b] = args else { return Err(bad_args("and", args)) };
    Ok(Value::from_bool(a.is_truthy() && b.is_truthy()))
}

fn or(args: &[Value]) -> Result<Value, NativeError> {
    let [a, b] = args else { return Err(bad_args("or", args)) };
    Ok(Value::from_bool(a.is_truthy() || b.is_truthy()))
}

fn new_list(_: &[Value]) -> Result<Value, NativeError> {
    Ok(Value::new_list(Vec::new()))
}

fn new_dict(_: &[Value]) -> Result<Value, NativeError> {
    Ok(Value::new_dict())
}

fn number_to_string(args: &[Value]) -> Result<Value, NativeError> {
    match args {
        [Value::Number(n)] => Ok(Value::string(&n.to_string())),
        _ => Err(bad_args("to_string", args)),
    }
}

fn boolean_to_string(args: &[Value]) -> Result<Value, NativeError> {
    let [value] = args else { return Err(bad_args("to_string", args)) };
    Ok(Value::string(if value.is_truthy() { "true" } else { "false" }))
}

fn length(args: &[Value]) -> Result<Value, NativeError> {
    match args {
        [Value::Str(s) | Value::Text(s)] => Ok(count(s.chars().count())),
        _ => Err(bad_args("length", args)),
    }
}

fn upper(args: &[Value]) -> Result<Value, NativeError> {
    match args {
        [Value::Str(s)] => Ok(Value::string(&s.to_uppercase())),
        _ => Err(bad_args("upper", args)),
    }
}

fn lower(args: &[Value]) -> Result<Value, NativeError> {
    match args {
        [Value::Str(s)] => Ok(Value::string(&s.to_lowercase())),
        _ => Err(bad_args("lower", args)),
    }
}

fn contains(args: &[Value]) -> Result<Value, NativeError> {
    match args {
        [Value::Str(haystack), Value::Str(needle)] => {
            Ok(Value::from_bool(haystack.contains(&**needle)))
        }
        _ => Err(bad_args("contains", args)),
    }
}

fn to_text(args: &[Value]) -> Result<Value, NativeError> {
    match args {
        [Value::Str(s)] => Ok(Value::text(s)),
        _ => Err(bad_args("to_text", args)),
    }
}

fn list_size(args: &[Value]) -> Result<Value, NativeError> {
    match args {
        [Value::List(items)] => Ok(count(items.lock().len())),
        _ => Err(bad_args("size", args)),
    }
}

fn list_get(args: &[Value]) -> Result<Value, NativeError> {
    let [Value::List(items), Value::Number(index)] = args else {
        return Err(bad_args("get", args));
    };
    let items = items.lock();
    to_index(*index)
        .and_then(|i| items.get(i).cloned())
        .ok_or_else(|| {
            NativeError::new(format!(
                "index {index} out of bounds for list of length {}",
                items.len()
            ))
        })
}

fn list_add(args: &[Value]) -> Result<Value, NativeError> {
    let [list @ Value::List(items), value] = args else {
        return Err(bad_args("add", args));
    };
    if value.reaches(list) {
        return Err(NativeError::new("add: a list cannot contain itself"));
    }
    items.lock().push(value.clone());
    Ok(Value::Null)
}

fn list_sum(args: &[Value]) -> Result<Value, NativeError> {
    let [Value::List(items)] = args else {
        return Err(bad_args("sum", args));
    };
    items
        .lock()
        .iter()
        .try_fold(0.0, |acc, item| match item {
            Value::Number(n) => Ok(acc + n),
            other => Err(NativeError::new(format!(
                "sum: expected number elements, found {}",
                other.kind().name()
            ))),
        })
        .map(Value::Number)
}

fn list_join(args: &[Value]) -> Result<Value, NativeError> {
    let [Value::List(items), Value::Str(separator)] = args else {
        return Err(bad_args("join", args));
    };
    let items = items.lock();
    let mut parts = Vec::with_capacity(items.len());
    for item in items.iter() {
        match item {
            Value::Str(s) => parts.push(s.to_string()),
            other => {
                return Err(NativeError::new(format!(
                    "join: expected string elements, found {}",
                    other.kind().name()
                )))
            }
        }
    }
    Ok(Value::string(&parts.join(separator)))
}

fn dict_get(args: &[Value]) -> Result<Value, NativeError> {
    let [Value::Dict(entries), key] = args else {
        return Err(bad_args("get", args));
    };
    let key = key.dict_key().ok_or_else(|| bad_args("get", args))?;
    Ok(entries.lock().get(&key).cloned().unwrap_or(Value::Null))
}

fn dict_put(args: &[Value]) -> Result<Value, NativeError> {
    let [dict @ Value::Dict(entries), key, value] = args else {
        return Err(bad_args("put", args));
    };
    let key = key.dict_key().ok_or_else(|| bad_args("put", args))?;
    if value.reaches(dict) {
        return Err(NativeError::new("put: a dict cannot contain itself"));
    }
    entries.lock().insert(key, value.clone());
    Ok(Value::Null)
}

fn dict_keys(args: &[Value]) -> Result<Value, NativeError> {
    match args {
        [Value::Dict(entries)] => Ok(Value::new_list(
            entries.lock().keys().map(|k| Value::string(k)).collect(),
        )),
        _ => Err(bad_args("keys", args)),
    }
}

fn dict_size(args: &[Value]) -> Result<Value, NativeError> {
    match args {
        [Value::Dict(entries)] => Ok(count(entries.lock().len())),
        _ => Err(bad_args("size", args)),
    }
}
