//! Stack machine executing compiled units.
//!
//! A `Program` links compiled units by normalized name. User calls are looked
//! up by name at run time, so units may be linked in any order and may call
//! themselves.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use super::compiler::{CompiledUnit, Op};
use super::schemas::normalize_name;
use super::types::{Type, ValueKind};

/// Default maximum operand stack depth.
pub const MAX_STACK: usize = 256;
/// Default maximum nesting of user schema calls.
pub const MAX_CALL_DEPTH: usize = 64;

/// Runtime value. Booleans are the numbers 0 and 1.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Number(f64),
    Str(Arc<str>),
    Text(Arc<str>),
    List(Arc<Mutex<Vec<Value>>>),
    Dict(Arc<Mutex<IndexMap<String, Value>>>),
}

impl Value {
    pub fn string(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }

    pub fn text(s: &str) -> Self {
        Value::Text(Arc::from(s))
    }

    pub fn new_list(items: Vec<Value>) -> Self {
        Value::List(Arc::new(Mutex::new(items)))
    }

    pub fn new_dict() -> Self {
        Value::Dict(Arc::new(Mutex::new(IndexMap::new())))
    }

    pub fn from_bool(b: bool) -> Self {
        Value::Number(if b { 1.0 } else { 0.0 })
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Number(_) => ValueKind::Number,
            Value::Str(_) => ValueKind::String,
            Value::Text(_) => ValueKind::Text,
            Value::List(_) => ValueKind::List,
            Value::Dict(_) => ValueKind::Dict,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Contents of a string or text value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        self.as_number().is_some_and(|n| n != 0.0)
    }

    /// Key under which this value is stored in a dict.
    pub fn dict_key(&self) -> Option<String> {
        match self {
            Value::Str(s) | Value::Text(s) => Some(s.to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Constant-pool identity: same variant and bit-identical payload.
    pub fn same_constant(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Number(a), Value::Number(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) | (Value::Text(a), Value::Text(b)) => a == b,
            _ => false,
        }
    }

    /// Literal form used in disassembly listings.
    pub fn debug_literal(&self) -> String {
        match self {
            Value::Str(s) => format!("\"{}\"", s.escape_debug()),
            Value::Text(s) => format!("'{}'", s.escape_debug()),
            other => other.to_string(),
        }
    }

    fn container_ptr(&self) -> Option<*const ()> {
        match self {
            Value::List(items) => Some(Arc::as_ptr(items).cast()),
            Value::Dict(entries) => Some(Arc::as_ptr(entries).cast()),
            _ => None,
        }
    }

    /// Whether `self` is `container` or holds it at any depth. Inserting such
    /// a value into `container` would make it contain itself.
    pub fn reaches(&self, container: &Value) -> bool {
        container
            .container_ptr()
            .is_some_and(|target| self.reaches_ptr(target))
    }

    fn reaches_ptr(&self, target: *const ()) -> bool {
        if self.container_ptr() == Some(target) {
            return true;
        }
        match self {
            Value::List(items) => items.lock().iter().any(|v| v.reaches_ptr(target)),
            Value::Dict(entries) => entries.lock().values().any(|v| v.reaches_ptr(target)),
            _ => false,
        }
    }

    /// Convert a JSON document into a value. `true`/`false` become 1/0.
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::from_bool(*b),
            serde_json::Value::Number(n) => n.as_f64().map_or(Value::Null, Value::Number),
            serde_json::Value::String(s) => Value::string(s),
            serde_json::Value::Array(items) => {
                Value::new_list(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => {
                let dict: IndexMap<String, Value> = map
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect();
                Value::Dict(Arc::new(Mutex::new(dict)))
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) | (Value::Text(a), Value::Text(b)) => a == b,
            // Compare snapshots so no lock is held while nested values are compared.
            (Value::List(a), Value::List(b)) => {
                Arc::ptr_eq(a, b) || {
                    let left = a.lock().clone();
                    let right = b.lock().clone();
                    left == right
                }
            }
            (Value::Dict(a), Value::Dict(b)) => {
                Arc::ptr_eq(a, b) || {
                    let left = a.lock().clone();
                    let right = b.lock().clone();
                    left == right
                }
            }
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Str(s) | Value::Text(s) => f.write_str(s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.lock().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item.debug_literal())?;
                }
                f.write_str("]")
            }
            Value::Dict(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.lock().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {}", value.debug_literal())?;
                }
                f.write_str("}")
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Number(n) => serializer.serialize_f64(*n),
            Value::Str(s) | Value::Text(s) => serializer.serialize_str(s),
            Value::List(items) => {
                let items = items.lock();
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items.iter() {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Dict(entries) => {
                let entries = entries.lock();
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries.iter() {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

/// Failure while executing a unit.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeError {
    /// A runtime type assertion failed.
    TypeCheck {
        unit: String,
        at: usize,
        expected: ValueKind,
        found: ValueKind,
    },
    StackOverflow { unit: String, limit: usize },
    CallDepthExceeded { limit: usize },
    UnknownSchema(String),
    /// `invoke` was given arguments that do not fit the signature.
    Arguments { schema: String, message: String },
    Native { name: String, message: String },
    IndexOutOfBounds { index: f64, len: usize },
    /// Ops that do not fit the stack or pools they reference.
    Malformed { unit: String, at: usize, message: String },
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::TypeCheck {
                unit,
                at,
                expected,
                found,
            } => write!(
                f,
                "{unit}@{at}: expected {}, found {}",
                expected.name(),
                found.name()
            ),
            RuntimeError::StackOverflow { unit, limit } => {
                write!(f, "{unit}: operand stack exceeded {limit} values")
            }
            RuntimeError::CallDepthExceeded { limit } => {
                write!(f, "schema calls nested deeper than {limit}")
            }
            RuntimeError::UnknownSchema(name) => write!(f, "no linked schema named `{name}`"),
            RuntimeError::Arguments { schema, message } => write!(f, "{schema}: {message}"),
            RuntimeError::Native { name, message } => write!(f, "native {name} failed: {message}"),
            RuntimeError::IndexOutOfBounds { index, len } => {
                write!(f, "index {index} out of bounds for list of length {len}")
            }
            RuntimeError::Malformed { unit, at, message } => {
                write!(f, "{unit}@{at}: malformed bytecode: {message}")
            }
        }
    }
}

impl std::error::Error for RuntimeError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_stack: usize,
    pub max_call_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_stack: MAX_STACK,
            max_call_depth: MAX_CALL_DEPTH,
        }
    }
}

/// Linked set of compiled units.
#[derive(Debug, Default)]
pub struct Program {
    units: IndexMap<String, Arc<CompiledUnit>>,
    limits: Limits,
}

impl Program {
    pub fn new(limits: Limits) -> Self {
        Self {
            units: IndexMap::new(),
            limits,
        }
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Add a unit, replacing any unit with the same name. Returns the replaced
    /// unit.
    pub fn link(&mut self, unit: CompiledUnit) -> Option<Arc<CompiledUnit>> {
        let key = normalize_name(&unit.name);
        self.units.insert(key, Arc::new(unit))
    }

    pub fn get(&self, name: &str) -> Option<&Arc<CompiledUnit>> {
        self.units.get(&normalize_name(name))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.units.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Run schema `name` with host-supplied arguments. Void schemas return
    /// `Value::Null`.
    pub fn invoke(&self, name: &str, args: Vec<Value>) -> Result<Value, RuntimeError> {
        let unit = self
            .get(name)
            .ok_or_else(|| RuntimeError::UnknownSchema(name.to_string()))?;
        unit.invoke(self, args)
    }
}

impl CompiledUnit {
    /// Run this unit against `program`. Arity and the runtime kind of every
    /// argument are checked against the declared signature first.
    pub fn invoke(&self, program: &Program, args: Vec<Value>) -> Result<Value, RuntimeError> {
        if args.len() != self.params.len() {
            return Err(RuntimeError::Arguments {
                schema: self.name.clone(),
                message: format!(
                    "expects {} argument(s), got {}",
                    self.params.len(),
                    args.len()
                ),
            });
        }
        for (param, arg) in self.params.iter().zip(&args) {
            if let Some(kind) = param.ty.value_kind() {
                if arg.kind() != kind {
                    return Err(RuntimeError::Arguments {
                        schema: self.name.clone(),
                        message: format!(
                            "parameter {} expects {}, got {}",
                            param.name,
                            param.ty,
                            arg.kind().name()
                        ),
                    });
                }
            }
        }
        log::debug!("invoking `{}` with {} argument(s)", self.name, args.len());
        execute(program, self, args)
    }
}

/// Run one unit with already-checked arguments.
pub fn execute(program: &Program, unit: &CompiledUnit, args: Vec<Value>) -> Result<Value, RuntimeError> {
    run(program, unit, args, 0)
}

#[allow(clippy::too_many_lines)]
fn run(
    program: &Program,
    unit: &CompiledUnit,
    args: Vec<Value>,
    depth: usize,
) -> Result<Value, RuntimeError> {
    if depth >= program.limits.max_call_depth {
        return Err(RuntimeError::CallDepthExceeded {
            limit: program.limits.max_call_depth,
        });
    }

    let mut locals = vec![Value::Null; usize::from(unit.local_count)];
    for (slot, arg) in locals.iter_mut().zip(args) {
        *slot = arg;
    }
    let mut stack: Vec<Value> = Vec::with_capacity(usize::from(unit.max_stack));
    let mut ip: usize = 0;

    while let Some(&op) = unit.ops.get(ip) {
        let at = ip;
        ip += 1;
        let mut m = Machine {
            unit,
            at,
            stack: &mut stack,
        };

        match op {
            Op::PushConst(idx) => {
                let value = unit
                    .constants
                    .get(usize::from(idx))
                    .cloned()
                    .ok_or_else(|| m.malformed(format!("no constant {idx}")))?;
                m.push(value);
            }
            Op::PushNull => m.push(Value::Null),
            Op::LoadLocal(slot) => {
                let value = locals
                    .get(usize::from(slot))
                    .cloned()
                    .ok_or_else(|| m.malformed(format!("no local {slot}")))?;
                m.push(value);
            }
            Op::StoreLocal(slot) => {
                let value = m.pop()?;
                let target = locals
                    .get_mut(usize::from(slot))
                    .ok_or_else(|| m.malformed(format!("no local {slot}")))?;
                *target = value;
            }
            Op::Pop => {
                m.pop()?;
            }

            // Arithmetic
            Op::Add => m.float_binop(|a, b| a + b)?,
            Op::Sub => m.float_binop(|a, b| a - b)?,
            Op::Mul => m.float_binop(|a, b| a * b)?,
            Op::Div => m.float_binop(|a, b| if b == 0.0 { 0.0 } else { a / b })?,
            Op::Neg => {
                let n = m.pop_number()?;
                m.push(Value::Number(-n));
            }
            Op::Concat => {
                let b = m.pop()?;
                let a = m.pop()?;
                let joined = match (&a, &b) {
                    (Value::Str(x), Value::Str(y)) => Value::string(&format!("{x}{y}")),
                    (Value::Text(x), Value::Text(y)) => Value::text(&format!("{x}{y}")),
                    _ => {
                        return Err(m.type_error(ValueKind::String, b.kind()));
                    }
                };
                m.push(joined);
            }

            // Comparison
            Op::CompareNumbers => m.float_cmp()?,
            Op::CompareValues => {
                let b = m.pop()?;
                let a = m.pop()?;
                m.push(Value::Number(if a == b { 0.0 } else { 1.0 }));
            }

            // Control flow
            Op::JumpIf(branch, target) => {
                if branch.test(m.pop_number()?) {
                    ip = usize::from(target);
                }
            }
            Op::Jump(target) => ip = usize::from(target),

            // Representation
            Op::CheckType(kind) => {
                let found = m.peek()?.kind();
                if found != kind {
                    return Err(m.type_error(kind, found));
                }
            }
            Op::UnboxNumber => {
                let found = m.peek()?.kind();
                if found != ValueKind::Number {
                    return Err(m.type_error(ValueKind::Number, found));
                }
            }

            // Collections
            Op::MakeList(n) => {
                let items = m.pop_n(usize::from(n))?;
                m.push(Value::new_list(items));
            }
            Op::MakeDict => m.push(Value::new_dict()),
            Op::ListLen => {
                let list = m.pop()?;
                let Value::List(items) = &list else {
                    return Err(m.type_error(ValueKind::List, list.kind()));
                };
                #[allow(clippy::cast_precision_loss)]
                let len = items.lock().len() as f64;
                m.push(Value::Number(len));
            }
            Op::ListIndex => {
                let index = m.pop_number()?;
                let list = m.pop()?;
                let Value::List(items) = &list else {
                    return Err(m.type_error(ValueKind::List, list.kind()));
                };
                let element = {
                    let items = items.lock();
                    to_index(index)
                        .and_then(|i| items.get(i).cloned())
                        .ok_or(RuntimeError::IndexOutOfBounds {
                            index,
                            len: items.len(),
                        })?
                };
                m.push(element);
            }

            // Calls
            Op::CallNative {
                slot,
                argc,
                returns,
            } => {
                let method = unit
                    .natives
                    .get(usize::from(slot))
                    .ok_or_else(|| m.malformed(format!("no native slot {slot}")))?;
                let call_args = m.pop_n(usize::from(argc))?;
                let result = (method.func)(&call_args).map_err(|e| RuntimeError::Native {
                    name: method.qualified_name(),
                    message: e.0,
                })?;
                if returns {
                    m.push(result);
                }
            }
            Op::CallUser {
                callee,
                argc,
                returns,
            } => {
                let name = unit
                    .callees
                    .get(usize::from(callee))
                    .ok_or_else(|| m.malformed(format!("no callee slot {callee}")))?;
                let target = program
                    .get(name)
                    .ok_or_else(|| RuntimeError::UnknownSchema(name.clone()))?;
                let call_args = m.pop_n(usize::from(argc))?;
                let result = run(program, target, call_args, depth + 1)?;
                if returns {
                    m.push(result);
                }
            }

            Op::Return => return m.pop(),
            Op::ReturnVoid => return Ok(Value::Null),
        }

        if stack.len() > program.limits.max_stack {
            return Err(RuntimeError::StackOverflow {
                unit: unit.name.clone(),
                limit: program.limits.max_stack,
            });
        }
    }

    // Every compiled unit ends in a return; falling off the end yields nothing.
    Ok(if unit.returns.is_void() {
        Value::Null
    } else {
        default_value(&unit.returns)
    })
}

fn default_value(ty: &Type) -> Value {
    match ty {
        Type::Number | Type::Boolean => Value::Number(0.0),
        Type::String => Value::string(""),
        Type::Text => Value::text(""),
        Type::List(_) => Value::new_list(Vec::new()),
        Type::Dict(..) => Value::new_dict(),
        Type::Any | Type::Void => Value::Null,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn to_index(n: f64) -> Option<usize> {
    (n.is_finite() && n >= 0.0 && n.fract() == 0.0).then_some(n as usize)
}

/// Operand stack view for the op being executed.
struct Machine<'a> {
    unit: &'a CompiledUnit,
    at: usize,
    stack: &'a mut Vec<Value>,
}

impl Machine<'_> {
    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack
            .pop()
            .ok_or_else(|| self.malformed("operand stack underflow".to_string()))
    }

    fn peek(&self) -> Result<&Value, RuntimeError> {
        self.stack
            .last()
            .ok_or_else(|| self.malformed("operand stack underflow".to_string()))
    }

    fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, RuntimeError> {
        let Some(split) = self.stack.len().checked_sub(n) else {
            return Err(self.malformed("operand stack underflow".to_string()));
        };
        Ok(self.stack.split_off(split))
    }

    fn pop_number(&mut self) -> Result<f64, RuntimeError> {
        let value = self.pop()?;
        value
            .as_number()
            .ok_or_else(|| self.type_error(ValueKind::Number, value.kind()))
    }

    fn float_binop(&mut self, op: impl FnOnce(f64, f64) -> f64) -> Result<(), RuntimeError> {
        let b = self.pop_number()?;
        let a = self.pop_number()?;
        self.push(Value::Number(op(a, b)));
        Ok(())
    }

    /// Sign of `a - b` as -1, 0 or 1. Unordered operands compare as 1.
    fn float_cmp(&mut self) -> Result<(), RuntimeError> {
        self.float_binop(|a, b| match a.partial_cmp(&b) {
            Some(Ordering::Less) => -1.0,
            Some(Ordering::Equal) => 0.0,
            Some(Ordering::Greater) | None => 1.0,
        })
    }

    fn type_error(&self, expected: ValueKind, found: ValueKind) -> RuntimeError {
        RuntimeError::TypeCheck {
            unit: self.unit.name.clone(),
            at: self.at,
            expected,
            found,
        }
    }

    fn malformed(&self, message: String) -> RuntimeError {
        RuntimeError::Malformed {
            unit: self.unit.name.clone(),
            at: self.at,
            message,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dsl::compiler::compile_schema;
    use crate::dsl::lexer::lex;
    use crate::dsl::natives::NativeRegistry;
    use crate::dsl::parser::parse;
    use crate::dsl::schemas::{FunctionSchema, SchemaRegistry};

    fn program_with(src: &str, limits: Limits) -> Program {
        let natives = NativeRegistry::with_builtins().unwrap();
        let schemas = SchemaRegistry::new();
        let script = parse(lex("test", src).unwrap()).unwrap();
        for def in &script.schemas {
            schemas.register(FunctionSchema::from_def(def));
        }
        let mut program = Program::new(limits);
        for def in &script.schemas {
            program.link(compile_schema(def, &natives, &schemas).unwrap());
        }
        program
    }

    fn program(src: &str) -> Program {
        program_with(src, Limits::default())
    }

    fn num(n: f64) -> Value {
        Value::Number(n)
    }

    #[test]
    fn arithmetic_and_precedence() {
        let p = program("schema f(x: number) -> number { 1 + x * 2 - 6 / 3 }");
        assert_eq!(p.invoke("f", vec![num(4.0)]).unwrap(), num(7.0));
    }

    #[test]
    fn division_by_zero_yields_zero() {
        let p = program("schema f(x: number) -> number { 10 / x }");
        assert_eq!(p.invoke("f", vec![num(0.0)]).unwrap(), num(0.0));
    }

    #[test]
    fn comparisons_produce_booleans() {
        let p = program(
            "schema lt(a: number, b: number) -> boolean { a < b }
             schema gt(a: number, b: number) -> boolean { a > b }
             schema eq(a: any, b: any) -> boolean { a == b }",
        );
        assert_eq!(p.invoke("lt", vec![num(1.0), num(2.0)]).unwrap(), num(1.0));
        assert_eq!(p.invoke("lt", vec![num(2.0), num(2.0)]).unwrap(), num(0.0));
        assert_eq!(p.invoke("gt", vec![num(3.0), num(2.0)]).unwrap(), num(1.0));
        assert_eq!(
            p.invoke("eq", vec![Value::string("a"), Value::string("a")]).unwrap(),
            num(1.0)
        );
        assert_eq!(
            p.invoke("eq", vec![Value::string("a"), Value::text("a")]).unwrap(),
            num(0.0)
        );
    }

    #[test]
    fn if_else_and_locals() {
        let p = program(
            "schema sign(x: number) -> number {
                local r = 0
                if x < 0 { r = -1 } else { if x > 0 { r = 1 } }
                r
            }",
        );
        assert_eq!(p.invoke("sign", vec![num(-5.0)]).unwrap(), num(-1.0));
        assert_eq!(p.invoke("sign", vec![num(0.0)]).unwrap(), num(0.0));
        assert_eq!(p.invoke("sign", vec![num(9.0)]).unwrap(), num(1.0));
    }

    #[test]
    fn repeat_runs_count_times() {
        let p = program(
            "schema pow2(n: number) -> number {
                local acc = 1
                repeat n { acc = acc * 2 }
                acc
            }",
        );
        assert_eq!(p.invoke("pow2", vec![num(10.0)]).unwrap(), num(1024.0));
        assert_eq!(p.invoke("pow2", vec![num(0.0)]).unwrap(), num(1.0));
    }

    #[test]
    fn foreach_visits_every_element() {
        let p = program(
            "schema total(xs: list[number]) -> number {
                local t = 0
                foreach x in xs { t = t + x }
                t
            }",
        );
        let xs = Value::new_list(vec![num(1.0), num(2.0), num(3.5)]);
        assert_eq!(p.invoke("total", vec![xs]).unwrap(), num(6.5));
        assert_eq!(
            p.invoke("total", vec![Value::new_list(vec![])]).unwrap(),
            num(0.0)
        );
    }

    #[test]
    fn foreach_over_any_checks_element_use() {
        let p = program(
            "schema total(xs: any) -> number {
                local t = 0
                foreach x in xs { t = t + x }
                t
            }",
        );
        let ok = Value::new_list(vec![num(1.0), num(2.0)]);
        assert_eq!(p.invoke("total", vec![ok]).unwrap(), num(3.0));
        let bad = Value::new_list(vec![Value::string("x")]);
        assert!(matches!(
            p.invoke("total", vec![bad]).unwrap_err(),
            RuntimeError::TypeCheck {
                expected: ValueKind::Number,
                found: ValueKind::String,
                ..
            }
        ));
        assert!(matches!(
            p.invoke("total", vec![num(1.0)]).unwrap_err(),
            RuntimeError::TypeCheck {
                expected: ValueKind::List,
                ..
            }
        ));
    }

    #[test]
    fn string_and_text_concatenation() {
        let p = program(
            "schema greet(name: string) -> string { \"hello, \" + name }
             schema shout(t: text) -> text { t + '!' }",
        );
        assert_eq!(
            p.invoke("greet", vec![Value::string("ada")]).unwrap(),
            Value::string("hello, ada")
        );
        assert_eq!(
            p.invoke("shout", vec![Value::text("hey")]).unwrap(),
            Value::text("hey!")
        );
    }

    #[test]
    fn recursion_through_user_calls() {
        let p = program(
            "schema fact(n: number) -> number {
                local r = 1
                if n > 1 { r = n * fact(n - 1) }
                r
            }",
        );
        assert_eq!(p.invoke("fact", vec![num(5.0)]).unwrap(), num(120.0));
    }

    #[test]
    fn call_depth_is_bounded() {
        let p = program_with(
            "schema down(n: number) -> number { down(n + 1) }",
            Limits {
                max_stack: MAX_STACK,
                max_call_depth: 8,
            },
        );
        assert_eq!(
            p.invoke("down", vec![num(0.0)]).unwrap_err(),
            RuntimeError::CallDepthExceeded { limit: 8 }
        );
    }

    #[test]
    fn stack_is_bounded() {
        let p = program_with(
            "schema wide() -> list[number] { [1, 2, 3, 4, 5, 6] }",
            Limits {
                max_stack: 4,
                max_call_depth: MAX_CALL_DEPTH,
            },
        );
        assert!(matches!(
            p.invoke("wide", vec![]).unwrap_err(),
            RuntimeError::StackOverflow { limit: 4, .. }
        ));
    }

    #[test]
    fn default_returns() {
        let p = program(
            "schema n() -> number { }
             schema s() -> string { }
             schema l() -> list[text] { }
             schema v() -> void { 1 }
             schema a() -> any { }",
        );
        assert_eq!(p.invoke("n", vec![]).unwrap(), num(0.0));
        assert_eq!(p.invoke("s", vec![]).unwrap(), Value::string(""));
        assert_eq!(p.invoke("l", vec![]).unwrap(), Value::new_list(vec![]));
        assert_eq!(p.invoke("v", vec![]).unwrap(), Value::Null);
        assert_eq!(p.invoke("a", vec![]).unwrap(), Value::Null);
    }

    #[test]
    fn natives_run_through_call_slots() {
        let p = program(
            "schema f(name: string) -> number { length(name) + abs(-2) }
             schema g(xs: list[number]) -> number { sum(xs) }",
        );
        assert_eq!(p.invoke("f", vec![Value::string("abc")]).unwrap(), num(5.0));
        let xs = Value::new_list(vec![num(1.0), num(2.0)]);
        assert_eq!(p.invoke("g", vec![xs]).unwrap(), num(3.0));
    }

    #[test]
    fn invoke_checks_arguments() {
        let p = program("schema f(x: number, s: string) -> number { x }");
        assert!(matches!(
            p.invoke("f", vec![num(1.0)]).unwrap_err(),
            RuntimeError::Arguments { .. }
        ));
        assert!(matches!(
            p.invoke("f", vec![num(1.0), num(2.0)]).unwrap_err(),
            RuntimeError::Arguments { .. }
        ));
        assert_eq!(
            p.invoke("missing", vec![]).unwrap_err(),
            RuntimeError::UnknownSchema("missing".to_string())
        );
    }

    #[test]
    fn unit_invoke_checks_before_running() {
        let p = program("schema greet(name: string) -> string { name + \"!\" }");
        let unit = p.get("greet").unwrap();
        assert_eq!(
            unit.invoke(&p, vec![Value::string("hi")]).unwrap(),
            Value::string("hi!")
        );
        assert!(matches!(
            unit.invoke(&p, vec![Value::text("hi")]).unwrap_err(),
            RuntimeError::Arguments { .. }
        ));
    }

    #[test]
    fn link_replaces_and_normalizes() {
        let mut p = program("schema util.twice(x: number) -> number { x * 2 }");
        assert!(p.get("util_twice").is_some());
        assert_eq!(p.invoke("util.twice", vec![num(4.0)]).unwrap(), num(8.0));
        let other = program("schema util_twice(x: number) -> number { x * 3 }");
        let unit = other.get("util_twice").unwrap().as_ref().clone();
        assert!(p.link(unit).is_some());
        assert_eq!(p.len(), 1);
        assert_eq!(p.invoke("util_twice", vec![num(4.0)]).unwrap(), num(12.0));
    }

    #[test]
    fn nested_shared_lists_compare_without_relocking() {
        let inner = Value::new_list(vec![num(1.0)]);
        let b = Value::new_list(vec![inner]);
        let a = Value::new_list(vec![b.clone()]);
        assert_ne!(a, b);
        assert_ne!(b, a);
        assert_eq!(a, Value::new_list(vec![b.clone()]));
        assert!(a.reaches(&b));
        assert!(!b.reaches(&a));
        assert!(b.reaches(&b));
        assert!(!num(1.0).reaches(&num(1.0)));
    }

    #[test]
    fn values_display_and_serialize() {
        let list = Value::new_list(vec![num(1.0), num(2.5), Value::string("x")]);
        assert_eq!(list.to_string(), "[1, 2.5, \"x\"]");
        assert_eq!(
            serde_json::to_string(&list).unwrap(),
            "[1.0,2.5,\"x\"]"
        );
        let json: serde_json::Value = serde_json::from_str(r#"{"a": [true, null]}"#).unwrap();
        let value = Value::from_json(&json);
        assert_eq!(value.to_string(), "{a: [1, null]}");
    }

    #[test]
    fn constants_compare_bitwise() {
        assert!(num(0.0).same_constant(&num(0.0)));
        assert!(!num(0.0).same_constant(&num(-0.0)));
        assert!(!Value::string("a").same_constant(&Value::text("a")));
    }
}
