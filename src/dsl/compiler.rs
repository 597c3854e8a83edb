use std::sync::Arc;

use serde::{Serialize, Serializer};

use super::ast::{SchemaDef, Stmt};
use super::codegen::CodegenContext;
use super::error::CompileError;
use super::natives::{NativeMethod, NativeRegistry};
use super::parser::TypeSet;
use super::schemas::{normalize_name, SchemaRegistry};
use super::types::{Type, ValueKind};
use super::vm::Value;

/// A compiled schema ready for VM execution.
#[derive(Debug, Clone, Serialize)]
pub struct CompiledUnit {
    /// Normalized schema name.
    pub name: String,
    pub params: Vec<CompiledParam>,
    pub returns: Type,
    pub ops: Vec<Op>,
    pub constants: Vec<Value>,
    /// Number of local variable slots needed, parameters included.
    pub local_count: u16,
    /// Deepest operand stack the ops can reach.
    pub max_stack: u16,
    /// Native methods referenced by `Op::CallNative` slots.
    #[serde(serialize_with = "serialize_natives")]
    pub natives: Vec<Arc<NativeMethod>>,
    /// Schema names referenced by `Op::CallUser` slots.
    pub callees: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledParam {
    pub name: String,
    pub ty: Type,
}

impl CompiledUnit {
    /// Declared parameter types, in order, and the declared return type.
    pub fn signature(&self) -> TypeSet {
        TypeSet {
            params: self.params.iter().map(|p| p.ty.clone()).collect(),
            returns: self.returns.clone(),
        }
    }

    /// Human-readable listing of the ops, one per line.
    pub fn disassemble(&self) -> String {
        let mut out = format!("schema {} {}\n", self.name, self.signature());
        for (i, op) in self.ops.iter().enumerate() {
            let note = match op {
                Op::PushConst(idx) => self
                    .constants
                    .get(usize::from(*idx))
                    .map(|v| format!("  ; {}", v.debug_literal())),
                Op::CallNative { slot, .. } => self
                    .natives
                    .get(usize::from(*slot))
                    .map(|m| format!("  ; {}", m.qualified_name())),
                Op::CallUser { callee, .. } => self
                    .callees
                    .get(usize::from(*callee))
                    .map(|n| format!("  ; {n}")),
                _ => None,
            };
            out.push_str(&format!("{i:04}  {op:?}{}\n", note.unwrap_or_default()));
        }
        out
    }
}

fn serialize_natives<S: Serializer>(
    natives: &[Arc<NativeMethod>],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(natives.iter().map(|m| m.qualified_name()))
}

/// Condition tested by `Op::JumpIf` against the popped number and zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Branch {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Branch {
    pub fn test(self, value: f64) -> bool {
        match self {
            Branch::Lt => value < 0.0,
            Branch::Le => value <= 0.0,
            Branch::Gt => value > 0.0,
            Branch::Ge => value >= 0.0,
            Branch::Eq => value == 0.0,
            Branch::Ne => value != 0.0,
        }
    }
}

/// Bytecode operations for the stack-based VM.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "op", content = "arg")]
pub enum Op {
    /// Push a constant from the constant pool.
    PushConst(u16),
    PushNull,
    /// Load a local variable onto the stack.
    LoadLocal(u16),
    /// Store top of stack into a local variable slot.
    StoreLocal(u16),
    /// Pop top of stack.
    Pop,

    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Neg,
    /// Pop two strings (or two texts) → push their concatenation.
    Concat,

    // Comparison
    /// Pop b, a → push -1, 0 or 1. Unordered operands push 1.
    CompareNumbers,
    /// Pop b, a → push 0 when equal, 1 otherwise.
    CompareValues,

    // Control flow
    /// Pop a number; jump when the branch condition holds.
    JumpIf(Branch, u16),
    /// Unconditional jump.
    Jump(u16),

    // Representation
    /// Assert the runtime kind of the top of stack without popping it.
    CheckType(ValueKind),
    /// Replace the top of stack with its raw number.
    UnboxNumber,

    // Collections
    /// Pop n values → push a new list holding them in order.
    MakeList(u16),
    /// Push a new empty dict.
    MakeDict,
    /// Pop list → push its length.
    ListLen,
    /// Pop index, list → push the element.
    ListIndex,

    // Calls
    CallNative { slot: u16, argc: u8, returns: bool },
    CallUser { callee: u16, argc: u8, returns: bool },

    /// Pop the result and return it.
    Return,
    /// Return without a value.
    ReturnVoid,
}

impl Op {
    /// Net change of the operand stack depth, and how many values the op
    /// needs present before it runs.
    pub fn stack_effect(self) -> (i32, i32) {
        match self {
            Op::PushConst(_) | Op::PushNull | Op::LoadLocal(_) | Op::MakeDict => (1, 0),
            Op::StoreLocal(_) | Op::Pop | Op::JumpIf(..) | Op::Return => (-1, 1),
            Op::Add
            | Op::Sub
            | Op::Mul
            | Op::Div
            | Op::Concat
            | Op::CompareNumbers
            | Op::CompareValues
            | Op::ListIndex => (-1, 2),
            Op::Neg | Op::CheckType(_) | Op::UnboxNumber | Op::ListLen => (0, 1),
            Op::Jump(_) | Op::ReturnVoid => (0, 0),
            Op::MakeList(n) => (1 - i32::from(n), i32::from(n)),
            Op::CallNative { argc, returns, .. } | Op::CallUser { argc, returns, .. } => {
                (i32::from(returns) - i32::from(argc), i32::from(argc))
            }
        }
    }
}

/// Compile one schema definition against the given registries.
///
/// The body's final expression, when present and non-void, is the result.
/// Otherwise the declared return type's default value is returned.
pub fn compile_schema(
    def: &SchemaDef,
    natives: &NativeRegistry,
    schemas: &SchemaRegistry,
) -> Result<CompiledUnit, CompileError> {
    let mut ctx = CodegenContext::new(natives, schemas, def.span);

    let mut params = Vec::with_capacity(def.params.len());
    for p in &def.params {
        ctx.declare_local(&p.name, p.ty.clone(), p.span)?;
        params.push(CompiledParam {
            name: p.name.clone(),
            ty: p.ty.clone(),
        });
    }

    let (result, actions) = match def.body.split_last() {
        Some((Stmt::Expr(last), rest)) if !def.returns.is_void() => (Some(last), rest),
        _ => (None, def.body.as_slice()),
    };

    for stmt in actions {
        ctx.perform(stmt)?;
    }

    match result {
        Some(expr) => {
            let ty = ctx.binding_type(expr, Some(&def.returns))?;
            if ty.is_void() {
                ctx.discard_value(expr)?;
                ctx.return_default(&def.returns)?;
            } else {
                ctx.push_value(expr)?;
                ctx.coerce(&ty, &def.returns, expr.span, || {
                    format!("Schema `{}` returns {}, got {ty}", def.name, def.returns)
                })?;
                ctx.bytecode_unsafe(Op::Return)?;
            }
        }
        None => {
            ctx.return_default(&def.returns)?;
        }
    }

    let unit = ctx.finish(normalize_name(&def.name), params, def.returns.clone())?;
    log::trace!("compiled unit:\n{}", unit.disassemble());
    Ok(unit)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dsl::error::ErrorKind;
    use crate::dsl::lexer::lex;
    use crate::dsl::parser::parse;

    fn compile_src(src: &str, schemas: &SchemaRegistry) -> Result<Vec<CompiledUnit>, CompileError> {
        let natives = NativeRegistry::with_builtins().unwrap();
        let script = parse(lex("test", src)?)?;
        for def in &script.schemas {
            schemas.register(crate::dsl::schemas::FunctionSchema::from_def(def));
        }
        script
            .schemas
            .iter()
            .map(|def| compile_schema(def, &natives, schemas))
            .collect()
    }

    fn compile_one(src: &str) -> CompiledUnit {
        compile_src(src, &SchemaRegistry::new()).unwrap().remove(0)
    }

    #[test]
    fn signature_matches_declaration() {
        let unit = compile_one("schema greet(name: string, n: list[number]) -> dict[string, any] { }");
        let sig = unit.signature();
        assert_eq!(sig.params, vec![Type::String, Type::list_of(Type::Number)]);
        assert_eq!(sig.returns, Type::dict_of(Type::String, Type::Any));
        assert_eq!(unit.name, "greet");
        assert_eq!(unit.local_count, 2);
    }

    #[test]
    fn greet_resolves_length_through_string_class() {
        let unit = compile_one("schema greet(name: string) -> string { length(name); name }");
        assert_eq!(unit.signature().to_string(), "(string) -> string");
        assert_eq!(unit.natives.len(), 1);
        assert_eq!(unit.natives[0].qualified_name(), "string::length");
        assert!(unit.ops.contains(&Op::CallNative { slot: 0, argc: 1, returns: true }));
    }

    #[test]
    fn default_return_conversion() {
        let unit = compile_one("schema f() -> number { local x = 1 }");
        assert_eq!(
            unit.ops,
            vec![Op::PushConst(0), Op::StoreLocal(0), Op::PushConst(1), Op::Return]
        );
        let constants: Vec<Option<f64>> = unit.constants.iter().map(Value::as_number).collect();
        assert_eq!(constants, vec![Some(1.0), Some(0.0)]);

        let unit = compile_one("schema g() -> void { 1 + 2 }");
        assert_eq!(&unit.ops[unit.ops.len() - 2..], &[Op::Pop, Op::ReturnVoid]);

        let unit = compile_one("schema h() -> list[string] { }");
        assert_eq!(unit.ops, vec![Op::MakeList(0), Op::Return]);
    }

    #[test]
    fn less_than_compiles_to_compare_and_branch() {
        let unit = compile_one("schema lt(a: number, b: number) -> boolean { a < b }");
        assert_eq!(
            &unit.ops[..5],
            &[
                Op::LoadLocal(0),
                Op::UnboxNumber,
                Op::LoadLocal(1),
                Op::UnboxNumber,
                Op::CompareNumbers,
            ]
        );
        assert!(matches!(unit.ops[5], Op::JumpIf(Branch::Lt, _)));
        assert_eq!(unit.max_stack, 2);
    }

    #[test]
    fn constants_are_deduplicated() {
        let unit = compile_one("schema f() -> number { 2 + 2 * 2 }");
        assert_eq!(unit.constants.len(), 1);
    }

    #[test]
    fn return_type_mismatch_is_reported() {
        let err = compile_src("schema f() -> string { 42 }", &SchemaRegistry::new()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeMismatch);
        assert!(err.message.contains("returns string, got number"));
    }

    #[test]
    fn recursive_schema_compiles() {
        let units = compile_src(
            "schema fact(n: number) -> number {
                local r = 1
                if n > 1 { r = n * fact(n - 1) }
                r
            }",
            &SchemaRegistry::new(),
        )
        .unwrap();
        assert_eq!(units[0].callees, vec!["fact".to_string()]);
    }

    #[test]
    fn disassembly_lists_every_op() {
        let unit = compile_one("schema f(s: string) -> number { length(s) }");
        let listing = unit.disassemble();
        assert!(listing.starts_with("schema f (string) -> number\n"));
        assert!(listing.contains("CallNative"));
        assert!(listing.contains("; string::length"));
        assert_eq!(listing.lines().count(), unit.ops.len() + 1);
    }

    #[test]
    fn unit_serializes_to_json() {
        let unit = compile_one("schema f(s: string) -> number { length(s) }");
        let json = serde_json::to_value(&unit).unwrap();
        assert_eq!(json["natives"][0], "string::length");
        assert_eq!(json["returns"], "number");
        assert_eq!(json["ops"][0]["op"], "LoadLocal");
    }
}
