//! Instruction emission for one schema.
//!
//! `CodegenContext` owns the op buffer, constant pool, local slots and the
//! native/callee binding tables of the unit being built. Every emitted op goes
//! through `bytecode_unsafe`, which tracks the static operand-stack depth so
//! shape bugs surface as `CodegenInvariant` errors at compile time.

use std::sync::Arc;

use super::ast::{BinOp, Expr, ExprKind, Span, Stmt};
use super::compiler::{Branch, CompiledParam, CompiledUnit, Op};
use super::error::CompileError;
use super::natives::{NativeMethod, NativeRegistry};
use super::resolver;
use super::schemas::SchemaRegistry;
use super::typeck::{self, TypeEnv};
use super::types::{Coercion, ReturnConversion, Type, ValueKind};
use super::vm::Value;

#[derive(Debug, Clone)]
struct LocalVar {
    name: String,
    slot: u16,
    ty: Type,
}

pub struct CodegenContext<'r> {
    natives: &'r NativeRegistry,
    schemas: &'r SchemaRegistry,
    /// Span of the schema being compiled, used for invariant errors.
    span: Span,
    ops: Vec<Op>,
    constants: Vec<Value>,
    scopes: Vec<Vec<LocalVar>>,
    local_count: u16,
    depth: i32,
    max_depth: i32,
    native_slots: Vec<Arc<NativeMethod>>,
    callees: Vec<String>,
}

impl TypeEnv for CodegenContext<'_> {
    fn local_type(&self, name: &str) -> Option<Type> {
        self.lookup(name).map(|local| local.ty.clone())
    }

    fn natives(&self) -> &NativeRegistry {
        self.natives
    }

    fn schemas(&self) -> &SchemaRegistry {
        self.schemas
    }
}

impl<'r> CodegenContext<'r> {
    pub fn new(natives: &'r NativeRegistry, schemas: &'r SchemaRegistry, span: Span) -> Self {
        Self {
            natives,
            schemas,
            span,
            ops: Vec::new(),
            constants: Vec::new(),
            scopes: vec![Vec::new()],
            local_count: 0,
            depth: 0,
            max_depth: 0,
            native_slots: Vec::new(),
            callees: Vec::new(),
        }
    }

    /// Current static depth of the operand stack.
    pub fn depth(&self) -> i32 {
        self.depth
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// Static type of `expr` in the current scope.
    pub fn type_of(&self, expr: &Expr) -> Result<Type, CompileError> {
        typeck::type_of(expr, self)
    }

    // ── Locals & scopes ───────────────────────────────────────────

    /// Static type of `expr` when stored as `target`. An empty list literal
    /// takes the declared list type.
    pub fn binding_type(&self, expr: &Expr, target: Option<&Type>) -> Result<Type, CompileError> {
        match (&expr.kind, target) {
            (ExprKind::List(items), Some(declared @ Type::List(_))) if items.is_empty() => {
                Ok(declared.clone())
            }
            _ => self.type_of(expr),
        }
    }

    fn lookup(&self, name: &str) -> Option<&LocalVar> {
        self.scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.iter().rev())
            .find(|local| local.name == name)
    }

    fn allocate_slot(&mut self) -> Result<u16, CompileError> {
        let slot = self.local_count;
        self.local_count = slot
            .checked_add(1)
            .ok_or_else(|| CompileError::codegen("Too many local variables (max 65535)", self.span))?;
        Ok(slot)
    }

    /// Declare a named local in the innermost scope.
    pub fn declare_local(&mut self, name: &str, ty: Type, span: Span) -> Result<u16, CompileError> {
        let already = self
            .scopes
            .last()
            .is_some_and(|scope| scope.iter().any(|l| l.name == name));
        if already {
            return Err(CompileError::resolution(
                format!("`{name}` is already declared in this scope"),
                span,
            ));
        }
        let slot = self.allocate_slot()?;
        if let Some(scope) = self.scopes.last_mut() {
            scope.push(LocalVar {
                name: name.to_string(),
                slot,
                ty,
            });
        }
        Ok(slot)
    }

    /// A slot no script name can refer to (loop counters, iterators).
    fn hidden_local(&mut self) -> Result<u16, CompileError> {
        self.allocate_slot()
    }

    pub fn begin_scope(&mut self) {
        self.scopes.push(Vec::new());
    }

    pub fn end_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    // ── Emission primitives ───────────────────────────────────────

    /// Append an op as-is. Only the stack depth is checked.
    pub fn bytecode_unsafe(&mut self, op: Op) -> Result<&mut Self, CompileError> {
        let (delta, needs) = op.stack_effect();
        if self.depth < needs {
            return Err(CompileError::codegen(
                format!("{op:?} needs {needs} operand(s), stack holds {}", self.depth),
                self.span,
            ));
        }
        if self.ops.len() >= usize::from(u16::MAX) {
            return Err(CompileError::codegen("Bytecode too large (max 65535 ops)", self.span));
        }
        self.ops.push(op);
        self.depth += delta;
        self.max_depth = self.max_depth.max(self.depth);
        Ok(self)
    }

    /// Push a constant, reusing an identical pool entry when present.
    pub fn constant(&mut self, value: Value) -> Result<&mut Self, CompileError> {
        let idx = match self.constants.iter().position(|c| c.same_constant(&value)) {
            Some(i) => i,
            None => {
                self.constants.push(value);
                self.constants.len() - 1
            }
        };
        let idx = u16::try_from(idx)
            .map_err(|_| CompileError::codegen("Too many constants (max 65535)", self.span))?;
        self.bytecode_unsafe(Op::PushConst(idx))
    }

    /// Assert the runtime kind of the top of stack.
    pub fn typecheck(&mut self, kind: ValueKind) -> Result<&mut Self, CompileError> {
        self.bytecode_unsafe(Op::CheckType(kind))
    }

    pub fn unbox_number(&mut self) -> Result<&mut Self, CompileError> {
        self.bytecode_unsafe(Op::UnboxNumber)
    }

    fn current_offset(&self) -> usize {
        self.ops.len()
    }

    fn offset_u16(&self, offset: usize) -> Result<u16, CompileError> {
        u16::try_from(offset)
            .map_err(|_| CompileError::codegen("Bytecode too large (max 65535 ops)", self.span))
    }

    fn emit_jump(&mut self, op: Op) -> Result<usize, CompileError> {
        let idx = self.current_offset();
        self.bytecode_unsafe(op)?;
        Ok(idx)
    }

    fn patch_jump(&mut self, idx: usize) -> Result<(), CompileError> {
        let target = self.offset_u16(self.ops.len())?;
        match self.ops.get_mut(idx) {
            Some(Op::JumpIf(_, dest) | Op::Jump(dest)) => {
                *dest = target;
                Ok(())
            }
            _ => Err(CompileError::codegen(
                format!("No jump to patch at offset {idx}"),
                self.span,
            )),
        }
    }

    /// Pop a number and run `then` when `branch` holds for it, `otherwise`
    /// when it does not. Both arms must leave the stack at the same depth.
    pub fn if_then_else<T, E>(
        &mut self,
        branch: Branch,
        then: T,
        otherwise: E,
    ) -> Result<&mut Self, CompileError>
    where
        T: FnOnce(&mut Self) -> Result<(), CompileError>,
        E: FnOnce(&mut Self) -> Result<(), CompileError>,
    {
        let to_then = self.emit_jump(Op::JumpIf(branch, 0))?;
        let entry = self.depth;
        otherwise(self)?;
        let else_depth = self.depth;
        let to_end = self.emit_jump(Op::Jump(0))?;
        self.patch_jump(to_then)?;
        self.depth = entry;
        then(self)?;
        if self.depth != else_depth {
            return Err(CompileError::codegen(
                format!(
                    "Branches leave different stack depths (then {}, else {else_depth})",
                    self.depth
                ),
                self.span,
            ));
        }
        self.patch_jump(to_end)?;
        Ok(self)
    }

    /// Adapt the value on top of the stack from `from` to `to` before it is
    /// stored or returned.
    pub fn coerce(
        &mut self,
        from: &Type,
        to: &Type,
        span: Span,
        message: impl FnOnce() -> String,
    ) -> Result<&mut Self, CompileError> {
        match from.storage_coercion_to(to) {
            Some(coercion) => self.emit_coercion(coercion),
            None => Err(CompileError::type_mismatch(message(), span)),
        }
    }

    fn emit_coercion(&mut self, coercion: Coercion) -> Result<&mut Self, CompileError> {
        match coercion {
            Coercion::Identity | Coercion::Box | Coercion::Widen => Ok(self),
            Coercion::Check(ValueKind::Number) => self.typecheck(ValueKind::Number)?.unbox_number(),
            Coercion::Check(kind) => self.typecheck(kind),
        }
    }

    fn bind_native(&mut self, method: &Arc<NativeMethod>) -> Result<u16, CompileError> {
        let idx = match self.native_slots.iter().position(|m| Arc::ptr_eq(m, method)) {
            Some(i) => i,
            None => {
                self.native_slots.push(Arc::clone(method));
                self.native_slots.len() - 1
            }
        };
        u16::try_from(idx).map_err(|_| CompileError::codegen("Too many native bindings", self.span))
    }

    fn bind_callee(&mut self, name: &str) -> Result<u16, CompileError> {
        let idx = match self.callees.iter().position(|n| n == name) {
            Some(i) => i,
            None => {
                self.callees.push(name.to_string());
                self.callees.len() - 1
            }
        };
        u16::try_from(idx).map_err(|_| CompileError::codegen("Too many callees", self.span))
    }

    // ── Expressions ───────────────────────────────────────────────

    /// Emit code leaving the value of `expr` on the stack (nothing for void).
    pub fn push_value(&mut self, expr: &Expr) -> Result<&mut Self, CompileError> {
        match &expr.kind {
            ExprKind::Number(v) => self.constant(Value::Number(*v)),
            ExprKind::Str(s) => self.constant(Value::string(s)),
            ExprKind::Text(s) => self.constant(Value::text(s)),
            ExprKind::List(items) => {
                self.type_of(expr)?;
                for item in items {
                    self.push_value(item)?;
                }
                let n = u16::try_from(items.len()).map_err(|_| {
                    CompileError::codegen("List literal too long (max 65535 items)", expr.span)
                })?;
                self.bytecode_unsafe(Op::MakeList(n))
            }
            ExprKind::Ident(name) => match self.lookup(name) {
                Some(local) => {
                    let slot = local.slot;
                    self.bytecode_unsafe(Op::LoadLocal(slot))
                }
                None => Err(CompileError::resolution(
                    format!("Unknown variable `{name}`"),
                    expr.span,
                )),
            },
            ExprKind::BinOp { op, left, right } => {
                self.type_of(expr)?;
                self.push_binop(*op, left, right)
            }
            ExprKind::Neg(inner) => self.push_number(inner)?.bytecode_unsafe(Op::Neg),
            ExprKind::Call(call) => {
                let target = resolver::resolve(call, expr.span, &*self)?;
                self.push_value(target)
            }
            ExprKind::NativeCall { method, args } => {
                let returns = method
                    .type_hint()
                    .map(|hint| !hint.returns.is_void())
                    .ok_or_else(|| {
                        CompileError::codegen(
                            format!("Native {} has no signature", method.qualified_name()),
                            expr.span,
                        )
                    })?;
                for arg in args {
                    self.push_value(arg)?;
                }
                let slot = self.bind_native(method)?;
                let argc = argc(args.len(), expr.span)?;
                self.bytecode_unsafe(Op::CallNative { slot, argc, returns })
            }
            ExprKind::UserCall { schema, args } => {
                for arg in args {
                    self.push_value(arg)?;
                }
                let callee = self.bind_callee(&schema.name)?;
                let argc = argc(args.len(), expr.span)?;
                self.bytecode_unsafe(Op::CallUser {
                    callee,
                    argc,
                    returns: !schema.returns.is_void(),
                })
            }
            ExprKind::Coerce { inner, coercion, .. } => {
                self.push_value(inner)?;
                self.emit_coercion(*coercion)
            }
        }
    }

    /// Emit `expr` as a raw number: checked when dynamic, then unboxed.
    fn push_number(&mut self, expr: &Expr) -> Result<&mut Self, CompileError> {
        let ty = self.type_of(expr)?;
        let coercion = typeck::numeric_operand(&ty, expr.span)?;
        self.push_value(expr)?;
        if let Coercion::Check(kind) = coercion {
            self.typecheck(kind)?;
        }
        self.unbox_number()
    }

    fn push_binop(&mut self, op: BinOp, left: &Expr, right: &Expr) -> Result<&mut Self, CompileError> {
        match op {
            BinOp::Add if typeck::is_concat(&self.type_of(left)?, &self.type_of(right)?) => {
                self.push_value(left)?;
                self.push_value(right)?;
                self.bytecode_unsafe(Op::Concat)
            }
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => {
                self.push_number(left)?;
                self.push_number(right)?;
                self.bytecode_unsafe(match op {
                    BinOp::Add => Op::Add,
                    BinOp::Sub => Op::Sub,
                    BinOp::Mul => Op::Mul,
                    _ => Op::Div,
                })
            }
            BinOp::Lt | BinOp::Gt => {
                self.push_number(left)?;
                self.push_number(right)?;
                self.bytecode_unsafe(Op::CompareNumbers)?;
                let branch = if op == BinOp::Lt { Branch::Lt } else { Branch::Gt };
                self.push_boolean(branch)
            }
            BinOp::Eq => {
                self.push_value(left)?;
                self.push_value(right)?;
                self.bytecode_unsafe(Op::CompareValues)?;
                self.push_boolean(Branch::Eq)
            }
        }
    }

    /// Turn a comparison result into the canonical 1/0 boolean.
    fn push_boolean(&mut self, branch: Branch) -> Result<&mut Self, CompileError> {
        self.if_then_else(
            branch,
            |c| {
                c.constant(Value::Number(1.0))?;
                Ok(())
            },
            |c| {
                c.constant(Value::Number(0.0))?;
                Ok(())
            },
        )
    }

    /// Evaluate `expr` for its effects and drop any value it leaves.
    pub fn discard_value(&mut self, expr: &Expr) -> Result<&mut Self, CompileError> {
        let ty = self.type_of(expr)?;
        self.push_value(expr)?;
        if ty.is_void() {
            Ok(self)
        } else {
            self.bytecode_unsafe(Op::Pop)
        }
    }

    // ── Actions ───────────────────────────────────────────────────

    /// Emit one action. Actions never change the stack depth.
    pub fn perform(&mut self, stmt: &Stmt) -> Result<&mut Self, CompileError> {
        let entry = self.depth;
        match stmt {
            Stmt::Local {
                name,
                ty,
                value,
                span,
            } => {
                let value_ty = self.binding_type(value, ty.as_ref())?;
                if value_ty.is_void() {
                    return Err(CompileError::type_mismatch(
                        format!("Cannot bind a void value to `{name}`"),
                        value.span,
                    ));
                }
                let target = ty.clone().unwrap_or_else(|| value_ty.clone());
                self.push_value(value)?;
                self.coerce(&value_ty, &target, value.span, || {
                    format!("Cannot bind {value_ty} to `{name}` of type {target}")
                })?;
                let slot = self.declare_local(name, target.clone(), *span)?;
                self.bytecode_unsafe(Op::StoreLocal(slot))?;
            }
            Stmt::Assign { name, value, span } => {
                let Some(local) = self.lookup(name).cloned() else {
                    return Err(CompileError::resolution(
                        format!("Unknown variable `{name}`"),
                        *span,
                    ));
                };
                let value_ty = self.binding_type(value, Some(&local.ty))?;
                self.push_value(value)?;
                self.coerce(&value_ty, &local.ty, value.span, || {
                    format!("Cannot assign {value_ty} to `{name}` of type {}", local.ty)
                })?;
                self.bytecode_unsafe(Op::StoreLocal(local.slot))?;
            }
            Stmt::If {
                condition,
                then_body,
                else_body,
                ..
            } => {
                let cond_ty = self.type_of(condition)?;
                self.push_value(condition)?;
                self.coerce(&cond_ty, &Type::Boolean, condition.span, || {
                    format!("Condition must be boolean, got {cond_ty}")
                })?;
                self.if_then_else(
                    Branch::Ne,
                    |c| c.block(then_body),
                    |c| match else_body {
                        Some(body) => c.block(body),
                        None => Ok(()),
                    },
                )?;
            }
            Stmt::Repeat { count, body, .. } => {
                self.push_number(count)?;
                let counter = self.hidden_local()?;
                self.bytecode_unsafe(Op::StoreLocal(counter))?;
                let loop_start = self.offset_u16(self.current_offset())?;
                self.bytecode_unsafe(Op::LoadLocal(counter))?;
                self.constant(Value::Number(0.0))?;
                self.bytecode_unsafe(Op::CompareNumbers)?;
                let exit = self.emit_jump(Op::JumpIf(Branch::Le, 0))?;
                self.block(body)?;
                self.bytecode_unsafe(Op::LoadLocal(counter))?;
                self.constant(Value::Number(1.0))?;
                self.bytecode_unsafe(Op::Sub)?;
                self.bytecode_unsafe(Op::StoreLocal(counter))?;
                self.bytecode_unsafe(Op::Jump(loop_start))?;
                self.patch_jump(exit)?;
            }
            Stmt::Foreach {
                var,
                iterable,
                body,
                span,
            } => {
                let iter_ty = self.type_of(iterable)?;
                let element = match &iter_ty {
                    Type::List(element) => (**element).clone(),
                    Type::Any => Type::Any,
                    other => {
                        return Err(CompileError::type_mismatch(
                            format!("Cannot iterate over {other}"),
                            iterable.span,
                        ))
                    }
                };
                self.push_value(iterable)?;
                if iter_ty == Type::Any {
                    self.typecheck(ValueKind::List)?;
                }
                let list = self.hidden_local()?;
                self.bytecode_unsafe(Op::StoreLocal(list))?;
                let index = self.hidden_local()?;
                self.constant(Value::Number(0.0))?;
                self.bytecode_unsafe(Op::StoreLocal(index))?;

                let loop_start = self.offset_u16(self.current_offset())?;
                self.bytecode_unsafe(Op::LoadLocal(index))?;
                self.bytecode_unsafe(Op::LoadLocal(list))?;
                self.bytecode_unsafe(Op::ListLen)?;
                self.bytecode_unsafe(Op::CompareNumbers)?;
                let exit = self.emit_jump(Op::JumpIf(Branch::Ge, 0))?;

                self.begin_scope();
                let slot = self.declare_local(var, element, *span)?;
                self.bytecode_unsafe(Op::LoadLocal(list))?;
                self.bytecode_unsafe(Op::LoadLocal(index))?;
                self.bytecode_unsafe(Op::ListIndex)?;
                self.bytecode_unsafe(Op::StoreLocal(slot))?;
                let body_result = self.block(body);
                self.end_scope();
                body_result?;

                self.bytecode_unsafe(Op::LoadLocal(index))?;
                self.constant(Value::Number(1.0))?;
                self.bytecode_unsafe(Op::Add)?;
                self.bytecode_unsafe(Op::StoreLocal(index))?;
                self.bytecode_unsafe(Op::Jump(loop_start))?;
                self.patch_jump(exit)?;
            }
            Stmt::Expr(expr) => {
                self.discard_value(expr)?;
            }
        }
        if self.depth != entry {
            return Err(CompileError::codegen(
                format!(
                    "Action changed the stack depth from {entry} to {}",
                    self.depth
                ),
                stmt.span(),
            ));
        }
        Ok(self)
    }

    /// Emit a block of actions in its own scope.
    fn block(&mut self, stmts: &[Stmt]) -> Result<(), CompileError> {
        self.begin_scope();
        let result = stmts.iter().try_for_each(|stmt| self.perform(stmt).map(drop));
        self.end_scope();
        result
    }

    /// Return the value prescribed for `returns` when the body yields none.
    pub fn return_default(&mut self, returns: &Type) -> Result<&mut Self, CompileError> {
        match returns.return_conversion() {
            ReturnConversion::Nothing => return self.bytecode_unsafe(Op::ReturnVoid),
            ReturnConversion::Zero => self.constant(Value::Number(0.0))?,
            ReturnConversion::EmptyString => self.constant(Value::string(""))?,
            ReturnConversion::EmptyText => self.constant(Value::text(""))?,
            ReturnConversion::NewList => self.bytecode_unsafe(Op::MakeList(0))?,
            ReturnConversion::NewDict => self.bytecode_unsafe(Op::MakeDict)?,
            ReturnConversion::Null => self.bytecode_unsafe(Op::PushNull)?,
        };
        self.bytecode_unsafe(Op::Return)
    }

    /// Seal the unit. The stack must be empty at the end of the ops.
    pub fn finish(
        self,
        name: String,
        params: Vec<CompiledParam>,
        returns: Type,
    ) -> Result<CompiledUnit, CompileError> {
        if self.depth != 0 {
            return Err(CompileError::codegen(
                format!("Unit `{name}` ends with {} value(s) on the stack", self.depth),
                self.span,
            ));
        }
        let max_stack = u16::try_from(self.max_depth)
            .map_err(|_| CompileError::codegen("Operand stack too deep", self.span))?;
        Ok(CompiledUnit {
            name,
            params,
            returns,
            ops: self.ops,
            constants: self.constants,
            local_count: self.local_count,
            max_stack,
            natives: self.native_slots,
            callees: self.callees,
        })
    }
}

fn argc(len: usize, span: Span) -> Result<u8, CompileError> {
    u8::try_from(len).map_err(|_| CompileError::codegen("Too many arguments (max 255)", span))
}
