//! Late binding of call sites.
//!
//! A call is bound the first time it is typed or emitted, in three tiers:
//!
//! 1. native methods, keyed by the static type of the first argument
//!    (`(class, mangled__name)`, then `(class, name)`, then `(global, name)`);
//! 2. user schemas, by normalized name, then by `type__name`;
//! 3. failure.
//!
//! The chosen target is stored in the call node, so later lookups return the
//! same node and never touch the registries again.

use super::ast::{Expr, ExprKind, LateCall, Span};
use super::error::CompileError;
use super::natives::Owner;
use super::typeck::{type_of, TypeEnv};
use super::types::Type;

/// Bind `call` to its target, reusing an earlier binding when present.
pub fn resolve<'e>(
    call: &'e LateCall,
    span: Span,
    env: &dyn TypeEnv,
) -> Result<&'e Expr, CompileError> {
    if let Some(done) = call.resolved() {
        return Ok(done);
    }

    let virtual_type = virtual_type(call, env)?;
    let target = match resolve_native(call, &virtual_type, span, env)? {
        Some(target) => target,
        None => match resolve_user(call, &virtual_type, span, env)? {
            Some(target) => target,
            None => {
                return Err(CompileError::resolution(
                    format!(
                        "Unable to resolve `{}` for argument type {virtual_type}",
                        call.name
                    ),
                    span,
                ))
            }
        },
    };
    Ok(call.memoize(target))
}

/// Static type of the first argument, or `any` for zero-argument calls.
fn virtual_type(call: &LateCall, env: &dyn TypeEnv) -> Result<Type, CompileError> {
    match call.args.first() {
        Some(first) => type_of(first, env),
        None => Ok(Type::Any),
    }
}

/// Native dispatch keys for `name` on a receiver of type `virtual_type`, most
/// specific first.
pub fn native_keys(virtual_type: &Type, name: &str) -> [(Owner, String); 3] {
    let class = Owner::Class(virtual_type.native_class());
    [
        (class, format!("{}__{name}", virtual_type.mangled_type_name())),
        (class, name.to_string()),
        (Owner::Global, name.to_string()),
    ]
}

fn resolve_native(
    call: &LateCall,
    virtual_type: &Type,
    span: Span,
    env: &dyn TypeEnv,
) -> Result<Option<Expr>, CompileError> {
    let Some(method) = native_keys(virtual_type, &call.name)
        .iter()
        .find_map(|(owner, name)| env.natives().find(*owner, name))
    else {
        return Ok(None);
    };

    let Some(hint) = method.type_hint() else {
        log::debug!(
            "`{}` matched native {} without a leading type hint; trying user schemas",
            call.name,
            method.qualified_name()
        );
        return Ok(None);
    };

    let args = if method.mutates_receiver() {
        hint.bind_receiver(virtual_type)
            .typecheck(&call.name, &call.args, span, env)?
    } else {
        hint.typecheck(&call.name, &call.args, span, env)?
    };
    log::debug!("`{}` bound to native {} {hint}", call.name, method.qualified_name());
    Ok(Some(Expr::new(
        ExprKind::NativeCall { method, args },
        span,
    )))
}

fn resolve_user(
    call: &LateCall,
    virtual_type: &Type,
    span: Span,
    env: &dyn TypeEnv,
) -> Result<Option<Expr>, CompileError> {
    let schemas = env.schemas();
    let Some(schema) = schemas
        .get(&call.name)
        .or_else(|| schemas.get(&format!("{}__{}", virtual_type.type_name(), call.name)))
    else {
        return Ok(None);
    };

    if call.args.len() != schema.params.len() {
        return Err(CompileError::type_mismatch(
            format!(
                "Schema `{}` expects {} argument(s), got {}",
                schema.name,
                schema.params.len(),
                call.args.len()
            ),
            span,
        ));
    }
    for (arg, (param, expected)) in call.args.iter().zip(&schema.params) {
        let actual = type_of(arg, env)?;
        if actual != *expected {
            return Err(CompileError::type_mismatch(
                format!("Expected type of {expected} for parameter {param}, got {actual}"),
                arg.span,
            ));
        }
    }

    log::debug!("`{}` bound to user schema `{}`", call.name, schema.name);
    Ok(Some(Expr::new(
        ExprKind::UserCall {
            schema,
            args: call.args.clone(),
        },
        span,
    )))
}
