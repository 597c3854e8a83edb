//! Static typing of expressions.
//!
//! Types are computed on demand from the AST and the locals in scope. Calls
//! are bound through the resolver the first time their type is asked for.

use super::ast::{BinOp, Expr, ExprKind, Span};
use super::error::CompileError;
use super::natives::NativeRegistry;
use super::parser::TypeSet;
use super::resolver;
use super::schemas::SchemaRegistry;
use super::types::{Coercion, Type};

/// What typing needs to know about the surrounding compilation.
pub trait TypeEnv {
    /// Declared type of a visible local, if any.
    fn local_type(&self, name: &str) -> Option<Type>;
    fn natives(&self) -> &NativeRegistry;
    fn schemas(&self) -> &SchemaRegistry;
}

/// Static type of `expr`.
pub fn type_of(expr: &Expr, env: &dyn TypeEnv) -> Result<Type, CompileError> {
    match &expr.kind {
        ExprKind::Number(_) => Ok(Type::Number),
        ExprKind::Str(_) => Ok(Type::String),
        ExprKind::Text(_) => Ok(Type::Text),
        ExprKind::List(items) => list_type(items, env),
        ExprKind::Ident(name) => env.local_type(name).ok_or_else(|| {
            CompileError::resolution(format!("Unknown variable `{name}`"), expr.span)
        }),
        ExprKind::BinOp { op, left, right } => {
            let lt = type_of(left, env)?;
            let rt = type_of(right, env)?;
            binop_type(*op, &lt, &rt, left.span, right.span)
        }
        ExprKind::Neg(inner) => {
            numeric_operand(&type_of(inner, env)?, inner.span)?;
            Ok(Type::Number)
        }
        ExprKind::Call(call) => {
            let target = resolver::resolve(call, expr.span, env)?;
            type_of(target, env)
        }
        ExprKind::NativeCall { method, .. } => method
            .type_hint()
            .map(|hint| hint.returns.clone())
            .ok_or_else(|| {
                CompileError::codegen(
                    format!("Native {} has no signature", method.qualified_name()),
                    expr.span,
                )
            }),
        ExprKind::UserCall { schema, .. } => Ok(schema.returns.clone()),
        ExprKind::Coerce { to, .. } => Ok(to.clone()),
    }
}

/// Element type of a list literal: the first element's type, shared by all.
fn list_type(items: &[Expr], env: &dyn TypeEnv) -> Result<Type, CompileError> {
    let mut element: Option<Type> = None;
    for item in items {
        let ty = type_of(item, env)?;
        if ty.is_void() {
            return Err(CompileError::type_mismatch(
                "List elements cannot be void",
                item.span,
            ));
        }
        match &element {
            None => element = Some(ty),
            Some(first) if *first == ty => {}
            Some(first) => {
                return Err(CompileError::type_mismatch(
                    format!("List elements must share one type: expected {first}, got {ty}"),
                    item.span,
                ));
            }
        }
    }
    Ok(Type::list_of(element.unwrap_or(Type::Any)))
}

/// Coercion applied to an arithmetic or comparison operand.
pub fn numeric_operand(ty: &Type, span: Span) -> Result<Coercion, CompileError> {
    match ty.coercion_to(&Type::Number) {
        Some(coercion) => Ok(coercion),
        None => Err(CompileError::type_mismatch(
            format!("Expected number, got {ty}"),
            span,
        )),
    }
}

/// `+` between two strings or two texts concatenates.
pub fn is_concat(left: &Type, right: &Type) -> bool {
    left == right && matches!(left, Type::String | Type::Text)
}

fn binop_type(
    op: BinOp,
    left: &Type,
    right: &Type,
    left_span: Span,
    right_span: Span,
) -> Result<Type, CompileError> {
    match op {
        BinOp::Add if is_concat(left, right) => Ok(left.clone()),
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => {
            numeric_operand(left, left_span)?;
            numeric_operand(right, right_span)?;
            Ok(Type::Number)
        }
        BinOp::Lt | BinOp::Gt => {
            numeric_operand(left, left_span)?;
            numeric_operand(right, right_span)?;
            Ok(Type::Boolean)
        }
        BinOp::Eq => {
            if left.is_void() || right.is_void() {
                return Err(CompileError::type_mismatch(
                    "Cannot compare a void value",
                    left_span.merge(right_span),
                ));
            }
            if left.coercion_to(right).is_some() || right.coercion_to(left).is_some() {
                Ok(Type::Boolean)
            } else {
                Err(CompileError::type_mismatch(
                    format!("Cannot compare {left} with {right}"),
                    left_span.merge(right_span),
                ))
            }
        }
    }
}

impl TypeSet {
    /// Signature of an in-place collection method called on `receiver`. The
    /// first parameter takes the receiver's exact type and `any` in the other
    /// parameters stands for the receiver's element type. A receiver of
    /// another shape keeps the declared signature.
    pub fn bind_receiver(&self, receiver: &Type) -> TypeSet {
        let element = match (self.params.first(), receiver) {
            (Some(Type::List(_)), Type::List(element)) => element,
            (Some(Type::Dict(key, _)), Type::Dict(receiver_key, value)) if key == receiver_key => {
                value
            }
            _ => return self.clone(),
        };
        let params = std::iter::once(receiver.clone())
            .chain(self.params.iter().skip(1).map(|param| match param {
                Type::Any => (**element).clone(),
                other => other.clone(),
            }))
            .collect();
        TypeSet {
            params,
            returns: self.returns.clone(),
        }
    }

    /// Check `args` against the parameter types and wrap each argument in the
    /// coercion it needs. Arity must match exactly.
    pub fn typecheck(
        &self,
        callee: &str,
        args: &[Expr],
        span: Span,
        env: &dyn TypeEnv,
    ) -> Result<Vec<Expr>, CompileError> {
        if args.len() != self.params.len() {
            return Err(CompileError::type_mismatch(
                format!(
                    "`{callee}` expects {} argument(s), got {}",
                    self.params.len(),
                    args.len()
                ),
                span,
            ));
        }
        args.iter()
            .zip(&self.params)
            .enumerate()
            .map(|(i, (arg, param))| {
                let ty = type_of(arg, env)?;
                match ty.coercion_to(param) {
                    Some(Coercion::Identity) => Ok(arg.clone()),
                    Some(coercion) => Ok(Expr::new(
                        ExprKind::Coerce {
                            inner: Box::new(arg.clone()),
                            to: param.clone(),
                            coercion,
                        },
                        arg.span,
                    )),
                    None => Err(CompileError::type_mismatch(
                        format!(
                            "Expected type of {param} for parameter {} of `{callee}`, got {ty}",
                            i + 1
                        ),
                        arg.span,
                    )),
                }
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dsl::error::ErrorKind;
    use crate::dsl::lexer::lex;
    use crate::dsl::parser::{parse, parse_type_set_str};
    use crate::dsl::ast::Stmt;
    use crate::dsl::types::ValueKind;

    struct Env {
        natives: NativeRegistry,
        schemas: SchemaRegistry,
        locals: Vec<(&'static str, Type)>,
    }

    impl TypeEnv for Env {
        fn local_type(&self, name: &str) -> Option<Type> {
            self.locals.iter().find(|(n, _)| *n == name).map(|(_, t)| t.clone())
        }
        fn natives(&self) -> &NativeRegistry {
            &self.natives
        }
        fn schemas(&self) -> &SchemaRegistry {
            &self.schemas
        }
    }

    fn env(locals: Vec<(&'static str, Type)>) -> Env {
        Env {
            natives: NativeRegistry::with_builtins().unwrap(),
            schemas: SchemaRegistry::new(),
            locals,
        }
    }

    fn expr(src: &str) -> Expr {
        let script = parse(lex("test", &format!("schema t() -> any {{ {src} }}")).unwrap()).unwrap();
        match script.schemas.into_iter().next().unwrap().body.into_iter().next() {
            Some(Stmt::Expr(e)) => e,
            other => panic!("expected expression, got {other:?}"),
        }
    }

    fn ty(src: &str, env: &Env) -> Result<Type, CompileError> {
        type_of(&expr(src), env)
    }

    #[test]
    fn literal_types() {
        let env = env(vec![]);
        assert_eq!(ty("1.5", &env).unwrap(), Type::Number);
        assert_eq!(ty("\"s\"", &env).unwrap(), Type::String);
        assert_eq!(ty("'t'", &env).unwrap(), Type::Text);
        assert_eq!(ty("[1, 2]", &env).unwrap(), Type::list_of(Type::Number));
        assert_eq!(ty("[]", &env).unwrap(), Type::list_of(Type::Any));
    }

    #[test]
    fn operator_types() {
        let env = env(vec![("flag", Type::Boolean), ("dyn", Type::Any)]);
        assert_eq!(ty("1 + 2 * 3", &env).unwrap(), Type::Number);
        assert_eq!(ty("\"a\" + \"b\"", &env).unwrap(), Type::String);
        assert_eq!(ty("'a' + 'b'", &env).unwrap(), Type::Text);
        assert_eq!(ty("1 < 2", &env).unwrap(), Type::Boolean);
        assert_eq!(ty("flag + 1", &env).unwrap(), Type::Number);
        assert_eq!(ty("dyn * 2", &env).unwrap(), Type::Number);
        assert_eq!(ty("\"a\" == dyn", &env).unwrap(), Type::Boolean);
        assert_eq!(ty("-flag", &env).unwrap(), Type::Number);
    }

    #[test]
    fn operator_mismatches() {
        let env = env(vec![]);
        let err = ty("\"a\" + 1", &env).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeMismatch);
        assert_eq!(ty("\"a\" + 'b'", &env).unwrap_err().kind, ErrorKind::TypeMismatch);
        assert_eq!(ty("1 == \"1\"", &env).unwrap_err().kind, ErrorKind::TypeMismatch);
        assert_eq!(ty("[1, \"x\"]", &env).unwrap_err().kind, ErrorKind::TypeMismatch);
    }

    #[test]
    fn unknown_variable_is_a_resolution_error() {
        let err = ty("nope + 1", &env(vec![])).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Resolution);
        assert!(err.message.contains("nope"));
    }

    #[test]
    fn typecheck_wraps_coercions() {
        let env = env(vec![("flag", Type::Boolean), ("dyn", Type::Any)]);
        let set = parse_type_set_str("(number, any, string) -> void").unwrap();
        let args = vec![expr("flag"), expr("1"), expr("dyn")];
        let checked = set.typecheck("f", &args, Span::default(), &env).unwrap();
        assert!(matches!(
            checked[0].kind,
            ExprKind::Coerce { coercion: Coercion::Widen, .. }
        ));
        assert!(matches!(
            checked[1].kind,
            ExprKind::Coerce { coercion: Coercion::Box, .. }
        ));
        assert!(matches!(
            checked[2].kind,
            ExprKind::Coerce {
                coercion: Coercion::Check(ValueKind::String),
                ..
            }
        ));
    }

    #[test]
    fn typecheck_rejects_bad_arguments() {
        let env = env(vec![]);
        let set = parse_type_set_str("(string) -> number").unwrap();
        let arg = expr("42");
        let err = set
            .typecheck("length", std::slice::from_ref(&arg), Span::new(0, 10), &env)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeMismatch);
        assert_eq!(err.span, arg.span);
        assert!(err.message.contains("Expected type of string"));

        let err = set.typecheck("length", &[], Span::new(0, 10), &env).unwrap_err();
        assert_eq!(err.span, Span::new(0, 10));
        assert!(err.message.contains("expects 1 argument(s), got 0"));
    }
}
