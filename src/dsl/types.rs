//! Static types of the script language.
//!
//! A `Type` is its own runtime representation descriptor: two types are equal
//! exactly when their descriptors are structurally equal. Names are derived
//! from the descriptor and never consulted for equality.

use serde::{Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// Dispatch wildcard. Accepts any value.
    Any,
    Void,
    Number,
    Boolean,
    String,
    Text,
    List(Box<Type>),
    Dict(Box<Type>, Box<Type>),
}

/// Owner class used as the first component of a native dispatch key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NativeClass {
    Any,
    Void,
    Number,
    Boolean,
    String,
    Text,
    List,
    Dict,
}

impl NativeClass {
    pub fn name(self) -> &'static str {
        match self {
            NativeClass::Any => "any",
            NativeClass::Void => "void",
            NativeClass::Number => "number",
            NativeClass::Boolean => "boolean",
            NativeClass::String => "string",
            NativeClass::Text => "text",
            NativeClass::List => "list",
            NativeClass::Dict => "dict",
        }
    }
}

/// Runtime shape of a value, as checked by `Op::CheckType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Null,
    Number,
    String,
    Text,
    List,
    Dict,
}

impl ValueKind {
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Null => "null",
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::Text => "text",
            ValueKind::List => "list",
            ValueKind::Dict => "dict",
        }
    }
}

/// How a value of one type is adapted to a parameter of another type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    /// Same type, nothing to do.
    Identity,
    /// Widened into `any` or a collection of wider elements. No code emitted.
    Box,
    /// `boolean` into `number`; both are 0/1 numbers at runtime.
    Widen,
    /// `any` into a concrete type; asserted at runtime.
    Check(ValueKind),
}

/// Value returned by a schema whose body does not end in a value expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnConversion {
    Nothing,
    Zero,
    EmptyString,
    EmptyText,
    NewList,
    NewDict,
    Null,
}

impl Type {
    /// Build a type from its name and generic arguments, as written in source.
    pub fn from_name(name: &str, args: Vec<Type>) -> Result<Type, String> {
        let arity = args.len();
        let mut args = args.into_iter();
        let ty = match (name, arity) {
            ("any", 0) => Type::Any,
            ("void", 0) => Type::Void,
            ("number", 0) => Type::Number,
            ("boolean", 0) => Type::Boolean,
            ("string", 0) => Type::String,
            ("text", 0) => Type::Text,
            ("list", 1) => Type::List(Box::new(args.next().unwrap_or(Type::Any))),
            ("dict", 2) => {
                let key = args.next().unwrap_or(Type::Any);
                let value = args.next().unwrap_or(Type::Any);
                Type::Dict(Box::new(key), Box::new(value))
            }
            ("list", n) => return Err(format!("`list` takes 1 type argument, got {n}")),
            ("dict", n) => return Err(format!("`dict` takes 2 type arguments, got {n}")),
            ("any" | "void" | "number" | "boolean" | "string" | "text", n) => {
                return Err(format!("`{name}` takes no type arguments, got {n}"))
            }
            _ => return Err(format!("Unknown type `{name}`")),
        };
        Ok(ty)
    }

    pub fn list_of(element: Type) -> Type {
        Type::List(Box::new(element))
    }

    pub fn dict_of(key: Type, value: Type) -> Type {
        Type::Dict(Box::new(key), Box::new(value))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    pub fn native_class(&self) -> NativeClass {
        match self {
            Type::Any => NativeClass::Any,
            Type::Void => NativeClass::Void,
            Type::Number => NativeClass::Number,
            Type::Boolean => NativeClass::Boolean,
            Type::String => NativeClass::String,
            Type::Text => NativeClass::Text,
            Type::List(_) => NativeClass::List,
            Type::Dict(..) => NativeClass::Dict,
        }
    }

    /// Short name, without generic arguments (`list`).
    pub fn type_name(&self) -> &'static str {
        self.native_class().name()
    }

    /// Full name including generic arguments (`list[number]`).
    pub fn verbose_type_name(&self) -> String {
        match self {
            Type::List(element) => format!("list[{}]", element.verbose_type_name()),
            Type::Dict(key, value) => format!(
                "dict[{}, {}]",
                key.verbose_type_name(),
                value.verbose_type_name()
            ),
            other => other.type_name().to_string(),
        }
    }

    /// Identifier-safe form of the verbose name, used in dispatch keys.
    pub fn mangled_type_name(&self) -> String {
        self.verbose_type_name()
            .replace(' ', "")
            .replace('[', "$_")
            .replace(']', "_$")
            .replace(',', "_")
    }

    /// Runtime shape this type must have, or `None` when unconstrained.
    pub fn value_kind(&self) -> Option<ValueKind> {
        match self {
            Type::Any | Type::Void => None,
            Type::Number | Type::Boolean => Some(ValueKind::Number),
            Type::String => Some(ValueKind::String),
            Type::Text => Some(ValueKind::Text),
            Type::List(_) => Some(ValueKind::List),
            Type::Dict(..) => Some(ValueKind::Dict),
        }
    }

    /// How a value of `self` can be passed where `target` is expected.
    /// `None` means the types are incompatible.
    pub fn coercion_to(&self, target: &Type) -> Option<Coercion> {
        if self == target {
            return Some(Coercion::Identity);
        }
        match (self, target) {
            (Type::Void, _) | (_, Type::Void) => None,
            (_, Type::Any) => Some(Coercion::Box),
            (Type::Boolean, Type::Number) => Some(Coercion::Widen),
            (Type::Any, concrete) => concrete.value_kind().map(Coercion::Check),
            (Type::List(from), Type::List(to)) => from.static_coercion(to),
            (Type::Dict(fk, fv), Type::Dict(tk, tv)) => {
                fk.static_coercion(tk)?;
                fv.static_coercion(tv)?;
                Some(Coercion::Box)
            }
            _ => None,
        }
    }

    /// Coercion for a value that is bound to a local or returned. Lists and
    /// dicts must match exactly, since the value stays mutable through the
    /// new binding.
    pub fn storage_coercion_to(&self, target: &Type) -> Option<Coercion> {
        match (self, target) {
            (Type::List(_) | Type::Dict(..), Type::List(_) | Type::Dict(..)) if self != target => {
                None
            }
            _ => self.coercion_to(target),
        }
    }

    /// Element coercion inside collections: allowed only when no runtime
    /// check is needed.
    fn static_coercion(&self, target: &Type) -> Option<Coercion> {
        match self.coercion_to(target)? {
            Coercion::Check(_) => None,
            Coercion::Identity => Some(Coercion::Identity),
            Coercion::Box | Coercion::Widen => Some(Coercion::Box),
        }
    }

    pub fn return_conversion(&self) -> ReturnConversion {
        match self {
            Type::Void => ReturnConversion::Nothing,
            Type::Number | Type::Boolean => ReturnConversion::Zero,
            Type::String => ReturnConversion::EmptyString,
            Type::Text => ReturnConversion::EmptyText,
            Type::List(_) => ReturnConversion::NewList,
            Type::Dict(..) => ReturnConversion::NewDict,
            Type::Any => ReturnConversion::Null,
        }
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.verbose_type_name())
    }
}

impl Serialize for Type {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.verbose_type_name())
    }
}
