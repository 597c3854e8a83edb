//! Host-provided native methods and their dispatch table.
//!
//! Methods are registered from static declarations. Each declaration carries
//! its annotations; a `TypeHint` annotation is parsed once, at registration,
//! with the same type-set grammar the resolver relies on.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;

use super::builtins::BUILTINS;
use super::error::CompileError;
use super::parser::{parse_type_set_str, TypeSet};
use super::types::NativeClass;
use super::vm::Value;

/// Signature every native method implements.
pub type NativeFn = fn(&[Value]) -> Result<Value, NativeError>;

/// Failure reported by a native method at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeError(pub String);

impl NativeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl std::fmt::Display for NativeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for NativeError {}

/// Namespace a native method is registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Owner {
    Class(NativeClass),
    Global,
}

impl std::fmt::Display for Owner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Owner::Class(class) => f.write_str(class.name()),
            Owner::Global => f.write_str("global"),
        }
    }
}

impl Serialize for Owner {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Annotation as written in a static declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawAnnotation {
    /// `(T, ...) -> T`
    TypeHint(&'static str),
    /// The method modifies its first argument, a list or dict, in place.
    InPlace,
    /// Any other marker. Only the first annotation is inspected for dispatch.
    Other(&'static str),
}

/// Static declaration of a native method.
#[derive(Debug, Clone, Copy)]
pub struct NativeDecl {
    pub owner: Owner,
    pub name: &'static str,
    pub annotations: &'static [RawAnnotation],
    pub func: NativeFn,
    pub category: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Annotation {
    TypeHint(TypeSet),
    InPlace,
    Other(String),
}

/// A registered native method.
pub struct NativeMethod {
    pub owner: Owner,
    pub name: String,
    pub annotations: Vec<Annotation>,
    pub func: NativeFn,
    pub category: &'static str,
    pub description: &'static str,
}

impl NativeMethod {
    /// The dispatch signature. Present only when the first annotation is a
    /// type hint.
    pub fn type_hint(&self) -> Option<&TypeSet> {
        match self.annotations.first() {
            Some(Annotation::TypeHint(set)) => Some(set),
            _ => None,
        }
    }

    /// Whether the method writes into its receiver collection.
    pub fn mutates_receiver(&self) -> bool {
        self.annotations.contains(&Annotation::InPlace)
    }

    pub fn qualified_name(&self) -> String {
        format!("{}::{}", self.owner, self.name)
    }
}

impl std::fmt::Debug for NativeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeMethod")
            .field("owner", &self.owner)
            .field("name", &self.name)
            .field("annotations", &self.annotations)
            .finish_non_exhaustive()
    }
}

// Identity is the dispatch key; the function pointer is not compared.
impl PartialEq for NativeMethod {
    fn eq(&self, other: &Self) -> bool {
        self.owner == other.owner && self.name == other.name
    }
}

/// Catalog entry for listings.
#[derive(Debug, Clone, Serialize)]
pub struct NativeInfo {
    pub owner: Owner,
    pub name: String,
    pub signature: Option<String>,
    pub category: &'static str,
    pub description: &'static str,
}

/// Dispatch table keyed by `(owner, name)`.
///
/// Built before compilation starts and read-only afterwards.
pub struct NativeRegistry {
    methods: IndexMap<(Owner, String), Arc<NativeMethod>>,
    lookups: AtomicUsize,
    warn_unannotated: bool,
}

impl Default for NativeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeRegistry {
    pub fn new() -> Self {
        Self {
            methods: IndexMap::new(),
            lookups: AtomicUsize::new(0),
            warn_unannotated: true,
        }
    }

    /// Whether registering a method without a leading type hint logs a
    /// warning. On by default.
    #[must_use]
    pub fn warn_unannotated(mut self, warn: bool) -> Self {
        self.warn_unannotated = warn;
        self
    }

    /// A registry holding the builtin library.
    pub fn with_builtins() -> Result<Self, CompileError> {
        let mut registry = Self::new();
        registry.register_all(BUILTINS)?;
        Ok(registry)
    }

    pub fn register_all(&mut self, decls: &[NativeDecl]) -> Result<(), CompileError> {
        for decl in decls {
            self.register(decl)?;
        }
        Ok(())
    }

    /// Register one method. A malformed type hint fails registration.
    /// Re-registering an existing key keeps the first method.
    pub fn register(&mut self, decl: &NativeDecl) -> Result<(), CompileError> {
        let mut annotations = Vec::with_capacity(decl.annotations.len());
        for raw in decl.annotations {
            annotations.push(match raw {
                RawAnnotation::TypeHint(text) => {
                    let set = parse_type_set_str(text).map_err(|e| CompileError {
                        message: format!(
                            "Invalid type hint on {}::{}: {}",
                            decl.owner, decl.name, e.message
                        ),
                        ..e
                    })?;
                    Annotation::TypeHint(set)
                }
                RawAnnotation::InPlace => Annotation::InPlace,
                RawAnnotation::Other(marker) => Annotation::Other((*marker).to_string()),
            });
        }

        let method = NativeMethod {
            owner: decl.owner,
            name: decl.name.to_string(),
            annotations,
            func: decl.func,
            category: decl.category,
            description: decl.description,
        };
        if method.type_hint().is_none() && self.warn_unannotated {
            log::warn!(
                "native {} has no leading type hint; calls to it will fall through to user schemas",
                method.qualified_name()
            );
        }

        let key = (decl.owner, decl.name.to_string());
        if self.methods.contains_key(&key) {
            log::warn!(
                "native {} registered twice; keeping the first",
                method.qualified_name()
            );
            return Ok(());
        }
        self.methods.insert(key, Arc::new(method));
        Ok(())
    }

    /// Look up a method by owner and name. Counts every call.
    pub fn find(&self, owner: Owner, name: &str) -> Option<Arc<NativeMethod>> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        self.methods.get(&(owner, name.to_string())).cloned()
    }

    /// Number of `find` calls made so far.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub fn catalog(&self) -> Vec<NativeInfo> {
        self.methods
            .values()
            .map(|m| NativeInfo {
                owner: m.owner,
                name: m.name.clone(),
                signature: m.type_hint().map(ToString::to_string),
                category: m.category,
                description: m.description,
            })
            .collect()
    }
}
