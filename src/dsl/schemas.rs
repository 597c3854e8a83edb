//! Registry of user-defined schema signatures.
//!
//! Headers are registered before any schema body is compiled, so a body may
//! call any schema declared in the same load, including itself.

use std::sync::LazyLock;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::Serialize;

use super::ast::SchemaDef;
use super::types::Type;

/// Signature of a user-defined schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionSchema {
    pub name: String,
    pub params: Vec<(String, Type)>,
    pub returns: Type,
}

impl FunctionSchema {
    pub fn from_def(def: &SchemaDef) -> Self {
        Self {
            name: normalize_name(&def.name),
            params: def
                .params
                .iter()
                .map(|p| (p.name.clone(), p.ty.clone()))
                .collect(),
            returns: def.returns.clone(),
        }
    }

    pub fn param_types(&self) -> impl Iterator<Item = &Type> {
        self.params.iter().map(|(_, ty)| ty)
    }
}

/// Replace the separators allowed in script names (`/ : . -`) with `_`.
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | ':' | '.' | '-' => '_',
            other => other,
        })
        .collect()
}

/// Name → signature, keyed by normalized name.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: RwLock<IndexMap<String, FunctionSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a signature, replacing any previous one with the same name.
    /// Returns the replaced signature.
    pub fn register(&self, schema: FunctionSchema) -> Option<FunctionSchema> {
        let key = normalize_name(&schema.name);
        let previous = self.schemas.write().insert(key, schema);
        if let Some(prev) = &previous {
            log::debug!("schema `{}` re-registered", prev.name);
        }
        previous
    }

    pub fn get(&self, name: &str) -> Option<FunctionSchema> {
        self.schemas.read().get(&normalize_name(name)).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schemas.read().contains_key(&normalize_name(name))
    }

    pub fn names(&self) -> Vec<String> {
        self.schemas.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.schemas.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.read().is_empty()
    }

    pub fn clear(&self) {
        self.schemas.write().clear();
    }
}

static GLOBAL_SCHEMAS: LazyLock<SchemaRegistry> = LazyLock::new(SchemaRegistry::new);

/// Process-wide schema registry.
pub fn global() -> &'static SchemaRegistry {
    &GLOBAL_SCHEMAS
}
