//! Schema scripting language: a typed DSL compiled to stack-machine bytecode.
//!
//! Scripts declare `schema` functions. Calls inside schema bodies are bound
//! late, first against host-provided native methods keyed by the static type
//! of their first argument, then against user schemas by name.

pub mod dsl;
pub mod error;
pub mod loader;
pub mod paths;
pub mod settings;
