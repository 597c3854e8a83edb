#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod ast;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod error;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod lexer;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod types;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod parser;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod natives;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod builtins;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod schemas;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod typeck;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod resolver;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod codegen;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod compiler;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod vm;

use ast::Script;
use compiler::CompiledUnit;
use error::CompileError;
use natives::NativeRegistry;
use schemas::{FunctionSchema, SchemaRegistry};

/// Lex and parse one source text. Errors carry `source_id`.
pub fn parse_source(source_id: &str, source: &str) -> Result<Script, CompileError> {
    let tokens = lexer::lex(source_id, source)?;
    parser::parse(tokens).map_err(|e| e.in_source(source_id))
}

/// Make every schema header in `script` callable. Returns the number of
/// headers that replaced an earlier registration.
pub fn register_headers(script: &Script, schemas: &SchemaRegistry) -> usize {
    script
        .schemas
        .iter()
        .filter(|def| schemas.register(FunctionSchema::from_def(def)).is_some())
        .count()
}

/// Compile the bodies of an already-registered script.
pub fn compile_script(
    source_id: &str,
    script: &Script,
    natives: &NativeRegistry,
    schemas: &SchemaRegistry,
) -> Result<Vec<CompiledUnit>, CompileError> {
    script
        .schemas
        .iter()
        .map(|def| {
            compiler::compile_schema(def, natives, schemas).map_err(|e| e.in_source(source_id))
        })
        .collect()
}

/// Compile a source string into units ready for linking.
///
/// This is the primary public entry point for the DSL pipeline:
/// source → lex → parse → register headers → resolve + codegen → `CompiledUnit`s
pub fn compile_source(
    source_id: &str,
    source: &str,
    natives: &NativeRegistry,
    schemas: &SchemaRegistry,
) -> Result<Vec<CompiledUnit>, CompileError> {
    let script = parse_source(source_id, source)?;
    register_headers(&script, schemas);
    compile_script(source_id, &script, natives, schemas)
}
