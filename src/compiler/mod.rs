//! Shader compiler: slang-style Vulkan GLSL in, GLSL ES 3.00 out.
//!
//! Submodules, leaf to root:
//! - `lexer`: tokenizer shared by every stage
//! - `include`: `#include` expansion into one merged unit
//! - `params`: `#pragma parameter` parsing and default injection
//! - `preprocess`: stage split, conditionals, first-wins macro table
//! - `extract`: item parser, reachability and global classification
//! - `stubs`: placeholder definitions for undefined functions
//! - `transpile`: GLSL ES 3.00 emission
//! - `validation`: target-dialect acceptance checks
//! - `cache`: compile cache keyed by path, source hash and overrides
//! - `compile`: the pipeline tying these together
//!
//! The main entry points are `compile_shader` and `compile_shader_cached`.

pub mod builtins;
pub mod cache;
pub mod compile;
pub mod extract;
pub mod include;
pub mod lexer;
pub mod params;
pub mod preprocess;
pub mod stubs;
pub mod transpile;
pub mod types;
pub mod validation;

pub use cache::{CacheKey, CompileCache, SharedCompileCache, hash_bytes};
pub use compile::{compile_shader, compile_shader_cached, compile_unit};
pub use include::resolve_includes;
pub use params::{ParameterOverrides, inject_overrides};
pub use types::{
    CompiledParameter, CompiledProgram, GlobalDeclaration, GlobalKind, ParameterBinding,
    ParameterDeclaration, ShaderStage, ShaderUnit,
};
pub use validation::{ProgramInterface, validate_program};
