use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;

use log::{debug, info};

use super::cache::{CacheKey, SharedCompileCache, hash_hex};
use super::extract::{
    StageProgram, declared_uniform_names, expand_qualifier_macros, extract_stage, parse_items,
    scan_const_sentinels,
};
use super::include::resolve_includes;
use super::lexer::{Token, tokenize};
use super::params::{ParameterOverrides, format_float, inject_overrides, scan_parameters};
use super::preprocess::{MacroDef, MacroTable, PreprocessOptions, has_stage_pragmas, preprocess_stage};
use super::stubs::plan_stubs;
use super::transpile::{TranspileOptions, transpile};
use super::types::{
    CompiledParameter, CompiledProgram, ParameterBinding, ParameterDeclaration, ShaderStage,
    ShaderUnit,
};
use crate::error::ChainResult;
use crate::source_store::SourceFetcher;

/// Macros every stage sees, before compile-time parameters.
fn base_macros(stage: ShaderStage, legacy: bool) -> MacroTable {
    let mut table = MacroTable::new();
    if legacy {
        let marker = match stage {
            ShaderStage::Vertex => "VERTEX",
            ShaderStage::Fragment => "FRAGMENT",
        };
        table.define(MacroDef::object(marker, ""));
        table.define(MacroDef::object("PARAMETER_UNIFORM", ""));
    }
    table.define(MacroDef::object("__VERSION__", "300"));
    table.define(MacroDef::object("GL_ES", "1"));
    table
}

/// Identifiers named by `#if`/`#elif`/`#ifdef`/`#ifndef` anywhere in the unit.
fn conditional_names(tokens: &[Token]) -> HashSet<String> {
    tokens
        .iter()
        .filter(|t| {
            matches!(
                t.directive_name(),
                Some("if" | "elif" | "ifdef" | "ifndef")
            )
        })
        .flat_map(|t| tokenize(t.directive_body()))
        .filter(|t| t.is_ident())
        .map(|t| t.text)
        .collect()
}

/// Parameters the shader never declares as a uniform, or consults from a
/// conditional, are baked in as macros.
fn bind_parameters(
    parameters: Vec<ParameterDeclaration>,
    uniforms: &HashSet<String>,
    conditionals: &HashSet<String>,
) -> Vec<CompiledParameter> {
    parameters
        .into_iter()
        .map(|decl| {
            let binding = if uniforms.contains(&decl.name) && !conditionals.contains(&decl.name) {
                ParameterBinding::Uniform
            } else {
                ParameterBinding::CompileTime
            };
            CompiledParameter { decl, binding }
        })
        .collect()
}

fn pragma_value(programs: &[&StageProgram], name: &str) -> Option<String> {
    programs
        .iter()
        .flat_map(|p| p.pragmas.iter())
        .find(|p| p.name == name)
        .map(|p| p.args.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Compile an already merged unit with the given parameter overrides.
pub fn compile_unit(unit: &ShaderUnit, overrides: &ParameterOverrides) -> ChainResult<CompiledProgram> {
    let source = inject_overrides(&unit.source, overrides);
    let tokens = tokenize(&source);
    let parameters = scan_parameters(&tokens);
    let sentinel_values = scan_const_sentinels(&tokens);
    let legacy = !has_stage_pragmas(&tokens);
    if legacy {
        debug!("[compile] {}: no #pragma stage, compiling as a legacy unit", unit.path.display());
    }

    let mut uniforms = HashSet::new();
    for stage in ShaderStage::ALL {
        let options = PreprocessOptions {
            predefined: base_macros(stage, legacy),
            sentinel_values: sentinel_values.clone(),
        };
        let pre = preprocess_stage(&tokens, stage, &options);
        let macro_refs: Vec<&MacroDef> = pre.macros.iter().collect();
        let expanded = expand_qualifier_macros(&pre.tokens, &macro_refs);
        uniforms.extend(declared_uniform_names(&parse_items(&expanded)));
    }

    let conditionals = conditional_names(&tokens);
    let parameters = bind_parameters(parameters, &uniforms, &conditionals);
    let compile_time: Vec<MacroDef> = parameters
        .iter()
        .filter(|p| p.binding == ParameterBinding::CompileTime)
        .map(|p| MacroDef::object(p.decl.name.clone(), format_float(p.decl.default)))
        .collect();

    let [vertex, fragment] = ShaderStage::ALL.map(|stage| {
        let mut predefined = base_macros(stage, legacy);
        for m in &compile_time {
            predefined.define(m.clone());
        }
        let options = PreprocessOptions {
            predefined,
            sentinel_values: sentinel_values.clone(),
        };
        extract_stage(&preprocess_stage(&tokens, stage, &options), stage)
    });

    let stubs = plan_stubs(&[&vertex, &fragment]);
    let stub_names: Vec<String> = stubs
        .iter()
        .map(|s| s.name().to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let options = TranspileOptions { compile_time, stubs };
    let out = transpile(&vertex, &fragment, &options);

    let mut dynamic_globals: Vec<String> = Vec::new();
    for g in vertex.dynamic_globals().chain(fragment.dynamic_globals()) {
        if !dynamic_globals.contains(&g.decl.name) {
            dynamic_globals.push(g.decl.name.clone());
        }
    }

    let name = unit
        .path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| unit.path.display().to_string());
    let program = CompiledProgram {
        name,
        path: unit.path.clone(),
        vertex_source: out.vertex_source,
        fragment_source: out.fragment_source,
        uniforms: out.uniforms,
        samplers: out.samplers,
        alias: pragma_value(&[&vertex, &fragment], "name"),
        format: pragma_value(&[&vertex, &fragment], "format"),
        parameters,
        stubs: stub_names,
        dynamic_globals,
        source_hash: hash_hex(unit.source.as_bytes()),
    };
    info!(
        "[compile] {}: {} parameters ({} compile-time), {} stubs, {} dynamic globals",
        program.name,
        program.parameters.len(),
        program
            .parameters
            .iter()
            .filter(|p| p.binding == ParameterBinding::CompileTime)
            .count(),
        program.stubs.len(),
        program.dynamic_globals.len()
    );
    Ok(program)
}

/// Resolve includes for `path` and compile the merged unit.
pub fn compile_shader(
    path: &Path,
    fetcher: &dyn SourceFetcher,
    overrides: &ParameterOverrides,
) -> ChainResult<CompiledProgram> {
    let unit = resolve_includes(path, fetcher)?;
    compile_unit(&unit, overrides)
}

/// Overrides restricted to the parameters a unit declares.
fn relevant_overrides(unit: &ShaderUnit, overrides: &ParameterOverrides) -> ParameterOverrides {
    if overrides.is_empty() {
        return ParameterOverrides::new();
    }
    let declared: HashSet<String> = scan_parameters(&tokenize(&unit.source))
        .into_iter()
        .map(|p| p.name)
        .collect();
    overrides
        .iter()
        .filter(|(name, _)| declared.contains(*name))
        .map(|(name, value)| (name.clone(), *value))
        .collect()
}

/// `compile_shader` through a shared cache. The source is always re-read so an
/// edited file (or include) produces a new key.
pub fn compile_shader_cached(
    path: &Path,
    fetcher: &dyn SourceFetcher,
    overrides: &ParameterOverrides,
    cache: &SharedCompileCache,
) -> ChainResult<Arc<CompiledProgram>> {
    let unit = resolve_includes(path, fetcher)?;
    let overrides = relevant_overrides(&unit, overrides);
    let key = CacheKey::new(&unit.path, &unit.source, &overrides);

    let cached = cache
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .get(&key);
    if let Some(program) = cached {
        debug!("[compile] cache hit for {}", unit.path.display());
        return Ok(program);
    }

    let program = Arc::new(compile_unit(&unit, &overrides)?);
    cache
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .insert(key, program.clone());
    Ok(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::cache::CompileCache;
    use crate::compiler::validation::validate_program;
    use crate::source_store::MemorySource;

    const SLANG: &str = r#"#version 450
#pragma name Scanlines
#pragma format R8G8B8A8_SRGB
#pragma parameter SCANLINE_WEIGHT "Scanline Weight" 0.3 0.0 1.0 0.05
#pragma parameter MASK_TYPE "Mask Type" 1.0 0.0 2.0 1.0

layout(push_constant) uniform Push {
    vec4 SourceSize;
    vec4 OutputSize;
    uint FrameCount;
    float SCANLINE_WEIGHT;
    float MASK_TYPE;
} params;

layout(std140, set = 0, binding = 0) uniform UBO {
    mat4 MVP;
} global;

#pragma stage vertex
layout(location = 0) in vec4 Position;
layout(location = 1) in vec2 TexCoord;
layout(location = 0) out vec2 vTexCoord;

void main() {
    gl_Position = global.MVP * Position;
    vTexCoord = TexCoord;
}

#pragma stage fragment
layout(location = 0) in vec2 vTexCoord;
layout(location = 0) out vec4 FragColor;
layout(set = 0, binding = 2) uniform sampler2D Source;

vec3 mask(vec3 c) {
#if MASK_TYPE == 1
    return c * vec3(1.0, 0.7, 0.7);
#else
    return c;
#endif
}

void main() {
    vec3 c = texture(Source, vTexCoord).rgb;
    float line = 1.0 - params.SCANLINE_WEIGHT * float(params.FrameCount % 2u);
    FragColor = vec4(mask(c) * line, 1.0);
}
"#;

    fn compile(src: &str, overrides: &ParameterOverrides) -> CompiledProgram {
        compile_unit(&ShaderUnit::from_source("shaders/scanlines.slang", src), overrides).unwrap()
    }

    #[test]
    fn compiles_slang_unit_to_valid_es3() {
        let program = compile(SLANG, &ParameterOverrides::new());
        assert_eq!(program.name, "scanlines");
        assert_eq!(program.alias.as_deref(), Some("Scanlines"));
        assert_eq!(program.format.as_deref(), Some("R8G8B8A8_SRGB"));
        assert!(program.has_uniform("MVP"));
        assert!(program.has_uniform("SCANLINE_WEIGHT"));
        assert!(!program.has_uniform("MASK_TYPE"));
        assert_eq!(program.samplers, vec!["Source".to_string()]);
        assert!(program.stubs.is_empty());
        validate_program(&program.vertex_source, &program.fragment_source).unwrap();
    }

    #[test]
    fn conditional_parameters_are_compile_time() {
        let program = compile(SLANG, &ParameterOverrides::new());
        let mask = program.parameter("MASK_TYPE").unwrap();
        assert_eq!(mask.binding, ParameterBinding::CompileTime);
        let weight = program.parameter("SCANLINE_WEIGHT").unwrap();
        assert_eq!(weight.binding, ParameterBinding::Uniform);
        assert!(program.fragment_source.contains("#define MASK_TYPE 1.0"));
        assert!(program.fragment_source.contains("vec3(1.0, 0.7, 0.7)"));
    }

    #[test]
    fn overrides_select_other_branch() {
        let mut overrides = ParameterOverrides::new();
        overrides.insert("MASK_TYPE".into(), 0.0);
        let program = compile(SLANG, &overrides);
        assert!(program.fragment_source.contains("#define MASK_TYPE 0.0"));
        assert!(!program.fragment_source.contains("vec3(1.0, 0.7, 0.7)"));
        assert_eq!(program.parameter("MASK_TYPE").unwrap().decl.default, 0.0);
    }

    #[test]
    fn undefined_functions_get_stubs_and_still_validate() {
        let src = SLANG.replace("FragColor = vec4(mask(c) * line, 1.0);", "FragColor = vec4(mask(c) * line * glow(c, 2.0), 1.0);");
        let program = compile(&src, &ParameterOverrides::new());
        assert_eq!(program.stubs, vec!["glow".to_string()]);
        validate_program(&program.vertex_source, &program.fragment_source).unwrap();
    }

    #[test]
    fn cached_compiles_share_programs_until_source_changes() {
        let fetcher = MemorySource::new().with_file("shaders/scanlines.slang", SLANG);
        let cache = CompileCache::shared();
        let path = Path::new("shaders/scanlines.slang");

        let mut overrides = ParameterOverrides::new();
        overrides.insert("UNRELATED".into(), 3.0);
        let a = compile_shader_cached(path, &fetcher, &ParameterOverrides::new(), &cache).unwrap();
        let b = compile_shader_cached(path, &fetcher, &overrides, &cache).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        fetcher.insert(path, SLANG.replace("0.7, 0.7", "0.6, 0.6"));
        let c = compile_shader_cached(path, &fetcher, &ParameterOverrides::new(), &cache).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        let cache = cache.lock().unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn missing_shader_is_a_resolution_error() {
        let fetcher = MemorySource::new();
        let err = compile_shader(Path::new("nope.slang"), &fetcher, &ParameterOverrides::new())
            .unwrap_err();
        assert!(matches!(err, crate::error::ChainError::Resolution { .. }));
    }
}
