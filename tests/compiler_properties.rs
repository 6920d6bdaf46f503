mod common;

use std::path::Path;

use common::{slang_pass, store_with};
use crt_filter_chain::compiler::{
    ParameterOverrides, compile_shader, inject_overrides, resolve_includes, validate_program,
};
use proptest::prelude::*;

#[test]
fn include_graph_resolves_each_file_once() {
    let store = store_with(&[
        (
            "shaders/main.slang",
            "#include \"lib/common.inc\"\n#include \"./lib/../lib/common.inc\"\n#include \"lib/color.inc\"\nvoid main() {}\n"
                .to_string(),
        ),
        ("shaders/lib/common.inc", "float common_value;\n".to_string()),
        (
            "shaders/lib/color.inc",
            "#include \"common.inc\"\n#include \"../lib/common.inc\"\nfloat color_value;\n".to_string(),
        ),
    ]);
    let unit = resolve_includes(Path::new("shaders/main.slang"), &store).unwrap();
    assert_eq!(unit.source.matches("float common_value;").count(), 1);
    assert_eq!(unit.source.matches("float color_value;").count(), 1);
    assert_eq!(unit.includes.len(), 2);

    let again = resolve_includes(Path::new("shaders/./main.slang"), &store).unwrap();
    assert_eq!(again.source, unit.source);
}

#[test]
fn dynamic_globals_are_bare_and_initialized_once_before_use() {
    let shader = slang_pass(&["Source"], "texture(Source, vTexCoord) * accumulate()").replace(
        "#pragma stage fragment\n",
        "#pragma stage fragment\nfloat energy = 0.25;\nconst float falloff = 0.5;\nfloat accumulate() { energy += falloff; return energy; }\n",
    );
    let store = store_with(&[("shaders/energy.slang", shader)]);
    let program = compile_shader(
        Path::new("shaders/energy.slang"),
        &store,
        &ParameterOverrides::new(),
    )
    .unwrap();
    let frag = &program.fragment_source;

    assert!(program.dynamic_globals.contains(&"energy".to_string()));
    assert!(frag.contains("\nfloat energy;\n"));
    assert!(!frag.contains("float energy = "));
    assert!(frag.contains("const float falloff = 0.5;"));
    assert_eq!(frag.matches("energy = 0.25;").count(), 1);

    let main_at = frag.find("void main()").unwrap();
    let init = frag.find("energy = 0.25;").unwrap();
    let first_call = main_at + frag[main_at..].find("accumulate()").unwrap();
    assert!(main_at < init && init < first_call);
    validate_program(&program.vertex_source, &program.fragment_source).unwrap();
}

#[test]
fn repeated_macros_keep_the_first_definition() {
    let shader = slang_pass(&["Source"], "texture(Source, vTexCoord) * float(BLEND_MODE)").replace(
        "#pragma stage vertex\n",
        "#include \"blend_a.inc\"\n#include \"blend_b.inc\"\n#pragma stage vertex\n",
    );
    let store = store_with(&[
        ("shaders/blend.slang", shader),
        ("shaders/blend_a.inc", "#define BLEND_MODE 1\n".to_string()),
        ("shaders/blend_b.inc", "#define BLEND_MODE 2\n".to_string()),
    ]);
    let program = compile_shader(
        Path::new("shaders/blend.slang"),
        &store,
        &ParameterOverrides::new(),
    )
    .unwrap();
    for source in [&program.vertex_source, &program.fragment_source] {
        assert_eq!(source.matches("#define BLEND_MODE").count(), 1);
        assert!(source.contains("#define BLEND_MODE 1\n"));
    }
    validate_program(&program.vertex_source, &program.fragment_source).unwrap();
}

#[test]
fn injection_touches_only_the_default_field() {
    let src = "#pragma parameter GLOW \"Glow amount\" 0.3 0.0 1.0 0.05\nfloat x = GLOW;\n";
    let mut overrides = ParameterOverrides::new();
    overrides.insert("GLOW".into(), 0.8);
    let out = inject_overrides(src, &overrides);
    assert!(out.starts_with("#pragma parameter GLOW \"Glow amount\" 0.8 0.0 1.0 0.05\n"));
    assert!(out.ends_with("float x = GLOW;\n"));
}

fn shader_with(params: &[(String, f32)]) -> String {
    let mut out = String::from("#version 450\n");
    for (name, default) in params {
        out.push_str(&format!(
            "#pragma parameter {name} \"{name} label\" {default:?} -10.0 10.0 0.5\n"
        ));
    }
    out.push_str("void main() {}\n");
    out
}

proptest! {
    #[test]
    fn injecting_twice_equals_injecting_once(
        defaults in proptest::collection::btree_map("[A-Z][A-Z_]{0,6}", -10.0f32..10.0, 1..5),
        values in proptest::collection::vec(-10.0f32..10.0, 5),
    ) {
        let params: Vec<(String, f32)> = defaults.into_iter().collect();
        let source = shader_with(&params);
        let overrides: ParameterOverrides = params
            .iter()
            .zip(values.iter())
            .map(|((name, _), v)| (name.clone(), *v))
            .collect();
        let once = inject_overrides(&source, &overrides);
        let twice = inject_overrides(&once, &overrides);
        prop_assert_eq!(&once, &twice);
        prop_assert_eq!(once.lines().count(), source.lines().count());
    }
}
