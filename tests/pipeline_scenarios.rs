mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{
    copy_pass, error_pass, parameter_pass, preset_text, slang_pass, store_with, unlinkable_pass,
};
use crt_filter_chain::runtime::headless::MAX_RECORDED_DRAWS;
use crt_filter_chain::runtime::{
    BindingSource, ChainState, GpuBackend, Lineage, ParameterUpdate, PassOutcome, PassStatus,
    UniformValue,
};
use crt_filter_chain::{ChainError, ChainOptions, FilterChain, HeadlessBackend, MemorySource};

fn chain(store: MemorySource) -> FilterChain<HeadlessBackend> {
    FilterChain::new(
        HeadlessBackend::new(),
        Arc::new(store),
        ChainOptions::default().with_viewport([640, 480]),
    )
}

fn drawn_inputs(lineage: Option<&Lineage>) -> Vec<(String, u64)> {
    match lineage {
        Some(Lineage::Drawn { inputs, .. }) => inputs.clone(),
        other => panic!("expected a drawn texture, got {other:?}"),
    }
}

#[test]
fn single_pass_reads_the_external_source() {
    let store = store_with(&[
        ("shaders/copy.slang", copy_pass()),
        ("one.slangp", preset_text(&["copy"], "")),
    ]);
    let mut chain = chain(store);
    chain.load_preset("one.slangp").unwrap();
    assert_eq!(chain.state(), ChainState::Ready);

    let source = chain.backend_mut().create_source([320, 240]);
    let report = chain.render_frame(source).unwrap();
    assert_eq!(chain.state(), ChainState::Running);

    assert_eq!(report.passes.len(), 1);
    let pass = &report.passes[0];
    assert_eq!(pass.outcome, PassOutcome::Rendered);
    assert_eq!(pass.inputs.len(), 1);
    assert_eq!(pass.inputs[0].texture, source);
    assert_eq!(pass.inputs[0].source, BindingSource::External);
    assert_eq!(pass.output, None);
    assert_eq!(pass.size, [640, 480]);

    let inputs = drawn_inputs(chain.backend().screen());
    let source_stamp = chain.backend().lineage(source).unwrap().stamp();
    assert_eq!(inputs, vec![("Source".to_string(), source_stamp)]);
}

#[test]
fn aliased_output_skips_the_adjacent_pass() {
    let store = store_with(&[
        ("shaders/copy.slang", copy_pass()),
        ("shaders/foo.slang", slang_pass(&["Foo"], "texture(Foo, vTexCoord)")),
        ("three.slangp", preset_text(&["copy", "copy", "foo"], "alias1 = Foo\n")),
    ]);
    let mut chain = chain(store);
    chain.load_preset("three.slangp").unwrap();
    let source = chain.backend_mut().create_source([320, 240]);
    let report = chain.render_frame(source).unwrap();

    assert_eq!(report.passes.len(), 3);
    let first = report.pass(0).unwrap().output.unwrap();
    let second = report.pass(1).unwrap().output.unwrap();
    let last = report.pass(2).unwrap();
    assert_eq!(last.inputs[0].name, "Foo");
    assert_eq!(last.inputs[0].source, BindingSource::Alias(1));
    assert_eq!(last.inputs[0].texture, second);
    assert_ne!(last.inputs[0].texture, first);

    let screen = drawn_inputs(chain.backend().screen());
    assert_eq!(screen[0].1, chain.backend().lineage(second).unwrap().stamp());
}

#[test]
fn undefined_functions_still_link_and_render() {
    let store = store_with(&[
        (
            "shaders/glow.slang",
            slang_pass(&["Source"], "texture(Source, vTexCoord) * bloom_weight(vTexCoord, 2.0)"),
        ),
        ("glow.slangp", preset_text(&["glow"], "")),
    ]);
    let mut chain = chain(store);
    chain.load_preset("glow.slangp").unwrap();
    assert_eq!(
        chain.pass_status(0),
        Some(&PassStatus::Stubbed(vec!["bloom_weight".to_string()]))
    );
    let source = chain.backend_mut().create_source([64, 64]);
    let report = chain.render_frame(source).unwrap();
    assert_eq!(report.passes[0].outcome, PassOutcome::Rendered);
}

#[test]
fn rejected_pass_is_bypassed_and_the_chain_continues() {
    let store = store_with(&[
        ("shaders/copy.slang", copy_pass()),
        ("shaders/broken.slang", unlinkable_pass()),
        ("broken.slangp", preset_text(&["copy", "broken", "copy"], "")),
    ]);
    let mut chain = chain(store);
    chain.load_preset("broken.slangp").unwrap();
    assert!(matches!(
        chain.pass_status(1),
        Some(PassStatus::Failed(ChainError::Link { .. }))
    ));

    let source = chain.backend_mut().create_source([320, 240]);
    let report = chain.render_frame(source).unwrap();
    assert_eq!(report.passes.len(), 3);
    assert!(matches!(report.passes[1].outcome, PassOutcome::Bypassed { .. }));
    assert_eq!(report.bypassed().count(), 1);

    let gpu = chain.backend();
    let first = report.pass(0).unwrap().output.unwrap();
    let bypassed = report.pass(1).unwrap().output.unwrap();
    assert_eq!(gpu.lineage(bypassed), gpu.lineage(first));

    let screen = drawn_inputs(gpu.screen());
    assert_eq!(screen[0].1, gpu.lineage(first).unwrap().stamp());
}

#[test]
fn a_failed_final_pass_passes_the_frame_through() {
    let store = store_with(&[
        ("shaders/broken.slang", unlinkable_pass()),
        ("p.slangp", preset_text(&["broken"], "")),
    ]);
    let mut chain = chain(store);
    chain.load_preset("p.slangp").unwrap();
    let source = chain.backend_mut().create_source([320, 240]);
    chain.render_frame(source).unwrap();
    assert_eq!(chain.backend().screen(), chain.backend().lineage(source));
}

#[test]
fn missing_shader_fails_only_its_pass() {
    let store = store_with(&[
        ("shaders/copy.slang", copy_pass()),
        ("p.slangp", preset_text(&["copy", "gone"], "")),
    ]);
    let mut chain = chain(store);
    chain.load_preset("p.slangp").unwrap();
    assert_eq!(chain.pass_status(0), Some(&PassStatus::Linked));
    assert!(matches!(
        chain.pass_status(1),
        Some(PassStatus::Failed(ChainError::Resolution { .. }))
    ));
    let source = chain.backend_mut().create_source([32, 32]);
    assert!(chain.render_frame(source).is_ok());
}

#[test]
fn switching_presets_releases_the_previous_one() {
    let store = store_with(&[
        ("shaders/copy.slang", copy_pass()),
        ("three.slangp", preset_text(&["copy", "copy", "copy"], "")),
        ("one.slangp", preset_text(&["copy"], "")),
        ("bad.slangp", "shaders = two\n".to_string()),
    ]);
    let mut chain = chain(store);
    let source = chain.backend_mut().create_source([320, 240]);

    chain.load_preset("three.slangp").unwrap();
    chain.render_frame(source).unwrap();
    assert_eq!(chain.backend().live_programs(), 3);
    // two intermediate targets plus the host source
    assert_eq!(chain.backend().live_textures(), 3);

    let err = chain.load_preset("bad.slangp").unwrap_err();
    assert!(matches!(err, ChainError::Preset { .. }));
    assert_eq!(chain.pass_count(), 3);
    assert_eq!(chain.state(), ChainState::Running);

    chain.load_preset("one.slangp").unwrap();
    assert_eq!(chain.pass_count(), 1);
    assert_eq!(chain.backend().live_programs(), 1);
    assert_eq!(chain.backend().live_textures(), 1);
    assert_eq!(chain.state(), ChainState::Ready);
}

#[test]
fn dispose_is_terminal() {
    let store = store_with(&[
        ("shaders/copy.slang", copy_pass()),
        ("two.slangp", preset_text(&["copy", "copy"], "")),
    ]);
    let mut chain = chain(store);
    let source = chain.backend_mut().create_source([320, 240]);
    chain.load_preset("two.slangp").unwrap();
    chain.render_frame(source).unwrap();

    chain.dispose();
    assert_eq!(chain.state(), ChainState::Disposed);
    assert_eq!(chain.backend().live_programs(), 0);
    assert_eq!(chain.backend().live_textures(), 1);
    assert_eq!(chain.render_frame(source).unwrap_err(), ChainError::Disposed);
    assert_eq!(chain.load_preset("two.slangp").unwrap_err(), ChainError::Disposed);
    assert_eq!(chain.set_parameter("X", 1.0).unwrap_err(), ChainError::Disposed);
}

#[test]
fn no_preset_presents_the_source_unchanged() {
    let mut chain = chain(MemorySource::new());
    let source = chain.backend_mut().create_source([8, 8]);
    let report = chain.render_frame(source).unwrap();
    assert!(report.passes.is_empty());
    assert_eq!(chain.backend().screen(), chain.backend().lineage(source));
    assert_eq!(chain.state(), ChainState::Unloaded);
}

#[test]
fn runtime_and_compile_time_parameters() {
    let store = store_with(&[
        ("shaders/params.slang", parameter_pass()),
        ("p.slangp", preset_text(&["params"], "parameters = \"GAIN\"\nGAIN = 1.5\n")),
    ]);
    let mut chain = chain(store);
    chain.load_preset("p.slangp").unwrap();
    let source = chain.backend_mut().create_source([32, 32]);

    let params = chain.parameters();
    let gain = params.iter().find(|p| p.decl.name == "GAIN").unwrap();
    assert_eq!(gain.value, 1.5);
    let mode = params.iter().find(|p| p.decl.name == "MODE").unwrap();
    assert_eq!(mode.binding, crt_filter_chain::compiler::ParameterBinding::CompileTime);

    assert_eq!(chain.set_parameter("GAIN", 0.5).unwrap(), ParameterUpdate::Uniform);
    assert_eq!(chain.set_parameter("NOPE", 0.5).unwrap(), ParameterUpdate::Unknown);
    chain.render_frame(source).unwrap();
    let draw = chain.backend().draws().last().unwrap().clone();
    assert!(draw.uniforms.contains(&("GAIN".to_string(), UniformValue::Float(0.5))));
    assert!(!chain.compiled(0).unwrap().fragment_source.contains("c.bgra"));

    let created = chain.backend().programs_created();
    assert_eq!(
        chain.set_parameter("MODE", 1.0).unwrap(),
        ParameterUpdate::Recompile { passes: vec![0] }
    );
    chain.render_frame(source).unwrap();
    assert_eq!(chain.backend().programs_created(), created + 1);
    assert_eq!(chain.backend().live_programs(), 1);
    assert!(chain.compiled(0).unwrap().fragment_source.contains("c.bgra"));
}

#[test]
fn feedback_reads_last_frame() {
    let store = store_with(&[
        (
            "shaders/trail.slang",
            slang_pass(
                &["Source", "PassFeedback0"],
                "mix(texture(Source, vTexCoord), texture(PassFeedback0, vTexCoord), 0.5)",
            ),
        ),
        ("p.slangp", preset_text(&["trail"], "")),
    ]);
    let mut chain = chain(store);
    chain.load_preset("p.slangp").unwrap();
    let source = chain.backend_mut().create_source([32, 32]);

    let first = chain.render_frame(source).unwrap();
    let out0 = first.passes[0].output.expect("feedback pass renders offscreen");
    let screen0 = chain.backend().screen().cloned();
    assert_eq!(screen0.as_ref(), chain.backend().lineage(out0));

    chain.backend_mut().touch(source);
    let second = chain.render_frame(source).unwrap();
    let fb = second.passes[0]
        .inputs
        .iter()
        .find(|i| i.name == "PassFeedback0")
        .unwrap();
    assert_eq!(fb.source, BindingSource::PassFeedback(0));
    assert_eq!(fb.texture, out0);
    assert_ne!(second.passes[0].output, Some(out0));
}

#[test]
fn feedback_chain_runs_for_thousands_of_frames() {
    let store = store_with(&[
        (
            "shaders/fb.slang",
            slang_pass(
                &["Source", "PassFeedback0"],
                "mix(texture(Source, vTexCoord), texture(PassFeedback0, vTexCoord), 0.9)",
            ),
        ),
        ("shaders/copy.slang", copy_pass()),
        ("p.slangp", preset_text(&["fb", "copy"], "")),
    ]);
    let mut chain = chain(store);
    chain.load_preset("p.slangp").unwrap();
    let source = chain.backend_mut().create_source([32, 32]);

    let mut last_output = None;
    for frame in 0..3000u64 {
        let report = chain.render_frame(source).unwrap();
        assert_eq!(report.frame, frame);
        let out = report.passes[0].output.unwrap();
        let lineage = chain.backend().lineage(out).unwrap();
        let inputs = drawn_inputs(Some(lineage));
        if let Some(previous) = last_output {
            assert!(inputs.contains(&("PassFeedback0".to_string(), previous)));
        }
        last_output = Some(lineage.stamp());
        chain.backend_mut().touch(source);
    }
    assert_eq!(chain.backend().draws().len(), MAX_RECORDED_DRAWS);
    assert_eq!(
        chain.backend().draws().last().unwrap().standard.frame_count,
        2999
    );
}

#[test]
fn rejected_stage_keeps_its_position_and_is_bypassed() {
    let store = store_with(&[
        ("shaders/copy.slang", copy_pass()),
        ("shaders/mask.slang", error_pass("mask needs a lookup texture")),
        ("p.slangp", preset_text(&["copy", "mask"], "")),
    ]);
    let mut chain = chain(store);
    chain.load_preset("p.slangp").unwrap();

    let (stage, line, column) = match chain.pass_status(1) {
        Some(PassStatus::Failed(ChainError::Transpile {
            stage,
            line,
            column,
            message,
        })) => {
            assert!(message.contains("mask needs a lookup texture"));
            (*stage, *line, *column)
        }
        other => panic!("expected a transpile failure, got {other:?}"),
    };
    assert_eq!(stage, "fragment");
    assert!(column >= 1);
    let fragment = &chain.compiled(1).unwrap().fragment_source;
    let offending = fragment.lines().nth(line - 1).unwrap();
    assert!(offending.starts_with("#error"));

    let listing = chain.failure_listing(1).unwrap();
    assert!(listing.contains(&format!(">{line:4} | #error")));
    assert_eq!(chain.failure_listing(0), None);

    let source = chain.backend_mut().create_source([32, 32]);
    let report = chain.render_frame(source).unwrap();
    assert!(matches!(report.passes[1].outcome, PassOutcome::Bypassed { .. }));
    let first = report.pass(0).unwrap().output.unwrap();
    assert_eq!(chain.backend().screen(), chain.backend().lineage(first));
}

#[test]
fn original_history_holds_previous_frames() {
    let store = store_with(&[
        (
            "shaders/ghost.slang",
            slang_pass(
                &["Source", "OriginalHistory1"],
                "texture(Source, vTexCoord) + texture(OriginalHistory1, vTexCoord)",
            ),
        ),
        ("p.slangp", preset_text(&["ghost"], "")),
    ]);
    let mut chain = chain(store);
    chain.load_preset("p.slangp").unwrap();
    let source = chain.backend_mut().create_source([16, 16]);

    chain.render_frame(source).unwrap();
    let previous = chain.backend().lineage(source).cloned();
    chain.backend_mut().touch(source);
    let report = chain.render_frame(source).unwrap();
    let history = report.passes[0]
        .inputs
        .iter()
        .find(|i| i.name == "OriginalHistory1")
        .unwrap();
    assert_eq!(chain.backend().lineage(history.texture).cloned(), previous);
}

#[test]
fn scale_and_viewport_drive_target_sizes() {
    let store = store_with(&[
        ("shaders/copy.slang", copy_pass()),
        (
            "p.slangp",
            preset_text(&["copy", "copy"], "scale_type0 = source\nscale0 = 2.0\n"),
        ),
    ]);
    let mut chain = chain(store);
    chain.load_preset("p.slangp").unwrap();
    let source = chain.backend_mut().create_source([100, 50]);
    let report = chain.render_frame(source).unwrap();
    assert_eq!(report.passes[0].size, [200, 100]);
    assert_eq!(report.passes[1].size, [640, 480]);

    chain.set_viewport([320, 200]);
    let report = chain.render_frame(source).unwrap();
    assert_eq!(report.passes[1].size, [320, 200]);
    let out = report.passes[0].output.unwrap();
    assert_eq!(chain.backend().texture_size(out), Some([200, 100]));
}

#[test]
fn background_load_installs_on_poll() {
    let store = store_with(&[
        ("shaders/copy.slang", copy_pass()),
        ("a.slangp", preset_text(&["copy", "copy"], "")),
        ("b.slangp", preset_text(&["copy"], "")),
    ]);
    let mut chain = chain(store);
    chain.begin_load_preset("a.slangp").unwrap();
    chain.begin_load_preset("b.slangp").unwrap();
    assert_eq!(chain.state(), ChainState::Loading);

    let deadline = Instant::now() + Duration::from_secs(10);
    let result = loop {
        if let Some(result) = chain.poll_load() {
            break result;
        }
        assert!(Instant::now() < deadline, "loader did not finish");
        std::thread::sleep(Duration::from_millis(5));
    };
    result.unwrap();
    assert_eq!(chain.state(), ChainState::Ready);
    assert_eq!(chain.preset().unwrap().path, Path::new("b.slangp"));
    assert_eq!(chain.pass_count(), 1);
    assert!(!chain.is_loading());
}

#[test]
fn lookup_textures_bind_by_name() {
    let store = store_with(&[
        (
            "shaders/mask.slang",
            slang_pass(
                &["Source", "MaskLut"],
                "texture(Source, vTexCoord) * texture(MaskLut, vTexCoord)",
            ),
        ),
        (
            "p.slangp",
            preset_text(&["mask"], "textures = \"MaskLut\"\nMaskLut = luts/missing.png\n"),
        ),
    ]);
    let mut chain = chain(store);
    chain.load_preset("p.slangp").unwrap();
    let source = chain.backend_mut().create_source([16, 16]);
    let report = chain.render_frame(source).unwrap();
    let lut = report.passes[0]
        .inputs
        .iter()
        .find(|i| i.name == "MaskLut")
        .unwrap();
    assert_eq!(lut.source, BindingSource::Lookup(0));
    assert_eq!(chain.backend().texture_size(lut.texture), Some([1, 1]));
}
