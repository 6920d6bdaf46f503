//! The pipeline executor.
//!
//! `FilterChain` owns everything a loaded preset needs on the GPU side: linked
//! programs, render targets, lookup textures, the alias table and the history
//! ring. The host calls `render_frame` once per frame on the thread that owns
//! the backend.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use log::{debug, error, info, warn};
use serde::Serialize;

use super::backend::{BoundTexture, DrawCall, DrawTarget, GpuBackend, ProgramId, TextureId};
use super::bindings::{AliasTable, BindingSource, FrameTextures, resolve_sampler};
use super::loader::{LoadJob, PreparedPass, PreparedPreset, compile_pass, prepare_preset};
use super::lut::upload_lut;
use super::targets::{HistoryRing, PassTargets, output_size};
use super::uniforms::{StandardUniforms, bind_uniforms, pass_frame_count};
use crate::compiler::validation::{ProgramInterface, format_listing};
use crate::compiler::{
    CompileCache, CompiledProgram, ParameterBinding, ParameterDeclaration, ParameterOverrides,
    SharedCompileCache,
};
use crate::error::{ChainError, ChainResult};
use crate::preset::{FilterMode, FramebufferFormat, PassConfig, Preset, WrapMode};
use crate::source_store::SourceFetcher;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ChainState {
    Unloaded,
    Loading,
    Ready,
    Running,
    Disposed,
}

#[derive(Clone, Debug)]
pub struct ChainOptions {
    /// Size of the visible framebuffer the last pass draws into.
    pub viewport: [u32; 2],
    pub frame_direction: i32,
    pub use_cache: bool,
    /// When set, emitted sources are written here as each preset is installed.
    pub dump_dir: Option<PathBuf>,
}

impl Default for ChainOptions {
    fn default() -> Self {
        Self {
            viewport: [640, 480],
            frame_direction: 1,
            use_cache: true,
            dump_dir: None,
        }
    }
}

impl ChainOptions {
    pub fn with_viewport(mut self, viewport: [u32; 2]) -> Self {
        self.viewport = viewport;
        self
    }

    pub fn with_frame_direction(mut self, direction: i32) -> Self {
        self.frame_direction = direction;
        self
    }

    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.use_cache = enabled;
        self
    }

    pub fn with_dump_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dump_dir = Some(dir.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PassStatus {
    Linked,
    /// Linked, but some functions are placeholders.
    Stubbed(Vec<String>),
    Failed(ChainError),
}

impl PassStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, PassStatus::Failed(_))
    }
}

/// Outcome of `set_parameter`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParameterUpdate {
    /// Takes effect on the next frame as a uniform.
    Uniform,
    /// The listed passes are rebuilt before the next frame.
    Recompile { passes: Vec<usize> },
    /// No pass of the current preset declares this parameter.
    Unknown,
}

/// A parameter as exposed to the host.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChainParameter {
    pub decl: ParameterDeclaration,
    pub value: f32,
    pub binding: ParameterBinding,
    pub passes: Vec<usize>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PassOutcome {
    Rendered,
    Bypassed { reason: String },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResolvedInput {
    pub name: String,
    pub texture: TextureId,
    pub source: BindingSource,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PassReport {
    pub index: usize,
    pub shader: String,
    pub outcome: PassOutcome,
    pub inputs: Vec<ResolvedInput>,
    /// `None` when the pass drew straight to the screen.
    pub output: Option<TextureId>,
    pub size: [u32; 2],
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FrameReport {
    pub frame: u64,
    pub passes: Vec<PassReport>,
}

impl FrameReport {
    pub fn pass(&self, index: usize) -> Option<&PassReport> {
        self.passes.get(index)
    }

    pub fn bypassed(&self) -> impl Iterator<Item = &PassReport> {
        self.passes
            .iter()
            .filter(|p| matches!(p.outcome, PassOutcome::Bypassed { .. }))
    }
}

struct PassRuntime {
    config: PassConfig,
    name: String,
    compiled: Option<Arc<CompiledProgram>>,
    program: Option<(ProgramId, ProgramInterface)>,
    status: PassStatus,
    bindings: Vec<(String, BindingSource)>,
    targets: PassTargets,
    to_screen: bool,
    needs_feedback: bool,
    needs_recompile: bool,
}

impl PassRuntime {
    fn format(&self) -> FramebufferFormat {
        self.config
            .framebuffer_format
            .or_else(|| {
                self.compiled
                    .as_ref()
                    .and_then(|c| c.format.as_deref())
                    .and_then(FramebufferFormat::from_pragma)
            })
            .unwrap_or_default()
    }

    fn release(&mut self, gpu: &mut dyn GpuBackend) {
        if let Some((id, _)) = self.program.take() {
            gpu.delete_program(id);
        }
        self.targets.release(gpu);
    }

    /// Link `compiled` and record the outcome in `status`.
    fn link(&mut self, gpu: &mut dyn GpuBackend, compiled: Result<Arc<CompiledProgram>, ChainError>) {
        if let Some((id, _)) = self.program.take() {
            gpu.delete_program(id);
        }
        self.compiled = None;
        let compiled = match compiled {
            Ok(c) => c,
            Err(e) => {
                self.status = PassStatus::Failed(e);
                return;
            }
        };
        self.name = compiled.name.clone();
        match gpu.create_program(&compiled.vertex_source, &compiled.fragment_source) {
            Ok(program) => {
                self.status = if compiled.stubs.is_empty() {
                    PassStatus::Linked
                } else {
                    PassStatus::Stubbed(compiled.stubs.clone())
                };
                self.program = Some(program);
            }
            Err(e) => {
                warn!("[chain] pass {} ({}) rejected: {e}", self.config.index, self.name);
                self.status = PassStatus::Failed(e);
            }
        }
        self.compiled = Some(compiled);
    }

    /// The input a bypass forwards: whatever `Source` resolves to.
    fn primary_input(&self) -> BindingSource {
        if self.config.index == 0 {
            BindingSource::External
        } else {
            BindingSource::Previous
        }
    }
}

struct Installed {
    preset: Preset,
    passes: Vec<PassRuntime>,
    aliases: AliasTable,
    luts: Vec<Option<TextureId>>,
    lut_sampling: Vec<(FilterMode, WrapMode)>,
    history: HistoryRing,
    runtime: ParameterOverrides,
    frame: u64,
}

impl Installed {
    fn release(&mut self, gpu: &mut dyn GpuBackend) {
        for pass in &mut self.passes {
            pass.release(gpu);
        }
        for texture in self.luts.drain(..).flatten() {
            gpu.delete_texture(texture);
        }
        self.history.release(gpu);
    }

    /// Resolve sampler bindings and derive which passes need feedback twins,
    /// mipmapped outputs, and how deep the history ring is.
    fn resolve_bindings(&mut self, gpu: &mut dyn GpuBackend) {
        let count = self.passes.len();
        let lut_names: Vec<String> = self.preset.textures.iter().map(|t| t.name.clone()).collect();
        let mut feedback = BTreeSet::new();
        let mut history = 0;
        for i in 0..count {
            let pass = &self.passes[i];
            let bindings: Vec<(String, BindingSource)> = match (&pass.compiled, &pass.program) {
                (Some(compiled), Some(_)) => compiled
                    .samplers
                    .iter()
                    .map(|s| (s.clone(), resolve_sampler(s, i, count, &self.aliases, &lut_names)))
                    .collect(),
                _ => vec![("Source".to_string(), pass.primary_input())],
            };
            for (_, b) in &bindings {
                feedback.extend(b.feedback_pass());
                history = history.max(b.history_depth());
            }
            self.passes[i].bindings = bindings;
        }

        let mut mipmapped = BTreeSet::new();
        for (i, pass) in self.passes.iter().enumerate() {
            if !pass.config.mipmap_input {
                continue;
            }
            for (_, b) in &pass.bindings {
                match b {
                    BindingSource::Previous | BindingSource::Fallback if i > 0 => {
                        mipmapped.insert(i - 1);
                    }
                    BindingSource::Alias(j) | BindingSource::PassOutput(j) => {
                        mipmapped.insert(*j);
                    }
                    _ => {}
                }
            }
        }

        for (i, pass) in self.passes.iter_mut().enumerate() {
            pass.needs_feedback = feedback.contains(&i);
            pass.to_screen = i + 1 == count && !pass.needs_feedback;
            pass.targets.set_mipmap(mipmapped.contains(&i));
        }
        if history != self.history.depth() {
            self.history.release(gpu);
            self.history = HistoryRing::new(history);
        }
    }

    /// Allocate or resize targets for a source of `source_size`. Returns the
    /// output size of every pass.
    fn ensure_targets(
        &mut self,
        gpu: &mut dyn GpuBackend,
        source_size: [u32; 2],
        viewport: [u32; 2],
    ) -> ChainResult<Vec<[u32; 2]>> {
        let count = self.passes.len();
        let mut sizes = Vec::with_capacity(count);
        let mut input = source_size;
        for (i, pass) in self.passes.iter_mut().enumerate() {
            let size = output_size(pass.config.scale, input, viewport, i + 1 == count);
            if pass.to_screen {
                pass.targets.release(gpu);
            } else {
                let label = format!("pass{i}.{}", pass.name);
                pass.targets
                    .ensure(gpu, &label, size, pass.format(), pass.needs_feedback)?;
            }
            sizes.push(size);
            input = size;
        }
        self.history.ensure(gpu, source_size)?;
        Ok(sizes)
    }
}

pub struct FilterChain<B: GpuBackend> {
    backend: B,
    fetcher: Arc<dyn SourceFetcher>,
    options: ChainOptions,
    cache: Option<SharedCompileCache>,
    state: ChainState,
    installed: Option<Installed>,
    pending: Option<LoadJob>,
}

impl<B: GpuBackend> FilterChain<B> {
    pub fn new(backend: B, fetcher: Arc<dyn SourceFetcher>, options: ChainOptions) -> Self {
        let cache = options.use_cache.then(CompileCache::shared);
        Self {
            backend,
            fetcher,
            options,
            cache,
            state: ChainState::Unloaded,
            installed: None,
            pending: None,
        }
    }

    pub fn state(&self) -> ChainState {
        self.state
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn options(&self) -> &ChainOptions {
        &self.options
    }

    pub fn cache(&self) -> Option<&SharedCompileCache> {
        self.cache.as_ref()
    }

    pub fn preset(&self) -> Option<&Preset> {
        self.installed.as_ref().map(|i| &i.preset)
    }

    pub fn pass_count(&self) -> usize {
        self.installed.as_ref().map_or(0, |i| i.passes.len())
    }

    pub fn pass_status(&self, index: usize) -> Option<&PassStatus> {
        self.installed
            .as_ref()
            .and_then(|i| i.passes.get(index))
            .map(|p| &p.status)
    }

    pub fn compiled(&self, index: usize) -> Option<&Arc<CompiledProgram>> {
        self.installed
            .as_ref()
            .and_then(|i| i.passes.get(index))
            .and_then(|p| p.compiled.as_ref())
    }

    /// Listing of the stage pass `index` was rejected in, the reported line
    /// marked. `None` unless the pass failed with a source position.
    pub fn failure_listing(&self, index: usize) -> Option<String> {
        let pass = self.installed.as_ref()?.passes.get(index)?;
        let PassStatus::Failed(ChainError::Transpile { stage, line, .. }) = &pass.status else {
            return None;
        };
        let compiled = pass.compiled.as_ref()?;
        let source = if *stage == "vertex" {
            &compiled.vertex_source
        } else {
            &compiled.fragment_source
        };
        Some(format_listing(source, Some(*line)))
    }

    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    fn check_alive(&self) -> ChainResult<()> {
        if self.state == ChainState::Disposed {
            return Err(ChainError::Disposed);
        }
        Ok(())
    }

    fn settled_state(&self) -> ChainState {
        match &self.installed {
            Some(i) if i.frame > 0 => ChainState::Running,
            Some(_) => ChainState::Ready,
            None => ChainState::Unloaded,
        }
    }

    /// Load a preset and install it before returning.
    ///
    /// On a preset-level error the previously installed preset stays active.
    pub fn load_preset(&mut self, path: impl AsRef<Path>) -> ChainResult<()> {
        self.check_alive()?;
        if let Some(job) = self.pending.take() {
            info!("[chain] abandoning load of {}", job.path().display());
            job.cancel();
        }
        let path = path.as_ref();
        self.state = ChainState::Loading;
        let cancel = AtomicBool::new(false);
        let prepared = prepare_preset(
            path,
            self.fetcher.as_ref(),
            self.cache.as_ref(),
            &ParameterOverrides::new(),
            &cancel,
        );
        match prepared {
            Ok(prepared) => {
                self.install(prepared);
                Ok(())
            }
            Err(e) => {
                error!("[chain] failed to load {}: {e}", path.display());
                self.state = self.settled_state();
                Err(e)
            }
        }
    }

    /// Start loading a preset on a worker thread. Any load already in flight is
    /// cancelled. The current preset keeps rendering until `poll_load` installs
    /// the new one.
    pub fn begin_load_preset(&mut self, path: impl Into<PathBuf>) -> ChainResult<()> {
        self.check_alive()?;
        if let Some(job) = self.pending.take() {
            info!("[chain] abandoning load of {}", job.path().display());
            job.cancel();
        }
        let job = LoadJob::spawn(
            path.into(),
            self.fetcher.clone(),
            self.cache.clone(),
            ParameterOverrides::new(),
        );
        self.pending = Some(job);
        self.state = ChainState::Loading;
        Ok(())
    }

    /// Install a finished background load. `None` while nothing finished yet.
    pub fn poll_load(&mut self) -> Option<ChainResult<()>> {
        let result = self.pending.as_ref()?.poll()?;
        let job = self.pending.take()?;
        match result {
            Ok(prepared) => {
                self.install(prepared);
                Some(Ok(()))
            }
            Err(e) => {
                error!("[chain] failed to load {}: {e}", job.path().display());
                self.state = self.settled_state();
                Some(Err(e))
            }
        }
    }

    /// Cancel a background load, if any.
    pub fn cancel_load(&mut self) {
        if let Some(job) = self.pending.take() {
            job.cancel();
            self.state = self.settled_state();
        }
    }

    fn install(&mut self, prepared: PreparedPreset) {
        if let Some(mut old) = self.installed.take() {
            info!("[chain] releasing {}", old.preset.path.display());
            old.release(&mut self.backend);
        }

        let PreparedPreset {
            preset,
            passes,
            luts,
        } = prepared;

        let mut runtime_passes = Vec::with_capacity(passes.len());
        for PreparedPass { config, program } in passes {
            let mut pass = PassRuntime {
                name: config
                    .shader_path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                config,
                compiled: None,
                program: None,
                status: PassStatus::Linked,
                bindings: Vec::new(),
                targets: PassTargets::default(),
                to_screen: false,
                needs_feedback: false,
                needs_recompile: false,
            };
            pass.link(&mut self.backend, program);
            if let PassStatus::Failed(e) = &pass.status {
                warn!("[chain] pass {} ({}) will be bypassed: {e}", pass.config.index, pass.name);
            }
            runtime_passes.push(pass);
        }

        let mut aliases = AliasTable::new();
        for pass in &runtime_passes {
            let alias = pass
                .config
                .alias
                .clone()
                .or_else(|| pass.compiled.as_ref().and_then(|c| c.alias.clone()));
            if let Some(alias) = alias {
                aliases.register(&alias, pass.config.index);
            }
        }

        let mut lut_textures = Vec::with_capacity(luts.len());
        let mut lut_sampling = Vec::with_capacity(luts.len());
        for (image, config) in luts.iter().zip(&preset.textures) {
            match upload_lut(&mut self.backend, image, config.mipmap) {
                Ok(t) => lut_textures.push(Some(t)),
                Err(e) => {
                    warn!("[lut] {}: upload failed: {e}", config.name);
                    lut_textures.push(None);
                }
            }
            lut_sampling.push((config.filter, config.wrap));
        }

        let mut installed = Installed {
            preset,
            passes: runtime_passes,
            aliases,
            luts: lut_textures,
            lut_sampling,
            history: HistoryRing::default(),
            runtime: ParameterOverrides::new(),
            frame: 0,
        };
        installed.resolve_bindings(&mut self.backend);

        // The host source size is unknown until the first frame; size for the viewport.
        let viewport = self.options.viewport;
        if let Err(e) = installed.ensure_targets(&mut self.backend, viewport, viewport) {
            warn!("[chain] initial target allocation failed: {e}");
        }
        if let Some(dir) = &self.options.dump_dir {
            dump_sources(dir, &installed.passes);
        }

        let failed = installed.passes.iter().filter(|p| p.status.is_failed()).count();
        info!(
            "[chain] installed {}: {} passes ({} bypassed), {} aliases",
            installed.preset.path.display(),
            installed.passes.len(),
            failed,
            installed.aliases.len()
        );
        self.installed = Some(installed);
        self.state = ChainState::Ready;
        if self.pending.is_some() {
            self.state = ChainState::Loading;
        }
    }

    /// Current parameter set, first declaration wins when several passes share a name.
    pub fn parameters(&self) -> Vec<ChainParameter> {
        let Some(installed) = &self.installed else {
            return Vec::new();
        };
        let mut out: Vec<ChainParameter> = Vec::new();
        for pass in &installed.passes {
            let Some(compiled) = &pass.compiled else {
                continue;
            };
            for p in &compiled.parameters {
                if let Some(existing) = out.iter_mut().find(|e| e.decl.name == p.decl.name) {
                    existing.passes.push(pass.config.index);
                    if p.binding == ParameterBinding::CompileTime {
                        existing.binding = ParameterBinding::CompileTime;
                    }
                    continue;
                }
                out.push(ChainParameter {
                    decl: p.decl.clone(),
                    value: installed
                        .runtime
                        .get(&p.decl.name)
                        .copied()
                        .unwrap_or(p.decl.default),
                    binding: p.binding,
                    passes: vec![pass.config.index],
                });
            }
        }
        out
    }

    /// Change a parameter. Uniform-bound parameters take effect on the next frame;
    /// compile-time ones rebuild the passes that use them before the next frame.
    pub fn set_parameter(&mut self, name: &str, value: f32) -> ChainResult<ParameterUpdate> {
        self.check_alive()?;
        let Some(installed) = &mut self.installed else {
            warn!("[chain] set_parameter({name}) with no preset loaded");
            return Ok(ParameterUpdate::Unknown);
        };
        let mut declared = false;
        let mut recompile = Vec::new();
        for pass in &mut installed.passes {
            let Some(p) = pass.compiled.as_ref().and_then(|c| c.parameter(name)) else {
                continue;
            };
            declared = true;
            if p.decl.min < p.decl.max && !(p.decl.min..=p.decl.max).contains(&value) {
                warn!(
                    "[chain] {name} = {value} is outside [{}, {}]",
                    p.decl.min, p.decl.max
                );
            }
            if p.binding == ParameterBinding::CompileTime {
                pass.needs_recompile = true;
                recompile.push(pass.config.index);
            }
        }
        if !declared {
            warn!("[chain] no pass declares parameter {name}");
            return Ok(ParameterUpdate::Unknown);
        }
        installed.runtime.insert(name.to_string(), value);
        if recompile.is_empty() {
            Ok(ParameterUpdate::Uniform)
        } else {
            debug!("[chain] {name} is compile-time; rebuilding passes {recompile:?}");
            Ok(ParameterUpdate::Recompile { passes: recompile })
        }
    }

    /// Resize the final output. Targets follow on the next frame.
    pub fn set_viewport(&mut self, viewport: [u32; 2]) {
        self.options.viewport = [viewport[0].max(1), viewport[1].max(1)];
    }

    fn apply_recompiles(&mut self) {
        let Some(installed) = &mut self.installed else {
            return;
        };
        if !installed.passes.iter().any(|p| p.needs_recompile) {
            return;
        }
        for i in 0..installed.passes.len() {
            if !installed.passes[i].needs_recompile {
                continue;
            }
            let compiled = compile_pass(
                &installed.preset,
                i,
                self.fetcher.as_ref(),
                self.cache.as_ref(),
                &installed.runtime,
            );
            let pass = &mut installed.passes[i];
            pass.needs_recompile = false;
            pass.link(&mut self.backend, compiled);
            match &pass.status {
                PassStatus::Failed(e) => warn!("[chain] rebuild of pass {i} failed: {e}"),
                _ => info!("[chain] rebuilt pass {i} ({})", pass.name),
            }
        }
        installed.resolve_bindings(&mut self.backend);
    }

    /// Run every pass against `source` and present the result.
    pub fn render_frame(&mut self, source: TextureId) -> ChainResult<FrameReport> {
        self.check_alive()?;
        let source_size = self
            .backend
            .texture_size(source)
            .ok_or_else(|| ChainError::Backend(format!("unknown source texture {}", source.0)))?;

        self.apply_recompiles();

        let viewport = self.options.viewport;
        let frame_direction = self.options.frame_direction;
        let Some(installed) = &mut self.installed else {
            self.backend.copy_texture(source, DrawTarget::Screen)?;
            return Ok(FrameReport {
                frame: 0,
                passes: Vec::new(),
            });
        };
        let gpu = &mut self.backend;

        for pass in &mut installed.passes {
            pass.targets.swap_feedback();
        }
        let sizes = installed.ensure_targets(gpu, source_size, viewport)?;

        let outputs: Vec<Option<TextureId>> = installed
            .passes
            .iter()
            .map(|p| p.targets.output_texture())
            .collect();
        let feedback: Vec<Option<TextureId>> = installed
            .passes
            .iter()
            .map(|p| p.targets.feedback_texture())
            .collect();
        let history = &installed.history;
        let history_lookup = |n: usize| history.get(n);
        let frame_textures = FrameTextures {
            external: source,
            outputs: &outputs,
            feedback: &feedback,
            history: &history_lookup,
            luts: &installed.luts,
        };

        let frame = installed.frame;
        let mut reports = Vec::with_capacity(installed.passes.len());
        for (i, pass) in installed.passes.iter().enumerate() {
            let size = sizes[i];
            let target = match (pass.to_screen, outputs[i]) {
                (false, Some(t)) => DrawTarget::Texture(t),
                _ => DrawTarget::Screen,
            };
            let inputs: Vec<ResolvedInput> = pass
                .bindings
                .iter()
                .map(|(name, b)| ResolvedInput {
                    name: name.clone(),
                    texture: frame_textures.texture(b, i),
                    source: b.clone(),
                })
                .collect();
            let input_size = if i == 0 { source_size } else { sizes[i - 1] };

            let outcome = match (&pass.program, &pass.compiled) {
                (Some((program, interface)), Some(compiled)) => {
                    let bound: Vec<BoundTexture> = inputs
                        .iter()
                        .map(|input| {
                            let (filter, wrap) = match input.source {
                                BindingSource::Lookup(l) => installed.lut_sampling[l],
                                _ => (pass.config.filter, pass.config.wrap),
                            };
                            BoundTexture {
                                sampler: input.name.clone(),
                                texture: input.texture,
                                filter,
                                wrap,
                            }
                        })
                        .collect();
                    let texture_sizes: Vec<(String, [u32; 2])> = inputs
                        .iter()
                        .filter_map(|input| {
                            gpu.texture_size(input.texture)
                                .map(|s| (input.name.clone(), s))
                        })
                        .collect();
                    let parameters: Vec<(String, f32)> = compiled
                        .parameters
                        .iter()
                        .filter(|p| p.binding == ParameterBinding::Uniform)
                        .map(|p| {
                            let value = installed
                                .runtime
                                .get(&p.decl.name)
                                .copied()
                                .unwrap_or(p.decl.default);
                            (p.decl.name.clone(), value)
                        })
                        .collect();
                    let standard = StandardUniforms::new(
                        size,
                        input_size,
                        source_size,
                        viewport,
                        pass_frame_count(frame, pass.config.frame_count_mod),
                        frame_direction,
                    );
                    let uniforms = bind_uniforms(interface, &standard, &texture_sizes, &parameters);
                    let call = DrawCall {
                        program: *program,
                        target,
                        viewport: size,
                        textures: &bound,
                        uniforms: &uniforms,
                        block: standard.as_bytes(),
                    };
                    match gpu.draw(&call) {
                        Ok(()) => PassOutcome::Rendered,
                        Err(e) => {
                            warn!("[chain] pass {i} draw failed: {e}");
                            bypass(gpu, &frame_textures, pass, i, target, e.to_string())?
                        }
                    }
                }
                _ => {
                    let reason = match &pass.status {
                        PassStatus::Failed(e) => e.to_string(),
                        _ => "no program".to_string(),
                    };
                    bypass(gpu, &frame_textures, pass, i, target, reason)?
                }
            };

            if let DrawTarget::Texture(t) = target {
                if pass.targets.mipmap() {
                    gpu.generate_mipmaps(t)?;
                }
                if i + 1 == sizes.len() {
                    gpu.copy_texture(t, DrawTarget::Screen)?;
                }
            }

            reports.push(PassReport {
                index: i,
                shader: pass.name.clone(),
                outcome,
                inputs,
                output: match target {
                    DrawTarget::Texture(t) => Some(t),
                    DrawTarget::Screen => None,
                },
                size,
            });
        }

        installed.history.push(gpu, source)?;
        installed.frame += 1;
        self.state = if self.pending.is_some() {
            ChainState::Loading
        } else {
            ChainState::Running
        };
        Ok(FrameReport {
            frame,
            passes: reports,
        })
    }

    /// Release every program, target and lookup texture. Terminal.
    pub fn dispose(&mut self) {
        if self.state == ChainState::Disposed {
            return;
        }
        if let Some(job) = self.pending.take() {
            job.cancel();
        }
        if let Some(mut installed) = self.installed.take() {
            installed.release(&mut self.backend);
        }
        self.state = ChainState::Disposed;
        info!("[chain] disposed");
    }
}

impl<B: GpuBackend> Drop for FilterChain<B> {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn bypass(
    gpu: &mut dyn GpuBackend,
    frame: &FrameTextures<'_>,
    pass: &PassRuntime,
    index: usize,
    target: DrawTarget,
    reason: String,
) -> ChainResult<PassOutcome> {
    let input = frame.texture(&pass.primary_input(), index);
    gpu.copy_texture(input, target)?;
    debug!("[chain] pass {index} bypassed: {reason}");
    Ok(PassOutcome::Bypassed { reason })
}

fn dump_sources(dir: &Path, passes: &[PassRuntime]) {
    if let Err(e) = std::fs::create_dir_all(dir) {
        warn!("[chain] cannot create dump dir {}: {e}", dir.display());
        return;
    }
    for pass in passes {
        let Some(compiled) = &pass.compiled else {
            continue;
        };
        let stem = format!("{:02}-{}", pass.config.index, compiled.name);
        for (ext, text) in [
            ("vert", &compiled.vertex_source),
            ("frag", &compiled.fragment_source),
        ] {
            let path = dir.join(format!("{stem}.{ext}.glsl"));
            if let Err(e) = std::fs::write(&path, text) {
                warn!("[chain] failed to write {}: {e}", path.display());
            }
        }
    }
}
