//! Text stage of a preset load: parse, compile every pass, decode lookup textures.
//!
//! Nothing here touches the GPU, so it can run on a worker thread. The result is
//! installed by `FilterChain` on the rendering thread.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, TryRecvError};
use log::{info, warn};

use super::lut::{LutImage, load_lut};
use crate::compiler::{
    CompiledProgram, ParameterOverrides, SharedCompileCache, compile_shader, compile_shader_cached,
};
use crate::error::{ChainError, ChainResult};
use crate::preset::{PassConfig, Preset, parse_preset};
use crate::source_store::SourceFetcher;

#[derive(Debug, Clone)]
pub struct PreparedPass {
    pub config: PassConfig,
    /// A failed compile is kept here and turns into a bypassed pass.
    pub program: Result<Arc<CompiledProgram>, ChainError>,
}

#[derive(Debug, Clone)]
pub struct PreparedPreset {
    pub preset: Preset,
    pub passes: Vec<PreparedPass>,
    pub luts: Vec<LutImage>,
}

impl PreparedPreset {
    pub fn failed_passes(&self) -> impl Iterator<Item = (usize, &ChainError)> {
        self.passes
            .iter()
            .filter_map(|p| p.program.as_ref().err().map(|e| (p.config.index, e)))
    }
}

/// Compile one pass with the preset's overrides layered under `runtime`.
pub fn compile_pass(
    preset: &Preset,
    index: usize,
    fetcher: &dyn SourceFetcher,
    cache: Option<&SharedCompileCache>,
    runtime: &ParameterOverrides,
) -> ChainResult<Arc<CompiledProgram>> {
    let Some(pass) = preset.passes.get(index) else {
        return Err(ChainError::preset(&preset.path, format!("no pass {index}")));
    };
    let mut overrides = preset.overrides_for_pass(index);
    overrides.extend(runtime.iter().map(|(k, v)| (k.clone(), *v)));
    match cache {
        Some(cache) => compile_shader_cached(&pass.shader_path, fetcher, &overrides, cache),
        None => compile_shader(&pass.shader_path, fetcher, &overrides).map(Arc::new),
    }
}

pub fn prepare_preset(
    path: &Path,
    fetcher: &dyn SourceFetcher,
    cache: Option<&SharedCompileCache>,
    runtime: &ParameterOverrides,
    cancel: &AtomicBool,
) -> ChainResult<PreparedPreset> {
    let preset = parse_preset(path, fetcher)?;
    let mut passes = Vec::with_capacity(preset.passes.len());
    for config in &preset.passes {
        if cancel.load(Ordering::Relaxed) {
            info!("[loader] {} cancelled", path.display());
            return Err(ChainError::Cancelled);
        }
        let program = compile_pass(&preset, config.index, fetcher, cache, runtime);
        if let Err(e) = &program {
            warn!("[loader] pass {} ({}): {e}", config.index, config.shader_path.display());
        }
        passes.push(PreparedPass {
            config: config.clone(),
            program,
        });
    }
    if cancel.load(Ordering::Relaxed) {
        return Err(ChainError::Cancelled);
    }
    let luts = preset.textures.iter().map(|t| load_lut(t, fetcher)).collect();
    info!(
        "[loader] {}: {} passes, {} lookup textures",
        path.display(),
        passes.len(),
        preset.textures.len()
    );
    Ok(PreparedPreset {
        preset,
        passes,
        luts,
    })
}

/// A preset being prepared on a worker thread.
pub struct LoadJob {
    path: PathBuf,
    cancel: Arc<AtomicBool>,
    rx: Receiver<ChainResult<PreparedPreset>>,
}

impl LoadJob {
    pub fn spawn(
        path: PathBuf,
        fetcher: Arc<dyn SourceFetcher>,
        cache: Option<SharedCompileCache>,
        runtime: ParameterOverrides,
    ) -> Self {
        let cancel = Arc::new(AtomicBool::new(false));
        let (tx, rx) = crossbeam_channel::bounded(1);
        let worker_cancel = cancel.clone();
        let worker_path = path.clone();
        thread::spawn(move || {
            let result = prepare_preset(
                &worker_path,
                fetcher.as_ref(),
                cache.as_ref(),
                &runtime,
                &worker_cancel,
            );
            // The receiver is gone when the job was cancelled and dropped.
            let _ = tx.send(result);
        });
        Self { path, cancel, rx }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// `None` while the worker is still running.
    pub fn poll(&self) -> Option<ChainResult<PreparedPreset>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(ChainError::Backend(format!(
                "loader for {} exited without a result",
                self.path.display()
            )))),
        }
    }

    /// Block until the worker finishes.
    pub fn wait(self) -> ChainResult<PreparedPreset> {
        self.rx.recv().unwrap_or_else(|_| {
            Err(ChainError::Backend(format!(
                "loader for {} exited without a result",
                self.path.display()
            )))
        })
    }
}

impl Drop for LoadJob {
    fn drop(&mut self) {
        self.cancel();
    }
}
