//! Render targets owned by the chain: one output per pass, an optional feedback
//! twin for passes read back on the next frame, and the original-history ring.

use std::collections::VecDeque;

use log::debug;

use super::backend::{DrawTarget, GpuBackend, TextureDesc, TextureId};
use crate::error::ChainResult;
use crate::preset::{FramebufferFormat, ScaleConfig, ScaleType};

/// Output size for one pass.
///
/// A pass without any scale keys renders at its source size, except the last one,
/// which fills the viewport.
pub fn output_size(
    scale: Option<ScaleConfig>,
    source: [u32; 2],
    viewport: [u32; 2],
    is_final: bool,
) -> [u32; 2] {
    let Some(scale) = scale else {
        return if is_final { viewport } else { source.map(|v| v.max(1)) };
    };
    let axis = |ty: ScaleType, factor: f32, src: u32, vp: u32| -> u32 {
        let v = match ty {
            ScaleType::Source => src as f32 * factor,
            ScaleType::Viewport => vp as f32 * factor,
            ScaleType::Absolute => factor,
        };
        (v.round() as u32).max(1)
    };
    [
        axis(scale.type_x, scale.x, source[0], viewport[0]),
        axis(scale.type_y, scale.y, source[1], viewport[1]),
    ]
}

#[derive(Clone, Debug, PartialEq)]
pub struct RenderTarget {
    pub texture: TextureId,
    pub size: [u32; 2],
    pub format: FramebufferFormat,
}

impl RenderTarget {
    fn allocate(
        gpu: &mut dyn GpuBackend,
        label: &str,
        size: [u32; 2],
        format: FramebufferFormat,
        mipmap: bool,
    ) -> ChainResult<Self> {
        let mut desc = TextureDesc::new(label, size, format);
        desc.mipmap = mipmap;
        let texture = gpu.create_texture(&desc)?;
        Ok(Self {
            texture,
            size,
            format,
        })
    }
}

/// Targets for one pass.
#[derive(Debug, Default)]
pub struct PassTargets {
    pub output: Option<RenderTarget>,
    /// Previous frame's output, present only when a later pass reads it.
    pub feedback: Option<RenderTarget>,
    mipmap: bool,
}

impl PassTargets {
    /// Make sure the output (and feedback twin) match `size`/`format`, reallocating
    /// on change. Returns true when anything was (re)created.
    pub fn ensure(
        &mut self,
        gpu: &mut dyn GpuBackend,
        label: &str,
        size: [u32; 2],
        format: FramebufferFormat,
        feedback: bool,
    ) -> ChainResult<bool> {
        let mut changed = false;
        if !matches(&self.output, size, format) {
            if let Some(old) = self.output.take() {
                gpu.delete_texture(old.texture);
            }
            self.output = Some(RenderTarget::allocate(gpu, label, size, format, self.mipmap)?);
            debug!("[targets] {label} -> {}x{}", size[0], size[1]);
            changed = true;
        }
        if feedback {
            if !matches(&self.feedback, size, format) {
                if let Some(old) = self.feedback.take() {
                    gpu.delete_texture(old.texture);
                }
                let label = format!("{label}.feedback");
                self.feedback = Some(RenderTarget::allocate(gpu, &label, size, format, self.mipmap)?);
                changed = true;
            }
        } else if let Some(old) = self.feedback.take() {
            gpu.delete_texture(old.texture);
        }
        Ok(changed)
    }

    pub fn set_mipmap(&mut self, mipmap: bool) {
        self.mipmap = mipmap;
    }

    /// Whether readers sample this output with mipmaps.
    pub fn mipmap(&self) -> bool {
        self.mipmap
    }

    /// Last frame's output becomes this frame's feedback.
    pub fn swap_feedback(&mut self) {
        if self.feedback.is_some() {
            std::mem::swap(&mut self.output, &mut self.feedback);
        }
    }

    pub fn release(&mut self, gpu: &mut dyn GpuBackend) {
        for t in [self.output.take(), self.feedback.take()].into_iter().flatten() {
            gpu.delete_texture(t.texture);
        }
    }

    pub fn output_texture(&self) -> Option<TextureId> {
        self.output.as_ref().map(|t| t.texture)
    }

    pub fn feedback_texture(&self) -> Option<TextureId> {
        self.feedback.as_ref().map(|t| t.texture)
    }
}

fn matches(target: &Option<RenderTarget>, size: [u32; 2], format: FramebufferFormat) -> bool {
    target
        .as_ref()
        .is_some_and(|t| t.size == size && t.format == format)
}

/// Ring of past source frames. Entry 0 is the frame before the current one.
#[derive(Debug, Default)]
pub struct HistoryRing {
    frames: VecDeque<RenderTarget>,
    depth: usize,
}

impl HistoryRing {
    /// `depth` past frames are kept; `OriginalHistoryN` reads entry `N - 1`.
    pub fn new(depth: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(depth),
            depth,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn get(&self, n: usize) -> Option<TextureId> {
        n.checked_sub(1)
            .and_then(|i| self.frames.get(i))
            .map(|t| t.texture)
    }

    /// Allocate (or resize) every slot to the source size.
    pub fn ensure(&mut self, gpu: &mut dyn GpuBackend, size: [u32; 2]) -> ChainResult<()> {
        if self.depth == 0 {
            return Ok(());
        }
        if self.frames.len() == self.depth && self.frames.iter().all(|t| t.size == size) {
            return Ok(());
        }
        self.release(gpu);
        for i in 0..self.depth {
            let label = format!("OriginalHistory{}", i + 1);
            self.frames.push_back(RenderTarget::allocate(
                gpu,
                &label,
                size,
                FramebufferFormat::Rgba8,
                false,
            )?);
        }
        Ok(())
    }

    /// Store `source` as the newest entry, recycling the oldest slot.
    pub fn push(&mut self, gpu: &mut dyn GpuBackend, source: TextureId) -> ChainResult<()> {
        let Some(slot) = self.frames.pop_back() else {
            return Ok(());
        };
        let copied = gpu.copy_texture(source, DrawTarget::Texture(slot.texture));
        self.frames.push_front(slot);
        copied
    }

    pub fn release(&mut self, gpu: &mut dyn GpuBackend) {
        for t in self.frames.drain(..) {
            gpu.delete_texture(t.texture);
        }
    }
}
