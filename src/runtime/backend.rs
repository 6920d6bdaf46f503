//! The GPU seam. The executor only talks to a [`GpuBackend`]; a WebGL2/GLES
//! host implements it over its context, tests use the headless one.

use serde::Serialize;

use crate::compiler::validation::ProgramInterface;
use crate::error::ChainResult;
use crate::preset::{FilterMode, FramebufferFormat, WrapMode};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TextureId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u64);

#[derive(Clone, Debug, PartialEq)]
pub struct TextureDesc {
    pub label: String,
    pub size: [u32; 2],
    pub format: FramebufferFormat,
    pub mipmap: bool,
}

impl TextureDesc {
    pub fn new(label: impl Into<String>, size: [u32; 2], format: FramebufferFormat) -> Self {
        Self {
            label: label.into(),
            size,
            format,
            mipmap: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Mat4([f32; 16]),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DrawTarget {
    Texture(TextureId),
    /// The host's visible framebuffer.
    Screen,
}

/// A texture bound to a sampler uniform, with the sampling state of the reading pass.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundTexture {
    pub sampler: String,
    pub texture: TextureId,
    pub filter: FilterMode,
    pub wrap: WrapMode,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DrawCall<'a> {
    pub program: ProgramId,
    pub target: DrawTarget,
    pub viewport: [u32; 2],
    pub textures: &'a [BoundTexture],
    pub uniforms: &'a [(String, UniformValue)],
    /// `StandardUniforms` packed std140-style, for backends that upload one UBO
    /// instead of setting individual uniforms.
    pub block: &'a [u8],
}

pub trait GpuBackend {
    /// Compile and link both stages. Rejections come back as
    /// `ChainError::Transpile` (with line/column) or `ChainError::Link`.
    fn create_program(&mut self, vertex: &str, fragment: &str) -> ChainResult<(ProgramId, ProgramInterface)>;

    fn delete_program(&mut self, program: ProgramId);

    fn create_texture(&mut self, desc: &TextureDesc) -> ChainResult<TextureId>;

    /// Replace the contents with tightly packed RGBA8 pixels.
    fn upload_rgba8(&mut self, texture: TextureId, size: [u32; 2], pixels: &[u8]) -> ChainResult<()>;

    fn delete_texture(&mut self, texture: TextureId);

    fn texture_size(&self, texture: TextureId) -> Option<[u32; 2]>;

    fn generate_mipmaps(&mut self, texture: TextureId) -> ChainResult<()>;

    /// Full-viewport quad draw.
    fn draw(&mut self, call: &DrawCall<'_>) -> ChainResult<()>;

    /// Blit `src` into `dst` unchanged (bypass and history copies).
    fn copy_texture(&mut self, src: TextureId, dst: DrawTarget) -> ChainResult<()>;
}
