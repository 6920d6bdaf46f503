//! Device-free backend.
//!
//! Programs are accepted or rejected by `compiler::validation`, so a source the
//! target would refuse fails here too. Pixels are not rasterized; instead every
//! texture carries a [`Lineage`] describing how its contents were produced, which
//! is enough to compare frames and to check bypass and binding behaviour.
//!
//! Lineage is one level deep: a draw names its inputs by their write stamp, so a
//! pass reading its own feedback does not grow a chain across frames.

use std::collections::{HashMap, VecDeque};

use log::debug;

use super::backend::{DrawCall, DrawTarget, GpuBackend, ProgramId, TextureDesc, TextureId, UniformValue};
use super::uniforms::StandardUniforms;
use crate::compiler::validation::{ProgramInterface, validate_program};
use crate::error::{ChainError, ChainResult};

/// Draws kept by [`HeadlessBackend::draws`]; older ones are dropped.
pub const MAX_RECORDED_DRAWS: usize = 1024;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Lineage {
    /// Freshly allocated, never written.
    Cleared,
    /// Written by the host, stamped with the write counter.
    Uploaded(u64),
    Drawn {
        write: u64,
        program: ProgramId,
        /// (sampler, stamp of the sampled contents) in binding order.
        inputs: Vec<(String, u64)>,
    },
}

impl Lineage {
    /// Identity of these contents. Copies keep it; every upload or draw gets a
    /// fresh one. `Cleared` is 0.
    pub fn stamp(&self) -> u64 {
        match self {
            Lineage::Cleared => 0,
            Lineage::Uploaded(n) => *n,
            Lineage::Drawn { write, .. } => *write,
        }
    }
}

#[derive(Clone, Debug)]
struct HeadlessTexture {
    desc: TextureDesc,
    lineage: Lineage,
    mip_levels: u32,
}

/// One recorded draw.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawRecord {
    pub program: ProgramId,
    pub target: DrawTarget,
    pub viewport: [u32; 2],
    pub textures: Vec<(String, TextureId)>,
    pub uniforms: Vec<(String, UniformValue)>,
    pub standard: StandardUniforms,
}

#[derive(Debug, Default)]
pub struct HeadlessBackend {
    next_id: u64,
    writes: u64,
    programs: HashMap<ProgramId, ProgramInterface>,
    textures: HashMap<TextureId, HeadlessTexture>,
    screen: Option<Lineage>,
    draws: VecDeque<DrawRecord>,
    programs_created: usize,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn next_write(&mut self) -> u64 {
        self.writes += 1;
        self.writes
    }

    /// Create a texture and fill it as the host would fill its source frame.
    pub fn create_source(&mut self, size: [u32; 2]) -> TextureId {
        let id = TextureId(self.next());
        let write = self.next_write();
        self.textures.insert(
            id,
            HeadlessTexture {
                desc: TextureDesc::new("host-source", size, Default::default()),
                lineage: Lineage::Uploaded(write),
                mip_levels: 1,
            },
        );
        id
    }

    /// Simulate the host writing a new frame into `texture`.
    pub fn touch(&mut self, texture: TextureId) {
        let write = self.next_write();
        if let Some(t) = self.textures.get_mut(&texture) {
            t.lineage = Lineage::Uploaded(write);
        }
    }

    pub fn lineage(&self, texture: TextureId) -> Option<&Lineage> {
        self.textures.get(&texture).map(|t| &t.lineage)
    }

    pub fn screen(&self) -> Option<&Lineage> {
        self.screen.as_ref()
    }

    /// The most recent draws, oldest first, at most [`MAX_RECORDED_DRAWS`].
    pub fn draws(&self) -> impl DoubleEndedIterator<Item = &DrawRecord> + ExactSizeIterator {
        self.draws.iter()
    }

    pub fn clear_draws(&mut self) {
        self.draws.clear();
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    pub fn programs_created(&self) -> usize {
        self.programs_created
    }

    pub fn mip_levels(&self, texture: TextureId) -> Option<u32> {
        self.textures.get(&texture).map(|t| t.mip_levels)
    }

    fn lineage_of(&self, texture: TextureId) -> ChainResult<&Lineage> {
        self.textures
            .get(&texture)
            .map(|t| &t.lineage)
            .ok_or_else(|| ChainError::Backend(format!("unknown texture {}", texture.0)))
    }

    fn write(&mut self, target: DrawTarget, lineage: Lineage) -> ChainResult<()> {
        match target {
            DrawTarget::Screen => {
                self.screen = Some(lineage);
                Ok(())
            }
            DrawTarget::Texture(id) => {
                let tex = self
                    .textures
                    .get_mut(&id)
                    .ok_or_else(|| ChainError::Backend(format!("unknown render target {}", id.0)))?;
                tex.lineage = lineage;
                Ok(())
            }
        }
    }
}

impl GpuBackend for HeadlessBackend {
    fn create_program(&mut self, vertex: &str, fragment: &str) -> ChainResult<(ProgramId, ProgramInterface)> {
        let interface = validate_program(vertex, fragment)?;
        let id = ProgramId(self.next());
        self.programs.insert(id, interface.clone());
        self.programs_created += 1;
        debug!("[headless] program {} linked", id.0);
        Ok((id, interface))
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> ChainResult<TextureId> {
        if desc.size[0] == 0 || desc.size[1] == 0 {
            return Err(ChainError::Backend(format!(
                "texture `{}` has zero size",
                desc.label
            )));
        }
        let id = TextureId(self.next());
        self.textures.insert(
            id,
            HeadlessTexture {
                desc: desc.clone(),
                lineage: Lineage::Cleared,
                mip_levels: 1,
            },
        );
        Ok(id)
    }

    fn upload_rgba8(&mut self, texture: TextureId, size: [u32; 2], pixels: &[u8]) -> ChainResult<()> {
        let expected = size[0] as usize * size[1] as usize * 4;
        if pixels.len() != expected {
            return Err(ChainError::Backend(format!(
                "upload of {} bytes into a {}x{} texture",
                pixels.len(),
                size[0],
                size[1]
            )));
        }
        let write = self.next_write();
        let tex = self
            .textures
            .get_mut(&texture)
            .ok_or_else(|| ChainError::Backend(format!("unknown texture {}", texture.0)))?;
        tex.desc.size = size;
        tex.lineage = Lineage::Uploaded(write);
        Ok(())
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture);
    }

    fn texture_size(&self, texture: TextureId) -> Option<[u32; 2]> {
        self.textures.get(&texture).map(|t| t.desc.size)
    }

    fn generate_mipmaps(&mut self, texture: TextureId) -> ChainResult<()> {
        let tex = self
            .textures
            .get_mut(&texture)
            .ok_or_else(|| ChainError::Backend(format!("unknown texture {}", texture.0)))?;
        let largest = tex.desc.size[0].max(tex.desc.size[1]).max(1);
        tex.mip_levels = 32 - largest.leading_zeros();
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> ChainResult<()> {
        if !self.programs.contains_key(&call.program) {
            return Err(ChainError::Backend(format!("unknown program {}", call.program.0)));
        }
        if let DrawTarget::Texture(target) = call.target {
            if call.textures.iter().any(|b| b.texture == target) {
                return Err(ChainError::Backend(format!(
                    "texture {} is both sampled and rendered to",
                    target.0
                )));
            }
        }
        let standard: StandardUniforms = bytemuck::try_pod_read_unaligned(call.block)
            .map_err(|e| ChainError::Backend(format!("uniform block of {} bytes: {e:?}", call.block.len())))?;
        let mut inputs = Vec::with_capacity(call.textures.len());
        for b in call.textures {
            inputs.push((b.sampler.clone(), self.lineage_of(b.texture)?.stamp()));
        }
        let write = self.next_write();
        self.write(
            call.target,
            Lineage::Drawn {
                write,
                program: call.program,
                inputs,
            },
        )?;
        if self.draws.len() == MAX_RECORDED_DRAWS {
            self.draws.pop_front();
        }
        self.draws.push_back(DrawRecord {
            program: call.program,
            target: call.target,
            viewport: call.viewport,
            textures: call
                .textures
                .iter()
                .map(|b| (b.sampler.clone(), b.texture))
                .collect(),
            uniforms: call.uniforms.to_vec(),
            standard,
        });
        Ok(())
    }

    fn copy_texture(&mut self, src: TextureId, dst: DrawTarget) -> ChainResult<()> {
        let lineage = self.lineage_of(src)?.clone();
        self.write(dst, lineage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::backend::BoundTexture;

    #[test]
    fn copies_carry_lineage_and_draws_compose_it() {
        let mut gpu = HeadlessBackend::new();
        let src = gpu.create_source([4, 4]);
        let dst = gpu
            .create_texture(&TextureDesc::new("t", [4, 4], Default::default()))
            .unwrap();
        assert_eq!(gpu.lineage(dst), Some(&Lineage::Cleared));
        gpu.copy_texture(src, DrawTarget::Texture(dst)).unwrap();
        assert_eq!(gpu.lineage(dst), gpu.lineage(src));

        gpu.touch(src);
        assert_ne!(gpu.lineage(dst), gpu.lineage(src));
    }

    const VS: &str = "#version 300 es
precision highp float;
layout(location = 0) in vec4 Position;
layout(location = 1) in vec2 TexCoord;
out vec2 vTexCoord;
uniform mat4 MVP;
void main() {
    gl_Position = MVP * Position;
    vTexCoord = TexCoord;
}
";

    const FS: &str = "#version 300 es
precision highp float;
in vec2 vTexCoord;
layout(location = 0) out vec4 FragColor;
uniform sampler2D Source;
void main() {
    FragColor = texture(Source, vTexCoord);
}
";

    fn draw_into(
        gpu: &mut HeadlessBackend,
        program: ProgramId,
        input: TextureId,
        target: DrawTarget,
        frame: u32,
    ) -> ChainResult<()> {
        let standard = StandardUniforms::new([4, 4], [4, 4], [4, 4], [4, 4], frame, 1);
        let textures = [BoundTexture {
            sampler: "Source".to_string(),
            texture: input,
            filter: Default::default(),
            wrap: Default::default(),
        }];
        gpu.draw(&DrawCall {
            program,
            target,
            viewport: [4, 4],
            textures: &textures,
            uniforms: &[],
            block: standard.as_bytes(),
        })
    }

    #[test]
    fn ping_pong_lineage_stays_flat() {
        let mut gpu = HeadlessBackend::new();
        let (program, _) = gpu.create_program(VS, FS).unwrap();
        let desc = TextureDesc::new("t", [4, 4], Default::default());
        let a = gpu.create_texture(&desc).unwrap();
        let b = gpu.create_texture(&desc).unwrap();
        gpu.touch(a);

        for frame in 0..5000u32 {
            let (src, dst) = if frame % 2 == 0 { (a, b) } else { (b, a) };
            let read = gpu.lineage(src).unwrap().stamp();
            draw_into(&mut gpu, program, src, DrawTarget::Texture(dst), frame).unwrap();
            match gpu.lineage(dst) {
                Some(Lineage::Drawn { inputs, write, .. }) => {
                    assert_eq!(inputs, &vec![("Source".to_string(), read)]);
                    assert!(*write > read);
                }
                other => panic!("expected a draw, got {other:?}"),
            }
        }
        assert_eq!(gpu.draws().len(), MAX_RECORDED_DRAWS);
        assert_eq!(gpu.draws().last().unwrap().standard.frame_count, 4999);
    }

    #[test]
    fn short_uniform_block_is_a_backend_error() {
        let mut gpu = HeadlessBackend::new();
        let (program, _) = gpu.create_program(VS, FS).unwrap();
        let src = gpu.create_source([4, 4]);
        let err = gpu
            .draw(&DrawCall {
                program,
                target: DrawTarget::Screen,
                viewport: [4, 4],
                textures: &[],
                uniforms: &[],
                block: &[0; 16],
            })
            .unwrap_err();
        assert!(matches!(err, ChainError::Backend(_)));
        assert_eq!(gpu.screen(), None);
        assert!(gpu.lineage(src).is_some());
    }

    #[test]
    fn rejects_invalid_programs() {
        let mut gpu = HeadlessBackend::new();
        let err = gpu.create_program("void main() {}", "void main() {}").unwrap_err();
        assert!(matches!(err, ChainError::Transpile { stage: "vertex", .. }));
        assert_eq!(gpu.live_programs(), 0);
    }

    #[test]
    fn mip_levels_follow_largest_axis() {
        let mut gpu = HeadlessBackend::new();
        let t = gpu
            .create_texture(&TextureDesc::new("t", [256, 64], Default::default()))
            .unwrap();
        gpu.generate_mipmaps(t).unwrap();
        assert_eq!(gpu.mip_levels(t), Some(9));
    }
}
