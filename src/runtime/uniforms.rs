//! Per-pass uniform values.
//!
//! [`StandardUniforms`] is the semantic block every pass can read; `bind_uniforms`
//! flattens it, the texture sizes and the runtime parameters into the list of
//! `(name, value)` pairs the program actually declares.

use bytemuck::{Pod, Zeroable};

use super::backend::UniformValue;
use crate::compiler::validation::ProgramInterface;

/// Maps the unit quad onto clip space.
pub const ORTHO_MVP: [f32; 16] = [
    2.0, 0.0, 0.0, 0.0, //
    0.0, 2.0, 0.0, 0.0, //
    0.0, 0.0, -1.0, 0.0, //
    -1.0, -1.0, 0.0, 1.0,
];

/// `[w, h, 1/w, 1/h]`, the layout every `*Size` uniform uses.
pub fn size_vec(size: [u32; 2]) -> [f32; 4] {
    let w = size[0].max(1) as f32;
    let h = size[1].max(1) as f32;
    [w, h, 1.0 / w, 1.0 / h]
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct StandardUniforms {
    pub mvp: [f32; 16],
    pub output_size: [f32; 4],
    pub source_size: [f32; 4],
    pub original_size: [f32; 4],
    pub final_viewport_size: [f32; 4],
    pub frame_count: u32,
    pub frame_direction: i32,
    pub _pad: [u32; 2],
}

impl StandardUniforms {
    pub fn new(
        output: [u32; 2],
        source: [u32; 2],
        original: [u32; 2],
        viewport: [u32; 2],
        frame_count: u32,
        frame_direction: i32,
    ) -> Self {
        Self {
            mvp: ORTHO_MVP,
            output_size: size_vec(output),
            source_size: size_vec(source),
            original_size: size_vec(original),
            final_viewport_size: size_vec(viewport),
            frame_count,
            frame_direction,
            _pad: [0; 2],
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

/// `FrameCount` as a pass sees it, honouring `frame_count_modN`.
pub fn pass_frame_count(frame: u64, modulo: u32) -> u32 {
    if modulo == 0 {
        frame as u32
    } else {
        (frame % modulo as u64) as u32
    }
}

fn coerce(ty: &str, v: [f32; 4]) -> Option<UniformValue> {
    Some(match ty {
        "float" => UniformValue::Float(v[0]),
        "int" | "bool" => UniformValue::Int(v[0] as i32),
        "vec2" => UniformValue::Vec2([v[0], v[1]]),
        "vec3" => UniformValue::Vec3([v[0], v[1], v[2]]),
        "vec4" => UniformValue::Vec4(v),
        _ => return None,
    })
}

/// Values for every uniform `interface` declares and this chain knows how to feed.
///
/// `textures` holds `(sampler, size)` for each bound sampler and produces the
/// `<sampler>Size` uniforms. `parameters` are the runtime-bound pragma parameters.
pub fn bind_uniforms(
    interface: &ProgramInterface,
    standard: &StandardUniforms,
    textures: &[(String, [u32; 2])],
    parameters: &[(String, f32)],
) -> Vec<(String, UniformValue)> {
    let mut out = Vec::new();
    for u in &interface.uniforms {
        if u.array.is_some() || u.ty.starts_with("sampler") {
            continue;
        }
        let value = match u.name.as_str() {
            "MVP" if u.ty == "mat4" => Some(UniformValue::Mat4(standard.mvp)),
            "OutputSize" => coerce(&u.ty, standard.output_size),
            "SourceSize" | "InputSize" | "TextureSize" => coerce(&u.ty, standard.source_size),
            "OriginalSize" => coerce(&u.ty, standard.original_size),
            "FinalViewportSize" => coerce(&u.ty, standard.final_viewport_size),
            "FrameCount" => coerce(&u.ty, [standard.frame_count as f32; 4]),
            "FrameDirection" => coerce(&u.ty, [standard.frame_direction as f32; 4]),
            name => {
                if let Some((_, v)) = parameters.iter().find(|(p, _)| p == name) {
                    coerce(&u.ty, [*v; 4])
                } else {
                    name.strip_suffix("Size")
                        .and_then(|s| textures.iter().find(|(t, _)| t == s))
                        .and_then(|(_, size)| coerce(&u.ty, size_vec(*size)))
                }
            }
        };
        if let Some(value) = value {
            out.push((u.name.clone(), value));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::validation::InterfaceVar;

    fn var(name: &str, ty: &str) -> InterfaceVar {
        InterfaceVar {
            name: name.into(),
            ty: ty.into(),
            array: None,
            location: None,
        }
    }

    #[test]
    fn block_is_tightly_packed() {
        let u = StandardUniforms::new([2, 2], [1, 1], [1, 1], [4, 4], 7, 1);
        assert_eq!(u.as_bytes().len(), 144);
        assert_eq!(u.final_viewport_size, [4.0, 4.0, 0.25, 0.25]);
    }

    #[test]
    fn binds_only_declared_uniforms() {
        let interface = ProgramInterface {
            uniforms: vec![
                var("MVP", "mat4"),
                var("OutputSize", "vec4"),
                var("InputSize", "vec2"),
                var("FrameCount", "float"),
                var("FooSize", "vec4"),
                var("GLOW", "float"),
                var("MODE", "int"),
                var("Source", "sampler2D"),
                var("Unrelated", "vec4"),
            ],
            ..Default::default()
        };
        let std = StandardUniforms::new([640, 480], [320, 240], [320, 240], [640, 480], 42, 1);
        let bound = bind_uniforms(
            &interface,
            &std,
            &[("Foo".into(), [16, 8])],
            &[("GLOW".into(), 0.5), ("MODE".into(), 2.0)],
        );
        let get = |n: &str| bound.iter().find(|(k, _)| k == n).map(|(_, v)| *v);
        assert_eq!(get("MVP"), Some(UniformValue::Mat4(ORTHO_MVP)));
        assert_eq!(get("InputSize"), Some(UniformValue::Vec2([320.0, 240.0])));
        assert_eq!(get("FrameCount"), Some(UniformValue::Float(42.0)));
        assert_eq!(get("FooSize"), Some(UniformValue::Vec4([16.0, 8.0, 1.0 / 16.0, 0.125])));
        assert_eq!(get("GLOW"), Some(UniformValue::Float(0.5)));
        assert_eq!(get("MODE"), Some(UniformValue::Int(2)));
        assert_eq!(get("Source"), None);
        assert_eq!(get("Unrelated"), None);
        assert_eq!(bound.len(), 7);
    }

    #[test]
    fn frame_count_modulo() {
        assert_eq!(pass_frame_count(10, 0), 10);
        assert_eq!(pass_frame_count(10, 4), 2);
    }
}
