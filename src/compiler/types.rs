//! Core type definitions shared by the compiler stages.

use std::path::PathBuf;

use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub const ALL: [ShaderStage; 2] = [ShaderStage::Vertex, ShaderStage::Fragment];

    pub fn as_str(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
        }
    }
}

/// Merged shader text with every `#include` inlined.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderUnit {
    pub path: PathBuf,
    pub source: String,
    /// Files inlined into `source`, in inclusion order (entry file excluded).
    pub includes: Vec<PathBuf>,
}

impl ShaderUnit {
    pub fn from_source(path: impl Into<PathBuf>, source: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            source: source.into(),
            includes: Vec::new(),
        }
    }
}

/// One `#pragma parameter` annotation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ParameterDeclaration {
    pub name: String,
    pub label: String,
    pub default: f32,
    pub min: f32,
    pub max: f32,
    pub step: f32,
}

/// How a parameter reaches the compiled program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterBinding {
    /// Bound every frame under its own uniform name.
    Uniform,
    /// Baked in as `#define NAME value`; a change needs a recompile.
    CompileTime,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CompiledParameter {
    #[serde(flatten)]
    pub decl: ParameterDeclaration,
    pub binding: ParameterBinding,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GlobalKind {
    Constant,
    Dynamic,
}

/// A file-scope variable declared outside any block.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GlobalDeclaration {
    pub name: String,
    pub ty: String,
    /// Array dimension text, without brackets.
    pub array: Option<String>,
    pub kind: GlobalKind,
    pub initializer: Option<String>,
    pub is_const: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FunctionParam {
    /// `in`, `out`, `inout` or empty.
    pub qualifier: String,
    pub ty: String,
    pub name: String,
    pub array: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FunctionSignature {
    pub name: String,
    pub return_type: String,
    pub params: Vec<FunctionParam>,
}

impl FunctionSignature {
    /// Overload identity: name plus parameter types.
    pub fn key(&self) -> String {
        let types: Vec<String> = self
            .params
            .iter()
            .map(|p| match &p.array {
                Some(dim) => format!("{}[{}]", p.ty, dim),
                None => p.ty.clone(),
            })
            .collect();
        format!("{}({})", self.name, types.join(","))
    }

    /// Declaration text without a body, e.g. `vec3 tone(vec3 c, float g)`.
    pub fn render(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| {
                let mut s = String::new();
                if !p.qualifier.is_empty() {
                    s.push_str(&p.qualifier);
                    s.push(' ');
                }
                s.push_str(&p.ty);
                if !p.name.is_empty() {
                    s.push(' ');
                    s.push_str(&p.name);
                }
                if let Some(dim) = &p.array {
                    s.push_str(&format!("[{dim}]"));
                }
                s
            })
            .collect();
        format!("{} {}({})", self.return_type, self.name, params.join(", "))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExtractedFunction {
    pub signature: FunctionSignature,
    /// Body text including the outer braces.
    pub body: String,
}

/// A uniform as declared in emitted code.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UniformDecl {
    pub name: String,
    /// Type in the emitted program (`uint` already lowered to `float`).
    pub ty: String,
    /// Type as written in the source.
    pub source_ty: String,
    pub array: Option<String>,
}

/// Output of the compiler for one shader file.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CompiledProgram {
    pub name: String,
    pub path: PathBuf,
    pub vertex_source: String,
    pub fragment_source: String,
    /// Non-sampler uniforms across both stages.
    pub uniforms: Vec<UniformDecl>,
    pub samplers: Vec<String>,
    pub parameters: Vec<CompiledParameter>,
    /// `#pragma name`.
    pub alias: Option<String>,
    /// `#pragma format`.
    pub format: Option<String>,
    /// Names of functions that received a placeholder definition.
    pub stubs: Vec<String>,
    pub dynamic_globals: Vec<String>,
    pub source_hash: String,
}

impl CompiledProgram {
    pub fn uniform_names(&self) -> Vec<&str> {
        self.uniforms.iter().map(|u| u.name.as_str()).collect()
    }

    pub fn has_uniform(&self, name: &str) -> bool {
        self.uniforms.iter().any(|u| u.name == name)
    }

    pub fn parameter(&self, name: &str) -> Option<&CompiledParameter> {
        self.parameters.iter().find(|p| p.decl.name == name)
    }

    pub fn source(&self, stage: ShaderStage) -> &str {
        match stage {
            ShaderStage::Vertex => &self.vertex_source,
            ShaderStage::Fragment => &self.fragment_source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(qualifier: &str, ty: &str, name: &str) -> FunctionParam {
        FunctionParam {
            qualifier: qualifier.to_string(),
            ty: ty.to_string(),
            name: name.to_string(),
            array: None,
        }
    }

    #[test]
    fn signature_key_ignores_parameter_names() {
        let a = FunctionSignature {
            name: "blend".into(),
            return_type: "vec3".into(),
            params: vec![param("", "vec3", "a"), param("", "float", "t")],
        };
        let b = FunctionSignature {
            name: "blend".into(),
            return_type: "vec3".into(),
            params: vec![param("in", "vec3", "x"), param("", "float", "y")],
        };
        assert_eq!(a.key(), b.key());
        assert_eq!(a.key(), "blend(vec3,float)");
    }

    #[test]
    fn signature_renders_qualifiers() {
        let sig = FunctionSignature {
            name: "split".into(),
            return_type: "void".into(),
            params: vec![param("out", "vec2", "lo"), param("inout", "float", "acc")],
        };
        assert_eq!(sig.render(), "void split(out vec2 lo, inout float acc)");
    }
}
