//! GLSL ES 3.00 vocabulary: type names, qualifiers and built-in functions.

pub const SCALAR_TYPES: &[&str] = &["bool", "int", "uint", "float"];

pub const BUILTIN_TYPES: &[&str] = &[
    "void", "bool", "int", "uint", "float", "double", "vec2", "vec3", "vec4", "bvec2", "bvec3",
    "bvec4", "ivec2", "ivec3", "ivec4", "uvec2", "uvec3", "uvec4", "dvec2", "dvec3", "dvec4",
    "mat2", "mat3", "mat4", "mat2x2", "mat2x3", "mat2x4", "mat3x2", "mat3x3", "mat3x4", "mat4x2",
    "mat4x3", "mat4x4", "sampler2D", "sampler3D", "samplerCube", "sampler2DArray",
    "sampler2DShadow", "samplerCubeShadow", "sampler2DArrayShadow", "isampler2D", "isampler3D",
    "isamplerCube", "isampler2DArray", "usampler2D", "usampler3D", "usamplerCube",
    "usampler2DArray",
];

/// Storage, interpolation, precision and parameter qualifiers.
pub const QUALIFIERS: &[&str] = &[
    "const", "uniform", "in", "out", "inout", "varying", "attribute", "flat", "smooth",
    "noperspective", "centroid", "invariant", "highp", "mediump", "lowp", "buffer", "readonly",
    "writeonly", "coherent", "restrict", "precise",
];

pub const PRECISION_QUALIFIERS: &[&str] = &["highp", "mediump", "lowp"];

pub const BUILTIN_FUNCTIONS: &[&str] = &[
    // angle & trigonometry
    "radians", "degrees", "sin", "cos", "tan", "asin", "acos", "atan", "sinh", "cosh", "tanh",
    "asinh", "acosh", "atanh",
    // exponential
    "pow", "exp", "log", "exp2", "log2", "sqrt", "inversesqrt",
    // common
    "abs", "sign", "floor", "trunc", "round", "roundEven", "ceil", "fract", "mod", "modf", "min",
    "max", "clamp", "mix", "step", "smoothstep", "isnan", "isinf", "floatBitsToInt",
    "floatBitsToUint", "intBitsToFloat", "uintBitsToFloat", "fma",
    // packing
    "packSnorm2x16", "unpackSnorm2x16", "packUnorm2x16", "unpackUnorm2x16", "packHalf2x16",
    "unpackHalf2x16",
    // geometric
    "length", "distance", "dot", "cross", "normalize", "faceforward", "reflect", "refract",
    // matrix
    "matrixCompMult", "outerProduct", "transpose", "determinant", "inverse",
    // vector relational
    "lessThan", "lessThanEqual", "greaterThan", "greaterThanEqual", "equal", "notEqual", "any",
    "all", "not",
    // texture
    "textureSize", "texture", "textureProj", "textureLod", "textureOffset", "texelFetch",
    "texelFetchOffset", "textureProjOffset", "textureLodOffset", "textureProjLod",
    "textureProjLodOffset", "textureGrad", "textureGradOffset", "textureProjGrad",
    "textureProjGradOffset",
    // fragment processing
    "dFdx", "dFdy", "fwidth",
];

/// Legacy sampling functions and their GLSL ES 3.00 replacements.
pub const LEGACY_TEXTURE_FUNCTIONS: &[(&str, &str)] = &[
    ("texture2D", "texture"),
    ("texture2DLod", "textureLod"),
    ("texture2DProj", "textureProj"),
    ("texture2DProjLod", "textureProjLod"),
    ("textureCube", "texture"),
    ("textureCubeLod", "textureLod"),
    ("shadow2D", "texture"),
];

pub const RESERVED_WORDS: &[&str] = &[
    "if", "else", "for", "while", "do", "return", "break", "continue", "discard", "switch",
    "case", "default", "struct", "true", "false", "precision", "layout",
];

pub fn is_builtin_type(name: &str) -> bool {
    BUILTIN_TYPES.contains(&name)
}

pub fn is_qualifier(name: &str) -> bool {
    QUALIFIERS.contains(&name)
}

pub fn is_builtin_function(name: &str) -> bool {
    BUILTIN_FUNCTIONS.contains(&name)
        || LEGACY_TEXTURE_FUNCTIONS.iter().any(|(old, _)| *old == name)
        || name.starts_with("gl_")
}

pub fn is_reserved(name: &str) -> bool {
    RESERVED_WORDS.contains(&name)
}

pub fn is_sampler_type(name: &str) -> bool {
    name.contains("sampler")
}

/// `mat3x3` → `mat3`; other names unchanged.
pub fn square_matrix_name(name: &str) -> Option<&'static str> {
    match name {
        "mat2x2" => Some("mat2"),
        "mat3x3" => Some("mat3"),
        "mat4x4" => Some("mat4"),
        _ => None,
    }
}

/// Number of scalar components of a vector/scalar type, if it is one.
pub fn component_count(ty: &str) -> Option<usize> {
    match ty {
        "bool" | "int" | "uint" | "float" => Some(1),
        _ => {
            let last = ty.chars().last()?;
            if ty.contains("vec") {
                last.to_digit(10).map(|d| d as usize)
            } else {
                None
            }
        }
    }
}

/// Vector type with `n` components of the same base as `ty` (`vec3`, 2 → `vec2`).
pub fn vector_of(ty: &str, n: usize) -> String {
    let base = match ty {
        "int" | "ivec2" | "ivec3" | "ivec4" => "i",
        "uint" | "uvec2" | "uvec3" | "uvec4" => "u",
        "bool" | "bvec2" | "bvec3" | "bvec4" => "b",
        _ => "",
    };
    if n == 1 {
        return match base {
            "i" => "int",
            "u" => "uint",
            "b" => "bool",
            _ => "float",
        }
        .to_string();
    }
    format!("{base}vec{n}")
}
