#![allow(dead_code)]

use crt_filter_chain::MemorySource;

/// A slang pass sampling `samplers` and writing `color` (a vec4 expression).
pub fn slang_pass(samplers: &[&str], color: &str) -> String {
    let mut fragment = String::new();
    for (i, name) in samplers.iter().enumerate() {
        fragment.push_str(&format!(
            "layout(set = 0, binding = {}) uniform sampler2D {name};\n",
            i + 2
        ));
    }
    format!(
        r#"#version 450

layout(push_constant) uniform Push {{
    vec4 SourceSize;
    vec4 OutputSize;
    uint FrameCount;
}} params;

layout(std140, set = 0, binding = 0) uniform UBO {{
    mat4 MVP;
}} global;

#pragma stage vertex
layout(location = 0) in vec4 Position;
layout(location = 1) in vec2 TexCoord;
layout(location = 0) out vec2 vTexCoord;

void main() {{
    gl_Position = global.MVP * Position;
    vTexCoord = TexCoord;
}}

#pragma stage fragment
layout(location = 0) in vec2 vTexCoord;
layout(location = 0) out vec4 FragColor;
{fragment}
void main() {{
    FragColor = {color};
}}
"#
    )
}

/// Plain pass-through of `Source`.
pub fn copy_pass() -> String {
    slang_pass(&["Source"], "texture(Source, vTexCoord)")
}

/// A pass that compiles but whose program cannot link: the fragment stage reads
/// an input no vertex output provides.
pub fn unlinkable_pass() -> String {
    copy_pass()
        .replace(
            "layout(location = 0) in vec2 vTexCoord;\nlayout(location = 0) out vec4 FragColor;",
            "layout(location = 0) in vec2 vTexCoord;\nlayout(location = 3) in vec2 vMissing;\nlayout(location = 0) out vec4 FragColor;",
        )
        .replace(
            "texture(Source, vTexCoord)",
            "texture(Source, vTexCoord + vMissing)",
        )
}

/// A pass that compiles but leaves `#error message` active in its fragment stage.
pub fn error_pass(message: &str) -> String {
    copy_pass().replace(
        "#pragma stage fragment\n",
        &format!("#pragma stage fragment\n#if 1\n#error {message}\n#endif\n"),
    )
}

/// A pass with a runtime parameter `GAIN` and a compile-time parameter `MODE`.
pub fn parameter_pass() -> String {
    r#"#version 450
#pragma parameter GAIN "Gain" 1.0 0.0 2.0 0.1
#pragma parameter MODE "Mode" 0.0 0.0 1.0 1.0

layout(push_constant) uniform Push {
    vec4 SourceSize;
    float GAIN;
    float MODE;
} params;

layout(std140, set = 0, binding = 0) uniform UBO {
    mat4 MVP;
} global;

#pragma stage vertex
layout(location = 0) in vec4 Position;
layout(location = 1) in vec2 TexCoord;
layout(location = 0) out vec2 vTexCoord;

void main() {
    gl_Position = global.MVP * Position;
    vTexCoord = TexCoord;
}

#pragma stage fragment
layout(location = 0) in vec2 vTexCoord;
layout(location = 0) out vec4 FragColor;
layout(set = 0, binding = 2) uniform sampler2D Source;

void main() {
    vec4 c = texture(Source, vTexCoord) * params.GAIN;
#if MODE == 1
    c = c.bgra;
#endif
    FragColor = c;
}
"#
    .to_string()
}

/// `shaders = N` preset text referencing `shaders/<name>.slang` for each entry.
pub fn preset_text(shaders: &[&str], extra: &str) -> String {
    let mut out = format!("shaders = {}\n", shaders.len());
    for (i, s) in shaders.iter().enumerate() {
        out.push_str(&format!("shader{i} = shaders/{s}.slang\n"));
    }
    out.push_str(extra);
    out
}

pub fn store_with(files: &[(&str, String)]) -> MemorySource {
    let store = MemorySource::new();
    for (path, text) in files {
        store.insert(path, text.as_bytes().to_vec());
    }
    store
}
