//! GLSL ES 3.00 acceptance checks standing in for a native driver compiler.
//!
//! This is not a full GLSL front end. It rejects the constructs the target
//! context is known to refuse (leftover Vulkan syntax, unsigned uniforms,
//! unresolved calls, duplicate macros, malformed statements) and checks that
//! the two stages link, returning the active interface of the program.

use std::collections::{BTreeSet, HashMap};

use log::debug;

use super::builtins::{
    LEGACY_TEXTURE_FUNCTIONS, PRECISION_QUALIFIERS, is_builtin_function, is_builtin_type,
    is_qualifier, is_reserved, is_sampler_type,
};
use super::lexer::{Token, TokenKind, find_matching, tokenize};
use super::types::ShaderStage;
use crate::error::{ChainError, ChainResult};

pub const REQUIRED_VERSION: &str = "#version 300 es";

/// Identifiers that do not exist in GLSL ES 3.00.
const REMOVED_IDENTIFIERS: &[(&str, &str)] = &[
    ("varying", "Illegal use of reserved word"),
    ("attribute", "Illegal use of reserved word"),
    ("gl_FragColor", "undeclared identifier"),
    ("gl_FragData", "undeclared identifier"),
    ("gl_VertexIndex", "undeclared identifier"),
    ("gl_InstanceIndex", "undeclared identifier"),
];

const FORBIDDEN_LAYOUT_KEYS: &[&str] = &["binding", "set", "push_constant"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterfaceVar {
    pub name: String,
    pub ty: String,
    pub array: Option<String>,
    pub location: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StageInterface {
    pub uniforms: Vec<InterfaceVar>,
    pub inputs: Vec<InterfaceVar>,
    pub outputs: Vec<InterfaceVar>,
}

/// Linked program interface as a driver would report it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProgramInterface {
    /// Non-sampler uniforms, vertex stage first.
    pub uniforms: Vec<InterfaceVar>,
    pub samplers: Vec<String>,
    pub attributes: Vec<InterfaceVar>,
    pub outputs: Vec<InterfaceVar>,
}

impl ProgramInterface {
    pub fn has_uniform(&self, name: &str) -> bool {
        self.uniforms.iter().any(|u| u.name == name)
    }
}

struct FunctionInfo<'a> {
    name: &'a Token,
    body: &'a [Token],
}

#[derive(Default)]
struct TopLevel<'a> {
    statements: Vec<&'a [Token]>,
    functions: Vec<FunctionInfo<'a>>,
}

fn stage_error(stage: ShaderStage, token: &Token, message: impl Into<String>) -> ChainError {
    ChainError::Transpile {
        stage: stage.as_str(),
        line: token.line,
        column: token.column,
        message: message.into(),
    }
}

fn stage_error_at(stage: ShaderStage, line: usize, message: impl Into<String>) -> ChainError {
    ChainError::Transpile {
        stage: stage.as_str(),
        line,
        column: 1,
        message: message.into(),
    }
}

/// Check one stage and return its interface.
pub fn validate_stage(source: &str, stage: ShaderStage) -> ChainResult<StageInterface> {
    check_version(source, stage)?;

    let tokens = tokenize(source);
    let macros = check_directives(&tokens, stage)?;
    let code: Vec<Token> = tokens
        .into_iter()
        .filter(|t| t.kind != TokenKind::Directive)
        .collect();

    check_brackets(&code, stage)?;
    check_tokens(&code, stage)?;

    let top = split_top_level(&code, stage)?;
    let interface = collect_interface(&top, stage)?;
    check_precision(&top, stage)?;
    check_global_initializers(&top, stage)?;
    check_calls(&top, &macros, stage)?;
    Ok(interface)
}

/// Check both stages, then their linkage.
pub fn validate_program(vertex: &str, fragment: &str) -> ChainResult<ProgramInterface> {
    let vs = validate_stage(vertex, ShaderStage::Vertex)?;
    let fs = validate_stage(fragment, ShaderStage::Fragment)?;
    link(vs, fs)
}

fn check_version(source: &str, stage: ShaderStage) -> ChainResult<()> {
    let first = source
        .lines()
        .enumerate()
        .find(|(_, l)| !l.trim().is_empty());
    match first {
        Some((_, line)) if line.trim() == REQUIRED_VERSION => Ok(()),
        Some((idx, line)) => Err(stage_error_at(
            stage,
            idx + 1,
            format!("expected `{REQUIRED_VERSION}` as the first line, found `{}`", line.trim()),
        )),
        None => Err(stage_error_at(stage, 1, "empty shader source")),
    }
}

/// Returns the names of every defined macro.
fn check_directives(tokens: &[Token], stage: ShaderStage) -> ChainResult<BTreeSet<String>> {
    let mut macros = BTreeSet::new();
    for t in tokens.iter().filter(|t| t.kind == TokenKind::Directive) {
        match t.directive_name() {
            Some("version") if t.line != 1 => {
                return Err(stage_error(stage, t, "#version must occur first"));
            }
            Some("error") => {
                return Err(stage_error(stage, t, format!("#error {}", t.directive_body())));
            }
            Some("include") => {
                return Err(stage_error(stage, t, "#include is not supported"));
            }
            Some("define") => {
                let body = t.directive_body();
                let end = body
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                    .unwrap_or(body.len());
                let name = &body[..end];
                if !macros.insert(name.to_string()) {
                    return Err(stage_error(
                        stage,
                        t,
                        format!("'{name}' : macro redefinition"),
                    ));
                }
            }
            _ => {}
        }
    }
    Ok(macros)
}

fn check_brackets(code: &[Token], stage: ShaderStage) -> ChainResult<()> {
    let mut stack: Vec<&Token> = Vec::new();
    for t in code.iter().filter(|t| t.kind == TokenKind::Punct) {
        let open = match t.text.as_str() {
            "(" | "[" | "{" => {
                stack.push(t);
                continue;
            }
            ")" => "(",
            "]" => "[",
            "}" => "{",
            _ => continue,
        };
        match stack.pop() {
            Some(o) if o.text == open => {}
            _ => {
                return Err(stage_error(
                    stage,
                    t,
                    format!("syntax error, unexpected '{}'", t.text),
                ));
            }
        }
    }
    match stack.pop() {
        Some(unclosed) => Err(stage_error(
            stage,
            unclosed,
            format!("unclosed '{}' at end of input", unclosed.text),
        )),
        None => Ok(()),
    }
}

fn check_tokens(code: &[Token], stage: ShaderStage) -> ChainResult<()> {
    for (i, t) in code.iter().enumerate() {
        if t.is_ident() {
            if let Some((_, why)) = REMOVED_IDENTIFIERS.iter().find(|(n, _)| *n == t.text) {
                return Err(stage_error(stage, t, format!("'{}' : {why}", t.text)));
            }
            if LEGACY_TEXTURE_FUNCTIONS.iter().any(|(old, _)| *old == t.text) {
                return Err(stage_error(
                    stage,
                    t,
                    format!("'{}' : no matching overloaded function found", t.text),
                ));
            }
            if t.text == "layout" && code.get(i + 1).is_some_and(|n| n.is_punct("(")) {
                let close = find_matching(code, i + 1).unwrap_or(code.len() - 1);
                if let Some(key) = code[i + 2..close]
                    .iter()
                    .find(|k| k.is_ident() && FORBIDDEN_LAYOUT_KEYS.contains(&k.text.as_str()))
                {
                    return Err(stage_error(
                        stage,
                        key,
                        format!("'{}' : layout qualifier requires a later GLSL ES version", key.text),
                    ));
                }
            }
        }
        if t.is_punct("=") && code.get(i + 1).is_some_and(|n| n.is_punct(";")) {
            return Err(stage_error(stage, &code[i + 1], "syntax error, unexpected ';'"));
        }
    }
    Ok(())
}

fn split_top_level<'a>(code: &'a [Token], stage: ShaderStage) -> ChainResult<TopLevel<'a>> {
    let mut top = TopLevel::default();
    let mut start = 0;
    let mut i = 0;
    while i < code.len() {
        let t = &code[i];
        if t.kind == TokenKind::Punct {
            match t.text.as_str() {
                "(" | "[" => {
                    i = find_matching(code, i)
                        .ok_or_else(|| stage_error(stage, t, "unbalanced brackets"))?
                        + 1;
                    continue;
                }
                "{" => {
                    let close = find_matching(code, i)
                        .ok_or_else(|| stage_error(stage, t, "unbalanced braces"))?;
                    if i > start && code[i - 1].is_punct(")") {
                        let header = &code[start..i];
                        let paren = header.iter().position(|h| h.is_punct("("));
                        match paren {
                            Some(p) if p > 0 && header[p - 1].is_ident() => {
                                top.functions.push(FunctionInfo {
                                    name: &header[p - 1],
                                    body: &code[i..=close],
                                });
                            }
                            _ => return Err(stage_error(stage, t, "syntax error, unexpected '{'")),
                        }
                        i = close + 1;
                        start = i;
                    } else {
                        i = close + 1;
                    }
                    continue;
                }
                ";" => {
                    if i > start {
                        top.statements.push(&code[start..i]);
                    }
                    i += 1;
                    start = i;
                    continue;
                }
                _ => {}
            }
        }
        i += 1;
    }
    if start < code.len() {
        return Err(stage_error(
            stage,
            &code[code.len() - 1],
            "syntax error, unexpected end of input",
        ));
    }
    Ok(top)
}

/// Split a declaration statement into (layout tokens, qualifiers, type, declarator tokens).
fn declaration_parts(stmt: &[Token]) -> (Option<&[Token]>, Vec<&str>, Option<&Token>, &[Token]) {
    let mut i = 0;
    let mut layout = None;
    if stmt.first().is_some_and(|t| t.is_ident_named("layout"))
        && stmt.get(1).is_some_and(|t| t.is_punct("("))
    {
        if let Some(close) = find_matching(stmt, 1) {
            layout = Some(&stmt[2..close]);
            i = close + 1;
        }
    }
    let mut qualifiers = Vec::new();
    while let Some(t) = stmt.get(i) {
        if t.is_ident() && is_qualifier(&t.text) {
            qualifiers.push(t.text.as_str());
            i += 1;
        } else {
            break;
        }
    }
    let ty = stmt.get(i).filter(|t| t.is_ident());
    let rest = if ty.is_some() { &stmt[i + 1..] } else { &stmt[i..] };
    (layout, qualifiers, ty, rest)
}

fn layout_location(layout: Option<&[Token]>) -> Option<u32> {
    let layout = layout?;
    let pos = layout.iter().position(|t| t.is_ident_named("location"))?;
    layout.get(pos + 2)?.text.parse().ok()
}

/// Declared names with their array dimension text.
fn declarators(rest: &[Token]) -> Vec<(&Token, Option<String>)> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < rest.len() {
        let t = &rest[i];
        if t.is_ident() {
            let mut array = None;
            let mut next = i + 1;
            if rest.get(next).is_some_and(|n| n.is_punct("[")) {
                if let Some(close) = find_matching(rest, next) {
                    array = Some(
                        rest[next + 1..close]
                            .iter()
                            .map(|d| d.text.as_str())
                            .collect::<String>(),
                    );
                    next = close + 1;
                }
            }
            out.push((t, array));
            // Skip an initializer up to the next top-level comma.
            let mut depth = 0i32;
            i = next;
            while i < rest.len() {
                let r = &rest[i];
                if r.is_punct("(") || r.is_punct("[") || r.is_punct("{") {
                    depth += 1;
                } else if r.is_punct(")") || r.is_punct("]") || r.is_punct("}") {
                    depth -= 1;
                } else if r.is_punct(",") && depth == 0 {
                    i += 1;
                    break;
                }
                i += 1;
            }
            continue;
        }
        i += 1;
    }
    out
}

fn collect_interface(top: &TopLevel<'_>, stage: ShaderStage) -> ChainResult<StageInterface> {
    let mut iface = StageInterface::default();
    for stmt in &top.statements {
        let (layout, qualifiers, ty, rest) = declaration_parts(stmt);
        let Some(ty) = ty else { continue };
        if ty.text == "struct" {
            continue;
        }
        let is_uniform = qualifiers.contains(&"uniform");
        let is_in = qualifiers.contains(&"in");
        let is_out = qualifiers.contains(&"out");
        if !(is_uniform || is_in || is_out) {
            continue;
        }
        if is_uniform && (ty.text == "uint" || ty.text.starts_with("uvec")) {
            return Err(stage_error(
                stage,
                ty,
                format!("'{}' : unsigned uniforms are not supported by the target", ty.text),
            ));
        }
        for (name, array) in declarators(rest) {
            let var = InterfaceVar {
                name: name.text.clone(),
                ty: ty.text.clone(),
                array,
                location: layout_location(layout),
            };
            if is_uniform {
                iface.uniforms.push(var);
            } else if is_in {
                iface.inputs.push(var);
            } else {
                iface.outputs.push(var);
            }
        }
    }
    Ok(iface)
}

fn check_precision(top: &TopLevel<'_>, stage: ShaderStage) -> ChainResult<()> {
    if stage != ShaderStage::Fragment {
        return Ok(());
    }
    let has_float_default = top.statements.iter().any(|s| {
        s.first().is_some_and(|t| t.is_ident_named("precision"))
            && s.iter().any(|t| t.is_ident_named("float"))
    });
    if has_float_default {
        return Ok(());
    }
    let line = top.statements.first().map(|s| s[0].line).unwrap_or(1);
    Err(stage_error_at(stage, line, "No precision specified for (float)"))
}

/// File-scope initializers must be constant expressions.
fn check_global_initializers(top: &TopLevel<'_>, stage: ShaderStage) -> ChainResult<()> {
    let function_names: BTreeSet<&str> =
        top.functions.iter().map(|f| f.name.text.as_str()).collect();
    let mut non_constant: BTreeSet<&str> = BTreeSet::new();

    for stmt in &top.statements {
        let (_, qualifiers, ty, rest) = declaration_parts(stmt);
        let Some(ty) = ty else { continue };
        let is_prototype =
            rest.iter().any(|t| t.is_punct("(")) && !rest.iter().any(|t| t.is_punct("="));
        if ty.text == "struct" || ty.text == "precision" || is_prototype {
            continue;
        }
        let is_const = qualifiers.contains(&"const");
        if let Some(eq) = rest.iter().position(|t| t.is_punct("=")) {
            for t in rest[eq + 1..].iter().filter(|t| t.is_ident()) {
                if non_constant.contains(t.text.as_str()) || function_names.contains(t.text.as_str())
                {
                    return Err(stage_error(
                        stage,
                        t,
                        format!(
                            "'{}' : global initializer must be a constant expression",
                            t.text
                        ),
                    ));
                }
            }
        }
        if !is_const {
            for (name, _) in declarators(rest) {
                non_constant.insert(name.text.as_str());
            }
        }
    }
    Ok(())
}

fn struct_names<'a>(top: &TopLevel<'a>) -> BTreeSet<&'a str> {
    top.statements
        .iter()
        .filter_map(|s| {
            let pos = s.iter().position(|t| t.is_ident_named("struct"))?;
            s.get(pos + 1).filter(|t| t.is_ident()).map(|t| t.text.as_str())
        })
        .collect()
}

fn prototypes<'a>(top: &TopLevel<'a>) -> BTreeSet<&'a str> {
    top.statements
        .iter()
        .filter(|s| s.last().is_some_and(|t| t.is_punct(")")) && !s.iter().any(|t| t.is_punct("=")))
        .filter_map(|s| {
            let p = s.iter().position(|t| t.is_punct("("))?;
            (p >= 2 && s[p - 1].is_ident() && s[p - 2].is_ident()).then(|| s[p - 1].text.as_str())
        })
        .collect()
}

fn check_calls(
    top: &TopLevel<'_>,
    macros: &BTreeSet<String>,
    stage: ShaderStage,
) -> ChainResult<()> {
    let mut defined: HashMap<&str, usize> = HashMap::new();
    for f in &top.functions {
        *defined.entry(f.name.text.as_str()).or_default() += 1;
    }
    match defined.get("main") {
        None => {
            return Err(ChainError::Link {
                message: format!("missing main() in {} shader", stage.as_str()),
            });
        }
        Some(&n) if n > 1 => {
            let second = top
                .functions
                .iter()
                .filter(|f| f.name.text == "main")
                .nth(1)
                .map(|f| f.name);
            if let Some(t) = second {
                return Err(stage_error(stage, t, "'main' : function already has a body"));
            }
        }
        _ => {}
    }

    let structs = struct_names(top);
    let declared_only = prototypes(top);

    for f in &top.functions {
        let body = f.body;
        for (i, t) in body.iter().enumerate() {
            if !t.is_ident() || !body.get(i + 1).is_some_and(|n| n.is_punct("(")) {
                continue;
            }
            if i > 0 && body[i - 1].is_punct(".") {
                continue;
            }
            let name = t.text.as_str();
            let known = is_builtin_function(name)
                || is_builtin_type(name)
                || is_reserved(name)
                || PRECISION_QUALIFIERS.contains(&name)
                || structs.contains(name)
                || defined.contains_key(name)
                || macros.contains(name);
            if known {
                continue;
            }
            if declared_only.contains(name) {
                return Err(ChainError::Link {
                    message: format!(
                        "{} shader: function '{name}' is declared but never defined",
                        stage.as_str()
                    ),
                });
            }
            return Err(stage_error(
                stage,
                t,
                format!("'{name}' : no matching overloaded function found"),
            ));
        }
    }
    Ok(())
}

fn link(vs: StageInterface, fs: StageInterface) -> ChainResult<ProgramInterface> {
    for input in &fs.inputs {
        match vs.outputs.iter().find(|o| o.name == input.name) {
            None => {
                return Err(ChainError::Link {
                    message: format!(
                        "fragment input '{}' has no matching vertex output",
                        input.name
                    ),
                });
            }
            Some(out) if out.ty != input.ty || out.array != input.array => {
                return Err(ChainError::Link {
                    message: format!(
                        "'{}' declared as {} in the vertex shader and {} in the fragment shader",
                        input.name, out.ty, input.ty
                    ),
                });
            }
            Some(_) => {}
        }
    }
    if fs.outputs.is_empty() {
        return Err(ChainError::Link {
            message: "fragment shader declares no output".to_string(),
        });
    }

    let mut program = ProgramInterface {
        attributes: vs.inputs,
        outputs: fs.outputs,
        ..Default::default()
    };
    for u in vs.uniforms.into_iter().chain(fs.uniforms) {
        if is_sampler_type(&u.ty) {
            if !program.samplers.contains(&u.name) {
                program.samplers.push(u.name);
            }
            continue;
        }
        match program.uniforms.iter().find(|p| p.name == u.name) {
            Some(existing) if existing.ty != u.ty => {
                return Err(ChainError::Link {
                    message: format!(
                        "uniform '{}' declared as {} and {}",
                        u.name, existing.ty, u.ty
                    ),
                });
            }
            Some(_) => {}
            None => program.uniforms.push(u),
        }
    }
    debug!(
        "[validate] linked: {} uniforms, {} samplers",
        program.uniforms.len(),
        program.samplers.len()
    );
    Ok(program)
}

/// Numbered source listing for diagnostics, `mark` (1-based) flagged with `>`.
pub fn format_listing(source: &str, mark: Option<usize>) -> String {
    let mut output = String::new();
    output.push_str("---\n");
    for (line_num, line) in source.lines().enumerate() {
        let flag = if mark == Some(line_num + 1) { '>' } else { ' ' };
        output.push_str(&format!("{flag}{:4} | {}\n", line_num + 1, line));
    }
    output.push_str("---\n");
    output
}

#[cfg(test)]
mod tests {
    use super::*;

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
precision highp int;
precision highp sampler2D;
in vec2 vTexCoord;
layout(location = 0) out vec4 FragColor;
uniform sampler2D Source;
uniform float FrameCount;
vec3 tone(vec3 c) {
    return c * 0.5;
}
void main() {
    FragColor = vec4(tone(texture(Source, vTexCoord).rgb), 1.0);
}
";

    fn expect_transpile(result: ChainResult<StageInterface>) -> (usize, usize, String) {
        match result {
            Err(ChainError::Transpile {
                line,
                column,
                message,
                ..
            }) => (line, column, message),
            other => panic!("expected a transpile error, got {other:?}"),
        }
    }

    #[test]
    fn accepts_well_formed_program() {
        let iface = validate_program(VS, FS).unwrap();
        assert!(iface.has_uniform("MVP"));
        assert!(iface.has_uniform("FrameCount"));
        assert_eq!(iface.samplers, vec!["Source".to_string()]);
        assert_eq!(iface.attributes[1].location, Some(1));
        assert_eq!(iface.outputs[0].name, "FragColor");
    }

    #[test]
    fn rejects_missing_version() {
        let (line, _, msg) = expect_transpile(validate_stage(
            "precision highp float;\nvoid main() {}\n",
            ShaderStage::Vertex,
        ));
        assert_eq!(line, 1);
        assert!(msg.contains("#version 300 es"));
    }

    #[test]
    fn reports_undefined_function_position() {
        let src = FS.replace("tone(texture", "grade(texture");
        let (line, column, msg) = expect_transpile(validate_stage(&src, ShaderStage::Fragment));
        assert_eq!(line, 13);
        assert_eq!(column, 22);
        assert!(msg.contains("'grade'"));
    }

    #[test]
    fn rejects_vulkan_leftovers() {
        let src = FS.replace("uniform sampler2D Source;", "layout(set = 0, binding = 2) uniform sampler2D Source;");
        let (_, _, msg) = expect_transpile(validate_stage(&src, ShaderStage::Fragment));
        assert!(msg.contains("'set'"));

        let src = FS.replace("FragColor = vec4", "gl_FragColor = vec4");
        let (_, _, msg) = expect_transpile(validate_stage(&src, ShaderStage::Fragment));
        assert!(msg.contains("gl_FragColor"));
    }

    #[test]
    fn rejects_unsigned_uniforms_and_duplicate_macros() {
        let src = FS.replace("uniform float FrameCount;", "uniform uint FrameCount;");
        let (line, _, _) = expect_transpile(validate_stage(&src, ShaderStage::Fragment));
        assert_eq!(line, 8);

        let src = FS.replace(
            "precision highp int;",
            "#define MODE 1\n#define MODE 2",
        );
        let (line, _, msg) = expect_transpile(validate_stage(&src, ShaderStage::Fragment));
        assert_eq!(line, 4);
        assert!(msg.contains("redefinition"));
    }

    #[test]
    fn rejects_error_directive_and_empty_assignment() {
        let src = FS.replace("precision highp int;", "#error shader is broken");
        let (line, _, _) = expect_transpile(validate_stage(&src, ShaderStage::Fragment));
        assert_eq!(line, 3);

        let src = FS.replace("return c * 0.5;", "float k = ;\n    return c * k;");
        let (_, _, msg) = expect_transpile(validate_stage(&src, ShaderStage::Fragment));
        assert!(msg.contains("unexpected ';'"));
    }

    #[test]
    fn rejects_unbalanced_brackets() {
        let src = FS.replace("return c * 0.5;", "return (c * 0.5;");
        assert!(validate_stage(&src, ShaderStage::Fragment).is_err());
    }

    #[test]
    fn rejects_non_constant_global_initializer() {
        let src = FS.replace(
            "vec3 tone(vec3 c) {",
            "float gain = FrameCount * 2.0;\nvec3 tone(vec3 c) {",
        );
        let (_, _, msg) = expect_transpile(validate_stage(&src, ShaderStage::Fragment));
        assert!(msg.contains("'FrameCount'"));

        let src = FS.replace(
            "vec3 tone(vec3 c) {",
            "const float gain = 2.0;\nfloat bias = gain * 0.5;\nvec3 tone(vec3 c) {",
        );
        assert!(validate_stage(&src, ShaderStage::Fragment).is_ok());
    }

    #[test]
    fn fragment_needs_float_precision() {
        let src = FS.replace("precision highp float;\n", "");
        let (_, _, msg) = expect_transpile(validate_stage(&src, ShaderStage::Fragment));
        assert!(msg.contains("precision"));
    }

    #[test]
    fn link_checks_varyings_and_main() {
        let fs = FS.replace("in vec2 vTexCoord;", "in vec2 vUv;").replace("vTexCoord)", "vUv)");
        assert!(matches!(
            validate_program(VS, &fs),
            Err(ChainError::Link { .. })
        ));

        let vs = VS.replace("void main()", "void start()");
        assert!(matches!(
            validate_stage(&vs, ShaderStage::Vertex),
            Err(ChainError::Link { .. })
        ));
    }

    #[test]
    fn listing_numbers_lines() {
        let listing = format_listing("a\nb", Some(2));
        assert!(listing.contains("    1 | a\n"));
        assert!(listing.contains(">   2 | b\n"));
    }
}
