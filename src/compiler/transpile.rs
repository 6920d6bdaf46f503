//! GLSL ES 3.00 emission.
//!
//! Each stage is emitted as: version header, precision statements, `#error`s, macros,
//! structs, uniforms and stage interface, stubs, then globals/prototypes/functions in
//! source order. Token rewrites are applied to every piece of code on the way out.

use std::collections::{HashMap, HashSet};

use log::debug;

use super::builtins::{LEGACY_TEXTURE_FUNCTIONS, is_sampler_type, square_matrix_name};
use super::extract::{BodyItem, Declaration, GlobalItem, StageProgram};
use super::lexer::{Token, TokenKind, find_matching, format_block, join_tokens, split_top_level_commas, tokenize};
use super::preprocess::{MacroDef, MacroTable};
use super::stubs::Stub;
use super::types::{FunctionSignature, GlobalKind, ShaderStage, UniformDecl};

pub const VERSION_HEADER: &str = "#version 300 es";
pub const FRAG_COLOR_NAME: &str = "crt_FragColor";

const PRECISION_STATEMENTS: &[&str] = &[
    "precision highp float;",
    "precision highp int;",
    "precision highp sampler2D;",
];

const BUILTIN_RENAMES: &[(&str, &str)] = &[
    ("gl_VertexIndex", "gl_VertexID"),
    ("gl_InstanceIndex", "gl_InstanceID"),
];

#[derive(Clone, Debug, Default)]
pub struct TranspileOptions {
    /// Compile-time parameter definitions, emitted ahead of the shader's own macros.
    pub compile_time: Vec<MacroDef>,
    pub stubs: Vec<Stub>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Transpiled {
    pub vertex_source: String,
    pub fragment_source: String,
    pub uniforms: Vec<UniformDecl>,
    pub samplers: Vec<String>,
}

pub fn narrow_type(ty: &str) -> String {
    square_matrix_name(ty).unwrap_or(ty).to_string()
}

/// Token rewriter for one stage.
#[derive(Debug, Default)]
pub struct Rewriter {
    /// Uniform block instance names; `inst.member` becomes `member`.
    pub instances: HashSet<String>,
    /// Uniforms lowered from `uint` to `float`; uses become `uint(NAME)`.
    pub uint_uniforms: HashSet<String>,
    pub renames: HashMap<String, String>,
    pub macros: MacroTable,
}

impl Rewriter {
    pub fn rewrite(&self, tokens: &[Token]) -> Vec<Token> {
        fix_texture_arity(&self.rewrite_names(tokens))
    }

    fn rewrite_names(&self, tokens: &[Token]) -> Vec<Token> {
        let mut out: Vec<Token> = Vec::with_capacity(tokens.len());
        let mut i = 0;
        while i < tokens.len() {
            let t = &tokens[i];
            let after_dot = out.last().is_some_and(|p| p.is_punct("."));
            if t.is_ident() && !after_dot {
                if self.instances.contains(&t.text)
                    && tokens.get(i + 1).is_some_and(|n| n.is_punct("."))
                    && tokens.get(i + 2).is_some_and(Token::is_ident)
                {
                    i += 2;
                    continue;
                }
                if let Some(square) = square_matrix_name(&t.text) {
                    out.push(renamed(t, square));
                    i += 1;
                    continue;
                }
                let called = tokens.get(i + 1).is_some_and(|n| n.is_punct("("));
                if let Some((_, modern)) = LEGACY_TEXTURE_FUNCTIONS.iter().find(|(old, _)| *old == t.text) {
                    if called {
                        out.push(renamed(t, modern));
                        i += 1;
                        continue;
                    }
                }
                if let Some(new_name) = self.renames.get(&t.text) {
                    out.push(renamed(t, new_name));
                    i += 1;
                    continue;
                }
                if self.uint_uniforms.contains(&t.text) && !is_wrapped(&out, tokens.get(i + 1)) {
                    out.push(renamed(t, "uint"));
                    out.push(Token::new(TokenKind::Punct, "(", t.line, t.column));
                    out.push(t.clone());
                    out.push(Token::new(TokenKind::Punct, ")", t.line, t.column));
                    i += 1;
                    continue;
                }
            }
            if t.is_punct("[")
                && tokens.get(i + 2).is_some_and(|c| c.is_punct("]"))
            {
                if let Some(literal) = tokens
                    .get(i + 1)
                    .filter(|d| d.is_ident())
                    .and_then(|d| self.macros.literal_value(&d.text))
                {
                    out.push(t.clone());
                    out.push(Token::new(TokenKind::Number, literal, tokens[i + 1].line, tokens[i + 1].column));
                    out.push(tokens[i + 2].clone());
                    i += 3;
                    continue;
                }
            }
            out.push(t.clone());
            i += 1;
        }
        out
    }

    fn rewrite_text(&self, text: &str) -> String {
        join_tokens(&self.rewrite(&tokenize(text)))
    }

    /// Array dimension text; a macro name becomes its literal value.
    pub fn dimension(&self, dim: &[Token]) -> String {
        match dim {
            [d] if d.is_ident() => self
                .macros
                .literal_value(&d.text)
                .unwrap_or_else(|| d.text.clone()),
            _ => join_tokens(&self.rewrite(dim)),
        }
    }
}

fn renamed(t: &Token, text: &str) -> Token {
    Token::new(t.kind, text, t.line, t.column)
}

fn is_wrapped(out: &[Token], next: Option<&Token>) -> bool {
    let n = out.len();
    n >= 2
        && out[n - 1].is_punct("(")
        && out[n - 2].is_ident_named("uint")
        && next.is_some_and(|t| t.is_punct(")"))
}

/// `texture(s, uv, bias)` → `texture(s, uv)`, recursively.
pub fn fix_texture_arity(tokens: &[Token]) -> Vec<Token> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut i = 0;
    while i < tokens.len() {
        let t = &tokens[i];
        let after_dot = out.last().is_some_and(|p: &Token| p.is_punct("."));
        if t.is_ident_named("texture") && !after_dot && tokens.get(i + 1).is_some_and(|n| n.is_punct("(")) {
            if let Some(close) = find_matching(tokens, i + 1) {
                let args = split_top_level_commas(&tokens[i + 2..close]);
                if args.len() == 3 {
                    debug!("[transpile] line {}: dropping texture() bias argument", t.line);
                    out.push(t.clone());
                    out.push(tokens[i + 1].clone());
                    out.extend(fix_texture_arity(args[0]));
                    out.push(Token::new(TokenKind::Punct, ",", t.line, t.column));
                    out.extend(fix_texture_arity(args[1]));
                    out.push(tokens[close].clone());
                    i = close + 1;
                    continue;
                }
            }
        }
        out.push(t.clone());
        i += 1;
    }
    out
}

fn layout_location(d: &Declaration) -> Option<String> {
    d.location().map(|loc| format!("layout(location = {loc}) "))
}

fn array_suffix(rw: &Rewriter, array: Option<&Vec<Token>>) -> String {
    match array {
        Some(dim) => format!("[{}]", rw.dimension(dim)),
        None => String::new(),
    }
}

/// Interpolation/precision qualifiers kept on stage interface declarations.
fn interface_qualifiers(d: &Declaration) -> String {
    let kept: Vec<&str> = d
        .qualifiers
        .iter()
        .map(String::as_str)
        .filter(|q| {
            matches!(
                *q,
                "flat" | "smooth" | "centroid" | "invariant" | "highp" | "mediump" | "lowp"
            )
        })
        .collect();
    if kept.is_empty() {
        String::new()
    } else {
        format!("{} ", kept.join(" "))
    }
}

struct StageEmitter<'a> {
    stage: ShaderStage,
    program: &'a StageProgram,
    options: &'a TranspileOptions,
    compile_time: HashSet<&'a str>,
    rewriter: Rewriter,
    uniforms: Vec<UniformDecl>,
    samplers: Vec<String>,
    declared: HashSet<String>,
    /// Output declared in place of `gl_FragColor`.
    frag_color_output: Option<String>,
}

impl<'a> StageEmitter<'a> {
    fn new(
        stage: ShaderStage,
        program: &'a StageProgram,
        options: &'a TranspileOptions,
        renames: HashMap<String, String>,
    ) -> Self {
        let mut macros = MacroTable::new();
        for m in options.compile_time.iter().chain(&program.macros) {
            macros.define(m.clone());
        }
        let compile_time: HashSet<&str> = options.compile_time.iter().map(|m| m.name.as_str()).collect();
        let mut uint_uniforms = HashSet::new();
        let mut instances = HashSet::new();
        for b in &program.blocks {
            instances.extend(b.instance.clone());
            for m in &b.members {
                if m.ty == "uint" {
                    uint_uniforms.extend(m.names().map(str::to_string));
                }
            }
        }
        for d in &program.uniforms {
            if d.ty == "uint" {
                uint_uniforms.extend(d.names().map(str::to_string));
            }
        }
        uint_uniforms.retain(|n| !compile_time.contains(n.as_str()));
        let mut renames = renames;
        for (from, to) in BUILTIN_RENAMES {
            renames.insert(from.to_string(), to.to_string());
        }
        Self {
            stage,
            program,
            options,
            compile_time,
            rewriter: Rewriter {
                instances,
                uint_uniforms,
                renames,
                macros,
            },
            uniforms: Vec::new(),
            samplers: Vec::new(),
            declared: HashSet::new(),
            frag_color_output: None,
        }
    }

    fn emit(&mut self) -> String {
        if self.stage == ShaderStage::Fragment && self.uses_frag_color() {
            self.route_frag_color();
        }
        let mut sections: Vec<String> = Vec::new();
        let mut header = String::from(VERSION_HEADER);
        header.push('\n');
        for p in PRECISION_STATEMENTS {
            header.push_str(p);
            header.push('\n');
        }
        for e in &self.program.errors {
            header.push_str(&format!("#{}\n", e.text));
        }
        sections.push(header);
        sections.push(self.emit_macros());
        sections.push(self.emit_structs());
        sections.push(self.emit_uniforms());
        sections.push(self.emit_interface());
        sections.push(self.emit_stubs());
        sections.push(self.emit_body());
        let mut out = String::new();
        for s in sections.into_iter().filter(|s| !s.is_empty()) {
            out.push_str(&s);
            out.push('\n');
        }
        out
    }

    fn emit_macros(&self) -> String {
        let mut out = String::new();
        for m in &self.options.compile_time {
            out.push_str(&m.to_directive());
            out.push('\n');
        }
        for m in &self.program.macros {
            if self.compile_time.contains(m.name.as_str()) {
                continue;
            }
            let body = self.rewriter.rewrite_text(&m.body);
            if m.params.is_none() && body == m.name {
                debug!(
                    "[transpile] {}: `{}` now names its flattened uniform; macro dropped",
                    self.stage.as_str(),
                    m.name
                );
                continue;
            }
            let def = MacroDef {
                body,
                ..m.clone()
            };
            out.push_str(&def.to_directive());
            out.push('\n');
        }
        out
    }

    fn emit_structs(&self) -> String {
        let mut out = String::new();
        for s in &self.program.structs {
            out.push_str(&format_block(&self.rewriter.rewrite(&s.tokens), 0));
        }
        out
    }

    fn push_uniform(&mut self, d: &Declaration, out: &mut String) {
        for x in &d.declarators {
            if self.compile_time.contains(x.name.as_str()) || !self.declared.insert(x.name.clone()) {
                continue;
            }
            let array = array_suffix(&self.rewriter, x.array.as_ref());
            let precision = d.precision().map(|p| format!("{p} ")).unwrap_or_default();
            if is_sampler_type(&d.ty) {
                out.push_str(&format!("uniform {precision}{} {}{array};\n", d.ty, x.name));
                self.samplers.push(x.name.clone());
                continue;
            }
            let ty = if d.ty == "uint" { "float".to_string() } else { narrow_type(&d.ty) };
            out.push_str(&format!("uniform {precision}{ty} {}{array};\n", x.name));
            self.uniforms.push(UniformDecl {
                name: x.name.clone(),
                ty,
                source_ty: d.ty.clone(),
                array: x.array.as_deref().map(join_tokens),
            });
        }
    }

    fn emit_uniforms(&mut self) -> String {
        let mut out = String::new();
        let program = self.program;
        for b in &program.blocks {
            for m in &b.members {
                self.push_uniform(m, &mut out);
            }
        }
        for d in &program.uniforms {
            self.push_uniform(d, &mut out);
        }
        out
    }

    fn uses_frag_color(&self) -> bool {
        let in_tokens = |tokens: &[Token]| tokens.iter().any(|t| t.is_ident_named("gl_FragColor"));
        self.program.body.iter().any(|b| match b {
            BodyItem::Function(f) => in_tokens(&f.body),
            BodyItem::Global(g) => g.init.as_deref().is_some_and(in_tokens),
            BodyItem::Raw(tokens) => in_tokens(tokens),
            BodyItem::Prototype(_) => false,
        }) || self
            .program
            .macros
            .iter()
            .any(|m| in_tokens(&tokenize(&m.body)))
    }

    fn route_frag_color(&mut self) {
        let program = self.program;
        let target = match program.outputs.first().and_then(|d| d.declarators.first()) {
            Some(existing) => existing.name.clone(),
            None => {
                self.frag_color_output = Some(FRAG_COLOR_NAME.to_string());
                FRAG_COLOR_NAME.to_string()
            }
        };
        self.rewriter.renames.insert("gl_FragColor".to_string(), target);
    }

    fn emit_interface(&mut self) -> String {
        let program = self.program;
        let mut out = String::new();
        let vertex = self.stage == ShaderStage::Vertex;
        for d in &program.inputs {
            let layout = if vertex { layout_location(d).unwrap_or_default() } else { String::new() };
            self.push_interface(&mut out, d, &layout, "in");
        }
        for d in &program.outputs {
            let layout = if vertex { String::new() } else { layout_location(d).unwrap_or_default() };
            self.push_interface(&mut out, d, &layout, "out");
        }
        if let Some(name) = &self.frag_color_output {
            out.push_str(&format!("out vec4 {name};\n"));
        }
        out
    }

    fn push_interface(&mut self, out: &mut String, d: &Declaration, layout: &str, keyword: &str) {
        let quals = interface_qualifiers(d);
        let ty = narrow_type(&d.ty);
        for x in &d.declarators {
            let name = self.rewriter.renames.get(&x.name).cloned().unwrap_or_else(|| x.name.clone());
            if !self.declared.insert(name.clone()) {
                continue;
            }
            let array = array_suffix(&self.rewriter, x.array.as_ref());
            out.push_str(&format!("{layout}{keyword} {quals}{ty} {name}{array};\n"));
        }
    }

    fn emit_stubs(&self) -> String {
        let defined: HashSet<String> = self.program.functions().map(|f| f.signature.key()).collect();
        let mut out = String::new();
        for stub in &self.options.stubs {
            if defined.contains(&stub.signature.key()) {
                continue;
            }
            out.push_str(&stub.render());
        }
        out
    }

    fn render_signature(&self, sig: &FunctionSignature) -> String {
        let mut sig = sig.clone();
        sig.return_type = sig
            .return_type
            .split_whitespace()
            .map(narrow_type)
            .collect::<Vec<_>>()
            .join(" ");
        for p in &mut sig.params {
            p.ty = narrow_type(&p.ty);
            if let Some(dim) = &p.array {
                p.array = Some(self.rewriter.dimension(&tokenize(dim)));
            }
        }
        sig.render()
    }

    fn emit_global(&self, g: &GlobalItem) -> String {
        let mut s = String::new();
        if g.decl.is_const {
            s.push_str("const ");
        }
        if let Some(p) = &g.precision {
            s.push_str(p);
            s.push(' ');
        }
        s.push_str(&narrow_type(&g.decl.ty));
        s.push(' ');
        s.push_str(&g.decl.name);
        s.push_str(&array_suffix(&self.rewriter, g.array.as_ref()));
        if g.decl.kind == GlobalKind::Constant {
            if let Some(init) = &g.init {
                s.push_str(" = ");
                s.push_str(&join_tokens(&self.rewriter.rewrite(init)));
            }
        }
        s.push_str(";\n");
        s
    }

    /// `name = init;` for every dynamic global that has an initializer.
    fn injected_initializers(&self) -> Vec<Token> {
        let mut tokens = Vec::new();
        for g in self.program.dynamic_globals() {
            let Some(init) = &g.init else { continue };
            tokens.push(Token::new(TokenKind::Ident, g.decl.name.clone(), g.line, 0));
            tokens.push(Token::new(TokenKind::Punct, "=", g.line, 0));
            tokens.extend(self.rewriter.rewrite(init));
            tokens.push(Token::new(TokenKind::Punct, ";", g.line, 0));
        }
        tokens
    }

    fn emit_body(&self) -> String {
        let mut out = String::new();
        for item in &self.program.body {
            match item {
                BodyItem::Global(g) => out.push_str(&self.emit_global(g)),
                BodyItem::Prototype(p) => {
                    out.push_str(&self.render_signature(p));
                    out.push_str(";\n");
                }
                BodyItem::Function(f) => {
                    let mut body = self.rewriter.rewrite(&f.body);
                    if f.signature.name == "main" && f.signature.params.is_empty() {
                        let inject = self.injected_initializers();
                        body.splice(1..1, inject);
                    }
                    out.push('\n');
                    out.push_str(&self.render_signature(&f.signature));
                    out.push('\n');
                    out.push_str(&format_block(&body, 0));
                }
                BodyItem::Raw(tokens) => {
                    out.push_str(&join_tokens(&self.rewriter.rewrite(tokens)));
                    out.push('\n');
                }
            }
        }
        out
    }
}

/// Fragment inputs renamed to match the vertex output at the same location.
fn location_renames(vertex: &StageProgram, fragment: &StageProgram) -> HashMap<String, String> {
    let mut by_location: HashMap<u32, &str> = HashMap::new();
    for d in &vertex.outputs {
        if let (Some(loc), Some(x)) = (d.location(), d.declarators.first()) {
            by_location.insert(loc, x.name.as_str());
        }
    }
    let mut renames = HashMap::new();
    for d in &fragment.inputs {
        if let (Some(loc), Some(x)) = (d.location(), d.declarators.first()) {
            if let Some(&vertex_name) = by_location.get(&loc) {
                if vertex_name != x.name {
                    debug!(
                        "[transpile] fragment input `{}` renamed to `{vertex_name}` (location {loc})",
                        x.name
                    );
                    renames.insert(x.name.clone(), vertex_name.to_string());
                }
            }
        }
    }
    renames
}

pub fn transpile(vertex: &StageProgram, fragment: &StageProgram, options: &TranspileOptions) -> Transpiled {
    let mut v = StageEmitter::new(ShaderStage::Vertex, vertex, options, HashMap::new());
    let vertex_source = v.emit();
    let mut f = StageEmitter::new(
        ShaderStage::Fragment,
        fragment,
        options,
        location_renames(vertex, fragment),
    );
    let fragment_source = f.emit();

    let mut uniforms = v.uniforms;
    for u in f.uniforms {
        if !uniforms.iter().any(|x| x.name == u.name) {
            uniforms.push(u);
        }
    }
    let mut samplers = v.samplers;
    for s in f.samplers {
        if !samplers.contains(&s) {
            samplers.push(s);
        }
    }
    Transpiled {
        vertex_source,
        fragment_source,
        uniforms,
        samplers,
    }
}
