//! Per-stage preprocessing of a merged shader unit.
//!
//! The unit is split at `#pragma stage` markers (or, for legacy sources, compiled
//! once per stage with `VERTEX`/`FRAGMENT` predefined), conditionals are resolved,
//! and `#define`s are collected into a [`MacroTable`] where the first definition of
//! a name wins and later ones are dropped.

use std::collections::{BTreeSet, HashMap};

use log::{debug, warn};

use super::lexer::{Token, TokenKind, tokenize};
use super::types::ShaderStage;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MacroDef {
    pub name: String,
    /// `Some` for function-like macros.
    pub params: Option<Vec<String>>,
    pub body: String,
    pub line: usize,
}

impl MacroDef {
    pub fn object(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: None,
            body: body.into(),
            line: 0,
        }
    }

    /// Parse the text following `#define`.
    pub fn parse(body: &str, line: usize) -> Option<Self> {
        let body = body.trim_start();
        let name_end = body
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(body.len());
        let name = &body[..name_end];
        if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
            return None;
        }
        let rest = &body[name_end..];
        if let Some(after_paren) = rest.strip_prefix('(') {
            let close = after_paren.find(')')?;
            let params = after_paren[..close]
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
            return Some(Self {
                name: name.to_string(),
                params: Some(params),
                body: after_paren[close + 1..].trim().to_string(),
                line,
            });
        }
        Some(Self {
            name: name.to_string(),
            params: None,
            body: rest.trim().to_string(),
            line,
        })
    }

    pub fn to_directive(&self) -> String {
        let head = match &self.params {
            Some(params) => format!("{}({})", self.name, params.join(", ")),
            None => self.name.clone(),
        };
        if self.body.is_empty() {
            format!("#define {head}")
        } else {
            format!("#define {head} {}", self.body)
        }
    }
}

/// Ordered macro set with first-definition-wins semantics.
#[derive(Clone, Debug, Default)]
pub struct MacroTable {
    defs: Vec<MacroDef>,
    index: HashMap<String, usize>,
}

impl MacroTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` (and keeps the existing definition) for a duplicate name.
    pub fn define(&mut self, def: MacroDef) -> bool {
        if self.index.contains_key(&def.name) {
            return false;
        }
        self.index.insert(def.name.clone(), self.defs.len());
        self.defs.push(def);
        true
    }

    pub fn get(&self, name: &str) -> Option<&MacroDef> {
        self.index.get(name).map(|&i| &self.defs[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MacroDef> {
        self.defs.iter()
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Numeric literal an object-like macro expands to, following macro chains.
    pub fn literal_value(&self, name: &str) -> Option<String> {
        let mut current = name.to_string();
        for _ in 0..16 {
            let def = self.get(&current)?;
            if def.params.is_some() {
                return None;
            }
            let body = strip_outer_parens(def.body.trim());
            if is_numeric_literal(body) {
                return Some(body.to_string());
            }
            if body.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') && !body.is_empty() {
                current = body.to_string();
                continue;
            }
            return None;
        }
        None
    }
}

fn strip_outer_parens(s: &str) -> &str {
    let mut s = s;
    while s.starts_with('(') && s.ends_with(')') && s.len() >= 2 {
        s = s[1..s.len() - 1].trim();
    }
    s
}

pub fn is_numeric_literal(s: &str) -> bool {
    parse_number(s).is_some()
}

/// Parse a GLSL numeric literal (suffixes `u`/`f` allowed, hex integers allowed).
pub fn parse_number(s: &str) -> Option<f64> {
    let s = s.trim();
    let s = s.strip_prefix('+').unwrap_or(s);
    let (neg, s) = match s.strip_prefix('-') {
        Some(rest) => (true, rest.trim_start()),
        None => (false, s),
    };
    let value = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        let hex = hex.trim_end_matches(['u', 'U']);
        i64::from_str_radix(hex, 16).ok()? as f64
    } else {
        let trimmed = s.trim_end_matches(['u', 'U', 'f', 'F', 'l', 'L']);
        if trimmed.is_empty() || !trimmed.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
            return None;
        }
        trimmed.parse::<f64>().ok()?
    };
    Some(if neg { -value } else { value })
}

#[derive(Clone, Debug, PartialEq)]
pub struct Pragma {
    pub name: String,
    pub args: String,
    pub line: usize,
}

/// Result of preprocessing one stage.
#[derive(Clone, Debug, Default)]
pub struct StageSource {
    pub tokens: Vec<Token>,
    /// Macros defined by the shader itself, first definition wins.
    pub macros: MacroTable,
    /// `#error` directives that survived conditional evaluation.
    pub errors: Vec<Token>,
    pub pragmas: Vec<Pragma>,
    /// Constant globals whose values were consulted by `#if` expressions.
    pub sentinels_used: BTreeSet<String>,
    pub dropped_duplicate_defines: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct PreprocessOptions {
    /// Definitions that take precedence over any `#define` in the source and are
    /// not emitted with the user macros (stage markers, compile-time parameters).
    pub predefined: MacroTable,
    /// Literal values of `const` scalar globals, consulted when a conditional names
    /// an identifier that is not a macro.
    pub sentinel_values: HashMap<String, String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Section {
    Shared,
    Vertex,
    Fragment,
}

struct CondFrame {
    parent_active: bool,
    active: bool,
    taken: bool,
}

/// True when the unit separates stages with `#pragma stage`.
pub fn has_stage_pragmas(tokens: &[Token]) -> bool {
    tokens.iter().any(|t| {
        t.directive_name() == Some("pragma")
            && t.directive_body().split_whitespace().next() == Some("stage")
    })
}

pub fn preprocess_stage(tokens: &[Token], stage: ShaderStage, options: &PreprocessOptions) -> StageSource {
    let mut out = StageSource::default();
    let mut section = Section::Shared;
    let mut conds: Vec<CondFrame> = Vec::new();

    let wanted = match stage {
        ShaderStage::Vertex => Section::Vertex,
        ShaderStage::Fragment => Section::Fragment,
    };

    for tok in tokens {
        let cond_active = conds.last().is_none_or(|f| f.active);
        let in_section = section == Section::Shared || section == wanted;

        if tok.kind != TokenKind::Directive {
            if cond_active && in_section {
                out.tokens.push(tok.clone());
            }
            continue;
        }

        let name = tok.directive_name().unwrap_or_default();
        let body = tok.directive_body();
        match name {
            "if" | "ifdef" | "ifndef" => {
                let active = if cond_active {
                    evaluate_directive(name, body, tok.line, &out, options)
                } else {
                    false
                };
                if cond_active && name == "if" {
                    record_sentinels(body, &out.macros, options, &mut out.sentinels_used);
                }
                conds.push(CondFrame {
                    parent_active: cond_active,
                    active: cond_active && active,
                    taken: active,
                });
            }
            "elif" => {
                let Some(frame) = conds.last() else {
                    warn!("[preprocess] line {}: #elif without #if", tok.line);
                    continue;
                };
                let (parent_active, taken) = (frame.parent_active, frame.taken);
                let evaluated = parent_active && !taken;
                let active = evaluated && evaluate_directive("if", body, tok.line, &out, options);
                if evaluated {
                    record_sentinels(body, &out.macros, options, &mut out.sentinels_used);
                }
                if let Some(frame) = conds.last_mut() {
                    frame.active = active;
                    frame.taken = taken || active;
                }
            }
            "else" => {
                let Some(frame) = conds.last_mut() else {
                    warn!("[preprocess] line {}: #else without #if", tok.line);
                    continue;
                };
                frame.active = frame.parent_active && !frame.taken;
                frame.taken = true;
            }
            "endif" => {
                if conds.pop().is_none() {
                    warn!("[preprocess] line {}: #endif without #if", tok.line);
                }
            }
            _ if !cond_active => {}
            "pragma" => {
                let mut parts = body.splitn(2, char::is_whitespace);
                let pragma_name = parts.next().unwrap_or_default().to_string();
                let args = parts.next().unwrap_or_default().trim().to_string();
                if pragma_name == "stage" {
                    section = match args.as_str() {
                        "vertex" => Section::Vertex,
                        "fragment" => Section::Fragment,
                        other => {
                            warn!("[preprocess] line {}: unknown stage `{other}`", tok.line);
                            section
                        }
                    };
                } else if in_section {
                    out.pragmas.push(Pragma {
                        name: pragma_name,
                        args,
                        line: tok.line,
                    });
                }
            }
            _ if !in_section => {}
            "define" => {
                let Some(def) = MacroDef::parse(body, tok.line) else {
                    warn!("[preprocess] line {}: malformed #define", tok.line);
                    continue;
                };
                if options.predefined.contains(&def.name) {
                    debug!(
                        "[preprocess] line {}: `{}` is predefined, source definition dropped",
                        tok.line, def.name
                    );
                    continue;
                }
                let name = def.name.clone();
                if !out.macros.define(def) {
                    debug!(
                        "[preprocess] line {}: duplicate #define `{name}` dropped",
                        tok.line
                    );
                    out.dropped_duplicate_defines.push(name);
                }
            }
            "undef" => {
                debug!(
                    "[preprocess] line {}: #undef {} ignored (first definition is kept)",
                    tok.line, body
                );
            }
            "error" => out.errors.push(tok.clone()),
            "version" | "extension" | "line" => {}
            "include" => {
                warn!(
                    "[preprocess] line {}: unresolved #include {} dropped",
                    tok.line, body
                );
            }
            other => debug!("[preprocess] line {}: #{other} dropped", tok.line),
        }
    }

    if !conds.is_empty() {
        warn!("[preprocess] {} unterminated conditional(s)", conds.len());
    }

    out
}

fn evaluate_directive(
    name: &str,
    body: &str,
    line: usize,
    state: &StageSource,
    options: &PreprocessOptions,
) -> bool {
    let ctx = CondContext {
        macros: &state.macros,
        options,
    };
    match name {
        "ifdef" => ctx.is_defined(body.trim()),
        "ifndef" => !ctx.is_defined(body.trim()),
        _ => match evaluate_condition(body, &ctx) {
            Ok(v) => v != 0.0,
            Err(e) => {
                warn!("[preprocess] line {line}: cannot evaluate `#{name} {body}` ({e}); treating as false");
                false
            }
        },
    }
}

fn record_sentinels(
    body: &str,
    macros: &MacroTable,
    options: &PreprocessOptions,
    used: &mut BTreeSet<String>,
) {
    for t in tokenize(body) {
        if t.is_ident()
            && !macros.contains(&t.text)
            && !options.predefined.contains(&t.text)
            && options.sentinel_values.contains_key(&t.text)
        {
            used.insert(t.text);
        }
    }
}

pub struct CondContext<'a> {
    pub macros: &'a MacroTable,
    pub options: &'a PreprocessOptions,
}

impl CondContext<'_> {
    fn is_defined(&self, name: &str) -> bool {
        self.options.predefined.contains(name) || self.macros.contains(name)
    }

    fn lookup(&self, name: &str) -> Option<String> {
        self.options
            .predefined
            .get(name)
            .or_else(|| self.macros.get(name))
            .map(|d| d.body.clone())
            .or_else(|| self.options.sentinel_values.get(name).cloned())
    }
}

/// Evaluate a `#if` expression. Undefined identifiers evaluate to 0.
pub fn evaluate_condition(expr: &str, ctx: &CondContext<'_>) -> Result<f64, String> {
    let tokens = tokenize(expr);
    let mut parser = CondParser {
        tokens: &tokens,
        pos: 0,
        ctx,
        depth: 0,
    };
    let v = parser.ternary()?;
    if parser.pos != tokens.len() {
        return Err(format!("unexpected `{}`", tokens[parser.pos].text));
    }
    Ok(v)
}

struct CondParser<'a, 'c> {
    tokens: &'a [Token],
    pos: usize,
    ctx: &'a CondContext<'c>,
    depth: usize,
}

fn binary_precedence(op: &str) -> Option<u8> {
    Some(match op {
        "||" => 1,
        "&&" => 2,
        "|" => 3,
        "^" => 4,
        "&" => 5,
        "==" | "!=" => 6,
        "<" | ">" | "<=" | ">=" => 7,
        "<<" | ">>" => 8,
        "+" | "-" => 9,
        "*" | "/" | "%" => 10,
        _ => return None,
    })
}

fn truth(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

impl CondParser<'_, '_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn expect(&mut self, p: &str) -> Result<(), String> {
        match self.peek() {
            Some(t) if t.is_punct(p) => {
                self.pos += 1;
                Ok(())
            }
            Some(t) => Err(format!("expected `{p}`, found `{}`", t.text)),
            None => Err(format!("expected `{p}`")),
        }
    }

    fn ternary(&mut self) -> Result<f64, String> {
        let cond = self.binary(1)?;
        if self.peek().is_some_and(|t| t.is_punct("?")) {
            self.pos += 1;
            let a = self.ternary()?;
            self.expect(":")?;
            let b = self.ternary()?;
            return Ok(if cond != 0.0 { a } else { b });
        }
        Ok(cond)
    }

    fn binary(&mut self, min_prec: u8) -> Result<f64, String> {
        let mut lhs = self.unary()?;
        loop {
            let Some(tok) = self.peek() else { break };
            if tok.kind != TokenKind::Punct {
                break;
            }
            let Some(prec) = binary_precedence(&tok.text) else {
                break;
            };
            if prec < min_prec {
                break;
            }
            let op = tok.text.clone();
            self.pos += 1;
            let rhs = self.binary(prec + 1)?;
            lhs = apply_binary(&op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<f64, String> {
        let Some(tok) = self.peek().cloned() else {
            return Err("unexpected end of expression".to_string());
        };
        if tok.kind == TokenKind::Punct {
            match tok.text.as_str() {
                "!" => {
                    self.pos += 1;
                    return Ok(truth(self.unary()? == 0.0));
                }
                "-" => {
                    self.pos += 1;
                    return Ok(-self.unary()?);
                }
                "+" => {
                    self.pos += 1;
                    return self.unary();
                }
                "~" => {
                    self.pos += 1;
                    return Ok(!(self.unary()? as i64) as f64);
                }
                "(" => {
                    self.pos += 1;
                    let v = self.ternary()?;
                    self.expect(")")?;
                    return Ok(v);
                }
                _ => return Err(format!("unexpected `{}`", tok.text)),
            }
        }
        self.pos += 1;
        match tok.kind {
            TokenKind::Number => {
                parse_number(&tok.text).ok_or_else(|| format!("bad number `{}`", tok.text))
            }
            TokenKind::Ident if tok.text == "defined" => {
                let parenthesized = self.peek().is_some_and(|t| t.is_punct("("));
                if parenthesized {
                    self.pos += 1;
                }
                let name = match self.peek() {
                    Some(t) if t.is_ident() => t.text.clone(),
                    _ => return Err("expected identifier after `defined`".to_string()),
                };
                self.pos += 1;
                if parenthesized {
                    self.expect(")")?;
                }
                Ok(truth(self.ctx.is_defined(&name)))
            }
            TokenKind::Ident => {
                if tok.text == "true" {
                    return Ok(1.0);
                }
                if tok.text == "false" {
                    return Ok(0.0);
                }
                let Some(body) = self.ctx.lookup(&tok.text) else {
                    return Ok(0.0);
                };
                if body.trim().is_empty() {
                    return Ok(0.0);
                }
                if self.depth > 16 {
                    return Err(format!("macro `{}` expands too deeply", tok.text));
                }
                let sub_tokens = tokenize(&body);
                let mut sub = CondParser {
                    tokens: &sub_tokens,
                    pos: 0,
                    ctx: self.ctx,
                    depth: self.depth + 1,
                };
                let v = sub.ternary()?;
                if sub.pos != sub_tokens.len() {
                    return Err(format!("macro `{}` is not a constant expression", tok.text));
                }
                Ok(v)
            }
            _ => Err(format!("unexpected `{}`", tok.text)),
        }
    }
}

fn apply_binary(op: &str, a: f64, b: f64) -> Result<f64, String> {
    Ok(match op {
        "||" => truth(a != 0.0 || b != 0.0),
        "&&" => truth(a != 0.0 && b != 0.0),
        "|" => ((a as i64) | (b as i64)) as f64,
        "^" => ((a as i64) ^ (b as i64)) as f64,
        "&" => ((a as i64) & (b as i64)) as f64,
        "==" => truth(a == b),
        "!=" => truth(a != b),
        "<" => truth(a < b),
        ">" => truth(a > b),
        "<=" => truth(a <= b),
        ">=" => truth(a >= b),
        "<<" => ((a as i64) << ((b as i64) & 63)) as f64,
        ">>" => ((a as i64) >> ((b as i64) & 63)) as f64,
        "+" => a + b,
        "-" => a - b,
        "*" => a * b,
        "/" => {
            if b == 0.0 {
                return Err("division by zero".to_string());
            }
            a / b
        }
        "%" => {
            if b == 0.0 {
                return Err("division by zero".to_string());
            }
            ((a as i64) % (b as i64)) as f64
        }
        _ => return Err(format!("unsupported operator `{op}`")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::lexer::join_tokens;

    fn run(src: &str, stage: ShaderStage) -> StageSource {
        preprocess_stage(&tokenize(src), stage, &PreprocessOptions::default())
    }

    #[test]
    fn splits_stages_on_pragma() {
        let src = "float shared_value;\n#pragma stage vertex\nvoid vs() {}\n#pragma stage fragment\nvoid fs() {}\n";
        let v = run(src, ShaderStage::Vertex);
        let f = run(src, ShaderStage::Fragment);
        assert_eq!(join_tokens(&v.tokens), "float shared_value;void vs(){}");
        assert_eq!(join_tokens(&f.tokens), "float shared_value;void fs(){}");
    }

    #[test]
    fn first_define_wins() {
        let src = "#define BLEND_ADD 1\n#define BLEND_ADD 2\n#define OTHER 3\n";
        let out = run(src, ShaderStage::Fragment);
        assert_eq!(out.macros.len(), 2);
        assert_eq!(out.macros.get("BLEND_ADD").unwrap().body, "1");
        assert_eq!(out.dropped_duplicate_defines, vec!["BLEND_ADD".to_string()]);
    }

    #[test]
    fn resolves_nested_conditionals() {
        let src = "#define MODE 2\n#if MODE == 1\na\n#elif MODE == 2\n#ifdef MISSING\nb\n#else\nc\n#endif\n#else\nd\n#endif\n";
        let out = run(src, ShaderStage::Fragment);
        assert_eq!(join_tokens(&out.tokens), "c");
    }

    #[test]
    fn legacy_stage_macros_select_branches() {
        let mut options = PreprocessOptions::default();
        options.predefined.define(MacroDef::object("VERTEX", ""));
        let src = "#if defined(VERTEX)\nvs\n#elif defined(FRAGMENT)\nfs\n#endif\n";
        let out = preprocess_stage(&tokenize(src), ShaderStage::Vertex, &options);
        assert_eq!(join_tokens(&out.tokens), "vs");
    }

    #[test]
    fn sentinel_values_feed_conditionals() {
        let mut options = PreprocessOptions::default();
        options
            .sentinel_values
            .insert("BLEND_SCREEN".to_string(), "3".to_string());
        let src = "#define MODE 3\n#if MODE == BLEND_SCREEN\nscreen\n#endif\n";
        let out = preprocess_stage(&tokenize(src), ShaderStage::Fragment, &options);
        assert_eq!(join_tokens(&out.tokens), "screen");
        assert!(out.sentinels_used.contains("BLEND_SCREEN"));
    }

    #[test]
    fn predefined_macros_shadow_source_defines() {
        let mut options = PreprocessOptions::default();
        options.predefined.define(MacroDef::object("GAMMA", "2.4"));
        let src = "#define GAMMA 2.2\n#if GAMMA > 2.3\nhigh\n#endif\n";
        let out = preprocess_stage(&tokenize(src), ShaderStage::Fragment, &options);
        assert!(out.macros.is_empty());
        assert_eq!(join_tokens(&out.tokens), "high");
    }

    #[test]
    fn macro_literal_values_follow_chains() {
        let mut table = MacroTable::new();
        table.define(MacroDef::object("TAPS", "(KERNEL)"));
        table.define(MacroDef::object("KERNEL", "8"));
        table.define(MacroDef::object("EXPR", "KERNEL * 2"));
        assert_eq!(table.literal_value("TAPS").as_deref(), Some("8"));
        assert_eq!(table.literal_value("EXPR"), None);
    }

    #[test]
    fn parses_function_like_defines() {
        let def = MacroDef::parse("SQR(x) ((x)*(x))", 4).unwrap();
        assert_eq!(def.params.as_deref(), Some(&["x".to_string()][..]));
        assert_eq!(def.to_directive(), "#define SQR(x) ((x)*(x))");
        let obj = MacroDef::parse("PI (3.14159)", 1).unwrap();
        assert!(obj.params.is_none());
    }

    #[test]
    fn evaluates_operators() {
        let table = MacroTable::new();
        let options = PreprocessOptions::default();
        let ctx = CondContext {
            macros: &table,
            options: &options,
        };
        assert_eq!(evaluate_condition("1 + 2 * 3 == 7 && !0", &ctx), Ok(1.0));
        assert_eq!(evaluate_condition("(1 << 4) | 1", &ctx), Ok(17.0));
        assert_eq!(evaluate_condition("UNDEFINED_NAME", &ctx), Ok(0.0));
        assert!(evaluate_condition("1 +", &ctx).is_err());
    }
}
