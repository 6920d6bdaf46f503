//! Placeholder definitions for functions that are called but never defined.
//!
//! Parameter types are inferred from the argument expressions at each call site and
//! the return type from the surrounding statement (`T x = f(..)`, `x = f(..)`,
//! `return f(..)`, or a bare `f(..);` which yields `void`). Distinct inferred
//! signatures each get their own stub. A prototype, when present, is used as-is.

use std::collections::{HashMap, HashSet};

use log::{debug, warn};

use super::builtins::{
    component_count, is_builtin_function, is_builtin_type, is_qualifier, is_reserved, vector_of,
};
use super::extract::{FunctionDef, Item, StageProgram, parse_items};
use super::lexer::{ASSIGNMENT_OPS, Token, TokenKind, find_matching, split_top_level_commas, tokenize};
use super::types::{FunctionParam, FunctionSignature};

#[derive(Clone, Debug, PartialEq)]
pub struct Stub {
    pub signature: FunctionSignature,
}

impl Stub {
    pub fn name(&self) -> &str {
        &self.signature.name
    }

    pub fn render(&self) -> String {
        let ret = self.signature.return_type.as_str();
        let body = if ret == "void" {
            String::new()
        } else if is_builtin_type(ret) {
            format!("    return {ret}(0);\n")
        } else {
            format!("    {ret} stub_value;\n    return stub_value;\n")
        };
        format!("{}\n{{\n{}}}\n", self.signature.render(), body)
    }
}

#[derive(Default)]
struct TypeEnv {
    vars: HashMap<String, String>,
    /// struct name → member name → member type
    structs: HashMap<String, HashMap<String, String>>,
    /// user function name → return type
    functions: HashMap<String, String>,
    return_type: Option<String>,
}

fn is_swizzle(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 4
        && (s.chars().all(|c| "xyzw".contains(c))
            || s.chars().all(|c| "rgba".contains(c))
            || s.chars().all(|c| "stpq".contains(c)))
}

fn strip_outer_parens(mut tokens: &[Token]) -> &[Token] {
    while tokens.len() >= 2
        && tokens[0].is_punct("(")
        && find_matching(tokens, 0) == Some(tokens.len() - 1)
    {
        tokens = &tokens[1..tokens.len() - 1];
    }
    tokens
}

/// Pick the wider of two operand types (`float * vec3` is `vec3`).
fn wider(a: String, b: String) -> String {
    let rank = |t: &str| component_count(t).unwrap_or(0);
    if a.starts_with("mat") && component_count(&b).is_some_and(|n| n > 1) {
        return b;
    }
    if rank(&b) > rank(&a) { b } else { a }
}

impl TypeEnv {
    fn literal_type(text: &str) -> &'static str {
        if text.starts_with("0x") || text.starts_with("0X") {
            if text.ends_with(['u', 'U']) { "uint" } else { "int" }
        } else if text.ends_with(['u', 'U']) {
            "uint"
        } else if text.contains(['.', 'e', 'E']) || text.ends_with(['f', 'F']) {
            "float"
        } else {
            "int"
        }
    }

    fn infer(&self, tokens: &[Token]) -> String {
        let tokens = strip_outer_parens(tokens);
        if tokens.is_empty() {
            return "float".to_string();
        }

        let mut depth = 0i32;
        let mut operands: Vec<(usize, usize)> = Vec::new();
        let mut start = 0;
        for (i, t) in tokens.iter().enumerate() {
            if t.kind != TokenKind::Punct {
                continue;
            }
            match t.text.as_str() {
                "(" | "[" => depth += 1,
                ")" | "]" => depth -= 1,
                "?" if depth == 0 => {
                    let colon = tokens[i + 1..]
                        .iter()
                        .position(|t| t.is_punct(":"))
                        .map_or(tokens.len(), |p| i + 1 + p);
                    return self.infer(&tokens[i + 1..colon]);
                }
                "==" | "!=" | "<" | ">" | "<=" | ">=" | "&&" | "||" | "^^" if depth == 0 => {
                    return "bool".to_string();
                }
                "+" | "-" | "*" | "/" | "%" if depth == 0 && i > start => {
                    operands.push((start, i));
                    start = i + 1;
                }
                _ => {}
            }
        }
        if !operands.is_empty() {
            operands.push((start, tokens.len()));
            return operands
                .into_iter()
                .map(|(s, e)| self.infer_operand(&tokens[s..e]))
                .reduce(wider)
                .unwrap_or_else(|| "float".to_string());
        }
        self.infer_operand(tokens)
    }

    fn infer_operand(&self, tokens: &[Token]) -> String {
        let mut tokens = strip_outer_parens(tokens);
        while tokens.first().is_some_and(|t| t.is_punct("-") || t.is_punct("+") || t.is_punct("~")) {
            tokens = &tokens[1..];
        }
        if tokens.first().is_some_and(|t| t.is_punct("!")) {
            return "bool".to_string();
        }
        let Some(first) = tokens.first() else {
            return "float".to_string();
        };

        let (mut ty, mut i) = match first.kind {
            TokenKind::Number => (Self::literal_type(&first.text).to_string(), 1),
            TokenKind::Ident if first.text == "true" || first.text == "false" => ("bool".to_string(), 1),
            TokenKind::Ident if tokens.get(1).is_some_and(|t| t.is_punct("(")) => {
                let Some(close) = find_matching(tokens, 1) else {
                    return "float".to_string();
                };
                (self.call_type(&first.text, &tokens[2..close]), close + 1)
            }
            TokenKind::Ident => (
                self.vars.get(&first.text).cloned().unwrap_or_else(|| "float".to_string()),
                1,
            ),
            TokenKind::Punct if first.is_punct("(") => match find_matching(tokens, 0) {
                Some(close) => (self.infer(&tokens[1..close]), close + 1),
                None => return "float".to_string(),
            },
            _ => return "float".to_string(),
        };

        while i < tokens.len() {
            let t = &tokens[i];
            if t.is_punct(".") {
                let Some(member) = tokens.get(i + 1) else { break };
                ty = if component_count(&ty).is_some() && is_swizzle(&member.text) {
                    vector_of(&ty, member.text.len())
                } else {
                    self.structs
                        .get(&ty)
                        .and_then(|m| m.get(&member.text))
                        .cloned()
                        .unwrap_or_else(|| "float".to_string())
                };
                i += 2;
            } else if t.is_punct("[") {
                ty = if ty.starts_with("mat") {
                    let n = ty.chars().nth(3).and_then(|c| c.to_digit(10)).unwrap_or(4) as usize;
                    vector_of("vec4", n)
                } else if component_count(&ty).is_some_and(|n| n > 1) {
                    vector_of(&ty, 1)
                } else {
                    ty
                };
                i = find_matching(tokens, i).map_or(tokens.len(), |c| c + 1);
            } else {
                break;
            }
        }
        ty
    }

    fn call_type(&self, name: &str, args: &[Token]) -> String {
        if is_builtin_type(name) {
            return name.to_string();
        }
        if self.structs.contains_key(name) {
            return name.to_string();
        }
        if let Some(ret) = self.functions.get(name) {
            return ret.clone();
        }
        let arg_types: Vec<String> = split_top_level_commas(args)
            .into_iter()
            .map(|a| self.infer(a))
            .collect();
        match name {
            "dot" | "length" | "distance" | "determinant" => "float".to_string(),
            "cross" => "vec3".to_string(),
            "textureSize" => "ivec2".to_string(),
            "any" | "all" => "bool".to_string(),
            "lessThan" | "lessThanEqual" | "greaterThan" | "greaterThanEqual" | "equal"
            | "notEqual" => {
                let n = arg_types.first().and_then(|t| component_count(t)).unwrap_or(1);
                vector_of("bvec4", n)
            }
            "floatBitsToInt" => "int".to_string(),
            "floatBitsToUint" => "uint".to_string(),
            n if n.starts_with("texture") || n.starts_with("texelFetch") || n.starts_with("shadow") => {
                "vec4".to_string()
            }
            _ => arg_types
                .into_iter()
                .reduce(wider)
                .unwrap_or_else(|| "float".to_string()),
        }
    }
}

/// `(type, name)` pairs declared in a token run (function parameters excluded).
fn typed_locals(tokens: &[Token], type_names: &HashSet<&str>) -> Vec<(String, String)> {
    let is_type = |t: &Token| t.is_ident() && (is_builtin_type(&t.text) || type_names.contains(t.text.as_str()));
    let ends_declarator = |t: Option<&Token>| {
        t.is_some_and(|t| t.is_punct("=") || t.is_punct(";") || t.is_punct(",") || t.is_punct("[") || t.is_punct(")"))
    };
    let mut out = Vec::new();
    let mut i = 0;
    while i + 1 < tokens.len() {
        let t = &tokens[i];
        if is_type(t) && tokens[i + 1].is_ident() && !is_type(&tokens[i + 1]) && ends_declarator(tokens.get(i + 2)) {
            out.push((t.text.clone(), tokens[i + 1].text.clone()));
            let mut depth = 0i32;
            let mut j = i + 2;
            while let Some(n) = tokens.get(j) {
                if n.kind == TokenKind::Punct {
                    match n.text.as_str() {
                        "(" | "[" | "{" => depth += 1,
                        ")" | "]" | "}" => depth -= 1,
                        ";" => break,
                        "," if depth == 0 => {
                            if let Some(next) = tokens.get(j + 1).filter(|x| x.is_ident()) {
                                if ends_declarator(tokens.get(j + 2)) {
                                    out.push((t.text.clone(), next.text.clone()));
                                }
                            }
                        }
                        _ => {}
                    }
                    if depth < 0 {
                        break;
                    }
                }
                j += 1;
            }
            i += 2;
            continue;
        }
        i += 1;
    }
    out
}

fn struct_members(program: &StageProgram) -> HashMap<String, HashMap<String, String>> {
    let mut out = HashMap::new();
    for s in &program.structs {
        let Some(open) = s.tokens.iter().position(|t| t.is_punct("{")) else {
            continue;
        };
        let Some(close) = find_matching(&s.tokens, open) else {
            continue;
        };
        let mut members = HashMap::new();
        for item in parse_items(&s.tokens[open + 1..close]) {
            if let Item::Declaration(d) = item {
                for name in d.names() {
                    members.insert(name.to_string(), d.ty.clone());
                }
            }
        }
        out.insert(s.name.clone(), members);
    }
    out
}

fn stage_env(program: &StageProgram) -> TypeEnv {
    let mut env = TypeEnv {
        structs: struct_members(program),
        ..Default::default()
    };
    let declarations = program
        .uniforms
        .iter()
        .chain(&program.inputs)
        .chain(&program.outputs)
        .chain(program.blocks.iter().flat_map(|b| b.members.iter()));
    for d in declarations {
        for name in d.names() {
            env.vars.insert(name.to_string(), d.ty.clone());
        }
    }
    for g in program.globals() {
        env.vars.insert(g.decl.name.clone(), g.decl.ty.clone());
    }
    for f in program.functions() {
        env.functions
            .entry(f.signature.name.clone())
            .or_insert_with(|| f.signature.return_type.clone());
    }
    for p in program.prototypes() {
        env.functions
            .entry(p.name.clone())
            .or_insert_with(|| p.return_type.clone());
    }
    env
}

fn function_env(base: &TypeEnv, f: &FunctionDef, type_names: &HashSet<&str>) -> TypeEnv {
    let mut vars = base.vars.clone();
    for p in &f.signature.params {
        vars.insert(p.name.clone(), p.ty.clone());
    }
    for (ty, name) in typed_locals(&f.body, type_names) {
        vars.insert(name, ty);
    }
    TypeEnv {
        vars,
        structs: base.structs.clone(),
        functions: base.functions.clone(),
        return_type: Some(
            f.signature
                .return_type
                .split_whitespace()
                .last()
                .unwrap_or("void")
                .to_string(),
        ),
    }
}

/// Return type a call at `start..=close` is expected to produce.
fn expected_return(tokens: &[Token], start: usize, close: usize, env: &TypeEnv) -> String {
    let before = start.checked_sub(1).map(|i| &tokens[i]);
    let after = tokens.get(close + 1);
    let statement_start = before.is_none_or(|t| t.is_punct(";") || t.is_punct("{") || t.is_punct("}"));
    if statement_start && after.is_none_or(|t| t.is_punct(";")) {
        return "void".to_string();
    }
    let Some(before) = before else {
        return "float".to_string();
    };
    if before.is_ident_named("return") {
        return env.return_type.clone().unwrap_or_else(|| "float".to_string());
    }
    if before.kind == TokenKind::Punct && ASSIGNMENT_OPS.contains(&before.text.as_str()) && start >= 2 {
        // `T name = f(..)`
        let name = &tokens[start - 2];
        if start >= 3 && before.is_punct("=") && name.is_ident() {
            let ty = &tokens[start - 3];
            if ty.is_ident() && (is_builtin_type(&ty.text) || env.structs.contains_key(&ty.text)) {
                return ty.text.clone();
            }
        }
        // `target[.swizzle] op= f(..)`: walk back to the start of the target.
        let mut s = start - 1;
        while s > 0 {
            let t = &tokens[s - 1];
            if t.is_ident() || t.is_punct(".") || t.is_punct("]") || t.kind == TokenKind::Number || t.is_punct("[") {
                s -= 1;
            } else {
                break;
            }
        }
        return env.infer(&tokens[s..start - 1]);
    }
    "float".to_string()
}

fn is_call_candidate(
    tokens: &[Token],
    i: usize,
    known: &HashSet<&str>,
) -> bool {
    let t = &tokens[i];
    t.is_ident()
        && tokens.get(i + 1).is_some_and(|n| n.is_punct("("))
        && !(i > 0 && tokens[i - 1].is_punct("."))
        && !is_builtin_function(&t.text)
        && !is_builtin_type(&t.text)
        && !is_reserved(&t.text)
        && !is_qualifier(&t.text)
        && !known.contains(t.text.as_str())
}

fn collect_sites(
    tokens: &[Token],
    env: &TypeEnv,
    known: &HashSet<&str>,
    prototypes: &HashMap<&str, &FunctionSignature>,
    out: &mut Vec<Stub>,
) {
    for i in 0..tokens.len() {
        if !is_call_candidate(tokens, i, known) {
            continue;
        }
        let name = tokens[i].text.as_str();
        if let Some(proto) = prototypes.get(name) {
            out.push(Stub {
                signature: (*proto).clone(),
            });
            continue;
        }
        let Some(close) = find_matching(tokens, i + 1) else {
            continue;
        };
        let params = split_top_level_commas(&tokens[i + 2..close])
            .into_iter()
            .enumerate()
            .map(|(n, arg)| FunctionParam {
                qualifier: String::new(),
                ty: env.infer(arg),
                name: format!("a{n}"),
                array: None,
            })
            .collect();
        out.push(Stub {
            signature: FunctionSignature {
                name: name.to_string(),
                return_type: expected_return(tokens, i, close, env),
                params,
            },
        });
    }
}

fn stage_sites(program: &StageProgram) -> Vec<Stub> {
    let env = stage_env(program);
    let struct_names: HashSet<&str> = program.structs.iter().map(|s| s.name.as_str()).collect();
    let mut known: HashSet<&str> = program.functions().map(|f| f.signature.name.as_str()).collect();
    known.extend(program.macros.iter().map(|m| m.name.as_str()));
    known.extend(struct_names.iter().copied());
    let prototypes: HashMap<&str, &FunctionSignature> = program
        .prototypes()
        .filter(|p| !known.contains(p.name.as_str()))
        .map(|p| (p.name.as_str(), p))
        .collect();

    let mut sites = Vec::new();
    for f in program.functions() {
        let fenv = function_env(&env, f, &struct_names);
        collect_sites(&f.body, &fenv, &known, &prototypes, &mut sites);
    }
    for g in program.globals() {
        if let Some(init) = &g.init {
            collect_sites(init, &env, &known, &prototypes, &mut sites);
        }
    }
    for m in &program.macros {
        let mut macro_known = known.clone();
        if let Some(params) = &m.params {
            macro_known.extend(params.iter().map(String::as_str));
        }
        collect_sites(&tokenize(&m.body), &env, &macro_known, &prototypes, &mut sites);
    }
    sites
}

/// Stubs for every called-but-undefined function across both stages.
pub fn plan_stubs(stages: &[&StageProgram]) -> Vec<Stub> {
    let mut out: Vec<Stub> = Vec::new();
    let mut by_key: HashMap<String, usize> = HashMap::new();
    for program in stages {
        for stub in stage_sites(program) {
            let key = stub.signature.key();
            match by_key.get(&key) {
                Some(&existing) => {
                    if out[existing].signature.return_type != stub.signature.return_type {
                        debug!(
                            "[stubs] {key}: return type {} conflicts with {}; keeping the first",
                            stub.signature.return_type, out[existing].signature.return_type
                        );
                    }
                }
                None => {
                    warn!("[stubs] `{}` is not defined; injecting placeholder {key}", stub.name());
                    by_key.insert(key, out.len());
                    out.push(stub);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::extract::extract_stage;
    use crate::compiler::preprocess::{PreprocessOptions, preprocess_stage};
    use crate::compiler::types::ShaderStage;

    fn stubs_for(src: &str) -> Vec<Stub> {
        let pre = preprocess_stage(&tokenize(src), ShaderStage::Fragment, &PreprocessOptions::default());
        let program = extract_stage(&pre, ShaderStage::Fragment);
        plan_stubs(&[&program])
    }

    fn keyed(stubs: &[Stub]) -> Vec<String> {
        stubs
            .iter()
            .map(|s| format!("{} {}", s.signature.return_type, s.signature.key()))
            .collect()
    }

    #[test]
    fn infers_signature_from_declaration_context() {
        let stubs = stubs_for(
            "uniform sampler2D Source;\nin vec2 uv;\nvoid main() { vec3 c = crt_mask(uv * 2.0, 1.5, texture(Source, uv).rgb); }\n",
        );
        assert_eq!(keyed(&stubs), vec!["vec3 crt_mask(vec2,float,vec3)"]);
    }

    #[test]
    fn statement_calls_are_void_and_returns_use_function_type() {
        let stubs = stubs_for(
            "vec4 shade(vec2 p) { return glow(p.x, 2); }\nvoid main() { reset_state(); vec4 c = shade(vec2(0.0)); }\n",
        );
        let keys = keyed(&stubs);
        assert!(keys.contains(&"vec4 glow(float,int)".to_string()));
        assert!(keys.contains(&"void reset_state()".to_string()));
    }

    #[test]
    fn distinct_signatures_each_get_a_stub() {
        let stubs = stubs_for("void main() { float a = warp(1.0); vec2 b = warp(vec2(1.0)); float c = warp(2.0); }\n");
        assert_eq!(keyed(&stubs), vec!["float warp(float)", "vec2 warp(vec2)"]);
    }

    #[test]
    fn prototypes_fix_the_signature() {
        let stubs = stubs_for("vec3 tonemap(vec3 c, float exposure);\nvoid main() { vec3 x = tonemap(vec3(1.0), 2.0); }\n");
        assert_eq!(keyed(&stubs), vec!["vec3 tonemap(vec3,float)"]);
    }

    #[test]
    fn builtins_constructors_and_macros_are_not_stubbed() {
        let stubs = stubs_for(
            "#define SQR(x) ((x) * (x))\nstruct P { float a; };\nvoid main() { float s = SQR(2.0) + max(1.0, 2.0); P p = P(1.0); vec2 v = vec2(s); }\n",
        );
        assert!(stubs.is_empty());
    }

    #[test]
    fn assignment_targets_drive_return_type() {
        let stubs = stubs_for("out vec4 FragColor;\nvoid main() { FragColor.rg = bloom(0.5); }\n");
        assert_eq!(keyed(&stubs), vec!["vec2 bloom(float)"]);
    }

    #[test]
    fn renders_compilable_bodies() {
        let stub = Stub {
            signature: FunctionSignature {
                name: "f".into(),
                return_type: "vec3".into(),
                params: vec![],
            },
        };
        assert_eq!(stub.render(), "vec3 f()\n{\n    return vec3(0);\n}\n");
        let void_stub = Stub {
            signature: FunctionSignature {
                name: "g".into(),
                return_type: "void".into(),
                params: vec![],
            },
        };
        assert_eq!(void_stub.render(), "void g()\n{\n}\n");
    }
}
