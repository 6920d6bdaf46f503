//! Item parsing, reachability and global classification for one preprocessed stage.
//!
//! A global is *dynamic* when a reachable function assigns it (plain or compound
//! assignment, `++`/`--`, or passing it to an `out`/`inout` parameter) without a
//! local of the same name in scope, or when its initializer is not a constant
//! expression. Dynamic globals are emitted bare and initialized at the top of `main`.

use std::collections::{HashMap, HashSet, VecDeque};

use log::{debug, warn};

use super::builtins::{
    PRECISION_QUALIFIERS, SCALAR_TYPES, is_builtin_function, is_builtin_type, is_qualifier,
};
use super::lexer::{ASSIGNMENT_OPS, Token, TokenKind, find_matching, join_tokens, split_top_level_commas, tokenize};
use super::preprocess::{MacroDef, Pragma, StageSource};
use super::types::{FunctionParam, FunctionSignature, GlobalDeclaration, GlobalKind, ShaderStage};

#[derive(Clone, Debug, PartialEq)]
pub struct Declarator {
    pub name: String,
    pub line: usize,
    pub array: Option<Vec<Token>>,
    pub init: Option<Vec<Token>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Declaration {
    /// Tokens inside `layout( ... )`.
    pub layout: Option<Vec<Token>>,
    pub qualifiers: Vec<String>,
    pub ty: String,
    pub declarators: Vec<Declarator>,
    pub line: usize,
}

impl Declaration {
    pub fn has_qualifier(&self, q: &str) -> bool {
        self.qualifiers.iter().any(|x| x == q)
    }

    pub fn precision(&self) -> Option<&str> {
        self.qualifiers
            .iter()
            .map(String::as_str)
            .find(|q| PRECISION_QUALIFIERS.contains(q))
    }

    /// `location = N` from the layout qualifier.
    pub fn location(&self) -> Option<u32> {
        let layout = self.layout.as_ref()?;
        let idx = layout.iter().position(|t| t.is_ident_named("location"))?;
        if !layout.get(idx + 1)?.is_punct("=") {
            return None;
        }
        layout.get(idx + 2)?.text.parse().ok()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.declarators.iter().map(|d| d.name.as_str())
    }
}

/// `uniform Name { ... } instance;` and friends.
#[derive(Clone, Debug, PartialEq)]
pub struct InterfaceBlock {
    pub layout: Option<Vec<Token>>,
    pub qualifiers: Vec<String>,
    pub name: String,
    pub members: Vec<Declaration>,
    pub instance: Option<String>,
    pub tokens: Vec<Token>,
    pub line: usize,
}

impl InterfaceBlock {
    pub fn is_push_constant(&self) -> bool {
        self.layout
            .as_ref()
            .is_some_and(|l| l.iter().any(|t| t.is_ident_named("push_constant")))
    }

    pub fn is_uniform(&self) -> bool {
        self.qualifiers.iter().any(|q| q == "uniform") || self.is_push_constant()
    }

    pub fn member_names(&self) -> impl Iterator<Item = &str> {
        self.members.iter().flat_map(|m| m.names())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StructDef {
    pub name: String,
    /// Full definition including the trailing `;`.
    pub tokens: Vec<Token>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionDef {
    pub signature: FunctionSignature,
    /// Body including the outer braces.
    pub body: Vec<Token>,
    pub line: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Item {
    Precision(Vec<Token>),
    Struct(StructDef),
    Block(InterfaceBlock),
    Declaration(Declaration),
    Function(FunctionDef),
    Prototype(FunctionSignature),
    Other(Vec<Token>),
}

struct ItemParser<'a> {
    toks: &'a [Token],
    pos: usize,
}

impl ItemParser<'_> {
    fn at(&self, i: usize) -> Option<&Token> {
        self.toks.get(i)
    }

    /// End (exclusive) of the statement starting at `start`.
    fn statement_end(&self, start: usize) -> usize {
        let mut depth = 0i32;
        let mut i = start;
        while i < self.toks.len() {
            let t = &self.toks[i];
            if t.kind == TokenKind::Punct {
                match t.text.as_str() {
                    "(" | "[" | "{" => depth += 1,
                    ")" | "]" => depth -= 1,
                    "}" => {
                        depth -= 1;
                        if depth <= 0 && !self.at(i + 1).is_some_and(|n| n.is_punct(";")) {
                            return i + 1;
                        }
                    }
                    ";" if depth <= 0 => return i + 1,
                    _ => {}
                }
            }
            i += 1;
        }
        self.toks.len()
    }

    fn other(&mut self, start: usize) -> Item {
        let end = self.statement_end(start).max(start + 1).min(self.toks.len());
        self.pos = end;
        Item::Other(self.toks[start..end].to_vec())
    }

    fn parse_item(&mut self) -> Option<Item> {
        let start = self.pos;
        let first = self.at(start)?;
        if first.is_punct(";") {
            self.pos += 1;
            return self.parse_item();
        }
        if first.is_ident_named("precision") {
            let end = self.statement_end(start);
            self.pos = end;
            return Some(Item::Precision(self.toks[start..end].to_vec()));
        }

        let mut i = start;
        let mut layout = None;
        if self.at(i).is_some_and(|t| t.is_ident_named("layout"))
            && self.at(i + 1).is_some_and(|t| t.is_punct("("))
        {
            let Some(close) = find_matching(self.toks, i + 1) else {
                return Some(self.other(start));
            };
            layout = Some(self.toks[i + 2..close].to_vec());
            i = close + 1;
        }
        let mut qualifiers = Vec::new();
        while let Some(t) = self.at(i) {
            if t.is_ident() && is_qualifier(&t.text) {
                qualifiers.push(t.text.clone());
                i += 1;
            } else {
                break;
            }
        }

        if self.at(i).is_some_and(|t| t.is_ident_named("struct")) {
            return Some(self.parse_struct(start, i, layout, qualifiers));
        }

        let Some(ty_tok) = self.at(i).filter(|t| t.is_ident()) else {
            if layout.is_some() && self.at(i).is_some_and(|t| t.is_punct(";")) {
                // `layout(...) in;` style default declarations.
                self.pos = i + 1;
                return Some(Item::Other(self.toks[start..i + 1].to_vec()));
            }
            return Some(self.other(start));
        };
        let ty = ty_tok.text.clone();
        let line = ty_tok.line;
        let after_ty = i + 1;

        if self.at(after_ty).is_some_and(|t| t.is_punct("{")) {
            return Some(self.parse_block(start, after_ty, layout, qualifiers, ty, line));
        }

        let Some(name) = self.at(after_ty).filter(|t| t.is_ident()).map(|t| t.text.clone()) else {
            return Some(self.other(start));
        };
        if self.at(after_ty + 1).is_some_and(|t| t.is_punct("(")) {
            return Some(self.parse_function(start, after_ty + 1, qualifiers, ty, name, line));
        }

        let end = self.statement_end(after_ty);
        if !self.toks[end - 1].is_punct(";") {
            return Some(self.other(start));
        }
        let Some(declarators) = parse_declarators(&self.toks[after_ty..end - 1]) else {
            return Some(self.other(start));
        };
        self.pos = end;
        Some(Item::Declaration(Declaration {
            layout,
            qualifiers,
            ty,
            declarators,
            line,
        }))
    }

    fn parse_struct(
        &mut self,
        start: usize,
        kw: usize,
        layout: Option<Vec<Token>>,
        qualifiers: Vec<String>,
    ) -> Item {
        let Some(name) = self.at(kw + 1).filter(|t| t.is_ident()).map(|t| t.text.clone()) else {
            return self.other(start);
        };
        if !self.at(kw + 2).is_some_and(|t| t.is_punct("{")) {
            return self.other(start);
        }
        let Some(close) = find_matching(self.toks, kw + 2) else {
            return self.other(start);
        };
        if self.at(close + 1).is_some_and(|t| t.is_punct(";")) && qualifiers.is_empty() && layout.is_none() {
            self.pos = close + 2;
            return Item::Struct(StructDef {
                name,
                tokens: self.toks[kw..close + 2].to_vec(),
            });
        }
        // `struct S { ... } s;` declares a variable as well; keep it verbatim.
        self.other(start)
    }

    fn parse_block(
        &mut self,
        start: usize,
        open: usize,
        layout: Option<Vec<Token>>,
        qualifiers: Vec<String>,
        name: String,
        line: usize,
    ) -> Item {
        let Some(close) = find_matching(self.toks, open) else {
            return self.other(start);
        };
        let mut members = Vec::new();
        let mut inner = ItemParser {
            toks: &self.toks[open + 1..close],
            pos: 0,
        };
        while let Some(item) = inner.parse_item() {
            match item {
                Item::Declaration(d) => members.push(d),
                _ => return self.other(start),
            }
        }
        let mut i = close + 1;
        let mut instance = None;
        if let Some(t) = self.at(i).filter(|t| t.is_ident()) {
            instance = Some(t.text.clone());
            i += 1;
            if self.at(i).is_some_and(|t| t.is_punct("[")) {
                match find_matching(self.toks, i) {
                    Some(c) => i = c + 1,
                    None => return self.other(start),
                }
            }
        }
        if !self.at(i).is_some_and(|t| t.is_punct(";")) {
            return self.other(start);
        }
        self.pos = i + 1;
        Item::Block(InterfaceBlock {
            layout,
            qualifiers,
            name,
            members,
            instance,
            tokens: self.toks[start..i + 1].to_vec(),
            line,
        })
    }

    fn parse_function(
        &mut self,
        start: usize,
        open: usize,
        qualifiers: Vec<String>,
        return_type: String,
        name: String,
        line: usize,
    ) -> Item {
        let Some(close) = find_matching(self.toks, open) else {
            return self.other(start);
        };
        let Some(params) = parse_params(&self.toks[open + 1..close]) else {
            return self.other(start);
        };
        let return_type = match qualifiers.iter().find(|q| PRECISION_QUALIFIERS.contains(&q.as_str())) {
            Some(p) => format!("{p} {return_type}"),
            None => return_type,
        };
        let signature = FunctionSignature {
            name,
            return_type,
            params,
        };
        match self.at(close + 1) {
            Some(t) if t.is_punct(";") => {
                self.pos = close + 2;
                Item::Prototype(signature)
            }
            Some(t) if t.is_punct("{") => {
                let Some(body_end) = find_matching(self.toks, close + 1) else {
                    return self.other(start);
                };
                self.pos = body_end + 1;
                Item::Function(FunctionDef {
                    signature,
                    body: self.toks[close + 1..=body_end].to_vec(),
                    line,
                })
            }
            _ => self.other(start),
        }
    }
}

fn parse_declarators(tokens: &[Token]) -> Option<Vec<Declarator>> {
    let mut out = Vec::new();
    for part in split_top_level_commas(tokens) {
        let name_tok = part.first().filter(|t| t.is_ident())?;
        let mut i = 1;
        let mut array = None;
        if part.get(i).is_some_and(|t| t.is_punct("[")) {
            let close = find_matching(part, i)?;
            array = Some(part[i + 1..close].to_vec());
            i = close + 1;
        }
        let mut init = None;
        if part.get(i).is_some_and(|t| t.is_punct("=")) {
            init = Some(part[i + 1..].to_vec());
            i = part.len();
        }
        if i != part.len() {
            return None;
        }
        out.push(Declarator {
            name: name_tok.text.clone(),
            line: name_tok.line,
            array,
            init,
        });
    }
    Some(out)
}

fn parse_params(tokens: &[Token]) -> Option<Vec<FunctionParam>> {
    if tokens.is_empty() || (tokens.len() == 1 && tokens[0].is_ident_named("void")) {
        return Some(Vec::new());
    }
    let mut out = Vec::new();
    for part in split_top_level_commas(tokens) {
        let mut qualifier = String::new();
        let mut i = 0;
        while let Some(t) = part.get(i) {
            if !(t.is_ident() && is_qualifier(&t.text)) {
                break;
            }
            if matches!(t.text.as_str(), "in" | "out" | "inout") {
                qualifier = t.text.clone();
            }
            i += 1;
        }
        let ty = part.get(i).filter(|t| t.is_ident())?.text.clone();
        i += 1;
        let mut name = String::new();
        if let Some(t) = part.get(i).filter(|t| t.is_ident()) {
            name = t.text.clone();
            i += 1;
        }
        let mut array = None;
        if part.get(i).is_some_and(|t| t.is_punct("[")) {
            let close = find_matching(part, i)?;
            array = Some(join_tokens(&part[i + 1..close]));
            i = close + 1;
        }
        if i != part.len() {
            return None;
        }
        out.push(FunctionParam {
            qualifier,
            ty,
            name,
            array,
        });
    }
    Some(out)
}

pub fn parse_items(tokens: &[Token]) -> Vec<Item> {
    let mut parser = ItemParser { toks: tokens, pos: 0 };
    let mut items = Vec::new();
    while let Some(item) = parser.parse_item() {
        items.push(item);
    }
    items
}

/// Names declared as uniforms, either loose or as members of a uniform block.
pub fn declared_uniform_names(items: &[Item]) -> HashSet<String> {
    let mut names = HashSet::new();
    for item in items {
        match item {
            Item::Declaration(d) if d.has_qualifier("uniform") => {
                names.extend(d.names().map(str::to_string));
            }
            Item::Block(b) if b.is_uniform() => {
                names.extend(b.member_names().map(str::to_string));
            }
            _ => {}
        }
    }
    names
}

/// `const <scalar> NAME = <literal>;` at file scope, keyed by name.
pub fn scan_const_sentinels(tokens: &[Token]) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let mut depth = 0i32;
    for (i, t) in tokens.iter().enumerate() {
        if t.is_punct("{") {
            depth += 1;
        } else if t.is_punct("}") {
            depth -= 1;
        }
        if depth != 0 || !t.is_ident_named("const") {
            continue;
        }
        let mut j = i + 1;
        while tokens
            .get(j)
            .is_some_and(|t| t.is_ident() && PRECISION_QUALIFIERS.contains(&t.text.as_str()))
        {
            j += 1;
        }
        if !tokens
            .get(j)
            .is_some_and(|t| t.is_ident() && SCALAR_TYPES.contains(&t.text.as_str()))
        {
            continue;
        }
        let Some(name) = tokens.get(j + 1).filter(|t| t.is_ident()) else {
            continue;
        };
        if !tokens.get(j + 2).is_some_and(|t| t.is_punct("=")) {
            continue;
        }
        let Some(end) = tokens[j + 3..].iter().position(|t| t.is_punct(";")) else {
            continue;
        };
        if let Some(literal) = literal_text(&tokens[j + 3..j + 3 + end]) {
            out.entry(name.text.clone()).or_insert(literal);
        }
    }
    out
}

/// A (possibly negated) numeric or boolean literal.
fn literal_text(tokens: &[Token]) -> Option<String> {
    match tokens {
        [t] if t.kind == TokenKind::Number => Some(t.text.clone()),
        [t] if t.is_ident_named("true") || t.is_ident_named("false") => Some(t.text.clone()),
        [sign, t] if sign.is_punct("-") && t.kind == TokenKind::Number => Some(format!("-{}", t.text)),
        _ => None,
    }
}

/// Expand object-like macros that stand in for a single qualifier (e.g.
/// `COMPAT_VARYING` → `out`) or for nothing at all, so declarations parse.
pub fn expand_qualifier_macros(tokens: &[Token], macros: &[&MacroDef]) -> Vec<Token> {
    let mut replacements: HashMap<&str, Option<&str>> = HashMap::new();
    for def in macros {
        if def.params.is_some() {
            continue;
        }
        let body = def.body.trim();
        if body.is_empty() {
            replacements.insert(def.name.as_str(), None);
        } else if is_qualifier(body) {
            replacements.insert(def.name.as_str(), Some(body));
        }
    }
    if replacements.is_empty() {
        return tokens.to_vec();
    }
    let mut out = Vec::with_capacity(tokens.len());
    for t in tokens {
        if t.is_ident() {
            match replacements.get(t.text.as_str()) {
                Some(Some(q)) => {
                    out.push(Token::new(TokenKind::Ident, *q, t.line, t.column));
                    continue;
                }
                Some(None) => continue,
                None => {}
            }
        }
        out.push(t.clone());
    }
    out
}

/// A global as it will be emitted: classification plus the tokens the transpiler
/// rewrites.
#[derive(Clone, Debug, PartialEq)]
pub struct GlobalItem {
    pub decl: GlobalDeclaration,
    pub precision: Option<String>,
    pub array: Option<Vec<Token>>,
    pub init: Option<Vec<Token>>,
    pub line: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub enum BodyItem {
    Global(GlobalItem),
    Function(FunctionDef),
    Prototype(FunctionSignature),
    Raw(Vec<Token>),
}

/// Everything the transpiler needs to emit one stage.
#[derive(Clone, Debug, Default)]
pub struct StageProgram {
    pub macros: Vec<MacroDef>,
    pub errors: Vec<Token>,
    pub pragmas: Vec<Pragma>,
    pub structs: Vec<StructDef>,
    pub blocks: Vec<InterfaceBlock>,
    pub uniforms: Vec<Declaration>,
    pub inputs: Vec<Declaration>,
    pub outputs: Vec<Declaration>,
    /// Globals, prototypes and reachable functions in source order.
    pub body: Vec<BodyItem>,
    /// Sentinel globals rewritten as macros.
    pub promoted: Vec<String>,
    pub has_main: bool,
}

impl StageProgram {
    pub fn globals(&self) -> impl Iterator<Item = &GlobalItem> {
        self.body.iter().filter_map(|b| match b {
            BodyItem::Global(g) => Some(g),
            _ => None,
        })
    }

    pub fn functions(&self) -> impl Iterator<Item = &FunctionDef> {
        self.body.iter().filter_map(|b| match b {
            BodyItem::Function(f) => Some(f),
            _ => None,
        })
    }

    pub fn prototypes(&self) -> impl Iterator<Item = &FunctionSignature> {
        self.body.iter().filter_map(|b| match b {
            BodyItem::Prototype(p) => Some(p),
            _ => None,
        })
    }

    pub fn dynamic_globals(&self) -> impl Iterator<Item = &GlobalItem> {
        self.globals().filter(|g| g.decl.kind == GlobalKind::Dynamic)
    }

    pub fn struct_names(&self) -> HashSet<&str> {
        self.structs.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn macro_names(&self) -> HashSet<&str> {
        self.macros.iter().map(|m| m.name.as_str()).collect()
    }
}

struct Candidate {
    decl: Declaration,
    declarator: Declarator,
    order: usize,
}

pub fn extract_stage(src: &StageSource, stage: ShaderStage) -> StageProgram {
    let macro_refs: Vec<&MacroDef> = src.macros.iter().collect();
    let tokens = expand_qualifier_macros(&src.tokens, &macro_refs);
    let items = parse_items(&tokens);

    let mut program = StageProgram {
        macros: src.macros.iter().cloned().collect(),
        errors: src.errors.clone(),
        pragmas: src.pragmas.clone(),
        ..Default::default()
    };

    // Source order, resolved once reachability and classification are known.
    enum Slot {
        Global(usize),
        Function(usize),
        Prototype(FunctionSignature),
        Raw(Vec<Token>),
    }
    let mut slots = Vec::new();
    let mut candidates: Vec<Candidate> = Vec::new();
    let mut functions: Vec<FunctionDef> = Vec::new();
    let mut function_keys = HashSet::new();
    let mut struct_names = HashSet::new();
    let mut uniform_names = HashSet::new();

    for item in items {
        match item {
            Item::Precision(_) => {}
            Item::Struct(s) => {
                if struct_names.insert(s.name.clone()) {
                    program.structs.push(s);
                }
            }
            Item::Block(b) if b.is_uniform() => {
                uniform_names.extend(b.member_names().map(str::to_string));
                uniform_names.extend(b.instance.clone());
                program.blocks.push(b);
            }
            Item::Block(b) => slots.push(Slot::Raw(b.tokens)),
            Item::Declaration(d) if d.has_qualifier("uniform") => {
                let fresh: Vec<Declarator> = d
                    .declarators
                    .iter()
                    .filter(|x| uniform_names.insert(x.name.clone()))
                    .cloned()
                    .collect();
                if !fresh.is_empty() {
                    program.uniforms.push(Declaration {
                        declarators: fresh,
                        ..d
                    });
                }
            }
            Item::Declaration(d)
                if d.has_qualifier("in")
                    || d.has_qualifier("attribute")
                    || (d.has_qualifier("varying") && stage == ShaderStage::Fragment) =>
            {
                program.inputs.push(d)
            }
            Item::Declaration(d) if d.has_qualifier("out") || d.has_qualifier("varying") => {
                program.outputs.push(d)
            }
            Item::Declaration(d) => {
                for declarator in &d.declarators {
                    let order = candidates.len();
                    candidates.push(Candidate {
                        decl: Declaration {
                            declarators: Vec::new(),
                            ..d.clone()
                        },
                        declarator: declarator.clone(),
                        order,
                    });
                    slots.push(Slot::Global(order));
                }
            }
            Item::Function(f) => {
                if function_keys.insert(f.signature.key()) {
                    slots.push(Slot::Function(functions.len()));
                    functions.push(f);
                } else {
                    debug!(
                        "[extract] duplicate definition of {} dropped",
                        f.signature.key()
                    );
                }
            }
            Item::Prototype(p) => slots.push(Slot::Prototype(p)),
            Item::Other(tokens) => {
                warn!(
                    "[extract] {} line {}: unrecognized top-level statement `{}` kept verbatim",
                    stage.as_str(),
                    tokens.first().map_or(0, |t| t.line),
                    join_tokens(&tokens)
                );
                slots.push(Slot::Raw(tokens));
            }
        }
    }

    // Sentinel promotion.
    let mut macro_names: HashSet<String> = program.macros.iter().map(|m| m.name.clone()).collect();
    let mut dropped_globals = HashSet::new();
    let mut seen_globals = HashSet::new();
    for c in &candidates {
        let name = &c.declarator.name;
        if macro_names.contains(name) {
            debug!("[extract] `{name}` is both a macro and a global; keeping the macro");
            dropped_globals.insert(c.order);
            continue;
        }
        if !seen_globals.insert(name.clone()) {
            debug!("[extract] duplicate global `{name}` dropped");
            dropped_globals.insert(c.order);
            continue;
        }
        if src.sentinels_used.contains(name) && c.decl.has_qualifier("const") {
            if let Some(literal) = c.declarator.init.as_deref().and_then(literal_text) {
                program.macros.push(MacroDef::object(name.clone(), literal));
                program.promoted.push(name.clone());
                macro_names.insert(name.clone());
                dropped_globals.insert(c.order);
            }
        }
    }

    // Reachability from main.
    let mut fn_by_name: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, f) in functions.iter().enumerate() {
        fn_by_name.entry(f.signature.name.as_str()).or_default().push(i);
    }
    let global_by_name: HashMap<&str, usize> = candidates
        .iter()
        .filter(|c| !dropped_globals.contains(&c.order))
        .map(|c| (c.declarator.name.as_str(), c.order))
        .collect();
    let macro_by_name: HashMap<&str, &MacroDef> =
        program.macros.iter().map(|m| (m.name.as_str(), m)).collect();
    let struct_by_name: HashMap<&str, &StructDef> =
        program.structs.iter().map(|s| (s.name.as_str(), s)).collect();

    program.has_main = fn_by_name.contains_key("main");
    let mut referenced: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    queue.push_back("main".to_string());
    // Interface declarations are always emitted; their types must be too.
    for d in program.uniforms.iter().chain(&program.inputs).chain(&program.outputs) {
        queue.push_back(d.ty.clone());
        for x in &d.declarators {
            push_idents(x.array.iter().flatten(), &mut queue);
        }
    }
    for b in &program.blocks {
        push_idents(b.tokens.iter(), &mut queue);
    }
    while let Some(name) = queue.pop_front() {
        if !referenced.insert(name.clone()) {
            continue;
        }
        if let Some(indices) = fn_by_name.get(name.as_str()) {
            for &i in indices {
                let f = &functions[i];
                queue.push_back(f.signature.return_type.clone());
                for p in &f.signature.params {
                    queue.push_back(p.ty.clone());
                }
                push_idents(f.body.iter(), &mut queue);
            }
        }
        if let Some(&g) = global_by_name.get(name.as_str()) {
            let c = &candidates[g];
            queue.push_back(c.decl.ty.clone());
            push_idents(
                c.declarator.array.iter().flatten().chain(c.declarator.init.iter().flatten()),
                &mut queue,
            );
        }
        if let Some(m) = macro_by_name.get(name.as_str()) {
            push_idents(tokenize(&m.body).iter(), &mut queue);
        }
        if let Some(s) = struct_by_name.get(name.as_str()) {
            push_idents(s.tokens.iter(), &mut queue);
        }
    }

    let reachable_fns: Vec<&FunctionDef> = functions
        .iter()
        .filter(|f| referenced.contains(&f.signature.name))
        .collect();

    // Classification.
    let candidate_names: HashSet<&str> = global_by_name.keys().copied().collect();
    let out_params = out_parameter_table(&functions);
    let mut assigned: HashSet<String> = HashSet::new();
    for f in &reachable_fns {
        assigned.extend(assigned_globals(f, &candidate_names, &out_params, &struct_by_name));
    }

    let interface_names: HashSet<&str> = program
        .uniforms
        .iter()
        .chain(&program.inputs)
        .chain(&program.outputs)
        .flat_map(|d| d.names())
        .chain(program.blocks.iter().flat_map(|b| b.member_names()))
        .chain(program.blocks.iter().filter_map(|b| b.instance.as_deref()))
        .collect();
    let user_fns: HashSet<&str> = fn_by_name.keys().copied().collect();

    let mut constant_globals: HashSet<String> = HashSet::new();
    let mut emitted: HashMap<usize, GlobalItem> = HashMap::new();
    for c in &candidates {
        let name = &c.declarator.name;
        if dropped_globals.contains(&c.order) || !referenced.contains(name) {
            continue;
        }
        let const_init = c.declarator.init.as_ref().is_some_and(|init| {
            let ctx = ConstContext {
                macros: &macro_by_name,
                interface: &interface_names,
                user_fns: &user_fns,
                globals: &global_by_name,
                constant_globals: &constant_globals,
            };
            ctx.is_constant(init, 0)
        });
        let kind = if c.declarator.init.is_some() && const_init && !assigned.contains(name) {
            GlobalKind::Constant
        } else {
            GlobalKind::Dynamic
        };
        if kind == GlobalKind::Constant && c.decl.has_qualifier("const") {
            constant_globals.insert(name.clone());
        } else if kind == GlobalKind::Dynamic && c.decl.has_qualifier("const") {
            warn!(
                "[extract] const global `{name}` has a non-constant initializer; emitted as a plain global"
            );
        }
        emitted.insert(
            c.order,
            GlobalItem {
                decl: GlobalDeclaration {
                    name: name.clone(),
                    ty: c.decl.ty.clone(),
                    array: c.declarator.array.as_deref().map(join_tokens),
                    kind,
                    initializer: c.declarator.init.as_deref().map(join_tokens),
                    is_const: c.decl.has_qualifier("const") && kind == GlobalKind::Constant,
                },
                precision: c.decl.precision().map(str::to_string),
                array: c.declarator.array.clone(),
                init: c.declarator.init.clone(),
                line: c.declarator.line,
            },
        );
    }

    let reachable_keys: HashSet<String> = reachable_fns.iter().map(|f| f.signature.key()).collect();
    for slot in slots {
        match slot {
            Slot::Global(order) => {
                if let Some(g) = emitted.remove(&order) {
                    program.body.push(BodyItem::Global(g));
                }
            }
            Slot::Function(i) => {
                if reachable_keys.contains(&functions[i].signature.key()) {
                    program.body.push(BodyItem::Function(functions[i].clone()));
                }
            }
            Slot::Prototype(p) => {
                if referenced.contains(&p.name) && p.name != "main" {
                    program.body.push(BodyItem::Prototype(p));
                }
            }
            Slot::Raw(tokens) => program.body.push(BodyItem::Raw(tokens)),
        }
    }

    program
}

fn push_idents<'a>(tokens: impl Iterator<Item = &'a Token>, queue: &mut VecDeque<String>) {
    for t in tokens {
        if t.is_ident() {
            queue.push_back(t.text.clone());
        }
    }
}

/// For each function name, one entry per overload: which parameters are written.
fn out_parameter_table(functions: &[FunctionDef]) -> HashMap<String, Vec<Vec<bool>>> {
    let mut table: HashMap<String, Vec<Vec<bool>>> = HashMap::new();
    for f in functions {
        let flags: Vec<bool> = f
            .signature
            .params
            .iter()
            .map(|p| p.qualifier == "out" || p.qualifier == "inout")
            .collect();
        if flags.iter().any(|&b| b) {
            table.entry(f.signature.name.clone()).or_default().push(flags);
        }
    }
    table
}

/// Names declared locally anywhere in `f` (parameters included).
fn local_names(f: &FunctionDef, structs: &HashMap<&str, &StructDef>) -> HashSet<String> {
    let mut locals: HashSet<String> = f.signature.params.iter().map(|p| p.name.clone()).collect();
    let toks = &f.body;
    let is_type = |t: &Token| t.is_ident() && (is_builtin_type(&t.text) || structs.contains_key(t.text.as_str()));
    let ends_declarator = |t: Option<&Token>| {
        t.is_some_and(|t| t.is_punct("=") || t.is_punct(";") || t.is_punct(",") || t.is_punct("[") || t.is_punct(")"))
    };
    let mut i = 0;
    while i + 1 < toks.len() {
        if !(is_type(&toks[i]) && toks[i + 1].is_ident() && !is_type(&toks[i + 1])) {
            i += 1;
            continue;
        }
        if !ends_declarator(toks.get(i + 2)) {
            i += 1;
            continue;
        }
        locals.insert(toks[i + 1].text.clone());
        // Further declarators in the same statement.
        let mut depth = 0i32;
        let mut j = i + 2;
        while let Some(t) = toks.get(j) {
            match t.text.as_str() {
                "(" | "[" | "{" if t.kind == TokenKind::Punct => depth += 1,
                ")" | "]" | "}" if t.kind == TokenKind::Punct => {
                    depth -= 1;
                    if depth < 0 {
                        break;
                    }
                }
                ";" if t.kind == TokenKind::Punct => break,
                "," if t.kind == TokenKind::Punct && depth == 0 => {
                    if let Some(n) = toks.get(j + 1).filter(|n| n.is_ident()) {
                        if ends_declarator(toks.get(j + 2)) {
                            locals.insert(n.text.clone());
                        }
                    }
                }
                _ => {}
            }
            j += 1;
        }
        i += 2;
    }
    locals
}

/// Globals written by `f`, skipping names shadowed by a local.
fn assigned_globals(
    f: &FunctionDef,
    candidates: &HashSet<&str>,
    out_params: &HashMap<String, Vec<Vec<bool>>>,
    structs: &HashMap<&str, &StructDef>,
) -> HashSet<String> {
    let locals = local_names(f, structs);
    let toks = &f.body;
    let is_target = |i: usize| {
        let t = &toks[i];
        t.is_ident()
            && candidates.contains(t.text.as_str())
            && !locals.contains(&t.text)
            && !(i > 0 && toks[i - 1].is_punct("."))
    };
    let mut out = HashSet::new();
    for i in 0..toks.len() {
        if is_target(i) {
            let mut j = i + 1;
            loop {
                match toks.get(j) {
                    Some(t) if t.is_punct("[") => match find_matching(toks, j) {
                        Some(c) => j = c + 1,
                        None => break,
                    },
                    Some(t) if t.is_punct(".") && toks.get(j + 1).is_some_and(Token::is_ident) => j += 2,
                    _ => break,
                }
            }
            let writes_after = toks.get(j).is_some_and(|t| {
                t.kind == TokenKind::Punct
                    && (ASSIGNMENT_OPS.contains(&t.text.as_str()) || t.text == "++" || t.text == "--")
            });
            let writes_before = i > 0 && (toks[i - 1].is_punct("++") || toks[i - 1].is_punct("--"));
            if writes_after || writes_before {
                out.insert(toks[i].text.clone());
            }
            continue;
        }

        // out/inout arguments of user functions
        let t = &toks[i];
        let Some(overloads) = out_params.get(&t.text) else {
            continue;
        };
        if !t.is_ident() || !toks.get(i + 1).is_some_and(|n| n.is_punct("(")) {
            continue;
        }
        let Some(close) = find_matching(toks, i + 1) else {
            continue;
        };
        let args = split_top_level_commas(&toks[i + 2..close]);
        for flags in overloads.iter().filter(|f| f.len() == args.len()) {
            for (arg, &writes) in args.iter().zip(flags) {
                if !writes {
                    continue;
                }
                let Some(root) = arg.first() else { continue };
                let is_lvalue_root = arg.len() == 1 || arg.get(1).is_some_and(|n| n.is_punct(".") || n.is_punct("["));
                if is_lvalue_root
                    && root.is_ident()
                    && candidates.contains(root.text.as_str())
                    && !locals.contains(&root.text)
                {
                    out.insert(root.text.clone());
                }
            }
        }
    }
    out
}

struct ConstContext<'a> {
    macros: &'a HashMap<&'a str, &'a MacroDef>,
    interface: &'a HashSet<&'a str>,
    user_fns: &'a HashSet<&'a str>,
    globals: &'a HashMap<&'a str, usize>,
    constant_globals: &'a HashSet<String>,
}

impl ConstContext<'_> {
    /// Whether `tokens` form a constant expression the target accepts at file scope.
    fn is_constant(&self, tokens: &[Token], depth: usize) -> bool {
        if depth > 16 {
            return false;
        }
        for (i, t) in tokens.iter().enumerate() {
            if !t.is_ident() || (i > 0 && tokens[i - 1].is_punct(".")) {
                continue;
            }
            let name = t.text.as_str();
            let called = tokens.get(i + 1).is_some_and(|n| n.is_punct("("));
            if let Some(m) = self.macros.get(name) {
                if !self.is_constant(&tokenize(&m.body), depth + 1) {
                    return false;
                }
                continue;
            }
            if called {
                if self.user_fns.contains(name) || (name.starts_with("texture") && is_builtin_function(name)) {
                    return false;
                }
                continue;
            }
            if self.interface.contains(name) {
                return false;
            }
            if self.globals.contains_key(name) && !self.constant_globals.contains(name) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::preprocess::{PreprocessOptions, preprocess_stage};

    fn stage(src: &str) -> StageProgram {
        let pre = preprocess_stage(&tokenize(src), ShaderStage::Fragment, &PreprocessOptions::default());
        extract_stage(&pre, ShaderStage::Fragment)
    }

    fn global<'a>(p: &'a StageProgram, name: &str) -> &'a GlobalItem {
        p.globals()
            .find(|g| g.decl.name == name)
            .unwrap_or_else(|| panic!("global `{name}` not emitted"))
    }

    #[test]
    fn parses_top_level_items() {
        let src = "precision highp float;\n\
                   struct Light { vec3 dir; float power; };\n\
                   layout(push_constant) uniform Push { vec4 SourceSize; uint FrameCount; } params;\n\
                   layout(location = 0) in vec2 vTexCoord;\n\
                   float a = 1.0, b;\n\
                   vec3 tone(vec3 c);\n\
                   vec3 tone(vec3 c) { return c; }\n";
        let items = parse_items(&tokenize(src));
        assert!(matches!(items[0], Item::Precision(_)));
        assert!(matches!(&items[1], Item::Struct(s) if s.name == "Light"));
        match &items[2] {
            Item::Block(b) => {
                assert!(b.is_push_constant());
                assert_eq!(b.instance.as_deref(), Some("params"));
                assert_eq!(b.member_names().collect::<Vec<_>>(), vec!["SourceSize", "FrameCount"]);
            }
            other => panic!("expected block, got {other:?}"),
        }
        match &items[3] {
            Item::Declaration(d) => assert_eq!(d.location(), Some(0)),
            other => panic!("expected declaration, got {other:?}"),
        }
        match &items[4] {
            Item::Declaration(d) => assert_eq!(d.names().collect::<Vec<_>>(), vec!["a", "b"]),
            other => panic!("expected declaration, got {other:?}"),
        }
        assert!(matches!(&items[5], Item::Prototype(p) if p.name == "tone"));
        assert!(matches!(&items[6], Item::Function(f) if f.signature.key() == "tone(vec3)"));
    }

    #[test]
    fn assigned_globals_are_dynamic() {
        let src = "float gain = 1.0;\n\
                   float bias = 0.5;\n\
                   int counter = 0;\n\
                   vec3 tint = vec3(1.0);\n\
                   void bump() { counter++; tint.r *= 0.5; }\n\
                   void main() { gain = gain * 2.0; bump(); float x = bias; }\n";
        let p = stage(src);
        assert_eq!(global(&p, "gain").decl.kind, GlobalKind::Dynamic);
        assert_eq!(global(&p, "counter").decl.kind, GlobalKind::Dynamic);
        assert_eq!(global(&p, "tint").decl.kind, GlobalKind::Dynamic);
        assert_eq!(global(&p, "bias").decl.kind, GlobalKind::Constant);
    }

    #[test]
    fn shadowed_assignments_do_not_count() {
        let src = "float level = 0.25;\n\
                   float read() { return level; }\n\
                   void main() { float level = read(); level += 2.0; }\n";
        let p = stage(src);
        assert_eq!(global(&p, "level").decl.kind, GlobalKind::Constant);
    }

    #[test]
    fn plain_globals_are_not_constant_expressions() {
        let src = "float base = 1.0;\nfloat twice = base * 2.0;\nvoid main() { float t = twice; }\n";
        let p = stage(src);
        assert_eq!(global(&p, "base").decl.kind, GlobalKind::Constant);
        assert_eq!(global(&p, "twice").decl.kind, GlobalKind::Dynamic);
    }

    #[test]
    fn out_arguments_make_globals_dynamic() {
        let src = "vec2 coords = vec2(0.0);\n\
                   void fill(out vec2 c) { c = vec2(1.0); }\n\
                   void main() { fill(coords); }\n";
        let p = stage(src);
        assert_eq!(global(&p, "coords").decl.kind, GlobalKind::Dynamic);
    }

    #[test]
    fn uniform_dependent_initializers_are_dynamic() {
        let src = "uniform vec4 SourceSize;\n\
                   vec2 texel = 1.0 / SourceSize.xy;\n\
                   const float PI = 3.14159;\n\
                   float half_pi = PI * 0.5;\n\
                   void main() { vec2 t = texel * half_pi; }\n";
        let p = stage(src);
        assert_eq!(global(&p, "texel").decl.kind, GlobalKind::Dynamic);
        assert_eq!(global(&p, "half_pi").decl.kind, GlobalKind::Constant);
        assert!(global(&p, "PI").decl.is_const);
    }

    #[test]
    fn unreachable_functions_are_dropped() {
        let src = "float used() { return 1.0; }\nfloat unused() { return 2.0; }\nvoid main() { used(); }\n";
        let p = stage(src);
        let names: Vec<_> = p.functions().map(|f| f.signature.name.as_str()).collect();
        assert_eq!(names, vec!["used", "main"]);
    }

    #[test]
    fn overloads_coexist_and_duplicates_drop() {
        let src = "float f(float x) { return x; }\n\
                   vec2 f(vec2 x) { return x; }\n\
                   float f(float y) { return y * 2.0; }\n\
                   void main() { f(1.0); }\n";
        let p = stage(src);
        let keys: Vec<_> = p.functions().map(|f| f.signature.key()).collect();
        assert_eq!(keys, vec!["f(float)", "f(vec2)", "main()"]);
    }

    #[test]
    fn macro_named_globals_keep_only_the_macro() {
        let src = "#define BLEND_MULTIPLY 2\nconst int BLEND_MULTIPLY = 2;\nvoid main() { int m = BLEND_MULTIPLY; }\n";
        let p = stage(src);
        assert!(p.globals().all(|g| g.decl.name != "BLEND_MULTIPLY"));
        assert_eq!(p.macros.iter().filter(|m| m.name == "BLEND_MULTIPLY").count(), 1);
    }

    #[test]
    fn sentinels_used_in_conditionals_become_macros() {
        let src = "const int MODE_SOFT = 1;\n#define MODE 1\n#if MODE == MODE_SOFT\nfloat soft = 1.0;\n#endif\nvoid main() { float s = soft; int k = MODE_SOFT; }\n";
        let tokens = tokenize(src);
        let mut options = PreprocessOptions::default();
        options.sentinel_values = scan_const_sentinels(&tokens);
        let pre = preprocess_stage(&tokens, ShaderStage::Fragment, &options);
        let p = extract_stage(&pre, ShaderStage::Fragment);
        assert_eq!(p.promoted, vec!["MODE_SOFT".to_string()]);
        assert!(p.globals().all(|g| g.decl.name != "MODE_SOFT"));
        assert!(p.macros.iter().any(|m| m.name == "MODE_SOFT" && m.body == "1"));
        assert!(p.globals().any(|g| g.decl.name == "soft"));
    }

    #[test]
    fn qualifier_macros_expand_for_parsing() {
        let src = "#define COMPAT_VARYING varying\n#define COMPAT_PRECISION\nCOMPAT_VARYING COMPAT_PRECISION vec2 uv;\nvoid main() { vec2 a = uv; }\n";
        let p = stage(src);
        assert_eq!(p.inputs.len(), 1);
        assert_eq!(p.inputs[0].ty, "vec2");
    }

    #[test]
    fn scans_const_sentinels_at_file_scope_only() {
        let toks = tokenize("const int A = 3;\nconst float B = -0.5;\nconst vec2 C = vec2(1.0);\nvoid f() { const int D = 4; }\n");
        let s = scan_const_sentinels(&toks);
        assert_eq!(s.get("A").map(String::as_str), Some("3"));
        assert_eq!(s.get("B").map(String::as_str), Some("-0.5"));
        assert!(!s.contains_key("C"));
        assert!(!s.contains_key("D"));
    }
}
