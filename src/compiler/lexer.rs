//! Minimal GLSL tokenizer.
//!
//! Comments are dropped. Preprocessor lines become a single `Directive` token whose
//! text excludes the leading `#`, has line continuations joined and trailing
//! comments removed. Everything else is identifiers, numbers, strings and
//! punctuation, each tagged with its 1-based line/column.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    Number,
    Str,
    Punct,
    Directive,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            line,
            column,
        }
    }

    /// Synthetic token without a source position.
    pub fn synthetic(kind: TokenKind, text: impl Into<String>) -> Self {
        Self::new(kind, text, 0, 0)
    }

    pub fn is_ident(&self) -> bool {
        self.kind == TokenKind::Ident
    }

    pub fn is_ident_named(&self, name: &str) -> bool {
        self.kind == TokenKind::Ident && self.text == name
    }

    pub fn is_punct(&self, p: &str) -> bool {
        self.kind == TokenKind::Punct && self.text == p
    }

    /// Directive name, e.g. `define` for `#define X 1`.
    pub fn directive_name(&self) -> Option<&str> {
        if self.kind != TokenKind::Directive {
            return None;
        }
        let rest = self.text.trim_start();
        let end = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        Some(&rest[..end])
    }

    /// Directive text after its name, trimmed.
    pub fn directive_body(&self) -> &str {
        let Some(name) = self.directive_name() else {
            return "";
        };
        let rest = self.text.trim_start();
        rest[name.len()..].trim()
    }
}

pub const ASSIGNMENT_OPS: &[&str] = &[
    "=", "+=", "-=", "*=", "/=", "%=", "<<=", ">>=", "&=", "|=", "^=",
];

const PUNCT3: &[&str] = &["<<=", ">>="];
const PUNCT2: &[&str] = &[
    "++", "--", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "==", "!=", "<=", ">=", "&&",
    "||", "^^", "<<", ">>",
];

struct Cursor {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    at_line_start: bool,
}

impl Cursor {
    fn new(src: &str) -> Self {
        Self {
            chars: src.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            at_line_start: true,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
            self.at_line_start = true;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn starts_with(&self, s: &str) -> bool {
        s.chars()
            .enumerate()
            .all(|(i, c)| self.peek_at(i) == Some(c))
    }
}

pub fn tokenize(source: &str) -> Vec<Token> {
    let mut cur = Cursor::new(source);
    let mut out = Vec::new();

    while let Some(c) = cur.peek() {
        if c == '\n' {
            cur.bump();
            continue;
        }
        if c.is_whitespace() {
            cur.bump();
            continue;
        }
        if cur.starts_with("//") {
            while let Some(c) = cur.peek() {
                if c == '\n' {
                    break;
                }
                cur.bump();
            }
            continue;
        }
        if cur.starts_with("/*") {
            let was_line_start = cur.at_line_start;
            cur.bump();
            cur.bump();
            while cur.peek().is_some() && !cur.starts_with("*/") {
                cur.bump();
            }
            cur.bump();
            cur.bump();
            // A block comment before `#` on the same line keeps the line "fresh".
            if was_line_start {
                cur.at_line_start = true;
            }
            continue;
        }

        let line = cur.line;
        let column = cur.column;

        if c == '#' && cur.at_line_start {
            cur.bump();
            let text = read_directive(&mut cur);
            out.push(Token::new(TokenKind::Directive, text, line, column));
            continue;
        }
        cur.at_line_start = false;

        if c.is_ascii_alphabetic() || c == '_' {
            let mut text = String::new();
            while let Some(c) = cur.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    text.push(c);
                    cur.bump();
                } else {
                    break;
                }
            }
            out.push(Token::new(TokenKind::Ident, text, line, column));
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && cur.peek_at(1).is_some_and(|d| d.is_ascii_digit()))
        {
            let text = read_number(&mut cur);
            out.push(Token::new(TokenKind::Number, text, line, column));
            continue;
        }

        if c == '"' {
            cur.bump();
            let mut text = String::new();
            while let Some(c) = cur.peek() {
                if c == '"' || c == '\n' {
                    break;
                }
                text.push(c);
                cur.bump();
            }
            if cur.peek() == Some('"') {
                cur.bump();
            }
            out.push(Token::new(TokenKind::Str, text, line, column));
            continue;
        }

        let punct = PUNCT3
            .iter()
            .chain(PUNCT2.iter())
            .find(|p| cur.starts_with(p))
            .map(|p| p.to_string());
        let text = match punct {
            Some(p) => {
                for _ in 0..p.chars().count() {
                    cur.bump();
                }
                p
            }
            None => {
                cur.bump();
                c.to_string()
            }
        };
        out.push(Token::new(TokenKind::Punct, text, line, column));
    }

    out
}

fn read_number(cur: &mut Cursor) -> String {
    let mut text = String::new();
    if cur.starts_with("0x") || cur.starts_with("0X") {
        text.push(cur.bump().unwrap_or('0'));
        text.push(cur.bump().unwrap_or('x'));
        while let Some(c) = cur.peek() {
            if c.is_ascii_hexdigit() {
                text.push(c);
                cur.bump();
            } else {
                break;
            }
        }
    } else {
        while let Some(c) = cur.peek() {
            if c.is_ascii_digit() || c == '.' {
                text.push(c);
                cur.bump();
            } else if (c == 'e' || c == 'E')
                && cur
                    .peek_at(1)
                    .is_some_and(|n| n.is_ascii_digit() || n == '+' || n == '-')
            {
                text.push(c);
                cur.bump();
                if let Some(sign) = cur.peek().filter(|s| *s == '+' || *s == '-') {
                    text.push(sign);
                    cur.bump();
                }
            } else {
                break;
            }
        }
    }
    while let Some(c) = cur.peek() {
        if matches!(c, 'u' | 'U' | 'f' | 'F' | 'l' | 'L') {
            text.push(c);
            cur.bump();
        } else {
            break;
        }
    }
    text
}

fn read_directive(cur: &mut Cursor) -> String {
    let mut raw = String::new();
    while let Some(c) = cur.peek() {
        if c == '\\' && cur.peek_at(1) == Some('\n') {
            cur.bump();
            cur.bump();
            raw.push(' ');
            continue;
        }
        if c == '\\' && cur.peek_at(1) == Some('\r') && cur.peek_at(2) == Some('\n') {
            cur.bump();
            cur.bump();
            cur.bump();
            raw.push(' ');
            continue;
        }
        if c == '\n' {
            break;
        }
        if cur.starts_with("//") {
            while cur.peek().is_some_and(|c| c != '\n') {
                cur.bump();
            }
            break;
        }
        // Block comments may span lines even inside a directive.
        if cur.starts_with("/*") {
            cur.bump();
            cur.bump();
            while cur.peek().is_some() && !cur.starts_with("*/") {
                cur.bump();
            }
            cur.bump();
            cur.bump();
            raw.push(' ');
            continue;
        }
        raw.push(c);
        cur.bump();
    }
    raw.trim().to_string()
}

fn is_word(t: &Token) -> bool {
    matches!(t.kind, TokenKind::Ident | TokenKind::Number)
}

const SPACED_OPS: &[&str] = &[
    "=", "+=", "-=", "*=", "/=", "%=", "<<=", ">>=", "&=", "|=", "^=", "==", "!=", "<=", ">=",
    "&&", "||", "^^", "?", ":", "<", ">", "*", "/", "+", "-", "%", "&", "|", "^", "<<", ">>",
];

fn is_spaced_op(t: &Token) -> bool {
    t.kind == TokenKind::Punct && SPACED_OPS.contains(&t.text.as_str())
}

fn needs_space(prev: &Token, next: &Token) -> bool {
    if is_word(prev) && is_word(next) {
        return true;
    }
    if prev.is_punct(",") {
        return true;
    }
    if prev.kind == TokenKind::Punct && next.kind == TokenKind::Punct {
        // Never glue `-` `-` into `--`, `<` `<=` into `<<=`, etc.
        let glued = format!("{}{}", prev.text, next.text);
        if PUNCT2
            .iter()
            .chain(PUNCT3.iter())
            .any(|p| p.starts_with(glued.as_str()))
        {
            return true;
        }
    }
    is_spaced_op(prev) || is_spaced_op(next)
}

/// Render tokens back to text on one line.
pub fn join_tokens(tokens: &[Token]) -> String {
    let mut out = String::new();
    let mut prev: Option<&Token> = None;
    for t in tokens {
        if let Some(p) = prev {
            if needs_space(p, t) {
                out.push(' ');
            }
        }
        push_token_text(&mut out, t);
        prev = Some(t);
    }
    out
}

fn push_token_text(out: &mut String, t: &Token) {
    match t.kind {
        TokenKind::Str => {
            out.push('"');
            out.push_str(&t.text);
            out.push('"');
        }
        TokenKind::Directive => {
            out.push('#');
            out.push_str(&t.text);
        }
        _ => out.push_str(&t.text),
    }
}

/// Render tokens as indented statements: one statement per line, braces open and
/// close lines, `for (;;)` headers stay on one line.
pub fn format_block(tokens: &[Token], base_indent: usize) -> String {
    let mut out = String::new();
    let mut depth: usize = 0;
    let mut paren_depth: i32 = 0;
    let mut line_open = false;
    let mut prev: Option<&Token> = None;

    for t in tokens {
        if t.is_punct("}") {
            depth = depth.saturating_sub(1);
        }
        let starts_new_line = match prev {
            None => true,
            Some(p) => {
                p.kind == TokenKind::Directive
                    || t.kind == TokenKind::Directive
                    || p.is_punct("{")
                    || (p.is_punct("}") && !t.is_punct(";"))
                    || t.is_punct("}")
                    || (p.is_punct(";") && paren_depth <= 0)
            }
        };
        if starts_new_line && line_open {
            out.push('\n');
            line_open = false;
        }
        if !line_open {
            out.push_str(&"    ".repeat(base_indent + depth));
            line_open = true;
        } else if let Some(p) = prev {
            if needs_space(p, t) {
                out.push(' ');
            }
        }
        push_token_text(&mut out, t);
        if t.is_punct("{") {
            depth += 1;
        } else if t.is_punct("(") {
            paren_depth += 1;
        } else if t.is_punct(")") {
            paren_depth -= 1;
        }
        prev = Some(t);
    }
    if line_open {
        out.push('\n');
    }
    out
}

/// Index of the token matching the opening bracket at `open`.
pub fn find_matching(tokens: &[Token], open: usize) -> Option<usize> {
    let (o, c) = match tokens.get(open)?.text.as_str() {
        "(" => ("(", ")"),
        "{" => ("{", "}"),
        "[" => ("[", "]"),
        _ => return None,
    };
    let mut depth = 0i32;
    for (i, t) in tokens.iter().enumerate().skip(open) {
        if t.kind != TokenKind::Punct {
            continue;
        }
        if t.text == o {
            depth += 1;
        } else if t.text == c {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

/// Split tokens at top-level commas.
pub fn split_top_level_commas(tokens: &[Token]) -> Vec<&[Token]> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, t) in tokens.iter().enumerate() {
        if t.kind != TokenKind::Punct {
            continue;
        }
        match t.text.as_str() {
            "(" | "[" | "{" => depth += 1,
            ")" | "]" | "}" => depth -= 1,
            "," if depth == 0 => {
                parts.push(&tokens[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if start < tokens.len() || !parts.is_empty() {
        parts.push(&tokens[start..]);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(tokens: &[Token]) -> Vec<&str> {
        tokens.iter().map(|t| t.text.as_str()).collect()
    }

    #[test]
    fn tokenizes_operators_and_numbers() {
        let toks = tokenize("x += 1.5e-3 * y; z <<= 2u;");
        assert_eq!(
            texts(&toks),
            vec!["x", "+=", "1.5e-3", "*", "y", ";", "z", "<<=", "2u", ";"]
        );
        assert_eq!(toks[2].kind, TokenKind::Number);
    }

    #[test]
    fn directives_are_single_tokens_with_comments_stripped() {
        let src = "  #define FOO 1 // trailing\nfloat a; /* c */ #not_a_directive\n#pragma parameter X \"Label\" 0.5 0.0 1.0 0.1";
        let toks = tokenize(src);
        assert_eq!(toks[0].kind, TokenKind::Directive);
        assert_eq!(toks[0].text, "define FOO 1");
        assert_eq!(toks[0].directive_name(), Some("define"));
        assert_eq!(toks[0].directive_body(), "FOO 1");
        // `#` mid-line is punctuation, not a directive.
        assert!(toks.iter().any(|t| t.is_punct("#")));
        let last = toks.last().unwrap();
        assert_eq!(last.directive_name(), Some("pragma"));
        assert_eq!(last.line, 3);
    }

    #[test]
    fn line_continuations_join_directives() {
        let toks = tokenize("#define LONG(a) \\\n  (a * 2.0)\nfloat b;");
        assert_eq!(toks[0].text, "define LONG(a)    (a * 2.0)");
        assert_eq!(toks[1].text, "float");
        assert_eq!(toks[1].line, 3);
    }

    #[test]
    fn tracks_columns() {
        let toks = tokenize("vec4 c;\n  c = vec4(1.0);");
        let c2 = &toks[3];
        assert_eq!((c2.line, c2.column), (2, 3));
    }

    #[test]
    fn join_tokens_keeps_operators_apart() {
        let toks = tokenize("a = b - -c; x++;");
        assert_eq!(join_tokens(&toks), "a = b - - c;x++;");
    }

    #[test]
    fn splits_arguments_at_top_level() {
        let toks = tokenize("s, vec2(a, b), 1.0");
        let parts = split_top_level_commas(&toks);
        assert_eq!(parts.len(), 3);
        assert_eq!(join_tokens(parts[1]), "vec2(a, b)");
    }

    #[test]
    fn finds_matching_brackets() {
        let toks = tokenize("f(a[(1)], (b))");
        assert_eq!(find_matching(&toks, 1), Some(toks.len() - 1));
    }
}
