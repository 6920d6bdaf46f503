//! `#pragma parameter` parsing and default-value injection.

use std::collections::{BTreeMap, HashSet};

use log::warn;

use super::lexer::{Token, TokenKind, tokenize};
use super::types::ParameterDeclaration;
use crate::error::{ChainError, ChainResult};

/// Parameter name → value. Ordered so the set has one canonical serialization.
pub type ParameterOverrides = BTreeMap<String, f32>;

/// Format a value the way shader sources spell float literals (`1.0`, `0.35`).
pub fn format_float(value: f32) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1.0e9 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

/// Parse the text after `#pragma parameter`.
pub fn parse_parameter(args: &str, line: usize) -> ChainResult<ParameterDeclaration> {
    let err = |message: String| ChainError::Extraction { line, message };
    let tokens = tokenize(args);
    let mut iter = tokens.iter().peekable();

    let name = match iter.next() {
        Some(t) if t.is_ident() => t.text.clone(),
        _ => return Err(err("parameter is missing a name".to_string())),
    };
    let label = match iter.next() {
        Some(t) if t.kind == TokenKind::Str => t.text.clone(),
        _ => return Err(err(format!("parameter `{name}` is missing a quoted label"))),
    };

    let mut numbers = Vec::new();
    while let Some(tok) = iter.next() {
        let (negative, tok) = if tok.is_punct("-") {
            match iter.next() {
                Some(next) => (true, next),
                None => return Err(err(format!("parameter `{name}` ends with a dangling `-`"))),
            }
        } else if tok.is_punct("+") {
            match iter.next() {
                Some(next) => (false, next),
                None => return Err(err(format!("parameter `{name}` ends with a dangling `+`"))),
            }
        } else {
            (false, tok)
        };
        if tok.kind != TokenKind::Number {
            return Err(err(format!(
                "parameter `{name}` has a non-numeric field `{}`",
                tok.text
            )));
        }
        let value: f32 = tok
            .text
            .trim_end_matches(['f', 'F'])
            .parse()
            .map_err(|_| err(format!("parameter `{name}` has a bad number `{}`", tok.text)))?;
        numbers.push(if negative { -value } else { value });
    }

    if numbers.len() < 3 {
        return Err(err(format!(
            "parameter `{name}` needs default, min and max (found {} value(s))",
            numbers.len()
        )));
    }
    Ok(ParameterDeclaration {
        name,
        label,
        default: numbers[0],
        min: numbers[1],
        max: numbers[2],
        step: numbers.get(3).copied().unwrap_or(0.0),
    })
}

fn parameter_args(tok: &Token) -> Option<&str> {
    if tok.directive_name() != Some("pragma") {
        return None;
    }
    tok.directive_body()
        .strip_prefix("parameter")
        .filter(|rest| rest.starts_with(char::is_whitespace))
}

/// Collect every parameter annotation in a merged unit. The first declaration of a
/// name wins; malformed annotations are skipped with a warning.
pub fn scan_parameters(tokens: &[Token]) -> Vec<ParameterDeclaration> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for tok in tokens {
        let Some(args) = parameter_args(tok) else {
            continue;
        };
        match parse_parameter(args, tok.line) {
            Ok(decl) => {
                if seen.insert(decl.name.clone()) {
                    out.push(decl);
                }
            }
            Err(e) => warn!("[params] skipping annotation: {e}"),
        }
    }
    out
}

/// Rewrite the default field of each overridden `#pragma parameter` line. Every
/// other byte of the source is preserved, so injecting twice is a no-op.
pub fn inject_overrides(source: &str, overrides: &ParameterOverrides) -> String {
    if overrides.is_empty() {
        return source.to_string();
    }
    let mut out = String::with_capacity(source.len());
    for line in source.split_inclusive('\n') {
        match rewrite_line(line, overrides) {
            Some(rewritten) => out.push_str(&rewritten),
            None => out.push_str(line),
        }
    }
    out
}

fn rewrite_line(line: &str, overrides: &ParameterOverrides) -> Option<String> {
    let trimmed = line.trim_start();
    let after_hash = trimmed.strip_prefix('#')?.trim_start();
    let after_pragma = after_hash.strip_prefix("pragma")?;
    let after_pragma = after_pragma.trim_start();
    let after_kw = after_pragma.strip_prefix("parameter")?;
    if !after_kw.starts_with(char::is_whitespace) {
        return None;
    }
    let rest = after_kw.trim_start();
    let name_len = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    let name = &rest[..name_len];
    let value = overrides.get(name)?;

    // Default field: the first number after the quoted label.
    let rest_offset = line.len() - rest.len();
    let open = rest.find('"')?;
    let close = open + 1 + rest[open + 1..].find('"')?;
    let after_label = &rest[close + 1..];
    let lead = after_label.len() - after_label.trim_start().len();
    let field = after_label.trim_start();
    let field_len = field
        .find(char::is_whitespace)
        .unwrap_or(field.len());
    if field_len == 0 {
        return None;
    }
    let start = rest_offset + close + 1 + lead;
    let end = start + field_len;

    let mut rewritten = String::with_capacity(line.len() + 8);
    rewritten.push_str(&line[..start]);
    rewritten.push_str(&format_float(*value));
    rewritten.push_str(&line[end..]);
    Some(rewritten)
}
