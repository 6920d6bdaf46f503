//! `#include` expansion.
//!
//! Depth-first. Every path is normalized lexically before it is looked up, so a file
//! reached through `a/../b.inc` and `b.inc` is inlined once. A path that is already
//! on the expansion stack is a cycle and is skipped with a warning.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use super::types::ShaderUnit;
use crate::error::{ChainError, ChainResult};
use crate::source_store::{SourceFetcher, normalize_path, resolve_relative};

#[derive(Default)]
struct Expansion {
    visited: HashSet<PathBuf>,
    stack: Vec<PathBuf>,
    includes: Vec<PathBuf>,
    out: String,
}

pub fn resolve_includes(entry: &Path, fetcher: &dyn SourceFetcher) -> ChainResult<ShaderUnit> {
    let entry = normalize_path(entry);
    let mut state = Expansion::default();
    let text = fetcher.fetch_text(&entry)?;
    state.visited.insert(entry.clone());
    state.stack.push(entry.clone());
    expand(&entry, &text, fetcher, &mut state)?;
    Ok(ShaderUnit {
        path: entry,
        source: state.out,
        includes: state.includes,
    })
}

/// Target of an `#include` line, if the line is one.
pub fn include_target(line: &str) -> Option<&str> {
    let rest = line.trim_start().strip_prefix('#')?.trim_start();
    let rest = rest.strip_prefix("include")?.trim();
    let (open, close) = match rest.chars().next()? {
        '"' => ('"', '"'),
        '<' => ('<', '>'),
        _ => return None,
    };
    let inner = rest.strip_prefix(open)?;
    let end = inner.find(close)?;
    Some(&inner[..end])
}

fn expand(
    path: &Path,
    text: &str,
    fetcher: &dyn SourceFetcher,
    state: &mut Expansion,
) -> ChainResult<()> {
    for line in text.lines() {
        let Some(target) = include_target(line) else {
            state.out.push_str(line);
            state.out.push('\n');
            continue;
        };

        let child = resolve_relative(path, target);
        if state.stack.contains(&child) {
            warn!(
                "[include] cycle: {} includes {} which is already being expanded; skipped",
                path.display(),
                child.display()
            );
            continue;
        }
        if !state.visited.insert(child.clone()) {
            debug!("[include] {} already included", child.display());
            continue;
        }

        let child_text = fetcher.fetch_text(&child).map_err(|e| match e {
            ChainError::Resolution { message, .. } => ChainError::Resolution {
                path: child.clone(),
                message: format!("included from {}: {}", path.display(), message),
            },
            other => other,
        })?;
        state.includes.push(child.clone());
        state.stack.push(child.clone());
        expand(&child, &child_text, fetcher, state)?;
        state.stack.pop();
    }
    Ok(())
}
