//! Text/byte fetch capability used by the include resolver, the preset parser and
//! the lookup-texture loader.
//!
//! Paths are always normalized lexically (see [`normalize_path`]) before they reach
//! a store, so in-memory fixtures and the filesystem agree on identity.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{ChainError, ChainResult};

pub trait SourceFetcher: Send + Sync {
    fn fetch_bytes(&self, path: &Path) -> ChainResult<Vec<u8>>;

    fn fetch_text(&self, path: &Path) -> ChainResult<String> {
        let bytes = self.fetch_bytes(path)?;
        String::from_utf8(bytes)
            .map_err(|e| ChainError::resolution(path, format!("not valid UTF-8: {e}")))
    }
}

/// Resolve `.` and `..` segments without touching the filesystem.
///
/// `..` past the start of a relative path is kept, so `../a` stays `../a`.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(comp),
            },
            other => out.push(other),
        }
    }
    let mut buf = PathBuf::new();
    for comp in out {
        buf.push(comp.as_os_str());
    }
    buf
}

/// Join `relative` onto the directory containing `from`, then normalize.
pub fn resolve_relative(from: &Path, relative: &str) -> PathBuf {
    let rel = Path::new(relative);
    if rel.is_absolute() {
        return normalize_path(rel);
    }
    let base = from.parent().unwrap_or_else(|| Path::new(""));
    normalize_path(&base.join(rel))
}

/// Path of `target` as seen from directory `base`, using `..` where needed.
/// Both are normalized first; if they share no common root `target` is returned.
pub fn relative_path(base: &Path, target: &Path) -> PathBuf {
    let base = normalize_path(base);
    let target = normalize_path(target);
    if base.is_absolute() != target.is_absolute() {
        return target;
    }
    let b: Vec<Component<'_>> = base.components().collect();
    let t: Vec<Component<'_>> = target.components().collect();
    let common = b.iter().zip(&t).take_while(|(x, y)| x == y).count();
    if b[common..].iter().any(|c| matches!(c, Component::ParentDir)) {
        return target;
    }
    let mut out = PathBuf::new();
    for _ in common..b.len() {
        out.push("..");
    }
    for comp in &t[common..] {
        out.push(comp.as_os_str());
    }
    out
}

/// Thread-safe, clone-friendly in-memory store. Mostly used by tests and by hosts
/// that ship shaders embedded in the binary.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    inner: Arc<Mutex<HashMap<PathBuf, Vec<u8>>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a file.
    pub fn insert(&self, path: impl AsRef<Path>, bytes: impl Into<Vec<u8>>) {
        let key = normalize_path(path.as_ref());
        let Ok(mut map) = self.inner.lock() else {
            return;
        };
        map.insert(key, bytes.into());
    }

    pub fn with_file(self, path: impl AsRef<Path>, text: &str) -> Self {
        self.insert(path, text.as_bytes().to_vec());
        self
    }

    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        let key = normalize_path(path.as_ref());
        self.inner
            .lock()
            .ok()
            .is_some_and(|map| map.contains_key(&key))
    }

    pub fn remove(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        let key = normalize_path(path.as_ref());
        self.inner.lock().ok()?.remove(&key)
    }
}

impl SourceFetcher for MemorySource {
    fn fetch_bytes(&self, path: &Path) -> ChainResult<Vec<u8>> {
        let key = normalize_path(path);
        let map = self
            .inner
            .lock()
            .map_err(|_| ChainError::resolution(&key, "source store lock poisoned"))?;
        map.get(&key)
            .cloned()
            .ok_or_else(|| ChainError::resolution(&key, "no such file"))
    }
}

/// Reads from disk, optionally rooted at a base directory for relative paths.
#[derive(Debug, Clone, Default)]
pub struct FsSource {
    root: Option<PathBuf>,
}

impl FsSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn full_path(&self, path: &Path) -> PathBuf {
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl SourceFetcher for FsSource {
    fn fetch_bytes(&self, path: &Path) -> ChainResult<Vec<u8>> {
        let full = self.full_path(path);
        std::fs::read(&full).map_err(|e| ChainError::resolution(path, e.to_string()))
    }
}
