//! Compile cache keyed by (shader path, merged-source hash, override set).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::debug;

use super::params::ParameterOverrides;
use super::types::CompiledProgram;

pub fn hash_bytes(bytes: &[u8]) -> [u8; 32] {
    fn fnv1a64_with_seed(bytes: &[u8], seed: u64) -> u64 {
        let mut hash = 0xcbf2_9ce4_8422_2325_u64 ^ seed;
        for &b in bytes {
            hash ^= b as u64;
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        hash
    }

    let h0 = fnv1a64_with_seed(bytes, 0x0000_0000_0000_0000);
    let h1 = fnv1a64_with_seed(bytes, 0x9e37_79b9_7f4a_7c15);
    let h2 = fnv1a64_with_seed(bytes, 0xc2b2_ae3d_27d4_eb4f);
    let h3 = fnv1a64_with_seed(bytes, 0x1656_67b1_9e37_79f9);

    let mut out = [0_u8; 32];
    out[0..8].copy_from_slice(&h0.to_le_bytes());
    out[8..16].copy_from_slice(&h1.to_le_bytes());
    out[16..24].copy_from_slice(&h2.to_le_bytes());
    out[24..32].copy_from_slice(&h3.to_le_bytes());
    out
}

pub fn hash_hex(bytes: &[u8]) -> String {
    hash_bytes(bytes).iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub path: PathBuf,
    pub source_hash: [u8; 32],
    /// Canonical JSON of the overrides that apply to this shader.
    pub overrides: String,
}

impl CacheKey {
    pub fn new(path: &Path, merged_source: &str, overrides: &ParameterOverrides) -> Self {
        Self {
            path: path.to_path_buf(),
            source_hash: hash_bytes(merged_source.as_bytes()),
            overrides: serde_json::to_string(overrides).unwrap_or_default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Debug, Default)]
pub struct CompileCache {
    entries: HashMap<CacheKey, Arc<CompiledProgram>>,
    stats: CacheStats,
}

pub type SharedCompileCache = Arc<Mutex<CompileCache>>;

impl CompileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedCompileCache {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn get(&mut self, key: &CacheKey) -> Option<Arc<CompiledProgram>> {
        match self.entries.get(key) {
            Some(program) => {
                self.stats.hits += 1;
                Some(program.clone())
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Insert a program, dropping entries for the same path built from other source.
    pub fn insert(&mut self, key: CacheKey, program: Arc<CompiledProgram>) {
        let before = self.entries.len();
        self.entries
            .retain(|k, _| k.path != key.path || k.source_hash == key.source_hash);
        let evicted = before - self.entries.len();
        if evicted > 0 {
            debug!(
                "[cache] {}: source changed, evicted {evicted} stale entr{}",
                key.path.display(),
                if evicted == 1 { "y" } else { "ies" }
            );
            self.stats.evictions += evicted as u64;
        }
        self.entries.insert(key, program);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program(name: &str) -> Arc<CompiledProgram> {
        Arc::new(CompiledProgram {
            name: name.to_string(),
            path: PathBuf::from(name),
            vertex_source: String::new(),
            fragment_source: String::new(),
            uniforms: Vec::new(),
            samplers: Vec::new(),
            parameters: Vec::new(),
            alias: None,
            format: None,
            stubs: Vec::new(),
            dynamic_globals: Vec::new(),
            source_hash: String::new(),
        })
    }

    #[test]
    fn hash_is_stable_and_sensitive() {
        assert_eq!(hash_bytes(b"abc"), hash_bytes(b"abc"));
        assert_ne!(hash_bytes(b"abc"), hash_bytes(b"abd"));
        assert_eq!(hash_hex(b"").len(), 64);
    }

    #[test]
    fn keys_include_overrides() {
        let mut a = ParameterOverrides::new();
        a.insert("MASK".into(), 1.0);
        let mut b = ParameterOverrides::new();
        b.insert("MASK".into(), 2.0);
        let p = Path::new("crt.slang");
        assert_ne!(CacheKey::new(p, "src", &a), CacheKey::new(p, "src", &b));
        assert_eq!(CacheKey::new(p, "src", &a), CacheKey::new(p, "src", &a));
    }

    #[test]
    fn source_change_evicts_only_that_path() {
        let mut cache = CompileCache::new();
        let none = ParameterOverrides::new();
        let mut one = ParameterOverrides::new();
        one.insert("X".into(), 1.0);
        let crt = Path::new("crt.slang");
        let blur = Path::new("blur.slang");

        cache.insert(CacheKey::new(crt, "v1", &none), program("crt"));
        cache.insert(CacheKey::new(crt, "v1", &one), program("crt"));
        cache.insert(CacheKey::new(blur, "b1", &none), program("blur"));
        assert_eq!(cache.len(), 3);

        cache.insert(CacheKey::new(crt, "v2", &none), program("crt"));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 2);
        assert!(cache.get(&CacheKey::new(blur, "b1", &none)).is_some());
        assert!(cache.get(&CacheKey::new(crt, "v1", &none)).is_none());
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }
}
