//! Sampler name resolution.
//!
//! Resolution runs once per pass when a preset is installed, producing a
//! [`BindingSource`] per sampler; [`FrameTextures`] turns those into concrete
//! textures every frame.

use std::collections::HashMap;

use log::warn;
use serde::Serialize;

use super::backend::TextureId;

/// Alias name → index of the pass that declared it.
#[derive(Debug, Default, Clone)]
pub struct AliasTable {
    aliases: HashMap<String, usize>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `alias` for pass `index`. A name already taken keeps its first owner.
    pub fn register(&mut self, alias: &str, index: usize) -> bool {
        if let Some(existing) = self.aliases.get(alias) {
            warn!("[bindings] alias `{alias}` on pass {index} already declared by pass {existing}");
            return false;
        }
        self.aliases.insert(alias.to_string(), index);
        true
    }

    pub fn get(&self, alias: &str) -> Option<usize> {
        self.aliases.get(alias).copied()
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "index", rename_all = "snake_case")]
pub enum BindingSource {
    /// Output of an earlier pass reached through its alias.
    Alias(usize),
    /// Output of the immediately preceding pass.
    Previous,
    /// The texture handed to `render_frame`.
    External,
    Original,
    PassOutput(usize),
    /// Last frame's output of a pass.
    PassFeedback(usize),
    /// `OriginalHistoryN`, N >= 1.
    OriginalHistory(usize),
    /// Index into the preset's lookup textures.
    Lookup(usize),
    /// Unknown name, bound to the pass's source.
    Fallback,
}

impl BindingSource {
    pub fn feedback_pass(&self) -> Option<usize> {
        match self {
            BindingSource::PassFeedback(i) => Some(*i),
            _ => None,
        }
    }

    pub fn history_depth(&self) -> usize {
        match self {
            BindingSource::OriginalHistory(n) => *n,
            _ => 0,
        }
    }
}

fn indexed(name: &str, prefix: &str) -> Option<usize> {
    name.strip_prefix(prefix)
        .filter(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|rest| rest.parse().ok())
}

/// Resolve the sampler `name` as seen from pass `pass`.
///
/// Precedence: alias of an earlier pass, `Source`, `Original`, the indexed
/// `PassOutputN` / `PassFeedbackN` / `<Alias>Feedback` / `OriginalHistoryN`
/// forms, then lookup textures. Anything else falls back to the pass's source.
pub fn resolve_sampler(
    name: &str,
    pass: usize,
    pass_count: usize,
    aliases: &AliasTable,
    luts: &[String],
) -> BindingSource {
    let source = if pass == 0 {
        BindingSource::External
    } else {
        BindingSource::Previous
    };

    if let Some(owner) = aliases.get(name) {
        if owner < pass {
            return BindingSource::Alias(owner);
        }
    }
    match name {
        // `Texture` is the legacy name for the pass input.
        "Source" | "Texture" => return source,
        "Original" | "OrigTexture" => return BindingSource::Original,
        _ => {}
    }
    if let Some(n) = indexed(name, "PassOutput") {
        if n < pass {
            return BindingSource::PassOutput(n);
        }
        warn!("[bindings] pass {pass} samples PassOutput{n}, which has not run yet");
        return source;
    }
    if let Some(n) = indexed(name, "PassFeedback") {
        if n < pass_count {
            return BindingSource::PassFeedback(n);
        }
    }
    if let Some(owner) = name.strip_suffix("Feedback").and_then(|a| aliases.get(a)) {
        return BindingSource::PassFeedback(owner);
    }
    if let Some(n) = indexed(name, "OriginalHistory") {
        return if n == 0 {
            BindingSource::Original
        } else {
            BindingSource::OriginalHistory(n)
        };
    }
    if let Some(i) = luts.iter().position(|l| l == name) {
        return BindingSource::Lookup(i);
    }
    warn!("[bindings] pass {pass}: no texture named `{name}`, binding Source");
    BindingSource::Fallback
}

/// Concrete textures for the frame being rendered.
pub struct FrameTextures<'a> {
    pub external: TextureId,
    /// Output of every pass, `None` for passes that render to the screen.
    pub outputs: &'a [Option<TextureId>],
    pub feedback: &'a [Option<TextureId>],
    pub history: &'a dyn Fn(usize) -> Option<TextureId>,
    /// `None` for lookup textures that failed to upload.
    pub luts: &'a [Option<TextureId>],
}

impl FrameTextures<'_> {
    fn previous(&self, pass: usize) -> TextureId {
        pass.checked_sub(1)
            .and_then(|p| self.outputs.get(p).copied().flatten())
            .unwrap_or(self.external)
    }

    /// The texture for `source` as read by `pass`. Entries that have no backing
    /// texture yet (first frame of history or feedback) read the external source.
    pub fn texture(&self, source: &BindingSource, pass: usize) -> TextureId {
        let found = match source {
            BindingSource::Alias(i) | BindingSource::PassOutput(i) => {
                self.outputs.get(*i).copied().flatten()
            }
            BindingSource::Previous | BindingSource::Fallback => Some(self.previous(pass)),
            BindingSource::External | BindingSource::Original => Some(self.external),
            BindingSource::PassFeedback(i) => self.feedback.get(*i).copied().flatten(),
            BindingSource::OriginalHistory(n) => (self.history)(*n),
            BindingSource::Lookup(i) => self.luts.get(*i).copied().flatten(),
        };
        found.unwrap_or(self.external)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> AliasTable {
        let mut t = AliasTable::new();
        assert!(t.register("Foo", 1));
        assert!(!t.register("Foo", 2));
        t
    }

    #[test]
    fn alias_wins_over_source_for_later_passes() {
        let t = table();
        assert_eq!(resolve_sampler("Foo", 2, 3, &t, &[]), BindingSource::Alias(1));
        assert_eq!(resolve_sampler("Source", 2, 3, &t, &[]), BindingSource::Previous);
        assert_eq!(resolve_sampler("Source", 0, 3, &t, &[]), BindingSource::External);
    }

    #[test]
    fn alias_is_not_visible_to_its_own_pass() {
        let t = table();
        assert_eq!(resolve_sampler("Foo", 1, 3, &t, &[]), BindingSource::Fallback);
        assert_eq!(resolve_sampler("FooFeedback", 1, 3, &t, &[]), BindingSource::PassFeedback(1));
    }

    #[test]
    fn indexed_names() {
        let t = AliasTable::new();
        assert_eq!(resolve_sampler("PassOutput0", 2, 3, &t, &[]), BindingSource::PassOutput(0));
        assert_eq!(resolve_sampler("PassOutput2", 2, 3, &t, &[]), BindingSource::Previous);
        assert_eq!(resolve_sampler("PassFeedback2", 0, 3, &t, &[]), BindingSource::PassFeedback(2));
        assert_eq!(resolve_sampler("OriginalHistory0", 1, 3, &t, &[]), BindingSource::Original);
        assert_eq!(resolve_sampler("OriginalHistory3", 1, 3, &t, &[]), BindingSource::OriginalHistory(3));
        assert_eq!(
            resolve_sampler("mask", 1, 3, &t, &["noise".into(), "mask".into()]),
            BindingSource::Lookup(1)
        );
        assert_eq!(resolve_sampler("PassOutputX", 1, 3, &t, &[]), BindingSource::Fallback);
    }

    #[test]
    fn frame_textures_fall_back_to_external() {
        let outputs = [Some(TextureId(10)), Some(TextureId(11)), None];
        let feedback = [None, None, None];
        let history = |_n: usize| None;
        let frame = FrameTextures {
            external: TextureId(1),
            outputs: &outputs,
            feedback: &feedback,
            history: &history,
            luts: &[Some(TextureId(20))],
        };
        assert_eq!(frame.texture(&BindingSource::Previous, 2), TextureId(11));
        assert_eq!(frame.texture(&BindingSource::Alias(0), 2), TextureId(10));
        assert_eq!(frame.texture(&BindingSource::PassFeedback(0), 2), TextureId(1));
        assert_eq!(frame.texture(&BindingSource::OriginalHistory(1), 2), TextureId(1));
        assert_eq!(frame.texture(&BindingSource::Lookup(0), 2), TextureId(20));
        assert_eq!(frame.texture(&BindingSource::Fallback, 0), TextureId(1));
    }
}
