//! Preset (`.slangp`-style) parsing and serialization.
//!
//! A preset is flat `key = value` text. Pass keys carry a numeric suffix
//! (`shader0`, `scale_type1`, ...) and the pass list is ordered by that index,
//! never by line order. `#reference "base.slangp"` pulls in another preset whose
//! keys the referencing file may override. Keys this crate does not understand
//! are kept in [`Preset::extra`] so shaders can still look parameters up late.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::compiler::params::{ParameterOverrides, format_float};
use crate::error::{ChainError, ChainResult};
use crate::source_store::{SourceFetcher, normalize_path, relative_path, resolve_relative};

const MAX_REFERENCE_DEPTH: usize = 16;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleType {
    #[default]
    Source,
    Viewport,
    Absolute,
}

impl ScaleType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "source" => Some(ScaleType::Source),
            "viewport" => Some(ScaleType::Viewport),
            "absolute" => Some(ScaleType::Absolute),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScaleType::Source => "source",
            ScaleType::Viewport => "viewport",
            ScaleType::Absolute => "absolute",
        }
    }
}

/// Output size rule for one pass. `Absolute` factors are pixel counts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleConfig {
    pub type_x: ScaleType,
    pub type_y: ScaleType,
    pub x: f32,
    pub y: f32,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            type_x: ScaleType::Source,
            type_y: ScaleType::Source,
            x: 1.0,
            y: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    /// Left to the executor (linear).
    #[default]
    Unspecified,
    Linear,
    Nearest,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WrapMode {
    #[default]
    ClampToBorder,
    ClampToEdge,
    Repeat,
    MirroredRepeat,
}

impl WrapMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "clamp_to_border" => Some(WrapMode::ClampToBorder),
            "clamp_to_edge" => Some(WrapMode::ClampToEdge),
            "repeat" => Some(WrapMode::Repeat),
            "mirrored_repeat" => Some(WrapMode::MirroredRepeat),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WrapMode::ClampToBorder => "clamp_to_border",
            WrapMode::ClampToEdge => "clamp_to_edge",
            WrapMode::Repeat => "repeat",
            WrapMode::MirroredRepeat => "mirrored_repeat",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FramebufferFormat {
    #[default]
    Rgba8,
    Srgb8,
    Rgba16F,
    Rgba32F,
}

impl FramebufferFormat {
    /// Map a `#pragma format` value.
    pub fn from_pragma(format: &str) -> Option<Self> {
        match format {
            "R8G8B8A8_UNORM" | "A2B10G10R10_UNORM_PACK32" => Some(FramebufferFormat::Rgba8),
            "R8G8B8A8_SRGB" => Some(FramebufferFormat::Srgb8),
            "R16G16B16A16_SFLOAT" => Some(FramebufferFormat::Rgba16F),
            "R32G32B32A32_SFLOAT" => Some(FramebufferFormat::Rgba32F),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassConfig {
    pub index: usize,
    pub shader_path: PathBuf,
    pub alias: Option<String>,
    /// `None` when the preset gives no scale keys for this pass.
    pub scale: Option<ScaleConfig>,
    pub filter: FilterMode,
    pub wrap: WrapMode,
    /// `None` defers to the shader's `#pragma format`.
    pub framebuffer_format: Option<FramebufferFormat>,
    pub mipmap_input: bool,
    /// 0 means the frame counter is not wrapped.
    pub frame_count_mod: u32,
    pub parameter_overrides: ParameterOverrides,
}

impl PassConfig {
    pub fn new(index: usize, shader_path: impl Into<PathBuf>) -> Self {
        Self {
            index,
            shader_path: shader_path.into(),
            alias: None,
            scale: None,
            filter: FilterMode::Unspecified,
            wrap: WrapMode::ClampToBorder,
            framebuffer_format: None,
            mipmap_input: false,
            frame_count_mod: 0,
            parameter_overrides: ParameterOverrides::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupTextureConfig {
    pub name: String,
    pub path: PathBuf,
    pub filter: FilterMode,
    pub wrap: WrapMode,
    pub mipmap: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub path: PathBuf,
    pub passes: Vec<PassConfig>,
    /// Values listed under `parameters`.
    pub parameters: ParameterOverrides,
    pub textures: Vec<LookupTextureConfig>,
    /// Keys not understood by the parser, verbatim.
    pub extra: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    /// File the key came from; relative paths resolve against it.
    origin: PathBuf,
    line: usize,
}

#[derive(Default)]
struct Entries {
    map: BTreeMap<String, Entry>,
}

impl Entries {
    /// Number of `shaderN` keys, whatever their index.
    fn pass_shader_keys(&self) -> usize {
        self.map
            .keys()
            .filter_map(|k| k.strip_prefix("shader"))
            .filter(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
            .count()
    }

    fn take(&mut self, key: &str) -> Option<Entry> {
        self.map.remove(key)
    }

    fn take_parsed<T>(
        &mut self,
        key: &str,
        path: &Path,
        parse: impl FnOnce(&str) -> Option<T>,
    ) -> ChainResult<Option<T>> {
        let Some(entry) = self.take(key) else {
            return Ok(None);
        };
        parse(&entry.value).map(Some).ok_or_else(|| {
            ChainError::preset(
                path,
                format!(
                    "line {}: invalid value `{}` for `{key}`",
                    entry.line, entry.value
                ),
            )
        })
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

fn parse_f32(s: &str) -> Option<f32> {
    s.parse::<f32>().ok().filter(|v| v.is_finite())
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Strip `#` and `//` comments outside quotes.
fn strip_comment(line: &str) -> &str {
    let mut in_quotes = false;
    let bytes = line.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'"' => in_quotes = !in_quotes,
            b'#' if !in_quotes => return &line[..i],
            b'/' if !in_quotes && bytes.get(i + 1) == Some(&b'/') => return &line[..i],
            _ => {}
        }
    }
    line
}

fn unquote(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(s)
}

/// Collect keys from `path` and everything it references. Referenced files are
/// applied first so the referencing file wins.
fn collect_entries(
    path: &Path,
    fetcher: &dyn SourceFetcher,
    stack: &mut Vec<PathBuf>,
    entries: &mut Entries,
) -> ChainResult<()> {
    let path = normalize_path(path);
    if stack.contains(&path) {
        warn!("[preset] reference cycle through {}; skipped", path.display());
        return Ok(());
    }
    if stack.len() >= MAX_REFERENCE_DEPTH {
        return Err(ChainError::preset(&path, "#reference nesting is too deep"));
    }
    let text = fetcher
        .fetch_text(&path)
        .map_err(|e| ChainError::preset(&path, e.to_string()))?;
    stack.push(path.clone());

    let mut own: Vec<(String, Entry)> = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = raw.trim();
        if let Some(rest) = trimmed.strip_prefix("#reference") {
            let target = unquote(strip_comment(rest));
            if target.is_empty() {
                return Err(ChainError::preset(
                    &path,
                    format!("line {line_no}: #reference without a path"),
                ));
            }
            let referenced = resolve_relative(&path, target);
            debug!("[preset] {} references {}", path.display(), referenced.display());
            collect_entries(&referenced, fetcher, stack, entries)?;
            continue;
        }
        let line = strip_comment(trimmed).trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            warn!("[preset] {}:{line_no}: ignoring line without `=`", path.display());
            continue;
        };
        own.push((
            key.trim().to_string(),
            Entry {
                value: unquote(value).to_string(),
                origin: path.clone(),
                line: line_no,
            },
        ));
    }
    for (key, entry) in own {
        entries.map.insert(key, entry);
    }
    stack.pop();
    Ok(())
}

fn parse_scale(entries: &mut Entries, path: &Path, i: usize) -> ChainResult<Option<ScaleConfig>> {
    let both = entries.take_parsed(&format!("scale_type{i}"), path, ScaleType::parse)?;
    let tx = entries.take_parsed(&format!("scale_type_x{i}"), path, ScaleType::parse)?;
    let ty = entries.take_parsed(&format!("scale_type_y{i}"), path, ScaleType::parse)?;
    let factor = entries.take_parsed(&format!("scale{i}"), path, parse_f32)?;
    let fx = entries.take_parsed(&format!("scale_x{i}"), path, parse_f32)?;
    let fy = entries.take_parsed(&format!("scale_y{i}"), path, parse_f32)?;

    if both.is_none() && tx.is_none() && ty.is_none() {
        if factor.is_some() || fx.is_some() || fy.is_some() {
            debug!("[preset] pass {i}: scale factor without scale_type ignored");
        }
        return Ok(None);
    }
    let base = both.unwrap_or_default();
    Ok(Some(ScaleConfig {
        type_x: tx.unwrap_or(base),
        type_y: ty.unwrap_or(base),
        x: fx.or(factor).unwrap_or(1.0),
        y: fy.or(factor).unwrap_or(1.0),
    }))
}

fn parse_pass(entries: &mut Entries, path: &Path, i: usize) -> ChainResult<PassConfig> {
    let shader = entries
        .take(&format!("shader{i}"))
        .ok_or_else(|| ChainError::preset(path, format!("missing `shader{i}`")))?;
    let mut pass = PassConfig::new(i, resolve_relative(&shader.origin, &shader.value));

    pass.alias = entries
        .take(&format!("alias{i}"))
        .map(|e| e.value)
        .filter(|a| !a.is_empty());
    if let Some(linear) = entries.take_parsed(&format!("filter_linear{i}"), path, parse_bool)? {
        pass.filter = if linear { FilterMode::Linear } else { FilterMode::Nearest };
    }
    if let Some(wrap) = entries.take_parsed(&format!("wrap_mode{i}"), path, WrapMode::parse)? {
        pass.wrap = wrap;
    }
    pass.scale = parse_scale(entries, path, i)?;

    let float_fb = entries.take_parsed(&format!("float_framebuffer{i}"), path, parse_bool)?;
    let srgb_fb = entries.take_parsed(&format!("srgb_framebuffer{i}"), path, parse_bool)?;
    pass.framebuffer_format = match (float_fb, srgb_fb) {
        (Some(true), _) => Some(FramebufferFormat::Rgba16F),
        (_, Some(true)) => Some(FramebufferFormat::Srgb8),
        (Some(false), _) | (_, Some(false)) => Some(FramebufferFormat::Rgba8),
        (None, None) => None,
    };
    pass.mipmap_input = entries
        .take_parsed(&format!("mipmap_input{i}"), path, parse_bool)?
        .unwrap_or(false);
    pass.frame_count_mod = entries
        .take_parsed(&format!("frame_count_mod{i}"), path, |s| s.parse::<u32>().ok())?
        .unwrap_or(0);

    if let Some(list) = entries.take(&format!("parameters{i}")) {
        for name in split_list(&list.value) {
            let key = format!("{name}{i}");
            match entries.take_parsed(&key, path, parse_f32)? {
                Some(v) => {
                    pass.parameter_overrides.insert(name, v);
                }
                None => warn!("[preset] pass {i}: parameter `{name}` listed without `{key}`"),
            }
        }
    }
    Ok(pass)
}

fn parse_textures(entries: &mut Entries, path: &Path) -> ChainResult<Vec<LookupTextureConfig>> {
    let Some(list) = entries.take("textures") else {
        return Ok(Vec::new());
    };
    let mut out = Vec::new();
    for name in split_list(&list.value) {
        let Some(tex) = entries.take(&name) else {
            return Err(ChainError::preset(
                path,
                format!("texture `{name}` is listed without a path"),
            ));
        };
        let filter = match entries.take_parsed(&format!("{name}_linear"), path, parse_bool)? {
            Some(true) => FilterMode::Linear,
            Some(false) => FilterMode::Nearest,
            None => FilterMode::Unspecified,
        };
        let wrap = entries
            .take_parsed(&format!("{name}_wrap_mode"), path, WrapMode::parse)?
            .unwrap_or_default();
        let mipmap = entries
            .take_parsed(&format!("{name}_mipmap"), path, parse_bool)?
            .unwrap_or(false);
        out.push(LookupTextureConfig {
            path: resolve_relative(&tex.origin, &tex.value),
            name,
            filter,
            wrap,
            mipmap,
        });
    }
    Ok(out)
}

/// Parse the preset at `path`, following `#reference`s through `fetcher`.
pub fn parse_preset(path: &Path, fetcher: &dyn SourceFetcher) -> ChainResult<Preset> {
    let path = normalize_path(path);
    let mut entries = Entries::default();
    collect_entries(&path, fetcher, &mut Vec::new(), &mut entries)?;

    let count = entries
        .take("shaders")
        .ok_or_else(|| ChainError::preset(&path, "missing `shaders`"))?;
    let count: usize = count.value.parse().map_err(|_| {
        ChainError::preset(
            &path,
            format!("line {}: `shaders = {}` is not a pass count", count.line, count.value),
        )
    })?;

    let declared = entries.pass_shader_keys();
    if count > declared {
        return Err(ChainError::preset(
            &path,
            format!("shaders = {count} but only {declared} shaderN keys"),
        ));
    }
    let mut passes = Vec::with_capacity(count);
    for i in 0..count {
        passes.push(parse_pass(&mut entries, &path, i)?);
    }

    let mut parameters = ParameterOverrides::new();
    if let Some(list) = entries.take("parameters") {
        for name in split_list(&list.value) {
            match entries.take_parsed(&name, &path, parse_f32)? {
                Some(v) => {
                    parameters.insert(name, v);
                }
                None => warn!("[preset] parameter `{name}` is listed without a value"),
            }
        }
    }
    let textures = parse_textures(&mut entries, &path)?;

    let extra: BTreeMap<String, String> = entries
        .map
        .into_iter()
        .map(|(k, e)| (k, e.value))
        .collect();
    if !extra.is_empty() {
        debug!(
            "[preset] {}: {} unrecognized keys kept",
            path.display(),
            extra.len()
        );
    }
    Ok(Preset {
        path,
        passes,
        parameters,
        textures,
        extra,
    })
}

impl Preset {
    /// Value for a parameter: the `parameters` list first, then an unlisted
    /// top-level key of the same name.
    pub fn parameter_value(&self, name: &str) -> Option<f32> {
        self.parameters
            .get(name)
            .copied()
            .or_else(|| self.extra.get(name).and_then(|v| parse_f32(v)))
    }

    /// Override set used to compile pass `index`: global values, then any
    /// numeric unrecognized key, then the pass's own overrides.
    pub fn overrides_for_pass(&self, index: usize) -> ParameterOverrides {
        let mut out = ParameterOverrides::new();
        for (k, v) in &self.extra {
            if let Some(v) = parse_f32(v) {
                out.insert(k.clone(), v);
            }
        }
        out.extend(self.parameters.iter().map(|(k, v)| (k.clone(), *v)));
        if let Some(pass) = self.passes.get(index) {
            out.extend(pass.parameter_overrides.iter().map(|(k, v)| (k.clone(), *v)));
        }
        out
    }

    pub fn aliases(&self) -> HashSet<&str> {
        self.passes
            .iter()
            .filter_map(|p| p.alias.as_deref())
            .collect()
    }

    fn display_path(&self, target: &Path) -> String {
        let base = self.path.parent().unwrap_or_else(|| Path::new(""));
        relative_path(base, target).to_string_lossy().replace('\\', "/")
    }

    /// Serialize back to preset text. Paths are written relative to `self.path`.
    pub fn to_preset_text(&self) -> String {
        let mut out = format!("shaders = {}\n", self.passes.len());
        for (i, pass) in self.passes.iter().enumerate() {
            out.push('\n');
            out.push_str(&format!(
                "shader{i} = \"{}\"\n",
                self.display_path(&pass.shader_path)
            ));
            if let Some(alias) = &pass.alias {
                out.push_str(&format!("alias{i} = \"{alias}\"\n"));
            }
            match pass.filter {
                FilterMode::Linear => out.push_str(&format!("filter_linear{i} = true\n")),
                FilterMode::Nearest => out.push_str(&format!("filter_linear{i} = false\n")),
                FilterMode::Unspecified => {}
            }
            if pass.wrap != WrapMode::default() {
                out.push_str(&format!("wrap_mode{i} = {}\n", pass.wrap.as_str()));
            }
            if let Some(scale) = &pass.scale {
                out.push_str(&format!("scale_type_x{i} = {}\n", scale.type_x.as_str()));
                out.push_str(&format!("scale_type_y{i} = {}\n", scale.type_y.as_str()));
                out.push_str(&format!("scale_x{i} = {}\n", format_float(scale.x)));
                out.push_str(&format!("scale_y{i} = {}\n", format_float(scale.y)));
            }
            match pass.framebuffer_format {
                Some(FramebufferFormat::Rgba16F | FramebufferFormat::Rgba32F) => {
                    out.push_str(&format!("float_framebuffer{i} = true\n"));
                }
                Some(FramebufferFormat::Srgb8) => {
                    out.push_str(&format!("srgb_framebuffer{i} = true\n"));
                }
                Some(FramebufferFormat::Rgba8) => {
                    out.push_str(&format!("float_framebuffer{i} = false\n"));
                }
                None => {}
            }
            if pass.mipmap_input {
                out.push_str(&format!("mipmap_input{i} = true\n"));
            }
            if pass.frame_count_mod != 0 {
                out.push_str(&format!("frame_count_mod{i} = {}\n", pass.frame_count_mod));
            }
            if !pass.parameter_overrides.is_empty() {
                let names: Vec<&str> = pass.parameter_overrides.keys().map(String::as_str).collect();
                out.push_str(&format!("parameters{i} = \"{}\"\n", names.join(";")));
                for (name, value) in &pass.parameter_overrides {
                    out.push_str(&format!("{name}{i} = {}\n", format_float(*value)));
                }
            }
        }

        if !self.parameters.is_empty() {
            out.push('\n');
            let names: Vec<&str> = self.parameters.keys().map(String::as_str).collect();
            out.push_str(&format!("parameters = \"{}\"\n", names.join(";")));
            for (name, value) in &self.parameters {
                out.push_str(&format!("{name} = {}\n", format_float(*value)));
            }
        }

        if !self.textures.is_empty() {
            out.push('\n');
            let names: Vec<&str> = self.textures.iter().map(|t| t.name.as_str()).collect();
            out.push_str(&format!("textures = \"{}\"\n", names.join(";")));
            for tex in &self.textures {
                out.push_str(&format!("{} = \"{}\"\n", tex.name, self.display_path(&tex.path)));
                match tex.filter {
                    FilterMode::Linear => out.push_str(&format!("{}_linear = true\n", tex.name)),
                    FilterMode::Nearest => out.push_str(&format!("{}_linear = false\n", tex.name)),
                    FilterMode::Unspecified => {}
                }
                if tex.wrap != WrapMode::default() {
                    out.push_str(&format!("{}_wrap_mode = {}\n", tex.name, tex.wrap.as_str()));
                }
                if tex.mipmap {
                    out.push_str(&format!("{}_mipmap = true\n", tex.name));
                }
            }
        }

        if !self.extra.is_empty() {
            out.push('\n');
            for (k, v) in &self.extra {
                out.push_str(&format!("{k} = \"{v}\"\n"));
            }
        }
        out
    }
}
