//! CRT shader-preset filter chain.
//!
//! `compiler` turns slang-style shader units into GLSL ES 3.00 programs,
//! `preset` reads `.slangp` pass lists, and `runtime` runs a loaded preset as a
//! multi-pass post-processing chain over a [`runtime::GpuBackend`].

pub mod compiler;
pub mod error;
pub mod preset;
pub mod runtime;
pub mod source_store;

pub use error::{ChainError, ChainResult};
pub use preset::{Preset, parse_preset};
pub use runtime::{ChainOptions, FilterChain, FrameReport, HeadlessBackend};
pub use source_store::{FsSource, MemorySource, SourceFetcher};
