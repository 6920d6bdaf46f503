//! Multi-pass execution: render targets, input binding, uniforms and the
//! `FilterChain` state machine, over the `GpuBackend` seam.

pub mod backend;
pub mod bindings;
pub mod chain;
pub mod headless;
pub mod loader;
pub mod lut;
pub mod targets;
pub mod uniforms;

pub use backend::{
    BoundTexture, DrawCall, DrawTarget, GpuBackend, ProgramId, TextureDesc, TextureId, UniformValue,
};
pub use bindings::{AliasTable, BindingSource};
pub use chain::{
    ChainOptions, ChainParameter, ChainState, FilterChain, FrameReport, ParameterUpdate,
    PassOutcome, PassReport, PassStatus, ResolvedInput,
};
pub use headless::{HeadlessBackend, Lineage};
pub use loader::{LoadJob, PreparedPreset, prepare_preset};
