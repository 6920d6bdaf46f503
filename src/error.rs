use std::path::PathBuf;

pub type ChainResult<T> = Result<T, ChainError>;

/// Failure taxonomy shared by the compiler stages and the executor.
///
/// Only `Preset` aborts a whole load. Every other variant is scoped to one shader
/// or one pass and ends up as a bypassed pass at the executor boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainError {
    /// Missing or unreadable include / shader file.
    Resolution { path: PathBuf, message: String },
    /// Malformed annotation. Callers normally log and skip these.
    Extraction { line: usize, message: String },
    /// Emitted source rejected by the target compiler.
    Transpile {
        stage: &'static str,
        line: usize,
        column: usize,
        message: String,
    },
    /// Vertex/fragment interface mismatch or missing entry point.
    Link { message: String },
    /// Pass ordering cannot be recovered from the preset.
    Preset { path: PathBuf, message: String },
    Backend(String),
    Disposed,
    Cancelled,
}

impl ChainError {
    pub fn resolution(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        ChainError::Resolution {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn preset(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        ChainError::Preset {
            path: path.into(),
            message: message.into(),
        }
    }

    /// True for errors that fail a single pass rather than the whole preset.
    pub fn is_pass_scoped(&self) -> bool {
        !matches!(
            self,
            ChainError::Preset { .. } | ChainError::Disposed | ChainError::Cancelled
        )
    }
}

impl std::fmt::Display for ChainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainError::Resolution { path, message } => {
                write!(f, "failed to resolve {}: {}", path.display(), message)
            }
            ChainError::Extraction { line, message } => {
                write!(f, "malformed annotation at line {}: {}", line, message)
            }
            ChainError::Transpile {
                stage,
                line,
                column,
                message,
            } => write!(f, "{} shader {}:{}: {}", stage, line, column, message),
            ChainError::Link { message } => write!(f, "link failed: {}", message),
            ChainError::Preset { path, message } => {
                write!(f, "invalid preset {}: {}", path.display(), message)
            }
            ChainError::Backend(msg) => write!(f, "backend error: {}", msg),
            ChainError::Disposed => write!(f, "filter chain has been disposed"),
            ChainError::Cancelled => write!(f, "preset load was cancelled"),
        }
    }
}

impl std::error::Error for ChainError {}
