/// Core error types for the ViewFx effects.
use crate::image::{BitDepth, Components};

/// A specialized Result type for ViewFx operations.
pub type ViewFxResult<T> = Result<T, ViewFxError>;

/// Status reported back to the host when a render call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStatus {
    /// Generic failure of the current call.
    Failed,
    /// The request used a pixel format or context the effect does not handle.
    Unsupported,
    /// The host lacks something the effect cannot work without.
    MissingHostFeature,
}

/// Top-level error type for every render-path failure.
#[derive(Debug, thiserror::Error)]
pub enum ViewFxError {
    #[error("unsupported: {what}")]
    Unsupported { what: String },

    #[error("no image available on clip '{clip}'")]
    MissingImage { clip: String },

    #[error("geometry mismatch: {message}")]
    GeometryMismatch { message: String },

    #[error(
        "format mismatch on clip '{clip}': expected {expected_depth:?}/{expected_components:?}, \
         found {found_depth:?}/{found_components:?}"
    )]
    FormatMismatch {
        clip: String,
        expected_depth: BitDepth,
        expected_components: Components,
        found_depth: BitDepth,
        found_components: Components,
    },

    #[error("render backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("missing capability: {0}")]
    MissingCapability(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("parameter '{name}': {message}")]
    Param { name: String, message: String },

    #[error("render error: {0}")]
    Render(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl ViewFxError {
    /// Create an unsupported-format error.
    pub fn unsupported(what: impl Into<String>) -> Self {
        ViewFxError::Unsupported { what: what.into() }
    }

    /// Create a missing-image error for the named clip.
    pub fn missing_image(clip: impl Into<String>) -> Self {
        ViewFxError::MissingImage { clip: clip.into() }
    }

    /// Create a parameter error.
    pub fn param(name: impl Into<String>, message: impl Into<String>) -> Self {
        ViewFxError::Param {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Status code the host sees for this error.
    pub fn status(&self) -> RenderStatus {
        match self {
            ViewFxError::Unsupported { .. } | ViewFxError::FormatMismatch { .. } => {
                RenderStatus::Unsupported
            }
            ViewFxError::MissingCapability(_) => RenderStatus::MissingHostFeature,
            _ => RenderStatus::Failed,
        }
    }
}
