use thiserror::Error;

/// Failure raised by a pipeline stage.
///
/// Every variant ends up as the `error` message on the episode record;
/// the orchestrator is the only place these are caught.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Rejection or transport failure from an external service. `status` is
    /// the HTTP status when the service answered, `None` when it never did.
    #[error("{service} request failed{}: {message}", fmt_status(.status))]
    Upstream {
        service: &'static str,
        status: Option<u16>,
        message: String,
    },

    /// The service answered but gave back nothing usable.
    #[error("{0}")]
    Parse(String),

    #[error("{0}")]
    Config(String),

    #[error("No audio segments found to concatenate")]
    NoSegments,

    #[error("{tool} failed: {message}")]
    Tool { tool: &'static str, message: String },

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Storage(#[from] anyhow::Error),
}

fn fmt_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({})", s)).unwrap_or_default()
}

impl PipelineError {
    /// HTTP-style status attached to the failure, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Upstream { status, .. } => *status,
            _ => None,
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        PipelineError::Parse(e.to_string())
    }
}

/// Typed error hierarchy for the caller-facing commands.
///
/// Serializes as a plain string so a polling client only ever sees a
/// message, while Rust callers can still match on the variant.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The episode exists but its audio has not been assembled yet.
    #[error("Audio not yet available")]
    AudioNotReady,

    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Io(String),

    #[error("{0}")]
    Other(String),
}

impl serde::Serialize for AppError {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

// ── From impls ─────────────────────────────────────────────────────────────

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Io(e.to_string())
    }
}

impl From<PipelineError> for AppError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Storage(e) => AppError::Database(e.to_string()),
            PipelineError::Io(e) => AppError::Io(e.to_string()),
            other => AppError::Other(other.to_string()),
        }
    }
}
