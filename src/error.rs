use thiserror::Error;

#[derive(Error, Debug)]
pub enum BencherError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job already exists: {0}")]
    DuplicateJob(String),

    #[error("Invalid job name {name:?}: {reason}")]
    InvalidIdentifier { name: String, reason: &'static str },

    #[error("Queue front is {found:?}, expected {expected}")]
    QueueMismatch {
        expected: String,
        found: Option<String>,
    },

    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Engine error ({context}): {message}")]
    Engine {
        context: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Log stream error: {0}")]
    Demux(String),

    #[error("No free container name after {0} attempts")]
    NameRetriesExhausted(u32),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BencherError {
    /// Engine failure that never reached the daemon or carried no HTTP status.
    pub fn engine(context: impl Into<String>, err: impl std::fmt::Display) -> Self {
        BencherError::Engine {
            context: context.into(),
            status: None,
            message: err.to_string(),
        }
    }

    /// Engine failure reported by the daemon with an HTTP status.
    pub fn engine_status(context: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        BencherError::Engine {
            context: context.into(),
            status: Some(status),
            message: message.into(),
        }
    }

    /// The engine refused a container name that is already taken.
    pub fn is_conflict(&self) -> bool {
        matches!(self, BencherError::Engine { status: Some(409), .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BencherError::JobNotFound(_) | BencherError::Engine { status: Some(404), .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, BencherError>;
