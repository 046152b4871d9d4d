use thiserror::Error;

/// Maximum length for error response bodies carried in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Failure reported by an injected fetcher.
///
/// Cloneable so a single failed request can be handed to every caller that
/// was waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// No response was received (connection refused, DNS, timeout).
    #[error("Network error: {0}")]
    Transport(String),

    #[error("Request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    /// The task driving the request died before producing a result.
    #[error("Request aborted: {0}")]
    Aborted(String),
}

impl FetchError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        FetchError::Transport(message.into())
    }

    pub fn from_status(status: u16, body: &str) -> Self {
        FetchError::Status {
            status,
            message: Self::truncate_body(body),
        }
    }

    /// Transport failures and 5xx responses are worth retrying; everything
    /// else will fail the same way again.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Transport(_) => true,
            FetchError::Status { status, .. } => *status >= 500,
            FetchError::Aborted(_) => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => FetchError::from_status(status.as_u16(), &e.to_string()),
            None => FetchError::Transport(e.to_string()),
        }
    }
}

/// Failure of an optimistic transform.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MutationError {
    #[error("Cached value is not a collection")]
    NotACollection,

    #[error("Transform failed: {0}")]
    Transform(String),
}

/// Failure to write or read the durable snapshot.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Snapshot storage failed: {0}")]
    Storage(#[from] anyhow::Error),

    #[error("Snapshot is corrupt: {0}")]
    CorruptSnapshot(String),
}

/// Invalid configuration detected while building a cache.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("Malformed cache key: {0}")]
    MalformedKey(String),

    #[error("Category {0} cannot be related to itself")]
    SelfRelation(String),

    #[error("Invalid setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },
}
