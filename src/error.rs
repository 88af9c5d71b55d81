use thiserror::Error;

/// Bad user input, caught before any network call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please enter a search task")]
    EmptyDescription,

    #[error("max_results must be at least 1")]
    NoResultsRequested,
}

/// The task-launching service refused or mangled a creation request
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("HTTP {status}: {reason}")]
    Rejected { status: u16, reason: String },

    #[error("No task ID received")]
    MissingTaskId,

    #[error("Invalid response from search service: {0}")]
    InvalidResponse(String),

    #[error("Search service unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),
}

/// A single inbound message that could not be classified
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("message is not a valid envelope: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("unknown event type '{0}'")]
    UnknownType(String),

    #[error("invalid '{kind}' payload: {source}")]
    InvalidPayload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("'{kind}' payload out of range: {detail}")]
    OutOfRange { kind: &'static str, detail: String },
}

/// The progress channel failed or closed unexpectedly
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("cannot build stream endpoint for task {task_id}: {reason}")]
    Endpoint { task_id: String, reason: String },

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("Connection lost after {attempts} reconnect attempts")]
    RetriesExhausted { attempts: u32 },
}

/// Failure reported by the server for the task itself
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TaskError {
    pub message: String,
}

/// Errors that reach callers of the session handle
#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("search session has shut down")]
    SessionClosed,
}
