//! Error types for axon.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AxonError>;

/// The graph state machine's states (spec.md §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphState {
    NoGraph,
    Constructing,
    Preparing,
    Ready,
    Starting,
    Processing,
    Stopping,
    Error,
}

impl std::fmt::Display for GraphState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GraphState::NoGraph => "NOGRAPH",
            GraphState::Constructing => "CONSTRUCTING",
            GraphState::Preparing => "PREPARING",
            GraphState::Ready => "READY",
            GraphState::Starting => "STARTING",
            GraphState::Processing => "PROCESSING",
            GraphState::Stopping => "STOPPING",
            GraphState::Error => "ERROR",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum AxonError {
    #[error("unknown processor class `{0}`")]
    UnknownClass(String),

    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    #[error("invalid graph state: expected one of {expected}, found {found}")]
    InvalidState { expected: String, found: GraphState },

    #[error("Processor `{processor}` failed in `Configure`: {message}")]
    ConfigureError { processor: String, message: String },

    #[error("Processor `{processor}` failed in `CreatePorts`: {message}")]
    CreatePortsError { processor: String, message: String },

    #[error("Processor `{processor}` failed in `CompleteStreamInfo`: {message}")]
    StreamInfoError { processor: String, message: String },

    #[error("Processor `{processor}` failed in `{step}`: {message}")]
    PrepareError {
        processor: String,
        step: String,
        message: String,
    },

    #[error("Processor `{processor}` failed in `Process`: {message}")]
    ProcessingError { processor: String, message: String },

    #[error("control-plane update for `{entry}` rejected: {reason}")]
    UpdateStateError { entry: String, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl AxonError {
    pub fn invalid_graph(message: impl Into<String>) -> Self {
        Self::InvalidGraph(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Formats exactly as spec.md §8 scenario 6 requires:
    /// `Processor \`B\` failed in \`Prepare\`: <text>`.
    pub fn prepare(processor: impl Into<String>, step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PrepareError {
            processor: processor.into(),
            step: step.into(),
            message: message.into(),
        }
    }
}
