use thiserror::Error;

/// Simulator error taxonomy.
///
/// None of these are fatal at runtime: the publish loop keeps generating
/// readings and the command handler keeps listening whatever happens.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),
    #[error("Unknown area: {0}")]
    UnknownArea(String),
    #[error("Malformed command: {0}")]
    MalformedCommand(String),
    #[error("Invalid mode: {0}")]
    InvalidMode(String),
    #[error("Unknown command action: {0}")]
    UnknownAction(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SimError {
    /// Short label used as a structured log field
    pub fn kind(&self) -> &'static str {
        match self {
            SimError::TransportUnavailable(_) => "transport_unavailable",
            SimError::UnknownArea(_) => "unknown_area",
            SimError::MalformedCommand(_) => "malformed_command",
            SimError::InvalidMode(_) => "invalid_mode",
            SimError::UnknownAction(_) => "unknown_action",
            SimError::Serialization(_) => "serialization",
            SimError::Config(_) => "config",
        }
    }
}

pub type SimResult<T> = Result<T, SimError>;
