use thiserror::Error;

/// Error types for the safety core. Sensor-side failures (permission
/// denied, stream loss) are surfaced as `DetectorStatus` values rather than
/// errors; these variants cover caller mistakes and storage only.
#[derive(Error, Debug, Clone)]
pub enum SafetyError {
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Result type for safety-core operations
pub type SafetyResult<T> = Result<T, SafetyError>;
