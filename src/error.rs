use thiserror::Error;

/// Payload code for an unclassified failure
pub const UNKNOWN_ERROR_CODE: u16 = 999;

#[derive(Error, Debug)]
pub enum LabError {
    #[error("Empty result: {0}")]
    EmptyResult(String),

    #[error("Insufficient samples: need at least {required}, got {actual}")]
    InsufficientSamples { required: usize, actual: usize },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Computation error: {0}")]
    Computation(String),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl LabError {
    /// Numeric code reported in error payloads
    #[must_use]
    pub const fn code(&self) -> u16 {
        match self {
            Self::EmptyResult(_) => 0,
            Self::Validation(_) => 1,
            Self::InsufficientSamples { .. } => 2,
            Self::Computation(_) => 3,
            Self::Csv(_) | Self::Io(_) | Self::Json(_) | Self::Config(_) => UNKNOWN_ERROR_CODE,
        }
    }
}

pub type Result<T> = std::result::Result<T, LabError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(LabError::EmptyResult("x".into()).code(), 0);
        assert_eq!(LabError::Validation("x".into()).code(), 1);
        assert_eq!(
            LabError::InsufficientSamples {
                required: 2,
                actual: 1
            }
            .code(),
            2
        );
        assert_eq!(LabError::Computation("x".into()).code(), 3);
        assert_eq!(LabError::Config("x".into()).code(), UNKNOWN_ERROR_CODE);
    }
}
