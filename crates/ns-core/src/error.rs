//! Error types for NextStat expectation values

use thiserror::Error;

/// NextStat error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration or input, detected before any sampling starts
    #[error("Validation error: {0}")]
    Validation(String),

    /// Numerical failure during integration
    #[error("Computation error: {0}")]
    Computation(String),

    /// Failure raised by a user-supplied integrand
    #[error("Integrand error: {0}")]
    Integrand(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_prefixes() {
        let e = Error::Validation("nitn must be > 0".into());
        assert_eq!(e.to_string(), "Validation error: nitn must be > 0");
        let e = Error::Integrand("log of negative".into());
        assert_eq!(e.to_string(), "Integrand error: log of negative");
    }

    #[test]
    fn test_json_conversion() {
        let err = serde_json::from_str::<f64>("not json").unwrap_err();
        let e: Error = err.into();
        assert!(matches!(e, Error::Json(_)));
    }
}
