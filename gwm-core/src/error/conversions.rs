//! Error conversion implementations for GwmError
//!
//! This module provides From trait implementations for converting
//! external error types into GwmError variants.

use super::types::GwmError;

// Serialization error conversions
impl From<serde_json::Error> for GwmError {
    fn from(err: serde_json::Error) -> Self {
        GwmError::serialization("json", err)
    }
}

impl From<serde_yaml::Error> for GwmError {
    fn from(err: serde_yaml::Error) -> Self {
        GwmError::serialization("yaml", err)
    }
}

impl From<toml::de::Error> for GwmError {
    fn from(err: toml::de::Error) -> Self {
        GwmError::ConfigurationError {
            component: "config file".to_string(),
            message: err.to_string(),
        }
    }
}

// System error conversions
impl From<std::io::Error> for GwmError {
    fn from(err: std::io::Error) -> Self {
        GwmError::IoError(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_error_conversion() {
        fn parse() -> Result<serde_json::Value, GwmError> {
            Ok(serde_json::from_str("{not json")?)
        }

        match parse() {
            Err(GwmError::Serialization { operation, .. }) => assert_eq!(operation, "json"),
            other => panic!("Expected Serialization error, got {:?}", other),
        }
    }

    #[test]
    fn test_io_error_conversion() {
        fn open() -> Result<String, GwmError> {
            Ok(std::fs::read_to_string("/definitely/not/here/gwm.toml")?)
        }

        assert!(matches!(open(), Err(GwmError::IoError(_))));
    }

    #[test]
    fn test_toml_error_is_configuration() {
        fn parse() -> Result<toml::Value, GwmError> {
            Ok(toml::from_str("jobs = [")?)
        }

        assert!(matches!(parse(), Err(GwmError::ConfigurationError { .. })));
    }
}
