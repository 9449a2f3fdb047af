use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading or validating configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Config IO error: {0}")]
    IoError(String),

    #[error("Config parse error: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Error::Deserialization(err.to_string())
        } else {
            Error::Serialization(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::ValidationError("bad url".to_string());
        assert!(err.to_string().contains("Invalid configuration"));
        assert!(err.to_string().contains("bad url"));
    }

    #[test]
    fn test_error_from_config_error() {
        let err: Error = ConfigError::ParseError("oops".to_string()).into();
        match err {
            Error::Configuration(ConfigError::ParseError(msg)) => assert_eq!(msg, "oops"),
            _ => panic!("Expected Configuration error"),
        }
    }

    #[test]
    fn test_error_from_json_syntax() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Deserialization(_)));
    }
}
