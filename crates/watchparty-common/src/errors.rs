use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ParseError(String),

    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Top-level error for watch-party operations that cross a crate boundary.
#[derive(Debug, thiserror::Error)]
pub enum PartyError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("directory error: {0}")]
    Directory(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// `code` is one of `permission-denied`, `unsupported-environment`
    /// or `unknown`.
    #[error("capture error: {message}")]
    Capture { code: &'static str, message: String },

    #[error("room not found: {0}")]
    RoomNotFound(String),

    #[error("party has ended: {0}")]
    RoomInactive(String),

    #[error("only the host can {0}")]
    NotHost(&'static str),

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = ConfigError::FileNotFound(PathBuf::from("/tmp/missing.toml"));
        assert_eq!(err.to_string(), "config file not found: /tmp/missing.toml");

        let err = ConfigError::ParseError("unexpected token".into());
        assert_eq!(err.to_string(), "config parse error: unexpected token");

        let err = ConfigError::ValidationError("ice.candidate_pool_size".into());
        assert_eq!(
            err.to_string(),
            "config validation error: ice.candidate_pool_size"
        );
    }

    #[test]
    fn party_error_from_config() {
        let config_err = ConfigError::ParseError("bad toml".into());
        let err: PartyError = config_err.into();
        assert!(matches!(err, PartyError::Config(_)));
        assert!(err.to_string().contains("bad toml"));
    }

    #[test]
    fn party_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err: PartyError = io_err.into();
        assert!(matches!(err, PartyError::Io(_)));
        assert!(err.to_string().contains("file missing"));
    }

    #[test]
    fn party_error_other_variants() {
        let err = PartyError::Directory("permission denied".into());
        assert_eq!(err.to_string(), "directory error: permission denied");

        let err = PartyError::RoomNotFound("ABC123".into());
        assert_eq!(err.to_string(), "room not found: ABC123");

        let err = PartyError::Capture {
            code: "permission-denied",
            message: "denied".into(),
        };
        assert_eq!(err.to_string(), "capture error: denied");

        let err = PartyError::NotHost("end the party");
        assert_eq!(err.to_string(), "only the host can end the party");

        let err = PartyError::Other("something went wrong".into());
        assert_eq!(err.to_string(), "something went wrong");
    }
}
