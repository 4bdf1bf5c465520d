// crates/core/src/error.rs
use std::path::PathBuf;
use thiserror::Error;

/// Errors reading a producer log file (file-level, not line-level — line
/// problems are reported through `ParseOutcome`, never as errors).
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Log file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Permission denied reading file: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ParseError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            _ => Self::Io { path, source },
        }
    }
}

/// Errors that can occur during producer log discovery
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Producer log directory not found: {path}")]
    LogsDirNotFound { path: PathBuf },

    #[error("Cannot access producer log directory: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("IO error accessing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Home directory not found")]
    HomeDirNotFound,
}

impl DiscoveryError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::LogsDirNotFound { path },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            _ => Self::Io { path, source },
        }
    }
}

/// Errors resolving the storage location.
///
/// Individual candidate failures fall through the priority chain silently;
/// this only surfaces when every tier is exhausted.
#[derive(Debug, Error)]
pub enum PathError {
    #[error("No writable storage location: every candidate tier failed (last tried: {last_tried})")]
    AllTiersFailed { last_tried: PathBuf },

    #[error("Home directory not found")]
    HomeDirNotFound,
}

/// Errors reading or writing the user configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot write config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot serialize config: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_io_classification() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = ParseError::io("/test/path", io_err);
        assert!(matches!(err, ParseError::NotFound { .. }));

        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = ParseError::io("/test/path", io_err);
        assert!(matches!(err, ParseError::PermissionDenied { .. }));

        let io_err = std::io::Error::new(std::io::ErrorKind::TimedOut, "timeout");
        let err = ParseError::io("/test/path", io_err);
        assert!(matches!(err, ParseError::Io { .. }));
    }

    #[test]
    fn test_discovery_error_display() {
        let err = DiscoveryError::HomeDirNotFound;
        assert!(err.to_string().contains("Home directory"));
    }
}
