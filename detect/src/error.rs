//! §7 error taxonomy for the detection/policy layer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed container: {0}")]
    MalformedContainer(String),
    #[error("deadline exceeded")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("unknown module: {0}")]
    UnknownModule(String),
    #[error("malformed rule: {0}")]
    MalformedRule(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serde(String),
}
