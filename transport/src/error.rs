//! §7 `NetworkError` and the zip-bundle extraction failure modes.

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request build error: {0}")]
    Build(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("cipher error: {0:?}")]
    Cipher(classifyd_core::error::CipherError),
    #[error("response decode error: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        TransportError::Network(e.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("download failed: {0}")]
    Download(String),
    #[error("malformed zip bundle: {0}")]
    Malformed(String),
    #[error("entry {0:?} escapes the destination directory")]
    PathTraversal(String),
    #[error("io error: {0}")]
    Io(String),
}
