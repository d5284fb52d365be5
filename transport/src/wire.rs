//! §6 wire protocol: mutual-TLS transport, SM4-CBC encrypted bodies,
//! optional gzip applied after encryption on the way out and before
//! decryption on the way back.

use crate::error::TransportError;
use classifyd_core::crypto::LocalCipher;
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{HeaderValue, CONTENT_ENCODING, USER_AGENT};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

/// Client certificate/key/CA bundle paths for the GB-compliant
/// mutual-TLS transport. Paths are opaque to this crate's callers;
/// only `WireClient::new` reads them.
pub struct TlsConfig {
    pub ca_path: std::path::PathBuf,
    pub client_cert_path: std::path::PathBuf,
    pub client_key_path: std::path::PathBuf,
}

pub struct WireClient {
    http: reqwest::Client,
    base_url: String,
    cipher: Arc<LocalCipher>,
}

impl WireClient {
    pub fn new(
        base_url: &str,
        tls: &TlsConfig,
        cipher: Arc<LocalCipher>,
    ) -> Result<Self, TransportError> {
        let ca_pem = std::fs::read(&tls.ca_path)
            .map_err(|e| TransportError::Build(format!("reading CA bundle: {e}")))?;
        let ca_cert = reqwest::Certificate::from_pem(&ca_pem)
            .map_err(|e| TransportError::Build(format!("parsing CA bundle: {e}")))?;

        let identity_pem = read_identity_pem(&tls.client_cert_path, &tls.client_key_path)?;
        let identity = reqwest::Identity::from_pem(&identity_pem)
            .map_err(|e| TransportError::Build(format!("parsing client identity: {e}")))?;

        let http = reqwest::Client::builder()
            .add_root_certificate(ca_cert)
            .identity(identity)
            .use_rustls_tls()
            .build()
            .map_err(|e| TransportError::Build(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            cipher,
        })
    }

    /// §4.7 heartbeat tick: empty encrypted body POST, response decoded
    /// as a `CommandPayload` (caller deserializes the returned bytes).
    pub async fn post_business_status(&self, user_agent: &str) -> Result<Vec<u8>, TransportError> {
        self.post_encrypted("/C2/business_status", user_agent, b"", false)
            .await
    }

    pub async fn post_command_result(
        &self,
        user_agent: &str,
        body: &[u8],
    ) -> Result<(), TransportError> {
        self.post_encrypted("/C2/sys_manager/command_result", user_agent, body, false)
            .await?;
        Ok(())
    }

    pub async fn post_policy_result(
        &self,
        user_agent: &str,
        body: &[u8],
    ) -> Result<(), TransportError> {
        self.post_encrypted("/C2/sys_manager/policy_result", user_agent, body, false)
            .await?;
        Ok(())
    }

    /// §6 `GET /C2/policy/update?filename=<name>` — returns the raw
    /// zip bundle bytes, undecrypted; policy bundles travel as plain
    /// archives, not as encrypted JSON command bodies.
    pub async fn download_policy_bundle(
        &self,
        user_agent: &str,
        filename: &str,
    ) -> Result<Vec<u8>, TransportError> {
        let url = format!("{}/C2/policy/update?filename={}", self.base_url, filename);
        let resp = self
            .http
            .get(&url)
            .header(USER_AGENT, HeaderValue::from_str(user_agent).unwrap_or(HeaderValue::from_static("classifyd")))
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.bytes().await?.to_vec())
    }

    /// Encrypts `plaintext`, optionally gzips the ciphertext, POSTs it,
    /// and decrypts whatever comes back (reqwest's `gzip` feature
    /// already strips response-side `Content-Encoding: gzip`
    /// transparently, so only decryption remains here).
    async fn post_encrypted(
        &self,
        path: &str,
        user_agent: &str,
        plaintext: &[u8],
        gzip_request: bool,
    ) -> Result<Vec<u8>, TransportError> {
        let ciphertext = self
            .cipher
            .encrypt(plaintext)
            .map_err(TransportError::Cipher)?;

        let url = format!("{}{}", self.base_url, path);
        let mut req = self
            .http
            .post(&url)
            .header(
                USER_AGENT,
                HeaderValue::from_str(user_agent).unwrap_or(HeaderValue::from_static("classifyd")),
            );

        let body = if gzip_request {
            req = req.header(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            gzip_compress(&ciphertext)
        } else {
            ciphertext
        };

        let resp = req.body(body).send().await?.error_for_status()?;
        let response_bytes = resp.bytes().await?.to_vec();

        if response_bytes.is_empty() {
            return Ok(Vec::new());
        }
        self.cipher
            .decrypt(&response_bytes)
            .map_err(TransportError::Cipher)
    }
}

fn gzip_compress(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    // In-memory Vec writes never fail.
    encoder.write_all(data).expect("gzip write to Vec cannot fail");
    encoder.finish().expect("gzip finish to Vec cannot fail")
}

fn read_identity_pem(cert_path: &Path, key_path: &Path) -> Result<Vec<u8>, TransportError> {
    let mut pem = std::fs::read(cert_path)
        .map_err(|e| TransportError::Build(format!("reading client cert: {e}")))?;
    let key = std::fs::read(key_path)
        .map_err(|e| TransportError::Build(format!("reading client key: {e}")))?;
    pem.push(b'\n');
    pem.extend_from_slice(&key);
    Ok(pem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gzip_round_trips_via_flate2_read_side() {
        let data = b"hello classifyd wire protocol".to_vec();
        let compressed = gzip_compress(&data);

        use flate2::read::GzDecoder;
        use std::io::Read;
        let mut decoder = GzDecoder::new(&compressed[..]);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }
}
