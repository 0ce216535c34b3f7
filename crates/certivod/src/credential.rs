//! Trusted-device credentials: compact HS256 tokens.
//!
//! A token is `base64url(header).base64url(claims).base64url(hmac_sha256)`.
//! The signing key is 32 random bytes, generated on first start and kept
//! next to the database with mode 0600.

use std::path::Path;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("unsupported token algorithm: {0}")]
    Algorithm(String),
    #[error("signature mismatch")]
    BadSignature,
    #[error("token expired")]
    Expired,
    #[error("claims encoding: {0}")]
    Json(#[from] serde_json::Error),
    #[error("signing key I/O: {0}")]
    KeyIo(#[source] std::io::Error),
    #[error("invalid signing key")]
    InvalidKey,
}

/// Payload of a trusted-device credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceClaims {
    pub token_id: String,
    pub device_id: String,
    /// Hex SHA-256 of `device_id`.
    pub device_signature: String,
    pub verified: bool,
    pub timestamp_utc: String,
    /// Expiry, seconds since the Unix epoch.
    pub exp: i64,
}

#[derive(Deserialize)]
struct Header {
    alg: String,
}

pub fn device_signature(device_id: &str) -> String {
    format!("{:x}", Sha256::digest(device_id.as_bytes()))
}

/// Issues and checks device credentials with one HMAC key.
#[derive(Clone)]
pub struct TokenIssuer {
    key: [u8; 32],
    ttl_secs: i64,
}

impl TokenIssuer {
    pub fn new(key: [u8; 32], ttl_secs: u64) -> Self {
        Self {
            key,
            ttl_secs: i64::try_from(ttl_secs).unwrap_or(i64::MAX),
        }
    }

    /// Load the key at `key_path`, creating it if absent.
    pub fn from_key_file(key_path: &Path, ttl_secs: u64) -> Result<Self, TokenError> {
        Ok(Self::new(load_or_generate_key(key_path)?, ttl_secs))
    }

    pub fn issue(&self, device_id: &str) -> Result<(String, DeviceClaims), TokenError> {
        self.issue_at(device_id, Utc::now())
    }

    pub fn issue_at(
        &self,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(String, DeviceClaims), TokenError> {
        let claims = DeviceClaims {
            token_id: uuid::Uuid::new_v4().to_string(),
            device_id: device_id.to_string(),
            device_signature: device_signature(device_id),
            verified: true,
            timestamp_utc: now.to_rfc3339(),
            exp: now.timestamp().saturating_add(self.ttl_secs),
        };

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(HEADER),
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?)
        );
        let signature =
            URL_SAFE_NO_PAD.encode(self.mac(signing_input.as_bytes())?.finalize().into_bytes());

        Ok((format!("{signing_input}.{signature}"), claims))
    }

    /// Check signature and expiry.
    pub fn decode(&self, token: &str) -> Result<DeviceClaims, TokenError> {
        self.decode_at(token, Utc::now().timestamp())
    }

    pub fn decode_at(&self, token: &str, now: i64) -> Result<DeviceClaims, TokenError> {
        let claims = self.verify_signature(token)?;
        if now >= claims.exp {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }

    /// Check the signature only. Expired tokens are still accepted.
    pub fn verify_signature(&self, token: &str) -> Result<DeviceClaims, TokenError> {
        let mut parts = token.split('.');
        let (Some(header), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::Malformed);
        };

        let header_bytes = URL_SAFE_NO_PAD
            .decode(header)
            .map_err(|_| TokenError::Malformed)?;
        let parsed: Header =
            serde_json::from_slice(&header_bytes).map_err(|_| TokenError::Malformed)?;
        if parsed.alg != "HS256" {
            return Err(TokenError::Algorithm(parsed.alg));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TokenError::Malformed)?;
        let signing_input_len = header.len() + 1 + payload.len();
        self.mac(token[..signing_input_len].as_bytes())?
            .verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| TokenError::Malformed)?;
        Ok(serde_json::from_slice(&payload)?)
    }

    fn mac(&self, data: &[u8]) -> Result<HmacSha256, TokenError> {
        let mut mac =
            <HmacSha256 as Mac>::new_from_slice(&self.key).map_err(|_| TokenError::InvalidKey)?;
        mac.update(data);
        Ok(mac)
    }
}

/// Load a 32-byte key file, or create one from the OS RNG with mode 0600.
fn load_or_generate_key(key_path: &Path) -> Result<[u8; 32], TokenError> {
    if key_path.exists() {
        let bytes = std::fs::read(key_path).map_err(TokenError::KeyIo)?;
        let key: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            TokenError::KeyIo(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "signing key file has wrong length ({} bytes, expected 32)",
                    bytes.len()
                ),
            ))
        })?;
        tracing::debug!(path = %key_path.display(), "loaded token signing key");
        return Ok(key);
    }

    if let Some(parent) = key_path.parent() {
        std::fs::create_dir_all(parent).map_err(TokenError::KeyIo)?;
    }

    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);

    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;
    let mut f = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(key_path)
        .map_err(TokenError::KeyIo)?;
    f.write_all(&key).map_err(TokenError::KeyIo)?;

    tracing::info!(path = %key_path.display(), "generated new token signing key");
    Ok(key)
}
