//! VAPID (RFC 8292) authorization for push service requests.
//!
//! Tokens are ES256 JWTs with `aud`, `exp` and `sub` claims, cached per
//! push service origin and re-minted before they expire.

use std::{collections::HashMap, time::Duration};

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use p256::{
    SecretKey,
    ecdsa::{SigningKey, VerifyingKey},
    pkcs8::{DecodePrivateKey, EncodePrivateKey},
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    crypto::keys::{decode_base64url, encode_base64url},
    error::PushError,
};

pub const MAX_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// A cached token is handed out only while it has at least this much validity left.
pub const REFRESH_MARGIN_SECONDS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VapidClaims {
    pub aud: String,
    pub exp: i64,
    pub sub: String,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: i64,
}

pub struct VapidSigner {
    encoding_key: EncodingKey,
    verifying_key: VerifyingKey,
    public_key_b64: String,
    subject: String,
    token_ttl: Duration,
    cache: Mutex<HashMap<String, CachedToken>>,
}

impl VapidSigner {
    pub fn new(signing_key: SigningKey, subject: &str, token_ttl: Duration) -> Result<Self, PushError> {
        if !(subject.starts_with("mailto:") || subject.starts_with("https:")) {
            return Err(PushError::SigningFailure(format!(
                "VAPID subject must be a mailto: or https: URI, got '{}'",
                subject
            )));
        }

        if token_ttl.is_zero() {
            return Err(PushError::SigningFailure(
                "VAPID token TTL must be greater than zero".to_string(),
            ));
        }

        let der = signing_key
            .to_pkcs8_der()
            .map_err(|e| PushError::SigningFailure(format!("Failed to encode VAPID key: {}", e)))?;
        let encoding_key = EncodingKey::from_ec_der(der.as_bytes());

        let verifying_key = VerifyingKey::from(&signing_key);
        let public_key_b64 = encode_base64url(verifying_key.to_encoded_point(false).as_bytes());

        Ok(Self {
            encoding_key,
            verifying_key,
            public_key_b64,
            subject: subject.to_string(),
            token_ttl: token_ttl.min(MAX_TOKEN_TTL),
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Accepts PKCS#8 (`BEGIN PRIVATE KEY`) and SEC1 (`BEGIN EC PRIVATE KEY`) PEM.
    pub fn from_pem(pem: &str, subject: &str, token_ttl: Duration) -> Result<Self, PushError> {
        let signing_key = match SigningKey::from_pkcs8_pem(pem) {
            Ok(key) => key,
            Err(_) => SecretKey::from_sec1_pem(pem)
                .map(SigningKey::from)
                .map_err(|_| {
                    PushError::SigningFailure(
                        "VAPID private key is neither PKCS#8 nor SEC1 PEM".to_string(),
                    )
                })?,
        };

        Self::new(signing_key, subject, token_ttl)
    }

    /// Raw 32-byte private scalar, base64url encoded.
    pub fn from_base64url(private_key: &str, subject: &str, token_ttl: Duration) -> Result<Self, PushError> {
        let bytes = decode_base64url(private_key).map_err(|e| {
            PushError::SigningFailure(format!("VAPID private key is not base64url: {}", e))
        })?;

        let signing_key = SigningKey::from_slice(&bytes).map_err(|_| {
            PushError::SigningFailure(format!(
                "VAPID private key must be a 32-byte P-256 scalar, got {} bytes",
                bytes.len()
            ))
        })?;

        Self::new(signing_key, subject, token_ttl)
    }

    pub fn public_key_base64url(&self) -> &str {
        &self.public_key_b64
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.verifying_key.clone()
    }

    /// Signs a fresh token for `audience`, valid from `now` for the configured TTL.
    pub fn mint(&self, audience: &str, now: i64) -> Result<(String, VapidClaims), PushError> {
        let claims = VapidClaims {
            aud: audience.to_string(),
            exp: now + self.token_ttl.as_secs() as i64,
            sub: self.subject.clone(),
        };

        let token = encode(&Header::new(Algorithm::ES256), &claims, &self.encoding_key)
            .map_err(|e| PushError::SigningFailure(e.to_string()))?;

        Ok((token, claims))
    }

    /// `Authorization` header value for `audience`, reusing a cached token when possible.
    pub async fn authorization(&self, audience: &str) -> Result<String, PushError> {
        let now = Utc::now().timestamp();
        let mut cache = self.cache.lock().await;

        if let Some(cached) = cache.get(audience) {
            if cached.expires_at - now > REFRESH_MARGIN_SECONDS {
                return Ok(authorization_header(&cached.token, &self.public_key_b64));
            }
        }

        let (token, claims) = self.mint(audience, now)?;
        debug!(audience, exp = claims.exp, "Minted VAPID token");

        let header = authorization_header(&token, &self.public_key_b64);
        cache.insert(
            audience.to_string(),
            CachedToken {
                token,
                expires_at: claims.exp,
            },
        );

        Ok(header)
    }
}

pub fn authorization_header(token: &str, public_key_b64: &str) -> String {
    format!("vapid t={}, k={}", token, public_key_b64)
}

/// Checks an ES256 token against `public_key` and `audience`, returning its claims.
pub fn verify_token(
    token: &str,
    public_key: &VerifyingKey,
    audience: &str,
) -> Result<VapidClaims, PushError> {
    let invalid = |reason: String| PushError::SigningFailure(format!("Invalid VAPID token: {}", reason));

    let point = public_key.to_encoded_point(false);
    let (Some(x), Some(y)) = (point.x(), point.y()) else {
        return Err(invalid("public key has no affine coordinates".to_string()));
    };

    let decoding_key = DecodingKey::from_ec_components(
        &encode_base64url(x.as_slice()),
        &encode_base64url(y.as_slice()),
    )
    .map_err(|e| invalid(e.to_string()))?;

    let mut validation = Validation::new(Algorithm::ES256);
    validation.set_audience(&[audience]);
    validation.set_required_spec_claims(&["exp", "aud", "sub"]);

    decode::<VapidClaims>(token, &decoding_key, &validation)
        .map(|data| data.claims)
        .map_err(|e| invalid(e.to_string()))
}
