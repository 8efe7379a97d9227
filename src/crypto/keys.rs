//! Elliptic-curve key handling, HKDF derivation and AEAD for Web Push (RFC 8291).
//!
//! Every intermediate artifact of the handshake (shared secret, input keying
//! material, content-encryption key, nonce) is a named value so each step can
//! be checked on its own.

use aes_gcm::{
    Aes128Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{
    Engine,
    engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD},
};
use hkdf::Hkdf;
use p256::{PublicKey, SecretKey, elliptic_curve::rand_core::OsRng, elliptic_curve::sec1::ToEncodedPoint};
use sha2::Sha256;

use crate::error::PushError;

pub const SALT_LEN: usize = 16;
pub const AUTH_SECRET_LEN: usize = 16;
pub const PUBLIC_KEY_LEN: usize = 65;
pub const TAG_LEN: usize = 16;

const KEY_INFO_PREFIX: &[u8] = b"WebPush: info\0";
const CEK_INFO: &[u8] = b"Content-Encoding: aes128gcm\0";
const NONCE_INFO: &[u8] = b"Content-Encoding: nonce\0";

/// Decodes base64url, tolerating padding and the standard alphabet.
pub fn decode_base64url(value: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let trimmed = value.trim().trim_end_matches('=');
    URL_SAFE_NO_PAD
        .decode(trimmed)
        .or_else(|_| STANDARD_NO_PAD.decode(trimmed))
}

pub fn encode_base64url(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Uncompressed SEC1 encoding (0x04 || x || y).
pub fn public_key_bytes(key: &PublicKey) -> Vec<u8> {
    key.to_encoded_point(false).as_bytes().to_vec()
}

/// Validated key material of one subscriber.
#[derive(Debug, Clone)]
pub struct SubscriberKeys {
    pub public_key: PublicKey,
    pub auth_secret: [u8; AUTH_SECRET_LEN],
}

impl SubscriberKeys {
    pub fn from_bytes(p256dh: &[u8], auth: &[u8]) -> Result<Self, PushError> {
        if p256dh.len() != PUBLIC_KEY_LEN || p256dh[0] != 0x04 {
            return Err(PushError::CryptoKeyInvalid(format!(
                "p256dh must be a {}-byte uncompressed point, got {} bytes",
                PUBLIC_KEY_LEN,
                p256dh.len()
            )));
        }

        let public_key = PublicKey::from_sec1_bytes(p256dh)
            .map_err(|_| PushError::CryptoKeyInvalid("p256dh is not a point on P-256".to_string()))?;

        let auth_secret: [u8; AUTH_SECRET_LEN] = auth.try_into().map_err(|_| {
            PushError::CryptoKeyInvalid(format!(
                "auth secret must be {} bytes, got {}",
                AUTH_SECRET_LEN,
                auth.len()
            ))
        })?;

        Ok(Self {
            public_key,
            auth_secret,
        })
    }

    pub fn from_base64url(p256dh: &str, auth: &str) -> Result<Self, PushError> {
        let p256dh = decode_base64url(p256dh)
            .map_err(|e| PushError::CryptoKeyInvalid(format!("p256dh is not base64url: {}", e)))?;
        let auth = decode_base64url(auth)
            .map_err(|e| PushError::CryptoKeyInvalid(format!("auth is not base64url: {}", e)))?;

        Self::from_bytes(&p256dh, &auth)
    }

    pub fn public_key_bytes(&self) -> Vec<u8> {
        public_key_bytes(&self.public_key)
    }
}

/// Source of per-message randomness: the ephemeral key pair and the salt.
pub trait EntropySource: Send + Sync {
    fn ephemeral_key(&self) -> SecretKey;

    fn salt(&self) -> [u8; SALT_LEN];
}

/// Fresh randomness from the operating system for every message.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn ephemeral_key(&self) -> SecretKey {
        SecretKey::random(&mut OsRng)
    }

    fn salt(&self) -> [u8; SALT_LEN] {
        rand::random()
    }
}

/// Fixed key and salt, for reproducible ciphertext.
#[derive(Debug, Clone)]
pub struct FixedEntropy {
    pub ephemeral_key: SecretKey,
    pub salt: [u8; SALT_LEN],
}

impl EntropySource for FixedEntropy {
    fn ephemeral_key(&self) -> SecretKey {
        self.ephemeral_key.clone()
    }

    fn salt(&self) -> [u8; SALT_LEN] {
        self.salt
    }
}

/// Content-encryption key and nonce for a single aes128gcm record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentKeys {
    pub cek: [u8; 16],
    pub nonce: [u8; 12],
}

pub fn ecdh(local: &SecretKey, remote: &PublicKey) -> [u8; 32] {
    let shared = p256::ecdh::diffie_hellman(local.to_nonzero_scalar(), remote.as_affine());
    let mut out = [0u8; 32];
    out.copy_from_slice(shared.raw_secret_bytes());
    out
}

/// Mixes the ECDH secret with the subscriber's auth secret, bound to both public keys.
pub fn derive_ikm(
    shared_secret: &[u8; 32],
    auth_secret: &[u8; AUTH_SECRET_LEN],
    ua_public: &[u8],
    as_public: &[u8],
) -> Result<[u8; 32], PushError> {
    let mut info = Vec::with_capacity(KEY_INFO_PREFIX.len() + ua_public.len() + as_public.len());
    info.extend_from_slice(KEY_INFO_PREFIX);
    info.extend_from_slice(ua_public);
    info.extend_from_slice(as_public);

    let hkdf = Hkdf::<Sha256>::new(Some(auth_secret.as_slice()), shared_secret);
    let mut ikm = [0u8; 32];
    hkdf.expand(&info, &mut ikm)
        .map_err(|e| PushError::CryptoKeyInvalid(format!("HKDF expand failed: {}", e)))?;
    Ok(ikm)
}

pub fn derive_content_keys(ikm: &[u8; 32], salt: &[u8; SALT_LEN]) -> Result<ContentKeys, PushError> {
    let hkdf = Hkdf::<Sha256>::new(Some(salt.as_slice()), ikm);

    let mut cek = [0u8; 16];
    hkdf.expand(CEK_INFO, &mut cek)
        .map_err(|e| PushError::CryptoKeyInvalid(format!("HKDF expand failed: {}", e)))?;

    let mut nonce = [0u8; 12];
    hkdf.expand(NONCE_INFO, &mut nonce)
        .map_err(|e| PushError::CryptoKeyInvalid(format!("HKDF expand failed: {}", e)))?;

    Ok(ContentKeys { cek, nonce })
}

/// AES-128-GCM encryption; the 16-byte tag is appended to the ciphertext.
pub fn seal(keys: &ContentKeys, plaintext: &[u8]) -> Result<Vec<u8>, PushError> {
    let cipher = Aes128Gcm::new(&keys.cek.into());
    cipher
        .encrypt(Nonce::from_slice(&keys.nonce), plaintext)
        .map_err(|_| PushError::CryptoKeyInvalid("AEAD seal failed".to_string()))
}

pub fn open(keys: &ContentKeys, ciphertext: &[u8]) -> Result<Vec<u8>, PushError> {
    let cipher = Aes128Gcm::new(&keys.cek.into());
    cipher
        .decrypt(Nonce::from_slice(&keys.nonce), ciphertext)
        .map_err(|_| PushError::CryptoKeyInvalid("AEAD open failed".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ecdh_is_symmetric() {
        let a = SecretKey::random(&mut OsRng);
        let b = SecretKey::random(&mut OsRng);

        assert_eq!(ecdh(&a, &b.public_key()), ecdh(&b, &a.public_key()));
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let keys = ContentKeys {
            cek: [7u8; 16],
            nonce: [9u8; 12],
        };

        let sealed = seal(&keys, b"hello").unwrap();
        assert_eq!(sealed.len(), 5 + TAG_LEN);
        assert_eq!(open(&keys, &sealed).unwrap(), b"hello");
    }

    #[test]
    fn test_open_rejects_tampered_ciphertext() {
        let keys = ContentKeys {
            cek: [1u8; 16],
            nonce: [2u8; 12],
        };

        let mut sealed = seal(&keys, b"payload").unwrap();
        sealed[0] ^= 0xff;
        assert!(open(&keys, &sealed).is_err());
    }

    #[test]
    fn test_subscriber_keys_accept_padded_base64() {
        let secret = SecretKey::random(&mut OsRng);
        let p256dh = URL_SAFE_NO_PAD.encode(public_key_bytes(&secret.public_key())) + "=";
        let auth = "AAAAAAAAAAAAAAAAAAAAAA==";

        let keys = SubscriberKeys::from_base64url(&p256dh, auth).unwrap();
        assert_eq!(keys.auth_secret, [0u8; 16]);
    }

    #[test]
    fn test_subscriber_keys_reject_wrong_length() {
        let err = SubscriberKeys::from_bytes(&[4u8; 33], &[0u8; 16]).unwrap_err();
        assert!(matches!(err, PushError::CryptoKeyInvalid(_)));
    }

    #[test]
    fn test_subscriber_keys_reject_point_off_curve() {
        let mut bogus = [0u8; PUBLIC_KEY_LEN];
        bogus[0] = 0x04;
        bogus[1] = 1;
        let err = SubscriberKeys::from_bytes(&bogus, &[0u8; 16]).unwrap_err();
        assert!(matches!(err, PushError::CryptoKeyInvalid(_)));
    }

    #[test]
    fn test_subscriber_keys_reject_short_auth() {
        let secret = SecretKey::random(&mut OsRng);
        let err = SubscriberKeys::from_bytes(&public_key_bytes(&secret.public_key()), &[0u8; 8])
            .unwrap_err();
        assert!(matches!(err, PushError::CryptoKeyInvalid(_)));
    }
}
