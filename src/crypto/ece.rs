//! `aes128gcm` content encoding (RFC 8188) as profiled for Web Push (RFC 8291).
//!
//! The whole payload goes into a single record. Salt, record size and the
//! ephemeral public key travel in the binary header in front of the
//! ciphertext, so no `Crypto-Key` or `Encryption` headers are sent.

use std::sync::Arc;

use p256::SecretKey;

use crate::{
    crypto::keys::{
        self, EntropySource, OsEntropy, PUBLIC_KEY_LEN, SALT_LEN, SubscriberKeys, TAG_LEN,
    },
    error::PushError,
    models::notification::NotificationRequest,
};

pub const CONTENT_ENCODING: &str = "aes128gcm";
pub const RECORD_SIZE: u32 = 4096;
pub const HEADER_LEN: usize = SALT_LEN + 4 + 1 + PUBLIC_KEY_LEN;

/// Largest plaintext that keeps the whole body within one 4096-byte record.
pub const MAX_PLAINTEXT_LEN: usize = RECORD_SIZE as usize - HEADER_LEN - TAG_LEN - 1;

const LAST_RECORD_DELIMITER: u8 = 0x02;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedMessage {
    pub ciphertext: Vec<u8>,
    pub salt: [u8; SALT_LEN],
    pub ephemeral_public_key: Vec<u8>,
    pub record_size: u32,
}

impl EncryptedMessage {
    /// Request body: `salt || rs || idlen || keyid || ciphertext`.
    pub fn body(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(HEADER_LEN + self.ciphertext.len());
        body.extend_from_slice(&self.salt);
        body.extend_from_slice(&self.record_size.to_be_bytes());
        body.push(self.ephemeral_public_key.len() as u8);
        body.extend_from_slice(&self.ephemeral_public_key);
        body.extend_from_slice(&self.ciphertext);
        body
    }

    pub fn parse(body: &[u8]) -> Result<Self, PushError> {
        if body.len() < SALT_LEN + 5 {
            return Err(PushError::CryptoKeyInvalid("Truncated aes128gcm header".to_string()));
        }

        let (salt, rest) = body.split_at(SALT_LEN);
        let record_size = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]);
        let id_len = rest[4] as usize;
        let rest = &rest[5..];

        if rest.len() < id_len + TAG_LEN {
            return Err(PushError::CryptoKeyInvalid("Truncated aes128gcm record".to_string()));
        }

        let (key_id, ciphertext) = rest.split_at(id_len);
        let mut salt_bytes = [0u8; SALT_LEN];
        salt_bytes.copy_from_slice(salt);

        Ok(Self {
            ciphertext: ciphertext.to_vec(),
            salt: salt_bytes,
            ephemeral_public_key: key_id.to_vec(),
            record_size,
        })
    }
}

/// Encrypts `plaintext` for one subscriber.
pub fn encrypt(
    plaintext: &[u8],
    subscriber: &SubscriberKeys,
    entropy: &dyn EntropySource,
) -> Result<EncryptedMessage, PushError> {
    if plaintext.len() > MAX_PLAINTEXT_LEN {
        return Err(PushError::PayloadTooLarge(plaintext.len()));
    }

    let ephemeral = entropy.ephemeral_key();
    let salt = entropy.salt();

    let as_public = keys::public_key_bytes(&ephemeral.public_key());
    let ua_public = subscriber.public_key_bytes();

    let shared_secret = keys::ecdh(&ephemeral, &subscriber.public_key);
    let ikm = keys::derive_ikm(&shared_secret, &subscriber.auth_secret, &ua_public, &as_public)?;
    let content_keys = keys::derive_content_keys(&ikm, &salt)?;

    let mut record = Vec::with_capacity(plaintext.len() + 1);
    record.extend_from_slice(plaintext);
    record.push(LAST_RECORD_DELIMITER);

    let ciphertext = keys::seal(&content_keys, &record)?;

    Ok(EncryptedMessage {
        ciphertext,
        salt,
        ephemeral_public_key: as_public,
        record_size: RECORD_SIZE,
    })
}

/// Reverses [`encrypt`] using the subscriber's private key.
pub fn decrypt(
    body: &[u8],
    ua_secret: &SecretKey,
    auth_secret: &[u8; keys::AUTH_SECRET_LEN],
) -> Result<Vec<u8>, PushError> {
    let message = EncryptedMessage::parse(body)?;

    let as_public = p256::PublicKey::from_sec1_bytes(&message.ephemeral_public_key)
        .map_err(|_| PushError::CryptoKeyInvalid("Invalid ephemeral public key".to_string()))?;
    let ua_public = keys::public_key_bytes(&ua_secret.public_key());

    let shared_secret = keys::ecdh(ua_secret, &as_public);
    let ikm = keys::derive_ikm(
        &shared_secret,
        auth_secret,
        &ua_public,
        &message.ephemeral_public_key,
    )?;
    let content_keys = keys::derive_content_keys(&ikm, &message.salt)?;

    let mut record = keys::open(&content_keys, &message.ciphertext)?;

    while record.last() == Some(&0) {
        record.pop();
    }

    match record.pop() {
        Some(LAST_RECORD_DELIMITER) => Ok(record),
        _ => Err(PushError::CryptoKeyInvalid("Missing record delimiter".to_string())),
    }
}

/// Turns a notification into per-subscriber encrypted messages.
#[derive(Clone)]
pub struct PayloadEncryptor {
    entropy: Arc<dyn EntropySource>,
}

impl Default for PayloadEncryptor {
    fn default() -> Self {
        Self::new(Arc::new(OsEntropy))
    }
}

impl PayloadEncryptor {
    pub fn new(entropy: Arc<dyn EntropySource>) -> Self {
        Self { entropy }
    }

    pub fn encrypt_notification(
        &self,
        request: &NotificationRequest,
        subscriber: &SubscriberKeys,
    ) -> Result<EncryptedMessage, PushError> {
        let payload = request.payload_bytes()?;
        encrypt(&payload, subscriber, self.entropy.as_ref())
    }
}
