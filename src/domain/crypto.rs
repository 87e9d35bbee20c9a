//! Key derivation, packet encryption and fulfillment generation for STREAM.
//!
//! Both keys are derived from the shared secret handed out by the receiver
//! during discovery. Ciphertexts are laid out as `nonce || tag || data`.

use crate::error::{PayError, Result};
use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{AeadInPlace, KeyInit, generic_array::GenericArray},
};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const ENCRYPTION_KEY_STRING: &[u8] = b"ilp_stream_encryption";
const FULFILLMENT_KEY_STRING: &[u8] = b"ilp_stream_fulfillment";
const NONCE_LENGTH: usize = 12;
const TAG_LENGTH: usize = 16;

pub const SHARED_SECRET_LENGTH: usize = 32;

fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; 32] {
    // HMAC accepts keys of any length
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).expect("any key length");
    mac.update(message);
    mac.finalize().into_bytes().into()
}

/// Keys derived from one shared secret.
#[derive(Clone)]
pub struct StreamKeys {
    encryption_key: [u8; 32],
    fulfillment_key: [u8; 32],
}

impl std::fmt::Debug for StreamKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StreamKeys(..)")
    }
}

impl StreamKeys {
    pub fn derive(shared_secret: &[u8; SHARED_SECRET_LENGTH]) -> Self {
        Self {
            encryption_key: hmac_sha256(shared_secret, ENCRYPTION_KEY_STRING),
            fulfillment_key: hmac_sha256(shared_secret, FULFILLMENT_KEY_STRING),
        }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(&self.encryption_key)
            .map_err(|_| PayError::Crypto("invalid encryption key".to_string()))?;
        let mut nonce = [0u8; NONCE_LENGTH];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let mut body = plaintext.to_vec();
        let tag = cipher
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), &[], &mut body)
            .map_err(|_| PayError::Crypto("encryption failed".to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LENGTH + TAG_LENGTH + body.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&tag);
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < NONCE_LENGTH + TAG_LENGTH {
            return Err(PayError::Crypto("ciphertext too short".to_string()));
        }
        let cipher = Aes256Gcm::new_from_slice(&self.encryption_key)
            .map_err(|_| PayError::Crypto("invalid encryption key".to_string()))?;
        let (nonce, rest) = ciphertext.split_at(NONCE_LENGTH);
        let (tag, body) = rest.split_at(TAG_LENGTH);

        let mut body = body.to_vec();
        cipher
            .decrypt_in_place_detached(Nonce::from_slice(nonce), &[], &mut body, GenericArray::from_slice(tag))
            .map_err(|_| PayError::Crypto("decryption failed".to_string()))?;
        Ok(body)
    }

    /// The preimage a receiver reveals to accept a packet carrying `data`.
    pub fn fulfillment(&self, data: &[u8]) -> [u8; 32] {
        hmac_sha256(&self.fulfillment_key, data)
    }

    pub fn condition(&self, data: &[u8]) -> [u8; 32] {
        hash_fulfillment(&self.fulfillment(data))
    }
}

pub fn hash_fulfillment(fulfillment: &[u8; 32]) -> [u8; 32] {
    Sha256::digest(fulfillment).into()
}

/// A condition nobody can fulfill, for packets that only carry frames.
pub fn random_condition() -> [u8; 32] {
    let mut condition = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut condition);
    condition
}
