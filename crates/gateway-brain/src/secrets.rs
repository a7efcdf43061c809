// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Decryption of tenant-scoped secrets with the key-encryption key loaded
//! from `GATEWAY_KEK`. Secret ids never leave this process: the brain
//! dereferences them against the store, decrypts, and forwards the
//! plaintext inline in the invoke payload.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use gateway_store::EncryptedSecret;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};

use crate::error::BrainError;

/// Ciphertext layout: a 12-byte nonce followed by the AES-256-GCM sealed
/// box (tag included, as `ring::aead::seal_in_place_append_tag` produces).
pub struct Kek {
    key: LessSafeKey,
}

impl Kek {
    pub fn load(base64_key: &str) -> Result<Self, BrainError> {
        let bytes = STANDARD
            .decode(base64_key)
            .map_err(|e| BrainError::Config(format!("GATEWAY_KEK is not valid base64: {e}")))?;
        let unbound = UnboundKey::new(&AES_256_GCM, &bytes)
            .map_err(|_| BrainError::Config("GATEWAY_KEK must decode to 32 bytes".into()))?;
        Ok(Self { key: LessSafeKey::new(unbound) })
    }

    pub fn decrypt(&self, secret: &EncryptedSecret) -> Result<Vec<u8>, BrainError> {
        if secret.ciphertext.len() < NONCE_LEN {
            return Err(BrainError::SecretDecryption("ciphertext too short".into()));
        }
        let (nonce_bytes, sealed) = secret.ciphertext.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| BrainError::SecretDecryption("invalid nonce".into()))?;
        let mut buf = sealed.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut buf)
            .map_err(|_| BrainError::SecretDecryption("decryption failed".into()))?;
        Ok(plaintext.to_vec())
    }

    pub fn decrypt_to_string(&self, secret: &EncryptedSecret) -> Result<String, BrainError> {
        let plaintext = self.decrypt(secret)?;
        String::from_utf8(plaintext).map_err(|_| BrainError::SecretDecryption("not valid utf-8".into()))
    }
}

#[cfg(test)]
#[path = "secrets_tests.rs"]
mod tests;
