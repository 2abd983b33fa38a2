//! Project secrets.
//!
//! Stored secret values are opaque to the engine; a [`SecretCipher`] turns
//! them into plaintext for the lifetime of one request and the plaintext map
//! is dropped with the request context.

pub mod template;

use std::collections::HashMap;

use thiserror::Error;

use crate::catalog::Secret;

pub use template::{render, render_pairs};

#[derive(Debug, Error)]
#[error("failed to decrypt secret '{name}': {reason}")]
pub struct SecretError {
    pub name: String,
    pub reason: String,
}

/// Decrypts a stored secret value.
pub trait SecretCipher: Send + Sync {
    fn decrypt(&self, stored: &str) -> Result<String, String>;
}

/// Values are stored in plaintext; at-rest encryption is handled outside.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaintextCipher;

impl SecretCipher for PlaintextCipher {
    fn decrypt(&self, stored: &str) -> Result<String, String> {
        Ok(stored.to_string())
    }
}

/// Build the name → plaintext map for a project's secrets.
pub fn decrypt_secrets(
    cipher: &dyn SecretCipher,
    secrets: &[Secret],
) -> Result<HashMap<String, String>, SecretError> {
    secrets
        .iter()
        .map(|secret| {
            cipher
                .decrypt(&secret.value)
                .map(|plain| (secret.name.clone(), plain))
                .map_err(|reason| SecretError {
                    name: secret.name.clone(),
                    reason,
                })
        })
        .collect()
}
