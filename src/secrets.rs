//! Munge-key secret provisioning
//!
//! Generates a random binary key, transport-encodes it, and stores it in
//! the external secret service. Downstream layers only ever see the
//! returned reference handle; the plaintext is kept solely so the caller
//! can hand it to processes that need the key material directly.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::Rng;
use tracing::info;

use crate::provider::SecretStore;
use crate::{Error, Result};

/// Smallest generated key length in bytes
pub const MIN_KEY_BYTES: usize = 32;
/// Largest generated key length in bytes
pub const MAX_KEY_BYTES: usize = 1024;

/// A stored secret: optional plaintext plus the reference handle
///
/// The plaintext is present only when the secret was generated in this run.
/// The reference handle is always present and is the only thing passed to
/// dependent layers.
#[derive(Clone, Debug)]
pub struct SecretHandle {
    plaintext: Option<String>,
    reference: String,
}

impl SecretHandle {
    /// Transport-encoded plaintext, absent for pre-existing secrets
    pub fn plaintext(&self) -> Option<&str> {
        self.plaintext.as_deref()
    }

    /// Opaque reference to the stored secret
    pub fn reference(&self) -> &str {
        &self.reference
    }
}

/// Generates and stores secrets through the external secret service
pub struct SecretProvisioner {
    store: Arc<dyn SecretStore>,
}

impl SecretProvisioner {
    /// Create a provisioner backed by the given secret store
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    /// Generate a random key, store it, and return the handle
    ///
    /// The key is a random byte sequence of random length within
    /// [`MIN_KEY_BYTES`]..=[`MAX_KEY_BYTES`], base64-encoded for transport.
    /// A store failure is fatal to fixture setup.
    pub async fn provision(&self, region: &str) -> Result<SecretHandle> {
        let encoded = {
            let mut rng = rand::thread_rng();
            let length = rng.gen_range(MIN_KEY_BYTES..=MAX_KEY_BYTES);
            let mut key = vec![0u8; length];
            rng.fill(&mut key[..]);
            STANDARD.encode(&key)
        };

        let reference = match self.store.put(region, &encoded).await {
            Ok(reference) => reference,
            Err(e @ Error::SecretStore { .. }) => return Err(e),
            Err(e) => return Err(Error::secret_store(region, e.to_string())),
        };

        info!(region = %region, reference = %reference, "Stored generated munge key");
        Ok(SecretHandle {
            plaintext: Some(encoded),
            reference,
        })
    }

    /// Reference a pre-existing secret without generating or storing anything
    pub fn use_existing(reference: impl Into<String>) -> SecretHandle {
        let reference = reference.into();
        info!(reference = %reference, "Using pre-existing munge key secret");
        SecretHandle {
            plaintext: None,
            reference,
        }
    }
}
