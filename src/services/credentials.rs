use std::sync::Arc;

use sqlx::PgPool;

use crate::db::queries;
use crate::models::target::normalize_handle;
use crate::services::encryption::EncryptionService;

/// Stores and retrieves session credentials for targets.
///
/// Secrets are encrypted before they reach the relational store. A missing
/// or undecryptable credential is reported as absent, never as an error:
/// the authenticated fetch strategy is simply unavailable for that target.
pub struct CredentialService {
    encryption: Arc<EncryptionService>,
}

impl CredentialService {
    pub fn new(encryption: Arc<EncryptionService>) -> Self {
        Self { encryption }
    }

    /// Store a credential, creating the target on first reference.
    pub async fn store(
        &self,
        pool: &PgPool,
        handle: &str,
        secret: &str,
    ) -> Result<(), CredentialError> {
        let handle = normalize_handle(handle);
        let encrypted = self.encryption.encrypt_secret(secret)?;

        queries::ensure_target(pool, &handle).await?;
        queries::set_target_secret(pool, &handle, Some(&encrypted)).await?;
        Ok(())
    }

    /// Retrieve the decrypted (handle, secret) pair for a session identity.
    pub async fn get(
        &self,
        pool: &PgPool,
        handle: &str,
    ) -> Result<Option<(String, String)>, CredentialError> {
        let handle = normalize_handle(handle);
        let Some(encrypted) = queries::get_target_secret(pool, &handle).await? else {
            return Ok(None);
        };

        match self.encryption.decrypt_secret(&encrypted) {
            Ok(secret) => Ok(Some((handle, secret))),
            Err(e) => {
                tracing::warn!(handle = %handle, error = %e, "Stored credential could not be decrypted");
                Ok(None)
            }
        }
    }

    /// Remove a stored credential. Returns false if the target was unknown.
    pub async fn remove(&self, pool: &PgPool, handle: &str) -> Result<bool, CredentialError> {
        let handle = normalize_handle(handle);
        if queries::get_target_by_handle(pool, &handle).await?.is_none() {
            return Ok(false);
        }
        queries::set_target_secret(pool, &handle, None).await?;
        Ok(true)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Encryption error: {0}")]
    Encryption(#[from] crate::services::encryption::EncryptionError),
}
