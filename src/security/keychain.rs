//! OS Keychain integration using the keyring crate

use super::CredentialStore;
use crate::error::{AppError, Result};
use crate::sources::types::SourceCredentials;
use keyring::Entry;

const SERVICE: &str = "openalgo-livefeed";

/// Keychain manager for source credential storage
pub struct KeychainManager;

impl KeychainManager {
    pub fn new() -> Self {
        Self
    }

    fn entry(source: &str) -> Result<Entry> {
        Entry::new(SERVICE, &format!("source-{}", source)).map_err(AppError::Keychain)
    }
}

impl Default for KeychainManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeychainManager {
    /// Store source credentials as JSON
    fn store_credentials(&self, source: &str, credentials: &SourceCredentials) -> Result<()> {
        let json = serde_json::to_string(credentials)?;
        Self::entry(source)?
            .set_password(&json)
            .map_err(AppError::Keychain)?;

        tracing::info!("Stored credentials for source '{}'", source);
        Ok(())
    }

    /// Get source credentials
    fn get_credentials(&self, source: &str) -> Result<Option<SourceCredentials>> {
        match Self::entry(source)?.get_password() {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(AppError::Keychain(e)),
        }
    }

    /// Delete source credentials
    fn delete_credentials(&self, source: &str) -> Result<()> {
        match Self::entry(source)?.delete_password() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()), // Already deleted
            Err(e) => Err(AppError::Keychain(e)),
        }
    }
}
