//! Source credential storage
//!
//! Broker API keys and session tokens live in the OS keychain, never in the
//! SQLite file.

mod keychain;

use crate::error::Result;
use crate::sources::types::SourceCredentials;
use parking_lot::RwLock;
use std::collections::HashMap;

pub use keychain::KeychainManager;

/// Storage for per-source credentials
pub trait CredentialStore: Send + Sync {
    fn store_credentials(&self, source: &str, credentials: &SourceCredentials) -> Result<()>;

    fn get_credentials(&self, source: &str) -> Result<Option<SourceCredentials>>;

    fn delete_credentials(&self, source: &str) -> Result<()>;
}

/// Process-local credential store, for headless runs and tests
#[derive(Default)]
pub struct MemoryCredentials {
    entries: RwLock<HashMap<String, SourceCredentials>>,
}

impl MemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentials {
    fn store_credentials(&self, source: &str, credentials: &SourceCredentials) -> Result<()> {
        self.entries
            .write()
            .insert(source.to_string(), credentials.clone());
        Ok(())
    }

    fn get_credentials(&self, source: &str) -> Result<Option<SourceCredentials>> {
        Ok(self.entries.read().get(source).cloned())
    }

    fn delete_credentials(&self, source: &str) -> Result<()> {
        self.entries.write().remove(source);
        Ok(())
    }
}
