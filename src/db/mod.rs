//! Persistence and configuration collaborators
//!
//! The pipeline only talks to these traits; SQLite (plus the OS keychain for
//! credentials) is the shipped implementation.

pub mod sqlite;

use crate::error::Result;
use crate::security::CredentialStore;
use crate::sources::types::{LiveSnapshot, SourceCredentials, SourceDescriptor, Symbol};
use async_trait::async_trait;
use sqlite::SqliteDb;
use std::sync::Arc;

/// Durable store for resolved snapshots
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn insert_live_snapshot(&self, snapshot: &LiveSnapshot) -> Result<()>;

    /// All-or-nothing batch insert
    async fn insert_live_snapshots(&self, snapshots: &[LiveSnapshot]) -> Result<()>;

    /// Most recent first
    async fn query_recent_snapshots(&self, symbol: &str, limit: usize) -> Result<Vec<LiveSnapshot>>;
}

/// Source of symbol, source and credential configuration
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn list_active_symbols(&self) -> Result<Vec<Symbol>>;

    async fn list_sources(&self) -> Result<Vec<SourceDescriptor>>;

    async fn get_source_credentials(&self, source: &str) -> Result<Option<SourceCredentials>>;
}

#[async_trait]
impl SnapshotStore for SqliteDb {
    async fn insert_live_snapshot(&self, snapshot: &LiveSnapshot) -> Result<()> {
        self.insert_snapshot(snapshot)
    }

    async fn insert_live_snapshots(&self, snapshots: &[LiveSnapshot]) -> Result<()> {
        self.insert_snapshots(snapshots)
    }

    async fn query_recent_snapshots(&self, symbol: &str, limit: usize) -> Result<Vec<LiveSnapshot>> {
        self.recent_snapshots(symbol, limit)
    }
}

/// Configuration backed by the SQLite tables and a credential store
pub struct FeedConfigStore {
    db: Arc<SqliteDb>,
    credentials: Arc<dyn CredentialStore>,
}

impl FeedConfigStore {
    pub fn new(db: Arc<SqliteDb>, credentials: Arc<dyn CredentialStore>) -> Self {
        Self { db, credentials }
    }
}

#[async_trait]
impl ConfigStore for FeedConfigStore {
    async fn list_active_symbols(&self) -> Result<Vec<Symbol>> {
        self.db.list_active_symbols()
    }

    async fn list_sources(&self) -> Result<Vec<SourceDescriptor>> {
        self.db.list_sources()
    }

    async fn get_source_credentials(&self, source: &str) -> Result<Option<SourceCredentials>> {
        self.credentials.get_credentials(source)
    }
}
