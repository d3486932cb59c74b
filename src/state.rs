//! Application state management

use crate::db::sqlite::{FeedSettings, SqliteDb};
use crate::db::FeedConfigStore;
use crate::error::{AppError, Result};
use crate::security::{CredentialStore, KeychainManager, MemoryCredentials};
use crate::service::{MarketDataService, ServiceConfig};
use crate::sources::types::SourceCredentials;
use crate::sources::SourceRegistry;
use std::path::PathBuf;
use std::sync::Arc;

/// Environment variable overriding the data directory
pub const DATA_DIR_ENV: &str = "OPENALGO_FEED_DATA_DIR";

/// Environment variable selecting the credential backend (`keychain` or `memory`)
pub const CREDENTIALS_ENV: &str = "OPENALGO_FEED_CREDENTIALS";

/// Application state shared with the API handlers
pub struct AppState {
    /// SQLite database connection
    pub sqlite: Arc<SqliteDb>,

    /// Source credentials
    pub credentials: Arc<dyn CredentialStore>,

    /// Running live feed
    pub service: Arc<MarketDataService>,

    /// Settings the service was started with
    pub settings: FeedSettings,

    /// Application data directory
    pub data_dir: PathBuf,
}

impl AppState {
    /// Create application state and start the live feed
    pub async fn new(data_dir: PathBuf) -> Result<Self> {
        // Create data directory if it doesn't exist
        std::fs::create_dir_all(&data_dir)?;

        tracing::info!("Data directory: {:?}", data_dir);

        // Initialize SQLite database
        let sqlite_path = data_dir.join("livefeed.db");
        let sqlite = Arc::new(SqliteDb::new(&sqlite_path)?);

        let settings = sqlite.get_feed_settings().unwrap_or_else(|e| {
            tracing::warn!("Failed to load feed settings, using defaults: {}", e);
            FeedSettings::default()
        });

        let credentials = credential_store_from_env()?;
        let sources = SourceRegistry::with_builtin_sources()
            .map_err(|e| AppError::Config(format!("Failed to build source clients: {}", e)))?;
        let config = ServiceConfig::from(&settings);

        Self::with_parts(sqlite, credentials, sources, settings, config, data_dir).await
    }

    /// Assemble state from already-built parts
    pub async fn with_parts(
        sqlite: Arc<SqliteDb>,
        credentials: Arc<dyn CredentialStore>,
        sources: SourceRegistry,
        settings: FeedSettings,
        config: ServiceConfig,
        data_dir: PathBuf,
    ) -> Result<Self> {
        let config_store = Arc::new(FeedConfigStore::new(sqlite.clone(), credentials.clone()));
        let service = MarketDataService::start(config, sources, config_store, sqlite.clone()).await?;

        Ok(Self {
            sqlite,
            credentials,
            service: Arc::new(service),
            settings,
            data_dir,
        })
    }
}

/// Data directory from the environment, defaulting to `./data`
pub fn data_dir_from_env() -> PathBuf {
    std::env::var(DATA_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data"))
}

/// Keychain by default; `memory` keeps credentials in process, seeded from
/// `ZERODHA_*` variables, for headless hosts without a keychain.
fn credential_store_from_env() -> Result<Arc<dyn CredentialStore>> {
    let backend = std::env::var(CREDENTIALS_ENV).unwrap_or_else(|_| "keychain".to_string());

    match backend.as_str() {
        "keychain" => Ok(Arc::new(KeychainManager::new())),
        "memory" => {
            let store = MemoryCredentials::new();
            if let Ok(api_key) = std::env::var("ZERODHA_API_KEY") {
                store.store_credentials(
                    "zerodha",
                    &SourceCredentials {
                        api_key,
                        api_secret: std::env::var("ZERODHA_API_SECRET").ok(),
                        request_token: std::env::var("ZERODHA_REQUEST_TOKEN").ok(),
                        access_token: std::env::var("ZERODHA_ACCESS_TOKEN").ok(),
                    },
                )?;
            }
            Ok(Arc::new(store))
        }
        other => Err(AppError::Config(format!(
            "Unknown credential backend '{}' (expected keychain or memory)",
            other
        ))),
    }
}
