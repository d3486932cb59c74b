//! SQLite database module

pub mod models;
mod migrations;
mod settings;
mod snapshots;
mod symbol;

use crate::error::Result;
use crate::sources::types::{LiveSnapshot, SourceDescriptor, Symbol};
pub use models::FeedSettings;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;

/// SQLite database wrapper
pub struct SqliteDb {
    conn: Mutex<Connection>,
}

impl SqliteDb {
    /// Create new SQLite database connection
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrent access
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        Self::with_connection(conn)
    }

    /// In-memory database, migrated and seeded like a fresh install
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };

        // Run migrations
        db.run_migrations()?;

        Ok(db)
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock();
        migrations::run_migrations(&conn)
    }

    // ========== Snapshot Methods ==========

    /// Store one snapshot
    pub fn insert_snapshot(&self, snapshot: &LiveSnapshot) -> Result<()> {
        let conn = self.conn.lock();
        snapshots::insert_snapshot(&conn, snapshot)
    }

    /// Store a batch of snapshots atomically
    pub fn insert_snapshots(&self, batch: &[LiveSnapshot]) -> Result<()> {
        let mut conn = self.conn.lock();
        snapshots::insert_snapshots(&mut conn, batch)
    }

    /// Most recent snapshots for a symbol
    pub fn recent_snapshots(&self, symbol: &str, limit: usize) -> Result<Vec<LiveSnapshot>> {
        let conn = self.conn.lock();
        snapshots::recent_snapshots(&conn, symbol, limit)
    }

    /// Stored snapshot count for a symbol
    pub fn count_snapshots(&self, symbol: &str) -> Result<i64> {
        let conn = self.conn.lock();
        snapshots::count_snapshots(&conn, symbol)
    }

    // ========== Symbol Methods ==========

    /// Load active symbols
    pub fn list_active_symbols(&self) -> Result<Vec<Symbol>> {
        let conn = self.conn.lock();
        symbol::list_active_symbols(&conn)
    }

    /// Load all symbols
    pub fn list_symbols(&self) -> Result<Vec<Symbol>> {
        let conn = self.conn.lock();
        symbol::list_symbols(&conn)
    }

    /// Add or update a symbol
    pub fn upsert_symbol(&self, symbol: &Symbol) -> Result<()> {
        let conn = self.conn.lock();
        symbol::upsert_symbol(&conn, symbol)
    }

    /// Enable or disable a symbol
    pub fn set_symbol_active(&self, name: &str, active: bool) -> Result<()> {
        let conn = self.conn.lock();
        symbol::set_symbol_active(&conn, name, active)
    }

    // ========== Source Methods ==========

    /// Load the source chain
    pub fn list_sources(&self) -> Result<Vec<SourceDescriptor>> {
        let conn = self.conn.lock();
        symbol::list_sources(&conn)
    }

    /// Add or update a source descriptor
    pub fn upsert_source(&self, source: &SourceDescriptor) -> Result<()> {
        let conn = self.conn.lock();
        symbol::upsert_source(&conn, source)
    }

    // ========== Settings Methods ==========

    /// Get feed settings
    pub fn get_feed_settings(&self) -> Result<FeedSettings> {
        let conn = self.conn.lock();
        settings::get_feed_settings(&conn)
    }

    /// Update feed settings
    pub fn update_feed_settings(&self, feed_settings: &FeedSettings) -> Result<FeedSettings> {
        let conn = self.conn.lock();
        settings::update_feed_settings(&conn, feed_settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::types::SymbolKind;
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::tempdir;

    fn snapshot(symbol: &str, price: f64, sequence: u64, second: u32) -> LiveSnapshot {
        LiveSnapshot {
            symbol: symbol.to_string(),
            price,
            volume: 1_000,
            open_interest: 5_000,
            change: 10.5,
            change_percent: 0.04,
            high: price + 5.0,
            low: price - 5.0,
            source: "zerodha".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 6, 5, 6, 0, second).unwrap(),
            sequence,
        }
    }

    #[test]
    fn test_fresh_database_is_seeded() {
        let db = SqliteDb::open_in_memory().unwrap();

        let symbols = db.list_active_symbols().unwrap();
        let names: Vec<&str> = symbols.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["NIFTY", "BANKNIFTY", "FINNIFTY", "MIDCPNIFTY", "SENSEX"]);

        let sources = db.list_sources().unwrap();
        assert_eq!(sources[0].name, "zerodha");
        assert_eq!(sources[0].min_spacing_ms, Some(2_000));
        assert_eq!(sources[1].name, "nse");
        assert_eq!(sources[1].min_spacing_ms, None);
        assert_eq!(sources[2].name, "synthetic");

        assert_eq!(db.get_feed_settings().unwrap(), FeedSettings::default());
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("feed.db");

        let db = SqliteDb::new(&path).unwrap();
        db.upsert_symbol(&Symbol::new("RELIANCE", SymbolKind::Stock, "NSE"))
            .unwrap();
        drop(db);

        let db = SqliteDb::new(&path).unwrap();
        assert_eq!(db.list_symbols().unwrap().len(), 6);
    }

    #[test]
    fn test_batch_insert_and_recent_query() {
        let db = SqliteDb::open_in_memory().unwrap();
        db.insert_snapshots(&[
            snapshot("NIFTY", 24_500.0, 1, 0),
            snapshot("NIFTY", 24_510.0, 2, 5),
            snapshot("BANKNIFTY", 52_000.0, 3, 5),
        ])
        .unwrap();

        let recent = db.recent_snapshots("NIFTY", 10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].price, 24_510.0);
        assert_eq!(recent[0].sequence, 2);
        assert_eq!(recent[0], snapshot("NIFTY", 24_510.0, 2, 5));

        assert_eq!(db.recent_snapshots("NIFTY", 1).unwrap().len(), 1);
    }

    #[test]
    fn test_replayed_flush_is_idempotent() {
        let db = SqliteDb::open_in_memory().unwrap();
        let batch = vec![snapshot("NIFTY", 24_500.0, 1, 0)];
        db.insert_snapshots(&batch).unwrap();
        db.insert_snapshots(&batch).unwrap();
        db.insert_snapshot(&batch[0]).unwrap();
        assert_eq!(db.count_snapshots("NIFTY").unwrap(), 1);
    }

    #[test]
    fn test_symbol_toggle() {
        let db = SqliteDb::open_in_memory().unwrap();
        db.set_symbol_active("SENSEX", false).unwrap();
        assert_eq!(db.list_active_symbols().unwrap().len(), 4);
        assert!(db.set_symbol_active("UNKNOWN", true).is_err());
    }

    #[test]
    fn test_source_upsert_reorders_chain() {
        let db = SqliteDb::open_in_memory().unwrap();
        db.upsert_source(&SourceDescriptor::new("nse", 0).with_timeout(2_500))
            .unwrap();

        let sources = db.list_sources().unwrap();
        assert_eq!(sources[0].name, "nse");
        assert_eq!(sources[0].timeout_ms, 2_500);
    }

    #[test]
    fn test_update_feed_settings() {
        let db = SqliteDb::open_in_memory().unwrap();
        let mut settings = db.get_feed_settings().unwrap();
        settings.ingest_interval_secs = 3;
        settings.api_port = 6100;

        let saved = db.update_feed_settings(&settings).unwrap();
        assert_eq!(saved.ingest_interval_secs, 3);
        assert_eq!(saved.api_port, 6100);

        settings.flush_interval_secs = 0;
        assert!(db.update_feed_settings(&settings).is_err());
    }

    #[test]
    fn test_timestamps_round_trip_at_millisecond_precision() {
        let db = SqliteDb::open_in_memory().unwrap();
        let mut s = snapshot("SENSEX", 80_500.0, 9, 0);
        s.timestamp = s.timestamp + Duration::milliseconds(123);
        db.insert_snapshot(&s).unwrap();

        let stored = &db.recent_snapshots("SENSEX", 1).unwrap()[0];
        assert_eq!(stored.timestamp, s.timestamp);
    }
}
