//! SQLite database migrations

use crate::error::Result;
use rusqlite::Connection;

/// Run all database migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    // Create migrations table
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    run_migration(conn, "001_live_snapshots", CREATE_LIVE_SNAPSHOTS_TABLE)?;
    run_migration(conn, "002_symbols", CREATE_SYMBOLS_TABLE)?;
    run_migration(conn, "003_sources", CREATE_SOURCES_TABLE)?;
    run_migration(conn, "004_feed_settings", CREATE_FEED_SETTINGS_TABLE)?;

    tracing::info!("Database migrations completed");
    Ok(())
}

fn run_migration(conn: &Connection, name: &str, sql: &str) -> Result<()> {
    // Check if migration already applied
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM migrations WHERE name = ?)",
        [name],
        |row| row.get(0),
    )?;

    if !exists {
        tracing::info!("Running migration: {}", name);
        conn.execute_batch(sql)?;
        conn.execute("INSERT INTO migrations (name) VALUES (?)", [name])?;
    }

    Ok(())
}

const CREATE_LIVE_SNAPSHOTS_TABLE: &str = r#"
CREATE TABLE live_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    price REAL NOT NULL,
    volume INTEGER NOT NULL DEFAULT 0,
    open_interest INTEGER NOT NULL DEFAULT 0,
    change REAL NOT NULL DEFAULT 0,
    change_percent REAL NOT NULL DEFAULT 0,
    high REAL NOT NULL,
    low REAL NOT NULL,
    source TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    timestamp_ms INTEGER NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(symbol, timestamp_ms)
);
CREATE INDEX IF NOT EXISTS idx_live_snapshots_symbol_ts ON live_snapshots(symbol, timestamp_ms DESC);
"#;

const CREATE_SYMBOLS_TABLE: &str = r#"
CREATE TABLE symbols (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL DEFAULT 'index',
    exchange TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
INSERT INTO symbols (name, kind, exchange) VALUES
    ('NIFTY', 'index', 'NSE'),
    ('BANKNIFTY', 'index', 'NSE'),
    ('FINNIFTY', 'index', 'NSE'),
    ('MIDCPNIFTY', 'index', 'NSE'),
    ('SENSEX', 'index', 'BSE');
"#;

const CREATE_SOURCES_TABLE: &str = r#"
CREATE TABLE sources (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    priority INTEGER NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    timeout_ms INTEGER NOT NULL DEFAULT 4000,
    min_spacing_ms INTEGER,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
INSERT INTO sources (name, priority, min_spacing_ms) VALUES
    ('zerodha', 1, 2000),
    ('nse', 2, NULL),
    ('synthetic', 99, NULL);
"#;

const CREATE_FEED_SETTINGS_TABLE: &str = r#"
CREATE TABLE feed_settings (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    ingest_interval_secs INTEGER NOT NULL DEFAULT 5,
    flush_interval_secs INTEGER NOT NULL DEFAULT 10,
    heartbeat_interval_secs INTEGER NOT NULL DEFAULT 30,
    breaker_max_failures INTEGER NOT NULL DEFAULT 5,
    breaker_reset_secs INTEGER NOT NULL DEFAULT 300,
    api_enabled INTEGER NOT NULL DEFAULT 1,
    api_host TEXT NOT NULL DEFAULT '127.0.0.1',
    api_port INTEGER NOT NULL DEFAULT 5100,
    api_rate_limit_per_minute INTEGER NOT NULL DEFAULT 600,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
INSERT INTO feed_settings (id) VALUES (1);
"#;
