//! Feed settings management

use crate::db::sqlite::models::FeedSettings;
use crate::error::{AppError, Result};
use rusqlite::{params, Connection};

/// Get feed settings
pub fn get_feed_settings(conn: &Connection) -> Result<FeedSettings> {
    let settings = conn.query_row(
        "SELECT ingest_interval_secs, flush_interval_secs, heartbeat_interval_secs,
                breaker_max_failures, breaker_reset_secs,
                api_enabled, api_host, api_port, api_rate_limit_per_minute
         FROM feed_settings WHERE id = 1",
        [],
        |row| {
            Ok(FeedSettings {
                ingest_interval_secs: row.get::<_, i64>(0)? as u64,
                flush_interval_secs: row.get::<_, i64>(1)? as u64,
                heartbeat_interval_secs: row.get::<_, i64>(2)? as u64,
                breaker_max_failures: row.get(3)?,
                breaker_reset_secs: row.get::<_, i64>(4)? as u64,
                api_enabled: row.get::<_, i32>(5)? == 1,
                api_host: row.get(6)?,
                api_port: row.get(7)?,
                api_rate_limit_per_minute: row.get(8)?,
            })
        },
    )?;

    Ok(settings)
}

/// Replace feed settings
pub fn update_feed_settings(conn: &Connection, settings: &FeedSettings) -> Result<FeedSettings> {
    if settings.ingest_interval_secs == 0 || settings.flush_interval_secs == 0 {
        return Err(AppError::Validation(
            "Ingest and flush intervals must be at least one second".to_string(),
        ));
    }

    conn.execute(
        "UPDATE feed_settings SET
            ingest_interval_secs = ?1,
            flush_interval_secs = ?2,
            heartbeat_interval_secs = ?3,
            breaker_max_failures = ?4,
            breaker_reset_secs = ?5,
            api_enabled = ?6,
            api_host = ?7,
            api_port = ?8,
            api_rate_limit_per_minute = ?9,
            updated_at = datetime('now')
         WHERE id = 1",
        params![
            settings.ingest_interval_secs as i64,
            settings.flush_interval_secs as i64,
            settings.heartbeat_interval_secs as i64,
            settings.breaker_max_failures,
            settings.breaker_reset_secs as i64,
            settings.api_enabled as i32,
            settings.api_host,
            settings.api_port,
            settings.api_rate_limit_per_minute,
        ],
    )?;

    get_feed_settings(conn)
}
