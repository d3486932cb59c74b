//! Live snapshot persistence
//!
//! Rows are keyed by `(symbol, timestamp_ms)` and written with
//! `INSERT OR REPLACE`, so replaying a flush is harmless.

use crate::error::Result;
use crate::sources::types::LiveSnapshot;
use chrono::DateTime;
use rusqlite::{params, Connection, Row};

const INSERT_SQL: &str = "INSERT OR REPLACE INTO live_snapshots
    (symbol, price, volume, open_interest, change, change_percent, high, low, source, sequence, timestamp_ms)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)";

fn insert_with(stmt: &mut rusqlite::Statement<'_>, s: &LiveSnapshot) -> rusqlite::Result<usize> {
    stmt.execute(params![
        s.symbol,
        s.price,
        s.volume,
        s.open_interest,
        s.change,
        s.change_percent,
        s.high,
        s.low,
        s.source,
        s.sequence as i64,
        s.timestamp.timestamp_millis(),
    ])
}

/// Insert a single snapshot
pub fn insert_snapshot(conn: &Connection, snapshot: &LiveSnapshot) -> Result<()> {
    let mut stmt = conn.prepare_cached(INSERT_SQL)?;
    insert_with(&mut stmt, snapshot)?;
    Ok(())
}

/// Insert a batch in one transaction; nothing is written if any row fails
pub fn insert_snapshots(conn: &mut Connection, snapshots: &[LiveSnapshot]) -> Result<()> {
    let tx = conn.transaction()?;

    {
        let mut stmt = tx.prepare_cached(INSERT_SQL)?;
        for snapshot in snapshots {
            insert_with(&mut stmt, snapshot)?;
        }
    }

    tx.commit()?;
    tracing::debug!("Stored {} live snapshots", snapshots.len());
    Ok(())
}

fn row_to_snapshot(row: &Row<'_>) -> rusqlite::Result<LiveSnapshot> {
    let timestamp_ms: i64 = row.get(10)?;
    let timestamp = DateTime::from_timestamp_millis(timestamp_ms).ok_or_else(|| {
        rusqlite::Error::IntegralValueOutOfRange(10, timestamp_ms)
    })?;

    Ok(LiveSnapshot {
        symbol: row.get(0)?,
        price: row.get(1)?,
        volume: row.get(2)?,
        open_interest: row.get(3)?,
        change: row.get(4)?,
        change_percent: row.get(5)?,
        high: row.get(6)?,
        low: row.get(7)?,
        source: row.get(8)?,
        sequence: row.get::<_, i64>(9)? as u64,
        timestamp,
    })
}

/// Most recent snapshots for a symbol, newest first
pub fn recent_snapshots(conn: &Connection, symbol: &str, limit: usize) -> Result<Vec<LiveSnapshot>> {
    let mut stmt = conn.prepare(
        "SELECT symbol, price, volume, open_interest, change, change_percent, high, low, source, sequence, timestamp_ms
         FROM live_snapshots
         WHERE symbol = ?1
         ORDER BY timestamp_ms DESC
         LIMIT ?2",
    )?;

    let snapshots = stmt
        .query_map(params![symbol, limit as i64], row_to_snapshot)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(snapshots)
}

/// Stored snapshot count for a symbol
pub fn count_snapshots(conn: &Connection, symbol: &str) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM live_snapshots WHERE symbol = ?1",
        [symbol],
        |row| row.get(0),
    )?;
    Ok(count)
}
