//! Tracked symbol and source configuration
//!
//! Reference data only. The running pipeline caches the active list and only
//! re-reads it on an explicit reload.

use crate::error::{AppError, Result};
use crate::sources::types::{SourceDescriptor, Symbol, SymbolKind};
use rusqlite::{params, Connection, Row};

fn row_to_symbol(row: &Row<'_>) -> rusqlite::Result<Symbol> {
    let kind: String = row.get(1)?;
    let kind = kind.parse::<SymbolKind>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            Box::<dyn std::error::Error + Send + Sync>::from(e),
        )
    })?;

    Ok(Symbol {
        name: row.get(0)?,
        kind,
        exchange: row.get(2)?,
        active: row.get::<_, i32>(3)? == 1,
    })
}

/// Load active symbols
pub fn list_active_symbols(conn: &Connection) -> Result<Vec<Symbol>> {
    let mut stmt = conn.prepare(
        "SELECT name, kind, exchange, active FROM symbols WHERE active = 1 ORDER BY id",
    )?;

    let symbols = stmt
        .query_map([], row_to_symbol)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    tracing::debug!("Loaded {} active symbols from database", symbols.len());
    Ok(symbols)
}

/// Load every symbol, active or not
pub fn list_symbols(conn: &Connection) -> Result<Vec<Symbol>> {
    let mut stmt = conn.prepare("SELECT name, kind, exchange, active FROM symbols ORDER BY id")?;

    let symbols = stmt
        .query_map([], row_to_symbol)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(symbols)
}

/// Insert or update a symbol
pub fn upsert_symbol(conn: &Connection, symbol: &Symbol) -> Result<()> {
    conn.execute(
        "INSERT INTO symbols (name, kind, exchange, active) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(name) DO UPDATE SET kind = ?2, exchange = ?3, active = ?4",
        params![
            symbol.name,
            symbol.kind.as_str(),
            symbol.exchange,
            symbol.active as i32
        ],
    )?;
    Ok(())
}

/// Enable or disable a symbol
pub fn set_symbol_active(conn: &Connection, name: &str, active: bool) -> Result<()> {
    let updated = conn.execute(
        "UPDATE symbols SET active = ?1 WHERE name = ?2",
        params![active as i32, name],
    )?;
    if updated == 0 {
        return Err(AppError::NotFound(format!("Symbol not found: {}", name)));
    }
    Ok(())
}

/// Load the source chain, in priority order
pub fn list_sources(conn: &Connection) -> Result<Vec<SourceDescriptor>> {
    let mut stmt = conn.prepare(
        "SELECT name, priority, enabled, timeout_ms, min_spacing_ms
         FROM sources
         ORDER BY priority, name",
    )?;

    let sources = stmt
        .query_map([], |row| {
            Ok(SourceDescriptor {
                name: row.get(0)?,
                priority: row.get(1)?,
                enabled: row.get::<_, i32>(2)? == 1,
                timeout_ms: row.get::<_, i64>(3)? as u64,
                min_spacing_ms: row.get::<_, Option<i64>>(4)?.map(|ms| ms as u64),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(sources)
}

/// Insert or update a source descriptor
pub fn upsert_source(conn: &Connection, source: &SourceDescriptor) -> Result<()> {
    conn.execute(
        "INSERT INTO sources (name, priority, enabled, timeout_ms, min_spacing_ms)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(name) DO UPDATE SET
            priority = ?2, enabled = ?3, timeout_ms = ?4, min_spacing_ms = ?5,
            updated_at = datetime('now')",
        params![
            source.name,
            source.priority,
            source.enabled as i32,
            source.timeout_ms as i64,
            source.min_spacing_ms.map(|ms| ms as i64),
        ],
    )?;
    Ok(())
}
