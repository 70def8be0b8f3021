// 🗄️ Persistence - SQLite storage for movements, statement entries and Recos
//
// Amounts are stored as TEXT so decimals survive exactly; timestamps as
// RFC 3339. Every change made by a matching run is written by save_book in a
// single transaction together with its audit event.

use crate::book::RecoBook;
use crate::models::{AccountEntry, FileMovement, Movement, Reco, RecoType};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::info;

/// Event for the audit trail
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // File movements (movement columns + projection onto the reco file)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS movements (
            id INTEGER PRIMARY KEY,
            transfer_id TEXT NOT NULL,
            owner_id TEXT NOT NULL,
            number INTEGER NOT NULL,
            amount_index INTEGER NOT NULL,
            loop_id TEXT NOT NULL,
            currency TEXT NOT NULL,
            issuer_id TEXT NOT NULL,
            peer_id TEXT NOT NULL,
            ts TEXT NOT NULL,
            action TEXT NOT NULL,
            period_id INTEGER NOT NULL,
            wallet_delta TEXT NOT NULL,
            vault_delta TEXT NOT NULL,
            reco_id INTEGER,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Statement lines
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS account_entries (
            id INTEGER PRIMARY KEY,
            statement_id INTEGER NOT NULL,
            period_id INTEGER NOT NULL,
            entry_date TEXT NOT NULL,
            delta TEXT NOT NULL,
            description TEXT NOT NULL,
            currency TEXT NOT NULL,
            loop_id TEXT NOT NULL,
            peer_id TEXT NOT NULL,
            reco_id INTEGER,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS recos (
            id INTEGER PRIMARY KEY,
            reco_type TEXT NOT NULL,
            internal INTEGER NOT NULL,
            period_id INTEGER NOT NULL,
            comment TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_movements_transfer ON movements(transfer_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_movements_period ON movements(period_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_movements_reco ON movements(reco_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_entries_statement ON account_entries(statement_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_entries_reco ON account_entries(reco_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// INSERTS (idempotent on primary key)
// ============================================================================

fn is_duplicate(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

pub fn insert_movements(conn: &Connection, movements: &[FileMovement]) -> Result<usize> {
    let mut inserted = 0;
    let mut duplicates = 0;

    for fm in movements {
        let m = &fm.movement;
        let result = conn.execute(
            "INSERT INTO movements (
                id, transfer_id, owner_id, number, amount_index, loop_id, currency,
                issuer_id, peer_id, ts, action, period_id, wallet_delta, vault_delta, reco_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                m.id,
                m.transfer_id,
                m.owner_id,
                m.number,
                m.amount_index,
                m.loop_id,
                m.currency,
                m.issuer_id,
                m.peer_id,
                m.ts.to_rfc3339(),
                m.action,
                fm.period_id,
                fm.wallet_delta.to_string(),
                fm.vault_delta.to_string(),
                fm.reco_id,
            ],
        );

        match result {
            Ok(_) => inserted += 1,
            Err(e) if is_duplicate(&e) => duplicates += 1,
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to insert movement {}", m.id))
            }
        }
    }

    info!(inserted, duplicates, "Inserted movements");
    Ok(inserted)
}

pub fn insert_account_entries(conn: &Connection, entries: &[AccountEntry]) -> Result<usize> {
    let mut inserted = 0;
    let mut duplicates = 0;

    for entry in entries {
        let result = conn.execute(
            "INSERT INTO account_entries (
                id, statement_id, period_id, entry_date, delta, description,
                currency, loop_id, peer_id, reco_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                entry.id,
                entry.statement_id,
                entry.period_id,
                entry.entry_date.to_string(),
                entry.delta.to_string(),
                entry.description,
                entry.currency,
                entry.loop_id,
                entry.peer_id,
                entry.reco_id,
            ],
        );

        match result {
            Ok(_) => inserted += 1,
            Err(e) if is_duplicate(&e) => duplicates += 1,
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to insert account entry {}", entry.id))
            }
        }
    }

    info!(inserted, duplicates, "Inserted account entries");
    Ok(inserted)
}

// ============================================================================
// ROW DECODING
// ============================================================================

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn decimal_at(row: &Row, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    Decimal::from_str(&text).map_err(|e| conversion_error(idx, e))
}

fn timestamp_at(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn date_at(row: &Row, idx: usize) -> rusqlite::Result<NaiveDate> {
    let text: String = row.get(idx)?;
    NaiveDate::from_str(&text).map_err(|e| conversion_error(idx, e))
}

fn reco_type_at(row: &Row, idx: usize) -> rusqlite::Result<RecoType> {
    let text: String = row.get(idx)?;
    RecoType::parse(&text).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown reco type: {}", text).into(),
        )
    })
}

// ============================================================================
// LOADING
// ============================================================================

pub fn get_all_movements(conn: &Connection) -> Result<Vec<FileMovement>> {
    let mut stmt = conn.prepare(
        "SELECT id, transfer_id, owner_id, number, amount_index, loop_id, currency,
                issuer_id, peer_id, ts, action, period_id, wallet_delta, vault_delta, reco_id
         FROM movements
         ORDER BY id",
    )?;

    let movements = stmt
        .query_map([], |row| {
            Ok(FileMovement {
                movement: Movement {
                    id: row.get(0)?,
                    transfer_id: row.get(1)?,
                    owner_id: row.get(2)?,
                    number: row.get(3)?,
                    amount_index: row.get(4)?,
                    loop_id: row.get(5)?,
                    currency: row.get(6)?,
                    issuer_id: row.get(7)?,
                    peer_id: row.get(8)?,
                    ts: timestamp_at(row, 9)?,
                    action: row.get(10)?,
                },
                period_id: row.get(11)?,
                wallet_delta: decimal_at(row, 12)?,
                vault_delta: decimal_at(row, 13)?,
                reco_id: row.get(14)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to read movements")?;

    Ok(movements)
}

pub fn get_all_account_entries(conn: &Connection) -> Result<Vec<AccountEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, statement_id, period_id, entry_date, delta, description,
                currency, loop_id, peer_id, reco_id
         FROM account_entries
         ORDER BY id",
    )?;

    let entries = stmt
        .query_map([], |row| {
            Ok(AccountEntry {
                id: row.get(0)?,
                statement_id: row.get(1)?,
                period_id: row.get(2)?,
                entry_date: date_at(row, 3)?,
                delta: decimal_at(row, 4)?,
                description: row.get(5)?,
                currency: row.get(6)?,
                loop_id: row.get(7)?,
                peer_id: row.get(8)?,
                reco_id: row.get(9)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to read account entries")?;

    Ok(entries)
}

pub fn get_all_recos(conn: &Connection) -> Result<Vec<Reco>> {
    let mut stmt = conn.prepare(
        "SELECT id, reco_type, internal, period_id, comment, created_at
         FROM recos
         ORDER BY id",
    )?;

    let recos = stmt
        .query_map([], |row| {
            Ok(Reco {
                id: row.get(0)?,
                reco_type: reco_type_at(row, 1)?,
                internal: row.get(2)?,
                period_id: row.get(3)?,
                comment: row.get(4)?,
                created_at: timestamp_at(row, 5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to read recos")?;

    Ok(recos)
}

pub fn load_book(conn: &Connection) -> Result<RecoBook> {
    let movements = get_all_movements(conn)?;
    let entries = get_all_account_entries(conn)?;
    let recos = get_all_recos(conn)?;

    Ok(RecoBook::from_parts(movements, entries, recos))
}

// ============================================================================
// SAVING
// ============================================================================

/// Write every Reco plus every movement/entry reco and period reference,
/// and the audit event if given. All of it commits or none of it does.
pub fn save_book(conn: &mut Connection, book: &RecoBook, event: Option<&Event>) -> Result<()> {
    let tx = conn.transaction()?;

    {
        let mut upsert_reco = tx.prepare(
            "INSERT INTO recos (id, reco_type, internal, period_id, comment, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                reco_type = excluded.reco_type,
                internal = excluded.internal,
                period_id = excluded.period_id,
                comment = excluded.comment",
        )?;
        for reco in book.recos() {
            upsert_reco.execute(params![
                reco.id,
                reco.reco_type.as_str(),
                reco.internal,
                reco.period_id,
                reco.comment,
                reco.created_at.to_rfc3339(),
            ])?;
        }

        let mut update_movement =
            tx.prepare("UPDATE movements SET period_id = ?1, reco_id = ?2 WHERE id = ?3")?;
        for fm in book.movements() {
            update_movement.execute(params![fm.period_id, fm.reco_id, fm.id()])?;
        }

        let mut update_entry =
            tx.prepare("UPDATE account_entries SET period_id = ?1, reco_id = ?2 WHERE id = ?3")?;
        for entry in book.entries() {
            update_entry.execute(params![entry.period_id, entry.reco_id, entry.id])?;
        }
    }

    if let Some(event) = event {
        insert_event(&tx, event)?;
    }

    tx.commit().context("Failed to commit reco book")?;
    Ok(())
}

// ============================================================================
// AUDIT TRAIL
// ============================================================================

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )
    .with_context(|| format!("Failed to record event {}", event.event_id))?;

    Ok(())
}

/// Get events for a specific entity
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: timestamp_at(row, 1)?,
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json).map_err(|e| conversion_error(5, e))?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}
