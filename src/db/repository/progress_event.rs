//! Append-only progress event log, read by the UI while a run is in flight.

use rusqlite::{params, Connection};

use crate::db::DatabaseError;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub id: i64,
    pub appointment_id: String,
    pub stage: String,
    pub step_index: u32,
    pub step_key: String,
    pub status: String,
    pub message: Option<String>,
    pub progress_percent: u8,
    pub meta: Option<serde_json::Value>,
    pub created_at: String,
}

/// Row contents for a new event. Canonicalization of `status` and clamping of
/// `progress_percent` happen upstream in the emitter; this layer just inserts.
pub struct NewProgressEvent<'a> {
    pub appointment_id: &'a str,
    pub stage: &'a str,
    pub step_index: u32,
    pub step_key: &'a str,
    pub status: &'a str,
    pub message: Option<&'a str>,
    pub progress_percent: u8,
    pub meta: Option<&'a serde_json::Value>,
}

pub fn insert_progress_event(
    conn: &Connection,
    event: &NewProgressEvent<'_>,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO progress_events
         (appointment_id, stage, step_index, step_key, status, message, progress_percent, meta)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            event.appointment_id,
            event.stage,
            event.step_index,
            event.step_key,
            event.status,
            event.message,
            event.progress_percent,
            event.meta.map(|m| m.to_string()),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// All events for an appointment in insertion order.
pub fn list_progress_events(
    conn: &Connection,
    appointment_id: &str,
) -> Result<Vec<ProgressEvent>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, appointment_id, stage, step_index, step_key, status,
                message, progress_percent, meta, created_at
         FROM progress_events
         WHERE appointment_id = ?1
         ORDER BY id ASC",
    )?;

    let rows = stmt.query_map(params![appointment_id], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, u32>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, Option<String>>(6)?,
            row.get::<_, u8>(7)?,
            row.get::<_, Option<String>>(8)?,
            row.get::<_, String>(9)?,
        ))
    })?;

    let mut events = Vec::new();
    for row in rows {
        let row = row?;
        events.push(ProgressEvent {
            id: row.0,
            appointment_id: row.1,
            stage: row.2,
            step_index: row.3,
            step_key: row.4,
            status: row.5,
            message: row.6,
            progress_percent: row.7,
            meta: row.8.and_then(|m| serde_json::from_str(&m).ok()),
            created_at: row.9,
        });
    }
    Ok(events)
}
