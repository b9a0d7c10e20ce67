//! Appointment rows and the lease predicate.
//!
//! The conditional UPDATEs here are the only writers of `processing_status`;
//! everything above them (pipeline::lock) just decides what to ask for. Both
//! take the caller's expectation in the WHERE clause, so a lost race shows up
//! as an affected-row count of zero rather than a silent overwrite.

use rusqlite::{params, Connection, OptionalExtension};

use super::now_utc;
use crate::db::DatabaseError;
use crate::pipeline::status::ProcessingStatus;

#[derive(Debug, Clone)]
pub struct Appointment {
    pub id: String,
    pub consultation_id: String,
    pub patient_id: String,
    pub processing_status: ProcessingStatus,
    pub processing_instance_id: Option<String>,
    pub processing_started_at: Option<String>,
    pub error_message: Option<String>,
}

pub fn insert_appointment(
    conn: &Connection,
    id: &str,
    consultation_id: &str,
    patient_id: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO appointments (id, consultation_id, patient_id, processing_status)
         VALUES (?1, ?2, ?3, 'pending')",
        params![id, consultation_id, patient_id],
    )?;
    Ok(())
}

pub fn get_appointment(conn: &Connection, id: &str) -> Result<Appointment, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, consultation_id, patient_id, processing_status,
                    processing_instance_id, processing_started_at, error_message
             FROM appointments WHERE id = ?1",
            params![id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            },
        )
        .optional()?
        .ok_or_else(|| DatabaseError::NotFound {
            entity_type: "appointment".into(),
            id: id.to_string(),
        })?;

    let status = ProcessingStatus::from_str(&row.3).ok_or_else(|| DatabaseError::InvalidEnum {
        field: "processing_status".into(),
        value: row.3.clone(),
    })?;

    Ok(Appointment {
        id: row.0,
        consultation_id: row.1,
        patient_id: row.2,
        processing_status: status,
        processing_instance_id: row.4,
        processing_started_at: row.5,
        error_message: row.6,
    })
}

/// Atomically claim the processing lease.
///
/// Succeeds when the row sits at `eligible_from`, or at `processing` with a
/// lease older than `stale_cutoff` (reclaim of a dead worker). Returns whether
/// this caller's instance now holds the lease. A single UPDATE keeps the
/// read-check-write race between concurrent triggers impossible.
pub fn try_acquire_lease(
    conn: &Connection,
    appointment_id: &str,
    instance_id: &str,
    eligible_from: ProcessingStatus,
    stale_cutoff: &str,
) -> Result<bool, DatabaseError> {
    let affected = conn.execute(
        "UPDATE appointments
         SET processing_status = 'processing',
             processing_instance_id = ?2,
             processing_started_at = ?3,
             error_message = NULL
         WHERE id = ?1
           AND (processing_status = ?4
                OR (processing_status = 'processing'
                    AND processing_started_at IS NOT NULL
                    AND processing_started_at < ?5))",
        params![
            appointment_id,
            instance_id,
            now_utc(),
            eligible_from.as_str(),
            stale_cutoff
        ],
    )?;
    Ok(affected == 1)
}

/// Release the lease, setting the final status and clearing the token.
///
/// Conditional on the caller's instance id still holding the lease: if the
/// lease was reclaimed in the meantime, the reclaiming worker owns the row
/// and this returns false without touching it.
pub fn release_lease(
    conn: &Connection,
    appointment_id: &str,
    instance_id: &str,
    final_status: ProcessingStatus,
    error_message: Option<&str>,
) -> Result<bool, DatabaseError> {
    let affected = conn.execute(
        "UPDATE appointments
         SET processing_status = ?3,
             processing_instance_id = NULL,
             processing_started_at = NULL,
             error_message = ?4
         WHERE id = ?1 AND processing_instance_id = ?2",
        params![
            appointment_id,
            instance_id,
            final_status.as_str(),
            error_message
        ],
    )?;
    Ok(affected == 1)
}

/// Reset a failed appointment to `pending` for a manual retry.
pub fn reset_for_retry(conn: &Connection, appointment_id: &str) -> Result<bool, DatabaseError> {
    let affected = conn.execute(
        "UPDATE appointments
         SET processing_status = 'pending',
             processing_instance_id = NULL,
             processing_started_at = NULL,
             error_message = NULL
         WHERE id = ?1 AND processing_status = 'failed'",
        params![appointment_id],
    )?;
    Ok(affected == 1)
}
