//! Patient file rows: upload metadata, extraction results, and the batch
//! completion gate.
//!
//! Files reach exactly one terminal state (`processed = 1`, with either
//! parsed text or an error note) and are never reset, which is what makes
//! `all_processed` monotone and the extraction batch idempotent.

use rusqlite::{params, Connection};

use crate::db::DatabaseError;

#[derive(Debug, Clone)]
pub struct PatientFile {
    pub id: String,
    pub appointment_id: Option<String>,
    pub consultation_id: Option<String>,
    pub file_name: String,
    pub storage_path: String,
    pub size_bytes: u64,
    pub mime_type: Option<String>,
    pub parsed_text: Option<String>,
    pub processed: bool,
    pub processing_error: Option<String>,
}

pub fn insert_patient_file(
    conn: &Connection,
    file: &PatientFile,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO patient_files
         (id, appointment_id, consultation_id, file_name, storage_path,
          size_bytes, mime_type, parsed_text, processed, processing_error)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            file.id,
            file.appointment_id,
            file.consultation_id,
            file.file_name,
            file.storage_path,
            file.size_bytes as i64,
            file.mime_type,
            file.parsed_text,
            file.processed,
            file.processing_error,
        ],
    )?;
    Ok(())
}

/// All files for the appointment that have not reached a terminal state.
/// Duplicate batch invocations see an empty list here and do nothing.
pub fn get_unprocessed_files(
    conn: &Connection,
    appointment_id: &str,
) -> Result<Vec<PatientFile>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, appointment_id, consultation_id, file_name, storage_path,
                size_bytes, mime_type, parsed_text, processed, processing_error
         FROM patient_files
         WHERE appointment_id = ?1 AND processed != 1
         ORDER BY created_at ASC, id ASC",
    )?;

    let rows = stmt.query_map(params![appointment_id], |row| {
        Ok(PatientFile {
            id: row.get(0)?,
            appointment_id: row.get(1)?,
            consultation_id: row.get(2)?,
            file_name: row.get(3)?,
            storage_path: row.get(4)?,
            size_bytes: row.get::<_, i64>(5)? as u64,
            mime_type: row.get(6)?,
            parsed_text: row.get(7)?,
            processed: row.get(8)?,
            processing_error: row.get(9)?,
        })
    })?;

    let mut files = Vec::new();
    for row in rows {
        files.push(row?);
    }
    Ok(files)
}

/// Record a successful extraction. Terminal; the row is never touched again.
pub fn mark_file_processed(
    conn: &Connection,
    file_id: &str,
    parsed_text: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE patient_files
         SET parsed_text = ?2, processed = 1, processing_error = NULL
         WHERE id = ?1 AND processed != 1",
        params![file_id, parsed_text],
    )?;
    Ok(())
}

/// Record a failed extraction. Still terminal: the file counts toward batch
/// completeness with a failure outcome instead of blocking it forever.
pub fn mark_file_failed(
    conn: &Connection,
    file_id: &str,
    error: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE patient_files
         SET parsed_text = '', processed = 1, processing_error = ?2
         WHERE id = ?1 AND processed != 1",
        params![file_id, error],
    )?;
    Ok(())
}

/// Batch completion gate: every file linked to the appointment has reached a
/// terminal state. Zero files is vacuously complete.
pub fn all_processed(conn: &Connection, appointment_id: &str) -> Result<bool, DatabaseError> {
    let (total, processed): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(processed), 0)
         FROM patient_files WHERE appointment_id = ?1",
        params![appointment_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(total == processed)
}

/// Extracted text of successfully processed files, oldest first, for the
/// context builder. Failed files (empty text) are skipped.
pub fn get_parsed_texts(
    conn: &Connection,
    appointment_id: &str,
) -> Result<Vec<(String, String)>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT file_name, parsed_text FROM patient_files
         WHERE appointment_id = ?1 AND processed = 1
           AND parsed_text IS NOT NULL AND parsed_text != ''
         ORDER BY created_at ASC, id ASC",
    )?;
    let rows = stmt.query_map(params![appointment_id], |row| {
        Ok((row.get(0)?, row.get(1)?))
    })?;

    let mut texts = Vec::new();
    for row in rows {
        texts.push(row?);
    }
    Ok(texts)
}
