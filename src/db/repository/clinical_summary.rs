//! Clinical summary rows.
//!
//! The write order is the contract: the verbatim model response is inserted
//! first (`processing_status='parsing'`), and only then is parsing attempted.
//! A parse failure flips the row to 'failed' but never loses `raw_output`.
//! Re-runs insert a fresh row instead of updating an old one.

use rusqlite::{params, Connection, OptionalExtension};

use super::now_utc;
use crate::db::DatabaseError;

#[derive(Debug, Clone)]
pub struct ClinicalSummary {
    pub id: String,
    pub consultation_id: String,
    pub patient_id: String,
    pub raw_output: String,
    pub summary_json: serde_json::Value,
    pub processing_status: String,
    pub completed_at: Option<String>,
}

/// Persist the verbatim AI response before any parsing happens.
pub fn insert_raw_summary(
    conn: &Connection,
    id: &str,
    consultation_id: &str,
    patient_id: &str,
    raw_output: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO clinical_summaries
         (id, consultation_id, patient_id, raw_output, summary_json, processing_status)
         VALUES (?1, ?2, ?3, ?4, '{}', 'parsing')",
        params![id, consultation_id, patient_id, raw_output],
    )?;
    Ok(())
}

/// Finalize a summary with its sanitized structured result.
pub fn complete_summary(
    conn: &Connection,
    id: &str,
    summary_json: &serde_json::Value,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE clinical_summaries
         SET summary_json = ?2, processing_status = 'completed', completed_at = ?3
         WHERE id = ?1 AND processing_status = 'parsing'",
        params![id, summary_json.to_string(), now_utc()],
    )?;
    Ok(())
}

/// Mark a summary failed. `raw_output` and `summary_json` are left untouched
/// so the run stays inspectable.
pub fn fail_summary(conn: &Connection, id: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE clinical_summaries
         SET processing_status = 'failed'
         WHERE id = ?1 AND processing_status = 'parsing'",
        params![id],
    )?;
    Ok(())
}

pub fn get_summary(conn: &Connection, id: &str) -> Result<ClinicalSummary, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, consultation_id, patient_id, raw_output, summary_json,
                    processing_status, completed_at
             FROM clinical_summaries WHERE id = ?1",
            params![id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            },
        )
        .optional()?
        .ok_or_else(|| DatabaseError::NotFound {
            entity_type: "clinical_summary".into(),
            id: id.to_string(),
        })?;

    Ok(ClinicalSummary {
        id: row.0,
        consultation_id: row.1,
        patient_id: row.2,
        raw_output: row.3,
        summary_json: serde_json::from_str(&row.4).unwrap_or(serde_json::Value::Null),
        processing_status: row.5,
        completed_at: row.6,
    })
}

/// Most recent completed summary for a consultation, if any; fed back into
/// the prompt context on re-runs.
pub fn latest_completed_summary(
    conn: &Connection,
    consultation_id: &str,
) -> Result<Option<serde_json::Value>, DatabaseError> {
    let json: Option<String> = conn
        .query_row(
            "SELECT summary_json FROM clinical_summaries
             WHERE consultation_id = ?1 AND processing_status = 'completed'
             ORDER BY created_at DESC, id DESC
             LIMIT 1",
            params![consultation_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(json.and_then(|j| serde_json::from_str(&j).ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::intake::tests::seed_consultation;
    use crate::db::sqlite::open_memory_database;

    #[test]
    fn raw_output_is_stored_before_any_result() {
        let conn = open_memory_database().unwrap();
        seed_consultation(&conn, "apt-1");

        insert_raw_summary(&conn, "sum-1", "cons-1", "pat-1", "{\"chief_complaint\": ...}")
            .unwrap();

        let summary = get_summary(&conn, "sum-1").unwrap();
        assert_eq!(summary.processing_status, "parsing");
        assert!(!summary.raw_output.is_empty());
        assert_eq!(summary.summary_json, serde_json::json!({}));
    }

    #[test]
    fn complete_sets_json_and_timestamp() {
        let conn = open_memory_database().unwrap();
        seed_consultation(&conn, "apt-1");
        insert_raw_summary(&conn, "sum-1", "cons-1", "pat-1", "raw").unwrap();

        let json = serde_json::json!({"chief_complaint": "chest pain"});
        complete_summary(&conn, "sum-1", &json).unwrap();

        let summary = get_summary(&conn, "sum-1").unwrap();
        assert_eq!(summary.processing_status, "completed");
        assert_eq!(summary.summary_json["chief_complaint"], "chest pain");
        assert!(summary.completed_at.is_some());
    }

    #[test]
    fn fail_preserves_raw_output() {
        let conn = open_memory_database().unwrap();
        seed_consultation(&conn, "apt-1");
        insert_raw_summary(&conn, "sum-1", "cons-1", "pat-1", "not json at all").unwrap();

        fail_summary(&conn, "sum-1").unwrap();

        let summary = get_summary(&conn, "sum-1").unwrap();
        assert_eq!(summary.processing_status, "failed");
        assert_eq!(summary.raw_output, "not json at all");
    }

    #[test]
    fn finalization_is_single_shot() {
        let conn = open_memory_database().unwrap();
        seed_consultation(&conn, "apt-1");
        insert_raw_summary(&conn, "sum-1", "cons-1", "pat-1", "raw").unwrap();
        complete_summary(&conn, "sum-1", &serde_json::json!({"v": 1})).unwrap();

        // Neither a second completion nor a late failure rewrites the row.
        complete_summary(&conn, "sum-1", &serde_json::json!({"v": 2})).unwrap();
        fail_summary(&conn, "sum-1").unwrap();

        let summary = get_summary(&conn, "sum-1").unwrap();
        assert_eq!(summary.processing_status, "completed");
        assert_eq!(summary.summary_json["v"], 1);
    }

    #[test]
    fn latest_completed_skips_failed_rows() {
        let conn = open_memory_database().unwrap();
        seed_consultation(&conn, "apt-1");

        insert_raw_summary(&conn, "sum-1", "cons-1", "pat-1", "raw1").unwrap();
        complete_summary(&conn, "sum-1", &serde_json::json!({"run": 1})).unwrap();
        insert_raw_summary(&conn, "sum-2", "cons-1", "pat-1", "raw2").unwrap();
        fail_summary(&conn, "sum-2").unwrap();

        let latest = latest_completed_summary(&conn, "cons-1").unwrap().unwrap();
        assert_eq!(latest["run"], 1);
    }

    #[test]
    fn latest_completed_none_when_no_runs() {
        let conn = open_memory_database().unwrap();
        seed_consultation(&conn, "apt-1");
        assert!(latest_completed_summary(&conn, "cons-1").unwrap().is_none());
    }
}
