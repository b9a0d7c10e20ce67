//! Context sources for the prompt builder: intake form data, patient
//! attributes, and the clinician's specialty.
//!
//! The primary lookup path is the denormalized `appointment_context_view`;
//! `get_context_row_fallback` issues the equivalent per-table queries and
//! yields the same shape, so the builder works even when the view is missing
//! (e.g. a partially migrated database).

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::DatabaseError;

/// Denormalized appointment context, one row per appointment.
#[derive(Debug, Clone, Default)]
pub struct ContextRow {
    pub appointment_id: String,
    pub consultation_id: String,
    pub patient_id: String,
    pub patient_name: String,
    pub date_of_birth: Option<String>,
    pub sex: Option<String>,
    pub smoking_status: Option<String>,
    pub alcohol_use: Option<String>,
    pub occupation: Option<String>,
    pub allergies: Option<String>,
    pub consultation_reason: Option<String>,
    pub clinician_name: Option<String>,
    pub clinician_specialty: Option<String>,
}

fn row_to_context(row: &Row<'_>) -> rusqlite::Result<ContextRow> {
    Ok(ContextRow {
        appointment_id: row.get(0)?,
        consultation_id: row.get(1)?,
        patient_id: row.get(2)?,
        patient_name: row.get(3)?,
        date_of_birth: row.get(4)?,
        sex: row.get(5)?,
        smoking_status: row.get(6)?,
        alcohol_use: row.get(7)?,
        occupation: row.get(8)?,
        allergies: row.get(9)?,
        consultation_reason: row.get(10)?,
        clinician_name: row.get(11)?,
        clinician_specialty: row.get(12)?,
    })
}

/// Primary path: single query against the denormalized view.
pub fn get_context_row_via_view(
    conn: &Connection,
    appointment_id: &str,
) -> Result<ContextRow, DatabaseError> {
    conn.query_row(
        "SELECT appointment_id, consultation_id, patient_id, patient_name,
                date_of_birth, sex, smoking_status, alcohol_use, occupation,
                allergies, consultation_reason, clinician_name, clinician_specialty
         FROM appointment_context_view WHERE appointment_id = ?1",
        params![appointment_id],
        |row| row_to_context(row),
    )
    .optional()?
    .ok_or_else(|| DatabaseError::NotFound {
        entity_type: "appointment_context".into(),
        id: appointment_id.to_string(),
    })
}

/// Fallback path: per-table lookups producing the identical shape.
pub fn get_context_row_fallback(
    conn: &Connection,
    appointment_id: &str,
) -> Result<ContextRow, DatabaseError> {
    let (consultation_id, patient_id): (String, String) = conn
        .query_row(
            "SELECT consultation_id, patient_id FROM appointments WHERE id = ?1",
            params![appointment_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?
        .ok_or_else(|| DatabaseError::NotFound {
            entity_type: "appointment".into(),
            id: appointment_id.to_string(),
        })?;

    let mut ctx = conn.query_row(
        "SELECT full_name, date_of_birth, sex, smoking_status, alcohol_use, occupation, allergies
         FROM patients WHERE id = ?1",
        params![patient_id],
        |row| {
            Ok(ContextRow {
                appointment_id: appointment_id.to_string(),
                consultation_id: consultation_id.clone(),
                patient_id: patient_id.clone(),
                patient_name: row.get(0)?,
                date_of_birth: row.get(1)?,
                sex: row.get(2)?,
                smoking_status: row.get(3)?,
                alcohol_use: row.get(4)?,
                occupation: row.get(5)?,
                allergies: row.get(6)?,
                ..ContextRow::default()
            })
        },
    )?;

    let clinician: Option<(Option<String>, Option<String>, Option<String>)> = conn
        .query_row(
            "SELECT c.reason, cl.full_name, cl.specialty
             FROM consultations c
             LEFT JOIN clinicians cl ON cl.id = c.clinician_id
             WHERE c.id = ?1",
            params![ctx.consultation_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    if let Some((reason, name, specialty)) = clinician {
        ctx.consultation_reason = reason;
        ctx.clinician_name = name;
        ctx.clinician_specialty = specialty;
    }

    Ok(ctx)
}

/// Submitted intake form data for the appointment, if any.
pub fn get_intake_form(
    conn: &Connection,
    appointment_id: &str,
) -> Result<Option<serde_json::Value>, DatabaseError> {
    let json: Option<String> = conn
        .query_row(
            "SELECT form_data FROM intake_forms
             WHERE appointment_id = ?1
             ORDER BY submitted_at DESC LIMIT 1",
            params![appointment_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(json.and_then(|j| serde_json::from_str(&j).ok()))
}

pub fn insert_intake_form(
    conn: &Connection,
    id: &str,
    appointment_id: &str,
    form_data: &serde_json::Value,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO intake_forms (id, appointment_id, form_data) VALUES (?1, ?2, ?3)",
        params![id, appointment_id, form_data.to_string()],
    )?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::repository::appointment::insert_appointment;
    use crate::db::sqlite::open_memory_database;

    /// Seed a patient + clinician + consultation + pending appointment.
    /// Ids: patient `pat-1`, clinician `cli-1`, consultation `cons-1`.
    pub(crate) fn seed_consultation(conn: &Connection, appointment_id: &str) {
        conn.execute(
            "INSERT OR IGNORE INTO patients
             (id, full_name, date_of_birth, sex, smoking_status, alcohol_use, occupation, allergies)
             VALUES ('pat-1', 'Marie Dubois', '1962-03-14', 'female',
                     'former smoker', 'occasional', 'teacher', 'penicillin')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO clinicians (id, full_name, specialty)
             VALUES ('cli-1', 'Dr. Chen', 'Cardiology')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO consultations (id, patient_id, clinician_id, reason)
             VALUES ('cons-1', 'pat-1', 'cli-1', 'chest pain on exertion')",
            [],
        )
        .unwrap();
        insert_appointment(conn, appointment_id, "cons-1", "pat-1").unwrap();
    }

    #[test]
    fn view_and_fallback_produce_equivalent_context() {
        let conn = open_memory_database().unwrap();
        seed_consultation(&conn, "apt-1");

        let via_view = get_context_row_via_view(&conn, "apt-1").unwrap();
        let fallback = get_context_row_fallback(&conn, "apt-1").unwrap();

        assert_eq!(via_view.patient_name, fallback.patient_name);
        assert_eq!(via_view.date_of_birth, fallback.date_of_birth);
        assert_eq!(via_view.allergies, fallback.allergies);
        assert_eq!(via_view.consultation_reason, fallback.consultation_reason);
        assert_eq!(via_view.clinician_specialty, fallback.clinician_specialty);
        assert_eq!(via_view.clinician_specialty.as_deref(), Some("Cardiology"));
    }

    #[test]
    fn fallback_handles_missing_clinician() {
        let conn = open_memory_database().unwrap();
        conn.execute(
            "INSERT INTO patients (id, full_name) VALUES ('pat-2', 'Jean Petit')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO consultations (id, patient_id, clinician_id) VALUES ('cons-2', 'pat-2', NULL)",
            [],
        )
        .unwrap();
        insert_appointment(&conn, "apt-2", "cons-2", "pat-2").unwrap();

        let ctx = get_context_row_fallback(&conn, "apt-2").unwrap();
        assert_eq!(ctx.patient_name, "Jean Petit");
        assert!(ctx.clinician_specialty.is_none());
    }

    #[test]
    fn intake_form_roundtrip_latest_wins() {
        let conn = open_memory_database().unwrap();
        seed_consultation(&conn, "apt-1");

        assert!(get_intake_form(&conn, "apt-1").unwrap().is_none());

        insert_intake_form(&conn, "form-1", "apt-1", &serde_json::json!({"v": 1})).unwrap();
        conn.execute(
            "UPDATE intake_forms SET submitted_at = '2020-01-01T00:00:00Z' WHERE id = 'form-1'",
            [],
        )
        .unwrap();
        insert_intake_form(&conn, "form-2", "apt-1", &serde_json::json!({"v": 2})).unwrap();

        let form = get_intake_form(&conn, "apt-1").unwrap().unwrap();
        assert_eq!(form["v"], 2);
    }

    #[test]
    fn missing_appointment_is_not_found() {
        let conn = open_memory_database().unwrap();
        assert!(matches!(
            get_context_row_via_view(&conn, "ghost"),
            Err(DatabaseError::NotFound { .. })
        ));
        assert!(matches!(
            get_context_row_fallback(&conn, "ghost"),
            Err(DatabaseError::NotFound { .. })
        ));
    }
}
