//! Per-appointment processing lease.
//!
//! Multiple independent trigger sources race on the same appointment (initial
//! creation, file-link updates, manual retry, duplicate webhook deliveries).
//! The lease is one conditional UPDATE on the appointment row: whoever
//! flips `eligible_from → processing` with their instance id owns the run.
//! Losing the race is a normal outcome, reported as `Acquire::Busy` and
//! answered upstream with "already being handled", never as an error.
//!
//! A lease left behind by a dead worker is reclaimed by any later trigger
//! once `processing_started_at` is older than the configured timeout; there
//! is no active pre-emption.

use chrono::{Duration, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use crate::db::repository::{release_lease, try_acquire_lease};
use crate::db::DatabaseError;
use crate::pipeline::status::{can_transition, ProcessingStatus};

/// Outcome of an acquire attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquire {
    /// This caller now holds the lease under the contained instance id.
    Held(String),
    /// Another live instance holds it, or the row is not in an eligible state.
    Busy,
}

/// Mint an instance id for one pipeline invocation.
pub fn new_instance_id() -> String {
    Uuid::new_v4().to_string()
}

/// Try to take the processing lease for one stage of the pipeline.
///
/// `eligible_from` is the status the stage expects to start from: `Pending`
/// for file extraction, `FilesProcessed` for summary generation. Stale
/// `processing` leases older than `lock_timeout_minutes` are reclaimable
/// from either stage.
pub fn acquire(
    conn: &Connection,
    appointment_id: &str,
    instance_id: &str,
    eligible_from: ProcessingStatus,
    lock_timeout_minutes: i64,
) -> Result<Acquire, DatabaseError> {
    if !can_transition(eligible_from, ProcessingStatus::Processing) {
        tracing::error!(
            appointment_id,
            from = eligible_from.as_str(),
            "Refusing lease acquire: illegal status transition"
        );
        return Ok(Acquire::Busy);
    }

    let stale_cutoff = (Utc::now() - Duration::minutes(lock_timeout_minutes))
        .format("%Y-%m-%dT%H:%M:%S%.6fZ")
        .to_string();

    if try_acquire_lease(conn, appointment_id, instance_id, eligible_from, &stale_cutoff)? {
        tracing::info!(
            appointment_id,
            instance_id,
            from = eligible_from.as_str(),
            "Processing lease acquired"
        );
        Ok(Acquire::Held(instance_id.to_string()))
    } else {
        tracing::info!(
            appointment_id,
            from = eligible_from.as_str(),
            "Processing lease not acquired (held elsewhere or ineligible state)"
        );
        Ok(Acquire::Busy)
    }
}

/// Release the lease with a final status. Best-effort: attempted on every
/// exit path, and a failure here is logged but never escalated; a lost
/// lease expires through the timeout anyway.
pub fn release(
    conn: &Connection,
    appointment_id: &str,
    instance_id: &str,
    final_status: ProcessingStatus,
    error_message: Option<&str>,
) {
    // A held lease means the row sits at `processing`; anything the state
    // machine cannot reach from there is a caller bug, not a data race.
    if !can_transition(ProcessingStatus::Processing, final_status) {
        tracing::error!(
            appointment_id,
            to = final_status.as_str(),
            "Refusing lease release: illegal status transition"
        );
        return;
    }

    match release_lease(conn, appointment_id, instance_id, final_status, error_message) {
        Ok(true) => {
            tracing::info!(
                appointment_id,
                status = final_status.as_str(),
                "Processing lease released"
            );
        }
        Ok(false) => {
            tracing::warn!(
                appointment_id,
                instance_id,
                "Lease no longer held at release time (reclaimed or already released)"
            );
        }
        Err(e) => {
            tracing::warn!(appointment_id, error = %e, "Failed to release processing lease");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::get_appointment;
    use crate::db::repository::intake::tests::seed_consultation;
    use crate::db::sqlite::open_memory_database;

    #[test]
    fn two_instances_cannot_both_hold_a_live_lease() {
        let conn = open_memory_database().unwrap();
        seed_consultation(&conn, "apt-1");

        let a = acquire(&conn, "apt-1", "inst-a", ProcessingStatus::Pending, 5).unwrap();
        let b = acquire(&conn, "apt-1", "inst-b", ProcessingStatus::Pending, 5).unwrap();

        assert_eq!(a, Acquire::Held("inst-a".to_string()));
        assert_eq!(b, Acquire::Busy);
    }

    #[test]
    fn expired_lease_is_taken_over_without_release() {
        let conn = open_memory_database().unwrap();
        seed_consultation(&conn, "apt-1");

        acquire(&conn, "apt-1", "inst-a", ProcessingStatus::Pending, 5).unwrap();

        // Age the lease beyond the timeout.
        let old = (Utc::now() - Duration::minutes(6))
            .format("%Y-%m-%dT%H:%M:%S%.6fZ")
            .to_string();
        conn.execute(
            "UPDATE appointments SET processing_started_at = ?1 WHERE id = 'apt-1'",
            rusqlite::params![old],
        )
        .unwrap();

        let b = acquire(&conn, "apt-1", "inst-b", ProcessingStatus::Pending, 5).unwrap();
        assert_eq!(b, Acquire::Held("inst-b".to_string()));

        let apt = get_appointment(&conn, "apt-1").unwrap();
        assert_eq!(apt.processing_instance_id.as_deref(), Some("inst-b"));
    }

    #[test]
    fn release_is_silent_when_lease_was_reclaimed() {
        let conn = open_memory_database().unwrap();
        seed_consultation(&conn, "apt-1");

        acquire(&conn, "apt-1", "inst-a", ProcessingStatus::Pending, 5).unwrap();
        let old = (Utc::now() - Duration::minutes(6))
            .format("%Y-%m-%dT%H:%M:%S%.6fZ")
            .to_string();
        conn.execute(
            "UPDATE appointments SET processing_started_at = ?1 WHERE id = 'apt-1'",
            rusqlite::params![old],
        )
        .unwrap();
        acquire(&conn, "apt-1", "inst-b", ProcessingStatus::Pending, 5).unwrap();

        // The original worker comes back and releases; the row must keep
        // the reclaiming worker's state.
        release(&conn, "apt-1", "inst-a", ProcessingStatus::Failed, Some("late"));

        let apt = get_appointment(&conn, "apt-1").unwrap();
        assert_eq!(apt.processing_status, ProcessingStatus::Processing);
        assert_eq!(apt.processing_instance_id.as_deref(), Some("inst-b"));
    }

    #[test]
    fn release_then_reacquire_next_stage() {
        let conn = open_memory_database().unwrap();
        seed_consultation(&conn, "apt-1");

        acquire(&conn, "apt-1", "inst-a", ProcessingStatus::Pending, 5).unwrap();
        release(&conn, "apt-1", "inst-a", ProcessingStatus::FilesProcessed, None);

        let summary_stage =
            acquire(&conn, "apt-1", "inst-s", ProcessingStatus::FilesProcessed, 5).unwrap();
        assert_eq!(summary_stage, Acquire::Held("inst-s".to_string()));
    }

    #[test]
    fn acquire_from_terminal_state_is_refused() {
        let conn = open_memory_database().unwrap();
        seed_consultation(&conn, "apt-1");
        conn.execute(
            "UPDATE appointments SET processing_status='completed' WHERE id='apt-1'",
            [],
        )
        .unwrap();

        // `eligible_from = Completed` is not a legal start state; the row
        // must stay untouched.
        let result = acquire(&conn, "apt-1", "inst-a", ProcessingStatus::Completed, 5).unwrap();
        assert_eq!(result, Acquire::Busy);
        let apt = get_appointment(&conn, "apt-1").unwrap();
        assert_eq!(apt.processing_status, ProcessingStatus::Completed);
    }

    #[test]
    fn instance_ids_are_unique() {
        assert_ne!(new_instance_id(), new_instance_id());
    }
}
