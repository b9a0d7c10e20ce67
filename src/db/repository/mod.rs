pub mod appointment;
pub mod clinical_summary;
pub mod intake;
pub mod patient_file;
pub mod progress_event;

pub use appointment::*;
pub use clinical_summary::*;
pub use intake::*;
pub use patient_file::*;
pub use progress_event::*;

/// Current UTC time in the fixed-width format every timestamp column uses.
/// Fixed width keeps string comparison equivalent to time comparison, which
/// the lease-staleness predicate in SQL relies on.
pub fn now_utc() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.6fZ")
        .to_string()
}
