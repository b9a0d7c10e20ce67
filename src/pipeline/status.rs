//! Appointment processing status: the coordination substrate every pipeline
//! stage reads and transitions.
//!
//! Legal transitions are validated in one place (`can_transition`) instead of
//! being re-checked ad hoc at every call site. Status writes themselves go
//! through conditional UPDATEs in `pipeline::lock` so two workers can never
//! both believe they advanced the row.

use serde::{Deserialize, Serialize};

/// Lifecycle of an appointment's processing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    FilesProcessed,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::FilesProcessed => "files_processed",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "files_processed" => Some(Self::FilesProcessed),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Terminal states are never left again by this subsystem.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether a status transition is legal.
///
/// The file-extraction stage drives `pending → processing → files_processed`,
/// the summary stage drives `files_processed → processing → completed`. Any
/// live stage may land on `failed`; a failed or stuck run is re-entered
/// through `pending` (manual retry resets the row) or stale-lease reclaim,
/// which stays within `processing`.
pub fn can_transition(from: ProcessingStatus, to: ProcessingStatus) -> bool {
    use ProcessingStatus::*;
    match (from, to) {
        (Pending, Processing) => true,
        (Processing, FilesProcessed) => true,
        (Processing, Completed) => true,
        (Processing, Failed) => true,
        // Stale-lease reclaim: a new instance takes over a dead worker's run.
        (Processing, Processing) => true,
        (Processing, Pending) => true,
        (FilesProcessed, Processing) => true,
        // Manual retry of a failed run.
        (Failed, Pending) => true,
        _ => false,
    }
}
