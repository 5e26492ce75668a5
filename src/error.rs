use thiserror::Error;

/// Only `StoreUnavailable` aborts a sweep; the rest are scoped to one schedule.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SweepError {
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("query failed for schedule {schedule_id}: {reason}")]
    QueryFailure { schedule_id: String, reason: String },

    #[error("write failed for schedule {schedule_id}: {reason}")]
    WriteFailure { schedule_id: String, reason: String },

    #[error("malformed {field} on schedule {schedule_id}: {reason}")]
    ParseFailure {
        schedule_id: String,
        field: &'static str,
        reason: String,
    },
}

impl SweepError {
    pub fn query(schedule_id: &str, reason: impl ToString) -> Self {
        Self::QueryFailure {
            schedule_id: schedule_id.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn write(schedule_id: &str, reason: impl ToString) -> Self {
        Self::WriteFailure {
            schedule_id: schedule_id.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn parse(schedule_id: &str, field: &'static str, reason: impl ToString) -> Self {
        Self::ParseFailure {
            schedule_id: schedule_id.to_string(),
            field,
            reason: reason.to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::QueryFailure { .. } => "query_failure",
            Self::WriteFailure { .. } => "write_failure",
            Self::ParseFailure { .. } => "parse_failure",
        }
    }

    pub fn aborts_sweep(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }

    pub fn schedule_id(&self) -> Option<&str> {
        match self {
            Self::StoreUnavailable(_) => None,
            Self::QueryFailure { schedule_id, .. }
            | Self::WriteFailure { schedule_id, .. }
            | Self::ParseFailure { schedule_id, .. } => Some(schedule_id),
        }
    }
}
