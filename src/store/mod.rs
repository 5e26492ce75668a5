pub mod file;
pub mod memory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::SweepError;
use crate::schedule::{DaysOfWeek, NewTask, Recurrence, Schedule, Task};

pub use file::JsonStore;
pub use memory::MemoryStore;

pub type ScheduleEntry = Result<Schedule, SweepError>;

#[async_trait::async_trait]
pub trait ScheduleRepository: Send + Sync {
    // Per-record problems are reported inside the list.
    async fn list_active(&self) -> Result<Vec<ScheduleEntry>, SweepError>;

    async fn update_last_generated(
        &self,
        schedule_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), SweepError>;
}

#[async_trait::async_trait]
pub trait TaskRepository: Send + Sync {
    async fn find_incomplete(
        &self,
        schedule_id: &str,
        child_id: &str,
    ) -> Result<Option<Task>, SweepError>;

    async fn create(&self, task: NewTask) -> Result<Task, SweepError>;
}

/// A schedule exactly as stored, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRecord {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub child: String,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub recurrence: String,
    #[serde(default)]
    pub days_of_week: Value,
    #[serde(default, deserialize_with = "null_as_default")]
    pub time_period: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub last_generated: Option<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl ScheduleRecord {
    pub fn into_schedule(self) -> Result<Schedule, SweepError> {
        let days_of_week = parse_days_of_week(&self.days_of_week)
            .map_err(|reason| SweepError::parse(&self.id, "daysOfWeek", reason))?;
        let last_generated = parse_timestamp(self.last_generated.as_deref())
            .map_err(|reason| SweepError::parse(&self.id, "lastGenerated", reason))?;

        Ok(Schedule {
            recurrence: Recurrence::from(self.recurrence.as_str()),
            id: self.id,
            title: self.title,
            child: self.child,
            priority: self.priority,
            days_of_week,
            time_period: self.time_period,
            active: self.active,
            last_generated,
        })
    }
}

impl From<&Schedule> for ScheduleRecord {
    fn from(schedule: &Schedule) -> Self {
        Self {
            id: schedule.id.clone(),
            title: schedule.title.clone(),
            child: schedule.child.clone(),
            priority: schedule.priority,
            recurrence: schedule.recurrence.as_str().to_string(),
            days_of_week: Value::from(schedule.days_of_week.to_numbers()),
            time_period: schedule.time_period.clone(),
            active: schedule.active,
            last_generated: schedule.last_generated.map(format_timestamp),
        }
    }
}

fn parse_days_of_week(value: &Value) -> Result<DaysOfWeek, String> {
    match value {
        Value::Null => Ok(DaysOfWeek::every_day()),
        Value::Array(_) => DaysOfWeek::deserialize(value).map_err(|e| e.to_string()),
        Value::String(text) if text.trim().is_empty() => Ok(DaysOfWeek::every_day()),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(inner @ Value::Array(_)) => parse_days_of_week(&inner),
            Ok(other) => Err(format!("expected an array, got {other}")),
            Err(e) => Err(format!("invalid JSON '{text}': {e}")),
        },
        other => Err(format!("expected an array, got {other}")),
    }
}

// Empty or missing means never. Also accepts the space-separated
// `2026-10-15 08:00:00.000Z` form.
pub fn parse_timestamp(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, String> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(&raw.replacen(' ', "T", 1)))
        .map(|ts| Some(ts.with_timezone(&Utc)))
        .map_err(|e| format!("'{raw}' is not an RFC 3339 timestamp: {e}"))
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true)
}
