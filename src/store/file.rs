use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{ScheduleEntry, ScheduleRecord, ScheduleRepository, TaskRepository, format_timestamp};
use crate::error::SweepError;
use crate::schedule::{NewTask, Task};

const SCHEDULES_FILE: &str = "schedules.json";
const TASKS_FILE: &str = "tasks.json";

// Files are re-read on every call so external edits show up on the next sweep.
pub struct JsonStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn init(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        for name in [SCHEDULES_FILE, TASKS_FILE] {
            let path = self.dir.join(name);
            if !path.exists() {
                std::fs::write(&path, "[]\n")?;
            }
        }
        Ok(())
    }

    pub fn all_tasks(&self) -> Result<Vec<Task>, SweepError> {
        let items = self.read_collection(TASKS_FILE)?;
        serde_json::from_value(Value::Array(items))
            .map_err(|e| SweepError::StoreUnavailable(format!("{TASKS_FILE} is malformed: {e}")))
    }

    fn read_collection(&self, name: &str) -> Result<Vec<Value>, SweepError> {
        let path = self.dir.join(name);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SweepError::StoreUnavailable(format!("collection missing: {}", path.display()))
            } else {
                SweepError::StoreUnavailable(format!("cannot read {}: {e}", path.display()))
            }
        })?;
        serde_json::from_str(&content).map_err(|e| {
            SweepError::StoreUnavailable(format!("{} is not a JSON array: {e}", path.display()))
        })
    }

    fn write_collection(&self, name: &str, items: &[Value]) -> std::io::Result<()> {
        let path = self.dir.join(name);
        let tmp = self.dir.join(format!("{name}.tmp"));
        let json = serde_json::to_string_pretty(items)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_lock.lock().expect("store lock poisoned")
    }
}

fn record_id(value: &Value) -> &str {
    value.get("id").and_then(Value::as_str).unwrap_or("<unknown>")
}

#[async_trait::async_trait]
impl ScheduleRepository for JsonStore {
    async fn list_active(&self) -> Result<Vec<ScheduleEntry>, SweepError> {
        let items = self.read_collection(SCHEDULES_FILE)?;
        Ok(items
            .into_iter()
            .filter(|item| item.get("active").and_then(Value::as_bool) == Some(true))
            .map(|item| {
                let id = record_id(&item).to_string();
                serde_json::from_value::<ScheduleRecord>(item)
                    .map_err(|e| SweepError::parse(&id, "record", e))
                    .and_then(ScheduleRecord::into_schedule)
            })
            .collect())
    }

    async fn update_last_generated(
        &self,
        schedule_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), SweepError> {
        let _guard = self.lock();
        let mut items = self.read_collection(SCHEDULES_FILE)?;
        let record = items
            .iter_mut()
            .find(|item| record_id(item) == schedule_id)
            .and_then(Value::as_object_mut)
            .ok_or_else(|| SweepError::write(schedule_id, "schedule not found"))?;
        record.insert("lastGenerated".into(), Value::String(format_timestamp(at)));
        self.write_collection(SCHEDULES_FILE, &items)
            .map_err(|e| SweepError::write(schedule_id, e))
    }
}

#[async_trait::async_trait]
impl TaskRepository for JsonStore {
    async fn find_incomplete(
        &self,
        schedule_id: &str,
        child_id: &str,
    ) -> Result<Option<Task>, SweepError> {
        let items = self.read_collection(TASKS_FILE)?;
        for item in items {
            let matches = item.get("schedule").and_then(Value::as_str) == Some(schedule_id)
                && item.get("child").and_then(Value::as_str) == Some(child_id)
                && item.get("completed").and_then(Value::as_bool) != Some(true);
            if matches {
                let task = serde_json::from_value(item)
                    .map_err(|e| SweepError::query(schedule_id, e))?;
                return Ok(Some(task));
            }
        }
        Ok(None)
    }

    async fn create(&self, task: NewTask) -> Result<Task, SweepError> {
        let schedule_id = task.schedule.clone();
        let task = task.into_task(uuid::Uuid::new_v4().to_string());
        let value = serde_json::to_value(&task).map_err(|e| SweepError::write(&schedule_id, e))?;

        let _guard = self.lock();
        let mut items = self.read_collection(TASKS_FILE)?;
        items.push(value);
        self.write_collection(TASKS_FILE, &items)
            .map_err(|e| SweepError::write(&schedule_id, e))?;
        Ok(task)
    }
}
