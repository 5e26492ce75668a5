use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use super::{ScheduleEntry, ScheduleRecord, ScheduleRepository, TaskRepository, format_timestamp};
use crate::error::SweepError;
use crate::schedule::{NewTask, Schedule, Task};

/// Repository operations that can be made to fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    ListActive,
    FindIncomplete,
    Create,
    UpdateLastGenerated,
}

#[derive(Default)]
struct State {
    schedules: Vec<ScheduleRecord>,
    tasks: Vec<Task>,
    next_task: u64,
    failures: HashMap<Op, SweepError>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_schedule(&self, schedule: &Schedule) {
        self.add_record(ScheduleRecord::from(schedule));
    }

    pub fn add_record(&self, record: ScheduleRecord) {
        self.lock().schedules.push(record);
    }

    pub fn add_task(&self, task: Task) {
        self.lock().tasks.push(task);
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.lock().tasks.clone()
    }

    pub fn schedule(&self, id: &str) -> Option<ScheduleRecord> {
        self.lock().schedules.iter().find(|s| s.id == id).cloned()
    }

    /// Mark a task completed, the way the kiosk does. Returns `true` when found.
    pub fn complete_task(&self, task_id: &str) -> bool {
        let mut state = self.lock();
        match state.tasks.iter_mut().find(|t| t.id == task_id) {
            Some(task) => {
                task.completed = true;
                true
            }
            None => false,
        }
    }

    /// Make the next call to `op` fail with `err`.
    pub fn fail_next(&self, op: Op, err: SweepError) {
        self.lock().failures.insert(op, err);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("memory store lock poisoned")
    }

    fn take_failure(state: &mut State, op: Op) -> Result<(), SweepError> {
        match state.failures.remove(&op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl ScheduleRepository for MemoryStore {
    async fn list_active(&self) -> Result<Vec<ScheduleEntry>, SweepError> {
        let mut state = self.lock();
        Self::take_failure(&mut state, Op::ListActive)?;
        Ok(state
            .schedules
            .iter()
            .filter(|r| r.active)
            .cloned()
            .map(ScheduleRecord::into_schedule)
            .collect())
    }

    async fn update_last_generated(
        &self,
        schedule_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), SweepError> {
        let mut state = self.lock();
        Self::take_failure(&mut state, Op::UpdateLastGenerated)?;
        let record = state
            .schedules
            .iter_mut()
            .find(|r| r.id == schedule_id)
            .ok_or_else(|| SweepError::write(schedule_id, "schedule not found"))?;
        record.last_generated = Some(format_timestamp(at));
        Ok(())
    }
}

#[async_trait::async_trait]
impl TaskRepository for MemoryStore {
    async fn find_incomplete(
        &self,
        schedule_id: &str,
        child_id: &str,
    ) -> Result<Option<Task>, SweepError> {
        let mut state = self.lock();
        Self::take_failure(&mut state, Op::FindIncomplete)?;
        Ok(state
            .tasks
            .iter()
            .find(|t| t.schedule == schedule_id && t.child == child_id && !t.completed)
            .cloned())
    }

    async fn create(&self, task: NewTask) -> Result<Task, SweepError> {
        let mut state = self.lock();
        Self::take_failure(&mut state, Op::Create)?;
        state.next_task += 1;
        let task = task.into_task(format!("task-{}", state.next_task));
        state.tasks.push(task.clone());
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::Recurrence;
    use crate::schedule::tests::schedule;

    #[tokio::test]
    async fn test_list_active_skips_inactive_records() {
        let store = MemoryStore::new();
        let mut off = schedule("off", Recurrence::Daily, &[]);
        off.active = false;
        store.add_schedule(&schedule("on", Recurrence::Daily, &[]));
        store.add_schedule(&off);

        let listed = store.list_active().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].as_ref().unwrap().id, "on");
    }

    #[tokio::test]
    async fn test_find_incomplete_matches_schedule_and_child() {
        let store = MemoryStore::new();
        let s = schedule("s1", Recurrence::Daily, &[]);
        let created = store.create(NewTask::from_schedule(&s, Utc::now())).await.unwrap();

        assert!(store.find_incomplete("s1", "child-1").await.unwrap().is_some());
        assert!(store.find_incomplete("s1", "child-2").await.unwrap().is_none());
        assert!(store.find_incomplete("s2", "child-1").await.unwrap().is_none());

        assert!(store.complete_task(&created.id));
        assert!(store.find_incomplete("s1", "child-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let store = MemoryStore::new();
        store.fail_next(Op::ListActive, SweepError::StoreUnavailable("down".into()));
        assert!(store.list_active().await.is_err());
        assert!(store.list_active().await.is_ok());
    }

    #[tokio::test]
    async fn test_update_last_generated_unknown_schedule() {
        let store = MemoryStore::new();
        let err = store.update_last_generated("nope", Utc::now()).await.unwrap_err();
        assert_eq!(err.kind(), "write_failure");
    }
}
