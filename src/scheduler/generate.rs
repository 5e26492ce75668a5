use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::SweepError;
use crate::schedule::{NewTask, Schedule, Task};
use crate::store::{ScheduleRepository, TaskRepository};

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    Created(Task),
    /// An incomplete task for this schedule and child already exists.
    SkippedDuplicate { existing: String },
    Failed(SweepError),
}

// The task is written before `lastGenerated` is stamped. A lost stamp leaves
// the schedule due, and the next duplicate check finds the task.
pub struct Generator {
    schedules: Arc<dyn ScheduleRepository>,
    tasks: Arc<dyn TaskRepository>,
}

impl Generator {
    pub fn new(schedules: Arc<dyn ScheduleRepository>, tasks: Arc<dyn TaskRepository>) -> Self {
        Self { schedules, tasks }
    }

    pub async fn generate(&self, schedule: &Schedule, now: DateTime<Utc>) -> GenerationOutcome {
        match self.tasks.find_incomplete(&schedule.id, &schedule.child).await {
            Ok(Some(existing)) => {
                debug!(
                    schedule_id = %schedule.id,
                    task_id = %existing.id,
                    "incomplete task already exists, skipping"
                );
                return GenerationOutcome::SkippedDuplicate {
                    existing: existing.id,
                };
            }
            Ok(None) => {}
            Err(e) => return GenerationOutcome::Failed(e),
        }

        let task = match self.tasks.create(NewTask::from_schedule(schedule, now)).await {
            Ok(task) => task,
            Err(e) => return GenerationOutcome::Failed(e),
        };

        if let Err(e) = self.schedules.update_last_generated(&schedule.id, now).await {
            warn!(
                schedule_id = %schedule.id,
                task_id = %task.id,
                "task created but lastGenerated not stamped: {e}"
            );
            return GenerationOutcome::Failed(e);
        }

        info!(
            schedule_id = %schedule.id,
            task_id = %task.id,
            "generated task '{}'",
            schedule.title
        );
        GenerationOutcome::Created(task)
    }
}
