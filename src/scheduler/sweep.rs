use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::decision::is_due;
use super::generate::{GenerationOutcome, Generator};
use crate::clock::{CalendarZone, Clock};
use crate::error::SweepError;
use crate::store::{ScheduleRepository, TaskRepository};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepFailure {
    pub schedule_id: String,
    pub kind: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepReport {
    pub started_at: DateTime<Utc>,
    pub processed: usize,
    pub not_due: usize,
    pub created: usize,
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            processed: 0,
            not_due: 0,
            created: 0,
            skipped: 0,
            failed: 0,
            failures: Vec::new(),
        }
    }

    fn record_failure(&mut self, schedule_id: &str, err: &SweepError) {
        self.failed += 1;
        self.failures.push(SweepFailure {
            schedule_id: err.schedule_id().unwrap_or(schedule_id).to_string(),
            kind: err.kind(),
            message: err.to_string(),
        });
    }
}

/// Sweeps never overlap: a sweep requested while another runs waits for it.
pub struct Sweeper {
    schedules: Arc<dyn ScheduleRepository>,
    generator: Generator,
    clock: Arc<dyn Clock>,
    zone: CalendarZone,
    in_flight: Mutex<()>,
    last_report: std::sync::Mutex<Option<SweepReport>>,
}

impl Sweeper {
    pub fn new(
        schedules: Arc<dyn ScheduleRepository>,
        tasks: Arc<dyn TaskRepository>,
        clock: Arc<dyn Clock>,
        zone: CalendarZone,
    ) -> Self {
        Self {
            generator: Generator::new(schedules.clone(), tasks),
            schedules,
            clock,
            zone,
            in_flight: Mutex::new(()),
            last_report: std::sync::Mutex::new(None),
        }
    }

    pub async fn sweep_now(&self) -> Result<SweepReport, SweepError> {
        self.run_sweep(self.clock.now()).await
    }

    pub async fn run_sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, SweepError> {
        let _flight = self.in_flight.lock().await;

        let entries = self.schedules.list_active().await.inspect_err(|e| {
            error!("cannot list active schedules, sweep aborted: {e}");
        })?;
        debug!("processing {} active schedules", entries.len());

        let mut report = SweepReport::new(now);
        for entry in entries {
            report.processed += 1;
            let schedule = match entry {
                Ok(schedule) => schedule,
                Err(e) if e.aborts_sweep() => return Err(e),
                Err(e) => {
                    warn!(kind = e.kind(), "schedule skipped: {e}");
                    report.record_failure("<unknown>", &e);
                    continue;
                }
            };

            if !is_due(&schedule, now, self.zone) {
                debug!(schedule_id = %schedule.id, "not due");
                report.not_due += 1;
                continue;
            }

            match self.generator.generate(&schedule, now).await {
                GenerationOutcome::Created(_) => report.created += 1,
                GenerationOutcome::SkippedDuplicate { .. } => report.skipped += 1,
                GenerationOutcome::Failed(e) if e.aborts_sweep() => {
                    error!(schedule_id = %schedule.id, "sweep aborted: {e}");
                    return Err(e);
                }
                GenerationOutcome::Failed(e) => {
                    warn!(schedule_id = %schedule.id, kind = e.kind(), "generation failed: {e}");
                    report.record_failure(&schedule.id, &e);
                }
            }
        }

        info!(
            processed = report.processed,
            created = report.created,
            skipped = report.skipped,
            not_due = report.not_due,
            failed = report.failed,
            "sweep finished"
        );
        *self.last_report.lock().expect("report lock poisoned") = Some(report.clone());
        Ok(report)
    }

    /// The most recent sweep that ran to completion.
    pub fn last_report(&self) -> Option<SweepReport> {
        self.last_report.lock().expect("report lock poisoned").clone()
    }

    pub fn spawn(
        self: Arc<Self>,
        every: Duration,
        run_on_start: bool,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!("sweep loop started, every {}s in {} time", every.as_secs(), self.zone);
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            if !run_on_start {
                interval.tick().await;
            }

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("sweep loop stopped");
                        return;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = self.sweep_now().await {
                            error!(kind = e.kind(), "sweep failed, retrying next tick: {e}");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::schedule::tests::schedule;
    use crate::schedule::{NewTask, Recurrence};
    use crate::store::memory::Op;
    use crate::store::{MemoryStore, ScheduleRecord};
    use chrono::Duration as ChronoDuration;

    // A Sunday morning.
    fn sunday() -> DateTime<Utc> {
        "2026-10-18T09:00:00Z".parse().unwrap()
    }

    fn sweeper(store: &Arc<MemoryStore>) -> Sweeper {
        Sweeper::new(
            store.clone(),
            store.clone(),
            Arc::new(FixedClock::new(sunday())),
            CalendarZone::utc(),
        )
    }

    #[tokio::test]
    async fn test_weekly_schedule_due_on_its_day() {
        let store = Arc::new(MemoryStore::new());
        let mut s1 = schedule("S1", Recurrence::Weekly, &[0]);
        s1.last_generated = Some(sunday() - ChronoDuration::days(14));
        store.add_schedule(&s1);

        let report = sweeper(&store).run_sweep(sunday()).await.unwrap();
        assert_eq!(report.created, 1);

        let tasks = store.tasks();
        assert_eq!(tasks.len(), 1);
        let task = &tasks[0];
        assert_eq!(task.schedule, "S1");
        assert!(!task.completed);
        assert_eq!(task.title, s1.title);
        assert_eq!(task.child, s1.child);
        assert_eq!(task.priority, s1.priority);

        let stamped = store.schedule("S1").unwrap().into_schedule().unwrap();
        assert_eq!(stamped.last_generated, Some(sunday()));
    }

    #[tokio::test]
    async fn test_generated_today_is_not_due_even_with_open_task() {
        let store = Arc::new(MemoryStore::new());
        let mut s2 = schedule("S2", Recurrence::Daily, &[]);
        s2.last_generated = Some(sunday() - ChronoDuration::hours(2));
        store.add_schedule(&s2);
        store.add_task(NewTask::from_schedule(&s2, s2.last_generated.unwrap()).into_task("t0".into()));

        let report = sweeper(&store).run_sweep(sunday()).await.unwrap();
        assert_eq!(report.not_due, 1);
        assert_eq!(report.created, 0);
        assert_eq!(report.skipped, 0);
        assert_eq!(store.tasks().len(), 1);
    }

    #[tokio::test]
    async fn test_open_task_from_earlier_cycle_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let mut s3 = schedule("S3", Recurrence::Daily, &[]);
        s3.last_generated = Some(sunday() - ChronoDuration::days(3));
        store.add_schedule(&s3);
        store.add_task(NewTask::from_schedule(&s3, s3.last_generated.unwrap()).into_task("t0".into()));

        let report = sweeper(&store).run_sweep(sunday()).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(store.tasks().len(), 1);
        let unchanged = store.schedule("S3").unwrap().into_schedule().unwrap();
        assert_eq!(unchanged.last_generated, s3.last_generated);
    }

    #[tokio::test]
    async fn test_repeated_sweeps_on_one_day_create_one_task() {
        let store = Arc::new(MemoryStore::new());
        store.add_schedule(&schedule("s1", Recurrence::Daily, &[]));
        let sweeper = sweeper(&store);

        let first = sweeper.run_sweep(sunday()).await.unwrap();
        let second = sweeper.run_sweep(sunday() + ChronoDuration::minutes(10)).await.unwrap();
        assert_eq!(first.created, 1);
        assert_eq!(second.created, 0);
        assert_eq!(second.not_due, 1);
        assert_eq!(store.tasks().len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_sweeps_after_lost_stamp_skip_duplicate() {
        let store = Arc::new(MemoryStore::new());
        store.add_schedule(&schedule("s1", Recurrence::Daily, &[]));
        store.fail_next(Op::UpdateLastGenerated, SweepError::write("s1", "disk full"));
        let sweeper = sweeper(&store);

        let first = sweeper.run_sweep(sunday()).await.unwrap();
        assert_eq!(first.failed, 1);
        let second = sweeper.run_sweep(sunday()).await.unwrap();
        assert_eq!(second.skipped, 1);
        assert_eq!(store.tasks().len(), 1);
    }

    // Yields between the duplicate check and the insert so interleaved sweeps
    // would both see "no open task".
    struct YieldingTasks(Arc<MemoryStore>);

    #[async_trait::async_trait]
    impl TaskRepository for YieldingTasks {
        async fn find_incomplete(
            &self,
            schedule_id: &str,
            child_id: &str,
        ) -> Result<Option<crate::schedule::Task>, SweepError> {
            let found = self.0.find_incomplete(schedule_id, child_id).await;
            tokio::task::yield_now().await;
            found
        }

        async fn create(&self, task: NewTask) -> Result<crate::schedule::Task, SweepError> {
            tokio::task::yield_now().await;
            self.0.create(task).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_sweeps_do_not_duplicate() {
        let store = Arc::new(MemoryStore::new());
        store.add_schedule(&schedule("s1", Recurrence::Daily, &[]));
        let sweeper = Sweeper::new(
            store.clone(),
            Arc::new(YieldingTasks(store.clone())),
            Arc::new(FixedClock::new(sunday())),
            CalendarZone::utc(),
        );

        let (a, b) = tokio::join!(sweeper.run_sweep(sunday()), sweeper.run_sweep(sunday()));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.created + b.created, 1);
        assert_eq!(a.not_due + b.not_due, 1);
        assert_eq!(store.tasks().len(), 1);
    }

    #[tokio::test]
    async fn test_next_day_generates_again_after_completion() {
        let store = Arc::new(MemoryStore::new());
        store.add_schedule(&schedule("s1", Recurrence::Daily, &[]));
        let sweeper = sweeper(&store);

        sweeper.run_sweep(sunday()).await.unwrap();
        let first_id = store.tasks()[0].id.clone();
        assert!(store.complete_task(&first_id));

        let monday = sweeper.run_sweep(sunday() + ChronoDuration::days(1)).await.unwrap();
        assert_eq!(monday.created, 1);
        assert_eq!(store.tasks().len(), 2);
    }

    #[tokio::test]
    async fn test_failures_are_isolated_per_schedule() {
        let store = Arc::new(MemoryStore::new());
        store.add_record(ScheduleRecord {
            id: "broken".into(),
            recurrence: "weekly".into(),
            days_of_week: serde_json::json!("not json"),
            active: true,
            ..Default::default()
        });
        store.add_schedule(&schedule("flaky", Recurrence::Daily, &[]));
        store.add_schedule(&schedule("fine", Recurrence::Daily, &[]));
        store.fail_next(Op::FindIncomplete, SweepError::query("flaky", "timeout"));

        let report = sweeper(&store).run_sweep(sunday()).await.unwrap();
        assert_eq!(report.processed, 3);
        assert_eq!(report.failed, 2);
        assert_eq!(report.created, 1);
        let failed: Vec<_> = report.failures.iter().map(|f| f.schedule_id.as_str()).collect();
        assert_eq!(failed, vec!["broken", "flaky"]);
        assert_eq!(report.failures[0].kind, "parse_failure");
        assert_eq!(store.tasks()[0].schedule, "fine");
    }

    #[tokio::test]
    async fn test_list_failure_aborts_sweep() {
        let store = Arc::new(MemoryStore::new());
        store.add_schedule(&schedule("s1", Recurrence::Daily, &[]));
        store.fail_next(Op::ListActive, SweepError::StoreUnavailable("no schedules".into()));
        let sweeper = sweeper(&store);

        assert!(sweeper.run_sweep(sunday()).await.is_err());
        assert!(sweeper.last_report().is_none());
        assert!(store.tasks().is_empty());

        sweeper.run_sweep(sunday()).await.unwrap();
        assert_eq!(sweeper.last_report().map(|r| r.created), Some(1));
    }

    #[tokio::test]
    async fn test_store_unavailable_mid_sweep_aborts() {
        let store = Arc::new(MemoryStore::new());
        store.add_schedule(&schedule("a", Recurrence::Daily, &[]));
        store.add_schedule(&schedule("b", Recurrence::Daily, &[]));
        store.fail_next(Op::FindIncomplete, SweepError::StoreUnavailable("tasks gone".into()));

        let err = sweeper(&store).run_sweep(sunday()).await.unwrap_err();
        assert!(err.aborts_sweep());
        assert!(store.tasks().is_empty());
    }

    #[tokio::test]
    async fn test_inactive_schedules_are_not_evaluated() {
        let store = Arc::new(MemoryStore::new());
        let mut off = schedule("off", Recurrence::Daily, &[]);
        off.active = false;
        store.add_schedule(&off);

        let report = sweeper(&store).run_sweep(sunday()).await.unwrap();
        assert_eq!(report.processed, 0);
        assert!(store.tasks().is_empty());
    }

    #[tokio::test]
    async fn test_loop_sweeps_on_start_and_stops_on_cancel() {
        let store = Arc::new(MemoryStore::new());
        store.add_schedule(&schedule("s1", Recurrence::Daily, &[]));
        let sweeper = Arc::new(sweeper(&store));
        let cancel = CancellationToken::new();

        let handle = sweeper
            .clone()
            .spawn(Duration::from_secs(3600), true, cancel.clone());

        tokio::time::timeout(Duration::from_secs(5), async {
            while sweeper.last_report().is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("startup sweep did not run");
        assert_eq!(store.tasks().len(), 1);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop did not stop")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_without_run_on_start_waits_one_interval() {
        let store = Arc::new(MemoryStore::new());
        store.add_schedule(&schedule("s1", Recurrence::Daily, &[]));
        let sweeper = Arc::new(sweeper(&store));
        let cancel = CancellationToken::new();

        let handle = sweeper
            .clone()
            .spawn(Duration::from_secs(60), false, cancel.clone());

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(sweeper.last_report().is_none());
        assert!(store.tasks().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(sweeper.last_report().map(|r| r.created), Some(1));
        assert_eq!(store.tasks().len(), 1);

        cancel.cancel();
        handle.await.unwrap();
    }
}
