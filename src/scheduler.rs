use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{error, info, warn, Level};
use logging_timer::timer;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::database::Database;
use crate::error::FundPulseError;
use crate::pipeline::{BatchOutcome, Pipeline};
use crate::schedule::{NewTask, ScheduledTask, TaskUpdate, Trigger};

struct Job {
    name: String,
    schedule: String,
    trigger: Trigger,
    next_run: Option<i64>,
    updated_at: i64,
}

impl Job {
    fn matches(&self, task: &ScheduledTask) -> bool {
        self.updated_at == task.updated_at && self.schedule == task.schedule && self.name == task.name
    }
}

/// Snapshot of one live job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobInfo {
    pub id: String,
    pub task_id: i64,
    pub name: String,
    pub next_run: Option<i64>,
    pub trigger: String,
}

pub fn job_id(task_id: i64) -> String {
    format!("task_{}", task_id)
}

/// Removes the task from the running set when the execution ends
struct RunGuard<'a> {
    scheduler: &'a Scheduler,
    task_id: i64,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.scheduler.running.lock().unwrap().remove(&self.task_id);
    }
}

/// Live job registry plus the loop that fires due jobs.
///
/// Holds at most one job per task. Every edit that touches a task goes
/// through the registry lock, so the stored row and the live job never
/// disagree for longer than one edit.
pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    jobs: Mutex<HashMap<i64, Job>>,
    running: Mutex<HashSet<i64>>,
    interrupt: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Scheduler {
            pipeline,
            jobs: Mutex::new(HashMap::new()),
            running: Mutex::new(HashSet::new()),
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    fn db(&self) -> &Database {
        self.pipeline.store().database()
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn install_locked(jobs: &mut HashMap<i64, Job>, task: &ScheduledTask) {
        if jobs.remove(&task.task_id).is_some() {
            info!("Removed job {}", job_id(task.task_id));
        }
        if !task.is_active {
            return;
        }

        let trigger = Trigger::from_spec(&task.schedule);
        let next_run = trigger.next_after(Self::now());
        if next_run.is_none() {
            warn!("Schedule '{}' of task {} never fires", task.schedule, task.name);
        }

        info!(
            "Scheduled task {} added with schedule: {} ({})",
            task.name, task.schedule, trigger
        );
        jobs.insert(
            task.task_id,
            Job {
                name: task.name.clone(),
                schedule: task.schedule.clone(),
                trigger,
                next_run,
                updated_at: task.updated_at,
            },
        );
    }

    /// Install (or replace) the job for `task`. Inactive tasks end up with no job.
    pub fn install(&self, task: &ScheduledTask) {
        let mut jobs = self.jobs.lock().unwrap();
        Self::install_locked(&mut jobs, task);
    }

    pub fn remove(&self, task_id: i64) -> bool {
        let removed = self.jobs.lock().unwrap().remove(&task_id).is_some();
        if removed {
            info!("Removed scheduled task {}", task_id);
        }
        removed
    }

    pub fn list_jobs(&self) -> Vec<JobInfo> {
        let jobs = self.jobs.lock().unwrap();
        let mut infos: Vec<JobInfo> = jobs
            .iter()
            .map(|(task_id, job)| JobInfo {
                id: job_id(*task_id),
                task_id: *task_id,
                name: job.name.clone(),
                next_run: job.next_run,
                trigger: job.trigger.to_string(),
            })
            .collect();
        infos.sort_by_key(|info| info.task_id);
        infos
    }

    /// Replay every active task row into the registry
    pub fn load_tasks_from_db(&self) -> Result<usize, FundPulseError> {
        let conn = self.db().conn()?;
        let tasks = ScheduledTask::list_active(&conn)?;
        let mut jobs = self.jobs.lock().unwrap();
        for task in &tasks {
            Self::install_locked(&mut jobs, task);
        }
        info!("Loaded {} scheduled tasks from database", tasks.len());
        Ok(tasks.len())
    }

    /// Bring the registry in line with the stored rows, picking up edits made
    /// by other processes. Jobs whose row is unchanged keep their next run.
    /// Returns the number of jobs installed, replaced or removed.
    pub fn sync_with_db(&self) -> Result<usize, FundPulseError> {
        let conn = self.db().conn()?;
        let tasks = ScheduledTask::list_active(&conn)?;
        let mut jobs = self.jobs.lock().unwrap();
        let mut changes = 0;

        let active: HashSet<i64> = tasks.iter().map(|task| task.task_id).collect();
        jobs.retain(|task_id, _| {
            let keep = active.contains(task_id);
            if !keep {
                info!("Removed job {}: task is gone or inactive", job_id(*task_id));
                changes += 1;
            }
            keep
        });

        for task in &tasks {
            if jobs.get(&task.task_id).is_some_and(|job| job.matches(task)) {
                continue;
            }
            Self::install_locked(&mut jobs, task);
            changes += 1;
        }

        Ok(changes)
    }

    pub fn create_task(&self, new_task: &NewTask) -> Result<ScheduledTask, FundPulseError> {
        let conn = self.db().conn()?;
        let mut jobs = self.jobs.lock().unwrap();
        let task = Database::immediate_transaction(&conn, |c| {
            ScheduledTask::create(c, new_task, Self::now())
        })?;
        Self::install_locked(&mut jobs, &task);
        Ok(task)
    }

    pub fn update_task(&self, task_id: i64, update: &TaskUpdate) -> Result<Option<ScheduledTask>, FundPulseError> {
        let conn = self.db().conn()?;
        let mut jobs = self.jobs.lock().unwrap();
        let task = Database::immediate_transaction(&conn, |c| {
            ScheduledTask::update(c, task_id, update, Self::now())
        })?;
        if let Some(task) = &task {
            Self::install_locked(&mut jobs, task);
        }
        Ok(task)
    }

    pub fn set_task_active(&self, task_id: i64, active: bool) -> Result<Option<ScheduledTask>, FundPulseError> {
        let update = TaskUpdate {
            is_active: Some(active),
            ..Default::default()
        };
        self.update_task(task_id, &update)
    }

    pub fn delete_task(&self, task_id: i64) -> Result<bool, FundPulseError> {
        let conn = self.db().conn()?;
        let mut jobs = self.jobs.lock().unwrap();
        let deleted = Database::immediate_transaction(&conn, |c| ScheduledTask::delete(c, task_id))?;
        if jobs.remove(&task_id).is_some() {
            info!("Removed scheduled task {}", task_id);
        }
        Ok(deleted)
    }

    /// Execute a task immediately on the calling thread, outside its schedule
    pub fn run_task_now(&self, task_id: i64) -> Result<Option<BatchOutcome>, FundPulseError> {
        let _guard = self
            .try_start(task_id)
            .ok_or_else(|| FundPulseError::Error(format!("Task {} is already running", task_id)))?;
        self.pipeline.run_scheduled_scrape(task_id, &self.interrupt)
    }

    fn try_start(&self, task_id: i64) -> Option<RunGuard<'_>> {
        if self.running.lock().unwrap().insert(task_id) {
            Some(RunGuard {
                scheduler: self,
                task_id,
            })
        } else {
            None
        }
    }

    pub fn is_running(&self, task_id: i64) -> bool {
        self.running.lock().unwrap().contains(&task_id)
    }

    /// Task ids due at `now`. Each returned job has its next run advanced.
    pub fn due_jobs(&self, now: i64) -> Vec<i64> {
        let mut jobs = self.jobs.lock().unwrap();
        let mut due: Vec<i64> = Vec::new();

        for (task_id, job) in jobs.iter_mut() {
            if matches!(job.next_run, Some(next) if next <= now) {
                job.next_run = job.trigger.next_after(now);
                due.push(*task_id);
            }
        }

        due.sort_unstable();
        due
    }

    /// Body of one scheduled fire. Errors are logged; the job stays installed.
    pub fn fire(&self, task_id: i64) {
        let _tmr = timer!(Level::Trace; "Scheduler::fire", "{}", job_id(task_id));

        let Some(_guard) = self.try_start(task_id) else {
            let schedule = self
                .jobs
                .lock()
                .unwrap()
                .get(&task_id)
                .map(|job| job.schedule.clone())
                .unwrap_or_default();
            warn!(
                "Skipping fire of {} ({}): previous run still in progress",
                job_id(task_id),
                schedule
            );
            return;
        };

        if let Err(e) = self.pipeline.run_scheduled_scrape(task_id, &self.interrupt) {
            error!("Scheduled run of {} failed: {}", job_id(task_id), e);
        }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Fire due jobs every `tick` until `shutdown` resolves, then interrupt
    /// running executions and wait for them to wind down.
    pub async fn run<S>(self: Arc<Self>, tick: Duration, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(tick);
        let mut in_flight: Vec<JoinHandle<()>> = Vec::new();
        tokio::pin!(shutdown);

        info!("Scheduler started with {} job(s)", self.list_jobs().len());

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    in_flight.retain(|handle| !handle.is_finished());
                    match self.sync_with_db() {
                        Ok(0) => {}
                        Ok(changes) => info!("Applied {} scheduled task change(s)", changes),
                        Err(e) => error!("Failed to sync scheduled tasks: {}", e),
                    }
                    for task_id in self.due_jobs(Self::now()) {
                        let scheduler = Arc::clone(&self);
                        in_flight.push(tokio::task::spawn_blocking(move || scheduler.fire(task_id)));
                    }
                }
                _ = &mut shutdown => {
                    info!("Scheduler shutting down");
                    self.interrupt.store(true, Ordering::Release);
                    break;
                }
            }
        }

        for handle in in_flight {
            if let Err(e) = handle.await {
                error!("Scheduled execution panicked: {}", e);
            }
        }
        info!("Scheduler stopped");
    }
}
