//! Named recurring triggers driven by a background clock task.
//!
//! The scheduler only decides *when*; callbacks are opaque futures spawned
//! onto the runtime. A failing or panicking callback never reaches the
//! clock loop.

mod trigger;

pub use trigger::{parse_interval, CronSchedule, ScheduleError, Trigger};

use chrono::{DateTime, Local};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub type JobCallback = Arc<dyn Fn() -> JobFuture + Send + Sync + 'static>;

struct ScheduledJob {
    spec: String,
    trigger: Trigger,
    next_run: Option<DateTime<Local>>,
    callback: JobCallback,
}

type JobMap = Arc<Mutex<HashMap<String, ScheduledJob>>>;

pub struct Scheduler {
    jobs: JobMap,
    tick: Duration,
    clock: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(tick: Duration) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            tick: tick.max(Duration::from_millis(10)),
            clock: Mutex::new(None),
        }
    }

    /// Start the clock loop. No-op if already running. Must be called
    /// from within a tokio runtime.
    pub fn start(&self) {
        let mut clock = lock(&self.clock);
        if clock.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let jobs = Arc::clone(&self.jobs);
        let tick = self.tick;
        *clock = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                fire_due(&jobs, Local::now());
            }
        }));
        info!(tick_ms = tick.as_millis() as u64, "Scheduler started");
    }

    /// Stop the clock loop. Callbacks already spawned keep running.
    pub fn stop(&self) {
        if let Some(handle) = lock(&self.clock).take() {
            handle.abort();
            info!("Scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.clock)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Install (or replace) the trigger `id`. Malformed specs leave the
    /// existing job map untouched.
    pub fn add_job(&self, id: &str, spec: &str, callback: JobCallback) -> Result<(), ScheduleError> {
        let trigger = Trigger::parse(spec)?;
        let next_run = trigger.next_after(&Local::now());
        if next_run.is_none() {
            warn!(job = id, schedule = spec, "Trigger never fires");
        }
        let replaced = lock(&self.jobs)
            .insert(
                id.to_string(),
                ScheduledJob {
                    spec: spec.to_string(),
                    trigger,
                    next_run,
                    callback,
                },
            )
            .is_some();
        debug!(job = id, schedule = spec, replaced, "Trigger installed");
        Ok(())
    }

    pub fn remove_job(&self, id: &str) -> bool {
        lock(&self.jobs).remove(id).is_some()
    }

    /// Trigger id -> schedule spec.
    pub fn list_jobs(&self) -> BTreeMap<String, String> {
        lock(&self.jobs)
            .iter()
            .map(|(id, job)| (id.clone(), job.spec.clone()))
            .collect()
    }

    pub fn next_run(&self, id: &str) -> Option<DateTime<Local>> {
        lock(&self.jobs).get(id).and_then(|job| job.next_run)
    }

    /// Spawn every trigger due at `now` and advance it. Returns how many fired.
    pub fn run_pending(&self, now: DateTime<Local>) -> usize {
        fire_due(&self.jobs, now)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.clock).take() {
            handle.abort();
        }
    }
}

fn fire_due(jobs: &JobMap, now: DateTime<Local>) -> usize {
    let due: Vec<(String, JobCallback)> = {
        let mut jobs = lock(jobs);
        jobs.iter_mut()
            .filter_map(|(id, job)| {
                let scheduled = job.next_run?;
                if scheduled > now {
                    return None;
                }
                // Missed fires collapse into one.
                let mut next = job.trigger.next_after(&scheduled);
                if next.is_some_and(|n| n <= now) {
                    next = job.trigger.next_after(&now);
                }
                job.next_run = next;
                Some((id.clone(), Arc::clone(&job.callback)))
            })
            .collect()
    };

    for (id, callback) in &due {
        debug!(job = %id, "Trigger fired");
        tokio::spawn(callback());
    }
    due.len()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
