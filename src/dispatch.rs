//! Scheduler dispatch loop.
//!
//! A single background task owns the [`JobRegistry`] and drives every
//! state change through one `select!` loop: commands arriving from
//! [`SchedulerHandle`] clones, completion results from spawned delivery
//! attempts, and a timer armed for the nearest deadline. Deliveries run
//! on their own tokio tasks so a slow gateway never blocks scheduling.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::MissedFirePolicy;
use crate::cron::{CronError, CronExpr};
use crate::error::{ReminderError, Result};
use crate::notify::Notifier;
use crate::registry::{JobRegistry, JobSnapshot};
use crate::store::TaskStore;
use crate::task::Task;

/// Commands accepted by the dispatch loop.
#[derive(Debug)]
pub enum Command {
    /// Register (or replace) a job for this task.
    Schedule(Task),
    /// Remove a job by task id.
    Cancel(String),
    /// Reply with a snapshot of all registered jobs.
    Query(oneshot::Sender<Vec<JobSnapshot>>),
}

/// Cheap cloneable handle for talking to the dispatch loop.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl SchedulerHandle {
    /// Ask the loop to schedule (or replace) a job for `task`.
    pub fn schedule(&self, task: Task) -> Result<()> {
        self.send(Command::Schedule(task))
    }

    /// Ask the loop to drop the job for a task id.
    pub fn cancel(&self, id: &str) -> Result<()> {
        self.send(Command::Cancel(id.to_owned()))
    }

    /// Fetch a snapshot of all registered jobs.
    pub async fn jobs(&self) -> Result<Vec<JobSnapshot>> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Query(tx))?;
        rx.await
            .map_err(|_| ReminderError::Scheduler("scheduler loop dropped the query".to_owned()))
    }

    fn send(&self, cmd: Command) -> Result<()> {
        self.tx
            .send(cmd)
            .map_err(|_| ReminderError::Scheduler("scheduler loop is not running".to_owned()))
    }
}

/// Outcome of one spawned delivery attempt.
#[derive(Debug)]
struct FireResult {
    task_id: String,
    /// Epoch seconds captured when the attempt started.
    fired_at: i64,
    error: Option<String>,
}

/// Background dispatcher owning the job registry.
pub struct Dispatcher {
    /// In-memory jobs, rebuilt from the store on startup.
    registry: JobRegistry,
    /// Durable task records and fire history.
    store: Arc<TaskStore>,
    /// Push gateway client shared with spawned attempts.
    notifier: Arc<Notifier>,
    /// Timezone for cron evaluation.
    tz: FixedOffset,
    /// What to do with deadlines missed while the process was down.
    policy: MissedFirePolicy,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    done_tx: mpsc::UnboundedSender<FireResult>,
    done_rx: mpsc::UnboundedReceiver<FireResult>,
}

impl Dispatcher {
    /// Create a dispatcher and the handle used to reach it.
    pub fn new(
        store: Arc<TaskStore>,
        notifier: Arc<Notifier>,
        tz: FixedOffset,
        policy: MissedFirePolicy,
    ) -> (Self, SchedulerHandle) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        (
            Self {
                registry: JobRegistry::new(),
                store,
                notifier,
                tz,
                policy,
                cmd_rx,
                done_tx,
                done_rx,
            },
            SchedulerHandle { tx: cmd_tx },
        )
    }

    /// Run the dispatch loop until every [`SchedulerHandle`] is dropped.
    pub async fn run(mut self) {
        self.recover();
        info!("dispatch loop started with {} jobs", self.registry.len());

        loop {
            let deadline = self.registry.nearest_deadline();
            let now = self.now();

            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.apply_command(cmd),
                        None => break,
                    }
                }
                Some(done) = self.done_rx.recv() => {
                    self.finish_fire(done);
                }
                () = sleep_until_deadline(deadline, now) => {
                    self.fire_due(self.now());
                }
            }
        }

        info!("dispatch loop stopped");
    }

    /// Rebuild the registry from enabled tasks in the store.
    ///
    /// Rows with unparseable schedules are skipped; rows whose schedule
    /// has no future fire time are disabled in the store.
    fn recover(&mut self) {
        let tasks = match self.store.list_enabled() {
            Ok(tasks) => tasks,
            Err(e) => {
                error!("cannot load tasks from store: {e}");
                return;
            }
        };

        let total = tasks.len();
        let now = self.now();
        for task in &tasks {
            let cron = match CronExpr::parse(&task.cron) {
                Ok(cron) => cron,
                Err(e) => {
                    warn!(task = %task.id, cron = %task.cron, "skipping stored task with invalid schedule: {e}");
                    continue;
                }
            };

            match self.recovery_deadline(task, &cron, now) {
                Ok(next) => self.registry.register(task, cron, next),
                Err(e) => {
                    warn!(task = %task.id, "no future fire time, disabling: {e}");
                    if let Err(se) = self.store.set_enabled(&task.id, false) {
                        error!(task = %task.id, "cannot disable task: {se}");
                    }
                }
            }
        }

        info!("recovered {} of {} stored jobs", self.registry.len(), total);
    }

    /// First deadline for a task at startup, honoring the missed-fire policy.
    ///
    /// With `CatchUp`, a deadline that elapsed while the process was down
    /// yields one immediate fire; otherwise scheduling resumes from now.
    /// Skipped fires are never replayed one by one.
    fn recovery_deadline(
        &self,
        task: &Task,
        cron: &CronExpr,
        now: DateTime<FixedOffset>,
    ) -> std::result::Result<DateTime<FixedOffset>, CronError> {
        if self.policy == MissedFirePolicy::CatchUp {
            let anchor = epoch_to_local(task.last_fired_at.unwrap_or(task.created_at), self.tz);
            let planned = cron.next_after(&anchor)?;
            if planned <= now {
                return Ok(now);
            }
        }
        cron.next_after(&now)
    }

    fn apply_command(&mut self, cmd: Command) {
        match cmd {
            Command::Schedule(task) => self.schedule_task(&task),
            Command::Cancel(id) => {
                if self.registry.unregister(&id) {
                    debug!(task = %id, "job cancelled");
                }
            }
            Command::Query(reply) => {
                let _ = reply.send(self.registry.snapshots());
            }
        }
    }

    fn schedule_task(&mut self, task: &Task) {
        let cron = match CronExpr::parse(&task.cron) {
            Ok(cron) => cron,
            Err(e) => {
                // The service validates before persisting, so this only
                // trips on rows edited out of band.
                error!(task = %task.id, cron = %task.cron, "rejecting unparseable schedule: {e}");
                return;
            }
        };

        match cron.next_after(&self.now()) {
            Ok(next) => {
                debug!(task = %task.id, next = %next, "job scheduled");
                self.registry.register(task, cron, next);
            }
            Err(e) => {
                warn!(task = %task.id, "schedule has no future fire time: {e}");
            }
        }
    }

    /// Start a delivery attempt for every job whose deadline has passed.
    fn fire_due(&mut self, now: DateTime<FixedOffset>) {
        for id in self.registry.due_ids(now) {
            self.spawn_fire(&id, now);
        }
    }

    fn spawn_fire(&mut self, id: &str, now: DateTime<FixedOffset>) {
        let Some(entry) = self.registry.begin_fire(id) else {
            return;
        };
        let topic = entry.topic.clone();
        let title = entry.title.clone();
        let message = entry.message.clone();

        info!(task = %id, topic = %topic, "firing reminder");

        let notifier = Arc::clone(&self.notifier);
        let done = self.done_tx.clone();
        let task_id = id.to_owned();
        let fired_at = now.timestamp();
        tokio::spawn(async move {
            let error = notifier
                .send(&topic, &title, &message)
                .await
                .err()
                .map(|e| e.to_string());
            let _ = done.send(FireResult {
                task_id,
                fired_at,
                error,
            });
        });
    }

    /// Record a completed attempt and put the job back on the clock.
    ///
    /// Delivery failures are absorbed: they are logged, written to the
    /// task row and history, and the job is rescheduled all the same. A
    /// job cancelled or replaced while the attempt was in flight keeps
    /// whatever state the registry now holds.
    fn finish_fire(&mut self, result: FireResult) {
        match &result.error {
            None => info!(task = %result.task_id, "reminder delivered"),
            Some(err) => warn!(task = %result.task_id, error = %err, "reminder delivery failed"),
        }

        if let Err(e) =
            self.store
                .record_fire(&result.task_id, result.fired_at, result.error.as_deref())
        {
            error!(task = %result.task_id, "cannot record fire outcome: {e}");
        }

        if !self.registry.is_firing(&result.task_id) {
            return;
        }
        self.reschedule_from(&result.task_id, self.now());
    }

    fn reschedule_from(&mut self, id: &str, from: DateTime<FixedOffset>) {
        let Some(cron) = self.registry.get(id).map(|entry| entry.cron) else {
            return;
        };

        match cron.next_after(&from) {
            Ok(next) => {
                debug!(task = %id, next = %next, "rescheduled");
                self.registry.reschedule(id, next);
            }
            Err(e) => {
                warn!(task = %id, "no future fire time, disabling: {e}");
                self.registry.unregister(id);
                if let Err(se) = self.store.set_enabled(id, false) {
                    error!(task = %id, "cannot disable task: {se}");
                }
            }
        }
    }

    fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.tz)
    }
}

/// Sleep until the nearest deadline, or forever when there is none.
async fn sleep_until_deadline(deadline: Option<DateTime<FixedOffset>>, now: DateTime<FixedOffset>) {
    match deadline {
        Some(at) => {
            let wait = (at - now).to_std().unwrap_or(std::time::Duration::ZERO);
            tokio::time::sleep(wait).await;
        }
        None => std::future::pending().await,
    }
}

fn epoch_to_local(secs: i64, tz: FixedOffset) -> DateTime<FixedOffset> {
    DateTime::from_timestamp(secs, 0)
        .unwrap_or(DateTime::UNIX_EPOCH)
        .with_timezone(&tz)
}
