//! In-memory registry of schedulable jobs.
//!
//! The registry mirrors the enabled tasks in the store and tracks each
//! job's live scheduling state. It is owned exclusively by the dispatcher
//! loop and rebuilt from the store on startup, so it needs no locking and
//! no persistence of its own.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset};
use serde::Serialize;

use crate::cron::CronExpr;
use crate::task::Task;

/// Live scheduling state of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Waiting for its next deadline.
    Scheduled(DateTime<FixedOffset>),
    /// A dispatch attempt is in flight.
    Firing,
}

/// One registered job: the parsed schedule plus the payload to deliver.
#[derive(Debug, Clone)]
pub struct JobEntry {
    pub cron: CronExpr,
    pub topic: String,
    pub title: String,
    pub message: String,
    pub state: JobState,
}

/// Point-in-time view of a registered job, for status queries.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct JobSnapshot {
    pub task_id: String,
    pub title: String,
    pub topic: String,
    /// Next deadline as epoch seconds, absent while a fire is in flight.
    pub next_fire_at: Option<i64>,
    pub firing: bool,
}

/// Registry of all jobs currently eligible to fire.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: HashMap<String, JobEntry>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task, replacing any existing entry with the same id.
    ///
    /// Replacing an entry whose fire is in flight keeps the `Firing` state
    /// so the completion path recomputes the deadline with the new cron.
    pub fn register(&mut self, task: &Task, cron: CronExpr, next: DateTime<FixedOffset>) {
        let state = match self.jobs.get(&task.id) {
            Some(existing) if existing.state == JobState::Firing => JobState::Firing,
            _ => JobState::Scheduled(next),
        };
        self.jobs.insert(
            task.id.clone(),
            JobEntry {
                cron,
                topic: task.topic.clone(),
                title: task.title.clone(),
                message: task.message.clone(),
                state,
            },
        );
    }

    /// Remove a job. Returns `true` when an entry was present.
    pub fn unregister(&mut self, id: &str) -> bool {
        self.jobs.remove(id).is_some()
    }

    /// Set a new deadline for a job. Returns `false` when absent.
    pub fn reschedule(&mut self, id: &str, next: DateTime<FixedOffset>) -> bool {
        match self.jobs.get_mut(id) {
            Some(entry) => {
                entry.state = JobState::Scheduled(next);
                true
            }
            None => false,
        }
    }

    /// Mark a job as firing and hand back its entry for dispatch.
    ///
    /// Returns `None` when the job is unknown or already in flight, so a
    /// task never has two overlapping fires.
    pub fn begin_fire(&mut self, id: &str) -> Option<&JobEntry> {
        let entry = self.jobs.get_mut(id)?;
        if entry.state == JobState::Firing {
            return None;
        }
        entry.state = JobState::Firing;
        Some(&*entry)
    }

    pub fn get(&self, id: &str) -> Option<&JobEntry> {
        self.jobs.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.jobs.contains_key(id)
    }

    pub fn is_firing(&self, id: &str) -> bool {
        matches!(
            self.jobs.get(id),
            Some(JobEntry {
                state: JobState::Firing,
                ..
            })
        )
    }

    /// Ids of scheduled jobs whose deadline has passed.
    pub fn due_ids(&self, now: DateTime<FixedOffset>) -> Vec<String> {
        let mut due: Vec<String> = self
            .jobs
            .iter()
            .filter(|(_, entry)| matches!(entry.state, JobState::Scheduled(at) if at <= now))
            .map(|(id, _)| id.clone())
            .collect();
        due.sort();
        due
    }

    /// The earliest scheduled deadline, ignoring in-flight jobs.
    pub fn nearest_deadline(&self) -> Option<DateTime<FixedOffset>> {
        self.jobs
            .values()
            .filter_map(|entry| match entry.state {
                JobState::Scheduled(at) => Some(at),
                JobState::Firing => None,
            })
            .min()
    }

    /// Snapshots of all jobs, soonest deadline first.
    pub fn snapshots(&self) -> Vec<JobSnapshot> {
        let mut out: Vec<JobSnapshot> = self
            .jobs
            .iter()
            .map(|(id, entry)| {
                let (next_fire_at, firing) = match entry.state {
                    JobState::Scheduled(at) => (Some(at.timestamp()), false),
                    JobState::Firing => (None, true),
                };
                JobSnapshot {
                    task_id: id.clone(),
                    title: entry.title.clone(),
                    topic: entry.topic.clone(),
                    next_fire_at,
                    firing,
                }
            })
            .collect();
        out.sort_by(|a, b| {
            // Firing jobs (no deadline) sort last.
            let ka = (a.next_fire_at.is_none(), a.next_fire_at, &a.task_id);
            let kb = (b.next_fire_at.is_none(), b.next_fire_at, &b.task_id);
            ka.cmp(&kb)
        });
        out
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::task::NewTask;

    fn at(secs: i64) -> DateTime<FixedOffset> {
        DateTime::from_timestamp(secs, 0).unwrap().fixed_offset()
    }

    fn task(id_hint: &str) -> Task {
        let mut t = Task::from_new(
            NewTask::new(id_hint, "0 9 * * *", "hello").with_title("Test"),
            0,
        );
        // Deterministic ids keep assertions readable.
        t.id = id_hint.to_owned();
        t
    }

    fn cron(expr: &str) -> CronExpr {
        CronExpr::parse(expr).unwrap()
    }

    #[test]
    fn register_makes_job_visible() {
        let mut reg = JobRegistry::new();
        reg.register(&task("a"), cron("0 9 * * *"), at(1_000));

        assert!(reg.contains("a"));
        assert_eq!(reg.len(), 1);
        let snap = &reg.snapshots()[0];
        assert_eq!(snap.task_id, "a");
        assert_eq!(snap.title, "Test");
        assert_eq!(snap.topic, "a");
        assert_eq!(snap.next_fire_at, Some(1_000));
        assert!(!snap.firing);
    }

    #[test]
    fn register_twice_replaces_without_duplicating() {
        let mut reg = JobRegistry::new();
        reg.register(&task("a"), cron("0 9 * * *"), at(1_000));
        reg.register(&task("a"), cron("0 12 * * *"), at(2_000));

        assert_eq!(reg.len(), 1);
        assert_eq!(reg.nearest_deadline(), Some(at(2_000)));
    }

    #[test]
    fn register_during_flight_keeps_firing_state() {
        let mut reg = JobRegistry::new();
        reg.register(&task("a"), cron("0 9 * * *"), at(1_000));
        assert!(reg.begin_fire("a").is_some());

        reg.register(&task("a"), cron("0 12 * * *"), at(2_000));
        assert!(reg.is_firing("a"));
        assert_eq!(reg.nearest_deadline(), None);
    }

    #[test]
    fn unregister_reports_presence() {
        let mut reg = JobRegistry::new();
        reg.register(&task("a"), cron("0 9 * * *"), at(1_000));

        assert!(reg.unregister("a"));
        assert!(!reg.unregister("a"));
        assert!(reg.is_empty());
    }

    #[test]
    fn begin_fire_blocks_overlapping_attempts() {
        let mut reg = JobRegistry::new();
        reg.register(&task("a"), cron("0 9 * * *"), at(1_000));

        let entry = reg.begin_fire("a").expect("first fire");
        assert_eq!(entry.topic, "a");
        assert_eq!(entry.message, "hello");

        assert!(reg.begin_fire("a").is_none());
        assert!(reg.begin_fire("missing").is_none());
    }

    #[test]
    fn due_ids_returns_only_elapsed_deadlines() {
        let mut reg = JobRegistry::new();
        reg.register(&task("past"), cron("0 9 * * *"), at(500));
        reg.register(&task("exact"), cron("0 9 * * *"), at(1_000));
        reg.register(&task("future"), cron("0 9 * * *"), at(1_500));

        assert_eq!(reg.due_ids(at(1_000)), vec!["exact", "past"]);
    }

    #[test]
    fn due_ids_skips_in_flight_jobs() {
        let mut reg = JobRegistry::new();
        reg.register(&task("a"), cron("0 9 * * *"), at(500));
        reg.begin_fire("a");

        assert!(reg.due_ids(at(1_000)).is_empty());
    }

    #[test]
    fn nearest_deadline_is_minimum_over_scheduled() {
        let mut reg = JobRegistry::new();
        assert_eq!(reg.nearest_deadline(), None);

        reg.register(&task("late"), cron("0 9 * * *"), at(2_000));
        reg.register(&task("soon"), cron("0 9 * * *"), at(1_000));
        assert_eq!(reg.nearest_deadline(), Some(at(1_000)));

        reg.begin_fire("soon");
        assert_eq!(reg.nearest_deadline(), Some(at(2_000)));
    }

    #[test]
    fn reschedule_updates_deadline_and_clears_firing() {
        let mut reg = JobRegistry::new();
        reg.register(&task("a"), cron("0 9 * * *"), at(1_000));
        reg.begin_fire("a");

        assert!(reg.reschedule("a", at(3_000)));
        assert!(!reg.is_firing("a"));
        assert_eq!(reg.nearest_deadline(), Some(at(3_000)));

        assert!(!reg.reschedule("missing", at(3_000)));
    }

    #[test]
    fn snapshots_sort_soonest_first_with_firing_last() {
        let mut reg = JobRegistry::new();
        reg.register(&task("b"), cron("0 9 * * *"), at(2_000));
        reg.register(&task("a"), cron("0 9 * * *"), at(1_000));
        reg.register(&task("c"), cron("0 9 * * *"), at(500));
        reg.begin_fire("c");

        let order: Vec<String> = reg
            .snapshots()
            .into_iter()
            .map(|s| s.task_id)
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }
}
