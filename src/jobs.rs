//! In-memory registry of knowledge reload jobs.
//!
//! A job moves `queued → running → succeeded | failed`, or to `cancelled`
//! from either active state. Finished jobs are kept for inspection up to a
//! configured limit; the oldest finished jobs are evicted first and active
//! jobs are never evicted.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::task::AbortHandle;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }
}

/// Public view of a reload job.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: Uuid,
    /// The knowledge file whose status this job settles; `None` for reloads
    /// triggered by a deletion.
    pub file_id: Option<i64>,
    pub filename: String,
    pub state: JobState,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

struct JobEntry {
    seq: u64,
    info: JobInfo,
    abort: Option<AbortHandle>,
    /// Set once the task starts writing its outcome; cancellation is refused
    /// from then on.
    settling: bool,
}

#[derive(Default)]
struct Jobs {
    next_seq: u64,
    entries: HashMap<Uuid, JobEntry>,
}

pub struct JobRegistry {
    jobs: Mutex<Jobs>,
    history: usize,
}

impl JobRegistry {
    pub fn new(history: usize) -> Self {
        Self {
            jobs: Mutex::new(Jobs::default()),
            history,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Jobs> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a new queued job.
    pub fn register(&self, file_id: Option<i64>, filename: &str) -> JobInfo {
        let info = JobInfo {
            id: Uuid::new_v4(),
            file_id,
            filename: filename.to_string(),
            state: JobState::Queued,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };

        let mut jobs = self.lock();
        let seq = jobs.next_seq;
        jobs.next_seq += 1;
        jobs.entries.insert(
            info.id,
            JobEntry {
                seq,
                info: info.clone(),
                abort: None,
                settling: false,
            },
        );
        info
    }

    /// Attach the task handle used for cancellation.
    pub fn attach(&self, id: Uuid, handle: AbortHandle) {
        if let Some(entry) = self.lock().entries.get_mut(&id) {
            entry.abort = Some(handle);
        }
    }

    /// `queued → running`. Returns false if the job is gone or not queued.
    pub fn mark_running(&self, id: Uuid) -> bool {
        let mut jobs = self.lock();
        match jobs.entries.get_mut(&id) {
            Some(entry) if entry.info.state == JobState::Queued => {
                entry.info.state = JobState::Running;
                entry.info.started_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }

    /// Claim a running job's outcome for its task. Returns false if the job
    /// was cancelled (or is otherwise not running); the task must then leave
    /// every side effect to the canceller.
    pub fn begin_settling(&self, id: Uuid) -> bool {
        let mut jobs = self.lock();
        match jobs.entries.get_mut(&id) {
            Some(entry) if entry.info.state == JobState::Running && !entry.settling => {
                entry.settling = true;
                entry.abort = None;
                true
            }
            _ => false,
        }
    }

    /// Settle an active job. Returns false, leaving the job untouched, if it
    /// is unknown or already finished (a cancelled job stays cancelled).
    ///
    /// Once this returns true the job can no longer be cancelled.
    pub fn finish(&self, id: Uuid, outcome: Result<(), String>) -> bool {
        let mut jobs = self.lock();
        let Some(entry) = jobs.entries.get_mut(&id) else {
            return false;
        };
        if entry.info.state.is_finished() {
            return false;
        }
        match outcome {
            Ok(()) => entry.info.state = JobState::Succeeded,
            Err(message) => {
                entry.info.state = JobState::Failed;
                entry.info.error = Some(message);
            }
        }
        entry.info.finished_at = Some(Utc::now());
        entry.abort = None;
        self.evict(&mut jobs);
        true
    }

    /// Cancel an active job and abort its task.
    pub fn cancel(&self, id: Uuid) -> ApiResult<JobInfo> {
        let mut jobs = self.lock();
        let entry = jobs
            .entries
            .get_mut(&id)
            .ok_or_else(|| ApiError::NotFound("Job not found".to_string()))?;
        if entry.info.state.is_finished() {
            return Err(ApiError::Conflict(format!(
                "Job already {}",
                entry.info.state.as_str()
            )));
        }
        if entry.settling {
            return Err(ApiError::Conflict("Job is already finishing".to_string()));
        }

        if let Some(handle) = entry.abort.take() {
            handle.abort();
        }
        entry.info.state = JobState::Cancelled;
        entry.info.error = Some("cancelled".to_string());
        entry.info.finished_at = Some(Utc::now());
        let info = entry.info.clone();

        self.evict(&mut jobs);
        Ok(info)
    }

    pub fn get(&self, id: Uuid) -> Option<JobInfo> {
        self.lock().entries.get(&id).map(|e| e.info.clone())
    }

    /// All known jobs, newest first.
    pub fn list(&self) -> Vec<JobInfo> {
        let jobs = self.lock();
        let mut entries: Vec<&JobEntry> = jobs.entries.values().collect();
        entries.sort_by(|a, b| b.seq.cmp(&a.seq));
        entries.into_iter().map(|e| e.info.clone()).collect()
    }

    fn evict(&self, jobs: &mut Jobs) {
        let mut finished: Vec<(u64, Uuid)> = jobs
            .entries
            .values()
            .filter(|e| e.info.state.is_finished())
            .map(|e| (e.seq, e.info.id))
            .collect();
        if finished.len() <= self.history {
            return;
        }
        finished.sort();
        let excess = finished.len() - self.history;
        for (_, id) in finished.into_iter().take(excess) {
            jobs.entries.remove(&id);
        }
    }
}
