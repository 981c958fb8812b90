//! In-memory queue store for tests, development and single-process runs.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use convoy_core::{JobId, TenantId, WorkerId};

use super::fairness::{LaneKey, TenantLanes};
use super::{
    DeadLetterEntry, Enqueued, FailureReason, QueueStats, QueueStore, ReclaimedLease,
    RetryDecision,
};
use crate::clock::{self, SharedClock};
use crate::error::QueueError;
use crate::job::{Job, JobStatus, Lease};

/// Queue store backed by a single mutex.
///
/// Every operation takes the lock once, so each transition is atomic with
/// respect to every other one.
#[derive(Debug)]
pub struct InMemoryQueueStore {
    clock: SharedClock,
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    jobs: HashMap<JobId, Stored>,
    queues: HashMap<String, QueueState>,
    dedup: HashMap<(TenantId, String), JobId>,
    next_seq: u64,
}

#[derive(Debug)]
struct Stored {
    queue: String,
    job: Job,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: TenantLanes,
    in_flight: HashSet<JobId>,
}

impl InMemoryQueueStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            state: Mutex::new(State::default()),
        }
    }

    pub fn arc(clock: SharedClock) -> Arc<Self> {
        Arc::new(Self::new(clock))
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, QueueError> {
        self.state
            .lock()
            .map_err(|_| QueueError::unavailable("in-memory store lock poisoned"))
    }
}

impl State {
    fn push_pending(&mut self, queue: &str, job: &Job) {
        self.next_seq += 1;
        let key = LaneKey {
            available_at: job.available_at,
            seq: self.next_seq,
            job_id: job.id(),
        };
        self.queues
            .entry(queue.to_string())
            .or_default()
            .pending
            .push(job.tenant_id(), key);
    }

    fn insert_pending(&mut self, queue: &str, job: Job) -> JobId {
        let id = job.id();
        if let Some(key) = job.dedup_key() {
            self.dedup.insert(key, id);
        }
        self.push_pending(queue, &job);
        self.jobs.insert(
            id,
            Stored {
                queue: queue.to_string(),
                job,
            },
        );
        id
    }

    /// Existing live job for an inbound dedup key, if any.
    fn live_duplicate(&self, key: &(TenantId, String)) -> Option<JobId> {
        let id = self.dedup.get(key)?;
        let stored = self.jobs.get(id)?;
        (stored.job.status != JobStatus::DeadLettered).then_some(*id)
    }

    fn release_dedup(&mut self, job: &Job) {
        if let Some(key) = job.dedup_key() {
            if self.dedup.get(&key) == Some(&job.id()) {
                self.dedup.remove(&key);
            }
        }
    }

    fn leased_mut(
        &mut self,
        job_id: JobId,
        worker: &WorkerId,
        now: DateTime<Utc>,
    ) -> Result<&mut Stored, QueueError> {
        let stored = self
            .jobs
            .get_mut(&job_id)
            .ok_or(QueueError::NotFound(job_id))?;
        let held = stored.job.status == JobStatus::InFlight
            && stored
                .job
                .lease
                .as_ref()
                .is_some_and(|lease| lease.is_held_by(worker, now));
        if !held {
            return Err(QueueError::NotInFlight(job_id));
        }
        Ok(stored)
    }

    fn owned(&self, tenant: &TenantId, job_id: JobId) -> Result<&Stored, QueueError> {
        let stored = self.jobs.get(&job_id).ok_or(QueueError::NotFound(job_id))?;
        if stored.job.tenant_id() != tenant {
            return Err(QueueError::TenantIsolation);
        }
        Ok(stored)
    }

    fn owned_dead_letter(&self, tenant: &TenantId, job_id: JobId) -> Result<&Stored, QueueError> {
        let stored = self.owned(tenant, job_id)?;
        if stored.job.status != JobStatus::DeadLettered {
            return Err(QueueError::InvalidState {
                job_id,
                status: stored.job.status,
            });
        }
        Ok(stored)
    }

    fn leave_in_flight(&mut self, queue: &str, job_id: JobId) {
        if let Some(q) = self.queues.get_mut(queue) {
            q.in_flight.remove(&job_id);
        }
    }
}

impl QueueStore for InMemoryQueueStore {
    fn enqueue(
        &self,
        queue: &str,
        mut job: Job,
        available_at: DateTime<Utc>,
    ) -> Result<Enqueued, QueueError> {
        let mut state = self.lock()?;

        if let Some(key) = job.dedup_key() {
            if let Some(existing) = state.live_duplicate(&key) {
                tracing::debug!(job_id = %existing, tenant_id = %key.0, "duplicate inbound job");
                return Ok(Enqueued::Existing(existing));
            }
        }

        job.status = JobStatus::Pending;
        job.lease = None;
        job.available_at = available_at.max(job.enqueued_at());
        let id = state.insert_pending(queue, job);
        Ok(Enqueued::Created(id))
    }

    fn claim(
        &self,
        queue: &str,
        worker: &WorkerId,
        lease: Duration,
    ) -> Result<Option<Job>, QueueError> {
        let now = self.clock.now();
        let mut state = self.lock()?;

        let Some(q) = state.queues.get_mut(queue) else {
            return Ok(None);
        };
        let Some((_, key)) = q.pending.pop_eligible(now) else {
            return Ok(None);
        };
        q.in_flight.insert(key.job_id);

        let stored = state
            .jobs
            .get_mut(&key.job_id)
            .ok_or(QueueError::NotFound(key.job_id))?;
        stored.job.status = JobStatus::InFlight;
        stored.job.lease = Some(Lease {
            worker_id: worker.clone(),
            expires_at: clock::after(now, lease),
        });
        Ok(Some(stored.job.clone()))
    }

    fn ack(&self, job_id: JobId, worker: &WorkerId) -> Result<(), QueueError> {
        let now = self.clock.now();
        let mut state = self.lock()?;

        let stored = state.leased_mut(job_id, worker, now)?;
        stored.job.status = JobStatus::Completed;
        stored.job.lease = None;
        stored.job.finished_at = Some(now);
        let queue = stored.queue.clone();
        state.leave_in_flight(&queue, job_id);
        Ok(())
    }

    fn fail(
        &self,
        job_id: JobId,
        worker: &WorkerId,
        reason: &FailureReason,
        next: &RetryDecision,
    ) -> Result<Job, QueueError> {
        let now = self.clock.now();
        let mut state = self.lock()?;

        let stored = state.leased_mut(job_id, worker, now)?;
        if let RetryDecision::Retry { attempt, .. } = next {
            if *attempt <= stored.job.attempt {
                return Err(QueueError::InvalidState {
                    job_id,
                    status: stored.job.status,
                });
            }
        }

        stored.job.lease = None;
        match next {
            RetryDecision::Retry {
                attempt,
                available_at,
            } => {
                stored.job.status = JobStatus::Pending;
                stored.job.attempt = *attempt;
                stored.job.available_at = *available_at;
                stored.job.last_error = Some(reason.detail.clone());
            }
            RetryDecision::DeadLetter { reason } => {
                stored.job.status = JobStatus::DeadLettered;
                stored.job.last_error = Some(reason.clone());
                stored.job.finished_at = Some(now);
            }
        }
        let job = stored.job.clone();
        let queue = stored.queue.clone();

        state.leave_in_flight(&queue, job_id);
        match next {
            RetryDecision::Retry { .. } => state.push_pending(&queue, &job),
            RetryDecision::DeadLetter { .. } => state.release_dedup(&job),
        }
        Ok(job)
    }

    fn reclaim_expired_leases(&self, queue: &str) -> Result<Vec<ReclaimedLease>, QueueError> {
        let now = self.clock.now();
        let mut state = self.lock()?;

        let in_flight: Vec<JobId> = match state.queues.get(queue) {
            Some(q) => q.in_flight.iter().copied().collect(),
            None => return Ok(Vec::new()),
        };

        let mut reclaimed = Vec::new();
        for job_id in in_flight {
            let Some(stored) = state.jobs.get_mut(&job_id) else {
                continue;
            };
            let expired = stored
                .job
                .lease
                .as_ref()
                .filter(|lease| lease.is_expired(now))
                .cloned();
            let Some(lease) = expired else {
                continue;
            };

            stored.job.status = JobStatus::Pending;
            stored.job.lease = None;
            stored.job.available_at = now;
            let job = stored.job.clone();

            state.leave_in_flight(queue, job_id);
            state.push_pending(queue, &job);
            reclaimed.push(ReclaimedLease {
                job_id,
                tenant_id: job.tenant_id().clone(),
                worker_id: lease.worker_id,
            });
        }
        Ok(reclaimed)
    }

    fn get(&self, tenant: &TenantId, job_id: JobId) -> Result<Option<Job>, QueueError> {
        let state = self.lock()?;
        match state.owned(tenant, job_id) {
            Ok(stored) => Ok(Some(stored.job.clone())),
            Err(QueueError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn list_dead_letters(
        &self,
        tenant: &TenantId,
        limit: usize,
    ) -> Result<Vec<DeadLetterEntry>, QueueError> {
        let state = self.lock()?;
        let mut entries: Vec<DeadLetterEntry> = state
            .jobs
            .values()
            .filter(|s| s.job.status == JobStatus::DeadLettered && s.job.tenant_id() == tenant)
            .map(|s| DeadLetterEntry::from_job(s.job.clone()))
            .collect();

        entries.sort_by_key(|e| (e.dead_lettered_at, e.job.id()));
        entries.truncate(limit);
        Ok(entries)
    }

    fn replay_dead_letter(&self, tenant: &TenantId, job_id: JobId) -> Result<JobId, QueueError> {
        let now = self.clock.now();
        let mut state = self.lock()?;

        let stored = state.owned_dead_letter(tenant, job_id)?;
        let queue = stored.queue.clone();
        let replay = stored.job.replayed(now);

        if let Some(key) = replay.dedup_key() {
            if let Some(existing) = state.live_duplicate(&key) {
                return Ok(existing);
            }
        }
        let id = state.insert_pending(&queue, replay);
        tracing::info!(job_id = %job_id, replay_id = %id, tenant_id = %tenant, "dead letter replayed");
        Ok(id)
    }

    fn delete_dead_letter(&self, tenant: &TenantId, job_id: JobId) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        state.owned_dead_letter(tenant, job_id)?;
        state.jobs.remove(&job_id);
        Ok(())
    }

    fn stats(&self, tenant: &TenantId) -> Result<QueueStats, QueueError> {
        let state = self.lock()?;
        let mut stats = QueueStats::default();
        for stored in state.jobs.values().filter(|s| s.job.tenant_id() == tenant) {
            match stored.job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::InFlight => stats.in_flight += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::DeadLettered => stats.dead_lettered += 1,
            }
        }
        Ok(stats)
    }

    fn depth(&self, queue: &str) -> Result<usize, QueueError> {
        let state = self.lock()?;
        Ok(state.queues.get(queue).map_or(0, |q| q.pending.len()))
    }

    fn purge_completed(&self, older_than: DateTime<Utc>) -> Result<usize, QueueError> {
        let mut state = self.lock()?;

        let purge: Vec<JobId> = state
            .jobs
            .values()
            .filter(|s| {
                s.job.status == JobStatus::Completed
                    && s.job.finished_at.is_some_and(|at| at < older_than)
            })
            .map(|s| s.job.id())
            .collect();

        for id in &purge {
            if let Some(stored) = state.jobs.remove(id) {
                state.release_dedup(&stored.job);
            }
        }
        Ok(purge.len())
    }
}
