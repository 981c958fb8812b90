//! Redis-backed queue store (durable, shared between processes).
//!
//! ## Layout
//!
//! All keys live under a configurable prefix (default `convoy`).
//!
//! - `{p}:job:{id}`: hash with the immutable job record (`data`, JSON) and
//!   its lifecycle fields (`status`, `attempt`, `available_at`,
//!   `lease_worker`, `lease_expires`, `last_error`, `finished_at`)
//! - `{p}:q:{queue}:lane:{tenant}`: zset of pending job ids scored by
//!   `available_at` (ms)
//! - `{p}:q:{queue}:ring` / `:ring_set`: round-robin list of tenants with
//!   pending jobs, plus a set for membership checks
//! - `{p}:q:{queue}:inflight`: zset of leased job ids scored by lease expiry
//! - `{p}:dedup:{tenant}`: hash of inbound external id -> job id
//! - `{p}:tenant:{tenant}:jobs` / `:dead`: per-tenant job set and dead-letter zset
//! - `{p}:completed`: zset of completed job ids scored by completion time
//!
//! Every transition runs as a single Lua script, so it is atomic with
//! respect to every other client.
//!
//! Scripts build lane and job keys from prefixes passed in ARGV, and the
//! fail and purge scripts follow the dedup hash named on the job record, so
//! not every key a script touches is declared in KEYS. The store therefore
//! targets a standalone Redis (or a single primary); Redis Cluster is not
//! supported.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use convoy_core::{JobId, TenantId, WorkerId};
use redis::{Commands, Script};
use tracing::{error, instrument};

use super::{
    DeadLetterEntry, Enqueued, FailureReason, QueueStats, QueueStore, ReclaimedLease,
    RetryDecision,
};
use crate::clock::{self, SharedClock};
use crate::error::QueueError;
use crate::job::{Job, JobStatus, Lease};

const DEFAULT_PREFIX: &str = "convoy";

const ENQUEUE: &str = r#"
-- KEYS: job, lane, ring, ring_set, tenant_jobs, dedup
-- ARGV: id, data, queue, tenant, available_ms, has_dedup, job_prefix, external_id
local dedup, field = '', ''
if ARGV[6] == '1' then
  local existing = redis.call('HGET', KEYS[6], ARGV[8])
  if existing then
    local status = redis.call('HGET', ARGV[7] .. existing, 'status')
    if status and status ~= 'dead_lettered' then
      return {0, existing}
    end
  end
  redis.call('HSET', KEYS[6], ARGV[8], ARGV[1])
  dedup, field = KEYS[6], ARGV[8]
end
redis.call('HSET', KEYS[1], 'data', ARGV[2], 'queue', ARGV[3], 'tenant', ARGV[4],
  'status', 'pending', 'attempt', '0', 'available_at', ARGV[5],
  'dedup', dedup, 'dedup_field', field)
redis.call('ZADD', KEYS[2], ARGV[5], ARGV[1])
if redis.call('SADD', KEYS[4], ARGV[4]) == 1 then
  redis.call('RPUSH', KEYS[3], ARGV[4])
end
redis.call('SADD', KEYS[5], ARGV[1])
return {1, ARGV[1]}
"#;

const CLAIM: &str = r#"
-- KEYS: ring, ring_set, inflight
-- ARGV: now_ms, lease_expires_ms, worker, lane_prefix, job_prefix
local tenants = redis.call('LRANGE', KEYS[1], 0, -1)
for _, tenant in ipairs(tenants) do
  local lane = ARGV[4] .. tenant
  local head = redis.call('ZRANGE', lane, 0, 0, 'WITHSCORES')
  if head[1] and tonumber(head[2]) <= tonumber(ARGV[1]) then
    local id = head[1]
    redis.call('ZREM', lane, id)
    redis.call('LREM', KEYS[1], 1, tenant)
    if redis.call('ZCARD', lane) > 0 then
      redis.call('RPUSH', KEYS[1], tenant)
    else
      redis.call('SREM', KEYS[2], tenant)
    end
    redis.call('ZADD', KEYS[3], ARGV[2], id)
    redis.call('HSET', ARGV[5] .. id, 'status', 'in_flight',
      'lease_worker', ARGV[3], 'lease_expires', ARGV[2])
    return id
  end
end
return false
"#;

const ACK: &str = r#"
-- KEYS: job, inflight, completed
-- ARGV: id, worker, now_ms
local st = redis.call('HMGET', KEYS[1], 'status', 'lease_worker', 'lease_expires')
if not st[1] then return -1 end
if st[1] ~= 'in_flight' or st[2] ~= ARGV[2] or tonumber(st[3]) <= tonumber(ARGV[3]) then
  return 0
end
redis.call('HDEL', KEYS[1], 'lease_worker', 'lease_expires')
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('HSET', KEYS[1], 'status', 'completed', 'finished_at', ARGV[3])
redis.call('ZADD', KEYS[3], ARGV[3], ARGV[1])
return 1
"#;

const FAIL: &str = r#"
-- KEYS: job, inflight, lane, ring, ring_set, dead
-- ARGV: id, worker, now_ms, next ('retry' | 'dead'), last_error, attempt,
--       available_ms, tenant
local st = redis.call('HMGET', KEYS[1], 'status', 'lease_worker', 'lease_expires',
  'attempt', 'dedup', 'dedup_field')
if not st[1] then return -1 end
if st[1] ~= 'in_flight' or st[2] ~= ARGV[2] or tonumber(st[3]) <= tonumber(ARGV[3]) then
  return 0
end
if ARGV[4] == 'retry' and tonumber(ARGV[6]) <= tonumber(st[4]) then
  return -2
end
redis.call('HDEL', KEYS[1], 'lease_worker', 'lease_expires')
redis.call('ZREM', KEYS[2], ARGV[1])
if ARGV[4] == 'retry' then
  redis.call('HSET', KEYS[1], 'status', 'pending', 'attempt', ARGV[6],
    'available_at', ARGV[7], 'last_error', ARGV[5])
  redis.call('ZADD', KEYS[3], ARGV[7], ARGV[1])
  if redis.call('SADD', KEYS[5], ARGV[8]) == 1 then
    redis.call('RPUSH', KEYS[4], ARGV[8])
  end
else
  redis.call('HSET', KEYS[1], 'status', 'dead_lettered', 'last_error', ARGV[5],
    'finished_at', ARGV[3])
  redis.call('ZADD', KEYS[6], ARGV[3], ARGV[1])
  if st[5] and st[5] ~= '' and st[6] and redis.call('HGET', st[5], st[6]) == ARGV[1] then
    redis.call('HDEL', st[5], st[6])
  end
end
return 1
"#;

const RECLAIM: &str = r#"
-- KEYS: inflight, ring, ring_set
-- ARGV: now_ms, lane_prefix, job_prefix
local expired = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
local out = {}
for _, id in ipairs(expired) do
  local job = ARGV[3] .. id
  local st = redis.call('HMGET', job, 'tenant', 'lease_worker')
  redis.call('ZREM', KEYS[1], id)
  if st[1] then
    redis.call('HSET', job, 'status', 'pending', 'available_at', ARGV[1])
    redis.call('HDEL', job, 'lease_worker', 'lease_expires')
    redis.call('ZADD', ARGV[2] .. st[1], ARGV[1], id)
    if redis.call('SADD', KEYS[3], st[1]) == 1 then
      redis.call('RPUSH', KEYS[2], st[1])
    end
    table.insert(out, id)
    table.insert(out, st[1])
    table.insert(out, st[2] or '')
  end
end
return out
"#;

const DELETE_DEAD: &str = r#"
-- KEYS: job, dead, tenant_jobs
-- ARGV: id
local status = redis.call('HGET', KEYS[1], 'status')
if not status then return -1 end
if status ~= 'dead_lettered' then return 0 end
redis.call('DEL', KEYS[1])
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('SREM', KEYS[3], ARGV[1])
return 1
"#;

const DEPTH: &str = r#"
-- KEYS: ring
-- ARGV: lane_prefix
local total = 0
for _, tenant in ipairs(redis.call('LRANGE', KEYS[1], 0, -1)) do
  total = total + redis.call('ZCARD', ARGV[1] .. tenant)
end
return total
"#;

const PURGE: &str = r#"
-- KEYS: completed
-- ARGV: cutoff_ms (exclusive), job_prefix, tenant_prefix
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', '(' .. ARGV[1])
for _, id in ipairs(ids) do
  local job = ARGV[2] .. id
  local st = redis.call('HMGET', job, 'tenant', 'dedup', 'dedup_field')
  if st[2] and st[2] ~= '' and st[3] and redis.call('HGET', st[2], st[3]) == id then
    redis.call('HDEL', st[2], st[3])
  end
  if st[1] then
    redis.call('SREM', ARGV[3] .. st[1] .. ':jobs', id)
  end
  redis.call('DEL', job)
  redis.call('ZREM', KEYS[1], id)
end
return #ids
"#;

/// Queue store on Redis.
#[derive(Clone)]
pub struct RedisQueueStore {
    client: Arc<redis::Client>,
    prefix: String,
    clock: SharedClock,
    scripts: Arc<Scripts>,
}

struct Scripts {
    enqueue: Script,
    claim: Script,
    ack: Script,
    fail: Script,
    reclaim: Script,
    delete_dead: Script,
    depth: Script,
    purge: Script,
}

impl Scripts {
    fn load() -> Self {
        Self {
            enqueue: Script::new(ENQUEUE),
            claim: Script::new(CLAIM),
            ack: Script::new(ACK),
            fail: Script::new(FAIL),
            reclaim: Script::new(RECLAIM),
            delete_dead: Script::new(DELETE_DEAD),
            depth: Script::new(DEPTH),
            purge: Script::new(PURGE),
        }
    }
}

/// Script status codes.
const OK: i64 = 1;
const WRONG_STATE: i64 = 0;
const STALE_ATTEMPT: i64 = -2;

fn unavailable(err: redis::RedisError) -> QueueError {
    error!(error = %err, "redis command failed");
    QueueError::StoreUnavailable(err.to_string())
}

fn ms(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn from_ms(raw: &str) -> Option<DateTime<Utc>> {
    raw.parse::<i64>()
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
}

impl RedisQueueStore {
    /// Open a store at `redis_url` (e.g. `redis://localhost:6379`).
    pub fn new(redis_url: impl AsRef<str>, clock: SharedClock) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(unavailable)?;
        Ok(Self {
            client: Arc::new(client),
            prefix: DEFAULT_PREFIX.to_string(),
            clock,
            scripts: Arc::new(Scripts::load()),
        })
    }

    /// Namespace all keys under `prefix` (tests use a random one).
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Round-trip a PING.
    pub fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.conn()?;
        redis::cmd("PING")
            .query::<String>(&mut conn)
            .map(|_| ())
            .map_err(unavailable)
    }

    fn conn(&self) -> Result<redis::Connection, QueueError> {
        self.client.get_connection().map_err(unavailable)
    }

    fn job_prefix(&self) -> String {
        format!("{}:job:", self.prefix)
    }

    fn job_key(&self, id: JobId) -> String {
        format!("{}:job:{id}", self.prefix)
    }

    fn queue_key(&self, queue: &str, suffix: &str) -> String {
        format!("{}:q:{queue}:{suffix}", self.prefix)
    }

    fn lane_prefix(&self, queue: &str) -> String {
        format!("{}:q:{queue}:lane:", self.prefix)
    }

    fn tenant_prefix(&self) -> String {
        format!("{}:tenant:", self.prefix)
    }

    fn tenant_key(&self, tenant: &TenantId, suffix: &str) -> String {
        format!("{}:tenant:{tenant}:{suffix}", self.prefix)
    }

    /// One hash per tenant, keyed by external id, so ids containing the
    /// separator cannot collide across tenants.
    fn dedup_key(&self, tenant: &TenantId) -> String {
        format!("{}:dedup:{tenant}", self.prefix)
    }

    fn completed_key(&self) -> String {
        format!("{}:completed", self.prefix)
    }

    fn load(
        &self,
        conn: &mut redis::Connection,
        id: JobId,
    ) -> Result<Option<(String, Job)>, QueueError> {
        let fields: HashMap<String, String> =
            conn.hgetall(self.job_key(id)).map_err(unavailable)?;
        if fields.is_empty() {
            return Ok(None);
        }
        decode(&fields).map(Some)
    }

    /// Queue and tenant of a job (both immutable).
    fn placement(
        &self,
        conn: &mut redis::Connection,
        id: JobId,
    ) -> Result<(String, TenantId), QueueError> {
        let (queue, tenant): (Option<String>, Option<String>) = conn
            .hget(self.job_key(id), &["queue", "tenant"])
            .map_err(unavailable)?;
        match (queue, tenant) {
            (Some(queue), Some(tenant)) => Ok((queue, TenantId::new(tenant))),
            _ => Err(QueueError::NotFound(id)),
        }
    }

    fn status(&self, conn: &mut redis::Connection, id: JobId) -> Result<JobStatus, QueueError> {
        let raw: Option<String> = conn
            .hget(self.job_key(id), "status")
            .map_err(unavailable)?;
        let raw = raw.ok_or(QueueError::NotFound(id))?;
        raw.parse()
            .map_err(|_| QueueError::unavailable(format!("corrupt status {raw:?} on job {id}")))
    }

    fn check(
        &self,
        conn: &mut redis::Connection,
        code: i64,
        id: JobId,
        on_wrong_state: impl FnOnce(JobStatus) -> QueueError,
    ) -> Result<(), QueueError> {
        match code {
            OK => Ok(()),
            WRONG_STATE => Err(on_wrong_state(self.status(conn, id)?)),
            _ => Err(QueueError::NotFound(id)),
        }
    }

    fn enqueue_on(
        &self,
        conn: &mut redis::Connection,
        queue: &str,
        job: &Job,
        available_at: DateTime<Utc>,
    ) -> Result<Enqueued, QueueError> {
        let data = serde_json::to_string(job)
            .map_err(|e| QueueError::invalid(format!("cannot encode job: {e}")))?;
        let tenant = job.tenant_id();
        let (has_dedup, external_id) = match job.dedup_key() {
            Some((_, ext)) => ("1", ext),
            None => ("0", String::new()),
        };

        let (code, id): (i64, String) = self
            .scripts
            .enqueue
            .key(self.job_key(job.id()))
            .key(format!("{}{tenant}", self.lane_prefix(queue)))
            .key(self.queue_key(queue, "ring"))
            .key(self.queue_key(queue, "ring_set"))
            .key(self.tenant_key(tenant, "jobs"))
            .key(self.dedup_key(tenant))
            .arg(job.id().to_string())
            .arg(data)
            .arg(queue)
            .arg(tenant.as_str())
            .arg(ms(available_at))
            .arg(has_dedup)
            .arg(self.job_prefix())
            .arg(external_id)
            .invoke(conn)
            .map_err(unavailable)?;

        let id: JobId = id
            .parse()
            .map_err(|_| QueueError::unavailable(format!("corrupt job id {id:?}")))?;
        Ok(if code == OK {
            Enqueued::Created(id)
        } else {
            Enqueued::Existing(id)
        })
    }
}

/// Rebuild a job from its hash: immutable record from `data`, lifecycle
/// from the individual fields.
fn decode(fields: &HashMap<String, String>) -> Result<(String, Job), QueueError> {
    let corrupt = |what: &str| QueueError::unavailable(format!("corrupt job record: {what}"));

    let data = fields.get("data").ok_or_else(|| corrupt("missing data"))?;
    let mut job: Job = serde_json::from_str(data).map_err(|e| corrupt(&e.to_string()))?;
    let queue = fields.get("queue").cloned().ok_or_else(|| corrupt("missing queue"))?;

    if let Some(status) = fields.get("status") {
        job.status = status.parse().map_err(|_| corrupt("status"))?;
    }
    if let Some(attempt) = fields.get("attempt") {
        job.attempt = attempt.parse().map_err(|_| corrupt("attempt"))?;
    }
    if let Some(at) = fields.get("available_at") {
        job.available_at = from_ms(at).ok_or_else(|| corrupt("available_at"))?;
    }
    job.lease = match (fields.get("lease_worker"), fields.get("lease_expires")) {
        (Some(worker), Some(expires)) => Some(Lease {
            worker_id: WorkerId::new(worker.as_str()),
            expires_at: from_ms(expires).ok_or_else(|| corrupt("lease_expires"))?,
        }),
        _ => None,
    };
    job.last_error = fields.get("last_error").cloned();
    job.finished_at = fields.get("finished_at").and_then(|at| from_ms(at));

    Ok((queue, job))
}

impl QueueStore for RedisQueueStore {
    #[instrument(skip(self, job), fields(job_id = %job.id(), tenant_id = %job.tenant_id()), err)]
    fn enqueue(
        &self,
        queue: &str,
        job: Job,
        available_at: DateTime<Utc>,
    ) -> Result<Enqueued, QueueError> {
        let mut conn = self.conn()?;
        let available_at = available_at.max(job.enqueued_at());
        self.enqueue_on(&mut conn, queue, &job, available_at)
    }

    fn claim(
        &self,
        queue: &str,
        worker: &WorkerId,
        lease: Duration,
    ) -> Result<Option<Job>, QueueError> {
        let now = self.clock.now();
        let mut conn = self.conn()?;

        let claimed: Option<String> = self
            .scripts
            .claim
            .key(self.queue_key(queue, "ring"))
            .key(self.queue_key(queue, "ring_set"))
            .key(self.queue_key(queue, "inflight"))
            .arg(ms(now))
            .arg(ms(clock::after(now, lease)))
            .arg(worker.as_str())
            .arg(self.lane_prefix(queue))
            .arg(self.job_prefix())
            .invoke(&mut conn)
            .map_err(unavailable)?;

        let Some(raw) = claimed else {
            return Ok(None);
        };
        let id: JobId = raw
            .parse()
            .map_err(|_| QueueError::unavailable(format!("corrupt job id {raw:?}")))?;
        let (_, job) = self
            .load(&mut conn, id)?
            .ok_or(QueueError::NotFound(id))?;
        Ok(Some(job))
    }

    fn ack(&self, job_id: JobId, worker: &WorkerId) -> Result<(), QueueError> {
        let now = self.clock.now();
        let mut conn = self.conn()?;
        let (queue, _) = self.placement(&mut conn, job_id)?;

        let code: i64 = self
            .scripts
            .ack
            .key(self.job_key(job_id))
            .key(self.queue_key(&queue, "inflight"))
            .key(self.completed_key())
            .arg(job_id.to_string())
            .arg(worker.as_str())
            .arg(ms(now))
            .invoke(&mut conn)
            .map_err(unavailable)?;

        match code {
            OK => Ok(()),
            WRONG_STATE => Err(QueueError::NotInFlight(job_id)),
            _ => Err(QueueError::NotFound(job_id)),
        }
    }

    fn fail(
        &self,
        job_id: JobId,
        worker: &WorkerId,
        reason: &FailureReason,
        next: &RetryDecision,
    ) -> Result<Job, QueueError> {
        let now = self.clock.now();
        let mut conn = self.conn()?;
        let (queue, tenant) = self.placement(&mut conn, job_id)?;

        let (step, last_error, attempt, available_ms) = match next {
            RetryDecision::Retry {
                attempt,
                available_at,
            } => ("retry", reason.detail.as_str(), *attempt, ms(*available_at)),
            RetryDecision::DeadLetter { reason: why } => ("dead", why.as_str(), 0, 0),
        };

        let code: i64 = self
            .scripts
            .fail
            .key(self.job_key(job_id))
            .key(self.queue_key(&queue, "inflight"))
            .key(format!("{}{tenant}", self.lane_prefix(&queue)))
            .key(self.queue_key(&queue, "ring"))
            .key(self.queue_key(&queue, "ring_set"))
            .key(self.tenant_key(&tenant, "dead"))
            .arg(job_id.to_string())
            .arg(worker.as_str())
            .arg(ms(now))
            .arg(step)
            .arg(last_error)
            .arg(attempt)
            .arg(available_ms)
            .arg(tenant.as_str())
            .invoke(&mut conn)
            .map_err(unavailable)?;

        match code {
            OK => {}
            WRONG_STATE => return Err(QueueError::NotInFlight(job_id)),
            STALE_ATTEMPT => {
                return Err(QueueError::InvalidState {
                    job_id,
                    status: JobStatus::InFlight,
                });
            }
            _ => return Err(QueueError::NotFound(job_id)),
        }
        let (_, job) = self
            .load(&mut conn, job_id)?
            .ok_or(QueueError::NotFound(job_id))?;
        Ok(job)
    }

    fn reclaim_expired_leases(&self, queue: &str) -> Result<Vec<ReclaimedLease>, QueueError> {
        let now = self.clock.now();
        let mut conn = self.conn()?;

        let flat: Vec<String> = self
            .scripts
            .reclaim
            .key(self.queue_key(queue, "inflight"))
            .key(self.queue_key(queue, "ring"))
            .key(self.queue_key(queue, "ring_set"))
            .arg(ms(now))
            .arg(self.lane_prefix(queue))
            .arg(self.job_prefix())
            .invoke(&mut conn)
            .map_err(unavailable)?;

        flat.chunks_exact(3)
            .map(|chunk| {
                let job_id = chunk[0]
                    .parse()
                    .map_err(|_| QueueError::unavailable(format!("corrupt job id {:?}", chunk[0])))?;
                Ok(ReclaimedLease {
                    job_id,
                    tenant_id: TenantId::new(chunk[1].as_str()),
                    worker_id: WorkerId::new(chunk[2].as_str()),
                })
            })
            .collect()
    }

    fn get(&self, tenant: &TenantId, job_id: JobId) -> Result<Option<Job>, QueueError> {
        let mut conn = self.conn()?;
        match self.load(&mut conn, job_id)? {
            Some((_, job)) if job.tenant_id() == tenant => Ok(Some(job)),
            Some(_) => Err(QueueError::TenantIsolation),
            None => Ok(None),
        }
    }

    fn list_dead_letters(
        &self,
        tenant: &TenantId,
        limit: usize,
    ) -> Result<Vec<DeadLetterEntry>, QueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn()?;
        let stop = isize::try_from(limit).unwrap_or(isize::MAX) - 1;
        let ids: Vec<String> = conn
            .zrange(self.tenant_key(tenant, "dead"), 0, stop)
            .map_err(unavailable)?;

        let mut entries = Vec::with_capacity(ids.len());
        for raw in ids {
            let Ok(id) = raw.parse::<JobId>() else {
                continue;
            };
            if let Some((_, job)) = self.load(&mut conn, id)? {
                entries.push(DeadLetterEntry::from_job(job));
            }
        }
        Ok(entries)
    }

    fn replay_dead_letter(&self, tenant: &TenantId, job_id: JobId) -> Result<JobId, QueueError> {
        let now = self.clock.now();
        let mut conn = self.conn()?;

        let (queue, job) = self
            .load(&mut conn, job_id)?
            .ok_or(QueueError::NotFound(job_id))?;
        if job.tenant_id() != tenant {
            return Err(QueueError::TenantIsolation);
        }
        if job.status() != JobStatus::DeadLettered {
            return Err(QueueError::InvalidState {
                job_id,
                status: job.status(),
            });
        }

        let replay = job.replayed(now);
        let id = self.enqueue_on(&mut conn, &queue, &replay, now)?.id();
        tracing::info!(job_id = %job_id, replay_id = %id, tenant_id = %tenant, "dead letter replayed");
        Ok(id)
    }

    fn delete_dead_letter(&self, tenant: &TenantId, job_id: JobId) -> Result<(), QueueError> {
        let mut conn = self.conn()?;
        let (_, owner) = self.placement(&mut conn, job_id)?;
        if &owner != tenant {
            return Err(QueueError::TenantIsolation);
        }

        let code: i64 = self
            .scripts
            .delete_dead
            .key(self.job_key(job_id))
            .key(self.tenant_key(tenant, "dead"))
            .key(self.tenant_key(tenant, "jobs"))
            .arg(job_id.to_string())
            .invoke(&mut conn)
            .map_err(unavailable)?;

        self.check(&mut conn, code, job_id, |status| QueueError::InvalidState {
            job_id,
            status,
        })
    }

    fn stats(&self, tenant: &TenantId) -> Result<QueueStats, QueueError> {
        let mut conn = self.conn()?;
        let ids: Vec<String> = conn
            .smembers(self.tenant_key(tenant, "jobs"))
            .map_err(unavailable)?;
        if ids.is_empty() {
            return Ok(QueueStats::default());
        }

        let mut pipe = redis::pipe();
        for id in &ids {
            pipe.hget(format!("{}{id}", self.job_prefix()), "status");
        }
        let statuses: Vec<Option<String>> = pipe.query(&mut conn).map_err(unavailable)?;

        let mut stats = QueueStats::default();
        for status in statuses.into_iter().flatten() {
            match status.parse::<JobStatus>() {
                Ok(JobStatus::Pending) => stats.pending += 1,
                Ok(JobStatus::InFlight) => stats.in_flight += 1,
                Ok(JobStatus::Completed) => stats.completed += 1,
                Ok(JobStatus::Failed) => stats.failed += 1,
                Ok(JobStatus::DeadLettered) => stats.dead_lettered += 1,
                Err(_) => {}
            }
        }
        Ok(stats)
    }

    fn depth(&self, queue: &str) -> Result<usize, QueueError> {
        let mut conn = self.conn()?;
        let depth: i64 = self
            .scripts
            .depth
            .key(self.queue_key(queue, "ring"))
            .arg(self.lane_prefix(queue))
            .invoke(&mut conn)
            .map_err(unavailable)?;
        Ok(usize::try_from(depth).unwrap_or(0))
    }

    fn purge_completed(&self, older_than: DateTime<Utc>) -> Result<usize, QueueError> {
        let mut conn = self.conn()?;
        let purged: i64 = self
            .scripts
            .purge
            .key(self.completed_key())
            .arg(ms(older_than))
            .arg(self.job_prefix())
            .arg(self.tenant_prefix())
            .invoke(&mut conn)
            .map_err(unavailable)?;
        Ok(usize::try_from(purged).unwrap_or(0))
    }
}

impl core::fmt::Debug for RedisQueueStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisQueueStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}
