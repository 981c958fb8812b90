//! Job model: the canonical record of one inbound or outbound message.
//!
//! Identity fields (`tenant_id`, `direction`, `external_message_id`) and the
//! content are fixed at construction and only exposed through getters. The
//! lifecycle fields are mutated by the queue stores and nothing else.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use convoy_core::{DomainError, DomainResult, JobId, TenantId, WorkerId};
use convoy_events::TenantScoped;
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

impl core::fmt::Display for Direction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inbound" => Ok(Self::Inbound),
            "outbound" => Ok(Self::Outbound),
            other => Err(DomainError::validation(format!(
                "unrecognized direction: {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InFlight,
    Completed,
    /// A failed attempt awaiting its retry decision. Stores apply the
    /// decision in the same step, so no stored job rests here.
    Failed,
    DeadLettered,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::DeadLettered)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::DeadLettered => "dead_lettered",
        }
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_flight" => Ok(Self::InFlight),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "dead_lettered" => Ok(Self::DeadLettered),
            other => Err(DomainError::validation(format!("unknown job status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Audio,
    Video,
    Document,
    Sticker,
}

/// Message payload. Immutable once the job is enqueued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text {
        body: String,
    },
    Media {
        kind: MediaKind,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    Location {
        latitude: f64,
        longitude: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    Template {
        name: String,
        language: String,
        #[serde(default)]
        parameters: Vec<String>,
    },
}

impl MessageContent {
    pub fn text(body: impl Into<String>) -> Self {
        Self::Text { body: body.into() }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Media { .. } => "media",
            Self::Location { .. } => "location",
            Self::Template { .. } => "template",
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        match self {
            Self::Text { body } => {
                if body.trim().is_empty() {
                    return Err(DomainError::validation("text body is empty"));
                }
            }
            Self::Media { url, .. } => {
                if url.trim().is_empty() {
                    return Err(DomainError::validation("media url is empty"));
                }
            }
            Self::Location {
                latitude,
                longitude,
                ..
            } => {
                if !(-90.0..=90.0).contains(latitude) {
                    return Err(DomainError::validation(format!(
                        "latitude out of range: {latitude}"
                    )));
                }
                if !(-180.0..=180.0).contains(longitude) {
                    return Err(DomainError::validation(format!(
                        "longitude out of range: {longitude}"
                    )));
                }
            }
            Self::Template { name, language, .. } => {
                if name.trim().is_empty() {
                    return Err(DomainError::validation("template name is empty"));
                }
                if language.trim().is_empty() {
                    return Err(DomainError::validation("template language is empty"));
                }
            }
        }
        Ok(())
    }
}

/// Exclusive, time-bounded ownership of an in-flight job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub worker_id: WorkerId,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_held_by(&self, worker: &WorkerId, now: DateTime<Utc>) -> bool {
        &self.worker_id == worker && !self.is_expired(now)
    }
}

/// One unit of inbound or outbound message work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    id: JobId,
    tenant_id: TenantId,
    direction: Direction,
    counterparty: String,
    self_address: Option<String>,
    external_message_id: Option<String>,
    content: MessageContent,
    enqueued_at: DateTime<Utc>,
    pub(crate) attempt: u32,
    pub(crate) available_at: DateTime<Utc>,
    pub(crate) status: JobStatus,
    pub(crate) lease: Option<Lease>,
    pub(crate) last_error: Option<String>,
    pub(crate) finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// A message received from the provider. `from` is the counterparty,
    /// `to` is the tenant's own channel address.
    pub fn inbound(
        tenant_id: TenantId,
        from: impl Into<String>,
        to: impl Into<String>,
        external_message_id: impl Into<String>,
        content: MessageContent,
        now: DateTime<Utc>,
    ) -> Self {
        Self::new(
            tenant_id,
            Direction::Inbound,
            from.into(),
            Some(to.into()),
            Some(external_message_id.into()),
            content,
            now,
        )
    }

    /// A message the tenant wants delivered to `to`.
    pub fn outbound(
        tenant_id: TenantId,
        to: impl Into<String>,
        from: Option<String>,
        content: MessageContent,
        now: DateTime<Utc>,
    ) -> Self {
        Self::new(
            tenant_id,
            Direction::Outbound,
            to.into(),
            from,
            None,
            content,
            now,
        )
    }

    fn new(
        tenant_id: TenantId,
        direction: Direction,
        counterparty: String,
        self_address: Option<String>,
        external_message_id: Option<String>,
        content: MessageContent,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: JobId::new(),
            tenant_id,
            direction,
            counterparty,
            self_address,
            external_message_id,
            content,
            enqueued_at: now,
            attempt: 0,
            available_at: now,
            status: JobStatus::Pending,
            lease: None,
            last_error: None,
            finished_at: None,
        }
    }

    /// Fresh copy of a dead-lettered job for operator replay: new id,
    /// attempt 0, same identity and content.
    pub(crate) fn replayed(&self, now: DateTime<Utc>) -> Self {
        Self::new(
            self.tenant_id.clone(),
            self.direction,
            self.counterparty.clone(),
            self.self_address.clone(),
            self.external_message_id.clone(),
            self.content.clone(),
            now,
        )
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn counterparty(&self) -> &str {
        &self.counterparty
    }

    pub fn self_address(&self) -> Option<&str> {
        self.self_address.as_deref()
    }

    pub fn external_message_id(&self) -> Option<&str> {
        self.external_message_id.as_deref()
    }

    pub fn content(&self) -> &MessageContent {
        &self.content
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    pub fn available_at(&self) -> DateTime<Utc> {
        self.available_at
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn lease(&self) -> Option<&Lease> {
        self.lease.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Deduplication key for inbound jobs.
    pub fn dedup_key(&self) -> Option<(TenantId, String)> {
        match (self.direction, &self.external_message_id) {
            (Direction::Inbound, Some(ext)) => Some((self.tenant_id.clone(), ext.clone())),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        validate(self)
    }
}

impl TenantScoped for Job {
    fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }
}

/// Structural validation. Pure; no store access.
pub fn validate(job: &Job) -> Result<(), QueueError> {
    if job.tenant_id.is_blank() {
        return Err(QueueError::invalid("tenant_id is empty"));
    }
    if job.counterparty.trim().is_empty() {
        return Err(QueueError::invalid("counterparty is empty"));
    }
    if job.direction == Direction::Inbound {
        match job.external_message_id.as_deref() {
            Some(ext) if !ext.trim().is_empty() => {}
            _ => return Err(QueueError::invalid("inbound job has no external message id")),
        }
        if job.self_address.as_deref().is_none_or(|a| a.trim().is_empty()) {
            return Err(QueueError::invalid("inbound job has no receiving address"));
        }
    }
    if job.available_at < job.enqueued_at {
        return Err(QueueError::invalid("available_at precedes enqueued_at"));
    }
    job.content.validate()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound(tenant: &str, ext: &str) -> Job {
        Job::inbound(
            TenantId::new(tenant),
            "+1",
            "+2",
            ext,
            MessageContent::text("hi"),
            Utc::now(),
        )
    }

    #[test]
    fn new_inbound_job_is_pending_at_attempt_zero() {
        let job = inbound("t1", "m1");
        assert_eq!(job.status(), JobStatus::Pending);
        assert_eq!(job.attempt(), 0);
        assert_eq!(job.available_at(), job.enqueued_at());
        assert_eq!(job.self_address(), Some("+2"));
        assert!(job.validate().is_ok());
    }

    #[test]
    fn validate_rejects_blank_tenant() {
        let err = inbound("  ", "m1").validate().unwrap_err();
        assert!(matches!(err, QueueError::InvalidJob(msg) if msg.contains("tenant")));
    }

    #[test]
    fn validate_rejects_inbound_without_external_id() {
        let err = inbound("t1", "").validate().unwrap_err();
        assert!(matches!(err, QueueError::InvalidJob(_)));
    }

    #[test]
    fn outbound_needs_no_external_id() {
        let job = Job::outbound(
            TenantId::new("t1"),
            "+15550001",
            None,
            MessageContent::text("order shipped"),
            Utc::now(),
        );
        assert!(job.validate().is_ok());
        assert!(job.dedup_key().is_none());
    }

    #[test]
    fn content_validation_is_applied() {
        let job = Job::outbound(
            TenantId::new("t1"),
            "+1",
            None,
            MessageContent::Location {
                latitude: 91.0,
                longitude: 0.0,
                name: None,
            },
            Utc::now(),
        );
        assert!(matches!(job.validate(), Err(QueueError::InvalidJob(msg)) if msg.contains("latitude")));
    }

    #[test]
    fn direction_parsing() {
        assert_eq!("Inbound".parse::<Direction>().unwrap(), Direction::Inbound);
        assert!("sideways".parse::<Direction>().is_err());
    }

    #[test]
    fn only_completed_and_dead_lettered_are_terminal() {
        let terminal: Vec<_> = [
            JobStatus::Pending,
            JobStatus::InFlight,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::DeadLettered,
        ]
        .into_iter()
        .filter(JobStatus::is_terminal)
        .collect();
        assert_eq!(terminal, [JobStatus::Completed, JobStatus::DeadLettered]);
        assert_eq!("in_flight".parse::<JobStatus>().unwrap(), JobStatus::InFlight);
    }

    #[test]
    fn content_is_tagged_in_json() {
        let json = serde_json::to_value(MessageContent::Media {
            kind: MediaKind::Image,
            url: "https://cdn/x.png".into(),
            mime_type: Some("image/png".into()),
            caption: None,
        })
        .unwrap();
        assert_eq!(json["type"], "media");
        assert_eq!(json["kind"], "image");
        assert!(json.get("caption").is_none());
    }

    #[test]
    fn replay_keeps_identity_but_resets_lifecycle() {
        let mut job = inbound("t1", "m1");
        job.attempt = 4;
        job.status = JobStatus::DeadLettered;

        let replay = job.replayed(Utc::now());
        assert_ne!(replay.id(), job.id());
        assert_eq!(replay.attempt(), 0);
        assert_eq!(replay.status(), JobStatus::Pending);
        assert_eq!(replay.dedup_key(), job.dedup_key());
    }
}
