//! Raw submissions from external collaborators, before normalization.

use chrono::{DateTime, Utc};
use convoy_core::TenantId;
use serde::{Deserialize, Serialize};

use crate::error::QueueError;
use crate::job::{Job, MessageContent};

/// Content as collaborators send it: a bare string or a structured payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawContent {
    Text(String),
    Structured(MessageContent),
}

impl From<MessageContent> for RawContent {
    fn from(content: MessageContent) -> Self {
        Self::Structured(content)
    }
}

impl From<&str> for RawContent {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl RawContent {
    fn normalize(self) -> MessageContent {
        match self {
            Self::Text(body) => MessageContent::Text { body },
            Self::Structured(content) => content,
        }
    }
}

/// A message received from the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitInbound {
    pub tenant_id: String,
    pub from: String,
    pub to: String,
    pub wa_message_id: String,
    pub content: RawContent,
}

/// A message the tenant's application wants sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutbound {
    pub tenant_id: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    pub content: RawContent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "direction", rename_all = "lowercase")]
pub enum RawEvent {
    Inbound(SubmitInbound),
    Outbound(SubmitOutbound),
}

impl RawEvent {
    /// Parse a collaborator payload. Unknown directions and malformed fields
    /// are `InvalidJob`.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, QueueError> {
        Self::deserialize(value).map_err(|e| QueueError::invalid(e.to_string()))
    }

    /// Normalize into a validated Pending job.
    pub fn into_job(self, now: DateTime<Utc>) -> Result<Job, QueueError> {
        let job = match self {
            Self::Inbound(s) => Job::inbound(
                TenantId::new(s.tenant_id.trim()),
                s.from.trim(),
                s.to.trim(),
                s.wa_message_id.trim(),
                s.content.normalize(),
                now,
            ),
            Self::Outbound(s) => Job::outbound(
                TenantId::new(s.tenant_id.trim()),
                s.to.trim(),
                s.from.map(|f| f.trim().to_string()).filter(|f| !f.is_empty()),
                s.content.normalize(),
                now,
            ),
        };
        job.validate()?;
        Ok(job)
    }
}

impl From<SubmitInbound> for RawEvent {
    fn from(s: SubmitInbound) -> Self {
        Self::Inbound(s)
    }
}

impl From<SubmitOutbound> for RawEvent {
    fn from(s: SubmitOutbound) -> Self {
        Self::Outbound(s)
    }
}
