//! Tamper-evident audit log for package events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Types of auditable package events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Created,
    Sent {
        credits: u32,
    },
    FieldsSubmitted {
        field_ids: Vec<String>,
    },
    OtpIssued {
        field_id: String,
        channel: String,
    },
    Signed {
        field_ids: Vec<String>,
        channel: String,
    },
    Reassigned {
        from_contact: String,
        to_contact: String,
    },
    ReceiverAdded {
        contact: String,
    },
    ReminderSent {
        participants: u32,
    },
    Rejected,
    Revoked,
    Expired,
    Completed,
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub timestamp: String,
    pub action: AuditAction,
    pub actor: String,
    pub actor_ip_hash: Option<String>,
    pub document_hash: String,
    pub previous_hash: Option<String>,
    pub details: Option<String>,
}

impl AuditEvent {
    /// Create a new audit event
    pub fn new(
        action: AuditAction,
        actor: &str,
        at: DateTime<Utc>,
        document_hash: &str,
        previous_hash: Option<String>,
        details: Option<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            timestamp: at.to_rfc3339(),
            action,
            actor: actor.to_string(),
            actor_ip_hash: None,
            document_hash: document_hash.to_string(),
            previous_hash,
            details,
        }
    }

    /// Record the origin IP, stored hashed
    pub fn with_ip(mut self, ip: Option<&str>) -> Self {
        self.actor_ip_hash = ip.map(hash_ip);
        self
    }

    /// Compute the hash of this event (for chain linking)
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.event_id.as_bytes());
        hasher.update(self.timestamp.as_bytes());
        hasher.update(format!("{:?}", self.action).as_bytes());
        hasher.update(self.actor.as_bytes());
        if let Some(ref ip) = self.actor_ip_hash {
            hasher.update(ip.as_bytes());
        }
        hasher.update(self.document_hash.as_bytes());
        if let Some(ref prev) = self.previous_hash {
            hasher.update(prev.as_bytes());
        }
        if let Some(ref details) = self.details {
            hasher.update(details.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// Chain of audit events with hash linking
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AuditChain {
    pub events: Vec<AuditEvent>,
    pub package_id: String,
    pub created_at: String,
}

impl AuditChain {
    /// Create a new audit chain for a package
    pub fn new(package_id: &str, at: DateTime<Utc>) -> Self {
        Self {
            events: Vec::new(),
            package_id: package_id.to_string(),
            created_at: at.to_rfc3339(),
        }
    }

    /// Get the hash of the last event (for linking)
    pub fn last_hash(&self) -> Option<String> {
        self.events.last().map(|e| e.compute_hash())
    }

    /// Append an event, automatically linking to previous hash
    pub fn append(
        &mut self,
        action: AuditAction,
        actor: &str,
        ip: Option<&str>,
        at: DateTime<Utc>,
        document_hash: &str,
        details: Option<String>,
    ) -> &AuditEvent {
        let previous_hash = self.last_hash();
        let event = AuditEvent::new(action, actor, at, document_hash, previous_hash, details)
            .with_ip(ip);
        self.events.push(event);
        &self.events[self.events.len() - 1]
    }

    /// Verify the integrity of the chain
    pub fn verify(&self) -> Result<(), String> {
        let mut expected_prev: Option<String> = None;

        for (i, event) in self.events.iter().enumerate() {
            if event.previous_hash != expected_prev {
                return Err(format!(
                    "Chain broken at event {}: expected prev {:?}, got {:?}",
                    i, expected_prev, event.previous_hash
                ));
            }
            expected_prev = Some(event.compute_hash());
        }

        Ok(())
    }

    /// Generate a summary for display
    pub fn summary(&self) -> Vec<String> {
        self.events
            .iter()
            .map(|e| {
                format!(
                    "[{}] {} - {:?}",
                    e.timestamp.split('T').next().unwrap_or(&e.timestamp),
                    e.actor,
                    e.action
                )
            })
            .collect()
    }
}

/// Compute SHA-256 hash of document bytes
pub fn hash_document(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Hash an origin IP so the log never carries it in clear
pub fn hash_ip(ip: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"docsign-ip:");
    hasher.update(ip.trim().as_bytes());
    hex::encode(hasher.finalize())
}
