use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared_types::{AuditAction, AuditChain, ContactId, InitiatorId, PackageId, ParticipantAssignmentId};

use super::arena::FieldArena;
use super::participant::{Channel, ParticipantRef, Receiver};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageStatus {
    Draft,
    Sent,
    Completed,
    Rejected,
    Expired,
    Revoked,
}

impl PackageStatus {
    /// Terminal states admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Rejected | Self::Expired | Self::Revoked
        )
    }
}

impl std::fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PackageStatus::Draft => write!(f, "draft"),
            PackageStatus::Sent => write!(f, "sent"),
            PackageStatus::Completed => write!(f, "completed"),
            PackageStatus::Rejected => write!(f, "rejected"),
            PackageStatus::Expired => write!(f, "expired"),
            PackageStatus::Revoked => write!(f, "revoked"),
        }
    }
}

/// Which OTP channels the initiator permits for the package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OtpPolicy {
    #[default]
    Email,
    Sms,
    Both,
}

impl OtpPolicy {
    pub fn allows(&self, channel: Channel) -> bool {
        matches!(
            (self, channel),
            (OtpPolicy::Both, _) | (OtpPolicy::Email, Channel::Email) | (OtpPolicy::Sms, Channel::Sms)
        )
    }

    pub fn channels(&self) -> Vec<Channel> {
        match self {
            OtpPolicy::Email => vec![Channel::Email],
            OtpPolicy::Sms => vec![Channel::Sms],
            OtpPolicy::Both => vec![Channel::Email, Channel::Sms],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderCadence {
    pub interval_hours: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageOptions {
    #[serde(default)]
    pub otp_policy: OtpPolicy,
    #[serde(default)]
    pub allow_reassign: bool,
    #[serde(default)]
    pub allow_view_others: bool,
    #[serde(default)]
    pub allow_download_before_signing: bool,
    #[serde(default)]
    pub allow_receivers_to_add: bool,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reminder: Option<ReminderCadence>,
}

impl Default for PackageOptions {
    fn default() -> Self {
        Self {
            otp_policy: OtpPolicy::Email,
            allow_reassign: false,
            allow_view_others: true,
            allow_download_before_signing: false,
            allow_receivers_to_add: false,
            expires_at: None,
            reminder: None,
        }
    }
}

/// Pointer to the source document held by the storage collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRef {
    pub storage_key: String,
    /// SHA-256 of the document bytes, hex encoded
    pub sha256: String,
}

/// Who ended the package, why and from where
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalDetails {
    pub actor: String,
    pub actor_name: String,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
    pub ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReassignmentRecord {
    pub from: ParticipantRef,
    pub to: ParticipantRef,
    pub actor: ParticipantAssignmentId,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
    pub ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverRecord {
    pub added: ParticipantRef,
    pub actor: ParticipantAssignmentId,
    pub at: DateTime<Utc>,
    pub ip: Option<String>,
}

/// The signable unit and aggregate root of the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub id: PackageId,
    pub initiator_id: InitiatorId,
    #[serde(default)]
    pub template_id: Option<String>,
    pub name: String,
    pub content: ContentRef,
    pub fields: FieldArena,
    #[serde(default)]
    pub receivers: Vec<Receiver>,
    pub options: PackageOptions,
    pub status: PackageStatus,
    #[serde(default)]
    pub reassignment_history: Vec<ReassignmentRecord>,
    #[serde(default)]
    pub receiver_history: Vec<ReceiverRecord>,
    #[serde(default)]
    pub rejection: Option<TerminalDetails>,
    #[serde(default)]
    pub revocation: Option<TerminalDetails>,
    #[serde(default)]
    pub last_reminded: BTreeMap<ParticipantAssignmentId, DateTime<Utc>>,
    pub audit: AuditChain,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Package {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        self.options.expires_at.is_some_and(|expires| now > expires)
    }

    /// Only a sent package expires; a draft past its deadline just cannot be sent
    pub fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == PackageStatus::Sent && self.is_past_expiry(now)
    }

    /// Status as observed at `now`, surfacing lazy expiry
    pub fn effective_status(&self, now: DateTime<Utc>) -> PackageStatus {
        if self.is_lapsed(now) {
            PackageStatus::Expired
        } else {
            self.status
        }
    }

    pub fn receiver(&self, id: &ParticipantAssignmentId) -> Option<&Receiver> {
        self.receivers
            .iter()
            .find(|r| &r.participant_assignment_id == id)
    }

    /// Whether the contact already holds any assignment or receiver entry
    pub fn has_contact(&self, contact: &ContactId) -> bool {
        !self.fields.slots_for_contact(contact).is_empty()
            || self.receivers.iter().any(|r| &r.contact_id == contact)
    }

    /// Every distinct participant handle, field assignees first
    pub fn participants(&self) -> Vec<ParticipantRef> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for field in &self.fields {
            for assignment in &field.assignees {
                if seen.insert(assignment.participant_assignment_id.clone()) {
                    out.push(assignment.snapshot());
                }
            }
        }
        for receiver in &self.receivers {
            if seen.insert(receiver.participant_assignment_id.clone()) {
                out.push(receiver.snapshot());
            }
        }
        out
    }

    /// One handle per contact, for notices that ask for no action
    pub fn contacts(&self) -> Vec<ParticipantRef> {
        let mut seen = HashSet::new();
        self.participants()
            .into_iter()
            .filter(|p| seen.insert(p.contact_id.clone()))
            .collect()
    }

    /// Append to the hash-linked audit chain
    pub fn record(
        &mut self,
        action: AuditAction,
        actor: &str,
        ip: Option<&str>,
        at: DateTime<Utc>,
        details: Option<String>,
    ) {
        let digest = self.content.sha256.clone();
        self.audit.append(action, actor, ip, at, &digest, details);
    }
}
