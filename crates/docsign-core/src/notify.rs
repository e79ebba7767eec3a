//! Notification and audit-rendering obligations
//!
//! The engine never sends anything itself. Each operation returns the
//! effects it owes; they are handed to collaborators after the package
//! commit and a failing collaborator is only logged.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared_types::{InitiatorId, PackageId, ParticipantAssignmentId};
use thiserror::Error;
use tracing::{info, warn};

use crate::audit::AuditTrail;
use crate::model::Channel;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationKind {
    ActionRequired { roles: Vec<String> },
    ForYourRecords,
    VerificationCode { code: String, expires_at: DateTime<Utc> },
    Progress { done: Vec<String>, pending: Vec<String> },
    Completed,
    Rejected { by: String, reason: String },
    Revoked { reason: Option<String> },
    ReassignedAway { to: String },
    Reminder { pending_fields: usize },
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Recipient {
    Participant {
        participant_assignment_id: ParticipantAssignmentId,
        name: String,
        address: String,
        channel: Channel,
        language: String,
    },
    /// Resolved to an address by the delivery collaborator
    Initiator { initiator_id: InitiatorId },
}

impl Recipient {
    pub fn participant_id(&self) -> Option<&ParticipantAssignmentId> {
        match self {
            Recipient::Participant {
                participant_assignment_id,
                ..
            } => Some(participant_assignment_id),
            Recipient::Initiator { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub package_id: PackageId,
    pub package_name: String,
    pub recipient: Recipient,
    pub link: Option<String>,
    #[serde(flatten)]
    pub kind: NotificationKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum Effect {
    Notify(Notification),
    RenderAudit(AuditTrail),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("rendering failed: {0}")]
    Rendering(String),
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<(), CollaboratorError>;
}

pub trait AuditRenderer: Send + Sync {
    fn render(&self, trail: &AuditTrail) -> Result<(), CollaboratorError>;
}

/// Hand effects to collaborators; failures are logged and swallowed
pub fn dispatch(effects: &[Effect], notifier: &dyn Notifier, renderer: &dyn AuditRenderer) {
    for effect in effects {
        match effect {
            Effect::Notify(n) => {
                if let Err(e) = notifier.notify(n) {
                    warn!(package_id = %n.package_id, error = %e, "notification dispatch failed");
                }
            }
            Effect::RenderAudit(trail) => {
                if let Err(e) = renderer.render(trail) {
                    warn!(package_id = %trail.package_id, error = %e, "audit rendering failed");
                }
            }
        }
    }
}

/// Sink that only logs, for deployments without a delivery backend
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl Notifier for TracingSink {
    fn notify(&self, n: &Notification) -> Result<(), CollaboratorError> {
        let kind = match &n.kind {
            NotificationKind::ActionRequired { .. } => "action_required",
            NotificationKind::ForYourRecords => "for_your_records",
            NotificationKind::VerificationCode { .. } => "verification_code",
            NotificationKind::Progress { .. } => "progress",
            NotificationKind::Completed => "completed",
            NotificationKind::Rejected { .. } => "rejected",
            NotificationKind::Revoked { .. } => "revoked",
            NotificationKind::ReassignedAway { .. } => "reassigned_away",
            NotificationKind::Reminder { .. } => "reminder",
            NotificationKind::Expired => "expired",
        };
        info!(package_id = %n.package_id, kind, "notification due");
        Ok(())
    }
}

impl AuditRenderer for TracingSink {
    fn render(&self, trail: &AuditTrail) -> Result<(), CollaboratorError> {
        info!(
            package_id = %trail.package_id,
            events = trail.events.len(),
            "audit trail ready for rendering"
        );
        Ok(())
    }
}

/// Sink that keeps everything it receives
#[derive(Debug, Default)]
pub struct RecordingSink {
    notifications: Mutex<Vec<Notification>>,
    trails: Mutex<Vec<AuditTrail>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn trails(&self) -> Vec<AuditTrail> {
        self.trails.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Most recent verification code sent to a participant
    pub fn last_code_for(&self, participant: &ParticipantAssignmentId) -> Option<String> {
        self.notifications()
            .into_iter()
            .rev()
            .find_map(|n| match (&n.kind, n.recipient.participant_id()) {
                (NotificationKind::VerificationCode { code, .. }, Some(p)) if p == participant => {
                    Some(code.clone())
                }
                _ => None,
            })
    }

    pub fn clear(&self) {
        self.notifications
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.trails.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl Notifier for RecordingSink {
    fn notify(&self, notification: &Notification) -> Result<(), CollaboratorError> {
        self.notifications
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notification.clone());
        Ok(())
    }
}

impl AuditRenderer for RecordingSink {
    fn render(&self, trail: &AuditTrail) -> Result<(), CollaboratorError> {
        self.trails
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(trail.clone());
        Ok(())
    }
}
