use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared_types::{ContactId, ParticipantAssignmentId};

/// Delivery channel for one-time codes and notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Email => write!(f, "email"),
            Channel::Sms => write!(f, "sms"),
        }
    }
}

/// A participant's role on one field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Role {
    Signer { channels: Vec<Channel> },
    FormFiller,
    Approver,
}

impl Role {
    pub fn is_signer(&self) -> bool {
        matches!(self, Role::Signer { .. })
    }

    pub fn allows_channel(&self, channel: Channel) -> bool {
        match self {
            Role::Signer { channels } => channels.contains(&channel),
            _ => false,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Role::Signer { .. } => "signer",
            Role::FormFiller => "form_filler",
            Role::Approver => "approver",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionMethod {
    EmailOtp,
    SmsOtp,
    FormSubmission,
    Approval,
}

impl From<Channel> for CompletionMethod {
    fn from(channel: Channel) -> Self {
        match channel {
            Channel::Email => CompletionMethod::EmailOtp,
            Channel::Sms => CompletionMethod::SmsOtp,
        }
    }
}

/// Evidence that an assignment was acted on; exists iff the assignment is done
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub at: DateTime<Utc>,
    pub method: CompletionMethod,
    pub ip: Option<String>,
    pub with_otp: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub participant_assignment_id: ParticipantAssignmentId,
    pub contact_id: ContactId,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(flatten)]
    pub role: Role,
    #[serde(default)]
    pub completion: Option<Completion>,
}

impl Assignment {
    pub fn is_signed(&self) -> bool {
        self.completion.is_some()
    }

    pub fn snapshot(&self) -> ParticipantRef {
        ParticipantRef {
            participant_assignment_id: self.participant_assignment_id.clone(),
            contact_id: self.contact_id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
        }
    }
}

/// View-only participant, not bound to any field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receiver {
    pub participant_assignment_id: ParticipantAssignmentId,
    pub contact_id: ContactId,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub added_by: Option<ParticipantAssignmentId>,
}

impl Receiver {
    pub fn snapshot(&self) -> ParticipantRef {
        ParticipantRef {
            participant_assignment_id: self.participant_assignment_id.clone(),
            contact_id: self.contact_id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
        }
    }
}

/// Identity snapshot kept in history logs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRef {
    pub participant_assignment_id: ParticipantAssignmentId,
    pub contact_id: ContactId,
    pub name: String,
    pub email: String,
}
