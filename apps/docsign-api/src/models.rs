//! Data models for DocSign API

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use docsign_core::{
    Channel, ContentRef, NewField, NewPackage, Package, PackageOptions, PackageStatus,
    ParticipantRef, SubmittedValue,
};
use serde::{Deserialize, Serialize};
use shared_types::{ContactId, FieldId, InitiatorId, PackageId};

/// Request to add or update a directory contact
#[derive(Debug, Clone, Deserialize)]
pub struct ContactRequest {
    #[serde(default)]
    pub id: Option<ContactId>,
    pub owner: InitiatorId,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GrantCreditsRequest {
    pub initiator_id: InitiatorId,
    pub credits: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditsResponse {
    pub initiator_id: InitiatorId,
    pub balance: u32,
}

/// Request to create a package, either from uploaded bytes or an existing document
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePackageRequest {
    pub initiator_id: InitiatorId,
    #[serde(default)]
    pub template_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub pdf_base64: Option<String>,
    #[serde(default)]
    pub content: Option<ContentRef>,
    pub fields: Vec<NewField>,
    #[serde(default)]
    pub receivers: Vec<ContactId>,
    #[serde(default)]
    pub options: PackageOptions,
    #[serde(default)]
    pub send: bool,
}

impl CreatePackageRequest {
    pub fn into_new_package(self, content: ContentRef) -> NewPackage {
        NewPackage {
            initiator_id: self.initiator_id,
            template_id: self.template_id,
            name: self.name,
            content,
            fields: self.fields,
            receivers: self.receivers,
            options: self.options,
            send: self.send,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendRequest {
    pub initiator_id: InitiatorId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RevokeRequest {
    pub initiator_id: InitiatorId,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitFieldsRequest {
    pub values: BTreeMap<FieldId, SubmittedValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssueOtpRequest {
    pub field_id: FieldId,
    pub channel: Channel,
    pub destination: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyOtpRequest {
    pub field_id: FieldId,
    pub code: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RejectRequest {
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReassignRequest {
    pub contact_id: ContactId,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddReceiverRequest {
    pub contact_id: ContactId,
}

/// Field state as shown to the initiator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSummary {
    pub id: FieldId,
    pub kind: String,
    pub required: bool,
    pub filled: bool,
    pub assignees: usize,
    pub completed: usize,
}

/// Package response for API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageResponse {
    pub id: PackageId,
    pub initiator_id: InitiatorId,
    pub name: String,
    pub status: PackageStatus,
    pub version: u64,
    pub document_sha256: String,
    pub fields: Vec<FieldSummary>,
    pub participants: Vec<ParticipantRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<&Package> for PackageResponse {
    fn from(p: &Package) -> Self {
        let fields = p
            .fields
            .iter()
            .map(|f| FieldSummary {
                id: f.id.clone(),
                kind: f.kind.to_string(),
                required: f.required,
                filled: f.has_value(),
                assignees: f.assignees.len(),
                completed: f.assignees.iter().filter(|a| a.completion.is_some()).count(),
            })
            .collect();

        Self {
            id: p.id.clone(),
            initiator_id: p.initiator_id.clone(),
            name: p.name.clone(),
            status: p.status,
            version: p.version,
            document_sha256: p.content.sha256.clone(),
            fields,
            participants: p.participants(),
            created_at: p.created_at,
            updated_at: p.updated_at,
            sent_at: p.sent_at,
            completed_at: p.completed_at,
            expires_at: p.options.expires_at,
        }
    }
}

/// Result of a state-changing call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResponse<T> {
    pub result: T,
    pub package_status: PackageStatus,
    pub version: u64,
}

impl<T> ActionResponse<T> {
    pub fn new(result: T, package: &Package) -> Self {
        Self {
            result,
            package_status: package.status,
            version: package.version,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemindersResponse {
    pub notifications: usize,
}
