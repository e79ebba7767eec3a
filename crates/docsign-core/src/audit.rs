//! Audit-trail artifact handed to the renderer once a package completes

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared_types::{ContactId, FieldId, InitiatorId, PackageId, ParticipantAssignmentId};

use crate::model::{
    CompletionMethod, FieldKind, FieldValue, Geometry, Package, PackageStatus, ReassignmentRecord,
    ReceiverRecord, TerminalDetails,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrailAction {
    pub field_id: FieldId,
    pub kind: FieldKind,
    pub role: &'static str,
    pub completed_at: Option<DateTime<Utc>>,
    pub method: Option<CompletionMethod>,
    pub ip: Option<String>,
    pub with_otp: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrailParticipant {
    pub participant_assignment_id: ParticipantAssignmentId,
    pub contact_id: ContactId,
    pub name: String,
    pub email: String,
    pub receiver: bool,
    pub actions: Vec<TrailAction>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrailField {
    pub id: FieldId,
    pub kind: FieldKind,
    pub geometry: Geometry,
    pub required: bool,
    pub value: Option<FieldValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditTrail {
    pub package_id: PackageId,
    pub package_name: String,
    pub initiator_id: InitiatorId,
    pub document_sha256: String,
    pub status: PackageStatus,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub participants: Vec<TrailParticipant>,
    pub fields: Vec<TrailField>,
    pub reassignments: Vec<ReassignmentRecord>,
    pub receivers_added: Vec<ReceiverRecord>,
    pub rejection: Option<TerminalDetails>,
    pub revocation: Option<TerminalDetails>,
    /// One line per audit-chain event
    pub events: Vec<String>,
    pub chain_verified: bool,
}

pub fn build_trail(package: &Package) -> AuditTrail {
    let mut participants: Vec<TrailParticipant> = package
        .participants()
        .into_iter()
        .map(|p| TrailParticipant {
            receiver: package.receiver(&p.participant_assignment_id).is_some(),
            participant_assignment_id: p.participant_assignment_id,
            contact_id: p.contact_id,
            name: p.name,
            email: p.email,
            actions: Vec::new(),
        })
        .collect();

    for field in &package.fields {
        for assignment in &field.assignees {
            let Some(entry) = participants
                .iter_mut()
                .find(|p| p.participant_assignment_id == assignment.participant_assignment_id)
            else {
                continue;
            };
            let completion = assignment.completion.as_ref();
            entry.actions.push(TrailAction {
                field_id: field.id.clone(),
                kind: field.kind,
                role: assignment.role.label(),
                completed_at: completion.map(|c| c.at),
                method: completion.map(|c| c.method),
                ip: completion.and_then(|c| c.ip.clone()),
                with_otp: completion.is_some_and(|c| c.with_otp),
            });
        }
    }

    let fields = package
        .fields
        .iter()
        .map(|f| TrailField {
            id: f.id.clone(),
            kind: f.kind,
            geometry: f.geometry,
            required: f.required,
            value: f.value.clone(),
        })
        .collect();

    AuditTrail {
        package_id: package.id.clone(),
        package_name: package.name.clone(),
        initiator_id: package.initiator_id.clone(),
        document_sha256: package.content.sha256.clone(),
        status: package.status,
        created_at: package.created_at,
        sent_at: package.sent_at,
        completed_at: package.completed_at,
        participants,
        fields,
        reassignments: package.reassignment_history.clone(),
        receivers_added: package.receiver_history.clone(),
        rejection: package.rejection.clone(),
        revocation: package.revocation.clone(),
        events: package.audit.summary(),
        chain_verified: package.audit.verify().is_ok(),
    }
}
