//! Builders shared by the unit tests

use chrono::{DateTime, Duration, Utc};
use shared_types::{AuditChain, ContactId, FieldId, InitiatorId, PackageId, ParticipantAssignmentId};

use crate::model::{
    Assignment, Channel, ContentRef, Field, FieldArena, FieldKind, Geometry, Package,
    PackageOptions, PackageStatus, Receiver, Role,
};

pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap() + Duration::seconds(secs)
}

pub fn signer() -> Role {
    Role::Signer {
        channels: vec![Channel::Email, Channel::Sms],
    }
}

pub fn assignment(pa: &str, contact: &str, role: Role) -> Assignment {
    Assignment {
        participant_assignment_id: ParticipantAssignmentId::from(pa),
        contact_id: ContactId::from(contact),
        name: contact.to_string(),
        email: format!("{}@example.com", contact),
        phone: Some("+1 (555) 010-0000".to_string()),
        role,
        completion: None,
    }
}

pub fn receiver(pa: &str, contact: &str) -> Receiver {
    Receiver {
        participant_assignment_id: ParticipantAssignmentId::from(pa),
        contact_id: ContactId::from(contact),
        name: contact.to_string(),
        email: format!("{}@example.com", contact),
        added_by: None,
    }
}

pub fn field(id: &str, kind: FieldKind, required: bool, assignees: Vec<Assignment>) -> Field {
    Field {
        id: FieldId::from(id),
        kind,
        geometry: Geometry {
            page: 1,
            x: 72.0,
            y: 72.0,
            width: 150.0,
            height: 40.0,
        },
        required,
        choices: Vec::new(),
        assignees,
        value: None,
    }
}

pub fn package_with(fields: Vec<Field>, receivers: Vec<Receiver>) -> Package {
    let mut arena = FieldArena::default();
    for f in fields {
        arena.push(f).unwrap();
    }
    Package {
        id: PackageId::from("pkg-1"),
        initiator_id: InitiatorId::from("init-1"),
        template_id: None,
        name: "Lease".to_string(),
        content: ContentRef {
            storage_key: "docs/lease.pdf".to_string(),
            sha256: "0".repeat(64),
        },
        fields: arena,
        receivers,
        options: PackageOptions::default(),
        status: PackageStatus::Sent,
        reassignment_history: Vec::new(),
        receiver_history: Vec::new(),
        rejection: None,
        revocation: None,
        last_reminded: Default::default(),
        audit: AuditChain::new("pkg-1", at(0)),
        version: 1,
        created_at: at(0),
        updated_at: at(0),
        sent_at: Some(at(0)),
        completed_at: None,
    }
}
