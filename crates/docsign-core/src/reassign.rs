//! Mid-flight identity substitution
//!
//! A participant hands every outstanding obligation held through their
//! assignment id to another contact of the same initiator. Completed
//! evidence is never reattributed: any completed assignment blocks the
//! whole transfer.

use chrono::{DateTime, Utc};
use shared_types::{AuditAction, FieldId, ParticipantAssignmentId};
use tracing::info;

use crate::collaborators::Contact;
use crate::error::{EngineError, Result};
use crate::model::{
    Assignment, Channel, Package, PackageStatus, ParticipantRef, ReassignmentRecord, Receiver,
    ReceiverRecord, Role,
};
use crate::resolver::Participant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reassigned {
    pub new_participant: ParticipantAssignmentId,
    pub record: ReassignmentRecord,
    /// The outgoing id was a pure receiver and no longer has access
    pub forfeited_access: bool,
}

fn ensure_sent(package: &Package) -> Result<()> {
    if package.status != PackageStatus::Sent {
        return Err(EngineError::InvalidState {
            status: package.status,
        });
    }
    Ok(())
}

fn ensure_eligible(package: &Package, incoming: &Contact) -> Result<()> {
    if incoming.owner != package.initiator_id {
        return Err(EngineError::forbidden(
            "contact does not belong to the package initiator",
        ));
    }
    if package.has_contact(&incoming.id) {
        return Err(EngineError::validation(format!(
            "{} is already a participant",
            incoming.name
        )));
    }
    Ok(())
}

fn incoming_ref(id: &ParticipantAssignmentId, contact: &Contact) -> ParticipantRef {
    ParticipantRef {
        participant_assignment_id: id.clone(),
        contact_id: contact.id.clone(),
        name: contact.name.clone(),
        email: contact.email.clone(),
    }
}

pub fn reassign(
    package: &mut Package,
    outgoing: &Participant,
    incoming: &Contact,
    reason: Option<String>,
    ip: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Reassigned> {
    ensure_sent(package)?;
    if !package.options.allow_reassign {
        return Err(EngineError::forbidden(
            "reassignment is not enabled for this package",
        ));
    }
    ensure_eligible(package, incoming)?;

    let mut completed: Vec<FieldId> = outgoing
        .slots
        .iter()
        .filter(|&&slot| package.fields.assignment(slot).is_signed())
        .map(|slot| package.fields.at(slot.field).id.clone())
        .collect();
    if !completed.is_empty() {
        completed.dedup();
        return Err(EngineError::AlreadyCompleted {
            fields: completed.into_iter().map(|f| f.to_string()).collect(),
        });
    }

    if incoming.phone.is_none() {
        let sms_only = outgoing.slots.iter().any(|&slot| {
            matches!(
                &package.fields.assignment(slot).role,
                Role::Signer { channels } if channels.as_slice() == [Channel::Sms]
            )
        });
        if sms_only {
            return Err(EngineError::validation(format!(
                "{} has no phone number for SMS verification",
                incoming.name
            )));
        }
    }

    let new_id = ParticipantAssignmentId::generate();
    for &slot in &outgoing.slots {
        let role = package.fields.assignment(slot).role.clone();
        package.fields.replace_assignment(
            slot,
            Assignment {
                participant_assignment_id: new_id.clone(),
                contact_id: incoming.id.clone(),
                name: incoming.name.clone(),
                email: incoming.email.clone(),
                phone: incoming.phone.clone(),
                role,
                completion: None,
            },
        );
    }
    for receiver in package
        .receivers
        .iter_mut()
        .filter(|r| r.participant_assignment_id == outgoing.participant_assignment_id)
    {
        *receiver = Receiver {
            participant_assignment_id: new_id.clone(),
            contact_id: incoming.id.clone(),
            name: incoming.name.clone(),
            email: incoming.email.clone(),
            added_by: receiver.added_by.clone(),
        };
    }
    package
        .last_reminded
        .remove(&outgoing.participant_assignment_id);

    let record = ReassignmentRecord {
        from: outgoing.snapshot(),
        to: incoming_ref(&new_id, incoming),
        actor: outgoing.participant_assignment_id.clone(),
        reason: reason.clone(),
        at: now,
        ip: ip.map(str::to_string),
    };
    package.reassignment_history.push(record.clone());
    package.record(
        AuditAction::Reassigned {
            from_contact: outgoing.contact_id.to_string(),
            to_contact: incoming.id.to_string(),
        },
        &outgoing.email,
        ip,
        now,
        reason,
    );

    info!(
        package_id = %package.id,
        from = %outgoing.participant_assignment_id,
        to = %new_id,
        "participant reassigned"
    );

    Ok(Reassigned {
        new_participant: new_id,
        record,
        forfeited_access: outgoing.is_receiver_only(),
    })
}

/// A receiver invites another receiver and keeps their own access
pub fn add_receiver(
    package: &mut Package,
    actor: &Participant,
    incoming: &Contact,
    ip: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Receiver> {
    ensure_sent(package)?;
    if !package.options.allow_receivers_to_add {
        return Err(EngineError::forbidden(
            "receivers may not add receivers to this package",
        ));
    }
    if actor.receiver.is_none() {
        return Err(EngineError::forbidden("only receivers can add receivers"));
    }
    ensure_eligible(package, incoming)?;

    let receiver = Receiver {
        participant_assignment_id: ParticipantAssignmentId::generate(),
        contact_id: incoming.id.clone(),
        name: incoming.name.clone(),
        email: incoming.email.clone(),
        added_by: Some(actor.participant_assignment_id.clone()),
    };
    package.receivers.push(receiver.clone());
    package.receiver_history.push(ReceiverRecord {
        added: receiver.snapshot(),
        actor: actor.participant_assignment_id.clone(),
        at: now,
        ip: ip.map(str::to_string),
    });
    package.record(
        AuditAction::ReceiverAdded {
            contact: incoming.id.to_string(),
        },
        &actor.email,
        ip,
        now,
        None,
    );

    info!(
        package_id = %package.id,
        by = %actor.participant_assignment_id,
        receiver = %receiver.participant_assignment_id,
        "receiver added"
    );
    Ok(receiver)
}
