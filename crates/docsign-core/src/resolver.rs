//! Participant and role resolution
//!
//! Two lookups exist on purpose. An assignment id names the single acting
//! identity of a request. A contact id names the physical person, who may
//! hold several assignment ids across fields; signature propagation works
//! on that footprint.

use shared_types::{ContactId, FieldId, ParticipantAssignmentId};

use crate::completion;
use crate::error::{EngineError, Result};
use crate::model::{AssignmentSlot, FieldKind, Package, ParticipantRef};

/// The acting identity behind one participant assignment id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub participant_assignment_id: ParticipantAssignmentId,
    pub contact_id: ContactId,
    pub name: String,
    pub email: String,
    /// Field assignments held through this id
    pub slots: Vec<AssignmentSlot>,
    /// Position in the receiver list when the id names a receiver
    pub receiver: Option<usize>,
}

impl Participant {
    pub fn is_receiver_only(&self) -> bool {
        self.slots.is_empty() && self.receiver.is_some()
    }

    pub fn holds_assignments(&self) -> bool {
        !self.slots.is_empty()
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

/// Resolve an assignment id; fails before any state is touched
pub fn by_assignment(package: &Package, id: &ParticipantAssignmentId) -> Result<Participant> {
    let slots = package.fields.slots_for_participant(id).to_vec();
    let receiver = package
        .receivers
        .iter()
        .position(|r| &r.participant_assignment_id == id);

    let (contact_id, name, email) = if let Some(&slot) = slots.first() {
        let a = package.fields.assignment(slot);
        (a.contact_id.clone(), a.name.clone(), a.email.clone())
    } else if let Some(i) = receiver {
        let r = &package.receivers[i];
        (r.contact_id.clone(), r.name.clone(), r.email.clone())
    } else {
        return Err(EngineError::participant_not_found());
    };

    Ok(Participant {
        participant_assignment_id: id.clone(),
        contact_id,
        name,
        email,
        slots,
        receiver,
    })
}

/// Every field assignment held by a contact, across all of its assignment ids
pub fn by_contact(package: &Package, contact: &ContactId) -> Vec<AssignmentSlot> {
    package.fields.slots_for_contact(contact).to_vec()
}

/// Unsigned signature slots where the contact is a signer
pub fn pending_signatures(package: &Package, contact: &ContactId) -> Vec<AssignmentSlot> {
    by_contact(package, contact)
        .into_iter()
        .filter(|&slot| {
            let field = package.fields.at(slot.field);
            let assignment = package.fields.assignment(slot);
            field.kind == FieldKind::Signature
                && assignment.role.is_signer()
                && !assignment.is_signed()
        })
        .collect()
}

/// Fields that still wait on this participant
pub fn pending_for(package: &Package, participant: &Participant) -> Vec<FieldId> {
    let mut pending: Vec<FieldId> = participant
        .slots
        .iter()
        .filter(|&&slot| !completion::is_assignment_satisfied(package, slot))
        .map(|slot| package.fields.at(slot.field).id.clone())
        .collect();
    pending.dedup();
    pending
}

/// Fields a participant may see: their own, or all when the package allows it
pub fn visible_fields(package: &Package, participant: &Participant) -> Vec<FieldId> {
    if package.options.allow_view_others || participant.is_receiver_only() {
        return package.fields.iter().map(|f| f.id.clone()).collect();
    }
    let mut own: Vec<usize> = participant.slots.iter().map(|s| s.field).collect();
    own.sort_unstable();
    own.dedup();
    own.into_iter()
        .map(|i| package.fields.at(i).id.clone())
        .collect()
}

/// Download is open to receivers, to everyone once complete, and before
/// that only when the package allows it or the participant has nothing left
pub fn can_download(package: &Package, participant: &Participant) -> bool {
    package.status == crate::model::PackageStatus::Completed
        || participant.is_receiver_only()
        || package.options.allow_download_before_signing
        || pending_for(package, participant).is_empty()
}
