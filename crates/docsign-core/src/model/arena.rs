//! Flat field storage with id, participant and contact indexes
//!
//! Fields keep their document order in a `Vec`; assignments are addressed by
//! `(field position, assignee position)` slots so propagation and
//! reassignment touch only the matching entries.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use shared_types::{ContactId, FieldId, ParticipantAssignmentId};

use super::field::Field;
use super::participant::Assignment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssignmentSlot {
    pub field: usize,
    pub index: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Field>", into = "Vec<Field>")]
pub struct FieldArena {
    fields: Vec<Field>,
    by_id: HashMap<FieldId, usize>,
    by_participant: HashMap<ParticipantAssignmentId, Vec<AssignmentSlot>>,
    by_contact: HashMap<ContactId, Vec<AssignmentSlot>>,
}

impl From<Vec<Field>> for FieldArena {
    fn from(fields: Vec<Field>) -> Self {
        let mut arena = Self {
            fields,
            ..Self::default()
        };
        arena.reindex();
        arena
    }
}

impl From<FieldArena> for Vec<Field> {
    fn from(arena: FieldArena) -> Self {
        arena.fields
    }
}

impl FieldArena {
    /// Append a field; fails with the offending id when it is already present
    pub fn push(&mut self, field: Field) -> Result<(), FieldId> {
        if self.by_id.contains_key(&field.id) {
            return Err(field.id);
        }
        let position = self.fields.len();
        self.by_id.insert(field.id.clone(), position);
        for (index, assignment) in field.assignees.iter().enumerate() {
            self.index_assignment(AssignmentSlot { field: position, index }, assignment);
        }
        self.fields.push(field);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Field> {
        self.fields.iter()
    }

    pub fn get(&self, id: &FieldId) -> Option<&Field> {
        self.by_id.get(id).map(|&i| &self.fields[i])
    }

    pub fn position(&self, id: &FieldId) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    pub fn at(&self, position: usize) -> &Field {
        &self.fields[position]
    }

    /// Field values may change; assignment identities must go through
    /// [`FieldArena::replace_assignment`] to keep the indexes valid.
    pub(crate) fn at_mut(&mut self, position: usize) -> &mut Field {
        &mut self.fields[position]
    }

    pub fn slots_for_participant(&self, id: &ParticipantAssignmentId) -> &[AssignmentSlot] {
        self.by_participant.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn slots_for_contact(&self, id: &ContactId) -> &[AssignmentSlot] {
        self.by_contact.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn assignment(&self, slot: AssignmentSlot) -> &Assignment {
        &self.fields[slot.field].assignees[slot.index]
    }

    pub(crate) fn assignment_mut(&mut self, slot: AssignmentSlot) -> &mut Assignment {
        &mut self.fields[slot.field].assignees[slot.index]
    }

    /// Swap the assignment in a slot, returning the previous occupant
    pub(crate) fn replace_assignment(
        &mut self,
        slot: AssignmentSlot,
        replacement: Assignment,
    ) -> Assignment {
        let previous = std::mem::replace(self.assignment_mut(slot), replacement);
        self.unindex_assignment(slot, &previous);
        let current = self.assignment(slot).clone();
        self.index_assignment(slot, &current);
        previous
    }

    fn index_assignment(&mut self, slot: AssignmentSlot, assignment: &Assignment) {
        self.by_participant
            .entry(assignment.participant_assignment_id.clone())
            .or_default()
            .push(slot);
        self.by_contact
            .entry(assignment.contact_id.clone())
            .or_default()
            .push(slot);
    }

    fn unindex_assignment(&mut self, slot: AssignmentSlot, assignment: &Assignment) {
        if let Some(slots) = self.by_participant.get_mut(&assignment.participant_assignment_id) {
            slots.retain(|s| *s != slot);
            if slots.is_empty() {
                self.by_participant.remove(&assignment.participant_assignment_id);
            }
        }
        if let Some(slots) = self.by_contact.get_mut(&assignment.contact_id) {
            slots.retain(|s| *s != slot);
            if slots.is_empty() {
                self.by_contact.remove(&assignment.contact_id);
            }
        }
    }

    fn reindex(&mut self) {
        self.by_id.clear();
        self.by_participant.clear();
        self.by_contact.clear();
        let fields = std::mem::take(&mut self.fields);
        for (position, field) in fields.iter().enumerate() {
            self.by_id.insert(field.id.clone(), position);
            for (index, assignment) in field.assignees.iter().enumerate() {
                self.index_assignment(AssignmentSlot { field: position, index }, assignment);
            }
        }
        self.fields = fields;
    }
}

impl<'a> IntoIterator for &'a FieldArena {
    type Item = &'a Field;
    type IntoIter = std::slice::Iter<'a, Field>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}
