//! Completion detection
//!
//! Each role carries its own predicate. The package is complete exactly when
//! every field is complete; nothing else feeds the decision.

use std::collections::BTreeMap;

use serde::Serialize;
use shared_types::ContactId;

use crate::model::{Assignment, AssignmentSlot, Field, FieldKind, FieldValue, Package, Role};

impl Role {
    /// Whether this assignment has done what its role requires on `field`
    pub fn is_satisfied(&self, assignment: &Assignment, field: &Field) -> bool {
        match self {
            Role::Signer { .. } | Role::Approver => assignment.is_signed(),
            Role::FormFiller => {
                !field.required || assignment.is_signed() || is_field_complete(field)
            }
        }
    }
}

pub fn is_field_complete(field: &Field) -> bool {
    match field.kind {
        FieldKind::Signature => {
            let mut signers = field.assignees.iter().filter(|a| a.role.is_signer()).peekable();
            if signers.peek().is_none() {
                return !field.required;
            }
            signers.all(|a| a.role.is_satisfied(a, field))
        }
        FieldKind::Checkbox => {
            let mut approvers = field
                .assignees
                .iter()
                .filter(|a| a.role == Role::Approver)
                .peekable();
            if approvers.peek().is_some() {
                return approvers.all(|a| a.role.is_satisfied(a, field));
            }
            !field.required || matches!(field.value, Some(FieldValue::Bool(true)))
        }
        _ => {
            if !field.required {
                return true;
            }
            let mut fillers = field
                .assignees
                .iter()
                .filter(|a| a.role == Role::FormFiller)
                .peekable();
            if fillers.peek().is_some() {
                fillers.any(|a| a.is_signed()) && field.has_value()
            } else {
                field.has_value()
            }
        }
    }
}

pub fn is_package_complete(package: &Package) -> bool {
    package.fields.iter().all(is_field_complete)
}

/// Whether the assignment in `slot` still waits on its holder
pub fn is_assignment_satisfied(package: &Package, slot: AssignmentSlot) -> bool {
    let field = package.fields.at(slot.field);
    let assignment = package.fields.assignment(slot);
    assignment.role.is_satisfied(assignment, field)
}

/// Named participants who are done versus still pending
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub done: Vec<String>,
    pub pending: Vec<String>,
}

impl Progress {
    pub fn summary(&self) -> String {
        format!(
            "{} of {} participants done",
            self.done.len(),
            self.done.len() + self.pending.len()
        )
    }
}

pub fn progress(package: &Package) -> Progress {
    // A contact holding several handles is done only when all of them are
    let mut state: BTreeMap<ContactId, (String, bool, usize)> = BTreeMap::new();
    let mut order = 0usize;
    for (position, field) in package.fields.iter().enumerate() {
        for index in 0..field.assignees.len() {
            let slot = AssignmentSlot {
                field: position,
                index,
            };
            let assignment = package.fields.assignment(slot);
            let satisfied = is_assignment_satisfied(package, slot);
            let entry = state
                .entry(assignment.contact_id.clone())
                .or_insert_with(|| {
                    order += 1;
                    (assignment.name.clone(), true, order)
                });
            entry.1 &= satisfied;
        }
    }

    let mut entries: Vec<_> = state.into_values().collect();
    entries.sort_by_key(|(_, _, order)| *order);

    let mut progress = Progress::default();
    for (name, done, _) in entries {
        if done {
            progress.done.push(name);
        } else {
            progress.pending.push(name);
        }
    }
    progress
}
