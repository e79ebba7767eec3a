use serde::Serialize;
use shared_types::{ContactId, FieldId, PackageId, ParticipantAssignmentId};

use super::{Engine, Outcome};
use crate::error::{EngineError, Result};
use crate::model::{PackageStatus, ParticipantRef, Receiver};
use crate::notify::NotificationKind;
use crate::reassign;
use crate::resolver;

/// What a participant sees when opening their link
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantView {
    pub participant: ParticipantRef,
    pub roles: Vec<String>,
    pub receiver: bool,
    pub status: PackageStatus,
    pub pending_fields: Vec<FieldId>,
    pub visible_fields: Vec<FieldId>,
    pub can_download: bool,
}

impl Engine {
    pub fn participant_view(
        &self,
        package_id: &PackageId,
        participant: &ParticipantAssignmentId,
    ) -> Result<ParticipantView> {
        let package = self.get_package(package_id)?;
        let resolved = resolver::by_assignment(&package, participant)?;

        let mut roles: Vec<String> = resolved
            .slots
            .iter()
            .map(|&s| package.fields.assignment(s).role.label().to_string())
            .collect();
        roles.sort();
        roles.dedup();

        Ok(ParticipantView {
            participant: resolved.snapshot(),
            roles,
            receiver: resolved.receiver.is_some(),
            status: package.status,
            pending_fields: resolver::pending_for(&package, &resolved),
            visible_fields: resolver::visible_fields(&package, &resolved),
            can_download: resolver::can_download(&package, &resolved),
        })
    }

    /// Hand the participant's outstanding obligations to another contact
    pub fn reassign(
        &self,
        package_id: &PackageId,
        participant: &ParticipantAssignmentId,
        new_contact: &ContactId,
        reason: Option<&str>,
        ip: Option<&str>,
    ) -> Result<Outcome<ParticipantAssignmentId>> {
        self.mutate(package_id, "reassign", |engine, txn| {
            let outgoing = resolver::by_assignment(&txn.package, participant)?;
            let incoming = engine
                .deps
                .directory
                .lookup(new_contact)
                .ok_or_else(|| EngineError::not_found("contact", new_contact))?;
            let reason = reason
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string);

            let now = txn.now;
            let done = reassign::reassign(&mut txn.package, &outgoing, &incoming, reason, ip, now)?;
            txn.stale.push(outgoing.participant_assignment_id.clone());

            let kind = if outgoing.holds_assignments() {
                NotificationKind::ActionRequired {
                    roles: {
                        let mut roles: Vec<String> = outgoing
                            .slots
                            .iter()
                            .map(|&s| txn.package.fields.assignment(s).role.label().to_string())
                            .collect();
                        roles.sort();
                        roles.dedup();
                        roles
                    },
                }
            } else {
                NotificationKind::ForYourRecords
            };
            engine.notify_participant(txn, &done.record.to, kind);
            engine.notify_participant(
                txn,
                &done.record.from,
                NotificationKind::ReassignedAway {
                    to: incoming.name.clone(),
                },
            );
            Ok(done.new_participant)
        })
    }

    pub fn add_receiver(
        &self,
        package_id: &PackageId,
        participant: &ParticipantAssignmentId,
        new_contact: &ContactId,
        ip: Option<&str>,
    ) -> Result<Outcome<Receiver>> {
        self.mutate(package_id, "add_receiver", |engine, txn| {
            let actor = resolver::by_assignment(&txn.package, participant)?;
            let incoming = engine
                .deps
                .directory
                .lookup(new_contact)
                .ok_or_else(|| EngineError::not_found("contact", new_contact))?;

            let now = txn.now;
            let receiver = reassign::add_receiver(&mut txn.package, &actor, &incoming, ip, now)?;
            engine.notify_participant(txn, &receiver.snapshot(), NotificationKind::ForYourRecords);
            Ok(receiver)
        })
    }
}
