use chrono::{DateTime, Utc};
use shared_types::{AuditAction, InitiatorId, PackageId, ParticipantAssignmentId};
use tracing::info;

use super::{Engine, Outcome, Txn};
use crate::audit::build_trail;
use crate::error::{EngineError, Result};
use crate::model::{Package, PackageStatus, TerminalDetails};
use crate::notify::{Effect, NotificationKind};
use crate::resolver;

impl Engine {
    /// Sent to Completed, once the detector flips
    pub(super) fn complete(&self, txn: &mut Txn) {
        txn.package.status = PackageStatus::Completed;
        txn.package.completed_at = Some(txn.now);
        let now = txn.now;
        txn.package
            .record(AuditAction::Completed, "system", None, now, None);

        for participant in txn.package.contacts() {
            self.notify_participant(txn, &participant, NotificationKind::Completed);
        }
        self.notify_initiator(txn, NotificationKind::Completed);
        txn.effects
            .push(Effect::RenderAudit(build_trail(&txn.package)));

        info!(package_id = %txn.package.id, "package completed");
    }

    /// Persist the lazy expiry transition and return the expired package
    pub(super) fn expire(&self, stored: Package, now: DateTime<Utc>) -> Result<Package> {
        let expected = stored.version;
        let mut txn = Txn::new(stored, now);
        txn.package.status = PackageStatus::Expired;
        txn.package
            .record(AuditAction::Expired, "system", None, now, None);
        self.notify_initiator(&mut txn, NotificationKind::Expired);

        info!(package_id = %txn.package.id, "package expired");
        let (package, _) = self.commit(txn, Some(expected))?;
        Ok(package)
    }

    /// Any field assignee may reject, with a reason
    pub fn reject_package(
        &self,
        package_id: &PackageId,
        participant: &ParticipantAssignmentId,
        reason: &str,
        ip: Option<&str>,
    ) -> Result<Outcome<()>> {
        self.mutate(package_id, "reject", |engine, txn| {
            if txn.package.status != PackageStatus::Sent {
                return Err(EngineError::InvalidState {
                    status: txn.package.status,
                });
            }
            let actor = resolver::by_assignment(&txn.package, participant)?;
            if !actor.holds_assignments() {
                return Err(EngineError::forbidden(
                    "only field assignees can reject a package",
                ));
            }
            let reason = reason.trim();
            if reason.is_empty() {
                return Err(EngineError::validation("a rejection reason is required"));
            }

            let now = txn.now;
            txn.package.status = PackageStatus::Rejected;
            txn.package.rejection = Some(TerminalDetails {
                actor: actor.participant_assignment_id.to_string(),
                actor_name: actor.name.clone(),
                reason: Some(reason.to_string()),
                at: now,
                ip: ip.map(str::to_string),
            });
            txn.package.record(
                AuditAction::Rejected,
                &actor.email,
                ip,
                now,
                Some(reason.to_string()),
            );

            let kind = NotificationKind::Rejected {
                by: actor.name.clone(),
                reason: reason.to_string(),
            };
            engine.notify_initiator(txn, kind.clone());
            for other in txn.package.contacts() {
                if other.contact_id != actor.contact_id {
                    engine.notify_participant(txn, &other, kind.clone());
                }
            }
            Ok(())
        })
    }

    /// Initiator-only, and only once the package went out
    pub fn revoke_package(
        &self,
        package_id: &PackageId,
        initiator: &InitiatorId,
        reason: Option<&str>,
        ip: Option<&str>,
    ) -> Result<Outcome<()>> {
        self.mutate(package_id, "revoke", |engine, txn| {
            Engine::ensure_initiator(&txn.package, initiator)?;
            if txn.package.status != PackageStatus::Sent {
                return Err(EngineError::InvalidState {
                    status: txn.package.status,
                });
            }
            let reason = reason
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string);

            let now = txn.now;
            txn.package.status = PackageStatus::Revoked;
            txn.package.revocation = Some(TerminalDetails {
                actor: initiator.to_string(),
                actor_name: initiator.to_string(),
                reason: reason.clone(),
                at: now,
                ip: ip.map(str::to_string),
            });
            txn.package
                .record(AuditAction::Revoked, initiator.as_str(), ip, now, reason.clone());

            for participant in txn.package.contacts() {
                engine.notify_participant(
                    txn,
                    &participant,
                    NotificationKind::Revoked {
                        reason: reason.clone(),
                    },
                );
            }
            Ok(())
        })
    }
}
