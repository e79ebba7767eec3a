//! Workflow controller
//!
//! ```text
//! Draft ──send──▶ Sent ──┬──▶ Completed   (completion detector)
//!                        ├──▶ Rejected    (any assignee)
//!                        ├──▶ Revoked     (initiator)
//!                        └──▶ Expired     (lazy, on access after expires_at)
//! ```
//!
//! Every operation runs under the package's lock: load, guard, mutate a
//! clone, commit with a version check, then hand the owed effects to the
//! collaborators. An error anywhere before the commit leaves the stored
//! package untouched.

mod act;
mod create;
mod participants;
mod reminders;
mod terminal;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use shared_types::{InitiatorId, PackageId, ParticipantAssignmentId};
use tracing::{debug, info, warn};

use crate::clock::{Clock, CodeGenerator};
use crate::collaborators::{ContactDirectory, QuotaLedger};
use crate::completion;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::model::{Package, ParticipantRef};
use crate::notify::{self, AuditRenderer, Effect, Notification, NotificationKind, Notifier, Recipient};
use crate::otp::{OtpChallenge, OtpStore};
use crate::store::PackageStore;

pub use act::OtpIssued;
pub use create::{NewAssignment, NewField, NewPackage};
pub use participants::ParticipantView;

/// Everything the engine talks to
#[derive(Clone)]
pub struct Collaborators {
    pub directory: Arc<dyn ContactDirectory>,
    pub ledger: Arc<dyn QuotaLedger>,
    pub store: Arc<dyn PackageStore>,
    pub notifier: Arc<dyn Notifier>,
    pub renderer: Arc<dyn AuditRenderer>,
    pub clock: Arc<dyn Clock>,
    pub codes: Arc<dyn CodeGenerator>,
}

/// Result of a committed operation
#[derive(Debug, Clone)]
pub struct Outcome<T> {
    pub value: T,
    pub package: Package,
    /// Obligations already handed to the collaborators
    pub effects: Vec<Effect>,
}

impl<T> Outcome<T> {
    pub fn notifications(&self) -> impl Iterator<Item = &Notification> {
        self.effects.iter().filter_map(|e| match e {
            Effect::Notify(n) => Some(n),
            Effect::RenderAudit(_) => None,
        })
    }
}

/// Working copy of a package inside one operation
pub(crate) struct Txn {
    pub package: Package,
    pub now: DateTime<Utc>,
    pub effects: Vec<Effect>,
    debited: u32,
    /// Challenges that go live only once the package is saved
    issued: Vec<OtpChallenge>,
    /// Handles whose live challenges are dropped once the package is saved
    stale: Vec<ParticipantAssignmentId>,
}

impl Txn {
    fn new(package: Package, now: DateTime<Utc>) -> Self {
        Self {
            package,
            now,
            effects: Vec::new(),
            debited: 0,
            issued: Vec::new(),
            stale: Vec::new(),
        }
    }
}

pub struct Engine {
    config: EngineConfig,
    deps: Collaborators,
    otps: OtpStore,
    locks: Mutex<HashMap<PackageId, Arc<Mutex<()>>>>,
}

impl Engine {
    pub fn new(config: EngineConfig, deps: Collaborators) -> Self {
        let otps = OtpStore::new(config.max_otp_attempts);
        Self {
            config,
            deps,
            otps,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Live verification challenges across all packages
    pub fn pending_challenges(&self) -> usize {
        self.otps.len()
    }

    /// Packages that currently own an entry in the lock map
    pub fn open_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Read a package, surfacing lazy expiry
    pub fn get_package(&self, id: &PackageId) -> Result<Package> {
        let lock = self.lock_for(id);
        let _held = lock.lock().unwrap_or_else(|e| e.into_inner());
        let stored = self.load_locked(id)?;
        let now = self.deps.clock.now();
        if stored.is_lapsed(now) {
            return self.expire(stored, now);
        }
        if stored.is_terminal() {
            self.release(id);
        }
        Ok(stored)
    }

    /// Initiator-scoped check shared by send and revoke
    fn ensure_initiator(package: &Package, initiator: &InitiatorId) -> Result<()> {
        if &package.initiator_id != initiator {
            return Err(EngineError::forbidden(
                "only the package initiator can do this",
            ));
        }
        Ok(())
    }

    fn lock_for(&self, id: &PackageId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(id.clone()).or_default().clone()
    }

    /// Forget the lock of a package that is terminal or unknown. Such a
    /// package is never written again, so a later caller minting a fresh
    /// mutex for it cannot race a writer.
    fn release(&self, id: &PackageId) {
        self.locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }

    /// Load under a held lock; an unknown id leaves no lock entry behind
    fn load_locked(&self, id: &PackageId) -> Result<Package> {
        self.load(id).inspect_err(|e| {
            if matches!(e, EngineError::NotFound(_)) {
                self.release(id);
            }
        })
    }

    fn load(&self, id: &PackageId) -> Result<Package> {
        self.deps
            .store
            .load(id)?
            .ok_or_else(|| EngineError::not_found("package", id))
    }

    /// Shared checkpoint of every mutating entry point
    fn guard(&self, stored: &Package, now: DateTime<Utc>) -> Result<()> {
        if stored.is_terminal() {
            self.release(&stored.id);
            return Err(EngineError::InvalidState {
                status: stored.status,
            });
        }
        if stored.is_lapsed(now) {
            self.expire(stored.clone(), now)?;
            return Err(EngineError::InvalidState {
                status: crate::model::PackageStatus::Expired,
            });
        }
        Ok(())
    }

    /// Load, guard and mutate a copy of the package, then commit it
    fn mutate<T>(
        &self,
        id: &PackageId,
        operation: &'static str,
        apply: impl FnOnce(&Self, &mut Txn) -> Result<T>,
    ) -> Result<Outcome<T>> {
        let lock = self.lock_for(id);
        let _held = lock.lock().unwrap_or_else(|e| e.into_inner());

        let stored = self.load_locked(id)?;
        let now = self.deps.clock.now();
        self.guard(&stored, now)?;

        let expected = stored.version;
        let mut txn = Txn::new(stored, now);
        let value = match apply(self, &mut txn) {
            Ok(value) => value,
            Err(e) => {
                debug!(package_id = %id, operation, error = %e, "operation rejected");
                self.refund(&txn);
                return Err(e);
            }
        };
        let (package, effects) = self.commit(txn, Some(expected))?;
        info!(
            package_id = %package.id,
            operation,
            status = %package.status,
            version = package.version,
            "package updated"
        );
        Ok(Outcome {
            value,
            package,
            effects,
        })
    }

    /// Run completion detection, persist, then dispatch effects
    fn commit(&self, mut txn: Txn, expected: Option<u64>) -> Result<(Package, Vec<Effect>)> {
        if txn.package.status == crate::model::PackageStatus::Sent
            && completion::is_package_complete(&txn.package)
        {
            self.complete(&mut txn);
        }

        txn.package.version = expected.map_or(1, |v| v + 1);
        txn.package.updated_at = txn.now;

        if let Err(e) = self.deps.store.save(&txn.package, expected) {
            warn!(package_id = %txn.package.id, error = %e, "package commit failed");
            self.refund(&txn);
            return Err(e.into());
        }

        for participant in txn.stale.drain(..) {
            self.otps.purge_participant(&txn.package.id, &participant);
        }
        for challenge in txn.issued.drain(..) {
            self.otps.insert(challenge);
        }
        if txn.package.is_terminal() {
            self.otps.purge_package(&txn.package.id);
            self.release(&txn.package.id);
        }
        notify::dispatch(
            &txn.effects,
            self.deps.notifier.as_ref(),
            self.deps.renderer.as_ref(),
        );
        Ok((txn.package, txn.effects))
    }

    fn refund(&self, txn: &Txn) {
        if txn.debited == 0 {
            return;
        }
        if let Err(e) = self
            .deps
            .ledger
            .refund(&txn.package.initiator_id, txn.debited)
        {
            warn!(
                package_id = %txn.package.id,
                credits = txn.debited,
                error = %e,
                "credit refund failed"
            );
        }
    }

    fn language_of(&self, participant: &ParticipantRef) -> String {
        self.deps
            .directory
            .lookup(&participant.contact_id)
            .map(|c| c.language)
            .unwrap_or_else(|| "en".to_string())
    }

    fn notify_participant(
        &self,
        txn: &mut Txn,
        participant: &ParticipantRef,
        kind: NotificationKind,
    ) {
        let package = &txn.package;
        let link = self.config.participant_link(
            package.id.as_str(),
            participant.participant_assignment_id.as_str(),
        );
        let notification = Notification {
            package_id: package.id.clone(),
            package_name: package.name.clone(),
            recipient: Recipient::Participant {
                participant_assignment_id: participant.participant_assignment_id.clone(),
                name: participant.name.clone(),
                address: participant.email.clone(),
                channel: crate::model::Channel::Email,
                language: self.language_of(participant),
            },
            link: Some(link),
            kind,
        };
        txn.effects.push(Effect::Notify(notification));
    }

    fn notify_initiator(&self, txn: &mut Txn, kind: NotificationKind) {
        let package = &txn.package;
        let notification = Notification {
            package_id: package.id.clone(),
            package_name: package.name.clone(),
            recipient: Recipient::Initiator {
                initiator_id: package.initiator_id.clone(),
            },
            link: None,
            kind,
        };
        txn.effects.push(Effect::Notify(notification));
    }

    /// Tell the initiator who is done and who is not, unless the package just completed
    fn notify_progress(&self, txn: &mut Txn) {
        if completion::is_package_complete(&txn.package) {
            return;
        }
        let progress = completion::progress(&txn.package);
        debug!(package_id = %txn.package.id, progress = %progress.summary(), "progress");
        self.notify_initiator(
            txn,
            NotificationKind::Progress {
                done: progress.done,
                pending: progress.pending,
            },
        );
    }
}
