use chrono::{DateTime, Duration, Utc};
use shared_types::{AuditAction, ParticipantAssignmentId};
use tracing::{debug, warn};

use super::{Engine, Txn};
use crate::error::Result;
use crate::model::{Package, PackageStatus};
use crate::notify::{Effect, NotificationKind};
use crate::resolver;

impl Engine {
    /// Reminder obligations owed at the current clock reading, across all packages.
    ///
    /// A participant is due when they still have pending fields and their last
    /// reminder, or the send time when there was none, is at least one cadence
    /// interval old. Packages past their expiry are expired instead.
    pub fn due_reminders(&self) -> Result<Vec<Effect>> {
        let mut owed = Vec::new();
        for id in self.deps.store.list_ids()? {
            let lock = self.lock_for(&id);
            let _held = lock.lock().unwrap_or_else(|e| e.into_inner());

            let stored = match self.load(&id) {
                Ok(p) => p,
                Err(e) => {
                    warn!(package_id = %id, error = %e, "skipping package in reminder sweep");
                    continue;
                }
            };
            if stored.status != PackageStatus::Sent {
                if stored.is_terminal() {
                    self.release(&id);
                }
                continue;
            }
            if stored.options.reminder.is_none() {
                continue;
            }
            let now = self.deps.clock.now();
            if stored.is_lapsed(now) {
                if let Err(e) = self.expire(stored, now) {
                    warn!(package_id = %id, error = %e, "lazy expiry failed");
                }
                continue;
            }

            let expected = stored.version;
            let mut txn = Txn::new(stored, now);
            let reminded = self.remind(&mut txn);
            if reminded == 0 {
                continue;
            }
            match self.commit(txn, Some(expected)) {
                Ok((_, effects)) => owed.extend(effects),
                Err(e) => warn!(package_id = %id, error = %e, "reminder commit failed"),
            }
        }
        Ok(owed)
    }

    fn remind(&self, txn: &mut Txn) -> usize {
        let Some(cadence) = txn.package.options.reminder else {
            return 0;
        };
        let interval = Duration::hours(i64::from(cadence.interval_hours));
        let now = txn.now;

        let due: Vec<_> = txn
            .package
            .participants()
            .into_iter()
            .filter_map(|p| {
                let resolved =
                    resolver::by_assignment(&txn.package, &p.participant_assignment_id).ok()?;
                let pending = resolver::pending_for(&txn.package, &resolved).len();
                if pending == 0 {
                    return None;
                }
                let since = last_contact(&txn.package, &p.participant_assignment_id)?;
                (now - since >= interval).then_some((p, pending))
            })
            .collect();

        for (participant, pending_fields) in &due {
            txn.package
                .last_reminded
                .insert(participant.participant_assignment_id.clone(), now);
            self.notify_participant(
                txn,
                participant,
                NotificationKind::Reminder {
                    pending_fields: *pending_fields,
                },
            );
        }
        if !due.is_empty() {
            txn.package.record(
                AuditAction::ReminderSent {
                    participants: due.len() as u32,
                },
                "system",
                None,
                now,
                None,
            );
            debug!(package_id = %txn.package.id, participants = due.len(), "reminders due");
        }
        due.len()
    }
}

fn last_contact(package: &Package, participant: &ParticipantAssignmentId) -> Option<DateTime<Utc>> {
    package
        .last_reminded
        .get(participant)
        .copied()
        .or(package.sent_at)
}
