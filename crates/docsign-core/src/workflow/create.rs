use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use shared_types::{
    AuditAction, AuditChain, ContactId, FieldId, InitiatorId, PackageId, ParticipantAssignmentId,
};
use tracing::info;

use super::{Engine, Outcome, Txn};
use crate::collaborators::{Contact, LedgerError};
use crate::credits;
use crate::error::{EngineError, Result};
use crate::model::{
    Assignment, Channel, ContentRef, Field, FieldArena, FieldKind, Geometry, Package,
    PackageOptions, PackageStatus, Receiver, Role,
};
use crate::notify::NotificationKind;

#[derive(Debug, Clone, Deserialize)]
pub struct NewAssignment {
    pub contact_id: ContactId,
    #[serde(flatten)]
    pub role: Role,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewField {
    pub id: FieldId,
    pub kind: FieldKind,
    pub geometry: Geometry,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub choices: Vec<String>,
    #[serde(default)]
    pub assignees: Vec<NewAssignment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPackage {
    pub initiator_id: InitiatorId,
    #[serde(default)]
    pub template_id: Option<String>,
    pub name: String,
    pub content: ContentRef,
    pub fields: Vec<NewField>,
    #[serde(default)]
    pub receivers: Vec<ContactId>,
    #[serde(default)]
    pub options: PackageOptions,
    /// Dispatch immediately instead of leaving a draft
    #[serde(default)]
    pub send: bool,
}

fn role_fits(role: &Role, kind: FieldKind) -> bool {
    match role {
        Role::Signer { .. } => kind == FieldKind::Signature,
        Role::Approver => kind == FieldKind::Checkbox,
        Role::FormFiller => kind != FieldKind::Signature,
    }
}

/// Contacts are looked up and ownership-checked once per package
struct Roster<'a> {
    engine: &'a Engine,
    initiator: &'a InitiatorId,
    contacts: BTreeMap<ContactId, Contact>,
}

impl<'a> Roster<'a> {
    fn resolve(&mut self, id: &ContactId) -> Result<&Contact> {
        if !self.contacts.contains_key(id) {
            let contact = self
                .engine
                .deps
                .directory
                .lookup(id)
                .ok_or_else(|| EngineError::not_found("contact", id))?;
            if &contact.owner != self.initiator {
                return Err(EngineError::forbidden(format!(
                    "contact {} does not belong to the initiator",
                    id
                )));
            }
            self.contacts.insert(id.clone(), contact);
        }
        self.contacts
            .get(id)
            .ok_or_else(|| EngineError::not_found("contact", id))
    }
}

impl Engine {
    fn build_package(&self, request: NewPackage, now: DateTime<Utc>) -> Result<Package> {
        if request.name.trim().is_empty() {
            return Err(EngineError::validation("package name must not be empty"));
        }
        if request.fields.is_empty() {
            return Err(EngineError::validation("a package needs at least one field"));
        }

        let policy = request.options.otp_policy;
        let mut roster = Roster {
            engine: self,
            initiator: &request.initiator_id,
            contacts: BTreeMap::new(),
        };
        let mut fields = FieldArena::default();

        for new in request.fields {
            let mut seen = HashSet::new();
            let mut assignees = Vec::with_capacity(new.assignees.len());
            for a in new.assignees {
                if !seen.insert(a.contact_id.clone()) {
                    return Err(EngineError::validation(format!(
                        "contact {} is assigned twice to field {}",
                        a.contact_id, new.id
                    )));
                }
                if !role_fits(&a.role, new.kind) {
                    return Err(EngineError::validation(format!(
                        "a {} cannot be assigned to {} field {}",
                        a.role.label(),
                        new.kind,
                        new.id
                    )));
                }
                let contact = roster.resolve(&a.contact_id)?;
                let role = match a.role {
                    Role::Signer { channels } if channels.is_empty() => Role::Signer {
                        channels: policy.channels(),
                    },
                    Role::Signer { channels } => {
                        if let Some(c) = channels.iter().find(|c| !policy.allows(**c)) {
                            return Err(EngineError::validation(format!(
                                "{} verification is not allowed by the package policy",
                                c
                            )));
                        }
                        Role::Signer { channels }
                    }
                    other => other,
                };
                if role.allows_channel(Channel::Sms) && contact.phone.is_none() {
                    return Err(EngineError::validation(format!(
                        "{} has no phone number for SMS verification",
                        contact.name
                    )));
                }
                // Every (field, contact, role) gets its own handle
                assignees.push(Assignment {
                    participant_assignment_id: ParticipantAssignmentId::generate(),
                    contact_id: contact.id.clone(),
                    name: contact.name.clone(),
                    email: contact.email.clone(),
                    phone: contact.phone.clone(),
                    role,
                    completion: None,
                });
            }

            let field = Field {
                id: new.id,
                kind: new.kind,
                geometry: new.geometry,
                required: new.required,
                choices: new.choices,
                assignees,
                value: None,
            };
            fields
                .push(field)
                .map_err(|id| EngineError::validation(format!("duplicate field id {}", id)))?;
        }

        let mut receivers: Vec<Receiver> = Vec::new();
        for contact_id in &request.receivers {
            if roster.contacts.contains_key(contact_id)
                || receivers.iter().any(|r| &r.contact_id == contact_id)
            {
                return Err(EngineError::validation(format!(
                    "contact {} is already a participant",
                    contact_id
                )));
            }
            let contact = roster.resolve(contact_id)?;
            receivers.push(Receiver {
                participant_assignment_id: ParticipantAssignmentId::generate(),
                contact_id: contact.id.clone(),
                name: contact.name.clone(),
                email: contact.email.clone(),
                added_by: None,
            });
        }

        let id = PackageId::generate();
        Ok(Package {
            audit: AuditChain::new(id.as_str(), now),
            id,
            initiator_id: request.initiator_id,
            template_id: request.template_id,
            name: request.name.trim().to_string(),
            content: request.content,
            fields,
            receivers,
            options: request.options,
            status: PackageStatus::Draft,
            reassignment_history: Vec::new(),
            receiver_history: Vec::new(),
            rejection: None,
            revocation: None,
            last_reminded: BTreeMap::new(),
            version: 0,
            created_at: now,
            updated_at: now,
            sent_at: None,
            completed_at: None,
        })
    }

    pub fn create_package(&self, request: NewPackage) -> Result<Outcome<PackageId>> {
        let now = self.deps.clock.now();
        let send = request.send;
        let package = self.build_package(request, now)?;
        let mut txn = Txn::new(package, now);
        let initiator = txn.package.initiator_id.clone();
        txn.package
            .record(AuditAction::Created, initiator.as_str(), None, now, None);

        if send {
            if let Err(e) = self.dispatch_draft(&mut txn) {
                self.refund(&txn);
                return Err(e);
            }
        }

        let (package, effects) = self.commit(txn, None)?;
        info!(
            package_id = %package.id,
            status = %package.status,
            fields = package.fields.len(),
            "package created"
        );
        Ok(Outcome {
            value: package.id.clone(),
            package,
            effects,
        })
    }

    /// Draft to Sent for a package created earlier
    pub fn send_package(
        &self,
        package_id: &PackageId,
        initiator: &InitiatorId,
    ) -> Result<Outcome<u32>> {
        self.mutate(package_id, "send", |engine, txn| {
            Engine::ensure_initiator(&txn.package, initiator)?;
            if txn.package.status != PackageStatus::Draft {
                return Err(EngineError::InvalidState {
                    status: txn.package.status,
                });
            }
            engine.dispatch_draft(txn)
        })
    }

    /// Debit credits and fan out the first notifications; returns the credits used
    fn dispatch_draft(&self, txn: &mut Txn) -> Result<u32> {
        if txn.package.is_past_expiry(txn.now) {
            return Err(EngineError::validation("expiry time is already in the past"));
        }

        let required = credits::credits_required(&txn.package);
        self.deps
            .ledger
            .debit(&txn.package.initiator_id, required)
            .map_err(|e| match e {
                LedgerError::Insufficient {
                    required,
                    available,
                } => EngineError::InsufficientCredits {
                    required,
                    available,
                },
                LedgerError::Unavailable(msg) => EngineError::Storage(msg),
            })?;
        txn.debited = required;

        let now = txn.now;
        txn.package.status = PackageStatus::Sent;
        txn.package.sent_at = Some(now);
        let initiator = txn.package.initiator_id.clone();
        txn.package.record(
            AuditAction::Sent { credits: required },
            initiator.as_str(),
            None,
            now,
            None,
        );

        for participant in txn.package.participants() {
            let roles: Vec<String> = {
                let mut labels: Vec<String> = txn
                    .package
                    .fields
                    .slots_for_participant(&participant.participant_assignment_id)
                    .iter()
                    .map(|&s| txn.package.fields.assignment(s).role.label().to_string())
                    .collect();
                labels.sort();
                labels.dedup();
                labels
            };
            let kind = if roles.is_empty() {
                NotificationKind::ForYourRecords
            } else {
                NotificationKind::ActionRequired { roles }
            };
            self.notify_participant(txn, &participant, kind);
        }

        info!(
            package_id = %txn.package.id,
            credits = required,
            "package sent"
        );
        Ok(required)
    }
}
