use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared_types::{AuditAction, FieldId, PackageId, ParticipantAssignmentId};
use tracing::{info, warn};

use super::{Engine, Outcome, Txn};
use crate::error::{EngineError, Result};
use crate::model::{
    Channel, Completion, CompletionMethod, FieldKind, FieldValue, PackageStatus, Role,
    SignatureRecord, SubmittedValue,
};
use crate::notify::{Effect, Notification, NotificationKind, Recipient};
use crate::otp::{self, OtpChallenge, OtpKey};
use crate::resolver::{self, Participant};

/// What the requester learns about an issued code; never the code itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OtpIssued {
    pub channel: Channel,
    pub expires_at: DateTime<Utc>,
}

/// Participant actions only make sense once the package went out
fn ensure_sent(txn: &Txn) -> Result<()> {
    if txn.package.status != PackageStatus::Sent {
        return Err(EngineError::InvalidState {
            status: txn.package.status,
        });
    }
    Ok(())
}

impl Engine {
    pub fn submit_fields(
        &self,
        package_id: &PackageId,
        participant: &ParticipantAssignmentId,
        values: BTreeMap<FieldId, SubmittedValue>,
        ip: Option<&str>,
    ) -> Result<Outcome<Vec<FieldId>>> {
        self.mutate(package_id, "submit_fields", |engine, txn| {
            ensure_sent(txn)?;
            let actor = resolver::by_assignment(&txn.package, participant)?;
            if values.is_empty() {
                return Err(EngineError::validation("no field values submitted"));
            }

            let now = txn.now;
            let mut submitted = Vec::with_capacity(values.len());
            for (field_id, raw) in &values {
                apply_value(txn, &actor, field_id, raw, ip, now)?;
                submitted.push(field_id.clone());
            }

            txn.package.record(
                AuditAction::FieldsSubmitted {
                    field_ids: submitted.iter().map(|f| f.to_string()).collect(),
                },
                &actor.email,
                ip,
                now,
                None,
            );
            engine.notify_progress(txn);
            Ok(submitted)
        })
    }

    /// Send a fresh code to a signer, superseding any earlier one for the field
    pub fn issue_otp(
        &self,
        package_id: &PackageId,
        field_id: &FieldId,
        participant: &ParticipantAssignmentId,
        channel: Channel,
        destination: &str,
    ) -> Result<Outcome<OtpIssued>> {
        self.mutate(package_id, "issue_otp", |engine, txn| {
            ensure_sent(txn)?;
            let actor = resolver::by_assignment(&txn.package, participant)?;
            let dest = otp::validate_issue(&txn.package, field_id, &actor, channel, destination)?;

            let ttl = match channel {
                Channel::Email => engine.config.email_otp_ttl,
                Channel::Sms => engine.config.sms_otp_ttl,
            };
            let code = engine.deps.codes.six_digits();
            let challenge = OtpChallenge::new(
                OtpKey {
                    package_id: package_id.clone(),
                    field_id: field_id.clone(),
                    participant: participant.clone(),
                    channel,
                },
                code,
                txn.now,
                ttl,
            );
            let expires_at = challenge.expires_at;
            let code = challenge.code.clone();
            txn.issued.push(challenge);

            let now = txn.now;
            txn.package.record(
                AuditAction::OtpIssued {
                    field_id: field_id.to_string(),
                    channel: channel.to_string(),
                },
                &actor.email,
                None,
                now,
                None,
            );

            let language = engine.language_of(&actor.snapshot());
            txn.effects.push(Effect::Notify(Notification {
                package_id: txn.package.id.clone(),
                package_name: txn.package.name.clone(),
                recipient: Recipient::Participant {
                    participant_assignment_id: actor.participant_assignment_id.clone(),
                    name: actor.name.clone(),
                    address: dest.address,
                    channel,
                    language,
                },
                link: None,
                kind: NotificationKind::VerificationCode { code, expires_at },
            }));

            info!(
                package_id = %package_id,
                field_id = %field_id,
                participant = %participant,
                %channel,
                "verification code issued"
            );
            Ok(OtpIssued {
                channel,
                expires_at,
            })
        })
    }

    /// Check a code and sign every pending signature field of the same contact
    pub fn verify_otp(
        &self,
        package_id: &PackageId,
        field_id: &FieldId,
        participant: &ParticipantAssignmentId,
        code: &str,
        ip: Option<&str>,
    ) -> Result<Outcome<Vec<FieldId>>> {
        self.mutate(package_id, "verify_otp", |engine, txn| {
            ensure_sent(txn)?;
            let actor = resolver::by_assignment(&txn.package, participant)?;
            let position = txn
                .package
                .fields
                .position(field_id)
                .ok_or_else(|| EngineError::not_found("field", field_id))?;
            let slot = actor
                .slots
                .iter()
                .copied()
                .find(|s| s.field == position && txn.package.fields.assignment(*s).role.is_signer())
                .ok_or_else(|| EngineError::forbidden("participant is not a signer of this field"))?;
            // Checked before the challenge is consumed
            if txn.package.fields.assignment(slot).is_signed() {
                return Err(EngineError::validation("field is already signed"));
            }

            let verified = engine
                .otps
                .verify(package_id, field_id, participant, code, txn.now)
                .map_err(|e| {
                    warn!(
                        package_id = %package_id,
                        field_id = %field_id,
                        participant = %participant,
                        error = %e,
                        "verification failed"
                    );
                    e
                })?;

            let now = txn.now;
            let pending = resolver::pending_signatures(&txn.package, &actor.contact_id);
            let mut signed: Vec<FieldId> = Vec::with_capacity(pending.len());
            for slot in pending {
                let assignment = txn.package.fields.assignment_mut(slot);
                assignment.completion = Some(Completion {
                    at: now,
                    method: CompletionMethod::from(verified.channel),
                    ip: ip.map(str::to_string),
                    with_otp: true,
                });
                let identity = match verified.channel {
                    Channel::Email => assignment.email.clone(),
                    Channel::Sms => assignment.phone.clone().unwrap_or_default(),
                };
                let record = SignatureRecord {
                    contact_id: assignment.contact_id.clone(),
                    name: assignment.name.clone(),
                    identity,
                    channel: verified.channel,
                    signed_at: now,
                    ip: ip.map(str::to_string),
                    otp_code: verified.code.clone(),
                };

                let field = txn.package.fields.at_mut(slot.field);
                // The first signer's record is painted; cosigners live in their completions
                if field.value.is_none() {
                    field.value = Some(FieldValue::Signature(record));
                }
                if !signed.contains(&field.id) {
                    signed.push(field.id.clone());
                }
            }

            // Every other code this contact holds is moot now
            let mut handles: Vec<ParticipantAssignmentId> = txn
                .package
                .fields
                .slots_for_contact(&actor.contact_id)
                .iter()
                .map(|&s| txn.package.fields.assignment(s).participant_assignment_id.clone())
                .collect();
            handles.sort();
            handles.dedup();
            txn.stale.extend(handles);

            txn.package.record(
                AuditAction::Signed {
                    field_ids: signed.iter().map(|f| f.to_string()).collect(),
                    channel: verified.channel.to_string(),
                },
                &actor.email,
                ip,
                now,
                None,
            );
            info!(
                package_id = %package_id,
                contact = %actor.contact_id,
                fields = signed.len(),
                "signature applied"
            );
            engine.notify_progress(txn);
            Ok(signed)
        })
    }
}

/// Validate and store one submitted value for the acting participant
fn apply_value(
    txn: &mut Txn,
    actor: &Participant,
    field_id: &FieldId,
    raw: &SubmittedValue,
    ip: Option<&str>,
    now: DateTime<Utc>,
) -> Result<()> {
    let position = txn
        .package
        .fields
        .position(field_id)
        .ok_or_else(|| EngineError::not_found("field", field_id))?;
    let slot = actor
        .slots
        .iter()
        .copied()
        .find(|s| s.field == position && !txn.package.fields.assignment(*s).role.is_signer())
        .ok_or_else(|| {
            EngineError::forbidden(format!("participant cannot fill field {}", field_id))
        })?;

    let field = txn.package.fields.at(position);
    let value = field.accept(raw).map_err(EngineError::ValidationFailed)?;
    if field.required && value.is_blank() {
        return Err(EngineError::validation(format!(
            "field {} is required",
            field_id
        )));
    }

    let role = txn.package.fields.assignment(slot).role.clone();
    let completion = match (&role, field.kind, &value) {
        (Role::Approver, _, FieldValue::Bool(true)) => Some(CompletionMethod::Approval),
        (Role::Approver, _, _) => {
            return Err(EngineError::validation(format!(
                "approving field {} requires checking it",
                field_id
            )));
        }
        (_, FieldKind::Checkbox, FieldValue::Bool(checked)) => {
            checked.then_some(CompletionMethod::FormSubmission)
        }
        (_, _, v) if v.is_blank() => None,
        _ => Some(CompletionMethod::FormSubmission),
    };

    let assignment = txn.package.fields.assignment_mut(slot);
    assignment.completion = match (completion, assignment.completion.take()) {
        // Approvals are not restamped
        (Some(CompletionMethod::Approval), Some(previous)) => Some(previous),
        (Some(method), _) => Some(Completion {
            at: now,
            method,
            ip: ip.map(str::to_string),
            with_otp: false,
        }),
        (None, _) => None,
    };
    txn.package.fields.at_mut(position).value = Some(value);
    Ok(())
}
