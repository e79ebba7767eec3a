//! One-time code challenges
//!
//! ```text
//! Issued ──▶ Verified   (code matched, challenge consumed)
//!    │
//!    ├─────▶ Exhausted  (attempt after the failure cap, challenge consumed)
//!    │
//!    └─────▶ Expired    (read after expires_at, challenge consumed)
//! ```
//!
//! Challenges live in an explicit keyed map. Expiry is checked when a
//! challenge is read; nothing sweeps the map in the background.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use shared_types::{FieldId, PackageId, ParticipantAssignmentId};

use crate::error::{EngineError, Result};
use crate::model::{Channel, FieldKind, Package};
use crate::resolver::Participant;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OtpKey {
    pub package_id: PackageId,
    pub field_id: FieldId,
    pub participant: ParticipantAssignmentId,
    pub channel: Channel,
}

impl OtpKey {
    fn with_channel(&self, channel: Channel) -> Self {
        Self {
            channel,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpChallenge {
    pub key: OtpKey,
    pub code: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub attempts: u32,
}

impl OtpChallenge {
    pub fn new(key: OtpKey, code: String, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            key,
            code,
            issued_at: now,
            expires_at: now + ttl,
            attempts: 0,
        }
    }
}

/// Result of a successful verification, captured before the challenge is dropped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedOtp {
    pub channel: Channel,
    pub code: String,
}

/// Where the code goes, as validated against the contact record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub channel: Channel,
    pub address: String,
}

#[derive(Debug)]
pub struct OtpStore {
    max_attempts: u32,
    challenges: Mutex<HashMap<OtpKey, OtpChallenge>>,
}

impl OtpStore {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            challenges: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<OtpKey, OtpChallenge>> {
        self.challenges.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store a fresh challenge, discarding any earlier one for the same
    /// (package, field, participant) on either channel
    pub fn issue(
        &self,
        key: OtpKey,
        code: String,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> OtpChallenge {
        let challenge = OtpChallenge::new(key, code, now, ttl);
        self.insert(challenge.clone());
        challenge
    }

    /// Install a challenge built earlier, superseding as `issue` does
    pub fn insert(&self, challenge: OtpChallenge) {
        let key = challenge.key.clone();
        let mut map = self.lock();
        map.remove(&key.with_channel(Channel::Email));
        map.remove(&key.with_channel(Channel::Sms));
        map.insert(key, challenge);
    }

    pub fn verify(
        &self,
        package_id: &PackageId,
        field_id: &FieldId,
        participant: &ParticipantAssignmentId,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<VerifiedOtp> {
        let mut map = self.lock();
        let base = OtpKey {
            package_id: package_id.clone(),
            field_id: field_id.clone(),
            participant: participant.clone(),
            channel: Channel::Email,
        };
        let key = [Channel::Email, Channel::Sms]
            .into_iter()
            .map(|c| base.with_channel(c))
            .find(|k| map.contains_key(k))
            .ok_or(EngineError::OtpInvalidOrExpired)?;

        let Some(challenge) = map.get_mut(&key) else {
            return Err(EngineError::OtpInvalidOrExpired);
        };

        if now > challenge.expires_at {
            map.remove(&key);
            return Err(EngineError::OtpInvalidOrExpired);
        }

        if challenge.attempts >= self.max_attempts {
            map.remove(&key);
            return Err(EngineError::OtpAttemptsExceeded);
        }

        if !constant_time_eq(challenge.code.as_bytes(), code.trim().as_bytes()) {
            challenge.attempts += 1;
            return Err(EngineError::OtpIncorrect {
                remaining: self.max_attempts - challenge.attempts,
            });
        }

        let verified = VerifiedOtp {
            channel: key.channel,
            code: challenge.code.clone(),
        };
        map.remove(&key);
        Ok(verified)
    }

    /// Drop every challenge of a package, used once it reaches a terminal state
    pub fn purge_package(&self, package_id: &PackageId) {
        self.lock().retain(|k, _| &k.package_id != package_id);
    }

    /// Drop the challenges of one participant handle
    pub fn purge_participant(&self, package_id: &PackageId, participant: &ParticipantAssignmentId) {
        self.lock()
            .retain(|k, _| !(&k.package_id == package_id && &k.participant == participant));
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Strip everything but digits so formatting differences never block a match
pub fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(char::is_ascii_digit).collect()
}

/// Check that `participant` may request a code for `field_id` on `channel`
/// and that the supplied destination matches the stored contact details
pub fn validate_issue(
    package: &Package,
    field_id: &FieldId,
    participant: &Participant,
    channel: Channel,
    destination: &str,
) -> Result<Destination> {
    let position = package
        .fields
        .position(field_id)
        .ok_or_else(|| EngineError::not_found("field", field_id))?;
    let field = package.fields.at(position);
    if field.kind != FieldKind::Signature {
        return Err(EngineError::validation(format!(
            "field {} is not a signature field",
            field_id
        )));
    }

    let slot = participant
        .slots
        .iter()
        .copied()
        .find(|s| s.field == position)
        .ok_or_else(|| EngineError::forbidden("participant is not assigned to this field"))?;
    let assignment = package.fields.assignment(slot);

    if !assignment.role.is_signer() {
        return Err(EngineError::forbidden("only signers can request a verification code"));
    }
    if !assignment.role.allows_channel(channel) || !package.options.otp_policy.allows(channel) {
        return Err(EngineError::forbidden(format!(
            "{} verification is not enabled for this signer",
            channel
        )));
    }
    if assignment.is_signed() {
        return Err(EngineError::validation("field is already signed"));
    }

    let address = match channel {
        Channel::Email => {
            if destination.trim() != assignment.email {
                return Err(EngineError::validation("email does not match the signer"));
            }
            assignment.email.clone()
        }
        Channel::Sms => {
            let stored = assignment
                .phone
                .as_deref()
                .ok_or_else(|| EngineError::validation("signer has no phone number"))?;
            let supplied = normalize_phone(destination);
            if supplied.is_empty() || supplied != normalize_phone(stored) {
                return Err(EngineError::validation("phone does not match the signer"));
            }
            stored.to_string()
        }
    };

    Ok(Destination { channel, address })
}
