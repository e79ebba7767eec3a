//! Engine configuration

use chrono::Duration;

/// Email codes cost nothing to resend, so they live longer than SMS codes
pub const EMAIL_OTP_TTL_SECS: i64 = 5 * 60;
pub const SMS_OTP_TTL_SECS: i64 = 60;

/// Failed attempts tolerated before a challenge is discarded
pub const MAX_OTP_ATTEMPTS: u32 = 4;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub email_otp_ttl: Duration,
    pub sms_otp_ttl: Duration,
    pub max_otp_attempts: u32,
    /// Prefix for participant links, e.g. `https://sign.example.com/p`
    pub signing_link_base: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            email_otp_ttl: Duration::seconds(EMAIL_OTP_TTL_SECS),
            sms_otp_ttl: Duration::seconds(SMS_OTP_TTL_SECS),
            max_otp_attempts: MAX_OTP_ATTEMPTS,
            signing_link_base: "http://localhost:3001/p".to_string(),
        }
    }
}

impl EngineConfig {
    /// Link a participant acts through
    pub fn participant_link(&self, package_id: &str, participant: &str) -> String {
        format!(
            "{}/{}/{}",
            self.signing_link_base.trim_end_matches('/'),
            package_id,
            participant
        )
    }
}
