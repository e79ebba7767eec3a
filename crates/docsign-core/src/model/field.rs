use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use shared_types::{ContactId, FieldId};

use super::participant::{Assignment, Channel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Textarea,
    Date,
    Dropdown,
    Radio,
    Checkbox,
    Signature,
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FieldKind::Text => "text",
            FieldKind::Textarea => "textarea",
            FieldKind::Date => "date",
            FieldKind::Dropdown => "dropdown",
            FieldKind::Radio => "radio",
            FieldKind::Checkbox => "checkbox",
            FieldKind::Signature => "signature",
        };
        f.write_str(s)
    }
}

/// Placement on the document, in PDF points
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub page: u32,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Signature evidence written when an OTP verification succeeds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRecord {
    pub contact_id: ContactId,
    pub name: String,
    /// Email address or phone number, depending on `channel`
    pub identity: String,
    pub channel: Channel,
    pub signed_at: DateTime<Utc>,
    pub ip: Option<String>,
    pub otp_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Bool(bool),
    Signature(SignatureRecord),
}

impl FieldValue {
    pub fn is_blank(&self) -> bool {
        match self {
            FieldValue::Text(s) => s.trim().is_empty(),
            FieldValue::Bool(_) | FieldValue::Signature(_) => false,
        }
    }
}

/// Raw value a participant submits for a non-signature field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubmittedValue {
    Bool(bool),
    Text(String),
}

impl SubmittedValue {
    pub fn is_blank(&self) -> bool {
        match self {
            SubmittedValue::Text(s) => s.trim().is_empty(),
            SubmittedValue::Bool(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub id: FieldId,
    pub kind: FieldKind,
    pub geometry: Geometry,
    #[serde(default)]
    pub required: bool,
    /// Allowed values for dropdown and radio fields
    #[serde(default)]
    pub choices: Vec<String>,
    #[serde(default)]
    pub assignees: Vec<Assignment>,
    #[serde(default)]
    pub value: Option<FieldValue>,
}

impl Field {
    pub fn has_value(&self) -> bool {
        self.value.as_ref().is_some_and(|v| !v.is_blank())
    }

    /// Check a submitted value against the field type and convert it
    pub fn accept(&self, value: &SubmittedValue) -> Result<FieldValue, String> {
        match (self.kind, value) {
            (FieldKind::Signature, _) => Err(format!(
                "field {} is a signature field and is completed by verification",
                self.id
            )),
            (FieldKind::Checkbox, SubmittedValue::Bool(b)) => Ok(FieldValue::Bool(*b)),
            (FieldKind::Checkbox, SubmittedValue::Text(s)) => match s.trim() {
                "true" => Ok(FieldValue::Bool(true)),
                "false" => Ok(FieldValue::Bool(false)),
                other => Err(format!("checkbox {} expects true or false, got {:?}", self.id, other)),
            },
            (_, SubmittedValue::Bool(_)) => {
                Err(format!("field {} of type {} expects text", self.id, self.kind))
            }
            (FieldKind::Date, SubmittedValue::Text(s)) => {
                let trimmed = s.trim();
                if !trimmed.is_empty() {
                    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").map_err(|_| {
                        format!("field {} expects a YYYY-MM-DD date, got {:?}", self.id, trimmed)
                    })?;
                }
                Ok(FieldValue::Text(trimmed.to_string()))
            }
            (FieldKind::Dropdown | FieldKind::Radio, SubmittedValue::Text(s)) => {
                let trimmed = s.trim();
                if !trimmed.is_empty()
                    && !self.choices.is_empty()
                    && !self.choices.iter().any(|c| c == trimmed)
                {
                    return Err(format!("{:?} is not an option of field {}", trimmed, self.id));
                }
                Ok(FieldValue::Text(trimmed.to_string()))
            }
            (FieldKind::Text | FieldKind::Textarea, SubmittedValue::Text(s)) => {
                Ok(FieldValue::Text(s.clone()))
            }
        }
    }
}
