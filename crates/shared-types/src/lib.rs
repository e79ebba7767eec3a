pub mod audit;
pub mod types;

pub use audit::{hash_document, hash_ip, AuditAction, AuditChain, AuditEvent};
pub use types::{ContactId, FieldId, IdParseError, InitiatorId, PackageId, ParticipantAssignmentId};
