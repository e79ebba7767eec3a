//! Package aggregate and its entities

mod arena;
mod field;
mod package;
mod participant;

pub use arena::{AssignmentSlot, FieldArena};
pub use field::{Field, FieldKind, FieldValue, Geometry, SignatureRecord, SubmittedValue};
pub use package::{
    ContentRef, OtpPolicy, Package, PackageOptions, PackageStatus, ReassignmentRecord,
    ReceiverRecord, ReminderCadence, TerminalDetails,
};
pub use participant::{
    Assignment, Channel, Completion, CompletionMethod, ParticipantRef, Receiver, Role,
};
