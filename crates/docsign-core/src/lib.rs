//! Document signing core logic
//!
//! This crate provides the package workflow engine: the package data model,
//! participant and role resolution, OTP verification, completion detection,
//! reassignment and credit accounting.
//!
//! Persistence, delivery, billing and rendering stay behind traits; the
//! engine only decides what is owed to them.

pub mod audit;
pub mod clock;
pub mod collaborators;
pub mod completion;
pub mod config;
pub mod credits;
pub mod error;
pub mod model;
pub mod notify;
pub mod otp;
pub mod reassign;
pub mod resolver;
pub mod store;
pub mod workflow;

#[cfg(test)]
mod testing;

pub use audit::{build_trail, AuditTrail};
pub use clock::{Clock, CodeGenerator, FixedClock, OsCodeGenerator, SystemClock};
pub use collaborators::{
    Contact, ContactDirectory, InMemoryDirectory, InMemoryLedger, LedgerError, QuotaLedger,
};
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use model::*;
pub use notify::{
    AuditRenderer, CollaboratorError, Effect, Notification, NotificationKind, Notifier, Recipient,
    RecordingSink, TracingSink,
};
pub use store::{InMemoryStore, PackageStore, StoreError};
pub use workflow::{
    Collaborators, Engine, NewAssignment, NewField, NewPackage, OtpIssued, Outcome,
    ParticipantView,
};
