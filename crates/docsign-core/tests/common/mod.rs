//! Shared harness for the engine integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use docsign_core::{
    Channel, Collaborators, Contact, ContentRef, Engine, EngineConfig, FieldKind, FixedClock,
    Geometry, InMemoryDirectory, InMemoryLedger, InMemoryStore, NewAssignment, NewField,
    NewPackage, Outcome, Package, PackageOptions, PackageStore, RecordingSink, Role,
};
use docsign_core::clock::CodeGenerator;
use shared_types::{ContactId, FieldId, InitiatorId, PackageId, ParticipantAssignmentId};

pub const INITIATOR: &str = "init-1";

/// Deterministic codes: 100001, 100002, ...
#[derive(Default)]
pub struct SequenceCodes(AtomicU32);

impl CodeGenerator for SequenceCodes {
    fn six_digits(&self) -> String {
        format!("{:06}", 100_000 + self.0.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

pub fn start() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

pub struct Harness {
    pub engine: Engine,
    pub directory: Arc<InMemoryDirectory>,
    pub ledger: Arc<InMemoryLedger>,
    pub store: Arc<InMemoryStore>,
    pub sink: Arc<RecordingSink>,
    pub clock: Arc<FixedClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_credits(100)
    }

    pub fn with_credits(credits: u32) -> Self {
        let directory = Arc::new(InMemoryDirectory::new());
        let ledger = Arc::new(InMemoryLedger::new());
        let store = Arc::new(InMemoryStore::new());
        let sink = Arc::new(RecordingSink::new());
        let clock = Arc::new(FixedClock::new(start()));
        ledger.grant(&initiator(), credits);

        let engine = Engine::new(
            EngineConfig::default(),
            Collaborators {
                directory: directory.clone(),
                ledger: ledger.clone(),
                store: store.clone(),
                notifier: sink.clone(),
                renderer: sink.clone(),
                clock: clock.clone(),
                codes: Arc::new(SequenceCodes::default()),
            },
        );
        Self {
            engine,
            directory,
            ledger,
            store,
            sink,
            clock,
        }
    }

    /// A second engine over the same collaborators but a different store
    pub fn engine_with_store(&self, store: Arc<dyn PackageStore>) -> Engine {
        Engine::new(
            EngineConfig::default(),
            Collaborators {
                directory: self.directory.clone(),
                ledger: self.ledger.clone(),
                store,
                notifier: self.sink.clone(),
                renderer: self.sink.clone(),
                clock: self.clock.clone(),
                codes: Arc::new(SequenceCodes::default()),
            },
        )
    }

    /// Register contacts owned by the default initiator
    pub fn contacts(&self, ids: &[&str]) {
        for (n, id) in ids.iter().enumerate() {
            self.directory.upsert(Contact {
                id: ContactId::from(*id),
                owner: initiator(),
                name: id.to_string(),
                email: format!("{}@example.com", id),
                phone: Some(format!("+1 555 010 {:04}", n)),
                language: "en".to_string(),
            });
        }
    }

    pub fn balance(&self) -> u32 {
        use docsign_core::QuotaLedger;
        self.ledger.balance(&initiator()).unwrap()
    }

    pub fn create(&self, fields: Vec<NewField>, receivers: &[&str], options: PackageOptions) -> Package {
        self.engine
            .create_package(request(fields, receivers, options, true))
            .unwrap()
            .package
    }

    pub fn package(&self, id: &PackageId) -> Package {
        self.engine.get_package(id).unwrap()
    }

    /// Issue an email code and verify it straight away
    pub fn sign(
        &self,
        package: &PackageId,
        field: &str,
        participant: &ParticipantAssignmentId,
    ) -> Outcome<Vec<FieldId>> {
        let pkg = self.package(package);
        let email = pkg
            .fields
            .slots_for_participant(participant)
            .first()
            .map(|&s| pkg.fields.assignment(s).email.clone())
            .unwrap();
        self.engine
            .issue_otp(package, &FieldId::from(field), participant, Channel::Email, &email)
            .unwrap();
        let code = self.sink.last_code_for(participant).unwrap();
        self.engine
            .verify_otp(package, &FieldId::from(field), participant, &code, Some("203.0.113.9"))
            .unwrap()
    }
}

pub fn initiator() -> InitiatorId {
    InitiatorId::from(INITIATOR)
}

pub fn request(
    fields: Vec<NewField>,
    receivers: &[&str],
    options: PackageOptions,
    send: bool,
) -> NewPackage {
    NewPackage {
        initiator_id: initiator(),
        template_id: None,
        name: "Lease agreement".to_string(),
        content: ContentRef {
            storage_key: "uploads/lease.pdf".to_string(),
            sha256: shared_types::hash_document(b"%PDF-1.7 lease"),
        },
        fields,
        receivers: receivers.iter().map(|c| ContactId::from(*c)).collect(),
        options,
        send,
    }
}

fn geometry() -> Geometry {
    Geometry {
        page: 1,
        x: 72.0,
        y: 600.0,
        width: 180.0,
        height: 36.0,
    }
}

fn new_field(id: &str, kind: FieldKind, assignees: Vec<NewAssignment>) -> NewField {
    NewField {
        id: FieldId::from(id),
        kind,
        geometry: geometry(),
        required: true,
        choices: Vec::new(),
        assignees,
    }
}

pub fn signature(id: &str, signers: &[&str]) -> NewField {
    new_field(
        id,
        FieldKind::Signature,
        signers
            .iter()
            .map(|c| NewAssignment {
                contact_id: ContactId::from(*c),
                role: Role::Signer { channels: vec![] },
            })
            .collect(),
    )
}

pub fn filled(id: &str, kind: FieldKind, filler: &str) -> NewField {
    new_field(
        id,
        kind,
        vec![NewAssignment {
            contact_id: ContactId::from(filler),
            role: Role::FormFiller,
        }],
    )
}

pub fn approval(id: &str, approver: &str) -> NewField {
    new_field(
        id,
        FieldKind::Checkbox,
        vec![NewAssignment {
            contact_id: ContactId::from(approver),
            role: Role::Approver,
        }],
    )
}

/// First handle a contact holds, field assignments before receiver entries
pub fn handle(package: &Package, contact: &str) -> ParticipantAssignmentId {
    let contact = ContactId::from(contact);
    package
        .fields
        .slots_for_contact(&contact)
        .first()
        .map(|&s| package.fields.assignment(s).participant_assignment_id.clone())
        .or_else(|| {
            package
                .receivers
                .iter()
                .find(|r| r.contact_id == contact)
                .map(|r| r.participant_assignment_id.clone())
        })
        .unwrap()
}

/// The handle a contact holds on one particular field
pub fn handle_on(package: &Package, field: &str, contact: &str) -> ParticipantAssignmentId {
    package
        .fields
        .get(&FieldId::from(field))
        .unwrap()
        .assignees
        .iter()
        .find(|a| a.contact_id.as_str() == contact)
        .map(|a| a.participant_assignment_id.clone())
        .unwrap()
}

pub fn signed(package: &Package, field: &str) -> bool {
    package
        .fields
        .get(&FieldId::from(field))
        .unwrap()
        .assignees
        .iter()
        .all(|a| a.is_signed())
}
