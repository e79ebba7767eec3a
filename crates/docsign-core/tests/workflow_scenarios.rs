//! End-to-end workflow scenarios against in-memory collaborators

mod common;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};

use chrono::Duration;
use common::*;
use docsign_core::{
    Channel, CollaboratorError, Collaborators, Effect, Engine, EngineConfig, EngineError,
    FieldKind, FieldValue, InMemoryStore, Notification, NotificationKind, Notifier, OtpPolicy,
    Package, PackageOptions, PackageStatus, PackageStore, ReminderCadence, StoreError,
    SubmittedValue,
};
use pretty_assertions::assert_eq;
use shared_types::{AuditAction, ContactId, FieldId, PackageId, ParticipantAssignmentId};

fn values(pairs: &[(&str, &str)]) -> BTreeMap<FieldId, SubmittedValue> {
    pairs
        .iter()
        .map(|(f, v)| (FieldId::from(*f), SubmittedValue::Text(v.to_string())))
        .collect()
}

// ============================================================
// Credits
// ============================================================

#[test]
fn credits_debited_per_two_signers_on_send() {
    for (signers, credits) in [(1, 1), (2, 1), (3, 2), (4, 2), (5, 3)] {
        let h = Harness::with_credits(10);
        let names: Vec<String> = (0..signers).map(|i| format!("signer{}", i)).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        h.contacts(&names);
        h.contacts(&["filler", "approver", "watcher"]);

        let mut fields: Vec<_> = names
            .iter()
            .enumerate()
            .map(|(i, n)| signature(&format!("sig-{}", i), &[n]))
            .collect();
        fields.push(filled("name", FieldKind::Text, "filler"));
        fields.push(approval("ok", "approver"));

        let pkg = h.create(fields, &["watcher"], PackageOptions::default());

        assert_eq!(pkg.status, PackageStatus::Sent);
        assert_eq!(h.balance(), 10 - credits, "{} signers", signers);
    }
}

#[test]
fn same_signer_on_many_fields_counts_once() {
    let h = Harness::with_credits(5);
    h.contacts(&["alice"]);
    h.create(
        vec![signature("sig-1", &["alice"]), signature("sig-2", &["alice"])],
        &[],
        PackageOptions::default(),
    );
    assert_eq!(h.balance(), 4);
}

#[test]
fn insufficient_credits_fail_the_whole_send() {
    let h = Harness::with_credits(1);
    h.contacts(&["a", "b", "c"]);
    let fields = vec![signature("sig-1", &["a", "b"]), signature("sig-2", &["c"])];

    let err = h
        .engine
        .create_package(request(fields.clone(), &[], PackageOptions::default(), true))
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::InsufficientCredits {
            required: 2,
            available: 1
        }
    );
    assert_eq!(h.balance(), 1);
    assert!(h.store.is_empty());
    assert!(h.sink.notifications().is_empty());

    // A draft can be created and sent once the balance allows it
    let draft = h
        .engine
        .create_package(request(fields, &[], PackageOptions::default(), false))
        .unwrap();
    assert_eq!(draft.package.status, PackageStatus::Draft);
    assert_eq!(draft.package.version, 1);

    let id = draft.value;
    assert!(matches!(
        h.engine.send_package(&id, &initiator()),
        Err(EngineError::InsufficientCredits { .. })
    ));
    assert_eq!(h.package(&id).status, PackageStatus::Draft);

    h.ledger.grant(&initiator(), 1);
    let sent = h.engine.send_package(&id, &initiator()).unwrap();
    assert_eq!(sent.value, 2);
    assert_eq!(sent.package.status, PackageStatus::Sent);
    assert_eq!(h.balance(), 0);
    assert_eq!(
        h.engine.send_package(&id, &initiator()).unwrap_err(),
        EngineError::InvalidState {
            status: PackageStatus::Sent
        }
    );
}

// ============================================================
// Sending
// ============================================================

#[test]
fn send_fans_out_action_required_and_for_your_records() {
    let h = Harness::new();
    h.contacts(&["alice", "bob", "rita"]);
    let out = h
        .engine
        .create_package(request(
            vec![
                signature("sig-1", &["alice"]),
                filled("date", FieldKind::Date, "bob"),
            ],
            &["rita"],
            PackageOptions::default(),
            true,
        ))
        .unwrap();

    let kinds: Vec<_> = out.notifications().map(|n| n.kind.clone()).collect();
    assert_eq!(
        kinds,
        vec![
            NotificationKind::ActionRequired {
                roles: vec!["signer".to_string()]
            },
            NotificationKind::ActionRequired {
                roles: vec!["form_filler".to_string()]
            },
            NotificationKind::ForYourRecords,
        ]
    );
    assert_eq!(h.sink.notifications().len(), 3);
    let link = out.notifications().next().unwrap().link.clone().unwrap();
    assert!(link.starts_with("http://localhost:3001/p/"));
}

#[test]
fn creation_rejects_foreign_contacts_and_bad_roles() {
    let h = Harness::new();
    h.contacts(&["alice"]);
    h.directory.upsert(docsign_core::Contact {
        id: ContactId::from("mallory"),
        owner: shared_types::InitiatorId::from("someone-else"),
        name: "Mallory".into(),
        email: "mallory@example.com".into(),
        phone: None,
        language: "en".into(),
    });

    let foreign = h.engine.create_package(request(
        vec![signature("sig-1", &["mallory"])],
        &[],
        PackageOptions::default(),
        true,
    ));
    assert!(matches!(foreign, Err(EngineError::Forbidden(_))));

    let missing = h.engine.create_package(request(
        vec![signature("sig-1", &["nobody"])],
        &[],
        PackageOptions::default(),
        true,
    ));
    assert!(matches!(missing, Err(EngineError::NotFound(_))));

    let mut wrong = filled("sig-1", FieldKind::Signature, "alice");
    wrong.required = true;
    let bad_role =
        h.engine
            .create_package(request(vec![wrong], &[], PackageOptions::default(), true));
    assert!(matches!(bad_role, Err(EngineError::ValidationFailed(_))));
    assert_eq!(h.balance(), 100);
}

// ============================================================
// OTP
// ============================================================

#[test]
fn only_the_latest_of_five_codes_verifies() {
    let h = Harness::new();
    h.contacts(&["alice"]);
    let pkg = h.create(vec![signature("sig-1", &["alice"])], &[], PackageOptions::default());
    let alice = handle(&pkg, "alice");
    let sig = FieldId::from("sig-1");

    let mut previous: Option<String> = None;
    for _ in 0..5 {
        h.engine
            .issue_otp(&pkg.id, &sig, &alice, Channel::Email, "alice@example.com")
            .unwrap();
        let code = h.sink.last_code_for(&alice).unwrap();
        if let Some(old) = previous.replace(code) {
            assert_eq!(
                h.engine.verify_otp(&pkg.id, &sig, &alice, &old, None).unwrap_err(),
                EngineError::OtpIncorrect { remaining: 3 }
            );
        }
    }
    assert_eq!(h.engine.pending_challenges(), 1);

    let latest = previous.unwrap();
    let out = h.engine.verify_otp(&pkg.id, &sig, &alice, &latest, None).unwrap();
    assert_eq!(out.package.status, PackageStatus::Completed);
}

#[test]
fn fifth_attempt_fails_even_when_correct() {
    let h = Harness::new();
    h.contacts(&["alice"]);
    let pkg = h.create(vec![signature("sig-1", &["alice"])], &[], PackageOptions::default());
    let alice = handle(&pkg, "alice");
    let sig = FieldId::from("sig-1");

    h.engine
        .issue_otp(&pkg.id, &sig, &alice, Channel::Email, "alice@example.com")
        .unwrap();
    let code = h.sink.last_code_for(&alice).unwrap();
    let version = h.package(&pkg.id).version;

    for remaining in [3, 2, 1, 0] {
        assert_eq!(
            h.engine.verify_otp(&pkg.id, &sig, &alice, "999999", None).unwrap_err(),
            EngineError::OtpIncorrect { remaining }
        );
    }
    assert_eq!(
        h.engine.verify_otp(&pkg.id, &sig, &alice, &code, None).unwrap_err(),
        EngineError::OtpAttemptsExceeded
    );
    assert_eq!(
        h.engine.verify_otp(&pkg.id, &sig, &alice, &code, None).unwrap_err(),
        EngineError::OtpInvalidOrExpired
    );

    let after = h.package(&pkg.id);
    assert_eq!(after.version, version, "failed attempts never touch the package");
    assert!(!signed(&after, "sig-1"));
}

#[test]
fn sms_codes_expire_after_a_minute_email_after_five() {
    let h = Harness::new();
    h.contacts(&["alice"]);
    let options = PackageOptions {
        otp_policy: OtpPolicy::Both,
        ..PackageOptions::default()
    };
    let pkg = h.create(vec![signature("sig-1", &["alice"])], &[], options);
    let alice = handle(&pkg, "alice");
    let sig = FieldId::from("sig-1");

    let issued = h
        .engine
        .issue_otp(&pkg.id, &sig, &alice, Channel::Sms, "15550100000")
        .unwrap();
    assert_eq!(issued.value.expires_at, start() + Duration::seconds(60));
    let code = h.sink.last_code_for(&alice).unwrap();
    h.clock.advance(Duration::seconds(61));
    assert_eq!(
        h.engine.verify_otp(&pkg.id, &sig, &alice, &code, None).unwrap_err(),
        EngineError::OtpInvalidOrExpired
    );

    h.engine
        .issue_otp(&pkg.id, &sig, &alice, Channel::Email, "alice@example.com")
        .unwrap();
    let code = h.sink.last_code_for(&alice).unwrap();
    h.clock.advance(Duration::seconds(299));
    let out = h.engine.verify_otp(&pkg.id, &sig, &alice, &code, None).unwrap();
    match &out.package.fields.get(&sig).unwrap().value {
        Some(FieldValue::Signature(record)) => {
            assert_eq!(record.channel, Channel::Email);
            assert_eq!(record.identity, "alice@example.com");
        }
        other => panic!("expected a signature, got {:?}", other),
    }
}

#[test]
fn issue_checks_destination_and_role() {
    let h = Harness::new();
    h.contacts(&["alice", "bob"]);
    let pkg = h.create(
        vec![
            signature("sig-1", &["alice"]),
            filled("name", FieldKind::Text, "bob"),
        ],
        &[],
        PackageOptions::default(),
    );
    let sig = FieldId::from("sig-1");

    assert!(matches!(
        h.engine
            .issue_otp(&pkg.id, &sig, &handle(&pkg, "alice"), Channel::Email, "eve@example.com"),
        Err(EngineError::ValidationFailed(_))
    ));
    assert!(matches!(
        h.engine
            .issue_otp(&pkg.id, &sig, &handle(&pkg, "alice"), Channel::Sms, "15550100000"),
        Err(EngineError::Forbidden(_))
    ));
    assert!(matches!(
        h.engine
            .issue_otp(&pkg.id, &sig, &handle(&pkg, "bob"), Channel::Email, "bob@example.com"),
        Err(EngineError::Forbidden(_))
    ));
    assert_eq!(
        h.engine
            .issue_otp(
                &pkg.id,
                &sig,
                &ParticipantAssignmentId::from("ghost"),
                Channel::Email,
                "x"
            )
            .unwrap_err()
            .to_string(),
        "not a valid participant"
    );
    assert_eq!(h.engine.pending_challenges(), 0);
}

// ============================================================
// Propagation and completion
// ============================================================

#[test]
fn verification_signs_every_pending_field_of_the_same_contact_only() {
    let h = Harness::new();
    h.contacts(&["alice", "bob"]);
    let pkg = h.create(
        vec![
            signature("sig-1", &["alice"]),
            signature("sig-2", &["bob"]),
            signature("sig-3", &["alice", "bob"]),
        ],
        &[],
        PackageOptions::default(),
    );

    let out = h.sign(&pkg.id, "sig-1", &handle(&pkg, "alice"));
    assert_eq!(
        out.value,
        vec![FieldId::from("sig-1"), FieldId::from("sig-3")]
    );
    let after = out.package;
    assert!(signed(&after, "sig-1"));
    assert!(!signed(&after, "sig-2"));
    let sig3 = after.fields.get(&FieldId::from("sig-3")).unwrap();
    assert!(sig3.assignees[0].is_signed());
    assert!(!sig3.assignees[1].is_signed());
    assert_eq!(after.status, PackageStatus::Sent);

    let done = h.sign(&pkg.id, "sig-2", &handle(&pkg, "bob"));
    assert_eq!(done.package.status, PackageStatus::Completed);
}

#[test]
fn form_filler_then_signer_completes_the_package() {
    let h = Harness::new();
    h.contacts(&["xavier", "yara"]);
    let pkg = h.create(
        vec![
            filled("full-name", FieldKind::Text, "xavier"),
            filled("address", FieldKind::Textarea, "xavier"),
            signature("sig", &["yara"]),
        ],
        &[],
        PackageOptions::default(),
    );
    let x = handle_on(&pkg, "full-name", "xavier");
    let x_address = handle_on(&pkg, "address", "xavier");
    assert_ne!(x, x_address);

    h.engine
        .submit_fields(&pkg.id, &x, values(&[("full-name", "Xavier Doe")]), Some("198.51.100.4"))
        .unwrap();
    assert!(matches!(
        h.engine
            .submit_fields(&pkg.id, &x, values(&[("address", "1 Main St")]), None),
        Err(EngineError::Forbidden(_))
    ));
    let out = h
        .engine
        .submit_fields(&pkg.id, &x_address, values(&[("address", "1 Main St")]), Some("198.51.100.4"))
        .unwrap();
    assert_eq!(out.package.status, PackageStatus::Sent);
    assert!(out
        .notifications()
        .any(|n| matches!(&n.kind, NotificationKind::Progress { done, .. } if done == &vec!["xavier".to_string()])));

    h.sink.clear();
    let out = h.sign(&pkg.id, "sig", &handle(&pkg, "yara"));
    let pkg = out.package;
    assert_eq!(pkg.status, PackageStatus::Completed);
    assert!(pkg.completed_at.is_some());
    assert!(pkg.audit.verify().is_ok());
    assert!(matches!(
        pkg.audit.events.last().map(|e| &e.action),
        Some(AuditAction::Completed)
    ));

    let trails = h.sink.trails();
    assert_eq!(trails.len(), 1);
    assert_eq!(trails[0].participants.len(), 3, "one entry per handle");
    assert!(trails[0].chain_verified);
    let completed_notices = h
        .sink
        .notifications()
        .into_iter()
        .filter(|n| n.kind == NotificationKind::Completed)
        .count();
    assert_eq!(completed_notices, 3, "each contact once, and the initiator");
    assert_eq!(h.engine.pending_challenges(), 0);

    assert_eq!(
        h.engine
            .submit_fields(&pkg.id, &x, values(&[("full-name", "Changed")]), None)
            .unwrap_err(),
        EngineError::InvalidState {
            status: PackageStatus::Completed
        }
    );
}

#[test]
fn approver_completes_checkbox_by_submitting_true() {
    let h = Harness::new();
    h.contacts(&["ann"]);
    let pkg = h.create(vec![approval("ok", "ann")], &[], PackageOptions::default());
    let ann = handle(&pkg, "ann");

    let refused = h.engine.submit_fields(
        &pkg.id,
        &ann,
        [(FieldId::from("ok"), SubmittedValue::Bool(false))].into(),
        None,
    );
    assert!(matches!(refused, Err(EngineError::ValidationFailed(_))));

    let out = h
        .engine
        .submit_fields(
            &pkg.id,
            &ann,
            [(FieldId::from("ok"), SubmittedValue::Bool(true))].into(),
            None,
        )
        .unwrap();
    assert_eq!(out.package.status, PackageStatus::Completed);
}

#[test]
fn rejected_submission_leaves_package_unchanged() {
    let h = Harness::new();
    h.contacts(&["xavier", "yara"]);
    let pkg = h.create(
        vec![
            filled("start", FieldKind::Date, "xavier"),
            filled("name", FieldKind::Text, "xavier"),
            signature("sig", &["yara"]),
        ],
        &[],
        PackageOptions::default(),
    );
    let x = handle_on(&pkg, "start", "xavier");
    let before = h.package(&pkg.id);

    let err = h
        .engine
        .submit_fields(&pkg.id, &x, values(&[("start", "31/12/2024")]), None)
        .unwrap_err();
    assert!(matches!(err, EngineError::ValidationFailed(_)));

    let err = h
        .engine
        .submit_fields(&pkg.id, &handle(&pkg, "yara"), values(&[("name", "Y")]), None)
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));

    let after = h.package(&pkg.id);
    assert_eq!(after.version, before.version);
    assert!(after.fields.get(&FieldId::from("name")).unwrap().value.is_none());
}

#[test]
fn one_verification_signs_through_every_handle_of_the_contact() {
    let h = Harness::new();
    h.contacts(&["alice", "bob"]);
    let pkg = h.create(
        vec![
            signature("sig-1", &["alice"]),
            signature("sig-2", &["alice"]),
            signature("sig-3", &["bob"]),
        ],
        &[],
        PackageOptions::default(),
    );
    let first = handle_on(&pkg, "sig-1", "alice");
    let second = handle_on(&pkg, "sig-2", "alice");
    assert_ne!(first, second);

    let out = h.sign(&pkg.id, "sig-1", &first);
    assert_eq!(out.value, vec![FieldId::from("sig-1"), FieldId::from("sig-2")]);
    assert!(signed(&out.package, "sig-1"));
    assert!(signed(&out.package, "sig-2"));
    assert!(!signed(&out.package, "sig-3"));

    // The second handle still reaches the package, with nothing left to do
    let view = h.engine.participant_view(&pkg.id, &second).unwrap();
    assert!(view.pending_fields.is_empty());
}

#[test]
fn code_left_open_on_a_field_signed_through_another_handle_is_refused() {
    let h = Harness::new();
    h.contacts(&["alice", "bob"]);
    let pkg = h.create(
        vec![
            signature("sig-1", &["alice"]),
            signature("sig-2", &["alice"]),
            signature("sig-3", &["bob"]),
        ],
        &[],
        PackageOptions::default(),
    );
    let first = handle_on(&pkg, "sig-1", "alice");
    let second = handle_on(&pkg, "sig-2", "alice");
    let sig2 = FieldId::from("sig-2");

    h.engine
        .issue_otp(&pkg.id, &sig2, &second, Channel::Email, "alice@example.com")
        .unwrap();
    let stale = h.sink.last_code_for(&second).unwrap();
    h.sign(&pkg.id, "sig-1", &first);
    assert_eq!(h.engine.pending_challenges(), 0);

    let before = h.package(&pkg.id);
    assert_eq!(
        h.engine
            .verify_otp(&pkg.id, &sig2, &second, &stale, None)
            .unwrap_err(),
        EngineError::ValidationFailed("field is already signed".to_string())
    );
    let after = h.package(&pkg.id);
    assert_eq!(after.version, before.version);
    assert_eq!(after.audit.events.len(), before.audit.events.len());
}

// ============================================================
// Reassignment
// ============================================================

fn reassignable(h: &Harness) -> Package {
    h.contacts(&["alice", "bob", "carol", "rita", "sam"]);
    h.create(
        vec![
            signature("sig-1", &["alice"]),
            filled("date", FieldKind::Date, "alice"),
            signature("sig-2", &["bob"]),
        ],
        &["rita"],
        PackageOptions {
            allow_reassign: true,
            allow_receivers_to_add: true,
            ..PackageOptions::default()
        },
    )
}

#[test]
fn reassignment_blocked_by_a_completed_field_of_that_handle() {
    let h = Harness::new();
    let pkg = reassignable(&h);
    let date = handle_on(&pkg, "date", "alice");
    h.engine
        .submit_fields(&pkg.id, &date, values(&[("date", "2024-05-01")]), None)
        .unwrap();

    let err = h
        .engine
        .reassign(&pkg.id, &date, &ContactId::from("carol"), Some("away"), None)
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::AlreadyCompleted {
            fields: vec!["date".to_string()]
        }
    );
}

#[test]
fn reassignment_moves_only_the_obligation_behind_one_handle() {
    let h = Harness::new();
    let pkg = reassignable(&h);
    let sig = handle_on(&pkg, "sig-1", "alice");
    let date = handle_on(&pkg, "date", "alice");
    h.engine
        .submit_fields(&pkg.id, &date, values(&[("date", "2024-05-01")]), None)
        .unwrap();

    let out = h
        .engine
        .reassign(&pkg.id, &sig, &ContactId::from("carol"), None, None)
        .unwrap();
    let after = out.package;
    let sig1 = after.fields.get(&FieldId::from("sig-1")).unwrap();
    assert_eq!(sig1.assignees[0].contact_id, ContactId::from("carol"));
    let date_field = after.fields.get(&FieldId::from("date")).unwrap();
    assert_eq!(date_field.assignees[0].contact_id, ContactId::from("alice"));
    assert!(date_field.assignees[0].is_signed());
    assert!(h.engine.participant_view(&pkg.id, &date).is_ok());
}

#[test]
fn reassignment_makes_the_old_handle_inert() {
    let h = Harness::new();
    let pkg = reassignable(&h);
    let bob = handle(&pkg, "bob");

    let out = h
        .engine
        .reassign(&pkg.id, &bob, &ContactId::from("carol"), Some("on leave"), Some("192.0.2.1"))
        .unwrap();
    let carol = out.value.clone();
    assert_ne!(carol, bob);
    assert_eq!(out.package.reassignment_history.len(), 1);
    assert!(out.notifications().any(|n| matches!(
        &n.kind,
        NotificationKind::ReassignedAway { to } if to == "carol"
    )));

    assert!(matches!(
        h.engine
            .issue_otp(&pkg.id, &FieldId::from("sig-2"), &bob, Channel::Email, "bob@example.com"),
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        h.engine.reject_package(&pkg.id, &bob, "no", None),
        Err(EngineError::NotFound(_))
    ));

    let signed_out = h.sign(&pkg.id, "sig-2", &carol);
    let sig2 = signed_out
        .package
        .fields
        .get(&FieldId::from("sig-2"))
        .unwrap()
        .clone();
    assert_eq!(sig2.assignees[0].contact_id, ContactId::from("carol"));
    assert!(sig2.assignees[0].is_signed());
}

#[test]
fn reassigning_to_an_existing_participant_fails() {
    let h = Harness::new();
    let pkg = reassignable(&h);
    let err = h
        .engine
        .reassign(&pkg.id, &handle(&pkg, "bob"), &ContactId::from("alice"), None, None)
        .unwrap_err();
    assert!(matches!(err, EngineError::ValidationFailed(_)));
}

#[test]
fn receivers_can_add_receivers_and_forfeit_access_when_reassigning() {
    let h = Harness::new();
    let pkg = reassignable(&h);
    let rita = handle(&pkg, "rita");

    let added = h
        .engine
        .add_receiver(&pkg.id, &rita, &ContactId::from("sam"), None)
        .unwrap();
    assert_eq!(added.value.added_by, Some(rita.clone()));
    assert_eq!(added.package.receiver_history.len(), 1);
    assert!(h.engine.participant_view(&pkg.id, &rita).is_ok());

    h.engine
        .reassign(&pkg.id, &rita, &ContactId::from("carol"), None, None)
        .unwrap();
    assert!(matches!(
        h.engine.participant_view(&pkg.id, &rita),
        Err(EngineError::NotFound(_))
    ));
}

// ============================================================
// Terminal transitions
// ============================================================

#[test]
fn past_expiry_surfaces_as_expired_without_a_sweep() {
    let h = Harness::new();
    h.contacts(&["alice", "bob"]);
    let options = PackageOptions {
        expires_at: Some(start() + Duration::minutes(10)),
        ..PackageOptions::default()
    };
    let pkg = h.create(
        vec![
            signature("sig-1", &["alice"]),
            filled("name", FieldKind::Text, "bob"),
        ],
        &[],
        options,
    );
    h.clock.advance(Duration::minutes(11));

    assert_eq!(
        h.engine
            .submit_fields(&pkg.id, &handle(&pkg, "bob"), values(&[("name", "Bob")]), None)
            .unwrap_err(),
        EngineError::InvalidState {
            status: PackageStatus::Expired
        }
    );
    assert_eq!(
        h.engine
            .issue_otp(
                &pkg.id,
                &FieldId::from("sig-1"),
                &handle(&pkg, "alice"),
                Channel::Email,
                "alice@example.com"
            )
            .unwrap_err(),
        EngineError::InvalidState {
            status: PackageStatus::Expired
        }
    );

    let stored = h.package(&pkg.id);
    assert_eq!(stored.status, PackageStatus::Expired);
    let expirations = stored
        .audit
        .events
        .iter()
        .filter(|e| e.action == AuditAction::Expired)
        .count();
    assert_eq!(expirations, 1);
}

#[test]
fn rejection_needs_an_assignee_and_a_reason() {
    let h = Harness::new();
    let pkg = reassignable(&h);

    assert!(matches!(
        h.engine.reject_package(&pkg.id, &handle(&pkg, "rita"), "not for me", None),
        Err(EngineError::Forbidden(_))
    ));
    assert!(matches!(
        h.engine.reject_package(&pkg.id, &handle(&pkg, "alice"), "   ", None),
        Err(EngineError::ValidationFailed(_))
    ));

    let out = h
        .engine
        .reject_package(&pkg.id, &handle(&pkg, "alice"), "wrong rent", Some("192.0.2.8"))
        .unwrap();
    let details = out.package.rejection.clone().unwrap();
    assert_eq!(out.package.status, PackageStatus::Rejected);
    assert_eq!(details.reason.as_deref(), Some("wrong rent"));
    assert_eq!(details.actor_name, "alice");

    assert_eq!(
        h.engine
            .revoke_package(&pkg.id, &initiator(), None, None)
            .unwrap_err(),
        EngineError::InvalidState {
            status: PackageStatus::Rejected
        }
    );
}

#[test]
fn only_the_initiator_revokes() {
    let h = Harness::new();
    let pkg = reassignable(&h);

    assert!(matches!(
        h.engine.revoke_package(
            &pkg.id,
            &shared_types::InitiatorId::from("intruder"),
            None,
            None
        ),
        Err(EngineError::Forbidden(_))
    ));
    let out = h
        .engine
        .revoke_package(&pkg.id, &initiator(), Some("terms changed"), None)
        .unwrap();
    assert_eq!(out.package.status, PackageStatus::Revoked);
    assert_eq!(
        out.package.revocation.unwrap().reason.as_deref(),
        Some("terms changed")
    );
}

#[test]
fn draft_past_its_expiry_stays_a_draft() {
    let h = Harness::new();
    h.contacts(&["alice"]);
    let options = PackageOptions {
        expires_at: Some(start() + Duration::hours(1)),
        ..PackageOptions::default()
    };
    let draft = h
        .engine
        .create_package(request(vec![signature("sig-1", &["alice"])], &[], options, false))
        .unwrap();
    h.clock.advance(Duration::hours(2));

    assert_eq!(
        h.engine.send_package(&draft.value, &initiator()).unwrap_err(),
        EngineError::ValidationFailed("expiry time is already in the past".to_string())
    );
    let stored = h.package(&draft.value);
    assert_eq!(stored.status, PackageStatus::Draft);
    assert_eq!(stored.version, 1);
    assert_eq!(h.balance(), 100);
}

#[test]
fn drafts_cannot_be_revoked() {
    let h = Harness::new();
    h.contacts(&["alice"]);
    let draft = h
        .engine
        .create_package(request(
            vec![signature("sig-1", &["alice"])],
            &[],
            PackageOptions::default(),
            false,
        ))
        .unwrap();

    assert_eq!(
        h.engine
            .revoke_package(&draft.value, &initiator(), None, None)
            .unwrap_err(),
        EngineError::InvalidState {
            status: PackageStatus::Draft
        }
    );
    assert_eq!(h.package(&draft.value).status, PackageStatus::Draft);
}

#[test]
fn terminal_packages_leave_no_lock_behind() {
    let h = Harness::new();
    h.contacts(&["alice", "bob"]);
    let pkg = h.create(vec![signature("sig-1", &["alice"])], &[], PackageOptions::default());
    let other = h.create(vec![signature("sig-1", &["bob"])], &[], PackageOptions::default());
    assert_eq!(h.engine.open_locks(), 0);

    h.engine
        .issue_otp(
            &other.id,
            &FieldId::from("sig-1"),
            &handle(&other, "bob"),
            Channel::Email,
            "bob@example.com",
        )
        .unwrap();
    assert_eq!(h.engine.open_locks(), 1);

    let done = h.sign(&pkg.id, "sig-1", &handle(&pkg, "alice"));
    assert_eq!(done.package.status, PackageStatus::Completed);
    assert_eq!(h.engine.open_locks(), 1, "only the package still in flight");

    h.package(&pkg.id);
    assert!(h.engine.revoke_package(&pkg.id, &initiator(), None, None).is_err());
    assert!(h.engine.get_package(&PackageId::from("missing")).is_err());
    assert_eq!(h.engine.open_locks(), 1);

    h.engine
        .revoke_package(&other.id, &initiator(), None, None)
        .unwrap();
    assert_eq!(h.engine.open_locks(), 0);
}

#[test]
fn unknown_package_is_not_found() {
    let h = Harness::new();
    assert_eq!(
        h.engine.get_package(&PackageId::from("missing")).unwrap_err(),
        EngineError::NotFound("package missing not found".to_string())
    );
}

// ============================================================
// Reminders and collaborators
// ============================================================

#[test]
fn reminders_follow_the_cadence_and_skip_finished_participants() {
    let h = Harness::new();
    h.contacts(&["alice", "bob"]);
    let options = PackageOptions {
        reminder: Some(ReminderCadence { interval_hours: 24 }),
        ..PackageOptions::default()
    };
    let pkg = h.create(
        vec![
            signature("sig-1", &["alice"]),
            filled("name", FieldKind::Text, "bob"),
        ],
        &[],
        options,
    );
    h.engine
        .submit_fields(&pkg.id, &handle(&pkg, "bob"), values(&[("name", "Bob")]), None)
        .unwrap();

    h.clock.advance(Duration::hours(23));
    assert!(h.engine.due_reminders().unwrap().is_empty());

    h.clock.advance(Duration::hours(2));
    let due = h.engine.due_reminders().unwrap();
    let reminded: Vec<_> = due
        .iter()
        .filter_map(|e| match e {
            Effect::Notify(n) => n.recipient.participant_id().cloned(),
            Effect::RenderAudit(_) => None,
        })
        .collect();
    assert_eq!(reminded, vec![handle(&pkg, "alice")]);
    assert!(h.engine.due_reminders().unwrap().is_empty());
}

struct Unreachable;

impl Notifier for Unreachable {
    fn notify(&self, _: &Notification) -> Result<(), CollaboratorError> {
        Err(CollaboratorError::Delivery("connection refused".into()))
    }
}

#[test]
fn delivery_failures_never_fail_the_operation() {
    let h = Harness::new();
    h.contacts(&["alice"]);
    let engine = Engine::new(
        EngineConfig::default(),
        Collaborators {
            directory: h.directory.clone(),
            ledger: h.ledger.clone(),
            store: h.store.clone(),
            notifier: std::sync::Arc::new(Unreachable),
            renderer: h.sink.clone(),
            clock: h.clock.clone(),
            codes: std::sync::Arc::new(SequenceCodes::default()),
        },
    );

    let out = engine
        .create_package(request(
            vec![signature("sig-1", &["alice"])],
            &[],
            PackageOptions::default(),
            true,
        ))
        .unwrap();
    assert_eq!(out.package.status, PackageStatus::Sent);
    assert_eq!(out.notifications().count(), 1);
}

// ============================================================
// Concurrency and commits
// ============================================================

#[test]
fn concurrent_cosigners_complete_the_package_once() {
    for _ in 0..16 {
        let h = Harness::new();
        h.contacts(&["alice", "bob"]);
        let pkg = h.create(
            vec![signature("sig-1", &["alice", "bob"])],
            &[],
            PackageOptions::default(),
        );
        let sig = FieldId::from("sig-1");
        let signers: Vec<(ParticipantAssignmentId, String)> = ["alice", "bob"]
            .iter()
            .map(|c| {
                let pa = handle(&pkg, c);
                h.engine
                    .issue_otp(&pkg.id, &sig, &pa, Channel::Email, &format!("{}@example.com", c))
                    .unwrap();
                let code = h.sink.last_code_for(&pa).unwrap();
                (pa, code)
            })
            .collect();

        let barrier = Barrier::new(signers.len());
        let results: Vec<_> = std::thread::scope(|scope| {
            let threads: Vec<_> = signers
                .iter()
                .map(|(pa, code)| {
                    let (engine, barrier, id, sig) = (&h.engine, &barrier, &pkg.id, &sig);
                    scope.spawn(move || {
                        barrier.wait();
                        engine.verify_otp(id, sig, pa, code, None)
                    })
                })
                .collect();
            threads.into_iter().map(|t| t.join().unwrap()).collect()
        });
        assert!(results.iter().all(|r| r.is_ok()), "{:?}", results);

        let stored = h.package(&pkg.id);
        assert_eq!(stored.status, PackageStatus::Completed);
        assert_eq!(stored.version, 5);
        let completions = stored
            .audit
            .events
            .iter()
            .filter(|e| e.action == AuditAction::Completed)
            .count();
        assert_eq!(completions, 1);
        assert_eq!(h.sink.trails().len(), 1);
        assert!(stored.audit.verify().is_ok());
    }
}

#[test]
fn concurrent_submissions_are_applied_one_at_a_time() {
    let h = Harness::new();
    let fillers: Vec<String> = (0..8).map(|i| format!("filler{}", i)).collect();
    let names: Vec<&str> = fillers.iter().map(String::as_str).collect();
    h.contacts(&names);
    h.contacts(&["signer"]);

    let mut fields: Vec<_> = names
        .iter()
        .map(|n| filled(&format!("field-{}", n), FieldKind::Text, n))
        .collect();
    fields.push(signature("sig", &["signer"]));
    let pkg = h.create(fields, &[], PackageOptions::default());

    let barrier = Barrier::new(names.len());
    let results: Vec<_> = std::thread::scope(|scope| {
        let threads: Vec<_> = names
            .iter()
            .map(|n| {
                let field = format!("field-{}", n);
                let pa = handle_on(&pkg, &field, n);
                let (engine, barrier, id) = (&h.engine, &barrier, &pkg.id);
                scope.spawn(move || {
                    barrier.wait();
                    engine.submit_fields(id, &pa, values(&[(field.as_str(), "done")]), None)
                })
            })
            .collect();
        threads.into_iter().map(|t| t.join().unwrap()).collect()
    });
    assert!(results.iter().all(|r| r.is_ok()), "{:?}", results);

    let stored = h.package(&pkg.id);
    assert_eq!(stored.version, 1 + names.len() as u64);
    assert!(names.iter().all(|n| stored
        .fields
        .get(&FieldId::from(format!("field-{}", n)))
        .is_some_and(|f| f.value.is_some())));
    assert!(stored.audit.verify().is_ok());
}

/// Store that loses the next write to a competing writer
#[derive(Default)]
struct Contested {
    inner: InMemoryStore,
    lose_next: AtomicBool,
}

impl Contested {
    fn lose_next_write(&self) {
        self.lose_next.store(true, Ordering::SeqCst);
    }
}

impl PackageStore for Contested {
    fn load(&self, id: &PackageId) -> Result<Option<Package>, StoreError> {
        self.inner.load(id)
    }

    fn save(&self, package: &Package, expected_version: Option<u64>) -> Result<(), StoreError> {
        if self.lose_next.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Conflict {
                expected: expected_version,
                found: expected_version.map(|v| v + 1),
            });
        }
        self.inner.save(package, expected_version)
    }

    fn list_ids(&self) -> Result<Vec<PackageId>, StoreError> {
        self.inner.list_ids()
    }
}

#[test]
fn lost_send_commit_refunds_the_debit() {
    let h = Harness::new();
    h.contacts(&["alice", "bob", "carol"]);
    let store = Arc::new(Contested::default());
    let engine = h.engine_with_store(store.clone());
    let draft = engine
        .create_package(request(
            vec![signature("sig-1", &["alice", "bob", "carol"])],
            &[],
            PackageOptions::default(),
            false,
        ))
        .unwrap();

    store.lose_next_write();
    assert_eq!(
        engine.send_package(&draft.value, &initiator()).unwrap_err(),
        EngineError::Conflict {
            expected: 1,
            found: 2
        }
    );
    assert_eq!(h.balance(), 100);
    assert_eq!(engine.get_package(&draft.value).unwrap().status, PackageStatus::Draft);
    assert!(h.sink.notifications().is_empty());

    let sent = engine.send_package(&draft.value, &initiator()).unwrap();
    assert_eq!(sent.value, 2);
    assert_eq!(h.balance(), 98);
}

#[test]
fn lost_issue_commit_keeps_the_earlier_code_live() {
    let h = Harness::new();
    h.contacts(&["alice", "bob"]);
    let store = Arc::new(Contested::default());
    let engine = h.engine_with_store(store.clone());
    let pkg = engine
        .create_package(request(
            vec![signature("sig-1", &["alice"]), signature("sig-2", &["bob"])],
            &[],
            PackageOptions::default(),
            true,
        ))
        .unwrap()
        .package;
    let alice = handle(&pkg, "alice");
    let sig = FieldId::from("sig-1");

    engine
        .issue_otp(&pkg.id, &sig, &alice, Channel::Email, "alice@example.com")
        .unwrap();
    let first = h.sink.last_code_for(&alice).unwrap();

    store.lose_next_write();
    assert!(matches!(
        engine.issue_otp(&pkg.id, &sig, &alice, Channel::Email, "alice@example.com"),
        Err(EngineError::Conflict { .. })
    ));
    assert_eq!(h.sink.last_code_for(&alice).unwrap(), first, "nothing was delivered");
    assert_eq!(engine.pending_challenges(), 1);

    let out = engine.verify_otp(&pkg.id, &sig, &alice, &first, None).unwrap();
    assert_eq!(out.value, vec![sig]);
}
