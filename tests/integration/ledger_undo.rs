//! Ledger undo applied to a real reminder store.

use nudge::ledger::{EntityType, LedgerError, Operation, RecordParams, UndoInstruction};
use nudge::reminders::{NewReminder, ReminderPatch, ReminderStatus};
use serde_json::json;
use wiremock::MockServer;

use crate::helpers::{file_service, memory_service, now};

const SESSION: &str = "chat-1";

#[tokio::test]
async fn update_undo_yields_restore_instruction() {
    let server = MockServer::start().await;
    let service = memory_service(&server);
    let t = now();

    let receipt = service
        .ledger()
        .record(
            &RecordParams::new(SESSION, EntityType::Reminder, "42", Operation::Update, json!({"text": "B"}))
                .with_before(json!({"text": "A"})),
            t,
        )
        .unwrap();
    assert_eq!(receipt.undo_token.len(), 8);

    let instruction = service.ledger().undo(SESSION, None, t + 1).unwrap();
    assert_eq!(instruction.to_string(), r#"restore_reminder:42:{"text": "A"}"#);

    let record = service.ledger().get_action(&receipt.action_id).unwrap().unwrap();
    assert!(record.is_undone());
}

#[tokio::test]
async fn undo_restores_the_stored_reminder() {
    let server = MockServer::start().await;
    let (service, _dir) = file_service(&server);
    let t = now();
    let store = service.store();

    let id = store.add_reminder(NewReminder::new("A", t + 600)).unwrap();
    let patch: ReminderPatch = serde_json::from_value(json!({"text": "B"})).unwrap();
    store.restore_reminder(id, &patch, t).unwrap();

    let receipt = service
        .ledger()
        .record(
            &RecordParams::new(
                SESSION,
                EntityType::Reminder,
                id.to_string(),
                Operation::Update,
                json!({"text": "B"}),
            )
            .with_before(json!({"text": "A"})),
            t,
        )
        .unwrap();
    assert!(receipt.summary.starts_with(r#"Update reminder: "B""#), "{}", receipt.summary);

    let registry = service.undo_registry();
    let instruction = service
        .ledger()
        .undo_with(SESSION, Some(&receipt.undo_token.to_lowercase()), t + 5, &registry)
        .unwrap();
    assert!(matches!(instruction, UndoInstruction::Restore { .. }));

    let reminder = store.get_reminder(id).unwrap().unwrap();
    assert_eq!(reminder.message, "A");
    assert!(reminder.audit_log.iter().any(|e| e.action == "restored"));
}

#[tokio::test]
async fn create_undo_retires_the_reminder() {
    let server = MockServer::start().await;
    let service = memory_service(&server);
    let t = now();

    let id = service
        .store()
        .add_reminder(NewReminder::new("Pay rent", t + 3600))
        .unwrap();
    service
        .ledger()
        .record(
            &RecordParams::new(
                SESSION,
                EntityType::Reminder,
                id.to_string(),
                Operation::Create,
                json!({"message": "Pay rent", "due_at": t + 3600}),
            ),
            t,
        )
        .unwrap();

    let instruction = service
        .ledger()
        .undo_with(SESSION, None, t + 1, &service.undo_registry())
        .unwrap();
    assert_eq!(instruction.to_string(), format!("delete_reminder:{id}"));

    let reminder = service.store().get_reminder(id).unwrap().unwrap();
    assert_eq!(reminder.status, ReminderStatus::Canceled);
    assert!(reminder.canceled_at.is_some());

    // Retired reminders are never claimed.
    assert!(service.store().claim_due_reminders(t + 7200).unwrap().is_empty());
}

#[tokio::test]
async fn failed_apply_leaves_the_action_undoable() {
    let server = MockServer::start().await;
    let service = memory_service(&server);
    let t = now();

    // No reminder 999 exists, so applying the restore fails.
    let receipt = service
        .ledger()
        .record(
            &RecordParams::new(SESSION, EntityType::Reminder, "999", Operation::Update, json!({"text": "B"}))
                .with_before(json!({"text": "A"})),
            t,
        )
        .unwrap();

    let err = service
        .ledger()
        .undo_with(SESSION, None, t + 1, &service.undo_registry())
        .unwrap_err();
    assert!(matches!(err, LedgerError::Apply(_)), "{err:?}");

    let record = service.ledger().get_action(&receipt.action_id).unwrap().unwrap();
    assert!(!record.is_undone());
}

#[tokio::test]
async fn entity_without_applier_is_refused() {
    let server = MockServer::start().await;
    let service = memory_service(&server);
    let t = now();

    service
        .ledger()
        .record(
            &RecordParams::new(SESSION, EntityType::Goal, "7", Operation::Create, json!({"title": "Run"})),
            t,
        )
        .unwrap();

    let err = service
        .ledger()
        .undo_with(SESSION, None, t + 1, &service.undo_registry())
        .unwrap_err();
    assert!(matches!(err, LedgerError::NoHandler { .. }), "{err:?}");
}

#[tokio::test]
async fn expired_undo_is_denied() {
    let server = MockServer::start().await;
    let service = memory_service(&server);
    let t = now();
    let window = service.ledger().config().undo_window_secs;

    service
        .ledger()
        .record(
            &RecordParams::new(SESSION, EntityType::Reminder, "1", Operation::Update, json!({"text": "B"}))
                .with_before(json!({"text": "A"})),
            t,
        )
        .unwrap();

    let err = service.ledger().undo(SESSION, None, t + window + 1).unwrap_err();
    assert!(matches!(err, LedgerError::Expired { .. }), "{err:?}");
}
