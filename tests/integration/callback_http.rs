//! Action callbacks over HTTP, recorded in the ledger and undone through it.

use nudge::callback::{CALLBACK_SESSION, CallbackConfig, CallbackServer};
use nudge::reminders::{NewReminder, ReminderStatus};
use serde_json::{Value, json};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::{file_service, now};

fn ephemeral() -> CallbackConfig {
    CallbackConfig {
        enabled: true,
        host: "127.0.0.1".into(),
        port: 0,
    }
}

async fn post(server: &CallbackServer, id: i64, body: Value) -> (u16, Value) {
    let resp = reqwest::Client::new()
        .post(format!("http://{}/reminders/{id}/action", server.addr()))
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

#[tokio::test]
async fn snooze_after_firing_is_undoable() {
    let ntfy = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&ntfy)
        .await;

    let (service, _dir) = file_service(&ntfy);
    let due_at = now() - 5;
    let id = service
        .store()
        .add_reminder(NewReminder::new("Stretch", due_at))
        .unwrap();
    service.scheduler().run_once().await.unwrap();

    let server = CallbackServer::start(service.callback_app(), &ephemeral())
        .await
        .unwrap();
    let (status, body) = post(&server, id, json!({"action": "SNOOZE_30"})).await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["status"], "snoozed");

    let snoozed = service.store().get_reminder(id).unwrap().unwrap();
    assert_eq!(snoozed.status, ReminderStatus::Snoozed);
    assert!(snoozed.due_at >= due_at + 30 * 60);
    assert!(snoozed.sent_at.is_none());

    let last = service
        .ledger()
        .get_last_action(CALLBACK_SESSION, false)
        .unwrap()
        .expect("callback recorded");
    assert_eq!(last.entity_id, id.to_string());

    service
        .ledger()
        .undo_with(CALLBACK_SESSION, None, now(), &service.undo_registry())
        .unwrap();

    let restored = service.store().get_reminder(id).unwrap().unwrap();
    assert_eq!(restored.status, ReminderStatus::Fired);
    assert_eq!(restored.due_at, due_at);
    assert!(restored.sent_at.is_some());

    // Restored as sent, so the next tick leaves it alone.
    assert_eq!(service.scheduler().run_once().await.unwrap().claimed, 0);
    server.shutdown();
}

#[tokio::test]
async fn done_acknowledges_and_keeps_due_at() {
    let ntfy = MockServer::start().await;
    let (service, _dir) = file_service(&ntfy);
    let due_at = now() + 60;
    let id = service
        .store()
        .add_reminder(NewReminder::new("Feed cat", due_at))
        .unwrap();

    let server = CallbackServer::start(service.callback_app(), &ephemeral())
        .await
        .unwrap();
    let (status, body) = post(&server, id, json!({"action": "done"})).await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["due_at"], due_at);

    let reminder = service.store().get_reminder(id).unwrap().unwrap();
    assert_eq!(reminder.status, ReminderStatus::Acknowledged);
    assert_eq!(reminder.due_at, due_at);
}

#[tokio::test]
async fn configured_token_is_enforced() {
    let ntfy = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = crate::helpers::config_for(&ntfy, &dir);
    config.ntfy.callback_token = Some("s3cret".into());
    let service = nudge::NudgeService::open(config).unwrap();
    let id = service
        .store()
        .add_reminder(NewReminder::new("Guarded", now() + 60))
        .unwrap();

    let server = CallbackServer::start(service.callback_app(), &ephemeral())
        .await
        .unwrap();

    let (status, body) = post(&server, id, json!({"action": "DONE", "token": "wrong"})).await;
    assert_eq!(status, 401);
    assert_eq!(body["ok"], false);

    let (status, _) = post(&server, id, json!({"action": "DONE", "token": "s3cret"})).await;
    assert_eq!(status, 200);
}

#[tokio::test]
async fn error_statuses() {
    let ntfy = MockServer::start().await;
    let (service, _dir) = file_service(&ntfy);
    let id = service
        .store()
        .add_reminder(NewReminder::new("Soon", now() + 60))
        .unwrap();

    let server = CallbackServer::start(service.callback_app(), &ephemeral())
        .await
        .unwrap();

    let (status, _) = post(&server, id, json!({"action": "EXPLODE"})).await;
    assert_eq!(status, 400);

    let (status, _) = post(&server, id + 100, json!({"action": "DONE"})).await;
    assert_eq!(status, 404);

    // Malformed bodies get the same JSON error shape as every other failure.
    let url = format!("http://{}/reminders/{id}/action", server.addr());
    for (content_type, body) in [
        ("application/json", "{not json"),
        ("application/json", r#"{"token": "x"}"#),
        ("text/plain", r#"{"action": "DONE"}"#),
    ] {
        let resp = reqwest::Client::new()
            .post(&url)
            .header("content-type", content_type)
            .body(body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 400, "{content_type} {body}");
        let error: Value = resp.json().await.unwrap();
        assert_eq!(error["ok"], false);
        assert!(error["error"].as_str().is_some_and(|e| !e.is_empty()));
    }
    assert_eq!(
        service.store().get_reminder(id).unwrap().unwrap().status,
        ReminderStatus::Scheduled
    );

    let resp = reqwest::Client::new()
        .post(format!("http://{}/reminders/abc/action", server.addr()))
        .json(&json!({"action": "DONE"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    assert_eq!(resp.json::<Value>().await.unwrap()["ok"], false);

    service.store().cancel_reminder(id).unwrap();
    let (status, _) = post(&server, id, json!({"action": "DONE"})).await;
    assert_eq!(status, 409);
}
