//! End-to-end scheduler ticks against a mock ntfy server.

use nudge::reminders::{NewReminder, ReminderStatus};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::{TOPIC, file_service, memory_service, now};

#[tokio::test]
async fn due_reminder_fires_once_through_ntfy() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/{TOPIC}")))
        .and(body_string_contains("Stretch"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let service = memory_service(&server);
    let id = service
        .store()
        .add_reminder(NewReminder::new("Stretch", now() - 5))
        .unwrap();

    let scheduler = service.scheduler();
    let first = scheduler.run_once().await.unwrap();
    assert_eq!(first.claimed, 1);
    assert_eq!(first.fired, 1);
    assert_eq!(first.failed_deliveries, 0);

    // Nothing left to claim.
    let second = scheduler.run_once().await.unwrap();
    assert_eq!(second.claimed, 0);

    let reminder = service.store().get_reminder(id).unwrap().unwrap();
    assert_eq!(reminder.status, ReminderStatus::Fired);
    assert!(reminder.sent_at.is_some());
    assert!(reminder.last_error.is_none());
    assert!(
        reminder
            .audit_log
            .iter()
            .any(|entry| entry.action == "delivered")
    );
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn future_reminder_is_left_alone() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let service = memory_service(&server);
    let id = service
        .store()
        .add_reminder(NewReminder::new("Later", now() + 3600))
        .unwrap();

    let report = service.scheduler().run_once().await.unwrap();
    assert_eq!(report.claimed, 0);
    let reminder = service.store().get_reminder(id).unwrap().unwrap();
    assert_eq!(reminder.status, ReminderStatus::Scheduled);
}

#[tokio::test]
async fn failed_delivery_still_marks_fired_with_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .expect(1)
        .mount(&server)
        .await;

    let service = memory_service(&server);
    let id = service
        .store()
        .add_reminder(NewReminder::new("Water plants", now() - 1))
        .unwrap();

    let report = service.scheduler().run_once().await.unwrap();
    assert_eq!(report.fired, 1);
    assert_eq!(report.failed_deliveries, 1);

    let reminder = service.store().get_reminder(id).unwrap().unwrap();
    assert_eq!(reminder.status, ReminderStatus::Fired);
    let error = reminder.last_error.expect("last_error recorded");
    assert!(error.starts_with("ntfy: HTTP 500"), "{error}");
    assert!(
        reminder
            .audit_log
            .iter()
            .any(|entry| entry.action == "delivery_failed")
    );

    // Not retried.
    assert_eq!(service.scheduler().run_once().await.unwrap().claimed, 0);
}

#[tokio::test]
async fn unconfigured_channel_is_reported_not_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/{TOPIC}")))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    // Legacy "both" expands to ntfy + voice; only ntfy is configured.
    let service = memory_service(&server);
    let id = service
        .store()
        .add_reminder(NewReminder::new("Call mum", now() - 1).with_legacy_channel("both"))
        .unwrap();
    assert_eq!(
        service.store().get_reminder(id).unwrap().unwrap().channels,
        vec!["ntfy", "voice"]
    );

    let report = service.scheduler().run_once().await.unwrap();
    assert_eq!(report.fired, 1);
    assert_eq!(report.failed_deliveries, 1);

    let reminder = service.store().get_reminder(id).unwrap().unwrap();
    assert_eq!(reminder.status, ReminderStatus::Fired);
    assert!(reminder.last_error.unwrap().starts_with("voice:"));
}

#[tokio::test]
async fn two_services_on_one_file_fire_a_reminder_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let (first, dir) = file_service(&server);
    let second = nudge::NudgeService::open(first.config().clone()).unwrap();
    first
        .store()
        .add_reminder(NewReminder::new("Once only", now() - 1))
        .unwrap();

    let (sa, sb) = (first.scheduler(), second.scheduler());
    let (a, b) = tokio::join!(sa.run_once(), sb.run_once());
    assert_eq!(a.unwrap().fired + b.unwrap().fired, 1);
    drop(dir);
}

#[tokio::test]
async fn spawned_loop_fires_and_stops() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let service = memory_service(&server);
    let id = service
        .store()
        .add_reminder(NewReminder::new("Background", now() - 1))
        .unwrap();

    let handle = service
        .scheduler()
        .with_interval(std::time::Duration::from_millis(20))
        .spawn();

    let mut fired = false;
    for _ in 0..100 {
        let reminder = service.store().get_reminder(id).unwrap().unwrap();
        if reminder.status == ReminderStatus::Fired {
            fired = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(fired, "scheduler loop never fired the reminder");

    handle.stop().await;
}
