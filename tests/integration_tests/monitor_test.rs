//! Field-change and pull monitor scenarios

use std::time::Duration;

use guia_sync::models::{Situation, TransmissionStatus, WatchStatus};
use guia_sync::storage::GuideRepository;
use guia_sync::sync::CycleOutcome;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::fixtures::{engine, export_approved, send_ok, watched_guide};
use crate::common::{approved_guide, mount_auth, test_config, EXPORT_PATH, SEND_PATH};

#[tokio::test]
async fn test_password_from_pull_triggers_resend_and_finalize() {
    let server = MockServer::start().await;
    mount_auth(&server, "tok").await;

    Mock::given(method("POST"))
        .and(path(EXPORT_PATH))
        .and(body_partial_json(json!({"numeroGuia": ["G3"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(export_approved("G3", "123")))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .and(body_partial_json(json!({
            "loteGuias": {"guia": [{"numeroGuia": "G3", "senha": "123", "situacaoGuia": "A"}]}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(send_ok()))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server);
    let (engine, repo) = engine(&config);
    watched_guide(&repo, "G3");

    // Nothing changed yet
    let report = engine.field_monitor().cycle().run_once().await.unwrap();
    assert_eq!(report.succeeded, 0);

    let outcome = engine.pull_monitor().cycle().run_once().await.unwrap();
    let CycleOutcome::Completed(pull) = outcome else {
        panic!("pull cycle should run");
    };
    assert_eq!(pull.updated, 1);

    let g3 = repo.get_by_number("G3").unwrap().unwrap();
    assert_eq!(g3.authorization_password.as_deref(), Some("123"));
    assert_eq!(g3.situation, Situation::Approved);
    assert_eq!(g3.authorized_days, Some(3));
    assert_eq!(g3.transmission_status, TransmissionStatus::Transmitted);
    assert_eq!(g3.watch_status, WatchStatus::Watching);

    let report = engine.field_monitor().cycle().run_once().await.unwrap();
    assert_eq!(report.succeeded, 1);

    let g3 = repo.get_by_number("G3").unwrap().unwrap();
    assert_eq!(g3.transmission_status, TransmissionStatus::Transmitted);
    assert_eq!(g3.watch_status, WatchStatus::Finalized);
}

#[tokio::test]
async fn test_terminal_guide_finalized_without_network() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let config = test_config(&server);
    let (engine, repo) = engine(&config);
    let mut guide = watched_guide(&repo, "G4");
    guide.situation = Situation::Cancelled;
    let guide = repo.save(&guide).unwrap();
    assert_eq!(guide.watch_status, WatchStatus::Watching);

    let report = engine.field_monitor().cycle().run_once().await.unwrap();
    assert_eq!(report.finalized, 1);

    let g4 = repo.get_by_number("G4").unwrap().unwrap();
    assert_eq!(g4.watch_status, WatchStatus::Finalized);
}

#[tokio::test]
async fn test_approved_guide_sent_once_then_finalized() {
    let server = MockServer::start().await;
    mount_auth(&server, "tok").await;

    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .and(body_partial_json(json!({
            "loteGuias": {"guia": [{"numeroGuia": "G5", "senha": "777"}]}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(send_ok()))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server);
    let (engine, repo) = engine(&config);
    repo.insert_guide(&approved_guide("G5", "777")).unwrap();

    engine.transmitter().cycle().run_once().await.unwrap();
    let report = engine.field_monitor().cycle().run_once().await.unwrap();
    assert_eq!(report.succeeded, 0);
    assert_eq!(report.finalized, 1);

    let g5 = repo.get_by_number("G5").unwrap().unwrap();
    assert_eq!(g5.transmission_status, TransmissionStatus::Transmitted);
    assert_eq!(g5.watch_status, WatchStatus::Finalized);
    assert_eq!(g5.attempts, 1);
}

#[tokio::test]
async fn test_pull_cycles_respect_minimum_spacing() {
    let server = MockServer::start().await;
    mount_auth(&server, "tok").await;

    Mock::given(method("POST"))
        .and(path(EXPORT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"content": []})))
        .expect(2)
        .mount(&server)
        .await;

    let mut config = test_config(&server);
    config.pull_monitor.min_spacing_secs = 1;
    let (engine, repo) = engine(&config);
    watched_guide(&repo, "G1");

    let pull = engine.pull_monitor().cycle();
    assert!(matches!(pull.run_once().await.unwrap(), CycleOutcome::Completed(_)));
    assert!(matches!(
        pull.run_once().await.unwrap(),
        CycleOutcome::Skipped { .. }
    ));

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(matches!(pull.run_once().await.unwrap(), CycleOutcome::Completed(_)));
    assert!(engine.status().await.unwrap().last_pull_run.is_some());
}

#[tokio::test]
async fn test_pull_ignores_guides_outside_window() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(EXPORT_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let config = test_config(&server);
    let (engine, repo) = engine(&config);
    let mut old = watched_guide(&repo, "OLD");
    old.processed_at = Some(chrono::Utc::now() - chrono::Duration::hours(48));
    repo.save(&old).unwrap();

    let outcome = engine.pull_monitor().cycle().run_once().await.unwrap();
    let CycleOutcome::Completed(report) = outcome else {
        panic!("pull cycle should run");
    };
    assert_eq!(report.examined, 0);
}
