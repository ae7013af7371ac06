//! Error scenario integration tests
//!
//! Tests various failure modes and recovery:
//! 1. Export failures during pull reconciliation
//! 2. Guides whose payload cannot be built
//! 3. Rejected resends and later corrections
//! 4. Token expiry in the middle of a cycle
//! 5. Guides stuck in Processing after a crash

use chrono::Utc;
use guia_sync::models::{Attachment, TransmissionStatus, WatchStatus};
use guia_sync::storage::GuideRepository;
use guia_sync::sync::CycleOutcome;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::fixtures::{engine, send_ok, watched_guide};
use crate::common::{mount_auth, new_guide, test_config, AUTH_PATH, EXPORT_PATH, SEND_PATH};

// ============================================================================
// Pull Failures
// ============================================================================

#[tokio::test]
async fn test_export_failure_does_not_touch_guides() {
    let server = MockServer::start().await;
    mount_auth(&server, "tok").await;

    Mock::given(method("POST"))
        .and(path(EXPORT_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server);
    let (engine, repo) = engine(&config);
    let before = watched_guide(&repo, "G1");

    let outcome = engine.pull_monitor().cycle().run_once().await.unwrap();
    assert!(matches!(outcome, CycleOutcome::Completed(_)));

    let after = repo.get_by_number("G1").unwrap().unwrap();
    assert_eq!(after, before);
}

#[tokio::test]
async fn test_one_failed_group_does_not_stop_the_next() {
    let server = MockServer::start().await;
    mount_auth(&server, "tok").await;

    Mock::given(method("POST"))
        .and(path(EXPORT_PATH))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(EXPORT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"numeroGuia": "G2", "observacaoGuia": "revisado"}
        ])))
        .mount(&server)
        .await;

    let mut config = test_config(&server);
    config.pull_monitor.max_page_size = 1;
    let (engine, repo) = engine(&config);
    watched_guide(&repo, "G1");
    watched_guide(&repo, "G2");

    engine.pull_monitor().cycle().run_once().await.unwrap();

    let g2 = repo.get_by_number("G2").unwrap().unwrap();
    assert_eq!(g2.notes.as_deref(), Some("revisado"));
    let g1 = repo.get_by_number("G1").unwrap().unwrap();
    assert!(g1.notes.is_none());
}

// ============================================================================
// Payload Failures
// ============================================================================

#[tokio::test]
async fn test_missing_attachment_fails_only_that_guide() {
    let server = MockServer::start().await;
    mount_auth(&server, "tok").await;
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(send_ok()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&server);
    config.attachments.base_path = Some(dir.path().to_path_buf());
    std::fs::write(dir.path().join("laudo.pdf"), b"%PDF-1.4 laudo").unwrap();

    let (engine, repo) = engine(&config);

    let mut good = new_guide("GOOD");
    good.details.attachments.push(Attachment {
        name: String::from("laudo.pdf"),
        path: String::from("laudo.pdf"),
        format: String::from("PDF"),
        ..Attachment::default()
    });
    repo.insert_guide(&good).unwrap();

    let mut bad = new_guide("BAD");
    bad.details.attachments.push(Attachment {
        name: String::from("exame.pdf"),
        path: String::from("exame.pdf"),
        ..Attachment::default()
    });
    repo.insert_guide(&bad).unwrap();

    let report = engine.transmitter().cycle().run_once().await.unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);

    let bad = repo.get_by_number("BAD").unwrap().unwrap();
    assert_eq!(bad.transmission_status, TransmissionStatus::Error);
    assert!(bad.error_message.unwrap().contains("exame.pdf"));
    assert_eq!(bad.attempts, 0);

    let good = repo.get_by_number("GOOD").unwrap().unwrap();
    assert_eq!(good.transmission_status, TransmissionStatus::Transmitted);
}

// ============================================================================
// Resend Failures
// ============================================================================

#[tokio::test]
async fn test_rejected_resend_can_be_corrected() {
    let server = MockServer::start().await;
    mount_auth(&server, "tok").await;

    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_string("campo obrigatório: cid"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(send_ok()))
        .mount(&server)
        .await;

    let config = test_config(&server);
    let (engine, repo) = engine(&config);
    let mut guide = watched_guide(&repo, "G1");
    guide.notes = Some(String::from("primeira versão"));
    guide.updated_at = Utc::now();
    repo.save(&guide).unwrap();

    engine.field_monitor().cycle().run_once().await.unwrap();
    let g = repo.get_by_number("G1").unwrap().unwrap();
    assert_eq!(g.transmission_status, TransmissionStatus::Error);
    assert_eq!(g.watch_status, WatchStatus::Watching);

    // A later correction is picked up again
    let mut corrected = g;
    corrected.notes = Some(String::from("corrigida"));
    corrected.updated_at = Utc::now();
    repo.save(&corrected).unwrap();

    engine.field_monitor().cycle().run_once().await.unwrap();
    let g = repo.get_by_number("G1").unwrap().unwrap();
    assert_eq!(g.transmission_status, TransmissionStatus::Transmitted);
    assert!(g.error_message.is_none());
    assert_eq!(g.watch_status, WatchStatus::Watching);
    assert_eq!(g.attempts, 3);
}

// ============================================================================
// Token Expiry
// ============================================================================

#[tokio::test]
async fn test_token_expiry_mid_cycle_is_transparent() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(AUTH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("tok"))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"erro": "Token inválido"})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(send_ok()))
        .mount(&server)
        .await;

    let config = test_config(&server);
    let (engine, repo) = engine(&config);
    repo.insert_guide(&new_guide("G1")).unwrap();

    engine.transmitter().cycle().run_once().await.unwrap();

    let g = repo.get_by_number("G1").unwrap().unwrap();
    assert_eq!(g.transmission_status, TransmissionStatus::Transmitted);
    assert_eq!(g.attempts, 1);
}

// ============================================================================
// Crash Recovery
// ============================================================================

#[tokio::test]
async fn test_service_start_recovers_stuck_guides() {
    let server = MockServer::start().await;
    mount_auth(&server, "tok").await;
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(send_ok()))
        .mount(&server)
        .await;

    let config = test_config(&server);
    let (engine, repo) = engine(&config);
    let mut stuck = repo.insert_guide(&new_guide("STUCK")).unwrap();
    stuck.transmission_status = TransmissionStatus::Processing;
    stuck.attempts = 1;
    stuck.processed_at = Some(Utc::now() - chrono::Duration::hours(1));
    repo.save(&stuck).unwrap();

    assert!(engine.transmitter().start());
    for _ in 0..50 {
        let g = repo.get_by_number("STUCK").unwrap().unwrap();
        if g.transmission_status == TransmissionStatus::Transmitted {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    engine.transmitter().stop().await;

    let g = repo.get_by_number("STUCK").unwrap().unwrap();
    assert_eq!(g.transmission_status, TransmissionStatus::Transmitted);
    assert_eq!(g.attempts, 2);
}
