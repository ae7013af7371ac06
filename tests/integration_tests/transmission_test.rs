//! Batch transmission scenarios

use chrono::Utc;
use guia_sync::models::{TransmissionStatus, WatchStatus};
use guia_sync::storage::GuideRepository;
use guia_sync::sync::SyncEngine;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::fixtures::{engine, send_embedded_error, send_ok, watched_guide};
use crate::common::{mount_auth, new_guide, test_config, AUTH_PATH, SEND_PATH};

#[tokio::test]
async fn test_awaiting_guide_transmitted_and_watched() {
    let server = MockServer::start().await;
    mount_auth(&server, "tok").await;

    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .and(body_partial_json(json!({"loteGuias": {"guia": [{"numeroGuia": "G1"}]}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(send_ok()))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = test_config(&server);
    config.transmission.batch_size = 1;
    let (engine, repo) = engine(&config);
    repo.insert_guide(&new_guide("G1")).unwrap();

    let report = engine.transmitter().cycle().run_once().await.unwrap();
    assert_eq!(report.succeeded, 1);

    let g1 = repo.get_by_number("G1").unwrap().unwrap();
    assert_eq!(g1.transmission_status, TransmissionStatus::Transmitted);
    assert_eq!(g1.watch_status, WatchStatus::Watching);
    assert!(g1.error_message.is_none());
    assert_eq!(g1.attempts, 1);
}

#[tokio::test]
async fn test_service_unavailable_leaves_guide_awaiting() {
    let server = MockServer::start().await;
    mount_auth(&server, "tok").await;

    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
        .mount(&server)
        .await;

    let config = test_config(&server);
    let (engine, repo) = engine(&config);
    repo.insert_guide(&new_guide("G2")).unwrap();

    let report = engine.transmitter().cycle().run_once().await.unwrap();
    assert_eq!(report.retried, 1);

    let g2 = repo.get_by_number("G2").unwrap().unwrap();
    assert_eq!(g2.transmission_status, TransmissionStatus::Awaiting);
    assert_eq!(g2.attempts, 1);
    let message = g2.error_message.unwrap();
    assert!(message.contains("503"), "unexpected message: {message}");

    // Next cycle picks it up again
    engine.transmitter().cycle().run_once().await.unwrap();
    let g2 = repo.get_by_number("G2").unwrap().unwrap();
    assert_eq!(g2.attempts, 2);
}

#[tokio::test]
async fn test_embedded_error_fails_whole_batch() {
    let server = MockServer::start().await;
    mount_auth(&server, "tok").await;

    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(send_embedded_error()))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server);
    let (engine, repo) = engine(&config);
    for n in ["G1", "G2", "G3"] {
        repo.insert_guide(&new_guide(n)).unwrap();
    }

    let report = engine.transmitter().cycle().run_once().await.unwrap();
    assert_eq!(report.failed, 3);

    let messages: Vec<_> = ["G1", "G2", "G3"]
        .iter()
        .map(|n| repo.get_by_number(n).unwrap().unwrap())
        .inspect(|g| assert_eq!(g.transmission_status, TransmissionStatus::Error))
        .map(|g| g.error_message.unwrap())
        .collect();
    assert!(messages.iter().all(|m| m == &messages[0]));
    assert!(messages[0].contains("Carteira"));
}

#[tokio::test]
async fn test_batches_respect_size_and_order() {
    let server = MockServer::start().await;
    mount_auth(&server, "tok").await;

    for (first, size) in [("G1", 2), ("G3", 2), ("G5", 1)] {
        Mock::given(method("POST"))
            .and(path(SEND_PATH))
            .and(body_partial_json(json!({"loteGuias": {"guia": [{"numeroGuia": first}]}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(send_ok()))
            .expect(1)
            .named(format!("batch starting at {first} ({size} guides)"))
            .mount(&server)
            .await;
    }

    let mut config = test_config(&server);
    config.transmission.batch_size = 2;
    let (engine, repo) = engine(&config);
    for n in ["G1", "G2", "G3", "G4", "G5"] {
        repo.insert_guide(&new_guide(n)).unwrap();
    }

    let report = engine.transmitter().cycle().run_once().await.unwrap();
    assert_eq!(report.succeeded, 5);
}

#[tokio::test]
async fn test_loops_share_one_authentication() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(AUTH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("tok"))
        .expect(1)
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
    let mut watched = watched_guide(&repo, "G2");
    watched.notes = Some(String::from("alterada"));
    watched.updated_at = Utc::now();
    repo.save(&watched).unwrap();

    let (tx, fm) = tokio::join!(
        engine.transmitter().cycle().run_once(),
        engine.field_monitor().cycle().run_once(),
    );
    assert_eq!(tx.unwrap().succeeded, 1);
    assert_eq!(fm.unwrap().succeeded, 1);
}

#[tokio::test]
async fn test_connect_uses_sqlite_store() {
    let server = MockServer::start().await;
    mount_auth(&server, "tok").await;
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(send_ok()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&server);
    config.database.sqlite_path = dir.path().join("guias.db");

    let engine = SyncEngine::connect(&config).unwrap();
    engine.repository().insert_guide(&new_guide("G1")).unwrap();
    engine.transmitter().cycle().run_once().await.unwrap();

    let status = engine.status().await.unwrap();
    assert_eq!(status.counts.transmitted, 1);
    assert_eq!(status.tokens.len(), 2);
    assert!(status.tokens[0].has_token);
    assert!(!status.tokens[1].has_token);
}

#[tokio::test]
async fn test_fresh_guide_is_sent_once_across_loops() {
    let server = MockServer::start().await;
    mount_auth(&server, "tok").await;

    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(send_ok()))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server);
    let (engine, repo) = engine(&config);
    repo.insert_guide(&new_guide("G1")).unwrap();

    let tx = engine.transmitter().cycle().run_once().await.unwrap();
    assert_eq!(tx.succeeded, 1);

    let fm = engine.field_monitor().cycle().run_once().await.unwrap();
    assert_eq!(fm.examined, 1);
    assert_eq!(fm.succeeded, 0);

    let g1 = repo.get_by_number("G1").unwrap().unwrap();
    assert_eq!(g1.transmission_status, TransmissionStatus::Transmitted);
    assert_eq!(g1.watch_status, WatchStatus::Watching);
    assert_eq!(g1.attempts, 1);
}
