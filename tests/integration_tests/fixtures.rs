//! Test fixtures for integration tests
//!
//! Provides sample clearinghouse responses and engine builders

use chrono::Utc;
use guia_sync::config::Config;
use guia_sync::models::Guide;
use guia_sync::storage::{create_mock_repository, SharedGuideRepository};
use guia_sync::sync::SyncEngine;
use serde_json::{json, Value};

use crate::common::{client, new_guide};

/// Successful send response
pub fn send_ok() -> Value {
    json!({"sucesso": true, "mensagem": "Guias recebidas"})
}

/// 200 response carrying a business error for one item
pub fn send_embedded_error() -> Value {
    json!({
        "sucesso": true,
        "loteGuias": {"guia": [{"numeroGuia": "G1", "erro": "Carteira do beneficiário inválida"}]}
    })
}

/// Export record with an authorization password for an approved guide
pub fn export_approved(number: &str, password: &str) -> Value {
    json!({
        "content": [{
            "guia": {
                "numeroGuia": number,
                "situacaoGuia": "Aprovada",
                "senhaAutorizacao": password,
                "qtdeDiariasAutorizadas": "3",
                "dataAutorizacao": "2025-08-02T10:15:00"
            }
        }],
        "totalPages": 1
    })
}

/// Engine over an in-memory store and a real HTTP client
pub fn engine(config: &Config) -> (SyncEngine, SharedGuideRepository) {
    let repo = create_mock_repository();
    let engine = SyncEngine::new(config, repo.clone(), client(config));
    (engine, repo)
}

/// Insert a guide that has already been transmitted and is under observation
///
/// Its last reconciliation is stamped after its last content change, so it
/// is not a change candidate until something touches it again.
pub fn watched_guide(repo: &SharedGuideRepository, number: &str) -> Guide {
    let mut guide = repo.insert_guide(&new_guide(number)).unwrap();
    guide.mark_transmitted();
    guide.attempts = 1;
    guide.processed_at = Some(Utc::now());
    guide.updated_at = Utc::now() - chrono::Duration::minutes(2);
    guide.last_checked_at = Some(Utc::now() - chrono::Duration::minutes(1));
    repo.save(&guide).unwrap()
}
