//! Common test utilities

#![allow(dead_code)]

use std::sync::Arc;

use guia_sync::config::{Config, RemoteConfig};
use guia_sync::models::{NewGuide, Situation};
use guia_sync::remote::RemoteClient;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const AUTH_PATH: &str = "/login";
pub const SEND_PATH: &str = "/integracao/guias/save";
pub const EXPORT_PATH: &str = "/guiainternacao/search";
pub const API_KEY: &str = "api-key-123";
pub const EXPORT_API_KEY: &str = "export-key-456";

/// Remote endpoints pointing at a mock server
pub fn remote_config(server: &MockServer) -> RemoteConfig {
    RemoteConfig {
        auth_url: format!("{}{AUTH_PATH}", server.uri()),
        send_url: format!("{}{SEND_PATH}", server.uri()),
        export_url: format!("{}{EXPORT_PATH}", server.uri()),
        username: String::from("hospital"),
        password: String::from("secret"),
        api_key: String::from(API_KEY),
        export_username: String::from("hospital-export"),
        export_password: String::from("export-secret"),
        export_api_key: Some(String::from(EXPORT_API_KEY)),
        origin: String::from("API_DRG"),
        http_timeout_secs: 2,
    }
}

/// Full configuration with no pauses, pointing at a mock server
pub fn test_config(server: &MockServer) -> Config {
    let mut config = Config {
        remote: remote_config(server),
        ..Config::default()
    };
    config.transmission.batch_pause_ms = 0;
    config.pull_monitor.page_pause_ms = 0;
    config
}

pub fn client(config: &Config) -> Arc<RemoteClient> {
    Arc::new(RemoteClient::new(&config.remote, &config.token).unwrap())
}

/// Authentication endpoint answering with a plain-text token
pub async fn mount_auth(server: &MockServer, token: &str) {
    Mock::given(method("POST"))
        .and(path(AUTH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(token))
        .mount(server)
        .await;
}

/// Guide as the ingestion path creates it
pub fn new_guide(number: &str) -> NewGuide {
    let mut guide = NewGuide::new(number);
    guide.details.operator_code = String::from("339679");
    guide.details.card_number = String::from("0064800000012345");
    guide.details.beneficiary_name = String::from("Maria da Silva");
    guide.details.requested_days = 3;
    guide
}

/// Approved guide carrying an authorization password
pub fn approved_guide(number: &str, password: &str) -> NewGuide {
    let mut guide = new_guide(number);
    guide.situation = Situation::Approved;
    guide.authorization_password = Some(password.to_string());
    guide
}
