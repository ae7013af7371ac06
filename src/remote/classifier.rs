//! Retry classification for clearinghouse failures
//!
//! Maps an HTTP status and free-text message to a retry verdict. Rules are
//! applied in order:
//!
//! 1. status >= 500 is retryable
//! 2. status 400, 401, 403 or 404 is not
//! 3. validation/authorization vocabulary is not
//! 4. infrastructure vocabulary is
//! 5. anything else is not (fail closed)
//!
//! 2xx bodies carrying an error indicator are detected by
//! [`find_embedded_error`] and are never retryable.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Retry verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Retryability {
    Retryable,
    NonRetryable,
}

impl Retryability {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable)
    }
}

fn validation_vocabulary() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)invalid|inv[áa]lid|required field|campo obrigat|obrigat[óo]ri|not found|n[ãa]o encontrad|unauthori[sz]ed|n[ãa]o autorizad|forbidden|proibid",
        )
        .expect("Invalid regex pattern")
    })
}

fn infrastructure_vocabulary() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)time(d)?[ -]?out|connection|conex[ãa]o|network|\brede\b|unavailable|indispon[íi]vel|gateway|internal server error|erro interno",
        )
        .expect("Invalid regex pattern")
    })
}

fn token_expired_vocabulary() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)token expired|jwt expired|unauthorized|invalid token|token inv[áa]lido|sess[ãa]o expirada",
        )
        .expect("Invalid regex pattern")
    })
}

/// Classify a failure signal
pub fn classify(status: Option<u16>, message: &str) -> Retryability {
    if let Some(code) = status {
        if code >= 500 {
            return Retryability::Retryable;
        }
        if matches!(code, 400 | 401 | 403 | 404) {
            return Retryability::NonRetryable;
        }
    }

    if validation_vocabulary().is_match(message) {
        return Retryability::NonRetryable;
    }

    if infrastructure_vocabulary().is_match(message) {
        return Retryability::Retryable;
    }

    Retryability::NonRetryable
}

/// Whether a response signals an expired or rejected bearer token
pub fn is_auth_expired(status: Option<u16>, message: &str) -> bool {
    status == Some(401) || token_expired_vocabulary().is_match(message)
}

const ERROR_KEYS: &[&str] = &[
    "erro",
    "erros",
    "error",
    "errors",
    "mensagemerro",
    "mensagem_erro",
    "errormessage",
];

const SUCCESS_FLAGS: &[&str] = &["sucesso", "success"];

/// Search a 2xx response body for an embedded error
///
/// Looks for an explicit `sucesso: false`/`success: false` flag or a non-empty
/// error field at any depth, including per-item error lists inside a batch
/// response. Returns the collected messages joined by `"; "`.
pub fn find_embedded_error(body: &Value) -> Option<String> {
    let mut messages = Vec::new();
    collect_errors(body, &mut messages);

    if messages.is_empty() {
        if let Value::Object(map) = body {
            for (key, value) in map {
                let key = key.to_lowercase();
                if SUCCESS_FLAGS.contains(&key.as_str()) && value == &Value::Bool(false) {
                    return Some("remote reported an unsuccessful operation".to_string());
                }
            }
        }
        return None;
    }

    messages.dedup();
    Some(messages.join("; "))
}

fn collect_errors(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if ERROR_KEYS.contains(&key.to_lowercase().as_str()) {
                    push_error_text(child, out);
                } else {
                    collect_errors(child, out);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_errors(item, out);
            }
        }
        _ => {}
    }
}

fn push_error_text(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Null | Value::Bool(false) => {}
        Value::Bool(true) => out.push("remote reported an error".to_string()),
        Value::String(s) => {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                out.push(trimmed.to_string());
            }
        }
        Value::Number(n) => out.push(n.to_string()),
        Value::Array(items) => {
            for item in items {
                push_error_text(item, out);
            }
        }
        Value::Object(map) => {
            // Structured error items usually carry a message/description field
            let text = ["mensagem", "message", "descricao", "description", "detail"]
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_str))
                .map(str::to_string);

            match text {
                Some(t) if !t.trim().is_empty() => out.push(t.trim().to_string()),
                _ if !map.is_empty() => out.push(Value::Object(map.clone()).to_string()),
                _ => {}
            }
        }
    }
}
