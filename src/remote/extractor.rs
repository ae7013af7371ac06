//! Best-effort field extraction from export records
//!
//! The clearinghouse export does not commit to one response shape. Each
//! canonical field declares the aliases it is known under; [`extract`]
//! tries them as direct keys first and then searches nested objects
//! case-insensitively. Everything here is a pure function of its input.

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;

use crate::models::Situation;

/// Fields the pull monitor reconciles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalField {
    GuideNumber,
    Situation,
    AuthorizationPassword,
    AuthorizedDays,
    AuthorizedAccommodation,
    AuthorizedCnes,
    AuthorizationDate,
    Notes,
    PayerJustification,
    DischargeDate,
    DischargeType,
    ClosureReason,
}

impl CanonicalField {
    pub const ALL: [Self; 12] = [
        Self::GuideNumber,
        Self::Situation,
        Self::AuthorizationPassword,
        Self::AuthorizedDays,
        Self::AuthorizedAccommodation,
        Self::AuthorizedCnes,
        Self::AuthorizationDate,
        Self::Notes,
        Self::PayerJustification,
        Self::DischargeDate,
        Self::DischargeType,
        Self::ClosureReason,
    ];

    /// Known names for this field, most specific first
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            Self::GuideNumber => &["numeroGuia", "numero_guia", "numeroGuiaPrestador"],
            Self::Situation => &["situacaoGuia", "situacao_guia", "situacao", "status"],
            Self::AuthorizationPassword => &[
                "senhaAutorizacao",
                "senha_autorizacao",
                "senhaAprovacao",
                "senha_aprovacao",
                "senhaAutorizada",
                "senha_autorizada",
                "senhaRetorno",
                "senha_retorno",
                "senha",
            ],
            Self::AuthorizedDays => &[
                "qtdeDiariasAutorizadas",
                "qtde_diarias_autorizadas",
                "diariasAutorizadas",
                "diarias_autorizadas",
                "quantidadeDiarias",
                "quantidade_diarias",
            ],
            Self::AuthorizedAccommodation => &[
                "tipoAcomodacaoAutorizada",
                "tipo_acomodacao_autorizada",
                "acomodacaoAutorizada",
                "acomodacao_autorizada",
                "tipoAcomodacao",
                "tipo_acomodacao",
            ],
            Self::AuthorizedCnes => &["cnesAutorizado", "cnes_autorizado", "cnesAprovado", "cnes"],
            Self::AuthorizationDate => &[
                "dataAutorizacao",
                "data_autorizacao",
                "dataAprovacao",
                "data_aprovacao",
            ],
            Self::Notes => &["observacaoGuia", "observacao_guia", "observacao"],
            Self::PayerJustification => &[
                "justificativaOperadora",
                "justificativa_operadora",
                "justificativa",
                "motivoOperadora",
            ],
            Self::DischargeDate => &["dataAlta", "data_alta", "dataDaAlta", "data_da_alta"],
            Self::DischargeType => &["tipoAlta", "tipo_alta", "motivoAlta", "motivo_alta"],
            Self::ClosureReason => &[
                "motivoEncerramento",
                "motivo_encerramento",
                "motivoFechamento",
                "motivo_fechamento",
            ],
        }
    }

    /// Local column name, used in logs and metrics
    pub fn column(&self) -> &'static str {
        match self {
            Self::GuideNumber => "numero_guia",
            Self::Situation => "situacao_guia",
            Self::AuthorizationPassword => "senha_autorizacao",
            Self::AuthorizedDays => "qtde_diarias_autorizadas",
            Self::AuthorizedAccommodation => "tipo_acomodacao_autorizada",
            Self::AuthorizedCnes => "cnes_autorizado",
            Self::AuthorizationDate => "data_autorizacao",
            Self::Notes => "observacao_guia",
            Self::PayerJustification => "justificativa_operadora",
            Self::DischargeDate => "data_alta",
            Self::DischargeType => "tipo_alta",
            Self::ClosureReason => "motivo_encerramento",
        }
    }
}

/// Maximum nesting depth searched
const MAX_DEPTH: usize = 6;

/// Find the value of a canonical field in one record
///
/// Nulls and blank strings count as absent. Returns the value as text;
/// numbers and booleans are rendered without quotes.
pub fn extract(record: &Value, field: CanonicalField) -> Option<String> {
    let aliases = field.aliases();

    if let Value::Object(map) = record {
        for alias in aliases {
            if let Some(text) = map.get(*alias).and_then(scalar_text) {
                return Some(text);
            }
        }
    }

    search_nested(record, aliases, 0)
}

fn search_nested(value: &Value, aliases: &[&str], depth: usize) -> Option<String> {
    if depth > MAX_DEPTH {
        return None;
    }

    match value {
        Value::Object(map) => {
            for alias in aliases {
                let hit = map
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(alias))
                    .and_then(|(_, v)| scalar_text(v));
                if hit.is_some() {
                    return hit;
                }
            }
            map.values()
                .filter(|v| v.is_object())
                .find_map(|v| search_nested(v, aliases, depth + 1))
        }
        _ => None,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Pull the record list out of an export response
///
/// Accepts a bare list, or an object holding the list (or a single record)
/// under `content`, `items`, `data`, `guias` or `guia`.
pub fn unwrap_records(body: &Value) -> Vec<Value> {
    match body {
        Value::Array(items) => items.iter().filter(|v| v.is_object()).cloned().collect(),
        Value::Object(map) => {
            for key in ["content", "items", "data", "guias", "guia"] {
                match map.get(key) {
                    Some(Value::Array(items)) => {
                        return items.iter().filter(|v| v.is_object()).cloned().collect();
                    }
                    Some(obj @ Value::Object(inner)) => {
                        // `data` may itself be a paged envelope
                        let nested = unwrap_records(obj);
                        if !nested.is_empty() {
                            return nested;
                        }
                        if !inner.is_empty() {
                            return vec![obj.clone()];
                        }
                    }
                    _ => {}
                }
            }
            Vec::new()
        }
        _ => Vec::new(),
    }
}

/// Total page count advertised by a paged envelope
pub fn total_pages(body: &Value) -> Option<u32> {
    let Value::Object(map) = body else {
        return None;
    };

    ["totalPages", "totalPaginas", "total_pages", "total_paginas"]
        .iter()
        .find_map(|k| map.get(*k))
        .and_then(|v| match v {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .and_then(|n| u32::try_from(n).ok())
}

/// Parse a remote date in any of the accepted layouts
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%d/%m/%Y %H:%M:%S",
    ];
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y"];

    let text = text.trim();
    // Drop a trailing zone designator, only the calendar date is kept
    let text = text.strip_suffix('Z').unwrap_or(text);

    DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(text, f).ok())
        .map(|dt| dt.date())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(text, f).ok())
        })
}

/// The reconcilable view of one export record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteGuideRecord {
    pub guide_number: String,
    pub situation: Option<Situation>,
    pub authorization_password: Option<String>,
    pub authorized_days: Option<u32>,
    pub authorized_accommodation: Option<String>,
    pub authorized_cnes: Option<String>,
    pub authorization_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub payer_justification: Option<String>,
    pub discharge_date: Option<NaiveDate>,
    pub discharge_type: Option<String>,
    pub closure_reason: Option<String>,
}

impl RemoteGuideRecord {
    /// Build from one export record; `None` when it has no guide number
    pub fn from_value(record: &Value) -> Option<Self> {
        let guide_number = extract(record, CanonicalField::GuideNumber)?;
        let text = |field| extract(record, field);

        let situation = text(CanonicalField::Situation).and_then(|s| {
            let parsed = Situation::parse(&s);
            if parsed.is_none() {
                tracing::debug!(guide = %guide_number, value = %s, "Unknown remote situation");
            }
            parsed
        });

        let authorized_days = text(CanonicalField::AuthorizedDays).and_then(|s| {
            s.parse::<u32>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| *f >= 0.0).map(|f| f as u32))
        });

        let date = |field: CanonicalField| {
            text(field).and_then(|s| {
                let parsed = parse_date(&s);
                if parsed.is_none() {
                    tracing::warn!(
                        guide = %guide_number,
                        field = field.column(),
                        value = %s,
                        "Unrecognized date format"
                    );
                }
                parsed
            })
        };

        Some(Self {
            situation,
            authorization_password: text(CanonicalField::AuthorizationPassword),
            authorized_days,
            authorized_accommodation: text(CanonicalField::AuthorizedAccommodation),
            authorized_cnes: text(CanonicalField::AuthorizedCnes),
            authorization_date: date(CanonicalField::AuthorizationDate),
            notes: text(CanonicalField::Notes),
            payer_justification: text(CanonicalField::PayerJustification),
            discharge_date: date(CanonicalField::DischargeDate),
            discharge_type: text(CanonicalField::DischargeType),
            closure_reason: text(CanonicalField::ClosureReason),
            guide_number,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_direct_alias_wins() {
        let record = json!({
            "numeroGuia": "G1",
            "senhaAutorizacao": "123",
            "senha": "ignored"
        });
        assert_eq!(
            extract(&record, CanonicalField::AuthorizationPassword).as_deref(),
            Some("123")
        );
    }

    #[test]
    fn test_nested_case_insensitive_search() {
        let record = json!({
            "numeroGuia": "G1",
            "autorizacao": { "SENHAAUTORIZACAO": "777", "QtdeDiariasAutorizadas": 4 }
        });
        assert_eq!(
            extract(&record, CanonicalField::AuthorizationPassword).as_deref(),
            Some("777")
        );
        assert_eq!(
            extract(&record, CanonicalField::AuthorizedDays).as_deref(),
            Some("4")
        );
    }

    #[test]
    fn test_blank_and_null_are_absent() {
        let record = json!({ "numeroGuia": "G1", "senhaAutorizacao": "  ", "observacaoGuia": null });
        assert_eq!(extract(&record, CanonicalField::AuthorizationPassword), None);
        assert_eq!(extract(&record, CanonicalField::Notes), None);
    }

    #[test]
    fn test_unwrap_envelopes() {
        assert_eq!(unwrap_records(&json!([{ "a": 1 }, 2])).len(), 1);
        assert_eq!(unwrap_records(&json!({ "content": [{ "a": 1 }] })).len(), 1);
        assert_eq!(unwrap_records(&json!({ "items": [{}, {}] })).len(), 2);
        assert_eq!(unwrap_records(&json!({ "guia": { "numeroGuia": "1" } })).len(), 1);
        assert_eq!(
            unwrap_records(&json!({ "data": { "content": [{ "x": 1 }, { "y": 2 }] } })).len(),
            2
        );
        assert!(unwrap_records(&json!({ "other": [] })).is_empty());
        assert!(unwrap_records(&json!("text")).is_empty());
    }

    #[test]
    fn test_total_pages() {
        assert_eq!(total_pages(&json!({ "totalPages": 3 })), Some(3));
        assert_eq!(total_pages(&json!({ "totalPaginas": "2" })), Some(2));
        assert_eq!(total_pages(&json!([])), None);
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2025, 8, 2);
        assert_eq!(parse_date("2025-08-02T10:11:12"), expected);
        assert_eq!(parse_date("2025-08-02T10:11:12.345"), expected);
        assert_eq!(parse_date("2025-08-02T10:11:12Z"), expected);
        assert_eq!(parse_date("2025-08-02 10:11:12"), expected);
        assert_eq!(parse_date("2025-08-02"), expected);
        assert_eq!(parse_date("02/08/2025 10:11:12"), expected);
        assert_eq!(parse_date("02/08/2025"), expected);
        assert_eq!(parse_date("August 2nd"), None);
    }

    #[test]
    fn test_record_from_value() {
        let record = json!({
            "numeroGuia": "G9",
            "situacaoGuia": "A",
            "senhaAutorizacao": "555",
            "qtdeDiariasAutorizadas": "3",
            "dataAutorizacao": "2025-08-02",
            "dataAlta": "05/08/2025",
            "justificativaOperadora": "ok"
        });
        let parsed = RemoteGuideRecord::from_value(&record).unwrap();
        assert_eq!(parsed.guide_number, "G9");
        assert_eq!(parsed.situation, Some(Situation::Approved));
        assert_eq!(parsed.authorization_password.as_deref(), Some("555"));
        assert_eq!(parsed.authorized_days, Some(3));
        assert_eq!(parsed.discharge_date, NaiveDate::from_ymd_opt(2025, 8, 5));
        assert_eq!(parsed.payer_justification.as_deref(), Some("ok"));
        assert_eq!(parsed.notes, None);
    }

    #[test]
    fn test_record_without_number_is_skipped() {
        assert!(RemoteGuideRecord::from_value(&json!({ "senha": "1" })).is_none());
    }
}
