//! Clearinghouse payload assembly
//!
//! One guide becomes `{"loteGuias":{"guia":[{...}]}}`; a batch concatenates
//! the inner `guia` items. Dates go out as `YYYY-MM-DD`, datetimes as
//! `YYYY-MM-DD HH:MM` and counts as strings. The hospital block always comes
//! from configuration.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::config::HospitalConfig;
use crate::models::{Attachment, Diagnosis, Guide, Procedure};

/// Attachments larger than this are rejected
pub const MAX_ATTACHMENT_BYTES: u64 = 20 * 1024 * 1024;

/// Reasons a guide cannot be turned into a payload
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PayloadError {
    #[error("numeroGuiaInternacao is required when guiaComplementar = 'S'")]
    MissingAdmissionGuide,

    #[error("attachment '{name}': path not informed")]
    AttachmentPathMissing { name: String },

    #[error("attachment '{name}': file not found at '{path}'")]
    AttachmentNotFound { name: String, path: String },

    #[error("attachment '{name}': '{path}' is not a file")]
    AttachmentNotAFile { name: String, path: String },

    #[error("attachment '{name}': file is empty")]
    AttachmentEmpty { name: String },

    #[error("attachment '{name}': file exceeds the 20MB limit ({size_mb:.2}MB)")]
    AttachmentTooLarge { name: String, size_mb: f64 },

    #[error("attachment '{name}': read failed: {reason}")]
    AttachmentUnreadable { name: String, reason: String },
}

/// Builds clearinghouse JSON for guides
#[derive(Debug, Clone)]
pub struct PayloadBuilder {
    hospital: HospitalConfig,
    attachments_base: Option<PathBuf>,
}

impl PayloadBuilder {
    pub fn new(hospital: HospitalConfig, attachments_base: Option<PathBuf>) -> Self {
        Self {
            hospital,
            attachments_base,
        }
    }

    /// Full payload for a single guide
    pub fn build_guide(&self, guide: &Guide) -> Result<Value, PayloadError> {
        let item = self.build_item(guide)?;
        Ok(wrap_batch(vec![item]))
    }

    /// Assemble already-built single-guide payloads into one batch payload
    pub fn merge_batch(payloads: &[Value]) -> Value {
        let items = payloads
            .iter()
            .flat_map(|p| batch_items(p).iter().cloned())
            .collect();
        wrap_batch(items)
    }

    /// The inner `guia` object for one guide
    pub fn build_item(&self, guide: &Guide) -> Result<Value, PayloadError> {
        let d = &guide.details;

        if d.is_complementary()
            && d.admission_guide_number
                .as_deref()
                .map_or(true, |n| n.trim().is_empty())
        {
            return Err(PayloadError::MissingAdmissionGuide);
        }

        let attachments = d
            .attachments
            .iter()
            .map(|a| self.build_attachment(a))
            .collect::<Result<Vec<_>, _>>()?;

        // The authorization password returned by the payer wins over the
        // password typed at ingestion
        let password = guide
            .authorization_password
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .or(d.password.as_deref());

        let h = &self.hospital;
        let mut item = Map::new();
        let mut put = |key: &str, value: Value| {
            item.insert(key.to_string(), value);
        };

        put("codigoOperadora", json!(d.operator_code));
        put("numeroGuia", json!(guide.guide_number));
        put("numeroGuiaOperadora", json!(d.operator_guide_number));
        put("numeroGuiaInternacao", json!(d.admission_guide_number));
        put("dataAutorizacao", json!(format_date(guide.authorization_date)));
        put("senha", json!(password));
        put("dataValidade", json!(format_date(d.password_valid_until)));

        put("numeroCarteira", json!(d.card_number));
        put("dataValidadeCarteira", json!(format_date(d.card_valid_until)));
        put("rn", json!(d.newborn));
        put("dataNascimento", json!(format_datetime(d.birth_date)));
        put("sexo", json!(d.sex));
        put("situacaoBeneficiario", json!(d.beneficiary_status));
        put("nomeBeneficiario", json!(d.beneficiary_name));

        put("codigoPrestador", json!(d.provider_code));
        put("nomePrestador", json!(d.provider_name));
        put("nomeProfissional", json!(d.professional_name));
        put("codigoProfissional", json!(d.professional_council));
        put("numeroRegistroProfissional", json!(d.professional_registration));
        put("ufProfissional", json!(d.professional_state));
        put("codigoCbo", json!(d.cbo_code));

        put("codigoContratado", json!(h.contracted_code));
        put("nomeHospital", json!(h.name));
        put("porteHospital", json!(h.size));
        put("complexidadeHospital", json!(h.complexity));
        put("esferaAdministrativa", json!(h.administrative_sphere));
        put("enderecoHospital", json!(h.address));

        put(
            "dataSugeridaInternacao",
            json!(format_date(d.suggested_admission_date)),
        );
        put("caraterAtendimento", json!(d.care_character));
        put("tipoInternacao", json!(d.admission_type));
        put("regimeInternacao", json!(d.admission_regime));
        put("diariasSolicitadas", json!(d.requested_days.to_string()));
        put("previsaoUsoOpme", json!(flag_or_no(d.opme_expected.as_deref())));
        put(
            "previsaoUsoQuimioterapico",
            json!(flag_or_no(d.chemo_expected.as_deref())),
        );
        put("indicacaoClinica", json!(d.clinical_indication));
        put("indicacaoAcidente", json!(d.accident_indication));
        put("tipoAcomodacaoSolicitada", json!(d.requested_accommodation));

        put(
            "dataAdmissaoEstimada",
            json!(format_date(d.estimated_admission_date)),
        );
        put(
            "qtdeDiariasAutorizadas",
            json!(guide.authorized_days.filter(|n| *n > 0).map(|n| n.to_string())),
        );
        put("tipoAcomodacaoAutorizada", json!(guide.authorized_accommodation));
        put("cnesAutorizado", json!(h.cnes));
        put("observacaoGuia", json!(guide.notes));
        put("dataSolicitacao", json!(format_date(d.request_date)));
        put("justificativaOperadora", json!(guide.payer_justification));

        put("naturezaGuia", json!(d.nature));
        put("guiaComplementar", json!(d.complementary));
        put("situacaoGuia", json!(guide.situation.code()));
        put("tipoDoenca", json!(d.disease_type));
        put(
            "tempoDoenca",
            json!(d.disease_duration.filter(|n| *n > 0).map(|n| n.to_string())),
        );
        put("longaPermanencia", json!(d.long_stay));
        put("motivoEncerramento", json!(guide.closure_reason));
        put("tipoAlta", json!(guide.discharge_type));
        put("dataAlta", json!(format_date(guide.discharge_date)));

        put("anexo", Value::Array(attachments));
        put(
            "procedimento",
            Value::Array(d.procedures.iter().map(procedure_json).collect()),
        );
        put(
            "diagnostico",
            Value::Array(d.diagnoses.iter().map(diagnosis_json).collect()),
        );

        Ok(Value::Object(item))
    }

    fn build_attachment(&self, attachment: &Attachment) -> Result<Value, PayloadError> {
        let content = self.encode_attachment(attachment).inspect_err(|e| {
            tracing::error!(attachment = %attachment.name, error = %e, "Attachment rejected");
        })?;

        Ok(json!({
            "numeroLoteDocumento": attachment.batch_number.clone().unwrap_or_default(),
            "numeroProtocoloDocumento": attachment.protocol_number.clone().unwrap_or_default(),
            "formatoDocumento": attachment.format,
            "sequencialDocumento": attachment.sequence.filter(|n| *n > 0).unwrap_or(1).to_string(),
            "dataCriacao": format_date(attachment.created_on),
            "nome": attachment.name,
            "observacaoDocumento": attachment.notes.clone().unwrap_or_default(),
            "tipoDocumento": attachment.document_type,
            "conteudoBase64": content,
        }))
    }

    /// Read, validate and base64-encode one attachment file
    fn encode_attachment(&self, attachment: &Attachment) -> Result<String, PayloadError> {
        let name = attachment.name.clone();
        let raw = attachment.path.trim();
        if raw.is_empty() {
            return Err(PayloadError::AttachmentPathMissing { name });
        }

        let path = self.resolve_path(Path::new(raw));
        let shown = path.display().to_string();

        let meta = match std::fs::metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PayloadError::AttachmentNotFound { name, path: shown });
            }
            Err(e) => {
                return Err(PayloadError::AttachmentUnreadable {
                    name,
                    reason: e.to_string(),
                });
            }
        };

        if !meta.is_file() {
            return Err(PayloadError::AttachmentNotAFile { name, path: shown });
        }

        if meta.len() > MAX_ATTACHMENT_BYTES {
            return Err(PayloadError::AttachmentTooLarge {
                name,
                size_mb: meta.len() as f64 / (1024.0 * 1024.0),
            });
        }

        let bytes = std::fs::read(&path).map_err(|e| PayloadError::AttachmentUnreadable {
            name: name.clone(),
            reason: e.to_string(),
        })?;

        if bytes.is_empty() {
            return Err(PayloadError::AttachmentEmpty { name });
        }

        Ok(STANDARD.encode(bytes))
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        match &self.attachments_base {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

/// The `guia` items inside a batch payload
pub fn batch_items(payload: &Value) -> &[Value] {
    payload
        .pointer("/loteGuias/guia")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn wrap_batch(items: Vec<Value>) -> Value {
    json!({ "loteGuias": { "guia": items } })
}

fn procedure_json(p: &Procedure) -> Value {
    json!({
        "tabela": p.table,
        "codigo": p.code,
        "descricao": p.description,
        "qtdeSolicitada": p.requested_quantity.to_string(),
        "valorUnitario": p.unit_value,
        "qtdeAutorizada": p.authorized_quantity.filter(|n| *n > 0).map(|n| n.to_string()).unwrap_or_default(),
    })
}

fn diagnosis_json(d: &Diagnosis) -> Value {
    json!({ "codigo": d.code, "tipo": d.kind })
}

fn format_date(date: Option<NaiveDate>) -> String {
    date.map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

fn format_datetime(value: Option<NaiveDateTime>) -> String {
    value
        .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default()
}

fn flag_or_no(flag: Option<&str>) -> &str {
    match flag.map(str::trim) {
        Some(f) if !f.is_empty() => f,
        _ => "N",
    }
}
