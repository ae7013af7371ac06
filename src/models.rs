// Core data structures for guide synchronization

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Status Enums
// ============================================================================

/// Transmission state (`tp_status`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransmissionStatus {
    Awaiting,
    Processing,
    Transmitted,
    Error,
}

impl TransmissionStatus {
    /// Single-letter storage code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Awaiting => "A",
            Self::Processing => "P",
            Self::Transmitted => "T",
            Self::Error => "E",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "A" => Some(Self::Awaiting),
            "P" => Some(Self::Processing),
            "T" => Some(Self::Transmitted),
            "E" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn all() -> [Self; 4] {
        [
            Self::Awaiting,
            Self::Processing,
            Self::Transmitted,
            Self::Error,
        ]
    }
}

impl std::fmt::Display for TransmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Awaiting => "awaiting",
            Self::Processing => "processing",
            Self::Transmitted => "transmitted",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Observation state (`status_monitoramento`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WatchStatus {
    NotWatched,
    Watching,
    Finalized,
}

impl WatchStatus {
    /// Single-letter storage code
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotWatched => "N",
            Self::Watching => "M",
            Self::Finalized => "F",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "N" => Some(Self::NotWatched),
            "M" => Some(Self::Watching),
            "F" => Some(Self::Finalized),
            _ => None,
        }
    }

    pub fn all() -> [Self; 3] {
        [Self::NotWatched, Self::Watching, Self::Finalized]
    }
}

impl std::fmt::Display for WatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NotWatched => "not_watched",
            Self::Watching => "watching",
            Self::Finalized => "finalized",
        };
        f.write_str(name)
    }
}

/// Business status reported by the clearinghouse (`situacao_guia`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Situation {
    Approved,
    Denied,
    Cancelled,
    #[default]
    Pending,
    UnderReview,
}

impl Situation {
    /// Single-letter wire/storage code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Approved => "A",
            Self::Denied => "N",
            Self::Cancelled => "C",
            Self::Pending => "P",
            Self::UnderReview => "S",
        }
    }

    /// Approved, denied and cancelled guides need no further observation
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Denied | Self::Cancelled)
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved)
    }

    /// Parse a code or a word in Portuguese or English
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "a" | "approved" | "aprovado" | "aprovada" | "autorizado" | "autorizada" => {
                Some(Self::Approved)
            }
            "n" | "denied" | "negado" | "negada" | "indeferido" | "indeferida" => {
                Some(Self::Denied)
            }
            "c" | "cancelled" | "canceled" | "cancelado" | "cancelada" => Some(Self::Cancelled),
            "p" | "pending" | "pendente" => Some(Self::Pending),
            "s" | "under_review" | "em analise" | "em análise" | "sob analise" | "sob análise" => {
                Some(Self::UnderReview)
            }
            _ => None,
        }
    }
}

impl std::str::FromStr for Situation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown guide situation: {s}"))
    }
}

impl std::fmt::Display for Situation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

// ============================================================================
// Clinical Payload
// ============================================================================

/// Document attached to a guide
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Attachment {
    pub batch_number: Option<String>,
    pub protocol_number: Option<String>,
    pub format: String,
    pub sequence: Option<u32>,
    pub created_on: Option<NaiveDate>,
    pub name: String,
    /// Absolute path, or relative to the configured attachment base directory
    pub path: String,
    pub notes: Option<String>,
    pub document_type: String,
}

/// Requested procedure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Procedure {
    pub table: String,
    pub code: String,
    pub description: String,
    pub requested_quantity: u32,
    /// Decimal text as stored, sent verbatim
    pub unit_value: String,
    pub authorized_quantity: Option<u32>,
}

/// CID-10 diagnosis
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Diagnosis {
    pub code: String,
    /// `P` primary, `S` secondary
    pub kind: String,
}

/// Clinical and administrative fields the engine only forwards
///
/// Stored as one JSON document; none of these fields drive a state
/// transition.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct GuideDetails {
    pub operator_code: String,
    pub operator_guide_number: Option<String>,
    pub admission_guide_number: Option<String>,
    pub password: Option<String>,
    pub password_valid_until: Option<NaiveDate>,

    // Beneficiary
    pub card_number: String,
    pub card_valid_until: Option<NaiveDate>,
    pub newborn: Option<String>,
    pub birth_date: Option<NaiveDateTime>,
    pub sex: String,
    pub beneficiary_status: String,
    pub beneficiary_name: String,

    // Requesting provider
    pub provider_code: String,
    pub provider_name: String,
    pub professional_name: Option<String>,
    pub professional_council: String,
    pub professional_registration: String,
    pub professional_state: String,
    pub cbo_code: String,

    // Admission request
    pub suggested_admission_date: Option<NaiveDate>,
    pub care_character: String,
    pub admission_type: String,
    pub admission_regime: String,
    pub requested_days: u32,
    pub opme_expected: Option<String>,
    pub chemo_expected: Option<String>,
    pub clinical_indication: String,
    pub accident_indication: String,
    pub requested_accommodation: Option<String>,
    pub estimated_admission_date: Option<NaiveDate>,
    pub request_date: Option<NaiveDate>,

    // Complementary data
    pub nature: String,
    /// `S` when the guide extends an existing admission guide
    pub complementary: String,
    pub disease_type: Option<String>,
    pub disease_duration: Option<u32>,
    pub long_stay: Option<String>,

    pub attachments: Vec<Attachment>,
    pub procedures: Vec<Procedure>,
    pub diagnoses: Vec<Diagnosis>,
}

impl GuideDetails {
    pub fn is_complementary(&self) -> bool {
        self.complementary.trim().eq_ignore_ascii_case("S")
    }
}

// ============================================================================
// Guide
// ============================================================================

/// The unit of work
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Guide {
    pub id: i64,
    /// Optimistic lock counter, bumped on every save
    pub version: i64,
    pub guide_number: String,
    pub transmission_status: TransmissionStatus,
    pub watch_status: WatchStatus,
    pub situation: Situation,

    // Fields reconciled from the clearinghouse export
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

    // Retry accounting
    pub attempts: u32,
    pub error_message: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    /// Last content change (ingestion or pull reconciliation)
    pub updated_at: DateTime<Utc>,
    /// Last time the field monitor reconciled this guide
    pub last_checked_at: Option<DateTime<Utc>>,

    pub details: GuideDetails,
}

impl Guide {
    /// Authorization password present on an approved guide
    pub fn has_approved_password(&self) -> bool {
        self.situation.is_approved()
            && self
                .authorization_password
                .as_deref()
                .is_some_and(|p| !p.trim().is_empty())
    }

    pub fn is_watching(&self) -> bool {
        self.watch_status == WatchStatus::Watching
    }

    /// Successful transmission: clears the error and starts observation
    pub fn mark_transmitted(&mut self) {
        self.transmission_status = TransmissionStatus::Transmitted;
        self.error_message = None;
        if self.watch_status == WatchStatus::NotWatched {
            self.watch_status = WatchStatus::Watching;
        }
    }

    /// Permanent failure; the message is always recorded
    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.transmission_status = TransmissionStatus::Error;
        self.error_message = Some(message.into());
    }
}

/// A guide as created by the ingestion path
#[derive(Debug, Clone, Default)]
pub struct NewGuide {
    pub guide_number: String,
    pub situation: Situation,
    pub authorization_password: Option<String>,
    pub authorized_days: Option<u32>,
    pub authorized_accommodation: Option<String>,
    pub authorization_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub details: GuideDetails,
}

impl NewGuide {
    pub fn new(guide_number: impl Into<String>) -> Self {
        Self {
            guide_number: guide_number.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        for status in TransmissionStatus::all() {
            assert_eq!(TransmissionStatus::from_code(status.code()), Some(status));
        }
        for status in WatchStatus::all() {
            assert_eq!(WatchStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(TransmissionStatus::from_code("X"), None);
    }

    #[test]
    fn test_situation_parse() {
        assert_eq!(Situation::parse("A"), Some(Situation::Approved));
        assert_eq!(Situation::parse("Approved"), Some(Situation::Approved));
        assert_eq!(Situation::parse(" negada "), Some(Situation::Denied));
        assert_eq!(Situation::parse("S"), Some(Situation::UnderReview));
        assert_eq!("C".parse::<Situation>(), Ok(Situation::Cancelled));
        assert!("zzz".parse::<Situation>().is_err());
    }

    #[test]
    fn test_terminal_situations() {
        assert!(Situation::Approved.is_terminal());
        assert!(Situation::Denied.is_terminal());
        assert!(Situation::Cancelled.is_terminal());
        assert!(!Situation::Pending.is_terminal());
        assert!(!Situation::UnderReview.is_terminal());
    }

    #[test]
    fn test_details_deserialize_with_defaults() {
        let details: GuideDetails =
            serde_json::from_str(r#"{"card_number":"123","complementary":"s"}"#).unwrap();
        assert_eq!(details.card_number, "123");
        assert!(details.is_complementary());
        assert!(details.attachments.is_empty());
    }
}
