//! Clearinghouse API boundary
//!
//! - [`token`] - bearer token lifecycle
//! - [`classifier`] - retry classification of failures
//! - [`client`] - HTTP calls and the [`GuideTransport`] seam
//! - [`error`] - tagged failure taxonomy
//! - [`extractor`] - alias-based field extraction for export records
//! - [`payload`] - guide JSON assembly

pub mod classifier;
pub mod client;
pub mod error;
pub mod extractor;
pub mod payload;
pub mod token;

pub use classifier::{classify, Retryability};
pub use client::{
    Credentials, ExportFilter, ExportPage, GuideTransport, RemoteClient, SendReceipt,
    SharedTransport,
};
pub use error::{FailureKind, RemoteFailure, RemoteResult};
pub use extractor::{CanonicalField, RemoteGuideRecord};
pub use payload::{PayloadBuilder, PayloadError};
pub use token::{Authenticator, TokenInfo, TokenManager};
