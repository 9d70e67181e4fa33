//! Sidecar metadata written next to each document.
//!
//! A sidecar is replaced wholesale at every transition; nothing from an
//! earlier record is merged in.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{PipelineError, io_error};
use crate::delivery::{AckContent, AttemptRecord};

/// Suffix appended to a document's file name to form its sidecar name.
pub const SIDECAR_SUFFIX: &str = ".meta.json";

/// Return the sidecar path for `document`.
#[must_use]
pub fn sidecar_path(document: &Utf8Path) -> Utf8PathBuf {
    let mut path = document.as_str().to_owned();
    path.push_str(SIDECAR_SUFFIX);
    Utf8PathBuf::from(path)
}

/// Return `true` if `name` is a sidecar rather than a document.
#[must_use]
pub fn is_sidecar(name: &str) -> bool { name.ends_with(SIDECAR_SUFFIX) }

/// Metadata recorded at a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Sidecar {
    /// Written when a document is promoted into Ready.
    Ready(ReadyEntry),
    /// Written when a document reaches Sent or Failed.
    Delivery(DeliveryEntry),
}

/// Ready-entry metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyEntry {
    /// When the document was copied into Ready.
    pub moved_at: DateTime<Utc>,
    /// Where the document was copied from.
    pub source: Utf8PathBuf,
    /// Validation note at promotion time.
    pub validation: String,
}

/// Delivery-entry metadata for Sent and Failed documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryEntry {
    /// Document file name.
    pub file: String,
    /// Number of the last attempt made.
    pub attempts: u32,
    /// When the last attempt finished.
    pub sent_at: Option<DateTime<Utc>>,
    /// Acknowledgement, if one arrived.
    pub ack: Option<AckContent>,
    /// Why the document failed, if it did.
    pub error: Option<String>,
    /// Validation note, when it was anything but `ok`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<String>,
}

impl DeliveryEntry {
    /// Entry for a document that never reached the wire.
    #[must_use]
    pub fn rejected(file: impl Into<String>, error: String) -> Self {
        Self {
            file: file.into(),
            attempts: 0,
            sent_at: None,
            ack: None,
            error: Some(error),
            validation: None,
        }
    }

    /// Entry built from the final attempt record.
    #[must_use]
    pub fn from_record(file: impl Into<String>, record: AttemptRecord) -> Self {
        let AttemptRecord {
            attempts,
            sent_at,
            ack,
            error,
        } = record;
        Self {
            file: file.into(),
            attempts,
            sent_at,
            ack,
            error,
            validation: None,
        }
    }
}

/// What was found next to a listed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SidecarStatus {
    /// No sidecar exists.
    Absent,
    /// The sidecar parsed cleanly.
    Parsed(Sidecar),
    /// The sidecar exists but could not be read or parsed.
    Unreadable(String),
}

/// Write `sidecar` for `document`, replacing any previous record.
///
/// # Errors
///
/// Returns [`PipelineError::Sidecar`] if encoding fails or
/// [`PipelineError::Io`] if the file cannot be written.
pub async fn write(document: &Utf8Path, sidecar: &Sidecar) -> Result<Utf8PathBuf, PipelineError> {
    let path = sidecar_path(document);
    let body = serde_json::to_vec_pretty(sidecar).map_err(|source| PipelineError::Sidecar {
        path: path.clone(),
        source,
    })?;
    tokio::fs::write(&path, body)
        .await
        .map_err(io_error(&path))?;
    Ok(path)
}

/// Read the sidecar of `document`, degrading failures into a status.
pub async fn read(document: &Utf8Path) -> SidecarStatus {
    let path = sidecar_path(document);
    match tokio::fs::read(&path).await {
        Ok(body) => match serde_json::from_slice(&body) {
            Ok(sidecar) => SidecarStatus::Parsed(sidecar),
            Err(e) => SidecarStatus::Unreadable(format!("failed_to_load: {e}")),
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => SidecarStatus::Absent,
        Err(e) => SidecarStatus::Unreadable(format!("failed_to_load: {e}")),
    }
}
