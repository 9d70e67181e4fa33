//! Directory-backed pipeline state machine.
//!
//! Each [`PipelineState`] is a sibling directory under one root. Documents
//! are promoted into Ready by copy, then drained from Ready by
//! [`Pipeline::run_queue`], which gives every document exactly one terminal
//! outcome: Sent (optionally duplicated into Archived) or Failed.
//!
//! Relocations are journalled (see [`journal`]) so that a crash between
//! moving a payload and moving its sidecar is finished on the next
//! [`Pipeline::open`]. An in-memory [`PipelineIndex`] tracks which primary
//! state holds each document name and backs the conflict checks.
//!
//! The store assumes a single operator: two processes draining the same
//! Ready directory may both deliver a document before either moves it.

pub mod index;
pub mod journal;
pub mod layout;
pub mod sidecar;

use std::{fmt, io};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

pub use self::{
    index::{PipelineIndex, Violation},
    journal::Journal,
    layout::PipelineLayout,
    sidecar::{DeliveryEntry, ReadyEntry, Sidecar, SidecarStatus},
};
use crate::{
    delivery::{AttemptRecord, Deliverer, READ_ERROR_NOTE},
    transport::Transport,
    validate::{ValidationError, ValidationNote, validate},
};

/// Location of a document in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Produced by an external generator; not yet queued.
    Generated,
    /// Validated and waiting for delivery.
    Ready,
    /// Delivered and acknowledged.
    Sent,
    /// Rejected by validation or not acknowledged.
    Failed,
    /// Duplicate of a Sent document kept for audit.
    Archived,
}

impl PipelineState {
    /// Every state, in listing order.
    pub const ALL: [Self; 5] = [
        Self::Generated,
        Self::Ready,
        Self::Sent,
        Self::Failed,
        Self::Archived,
    ];
    /// States that are mutually exclusive for a document name.
    pub const PRIMARY: [Self; 3] = [Self::Ready, Self::Sent, Self::Failed];

    /// Directory name under the pipeline root.
    #[must_use]
    pub const fn dir_name(self) -> &'static str {
        match self {
            Self::Generated => "generated",
            Self::Ready => "ready",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Archived => "archive",
        }
    }

    /// Return `true` for Ready, Sent and Failed.
    #[must_use]
    pub const fn is_primary(self) -> bool { matches!(self, Self::Ready | Self::Sent | Self::Failed) }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.dir_name()) }
}

/// Errors raised by pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A document with the same name already occupies a primary state.
    #[error("{file} already exists in {state}; use --force to overwrite")]
    Conflict {
        /// Document name.
        file: String,
        /// State currently holding the name.
        state: PipelineState,
    },
    /// The document failed structural validation.
    #[error("{file} failed validation: {source}")]
    Invalid {
        /// Document name.
        file: String,
        /// Missing marker.
        source: ValidationError,
    },
    /// The path has no usable UTF-8 file name.
    #[error("{0} has no usable file name")]
    InvalidName(Utf8PathBuf),
    /// A filesystem operation failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path being accessed.
        path: Utf8PathBuf,
        /// Underlying error.
        source: io::Error,
    },
    /// Metadata could not be encoded.
    #[error("cannot encode metadata for {path}: {source}")]
    Sidecar {
        /// Path being written.
        path: Utf8PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },
}

pub(crate) fn io_error(path: &Utf8Path) -> impl FnOnce(io::Error) -> PipelineError + use<> {
    let path = path.to_owned();
    move |source| PipelineError::Io { path, source }
}

/// Outcome of [`Pipeline::run_queue`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueReport {
    /// Documents moved to Sent.
    pub sent: Vec<String>,
    /// Documents moved to Failed.
    pub failed: Vec<String>,
    /// Documents whose processing hit a filesystem error, with the reason.
    pub errored: Vec<(String, String)>,
}

impl QueueReport {
    /// Number of documents in the processed snapshot.
    #[must_use]
    pub fn total(&self) -> usize { self.sent.len() + self.failed.len() + self.errored.len() }
}

/// Outcome of [`Pipeline::send_single`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Validation failed; the document was not moved.
    Rejected(ValidationError),
    /// Acknowledged and moved to Sent.
    Sent {
        /// New location.
        path: Utf8PathBuf,
        /// Final attempt record.
        record: AttemptRecord,
    },
    /// Not acknowledged and moved to Failed.
    Failed {
        /// New location.
        path: Utf8PathBuf,
        /// Final attempt record.
        record: AttemptRecord,
    },
}

/// One document as reported by [`Pipeline::list_state`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedDocument {
    /// Document name.
    pub name: String,
    /// Full path.
    pub path: Utf8PathBuf,
    /// Sidecar found next to it.
    pub sidecar: SidecarStatus,
}

/// Contents of one state directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateListing {
    /// State listed.
    pub state: PipelineState,
    /// Directory listed.
    pub dir: Utf8PathBuf,
    /// Documents found, sorted by name.
    pub documents: Vec<ListedDocument>,
}

/// Terminal result of processing one Ready document.
enum Terminal {
    Sent,
    Failed,
}

/// Handle on an opened pipeline root.
#[derive(Debug)]
pub struct Pipeline {
    layout: PipelineLayout,
    journal: Journal,
    index: PipelineIndex,
}

impl Pipeline {
    /// Open the pipeline at `layout`.
    ///
    /// Creates missing state directories, finishes any relocation the
    /// journal shows as interrupted and rebuilds the index from disk.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Io`] if the directories or journal cannot be
    /// accessed.
    pub async fn open(layout: PipelineLayout) -> Result<Self, PipelineError> {
        layout.ensure().await?;
        let journal = Journal::new(layout.journal());
        let repaired = recover(&layout, &journal).await?;
        if repaired > 0 {
            info!(repaired, "finished interrupted relocations");
        }
        let (index, violations) = PipelineIndex::scan(&layout).await?;
        if !violations.is_empty() {
            warn!(count = violations.len(), "pipeline holds documents in several states");
        }
        Ok(Self {
            layout,
            journal,
            index,
        })
    }

    /// Return the directory layout.
    #[must_use]
    pub const fn layout(&self) -> &PipelineLayout { &self.layout }

    /// Return the state index.
    #[must_use]
    pub const fn index(&self) -> &PipelineIndex { &self.index }

    /// Copy `source` into Ready and write a fresh ready-entry sidecar.
    ///
    /// The document must pass validation. A name already present in Ready,
    /// Sent or Failed is a [`PipelineError::Conflict`] unless `force` is set,
    /// in which case the Ready copy is overwritten and stale Sent or Failed
    /// copies are removed.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Conflict`], [`PipelineError::Invalid`] or an
    /// I/O error.
    pub async fn promote_to_ready(
        &mut self,
        source: &Utf8Path,
        force: bool,
    ) -> Result<Utf8PathBuf, PipelineError> {
        let name = file_name(source)?;
        let payload = tokio::fs::read(source).await.map_err(io_error(source))?;
        let note = validate(&payload).map_err(|err| PipelineError::Invalid {
            file: name.clone(),
            source: err,
        })?;

        let dest = self.layout.document(PipelineState::Ready, &name);
        let occupied = self.occupant(&name).await?;
        if let Some(state) = occupied {
            if !force {
                return Err(PipelineError::Conflict { file: name, state });
            }
            self.evict(&name, PipelineState::Ready, None).await?;
        }

        if !same_file(source, &dest).await {
            tokio::fs::copy(source, &dest)
                .await
                .map_err(io_error(&dest))?;
        }
        sidecar::write(
            &dest,
            &Sidecar::Ready(ReadyEntry {
                moved_at: Utc::now(),
                source: source.to_owned(),
                validation: note.to_string(),
            }),
        )
        .await?;
        self.index.place(&name, PipelineState::Ready);
        info!(file = %name, %source, overwritten = occupied.is_some(), "queued");
        Ok(dest)
    }

    /// Drain a snapshot of Ready.
    ///
    /// Documents are handled one at a time in name order. Filesystem errors
    /// on one document are recorded in the report and the batch carries on.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Io`] only if Ready itself cannot be listed.
    pub async fn run_queue<T: Transport>(
        &mut self,
        deliverer: &Deliverer<T>,
        archive: bool,
    ) -> Result<QueueReport, PipelineError> {
        let snapshot = index::list_documents(&self.layout.dir(PipelineState::Ready)).await?;
        info!(documents = snapshot.len(), "processing ready queue");
        let mut report = QueueReport::default();
        for name in snapshot {
            match self.process_ready(&name, deliverer, archive).await {
                Ok(Terminal::Sent) => report.sent.push(name),
                Ok(Terminal::Failed) => report.failed.push(name),
                Err(e) => {
                    error!(file = %name, error = %e, "could not settle document");
                    report.errored.push((name, e.to_string()));
                }
            }
        }
        Ok(report)
    }

    async fn process_ready<T: Transport>(
        &mut self,
        name: &str,
        deliverer: &Deliverer<T>,
        archive: bool,
    ) -> Result<Terminal, PipelineError> {
        let ready_dir = self.layout.dir(PipelineState::Ready);
        let path = ready_dir.join(name);
        let payload = match tokio::fs::read(&path).await {
            Ok(payload) => payload,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(io_error(&path)(e)),
            Err(e) => {
                let entry = DeliveryEntry::rejected(name, format!("{READ_ERROR_NOTE}:{e}"));
                self.relocate(name, &ready_dir, PipelineState::Failed, &entry)
                    .await?;
                return Ok(Terminal::Failed);
            }
        };

        let note = match validate(&payload) {
            Ok(note) => note,
            Err(invalid) => {
                warn!(file = %name, note = %invalid, "validation failed");
                let entry = DeliveryEntry::rejected(name, format!("validation_failed:{invalid}"));
                self.relocate(name, &ready_dir, PipelineState::Failed, &entry)
                    .await?;
                return Ok(Terminal::Failed);
            }
        };

        let outcome = deliverer.deliver(&path).await;
        let entry = delivery_entry(name, outcome.record, note);
        if outcome.delivered {
            let sent = self
                .relocate(name, &ready_dir, PipelineState::Sent, &entry)
                .await?;
            if archive {
                self.archive(&sent).await;
            }
            Ok(Terminal::Sent)
        } else {
            self.relocate(name, &ready_dir, PipelineState::Failed, &entry)
                .await?;
            Ok(Terminal::Failed)
        }
    }

    /// Validate and deliver one document wherever it lives.
    ///
    /// An invalid document is left untouched. A valid one gets one delivery
    /// cycle and moves to Sent or Failed. Ready is never modified: a name
    /// already queued there is a conflict and nothing is sent. Nothing is
    /// archived.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Conflict`] if Ready holds the same name, or an
    /// I/O error if the document cannot be read or moved.
    pub async fn send_single<T: Transport>(
        &mut self,
        path: &Utf8Path,
        deliverer: &Deliverer<T>,
    ) -> Result<SendOutcome, PipelineError> {
        let name = file_name(path)?;
        let payload = tokio::fs::read(path).await.map_err(io_error(path))?;
        let note = match validate(&payload) {
            Ok(note) => note,
            Err(invalid) => {
                warn!(file = %name, note = %invalid, "validation failed; document left in place");
                return Ok(SendOutcome::Rejected(invalid));
            }
        };
        if self.occupant(&name).await? == Some(PipelineState::Ready) {
            return Err(PipelineError::Conflict {
                file: name,
                state: PipelineState::Ready,
            });
        }

        let outcome = deliverer.deliver(path).await;
        let entry = delivery_entry(&name, outcome.record.clone(), note);
        let from = path.parent().unwrap_or_else(|| Utf8Path::new(""));
        if outcome.delivered {
            let dest = self.relocate(&name, from, PipelineState::Sent, &entry).await?;
            Ok(SendOutcome::Sent {
                path: dest,
                record: outcome.record,
            })
        } else {
            let dest = self
                .relocate(&name, from, PipelineState::Failed, &entry)
                .await?;
            Ok(SendOutcome::Failed {
                path: dest,
                record: outcome.record,
            })
        }
    }

    /// List every state directory with its documents and sidecars.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Io`] if a directory cannot be listed. A bad
    /// sidecar never fails the listing.
    pub async fn list_state(&self) -> Result<Vec<StateListing>, PipelineError> {
        let mut listings = Vec::with_capacity(PipelineState::ALL.len());
        for state in PipelineState::ALL {
            let dir = self.layout.dir(state);
            let mut documents = Vec::new();
            for name in index::list_documents(&dir).await? {
                let path = dir.join(&name);
                let sidecar = sidecar::read(&path).await;
                if let SidecarStatus::Unreadable(reason) = &sidecar {
                    warn!(%path, %reason, "unreadable sidecar");
                }
                documents.push(ListedDocument {
                    name,
                    path,
                    sidecar,
                });
            }
            listings.push(StateListing {
                state,
                dir,
                documents,
            });
        }
        Ok(listings)
    }

    /// Move `name` and its freshly written sidecar from `from` into `to`.
    async fn relocate(
        &mut self,
        name: &str,
        from: &Utf8Path,
        to: PipelineState,
        entry: &DeliveryEntry,
    ) -> Result<Utf8PathBuf, PipelineError> {
        let source = from.join(name);
        let dest = self.layout.document(to, name);
        self.evict(name, to, Some(&source)).await?;

        sidecar::write(&source, &Sidecar::Delivery(entry.clone())).await?;
        self.journal.begin(name, from, to).await?;
        move_file(&source, &dest).await?;
        move_file(&sidecar::sidecar_path(&source), &sidecar::sidecar_path(&dest)).await?;
        self.journal.commit(name, from, to).await?;

        self.index.place(name, to);
        info!(file = %name, state = %to, attempts = entry.attempts, "document settled");
        Ok(dest)
    }

    /// Remove copies of `name` from primary states other than `keep`.
    ///
    /// `moving` is the document about to be relocated; it is never removed,
    /// whichever state directory it sits in.
    async fn evict(
        &mut self,
        name: &str,
        keep: PipelineState,
        moving: Option<&Utf8Path>,
    ) -> Result<(), PipelineError> {
        for state in PipelineState::PRIMARY {
            if state == keep {
                continue;
            }
            let stale = self.layout.document(state, name);
            if let Some(moving) = moving
                && same_file(moving, &stale).await
            {
                continue;
            }
            if remove_if_present(&stale).await? {
                warn!(file = %name, %state, "removed stale copy");
            }
            remove_if_present(&sidecar::sidecar_path(&stale)).await?;
        }
        if self.index.state_of(name).is_some_and(|s| s != keep) {
            self.index.remove(name);
        }
        Ok(())
    }

    /// State currently holding `name`. A file on disk in Ready wins over the
    /// index so documents dropped in by hand are still seen.
    async fn occupant(&self, name: &str) -> Result<Option<PipelineState>, PipelineError> {
        let queued = self.layout.document(PipelineState::Ready, name);
        if exists(&queued).await? {
            return Ok(Some(PipelineState::Ready));
        }
        Ok(self.index.state_of(name))
    }

    /// Copy a Sent document and its sidecar into Archived.
    ///
    /// Archiving is best effort; failures are logged and do not change the
    /// document's terminal state.
    async fn archive(&self, sent: &Utf8Path) {
        let Some(name) = sent.file_name() else {
            return;
        };
        let dest = self.layout.document(PipelineState::Archived, name);
        if let Err(e) = tokio::fs::copy(sent, &dest).await {
            warn!(file = %name, error = %e, "archive copy failed");
            return;
        }
        let meta = sidecar::sidecar_path(sent);
        if matches!(tokio::fs::try_exists(&meta).await, Ok(true))
            && let Err(e) = tokio::fs::copy(&meta, sidecar::sidecar_path(&dest)).await
        {
            warn!(file = %name, error = %e, "archive sidecar copy failed");
        }
    }
}

fn delivery_entry(name: &str, record: AttemptRecord, note: ValidationNote) -> DeliveryEntry {
    let mut entry = DeliveryEntry::from_record(name, record);
    if note != ValidationNote::Ok {
        entry.validation = Some(note.to_string());
    }
    entry
}

fn file_name(path: &Utf8Path) -> Result<String, PipelineError> {
    path.file_name()
        .map(str::to_owned)
        .ok_or_else(|| PipelineError::InvalidName(path.to_owned()))
}

async fn exists(path: &Utf8Path) -> Result<bool, PipelineError> {
    tokio::fs::try_exists(path).await.map_err(io_error(path))
}

async fn same_file(a: &Utf8Path, b: &Utf8Path) -> bool {
    match (tokio::fs::canonicalize(a).await, tokio::fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

async fn remove_if_present(path: &Utf8Path) -> Result<bool, PipelineError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(io_error(path)(e)),
    }
}

/// Rename `from` to `to`, falling back to copy and delete across devices.
async fn move_file(from: &Utf8Path, to: &Utf8Path) -> Result<(), PipelineError> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            tokio::fs::copy(from, to).await.map_err(io_error(to))?;
            tokio::fs::remove_file(from).await.map_err(io_error(from))
        }
        Err(e) => Err(io_error(from)(e)),
    }
}

/// Roll forward every relocation the journal shows as unfinished.
async fn recover(layout: &PipelineLayout, journal: &Journal) -> Result<usize, PipelineError> {
    let pending = journal.pending().await?;
    for entry in &pending {
        let source = entry.from.join(&entry.file);
        let dest = layout.document(entry.to, &entry.file);
        if exists(&source).await? {
            move_file(&source, &dest).await?;
        }
        let source_meta = sidecar::sidecar_path(&source);
        if exists(&source_meta).await? {
            move_file(&source_meta, &sidecar::sidecar_path(&dest)).await?;
        }
        journal.commit(&entry.file, &entry.from, entry.to).await?;
        warn!(file = %entry.file, state = %entry.to, "completed interrupted relocation");
    }
    journal.compact().await?;
    Ok(pending.len())
}
