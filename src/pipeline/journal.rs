//! Append-only transition journal.
//!
//! Moving a document between states takes two renames: the payload and its
//! sidecar. Each move is bracketed by a `begin` and a `commit` line so a
//! crash between the renames can be finished on the next start.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{fs::OpenOptions, io::AsyncWriteExt};
use tracing::warn;

use super::{PipelineError, PipelineState, io_error};

/// Phase of a journalled relocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// The relocation is about to start.
    Begin,
    /// Both payload and sidecar are in place.
    Commit,
}

/// One journal line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// When the line was written.
    pub at: DateTime<Utc>,
    /// Document file name.
    pub file: String,
    /// Directory the document is leaving.
    pub from: Utf8PathBuf,
    /// State the document is entering.
    pub to: PipelineState,
    /// Begin or commit.
    pub phase: Phase,
}

/// Handle on the journal file.
#[derive(Debug, Clone)]
pub struct Journal {
    path: Utf8PathBuf,
}

impl Journal {
    /// Open the journal at `path`; the file is created on first append.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self { Self { path: path.into() } }

    /// Return the journal path.
    #[must_use]
    pub fn path(&self) -> &Utf8Path { &self.path }

    /// Record the start of a relocation.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Io`] if the line cannot be made durable.
    pub async fn begin(
        &self,
        file: &str,
        from: &Utf8Path,
        to: PipelineState,
    ) -> Result<(), PipelineError> {
        self.append(&JournalEntry {
            at: Utc::now(),
            file: file.to_owned(),
            from: from.to_owned(),
            to,
            phase: Phase::Begin,
        })
        .await
    }

    /// Record the completion of a relocation.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Io`] if the line cannot be made durable.
    pub async fn commit(
        &self,
        file: &str,
        from: &Utf8Path,
        to: PipelineState,
    ) -> Result<(), PipelineError> {
        self.append(&JournalEntry {
            at: Utc::now(),
            file: file.to_owned(),
            from: from.to_owned(),
            to,
            phase: Phase::Commit,
        })
        .await
    }

    async fn append(&self, entry: &JournalEntry) -> Result<(), PipelineError> {
        let mut line = serde_json::to_vec(entry).map_err(|source| PipelineError::Sidecar {
            path: self.path.clone(),
            source,
        })?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(io_error(&self.path))?;
        file.write_all(&line).await.map_err(io_error(&self.path))?;
        file.sync_data().await.map_err(io_error(&self.path))
    }

    /// Return every `begin` that has no later matching `commit`.
    ///
    /// Lines that do not parse (a torn final write) are skipped with a
    /// warning.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Io`] if the journal exists but cannot be read.
    pub async fn pending(&self) -> Result<Vec<JournalEntry>, PipelineError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.path)(e)),
        };
        let mut open: Vec<JournalEntry> = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: JournalEntry = match serde_json::from_str(line) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(journal = %self.path, line = lineno + 1, error = %e, "skipping unreadable journal line");
                    continue;
                }
            };
            match entry.phase {
                Phase::Begin => {
                    open.retain(|o| o.file != entry.file);
                    open.push(entry);
                }
                Phase::Commit => open.retain(|o| !(o.file == entry.file && o.to == entry.to)),
            }
        }
        Ok(open)
    }

    /// Drop all journal lines. Only call once nothing is pending.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Io`] if the file cannot be truncated.
    pub async fn compact(&self) -> Result<(), PipelineError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&self.path)(e)),
        }
    }
}
