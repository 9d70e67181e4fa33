//! In-memory index of which primary state holds each document.

use std::{collections::BTreeMap, io};

use camino::Utf8Path;
use tracing::warn;

use super::{PipelineError, PipelineLayout, PipelineState, io_error, sidecar::is_sidecar};

/// Map from document name to its primary state (Ready, Sent or Failed).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineIndex {
    states: BTreeMap<String, PipelineState>,
}

/// A document name found in more than one primary state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Document name.
    pub file: String,
    /// Every primary state that holds it.
    pub states: Vec<PipelineState>,
}

impl PipelineIndex {
    /// Rebuild the index by scanning the primary state directories.
    ///
    /// When a name appears in several states the last in
    /// [`PipelineState::PRIMARY`] order wins the index slot and the clash is
    /// returned as a [`Violation`].
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Io`] if a directory cannot be listed.
    pub async fn scan(layout: &PipelineLayout) -> Result<(Self, Vec<Violation>), PipelineError> {
        let mut seen: BTreeMap<String, Vec<PipelineState>> = BTreeMap::new();
        for state in PipelineState::PRIMARY {
            for name in list_documents(&layout.dir(state)).await? {
                seen.entry(name).or_default().push(state);
            }
        }
        let mut index = Self::default();
        let mut violations = Vec::new();
        for (file, states) in seen {
            if let Some(last) = states.last() {
                index.states.insert(file.clone(), *last);
            }
            if states.len() > 1 {
                warn!(%file, ?states, "document present in several primary states");
                violations.push(Violation { file, states });
            }
        }
        Ok((index, violations))
    }

    /// Return the primary state holding `file`.
    #[must_use]
    pub fn state_of(&self, file: &str) -> Option<PipelineState> { self.states.get(file).copied() }

    /// Record that `file` now lives in `state`.
    pub fn place(&mut self, file: &str, state: PipelineState) {
        if state.is_primary() {
            self.states.insert(file.to_owned(), state);
        }
    }

    /// Forget `file`.
    pub fn remove(&mut self, file: &str) { self.states.remove(file); }

    /// Iterate over documents in `state`.
    pub fn in_state(&self, state: PipelineState) -> impl Iterator<Item = &str> {
        self.states
            .iter()
            .filter(move |(_, s)| **s == state)
            .map(|(name, _)| name.as_str())
    }

    /// Number of indexed documents.
    #[must_use]
    pub fn len(&self) -> usize { self.states.len() }

    /// Return `true` if nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.states.is_empty() }
}

/// List document names in `dir`, sorted, skipping sidecars and directories.
///
/// A missing directory lists as empty.
///
/// # Errors
///
/// Returns [`PipelineError::Io`] if the directory cannot be read.
pub async fn list_documents(dir: &Utf8Path) -> Result<Vec<String>, PipelineError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_error(dir)(e)),
    };
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_error(dir))? {
        let file_type = entry.file_type().await.map_err(io_error(dir))?;
        if file_type.is_dir() {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            warn!(dir = %dir, "skipping file with non UTF-8 name");
            continue;
        };
        if !is_sidecar(&name) {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    use super::*;

    async fn layout_with(files: &[(PipelineState, &str)]) -> (TempDir, PipelineLayout) {
        let tmp = TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf8 path");
        let layout = PipelineLayout::new(root);
        layout.ensure().await.expect("ensure");
        for (state, name) in files {
            std::fs::write(layout.document(*state, name), b"UNB").expect("write");
        }
        (tmp, layout)
    }

    #[tokio::test]
    async fn scan_indexes_primary_states_only() {
        let (_tmp, layout) = layout_with(&[
            (PipelineState::Ready, "a.edi"),
            (PipelineState::Sent, "b.edi"),
            (PipelineState::Failed, "c.edi"),
            (PipelineState::Archived, "b.edi"),
            (PipelineState::Generated, "d.edi"),
        ])
        .await;
        std::fs::write(layout.document(PipelineState::Ready, "a.edi.meta.json"), b"{}")
            .expect("write sidecar");

        let (index, violations) = PipelineIndex::scan(&layout).await.expect("scan");

        assert!(violations.is_empty());
        assert_eq!(index.len(), 3);
        assert_eq!(index.state_of("a.edi"), Some(PipelineState::Ready));
        assert_eq!(index.state_of("b.edi"), Some(PipelineState::Sent));
        assert_eq!(index.state_of("c.edi"), Some(PipelineState::Failed));
        assert_eq!(index.state_of("d.edi"), None);
    }

    #[tokio::test]
    async fn scan_reports_names_in_several_states() {
        let (_tmp, layout) = layout_with(&[
            (PipelineState::Ready, "dup.edi"),
            (PipelineState::Failed, "dup.edi"),
        ])
        .await;

        let (index, violations) = PipelineIndex::scan(&layout).await.expect("scan");

        assert_eq!(
            violations,
            vec![Violation {
                file: "dup.edi".to_owned(),
                states: vec![PipelineState::Ready, PipelineState::Failed],
            }]
        );
        assert_eq!(index.state_of("dup.edi"), Some(PipelineState::Failed));
    }

    #[test]
    fn place_ignores_staging_states() {
        let mut index = PipelineIndex::default();
        index.place("a.edi", PipelineState::Archived);
        assert!(index.is_empty());
        index.place("a.edi", PipelineState::Sent);
        assert_eq!(index.in_state(PipelineState::Sent).collect::<Vec<_>>(), vec!["a.edi"]);
        index.remove("a.edi");
        assert!(index.is_empty());
    }
}
