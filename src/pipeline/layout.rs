//! Directory layout of a pipeline root.

use camino::{Utf8Path, Utf8PathBuf};

use super::{PipelineError, PipelineState, io_error};

const JOURNAL_FILE: &str = "journal.jsonl";

/// Locations of the state directories under one root.
///
/// Built once from configuration and handed to [`super::Pipeline::open`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineLayout {
    root: Utf8PathBuf,
}

impl PipelineLayout {
    /// Create a layout rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self { Self { root: root.into() } }

    /// Return the root directory.
    #[must_use]
    pub fn root(&self) -> &Utf8Path { &self.root }

    /// Return the directory holding documents in `state`.
    #[must_use]
    pub fn dir(&self, state: PipelineState) -> Utf8PathBuf { self.root.join(state.dir_name()) }

    /// Return the path `name` would have in `state`.
    #[must_use]
    pub fn document(&self, state: PipelineState, name: &str) -> Utf8PathBuf {
        self.dir(state).join(name)
    }

    /// Return the transition journal path.
    #[must_use]
    pub fn journal(&self) -> Utf8PathBuf { self.root.join(JOURNAL_FILE) }

    /// Create every state directory that does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Io`] if a directory cannot be created.
    pub async fn ensure(&self) -> Result<(), PipelineError> {
        for state in PipelineState::ALL {
            let dir = self.dir(state);
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(io_error(&dir))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use tempfile::TempDir;

    use super::*;

    #[rstest]
    #[case(PipelineState::Generated, "/srv/edi/generated")]
    #[case(PipelineState::Ready, "/srv/edi/ready")]
    #[case(PipelineState::Sent, "/srv/edi/sent")]
    #[case(PipelineState::Failed, "/srv/edi/failed")]
    #[case(PipelineState::Archived, "/srv/edi/archive")]
    fn maps_states_to_sibling_dirs(#[case] state: PipelineState, #[case] expected: &str) {
        let layout = PipelineLayout::new("/srv/edi");
        assert_eq!(layout.dir(state), Utf8PathBuf::from(expected));
    }

    #[tokio::test]
    async fn ensure_creates_all_dirs() {
        let tmp = TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(tmp.path().join("pipeline")).expect("utf8 path");
        let layout = PipelineLayout::new(root);

        layout.ensure().await.expect("ensure");
        layout.ensure().await.expect("ensure is idempotent");

        for state in PipelineState::ALL {
            assert!(layout.dir(state).is_dir(), "{state} missing");
        }
    }
}
