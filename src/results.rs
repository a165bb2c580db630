//! Per-run result persistence
//!
//! The final session record is written to `<results_dir>/<run_id>/results.json`.
//! Field names come straight from the serde derives on `SessionState`, so
//! older runs stay readable as long as those names do not change.

use crate::error::{EngineError, EngineResult};
use crate::safe_apply::write_atomic;
use crate::session::SessionState;
use std::fs;
use std::path::{Path, PathBuf};

const RESULTS_FILE: &str = "results.json";

pub struct ResultsWriter {
    results_dir: PathBuf,
}

impl ResultsWriter {
    pub fn new(results_dir: impl Into<PathBuf>) -> Self {
        Self {
            results_dir: results_dir.into(),
        }
    }

    /// Where the record for `run_id` lives.
    pub fn path_for(&self, run_id: &str) -> EngineResult<PathBuf> {
        let valid = !run_id.is_empty()
            && run_id != "."
            && run_id != ".."
            && !run_id.contains(['/', '\\']);
        if !valid {
            return Err(EngineError::persist(
                &self.results_dir,
                format!("invalid run id {:?}", run_id),
            ));
        }
        Ok(self.results_dir.join(run_id).join(RESULTS_FILE))
    }

    /// Write the session as pretty-printed JSON and return the file path.
    pub fn write(&self, state: &SessionState) -> EngineResult<PathBuf> {
        let path = self.path_for(&state.run_id)?;
        let Some(run_dir) = path.parent() else {
            return Err(EngineError::persist(&path, "results path has no parent"));
        };
        fs::create_dir_all(run_dir).map_err(|e| EngineError::persist(run_dir, e.to_string()))?;

        let content = serde_json::to_string_pretty(state)?;
        write_atomic(&path, &content).map_err(|e| EngineError::persist(&path, e.to_string()))?;

        tracing::info!(run_id = %state.run_id, path = %path.display(), "results written");
        Ok(path)
    }

    /// Read a previously written record.
    pub fn load(&self, run_id: &str) -> EngineResult<SessionState> {
        let path = self.path_for(run_id)?;
        load_session(&path)
    }
}

/// Parse a session document from disk.
pub fn load_session(path: &Path) -> EngineResult<SessionState> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}
