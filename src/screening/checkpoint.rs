//! Screening checkpoints
//!
//! Results are appended to a JSON-lines file as they complete and the
//! id of the last flushed entity is written to a sibling `.cursor` file.
//! A resumed run loads every result already on disk and skips those
//! entities. A torn trailing line from an interrupted write is ignored.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::ScreeningResult;
use crate::error::ScreeningError;

#[derive(Debug, Clone)]
pub struct Checkpoint {
    path: PathBuf,
}

impl Checkpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Checkpoint of a jurisdiction under `dir`
    pub fn for_jurisdiction(dir: &Path, jurisdiction: &str) -> Self {
        Self::new(dir.join(format!("{}.jsonl", jurisdiction)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cursor_path(&self) -> PathBuf {
        self.path.with_extension("cursor")
    }

    fn error(&self, message: impl ToString) -> ScreeningError {
        ScreeningError::Checkpoint {
            path: self.path.clone(),
            message: message.to_string(),
        }
    }

    /// Results recorded so far, keyed by node id. Later lines win.
    pub fn load(&self) -> Result<HashMap<String, ScreeningResult>, ScreeningError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let file = fs::File::open(&self.path).map_err(|e| self.error(e))?;
        let mut results = HashMap::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| self.error(e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ScreeningResult>(&line) {
                Ok(result) => {
                    results.insert(result.node_id.clone(), result);
                }
                Err(e) => warn!(
                    path = %self.path.display(),
                    line = line_no + 1,
                    error = %e,
                    "Skipping unreadable checkpoint line"
                ),
            }
        }
        info!(path = %self.path.display(), results = results.len(), "Loaded screening checkpoint");
        Ok(results)
    }

    /// Append results and move the cursor to the last one
    pub fn append(&self, results: &[ScreeningResult]) -> Result<(), ScreeningError> {
        let Some(last) = results.last() else {
            return Ok(());
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.error(e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.error(e))?;
        let mut writer = BufWriter::new(file);
        for result in results {
            serde_json::to_writer(&mut writer, result).map_err(|e| self.error(e))?;
            writer.write_all(b"\n").map_err(|e| self.error(e))?;
        }
        writer.flush().map_err(|e| self.error(e))?;

        fs::write(self.cursor_path(), &last.node_id).map_err(|e| self.error(e))?;
        Ok(())
    }

    /// Id of the last flushed entity
    pub fn cursor(&self) -> Result<Option<String>, ScreeningError> {
        let path = self.cursor_path();
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path).map_err(|e| self.error(e))?;
        let cursor = text.trim();
        Ok((!cursor.is_empty()).then(|| cursor.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procurement_types::ScreeningStatus;

    fn result(id: &str, score: f64) -> ScreeningResult {
        ScreeningResult {
            node_id: id.into(),
            status: ScreeningStatus::NoMatch,
            score: Some(score),
            best: None,
            failed_scopes: vec![],
            error: None,
        }
    }

    #[test]
    fn test_append_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = Checkpoint::for_jurisdiction(dir.path(), "GB");
        assert!(checkpoint.load().unwrap().is_empty());
        assert_eq!(checkpoint.cursor().unwrap(), None);

        checkpoint.append(&[result("A", 0.0), result("B", 0.0)]).unwrap();
        checkpoint.append(&[result("C", 0.0)]).unwrap();

        let loaded = checkpoint.load().unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(checkpoint.cursor().unwrap().as_deref(), Some("C"));
        assert!(checkpoint.path().ends_with("GB.jsonl"));
    }

    #[test]
    fn test_torn_line_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = Checkpoint::new(dir.path().join("run.jsonl"));
        checkpoint.append(&[result("A", 0.0)]).unwrap();

        let mut text = fs::read_to_string(checkpoint.path()).unwrap();
        text.push_str("{\"node_id\":\"B\",\"sta");
        fs::write(checkpoint.path(), text).unwrap();

        let loaded = checkpoint.load().unwrap();
        assert_eq!(loaded.keys().collect::<Vec<_>>(), vec!["A"]);
    }
}
