//! File-backed progress store.

use super::codec::{decode, encode};
use super::{ProgressRecord, ProgressStore};
use crate::config::Configuration;
use crate::errors::ProgressError;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Keeps the progress record in a single overwritable file.
///
/// Every save writes a sibling temp file and renames it over the record,
/// so a crash mid-write leaves the previous record intact.
#[derive(Debug, Clone)]
pub struct FileProgressStore {
    path: PathBuf,
}

impl FileProgressStore {
    /// Creates a store backed by `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the record file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn write_error(&self, source: std::io::Error) -> ProgressError {
        ProgressError::Write {
            path: self.location(),
            source,
        }
    }
}

impl ProgressStore for FileProgressStore {
    fn save(
        &self,
        stage_index: usize,
        stage_name: &str,
        configuration: &Configuration,
    ) -> Result<(), ProgressError> {
        let record = ProgressRecord::now(stage_index, stage_name, configuration.clone());
        let temp = self.temp_path();

        let mut file = fs::File::create(&temp).map_err(|e| self.write_error(e))?;
        file.write_all(encode(&record).as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|e| self.write_error(e))?;
        drop(file);
        fs::rename(&temp, &self.path).map_err(|e| {
            let _ = fs::remove_file(&temp);
            self.write_error(e)
        })?;

        debug!(stage = stage_index, stage_name, path = %self.path.display(), "Progress saved");
        Ok(())
    }

    fn load(&self) -> Result<Option<ProgressRecord>, ProgressError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => decode(&text).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ProgressError::Read {
                path: self.location(),
                source,
            }),
        }
    }

    fn reset(&self) -> Result<(), ProgressError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "Progress record removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.write_error(e)),
        }
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureToggles;
    use pretty_assertions::assert_eq;

    fn store(dir: &tempfile::TempDir) -> FileProgressStore {
        FileProgressStore::new(dir.path().join(".stagedeploy-progress"))
    }

    #[test]
    fn test_load_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(store(&dir).load().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let config = Configuration::new("demo-a1b2c3").with_toggles(FeatureToggles {
            skip_prerequisites: true,
            no_identifier_suffix: false,
        });

        store.save(1, "Preflight checks", &config).unwrap();
        store.save(2, "Deploy infrastructure stack", &config).unwrap();

        let record = store.load().unwrap().unwrap();
        assert_eq!(record.last_completed_stage, 2);
        assert_eq!(record.last_completed_stage_name, "Deploy infrastructure stack");
        assert_eq!(record.configuration, config);
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn test_file_is_shell_sourceable_text() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.save(4, "Upload assets", &Configuration::new("demo")).unwrap();

        let text = fs::read_to_string(store.path()).unwrap();
        assert!(text.starts_with("LAST_COMPLETED_STAGE=4\n"));
        assert!(text.contains("LAST_COMPLETED_STAGE_NAME='Upload assets'\n"));
    }

    #[test]
    fn test_reset_removes_and_tolerates_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.reset().unwrap();

        store.save(1, "Preflight checks", &Configuration::default()).unwrap();
        store.reset().unwrap();
        assert!(!store.path().exists());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        fs::write(store.path(), "LAST_COMPLETED_STAGE=2\n").unwrap();
        assert!(matches!(store.load(), Err(ProgressError::Malformed(_))));
    }

    #[test]
    fn test_write_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileProgressStore::new(dir.path().join("missing-dir").join("progress"));
        let err = store.save(1, "Preflight checks", &Configuration::default()).unwrap_err();
        assert!(matches!(err, ProgressError::Write { .. }));
    }
}
