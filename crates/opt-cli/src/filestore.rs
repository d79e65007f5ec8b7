//! JSON file persistence for the CLI harness.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use async_trait::async_trait;

use opt_core::config::ConfigRecord;
use opt_core::hosts::{Persistence, StorageError};

/// Stores the record as pretty JSON at a fixed path, written atomically via
/// a temp file and rename so a crash never leaves a half-written record.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Persistence for JsonFileStore {
    async fn load(&self) -> Result<Option<ConfigRecord>, StorageError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Read(e.to_string())),
        };
        let record =
            serde_json::from_str(&text).map_err(|e| StorageError::Corrupt(e.to_string()))?;
        Ok(Some(record))
    }

    async fn store(&self, record: &ConfigRecord) -> Result<(), StorageError> {
        let text = serde_json::to_string_pretty(record)
            .map_err(|e| StorageError::Write(e.to_string()))?;

        let tmp_path = self.path.with_extension("json.tmp");
        let mut file =
            fs::File::create(&tmp_path).map_err(|e| StorageError::Write(e.to_string()))?;
        file.write_all(text.as_bytes())
            .map_err(|e| StorageError::Write(e.to_string()))?;
        file.flush().map_err(|e| StorageError::Write(e.to_string()))?;
        drop(file);

        fs::rename(&tmp_path, &self.path).map_err(|e| StorageError::Write(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_loads_as_none() {
        let dir = std::env::temp_dir().join("opt-cli-filestore-missing");
        let store = JsonFileStore::new(dir.join("absent.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn store_then_load_roundtrips() {
        let dir = std::env::temp_dir().join("opt-cli-filestore-roundtrip");
        fs::create_dir_all(&dir).unwrap();
        let store = JsonFileStore::new(dir.join("config.json"));

        let mut record = ConfigRecord::default();
        record.revision = 7;
        record.sync_enabled = true;
        store.store(&record).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded, record);
    }
}
