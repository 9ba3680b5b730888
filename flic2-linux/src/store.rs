//! JSON file store for paired buttons. The whole file is rewritten on every change.

use std::path::{Path, PathBuf};

use flic2_core::{DeviceKey, DeviceRecord, DeviceStore, MemoryStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("store i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("store format: {0}")]
    Json(#[from] serde_json::Error),
}

pub struct JsonStore {
    path: PathBuf,
    records: MemoryStore,
}

impl JsonStore {
    /// Load `path`; a missing file is an empty store.
    pub fn open(path: &Path) -> Result<Self, PersistError> {
        let records = match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice::<Vec<DeviceRecord>>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        log::debug!("loaded {} button(s) from {}", records.len(), path.display());
        Ok(Self {
            path: path.to_path_buf(),
            records: MemoryStore::from_records(records),
        })
    }

    /// Write to a sibling temp file, then rename over the store.
    fn persist(&self) -> Result<(), StoreError> {
        let mut all = self.records.load_all()?;
        all.sort_by_key(|r| r.address.to_string());
        let bytes = serde_json::to_vec_pretty(&all).map_err(PersistError::from)?;
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(PersistError::from)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes).map_err(PersistError::from)?;
        std::fs::rename(&tmp, &self.path).map_err(PersistError::from)?;
        Ok(())
    }
}

impl DeviceStore for JsonStore {
    fn add(&mut self, record: &DeviceRecord) -> Result<(), StoreError> {
        self.records.add(record)?;
        self.persist()
    }

    fn delete(&mut self, key: DeviceKey) -> Result<(), StoreError> {
        self.records.delete(key)?;
        self.persist()
    }

    fn update_name(&mut self, record: &DeviceRecord) -> Result<(), StoreError> {
        self.records.update_name(record)?;
        self.persist()
    }

    fn update_boot_id_and_event_count(
        &mut self,
        record: &DeviceRecord,
    ) -> Result<(), StoreError> {
        self.records.update_boot_id_and_event_count(record)?;
        self.persist()
    }

    fn update_event_count(&mut self, record: &DeviceRecord) -> Result<(), StoreError> {
        self.records.update_event_count(record)?;
        self.persist()
    }

    fn update_adv_settings_configured(
        &mut self,
        record: &DeviceRecord,
    ) -> Result<(), StoreError> {
        self.records.update_adv_settings_configured(record)?;
        self.persist()
    }

    fn update_firmware_version(&mut self, record: &DeviceRecord) -> Result<(), StoreError> {
        self.records.update_firmware_version(record)?;
        self.persist()
    }

    fn update_firmware_check_timestamp(
        &mut self,
        record: &DeviceRecord,
    ) -> Result<(), StoreError> {
        self.records.update_firmware_check_timestamp(record)?;
        self.persist()
    }

    fn update_battery(&mut self, record: &DeviceRecord) -> Result<(), StoreError> {
        self.records.update_battery(record)?;
        self.persist()
    }

    fn load_all(&self) -> Result<Vec<DeviceRecord>, StoreError> {
        self.records.load_all()
    }
}
