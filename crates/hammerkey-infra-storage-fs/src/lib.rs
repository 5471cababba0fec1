pub mod key_params;

use hammerkey_ports::storage::{KeyParamTable, ParamStore, RigSettingsDto, StorageError};
use std::fs;
use std::path::{Path, PathBuf};

pub const SETTINGS_FILE: &str = "settings.json";
pub const KEY_PARAMS_FILE: &str = "keyParams.csv";

/// Settings and calibrated key parameters kept as files in one directory.
pub struct FsStorage {
    base_dir: PathBuf,
}

impl FsStorage {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn default_base_dir() -> Result<PathBuf, StorageError> {
        let base = dirs_next::config_dir()
            .ok_or_else(|| StorageError::Io("config dir not found".to_string()))?;
        Ok(base.join("HammerKey"))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn settings_path(&self) -> PathBuf {
        self.base_dir.join(SETTINGS_FILE)
    }

    fn key_params_path(&self) -> PathBuf {
        self.base_dir.join(KEY_PARAMS_FILE)
    }

    fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, StorageError> {
        let data = fs::read(path).map_err(|e| StorageError::Io(e.to_string()))?;
        serde_json::from_slice(&data).map_err(|e| StorageError::Serde(e.to_string()))
    }

    fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
        let data =
            serde_json::to_vec_pretty(value).map_err(|e| StorageError::Serde(e.to_string()))?;
        Self::write_file(path, &data)
    }

    fn write_file(path: &Path, data: &[u8]) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        fs::write(path, data).map_err(|e| StorageError::Io(e.to_string()))
    }
}

impl Default for FsStorage {
    fn default() -> Self {
        let base_dir = Self::default_base_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self { base_dir }
    }
}

impl ParamStore for FsStorage {
    fn load_settings(&self) -> Result<RigSettingsDto, StorageError> {
        let path = self.settings_path();
        if !path.exists() {
            log::debug!("no {} in {}, using defaults", SETTINGS_FILE, self.base_dir.display());
            return Ok(RigSettingsDto::default());
        }
        Self::read_json(&path)
    }

    fn save_settings(&self, s: &RigSettingsDto) -> Result<(), StorageError> {
        let path = self.settings_path();
        Self::write_json(&path, s)
    }

    fn load_key_params(&self) -> Result<KeyParamTable, StorageError> {
        let path = self.key_params_path();
        if !path.exists() {
            return Ok(KeyParamTable::default());
        }
        let text = fs::read_to_string(&path).map_err(|e| StorageError::Io(e.to_string()))?;
        let table = key_params::parse(&text)?;
        for (index, record) in table.iter() {
            log::info!(
                "key {index}: stored down {:?} up {:?}",
                record.adc_down,
                record.adc_up
            );
        }
        Ok(table)
    }

    fn save_key_params(&self, params: &KeyParamTable) -> Result<(), StorageError> {
        let path = self.key_params_path();
        Self::write_file(&path, key_params::format(params).as_bytes())
    }
}
