//! Protocol state persistence
//!
//! The whole [`AccountManager`] is stored as one pretty-printed JSON file.
//! Writes go to a temp file that is renamed over the state file, and the
//! previous state is kept in a ring of numbered backups.

use crate::protocol::AccountManager;
use std::fs;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub state_file: String,
    pub backup_enabled: bool,
    pub max_backups: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".cryptoguard_data"),
            state_file: "state.json".to_string(),
            backup_enabled: true,
            max_backups: 5,
        }
    }
}

/// Protocol state storage
#[derive(Debug)]
pub struct Storage {
    config: StorageConfig,
}

impl Storage {
    /// Create a storage manager, creating the data directory if needed
    pub fn new(config: StorageConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(&config.data_dir)?;
        Ok(Self { config })
    }

    /// Storage rooted at `data_dir` with default settings otherwise
    pub fn at(data_dir: &Path) -> Result<Self, StorageError> {
        Self::new(StorageConfig {
            data_dir: data_dir.to_path_buf(),
            ..Default::default()
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    fn state_path(&self) -> PathBuf {
        self.config.data_dir.join(&self.config.state_file)
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        self.config
            .data_dir
            .join(format!("{}.backup.{}", self.config.state_file, index))
    }

    /// Save the protocol state to disk
    pub fn save(&self, manager: &AccountManager) -> Result<(), StorageError> {
        let path = self.state_path();

        if self.config.backup_enabled && self.config.max_backups > 0 && path.exists() {
            self.rotate_backups()?;
            fs::copy(&path, self.backup_path(0))?;
        }

        let temp_path = self.config.data_dir.join("state.tmp");
        {
            let file = fs::File::create(&temp_path)?;
            let writer = BufWriter::new(file);
            serde_json::to_writer_pretty(writer, manager)?;
        }

        fs::rename(&temp_path, &path)?;
        log::debug!("Saved protocol state to {}", path.display());

        Ok(())
    }

    /// Load the protocol state from disk
    pub fn load(&self) -> Result<AccountManager, StorageError> {
        let path = self.state_path();

        if !path.exists() {
            return Err(StorageError::InvalidData(
                "State file not found".to_string(),
            ));
        }

        read_state(&path)
    }

    /// Load saved state, or start from `fallback` when none exists yet
    pub fn load_or_else(
        &self,
        fallback: impl FnOnce() -> AccountManager,
    ) -> Result<AccountManager, StorageError> {
        if self.exists() {
            self.load()
        } else {
            log::info!("No saved state in {}, starting fresh", self.data_dir().display());
            Ok(fallback())
        }
    }

    pub fn exists(&self) -> bool {
        self.state_path().exists()
    }

    /// Delete the saved state
    pub fn delete(&self) -> Result<(), StorageError> {
        let path = self.state_path();
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn rotate_backups(&self) -> Result<(), StorageError> {
        let oldest = self.backup_path(self.config.max_backups - 1);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }

        for i in (0..self.config.max_backups - 1).rev() {
            let current = self.backup_path(i);
            if current.exists() {
                fs::rename(&current, self.backup_path(i + 1))?;
            }
        }

        Ok(())
    }

    /// Read a backup; index 0 is the most recent
    pub fn restore_backup(&self, backup_index: usize) -> Result<AccountManager, StorageError> {
        let backup_path = self.backup_path(backup_index);

        if !backup_path.exists() {
            return Err(StorageError::InvalidData(format!(
                "Backup {} not found",
                backup_index
            )));
        }

        read_state(&backup_path)
    }

    /// List available backups
    pub fn list_backups(&self) -> Vec<usize> {
        (0..self.config.max_backups)
            .filter(|&i| self.backup_path(i).exists())
            .collect()
    }

    /// Get storage statistics
    pub fn stats(&self) -> Result<StorageStats, StorageError> {
        let path = self.state_path();

        let file_size = if path.exists() {
            fs::metadata(&path)?.len()
        } else {
            0
        };

        Ok(StorageStats {
            file_size,
            backup_count: self.list_backups().len(),
            data_dir: self.config.data_dir.clone(),
        })
    }
}

/// Storage statistics
#[derive(Debug)]
pub struct StorageStats {
    pub file_size: u64,
    pub backup_count: usize,
    pub data_dir: PathBuf,
}

fn read_state(path: &Path) -> Result<AccountManager, StorageError> {
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);
    let manager: AccountManager = serde_json::from_reader(reader)?;

    // refuse state whose ledger was edited on disk
    manager
        .verify_events()
        .map_err(|e| StorageError::InvalidData(e.to_string()))?;

    Ok(manager)
}
