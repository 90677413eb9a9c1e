// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Cache store persisted as a single JSON document.

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use serde_json::Value;
use thiserror::Error;

use super::{CacheStore, CacheWrite};

#[derive(Debug, Error)]
pub enum FileStoreError {
    #[error("Failed to access cache file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Cache file {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Keeps every key in memory and rewrites the whole file on each change.
///
/// The file is replaced atomically: the new contents are written next to it
/// and renamed over it, so a crash never leaves a half written cache.
#[derive(Debug)]
pub struct JsonFileCacheStore {
    path: PathBuf,
    values: BTreeMap<String, Value>,
}

impl JsonFileCacheStore {
    /// Loads the cache at `path`. A missing file is an empty cache.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, FileStoreError> {
        let path = path.into();
        let values = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| FileStoreError::Json {
                path: path.clone(),
                source,
            })?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(FileStoreError::Io { path, source }),
        };
        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, Value>) -> Result<(), FileStoreError> {
        let io_error = |source: io::Error| FileStoreError::Io {
            path: self.path.clone(),
            source,
        };
        let bytes = serde_json::to_vec_pretty(values).map_err(|source| FileStoreError::Json {
            path: self.path.clone(),
            source,
        })?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, bytes).map_err(io_error)?;
        fs::rename(&temp_path, &self.path).map_err(io_error)
    }

    /// Applies `change` to a copy and only keeps it once it is on disk.
    fn update(
        &mut self,
        change: impl FnOnce(&mut BTreeMap<String, Value>),
    ) -> Result<(), FileStoreError> {
        let mut values = self.values.clone();
        change(&mut values);
        self.persist(&values)?;
        self.values = values;
        Ok(())
    }
}

impl CacheStore for JsonFileCacheStore {
    type AdapterError = FileStoreError;

    fn read(&self, key: &str) -> Result<Option<Value>, Self::AdapterError> {
        Ok(self.values.get(key).cloned())
    }

    fn write(&mut self, key: &str, value: Value) -> Result<(), Self::AdapterError> {
        self.update(|values| {
            values.insert(key.to_owned(), value);
        })
    }

    fn remove(&mut self, key: &str) -> Result<(), Self::AdapterError> {
        if !self.values.contains_key(key) {
            return Ok(());
        }
        self.update(|values| {
            values.remove(key);
        })
    }

    fn write_batch(&mut self, batch: Vec<CacheWrite>) -> Result<(), Self::AdapterError> {
        self.update(|values| {
            for write in batch {
                match write {
                    CacheWrite::Set { key, value } => {
                        values.insert(key, value);
                    }
                    CacheWrite::Remove { key } => {
                        values.remove(&key);
                    }
                }
            }
        })
    }
}
