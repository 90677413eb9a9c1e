// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-memory cache store.
//!
//! Nothing survives the process. It is useful for testing and development
//! purposes.

use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;

use super::{CacheStore, CacheWrite};

#[derive(Debug, Error)]
pub enum InMemoryError {
    #[error("something went wrong: {error}")]
    AdapterError { error: String },
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryCacheStore {
    values: HashMap<String, Value>,
    read_only: bool,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that rejects every write, to exercise error paths.
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Self::default()
        }
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.values.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn check_writable(&self) -> Result<(), InMemoryError> {
        if self.read_only {
            return Err(InMemoryError::AdapterError {
                error: "store is read only".to_owned(),
            });
        }
        Ok(())
    }
}

impl CacheStore for InMemoryCacheStore {
    type AdapterError = InMemoryError;

    fn read(&self, key: &str) -> Result<Option<Value>, Self::AdapterError> {
        Ok(self.values.get(key).cloned())
    }

    fn write(&mut self, key: &str, value: Value) -> Result<(), Self::AdapterError> {
        self.check_writable()?;
        self.values.insert(key.to_owned(), value);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), Self::AdapterError> {
        self.check_writable()?;
        self.values.remove(key);
        Ok(())
    }

    fn write_batch(&mut self, batch: Vec<CacheWrite>) -> Result<(), Self::AdapterError> {
        self.check_writable()?;
        for write in batch {
            match write {
                CacheWrite::Set { key, value } => {
                    self.values.insert(key, value);
                }
                CacheWrite::Remove { key } => {
                    self.values.remove(&key);
                }
            }
        }
        Ok(())
    }
}
