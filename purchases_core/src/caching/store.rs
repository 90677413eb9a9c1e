// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

use serde_json::Value;

/// One change applied by [`CacheStore::write_batch`].
#[derive(Debug, Clone, PartialEq)]
pub enum CacheWrite {
    Set { key: String, value: Value },
    Remove { key: String },
}

impl CacheWrite {
    pub fn set(key: impl Into<String>, value: Value) -> Self {
        CacheWrite::Set {
            key: key.into(),
            value,
        }
    }

    pub fn remove(key: impl Into<String>) -> Self {
        CacheWrite::Remove { key: key.into() }
    }
}

/// Persistent key-value storage backing the device cache.
///
/// Values are JSON documents. The device cache serializes access, so
/// implementations don't need interior locking.
///
/// # Example
///
/// For example code see [crate::caching::memory::InMemoryCacheStore]
pub trait CacheStore: Send {
    /// Defines the user-specified error type.
    ///
    /// This error type should implement the `Error` and `Debug` traits from the standard library.
    /// Errors of this type are returned to the user when an operation fails.
    type AdapterError: std::error::Error + std::fmt::Debug + Send + Sync + 'static;

    fn read(&self, key: &str) -> Result<Option<Value>, Self::AdapterError>;

    fn write(&mut self, key: &str, value: Value) -> Result<(), Self::AdapterError>;

    /// Removing a missing key is not an error.
    fn remove(&mut self, key: &str) -> Result<(), Self::AdapterError>;

    /// Applies every change or none of them.
    fn write_batch(&mut self, batch: Vec<CacheWrite>) -> Result<(), Self::AdapterError>;
}
