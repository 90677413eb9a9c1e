// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Device-local caching
//!
//! [`DeviceCache`] keeps the last known customer info, offerings and
//! subscriber attributes per app user, on top of any [`CacheStore`].
//! Freshness is decided from the timestamps written next to each value and
//! the durations in [`crate::config::PurchasesConfig`].
//!
//! Two stores ship with the crate: [`JsonFileCacheStore`], which survives
//! restarts, and `memory::InMemoryCacheStore` behind the `in_memory` feature.

use std::time::Duration;

use chrono::{DateTime, Utc};

mod device_cache;
mod file;
mod in_memory_cached_object;
#[cfg(feature = "in_memory")]
pub mod memory;
mod store;

pub use device_cache::{keys, AttributesByUser, DeviceCache};
pub use file::{FileStoreError, JsonFileCacheStore};
pub use in_memory_cached_object::InMemoryCachedObject;
pub use store::{CacheStore, CacheWrite};

/// A missing timestamp is always stale. A timestamp in the future, left by a
/// clock change, counts as fresh.
pub(crate) fn is_stale(
    last_updated_at: Option<DateTime<Utc>>,
    duration: Duration,
    now: DateTime<Utc>,
) -> bool {
    let Some(last_updated_at) = last_updated_at else {
        return true;
    };
    match chrono::Duration::from_std(duration) {
        Ok(duration) => now - last_updated_at >= duration,
        Err(_) => false,
    }
}
