// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Purchases core
//!
//! Keeps a device's view of its purchases in sync with the backend.
//!
//! - [`networking::Backend`] performs backend requests, collapsing concurrent
//!   identical requests into one through a [`callback_cache::CallbackCache`].
//! - [`caching::DeviceCache`] persists customer info, offerings and
//!   subscriber attributes per app user, with staleness timestamps.
//! - [`customer_info_manager::CustomerInfoManager`] chooses between cache and
//!   network and notifies observers of every distinct change.
//! - [`identity::IdentityManager`] owns the current app user id.
//!
//! Storage and transport are supplied by the host through the
//! [`caching::CacheStore`] and [`networking::HttpClient`] traits. In-memory
//! implementations of both are available behind the `in_memory` feature.
//!
//! ## Getting started
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use purchases_core::{
//!     caching::{memory::InMemoryCacheStore, DeviceCache},
//!     config::PurchasesConfig,
//!     customer_info_manager::CustomerInfoManager,
//!     date_provider::SystemDateProvider,
//!     identity::IdentityManager,
//!     networking::{memory::InMemoryHttpClient, Backend},
//! };
//!
//! let config = PurchasesConfig::default();
//! let logger = config.logger();
//! let date_provider = Arc::new(SystemDateProvider);
//! let device_cache = Arc::new(DeviceCache::new(
//!     InMemoryCacheStore::new(),
//!     config.clone(),
//!     date_provider.clone(),
//!     logger.clone(),
//! ));
//! let backend = Arc::new(Backend::new(
//!     Arc::new(InMemoryHttpClient::new()),
//!     &config,
//!     logger.clone(),
//! ));
//! let customer_info_manager =
//!     CustomerInfoManager::new(backend.clone(), device_cache.clone(), logger.clone());
//! let identity = IdentityManager::new(
//!     device_cache,
//!     backend,
//!     customer_info_manager,
//!     date_provider,
//!     logger,
//! );
//!
//! let app_user_id = identity.configure(None).unwrap();
//! assert!(identity.current_user_is_anonymous().unwrap());
//! assert_eq!(identity.current_app_user_id().unwrap(), app_user_id);
//! ```

pub mod caching;
pub mod callback_cache;
pub mod config;
pub mod customer_info_manager;
pub mod date_provider;
mod error;
pub mod identity;
pub mod logger;
pub mod models;
pub mod networking;
pub mod receipt;

pub use error::{Error, Result};
