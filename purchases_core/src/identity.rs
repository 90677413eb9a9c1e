// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Current app user, log in and log out.
//!
//! Switching users always goes through [`DeviceCache::clear_caches`], so the
//! previous user's cached state is dropped together with the rotation while
//! its unsynced subscriber attributes survive until they are delivered.

use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;

use crate::{
    caching::{CacheStore, DeviceCache},
    customer_info_manager::{CacheFetchPolicy, CustomerInfoManager},
    date_provider::DateProvider,
    logger::Logger,
    models::{CustomerInfo, LogInResponse, SubscriberAttribute},
    networking::{Backend, BackendError},
    Error, Result,
};

const ANONYMOUS_ID_PREFIX: &str = "$RCAnonymousID:";

/// A fresh anonymous app user id: the prefix followed by 32 lowercase hex
/// digits.
pub fn generate_anonymous_app_user_id() -> String {
    format!("{ANONYMOUS_ID_PREFIX}{:032x}", rand::random::<u128>())
}

pub fn is_anonymous_app_user_id(app_user_id: &str) -> bool {
    app_user_id
        .strip_prefix(ANONYMOUS_ID_PREFIX)
        .is_some_and(|suffix| {
            suffix.len() == 32
                && suffix
                    .chars()
                    .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        })
}

pub struct IdentityManager<S> {
    device_cache: Arc<DeviceCache<S>>,
    backend: Arc<Backend>,
    customer_info_manager: CustomerInfoManager<S>,
    date_provider: Arc<dyn DateProvider>,
    logger: Logger,
    // one identity change at a time
    identity_change: AsyncMutex<()>,
}

impl<S: CacheStore + 'static> IdentityManager<S> {
    pub fn new(
        device_cache: Arc<DeviceCache<S>>,
        backend: Arc<Backend>,
        customer_info_manager: CustomerInfoManager<S>,
        date_provider: Arc<dyn DateProvider>,
        logger: Logger,
    ) -> Self {
        Self {
            device_cache,
            backend,
            customer_info_manager,
            date_provider,
            logger,
            identity_change: AsyncMutex::new(()),
        }
    }

    /// Picks the app user for this session: `app_user_id` when given, else
    /// the cached one, else a new anonymous id. Returns the chosen id.
    pub fn configure(&self, app_user_id: Option<&str>) -> Result<String> {
        let requested = app_user_id
            .map(str::trim)
            .filter(|app_user_id| !app_user_id.is_empty());
        let cached = self.device_cache.cached_app_user_id()?;

        let app_user_id = match (requested, cached) {
            (Some(requested), Some(cached)) if requested != cached => {
                self.device_cache.clear_caches(&cached, requested)?;
                requested.to_owned()
            }
            (Some(requested), _) => {
                self.device_cache.cache_app_user_id(requested)?;
                requested.to_owned()
            }
            (None, Some(cached)) => cached,
            (None, None) => {
                let anonymous = generate_anonymous_app_user_id();
                self.device_cache.cache_app_user_id(&anonymous)?;
                anonymous
            }
        };
        self.device_cache.cleanup_subscriber_attributes()?;
        self.logger
            .info(format!("Configured with app user id {app_user_id}"));
        Ok(app_user_id)
    }

    pub fn current_app_user_id(&self) -> Result<String> {
        self.device_cache
            .cached_app_user_id()?
            .ok_or(Error::NotConfigured)
    }

    pub fn current_user_is_anonymous(&self) -> Result<bool> {
        Ok(is_anonymous_app_user_id(&self.current_app_user_id()?))
    }

    /// Identifies the current user as `new_app_user_id`.
    ///
    /// Logging in as the current user only refreshes its customer info.
    pub async fn log_in(&self, new_app_user_id: &str) -> Result<LogInResponse> {
        let new_app_user_id = new_app_user_id.trim();
        if new_app_user_id.is_empty() {
            return Err(BackendError::MissingAppUserId.into());
        }
        let _guard = self.identity_change.lock().await;
        let current = self.current_app_user_id()?;

        if current == new_app_user_id {
            self.logger
                .debug(format!("Already logged in as {new_app_user_id}"));
            let customer_info = self
                .customer_info_manager
                .customer_info(new_app_user_id, CacheFetchPolicy::FetchCurrent)
                .await?;
            return Ok(LogInResponse {
                customer_info,
                created: false,
            });
        }

        let response = self.backend.log_in(&current, new_app_user_id).await?;
        self.device_cache.clear_caches(&current, new_app_user_id)?;
        self.customer_info_manager
            .cache_customer_info(&response.customer_info, new_app_user_id)?;
        self.logger.info(format!(
            "Logged in as {new_app_user_id} (created: {})",
            response.created
        ));
        Ok(response)
    }

    /// Rotates to a new anonymous user and fetches its customer info.
    ///
    /// The rotation sticks even when the fetch fails.
    pub async fn log_out(&self) -> Result<CustomerInfo> {
        let _guard = self.identity_change.lock().await;
        let current = self.current_app_user_id()?;
        if is_anonymous_app_user_id(&current) {
            return Err(Error::LogOutAnonymousUser);
        }
        let anonymous = generate_anonymous_app_user_id();
        self.device_cache.clear_caches(&current, &anonymous)?;
        self.logger
            .info(format!("Logged out {current}, now {anonymous}"));
        self.customer_info_manager
            .fetch_and_cache_customer_info(&anonymous)
            .await
    }

    /// Records an attribute for the current user, to be delivered by
    /// [`Self::sync_subscriber_attributes`].
    pub fn set_attribute(&self, key: &str, value: Option<String>) -> Result<()> {
        let app_user_id = self.current_app_user_id()?;
        let attribute = SubscriberAttribute::new(key, value, self.date_provider.now());
        self.device_cache
            .store_subscriber_attribute(attribute, &app_user_id)
    }

    /// Posts the unsynced attributes of every user. Returns how many users
    /// were synced.
    ///
    /// Attributes the backend rejected for good are marked synced as well, so
    /// they are not posted forever. Synced attributes of users other than the
    /// current one are dropped.
    pub async fn sync_subscriber_attributes(&self) -> Result<usize> {
        let current = self.device_cache.cached_app_user_id()?;
        let mut synced = 0;
        for (app_user_id, attributes) in self.device_cache.unsynced_attributes_for_all_users()? {
            match self
                .backend
                .post_subscriber_attributes(&app_user_id, attributes.clone())
                .await
            {
                Ok(()) => synced += 1,
                Err(err) if err.is_transient() => {
                    self.logger.warn(format!(
                        "Failed to sync attributes of {app_user_id}, will retry: {err}"
                    ));
                    continue;
                }
                Err(err) => {
                    self.logger.error(format!(
                        "Backend rejected attributes of {app_user_id}: {err}"
                    ));
                }
            }
            self.device_cache
                .mark_attributes_synced(&attributes, &app_user_id)?;
            if current.as_deref() != Some(app_user_id.as_str()) {
                self.device_cache.delete_attributes_if_synced(&app_user_id)?;
            }
        }
        Ok(synced)
    }
}
