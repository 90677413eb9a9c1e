// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use super::{is_stale, CacheStore, CacheWrite, InMemoryCachedObject};
use crate::{
    config::{AppStatus, PurchasesConfig},
    date_provider::DateProvider,
    logger::Logger,
    models::{CustomerInfo, Offerings, SubscriberAttribute, SubscriberAttributes},
    Error, Result,
};

/// Attributes of every app user, by app user id.
pub type AttributesByUser = BTreeMap<String, SubscriberAttributes>;

/// Names of the persisted entries.
pub mod keys {
    pub const PREFIX: &str = "com.revenuecat.userdefaults.";

    pub fn app_user_id() -> String {
        format!("{PREFIX}appUserID.new")
    }

    pub fn customer_info(app_user_id: &str) -> String {
        format!("{PREFIX}purchaserInfo.{app_user_id}")
    }

    pub fn customer_info_last_updated(app_user_id: &str) -> String {
        format!("{PREFIX}purchaserInfoLastUpdated.{app_user_id}")
    }

    pub fn offerings(app_user_id: &str) -> String {
        format!("{PREFIX}offerings.{app_user_id}")
    }

    pub fn offerings_last_updated(app_user_id: &str) -> String {
        format!("{PREFIX}offeringsLastUpdated.{app_user_id}")
    }

    pub fn subscriber_attributes() -> String {
        format!("{PREFIX}subscriberAttributes")
    }
}

/// Device-local cache of customer info, offerings and subscriber attributes.
///
/// Every operation holds the store lock for its whole read-modify-write, so
/// related entries always change together.
pub struct DeviceCache<S> {
    store: Mutex<S>,
    offerings: InMemoryCachedObject<Offerings>,
    date_provider: Arc<dyn DateProvider>,
    config: PurchasesConfig,
    logger: Logger,
}

impl<S: CacheStore> DeviceCache<S> {
    pub fn new(
        store: S,
        config: PurchasesConfig,
        date_provider: Arc<dyn DateProvider>,
        logger: Logger,
    ) -> Self {
        Self {
            store: Mutex::new(store),
            offerings: InMemoryCachedObject::new(date_provider.clone()),
            date_provider,
            config,
            logger,
        }
    }

    fn lock(&self) -> MutexGuard<'_, S> {
        self.store.lock().unwrap()
    }

    // ---- app user id

    pub fn cached_app_user_id(&self) -> Result<Option<String>> {
        read_value(&*self.lock(), &keys::app_user_id())
    }

    pub fn cache_app_user_id(&self, app_user_id: &str) -> Result<()> {
        self.lock()
            .write(&keys::app_user_id(), Value::from(app_user_id))
            .map_err(Error::adapter)
    }

    /// Forgets everything cached for `old_app_user_id` except its unsynced
    /// subscriber attributes, and makes `new_app_user_id` the current user.
    ///
    /// Persisted entries change in one batch; the in-memory offerings are
    /// cleared before the store lock is released.
    pub fn clear_caches(&self, old_app_user_id: &str, new_app_user_id: &str) -> Result<()> {
        let mut store = self.lock();

        let mut attributes = read_attributes(&*store, &self.logger)?;
        retain_unsynced(&mut attributes, old_app_user_id);

        store
            .write_batch(vec![
                CacheWrite::remove(keys::customer_info(old_app_user_id)),
                CacheWrite::remove(keys::customer_info_last_updated(old_app_user_id)),
                CacheWrite::remove(keys::offerings(old_app_user_id)),
                CacheWrite::remove(keys::offerings_last_updated(old_app_user_id)),
                CacheWrite::set(
                    keys::subscriber_attributes(),
                    to_value(&keys::subscriber_attributes(), &attributes)?,
                ),
                CacheWrite::set(keys::app_user_id(), Value::from(new_app_user_id)),
            ])
            .map_err(Error::adapter)?;
        self.offerings.clear_cache();

        self.logger.debug(format!(
            "Cleared caches of {old_app_user_id}, current app user is now {new_app_user_id}"
        ));
        Ok(())
    }

    // ---- customer info

    pub fn cached_customer_info_data(&self, app_user_id: &str) -> Result<Option<Value>> {
        self.lock()
            .read(&keys::customer_info(app_user_id))
            .map_err(Error::adapter)
    }

    /// Stores `customer_info` and marks it fresh.
    pub fn cache_customer_info(
        &self,
        app_user_id: &str,
        customer_info: &CustomerInfo,
    ) -> Result<()> {
        let key = keys::customer_info(app_user_id);
        let data = customer_info
            .to_cached_json()
            .map_err(|err| serialization_error(&key, err))?;
        let timestamp_key = keys::customer_info_last_updated(app_user_id);
        let now = to_value(&timestamp_key, &self.date_provider.now())?;

        self.lock()
            .write_batch(vec![
                CacheWrite::set(key, data),
                CacheWrite::set(timestamp_key, now),
            ])
            .map_err(Error::adapter)
    }

    /// Stale when there is no timestamp or the cache duration for
    /// `app_status` has elapsed since it.
    pub fn is_customer_info_cache_stale(
        &self,
        app_user_id: &str,
        app_status: AppStatus,
    ) -> Result<bool> {
        let last_updated = self.timestamp(&keys::customer_info_last_updated(app_user_id))?;
        Ok(is_stale(
            last_updated,
            self.config.customer_info_cache_duration(app_status),
            self.date_provider.now(),
        ))
    }

    pub fn customer_info_last_updated(&self, app_user_id: &str) -> Result<Option<DateTime<Utc>>> {
        self.timestamp(&keys::customer_info_last_updated(app_user_id))
    }

    pub fn clear_customer_info_cache_timestamp(&self, app_user_id: &str) -> Result<()> {
        self.lock()
            .remove(&keys::customer_info_last_updated(app_user_id))
            .map_err(Error::adapter)
    }

    pub fn set_customer_info_cache_timestamp(
        &self,
        app_user_id: &str,
        date: DateTime<Utc>,
    ) -> Result<()> {
        let key = keys::customer_info_last_updated(app_user_id);
        let value = to_value(&key, &date)?;
        self.lock().write(&key, value).map_err(Error::adapter)
    }

    /// Marks the cache fresh before a refresh starts so concurrent readers
    /// don't start their own.
    pub fn set_cache_timestamp_to_now_to_prevent_concurrent_customer_info_updates(
        &self,
        app_user_id: &str,
    ) -> Result<()> {
        self.set_customer_info_cache_timestamp(app_user_id, self.date_provider.now())
    }

    pub fn clear_customer_info_cache(&self, app_user_id: &str) -> Result<()> {
        self.lock()
            .write_batch(vec![
                CacheWrite::remove(keys::customer_info(app_user_id)),
                CacheWrite::remove(keys::customer_info_last_updated(app_user_id)),
            ])
            .map_err(Error::adapter)
    }

    // ---- offerings

    /// Keeps `offerings` in memory and persists them for `app_user_id`.
    pub fn cache_offerings(&self, app_user_id: &str, offerings: &Offerings) -> Result<()> {
        let key = keys::offerings(app_user_id);
        let data = to_value(&key, offerings)?;
        let timestamp_key = keys::offerings_last_updated(app_user_id);
        let now = to_value(&timestamp_key, &self.date_provider.now())?;

        let mut store = self.lock();
        store
            .write_batch(vec![
                CacheWrite::set(key, data),
                CacheWrite::set(timestamp_key, now),
            ])
            .map_err(Error::adapter)?;
        self.offerings.cache(offerings.clone());
        Ok(())
    }

    pub fn cached_offerings(&self) -> Option<Offerings> {
        self.offerings.cached_instance()
    }

    /// Offerings persisted by a previous process, if any.
    pub fn persisted_offerings(&self, app_user_id: &str) -> Result<Option<Offerings>> {
        read_value(&*self.lock(), &keys::offerings(app_user_id))
    }

    /// The in-memory copy decides while there is one; otherwise the persisted
    /// timestamp does.
    pub fn is_offerings_cache_stale(
        &self,
        app_user_id: &str,
        app_status: AppStatus,
    ) -> Result<bool> {
        let duration = self.config.offerings_cache_duration(app_status);
        if self.offerings.has_cached_instance() {
            return Ok(self.offerings.is_cache_stale(duration));
        }
        let last_updated = self.timestamp(&keys::offerings_last_updated(app_user_id))?;
        Ok(is_stale(last_updated, duration, self.date_provider.now()))
    }

    pub fn clear_cached_offerings(&self) {
        self.offerings.clear_cache();
    }

    pub fn clear_offerings_cache_timestamp(&self, app_user_id: &str) -> Result<()> {
        self.offerings.clear_cache_timestamp();
        self.lock()
            .remove(&keys::offerings_last_updated(app_user_id))
            .map_err(Error::adapter)
    }

    pub fn set_offerings_cache_timestamp_to_now(&self, app_user_id: &str) -> Result<()> {
        let now = self.date_provider.now();
        let key = keys::offerings_last_updated(app_user_id);
        let value = to_value(&key, &now)?;
        self.lock().write(&key, value).map_err(Error::adapter)?;
        self.offerings.update_cache_timestamp(now);
        Ok(())
    }

    // ---- subscriber attributes

    pub fn store_subscriber_attribute(
        &self,
        attribute: SubscriberAttribute,
        app_user_id: &str,
    ) -> Result<()> {
        let attributes = SubscriberAttributes::from([(attribute.key.clone(), attribute)]);
        self.store_subscriber_attributes(attributes, app_user_id)
    }

    /// Adds or replaces attributes of `app_user_id`, leaving the others alone.
    pub fn store_subscriber_attributes(
        &self,
        attributes: SubscriberAttributes,
        app_user_id: &str,
    ) -> Result<()> {
        if attributes.is_empty() {
            return Ok(());
        }
        self.modify_attributes(|all| {
            all.entry(app_user_id.to_owned())
                .or_default()
                .extend(attributes);
        })
    }

    pub fn subscriber_attribute(
        &self,
        key: &str,
        app_user_id: &str,
    ) -> Result<Option<SubscriberAttribute>> {
        let mut all = read_attributes(&*self.lock(), &self.logger)?;
        Ok(all
            .get_mut(app_user_id)
            .and_then(|attributes| attributes.remove(key)))
    }

    pub fn unsynced_attributes_by_key(&self, app_user_id: &str) -> Result<SubscriberAttributes> {
        let all = read_attributes(&*self.lock(), &self.logger)?;
        Ok(all
            .get(app_user_id)
            .map(|attributes| unsynced(attributes))
            .unwrap_or_default())
    }

    pub fn number_of_unsynced_attributes(&self, app_user_id: &str) -> Result<usize> {
        Ok(self.unsynced_attributes_by_key(app_user_id)?.len())
    }

    /// Users without unsynced attributes are left out.
    pub fn unsynced_attributes_for_all_users(&self) -> Result<AttributesByUser> {
        let all = read_attributes(&*self.lock(), &self.logger)?;
        Ok(all
            .iter()
            .map(|(app_user_id, attributes)| (app_user_id.clone(), unsynced(attributes)))
            .filter(|(_, attributes)| !attributes.is_empty())
            .collect())
    }

    /// Flags `posted` as synced for `app_user_id`, except attributes that
    /// were set again after being posted.
    pub fn mark_attributes_synced(
        &self,
        posted: &SubscriberAttributes,
        app_user_id: &str,
    ) -> Result<()> {
        self.modify_attributes(|all| {
            let Some(attributes) = all.get_mut(app_user_id) else {
                return;
            };
            for (key, sent) in posted {
                if let Some(stored) = attributes.get_mut(key) {
                    if stored.set_time == sent.set_time && stored.value == sent.value {
                        stored.is_synced = true;
                    }
                }
            }
        })
    }

    /// Drops the attributes of `app_user_id` that reached the backend.
    pub fn delete_attributes_if_synced(&self, app_user_id: &str) -> Result<()> {
        self.modify_attributes(|all| retain_unsynced(all, app_user_id))
    }

    /// Moves the unsynced attributes of `old_app_user_id` to
    /// `new_app_user_id`. Attributes the new user set more recently win.
    pub fn copy_subscriber_attributes(
        &self,
        old_app_user_id: &str,
        new_app_user_id: &str,
    ) -> Result<()> {
        self.modify_attributes(|all| {
            let Some(old) = all.remove(old_app_user_id) else {
                return;
            };
            let new = all.entry(new_app_user_id.to_owned()).or_default();
            for (key, attribute) in unsynced(&old) {
                let newer_exists = new
                    .get(&key)
                    .is_some_and(|existing| existing.set_time > attribute.set_time);
                if !newer_exists {
                    new.insert(key, attribute);
                }
            }
            if new.is_empty() {
                all.remove(new_app_user_id);
            }
        })
    }

    /// Drops synced attributes of every user but the current one.
    pub fn cleanup_subscriber_attributes(&self) -> Result<()> {
        let mut store = self.lock();
        let current: Option<String> = read_value(&*store, &keys::app_user_id())?;
        let mut all = read_attributes(&*store, &self.logger)?;
        let others: Vec<String> = all
            .keys()
            .filter(|app_user_id| Some(app_user_id.as_str()) != current.as_deref())
            .cloned()
            .collect();
        for app_user_id in others {
            retain_unsynced(&mut all, &app_user_id);
        }
        write_attributes(&mut *store, &all)
    }

    fn modify_attributes(&self, change: impl FnOnce(&mut AttributesByUser)) -> Result<()> {
        let mut store = self.lock();
        let mut all = read_attributes(&*store, &self.logger)?;
        change(&mut all);
        write_attributes(&mut *store, &all)
    }

    /// An unreadable timestamp counts as missing, which makes the entry stale.
    fn timestamp(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        match read_value(&*self.lock(), key) {
            Ok(timestamp) => Ok(timestamp),
            Err(Error::SerializationError { .. }) => {
                self.logger
                    .warn(format!("Ignoring unreadable cache timestamp {key}"));
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

fn serialization_error(key: &str, err: serde_json::Error) -> Error {
    Error::SerializationError {
        key: key.to_owned(),
        source_error_message: err.to_string(),
    }
}

fn to_value<T: Serialize + ?Sized>(key: &str, value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|err| serialization_error(key, err))
}

fn read_value<S: CacheStore, T: DeserializeOwned>(store: &S, key: &str) -> Result<Option<T>> {
    match store.read(key).map_err(Error::adapter)? {
        None => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|err| serialization_error(key, err)),
    }
}

/// An unreadable attributes entry is dropped, so it can't block user switches.
fn read_attributes<S: CacheStore>(store: &S, logger: &Logger) -> Result<AttributesByUser> {
    match read_value(store, &keys::subscriber_attributes()) {
        Ok(attributes) => Ok(attributes.unwrap_or_default()),
        Err(Error::SerializationError {
            source_error_message,
            ..
        }) => {
            logger.warn(format!(
                "Discarding unreadable subscriber attributes: {source_error_message}"
            ));
            Ok(AttributesByUser::new())
        }
        Err(err) => Err(err),
    }
}

fn write_attributes<S: CacheStore>(store: &mut S, attributes: &AttributesByUser) -> Result<()> {
    let key = keys::subscriber_attributes();
    let value = to_value(&key, attributes)?;
    store.write(&key, value).map_err(Error::adapter)
}

fn unsynced(attributes: &SubscriberAttributes) -> SubscriberAttributes {
    attributes
        .iter()
        .filter(|(_, attribute)| !attribute.is_synced)
        .map(|(key, attribute)| (key.clone(), attribute.clone()))
        .collect()
}

fn retain_unsynced(all: &mut AttributesByUser, app_user_id: &str) {
    if let Some(attributes) = all.get_mut(app_user_id) {
        attributes.retain(|_, attribute| !attribute.is_synced);
        if attributes.is_empty() {
            all.remove(app_user_id);
        }
    }
}
