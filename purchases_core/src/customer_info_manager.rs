// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Customer info reconciliation
//!
//! [`CustomerInfoManager`] decides, per [`CacheFetchPolicy`], whether the
//! customer info in the [`DeviceCache`] is good enough or a fresh copy has to
//! come from the [`Backend`]. Every value it caches is compared with the last
//! one reported, and observers hear about each distinct change exactly once.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, Weak},
};

use tokio::sync::watch;

use crate::{
    caching::{CacheStore, DeviceCache},
    config::AppStatus,
    logger::Logger,
    models::CustomerInfo,
    networking::{Backend, BackendError, PostReceiptData},
    Result,
};

/// How a customer info request may use the cache.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum CacheFetchPolicy {
    /// Only the cache, failing with [`BackendError::MissingCachedCustomerInfo`]
    /// when it is empty.
    CacheOnly,
    /// The cached value when there is one, refreshing it in the background
    /// when stale.
    #[default]
    CachedOrFetched,
    /// The cached value while fresh, otherwise a fetch. A failed fetch falls
    /// back to the stale cached value.
    FetchCurrent,
    /// Always fetch. Errors reach the caller.
    FetchCurrentAndForce,
}

type Observer = Arc<dyn Fn(&CustomerInfo) + Send + Sync>;

struct ManagerState {
    app_status: AppStatus,
    last_sent_customer_info: Option<CustomerInfo>,
    observers: BTreeMap<u64, Observer>,
    next_observer_id: u64,
}

/// Unregisters its observer when dropped or removed.
#[must_use = "the observer is removed as soon as the handle is dropped"]
pub struct ObserverHandle {
    id: u64,
    state: Weak<Mutex<ManagerState>>,
}

impl ObserverHandle {
    pub fn remove(self) {}
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            state.lock().unwrap().observers.remove(&self.id);
        }
    }
}

pub struct CustomerInfoManager<S> {
    backend: Arc<Backend>,
    device_cache: Arc<DeviceCache<S>>,
    state: Arc<Mutex<ManagerState>>,
    updates: Arc<watch::Sender<Option<CustomerInfo>>>,
    logger: Logger,
}

impl<S> Clone for CustomerInfoManager<S> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            device_cache: self.device_cache.clone(),
            state: self.state.clone(),
            updates: self.updates.clone(),
            logger: self.logger.clone(),
        }
    }
}

impl<S: CacheStore + 'static> CustomerInfoManager<S> {
    pub fn new(backend: Arc<Backend>, device_cache: Arc<DeviceCache<S>>, logger: Logger) -> Self {
        let (updates, _) = watch::channel(None);
        Self {
            backend,
            device_cache,
            state: Arc::new(Mutex::new(ManagerState {
                app_status: AppStatus::Foreground,
                last_sent_customer_info: None,
                observers: BTreeMap::new(),
                next_observer_id: 0,
            })),
            updates: Arc::new(updates),
            logger,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap()
    }

    pub fn set_app_status(&self, app_status: AppStatus) {
        self.lock().app_status = app_status;
    }

    pub fn app_status(&self) -> AppStatus {
        self.lock().app_status
    }

    /// Customer info of `app_user_id` according to `fetch_policy`.
    pub async fn customer_info(
        &self,
        app_user_id: &str,
        fetch_policy: CacheFetchPolicy,
    ) -> Result<CustomerInfo> {
        match fetch_policy {
            CacheFetchPolicy::CacheOnly => self
                .cached_customer_info(app_user_id)?
                .ok_or_else(|| BackendError::MissingCachedCustomerInfo.into()),
            CacheFetchPolicy::CachedOrFetched => match self.cached_customer_info(app_user_id)? {
                Some(cached) => {
                    if self.is_stale(app_user_id)? {
                        self.refresh_in_background(app_user_id)?;
                    }
                    self.send_update_if_changed(&cached);
                    Ok(cached)
                }
                None => self.fetch_and_cache_customer_info(app_user_id).await,
            },
            CacheFetchPolicy::FetchCurrent => {
                let cached = self.cached_customer_info(app_user_id)?;
                if let Some(cached) = &cached {
                    if !self.is_stale(app_user_id)? {
                        return Ok(cached.clone());
                    }
                }
                match self.fetch_and_cache_customer_info(app_user_id).await {
                    Ok(customer_info) => Ok(customer_info),
                    Err(err) => match cached {
                        Some(cached) => {
                            self.logger.warn(format!(
                                "Fetch failed, using stale customer info of {app_user_id}: {err}"
                            ));
                            Ok(cached)
                        }
                        None => Err(err),
                    },
                }
            }
            CacheFetchPolicy::FetchCurrentAndForce => {
                self.fetch_and_cache_customer_info(app_user_id).await
            }
        }
    }

    /// Fetches customer info and caches it.
    ///
    /// On failure the cache timestamp is cleared so the next read treats the
    /// cached value as stale.
    pub async fn fetch_and_cache_customer_info(&self, app_user_id: &str) -> Result<CustomerInfo> {
        let with_random_delay = self.app_status() == AppStatus::Background;
        match self
            .backend
            .get_customer_info(app_user_id, with_random_delay)
            .await
        {
            Ok(customer_info) => {
                self.cache_customer_info(&customer_info, app_user_id)?;
                Ok(customer_info)
            }
            Err(err) => {
                self.logger.error(format!(
                    "Failed to fetch customer info of {app_user_id}: {err}"
                ));
                self.device_cache
                    .clear_customer_info_cache_timestamp(app_user_id)?;
                Err(err.into())
            }
        }
    }

    /// Fetches only when the cache is stale or empty.
    pub async fn fetch_and_cache_customer_info_if_stale(
        &self,
        app_user_id: &str,
    ) -> Result<CustomerInfo> {
        if !self.is_stale(app_user_id)? {
            if let Some(cached) = self.cached_customer_info(app_user_id)? {
                return Ok(cached);
            }
        }
        self.fetch_and_cache_customer_info(app_user_id).await
    }

    /// Posts a receipt and caches the customer info the backend answers with.
    ///
    /// The unsynced subscriber attributes of the user travel with the receipt
    /// and are marked synced once the backend has taken them, or has
    /// rejected them for good.
    pub async fn post_receipt_data(
        &self,
        mut post_data: PostReceiptData,
    ) -> Result<CustomerInfo> {
        let app_user_id = post_data.app_user_id.clone();
        let attributes = self.device_cache.unsynced_attributes_by_key(&app_user_id)?;
        post_data.subscriber_attributes.extend(attributes.clone());

        match self.backend.post_receipt_data(post_data).await {
            Ok(customer_info) => {
                self.device_cache
                    .mark_attributes_synced(&attributes, &app_user_id)?;
                self.cache_customer_info(&customer_info, &app_user_id)?;
                Ok(customer_info)
            }
            Err(err) => {
                if !err.is_transient() {
                    self.device_cache
                        .mark_attributes_synced(&attributes, &app_user_id)?;
                }
                Err(err.into())
            }
        }
    }

    /// The cached customer info, ignoring values that can't be read or were
    /// written with another schema.
    pub fn cached_customer_info(&self, app_user_id: &str) -> Result<Option<CustomerInfo>> {
        let Some(data) = self.device_cache.cached_customer_info_data(app_user_id)? else {
            return Ok(None);
        };
        match CustomerInfo::from_cached_json(data) {
            Ok(Some(customer_info)) => Ok(Some(customer_info)),
            Ok(None) => {
                self.logger.debug(format!(
                    "Ignoring cached customer info of {app_user_id} with an old schema"
                ));
                Ok(None)
            }
            Err(err) => {
                self.logger.warn(format!(
                    "Ignoring unreadable cached customer info of {app_user_id}: {err}"
                ));
                Ok(None)
            }
        }
    }

    pub fn cache_customer_info(
        &self,
        customer_info: &CustomerInfo,
        app_user_id: &str,
    ) -> Result<()> {
        self.device_cache
            .cache_customer_info(app_user_id, customer_info)?;
        self.send_update_if_changed(customer_info);
        Ok(())
    }

    pub fn send_cached_customer_info_if_available(&self, app_user_id: &str) -> Result<()> {
        if let Some(cached) = self.cached_customer_info(app_user_id)? {
            self.send_update_if_changed(&cached);
        }
        Ok(())
    }

    pub fn clear_customer_info_cache(&self, app_user_id: &str) -> Result<()> {
        self.device_cache.clear_customer_info_cache(app_user_id)?;
        self.lock().last_sent_customer_info = None;
        Ok(())
    }

    pub fn last_sent_customer_info(&self) -> Option<CustomerInfo> {
        self.lock().last_sent_customer_info.clone()
    }

    /// Calls `observer` with every distinct customer info from now on.
    pub fn monitor_changes(
        &self,
        observer: impl Fn(&CustomerInfo) + Send + Sync + 'static,
    ) -> ObserverHandle {
        let mut state = self.lock();
        let id = state.next_observer_id;
        state.next_observer_id += 1;
        state.observers.insert(id, Arc::new(observer));
        ObserverHandle {
            id,
            state: Arc::downgrade(&self.state),
        }
    }

    /// Receiver holding the newest customer info reported.
    pub fn subscribe(&self) -> watch::Receiver<Option<CustomerInfo>> {
        self.updates.subscribe()
    }

    fn is_stale(&self, app_user_id: &str) -> Result<bool> {
        self.device_cache
            .is_customer_info_cache_stale(app_user_id, self.app_status())
    }

    fn refresh_in_background(&self, app_user_id: &str) -> Result<()> {
        self.device_cache
            .set_cache_timestamp_to_now_to_prevent_concurrent_customer_info_updates(app_user_id)?;
        self.logger
            .debug(format!("Refreshing stale customer info of {app_user_id}"));
        let manager = self.clone();
        let app_user_id = app_user_id.to_owned();
        tokio::spawn(async move {
            // failures are logged and clear the timestamp
            let _ = manager.fetch_and_cache_customer_info(&app_user_id).await;
        });
        Ok(())
    }

    fn send_update_if_changed(&self, customer_info: &CustomerInfo) {
        let observers: Vec<Observer> = {
            let mut state = self.lock();
            if state.last_sent_customer_info.as_ref() == Some(customer_info) {
                return;
            }
            state.last_sent_customer_info = Some(customer_info.clone());
            self.updates.send_replace(Some(customer_info.clone()));
            state.observers.values().cloned().collect()
        };
        self.logger.debug(format!(
            "Customer info of {} changed",
            customer_info.original_app_user_id()
        ));
        for observer in observers {
            observer(customer_info);
        }
    }
}

#[cfg(all(test, feature = "in_memory"))]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use chrono::{TimeZone, Utc};
    use rstest::*;
    use serde_json::{json, Value};

    use super::*;
    use crate::{
        caching::{keys, memory::InMemoryCacheStore},
        config::PurchasesConfig,
        date_provider::{DateProvider, MockDateProvider},
        models::SubscriberAttribute,
        networking::{memory::InMemoryHttpClient, HttpMethod, HttpResponse, NetworkError},
        Error,
    };

    const PATH: &str = "/subscribers/user";

    fn body(request_date: &str, entitlement: Option<&str>) -> Value {
        let entitlements = match entitlement {
            Some(name) => json!({ name: {
                "product_identifier": "monthly",
                "purchase_date": "2024-01-01T00:00:00Z",
            }}),
            None => json!({}),
        };
        json!({
            "request_date": request_date,
            "subscriber": {
                "original_app_user_id": "user",
                "first_seen": "2024-01-01T00:00:00Z",
                "entitlements": entitlements,
            }
        })
    }

    struct Fixture {
        http_client: InMemoryHttpClient,
        clock: Arc<MockDateProvider>,
        device_cache: Arc<DeviceCache<InMemoryCacheStore>>,
        manager: CustomerInfoManager<InMemoryCacheStore>,
    }

    #[fixture]
    fn fixture() -> Fixture {
        build(InMemoryCacheStore::new())
    }

    fn build(store: InMemoryCacheStore) -> Fixture {
        let http_client = InMemoryHttpClient::new();
        http_client.respond(
            HttpMethod::Get,
            PATH,
            HttpResponse::new(200, body("2024-01-01T00:00:00Z", None)),
        );
        let clock = Arc::new(MockDateProvider::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let config = PurchasesConfig {
            max_random_delay: Duration::ZERO,
            ..Default::default()
        };
        let device_cache = Arc::new(DeviceCache::new(
            store,
            config.clone(),
            clock.clone(),
            Logger::default(),
        ));
        let backend = Arc::new(Backend::new(
            Arc::new(http_client.clone()),
            &config,
            Logger::default(),
        ));
        let manager = CustomerInfoManager::new(backend, device_cache.clone(), Logger::default());
        Fixture {
            http_client,
            clock,
            device_cache,
            manager,
        }
    }

    fn customer_info(value: Value) -> CustomerInfo {
        serde_json::from_value(value).unwrap()
    }

    #[rstest]
    #[tokio::test]
    async fn cache_only_without_cache_fails(fixture: Fixture) {
        let result = fixture
            .manager
            .customer_info("user", CacheFetchPolicy::CacheOnly)
            .await;
        assert!(matches!(
            result,
            Err(Error::Backend(BackendError::MissingCachedCustomerInfo))
        ));
        assert!(fixture.http_client.requests().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn fetch_current_uses_fresh_cache(fixture: Fixture) {
        let first = fixture
            .manager
            .customer_info("user", CacheFetchPolicy::FetchCurrent)
            .await
            .unwrap();
        let second = fixture
            .manager
            .customer_info("user", CacheFetchPolicy::FetchCurrent)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(fixture.http_client.request_count(HttpMethod::Get, PATH), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn fetch_current_falls_back_to_stale_cache(fixture: Fixture) {
        let cached = customer_info(body("2024-01-01T00:00:00Z", Some("pro")));
        fixture.manager.cache_customer_info(&cached, "user").unwrap();
        fixture.clock.advance(chrono::Duration::minutes(10));
        fixture
            .http_client
            .fail(HttpMethod::Get, PATH, NetworkError::Offline);

        let result = fixture
            .manager
            .customer_info("user", CacheFetchPolicy::FetchCurrent)
            .await
            .unwrap();

        assert_eq!(result, cached);
        assert!(fixture
            .device_cache
            .customer_info_last_updated("user")
            .unwrap()
            .is_none());
    }

    #[rstest]
    #[tokio::test]
    async fn forced_fetch_propagates_errors(fixture: Fixture) {
        let cached = customer_info(body("2024-01-01T00:00:00Z", None));
        fixture.manager.cache_customer_info(&cached, "user").unwrap();
        fixture
            .http_client
            .fail(HttpMethod::Get, PATH, NetworkError::Offline);

        let result = fixture
            .manager
            .customer_info("user", CacheFetchPolicy::FetchCurrentAndForce)
            .await;

        assert!(matches!(
            result,
            Err(Error::Backend(BackendError::NetworkError(NetworkError::Offline)))
        ));
    }

    #[rstest]
    #[tokio::test]
    async fn cached_or_fetched_refreshes_stale_cache_in_background(fixture: Fixture) {
        let cached = customer_info(body("2024-01-01T00:00:00Z", None));
        fixture.manager.cache_customer_info(&cached, "user").unwrap();
        fixture.clock.advance(chrono::Duration::minutes(10));
        fixture.http_client.respond(
            HttpMethod::Get,
            PATH,
            HttpResponse::new(200, body("2024-01-01T00:10:00Z", Some("pro"))),
        );
        let mut updates = fixture.manager.subscribe();

        let result = fixture
            .manager
            .customer_info("user", CacheFetchPolicy::CachedOrFetched)
            .await
            .unwrap();
        assert_eq!(result, cached);

        tokio::time::timeout(Duration::from_secs(5), updates.changed())
            .await
            .unwrap()
            .unwrap();
        let refreshed = updates.borrow().clone().unwrap();
        assert!(refreshed.is_entitlement_active("pro", fixture.clock.now()));
        assert_eq!(fixture.http_client.request_count(HttpMethod::Get, PATH), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn observers_hear_each_change_once(fixture: Fixture) {
        let notified = Arc::new(AtomicUsize::new(0));
        let counter = notified.clone();
        let handle = fixture.manager.monitor_changes(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let first = customer_info(body("2024-01-01T00:00:00Z", None));
        // same subscriber, newer request date
        let same = customer_info(body("2024-01-01T00:01:00Z", None));
        let changed = customer_info(body("2024-01-01T00:02:00Z", Some("pro")));
        for value in [&first, &same, &changed] {
            fixture.manager.cache_customer_info(value, "user").unwrap();
        }
        assert_eq!(notified.load(Ordering::SeqCst), 2);
        assert_eq!(fixture.manager.last_sent_customer_info(), Some(changed));

        handle.remove();
        fixture.manager.clear_customer_info_cache("user").unwrap();
        fixture.manager.cache_customer_info(&first, "user").unwrap();
        assert_eq!(notified.load(Ordering::SeqCst), 2);
    }

    #[rstest]
    #[case::old_schema(json!("2"))]
    #[case::no_schema(Value::Null)]
    #[tokio::test]
    async fn incompatible_cached_schema_is_refetched(#[case] schema_version: Value) {
        let mut data = customer_info(body("2023-12-01T00:00:00Z", Some("pro")))
            .to_cached_json()
            .unwrap();
        data["schema_version"] = schema_version;
        let mut store = InMemoryCacheStore::new();
        store.write(&keys::customer_info("user"), data).unwrap();
        let fixture = build(store);

        assert_eq!(fixture.manager.cached_customer_info("user").unwrap(), None);
        let fetched = fixture
            .manager
            .customer_info("user", CacheFetchPolicy::CachedOrFetched)
            .await
            .unwrap();
        assert!(fetched.active_entitlements(fixture.clock.now()).is_empty());
        assert_eq!(fixture.http_client.request_count(HttpMethod::Get, PATH), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn posting_a_receipt_caches_the_result(fixture: Fixture) {
        fixture.http_client.respond(
            HttpMethod::Post,
            "/receipts",
            HttpResponse::new(200, body("2024-01-01T00:00:00Z", Some("pro"))),
        );

        let posted = fixture
            .manager
            .post_receipt_data(PostReceiptData::new("user", vec![1, 2, 3]))
            .await
            .unwrap();

        let cached = fixture
            .manager
            .customer_info("user", CacheFetchPolicy::CacheOnly)
            .await
            .unwrap();
        assert_eq!(posted, cached);
        assert_eq!(fixture.manager.last_sent_customer_info(), Some(cached));
    }

    #[rstest]
    #[tokio::test]
    async fn unsynced_attributes_travel_with_the_receipt(fixture: Fixture) {
        fixture.http_client.respond(
            HttpMethod::Post,
            "/receipts",
            HttpResponse::new(200, body("2024-01-01T00:00:00Z", Some("pro"))),
        );
        let email = SubscriberAttribute::new(
            "$email",
            Some("user@example.com".to_owned()),
            fixture.clock.now(),
        );
        fixture
            .device_cache
            .store_subscriber_attribute(email, "user")
            .unwrap();

        fixture
            .manager
            .post_receipt_data(PostReceiptData::new("user", vec![1, 2, 3]))
            .await
            .unwrap();

        let request = fixture
            .http_client
            .requests()
            .into_iter()
            .find(|request| request.path == "/receipts")
            .unwrap();
        assert_eq!(
            request.body.unwrap()["attributes"]["$email"]["value"],
            json!("user@example.com")
        );
        assert_eq!(
            fixture
                .device_cache
                .number_of_unsynced_attributes("user")
                .unwrap(),
            0
        );
    }

    #[rstest]
    #[case::offline(None, 1)]
    #[case::rejected(Some(400), 0)]
    #[case::server_error(Some(500), 1)]
    #[tokio::test]
    async fn failed_receipt_post_keeps_attributes_unless_rejected(
        fixture: Fixture,
        #[case] status: Option<u16>,
        #[case] unsynced_after: usize,
    ) {
        match status {
            Some(status) => fixture.http_client.respond(
                HttpMethod::Post,
                "/receipts",
                HttpResponse::new(status, json!({ "code": 7263, "message": "nope" })),
            ),
            None => fixture
                .http_client
                .fail(HttpMethod::Post, "/receipts", NetworkError::Offline),
        }
        let name = SubscriberAttribute::new(
            "$displayName",
            Some("Ada".to_owned()),
            fixture.clock.now(),
        );
        fixture
            .device_cache
            .store_subscriber_attribute(name, "user")
            .unwrap();

        let result = fixture
            .manager
            .post_receipt_data(PostReceiptData::new("user", vec![1, 2, 3]))
            .await;

        assert!(result.is_err());
        assert_eq!(
            fixture
                .device_cache
                .number_of_unsynced_attributes("user")
                .unwrap(),
            unsynced_after
        );
    }
}
