// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Callback deduplication
//!
//! [`CallbackCache`] collapses concurrent requests for the same backend fact
//! into a single in-flight operation. Every waiter registers a callback under
//! the operation's cache key; only the caller that registered the first
//! callback for a key performs the request, and the result is replayed to all
//! waiters when it completes.
//!
//! ```rust
//! use purchases_core::{
//!     callback_cache::{Callback, CallbackCache, CallbackCacheStatus},
//!     networking::OperationKind,
//! };
//!
//! let cache = CallbackCache::<Callback<u32>>::new();
//! let first = Callback::new("key", OperationKind::GetCustomerInfo, "user", |_| {});
//! let second = Callback::new("key", OperationKind::GetCustomerInfo, "user", |_| {});
//!
//! assert_eq!(cache.add(first), CallbackCacheStatus::FirstCallbackAddedToList);
//! assert_eq!(cache.add(second), CallbackCacheStatus::AddedToExistingInFlightList);
//!
//! let mut invoked = 0;
//! cache.perform_on_all_items_and_remove_from_cache(&"key", |callback| {
//!     invoked += 1;
//!     callback.complete(Ok(42));
//! });
//! assert_eq!(invoked, 2);
//! ```

use std::{collections::HashMap, fmt, sync::Mutex};

use tokio::sync::oneshot;

use crate::{
    models::{CustomerInfo, LogInResponse, Offerings},
    networking::{BackendError, OperationKind},
};

/// Anything that can be grouped under a cache key.
pub trait CacheKeyProviding {
    fn cache_key(&self) -> String;
}

impl CacheKeyProviding for str {
    fn cache_key(&self) -> String {
        self.to_owned()
    }
}

impl CacheKeyProviding for String {
    fn cache_key(&self) -> String {
        self.clone()
    }
}

impl<T: CacheKeyProviding + ?Sized> CacheKeyProviding for &T {
    fn cache_key(&self) -> String {
        (**self).cache_key()
    }
}

/// Outcome of [`CallbackCache::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackCacheStatus {
    /// The key had no pending callbacks: the caller must perform the request.
    FirstCallbackAddedToList,
    /// A request for the key is already in flight and will notify this
    /// callback too.
    AddedToExistingInFlightList,
}

type Completion<T> = Box<dyn FnOnce(Result<T, BackendError>) + Send>;

/// A pending completion handler waiting for the result of an operation.
pub struct Callback<T> {
    cache_key: String,
    source: OperationKind,
    app_user_id: String,
    completion: Completion<T>,
}

pub type CustomerInfoCallback = Callback<CustomerInfo>;
pub type LogInCallback = Callback<LogInResponse>;
pub type OfferingsCallback = Callback<Offerings>;
pub type SubscriberAttributesCallback = Callback<()>;

impl<T> Callback<T> {
    pub fn new(
        cache_key: impl Into<String>,
        source: OperationKind,
        app_user_id: impl Into<String>,
        completion: impl FnOnce(Result<T, BackendError>) + Send + 'static,
    ) -> Self {
        Self {
            cache_key: cache_key.into(),
            source,
            app_user_id: app_user_id.into(),
            completion: Box::new(completion),
        }
    }

    /// A callback that forwards the result to the returned receiver.
    pub fn channel(
        cache_key: impl Into<String>,
        source: OperationKind,
        app_user_id: impl Into<String>,
    ) -> (Self, oneshot::Receiver<Result<T, BackendError>>)
    where
        T: Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let callback = Self::new(cache_key, source, app_user_id, move |result| {
            // the waiter may have given up, nothing to deliver then
            let _ = sender.send(result);
        });
        (callback, receiver)
    }

    /// Operation that registered this callback.
    pub fn source(&self) -> OperationKind {
        self.source
    }

    pub fn app_user_id(&self) -> &str {
        &self.app_user_id
    }

    pub fn complete(self, result: Result<T, BackendError>) {
        (self.completion)(result)
    }
}

impl<T> CacheKeyProviding for Callback<T> {
    fn cache_key(&self) -> String {
        self.cache_key.clone()
    }
}

impl<T> fmt::Debug for Callback<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("cache_key", &self.cache_key)
            .field("source", &self.source)
            .field("app_user_id", &self.app_user_id)
            .finish_non_exhaustive()
    }
}

/// Pending callbacks by cache key, behind a single lock.
pub struct CallbackCache<T: CacheKeyProviding> {
    cached_callbacks_by_key: Mutex<HashMap<String, Vec<T>>>,
}

impl<T: CacheKeyProviding> Default for CallbackCache<T> {
    fn default() -> Self {
        Self {
            cached_callbacks_by_key: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: CacheKeyProviding> CallbackCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` under its cache key.
    ///
    /// Checking for an in-flight list and inserting happen under one lock
    /// acquisition, so exactly one of any number of concurrent callers for
    /// the same key observes [`CallbackCacheStatus::FirstCallbackAddedToList`].
    pub fn add(&self, callback: T) -> CallbackCacheStatus {
        let mut callbacks_by_key = self.cached_callbacks_by_key.lock().unwrap();
        Self::add_locked(&mut callbacks_by_key, callback.cache_key(), callback)
    }

    fn add_locked(
        callbacks_by_key: &mut HashMap<String, Vec<T>>,
        cache_key: String,
        callback: T,
    ) -> CallbackCacheStatus {
        let callbacks = callbacks_by_key.entry(cache_key).or_default();
        let status = if callbacks.is_empty() {
            CallbackCacheStatus::FirstCallbackAddedToList
        } else {
            CallbackCacheStatus::AddedToExistingInFlightList
        };
        callbacks.push(callback);
        status
    }

    /// Removes every callback registered under the key of `cacheable` and
    /// hands each one to `block`, in registration order.
    ///
    /// The callbacks are taken out under the lock but invoked after releasing
    /// it, so `block` may register new callbacks. Does nothing when no
    /// callback is registered for the key.
    pub fn perform_on_all_items_and_remove_from_cache<K>(&self, cacheable: &K, block: impl FnMut(T))
    where
        K: CacheKeyProviding + ?Sized,
    {
        let removed = self
            .cached_callbacks_by_key
            .lock()
            .unwrap()
            .remove(&cacheable.cache_key())
            .unwrap_or_default();
        removed.into_iter().for_each(block);
    }

    /// Number of callbacks waiting under `cache_key`.
    pub fn pending(&self, cache_key: &str) -> usize {
        self.cached_callbacks_by_key
            .lock()
            .unwrap()
            .get(cache_key)
            .map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.cached_callbacks_by_key.lock().unwrap().is_empty()
    }
}

impl CallbackCache<CustomerInfoCallback> {
    /// Adds a customer info callback, joining an in-flight receipt post for
    /// the same app user when there is one.
    ///
    /// Posting a receipt returns the same customer info a fetch would, so
    /// waiting for the post saves a request. The new callback is re-keyed to
    /// the post's cache key and the returned status is then always
    /// [`CallbackCacheStatus::AddedToExistingInFlightList`]. Without such a
    /// post, this behaves like [`CallbackCache::add`].
    pub fn add_or_append_to_post_receipt_data_operation(
        &self,
        callback: CustomerInfoCallback,
    ) -> CallbackCacheStatus {
        let mut callbacks_by_key = self.cached_callbacks_by_key.lock().unwrap();
        let in_flight_post_key = callbacks_by_key
            .iter()
            .find(|(_, callbacks)| {
                callbacks.iter().any(|existing| {
                    existing.source == OperationKind::PostReceiptData
                        && existing.app_user_id == callback.app_user_id
                })
            })
            .map(|(key, _)| key.clone());

        match in_flight_post_key {
            Some(post_key) => {
                let callback = Callback {
                    cache_key: post_key.clone(),
                    ..callback
                };
                Self::add_locked(&mut callbacks_by_key, post_key, callback)
            }
            None => {
                let cache_key = callback.cache_key();
                Self::add_locked(&mut callbacks_by_key, cache_key, callback)
            }
        }
    }
}

impl<T: CacheKeyProviding> Drop for CallbackCache<T> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        if let Ok(callbacks_by_key) = self.cached_callbacks_by_key.get_mut() {
            debug_assert!(
                callbacks_by_key.is_empty(),
                "callback cache dropped with pending callbacks for keys {:?}",
                callbacks_by_key.keys().collect::<Vec<_>>()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use chrono::Utc;
    use rstest::*;

    use super::*;
    use crate::models::Subscriber;

    fn customer_info(app_user_id: &str) -> CustomerInfo {
        CustomerInfo {
            request_date: Utc::now(),
            subscriber: Subscriber {
                original_app_user_id: app_user_id.to_owned(),
                first_seen: Utc::now(),
                original_application_version: None,
                management_url: None,
                subscriptions: Default::default(),
                entitlements: Default::default(),
                non_subscriptions: Default::default(),
            },
        }
    }

    fn counting_callback(
        key: &str,
        source: OperationKind,
        counter: &Arc<AtomicUsize>,
    ) -> CustomerInfoCallback {
        let counter = counter.clone();
        Callback::new(key, source, "user", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[fixture]
    fn cache() -> CallbackCache<CustomerInfoCallback> {
        CallbackCache::new()
    }

    #[fixture]
    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    fn drain(cache: &CallbackCache<CustomerInfoCallback>, key: &str) {
        cache.perform_on_all_items_and_remove_from_cache(key, |callback| {
            callback.complete(Err(BackendError::MissingAppUserId))
        });
    }

    #[rstest]
    fn first_add_triggers_request(
        cache: CallbackCache<CustomerInfoCallback>,
        counter: Arc<AtomicUsize>,
    ) {
        let source = OperationKind::GetCustomerInfo;
        assert_eq!(
            cache.add(counting_callback("a", source, &counter)),
            CallbackCacheStatus::FirstCallbackAddedToList
        );
        assert_eq!(
            cache.add(counting_callback("a", source, &counter)),
            CallbackCacheStatus::AddedToExistingInFlightList
        );
        assert_eq!(
            cache.add(counting_callback("b", source, &counter)),
            CallbackCacheStatus::FirstCallbackAddedToList
        );
        assert_eq!(cache.pending("a"), 2);

        drain(&cache, "a");
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(cache.pending("a"), 0);

        // the key starts over once drained
        assert_eq!(
            cache.add(counting_callback("a", source, &counter)),
            CallbackCacheStatus::FirstCallbackAddedToList
        );
        drain(&cache, "a");
        drain(&cache, "b");
        assert!(cache.is_empty());
    }

    #[rstest]
    fn perform_on_missing_key_is_noop(cache: CallbackCache<CustomerInfoCallback>) {
        let mut invoked = false;
        cache.perform_on_all_items_and_remove_from_cache("missing", |_| invoked = true);
        assert!(!invoked);
    }

    #[rstest]
    fn fan_out_replays_the_same_result(cache: CallbackCache<CustomerInfoCallback>) {
        let results = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..3 {
            let results = results.clone();
            cache.add(Callback::new(
                "key",
                OperationKind::GetCustomerInfo,
                "user",
                move |result| results.lock().unwrap().push(result),
            ));
        }

        let expected = customer_info("user");
        cache.perform_on_all_items_and_remove_from_cache("key", |callback| {
            callback.complete(Ok(expected.clone()))
        });

        let results = results.lock().unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|result| result.as_ref() == Ok(&expected)));
    }

    #[rstest]
    fn callbacks_may_reenter_the_cache(counter: Arc<AtomicUsize>) {
        let cache = Arc::new(CallbackCache::<CustomerInfoCallback>::new());
        let reentrant = {
            let cache = cache.clone();
            let counter = counter.clone();
            Callback::new("key", OperationKind::GetCustomerInfo, "user", move |_| {
                let status = cache.add(counting_callback(
                    "key",
                    OperationKind::GetCustomerInfo,
                    &counter,
                ));
                assert_eq!(status, CallbackCacheStatus::FirstCallbackAddedToList);
            })
        };
        cache.add(reentrant);

        drain(&cache, "key");
        assert_eq!(cache.pending("key"), 1);
        drain(&cache, "key");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[rstest]
    fn customer_info_request_joins_in_flight_receipt_post(
        cache: CallbackCache<CustomerInfoCallback>,
        counter: Arc<AtomicUsize>,
    ) {
        assert_eq!(
            cache.add(counting_callback("post", OperationKind::PostReceiptData, &counter)),
            CallbackCacheStatus::FirstCallbackAddedToList
        );

        let status = cache.add_or_append_to_post_receipt_data_operation(counting_callback(
            "get",
            OperationKind::GetCustomerInfo,
            &counter,
        ));

        assert_eq!(status, CallbackCacheStatus::AddedToExistingInFlightList);
        assert_eq!(cache.pending("post"), 2);
        assert_eq!(cache.pending("get"), 0);
        drain(&cache, "post");
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[rstest]
    fn receipt_post_of_another_user_is_not_joined(
        cache: CallbackCache<CustomerInfoCallback>,
        counter: Arc<AtomicUsize>,
    ) {
        cache.add(Callback::new("post", OperationKind::PostReceiptData, "other", |_| {}));

        let status = cache.add_or_append_to_post_receipt_data_operation(counting_callback(
            "get",
            OperationKind::GetCustomerInfo,
            &counter,
        ));

        assert_eq!(status, CallbackCacheStatus::FirstCallbackAddedToList);
        assert_eq!(cache.pending("get"), 1);
        drain(&cache, "post");
        drain(&cache, "get");
    }

    #[rstest]
    fn without_receipt_post_behaves_like_add(
        cache: CallbackCache<CustomerInfoCallback>,
        counter: Arc<AtomicUsize>,
    ) {
        let source = OperationKind::GetCustomerInfo;
        assert_eq!(
            cache.add_or_append_to_post_receipt_data_operation(counting_callback(
                "get", source, &counter
            )),
            CallbackCacheStatus::FirstCallbackAddedToList
        );
        assert_eq!(
            cache.add_or_append_to_post_receipt_data_operation(counting_callback(
                "get", source, &counter
            )),
            CallbackCacheStatus::AddedToExistingInFlightList
        );
        drain(&cache, "get");
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "pending callbacks")]
    fn dropping_with_pending_callbacks_asserts() {
        let cache = CallbackCache::<CustomerInfoCallback>::new();
        cache.add(Callback::new("key", OperationKind::GetCustomerInfo, "user", |_| {}));
        drop(cache);
    }
}
