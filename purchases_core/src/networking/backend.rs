// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use tokio::sync::oneshot;

use super::{
    operations::{
        GetCustomerInfoOperation, GetOfferingsOperation, LogInOperation, NetworkOperation,
        PostReceiptData, PostReceiptDataOperation, PostSubscriberAttributesOperation,
    },
    BackendError, HttpClient, NetworkError, OperationQueue,
};
use crate::{
    callback_cache::{
        Callback, CallbackCache, CustomerInfoCallback, LogInCallback, OfferingsCallback,
        SubscriberAttributesCallback,
    },
    config::PurchasesConfig,
    logger::Logger,
    models::{CustomerInfo, LogInResponse, Offerings, SubscriberAttributes},
};

/// Entry point for every backend request.
///
/// Concurrent calls that map to the same operation share a single request.
/// Customer info requests issued while a receipt post for the same user is in
/// flight wait for the post instead, since it answers with the same data.
pub struct Backend {
    queue: OperationQueue,
    customer_info_callbacks: Arc<CallbackCache<CustomerInfoCallback>>,
    log_in_callbacks: Arc<CallbackCache<LogInCallback>>,
    offerings_callbacks: Arc<CallbackCache<OfferingsCallback>>,
    attributes_callbacks: Arc<CallbackCache<SubscriberAttributesCallback>>,
    logger: Logger,
}

impl Backend {
    pub fn new(http_client: Arc<dyn HttpClient>, config: &PurchasesConfig, logger: Logger) -> Self {
        Self {
            queue: OperationQueue::new(
                http_client,
                config.request_timeout,
                config.max_random_delay,
                logger.clone(),
            ),
            customer_info_callbacks: Arc::new(CallbackCache::new()),
            log_in_callbacks: Arc::new(CallbackCache::new()),
            offerings_callbacks: Arc::new(CallbackCache::new()),
            attributes_callbacks: Arc::new(CallbackCache::new()),
            logger,
        }
    }

    /// Fetches the customer info of `app_user_id`.
    ///
    /// `with_random_delay` spreads requests issued from background refreshes.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::MissingAppUserId`] for an empty app user id,
    /// otherwise the error of the (possibly shared) request.
    pub async fn get_customer_info(
        &self,
        app_user_id: &str,
        with_random_delay: bool,
    ) -> Result<CustomerInfo, BackendError> {
        require_app_user_id(app_user_id)?;
        let operation = GetCustomerInfoOperation::new(app_user_id);
        let (callback, receiver) = callback_for(&operation);
        let cache_status = self
            .customer_info_callbacks
            .add_or_append_to_post_receipt_data_operation(callback);
        self.queue.add_cacheable_operation(
            operation,
            self.customer_info_callbacks.clone(),
            cache_status,
            with_random_delay,
        );
        wait_for(receiver).await
    }

    /// Posts a receipt and returns the resulting customer info.
    pub async fn post_receipt_data(
        &self,
        post_data: PostReceiptData,
    ) -> Result<CustomerInfo, BackendError> {
        require_app_user_id(&post_data.app_user_id)?;
        self.logger.debug(format!(
            "Posting receipt for {} (restore: {})",
            post_data.app_user_id, post_data.is_restore
        ));
        let operation = PostReceiptDataOperation::new(post_data);
        let (callback, receiver) = callback_for(&operation);
        let cache_status = self.customer_info_callbacks.add(callback);
        self.queue.add_cacheable_operation(
            operation,
            self.customer_info_callbacks.clone(),
            cache_status,
            false,
        );
        wait_for(receiver).await
    }

    /// Identifies `current_app_user_id` as `new_app_user_id`.
    pub async fn log_in(
        &self,
        current_app_user_id: &str,
        new_app_user_id: &str,
    ) -> Result<LogInResponse, BackendError> {
        require_app_user_id(current_app_user_id)?;
        require_app_user_id(new_app_user_id)?;
        let operation = LogInOperation::new(current_app_user_id, new_app_user_id);
        let (callback, receiver) = callback_for(&operation);
        let cache_status = self.log_in_callbacks.add(callback);
        self.queue.add_cacheable_operation(
            operation,
            self.log_in_callbacks.clone(),
            cache_status,
            false,
        );
        wait_for(receiver).await
    }

    pub async fn get_offerings(
        &self,
        app_user_id: &str,
        with_random_delay: bool,
    ) -> Result<Offerings, BackendError> {
        require_app_user_id(app_user_id)?;
        let operation = GetOfferingsOperation::new(app_user_id);
        let (callback, receiver) = callback_for(&operation);
        let cache_status = self.offerings_callbacks.add(callback);
        self.queue.add_cacheable_operation(
            operation,
            self.offerings_callbacks.clone(),
            cache_status,
            with_random_delay,
        );
        wait_for(receiver).await
    }

    /// # Errors
    ///
    /// Returns [`BackendError::EmptySubscriberAttributes`] without performing
    /// a request when `attributes` is empty.
    pub async fn post_subscriber_attributes(
        &self,
        app_user_id: &str,
        attributes: SubscriberAttributes,
    ) -> Result<(), BackendError> {
        require_app_user_id(app_user_id)?;
        if attributes.is_empty() {
            return Err(BackendError::EmptySubscriberAttributes);
        }
        let operation = PostSubscriberAttributesOperation::new(app_user_id, attributes);
        let (callback, receiver) = callback_for(&operation);
        let cache_status = self.attributes_callbacks.add(callback);
        self.queue.add_cacheable_operation(
            operation,
            self.attributes_callbacks.clone(),
            cache_status,
            false,
        );
        wait_for(receiver).await
    }
}

fn require_app_user_id(app_user_id: &str) -> Result<(), BackendError> {
    if app_user_id.trim().is_empty() {
        return Err(BackendError::MissingAppUserId);
    }
    Ok(())
}

fn callback_for<Op: NetworkOperation>(
    operation: &Op,
) -> (
    Callback<Op::Output>,
    oneshot::Receiver<Result<Op::Output, BackendError>>,
) {
    Callback::channel(
        operation.cache_key(),
        operation.kind(),
        operation.app_user_id(),
    )
}

async fn wait_for<T>(
    receiver: oneshot::Receiver<Result<T, BackendError>>,
) -> Result<T, BackendError> {
    // the sender is dropped unused only when its callback was never completed
    receiver
        .await
        .unwrap_or(Err(BackendError::NetworkError(NetworkError::Cancelled)))
}
