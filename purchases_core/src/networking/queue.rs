// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::{sync::Arc, time::Duration};

use rand::Rng;

use super::{operations::NetworkOperation, BackendError, HttpClient, NetworkError};
use crate::{
    callback_cache::{Callback, CallbackCache, CallbackCacheStatus},
    logger::Logger,
};

/// Completes the callbacks of an operation when the request task ends.
///
/// Runs on drop, so the waiters also hear back when the task panics or the
/// runtime drops it mid-request. Without a result they get
/// [`NetworkError::Cancelled`].
struct FanOutOnDrop<Op: NetworkOperation> {
    operation: Op,
    callbacks: Arc<CallbackCache<Callback<Op::Output>>>,
    result: Option<Result<Op::Output, BackendError>>,
}

impl<Op: NetworkOperation> Drop for FanOutOnDrop<Op> {
    fn drop(&mut self) {
        let result = self
            .result
            .take()
            .unwrap_or(Err(BackendError::NetworkError(NetworkError::Cancelled)));
        self.callbacks
            .perform_on_all_items_and_remove_from_cache(&self.operation, |callback| {
                callback.complete(result.clone())
            });
    }
}

/// Runs operations on the tokio runtime and fans their result out to every
/// callback waiting under the operation's cache key.
#[derive(Clone)]
pub struct OperationQueue {
    http_client: Arc<dyn HttpClient>,
    request_timeout: Duration,
    max_random_delay: Duration,
    logger: Logger,
}

impl OperationQueue {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        request_timeout: Duration,
        max_random_delay: Duration,
        logger: Logger,
    ) -> Self {
        Self {
            http_client,
            request_timeout,
            max_random_delay,
            logger,
        }
    }

    /// Starts `operation` unless its callback joined a request that is
    /// already in flight.
    ///
    /// The spawned task always completes the callbacks registered under the
    /// operation's cache key, including after a timeout or a panic of the
    /// [`HttpClient`], so no waiter is left behind. Must be called from
    /// within a tokio runtime.
    pub fn add_cacheable_operation<Op>(
        &self,
        operation: Op,
        callbacks: Arc<CallbackCache<Callback<Op::Output>>>,
        cache_status: CallbackCacheStatus,
        with_random_delay: bool,
    ) where
        Op: NetworkOperation,
    {
        if cache_status == CallbackCacheStatus::AddedToExistingInFlightList {
            self.logger.debug(format!(
                "Request for {} already in flight, waiting for its result",
                operation.kind()
            ));
            return;
        }

        let queue = self.clone();
        tokio::spawn(async move {
            let mut fan_out = FanOutOnDrop {
                operation,
                callbacks,
                result: None,
            };
            let result = queue.perform(&fan_out.operation, with_random_delay).await;
            fan_out.result = Some(result);
        });
    }

    async fn perform<Op: NetworkOperation>(
        &self,
        operation: &Op,
        with_random_delay: bool,
    ) -> Result<Op::Output, BackendError> {
        if with_random_delay && !self.max_random_delay.is_zero() {
            let delay = rand::rng().random_range(Duration::ZERO..=self.max_random_delay);
            self.logger
                .debug(format!("Delaying {} by {delay:?}", operation.kind()));
            tokio::time::sleep(delay).await;
        }

        let request = operation.request();
        self.logger.debug(format!(
            "{} {} ({})",
            request.method,
            request.path,
            operation.kind()
        ));

        let response =
            match tokio::time::timeout(self.request_timeout, self.http_client.perform(request))
                .await
            {
                Ok(Ok(response)) => response,
                Ok(Err(err)) => {
                    self.logger
                        .error(format!("{} failed: {err}", operation.kind()));
                    return Err(err.into());
                }
                Err(_) => {
                    self.logger.error(format!(
                        "{} timed out after {:?}",
                        operation.kind(),
                        self.request_timeout
                    ));
                    return Err(NetworkError::Timeout.into());
                }
            };

        self.logger.debug(format!(
            "{} finished with status {}",
            operation.kind(),
            response.status
        ));
        operation.decode(response)
    }
}
