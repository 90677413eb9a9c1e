// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use chrono::{TimeZone, Utc};
use purchases_core::{
    caching::{CacheStore, DeviceCache},
    config::PurchasesConfig,
    customer_info_manager::CustomerInfoManager,
    date_provider::MockDateProvider,
    identity::IdentityManager,
    logger::Logger,
    networking::{
        memory::InMemoryHttpClient,
        operations::{GetCustomerInfoOperation, NetworkOperation},
        Backend,
    },
};
use serde_json::{json, Value};

pub fn customer_info_path(app_user_id: &str) -> String {
    GetCustomerInfoOperation::new(app_user_id).request().path
}

pub fn customer_info_body(app_user_id: &str, entitlements: &[&str]) -> Value {
    let entitlements: serde_json::Map<String, Value> = entitlements
        .iter()
        .map(|name| {
            (
                (*name).to_owned(),
                json!({
                    "product_identifier": format!("{name}_monthly"),
                    "purchase_date": "2024-01-01T00:00:00Z",
                    "expires_date": "2024-02-01T00:00:00Z",
                }),
            )
        })
        .collect();
    json!({
        "request_date": "2024-01-01T00:00:00Z",
        "subscriber": {
            "original_app_user_id": app_user_id,
            "first_seen": "2024-01-01T00:00:00Z",
            "entitlements": entitlements,
        }
    })
}

pub struct Purchases<S> {
    pub http_client: InMemoryHttpClient,
    pub clock: Arc<MockDateProvider>,
    pub device_cache: Arc<DeviceCache<S>>,
    pub backend: Arc<Backend>,
    pub customer_info_manager: CustomerInfoManager<S>,
    pub identity: IdentityManager<S>,
}

impl<S: CacheStore + 'static> Purchases<S> {
    pub fn new(store: S) -> Self {
        let http_client = InMemoryHttpClient::new();
        http_client.set_latency(Duration::from_millis(10));
        let clock = Arc::new(MockDateProvider::new(
            Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap(),
        ));
        let config = PurchasesConfig {
            max_random_delay: Duration::ZERO,
            ..Default::default()
        };
        let logger = Logger::default();
        let device_cache = Arc::new(DeviceCache::new(
            store,
            config.clone(),
            clock.clone(),
            logger.clone(),
        ));
        let backend = Arc::new(Backend::new(
            Arc::new(http_client.clone()),
            &config,
            logger.clone(),
        ));
        let customer_info_manager =
            CustomerInfoManager::new(backend.clone(), device_cache.clone(), logger.clone());
        let identity = IdentityManager::new(
            device_cache.clone(),
            backend.clone(),
            customer_info_manager.clone(),
            clock.clone(),
            logger,
        );
        Self {
            http_client,
            clock,
            device_cache,
            backend,
            customer_info_manager,
            identity,
        }
    }
}
