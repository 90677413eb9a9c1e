// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Backend verified purchase state of one app user.
///
/// Two values are equal when their subscriber data is equal: the request date
/// changes on every response and does not count as a change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerInfo {
    pub request_date: DateTime<Utc>,
    pub subscriber: Subscriber,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub original_app_user_id: String,
    pub first_seen: DateTime<Utc>,
    #[serde(default)]
    pub original_application_version: Option<String>,
    #[serde(default)]
    pub management_url: Option<String>,
    #[serde(default)]
    pub subscriptions: BTreeMap<String, SubscriptionInfo>,
    #[serde(default)]
    pub entitlements: BTreeMap<String, EntitlementInfo>,
    #[serde(default)]
    pub non_subscriptions: BTreeMap<String, Vec<NonSubscriptionTransaction>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    pub purchase_date: DateTime<Utc>,
    #[serde(default)]
    pub original_purchase_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unsubscribe_detected_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub billing_issues_detected_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_sandbox: bool,
    #[serde(default)]
    pub store: Option<String>,
    #[serde(default)]
    pub period_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementInfo {
    pub product_identifier: String,
    pub purchase_date: DateTime<Utc>,
    #[serde(default)]
    pub expires_date: Option<DateTime<Utc>>,
}

impl EntitlementInfo {
    /// Lifetime entitlements have no expiration date.
    pub fn is_active(&self, at: DateTime<Utc>) -> bool {
        self.expires_date.map_or(true, |expires| expires > at)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonSubscriptionTransaction {
    pub id: String,
    pub purchase_date: DateTime<Utc>,
    #[serde(default)]
    pub store: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct CachedCustomerInfo {
    #[serde(flatten)]
    customer_info: CustomerInfo,
    #[serde(default)]
    schema_version: Option<String>,
}

impl CustomerInfo {
    /// Version of the cached representation. Cached values written with a
    /// different version are discarded.
    pub const SCHEMA_VERSION: &'static str = "3";

    /// JSON stored in the device cache.
    pub fn to_cached_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(CachedCustomerInfo {
            customer_info: self.clone(),
            schema_version: Some(Self::SCHEMA_VERSION.to_owned()),
        })
    }

    /// Reads a value written by [`Self::to_cached_json`].
    ///
    /// Returns `Ok(None)` when the value was written with an incompatible
    /// schema version.
    pub fn from_cached_json(value: serde_json::Value) -> serde_json::Result<Option<Self>> {
        let cached: CachedCustomerInfo = serde_json::from_value(value)?;
        Ok(match cached.schema_version.as_deref() {
            Some(Self::SCHEMA_VERSION) => Some(cached.customer_info),
            _ => None,
        })
    }

    pub fn original_app_user_id(&self) -> &str {
        &self.subscriber.original_app_user_id
    }

    pub fn active_entitlements(&self, at: DateTime<Utc>) -> BTreeSet<String> {
        self.subscriber
            .entitlements
            .iter()
            .filter(|(_, entitlement)| entitlement.is_active(at))
            .map(|(identifier, _)| identifier.clone())
            .collect()
    }

    pub fn is_entitlement_active(&self, identifier: &str, at: DateTime<Utc>) -> bool {
        self.subscriber
            .entitlements
            .get(identifier)
            .is_some_and(|entitlement| entitlement.is_active(at))
    }

    pub fn active_subscriptions(&self, at: DateTime<Utc>) -> BTreeSet<String> {
        self.subscriber
            .subscriptions
            .iter()
            .filter(|(_, subscription)| subscription.expires_date.map_or(true, |date| date > at))
            .map(|(product_id, _)| product_id.clone())
            .collect()
    }

    pub fn latest_expiration_date(&self) -> Option<DateTime<Utc>> {
        self.subscriber
            .subscriptions
            .values()
            .filter_map(|subscription| subscription.expires_date)
            .max()
    }

    /// Product identifiers of every purchase ever made, subscription or not.
    pub fn all_purchased_product_identifiers(&self) -> BTreeSet<String> {
        self.subscriber
            .subscriptions
            .keys()
            .chain(self.subscriber.non_subscriptions.keys())
            .cloned()
            .collect()
    }
}

impl PartialEq for CustomerInfo {
    fn eq(&self, other: &Self) -> bool {
        self.subscriber == other.subscriber
    }
}

impl Eq for CustomerInfo {}
