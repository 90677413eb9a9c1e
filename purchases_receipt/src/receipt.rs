// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Structured representation of a parsed receipt.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

/// Kind of product a purchase was made for, as reported by attribute 1722.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InAppPurchaseProductType {
    Unknown,
    NonConsumable,
    Consumable,
    NonRenewingSubscription,
    AutoRenewableSubscription,
}

impl From<i64> for InAppPurchaseProductType {
    fn from(value: i64) -> Self {
        match value {
            0 => Self::NonConsumable,
            1 => Self::Consumable,
            2 => Self::NonRenewingSubscription,
            3 => Self::AutoRenewableSubscription,
            _ => Self::Unknown,
        }
    }
}

/// One transaction entry of a receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InAppPurchase {
    pub quantity: i64,
    pub product_id: String,
    pub transaction_id: String,
    pub original_transaction_id: Option<String>,
    pub product_type: InAppPurchaseProductType,
    pub purchase_date: DateTime<Utc>,
    pub original_purchase_date: Option<DateTime<Utc>>,
    pub expires_date: Option<DateTime<Utc>>,
    pub cancellation_date: Option<DateTime<Utc>>,
    pub is_in_trial_period: Option<bool>,
    pub is_in_intro_offer_period: Option<bool>,
    pub web_order_line_item_id: Option<i64>,
    pub promotional_offer_identifier: Option<String>,
}

impl InAppPurchase {
    /// Receipts created before product types were reported fall back to
    /// "has an expiration date".
    pub fn is_subscription(&self) -> bool {
        match self.product_type {
            InAppPurchaseProductType::AutoRenewableSubscription
            | InAppPurchaseProductType::NonRenewingSubscription => true,
            InAppPurchaseProductType::NonConsumable | InAppPurchaseProductType::Consumable => false,
            InAppPurchaseProductType::Unknown => self.expires_date.is_some(),
        }
    }

    /// A subscription is active at `at` unless it was cancelled or its
    /// expiration date is not after `at`. A subscription without expiration
    /// date never lapses.
    pub fn is_active_subscription(&self, at: DateTime<Utc>) -> bool {
        if !self.is_subscription() || self.cancellation_date.is_some() {
            return false;
        }
        self.expires_date.map_or(true, |expires| expires > at)
    }

    fn used_intro_offer_or_free_trial(&self) -> bool {
        self.is_in_trial_period == Some(true) || self.is_in_intro_offer_period == Some(true)
    }
}

/// A parsed App Store receipt.
///
/// Receipts are short lived: the backend-verified customer state supersedes
/// whatever a local receipt says, so they are never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppleReceipt {
    pub bundle_id: String,
    pub application_version: String,
    pub original_application_version: Option<String>,
    #[serde(serialize_with = "serialize_base64")]
    pub opaque_value: Vec<u8>,
    #[serde(serialize_with = "serialize_base64")]
    pub sha1_hash: Vec<u8>,
    pub creation_date: DateTime<Utc>,
    pub expiration_date: Option<DateTime<Utc>>,
    /// Purchases in the order they appear in the receipt.
    pub in_app_purchases: Vec<InAppPurchase>,
}

impl AppleReceipt {
    /// Whether the receipt grants access to `product_id` at `at`.
    ///
    /// Any active subscription counts, regardless of its product. Other
    /// purchases only count for their own product.
    pub fn contains_active_purchase(&self, product_id: &str, at: DateTime<Utc>) -> bool {
        self.in_app_purchases
            .iter()
            .any(|purchase| purchase.is_active_subscription(at))
            || self.in_app_purchases.iter().any(|purchase| {
                !purchase.is_subscription()
                    && purchase.cancellation_date.is_none()
                    && purchase.product_id == product_id
            })
    }

    pub fn active_subscriptions_product_identifiers(&self, at: DateTime<Utc>) -> BTreeSet<String> {
        self.in_app_purchases
            .iter()
            .filter(|purchase| purchase.is_active_subscription(at))
            .map(|purchase| purchase.product_id.clone())
            .collect()
    }

    pub fn purchased_intro_offer_or_free_trial_product_identifiers(&self) -> BTreeSet<String> {
        self.in_app_purchases
            .iter()
            .filter(|purchase| purchase.used_intro_offer_or_free_trial())
            .map(|purchase| purchase.product_id.clone())
            .collect()
    }

    /// The active subscription purchased last.
    pub fn most_recent_active_subscription(&self, at: DateTime<Utc>) -> Option<&InAppPurchase> {
        self.in_app_purchases
            .iter()
            .filter(|purchase| purchase.is_active_subscription(at))
            .max_by_key(|purchase| purchase.purchase_date)
    }
}

fn serialize_base64<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    use base64::Engine;
    serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
}
