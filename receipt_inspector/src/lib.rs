// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use purchases_core::receipt::{parse_base64_receipt_in_background, parse_receipt_in_background};
use purchases_receipt::{AppleReceipt, InAppPurchase};
use serde::Serialize;

/// Where the receipt comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptSource {
    File(PathBuf),
    Base64(String),
}

pub async fn load_receipt(source: ReceiptSource) -> Result<AppleReceipt> {
    let receipt = match source {
        ReceiptSource::File(path) => {
            let bytes = fs::read(&path)
                .with_context(|| format!("Failed to read receipt file {}", path.display()))?;
            parse_receipt_in_background(bytes).await?
        }
        ReceiptSource::Base64(encoded) => parse_base64_receipt_in_background(encoded).await?,
    };
    Ok(receipt)
}

#[derive(Debug, Serialize)]
pub struct ProductQuery<'a> {
    pub product_id: &'a str,
    pub at: DateTime<Utc>,
    pub contains_active_purchase: bool,
}

/// Everything the tool prints.
#[derive(Debug, Serialize)]
pub struct Report<'a> {
    pub receipt: &'a AppleReceipt,
    pub active_subscriptions: Vec<String>,
    pub intro_offer_or_free_trial_products: Vec<String>,
    pub most_recent_active_subscription: Option<&'a InAppPurchase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<ProductQuery<'a>>,
}

impl<'a> Report<'a> {
    pub fn new(receipt: &'a AppleReceipt, product_id: Option<&'a str>, at: DateTime<Utc>) -> Self {
        Self {
            receipt,
            active_subscriptions: receipt
                .active_subscriptions_product_identifiers(at)
                .into_iter()
                .collect(),
            intro_offer_or_free_trial_products: receipt
                .purchased_intro_offer_or_free_trial_product_identifiers()
                .into_iter()
                .collect(),
            most_recent_active_subscription: receipt.most_recent_active_subscription(at),
            query: product_id.map(|product_id| ProductQuery {
                product_id,
                at,
                contains_active_purchase: receipt.contains_active_purchase(product_id, at),
            }),
        }
    }
}
