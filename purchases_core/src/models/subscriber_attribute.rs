// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Attributes of one app user, by attribute key.
pub type SubscriberAttributes = BTreeMap<String, SubscriberAttribute>;

/// A key/value pair describing the subscriber, set locally and delivered to
/// the backend later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberAttribute {
    pub key: String,
    /// `None` deletes the attribute on the backend.
    pub value: Option<String>,
    pub set_time: DateTime<Utc>,
    #[serde(default)]
    pub is_synced: bool,
}

impl SubscriberAttribute {
    pub fn new(key: impl Into<String>, value: Option<String>, set_time: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            value,
            set_time,
            is_synced: false,
        }
    }

    pub fn synced(mut self) -> Self {
        self.is_synced = true;
        self
    }

    /// Request body fragment for this attribute.
    pub fn to_backend_json(&self) -> Value {
        json!({
            "value": self.value,
            "updated_at_ms": self.set_time.timestamp_millis(),
        })
    }
}

/// Request body for a batch of attributes.
pub(crate) fn attributes_to_backend_json(attributes: &SubscriberAttributes) -> Value {
    let attributes: serde_json::Map<String, Value> = attributes
        .values()
        .map(|attribute| (attribute.key.clone(), attribute.to_backend_json()))
        .collect();
    json!({ "attributes": attributes })
}
