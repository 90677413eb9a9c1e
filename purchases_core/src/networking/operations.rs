// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Backend operations.
//!
//! An operation knows how to build its HTTP request, how to decode the
//! response, and which cache key identifies it. Two operations with the same
//! cache key are interchangeable: only one of them reaches the network.

use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use strum::Display;

use super::{
    http::escape_path_segment, BackendError, HttpRequest, HttpResponse,
    UnexpectedBackendResponseError,
};
use crate::{
    callback_cache::CacheKeyProviding,
    models::{
        attributes_to_backend_json, CustomerInfo, LogInResponse, Offerings, SubscriberAttributes,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum OperationKind {
    GetCustomerInfo,
    PostReceiptData,
    LogIn,
    GetOfferings,
    PostSubscriberAttributes,
}

pub trait NetworkOperation: CacheKeyProviding + Send + Sync + 'static {
    type Output: Clone + Send + 'static;

    fn kind(&self) -> OperationKind;

    /// App user the operation is performed for.
    fn app_user_id(&self) -> &str;

    fn request(&self) -> HttpRequest;

    /// Maps the raw response, including error statuses, to the result every
    /// waiter receives.
    fn decode(&self, response: HttpResponse) -> Result<Self::Output, BackendError>;
}

fn successful_body(response: HttpResponse) -> Result<Value, BackendError> {
    if response.is_success() {
        Ok(response.body)
    } else {
        Err(BackendError::from_error_response(
            response.status,
            &response.body,
        ))
    }
}

fn decode_body<T: DeserializeOwned>(
    operation: OperationKind,
    response: HttpResponse,
) -> Result<T, BackendError> {
    let body = successful_body(response)?;
    serde_json::from_value(body).map_err(|err| {
        UnexpectedBackendResponseError {
            operation,
            description: err.to_string(),
        }
        .into()
    })
}

fn fingerprint(body: &Value) -> String {
    let mut hasher = DefaultHasher::new();
    body.to_string().hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetCustomerInfoOperation {
    app_user_id: String,
}

impl GetCustomerInfoOperation {
    pub fn new(app_user_id: impl Into<String>) -> Self {
        Self {
            app_user_id: app_user_id.into(),
        }
    }
}

impl CacheKeyProviding for GetCustomerInfoOperation {
    fn cache_key(&self) -> String {
        format!("{} {}", self.kind(), self.app_user_id)
    }
}

impl NetworkOperation for GetCustomerInfoOperation {
    type Output = CustomerInfo;

    fn kind(&self) -> OperationKind {
        OperationKind::GetCustomerInfo
    }

    fn app_user_id(&self) -> &str {
        &self.app_user_id
    }

    fn request(&self) -> HttpRequest {
        HttpRequest::get(format!(
            "/subscribers/{}",
            escape_path_segment(&self.app_user_id)
        ))
    }

    fn decode(&self, response: HttpResponse) -> Result<CustomerInfo, BackendError> {
        decode_body(self.kind(), response)
    }
}

/// What started a receipt post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum InitiationSource {
    Purchase,
    Restore,
    Queue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostReceiptData {
    pub app_user_id: String,
    pub receipt_data: Vec<u8>,
    pub is_restore: bool,
    pub product_id: Option<String>,
    pub presented_offering_identifier: Option<String>,
    pub observer_mode: bool,
    pub initiation_source: InitiationSource,
    /// Unsynced attributes delivered along with the receipt.
    pub subscriber_attributes: SubscriberAttributes,
}

impl PostReceiptData {
    pub fn new(app_user_id: impl Into<String>, receipt_data: Vec<u8>) -> Self {
        Self {
            app_user_id: app_user_id.into(),
            receipt_data,
            is_restore: false,
            product_id: None,
            presented_offering_identifier: None,
            observer_mode: false,
            initiation_source: InitiationSource::Purchase,
            subscriber_attributes: SubscriberAttributes::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostReceiptDataOperation {
    post_data: PostReceiptData,
}

impl PostReceiptDataOperation {
    pub fn new(post_data: PostReceiptData) -> Self {
        Self { post_data }
    }

    fn body(&self) -> Value {
        let data = &self.post_data;
        let mut body = json!({
            "fetch_token": STANDARD.encode(&data.receipt_data),
            "app_user_id": data.app_user_id,
            "is_restore": data.is_restore,
            "observer_mode": data.observer_mode,
            "initiation_source": data.initiation_source.to_string(),
        });
        if let Some(product_id) = &data.product_id {
            body["product_id"] = json!(product_id);
        }
        if let Some(offering) = &data.presented_offering_identifier {
            body["presented_offering_identifier"] = json!(offering);
        }
        if !data.subscriber_attributes.is_empty() {
            let mut attributes = attributes_to_backend_json(&data.subscriber_attributes);
            body["attributes"] = attributes["attributes"].take();
        }
        body
    }
}

impl CacheKeyProviding for PostReceiptDataOperation {
    fn cache_key(&self) -> String {
        format!(
            "{} {} {}",
            self.kind(),
            self.post_data.app_user_id,
            fingerprint(&self.body())
        )
    }
}

impl NetworkOperation for PostReceiptDataOperation {
    type Output = CustomerInfo;

    fn kind(&self) -> OperationKind {
        OperationKind::PostReceiptData
    }

    fn app_user_id(&self) -> &str {
        &self.post_data.app_user_id
    }

    fn request(&self) -> HttpRequest {
        HttpRequest::post("/receipts", self.body())
    }

    fn decode(&self, response: HttpResponse) -> Result<CustomerInfo, BackendError> {
        decode_body(self.kind(), response)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogInOperation {
    current_app_user_id: String,
    new_app_user_id: String,
}

impl LogInOperation {
    pub fn new(current_app_user_id: impl Into<String>, new_app_user_id: impl Into<String>) -> Self {
        Self {
            current_app_user_id: current_app_user_id.into(),
            new_app_user_id: new_app_user_id.into(),
        }
    }
}

impl CacheKeyProviding for LogInOperation {
    fn cache_key(&self) -> String {
        format!(
            "{} {} {}",
            self.kind(),
            self.current_app_user_id,
            self.new_app_user_id
        )
    }
}

impl NetworkOperation for LogInOperation {
    type Output = LogInResponse;

    fn kind(&self) -> OperationKind {
        OperationKind::LogIn
    }

    fn app_user_id(&self) -> &str {
        &self.current_app_user_id
    }

    fn request(&self) -> HttpRequest {
        HttpRequest::post(
            "/subscribers/identify",
            json!({
                "app_user_id": self.current_app_user_id,
                "new_app_user_id": self.new_app_user_id,
            }),
        )
    }

    fn decode(&self, response: HttpResponse) -> Result<LogInResponse, BackendError> {
        // 201 means the new app user didn't exist before
        let created = response.status == 201;
        let customer_info = decode_body(self.kind(), response)?;
        Ok(LogInResponse {
            customer_info,
            created,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetOfferingsOperation {
    app_user_id: String,
}

impl GetOfferingsOperation {
    pub fn new(app_user_id: impl Into<String>) -> Self {
        Self {
            app_user_id: app_user_id.into(),
        }
    }
}

impl CacheKeyProviding for GetOfferingsOperation {
    fn cache_key(&self) -> String {
        format!("{} {}", self.kind(), self.app_user_id)
    }
}

impl NetworkOperation for GetOfferingsOperation {
    type Output = Offerings;

    fn kind(&self) -> OperationKind {
        OperationKind::GetOfferings
    }

    fn app_user_id(&self) -> &str {
        &self.app_user_id
    }

    fn request(&self) -> HttpRequest {
        HttpRequest::get(format!(
            "/subscribers/{}/offerings",
            escape_path_segment(&self.app_user_id)
        ))
    }

    fn decode(&self, response: HttpResponse) -> Result<Offerings, BackendError> {
        decode_body(self.kind(), response)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostSubscriberAttributesOperation {
    app_user_id: String,
    attributes: SubscriberAttributes,
}

impl PostSubscriberAttributesOperation {
    pub fn new(app_user_id: impl Into<String>, attributes: SubscriberAttributes) -> Self {
        Self {
            app_user_id: app_user_id.into(),
            attributes,
        }
    }
}

impl CacheKeyProviding for PostSubscriberAttributesOperation {
    fn cache_key(&self) -> String {
        format!(
            "{} {} {}",
            self.kind(),
            self.app_user_id,
            fingerprint(&attributes_to_backend_json(&self.attributes))
        )
    }
}

impl NetworkOperation for PostSubscriberAttributesOperation {
    type Output = ();

    fn kind(&self) -> OperationKind {
        OperationKind::PostSubscriberAttributes
    }

    fn app_user_id(&self) -> &str {
        &self.app_user_id
    }

    fn request(&self) -> HttpRequest {
        HttpRequest::post(
            format!(
                "/subscribers/{}/attributes",
                escape_path_segment(&self.app_user_id)
            ),
            attributes_to_backend_json(&self.attributes),
        )
    }

    fn decode(&self, response: HttpResponse) -> Result<(), BackendError> {
        successful_body(response).map(|_| ())
    }
}
