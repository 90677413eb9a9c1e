// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

use serde::Deserialize;
use strum::{Display, FromRepr};
use thiserror::Error;

use super::OperationKind;

/// Failures below the HTTP layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("The request timed out")]
    Timeout,
    #[error("The device is offline")]
    Offline,
    #[error("The host could not be resolved")]
    Dns,
    #[error("The request was cancelled")]
    Cancelled,
    #[error("Transport error: {description}")]
    Transport { description: String },
}

/// Error codes the backend reports in error responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, FromRepr)]
#[repr(i64)]
pub enum BackendErrorCode {
    Unknown = 0,
    InvalidPlatform = 7000,
    StoreProblem = 7101,
    CannotTransferPurchase = 7102,
    InvalidReceipt = 7103,
    InvalidAppStoreSharedSecret = 7104,
    InvalidPaymentModeOrIntroPriceNotProvided = 7105,
    ProductIdentifierNotProvided = 7106,
    InvalidAppUserId = 7220,
    InvalidSubscriberAttributes = 7263,
    InvalidApiKey = 7225,
    InvalidSubscriberAttributesBody = 7264,
}

impl BackendErrorCode {
    pub fn from_code(code: i64) -> Self {
        Self::from_repr(code).unwrap_or(Self::Unknown)
    }
}

/// A successful response whose body doesn't decode to what the operation
/// expects.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unexpected response for {operation}: {description}")]
pub struct UnexpectedBackendResponseError {
    pub operation: OperationKind,
    pub description: String,
}

/// Every way a backend request can fail, as seen by the callers of
/// [`super::Backend`].
///
/// Cloneable so one failure can be replayed to every waiter of a
/// deduplicated request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Missing app user id")]
    MissingAppUserId,
    #[error("No subscriber attributes to post")]
    EmptySubscriberAttributes,
    #[error("No customer info is cached")]
    MissingCachedCustomerInfo,
    #[error(transparent)]
    NetworkError(#[from] NetworkError),
    #[error(
        "Backend returned error {code} ({original_code}) with status {status}: {}",
        .message.as_deref().unwrap_or("no message")
    )]
    ErrorResponse {
        code: BackendErrorCode,
        message: Option<String>,
        original_code: i64,
        status: u16,
    },
    #[error(transparent)]
    UnexpectedBackendResponse(#[from] UnexpectedBackendResponseError),
}

impl BackendError {
    /// Builds the error for a non successful status from the response body,
    /// which may or may not carry `code` and `message`.
    pub(crate) fn from_error_response(status: u16, body: &serde_json::Value) -> Self {
        #[derive(Deserialize, Default)]
        struct ErrorBody {
            code: Option<i64>,
            message: Option<String>,
        }
        let body = ErrorBody::deserialize(body).unwrap_or_default();
        let original_code = body.code.unwrap_or_default();
        BackendError::ErrorResponse {
            code: BackendErrorCode::from_code(original_code),
            message: body.message,
            original_code,
            status,
        }
    }

    /// Whether retrying later can succeed, as opposed to the request being
    /// rejected for good.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::NetworkError(_) => true,
            BackendError::ErrorResponse { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
