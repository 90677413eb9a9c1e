// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::result::Result as StdResult;

use purchases_receipt::ReceiptParseError;
use thiserror::Error as ThisError;

use crate::networking::BackendError;

#[derive(ThisError, Debug)]
pub enum Error {
    #[error("Error from cache store: {source_error}")]
    AdapterError { source_error: anyhow::Error },
    #[error("Failed to serialize cached value for {key}:\n{source_error_message}")]
    SerializationError {
        key: String,
        source_error_message: String,
    },
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    ReceiptParse(#[from] ReceiptParseError),
    #[error("Background task failed: {source_error_message}")]
    BackgroundTaskFailed { source_error_message: String },
    #[error("Called log out while the current user is anonymous")]
    LogOutAnonymousUser,
    #[error("No app user id has been configured")]
    NotConfigured,
}

impl Error {
    pub(crate) fn adapter<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::AdapterError {
            source_error: anyhow::Error::new(err),
        }
    }
}

pub type Result<T> = StdResult<T, Error>;
