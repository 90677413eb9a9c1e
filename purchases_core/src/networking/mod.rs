// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Network operation layer
//!
//! Every backend call is an [`operations::NetworkOperation`] identified by a
//! cache key derived from the app user id, the operation kind and its salient
//! parameters. [`Backend`] registers a callback for each call in a
//! [`crate::callback_cache::CallbackCache`]; the [`OperationQueue`] only
//! performs the request for the first registrant of a key and replays the
//! single result to everyone waiting on it.
//!
//! Transport failures and error statuses are mapped to [`BackendError`]
//! before reaching any caller.
//!
//! The transport itself is supplied by the host through [`HttpClient`].

mod backend;
mod error;
mod http;
#[cfg(feature = "in_memory")]
pub mod memory;
pub mod operations;
mod queue;

pub use backend::Backend;
pub use error::{BackendError, BackendErrorCode, NetworkError, UnexpectedBackendResponseError};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use operations::{InitiationSource, OperationKind, PostReceiptData};
pub use queue::OperationQueue;
