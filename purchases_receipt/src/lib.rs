// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Local receipt parsing
//!
//! Apple signs every purchase a device makes into a PKCS#7 container encoded
//! with ASN.1 DER. This crate turns that binary blob into an [`AppleReceipt`]
//! without talking to any server.
//!
//! Parsing happens in two phases:
//! - [`asn1::Asn1ContainerBuilder`] walks the raw bytes and produces a tree of
//!   [`asn1::Asn1Container`]s. It knows nothing about receipts.
//! - [`builder::AppleReceiptBuilder`] interprets the payload found next to the
//!   `data` object identifier as receipt attributes, delegating every nested
//!   purchase to [`builder::InAppPurchaseBuilder`].
//!
//! [`PurchasesReceiptParser`] composes both phases.
//!
//! ```rust,no_run
//! use purchases_receipt::PurchasesReceiptParser;
//!
//! let bytes = std::fs::read("receipt").unwrap();
//! let receipt = PurchasesReceiptParser::new().parse(&bytes).unwrap();
//! println!("{} purchases", receipt.in_app_purchases.len());
//! ```
//!
//! Parsing is CPU bound; callers running inside an async runtime should move
//! it to a blocking thread.

pub mod asn1;
pub mod builder;
mod bytes;
mod error;
mod parser;
mod receipt;

pub use error::ReceiptParseError;
pub use parser::PurchasesReceiptParser;
pub use receipt::{AppleReceipt, InAppPurchase, InAppPurchaseProductType};

/// Result type for receipt parsing
pub type ParseResult<T> = Result<T, ReceiptParseError>;
