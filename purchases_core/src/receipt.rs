// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

use purchases_receipt::{AppleReceipt, ParseResult, PurchasesReceiptParser};

use crate::{Error, Result};

/// Parses `bytes` on the blocking thread pool.
///
/// Parsing is CPU bound and must not stall the tasks driving the runtime.
pub async fn parse_receipt_in_background(bytes: Vec<u8>) -> Result<AppleReceipt> {
    run_blocking(move |parser| parser.parse(&bytes)).await
}

/// Like [`parse_receipt_in_background`], for a base64 encoded receipt.
pub async fn parse_base64_receipt_in_background(encoded: String) -> Result<AppleReceipt> {
    run_blocking(move |parser| parser.parse_from_base64(&encoded)).await
}

async fn run_blocking<F>(parse: F) -> Result<AppleReceipt>
where
    F: FnOnce(PurchasesReceiptParser) -> ParseResult<AppleReceipt> + Send + 'static,
{
    let receipt = tokio::task::spawn_blocking(move || parse(PurchasesReceiptParser::new()))
        .await
        .map_err(|err| Error::BackgroundTaskFailed {
            source_error_message: err.to_string(),
        })??;
    Ok(receipt)
}
