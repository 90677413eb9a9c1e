// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

#![doc = include_str!("../README.md")]

use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{ArgGroup, Parser};
use log::{debug, info};
use receipt_inspector::{load_receipt, ReceiptSource, Report};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(group(ArgGroup::new("input").required(true).args(["file", "base64"])))]
struct Args {
    /// Path to a raw (DER encoded) receipt file.
    #[arg(long, env = "RECEIPT_FILE")]
    file: Option<PathBuf>,

    /// Receipt encoded as base64, as sent to the backend.
    #[arg(long, env = "RECEIPT_BASE64")]
    base64: Option<String>,

    /// Product identifier to check for an active purchase.
    #[arg(long, env = "RECEIPT_PRODUCT")]
    product: Option<String>,

    /// Instant the queries are evaluated at, as an RFC 3339 timestamp.
    /// Defaults to now.
    #[arg(long, env = "RECEIPT_AT")]
    at: Option<DateTime<Utc>>,

    /// Print the report on a single line.
    #[arg(long, default_value_t = false)]
    compact: bool,
}

impl Args {
    fn source(&self) -> Option<ReceiptSource> {
        match (&self.file, &self.base64) {
            (Some(path), _) => Some(ReceiptSource::File(path.clone())),
            (None, Some(encoded)) => Some(ReceiptSource::Base64(encoded.clone())),
            (None, None) => None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Set the log level with the RUST_LOG environment variable.
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    debug!("Settings: {:?}", args);

    let source = args
        .source()
        .ok_or_else(|| anyhow::anyhow!("Either --file or --base64 is required"))?;
    let receipt = load_receipt(source).await?;
    info!(
        "Parsed receipt of {} with {} purchases",
        receipt.bundle_id,
        receipt.in_app_purchases.len()
    );

    let at = args.at.unwrap_or_else(Utc::now);
    let report = Report::new(&receipt, args.product.as_deref(), at);
    let output = if args.compact {
        serde_json::to_string(&report)?
    } else {
        serde_json::to_string_pretty(&report)?
    };
    println!("{output}");
    Ok(())
}
