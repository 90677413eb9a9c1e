// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

/// Error type for local receipt parsing
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ReceiptParseError {
    #[error("Couldn't find an object with the data object identifier in the receipt")]
    DataObjectIdentifierMissing,
    #[error("Error while parsing ASN.1 container: {description}")]
    Asn1ParsingError { description: String },
    #[error("Error while parsing the receipt: {description}")]
    ReceiptParsingError { description: String },
    #[error("Error while parsing an in-app purchase: {description}")]
    InAppPurchaseParsingError { description: String },
    #[error("Receipt is not valid base64:\n{source_error_message}")]
    InvalidBase64 { source_error_message: String },
}

impl ReceiptParseError {
    pub(crate) fn asn1(description: impl Into<String>) -> Self {
        Self::Asn1ParsingError {
            description: description.into(),
        }
    }

    pub(crate) fn receipt(description: impl Into<String>) -> Self {
        Self::ReceiptParsingError {
            description: description.into(),
        }
    }

    pub(crate) fn in_app_purchase(description: impl Into<String>) -> Self {
        Self::InAppPurchaseParsingError {
            description: description.into(),
        }
    }
}
