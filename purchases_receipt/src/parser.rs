// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::debug;

use crate::{
    asn1::{
        Asn1Class, Asn1Container, Asn1ContainerBuilder, Asn1Encoding, Asn1Identifier,
        ObjectIdentifier,
    },
    builder::AppleReceiptBuilder,
    AppleReceipt, ParseResult, ReceiptParseError,
};

/// Parses PKCS#7 encoded App Store receipts.
///
/// The parser holds no state between calls and can be shared freely.
#[derive(Debug, Default, Clone, Copy)]
pub struct PurchasesReceiptParser {
    container_builder: Asn1ContainerBuilder,
    receipt_builder: AppleReceiptBuilder,
}

impl PurchasesReceiptParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the raw bytes of a receipt.
    ///
    /// # Errors
    ///
    /// - [`ReceiptParseError::Asn1ParsingError`] if `bytes` isn't valid ASN.1.
    /// - [`ReceiptParseError::DataObjectIdentifierMissing`] if no `data`
    ///   object identifier is followed by a payload container.
    /// - [`ReceiptParseError::ReceiptParsingError`] or
    ///   [`ReceiptParseError::InAppPurchaseParsingError`] if the payload
    ///   doesn't describe a receipt.
    pub fn parse(&self, bytes: &[u8]) -> ParseResult<AppleReceipt> {
        debug!(target: "purchases_receipt", "parsing receipt of {} bytes", bytes.len());
        let root = self.container_builder.build(bytes)?;

        let data = ObjectIdentifier::data();
        let receipt_container = self
            .find_asn1_container(&data, &root)?
            .ok_or(ReceiptParseError::DataObjectIdentifierMissing)?;
        debug!(
            target: "purchases_receipt",
            "found receipt payload after object identifier {data}"
        );

        let receipt = self.receipt_builder.build(receipt_container)?;
        debug!(
            target: "purchases_receipt",
            "parsed receipt for {} with {} purchases",
            receipt.bundle_id,
            receipt.in_app_purchases.len()
        );
        Ok(receipt)
    }

    /// Decodes standard base64 and parses the result with [`Self::parse`].
    pub fn parse_from_base64(&self, encoded: &str) -> ParseResult<AppleReceipt> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|err| ReceiptParseError::InvalidBase64 {
                source_error_message: err.to_string(),
            })?;
        self.parse(&bytes)
    }

    /// Depth-first search for the container that directly follows an object
    /// identifier equal to `object_id` among its siblings.
    ///
    /// An identifier without a following sibling doesn't match and the
    /// search carries on. Object identifiers that fail to decode are
    /// reported as errors.
    pub fn find_asn1_container<'c, 'a>(
        &self,
        object_id: &ObjectIdentifier,
        container: &'c Asn1Container<'a>,
    ) -> ParseResult<Option<&'c Asn1Container<'a>>> {
        let Asn1Encoding::Constructed(children) = &container.encoding else {
            return Ok(None);
        };

        for (index, child) in children.iter().enumerate() {
            if child.class == Asn1Class::Universal
                && child.identifier == Asn1Identifier::ObjectIdentifier
            {
                let decoded = ObjectIdentifier::decode(child.payload)?;
                if decoded == *object_id {
                    if let Some(sibling) = children.get(index + 1) {
                        return Ok(Some(sibling));
                    }
                }
            } else if let Some(found) = self.find_asn1_container(object_id, child)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }
}
