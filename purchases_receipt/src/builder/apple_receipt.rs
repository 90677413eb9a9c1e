// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Utc};
use log::trace;

use super::{attributes, split_attribute, InAppPurchaseBuilder};
use crate::{
    asn1::{Asn1Container, Asn1ContainerBuilder},
    bytes::{read_date, read_string},
    AppleReceipt, ParseResult, ReceiptParseError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReceiptAttributeType {
    BundleId = 2,
    ApplicationVersion = 3,
    OpaqueValue = 4,
    Sha1Hash = 5,
    CreationDate = 12,
    InAppPurchase = 17,
    OriginalApplicationVersion = 19,
    ExpirationDate = 21,
}

impl ReceiptAttributeType {
    fn from_number(number: i64) -> Option<Self> {
        use ReceiptAttributeType::*;
        [
            BundleId,
            ApplicationVersion,
            OpaqueValue,
            Sha1Hash,
            CreationDate,
            InAppPurchase,
            OriginalApplicationVersion,
            ExpirationDate,
        ]
        .into_iter()
        .find(|attribute| *attribute as i64 == number)
    }
}

/// Interprets the receipt payload container as an [`AppleReceipt`].
#[derive(Debug, Default, Clone, Copy)]
pub struct AppleReceiptBuilder {
    container_builder: Asn1ContainerBuilder,
    in_app_purchase_builder: InAppPurchaseBuilder,
}

impl AppleReceiptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// `container` is the sibling of the `data` object identifier. Its first
    /// child is an `OCTET STRING` whose payload is the receipt attribute set.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiptParseError::ReceiptParsingError`] when the payload has
    /// an unexpected shape or a required attribute (bundle id, application
    /// version, opaque value, SHA-1 hash, creation date) is missing, and
    /// [`ReceiptParseError::InAppPurchaseParsingError`] when one of the
    /// purchases can't be decoded.
    pub fn build(&self, container: &Asn1Container<'_>) -> ParseResult<AppleReceipt> {
        let octet_string = container
            .children()
            .first()
            .ok_or_else(|| ReceiptParseError::receipt("receipt payload container is empty"))?;
        let set = self
            .container_builder
            .build(octet_string.payload)
            .map_err(|err| ReceiptParseError::receipt(err.to_string()))?;

        let mut bundle_id = None;
        let mut application_version = None;
        let mut original_application_version = None;
        let mut opaque_value = None;
        let mut sha1_hash = None;
        let mut creation_date = None;
        let mut expiration_date = None;
        let mut in_app_purchases = Vec::new();

        for attribute in attributes(&set) {
            let (number, value) = split_attribute(attribute).ok_or_else(|| {
                ReceiptParseError::receipt(format!(
                    "attribute must contain 3 containers, found {}",
                    attribute.children().len()
                ))
            })?;
            let Some(attribute_type) = ReceiptAttributeType::from_number(number) else {
                trace!(target: "purchases_receipt", "skipping unknown receipt attribute {number}");
                continue;
            };

            match attribute_type {
                ReceiptAttributeType::OpaqueValue => opaque_value = Some(value.payload.to_vec()),
                ReceiptAttributeType::Sha1Hash => sha1_hash = Some(value.payload.to_vec()),
                ReceiptAttributeType::BundleId => {
                    bundle_id = Some(self.string_value(value, attribute_type)?)
                }
                ReceiptAttributeType::ApplicationVersion => {
                    application_version = Some(self.string_value(value, attribute_type)?)
                }
                ReceiptAttributeType::OriginalApplicationVersion => {
                    original_application_version = Some(self.string_value(value, attribute_type)?)
                }
                ReceiptAttributeType::CreationDate => {
                    creation_date = self.date_value(value, attribute_type)?
                }
                ReceiptAttributeType::ExpirationDate => {
                    expiration_date = self.date_value(value, attribute_type)?
                }
                ReceiptAttributeType::InAppPurchase => {
                    in_app_purchases.push(self.in_app_purchase_builder.build(value)?)
                }
            }
        }

        let missing = |field: &str| {
            ReceiptParseError::receipt(format!("missing required attribute {field}"))
        };
        Ok(AppleReceipt {
            bundle_id: bundle_id.ok_or_else(|| missing("bundle id"))?,
            application_version: application_version
                .ok_or_else(|| missing("application version"))?,
            original_application_version,
            opaque_value: opaque_value.ok_or_else(|| missing("opaque value"))?,
            sha1_hash: sha1_hash.ok_or_else(|| missing("sha1 hash"))?,
            creation_date: creation_date.ok_or_else(|| missing("creation date"))?,
            expiration_date,
            in_app_purchases,
        })
    }

    fn string_value(
        &self,
        value: &Asn1Container<'_>,
        attribute_type: ReceiptAttributeType,
    ) -> ParseResult<String> {
        let inner = self.inner_payload(value, attribute_type)?;
        read_string(inner).ok_or_else(|| {
            ReceiptParseError::receipt(format!("{attribute_type:?} is not a valid string"))
        })
    }

    fn date_value(
        &self,
        value: &Asn1Container<'_>,
        attribute_type: ReceiptAttributeType,
    ) -> ParseResult<Option<DateTime<Utc>>> {
        let inner = self.inner_payload(value, attribute_type)?;
        read_date(inner)
            .map_err(|err| ReceiptParseError::receipt(format!("{attribute_type:?}: {err}")))
    }

    fn inner_payload<'a>(
        &self,
        value: &Asn1Container<'a>,
        attribute_type: ReceiptAttributeType,
    ) -> ParseResult<&'a [u8]> {
        self.container_builder
            .build(value.payload)
            .map(|inner| inner.payload)
            .map_err(|err| ReceiptParseError::receipt(format!("{attribute_type:?}: {err}")))
    }
}
