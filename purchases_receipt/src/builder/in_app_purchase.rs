// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Utc};

use super::{attributes, split_attribute};
use crate::{
    asn1::{Asn1Container, Asn1ContainerBuilder},
    bytes::{read_bool, read_date, read_int, read_string},
    InAppPurchase, InAppPurchaseProductType, ParseResult, ReceiptParseError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InAppPurchaseAttributeType {
    Quantity = 1701,
    ProductId = 1702,
    TransactionId = 1703,
    PurchaseDate = 1704,
    OriginalTransactionId = 1705,
    OriginalPurchaseDate = 1706,
    ExpiresDate = 1708,
    WebOrderLineItemId = 1711,
    CancellationDate = 1712,
    IsInTrialPeriod = 1713,
    IsInIntroOfferPeriod = 1719,
    PromotionalOfferIdentifier = 1721,
    ProductType = 1722,
}

impl InAppPurchaseAttributeType {
    fn from_number(number: i64) -> Option<Self> {
        use InAppPurchaseAttributeType::*;
        [
            Quantity,
            ProductId,
            TransactionId,
            PurchaseDate,
            OriginalTransactionId,
            OriginalPurchaseDate,
            ExpiresDate,
            WebOrderLineItemId,
            CancellationDate,
            IsInTrialPeriod,
            IsInIntroOfferPeriod,
            PromotionalOfferIdentifier,
            ProductType,
        ]
        .into_iter()
        .find(|attribute| *attribute as i64 == number)
    }
}

/// Decodes the value of an in-app purchase receipt attribute.
#[derive(Debug, Default, Clone, Copy)]
pub struct InAppPurchaseBuilder {
    container_builder: Asn1ContainerBuilder,
}

impl InAppPurchaseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// `container` is the `OCTET STRING` whose payload encodes the attribute
    /// set of a single purchase.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiptParseError::InAppPurchaseParsingError`] if any
    /// attribute is malformed or if quantity, product id, transaction id or
    /// purchase date are missing.
    pub fn build(&self, container: &Asn1Container<'_>) -> ParseResult<InAppPurchase> {
        let set = self
            .container_builder
            .build(container.payload)
            .map_err(|err| ReceiptParseError::in_app_purchase(err.to_string()))?;

        let mut quantity = None;
        let mut product_id = None;
        let mut transaction_id = None;
        let mut original_transaction_id = None;
        let mut product_type = None;
        let mut purchase_date = None;
        let mut original_purchase_date = None;
        let mut expires_date = None;
        let mut cancellation_date = None;
        let mut is_in_trial_period = None;
        let mut is_in_intro_offer_period = None;
        let mut web_order_line_item_id = None;
        let mut promotional_offer_identifier = None;

        for attribute in attributes(&set) {
            let (number, value) = split_attribute(attribute).ok_or_else(|| {
                ReceiptParseError::in_app_purchase(format!(
                    "attribute must contain 3 containers, found {}",
                    attribute.children().len()
                ))
            })?;
            let Some(attribute_type) = InAppPurchaseAttributeType::from_number(number) else {
                continue;
            };

            use InAppPurchaseAttributeType::*;
            match attribute_type {
                Quantity => quantity = Some(self.int_value(value, attribute_type)?),
                WebOrderLineItemId => {
                    web_order_line_item_id = Some(self.int_value(value, attribute_type)?)
                }
                ProductType => {
                    product_type = Some(InAppPurchaseProductType::from(
                        self.int_value(value, attribute_type)?,
                    ))
                }
                IsInTrialPeriod => {
                    is_in_trial_period = Some(self.bool_value(value, attribute_type)?)
                }
                IsInIntroOfferPeriod => {
                    is_in_intro_offer_period = Some(self.bool_value(value, attribute_type)?)
                }
                ProductId => product_id = Some(self.string_value(value, attribute_type)?),
                TransactionId => transaction_id = Some(self.string_value(value, attribute_type)?),
                OriginalTransactionId => {
                    original_transaction_id = Some(self.string_value(value, attribute_type)?)
                }
                PromotionalOfferIdentifier => {
                    promotional_offer_identifier = Some(self.string_value(value, attribute_type)?)
                }
                PurchaseDate => purchase_date = self.date_value(value, attribute_type)?,
                OriginalPurchaseDate => {
                    original_purchase_date = self.date_value(value, attribute_type)?
                }
                ExpiresDate => expires_date = self.date_value(value, attribute_type)?,
                CancellationDate => cancellation_date = self.date_value(value, attribute_type)?,
            }
        }

        let missing = |field: &str| {
            ReceiptParseError::in_app_purchase(format!("missing required attribute {field}"))
        };
        Ok(InAppPurchase {
            quantity: quantity.ok_or_else(|| missing("quantity"))?,
            product_id: product_id.ok_or_else(|| missing("product id"))?,
            transaction_id: transaction_id.ok_or_else(|| missing("transaction id"))?,
            original_transaction_id,
            product_type: product_type.unwrap_or(InAppPurchaseProductType::Unknown),
            purchase_date: purchase_date.ok_or_else(|| missing("purchase date"))?,
            original_purchase_date,
            expires_date,
            cancellation_date,
            is_in_trial_period,
            is_in_intro_offer_period,
            web_order_line_item_id,
            promotional_offer_identifier,
        })
    }

    fn int_value(
        &self,
        value: &Asn1Container<'_>,
        attribute_type: InAppPurchaseAttributeType,
    ) -> ParseResult<i64> {
        let inner = self.inner_payload(value, attribute_type)?;
        read_int(inner).ok_or_else(|| invalid(attribute_type, "integer"))
    }

    fn bool_value(
        &self,
        value: &Asn1Container<'_>,
        attribute_type: InAppPurchaseAttributeType,
    ) -> ParseResult<bool> {
        let inner = self.inner_payload(value, attribute_type)?;
        read_bool(inner).ok_or_else(|| invalid(attribute_type, "boolean"))
    }

    fn string_value(
        &self,
        value: &Asn1Container<'_>,
        attribute_type: InAppPurchaseAttributeType,
    ) -> ParseResult<String> {
        let inner = self.inner_payload(value, attribute_type)?;
        read_string(inner).ok_or_else(|| invalid(attribute_type, "string"))
    }

    fn date_value(
        &self,
        value: &Asn1Container<'_>,
        attribute_type: InAppPurchaseAttributeType,
    ) -> ParseResult<Option<DateTime<Utc>>> {
        let inner = self.inner_payload(value, attribute_type)?;
        read_date(inner).map_err(|err| {
            ReceiptParseError::in_app_purchase(format!("{attribute_type:?}: {err}"))
        })
    }

    /// Values are themselves DER encoded inside the attribute's octet string.
    fn inner_payload<'a>(
        &self,
        value: &Asn1Container<'a>,
        attribute_type: InAppPurchaseAttributeType,
    ) -> ParseResult<&'a [u8]> {
        self.container_builder
            .build(value.payload)
            .map(|inner| inner.payload)
            .map_err(|err| ReceiptParseError::in_app_purchase(format!("{attribute_type:?}: {err}")))
    }
}

fn invalid(attribute_type: InAppPurchaseAttributeType, kind: &str) -> ReceiptParseError {
    ReceiptParseError::in_app_purchase(format!("{attribute_type:?} is not a valid {kind}"))
}
