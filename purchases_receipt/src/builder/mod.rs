// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Receipt builders
//!
//! Receipt fields are stored as a `SET` of attribute `SEQUENCE`s, each made
//! of exactly three containers: an `INTEGER` attribute number, an `INTEGER`
//! version, and an `OCTET STRING` holding the value. The numbers follow
//! Apple's receipt schema; unknown numbers are ignored so that new fields do
//! not break older parsers.

mod apple_receipt;
mod in_app_purchase;

pub use apple_receipt::AppleReceiptBuilder;
pub use in_app_purchase::InAppPurchaseBuilder;

use crate::{asn1::Asn1Container, bytes::read_int};

/// Splits an attribute sequence into its number and value container.
///
/// Returns `None` when the sequence doesn't have the expected shape.
fn split_attribute<'c, 'a>(
    attribute: &'c Asn1Container<'a>,
) -> Option<(i64, &'c Asn1Container<'a>)> {
    match attribute.children() {
        [type_container, _version, value_container] => {
            read_int(type_container.payload).map(|number| (number, value_container))
        }
        _ => None,
    }
}

/// Attribute containers of a decoded attribute set, without the trailing
/// end-of-content marker of indefinite-length sets.
fn attributes<'c, 'a>(set: &'c Asn1Container<'a>) -> impl Iterator<Item = &'c Asn1Container<'a>> {
    set.children()
        .iter()
        .filter(|child| !child.is_end_of_content())
}
