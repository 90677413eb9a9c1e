// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! DER encoding helpers used to assemble receipts byte by byte.

#![allow(dead_code)]

pub const DATA_OID: [u64; 7] = [1, 2, 840, 113549, 1, 7, 1];
pub const SIGNED_DATA_OID: [u64; 7] = [1, 2, 840, 113549, 1, 7, 2];

fn encode_length(length: usize) -> Vec<u8> {
    if length < 0x80 {
        return vec![length as u8];
    }
    let bytes: Vec<u8> = length
        .to_be_bytes()
        .into_iter()
        .skip_while(|byte| *byte == 0)
        .collect();
    let mut encoded = vec![0x80 | bytes.len() as u8];
    encoded.extend(bytes);
    encoded
}

pub fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut encoded = vec![tag];
    encoded.extend(encode_length(content.len()));
    encoded.extend_from_slice(content);
    encoded
}

pub fn integer(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    // Drop redundant sign bytes while keeping the sign bit intact.
    while start < bytes.len() - 1 {
        let (current, next) = (bytes[start], bytes[start + 1]);
        if (current == 0x00 && next & 0x80 == 0) || (current == 0xff && next & 0x80 != 0) {
            start += 1;
        } else {
            break;
        }
    }
    tlv(0x02, &bytes[start..])
}

pub fn utf8_string(value: &str) -> Vec<u8> {
    tlv(0x0c, value.as_bytes())
}

pub fn ia5_string(value: &str) -> Vec<u8> {
    tlv(0x16, value.as_bytes())
}

pub fn octet_string(content: &[u8]) -> Vec<u8> {
    tlv(0x04, content)
}

pub fn null() -> Vec<u8> {
    tlv(0x05, &[])
}

fn concat(children: &[Vec<u8>]) -> Vec<u8> {
    children.iter().flatten().copied().collect()
}

pub fn sequence(children: &[Vec<u8>]) -> Vec<u8> {
    tlv(0x30, &concat(children))
}

pub fn set(children: &[Vec<u8>]) -> Vec<u8> {
    tlv(0x31, &concat(children))
}

/// Constructed context-specific `[0]`.
pub fn explicit_tag(children: &[Vec<u8>]) -> Vec<u8> {
    tlv(0xa0, &concat(children))
}

/// Same as [`set`] but with an indefinite length terminated by end-of-content.
pub fn indefinite_set(children: &[Vec<u8>]) -> Vec<u8> {
    let mut encoded = vec![0x31, 0x80];
    encoded.extend(concat(children));
    encoded.extend([0x00, 0x00]);
    encoded
}

pub fn object_identifier(arcs: &[u64]) -> Vec<u8> {
    let mut content = vec![(arcs[0] * 40 + arcs[1]) as u8];
    for arc in &arcs[2..] {
        let mut groups = vec![(arc & 0x7f) as u8];
        let mut rest = arc >> 7;
        while rest > 0 {
            groups.push(0x80 | (rest & 0x7f) as u8);
            rest >>= 7;
        }
        groups.reverse();
        content.extend(groups);
    }
    tlv(0x06, &content)
}

/// `SEQUENCE { INTEGER type, INTEGER version, OCTET STRING value }`.
pub fn attribute(attribute_type: i64, value: &[u8]) -> Vec<u8> {
    sequence(&[integer(attribute_type), integer(1), octet_string(value)])
}

/// Wraps a receipt attribute set the way a signed PKCS#7 envelope does.
pub fn pkcs7(receipt_set: &[u8]) -> Vec<u8> {
    sequence(&[
        object_identifier(&SIGNED_DATA_OID),
        explicit_tag(&[sequence(&[
            integer(1),
            set(&[sequence(&[object_identifier(&[2, 16, 840, 1, 101, 3, 4, 2, 1]), null()])]),
            sequence(&[
                object_identifier(&DATA_OID),
                explicit_tag(&[octet_string(receipt_set)]),
            ]),
            // certificates and signer infos are irrelevant to parsing
            explicit_tag(&[octet_string(&[0xde, 0xad, 0xbe, 0xef])]),
        ])]),
    ])
}

#[derive(Debug, Clone)]
pub struct PurchaseFixture {
    pub product_id: String,
    pub transaction_id: String,
    pub original_transaction_id: Option<String>,
    pub quantity: i64,
    pub product_type: Option<i64>,
    pub purchase_date: String,
    pub expires_date: Option<String>,
    pub cancellation_date: Option<String>,
    pub is_in_trial_period: Option<bool>,
    pub is_in_intro_offer_period: Option<bool>,
    pub web_order_line_item_id: Option<i64>,
}

impl PurchaseFixture {
    pub fn new(product_id: &str, transaction_id: &str, purchase_date: &str) -> Self {
        Self {
            product_id: product_id.to_string(),
            transaction_id: transaction_id.to_string(),
            original_transaction_id: None,
            quantity: 1,
            product_type: None,
            purchase_date: purchase_date.to_string(),
            expires_date: None,
            cancellation_date: None,
            is_in_trial_period: None,
            is_in_intro_offer_period: None,
            web_order_line_item_id: None,
        }
    }

    pub fn attributes(&self) -> Vec<Vec<u8>> {
        let mut attributes = vec![
            attribute(1701, &integer(self.quantity)),
            attribute(1702, &utf8_string(&self.product_id)),
            attribute(1703, &utf8_string(&self.transaction_id)),
            attribute(1704, &ia5_string(&self.purchase_date)),
        ];
        if let Some(original) = &self.original_transaction_id {
            attributes.push(attribute(1705, &utf8_string(original)));
        }
        if let Some(expires) = &self.expires_date {
            attributes.push(attribute(1708, &ia5_string(expires)));
        }
        if let Some(id) = self.web_order_line_item_id {
            attributes.push(attribute(1711, &integer(id)));
        }
        if let Some(cancellation) = &self.cancellation_date {
            attributes.push(attribute(1712, &ia5_string(cancellation)));
        }
        if let Some(trial) = self.is_in_trial_period {
            attributes.push(attribute(1713, &integer(trial as i64)));
        }
        if let Some(intro) = self.is_in_intro_offer_period {
            attributes.push(attribute(1719, &integer(intro as i64)));
        }
        if let Some(product_type) = self.product_type {
            attributes.push(attribute(1722, &integer(product_type)));
        }
        attributes
    }

    pub fn encode(&self) -> Vec<u8> {
        set(&self.attributes())
    }
}

#[derive(Debug, Clone)]
pub struct ReceiptFixture {
    pub bundle_id: Option<String>,
    pub application_version: String,
    pub original_application_version: Option<String>,
    pub creation_date: String,
    pub expiration_date: Option<String>,
    pub purchases: Vec<PurchaseFixture>,
    /// Extra raw attributes appended after the known ones.
    pub extra_attributes: Vec<Vec<u8>>,
}

impl Default for ReceiptFixture {
    fn default() -> Self {
        Self {
            bundle_id: Some("com.example.app".to_string()),
            application_version: "4".to_string(),
            original_application_version: Some("1.0".to_string()),
            creation_date: "2024-03-01T12:00:00Z".to_string(),
            expiration_date: None,
            purchases: Vec::new(),
            extra_attributes: Vec::new(),
        }
    }
}

impl ReceiptFixture {
    pub fn attributes(&self) -> Vec<Vec<u8>> {
        let mut attributes = Vec::new();
        if let Some(bundle_id) = &self.bundle_id {
            attributes.push(attribute(2, &utf8_string(bundle_id)));
        }
        attributes.push(attribute(3, &utf8_string(&self.application_version)));
        attributes.push(attribute(4, &[0x01, 0x02, 0x03]));
        attributes.push(attribute(5, &[0xaa; 20]));
        attributes.push(attribute(12, &ia5_string(&self.creation_date)));
        if let Some(original) = &self.original_application_version {
            attributes.push(attribute(19, &utf8_string(original)));
        }
        if let Some(expiration) = &self.expiration_date {
            attributes.push(attribute(21, &ia5_string(expiration)));
        }
        for purchase in &self.purchases {
            attributes.push(attribute(17, &purchase.encode()));
        }
        attributes.extend(self.extra_attributes.iter().cloned());
        attributes
    }

    pub fn encode(&self) -> Vec<u8> {
        pkcs7(&set(&self.attributes()))
    }
}
