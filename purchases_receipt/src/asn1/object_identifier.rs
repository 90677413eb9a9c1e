// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use crate::{ParseResult, ReceiptParseError};

/// A decoded ASN.1 object identifier, kept as its list of arcs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectIdentifier(Vec<u64>);

impl ObjectIdentifier {
    /// PKCS#7 `data`, the content type wrapping the receipt payload.
    pub const DATA: [u64; 7] = [1, 2, 840, 113549, 1, 7, 1];
    /// PKCS#7 `signedData`, the content type of the outer receipt envelope.
    pub const SIGNED_DATA: [u64; 7] = [1, 2, 840, 113549, 1, 7, 2];

    pub fn from_arcs(arcs: &[u64]) -> Self {
        Self(arcs.to_vec())
    }

    pub fn data() -> Self {
        Self::from_arcs(&Self::DATA)
    }

    pub fn signed_data() -> Self {
        Self::from_arcs(&Self::SIGNED_DATA)
    }

    pub fn arcs(&self) -> &[u64] {
        &self.0
    }

    /// Decodes the payload of an `OBJECT IDENTIFIER` container.
    ///
    /// Each sub-identifier is a base-128 number whose continuation bit is the
    /// high bit of every byte but the last. The first sub-identifier packs the
    /// first two arcs as `40 * first + second`.
    pub fn decode(payload: &[u8]) -> ParseResult<Self> {
        if payload.is_empty() {
            return Err(ReceiptParseError::asn1("object identifier payload is empty"));
        }

        let mut sub_identifiers = Vec::new();
        let mut current: u64 = 0;
        let mut pending = false;
        for byte in payload {
            if current > (u64::MAX >> 7) {
                return Err(ReceiptParseError::asn1(
                    "object identifier arc does not fit in 64 bits",
                ));
            }
            current = (current << 7) | u64::from(byte & 0x7f);
            pending = byte & 0x80 != 0;
            if !pending {
                sub_identifiers.push(current);
                current = 0;
            }
        }
        if pending {
            return Err(ReceiptParseError::asn1("object identifier is truncated"));
        }

        let mut arcs = Vec::with_capacity(sub_identifiers.len() + 1);
        let first = sub_identifiers[0];
        match first {
            0..=39 => arcs.extend([0, first]),
            40..=79 => arcs.extend([1, first - 40]),
            _ => arcs.extend([2, first - 80]),
        }
        arcs.extend_from_slice(&sub_identifiers[1..]);
        Ok(Self(arcs))
    }
}

impl PartialEq<[u64]> for ObjectIdentifier {
    fn eq(&self, other: &[u64]) -> bool {
        self.0 == other
    }
}

impl fmt::Display for ObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut arcs = self.0.iter();
        if let Some(first) = arcs.next() {
            write!(f, "{first}")?;
        }
        for arc in arcs {
            write!(f, ".{arc}")?;
        }
        Ok(())
    }
}
