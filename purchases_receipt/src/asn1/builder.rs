// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::{
    Asn1Class, Asn1Container, Asn1Encoding, Asn1Identifier, Asn1Length, LengthDefinition,
};
use crate::{ParseResult, ReceiptParseError};

const CONSTRUCTED_BIT: u8 = 0b0010_0000;
const TAG_NUMBER_MASK: u8 = 0b0001_1111;
const LONG_FORM_BIT: u8 = 0b1000_0000;

/// Nesting limit, well above the depth of any real receipt.
const MAX_DEPTH: usize = 64;

enum RawLength {
    Definite { value: usize, bytes_used: usize },
    Indefinite,
}

/// Decodes a DER byte stream into a tree of [`Asn1Container`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct Asn1ContainerBuilder;

impl Asn1ContainerBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Builds the container starting at the first byte of `payload`.
    ///
    /// Trailing bytes after the first container are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiptParseError::Asn1ParsingError`] if the identifier or
    /// length bytes are malformed or the stream is shorter than the lengths
    /// it declares.
    pub fn build<'a>(&self, payload: &'a [u8]) -> ParseResult<Asn1Container<'a>> {
        self.build_at_depth(payload, 0)
    }

    fn build_at_depth<'a>(
        &self,
        payload: &'a [u8],
        depth: usize,
    ) -> ParseResult<Asn1Container<'a>> {
        if depth > MAX_DEPTH {
            return Err(ReceiptParseError::asn1(format!(
                "containers are nested deeper than {MAX_DEPTH} levels"
            )));
        }
        if payload.len() < 2 {
            return Err(ReceiptParseError::asn1(
                "payload needs to be at least 2 bytes long",
            ));
        }

        let identifier_byte = payload[0];
        let class = Asn1Class::from_identifier_byte(identifier_byte);
        let identifier = Asn1Identifier::try_from(identifier_byte & TAG_NUMBER_MASK)?;
        let is_constructed = identifier_byte & CONSTRUCTED_BIT != 0;

        match (Self::extract_length(&payload[1..])?, is_constructed) {
            (RawLength::Definite { value, bytes_used }, _) => {
                let header_len = 1 + bytes_used;
                if payload.len() - header_len < value {
                    return Err(ReceiptParseError::asn1(format!(
                        "payload is shorter than length value ({} < {value})",
                        payload.len() - header_len
                    )));
                }
                let internal_payload = &payload[header_len..header_len + value];
                let encoding = if is_constructed {
                    Asn1Encoding::Constructed(self.build_children(internal_payload, depth + 1)?)
                } else {
                    Asn1Encoding::Primitive
                };
                Ok(Asn1Container {
                    class,
                    identifier,
                    length: Asn1Length {
                        value,
                        bytes_used_for_length: bytes_used,
                        definition: LengthDefinition::Definite,
                    },
                    payload: internal_payload,
                    encoding,
                })
            }
            (RawLength::Indefinite, true) => {
                let header_len = 2;
                let children = self.build_children(&payload[header_len..], depth + 1)?;
                let value = children.iter().map(Asn1Container::total_bytes_used).sum();
                Ok(Asn1Container {
                    class,
                    identifier,
                    length: Asn1Length {
                        value,
                        bytes_used_for_length: 1,
                        definition: LengthDefinition::Indefinite,
                    },
                    payload: &payload[header_len..header_len + value],
                    encoding: Asn1Encoding::Constructed(children),
                })
            }
            (RawLength::Indefinite, false) => Err(ReceiptParseError::asn1(
                "indefinite length is only valid for constructed containers",
            )),
        }
    }

    /// Builds sibling containers until the payload is exhausted or an
    /// end-of-content container is reached. The end-of-content container is
    /// kept as the last child.
    fn build_children<'a>(
        &self,
        mut payload: &'a [u8],
        depth: usize,
    ) -> ParseResult<Vec<Asn1Container<'a>>> {
        let mut children = Vec::new();
        while !payload.is_empty() {
            let child = self.build_at_depth(payload, depth)?;
            let bytes_used = child.total_bytes_used();
            let reached_end = child.is_end_of_content();
            children.push(child);
            if reached_end {
                break;
            }
            payload = &payload[bytes_used..];
        }
        Ok(children)
    }

    fn extract_length(data: &[u8]) -> ParseResult<RawLength> {
        let Some(&first_byte) = data.first() else {
            return Err(ReceiptParseError::asn1(
                "length needs to be at least one byte",
            ));
        };

        if first_byte & LONG_FORM_BIT == 0 {
            return Ok(RawLength::Definite {
                value: usize::from(first_byte),
                bytes_used: 1,
            });
        }

        let total_length_bytes = usize::from(first_byte & !LONG_FORM_BIT);
        if total_length_bytes == 0 {
            return Ok(RawLength::Indefinite);
        }
        if total_length_bytes > std::mem::size_of::<usize>() {
            return Err(ReceiptParseError::asn1(format!(
                "non-conformant length: {total_length_bytes} length bytes"
            )));
        }
        let length_bytes = data
            .get(1..=total_length_bytes)
            .ok_or_else(|| ReceiptParseError::asn1("length bytes are truncated"))?;
        let value = length_bytes
            .iter()
            .fold(0usize, |acc, byte| (acc << 8) | usize::from(*byte));

        Ok(RawLength::Definite {
            value,
            bytes_used: 1 + total_length_bytes,
        })
    }
}
