// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! # ASN.1 containers
//!
//! A DER stream is a tree of tag-length-value nodes. Each node is decoded into
//! an [`Asn1Container`] that borrows its payload from the original buffer.
//! Whether a node has children is expressed by [`Asn1Encoding`]: only
//! [`Asn1Encoding::Constructed`] carries them.

mod builder;
mod object_identifier;

pub use builder::Asn1ContainerBuilder;
pub use object_identifier::ObjectIdentifier;

use crate::{ParseResult, ReceiptParseError};

/// Tag class, stored in the two high bits of the identifier byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Asn1Class {
    Universal,
    Application,
    ContextSpecific,
    Private,
}

impl Asn1Class {
    pub(crate) fn from_identifier_byte(byte: u8) -> Self {
        match byte >> 6 {
            0 => Asn1Class::Universal,
            1 => Asn1Class::Application,
            2 => Asn1Class::ContextSpecific,
            _ => Asn1Class::Private,
        }
    }
}

/// Tag number, stored in the five low bits of the identifier byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Asn1Identifier {
    EndOfContent = 0,
    Boolean = 1,
    Integer = 2,
    BitString = 3,
    OctetString = 4,
    Null = 5,
    ObjectIdentifier = 6,
    ObjectDescriptor = 7,
    External = 8,
    Real = 9,
    Enumerated = 10,
    EmbeddedPdv = 11,
    Utf8String = 12,
    RelativeOid = 13,
    Sequence = 16,
    Set = 17,
    NumericString = 18,
    PrintableString = 19,
    T61String = 20,
    VideotexString = 21,
    Ia5String = 22,
    UtcTime = 23,
    GeneralizedTime = 24,
    GraphicString = 25,
    VisibleString = 26,
    GeneralString = 27,
    UniversalString = 28,
    CharacterString = 29,
    BmpString = 30,
}

impl TryFrom<u8> for Asn1Identifier {
    type Error = ReceiptParseError;

    fn try_from(value: u8) -> ParseResult<Self> {
        use Asn1Identifier::*;
        let identifier = match value {
            0 => EndOfContent,
            1 => Boolean,
            2 => Integer,
            3 => BitString,
            4 => OctetString,
            5 => Null,
            6 => ObjectIdentifier,
            7 => ObjectDescriptor,
            8 => External,
            9 => Real,
            10 => Enumerated,
            11 => EmbeddedPdv,
            12 => Utf8String,
            13 => RelativeOid,
            16 => Sequence,
            17 => Set,
            18 => NumericString,
            19 => PrintableString,
            20 => T61String,
            21 => VideotexString,
            22 => Ia5String,
            23 => UtcTime,
            24 => GeneralizedTime,
            25 => GraphicString,
            26 => VisibleString,
            27 => GeneralString,
            28 => UniversalString,
            29 => CharacterString,
            30 => BmpString,
            other => {
                return Err(ReceiptParseError::asn1(format!(
                    "couldn't determine identifier for tag number {other}"
                )))
            }
        };
        Ok(identifier)
    }
}

/// How the length of a container was expressed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthDefinition {
    Definite,
    /// Contents run until an end-of-content container. StoreKit test
    /// receipts encode constructed containers this way.
    Indefinite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Asn1Length {
    /// Number of payload bytes.
    pub value: usize,
    /// Number of bytes the length itself took, including the first length byte.
    pub bytes_used_for_length: usize,
    pub definition: LengthDefinition,
}

/// Primitive containers hold raw bytes, constructed ones hold more containers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Asn1Encoding<'a> {
    Primitive,
    Constructed(Vec<Asn1Container<'a>>),
}

/// One decoded tag-length-value node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asn1Container<'a> {
    pub class: Asn1Class,
    pub identifier: Asn1Identifier,
    pub length: Asn1Length,
    /// The value bytes of this node, borrowed from the parsed buffer.
    pub payload: &'a [u8],
    pub encoding: Asn1Encoding<'a>,
}

impl<'a> Asn1Container<'a> {
    /// Children of a constructed container, empty for primitive ones.
    pub fn children(&self) -> &[Asn1Container<'a>] {
        match &self.encoding {
            Asn1Encoding::Primitive => &[],
            Asn1Encoding::Constructed(children) => children,
        }
    }

    pub fn is_constructed(&self) -> bool {
        matches!(self.encoding, Asn1Encoding::Constructed(_))
    }

    /// Identifier byte, length bytes and payload.
    pub fn total_bytes_used(&self) -> usize {
        1 + self.length.bytes_used_for_length + self.length.value
    }

    pub(crate) fn is_end_of_content(&self) -> bool {
        self.class == Asn1Class::Universal && self.identifier == Asn1Identifier::EndOfContent
    }
}
