// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Conversions from raw attribute payloads to Rust values.

use chrono::{DateTime, Utc};

/// Big-endian two's complement integer of at most 8 bytes.
pub(crate) fn read_int(bytes: &[u8]) -> Option<i64> {
    if bytes.is_empty() || bytes.len() > 8 {
        return None;
    }
    let sign_extension = if bytes[0] & 0x80 != 0 { -1i64 } else { 0 };
    Some(
        bytes
            .iter()
            .fold(sign_extension, |acc, byte| (acc << 8) | i64::from(*byte)),
    )
}

pub(crate) fn read_bool(bytes: &[u8]) -> Option<bool> {
    read_int(bytes).map(|value| value != 0)
}

pub(crate) fn read_string(bytes: &[u8]) -> Option<String> {
    std::str::from_utf8(bytes).ok().map(str::to_owned)
}

/// Receipt dates are RFC 3339 strings. An empty string means the date is absent.
pub(crate) fn read_date(bytes: &[u8]) -> Result<Option<DateTime<Utc>>, String> {
    let text = std::str::from_utf8(bytes).map_err(|err| err.to_string())?;
    if text.is_empty() {
        return Ok(None);
    }
    DateTime::parse_from_rfc3339(text)
        .map(|date| Some(date.with_timezone(&Utc)))
        .map_err(|err| format!("invalid date {text:?}: {err}"))
}
