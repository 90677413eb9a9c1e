// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::CustomerInfo;

/// Result of identifying as a new app user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogInResponse {
    pub customer_info: CustomerInfo,
    /// `true` when the backend had never seen the new app user id.
    pub created: bool,
}
