// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Tunables shared by the caching and networking layers.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::logger::{LogLevel, Logger};

const FIVE_MINUTES: Duration = Duration::from_secs(5 * 60);
const TWENTY_FIVE_HOURS: Duration = Duration::from_secs(25 * 60 * 60);

/// Whether the host application is currently visible to the user.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    #[default]
    Foreground,
    Background,
}

/// How long a cached value stays fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheDurations {
    pub foreground: Duration,
    pub background: Duration,
    /// Sandbox purchases renew within minutes, so both app states share it.
    pub sandbox: Duration,
}

impl Default for CacheDurations {
    fn default() -> Self {
        Self {
            foreground: FIVE_MINUTES,
            background: TWENTY_FIVE_HOURS,
            sandbox: FIVE_MINUTES,
        }
    }
}

impl CacheDurations {
    pub fn duration(&self, app_status: AppStatus, is_sandbox: bool) -> Duration {
        match (is_sandbox, app_status) {
            (true, _) => self.sandbox,
            (false, AppStatus::Foreground) => self.foreground,
            (false, AppStatus::Background) => self.background,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PurchasesConfig {
    pub customer_info_cache: CacheDurations,
    pub offerings_cache: CacheDurations,
    pub is_sandbox: bool,
    /// Upper bound for a single backend round trip.
    pub request_timeout: Duration,
    /// Jitter applied to customer info requests issued while in background.
    pub max_random_delay: Duration,
    pub log_level: LogLevel,
}

impl Default for PurchasesConfig {
    fn default() -> Self {
        Self {
            customer_info_cache: CacheDurations::default(),
            offerings_cache: CacheDurations::default(),
            is_sandbox: false,
            request_timeout: Duration::from_secs(60),
            max_random_delay: Duration::from_secs(5),
            log_level: LogLevel::default(),
        }
    }
}

impl PurchasesConfig {
    pub fn customer_info_cache_duration(&self, app_status: AppStatus) -> Duration {
        self.customer_info_cache
            .duration(app_status, self.is_sandbox)
    }

    pub fn offerings_cache_duration(&self, app_status: AppStatus) -> Duration {
        self.offerings_cache.duration(app_status, self.is_sandbox)
    }

    pub fn logger(&self) -> Logger {
        Logger::new(self.log_level)
    }
}
