// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Source of the current time, injectable so staleness can be tested.

use std::{fmt::Debug, sync::Mutex};

use chrono::{DateTime, Duration, Utc};

pub trait DateProvider: Debug + Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDateProvider;

impl DateProvider for SystemDateProvider {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct MockDateProvider {
    now: Mutex<DateTime<Utc>>,
}

impl MockDateProvider {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl DateProvider for MockDateProvider {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
