// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::{sync::Arc, sync::Mutex, time::Duration};

use chrono::{DateTime, Utc};

use super::is_stale;
use crate::date_provider::DateProvider;

#[derive(Debug)]
struct CachedState<T> {
    value: Option<T>,
    last_updated_at: Option<DateTime<Utc>>,
}

/// A value cached for the lifetime of the process, with its own timestamp.
#[derive(Debug)]
pub struct InMemoryCachedObject<T> {
    state: Mutex<CachedState<T>>,
    date_provider: Arc<dyn DateProvider>,
}

impl<T: Clone> InMemoryCachedObject<T> {
    pub fn new(date_provider: Arc<dyn DateProvider>) -> Self {
        Self {
            state: Mutex::new(CachedState {
                value: None,
                last_updated_at: None,
            }),
            date_provider,
        }
    }

    pub fn cache(&self, value: T) {
        let now = self.date_provider.now();
        let mut state = self.state.lock().unwrap();
        state.value = Some(value);
        state.last_updated_at = Some(now);
    }

    pub fn cached_instance(&self) -> Option<T> {
        self.state.lock().unwrap().value.clone()
    }

    pub fn has_cached_instance(&self) -> bool {
        self.state.lock().unwrap().value.is_some()
    }

    pub fn last_updated_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().unwrap().last_updated_at
    }

    /// Stale when nothing was ever cached or `duration` has elapsed.
    pub fn is_cache_stale(&self, duration: Duration) -> bool {
        is_stale(self.last_updated_at(), duration, self.date_provider.now())
    }

    pub fn clear_cache(&self) {
        let mut state = self.state.lock().unwrap();
        state.value = None;
        state.last_updated_at = None;
    }

    /// Keeps the value but makes it stale.
    pub fn clear_cache_timestamp(&self) {
        self.state.lock().unwrap().last_updated_at = None;
    }

    pub fn update_cache_timestamp(&self, date: DateTime<Utc>) {
        self.state.lock().unwrap().last_updated_at = Some(date);
    }
}
