// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Logging collaborator handed to every component.
//!
//! There is no global log level inside the library. Each component receives a
//! [`Logger`] at construction time and filters its own messages before they
//! reach the [`log`] facade. The host application decides where messages end
//! up by installing a `log` compatible subscriber.

use std::fmt::Display;

use log::{Level, LevelFilter};
use serde::{Deserialize, Serialize};
use strum::{Display as StrumDisplay, EnumString};

#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    StrumDisplay,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogLevel {
    Verbose,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Verbose => LevelFilter::Trace,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Error => LevelFilter::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Logger {
    level: LevelFilter,
    target: String,
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(LogLevel::default())
    }
}

impl Logger {
    pub const DEFAULT_TARGET: &'static str = "purchases";

    pub fn new(level: LogLevel) -> Self {
        Self {
            level: level.into(),
            target: Self::DEFAULT_TARGET.to_owned(),
        }
    }

    /// Same level, messages tagged with `target` instead.
    pub fn with_target(&self, target: impl Into<String>) -> Self {
        Self {
            level: self.level,
            target: target.into(),
        }
    }

    pub fn level(&self) -> LevelFilter {
        self.level
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn enabled(&self, level: Level) -> bool {
        level <= self.level
    }

    pub fn log(&self, level: Level, message: impl Display) {
        if self.enabled(level) {
            log::log!(target: self.target.as_str(), level, "{message}");
        }
    }

    pub fn verbose(&self, message: impl Display) {
        self.log(Level::Trace, message);
    }

    pub fn debug(&self, message: impl Display) {
        self.log(Level::Debug, message);
    }

    pub fn info(&self, message: impl Display) {
        self.log(Level::Info, message);
    }

    pub fn warn(&self, message: impl Display) {
        self.log(Level::Warn, message);
    }

    pub fn error(&self, message: impl Display) {
        self.log(Level::Error, message);
    }
}
