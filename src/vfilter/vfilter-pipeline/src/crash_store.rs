/*
 * vFilter mail filtering relay
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/

/// Phase of the pipeline a plugin failed in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr, serde::Serialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    ///
    Prepend,
    ///
    Scan,
    ///
    Append,
}

/// One plugin failure.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CrashEntry {
    /// Section of the plugin.
    pub section: String,
    ///
    pub phase: Phase,
    /// Identifier of the message being processed.
    pub suspect: String,
    ///
    pub error: String,
    ///
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: time::OffsetDateTime,
}

/// The last plugin failures, for the control channel.
#[derive(Debug)]
pub struct CrashStore {
    capacity: usize,
    entries: std::sync::Mutex<std::collections::VecDeque<CrashEntry>>,
}

impl Default for CrashStore {
    fn default() -> Self {
        Self::new(10)
    }
}

impl CrashStore {
    /// Keep the last `capacity` failures, at least one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: std::sync::Mutex::new(std::collections::VecDeque::with_capacity(capacity)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, std::collections::VecDeque<CrashEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Record a failure, dropping the oldest one if full.
    pub fn record(&self, section: &str, phase: Phase, suspect: &str, error: &dyn std::fmt::Display) {
        let mut entries = self.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(CrashEntry {
            section: section.to_owned(),
            phase,
            suspect: suspect.to_owned(),
            error: error.to_string(),
            timestamp: time::OffsetDateTime::now_utc(),
        });
    }

    /// Failures, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<CrashEntry> {
        self.lock().iter().cloned().collect()
    }

    ///
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    ///
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
