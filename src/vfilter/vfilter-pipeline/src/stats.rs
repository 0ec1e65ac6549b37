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

use vfilter_common::Action;

#[derive(Debug, Default, Clone, Copy)]
struct ScanTime {
    count: u64,
    total: std::time::Duration,
}

/// Counters of the processed messages, shared by the stats appender and the
/// control channel.
#[derive(Debug)]
pub struct StatsKeeper {
    started: std::time::Instant,
    actions: [std::sync::atomic::AtomicU64; 5],
    scantimes: std::sync::Mutex<std::collections::BTreeMap<String, ScanTime>>,
}

/// Content of the counters at one instant.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StatsSnapshot {
    /// Messages disposed of.
    pub total: u64,
    /// Per final action.
    pub actions: std::collections::BTreeMap<String, u64>,
    /// Mean time spent in each section, in milliseconds.
    pub average_scantime_ms: std::collections::BTreeMap<String, u128>,
}

impl Default for StatsKeeper {
    fn default() -> Self {
        Self {
            started: std::time::Instant::now(),
            actions: Default::default(),
            scantimes: std::sync::Mutex::default(),
        }
    }
}

impl StatsKeeper {
    /// Count a disposed message.
    pub fn record_action(&self, action: Action) {
        self.actions[usize::from(action.code())].fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    /// Add the time spent by a section on a message.
    pub fn record_scantime(&self, section: &str, elapsed: std::time::Duration) {
        let mut scantimes = self
            .scantimes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let entry = scantimes.entry(section.to_owned()).or_default();
        entry.count += 1;
        entry.total += elapsed;
    }

    /// Time since the keeper was created.
    #[must_use]
    pub fn uptime(&self) -> std::time::Duration {
        self.started.elapsed()
    }

    ///
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        let actions = [
            Action::Dunno,
            Action::Accept,
            Action::Delete,
            Action::Reject,
            Action::Defer,
        ]
        .into_iter()
        .map(|action| {
            (
                action.to_string(),
                self.actions[usize::from(action.code())].load(std::sync::atomic::Ordering::Relaxed),
            )
        })
        .collect::<std::collections::BTreeMap<_, _>>();

        let average_scantime_ms = self
            .scantimes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .map(|(section, time)| {
                (
                    section.clone(),
                    time.total.as_millis() / u128::from(time.count.max(1)),
                )
            })
            .collect();

        StatsSnapshot {
            total: actions.values().sum(),
            actions,
            average_scantime_ms,
        }
    }
}
