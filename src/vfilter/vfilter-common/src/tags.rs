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

use crate::Action;

/// Free-form value stored by a plugin.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    ///
    Bool(bool),
    ///
    Int(i64),
    ///
    Float(f64),
    ///
    Text(String),
    ///
    List(Vec<TagValue>),
}

impl From<bool> for TagValue {
    #[inline]
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for TagValue {
    #[inline]
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for TagValue {
    #[inline]
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for TagValue {
    #[inline]
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for TagValue {
    #[inline]
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Results accumulated on a suspect while it goes through the pipeline.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Tags {
    /// engine name => virus found
    pub virus: std::collections::BTreeMap<String, bool>,
    /// engine name => spam
    pub spam: std::collections::BTreeMap<String, bool>,
    /// engine name => high score spam
    pub highspam: std::collections::BTreeMap<String, bool>,
    /// engine name => blocked content (attachment rules, ...)
    pub blocked: std::collections::BTreeMap<String, bool>,
    /// wall-clock time spent in each plugin section, in execution order
    #[serde(with = "scantimes")]
    pub scantimes: Vec<(String, std::time::Duration)>,
    /// verdict of each scanner which ran, in execution order
    pub decisions: Vec<(String, Action)>,
    /// plugin private values
    pub extra: std::collections::BTreeMap<String, TagValue>,
    /// debug output of the plugins
    pub debug: Vec<String>,
}

mod scantimes {
    pub fn serialize<S: serde::Serializer>(
        value: &[(String, std::time::Duration)],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(
            value
                .iter()
                .map(|(section, elapsed)| (section, humantime::format_duration(*elapsed).to_string())),
        )
    }
}

impl Tags {
    /// At least one engine flagged a virus.
    #[must_use]
    #[inline]
    pub fn is_virus(&self) -> bool {
        self.virus.values().any(|v| *v)
    }

    /// At least one engine flagged the message as spam.
    #[must_use]
    #[inline]
    pub fn is_spam(&self) -> bool {
        self.spam.values().any(|v| *v)
    }

    /// At least one engine flagged the message as high score spam.
    #[must_use]
    #[inline]
    pub fn is_highspam(&self) -> bool {
        self.highspam.values().any(|v| *v)
    }

    /// At least one engine blocked the content.
    #[must_use]
    #[inline]
    pub fn is_blocked(&self) -> bool {
        self.blocked.values().any(|v| *v)
    }

    /// Record the time spent in a section.
    #[inline]
    pub fn record_scantime(&mut self, section: &str, elapsed: std::time::Duration) {
        self.scantimes.push((section.to_owned(), elapsed));
    }

    /// Record the verdict of a scanner.
    #[inline]
    pub fn record_decision(&mut self, section: &str, action: Action) {
        self.decisions.push((section.to_owned(), action));
    }

    /// Last recorded verdict.
    #[must_use]
    #[inline]
    pub fn last_decision(&self) -> Option<&(String, Action)> {
        self.decisions.last()
    }

    /// Scan times formatted as `section: duration` pairs, for the logs.
    #[must_use]
    pub fn scantimes_summary(&self) -> String {
        self.scantimes
            .iter()
            .map(|(section, elapsed)| format!("{section}: {:.3}s", elapsed.as_secs_f64()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_predicates() {
        let mut tags = Tags::default();
        assert!(!tags.is_spam());

        tags.spam.insert("bayes".to_owned(), false);
        assert!(!tags.is_spam());

        tags.spam.insert("rbl".to_owned(), true);
        assert!(tags.is_spam());
        assert!(!tags.is_virus());
        assert!(!tags.is_highspam());
        assert!(!tags.is_blocked());
    }

    #[test]
    fn decisions_keep_order() {
        let mut tags = Tags::default();
        tags.record_decision("first", Action::Dunno);
        tags.record_decision("second", Action::Reject);
        assert_eq!(
            tags.last_decision(),
            Some(&("second".to_owned(), Action::Reject))
        );
    }

    #[test]
    fn serialize() {
        let mut tags = Tags::default();
        tags.extra.insert("score".to_owned(), 4.5.into());
        tags.record_scantime("debug", std::time::Duration::from_millis(1500));

        let json = serde_json::to_value(&tags).unwrap();
        assert_eq!(json["extra"]["score"], 4.5);
        assert_eq!(json["scantimes"][0][0], "debug");
        assert_eq!(json["scantimes"][0][1], "1s 500ms");
    }
}
