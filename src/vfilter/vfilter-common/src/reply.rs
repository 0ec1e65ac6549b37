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

/// Three digit reply code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReplyCode(u16);

impl ReplyCode {
    /// Build a code, `None` if not in `200..=599`.
    #[must_use]
    #[inline]
    pub const fn new(code: u16) -> Option<Self> {
        if code >= 200 && code <= 599 {
            Some(Self(code))
        } else {
            None
        }
    }

    /// Numeric value.
    #[must_use]
    #[inline]
    pub const fn value(self) -> u16 {
        self.0
    }

    /// 2xx and 3xx.
    #[must_use]
    #[inline]
    pub const fn is_positive(self) -> bool {
        self.0 < 400
    }

    /// 4xx or 5xx.
    #[must_use]
    #[inline]
    pub const fn is_error(self) -> bool {
        self.0 >= 400
    }

    /// 4xx.
    #[must_use]
    #[inline]
    pub const fn is_transient(self) -> bool {
        self.0 >= 400 && self.0 < 500
    }

    /// 5xx.
    #[must_use]
    #[inline]
    pub const fn is_permanent(self) -> bool {
        self.0 >= 500
    }
}

impl std::fmt::Display for ReplyCode {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Failure to read a reply produced by a peer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ReplyParseError {
    /// No line at all.
    #[error("empty reply")]
    Empty,
    /// A line does not start with a valid three digit code.
    #[error("invalid reply code in line '{line}'")]
    InvalidCode {
        /// faulty line
        line: String,
    },
    /// The fourth character of a line is neither a space nor a dash.
    #[error("invalid separator in line '{line}'")]
    InvalidSeparator {
        /// faulty line
        line: String,
    },
}

/// A reply sent by a server, possibly spread on several lines.
///
/// The text is stored line by line without code nor separator, and
/// re-emitted with the `code-text` / `code text` continuation grammar.
#[derive(Debug, Clone, PartialEq, Eq, serde_with::SerializeDisplay, serde_with::DeserializeFromStr)]
pub struct Reply {
    code: ReplyCode,
    lines: Vec<String>,
}

impl Reply {
    /// Create a reply, `text` is split on line breaks.
    ///
    /// # Panics
    ///
    /// * `code` is not in `200..=599`
    #[must_use]
    #[inline]
    #[allow(clippy::expect_used)]
    pub fn new(code: u16, text: impl AsRef<str>) -> Self {
        Self::with_code(ReplyCode::new(code).expect("reply code in 200..=599"), text)
    }

    /// Create a reply with an already validated code.
    #[must_use]
    #[inline]
    pub fn with_code(code: ReplyCode, text: impl AsRef<str>) -> Self {
        let lines = text
            .as_ref()
            .lines()
            .map(str::to_owned)
            .collect::<Vec<_>>();
        Self {
            code,
            lines: if lines.is_empty() {
                vec![String::new()]
            } else {
                lines
            },
        }
    }

    /// Code of the reply.
    #[must_use]
    #[inline]
    pub const fn code(&self) -> ReplyCode {
        self.code
    }

    /// Lines of text, without code nor separator.
    #[must_use]
    #[inline]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Text of the reply, lines joined with a space.
    #[must_use]
    #[inline]
    pub fn text(&self) -> String {
        self.lines.join(" ")
    }

    /// Same text with another code.
    #[must_use]
    #[inline]
    pub fn recode(mut self, code: ReplyCode) -> Self {
        self.code = code;
        self
    }

    /// Prepend `prefix` to the first line of text.
    #[must_use]
    #[inline]
    pub fn prefixed(mut self, prefix: &str) -> Self {
        if let Some(first) = self.lines.first_mut() {
            first.insert_str(0, prefix);
        }
        self
    }
}

impl std::fmt::Display for Reply {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let last = self.lines.len().saturating_sub(1);
        for (idx, line) in self.lines.iter().enumerate() {
            let separator = if idx == last { ' ' } else { '-' };
            write!(f, "{}{separator}{line}\r\n", self.code)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Reply {
    type Err = ReplyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut code = None;
        let mut lines = vec![];

        for line in s
            .split('\n')
            .map(|l| l.strip_suffix('\r').unwrap_or(l))
            .filter(|l| !l.is_empty())
        {
            let (digits, rest) = match (line.get(..3), line.get(3..)) {
                (Some(digits), Some(rest)) if digits.bytes().all(|b| b.is_ascii_digit()) => {
                    (digits, rest)
                }
                _ => {
                    return Err(ReplyParseError::InvalidCode {
                        line: line.to_owned(),
                    })
                }
            };
            let value = digits
                .parse::<u16>()
                .ok()
                .and_then(ReplyCode::new)
                .ok_or_else(|| ReplyParseError::InvalidCode {
                    line: line.to_owned(),
                })?;
            // a peer may mix the codes of the lines, the first one is kept
            code.get_or_insert(value);

            let text = match rest.as_bytes().first() {
                None => "",
                Some(b' ' | b'-') => &rest[1..],
                Some(_) => {
                    return Err(ReplyParseError::InvalidSeparator {
                        line: line.to_owned(),
                    })
                }
            };
            lines.push(text.to_owned());
        }

        match code {
            Some(code) => Ok(Self { code, lines }),
            None => Err(ReplyParseError::Empty),
        }
    }
}
