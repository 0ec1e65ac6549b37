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

/// Verdict of a scanner, and final disposition of a message.
///
/// The numeric values are part of the plugin interface and never change.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    strum::AsRefStr,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    serde_with::SerializeDisplay,
    serde_with::DeserializeFromStr,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[repr(u8)]
pub enum Action {
    /// No decision, the next scanner is run.
    #[default]
    Dunno = 0,
    /// Stop scanning and forward the message.
    Accept = 1,
    /// Stop scanning and silently drop the message.
    Delete = 2,
    /// Stop scanning and refuse the message permanently.
    Reject = 3,
    /// Stop scanning and ask the peer to retry later.
    Defer = 4,
}

impl Action {
    /// Does this verdict stop the scanner chain ?
    #[must_use]
    #[inline]
    pub const fn is_decisive(self) -> bool {
        !matches!(self, Self::Dunno)
    }

    /// Does this action lead to a re-injection of the message ?
    #[must_use]
    #[inline]
    pub const fn is_forwarded(self) -> bool {
        matches!(self, Self::Dunno | Self::Accept)
    }

    /// Numeric code of the action.
    #[must_use]
    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Build an action from its numeric code.
    #[must_use]
    #[inline]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Dunno),
            1 => Some(Self::Accept),
            2 => Some(Self::Delete),
            3 => Some(Self::Reject),
            4 => Some(Self::Defer),
            _ => None,
        }
    }
}
