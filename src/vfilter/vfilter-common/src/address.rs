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

/// Error produced when an address does not match the active validation strategy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{address}' is not a valid address: {reason}")]
pub struct AddressError {
    address: String,
    reason: String,
}

impl AddressError {
    fn new(address: &str, reason: impl Into<String>) -> Self {
        Self {
            address: address.to_owned(),
            reason: reason.into(),
        }
    }

    /// The address which failed the validation.
    #[must_use]
    #[inline]
    pub fn address(&self) -> &str {
        &self.address
    }
}

/// How strictly envelope addresses are checked.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    strum::Display,
    strum::EnumString,
    serde::Serialize,
    serde::Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ValidationStrategy {
    /// `local@domain`, with one at sign, no whitespace and no angle brackets.
    #[default]
    Simple,
    /// RFC 5322 addresses, quoted local parts included.
    Rfc,
    /// Anything non-empty containing an at sign.
    Lax,
}

impl ValidationStrategy {
    /// Check `address` against this strategy.
    ///
    /// # Errors
    ///
    /// * the address is empty or malformed
    pub fn validate(self, address: &str) -> Result<(), AddressError> {
        if address.is_empty() {
            return Err(AddressError::new(address, "empty address"));
        }
        match self {
            Self::Simple => {
                let mut parts = address.split('@');
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(local), Some(domain), None) if !local.is_empty() && !domain.is_empty() => {
                        if address
                            .chars()
                            .any(|c| c.is_whitespace() || c == '<' || c == '>')
                        {
                            Err(AddressError::new(address, "forbidden character"))
                        } else {
                            Ok(())
                        }
                    }
                    _ => Err(AddressError::new(address, "expected 'local@domain'")),
                }
            }
            Self::Rfc => match split_quoted(address) {
                Some((quoted, domain)) => {
                    if quoted
                        .chars()
                        .any(|c| c == '\r' || c == '\n' || c == '"')
                    {
                        return Err(AddressError::new(address, "invalid quoted local part"));
                    }
                    addr::parse_domain_name(domain)
                        .map(|_| ())
                        .map_err(|e| AddressError::new(address, e.to_string()))
                }
                None => addr::parse_email_address(address)
                    .map(|_| ())
                    .map_err(|e| AddressError::new(address, e.to_string())),
            },
            Self::Lax => {
                if address.contains('@') {
                    Ok(())
                } else {
                    Err(AddressError::new(address, "missing '@'"))
                }
            }
        }
    }
}

// `"quoted local part"@domain` split into the unquoted local part and the domain
fn split_quoted(address: &str) -> Option<(&str, &str)> {
    let rest = address.strip_prefix('"')?;
    let end = rest.rfind("\"@")?;
    #[allow(clippy::string_slice)]
    Some((&rest[..end], &rest[end + 2..]))
}

/// Address Email
#[derive(Clone, Debug, Eq, serde_with::SerializeDisplay, serde_with::DeserializeFromStr)]
pub struct Address {
    at_sign: usize,
    full: String,
}

impl Address {
    /// Parse and validate an address with the given strategy.
    ///
    /// # Errors
    ///
    /// * the address does not pass the validation
    pub fn parse_with(s: &str, strategy: ValidationStrategy) -> Result<Self, AddressError> {
        strategy.validate(s)?;
        // quoted local parts may contain an at sign, the domain starts after the last one
        s.rfind('@')
            .map(|at_sign| Self {
                at_sign,
                full: s.to_owned(),
            })
            .ok_or_else(|| AddressError::new(s, "missing '@'"))
    }

    /// get the full email address.
    #[must_use]
    #[inline]
    pub fn full(&self) -> &str {
        &self.full
    }

    /// get the user of the address.
    #[must_use]
    #[inline]
    pub fn local_part(&self) -> &str {
        #[allow(clippy::indexing_slicing, clippy::string_slice)]
        &self.full[..self.at_sign]
    }

    /// get the domain of the address.
    #[must_use]
    #[inline]
    pub fn domain(&self) -> &str {
        #[allow(clippy::indexing_slicing, clippy::string_slice)]
        &self.full[self.at_sign + 1..]
    }
}

impl std::str::FromStr for Address {
    type Err = AddressError;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_with(s, ValidationStrategy::default())
    }
}

impl PartialEq for Address {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.full == other.full
    }
}

impl std::hash::Hash for Address {
    #[inline]
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.full.hash(state);
    }
}

impl std::fmt::Display for Address {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full)
    }
}
