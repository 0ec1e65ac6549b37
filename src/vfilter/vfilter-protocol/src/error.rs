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

// generate the error kind enum and its std::io::ErrorKind conversions
macro_rules! def {
    (
        $(#[$attr:meta])*
        pub enum $name:ident {
        $(
            $variant:ident
        ),*
        $(,)?
    }) => {
        $(#[$attr])*
        pub enum $name {
            $(
                #[doc = "See [`std::io::ErrorKind`]."]
                $variant
            ),*
        }

        impl From<std::io::ErrorKind> for $name {
            #[inline]
            fn from(value: std::io::ErrorKind) -> Self {
                match value {
                    $(std::io::ErrorKind::$variant => Self::$variant,)*
                    _ => Self::Other,
                }
            }
        }

        impl $name {
            /// Convert a [`ErrorKind`] to a [`std::io::ErrorKind`].
            #[must_use]
            #[inline]
            pub const fn to_std(self) -> std::io::ErrorKind {
                match self {
                    $(Self::$variant => std::io::ErrorKind::$variant,)*
                }
            }
        }
    };
}

def! {
    /// Category of errors. see [`std::io::ErrorKind`]
    #[non_exhaustive]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
    pub enum ErrorKind {
        NotFound,
        PermissionDenied,
        ConnectionRefused,
        ConnectionReset,
        ConnectionAborted,
        NotConnected,
        AddrInUse,
        AddrNotAvailable,
        BrokenPipe,
        AlreadyExists,
        WouldBlock,
        InvalidInput,
        InvalidData,
        TimedOut,
        WriteZero,
        Interrupted,
        Unsupported,
        UnexpectedEof,
        OutOfMemory,
        Other,
    }
}

/// Transport level error of a session.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    raw_os_error: Option<i32>,
    inner: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl std::fmt::Display for Error {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "protocol error: {}", self.kind)?;
        if let Some(raw) = self.raw_os_error {
            write!(f, " ({raw})")?;
        }
        if let Some(ref inner) = self.inner {
            write!(f, ": {inner}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    #[inline]
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner
            .as_ref()
            .map(|e| &**e as &(dyn std::error::Error + 'static))
    }
}

impl From<std::io::Error> for Error {
    #[inline]
    fn from(value: std::io::Error) -> Self {
        Self {
            kind: value.kind().into(),
            raw_os_error: value.raw_os_error(),
            inner: value.into_inner(),
        }
    }
}

impl From<std::str::Utf8Error> for Error {
    #[inline]
    fn from(value: std::str::Utf8Error) -> Self {
        std::io::Error::new(std::io::ErrorKind::InvalidData, value).into()
    }
}

impl Error {
    pub(crate) fn buffer_too_long(expected: usize, got: usize) -> Self {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            ParseArgsError::BufferTooLong { expected, got },
        )
        .into()
    }

    pub(crate) fn unexpected_eof() -> Self {
        std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed before the end of the line".to_owned(),
        )
        .into()
    }

    pub(crate) fn invalid_data(message: impl Into<String>) -> Self {
        std::io::Error::new(std::io::ErrorKind::InvalidData, message.into()).into()
    }

    /// Produce an error with a timeout message.
    #[must_use]
    #[inline]
    pub fn timeout(duration: std::time::Duration, message: &str) -> Self {
        std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("after {}: {message}", humantime::format_duration(duration)),
        )
        .into()
    }

    /// Get the kind of error.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Return the underlying error if any.
    #[inline]
    #[must_use]
    pub fn get_ref(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.inner.as_deref()
    }

    /// The line exceeded the maximum size of a command.
    #[inline]
    #[must_use]
    pub fn is_too_long(&self) -> bool {
        self.get_ref()
            .and_then(|e| e.downcast_ref::<ParseArgsError>())
            .map_or(false, |e| matches!(e, ParseArgsError::BufferTooLong { .. }))
    }
}

/// Failure while receiving the content of a message.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DataError {
    /// The peer connection failed.
    #[error(transparent)]
    Transport(#[from] Error),
    /// The spool could not be written, the session must be aborted.
    #[error("could not write the spooled message: {0}")]
    CouldNotWrite(#[source] std::io::Error),
    /// The message was received completely but is larger than allowed.
    #[error("message of {got} bytes exceeds the limit of {limit} bytes")]
    TooLarge {
        /// configured limit
        limit: usize,
        /// size received
        got: usize,
    },
}

/// Error while parsing the arguments of a command.
#[allow(clippy::module_name_repetitions)]
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseArgsError {
    /// Non-UTF8 buffer.
    #[error("{0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    /// The buffer is too big (between each "\r\n").
    #[error("buffer is not supposed to be longer than {expected} bytes but got {got}")]
    BufferTooLong {
        /// buffer size limit
        expected: usize,
        /// actual size of the buffer we got
        got: usize,
    },
    /// mail address is invalid (for rcpt, mail from ...)
    #[error("invalid mail address '{mail}'")]
    InvalidMailAddress {
        /// ill-formatted mail address
        mail: String,
    },
    /// No address found in the arguments.
    #[error("no address found")]
    MissingAddress,
    /// Other
    #[error("invalid arguments")]
    InvalidArgs,
}
