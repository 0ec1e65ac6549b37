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

//! Packets of the milter protocol, version 6.
//!
//! A packet is a 32 bits big endian length, which includes the command
//! byte, then the command byte and the data.

use crate::{reader::Reader, Error};

/// Version of the protocol spoken by the filter.
pub const MILTER_VERSION: u32 = 6;
/// The filter may add headers.
pub const SMFIF_ADDHDRS: u32 = 0x01;
/// The filter may replace the body.
pub const SMFIF_CHGBODY: u32 = 0x02;
/// Largest chunk of a replacement body.
pub const MAX_BODY_CHUNK: usize = 65535;
/// Largest packet accepted from the MTA.
pub const MAX_PACKET_SIZE: usize = 1024 * 1024 * 64;

/// Message sent by the MTA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `O`: options negotiation.
    OptNeg {
        ///
        version: u32,
        /// actions offered by the MTA
        actions: u32,
        /// protocol steps offered by the MTA
        protocol: u32,
    },
    /// `D`: macros defined for the next command.
    Macro {
        /// command the macros are sent for
        stage: u8,
        /// name and value pairs
        macros: Vec<(String, String)>,
    },
    /// `C`: connection information.
    Connect {
        /// name of the client, reverse DNS if resolved
        hostname: String,
        /// `4`, `6`, `L` (unix socket) or `U` (unknown)
        family: u8,
        /// client port
        port: Option<u16>,
        /// client address
        address: Option<String>,
    },
    /// `H`
    Helo(String),
    /// `M`: sender, then ESMTP arguments.
    Mail(Vec<String>),
    /// `R`: recipient, then ESMTP arguments.
    Rcpt(Vec<String>),
    /// `T`
    Data,
    /// `L`: one header.
    Header {
        ///
        name: String,
        ///
        value: String,
    },
    /// `N`
    EndOfHeaders,
    /// `B`: a chunk of the body.
    Body(Vec<u8>),
    /// `E`: end of the message, the filter must give its verdict.
    EndOfBody,
    /// `A`: the current message is abandoned.
    Abort,
    /// `Q`
    Quit,
    /// `K`: quit, a new connection follows on the same socket.
    QuitNewConnection,
    /// `U`: unknown SMTP command.
    Unknown(Vec<u8>),
}

/// Message sent to the MTA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `O`: options accepted by the filter.
    OptNeg {
        ///
        version: u32,
        ///
        actions: u32,
        ///
        protocol: u32,
    },
    /// `c`
    Continue,
    /// `a`
    Accept,
    /// `r`
    Reject,
    /// `t`
    TempFail,
    /// `d`: accept and silently drop.
    Discard,
    /// `y`: reject or tempfail with a custom reply, `"550 5.7.1 text"`.
    ReplyCode(String),
    /// `h`
    AddHeader {
        ///
        name: String,
        ///
        value: String,
    },
    /// `b`: a chunk of the replacement body.
    ReplaceBody(Vec<u8>),
}

fn split_nul(data: &[u8]) -> Vec<String> {
    let data = data.strip_suffix(b"\0").unwrap_or(data);
    if data.is_empty() {
        return vec![];
    }
    data.split(|b| *b == 0)
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect()
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32, Error> {
    data.get(offset..offset + 4)
        .and_then(|b| <[u8; 4]>::try_from(b).ok())
        .map(u32::from_be_bytes)
        .ok_or_else(|| Error::invalid_data("truncated milter packet"))
}

impl Command {
    /// Decode the payload of a packet.
    ///
    /// # Errors
    ///
    /// * the payload is too short for the command
    pub fn decode(code: u8, data: &[u8]) -> Result<Self, Error> {
        Ok(match code {
            b'O' => Self::OptNeg {
                version: read_u32(data, 0)?,
                actions: read_u32(data, 4)?,
                protocol: read_u32(data, 8)?,
            },
            b'D' => {
                let (stage, pairs) = data
                    .split_first()
                    .ok_or_else(|| Error::invalid_data("empty macro packet"))?;
                let mut values = split_nul(pairs).into_iter();
                let mut macros = vec![];
                while let Some(name) = values.next() {
                    macros.push((name, values.next().unwrap_or_default()));
                }
                Self::Macro {
                    stage: *stage,
                    macros,
                }
            }
            b'C' => {
                let end = memchr::memchr(0, data)
                    .ok_or_else(|| Error::invalid_data("connect packet without hostname"))?;
                let hostname = String::from_utf8_lossy(&data[..end]).into_owned();
                let rest = &data[end + 1..];
                let family = *rest
                    .first()
                    .ok_or_else(|| Error::invalid_data("connect packet without family"))?;
                let (port, address) = if family == b'U' || rest.len() < 3 {
                    (None, None)
                } else {
                    (
                        Some(u16::from_be_bytes([rest[1], rest[2]])),
                        split_nul(&rest[3..]).into_iter().next(),
                    )
                };
                Self::Connect {
                    hostname,
                    family,
                    port,
                    address,
                }
            }
            b'H' => Self::Helo(split_nul(data).into_iter().next().unwrap_or_default()),
            b'M' => Self::Mail(split_nul(data)),
            b'R' => Self::Rcpt(split_nul(data)),
            b'T' => Self::Data,
            b'L' => {
                let mut values = split_nul(data).into_iter();
                Self::Header {
                    name: values
                        .next()
                        .ok_or_else(|| Error::invalid_data("header packet without name"))?,
                    value: values.next().unwrap_or_default(),
                }
            }
            b'N' => Self::EndOfHeaders,
            b'B' => Self::Body(data.to_vec()),
            b'E' => Self::EndOfBody,
            b'A' => Self::Abort,
            b'Q' => Self::Quit,
            b'K' => Self::QuitNewConnection,
            b'U' => Self::Unknown(data.to_vec()),
            otherwise => {
                return Err(Error::invalid_data(format!(
                    "unknown milter command '{}'",
                    char::from(otherwise)
                )))
            }
        })
    }

    /// Read the next packet. `None` if the MTA closed the connection
    /// between two packets.
    ///
    /// # Errors
    ///
    /// * the packet is malformed or too large
    /// * [`std::io::Error`] produced by the underlying reader
    pub async fn read<R: tokio::io::AsyncRead + Unpin + Send>(
        reader: &mut Reader<R>,
    ) -> Result<Option<Self>, Error> {
        let Some(length) = reader.read_exact(4).await? else {
            return Ok(None);
        };
        let length = read_u32(&length, 0)? as usize;
        if length == 0 || length > MAX_PACKET_SIZE {
            return Err(Error::invalid_data(format!(
                "invalid milter packet length {length}"
            )));
        }
        let packet = reader
            .read_exact(length)
            .await?
            .ok_or_else(Error::unexpected_eof)?;
        tracing::trace!(command = %char::from(packet[0]), length, "<< milter");
        Self::decode(packet[0], &packet[1..]).map(Some)
    }
}

impl Response {
    /// Command byte and payload.
    #[must_use]
    pub fn payload(&self) -> (u8, Vec<u8>) {
        fn nul_terminated(values: &[&str]) -> Vec<u8> {
            values
                .iter()
                .flat_map(|v| v.as_bytes().iter().copied().chain(std::iter::once(0)))
                .collect()
        }

        match self {
            Self::OptNeg {
                version,
                actions,
                protocol,
            } => (
                b'O',
                [*version, *actions, *protocol]
                    .iter()
                    .flat_map(|v| v.to_be_bytes())
                    .collect(),
            ),
            Self::Continue => (b'c', vec![]),
            Self::Accept => (b'a', vec![]),
            Self::Reject => (b'r', vec![]),
            Self::TempFail => (b't', vec![]),
            Self::Discard => (b'd', vec![]),
            Self::ReplyCode(text) => (b'y', nul_terminated(&[text])),
            Self::AddHeader { name, value } => (b'h', nul_terminated(&[name, value])),
            Self::ReplaceBody(chunk) => (b'b', chunk.clone()),
        }
    }

    /// The packet as sent on the wire.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let (code, data) = self.payload();
        #[allow(clippy::cast_possible_truncation)]
        let length = (data.len() + 1) as u32;

        let mut out = Vec::with_capacity(data.len() + 5);
        out.extend_from_slice(&length.to_be_bytes());
        out.push(code);
        out.extend_from_slice(&data);
        out
    }

    /// Replace the body, in as many packets as needed.
    #[must_use]
    pub fn replace_body(body: &[u8]) -> Vec<Self> {
        body.chunks(MAX_BODY_CHUNK)
            .map(|chunk| Self::ReplaceBody(chunk.to_vec()))
            .collect()
    }

    /// Answer to the options offered by the MTA: the lowest version of both,
    /// adding headers and replacing the body, every protocol step.
    #[must_use]
    pub fn negotiate(version: u32, actions: u32) -> Self {
        Self::OptNeg {
            version: version.min(MILTER_VERSION),
            actions: actions & (SMFIF_ADDHDRS | SMFIF_CHGBODY),
            protocol: 0,
        }
    }
}
