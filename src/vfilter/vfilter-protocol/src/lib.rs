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

//! vFilter protocol: line codec, SMTP session and milter packets

#![doc(html_no_source)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
//
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]
//
#![allow(clippy::multiple_crate_versions)]

mod command;
mod error;
mod reader;
mod receiver;
mod session;
mod writer;

pub mod milter;

pub use command::{
    extract_address, parse_command_line, Command, HeloArgs, MailFromArgs, RcptToArgs,
    UnparsedArgs, Verb, XForwardArgs, XForwardValue, MAX_LINE_SIZE,
};
pub use error::{DataError, Error, ErrorKind, ParseArgsError};
pub use reader::{DataDecoder, Reader};
pub use receiver::{Receiver, ReceiverContext, ReceiverHandler};
pub use session::{Event, Session, Stage};
pub use writer::{apply_dot_stuffing, Writer};

pub use async_trait::async_trait;
