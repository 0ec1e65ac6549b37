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

//! vFilter common definitions

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

extern crate alloc;

mod action;
mod address;
mod reply;
mod spool;

/// Message envelope handed to the plugins.
pub mod suspect;
/// Typed results written by the plugins on a suspect.
pub mod tags;

pub use action::Action;
pub use address::{Address, AddressError, ValidationStrategy};
pub use reply::{Reply, ReplyCode, ReplyParseError};
pub use spool::Spool;
pub use suspect::{ClientInfo, Suspect, SuspectId};
pub use tags::{TagValue, Tags};
