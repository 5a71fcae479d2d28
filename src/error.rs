// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright © 2024 RemasteredArch
//
// This file is part of smtp_intake.
//
// smtp_intake is free software: you can redistribute it and/or modify it under the terms of the
// GNU Affero General Public License as published by the Free Software Foundation, either version
// 3 of the License, or (at your option) any later version.
//
// smtp_intake is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License along with
// smtp_intake. If not, see <https://www.gnu.org/licenses/>.

//! The error type shared by the session engine and everything plugged into it.
//!
//! Every error that reaches the engine is turned into an SMTP reply. None of them are retried.

use std::net::IpAddr;

use thiserror::Error;

/// Shorthand for results carrying [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can go wrong while handling a `PROXY` command or a delivered message.
#[derive(Error, Debug)]
pub enum Error {
    /// A `PROXY` method body split into fewer than five space separated fields.
    #[error("PROXY v1 format is invalid, {0}")]
    MalformedHeader(String),

    /// A `PROXY` command arrived from a peer outside the trusted proxy list.
    #[error("PROXY not allowed from '{0}'")]
    UntrustedProxy(IpAddr),

    /// A second `PROXY` command arrived after one already set the forwarded-for IP.
    #[error("PROXY already received on this connection")]
    RepeatedProxy,

    /// A MIME part has a missing or malformed `Content-Type` header.
    #[error("unparsable content type {value:?}: {reason}")]
    ContentTypeUnparsable { value: String, reason: String },

    /// A message lacks a `text/plain` part or an `image/*` part.
    #[error("missing description or image")]
    MissingContent,

    /// A message was handed over without any recipients.
    #[error("message has no recipients")]
    NoRecipients,

    /// The message or one of its parts could not be decoded.
    #[error("malformed message: {0}")]
    Mail(#[from] mailparse::MailParseError),

    /// Reading from or writing to the client failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
