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

#![warn(clippy::nursery, clippy::pedantic)]
#![cfg_attr(debug_assertions, allow(clippy::missing_errors_doc))]

//! An SMTP receiving service for multipart submissions arriving through a TCP proxy.
//!
//! The crate is split along two seams:
//!
//! - The session engine ([`connection`], [`server`]) speaks SMTP, streams `DATA`, enforces size
//!   limits, and hands every delivered [`Message`] to a [`Handler`].
//! - Pluggable behaviour hangs off that engine: [`Extension`]s claim extra command verbs (see
//!   [`ProxyHandler`] for the `PROXY` preamble), and [`MessageInspector`] validates delivered
//!   messages.
//!
//! ```no_run
//! use smtp_intake::{MessageInspector, ProxyHandler, Server};
//!
//! # async fn run() -> std::io::Result<()> {
//! let mut server = Server::new(MessageInspector).with_max_size(Some(5 * 1024 * 1024));
//! server.extend(smtp_intake::proxy::KEYWORD, ProxyHandler::new());
//!
//! server.listen_and_serve("0.0.0.0:8080").await
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod extension;
pub mod inspect;
pub mod message;
pub mod proxy;
pub mod server;
pub mod str;
pub mod timeouts;

#[cfg(test)]
mod test;

pub use config::Config;
pub use connection::Connection;
pub use error::{Error, Result};
pub use extension::{Extension, Extensions};
pub use inspect::{Inspection, MessageInspector};
pub use message::{Handler, Message, Part};
pub use proxy::{ProxyHandler, ProxyHeaderV1};
pub use server::Server;

/// Write a string literal into `$write_stream` as a single `CRLF`-terminated line.
///
/// Implicitly calls `.await`. The caller needs [`tokio::io::AsyncWriteExt`] in scope.
///
/// # Errors
///
/// - Any errors that could come out of the supplied writer's `write_all` function.
#[macro_export]
macro_rules! write_line {
    ($write_stream:expr, $line:literal) => {
        $write_stream
            .write_all(concat!($line, "\r\n").as_bytes())
            .await
    };
}

/// Format a line like [`format!`] and write it into `$write_stream` with a trailing `CRLF`.
///
/// Implicitly calls `.await`. The caller needs [`tokio::io::AsyncWriteExt`] in scope.
///
/// # Errors
///
/// - Any errors that could come out of the supplied writer's `write_all` function.
#[macro_export]
macro_rules! write_fmt_line {
    ($write_stream:expr, $($arg:tt)+) => {
        $write_stream
            .write_all(format!("{}\r\n", format_args!($($arg)+)).as_bytes())
            .await
    };
}

/// Read a line, including its line ending, out of `$reader`.
///
/// Evaluates to a future of [`std::io::Result<String>`]. The caller needs
/// [`tokio::io::AsyncBufReadExt`] in scope.
///
/// # Errors
///
/// - [`std::io::ErrorKind::ConnectionAborted`] if the reader is exhausted.
/// - Any errors that could come out of the supplied reader's `read_line` function.
#[macro_export]
macro_rules! read_line {
    ($reader:expr) => {
        async {
            let mut line = ::std::string::String::new();
            match $reader.read_line(&mut line).await {
                Ok(0) => Err(::std::io::Error::from(
                    ::std::io::ErrorKind::ConnectionAborted,
                )),
                Ok(_) => Ok(line),
                Err(err) => Err(err),
            }
        }
    };
}
