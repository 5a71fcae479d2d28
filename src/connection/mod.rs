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

//! Handles TCP connections as SMTP sessions.
//!
//! See [`handle`].

mod command;

use std::{net::SocketAddr, sync::Arc};

use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
    time::error::Elapsed,
};
use tracing::{debug, info};

use crate::{server::Server, write_fmt_line};

/// Handle a TCP connection as an SMTP session.
///
/// # Errors
///
/// This function will return [`std::io::Error`] from a variety of sources:
///
/// - I/O errors from [`AsyncWriteExt::write_all`] on [`TcpStream`].
/// - I/O and UTF-8 errors from [`AsyncBufReadExt::read_line`] on [`BufReader<TcpStream>`].
/// - I/O errors encountered in [`TcpStream::local_addr`] amd [`TcpStream::peer_addr`].
///     - On POSIX, these come from `getsockname` and `getpeername` from the C standard library.
pub async fn handle(stream: TcpStream, server: Arc<Server>) -> std::io::Result<()> {
    let local_socket = stream.local_addr()?;
    let client_socket = stream.peer_addr()?;
    info!(%local_socket, %client_socket, "connection opened");

    let (read_stream, write_stream) = stream.into_split();
    let connection = Connection::new(local_socket, client_socket);

    let close_reason = session(
        BufReader::new(read_stream),
        write_stream,
        connection,
        &server,
    )
    .await?;

    info!(%local_socket, %client_socket, ?close_reason, "connection closed");
    Ok(())
}

/// Run an SMTP session over an already accepted stream until it should close.
///
/// Separated from [`handle`] so that the session does not depend on [`TcpStream`].
async fn session<R, W>(
    mut reader: R,
    mut write_stream: W,
    mut connection: Connection,
    server: &Server,
) -> std::io::Result<CloseReason>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Read a line out of `reader` or break with [`CloseReason`].
    ///
    /// Implicitly calls `.await`.
    ///
    /// # Breaks
    ///
    /// If `read_line` reads zero bytes, `break` with [`CloseReason::ClosedByClient`].
    /// If `read_line` takes more than [`crate::timeouts::SERVER_TIMEOUT`], break with
    /// [`CloseReason::TimedOut`]. If the line is not valid UTF-8, break with
    /// [`CloseReason::Error`].
    ///
    /// # Errors
    ///
    /// - Any errors that could come out of the supplied reader's `read_line` function.
    macro_rules! read_line_or_break {
        ($reader:expr) => {
            match ::tokio::time::timeout(
                $crate::timeouts::SERVER_TIMEOUT,
                $crate::read_line!($reader),
            )
            .await
            {
                Ok(result) => match result {
                    Ok(line) => Ok(line),
                    Err(err) => match err.kind() {
                        ::std::io::ErrorKind::ConnectionAborted
                        | ::std::io::ErrorKind::ConnectionReset => {
                            break CloseReason::ClosedByClient
                        }
                        ::std::io::ErrorKind::InvalidData => break CloseReason::Error,
                        _ => Err(err),
                    },
                },
                Err(elapsed) => break CloseReason::TimedOut(elapsed),
            }
        };
    }

    write_fmt_line!(write_stream, "220 {} ESMTP ready", server.hostname())?;

    let close_reason = loop {
        let line = read_line_or_break!(reader)?;
        debug!(line = line.trim_end(), "received line");

        match command::handle(&mut reader, &mut write_stream, &mut connection, server, line)
            .await?
        {
            ShouldClose::Close(reason) => break reason,
            ShouldClose::Keep => (),
        }
    };

    write_stream.flush().await?;
    Ok(close_reason)
}

/// The state of one SMTP session, as seen by commands and [`crate::Extension`]s.
#[derive(Debug, Clone)]
pub struct Connection {
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    /// The original client address reported by an upstream proxy.
    forwarded_for_ip: Option<String>,
    hello: Option<Hello>,
    envelope: Option<Envelope>,
}

impl Connection {
    /// Create the state for a fresh session between `local_addr` and the peer `remote_addr`.
    #[must_use]
    pub const fn new(local_addr: SocketAddr, remote_addr: SocketAddr) -> Self {
        Self {
            local_addr,
            remote_addr,
            forwarded_for_ip: None,
            hello: None,
            envelope: None,
        }
    }

    /// The address this side of the connection is bound to.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The address of the immediate TCP peer, which may be a proxy.
    #[must_use]
    pub const fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// The original client address reported by an upstream proxy, if any.
    #[must_use]
    pub fn forwarded_for_ip(&self) -> Option<&str> {
        self.forwarded_for_ip.as_deref()
    }

    /// Record the original client address reported by an upstream proxy.
    pub fn set_forwarded_for_ip(&mut self, ip: impl Into<String>) {
        self.forwarded_for_ip = Some(ip.into());
    }

    /// The address to report for the client: the forwarded-for IP if there is one, otherwise the
    /// IP of the immediate peer.
    #[must_use]
    pub fn client_ip(&self) -> String {
        self.forwarded_for_ip
            .clone()
            .unwrap_or_else(|| self.remote_addr.ip().to_string())
    }

    /// The domain the client introduced itself with through `HELO` or `EHLO`.
    #[must_use]
    pub fn hello_domain(&self) -> Option<&str> {
        self.hello.as_ref().map(|hello| hello.domain.as_str())
    }

    /// Whether a mail transaction (`MAIL` through `DATA`) is in progress.
    #[must_use]
    pub const fn in_transaction(&self) -> bool {
        self.envelope.is_some()
    }

    /// Record a `HELO` (`extended == false`) or `EHLO` (`extended == true`).
    ///
    /// Per RFC 5321 section 4.1.4, this also aborts any transaction in progress.
    fn greet(&mut self, domain: String, extended: bool) {
        self.hello = Some(Hello { domain, extended });
        self.envelope = None;
    }

    /// Whether the client used `EHLO` rather than `HELO`.
    fn is_extended(&self) -> bool {
        self.hello.as_ref().is_some_and(|hello| hello.extended)
    }

    /// Start a mail transaction with a reverse-path.
    fn begin_transaction(&mut self, from: String) {
        self.envelope = Some(Envelope {
            from,
            to: Vec::new(),
        });
    }

    /// The transaction in progress, if any.
    fn envelope_mut(&mut self) -> Option<&mut Envelope> {
        self.envelope.as_mut()
    }

    /// End the transaction in progress, returning it.
    fn take_envelope(&mut self) -> Option<Envelope> {
        self.envelope.take()
    }

    /// Abort the transaction in progress, if any.
    fn reset(&mut self) {
        self.envelope = None;
    }
}

/// The greeting a client opened the session with.
#[derive(Debug, Clone)]
struct Hello {
    domain: String,
    extended: bool,
}

/// The reverse-path and forward-paths of a mail transaction.
#[derive(Debug, Clone, Default)]
struct Envelope {
    from: String,
    to: Vec<String>,
}

/// Indicates if and why a TCP connection should be closed.
#[derive(PartialEq, Eq, Debug)]
enum ShouldClose {
    /// The TCP connection should be kept open.
    Keep,
    /// The TCP connection should be closed because [`CloseReason`].
    Close(CloseReason),
}

/// Indicates why a TCP connection should be closed.
#[derive(PartialEq, Eq, Debug)]
enum CloseReason {
    /// The SMTP client requested to quit the session.
    Quit,
    /// The client sent something the session cannot continue after.
    Error,
    /// More time [`Elapsed`] than [`crate::timeouts`] allows.
    TimedOut(Elapsed),
    /// The TCP connection was forcefully ended by the client.
    ClosedByClient,
}
