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

//! Handles responding to a particular commands from SMTP clients.

use std::{
    fmt::{Debug, Display},
    io::Result,
};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use super::{
    super::{CloseReason, Connection, ShouldClose},
    Command,
};
use crate::{
    extension::Extension,
    message::Message,
    server::Server,
    str::{max_lengths, replace_controls},
    timeouts, write_fmt_line, write_line,
};

/// Send a `"501 Syntax error in parameters - {}"` reply into `write_stream` and return with
/// [`ShouldClose::Keep`].
///
/// # Errors
///
/// - Any errors that could come out of the supplied writer's `write_all` function.
macro_rules! syntax_err_and_return {
    ( $write_stream:expr, $error:expr ) => {{
        $crate::write_fmt_line!(
            $write_stream,
            "501 Syntax error in parameters - {}",
            $error
        )?;
        return Ok(ShouldClose::Keep);
    }};
}

/// Reply to an unrecognized command from a client.
///
/// See [`not_implemented`] for commands that are recognized, but not implemented. See [RFC 5321
/// section 4.2.4](https://www.rfc-editor.org/rfc/rfc5321.html#section-4.2.4) for more details.
///
/// # Errors
///
/// [`std::io::Error`] from [`AsyncWriteExt::write_all`] on `write_stream`.
pub async fn unrecognized<W: AsyncWrite + Unpin>(write_stream: &mut W) -> Result<ShouldClose> {
    write_line!(write_stream, "500 Command not recognized")?;

    Ok(ShouldClose::Keep)
}

/// Reply to a command from the client that is recognized but not implemented.
///
/// [RFC 5321 section 4.2.4](https://www.rfc-editor.org/rfc/rfc5321.html#section-4.2.4).
///
/// See [`unrecognized`] for cases of truly unrecognized commands.
///
/// # Errors
///
/// [`std::io::Error`] from [`AsyncWriteExt::write_all`] on `write_stream`.
pub async fn not_implemented<W: AsyncWrite + Unpin>(write_stream: &mut W) -> Result<ShouldClose> {
    write_line!(write_stream, "502 Command not implemented")?;

    Ok(ShouldClose::Keep)
}

/// Reply to the hello (`HELO`) command from a client.
///
/// [RFC 5321 section 4.1.1.1](https://www.rfc-editor.org/rfc/rfc5321.html#section-4.1.1.1).
///
/// # Errors
///
/// [`std::io::Error`] from [`AsyncWriteExt::write_all`] on `write_stream`.
pub async fn hello<W: AsyncWrite + Unpin>(
    write_stream: &mut W,
    connection: &mut Connection,
    server: &Server,
    command: &Command,
) -> Result<ShouldClose> {
    let domain = command.text_str().trim();
    if domain.is_empty() {
        syntax_err_and_return!(write_stream, "HELO requires a domain");
    }

    connection.greet(domain.to_owned(), false);
    write_fmt_line!(write_stream, "250 {}", server.hostname())?;

    Ok(ShouldClose::Keep)
}

/// Reply to the extended hello (`EHLO`) command from a client, listing the supported service
/// extensions.
///
/// [RFC 5321 section 4.1.1.1](https://www.rfc-editor.org/rfc/rfc5321.html#section-4.1.1.1).
///
/// # Errors
///
/// [`std::io::Error`] from [`AsyncWriteExt::write_all`] on `write_stream`.
pub async fn extended_hello<W: AsyncWrite + Unpin>(
    write_stream: &mut W,
    connection: &mut Connection,
    server: &Server,
    command: &Command,
) -> Result<ShouldClose> {
    let domain = command.text_str().trim();
    if domain.is_empty() {
        syntax_err_and_return!(write_stream, "EHLO requires a domain");
    }

    connection.greet(domain.to_owned(), true);

    let mut lines = vec![format!("{} greets {domain}", server.hostname())];
    // RFC 1870.
    if let Some(max_size) = server.max_size() {
        lines.push(format!("SIZE {max_size}"));
    }
    lines.extend(server.extensions().keywords().map(String::from));

    write_reply(write_stream, 250, &lines).await?;

    Ok(ShouldClose::Keep)
}

/// Reply to the mail (`MAIL FROM:<reverse-path>`) command from a client, starting a mail
/// transaction.
///
/// [RFC 5321 section 4.1.1.2](https://www.rfc-editor.org/rfc/rfc5321.html#section-4.1.1.2).
///
/// # Errors
///
/// [`std::io::Error`] from [`AsyncWriteExt::write_all`] on `write_stream`.
pub async fn mail<W: AsyncWrite + Unpin>(
    write_stream: &mut W,
    connection: &mut Connection,
    server: &Server,
    command: &Command,
) -> Result<ShouldClose> {
    if connection.hello_domain().is_none() {
        write_line!(write_stream, "503 Send HELO/EHLO first")?;
        return Ok(ShouldClose::Keep);
    }
    if connection.in_transaction() {
        write_line!(write_stream, "503 Nested MAIL command")?;
        return Ok(ShouldClose::Keep);
    }

    let (reverse_path, parameters) = match parse_path(command.text_str(), "FROM:") {
        Ok(path) => path,
        Err(e) => syntax_err_and_return!(write_stream, e),
    };

    if let (Some(max_size), Some(declared)) = (server.max_size(), declared_size(parameters)) {
        if declared > max_size {
            write_line!(write_stream, "552 Message size exceeds fixed maximum message size")?;
            return Ok(ShouldClose::Keep);
        }
    }

    connection.begin_transaction(reverse_path);
    write_line!(write_stream, "250 OK")?;

    Ok(ShouldClose::Keep)
}

/// Reply to the recipient (`RCPT TO:<forward-path>`) command from a client.
///
/// [RFC 5321 section 4.1.1.3](https://www.rfc-editor.org/rfc/rfc5321.html#section-4.1.1.3).
///
/// # Errors
///
/// [`std::io::Error`] from [`AsyncWriteExt::write_all`] on `write_stream`.
pub async fn recipient<W: AsyncWrite + Unpin>(
    write_stream: &mut W,
    connection: &mut Connection,
    command: &Command,
) -> Result<ShouldClose> {
    let Some(envelope) = connection.envelope_mut() else {
        write_line!(write_stream, "503 Need MAIL command")?;
        return Ok(ShouldClose::Keep);
    };

    let forward_path = match parse_path(command.text_str(), "TO:") {
        Ok((path, _)) if path.is_empty() => syntax_err_and_return!(write_stream, PathError::Empty),
        Ok((path, _)) => path,
        Err(e) => syntax_err_and_return!(write_stream, e),
    };

    if envelope.to.len() >= max_lengths::RECIPIENTS {
        write_line!(write_stream, "452 Too many recipients")?;
        return Ok(ShouldClose::Keep);
    }

    envelope.to.push(forward_path);
    write_line!(write_stream, "250 OK")?;

    Ok(ShouldClose::Keep)
}

/// Reply to the data (`DATA`) command from a client, then read the message and hand it to the
/// server's [`crate::Handler`].
///
/// [RFC 5321 section 4.1.1.4](https://www.rfc-editor.org/rfc/rfc5321.html#section-4.1.1.4).
///
/// # Errors
///
/// [`std::io::Error`] from [`AsyncWriteExt::write_all`] on `write_stream` or from
/// [`AsyncBufReadExt::read_until`] on `reader`.
pub async fn data<R, W>(
    reader: &mut R,
    write_stream: &mut W,
    connection: &mut Connection,
    server: &Server,
) -> Result<ShouldClose>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let envelope = match connection.take_envelope() {
        Some(envelope) if !envelope.to.is_empty() => envelope,
        unfinished => {
            connection.envelope = unfinished;
            write_line!(write_stream, "503 Need RCPT command")?;
            return Ok(ShouldClose::Keep);
        }
    };

    write_line!(write_stream, "354 Start mail input; end with <CRLF>.<CRLF>")?;

    let body = match read_data(reader, server.max_size()).await? {
        Data::Complete(body) => body,
        Data::TooLarge => {
            write_line!(write_stream, "552 Message exceeds fixed maximum message size")?;
            return Ok(ShouldClose::Keep);
        }
        Data::Closed(reason) => return Ok(ShouldClose::Close(reason)),
    };

    let mut raw_body = received_header(connection, server).into_bytes();
    raw_body.extend_from_slice(&body);

    let message = Message::new(envelope.from, envelope.to, raw_body, connection.remote_addr())
        .with_forwarded_for_ip(connection.forwarded_for_ip().map(ToOwned::to_owned));

    match server.handler().handle(&message) {
        Ok(()) => {
            info!(
                from = message.from(),
                recipients = message.to().len(),
                size = message.raw_body().len(),
                "message accepted"
            );
            write_line!(write_stream, "250 OK: message accepted")?;
        }
        Err(err) => {
            warn!(error = %err, from = message.from(), "message rejected");
            write_fmt_line!(write_stream, "554 Transaction failed - {err}")?;
        }
    }

    Ok(ShouldClose::Keep)
}

/// Reply to the reset (`RSET`) command from a client, aborting any mail transaction.
///
/// [RFC 5321 section 4.1.1.5](https://www.rfc-editor.org/rfc/rfc5321.html#section-4.1.1.5).
///
/// # Errors
///
/// [`std::io::Error`] from [`AsyncWriteExt::write_all`] on `write_stream`.
pub async fn reset<W: AsyncWrite + Unpin>(
    write_stream: &mut W,
    connection: &mut Connection,
) -> Result<ShouldClose> {
    connection.reset();
    write_line!(write_stream, "250 OK")?;

    Ok(ShouldClose::Keep)
}

/// Reply to the verify (`VRFY`) command from a client.
///
/// Mailboxes are never disclosed, per [RFC 5321 section
/// 3.5.3](https://www.rfc-editor.org/rfc/rfc5321.html#section-3.5.3).
///
/// # Errors
///
/// [`std::io::Error`] from [`AsyncWriteExt::write_all`] on `write_stream`.
pub async fn verify<W: AsyncWrite + Unpin>(write_stream: &mut W) -> Result<ShouldClose> {
    write_line!(
        write_stream,
        "252 Cannot VRFY user, but will accept message and attempt delivery"
    )?;

    Ok(ShouldClose::Keep)
}

/// Reply to the no-op (`NOOP`) command from a client.
///
/// [RFC 5321 section 4.1.1.9](https://www.rfc-editor.org/rfc/rfc5321.html#section-4.1.1.9).
///
/// # Errors
///
/// [`std::io::Error`] from [`AsyncWriteExt::write_all`] on `write_stream`.
pub async fn noop<W: AsyncWrite + Unpin>(write_stream: &mut W) -> Result<ShouldClose> {
    write_line!(write_stream, "250 OK")?;

    Ok(ShouldClose::Keep)
}

/// Reply to the quit (`QUIT`) command from a client.
///
/// [RFC 5321 section 4.1.1.10](https://www.rfc-editor.org/rfc/rfc5321.html#section-4.1.1.10).
///
/// # Errors
///
/// [`std::io::Error`] from [`AsyncWriteExt::write_all`] on `write_stream`.
pub async fn quit<W: AsyncWrite + Unpin>(write_stream: &mut W) -> Result<ShouldClose> {
    write_line!(write_stream, "221 Bye")?;

    Ok(ShouldClose::Close(CloseReason::Quit))
}

/// Hand a command claimed by an [`Extension`] to it.
///
/// Extensions make up the preamble of a session, so they are refused once the client has sent
/// `HELO`/`EHLO` or started a mail transaction. A successful extension command gets no reply, as
/// the `PROXY` preamble expects none. A failed one is rejected and the connection is closed.
///
/// # Errors
///
/// [`std::io::Error`] from [`AsyncWriteExt::write_all`] on `write_stream`.
pub async fn extension<W: AsyncWrite + Unpin>(
    write_stream: &mut W,
    connection: &mut Connection,
    extension: &dyn Extension,
    command: &Command,
) -> Result<ShouldClose> {
    if connection.in_transaction() {
        write_fmt_line!(
            write_stream,
            "503 {} is not allowed during a mail transaction",
            extension.keyword()
        )?;
        return Ok(ShouldClose::Keep);
    }
    if connection.hello_domain().is_some() {
        write_fmt_line!(
            write_stream,
            "503 {} must be sent before HELO/EHLO",
            extension.keyword()
        )?;
        return Ok(ShouldClose::Keep);
    }

    match extension.handle(connection, command.text_str()) {
        Ok(()) => Ok(ShouldClose::Keep),
        Err(err) => {
            warn!(keyword = extension.keyword(), error = %err, "extension rejected command");
            write_fmt_line!(write_stream, "554 {err}")?;

            Ok(ShouldClose::Close(CloseReason::Error))
        }
    }
}

/// Write a reply that may span multiple lines, per [RFC 5321 section
/// 4.2.1](https://www.rfc-editor.org/rfc/rfc5321.html#section-4.2.1).
///
/// # Errors
///
/// [`std::io::Error`] from [`AsyncWriteExt::write_all`] on `write_stream`.
async fn write_reply<W: AsyncWrite + Unpin>(
    write_stream: &mut W,
    code: u16,
    lines: &[String],
) -> Result<()> {
    for (index, text) in lines.iter().enumerate() {
        let multiline = if index + 1 == lines.len() {
            MultiLine::LastLine
        } else {
            MultiLine::HasNext
        };

        write_fmt_line!(write_stream, "{code}{}{text}", multiline.split())?;
    }

    Ok(())
}

/// Indicates if a reply line is the last line of that reply.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
enum MultiLine {
    /// This is the last line of the reply.
    LastLine,
    /// This is not the last line of the reply, there will be more following.
    HasNext,
}

impl MultiLine {
    /// Get the character used to split the code and text of an SMTP reply.
    #[must_use]
    pub const fn split(self) -> char {
        match self {
            Self::LastLine => ' ',
            Self::HasNext => '-',
        }
    }
}

/// The outcome of reading the message after `DATA`.
enum Data {
    /// The message, dot-unstuffed and with `CRLF` line endings.
    Complete(Vec<u8>),
    /// The message ended but was larger than the server's maximum size.
    TooLarge,
    /// The connection ended before the message did.
    Closed(CloseReason),
}

/// Read the lines of a message until the `<CRLF>.<CRLF>` terminator.
///
/// Once the message grows past `max_size`, the rest of it is still read but discarded.
///
/// # Errors
///
/// [`std::io::Error`] from [`AsyncBufReadExt::read_until`] on `reader`.
async fn read_data<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    max_size: Option<usize>,
) -> Result<Data> {
    let mut body = Vec::new();
    let mut too_large = false;

    loop {
        let mut line = Vec::new();
        match tokio::time::timeout(timeouts::DATA_BLOCK, reader.read_until(b'\n', &mut line)).await
        {
            Ok(Ok(0)) => return Ok(Data::Closed(CloseReason::ClosedByClient)),
            Ok(Ok(_)) => (),
            Ok(Err(err)) => return Err(err),
            Err(elapsed) => return Ok(Data::Closed(CloseReason::TimedOut(elapsed))),
        }

        if crate::str::is_end_of_data(&line) {
            break;
        }

        let line = crate::str::ensure_crlf(crate::str::unstuff(&line));
        too_large = too_large || max_size.is_some_and(|max| body.len() + line.len() > max);

        if !too_large {
            body.extend_from_slice(&line);
        }
    }

    Ok(if too_large {
        Data::TooLarge
    } else {
        Data::Complete(body)
    })
}

/// Build the trace header stamped onto every accepted message, per [RFC 5321 section
/// 4.4](https://www.rfc-editor.org/rfc/rfc5321.html#section-4.4).
///
/// The client is identified by its forwarded-for IP when a proxy reported one. Both that IP and
/// the `HELO` domain come from the client unchecked, so control characters in them are replaced.
pub(super) fn received_header(connection: &Connection, server: &Server) -> String {
    format!(
        "Received: from {} ({})\r\n\tby {} with {}\r\n",
        replace_controls(connection.hello_domain().unwrap_or("unknown")),
        replace_controls(&connection.client_ip()),
        server.hostname(),
        if connection.is_extended() {
            "ESMTP"
        } else {
            "SMTP"
        },
    )
}

/// Extract the path from the text of a `MAIL` or `RCPT` command.
///
/// `keyword` is the `FROM:` or `TO:` prefix, matched case-insensitively. Returns the path without
/// its angle brackets and the trailing ESMTP parameters. Source routes (`<@a,@b:user@c>`) are
/// stripped, per [RFC 5321 appendix C](https://www.rfc-editor.org/rfc/rfc5321.html#appendix-C).
pub(super) fn parse_path<'a>(
    text: &'a str,
    keyword: &str,
) -> std::result::Result<(String, &'a str), PathError> {
    let text = text.trim_start();

    match text.get(..keyword.len()) {
        Some(head) if head.eq_ignore_ascii_case(keyword) => (),
        _ => return Err(PathError::MissingKeyword),
    }

    let (path, parameters) = text[keyword.len()..]
        .trim_start()
        .strip_prefix('<')
        .and_then(|rest| rest.split_once('>'))
        .ok_or(PathError::MissingBrackets)?;

    if path.len() > max_lengths::PATH {
        return Err(PathError::TooLong);
    }

    let path = match path.split_once(':') {
        Some((_route, mailbox)) if path.starts_with('@') => mailbox,
        _ => path,
    };

    Ok((path.to_owned(), parameters.trim()))
}

/// Find the `SIZE=` parameter of a `MAIL` command, per [RFC 1870](https://www.rfc-editor.org/rfc/rfc1870).
pub(super) fn declared_size(parameters: &str) -> Option<usize> {
    parameters.split_ascii_whitespace().find_map(|parameter| {
        let (keyword, value) = parameter.split_once('=')?;

        if keyword.eq_ignore_ascii_case("SIZE") {
            value.parse().ok()
        } else {
            None
        }
    })
}

/// Possible error states encountered when extracting a path from a `MAIL` or `RCPT` command.
#[derive(PartialEq, Eq, Copy, Clone)]
pub(super) enum PathError {
    /// The text did not start with `FROM:` or `TO:`.
    MissingKeyword,
    /// The path was not enclosed in `<` and `>`.
    MissingBrackets,
    /// The path is longer than [`max_lengths::PATH`].
    TooLong,
    /// A forward-path was `<>`.
    Empty,
}

impl Display for PathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::MissingKeyword => "expected FROM:<path> or TO:<path>",
            Self::MissingBrackets => "path must be enclosed in angle brackets",
            Self::TooLong => "path too long",
            Self::Empty => "empty forward-path",
        })
    }
}

impl Debug for PathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self} at {} {}", file!(), line!())
    }
}
