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

//! Handles responding to a command from an SMTP client.
//!
//! See [`handle`].

mod commands;

use std::{
    fmt::{Debug, Display},
    ops::Range,
};

use ascii::{AsciiStr, AsciiString, IntoAsciiString};
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt};

use super::{Connection, ShouldClose};
use crate::{
    server::Server,
    str::{max_lengths, CRLF},
};

/// Reply to a line from the client in an SMTP session.
///
/// `reader` is only read from by `DATA`, which consumes the message that follows it.
///
/// # Errors
///
/// [`std::io::Error`] from [`AsyncWriteExt::write_all`] on `write_stream`, or from reading the
/// message after `DATA`.
pub(super) async fn handle<R, W>(
    reader: &mut R,
    write_stream: &mut W,
    connection: &mut Connection,
    server: &Server,
    line: String,
) -> std::io::Result<ShouldClose>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Send a `"500 Syntax error - {}"` reply into `write_stream` and return with
    /// [`ShouldClose::Keep`].
    ///
    /// # Errors
    ///
    /// - Any errors that could come out of the supplied writer's `write_all` function.
    macro_rules! err_and_return {
        ( $write_stream:expr, $error:expr ) => {{
            $crate::write_fmt_line!($write_stream, "500 Syntax error - {}", $error)?;
            return Ok(ShouldClose::Keep);
        }};
    }

    // RFC 5321 section 4.5.3.1.4 limits command lines to 512 bytes, including the verb and the
    // `CRLF`.
    //
    // https://www.rfc-editor.org/rfc/rfc5321.html#section-4.5.3.1.4
    if line.len() > max_lengths::COMMAND_LINE {
        err_and_return!(write_stream, "line too long");
    }

    // RFC 5321 section 2.3.8 specifies that lines ending with anything other than `CRLF` must not
    // be recognized.
    //
    // https://www.rfc-editor.org/rfc/rfc5321.html#section-2.3.8
    if !line.ends_with(CRLF) {
        err_and_return!(write_stream, "no trailing CRLF");
    }

    // RFC 5321 uses US-ASCII, specifically ANSI X3.4-1968 (reference 6).
    //
    // https://www.rfc-editor.org/rfc/rfc5321.html#ref-6
    let Ok(line) = line.into_ascii_string() else {
        err_and_return!(write_stream, "invalid character");
    };

    let command = match parse(line) {
        Ok(c) => c,
        Err(e) => err_and_return!(write_stream, e),
    };

    match command.verb().as_str() {
        "HELO" => commands::hello(write_stream, connection, server, &command).await,
        "EHLO" => commands::extended_hello(write_stream, connection, server, &command).await,
        "MAIL" => commands::mail(write_stream, connection, server, &command).await,
        "RCPT" => commands::recipient(write_stream, connection, &command).await,
        "DATA" => commands::data(reader, write_stream, connection, server).await,
        "RSET" => commands::reset(write_stream, connection).await,
        "NOOP" => commands::noop(write_stream).await,
        "VRFY" => commands::verify(write_stream).await,
        "QUIT" => commands::quit(write_stream).await,
        "HELP" | "EXPN" | "SEND" | "SOML" | "SAML" | "TURN" => {
            commands::not_implemented(write_stream).await
        }
        verb => match server.extensions().get(verb) {
            Some(extension) => {
                commands::extension(write_stream, connection, extension, &command).await
            }
            None => commands::unrecognized(write_stream).await,
        },
    }
}

/// Parse a line as a command.
fn parse(mut line: AsciiString) -> Result<Command, CommandError> {
    /// Trim the line of leading and trailing whitespace.
    ///
    /// RFC 5321 section 4.1.1 recommends to allow for trailing whitespace.
    /// This trims leading whitespace as well, for the sake of Postel's Law.
    ///
    /// Returns `None` if the string is empty or only whitespace.
    ///
    /// <https://www.rfc-editor.org/rfc/rfc5321.html#section-4.1.1>
    fn trim(str: &AsciiStr) -> Option<Range<usize>> {
        // The index of the first byte that isn't whitespace.
        let leading_whitespace_len = str
            .as_str()
            .find(|c: char| !c.is_ascii_whitespace())
            .unwrap_or(str.len());
        // The index after the last byte that isn't whitespace.
        let trailing_whitespace_len = str.trim_end().len();

        let range = leading_whitespace_len..trailing_whitespace_len;

        // If `end < start` or `start == end`.
        if range.is_empty() {
            None
        } else {
            Some(range)
        }
    }

    /// Split the verb from the text following it, per RFC 5321 section 2.4.
    ///
    /// The text keeps any extra spaces after the first one, as `PROXY` bodies are split on
    /// single spaces.
    ///
    /// <https://www.rfc-editor.org/rfc/rfc5321.html#section-2.4>
    fn split_command(command: &AsciiStr) -> (Range<usize>, Option<Range<usize>>) {
        match command.as_str().split_once(' ') {
            Some((verb, _text)) => (
                // From the start until the last byte of verb.
                0..verb.len(),
                // `verb.len()` would point towards the space that was split on, so start at the
                // byte *after* that and end at the last byte.
                Some(verb.len() + 1..command.len()),
            ),
            None => (0..command.len(), None),
        }
    }

    if line.is_empty() {
        return Err(CommandError::Empty);
    }

    // Will not error because of emptiness, as this was already checked above.
    let trimmed = trim(&line).ok_or(CommandError::OnlyWhitespace)?;
    let trimmed_str = &line[trimmed.clone()];

    let (verb, text) = split_command(trimmed_str);

    // These ranges were obtained using the trimmed string instead of the actual line. This
    // recalibrates the ranges to point to their locations on the actual line instead of on the
    // trimmed string.
    let adjust_for_trim = |mut range: Range<usize>| {
        range.start += trimmed.start;
        range.end += trimmed.start;

        range
    };
    let verb = adjust_for_trim(verb);
    let text = text.map(adjust_for_trim);

    // Make the command verb uppercase for standardized comparison.
    //
    // Note that the mailbox-local part of an email address (ex. `smith` in `smith@example.com`) is
    // the only case-sensitive part of an SMTP command, so `text` is not be set to uppercase.
    line[verb.clone()].make_ascii_uppercase();

    Ok(Command {
        line,
        trimmed,
        verb,
        text,
    })
}

/// One line of an SMTP command.
#[derive(PartialEq, Eq, Clone)]
struct Command {
    /// The entire line, unmodified except for the [`Self::verb`] range being set to uppercase.
    line: AsciiString,
    /// The range over [`Self::line`] without leading and trailing whitespace.
    trimmed: Range<usize>,
    /// The range over [`Self::line`] containing the verb of the command.
    verb: Range<usize>,
    /// The range over [`Self::line`] containing the text of the command.
    text: Option<Range<usize>>,
}

impl Command {
    /// Get the entire line as a string slice, unmodified except for the [`Self::verb`] range
    /// being set to uppercase.
    pub fn line(&self) -> &AsciiStr {
        self.line.as_ref()
    }

    /// Get the line with leading and trailing whitespace stripped as a string slice.
    pub fn trimmed(&self) -> &AsciiStr {
        self.get(&self.trimmed)
    }

    /// Get the verb of the command as an uppercase string slice.
    pub fn verb(&self) -> &AsciiStr {
        self.get(&self.verb)
    }

    /// Get the text of the command as a string slice.
    pub fn text(&self) -> Option<&AsciiStr> {
        let range = self.text.as_ref()?;

        Some(self.get(range))
    }

    /// Get the text of the command, or an empty string if there is none.
    pub fn text_str(&self) -> &str {
        self.text().map_or("", AsciiStr::as_str)
    }

    /// Get a range of the internal [`AsciiString`] as a string slice.
    fn get(&self, range: &Range<usize>) -> &AsciiStr {
        &self.line[range.clone()]
    }
}

impl Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("line", &self.line)
            .field("line()", &self.line())
            .field("trimmed", &self.trimmed)
            .field("trimmed()", &self.trimmed())
            .field("verb", &self.verb)
            .field("verb()", &self.verb())
            .field("text", &self.text)
            .field("text()", &self.text())
            .finish()
    }
}

/// Possible error states encountered when trying to convert a line into a [`Command`].
#[derive(PartialEq, Eq, Copy, Clone)]
enum CommandError {
    /// Function was passed a line that is empty.
    Empty,
    /// Function was passed a line that consists of only whitespace.
    OnlyWhitespace,
}

impl Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Empty => "empty command",
            Self::OnlyWhitespace => "command consists only of whitespace",
        })
    }
}

impl Debug for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self} at {} {}", file!(), line!())
    }
}

impl std::error::Error for CommandError {}
