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

//! Line handling shared by the session engine.
//!
//! [RFC 5321](https://www.rfc-editor.org/rfc/rfc5321.html) requires `CRLF` line endings (section
//! 2.3.8) and transparency for lines of mail data that start with a period (section 4.5.2).

use std::borrow::Cow;

pub mod max_lengths;

pub const CRLF: &str = "\r\n";

/// The line that ends the mail data following a `DATA` command.
pub const END_OF_DATA: &[u8] = b".\r\n";

/// Whether a line of mail data is the `<CRLF>.<CRLF>` terminator.
///
/// Only a `CRLF`-terminated period counts. A bare `".\n"` is treated as data.
#[must_use]
pub fn is_end_of_data(line: &[u8]) -> bool {
    line == END_OF_DATA
}

/// Undo the dot-stuffing of a line of mail data.
///
/// Per [RFC 5321 section 4.5.2](https://www.rfc-editor.org/rfc/rfc5321.html#section-4.5.2), a
/// client doubles the leading period of any data line that starts with one. Check for
/// [`END_OF_DATA`] with [`is_end_of_data`] first.
#[must_use]
pub fn unstuff(line: &[u8]) -> &[u8] {
    line.strip_prefix(b".").unwrap_or(line)
}

/// Ensure a line of mail data ends with `CRLF`.
///
/// Replaces:
/// - A trailing `'\n'` not preceded by `'\r'` with `CRLF`.
/// - A missing line ending (the last line of a stream) with `CRLF`.
///
/// If the line does not need to be modified, this function will not allocate.
#[must_use]
pub fn ensure_crlf(line: &[u8]) -> Cow<'_, [u8]> {
    if line.ends_with(CRLF.as_bytes()) {
        return Cow::Borrowed(line);
    }

    let mut output = line.strip_suffix(b"\n").unwrap_or(line).to_vec();
    output.extend_from_slice(CRLF.as_bytes());

    Cow::Owned(output)
}

/// Replace every control character in `text` with `'?'`, so it cannot break out of the header or
/// line it is written into.
///
/// If there is nothing to replace, this function will not allocate.
#[must_use]
pub fn replace_controls(text: &str) -> Cow<'_, str> {
    if !text.contains(char::is_control) {
        return Cow::Borrowed(text);
    }

    Cow::Owned(
        text.chars()
            .map(|c| if c.is_control() { '?' } else { c })
            .collect(),
    )
}
