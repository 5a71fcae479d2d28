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

//! The maximum length, in number of 8-bit bytes, of a variety of items.
//!
//! Note that these are the *minimum* values. SMTP clients and servers must be able to handle at
//! least these limits. They may exceed these limits, but they should be prepared to be rejected by
//! the other party.
//!
//! Per [RFC 5321 section 4.5.3.1](https://www.rfc-editor.org/rfc/rfc5321.html#section-4.5.3.1).

/// The maximum length of a reverse-path or forward-path (including punctuation and separators)
/// in bytes.
///
/// [RFC 5321 § 4.5.3.1.3](https://www.rfc-editor.org/rfc/rfc5321.html#section-4.5.3.1.3).
pub const PATH: usize = 256;

/// The maximum length of a command line (including the verb and line ending sequence) in
/// bytes.
///
/// [RFC 5321 § 4.5.3.1.4](https://www.rfc-editor.org/rfc/rfc5321.html#section-4.5.3.1.4).
pub const COMMAND_LINE: usize = 512;

/// The number of recipients a server must buffer per message. Not a byte length, but listed
/// alongside them.
///
/// [RFC 5321 § 4.5.3.1.8](https://www.rfc-editor.org/rfc/rfc5321.html#section-4.5.3.1.8).
pub const RECIPIENTS: usize = 100;
