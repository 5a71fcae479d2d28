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

//! Tests for [`super`].

use std::net::SocketAddr;

use tokio_test::{assert_err, assert_ok};

use super::*;

type Result = std::result::Result<(), Box<dyn std::error::Error>>;

const BOUNDARY: &str = "frontier";

/// Build a `multipart/mixed` message out of `(content type, transfer encoding, body)` parts.
fn multipart(parts: &[(&str, Option<&str>, &str)]) -> String {
    let mut raw = format!(
        "Subject: A photo\r\nMIME-Version: 1.0\r\nContent-Type: multipart/mixed; boundary=\"{BOUNDARY}\"\r\n\r\n"
    );
    for (content_type, encoding, body) in parts {
        raw.push_str(&format!("--{BOUNDARY}\r\nContent-Type: {content_type}\r\n"));
        if let Some(encoding) = encoding {
            raw.push_str(&format!("Content-Transfer-Encoding: {encoding}\r\n"));
        }
        raw.push_str(&format!("\r\n{body}\r\n"));
    }
    raw.push_str(&format!("--{BOUNDARY}--\r\n"));
    raw
}

fn message(to: &[&str], raw: &str) -> std::result::Result<Message, std::net::AddrParseError> {
    Ok(Message::new(
        "sender@example.com".to_owned(),
        to.iter().map(|to| (*to).to_owned()).collect(),
        raw.as_bytes().to_vec(),
        "192.0.2.1:2525".parse::<SocketAddr>()?,
    ))
}

// "\x89PNG\r\n\x1a\n"
const PNG: &str = "iVBORw0KGgo=";
// "\xff\xd8\xff\xe0"
const JPEG: &str = "/9j/4A==";

#[test]
fn test_text_and_image() -> Result {
    let raw = multipart(&[
        ("text/plain; charset=utf-8", None, "A dog in the snow"),
        ("image/png", Some("base64"), PNG),
    ]);
    let message = message(&["inbox@example.com"], &raw)?;

    let inspection = assert_ok!(MessageInspector.inspect(&message));
    assert_eq!(inspection.description().trim_end(), "A dog in the snow");
    assert_eq!(inspection.image(), b"\x89PNG\r\n\x1a\n");
    assert_eq!(inspection.image_len(), 8);

    assert_ok!(MessageInspector.handle(&message));

    Ok(())
}

#[test]
fn test_only_text_is_missing_content() -> Result {
    let raw = multipart(&[("text/plain", None, "Nothing to see")]);
    let message = message(&["inbox@example.com"], &raw)?;

    assert!(matches!(
        assert_err!(MessageInspector.inspect(&message)),
        Error::MissingContent
    ));
    assert!(matches!(
        assert_err!(MessageInspector.handle(&message)),
        Error::MissingContent
    ));

    Ok(())
}

#[test]
fn test_only_image_is_missing_content() -> Result {
    let raw = multipart(&[("image/png", Some("base64"), PNG)]);
    let message = message(&["inbox@example.com"], &raw)?;

    assert!(matches!(
        assert_err!(MessageInspector.inspect(&message)),
        Error::MissingContent
    ));

    Ok(())
}

#[test]
fn test_first_image_wins() -> Result {
    let raw = multipart(&[
        ("image/png", Some("base64"), PNG),
        ("text/plain", None, "First"),
        ("image/jpeg", Some("base64"), JPEG),
        ("text/plain", None, "Second"),
    ]);
    let message = message(&["inbox@example.com"], &raw)?;

    let inspection = assert_ok!(MessageInspector.inspect(&message));
    assert_eq!(inspection.image_len(), 8);
    assert!(inspection.description().starts_with("First"));

    Ok(())
}

#[test]
fn test_stops_scanning_once_both_found() -> Result {
    // The trailing part would fail to parse if it were looked at.
    let raw = multipart(&[
        ("text/plain", None, "Description"),
        ("image/gif", Some("base64"), PNG),
        ("not a media type", None, "junk"),
    ]);
    let message = message(&["inbox@example.com"], &raw)?;

    assert_ok!(MessageInspector.inspect(&message));

    Ok(())
}

#[test]
fn test_media_type_ignores_case() -> Result {
    let raw = multipart(&[
        ("TEXT/PLAIN", None, "Upper case"),
        ("Image/PNG", Some("base64"), PNG),
    ]);
    let message = message(&["inbox@example.com"], &raw)?;

    let inspection = assert_ok!(MessageInspector.inspect(&message));
    assert_eq!(inspection.image_len(), 8);

    Ok(())
}

#[test]
fn test_unparsable_content_type() -> Result {
    let raw = multipart(&[
        ("not a media type", None, "junk"),
        ("text/plain", None, "Description"),
    ]);
    let message = message(&["inbox@example.com"], &raw)?;

    assert!(matches!(
        assert_err!(MessageInspector.inspect(&message)),
        Error::ContentTypeUnparsable { .. }
    ));

    Ok(())
}

#[test]
fn test_no_recipients() -> Result {
    let raw = multipart(&[
        ("text/plain", None, "Description"),
        ("image/png", Some("base64"), PNG),
    ]);
    let message = message(&[], &raw)?;

    assert!(matches!(
        assert_err!(MessageInspector.inspect(&message)),
        Error::NoRecipients
    ));

    Ok(())
}
