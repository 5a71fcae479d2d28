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

//! Messages delivered by the session engine, and the callback that receives them.

use std::net::SocketAddr;

use mailparse::{MailHeaderMap, ParsedMail};
use mime::Mime;

use crate::error::{Error, Result};


/// Receives every message the session engine accepts data for.
///
/// The reply to `DATA` depends on the outcome: `250` on success, `554` carrying the error
/// otherwise.
pub trait Handler: Send + Sync {
    /// Handle a fully received message.
    ///
    /// # Errors
    ///
    /// Whatever the handler rejects the message with.
    fn handle(&self, message: &Message) -> Result<()>;
}

impl<F> Handler for F
where
    F: Fn(&Message) -> Result<()> + Send + Sync,
{
    fn handle(&self, message: &Message) -> Result<()> {
        self(message)
    }
}

/// A message as received after `DATA`, with its envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    from: String,
    to: Vec<String>,
    subject: String,
    raw_body: Vec<u8>,
    remote_addr: SocketAddr,
    forwarded_for_ip: Option<String>,
}

impl Message {
    /// Create a message from its envelope and the raw mail data, headers included.
    ///
    /// The subject is read from the headers of `raw_body`. It is empty if there is none.
    #[must_use]
    pub fn new(from: String, to: Vec<String>, raw_body: Vec<u8>, remote_addr: SocketAddr) -> Self {
        let subject = mailparse::parse_headers(&raw_body)
            .ok()
            .and_then(|(headers, _)| headers.get_first_value("Subject"))
            .unwrap_or_default();

        Self {
            from,
            to,
            subject,
            raw_body,
            remote_addr,
            forwarded_for_ip: None,
        }
    }

    /// Attach the client address reported by an upstream proxy.
    #[must_use]
    pub fn with_forwarded_for_ip(mut self, forwarded_for_ip: Option<String>) -> Self {
        self.forwarded_for_ip = forwarded_for_ip;
        self
    }

    /// The reverse-path from `MAIL FROM`. Empty for bounces.
    #[must_use]
    pub fn from(&self) -> &str {
        &self.from
    }

    /// The forward-paths from `RCPT TO`, in the order they were given.
    #[must_use]
    pub fn to(&self) -> &[String] {
        &self.to
    }

    /// The decoded `Subject` header.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// The mail data exactly as stored, including the `Received` header stamped by the server.
    #[must_use]
    pub fn raw_body(&self) -> &[u8] {
        &self.raw_body
    }

    /// The address of the immediate TCP peer.
    #[must_use]
    pub const fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// The original client address reported by an upstream proxy, if any.
    #[must_use]
    pub fn forwarded_for_ip(&self) -> Option<&str> {
        self.forwarded_for_ip.as_deref()
    }

    /// Decode the body into its MIME parts.
    ///
    /// Nested multiparts are flattened: only leaf parts are returned, in document order. A
    /// message that is not multipart is returned as a single part.
    ///
    /// # Errors
    ///
    /// [`Error::Mail`] if the message or a part's transfer encoding cannot be decoded.
    pub fn parts(&self) -> Result<Vec<Part>> {
        fn collect_leaves(mail: &ParsedMail<'_>, parts: &mut Vec<Part>) -> Result<()> {
            if mail.subparts.is_empty() {
                parts.push(Part::from_parsed(mail)?);
                return Ok(());
            }

            mail.subparts
                .iter()
                .try_for_each(|subpart| collect_leaves(subpart, parts))
        }

        let parsed = mailparse::parse_mail(&self.raw_body)?;
        let mut parts = Vec::new();
        collect_leaves(&parsed, &mut parts)?;

        Ok(parts)
    }
}

/// One leaf of a MIME message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Part {
    /// Create a part from its headers, in order, and its decoded body.
    #[must_use]
    pub const fn new(headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
        Self { headers, body }
    }

    fn from_parsed(mail: &ParsedMail<'_>) -> Result<Self> {
        let headers = mail
            .headers
            .iter()
            .map(|header| (header.get_key(), header.get_value()))
            .collect();

        Ok(Self::new(headers, mail.get_body_raw()?))
    }

    /// The headers of the part, in order.
    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// The value of the first header named `name`, compared case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// The raw `Content-Type` header.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    /// Parse the `Content-Type` header.
    ///
    /// # Errors
    ///
    /// [`Error::ContentTypeUnparsable`] if the header is missing or is not a valid media type.
    pub fn media_type(&self) -> Result<Mime> {
        let Some(value) = self.content_type() else {
            return Err(Error::ContentTypeUnparsable {
                value: String::new(),
                reason: "no Content-Type header".to_owned(),
            });
        };

        value
            .trim()
            .parse()
            .map_err(|err: mime::FromStrError| Error::ContentTypeUnparsable {
                value: value.to_owned(),
                reason: err.to_string(),
            })
    }

    /// The body with its transfer encoding removed.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Consume the part, returning its decoded body.
    #[must_use]
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }
}
