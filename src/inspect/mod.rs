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

//! Validates that delivered messages carry a description and an image.

use std::borrow::Cow;

use tracing::{debug, info};

use crate::{
    error::{Error, Result},
    message::{Handler, Message},
};

#[cfg(test)]
mod test;

/// Extracts the description (`text/plain`) and the image (`image/*`) from a multipart message.
///
/// Registered as the server's [`Handler`], a message missing either part is rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageInspector;

/// The content [`MessageInspector::inspect`] found in a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inspection {
    description: Vec<u8>,
    image: Vec<u8>,
}

impl Inspection {
    /// The body of the first `text/plain` part, lossily decoded as UTF-8.
    #[must_use]
    pub fn description(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.description)
    }

    /// The decoded body of the first `image/*` part.
    #[must_use]
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    #[must_use]
    pub fn image_len(&self) -> usize {
        self.image.len()
    }
}

impl MessageInspector {
    /// Find the description and the image of `message`.
    ///
    /// Parts are scanned in order and the first part of each kind wins. Scanning stops as soon as
    /// both have been found, so parts after that are never looked at.
    ///
    /// # Errors
    ///
    /// - [`Error::NoRecipients`] if the message has no recipients.
    /// - [`Error::Mail`] if the body cannot be decoded.
    /// - [`Error::ContentTypeUnparsable`] if a scanned part has a bad `Content-Type`.
    /// - [`Error::MissingContent`] if either part is missing.
    pub fn inspect(&self, message: &Message) -> Result<Inspection> {
        let to = message.to().first().ok_or(Error::NoRecipients)?;
        info!(
            to = %to,
            from = message.from(),
            subject = message.subject(),
            "new message"
        );
        debug!(body = %String::from_utf8_lossy(message.raw_body()), "raw message body");

        let mut description = None;
        let mut image = None;

        for part in message.parts()? {
            let media_type = part.media_type()?.essence_str().to_ascii_lowercase();

            if description.is_none() && media_type.starts_with("text/plain") {
                description = Some(part.into_body());
            } else if image.is_none() && media_type.starts_with("image/") {
                image = Some(part.into_body());
            }

            if description.is_some() && image.is_some() {
                break;
            }
        }

        let (Some(description), Some(image)) = (description, image) else {
            return Err(Error::MissingContent);
        };

        let inspection = Inspection { description, image };
        info!(
            description = %inspection.description(),
            image_len = inspection.image_len(),
            "inspected message"
        );

        Ok(inspection)
    }
}

impl Handler for MessageInspector {
    fn handle(&self, message: &Message) -> Result<()> {
        self.inspect(message).map(drop)
    }
}
