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

//! The PROXY protocol v1 preamble, accepted as an SMTP command.
//!
//! A TCP proxy in front of the server announces the original client with a single text line:
//!
//! ```text
//! PROXY TCP4 209.85.214.42 45.76.28.175 33372 25
//!       |    |             |            |     |
//!       |    source        destination  |     destination port
//!       protocol                        source port
//! ```
//!
//! The engine hands everything after the keyword to [`ProxyHandler`], which parses it with
//! [`ProxyHeaderV1::parse`].
//!
//! <https://www.haproxy.org/download/1.8/doc/proxy-protocol.txt>

use std::str::FromStr;

use crate::error::{Error, Result};

mod handler;

pub use handler::ProxyHandler;

/// The command verb a PROXY v1 header starts with.
pub const KEYWORD: &str = "PROXY";

/// The fields of a PROXY v1 header.
///
/// The fields are stored exactly as they appeared on the wire. Nothing checks that the addresses
/// are addresses, that the ports are numbers, or that the protocol is `TCP4`, `TCP6`, or
/// `UNKNOWN`.
#[derive(PartialEq, Eq, Debug, Hash, Clone)]
pub struct ProxyHeaderV1 {
    proto_name: String,
    end_user_ip: String,
    end_user_port: String,
    proxy_ip: String,
    proxy_port: String,
}

impl ProxyHeaderV1 {
    /// Parse the method body of a `PROXY` command, i.e. the line without the leading keyword.
    ///
    /// The body is split on single spaces. Fields are bound by position:
    ///
    /// | Position | Field                   |
    /// |----------|-------------------------|
    /// | 0        | [`Self::proto_name`]    |
    /// | 1        | [`Self::end_user_ip`]   |
    /// | 2        | [`Self::proxy_ip`]      |
    /// | 3        | [`Self::end_user_port`] |
    /// | 4        | [`Self::proxy_port`]    |
    ///
    /// Anything after the fifth field is ignored.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedHeader`] carrying `method_body` if it holds fewer than five fields.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use smtp_intake::ProxyHeaderV1;
    /// let header = ProxyHeaderV1::parse("TCP4 209.85.214.42 45.76.28.175 33372 25").unwrap();
    ///
    /// assert_eq!(header.end_user_ip(), "209.85.214.42");
    /// assert_eq!(header.proxy_port(), "25");
    /// assert!(ProxyHeaderV1::parse("TCP4 1.2.3.4").is_err());
    /// ```
    pub fn parse(method_body: &str) -> Result<Self> {
        let fields: Vec<&str> = method_body.split(' ').collect();

        let [proto_name, end_user_ip, proxy_ip, end_user_port, proxy_port, ..] = fields[..] else {
            return Err(Error::MalformedHeader(method_body.to_owned()));
        };

        Ok(Self {
            proto_name: proto_name.to_owned(),
            end_user_ip: end_user_ip.to_owned(),
            end_user_port: end_user_port.to_owned(),
            proxy_ip: proxy_ip.to_owned(),
            proxy_port: proxy_port.to_owned(),
        })
    }

    /// The transport protocol, normally `TCP4`, `TCP6`, or `UNKNOWN`.
    #[must_use]
    pub fn proto_name(&self) -> &str {
        &self.proto_name
    }

    /// The address of the client that connected to the proxy.
    #[must_use]
    pub fn end_user_ip(&self) -> &str {
        &self.end_user_ip
    }

    /// The fourth field, which the protocol calls the source port.
    #[must_use]
    pub fn end_user_port(&self) -> &str {
        &self.end_user_port
    }

    /// The address the client connected to on the proxy.
    #[must_use]
    pub fn proxy_ip(&self) -> &str {
        &self.proxy_ip
    }

    /// The fifth field, which the protocol calls the destination port.
    #[must_use]
    pub fn proxy_port(&self) -> &str {
        &self.proxy_port
    }
}

impl FromStr for ProxyHeaderV1 {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
