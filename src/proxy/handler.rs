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

//! Plugs the PROXY preamble into the session engine.

use std::net::IpAddr;

use tracing::{debug, info};

use super::{ProxyHeaderV1, KEYWORD};
use crate::{
    connection::Connection,
    error::{Error, Result},
    extension::Extension,
};

/// The `PROXY` command.
///
/// Records the end user's address from the header as the forwarded-for IP of the connection.
/// The address is recorded at most once per connection; a second `PROXY` is an error.
///
/// With no trusted proxies configured, any peer may claim any address. Production deployments
/// should list the proxies in front of the server with [`Self::with_trusted`].
#[derive(Debug, Clone, Default)]
pub struct ProxyHandler {
    /// Peers allowed to send `PROXY`. Empty means everyone.
    trusted: Vec<IpAddr>,
}

impl ProxyHandler {
    /// Create a handler that accepts `PROXY` from any peer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            trusted: Vec::new(),
        }
    }

    /// Create a handler that only accepts `PROXY` from the given peers.
    ///
    /// An empty iterator is equivalent to [`Self::new`].
    pub fn with_trusted(trusted: impl IntoIterator<Item = IpAddr>) -> Self {
        Self {
            trusted: trusted.into_iter().map(|ip| IpAddr::to_canonical(&ip)).collect(),
        }
    }

    /// Whether `peer` may send a `PROXY` command.
    #[must_use]
    pub fn trusts(&self, peer: IpAddr) -> bool {
        self.trusted.is_empty() || self.trusted.contains(&peer.to_canonical())
    }
}

impl Extension for ProxyHandler {
    fn keyword(&self) -> &'static str {
        KEYWORD
    }

    fn handle(&self, connection: &mut Connection, method_body: &str) -> Result<()> {
        let remote_ip = connection.remote_addr().ip();
        info!(%remote_ip, "PROXY command received");

        if !self.trusts(remote_ip) {
            return Err(Error::UntrustedProxy(remote_ip));
        }
        if connection.forwarded_for_ip().is_some() {
            return Err(Error::RepeatedProxy);
        }

        let header = ProxyHeaderV1::parse(method_body)?;
        debug!(?header, "parsed PROXY header");

        connection.set_forwarded_for_ip(header.end_user_ip());
        Ok(())
    }
}
