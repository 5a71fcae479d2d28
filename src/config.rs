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

//! Command line and environment configuration for the `smtp_intake` binary.

use std::{
    borrow::Cow,
    net::{AddrParseError, IpAddr},
};

use clap::Parser;

/// Default listen address of the binary.
pub const DEFAULT_ADDR: &str = ":8080";

/// Default message size limit of the binary, in bytes.
pub const DEFAULT_MAX_SIZE: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(about, version)]
pub struct Config {
    /// Address to listen on. A bare `:port` listens on every interface
    #[arg(long, env = "ADDR", default_value = DEFAULT_ADDR)]
    pub addr: String,

    /// Domain the server identifies itself as
    #[arg(long, env = "SMTP_HOSTNAME", default_value = "localhost")]
    pub hostname: String,

    /// Largest accepted message in bytes, `0` for no limit
    #[arg(long, env = "MAX_SIZE", default_value_t = DEFAULT_MAX_SIZE)]
    pub max_size: usize,

    /// Peers allowed to send `PROXY`. Accepts it from anyone when empty
    #[arg(
        long = "trusted-proxy",
        env = "TRUSTED_PROXIES",
        value_delimiter = ',',
        value_parser = parse_trusted_proxy
    )]
    trusted_proxies: Vec<Option<IpAddr>>,
}

/// Parse one entry of the trusted proxy list. Blank entries, as left by `TRUSTED_PROXIES=""` or a
/// trailing comma, are skipped.
fn parse_trusted_proxy(value: &str) -> Result<Option<IpAddr>, AddrParseError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }

    value.parse().map(Some)
}

impl Config {
    /// [`Self::addr`] with an empty host filled in as `0.0.0.0`. An empty address, as left by
    /// `ADDR=""`, is [`DEFAULT_ADDR`].
    #[must_use]
    pub fn listen_addr(&self) -> Cow<'_, str> {
        let addr = self.addr.trim();
        if addr.is_empty() {
            Cow::Owned(format!("0.0.0.0{DEFAULT_ADDR}"))
        } else if addr.starts_with(':') {
            Cow::Owned(format!("0.0.0.0{addr}"))
        } else {
            Cow::Borrowed(addr)
        }
    }

    /// The peers allowed to send `PROXY`. Empty means every peer is.
    pub fn trusted_proxies(&self) -> impl Iterator<Item = IpAddr> + '_ {
        self.trusted_proxies.iter().flatten().copied()
    }

    #[must_use]
    pub const fn max_size(&self) -> Option<usize> {
        match self.max_size {
            0 => None,
            max_size => Some(max_size),
        }
    }
}
