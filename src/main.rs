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

use clap::Parser;
use smtp_intake::{proxy, Config, MessageInspector, ProxyHandler, Server};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();

    let mut server = Server::new(MessageInspector)
        .with_hostname(config.hostname.clone())
        .with_max_size(config.max_size());
    server.extend(
        proxy::KEYWORD,
        ProxyHandler::with_trusted(config.trusted_proxies()),
    );

    let addr = config.listen_addr();
    if let Err(err) = server.listen_and_serve(&*addr).await {
        error!(%err, %addr, "server stopped");
        std::process::exit(1);
    }
}
