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

//! The service object owning everything a session needs: identity, limits, extensions, and the
//! message handler.

use std::{fmt, io, sync::Arc};

use futures_core::Stream;
use futures_util::{pin_mut, StreamExt};
use tokio::{
    net::{TcpListener, ToSocketAddrs},
    task::JoinHandle,
};
use tracing::{error, info, warn};

use crate::{
    connection,
    extension::{Extension, Extensions},
    message::Handler,
};

/// Built once at startup and shared by every session through an [`Arc`].
pub struct Server {
    hostname: String,
    max_size: Option<usize>,
    extensions: Extensions,
    handler: Box<dyn Handler>,
}

impl Server {
    /// Create a server handing every delivered message to `handler`.
    ///
    /// Identifies itself as `localhost`, has no size limit, and no extensions.
    #[must_use]
    pub fn new(handler: impl Handler + 'static) -> Self {
        Self {
            hostname: "localhost".to_owned(),
            max_size: None,
            extensions: Extensions::new(),
            handler: Box::new(handler),
        }
    }

    /// The domain used in the greeting, `HELO`/`EHLO` replies, and `Received:` headers.
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// The largest message body accepted, in bytes. `None` accepts anything.
    #[must_use]
    pub fn with_max_size(mut self, max_size: Option<usize>) -> Self {
        self.max_size = max_size;
        self
    }

    /// Register `extension` to handle the command `verb`.
    ///
    /// Registering a verb twice replaces the earlier extension.
    pub fn extend(&mut self, verb: &str, extension: impl Extension + 'static) -> &mut Self {
        if self.extensions.insert(verb, extension).is_some() {
            warn!(verb, "replaced an existing extension");
        }
        self
    }

    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    #[must_use]
    pub const fn max_size(&self) -> Option<usize> {
        self.max_size
    }

    #[must_use]
    pub const fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub(crate) fn handler(&self) -> &dyn Handler {
        &*self.handler
    }

    /// Accept connections on `listener`, spawning a session for each.
    ///
    /// Yields the [`JoinHandle`] of every spawned session, or the error [`TcpListener::accept`]
    /// failed with. The stream never ends on its own.
    pub fn listen(
        self: Arc<Self>,
        listener: TcpListener,
    ) -> impl Stream<Item = io::Result<JoinHandle<io::Result<()>>>> {
        async_stream::stream! {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        yield Ok(tokio::spawn(connection::handle(stream, Arc::clone(&self))));
                    }
                    Err(err) => yield Err(err),
                }
            }
        }
    }

    /// Serve sessions on `listener` until the process is stopped.
    ///
    /// Failed accepts and failed sessions are logged and do not stop the server.
    ///
    /// # Errors
    ///
    /// - The listener's local address could not be read.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> io::Result<()> {
        info!(addr = %listener.local_addr()?, hostname = self.hostname(), "listening");

        let sessions = self.listen(listener);
        pin_mut!(sessions);

        while let Some(session) = sessions.next().await {
            match session {
                Ok(handle) => {
                    tokio::spawn(async move {
                        match handle.await {
                            Ok(Ok(())) => (),
                            Ok(Err(err)) => warn!(%err, "session ended with an error"),
                            Err(err) => error!(%err, "session task failed"),
                        }
                    });
                }
                Err(err) => warn!(%err, "failed to accept a connection"),
            }
        }

        Ok(())
    }

    /// Bind to `addr` and [`serve`](Self::serve) on it.
    ///
    /// # Errors
    ///
    /// - Binding to `addr` failed.
    pub async fn listen_and_serve(self, addr: impl ToSocketAddrs) -> io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        Arc::new(self).serve(listener).await
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("hostname", &self.hostname)
            .field("max_size", &self.max_size)
            .field("extensions", &self.extensions)
            .finish_non_exhaustive()
    }
}
