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

//! Extra command verbs, registered with the [`crate::Server`] at startup.
//!
//! Any verb the session engine does not implement itself is looked up in [`Extensions`]. A
//! registered [`Extension`] is also advertised in the reply to `EHLO`.

use std::collections::HashMap;

use crate::{connection::Connection, error::Result};

/// A command verb provided outside the session engine.
///
/// Extensions only run before a mail transaction starts. On success the client gets no reply;
/// on error the client is sent a `554` carrying the error and the connection is closed.
pub trait Extension: Send + Sync {
    /// The keyword listed in the reply to `EHLO`.
    fn keyword(&self) -> &'static str;

    /// Handle the command, given everything on the line after the verb and its space.
    ///
    /// # Errors
    ///
    /// Whatever the extension rejects the command with.
    fn handle(&self, connection: &mut Connection, method_body: &str) -> Result<()>;
}

/// The table mapping command verbs to their [`Extension`].
///
/// Verbs are case-insensitive. Verbs the engine implements itself (`HELO`, `MAIL`, ...) shadow
/// any extension registered under the same name.
#[derive(Default)]
pub struct Extensions {
    table: HashMap<String, Box<dyn Extension>>,
}

impl Extensions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `extension` under `verb`, returning the extension it replaced, if any.
    pub fn insert(
        &mut self,
        verb: &str,
        extension: impl Extension + 'static,
    ) -> Option<Box<dyn Extension>> {
        self.table.insert(verb.to_ascii_uppercase(), Box::new(extension))
    }

    /// Look up the extension registered under `verb`.
    #[must_use]
    pub fn get(&self, verb: &str) -> Option<&dyn Extension> {
        self.table
            .get(&verb.to_ascii_uppercase())
            .map(|extension| &**extension)
    }

    /// The keywords of every registered extension, sorted and without duplicates.
    pub fn keywords(&self) -> impl Iterator<Item = &'static str> {
        let mut keywords: Vec<_> = self
            .table
            .values()
            .map(|extension| extension.keyword())
            .collect();
        keywords.sort_unstable();
        keywords.dedup();

        keywords.into_iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl std::fmt::Debug for Extensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.table.keys()).finish()
    }
}
