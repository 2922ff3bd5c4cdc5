//
// Copyright (c) The Keel Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Identity of the user behind a front-end session, as asserted by the
/// transport layer (SSH username, TLS client certificate, HTTP auth).
///
/// Access control only sees this record; it never inspects the transport.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct UserCtx {
    pub username: String,
    // Groups asserted by the transport (e.g. from the system group database).
    // NACM merges these with the groups configured under /nacm/groups.
    pub groups: BTreeSet<String>,
}

// ===== impl UserCtx =====

impl UserCtx {
    pub fn new(username: impl Into<String>) -> UserCtx {
        UserCtx {
            username: username.into(),
            groups: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> UserCtx {
        self.groups.insert(group.into());
        self
    }
}

impl std::fmt::Display for UserCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.username)
    }
}
