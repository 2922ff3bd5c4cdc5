//
// Copyright (c) The Keel Core Contributors
//
// SPDX-License-Identifier: MIT
//

use chrono::{DateTime, Utc};
use keel_yang::DataTree;

// Plugin -> Engine messages.
pub mod provider {
    use super::*;

    /// An event notification published by a plugin onto a named stream.
    #[derive(Debug)]
    pub struct Notification {
        pub stream: String,
        pub time: DateTime<Utc>,
        pub data: DataTree,
    }
}
