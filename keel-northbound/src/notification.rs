//
// Copyright (c) The Keel Core Contributors
//
// SPDX-License-Identifier: MIT
//

use chrono::Utc;
use keel_yang::DataTree;
use tracing::debug;

use crate::NbProviderSender;
use crate::api::provider::Notification;

/// Publishes an event notification onto a stream. The payload tree holds
/// the notification element and its arguments.
pub fn send(nb_tx: &NbProviderSender, stream: impl Into<String>, data: DataTree) {
    let stream = stream.into();
    debug!(%stream, "sending notification");

    let _ = nb_tx.send(Notification {
        stream,
        time: Utc::now(),
        data,
    });
}
