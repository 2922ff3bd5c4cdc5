//
// Copyright (c) The Keel Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod netconf;
pub mod task;
pub mod user;

use tokio::sync::oneshot;

// One-shot channel used to reply to a request message.
pub type Responder<T> = oneshot::Sender<T>;

/// NETCONF session identifier. Session 0 is reserved and means "no session"
/// (e.g. an unlocked datastore).
pub type SessionId = u32;
