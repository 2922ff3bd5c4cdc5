//
// Copyright (c) The Keel Core Contributors
//
// SPDX-License-Identifier: MIT
//

use tracing::{debug, debug_span, trace_span};

use crate::configuration::TransactionPhase;

#[derive(Debug)]
pub enum Debug<'a> {
    PluginRegistered(&'a str),
    TransactionCallback(&'a str, TransactionPhase, u64),
    StateDataCallback(&'a str),
    RpcCallback(&'a str, &'a str),
    UpgradeCallback(&'a str, &'a str),
}

// ===== impl Debug =====

impl Debug<'_> {
    pub fn log(&self) {
        match self {
            Debug::PluginRegistered(name) => {
                debug_span!("northbound").in_scope(|| {
                    debug!(%name, "{}", self);
                });
            }
            Debug::TransactionCallback(name, phase, id) => {
                debug_span!("northbound").in_scope(|| {
                    debug!(%name, ?phase, transaction = %id, "{}", self);
                });
            }
            Debug::StateDataCallback(name) => {
                trace_span!("northbound").in_scope(|| {
                    debug!(%name, "{}", self);
                });
            }
            Debug::RpcCallback(name, rpc) => {
                debug_span!("northbound").in_scope(|| {
                    debug!(%name, %rpc, "{}", self);
                });
            }
            Debug::UpgradeCallback(name, namespace) => {
                debug_span!("northbound").in_scope(|| {
                    debug!(%name, %namespace, "{}", self);
                });
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::PluginRegistered(..) => {
                write!(f, "plugin registered")
            }
            Debug::TransactionCallback(..) => {
                write!(f, "transaction callback")
            }
            Debug::StateDataCallback(..) => {
                write!(f, "statedata callback")
            }
            Debug::RpcCallback(..) => {
                write!(f, "rpc callback")
            }
            Debug::UpgradeCallback(..) => {
                write!(f, "upgrade callback")
            }
        }
    }
}
