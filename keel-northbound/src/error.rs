//
// Copyright (c) The Keel Core Contributors
//
// SPDX-License-Identifier: MIT
//

use keel_utils::netconf::{ErrorTag, ErrorType, RpcError};
use tracing::warn;

use crate::configuration::TransactionPhase;

// Northbound errors.
#[derive(Debug)]
pub enum Error {
    StartCallback { plugin: String, message: String },
    TransactionCallback {
        plugin: String,
        phase: TransactionPhase,
        message: String,
    },
    RpcCallback { plugin: String, message: String },
    UpgradeCallback { plugin: String, message: String },
}

// ===== impl Error =====

impl Error {
    pub fn log(&self) {
        match self {
            Error::StartCallback { plugin, message } => {
                warn!(%plugin, %message, "{}", self);
            }
            Error::TransactionCallback {
                plugin,
                phase,
                message,
            } => {
                warn!(%plugin, ?phase, %message, "{}", self);
            }
            Error::RpcCallback { plugin, message } => {
                warn!(%plugin, %message, "{}", self);
            }
            Error::UpgradeCallback { plugin, message } => {
                warn!(%plugin, %message, "{}", self);
            }
        }
    }

    /// Maps the error onto the RFC 6241 wire taxonomy. Plugin transaction
    /// failures surface as `operation-failed` with the plugin's message
    /// appended.
    pub fn to_rpc_error(&self) -> RpcError {
        RpcError::new(ErrorType::Application, ErrorTag::OperationFailed)
            .with_message(self.to_string())
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::StartCallback { plugin, message } => {
                write!(f, "plugin {} failed to start: {}", plugin, message)
            }
            Error::TransactionCallback {
                plugin,
                phase,
                message,
            } => {
                write!(
                    f,
                    "plugin {} rejected transaction ({:?} phase): {}",
                    plugin, phase, message
                )
            }
            Error::RpcCallback { plugin, message } => {
                write!(f, "plugin {} RPC callback failed: {}", plugin, message)
            }
            Error::UpgradeCallback { plugin, message } => {
                write!(
                    f,
                    "plugin {} upgrade callback failed: {}",
                    plugin, message
                )
            }
        }
    }
}

impl std::error::Error for Error {}
