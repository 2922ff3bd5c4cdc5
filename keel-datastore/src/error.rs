//
// Copyright (c) The Keel Core Contributors
//
// SPDX-License-Identifier: MIT
//

use keel_utils::SessionId;
use keel_utils::netconf::{ErrorTag, ErrorType, RpcError};
use tracing::warn;

use crate::DbName;

// Datastore errors.
#[derive(Debug)]
pub enum Error {
    Io(DbName, std::io::Error),
    Locked { db: DbName, holder: SessionId },
    Corrupt { db: DbName, source: keel_yang::Error },
    OperationNotSupported { db: DbName, operation: &'static str },
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::Io(db, error) => {
                warn!(%db, error = %error, "{}", self);
            }
            Error::Locked { db, holder } => {
                warn!(%db, %holder, "{}", self);
            }
            Error::Corrupt { db, source } => {
                warn!(%db, error = %source, "{}", self);
            }
            Error::OperationNotSupported { db, operation } => {
                warn!(%db, %operation, "{}", self);
            }
        }
    }

    /// Maps the error onto the RFC 6241 wire taxonomy.
    pub fn to_rpc_error(&self) -> RpcError {
        match self {
            Error::Io(..) => {
                RpcError::new(ErrorType::Application, ErrorTag::OperationFailed)
                    .with_message(self.to_string())
            }
            Error::Locked { holder, .. } => RpcError::lock_denied(*holder),
            Error::Corrupt { .. } => {
                RpcError::new(ErrorType::Application, ErrorTag::OperationFailed)
                    .with_message(self.to_string())
            }
            Error::OperationNotSupported { .. } => RpcError::new(
                ErrorType::Protocol,
                ErrorTag::OperationNotSupported,
            )
            .with_message(self.to_string()),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(db, error) => {
                write!(f, "datastore {} I/O error: {}", db, error)
            }
            Error::Locked { db, holder } => {
                write!(f, "datastore {} is locked by session {}", db, holder)
            }
            Error::Corrupt { db, source } => {
                write!(f, "datastore {} file is corrupt: {}", db, source)
            }
            Error::OperationNotSupported { db, operation } => {
                write!(f, "operation {} not supported on {}", operation, db)
            }
        }
    }
}

impl std::error::Error for Error {}
