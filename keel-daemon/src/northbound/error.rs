//
// Copyright (c) The Keel Core Contributors
//
// SPDX-License-Identifier: MIT
//

use keel_northbound as northbound;
use keel_utils::netconf::RpcError;

//
// Type aliases.
//
pub type Result<T> = std::result::Result<T, Error>;

//
// Engine errors.
//
#[derive(Debug)]
pub enum Error {
    Datastore(keel_datastore::Error),
    Yang(keel_yang::Error),
    Transaction(northbound::error::Error),
    Rpc(RpcError),
    Io(std::io::Error),
}

// ===== impl Error =====

impl Error {
    /// Shape of the error on the wire.
    pub fn to_rpc_error(&self) -> RpcError {
        match self {
            Error::Datastore(err) => err.to_rpc_error(),
            Error::Yang(err) => err.to_rpc_error(),
            Error::Transaction(err) => err.to_rpc_error(),
            Error::Rpc(err) => err.clone(),
            Error::Io(err) => RpcError::new(
                keel_utils::netconf::ErrorType::Application,
                keel_utils::netconf::ErrorTag::OperationFailed,
            )
            .with_message(err.to_string()),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Datastore(err) => err.fmt(f),
            Error::Yang(err) => err.fmt(f),
            Error::Transaction(err) => err.fmt(f),
            Error::Rpc(err) => err.fmt(f),
            Error::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for Error {}

impl From<keel_datastore::Error> for Error {
    fn from(error: keel_datastore::Error) -> Error {
        Error::Datastore(error)
    }
}

impl From<keel_yang::Error> for Error {
    fn from(error: keel_yang::Error) -> Error {
        Error::Yang(error)
    }
}

impl From<northbound::error::Error> for Error {
    fn from(error: northbound::error::Error) -> Error {
        Error::Transaction(error)
    }
}

impl From<RpcError> for Error {
    fn from(error: RpcError) -> Error {
        Error::Rpc(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Error {
        Error::Io(error)
    }
}
