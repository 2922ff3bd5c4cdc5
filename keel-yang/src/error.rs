//
// Copyright (c) The Keel Core Contributors
//
// SPDX-License-Identifier: MIT
//

use keel_utils::netconf::{ErrorTag, ErrorType, RpcError};

// YANG schema and instance-data errors.
#[derive(Debug)]
pub enum Error {
    // Module parsing and resolution.
    Parse { line: usize, reason: String },
    ModuleNotFound(String),
    CircularImport(String),
    SubmoduleMismatch { submodule: String, module: String },
    UnknownPrefix { module: String, prefix: String },
    UnresolvedGrouping { module: String, name: String },
    UnresolvedTypedef { module: String, name: String },
    UnresolvedIdentity { module: String, name: String },
    UnresolvedAugment { module: String, target: String },
    CyclicLeafref(String),
    UnresolvedLeafref { path: String, target: String },
    BadSchemaPath(String),
    // Instance data reading.
    MalformedMessage(String),
    UnknownNamespace(String),
    UnknownElement(String),
    BadElement { path: String, reason: String },
    // XPath.
    XPathSyntax(String),
    XPathUnknownPrefix(String),
    XPathUnknownFunction(String),
    XPathType(String),
}

// ===== impl Error =====

impl Error {
    /// Maps the error onto the RFC 6241 wire taxonomy.
    pub fn to_rpc_error(&self) -> RpcError {
        let error = match self {
            Error::MalformedMessage(..) => {
                RpcError::new(ErrorType::Rpc, ErrorTag::MalformedMessage)
            }
            Error::UnknownNamespace(..) => {
                RpcError::new(ErrorType::Application, ErrorTag::UnknownNamespace)
            }
            Error::UnknownElement(path) => {
                RpcError::new(ErrorType::Application, ErrorTag::UnknownElement)
                    .with_path(path.clone())
            }
            Error::BadElement { path, .. } => {
                RpcError::new(ErrorType::Application, ErrorTag::BadElement)
                    .with_path(path.clone())
            }
            _ => RpcError::new(ErrorType::Application, ErrorTag::OperationFailed),
        };
        error.with_message(self.to_string())
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Parse { line, reason } => {
                write!(f, "YANG parse error on line {}: {}", line, reason)
            }
            Error::ModuleNotFound(name) => {
                write!(f, "module not found: {}", name)
            }
            Error::CircularImport(name) => {
                write!(f, "circular import involving module {}", name)
            }
            Error::SubmoduleMismatch { submodule, module } => {
                write!(
                    f,
                    "submodule {} does not belong to module {}",
                    submodule, module
                )
            }
            Error::UnknownPrefix { module, prefix } => {
                write!(f, "unknown prefix {} in module {}", prefix, module)
            }
            Error::UnresolvedGrouping { module, name } => {
                write!(f, "unresolved grouping {} in module {}", name, module)
            }
            Error::UnresolvedTypedef { module, name } => {
                write!(f, "unresolved typedef {} in module {}", name, module)
            }
            Error::UnresolvedIdentity { module, name } => {
                write!(f, "unresolved identity {} in module {}", name, module)
            }
            Error::UnresolvedAugment { module, target } => {
                write!(
                    f,
                    "augment target {} of module {} not found",
                    target, module
                )
            }
            Error::CyclicLeafref(path) => {
                write!(f, "cyclic leafref at {}", path)
            }
            Error::UnresolvedLeafref { path, target } => {
                write!(f, "leafref at {} has no target {}", path, target)
            }
            Error::BadSchemaPath(path) => {
                write!(f, "invalid schema path: {}", path)
            }
            Error::MalformedMessage(reason) => {
                write!(f, "malformed message: {}", reason)
            }
            Error::UnknownNamespace(ns) => {
                write!(f, "unknown namespace: {}", ns)
            }
            Error::UnknownElement(path) => {
                write!(f, "unknown element: {}", path)
            }
            Error::BadElement { path, reason } => {
                write!(f, "bad element {}: {}", path, reason)
            }
            Error::XPathSyntax(reason) => {
                write!(f, "xpath syntax error: {}", reason)
            }
            Error::XPathUnknownPrefix(prefix) => {
                write!(f, "xpath: unknown prefix {}", prefix)
            }
            Error::XPathUnknownFunction(name) => {
                write!(f, "xpath: unknown function {}", name)
            }
            Error::XPathType(reason) => {
                write!(f, "xpath type error: {}", reason)
            }
        }
    }
}

impl std::error::Error for Error {}
