//
// Copyright (c) The Keel Core Contributors
//
// SPDX-License-Identifier: MIT
//

use serde::{Deserialize, Serialize};

use crate::SessionId;

// Base NETCONF namespace (RFC 6241).
pub const NS_NETCONF_BASE: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";

// NETCONF notification namespace (RFC 5277).
pub const NS_NETCONF_NOTIFICATION: &str =
    "urn:ietf:params:xml:ns:netconf:notification:1.0";

/// `error-type` of an `<rpc-error>` (RFC 6241 Appendix A).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum ErrorType {
    Transport,
    Rpc,
    Protocol,
    Application,
}

/// `error-tag` of an `<rpc-error>` (RFC 6241 Appendix A).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum ErrorTag {
    InUse,
    InvalidValue,
    TooBig,
    TooManyElements,
    MissingAttribute,
    BadAttribute,
    UnknownAttribute,
    MissingElement,
    BadElement,
    UnknownElement,
    UnknownNamespace,
    AccessDenied,
    LockDenied,
    ResourceDenied,
    RollbackFailed,
    DataExists,
    DataMissing,
    OperationNotSupported,
    OperationFailed,
    MalformedMessage,
}

/// `error-severity` of an `<rpc-error>`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum ErrorSeverity {
    Error,
    Warning,
}

/// Structured NETCONF error, carried across the engine and rendered as an
/// `<rpc-error>` (or RESTCONF error object) at the front-end boundary.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RpcError {
    pub error_type: ErrorType,
    pub tag: ErrorTag,
    pub severity: ErrorSeverity,
    pub app_tag: Option<String>,
    // Instance path of the offending node, when known.
    pub path: Option<String>,
    pub message: Option<String>,
    // Contents of `<error-info>`, as (element, text) pairs.
    pub info: Vec<(String, String)>,
}

// ===== impl ErrorType =====

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Transport => "transport",
            ErrorType::Rpc => "rpc",
            ErrorType::Protocol => "protocol",
            ErrorType::Application => "application",
        }
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ===== impl ErrorTag =====

impl ErrorTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorTag::InUse => "in-use",
            ErrorTag::InvalidValue => "invalid-value",
            ErrorTag::TooBig => "too-big",
            ErrorTag::TooManyElements => "too-many-elements",
            ErrorTag::MissingAttribute => "missing-attribute",
            ErrorTag::BadAttribute => "bad-attribute",
            ErrorTag::UnknownAttribute => "unknown-attribute",
            ErrorTag::MissingElement => "missing-element",
            ErrorTag::BadElement => "bad-element",
            ErrorTag::UnknownElement => "unknown-element",
            ErrorTag::UnknownNamespace => "unknown-namespace",
            ErrorTag::AccessDenied => "access-denied",
            ErrorTag::LockDenied => "lock-denied",
            ErrorTag::ResourceDenied => "resource-denied",
            ErrorTag::RollbackFailed => "rollback-failed",
            ErrorTag::DataExists => "data-exists",
            ErrorTag::DataMissing => "data-missing",
            ErrorTag::OperationNotSupported => "operation-not-supported",
            ErrorTag::OperationFailed => "operation-failed",
            ErrorTag::MalformedMessage => "malformed-message",
        }
    }
}

impl std::fmt::Display for ErrorTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ===== impl ErrorSeverity =====

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Error => "error",
            ErrorSeverity::Warning => "warning",
        }
    }
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ===== impl RpcError =====

impl RpcError {
    pub fn new(error_type: ErrorType, tag: ErrorTag) -> RpcError {
        RpcError {
            error_type,
            tag,
            severity: ErrorSeverity::Error,
            app_tag: None,
            path: None,
            message: None,
            info: vec![],
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> RpcError {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> RpcError {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub fn with_info(
        mut self,
        element: impl Into<String>,
        text: impl Into<String>,
    ) -> RpcError {
        self.info.push((element.into(), text.into()));
        self
    }

    /// `access-denied` on a data node (RFC 8341 section 3.4.5).
    pub fn access_denied_application() -> RpcError {
        RpcError::new(ErrorType::Application, ErrorTag::AccessDenied)
            .with_message("access denied")
    }

    /// `access-denied` on a protocol operation (RFC 8341 section 3.4.4).
    pub fn access_denied_protocol() -> RpcError {
        RpcError::new(ErrorType::Protocol, ErrorTag::AccessDenied)
            .with_message("access denied")
    }

    /// `lock-denied` with the mandatory `<session-id>` error-info element.
    pub fn lock_denied(holder: SessionId) -> RpcError {
        RpcError::new(ErrorType::Protocol, ErrorTag::LockDenied)
            .with_message("lock is already held")
            .with_info("session-id", holder.to_string())
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag)?;
        if let Some(path) = &self.path {
            write!(f, " ({})", path)?;
        }
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

impl std::error::Error for RpcError {}
