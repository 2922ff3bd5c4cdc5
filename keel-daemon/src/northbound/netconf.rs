//
// Copyright (c) The Keel Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! NETCONF operation parsing and reply construction (RFC 6241).
//!
//! The front-ends deliver one XML-encoded `<rpc>` document per request; the
//! session framing (hello exchange, chunked encoding) stays on their side
//! of the socket.

use chrono::{DateTime, Utc};
use keel_datastore::DbName;
use keel_datastore::edit::{DefaultOperation, ErrorOption, TestOption};
use keel_utils::SessionId;
use keel_utils::netconf::{
    ErrorTag, ErrorType, NS_NETCONF_BASE, NS_NETCONF_NOTIFICATION, RpcError,
};
use keel_yang::{DataTree, NodeId, xml};

/// Per-request metadata carried on the `<rpc>` element. The username and
/// group set are asserted by the transport front-end; this is the internal
/// contract of the local socket.
#[derive(Clone, Debug, Default)]
pub struct RpcHeader {
    pub message_id: Option<String>,
    pub username: Option<String>,
    pub groups: Vec<String>,
}

/// A parsed NETCONF operation.
#[derive(Debug)]
pub enum Operation {
    Get {
        filter: Option<String>,
    },
    GetConfig {
        source: DbName,
        filter: Option<String>,
    },
    EditConfig {
        target: DbName,
        default_operation: DefaultOperation,
        test_option: TestOption,
        error_option: ErrorOption,
        config: DataTree,
    },
    CopyConfig {
        source: DbName,
        target: DbName,
    },
    DeleteConfig {
        target: DbName,
    },
    Lock {
        target: DbName,
    },
    Unlock {
        target: DbName,
    },
    Commit,
    DiscardChanges,
    Validate {
        source: DbName,
    },
    CloseSession,
    KillSession {
        session_id: SessionId,
    },
    CreateSubscription {
        stream: String,
        filter: Option<String>,
        start_time: Option<DateTime<Utc>>,
        stop_time: Option<DateTime<Utc>>,
    },
    // Plugin-defined RPC, dispatched through the plugin registry.
    PluginRpc {
        name: String,
        namespace: String,
        input: DataTree,
    },
}

// ===== impl Operation =====

impl Operation {
    /// Operation name as used for access-control rule matching.
    pub fn rpc_name(&self) -> &str {
        match self {
            Operation::Get { .. } => "get",
            Operation::GetConfig { .. } => "get-config",
            Operation::EditConfig { .. } => "edit-config",
            Operation::CopyConfig { .. } => "copy-config",
            Operation::DeleteConfig { .. } => "delete-config",
            Operation::Lock { .. } => "lock",
            Operation::Unlock { .. } => "unlock",
            Operation::Commit => "commit",
            Operation::DiscardChanges => "discard-changes",
            Operation::Validate { .. } => "validate",
            Operation::CloseSession => "close-session",
            Operation::KillSession { .. } => "kill-session",
            Operation::CreateSubscription { .. } => "create-subscription",
            Operation::PluginRpc { name, .. } => name,
        }
    }
}

// ===== helper functions =====

fn malformed(reason: impl Into<String>) -> RpcError {
    RpcError::new(ErrorType::Rpc, ErrorTag::MalformedMessage)
        .with_message(reason)
}

fn missing_element(name: &str) -> RpcError {
    RpcError::new(ErrorType::Protocol, ErrorTag::MissingElement)
        .with_message(format!("missing element {}", name))
        .with_info("bad-element", name)
}

// Parses `<source>`/`<target>` into a datastore name.
fn parse_db(
    tree: &DataTree,
    op: NodeId,
    wrapper: &str,
) -> Result<DbName, RpcError> {
    let container = tree
        .find_child(op, wrapper, None)
        .ok_or_else(|| missing_element(wrapper))?;
    let child = tree
        .children(container)
        .first()
        .copied()
        .ok_or_else(|| missing_element(wrapper))?;
    let name = &tree.node(child).name;
    name.parse().map_err(|_| {
        RpcError::new(ErrorType::Protocol, ErrorTag::InvalidValue)
            .with_message(format!("unknown datastore {}", name))
    })
}

// Parses `<filter>`. Only XPath filters are supported.
fn parse_filter(
    tree: &DataTree,
    op: NodeId,
) -> Result<Option<String>, RpcError> {
    let Some(filter) = tree.find_child(op, "filter", None) else {
        return Ok(None);
    };
    match tree.attr_get(filter, "type") {
        Some("xpath") | None => {
            let select = tree.attr_get(filter, "select").ok_or_else(|| {
                RpcError::new(ErrorType::Protocol, ErrorTag::MissingAttribute)
                    .with_message("xpath filter without select attribute")
                    .with_info("bad-attribute", "select")
            })?;
            Ok(Some(select.to_owned()))
        }
        Some(other) => Err(RpcError::new(
            ErrorType::Protocol,
            ErrorTag::OperationNotSupported,
        )
        .with_message(format!("unsupported filter type {}", other))),
    }
}

// Extracts the children of a wrapper element into their own tree.
fn extract_subtree(tree: &DataTree, parent: NodeId) -> DataTree {
    let mut out = DataTree::new();
    for child in tree.children(parent) {
        out.copy_from(out.root(), tree, *child);
    }
    out
}

// ===== global functions =====

/// Parses one `<rpc>` document.
pub fn parse_rpc(text: &str) -> Result<(RpcHeader, Operation), RpcError> {
    let tree = xml::read(text).map_err(|err| err.to_rpc_error())?;
    let rpc = tree.children(tree.root())[0];
    if tree.node(rpc).name != "rpc" {
        return Err(malformed("expected <rpc> element"));
    }

    let header = RpcHeader {
        message_id: tree.attr_get(rpc, "message-id").map(str::to_owned),
        username: tree.attr_get(rpc, "username").map(str::to_owned),
        groups: tree
            .attr_get(rpc, "groups")
            .map(|groups| {
                groups.split_ascii_whitespace().map(str::to_owned).collect()
            })
            .unwrap_or_default(),
    };

    let op = tree
        .children(rpc)
        .first()
        .copied()
        .ok_or_else(|| malformed("empty <rpc> element"))?;
    let op_node = tree.node(op);

    let operation = match op_node.name.as_str() {
        "get" => Operation::Get {
            filter: parse_filter(&tree, op)?,
        },
        "get-config" => Operation::GetConfig {
            source: parse_db(&tree, op, "source")?,
            filter: parse_filter(&tree, op)?,
        },
        "edit-config" => {
            let target = parse_db(&tree, op, "target")?;
            let leaf = |name: &str| {
                tree.find_child(op, name, None)
                    .and_then(|child| tree.node(child).value.clone())
            };
            let default_operation = match leaf("default-operation") {
                Some(value) => DefaultOperation::from_str(&value)
                    .ok_or_else(|| {
                        RpcError::new(
                            ErrorType::Protocol,
                            ErrorTag::InvalidValue,
                        )
                        .with_message("invalid default-operation")
                    })?,
                None => DefaultOperation::Merge,
            };
            let test_option = match leaf("test-option") {
                Some(value) => {
                    TestOption::from_str(&value).ok_or_else(|| {
                        RpcError::new(
                            ErrorType::Protocol,
                            ErrorTag::InvalidValue,
                        )
                        .with_message("invalid test-option")
                    })?
                }
                None => TestOption::TestThenSet,
            };
            let error_option = match leaf("error-option") {
                Some(value) => {
                    ErrorOption::from_str(&value).ok_or_else(|| {
                        RpcError::new(
                            ErrorType::Protocol,
                            ErrorTag::InvalidValue,
                        )
                        .with_message("invalid error-option")
                    })?
                }
                None => ErrorOption::StopOnError,
            };
            let config_node = tree
                .find_child(op, "config", None)
                .ok_or_else(|| missing_element("config"))?;
            Operation::EditConfig {
                target,
                default_operation,
                test_option,
                error_option,
                config: extract_subtree(&tree, config_node),
            }
        }
        "copy-config" => Operation::CopyConfig {
            source: parse_db(&tree, op, "source")?,
            target: parse_db(&tree, op, "target")?,
        },
        "delete-config" => Operation::DeleteConfig {
            target: parse_db(&tree, op, "target")?,
        },
        "lock" => Operation::Lock {
            target: parse_db(&tree, op, "target")?,
        },
        "unlock" => Operation::Unlock {
            target: parse_db(&tree, op, "target")?,
        },
        "commit" => Operation::Commit,
        "discard-changes" => Operation::DiscardChanges,
        "validate" => Operation::Validate {
            source: parse_db(&tree, op, "source")?,
        },
        "close-session" => Operation::CloseSession,
        "kill-session" => {
            let session_id = tree
                .find_child(op, "session-id", None)
                .and_then(|child| tree.node(child).value.clone())
                .and_then(|value| value.parse().ok())
                .ok_or_else(|| missing_element("session-id"))?;
            Operation::KillSession { session_id }
        }
        "create-subscription" => {
            let leaf = |name: &str| {
                tree.find_child(op, name, None)
                    .and_then(|child| tree.node(child).value.clone())
            };
            let parse_time = |name: &str| -> Result<
                Option<DateTime<Utc>>,
                RpcError,
            > {
                match leaf(name) {
                    Some(value) => DateTime::parse_from_rfc3339(&value)
                        .map(|time| Some(time.with_timezone(&Utc)))
                        .map_err(|_| {
                            RpcError::new(
                                ErrorType::Protocol,
                                ErrorTag::InvalidValue,
                            )
                            .with_message(format!("invalid {}", name))
                        }),
                    None => Ok(None),
                }
            };
            Operation::CreateSubscription {
                stream: leaf("stream").unwrap_or_else(|| "NETCONF".to_owned()),
                filter: parse_filter(&tree, op)?,
                start_time: parse_time("startTime")?,
                stop_time: parse_time("stopTime")?,
            }
        }
        _ => Operation::PluginRpc {
            name: op_node.name.clone(),
            namespace: op_node.namespace.clone().unwrap_or_default(),
            input: extract_subtree(&tree, op),
        },
    };

    Ok((header, operation))
}

fn reply_wrapper(header: &RpcHeader) -> (DataTree, NodeId) {
    let mut tree = DataTree::new();
    let root = tree.root();
    let reply = tree.add_child(root, "rpc-reply", Some(NS_NETCONF_BASE));
    if let Some(message_id) = &header.message_id {
        tree.attr_set(reply, "message-id", message_id);
    }
    (tree, reply)
}

/// `<rpc-reply><ok/></rpc-reply>`
pub fn reply_ok(header: &RpcHeader) -> String {
    let (mut tree, reply) = reply_wrapper(header);
    tree.add_child(reply, "ok", None);
    xml::write(&tree, false)
}

/// `<rpc-reply><data>...</data></rpc-reply>`
pub fn reply_data(header: &RpcHeader, data: &DataTree) -> String {
    let (mut tree, reply) = reply_wrapper(header);
    let data_node = tree.add_child(reply, "data", None);
    for top in data.children(data.root()).to_vec() {
        tree.copy_from(data_node, data, top);
    }
    xml::write(&tree, false)
}

/// `<rpc-reply><rpc-error>...</rpc-error>...</rpc-reply>`
pub fn reply_errors(header: &RpcHeader, errors: &[RpcError]) -> String {
    let (mut tree, reply) = reply_wrapper(header);
    for error in errors {
        let error_node = tree.add_child(reply, "rpc-error", None);
        let add_leaf = |tree: &mut DataTree, name: &str, value: &str| {
            let id = tree.add_child(error_node, name, None);
            tree.node_mut(id).value = Some(value.to_owned());
        };
        add_leaf(&mut tree, "error-type", error.error_type.as_str());
        add_leaf(&mut tree, "error-tag", error.tag.as_str());
        add_leaf(&mut tree, "error-severity", error.severity.as_str());
        if let Some(app_tag) = &error.app_tag {
            add_leaf(&mut tree, "error-app-tag", app_tag);
        }
        if let Some(path) = &error.path {
            add_leaf(&mut tree, "error-path", path);
        }
        if let Some(message) = &error.message {
            add_leaf(&mut tree, "error-message", message);
        }
        if !error.info.is_empty() {
            let info = tree.add_child(error_node, "error-info", None);
            for (element, text) in &error.info {
                let id = tree.add_child(info, element, None);
                tree.node_mut(id).value = Some(text.clone());
            }
        }
    }
    xml::write(&tree, false)
}

/// `<notification><eventTime>...</eventTime>...</notification>`
pub fn notification(time: &DateTime<Utc>, payload: &DataTree) -> String {
    let mut tree = DataTree::new();
    let root = tree.root();
    let notification =
        tree.add_child(root, "notification", Some(NS_NETCONF_NOTIFICATION));
    let event_time = tree.add_child(notification, "eventTime", None);
    tree.node_mut(event_time).value = Some(time.to_rfc3339());
    for top in payload.children(payload.root()).to_vec() {
        tree.copy_from(notification, payload, top);
    }
    xml::write(&tree, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_edit_config() {
        let (header, operation) = parse_rpc(
            r#"<rpc message-id="101" username="admin"
                    xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
                 <edit-config>
                   <target><candidate/></target>
                   <default-operation>merge</default-operation>
                   <error-option>rollback-on-error</error-option>
                   <config>
                     <top xmlns="urn:example:test"><x>0</x></top>
                   </config>
                 </edit-config>
               </rpc>"#,
        )
        .unwrap();
        assert_eq!(header.message_id.as_deref(), Some("101"));
        assert_eq!(header.username.as_deref(), Some("admin"));
        match operation {
            Operation::EditConfig {
                target,
                error_option,
                config,
                ..
            } => {
                assert_eq!(target, DbName::Candidate);
                assert_eq!(error_option, ErrorOption::RollbackOnError);
                assert!(!config.is_empty());
            }
            other => panic!("unexpected operation: {:?}", other),
        }
    }

    #[test]
    fn parse_lock_and_kill() {
        let (_, operation) = parse_rpc(
            r#"<rpc message-id="1"><lock><target><running/></target></lock></rpc>"#,
        )
        .unwrap();
        assert!(matches!(
            operation,
            Operation::Lock { target: DbName::Running }
        ));

        let (_, operation) = parse_rpc(
            r#"<rpc message-id="2"><kill-session><session-id>7</session-id></kill-session></rpc>"#,
        )
        .unwrap();
        assert!(matches!(
            operation,
            Operation::KillSession { session_id: 7 }
        ));
    }

    #[test]
    fn unknown_datastore_rejected() {
        let error = parse_rpc(
            r#"<rpc message-id="1"><lock><target><flash/></target></lock></rpc>"#,
        )
        .unwrap_err();
        assert_eq!(error.tag, ErrorTag::InvalidValue);
    }

    #[test]
    fn reply_encoding() {
        let header = RpcHeader {
            message_id: Some("42".to_owned()),
            ..Default::default()
        };
        let ok = reply_ok(&header);
        assert!(ok.contains("message-id=\"42\""));
        assert!(ok.contains("<ok/>"));

        let errors = [keel_utils::netconf::RpcError::lock_denied(3)];
        let reply = reply_errors(&header, &errors);
        assert!(reply.contains("<error-tag>lock-denied</error-tag>"));
        assert!(reply.contains("<session-id>3</session-id>"));
        assert!(reply.contains("<error-severity>error</error-severity>"));
    }
}
