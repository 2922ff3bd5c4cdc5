//
// Copyright (c) The Keel Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! NACM configuration sources.
//!
//! The rules live either inline in the running datastore under the
//! `ietf-netconf-acm` namespace, or in an external file whose root element
//! is `<nacm>`. Both are re-read whenever the subtree changes.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use keel_yang::{DataTree, NodeId, xml};
use serde::{Deserialize, Serialize};

use crate::{AccessOp, NS_NACM, Rule, RuleAction, RuleList};

/// Where the engine takes its access-control rules from.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum NacmMode {
    Disabled,
    #[default]
    Internal,
    External,
}

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct NacmConfig {
    pub enable_nacm: bool,
    pub read_default: RuleAction,
    pub write_default: RuleAction,
    pub exec_default: RuleAction,
    pub enable_external_groups: bool,
    // group -> member usernames.
    pub groups: BTreeMap<String, BTreeSet<String>>,
    pub rule_lists: Vec<RuleList>,
}

// ===== impl NacmMode =====

impl NacmMode {
    pub fn from_str(s: &str) -> Option<NacmMode> {
        let mode = match s {
            "disabled" => NacmMode::Disabled,
            "internal" => NacmMode::Internal,
            "external" => NacmMode::External,
            _ => return None,
        };
        Some(mode)
    }
}

// ===== impl NacmConfig =====

impl NacmConfig {
    /// Parses a `<nacm>` subtree (RFC 8341 data model).
    pub fn from_tree(tree: &DataTree, nacm: NodeId) -> NacmConfig {
        let mut config = NacmConfig::default();

        if let Some(value) = leaf(tree, nacm, "enable-nacm") {
            config.enable_nacm = value == "true";
        }
        if let Some(action) = action(tree, nacm, "read-default") {
            config.read_default = action;
        }
        if let Some(action) = action(tree, nacm, "write-default") {
            config.write_default = action;
        }
        if let Some(action) = action(tree, nacm, "exec-default") {
            config.exec_default = action;
        }
        if let Some(value) = leaf(tree, nacm, "enable-external-groups") {
            config.enable_external_groups = value == "true";
        }

        if let Some(groups) = tree.find_child(nacm, "groups", None) {
            for group in tree.find_children(groups, "group", None) {
                let Some(name) = leaf(tree, group, "name") else {
                    continue;
                };
                let members = tree
                    .find_children(group, "user-name", None)
                    .filter_map(|user| tree.node(user).value.clone())
                    .collect();
                config.groups.insert(name.to_owned(), members);
            }
        }

        for rule_list in tree.find_children(nacm, "rule-list", None) {
            let name =
                leaf(tree, rule_list, "name").unwrap_or_default().to_owned();
            let groups = tree
                .find_children(rule_list, "group", None)
                .filter_map(|group| tree.node(group).value.clone())
                .collect();
            let rules = tree
                .find_children(rule_list, "rule", None)
                .map(|rule| parse_rule(tree, rule))
                .collect();
            config.rule_lists.push(RuleList {
                name,
                groups,
                rules,
            });
        }

        config
    }

    /// Finds and parses the inline `<nacm>` subtree of a datastore tree.
    pub fn from_running(tree: &DataTree) -> Option<NacmConfig> {
        let nacm = tree.find_child(tree.root(), "nacm", Some(NS_NACM))?;
        Some(NacmConfig::from_tree(tree, nacm))
    }

    /// Loads the external-file variant (root element `<nacm>`).
    pub fn from_file(path: &Path) -> Result<NacmConfig, keel_yang::Error> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            keel_yang::Error::MalformedMessage(err.to_string())
        })?;
        let tree = xml::read(&text)?;
        let root = tree.children(tree.root())[0];
        if tree.node(root).name != "nacm" {
            return Err(keel_yang::Error::BadElement {
                path: format!("/{}", tree.node(root).name),
                reason: "expected a <nacm> root element".to_owned(),
            });
        }
        Ok(NacmConfig::from_tree(&tree, root))
    }
}

impl Default for NacmConfig {
    fn default() -> NacmConfig {
        // RFC 8341 leaf defaults.
        NacmConfig {
            enable_nacm: true,
            read_default: RuleAction::Permit,
            write_default: RuleAction::Deny,
            exec_default: RuleAction::Permit,
            enable_external_groups: true,
            groups: BTreeMap::new(),
            rule_lists: vec![],
        }
    }
}

// ===== helper functions =====

fn leaf<'a>(tree: &'a DataTree, parent: NodeId, name: &str) -> Option<&'a str> {
    tree.find_child(parent, name, None)
        .and_then(|child| tree.node(child).value.as_deref())
}

fn action(tree: &DataTree, parent: NodeId, name: &str) -> Option<RuleAction> {
    match leaf(tree, parent, name) {
        Some("permit") => Some(RuleAction::Permit),
        Some("deny") => Some(RuleAction::Deny),
        _ => None,
    }
}

fn parse_rule(tree: &DataTree, rule: NodeId) -> Rule {
    let access_operations = match leaf(tree, rule, "access-operations") {
        Some("*") | None => AccessOp::all(),
        Some(ops) => {
            let mut bits = AccessOp::empty();
            for op in ops.split_ascii_whitespace() {
                match op {
                    "create" => bits |= AccessOp::CREATE,
                    "read" => bits |= AccessOp::READ,
                    "update" => bits |= AccessOp::UPDATE,
                    "delete" => bits |= AccessOp::DELETE,
                    "exec" => bits |= AccessOp::EXEC,
                    _ => (),
                }
            }
            bits
        }
    };

    Rule {
        name: leaf(tree, rule, "name").unwrap_or_default().to_owned(),
        module_name: leaf(tree, rule, "module-name")
            .unwrap_or("*")
            .to_owned(),
        rpc_name: leaf(tree, rule, "rpc-name").map(str::to_owned),
        notification_name: leaf(tree, rule, "notification-name")
            .map(str::to_owned),
        path: leaf(tree, rule, "path").map(str::to_owned),
        access_operations,
        action: match leaf(tree, rule, "action") {
            Some("permit") => RuleAction::Permit,
            _ => RuleAction::Deny,
        },
        comment: leaf(tree, rule, "comment").map(str::to_owned),
    }
}
