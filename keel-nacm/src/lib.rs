//
// Copyright (c) The Keel Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! NETCONF access control (RFC 8341).
//!
//! Every data-node operation, protocol operation and outgoing notification
//! runs through the rule-list evaluator. Reads are filtered silently (denied
//! subtrees are pruned from the result); writes and protocol operations fail
//! with `access-denied`.

#![warn(rust_2018_idioms)]

mod config;

use std::collections::BTreeSet;

use bitflags::bitflags;
use keel_utils::netconf::RpcError;
use keel_utils::user::UserCtx;
use keel_yang::xpath::{NsMap, XPath};
use keel_yang::{Context, DataTree, NodeId};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use crate::config::{NacmConfig, NacmMode};

/// NACM namespace (RFC 8341).
pub const NS_NACM: &str = "urn:ietf:params:xml:ns:yang:ietf-netconf-acm";

bitflags! {
    /// Access operations of a rule (RFC 8341 "access-operations-type").
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub struct AccessOp: u8 {
        const CREATE = 0x01;
        const READ = 0x02;
        const UPDATE = 0x04;
        const DELETE = 0x08;
        const EXEC = 0x10;
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum RuleAction {
    Permit,
    Deny,
}

/// One access control rule, ordered within its rule-list.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct Rule {
    pub name: String,
    // "*" matches every module.
    pub module_name: String,
    pub rpc_name: Option<String>,
    pub notification_name: Option<String>,
    pub path: Option<String>,
    pub access_operations: AccessOp,
    pub action: RuleAction,
    pub comment: Option<String>,
}

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct RuleList {
    pub name: String,
    // "*" matches every group.
    pub groups: Vec<String>,
    pub rules: Vec<Rule>,
}

// The kind of access being evaluated.
enum Request<'a> {
    Data {
        tree: &'a DataTree,
        node: NodeId,
        module: &'a str,
    },
    Rpc {
        module: &'a str,
        name: &'a str,
    },
    Notification {
        module: &'a str,
        name: &'a str,
    },
}

/// The access-control engine: the active configuration plus denial
/// counters. Rebuilt whenever the NACM configuration subtree changes.
#[derive(Debug, Default)]
pub struct Nacm {
    pub config: NacmConfig,
    // Username with unrestricted access for emergency recovery.
    pub recovery_user: Option<String>,
    pub denied_operations: u32,
    pub denied_data_writes: u32,
    pub denied_notifications: u32,
}

// ===== impl AccessOp =====

impl AccessOp {
    fn as_str(&self) -> &'static str {
        match *self {
            AccessOp::CREATE => "create",
            AccessOp::READ => "read",
            AccessOp::UPDATE => "update",
            AccessOp::DELETE => "delete",
            AccessOp::EXEC => "exec",
            _ => "mixed",
        }
    }
}

// ===== impl Nacm =====

impl Nacm {
    pub fn new(config: NacmConfig, recovery_user: Option<String>) -> Nacm {
        Nacm {
            config,
            recovery_user,
            ..Default::default()
        }
    }

    // Groups the user belongs to: transport-asserted groups (when enabled)
    // plus the groups configured under /nacm/groups.
    fn user_groups(&self, user: &UserCtx) -> BTreeSet<String> {
        let mut groups = BTreeSet::new();
        if self.config.enable_external_groups {
            groups.extend(user.groups.iter().cloned());
        }
        for (group, members) in &self.config.groups {
            if members.contains(&user.username) {
                groups.insert(group.clone());
            }
        }
        groups
    }

    fn is_recovery(&self, user: &UserCtx) -> bool {
        self.recovery_user.as_deref() == Some(user.username.as_str())
    }

    // Runs the RFC 8341 section 3.4.4 evaluation order. Returns the rule
    // action, falling through to the per-kind default.
    fn evaluate(
        &self,
        ctx: &Context,
        user: &UserCtx,
        op: AccessOp,
        request: &Request<'_>,
    ) -> RuleAction {
        // Steps 1-3: enforcement disabled, recovery session, safety net.
        if !self.config.enable_nacm || self.is_recovery(user) {
            return RuleAction::Permit;
        }
        if let Request::Rpc { name, .. } = request
            && op == AccessOp::EXEC
            && *name == "close-session"
        {
            return RuleAction::Permit;
        }

        // Steps 4-6: ordered first-match walk over the matching rule-lists.
        let groups = self.user_groups(user);
        let nsmap = global_nsmap(ctx);
        for rule_list in &self.config.rule_lists {
            let group_match = rule_list.groups.iter().any(|group| {
                group == "*" || groups.contains(group.as_str())
            });
            if !group_match {
                continue;
            }
            for rule in &rule_list.rules {
                if rule_matches(ctx, rule, op, request, &nsmap) {
                    return rule.action;
                }
            }
        }

        // Step 7: defaults.
        match op {
            AccessOp::READ => self.config.read_default,
            AccessOp::EXEC => self.config.exec_default,
            _ => self.config.write_default,
        }
    }

    /// Gates a protocol operation. Denial is a protocol-level
    /// `access-denied`.
    pub fn check_rpc(
        &mut self,
        ctx: &Context,
        user: &UserCtx,
        module: &str,
        rpc_name: &str,
    ) -> Result<(), RpcError> {
        let request = Request::Rpc {
            module,
            name: rpc_name,
        };
        match self.evaluate(ctx, user, AccessOp::EXEC, &request) {
            RuleAction::Permit => Ok(()),
            RuleAction::Deny => {
                self.denied_operations += 1;
                debug!(user = %user.username, %rpc_name, "operation denied");
                Err(RpcError::access_denied_protocol())
            }
        }
    }

    /// Gates a write on a data node. Denial is an application-level
    /// `access-denied`.
    pub fn check_data(
        &mut self,
        ctx: &Context,
        user: &UserCtx,
        tree: &DataTree,
        node: NodeId,
        op: AccessOp,
    ) -> Result<(), RpcError> {
        let module = node_module(ctx, tree, node);
        let request = Request::Data {
            tree,
            node,
            module: &module,
        };
        match self.evaluate(ctx, user, op, &request) {
            RuleAction::Permit => Ok(()),
            RuleAction::Deny => {
                self.denied_data_writes += 1;
                debug!(
                    user = %user.username, op = %op.as_str(),
                    path = %tree.path(ctx, node), "data access denied"
                );
                Err(RpcError::access_denied_application())
            }
        }
    }

    /// Gates an outgoing notification for one subscriber. Denied events are
    /// dropped, not error-reported.
    pub fn check_notification(
        &mut self,
        ctx: &Context,
        user: &UserCtx,
        module: &str,
        name: &str,
    ) -> bool {
        let request = Request::Notification { module, name };
        match self.evaluate(ctx, user, AccessOp::READ, &request) {
            RuleAction::Permit => true,
            RuleAction::Deny => {
                self.denied_notifications += 1;
                false
            }
        }
    }

    /// Read filtering: returns a copy of the tree with the subtrees the
    /// user may not read silently pruned.
    pub fn filter_read(
        &self,
        ctx: &Context,
        user: &UserCtx,
        tree: &DataTree,
    ) -> DataTree {
        let mut out = tree.duplicate();
        if !self.config.enable_nacm || self.is_recovery(user) {
            return out;
        }

        // Top-down: a denied node takes its descendants with it.
        let mut pruned = vec![];
        for id in out.descendants(out.root()) {
            if id == out.root() {
                continue;
            }
            if pruned
                .iter()
                .any(|ancestor| out.ancestors(id).contains(ancestor))
            {
                continue;
            }
            let module = node_module(ctx, &out, id);
            let request = Request::Data {
                tree: &out,
                node: id,
                module: &module,
            };
            if self.evaluate(ctx, user, AccessOp::READ, &request)
                == RuleAction::Deny
            {
                pruned.push(id);
            }
        }
        for id in pruned {
            out.unlink(id);
        }
        out
    }

    /// Snapshot of the denial counters, for operational state.
    pub fn counters(&self) -> (u32, u32, u32) {
        (
            self.denied_operations,
            self.denied_data_writes,
            self.denied_notifications,
        )
    }
}

// ===== helper functions =====

// Module owning a data node (falls back to the namespace for unbound nodes).
fn node_module(ctx: &Context, tree: &DataTree, node: NodeId) -> String {
    if let Some(snode) = tree.node(node).snode {
        return ctx.module(ctx.snode(snode).module).name.clone();
    }
    tree.node(node)
        .namespace
        .as_deref()
        .and_then(|ns| ctx.find_module_by_namespace(ns))
        .map(|module| ctx.module(module).name.clone())
        .unwrap_or_default()
}

fn rule_matches(
    ctx: &Context,
    rule: &Rule,
    op: AccessOp,
    request: &Request<'_>,
    nsmap: &NsMap,
) -> bool {
    // Module match.
    let module = match request {
        Request::Data { module, .. } => module,
        Request::Rpc { module, .. } => module,
        Request::Notification { module, .. } => module,
    };
    if rule.module_name != "*" && rule.module_name != *module {
        return false;
    }

    // Access operations match.
    if !rule.access_operations.contains(op) {
        return false;
    }

    // Rule-type match.
    match request {
        Request::Rpc { name, .. } => {
            if rule.notification_name.is_some() || rule.path.is_some() {
                return false;
            }
            match &rule.rpc_name {
                Some(rpc) => rpc == "*" || rpc == name,
                None => true,
            }
        }
        Request::Notification { name, .. } => {
            if rule.rpc_name.is_some() || rule.path.is_some() {
                return false;
            }
            match &rule.notification_name {
                Some(notification) => {
                    notification == "*" || notification == name
                }
                None => true,
            }
        }
        Request::Data { tree, node, .. } => {
            if rule.rpc_name.is_some() || rule.notification_name.is_some() {
                return false;
            }
            match &rule.path {
                Some(path) => {
                    // The rule matches the nodes selected by its path and
                    // everything below them.
                    let Ok(xpath) = XPath::compile(path) else {
                        return false;
                    };
                    let Ok(selected) =
                        xpath.eval_nodes(tree, Some(ctx), tree.root(), nsmap)
                    else {
                        return false;
                    };
                    selected.contains(node)
                        || tree
                            .ancestors(*node)
                            .iter()
                            .any(|ancestor| selected.contains(ancestor))
                }
                None => true,
            }
        }
    }
}

/// Prefix map used to evaluate rule paths: every module is reachable by its
/// own prefix and by its name.
pub fn global_nsmap(ctx: &Context) -> NsMap {
    let mut nsmap = NsMap::new();
    for (_, module) in ctx.modules() {
        nsmap.insert(module.prefix.clone(), module.namespace.clone());
        nsmap.insert(module.name.clone(), module.namespace.clone());
    }
    nsmap
}
