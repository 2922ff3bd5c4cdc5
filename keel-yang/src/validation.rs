//
// Copyright (c) The Keel Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! Instance validation: the schema-driven stages of the commit pipeline.
//!
//! Four stages run in order and stop at the first failure, which names the
//! offending instance path:
//!
//! 1. structural: schema binding, cardinality, key presence and uniqueness;
//! 2. type: every leaf body parses into its type and satisfies the facets;
//! 3. reference: leafrefs, instance-identifiers and identityrefs resolve;
//! 4. when/must: all conditions hold, `when`-false nodes masking their
//!    subtrees from further checks.

use std::collections::{HashMap, HashSet};

use keel_utils::netconf::{ErrorTag, ErrorType, RpcError};

use crate::data::{DataTree, NodeId};
use crate::schema::{Context, SchemaKind, SnodeId};
use crate::types::BaseType;
use crate::xpath::{Item, XPath, XPathValue};

// ===== helper functions =====

fn error(
    tag: ErrorTag,
    path: String,
    message: impl Into<String>,
) -> RpcError {
    RpcError::new(ErrorType::Application, tag)
        .with_path(path)
        .with_message(message)
}

fn structural(ctx: &Context, tree: &DataTree) -> Result<(), RpcError> {
    for id in tree.descendants(tree.root()) {
        if id == tree.root() {
            continue;
        }
        let node = tree.node(id);

        // Every node must carry a schema binding.
        let Some(snode_id) = node.snode else {
            let tag = match &node.namespace {
                Some(ns) if ctx.find_module_by_namespace(ns).is_none() => {
                    ErrorTag::UnknownNamespace
                }
                _ => ErrorTag::UnknownElement,
            };
            return Err(error(
                tag,
                tree.path(ctx, id),
                "element has no schema definition",
            ));
        };
        let snode = ctx.snode(snode_id);

        // Configuration trees carry configuration only.
        if !snode.is_config() {
            return Err(error(
                ErrorTag::BadElement,
                tree.path(ctx, id),
                "element is not configuration",
            ));
        }

        // Leaves carry no children.
        if snode.is_leaf() && !tree.children(id).is_empty() {
            return Err(error(
                ErrorTag::BadElement,
                tree.path(ctx, id),
                "leaf element with child elements",
            ));
        }

        if snode.has_children() {
            check_cardinality(ctx, tree, id, snode_id)?;
        }
    }

    // Top-level cardinality and mandatory nodes.
    check_cardinality_at_top(ctx, tree)?;
    Ok(())
}

// Counts instances per child schema node under one parent instance, then
// checks min/max-elements, single-instance rules, mandatory presence, list
// keys and key uniqueness.
fn check_cardinality(
    ctx: &Context,
    tree: &DataTree,
    id: NodeId,
    snode_id: SnodeId,
) -> Result<(), RpcError> {
    let mut counts: HashMap<SnodeId, usize> = HashMap::new();
    for child in tree.children(id) {
        if let Some(child_snode) = tree.node(*child).snode {
            *counts.entry(child_snode).or_default() += 1;
        }
    }

    for (child_snode_id, count) in &counts {
        let child_snode = ctx.snode(*child_snode_id);
        match child_snode.kind {
            SchemaKind::List | SchemaKind::LeafList => {
                if let Some(max) = child_snode.max_elements
                    && *count > max as usize
                {
                    return Err(error(
                        ErrorTag::TooManyElements,
                        tree.path(ctx, id),
                        format!("too many {} entries", child_snode.name),
                    ));
                }
            }
            _ => {
                if *count > 1 {
                    let child = tree
                        .find_child(id, &child_snode.name, None)
                        .unwrap_or(id);
                    return Err(error(
                        ErrorTag::TooManyElements,
                        tree.path(ctx, child),
                        "multiple instances of a single-instance element",
                    ));
                }
            }
        }
    }

    for child_snode_id in enforced_children(ctx, tree, id, snode_id) {
        let child_snode = ctx.snode(child_snode_id);
        let count = counts.get(&child_snode_id).copied().unwrap_or(0);
        if !child_snode.is_config() {
            continue;
        }
        match child_snode.kind {
            SchemaKind::Leaf if child_snode.is_mandatory() && count == 0 => {
                return Err(error(
                    ErrorTag::MissingElement,
                    tree.path(ctx, id),
                    format!("missing mandatory element {}", child_snode.name),
                ));
            }
            SchemaKind::List | SchemaKind::LeafList => {
                if let Some(min) = child_snode.min_elements
                    && count < min as usize
                {
                    return Err(error(
                        ErrorTag::MissingElement,
                        tree.path(ctx, id),
                        format!("too few {} entries", child_snode.name),
                    ));
                }
            }
            _ => (),
        }
    }

    // Key presence and uniqueness per list.
    let snode = ctx.snode(snode_id);
    if snode.is_list() {
        for key in &snode.keys {
            if tree.find_child(id, key, None).is_none() {
                return Err(error(
                    ErrorTag::MissingElement,
                    tree.path(ctx, id),
                    format!("missing list key {}", key),
                ));
            }
        }
    }
    check_key_uniqueness(ctx, tree, id)?;
    Ok(())
}

fn check_cardinality_at_top(
    ctx: &Context,
    tree: &DataTree,
) -> Result<(), RpcError> {
    check_key_uniqueness(ctx, tree, tree.root())
}

fn check_key_uniqueness(
    ctx: &Context,
    tree: &DataTree,
    parent: NodeId,
) -> Result<(), RpcError> {
    let mut seen: HashMap<SnodeId, HashSet<Vec<String>>> = HashMap::new();
    for child in tree.children(parent) {
        let Some(snode_id) = tree.node(*child).snode else {
            continue;
        };
        if !ctx.snode(snode_id).is_list() {
            continue;
        }
        let keys = tree.list_keys(ctx, *child);
        if !seen.entry(snode_id).or_default().insert(keys) {
            return Err(error(
                ErrorTag::OperationFailed,
                tree.path(ctx, *child),
                "duplicate list entry key",
            ));
        }
    }
    Ok(())
}

// Child data nodes of a schema node, descending through choice/case.
fn data_children(ctx: &Context, snode: SnodeId) -> Vec<SnodeId> {
    let mut out = vec![];
    for child in &ctx.snode(snode).children {
        match ctx.snode(*child).kind {
            SchemaKind::Choice | SchemaKind::Case => {
                out.extend(data_children(ctx, *child));
            }
            SchemaKind::Input | SchemaKind::Output => (),
            _ => out.push(*child),
        }
    }
    out
}

// Child schema nodes whose cardinality is enforced for one parent instance.
// Under a choice, only the selected case (the one with an instantiated
// member) contributes; the other cases stay dormant.
fn enforced_children(
    ctx: &Context,
    tree: &DataTree,
    id: NodeId,
    snode: SnodeId,
) -> Vec<SnodeId> {
    let mut out = vec![];
    for child in &ctx.snode(snode).children {
        match ctx.snode(*child).kind {
            SchemaKind::Choice => {
                let selected = ctx.snode(*child).children.iter().copied().find(
                    |case| {
                        data_children(ctx, *case).iter().any(|member| {
                            tree.children(id).iter().any(|instance| {
                                tree.node(*instance).snode == Some(*member)
                            })
                        })
                    },
                );
                if let Some(case) = selected {
                    out.extend(enforced_children(ctx, tree, id, case));
                }
            }
            SchemaKind::Case | SchemaKind::Input | SchemaKind::Output => (),
            _ => out.push(*child),
        }
    }
    out
}

fn check_types(ctx: &Context, tree: &DataTree) -> Result<(), RpcError> {
    for id in tree.descendants(tree.root()) {
        let node = tree.node(id);
        let Some(snode_id) = node.snode else { continue };
        let snode = ctx.snode(snode_id);
        let Some(typ) = &snode.typ else { continue };

        let body = node.value.as_deref().unwrap_or_default();
        if let Err(reason) = typ.parse_value(ctx, snode.module, body) {
            return Err(error(
                ErrorTag::InvalidValue,
                tree.path(ctx, id),
                reason,
            ));
        }
    }
    Ok(())
}

fn check_references(ctx: &Context, tree: &DataTree) -> Result<(), RpcError> {
    for id in tree.descendants(tree.root()) {
        let node = tree.node(id);
        let Some(snode_id) = node.snode else { continue };
        let snode = ctx.snode(snode_id);
        let Some(typ) = &snode.typ else { continue };

        match typ.base {
            Some(BaseType::Leafref) if typ.require_instance => {
                let path = typ.leafref_path.as_deref().unwrap_or_default();
                let body = node.value.as_deref().unwrap_or_default();
                if !leafref_resolves(ctx, tree, id, snode.scope_module, path, body)
                {
                    return Err(error(
                        ErrorTag::DataMissing,
                        tree.path(ctx, id),
                        format!("required leaf {} does not exist", body),
                    ));
                }
            }
            Some(BaseType::InstanceIdentifier) if typ.require_instance => {
                let body = node.value.as_deref().unwrap_or_default();
                let nsmap = ctx.module_nsmap(snode.scope_module);
                let resolved = XPath::compile(body)
                    .and_then(|xpath| {
                        xpath.eval_nodes(tree, Some(ctx), tree.root(), &nsmap)
                    })
                    .map(|nodes| !nodes.is_empty())
                    .unwrap_or(false);
                if !resolved {
                    return Err(error(
                        ErrorTag::DataMissing,
                        tree.path(ctx, id),
                        format!("required instance {} does not exist", body),
                    ));
                }
            }
            // Identityref derivation is enforced during value parsing.
            _ => (),
        }
    }
    Ok(())
}

fn leafref_resolves(
    ctx: &Context,
    tree: &DataTree,
    leaf: NodeId,
    scope: crate::schema::ModuleId,
    path: &str,
    body: &str,
) -> bool {
    let nsmap = ctx.module_nsmap(scope);
    let Ok(xpath) = XPath::compile(path) else {
        return false;
    };
    match xpath.eval(tree, Some(ctx), leaf, &nsmap) {
        Ok(XPathValue::NodeSet(items)) => items.iter().any(|item| match item {
            Item::Node(id) => {
                tree.node(*id).value.as_deref() == Some(body)
            }
            Item::Attr(..) => false,
        }),
        _ => false,
    }
}

fn check_conditions(ctx: &Context, tree: &DataTree) -> Result<(), RpcError> {
    // Pass 1 (top-down): find nodes whose `when` evaluates false. A false
    // `when` is a failure for the node itself, and its whole subtree is
    // treated as absent for the remaining checks.
    let mut absent: HashSet<NodeId> = HashSet::new();
    let mut when_failure: Option<NodeId> = None;
    for id in tree.descendants(tree.root()) {
        if id == tree.root() {
            continue;
        }
        if tree
            .parent(id)
            .is_some_and(|parent| absent.contains(&parent))
        {
            absent.insert(id);
            continue;
        }
        let Some(snode_id) = tree.node(id).snode else { continue };
        let snode = ctx.snode(snode_id);
        if let Some(when) = &snode.when {
            let nsmap = ctx.module_nsmap(snode.scope_module);
            let holds = XPath::compile(when)
                .and_then(|xpath| xpath.eval_bool(tree, Some(ctx), id, &nsmap))
                .unwrap_or(false);
            if !holds {
                absent.extend(tree.descendants(id));
                when_failure.get_or_insert(id);
            }
        }
    }
    if let Some(id) = when_failure {
        return Err(error(
            ErrorTag::OperationFailed,
            tree.path(ctx, id),
            "when condition not satisfied",
        ));
    }

    // Pass 2 (bottom-up): every `must` on a present node holds.
    let mut order = tree.descendants(tree.root());
    order.reverse();
    for id in order {
        if id == tree.root() || absent.contains(&id) {
            continue;
        }
        let Some(snode_id) = tree.node(id).snode else { continue };
        let snode = ctx.snode(snode_id);
        for must in &snode.musts {
            let nsmap = ctx.module_nsmap(snode.scope_module);
            let holds = XPath::compile(&must.expr)
                .and_then(|xpath| xpath.eval_bool(tree, Some(ctx), id, &nsmap))
                .unwrap_or(false);
            if !holds {
                let message = must
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "must condition not satisfied".to_owned());
                return Err(error(
                    ErrorTag::OperationFailed,
                    tree.path(ctx, id),
                    message,
                ));
            }
        }
    }
    Ok(())
}

// ===== global functions =====

/// Validates a configuration tree against its schema. Returns the first
/// failure, tagged per RFC 6241 and carrying the offending instance path.
pub fn validate(ctx: &Context, tree: &DataTree) -> Result<(), RpcError> {
    structural(ctx, tree)?;
    check_types(ctx, tree)?;
    check_references(ctx, tree)?;
    check_conditions(ctx, tree)?;
    Ok(())
}
