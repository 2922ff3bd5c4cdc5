//
// Copyright (c) The Keel Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! JSON encoding of instance data (RFC 7951).
//!
//! Member names are qualified with the module name exactly when the node's
//! module differs from its parent's. Numeric types wider than JSON's safe
//! integer range (int64, uint64, decimal64) are quoted strings. Lists and
//! leaf-lists are arrays; empty leaves are `[null]`.

use serde_json::{Map, Number, Value as Json};

use crate::data::{DataTree, NodeId};
use crate::error::Error;
use crate::schema::{Context, ModuleId, SchemaKind, SnodeId};
use crate::types::BaseType;

// ===== helper functions =====

fn member_name(tree: &DataTree, ctx: &Context, id: NodeId) -> String {
    let node = tree.node(id);
    let Some(snode) = node.snode else {
        return node.name.clone();
    };
    let module = ctx.snode(snode).module;
    let parent_module = tree
        .parent(id)
        .filter(|parent| *parent != tree.root())
        .and_then(|parent| tree.node(parent).snode)
        .map(|parent| ctx.snode(parent).module);
    if parent_module == Some(module) {
        node.name.clone()
    } else {
        format!("{}:{}", ctx.module(module).name, node.name)
    }
}

fn leaf_to_json(tree: &DataTree, ctx: &Context, id: NodeId) -> Json {
    let node = tree.node(id);
    let body = node.value.as_deref().unwrap_or_default();
    let Some(snode_id) = node.snode else {
        return Json::String(body.to_owned());
    };
    let snode = ctx.snode(snode_id);
    let Some(typ) = &snode.typ else {
        return Json::String(body.to_owned());
    };

    // Type the value through the schema; unparseable bodies (possible only
    // on unvalidated trees) fall back to plain strings.
    let Ok(value) = typ.parse_value(ctx, snode.module, body) else {
        return Json::String(body.to_owned());
    };
    let canonical = value.canonical(ctx, snode.module);
    match value {
        crate::types::Value::Int(value)
            if !matches!(typ.effective_base(), Some(BaseType::Int64)) =>
        {
            Json::Number(Number::from(value))
        }
        crate::types::Value::Uint(value)
            if !matches!(typ.effective_base(), Some(BaseType::Uint64)) =>
        {
            Json::Number(Number::from(value))
        }
        crate::types::Value::Bool(value) => Json::Bool(value),
        crate::types::Value::Empty => Json::Array(vec![Json::Null]),
        _ => Json::String(canonical),
    }
}

fn subtree_to_json(tree: &DataTree, ctx: &Context, id: NodeId) -> Json {
    let node = tree.node(id);
    let is_leaf = node
        .snode
        .map(|snode| ctx.snode(snode).is_leaf())
        .unwrap_or_else(|| tree.children(id).is_empty());
    if is_leaf {
        return leaf_to_json(tree, ctx, id);
    }
    children_to_json(tree, ctx, id)
}

// Builds the object for a container/list-entry node, grouping repeated
// children (list and leaf-list entries) into arrays.
fn children_to_json(tree: &DataTree, ctx: &Context, id: NodeId) -> Json {
    let mut object = Map::new();
    for child in tree.children(id) {
        let name = member_name(tree, ctx, *child);
        let multiple = tree
            .node(*child)
            .snode
            .map(|snode| {
                matches!(
                    ctx.snode(snode).kind,
                    SchemaKind::List | SchemaKind::LeafList
                )
            })
            .unwrap_or(false);
        let value = subtree_to_json(tree, ctx, *child);
        if object.contains_key(&name) {
            if let Some(Json::Array(array)) = object.get_mut(&name) {
                array.push(value);
            }
        } else if multiple {
            object.insert(name, Json::Array(vec![value]));
        } else {
            object.insert(name, value);
        }
    }
    Json::Object(object)
}

fn json_to_string(value: &Json) -> String {
    match value {
        Json::String(value) => value.clone(),
        Json::Number(value) => value.to_string(),
        Json::Bool(value) => value.to_string(),
        Json::Null => String::new(),
        _ => value.to_string(),
    }
}

// Reads one member into the tree, resolving the schema node when a context
// is available.
fn read_member(
    tree: &mut DataTree,
    ctx: Option<&Context>,
    parent: NodeId,
    parent_snode: Option<SnodeId>,
    name: &str,
    value: &Json,
) -> Result<(), Error> {
    // "module:name" qualification.
    let (module, local): (Option<ModuleId>, &str) = match name.split_once(':') {
        Some((module_name, local)) => match ctx {
            Some(ctx) => {
                let module =
                    ctx.find_module_by_name(module_name).ok_or_else(|| {
                        Error::UnknownNamespace(module_name.to_owned())
                    })?;
                (Some(module), local)
            }
            None => (None, local),
        },
        None => (None, name),
    };

    let snode = match ctx {
        Some(ctx) => {
            let namespace =
                module.map(|module| ctx.module(module).namespace.clone());
            let snode = ctx
                .find_child_schema(parent_snode, local, namespace.as_deref())
                .ok_or_else(|| Error::UnknownElement(format!("/{}", name)))?;
            Some(snode)
        }
        None => None,
    };
    let namespace = match (ctx, snode) {
        (Some(ctx), Some(snode)) => {
            Some(ctx.module(ctx.snode(snode).module).namespace.clone())
        }
        _ => None,
    };

    let kind = match (ctx, snode) {
        (Some(ctx), Some(snode)) => Some(ctx.snode(snode).kind),
        _ => None,
    };

    let mut add_node = |tree: &mut DataTree,
                        value: Option<String>|
     -> NodeId {
        let id = tree.add_child(parent, local, namespace.as_deref());
        if namespace.is_none() {
            tree.node_mut(id).namespace = None;
        }
        tree.node_mut(id).snode = snode;
        tree.node_mut(id).value = value;
        id
    };

    match value {
        Json::Array(entries) => {
            // Empty leaf encoded as [null].
            if entries.len() == 1
                && entries[0].is_null()
                && matches!(kind, Some(SchemaKind::Leaf) | None)
            {
                add_node(tree, None);
                return Ok(());
            }
            for entry in entries {
                match entry {
                    Json::Object(members) => {
                        let id = add_node(tree, None);
                        for (name, value) in members {
                            read_member(tree, ctx, id, snode, name, value)?;
                        }
                    }
                    Json::Array(_) => {
                        return Err(Error::BadElement {
                            path: format!("/{}", name),
                            reason: "nested arrays are not valid".to_owned(),
                        });
                    }
                    scalar => {
                        add_node(tree, Some(json_to_string(scalar)));
                    }
                }
            }
        }
        Json::Object(members) => {
            let id = add_node(tree, None);
            for (name, value) in members {
                read_member(tree, ctx, id, snode, name, value)?;
            }
        }
        scalar => {
            let body = json_to_string(scalar);
            add_node(tree, (!body.is_empty()).then_some(body));
        }
    }
    Ok(())
}

// ===== global functions =====

/// Writes a tree as RFC 7951 JSON.
pub fn write(tree: &DataTree, ctx: &Context, pretty: bool) -> String {
    let value = children_to_json(tree, ctx, tree.root());
    if pretty {
        serde_json::to_string_pretty(&value).unwrap_or_default()
    } else {
        value.to_string()
    }
}

/// Reads RFC 7951 JSON into a schemaless tree (mode `NONE`).
pub fn read(text: &str) -> Result<DataTree, Error> {
    read_internal(None, text)
}

/// Reads RFC 7951 JSON with schema references attached (mode `BIND`).
pub fn read_bound(ctx: &Context, text: &str) -> Result<DataTree, Error> {
    read_internal(Some(ctx), text)
}

fn read_internal(ctx: Option<&Context>, text: &str) -> Result<DataTree, Error> {
    let value: Json = serde_json::from_str(text)
        .map_err(|err| Error::MalformedMessage(err.to_string()))?;
    let Json::Object(members) = value else {
        return Err(Error::MalformedMessage(
            "top-level JSON value must be an object".to_owned(),
        ));
    };

    let mut tree = DataTree::new();
    let root = tree.root();
    for (name, value) in &members {
        read_member(&mut tree, ctx, root, None, name, value)?;
    }
    Ok(tree)
}
