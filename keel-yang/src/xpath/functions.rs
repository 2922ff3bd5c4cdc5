//
// Copyright (c) The Keel Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! XPath 1.0 core function library plus the YANG extensions of RFC 7950
//! section 10 (`current()`, `deref()`, `re-match()`, `derived-from()`,
//! `derived-from-or-self()`, `enum-value()`, `bit-is-set()`).

use regex::Regex;

use crate::data::NodeId;
use crate::error::Error;
use crate::schema::SchemaKind;
use crate::types::BaseType;
use crate::xpath::XPathValue;
use crate::xpath::eval::{
    EvalCtx, Focus, Item, apply_steps, eval_expr, string_to_number,
    value_boolean, value_number, value_string,
};
use crate::xpath::parser::Expr;

// ===== helper functions =====

fn first_node(value: &XPathValue) -> Option<NodeId> {
    value.as_node_set()?.iter().find_map(|item| match item {
        Item::Node(id) => Some(*id),
        Item::Attr(..) => None,
    })
}

fn context_or_arg(
    ectx: &EvalCtx<'_>,
    focus: &Focus,
    args: &[XPathValue],
) -> XPathValue {
    match args.first() {
        Some(value) => value.clone(),
        None => XPathValue::NodeSet(vec![focus.item]),
    }
}

// substring() start/length use round-half-up semantics.
fn xpath_round(number: f64) -> f64 {
    if number.is_nan() || number.is_infinite() {
        number
    } else {
        (number + 0.5).floor()
    }
}

// Resolves a node-set argument down to the leaf it designates, together with
// its schema node.
fn leaf_arg(
    ectx: &EvalCtx<'_>,
    value: &XPathValue,
) -> Option<(NodeId, crate::schema::SnodeId)> {
    let node = first_node(value)?;
    let snode = ectx.tree.node(node).snode?;
    Some((node, snode))
}

// ===== global functions =====

pub(crate) fn call(
    ectx: &EvalCtx<'_>,
    focus: &Focus,
    name: &str,
    arg_exprs: &[Expr],
) -> Result<XPathValue, Error> {
    // position() and last() read the focus; everything else sees evaluated
    // arguments.
    match name {
        "position" => return Ok(XPathValue::Number(focus.pos as f64)),
        "last" => return Ok(XPathValue::Number(focus.size as f64)),
        "current" => {
            return Ok(XPathValue::NodeSet(vec![Item::Node(ectx.current)]));
        }
        "true" => return Ok(XPathValue::Bool(true)),
        "false" => return Ok(XPathValue::Bool(false)),
        _ => (),
    }

    let args = arg_exprs
        .iter()
        .map(|expr| eval_expr(ectx, focus, expr))
        .collect::<Result<Vec<_>, _>>()?;

    // A short argument list is a typed error, never a panic: filters and
    // access-control paths arrive from untrusted sessions.
    let required = match name {
        "count" | "id" | "sum" | "boolean" | "not" | "lang" | "floor"
        | "ceiling" | "round" | "deref" | "enum-value" => 1,
        "starts-with" | "contains" | "substring-before" | "substring-after"
        | "concat" | "substring" | "re-match" | "derived-from"
        | "derived-from-or-self" | "bit-is-set" => 2,
        "translate" => 3,
        _ => 0,
    };
    if args.len() < required {
        return Err(Error::XPathType(format!(
            "{}() expects at least {} argument(s)",
            name, required
        )));
    }

    let value = match name {
        // --- node-set functions ---
        "count" => {
            let items = args
                .first()
                .and_then(|value| value.as_node_set())
                .ok_or_else(|| {
                    Error::XPathType("count() needs a node-set".to_owned())
                })?;
            XPathValue::Number(items.len() as f64)
        }
        // No DTD-style IDs in instance data.
        "id" => XPathValue::NodeSet(vec![]),
        "local-name" | "name" => {
            let target = context_or_arg(ectx, focus, &args);
            let name = target
                .as_node_set()
                .and_then(|items| items.first())
                .map(|item| ectx.item_name(item))
                .unwrap_or_default();
            XPathValue::String(name)
        }
        "namespace-uri" => {
            let target = context_or_arg(ectx, focus, &args);
            let ns = first_node(&target)
                .and_then(|id| ectx.tree.node(id).namespace.clone())
                .unwrap_or_default();
            XPathValue::String(ns)
        }
        // --- string functions ---
        "string" => {
            let target = context_or_arg(ectx, focus, &args);
            XPathValue::String(value_string(ectx, &target))
        }
        "concat" => {
            let mut out = String::new();
            for arg in &args {
                out.push_str(&value_string(ectx, arg));
            }
            XPathValue::String(out)
        }
        "starts-with" => {
            let a = value_string(ectx, &args[0]);
            let b = value_string(ectx, &args[1]);
            XPathValue::Bool(a.starts_with(&b))
        }
        "contains" => {
            let a = value_string(ectx, &args[0]);
            let b = value_string(ectx, &args[1]);
            XPathValue::Bool(a.contains(&b))
        }
        "substring-before" => {
            let a = value_string(ectx, &args[0]);
            let b = value_string(ectx, &args[1]);
            XPathValue::String(
                a.split_once(&b)
                    .map(|(before, _)| before.to_owned())
                    .unwrap_or_default(),
            )
        }
        "substring-after" => {
            let a = value_string(ectx, &args[0]);
            let b = value_string(ectx, &args[1]);
            XPathValue::String(
                a.split_once(&b)
                    .map(|(_, after)| after.to_owned())
                    .unwrap_or_default(),
            )
        }
        "substring" => {
            let text = value_string(ectx, &args[0]);
            let start = xpath_round(value_number(ectx, &args[1]));
            let end = match args.get(2) {
                Some(length) => start + xpath_round(value_number(ectx, length)),
                None => f64::INFINITY,
            };
            let out = text
                .chars()
                .enumerate()
                .filter(|(index, _)| {
                    let position = (*index + 1) as f64;
                    position >= start && position < end
                })
                .map(|(_, ch)| ch)
                .collect();
            XPathValue::String(out)
        }
        "string-length" => {
            let target = context_or_arg(ectx, focus, &args);
            let text = value_string(ectx, &target);
            XPathValue::Number(text.chars().count() as f64)
        }
        "normalize-space" => {
            let target = context_or_arg(ectx, focus, &args);
            let text = value_string(ectx, &target);
            XPathValue::String(
                text.split_ascii_whitespace().collect::<Vec<_>>().join(" "),
            )
        }
        "translate" => {
            let text = value_string(ectx, &args[0]);
            let from: Vec<char> = value_string(ectx, &args[1]).chars().collect();
            let to: Vec<char> = value_string(ectx, &args[2]).chars().collect();
            let out = text
                .chars()
                .filter_map(|ch| match from.iter().position(|f| *f == ch) {
                    Some(index) => to.get(index).copied(),
                    None => Some(ch),
                })
                .collect();
            XPathValue::String(out)
        }
        // --- boolean functions ---
        "boolean" => XPathValue::Bool(value_boolean(&args[0])),
        "not" => XPathValue::Bool(!value_boolean(&args[0])),
        "lang" => {
            let wanted = value_string(ectx, &args[0]).to_ascii_lowercase();
            let mut lang = None;
            if let Item::Node(id) = focus.item {
                let mut chain = vec![id];
                chain.extend(ectx.tree.ancestors(id));
                for node in chain {
                    if let Some(value) = ectx.tree.attr_get(node, "lang") {
                        lang = Some(value.to_ascii_lowercase());
                        break;
                    }
                }
            }
            XPathValue::Bool(lang.is_some_and(|lang| {
                lang == wanted
                    || lang.strip_prefix(&wanted).is_some_and(|rest| {
                        rest.starts_with('-')
                    })
            }))
        }
        // --- number functions ---
        "number" => {
            let target = context_or_arg(ectx, focus, &args);
            XPathValue::Number(value_number(ectx, &target))
        }
        "sum" => {
            let items = args
                .first()
                .and_then(|value| value.as_node_set())
                .ok_or_else(|| {
                    Error::XPathType("sum() needs a node-set".to_owned())
                })?;
            let sum = items
                .iter()
                .map(|item| string_to_number(&ectx.item_string_value(item)))
                .sum();
            XPathValue::Number(sum)
        }
        "floor" => XPathValue::Number(value_number(ectx, &args[0]).floor()),
        "ceiling" => XPathValue::Number(value_number(ectx, &args[0]).ceil()),
        "round" => XPathValue::Number(xpath_round(value_number(ectx, &args[0]))),
        // --- YANG extensions ---
        "re-match" => {
            let text = value_string(ectx, &args[0]);
            let pattern = value_string(ectx, &args[1]);
            let regex = Regex::new(&format!("^(?:{})$", pattern))
                .map_err(|err| Error::XPathType(err.to_string()))?;
            XPathValue::Bool(regex.is_match(&text))
        }
        "deref" => deref(ectx, &args[0])?,
        "derived-from" => derived_from(ectx, &args, false)?,
        "derived-from-or-self" => derived_from(ectx, &args, true)?,
        "enum-value" => {
            let value = leaf_arg(ectx, &args[0])
                .and_then(|(node, snode)| {
                    let schema = ectx.schema?;
                    let snode = schema.snode(snode);
                    let typ = snode.typ.as_ref()?;
                    let body = ectx.tree.node(node).value.clone()?;
                    match typ.parse_value(schema, snode.module, &body).ok()? {
                        crate::types::Value::Enum { value, .. } => {
                            Some(value as f64)
                        }
                        _ => None,
                    }
                })
                .unwrap_or(f64::NAN);
            XPathValue::Number(value)
        }
        "bit-is-set" => {
            let bit = value_string(ectx, &args[1]);
            let set = first_node(&args[0])
                .and_then(|id| ectx.tree.node(id).value.clone())
                .is_some_and(|body| {
                    body.split_ascii_whitespace().any(|b| b == bit)
                });
            XPathValue::Bool(set)
        }
        _ => return Err(Error::XPathUnknownFunction(name.to_owned())),
    };
    Ok(value)
}

// deref(): follows a leafref to the instances it points at, or an
// instance-identifier to its target node.
fn deref(
    ectx: &EvalCtx<'_>,
    arg: &XPathValue,
) -> Result<XPathValue, Error> {
    let Some(schema) = ectx.schema else {
        return Ok(XPathValue::NodeSet(vec![]));
    };
    let Some((node, snode_id)) = leaf_arg(ectx, arg) else {
        return Ok(XPathValue::NodeSet(vec![]));
    };
    let snode = schema.snode(snode_id);
    let Some(typ) = &snode.typ else {
        return Ok(XPathValue::NodeSet(vec![]));
    };

    match typ.base {
        Some(BaseType::Leafref) => {
            let Some(target) = typ.leafref_target else {
                return Ok(XPathValue::NodeSet(vec![]));
            };
            let body = ectx.tree.node(node).value.clone().unwrap_or_default();
            // All instances of the target leaf carrying the same value.
            let items = ectx
                .tree
                .descendants(ectx.tree.root())
                .into_iter()
                .filter(|id| {
                    ectx.tree.node(*id).snode == Some(target)
                        && ectx.tree.node(*id).value.as_deref()
                            == Some(body.as_str())
                })
                .map(Item::Node)
                .collect();
            Ok(XPathValue::NodeSet(items))
        }
        Some(BaseType::InstanceIdentifier) => {
            let body = ectx.tree.node(node).value.clone().unwrap_or_default();
            let expr = crate::xpath::parser::parse(&body)?;
            let Expr::Path(path) = expr else {
                return Ok(XPathValue::NodeSet(vec![]));
            };
            let items = apply_steps(
                ectx,
                vec![Item::Node(ectx.tree.root())],
                &path.steps,
            )?;
            Ok(XPathValue::NodeSet(items))
        }
        _ => Ok(XPathValue::NodeSet(vec![])),
    }
}

fn derived_from(
    ectx: &EvalCtx<'_>,
    args: &[XPathValue],
    or_self: bool,
) -> Result<XPathValue, Error> {
    let Some(schema) = ectx.schema else {
        return Ok(XPathValue::Bool(false));
    };
    let base_name = value_string(ectx, &args[1]);

    let Some(items) = args[0].as_node_set() else {
        return Ok(XPathValue::Bool(false));
    };
    for item in items {
        let Item::Node(id) = item else { continue };
        let node = ectx.tree.node(*id);
        let Some(snode_id) = node.snode else { continue };
        let snode = schema.snode(snode_id);
        if snode.kind != SchemaKind::Leaf && snode.kind != SchemaKind::LeafList
        {
            continue;
        }
        let Some(body) = &node.value else { continue };
        let Some(identity) = schema.find_identity(snode.module, body) else {
            continue;
        };
        let Some(base) = schema.find_identity(snode.module, &base_name) else {
            continue;
        };
        if (or_self && identity == base)
            || schema.identity_derived_from(identity, base)
        {
            return Ok(XPathValue::Bool(true));
        }
    }
    Ok(XPathValue::Bool(false))
}
