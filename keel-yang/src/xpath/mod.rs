//
// Copyright (c) The Keel Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! XPath 1.0 evaluator over instance data trees.
//!
//! Namespace resolution always goes through an explicit prefix map supplied
//! with the query; an unknown prefix is a typed error, never a silently
//! empty node-set. The evaluator never mutates the input tree.

mod eval;
mod functions;
mod parser;

use std::collections::BTreeMap;

use enum_as_inner::EnumAsInner;

use crate::data::{DataTree, NodeId};
use crate::error::Error;
use crate::schema::Context;

pub use eval::Item;

/// Prefix-to-namespace bindings for one query.
pub type NsMap = BTreeMap<String, String>;

/// A compiled XPath expression, reusable across evaluations.
#[derive(Clone, Debug)]
pub struct XPath {
    expr: parser::Expr,
    source: String,
}

/// Result of an XPath evaluation.
#[derive(Clone, Debug, PartialEq)]
#[derive(EnumAsInner)]
pub enum XPathValue {
    NodeSet(Vec<Item>),
    Number(f64),
    String(String),
    Bool(bool),
}

// ===== impl XPath =====

impl XPath {
    /// Parses an expression.
    pub fn compile(source: &str) -> Result<XPath, Error> {
        let expr = parser::parse(source)?;
        Ok(XPath {
            expr,
            source: source.to_owned(),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates against `ctx_node`. `schema` enables the YANG function
    /// library extensions that need type information (`deref()`,
    /// `derived-from()`, ...).
    pub fn eval(
        &self,
        tree: &DataTree,
        schema: Option<&Context>,
        ctx_node: NodeId,
        nsmap: &NsMap,
    ) -> Result<XPathValue, Error> {
        eval::eval(tree, schema, ctx_node, nsmap, &self.expr)
    }

    /// Evaluates and coerces the result to a boolean.
    pub fn eval_bool(
        &self,
        tree: &DataTree,
        schema: Option<&Context>,
        ctx_node: NodeId,
        nsmap: &NsMap,
    ) -> Result<bool, Error> {
        Ok(eval::boolean(&self.eval(tree, schema, ctx_node, nsmap)?))
    }

    /// Evaluates and returns the matching element nodes.
    pub fn eval_nodes(
        &self,
        tree: &DataTree,
        schema: Option<&Context>,
        ctx_node: NodeId,
        nsmap: &NsMap,
    ) -> Result<Vec<NodeId>, Error> {
        match self.eval(tree, schema, ctx_node, nsmap)? {
            XPathValue::NodeSet(items) => Ok(items
                .into_iter()
                .filter_map(|item| match item {
                    Item::Node(id) => Some(id),
                    Item::Attr(..) => None,
                })
                .collect()),
            _ => Err(Error::XPathType(
                "expression does not evaluate to a node-set".to_owned(),
            )),
        }
    }
}

// ===== global functions =====

/// One-shot compile and evaluate.
pub fn eval(
    tree: &DataTree,
    schema: Option<&Context>,
    ctx_node: NodeId,
    expr: &str,
    nsmap: &NsMap,
) -> Result<XPathValue, Error> {
    XPath::compile(expr)?.eval(tree, schema, ctx_node, nsmap)
}
