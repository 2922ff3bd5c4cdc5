//
// Copyright (c) The Keel Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::data::{DataTree, NodeId};
use crate::error::Error;
use crate::schema::Context;
use crate::xpath::parser::{Axis, BinaryOp, Expr, NodeTest, Step};
use crate::xpath::{NsMap, XPathValue};

/// A member of an XPath node-set: an element node or an attribute of one.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum Item {
    Node(NodeId),
    // Attribute, identified by its owner element and attribute index.
    Attr(NodeId, usize),
}

pub(crate) struct EvalCtx<'a> {
    pub tree: &'a DataTree,
    pub schema: Option<&'a Context>,
    pub nsmap: &'a NsMap,
    // The node current() refers to (the original context node).
    pub current: NodeId,
    // Document-order ranks, used to sort and deduplicate node-sets.
    order: HashMap<NodeId, usize>,
}

#[derive(Clone, Copy)]
pub(crate) struct Focus {
    pub item: Item,
    pub pos: usize,
    pub size: usize,
}

// ===== impl EvalCtx =====

impl<'a> EvalCtx<'a> {
    fn new(
        tree: &'a DataTree,
        schema: Option<&'a Context>,
        nsmap: &'a NsMap,
        current: NodeId,
    ) -> EvalCtx<'a> {
        let order = tree
            .descendants(tree.root())
            .into_iter()
            .enumerate()
            .map(|(rank, id)| (id, rank))
            .collect();
        EvalCtx {
            tree,
            schema,
            nsmap,
            current,
            order,
        }
    }

    fn rank(&self, item: &Item) -> (usize, usize) {
        match item {
            Item::Node(id) => {
                (self.order.get(id).copied().unwrap_or(usize::MAX), 0)
            }
            Item::Attr(id, index) => {
                (self.order.get(id).copied().unwrap_or(usize::MAX), index + 1)
            }
        }
    }

    pub(crate) fn sort_dedup(&self, items: &mut Vec<Item>) {
        items.sort_by_key(|item| self.rank(item));
        items.dedup();
    }

    pub(crate) fn item_string_value(&self, item: &Item) -> String {
        match item {
            Item::Node(id) => self.tree.string_value(*id),
            Item::Attr(id, index) => self
                .tree
                .node(*id)
                .attrs
                .get(*index)
                .map(|(_, value)| value.clone())
                .unwrap_or_default(),
        }
    }

    pub(crate) fn item_name(&self, item: &Item) -> String {
        match item {
            Item::Node(id) => self.tree.node(*id).name.clone(),
            Item::Attr(id, index) => self
                .tree
                .node(*id)
                .attrs
                .get(*index)
                .map(|(name, _)| name.clone())
                .unwrap_or_default(),
        }
    }
}

// ===== helper functions =====

pub(crate) fn value_boolean(value: &XPathValue) -> bool {
    match value {
        XPathValue::NodeSet(items) => !items.is_empty(),
        XPathValue::Number(number) => *number != 0.0 && !number.is_nan(),
        XPathValue::String(string) => !string.is_empty(),
        XPathValue::Bool(value) => *value,
    }
}

pub(crate) fn value_string(ectx: &EvalCtx<'_>, value: &XPathValue) -> String {
    match value {
        XPathValue::NodeSet(items) => items
            .first()
            .map(|item| ectx.item_string_value(item))
            .unwrap_or_default(),
        XPathValue::Number(number) => format_number(*number),
        XPathValue::String(string) => string.clone(),
        XPathValue::Bool(value) => value.to_string(),
    }
}

pub(crate) fn value_number(ectx: &EvalCtx<'_>, value: &XPathValue) -> f64 {
    match value {
        XPathValue::NodeSet(_) => {
            string_to_number(&value_string(ectx, value))
        }
        XPathValue::Number(number) => *number,
        XPathValue::String(string) => string_to_number(string),
        XPathValue::Bool(value) => {
            if *value {
                1.0
            } else {
                0.0
            }
        }
    }
}

pub(crate) fn string_to_number(text: &str) -> f64 {
    text.trim().parse::<f64>().unwrap_or(f64::NAN)
}

pub(crate) fn format_number(number: f64) -> String {
    if number.is_nan() {
        "NaN".to_owned()
    } else if number.is_infinite() {
        if number > 0.0 {
            "Infinity".to_owned()
        } else {
            "-Infinity".to_owned()
        }
    } else if number.fract() == 0.0 && number.abs() < i64::MAX as f64 {
        format!("{}", number as i64)
    } else {
        format!("{}", number)
    }
}

fn compare_equality(
    ectx: &EvalCtx<'_>,
    op: BinaryOp,
    left: &XPathValue,
    right: &XPathValue,
) -> bool {
    let negate = op == BinaryOp::NotEqual;
    let result = match (left, right) {
        (XPathValue::NodeSet(a), XPathValue::NodeSet(b)) => {
            a.iter().any(|ai| {
                let av = ectx.item_string_value(ai);
                b.iter().any(|bi| av == ectx.item_string_value(bi))
            })
        }
        (XPathValue::NodeSet(items), XPathValue::Number(number))
        | (XPathValue::Number(number), XPathValue::NodeSet(items)) => {
            items.iter().any(|item| {
                string_to_number(&ectx.item_string_value(item)) == *number
            })
        }
        (XPathValue::NodeSet(items), XPathValue::String(string))
        | (XPathValue::String(string), XPathValue::NodeSet(items)) => items
            .iter()
            .any(|item| ectx.item_string_value(item) == *string),
        (XPathValue::NodeSet(_), XPathValue::Bool(value))
        | (XPathValue::Bool(value), XPathValue::NodeSet(_)) => {
            let set = if left.is_node_set() { left } else { right };
            value_boolean(set) == *value
        }
        (XPathValue::Bool(_), _) | (_, XPathValue::Bool(_)) => {
            value_boolean(left) == value_boolean(right)
        }
        (XPathValue::Number(_), _) | (_, XPathValue::Number(_)) => {
            value_number(ectx, left) == value_number(ectx, right)
        }
        _ => value_string(ectx, left) == value_string(ectx, right),
    };
    result != negate
}

fn compare_relational(
    ectx: &EvalCtx<'_>,
    op: BinaryOp,
    left: &XPathValue,
    right: &XPathValue,
) -> bool {
    let cmp = |a: f64, b: f64| match op {
        BinaryOp::Less => a < b,
        BinaryOp::LessEq => a <= b,
        BinaryOp::Greater => a > b,
        BinaryOp::GreaterEq => a >= b,
        _ => unreachable!(),
    };
    match (left, right) {
        (XPathValue::NodeSet(a), XPathValue::NodeSet(b)) => a.iter().any(|ai| {
            let av = string_to_number(&ectx.item_string_value(ai));
            b.iter().any(|bi| {
                cmp(av, string_to_number(&ectx.item_string_value(bi)))
            })
        }),
        (XPathValue::NodeSet(items), other) => items.iter().any(|item| {
            cmp(
                string_to_number(&ectx.item_string_value(item)),
                value_number(ectx, other),
            )
        }),
        (other, XPathValue::NodeSet(items)) => items.iter().any(|item| {
            cmp(
                value_number(ectx, other),
                string_to_number(&ectx.item_string_value(item)),
            )
        }),
        _ => cmp(value_number(ectx, left), value_number(ectx, right)),
    }
}

// Nodes selected by an axis, in axis order (reverse axes yield reverse
// document order, which gives position() its XPath 1.0 meaning).
fn axis_items(ectx: &EvalCtx<'_>, item: &Item, axis: Axis) -> Vec<Item> {
    let tree = ectx.tree;
    let element = match item {
        Item::Node(id) => *id,
        Item::Attr(id, _) => {
            // Attributes only participate in parent/ancestor/self axes.
            return match axis {
                Axis::Parent => vec![Item::Node(*id)],
                Axis::Ancestor | Axis::AncestorOrSelf => {
                    let mut out = if axis == Axis::AncestorOrSelf {
                        vec![*item]
                    } else {
                        vec![]
                    };
                    out.push(Item::Node(*id));
                    out.extend(
                        tree.ancestors(*id).into_iter().map(Item::Node),
                    );
                    out
                }
                Axis::SelfAxis => vec![*item],
                _ => vec![],
            };
        }
    };

    match axis {
        Axis::Child => tree
            .children(element)
            .iter()
            .copied()
            .map(Item::Node)
            .collect(),
        Axis::Descendant => tree
            .descendants(element)
            .into_iter()
            .skip(1)
            .map(Item::Node)
            .collect(),
        Axis::DescendantOrSelf => tree
            .descendants(element)
            .into_iter()
            .map(Item::Node)
            .collect(),
        Axis::Parent => tree
            .parent(element)
            .map(|parent| vec![Item::Node(parent)])
            .unwrap_or_default(),
        Axis::Ancestor => {
            let mut out =
                tree.ancestors(element).into_iter().map(Item::Node).collect::<Vec<_>>();
            if tree.parent(element).is_some() {
                out.push(Item::Node(tree.root()));
            }
            out
        }
        Axis::AncestorOrSelf => {
            let mut out = vec![Item::Node(element)];
            out.extend(tree.ancestors(element).into_iter().map(Item::Node));
            if tree.parent(element).is_some() {
                out.push(Item::Node(tree.root()));
            }
            out
        }
        Axis::FollowingSibling | Axis::PrecedingSibling => {
            let Some(parent) = tree.parent(element) else {
                return vec![];
            };
            let siblings = tree.children(parent);
            let position = siblings
                .iter()
                .position(|sibling| *sibling == element)
                .unwrap_or(0);
            if axis == Axis::FollowingSibling {
                siblings[position + 1..]
                    .iter()
                    .copied()
                    .map(Item::Node)
                    .collect()
            } else {
                siblings[..position]
                    .iter()
                    .rev()
                    .copied()
                    .map(Item::Node)
                    .collect()
            }
        }
        Axis::Following | Axis::Preceding => {
            let rank = ectx.rank(item).0;
            let ancestors = tree.ancestors(element);
            let descendants = tree.descendants(element);
            let mut out = vec![];
            for id in tree.descendants(tree.root()) {
                if id == element
                    || id == tree.root()
                    || ancestors.contains(&id)
                    || descendants.contains(&id)
                {
                    continue;
                }
                let id_rank = ectx.order.get(&id).copied().unwrap_or(0);
                match axis {
                    Axis::Following if id_rank > rank => {
                        out.push(Item::Node(id));
                    }
                    Axis::Preceding if id_rank < rank => {
                        out.push(Item::Node(id));
                    }
                    _ => (),
                }
            }
            if axis == Axis::Preceding {
                out.reverse();
            }
            out
        }
        Axis::Attribute => tree
            .node(element)
            .attrs
            .iter()
            .enumerate()
            .map(|(index, _)| Item::Attr(element, index))
            .collect(),
        Axis::SelfAxis => vec![*item],
        // No namespace nodes in the data model.
        Axis::Namespace => vec![],
    }
}

fn test_matches(
    ectx: &EvalCtx<'_>,
    item: &Item,
    axis: Axis,
    test: &NodeTest,
) -> Result<bool, Error> {
    // The principal node type of the attribute axis is attribute.
    let principal = match (axis, item) {
        (Axis::Attribute, Item::Attr(..)) => true,
        (Axis::Attribute, Item::Node(_)) => false,
        (_, Item::Node(_)) => true,
        (_, Item::Attr(..)) => false,
    };

    match test {
        NodeTest::NodeType(kind) => {
            // Element and attribute nodes only; text(), comment() and
            // processing-instruction() never match.
            Ok(kind == "node")
        }
        NodeTest::Any => Ok(principal),
        NodeTest::AnyInNs(prefix) => {
            if !principal {
                return Ok(false);
            }
            let ns = ectx
                .nsmap
                .get(prefix)
                .ok_or_else(|| Error::XPathUnknownPrefix(prefix.clone()))?;
            Ok(match item {
                Item::Node(id) => {
                    ectx.tree.node(*id).namespace.as_deref()
                        == Some(ns.as_str())
                }
                Item::Attr(..) => false,
            })
        }
        NodeTest::Named { prefix, name } => {
            if !principal {
                return Ok(false);
            }
            if ectx.item_name(item) != *name {
                return Ok(false);
            }
            match prefix {
                Some(prefix) => {
                    let ns = ectx.nsmap.get(prefix).ok_or_else(|| {
                        Error::XPathUnknownPrefix(prefix.clone())
                    })?;
                    Ok(match item {
                        Item::Node(id) => {
                            ectx.tree.node(*id).namespace.as_deref()
                                == Some(ns.as_str())
                        }
                        // Attributes are in no namespace.
                        Item::Attr(..) => false,
                    })
                }
                // Unprefixed name tests match any namespace; YANG paths are
                // checked against the supplied prefix map, not a default
                // namespace.
                None => Ok(true),
            }
        }
    }
}

fn apply_step(
    ectx: &EvalCtx<'_>,
    inputs: Vec<Item>,
    step: &Step,
) -> Result<Vec<Item>, Error> {
    let mut out = vec![];
    for input in &inputs {
        let mut selected = vec![];
        for item in axis_items(ectx, input, step.axis) {
            if test_matches(ectx, &item, step.axis, &step.test)? {
                selected.push(item);
            }
        }
        for predicate in &step.predicates {
            let size = selected.len();
            let mut kept = vec![];
            for (index, item) in selected.iter().enumerate() {
                let focus = Focus {
                    item: *item,
                    pos: index + 1,
                    size,
                };
                let value = eval_expr(ectx, &focus, predicate)?;
                let keep = match value {
                    // A numeric predicate is a position test.
                    XPathValue::Number(number) => {
                        (index + 1) as f64 == number
                    }
                    value => value_boolean(&value),
                };
                if keep {
                    kept.push(*item);
                }
            }
            selected = kept;
        }
        out.extend(selected);
    }
    ectx.sort_dedup(&mut out);
    Ok(out)
}

pub(crate) fn apply_steps(
    ectx: &EvalCtx<'_>,
    mut items: Vec<Item>,
    steps: &[Step],
) -> Result<Vec<Item>, Error> {
    for step in steps {
        items = apply_step(ectx, items, step)?;
    }
    Ok(items)
}

pub(crate) fn eval_expr(
    ectx: &EvalCtx<'_>,
    focus: &Focus,
    expr: &Expr,
) -> Result<XPathValue, Error> {
    match expr {
        Expr::Or(left, right) => {
            let left = eval_expr(ectx, focus, left)?;
            if value_boolean(&left) {
                return Ok(XPathValue::Bool(true));
            }
            let right = eval_expr(ectx, focus, right)?;
            Ok(XPathValue::Bool(value_boolean(&right)))
        }
        Expr::And(left, right) => {
            let left = eval_expr(ectx, focus, left)?;
            if !value_boolean(&left) {
                return Ok(XPathValue::Bool(false));
            }
            let right = eval_expr(ectx, focus, right)?;
            Ok(XPathValue::Bool(value_boolean(&right)))
        }
        Expr::Binary(op, left, right) => {
            let left = eval_expr(ectx, focus, left)?;
            let right = eval_expr(ectx, focus, right)?;
            match op {
                BinaryOp::Equal | BinaryOp::NotEqual => Ok(XPathValue::Bool(
                    compare_equality(ectx, *op, &left, &right),
                )),
                BinaryOp::Less
                | BinaryOp::LessEq
                | BinaryOp::Greater
                | BinaryOp::GreaterEq => Ok(XPathValue::Bool(
                    compare_relational(ectx, *op, &left, &right),
                )),
                _ => {
                    let a = value_number(ectx, &left);
                    let b = value_number(ectx, &right);
                    let result = match op {
                        BinaryOp::Add => a + b,
                        BinaryOp::Sub => a - b,
                        BinaryOp::Mul => a * b,
                        BinaryOp::Div => a / b,
                        BinaryOp::Mod => a % b,
                        _ => unreachable!(),
                    };
                    Ok(XPathValue::Number(result))
                }
            }
        }
        Expr::Neg(inner) => {
            let value = eval_expr(ectx, focus, inner)?;
            Ok(XPathValue::Number(-value_number(ectx, &value)))
        }
        Expr::Union(left, right) => {
            let left = eval_expr(ectx, focus, left)?;
            let right = eval_expr(ectx, focus, right)?;
            match (left, right) {
                (XPathValue::NodeSet(mut a), XPathValue::NodeSet(b)) => {
                    a.extend(b);
                    ectx.sort_dedup(&mut a);
                    Ok(XPathValue::NodeSet(a))
                }
                _ => Err(Error::XPathType(
                    "operands of '|' must be node-sets".to_owned(),
                )),
            }
        }
        Expr::Literal(literal) => Ok(XPathValue::String(literal.clone())),
        Expr::Number(number) => Ok(XPathValue::Number(*number)),
        Expr::Call(name, args) => {
            crate::xpath::functions::call(ectx, focus, name, args)
        }
        Expr::Path(path) => {
            let start = if path.absolute {
                vec![Item::Node(ectx.tree.root())]
            } else {
                vec![focus.item]
            };
            let items = apply_steps(ectx, start, &path.steps)?;
            Ok(XPathValue::NodeSet(items))
        }
        Expr::Filter(primary, predicates, steps) => {
            let value = eval_expr(ectx, focus, primary)?;
            let XPathValue::NodeSet(mut items) = value else {
                return Err(Error::XPathType(
                    "predicates and steps need a node-set".to_owned(),
                ));
            };
            for predicate in predicates {
                let size = items.len();
                let mut kept = vec![];
                for (index, item) in items.iter().enumerate() {
                    let focus = Focus {
                        item: *item,
                        pos: index + 1,
                        size,
                    };
                    let value = eval_expr(ectx, &focus, predicate)?;
                    let keep = match value {
                        XPathValue::Number(number) => {
                            (index + 1) as f64 == number
                        }
                        value => value_boolean(&value),
                    };
                    if keep {
                        kept.push(*item);
                    }
                }
                items = kept;
            }
            let items = apply_steps(ectx, items, steps)?;
            Ok(XPathValue::NodeSet(items))
        }
    }
}

// ===== global functions =====

pub(crate) fn eval(
    tree: &DataTree,
    schema: Option<&Context>,
    ctx_node: NodeId,
    nsmap: &NsMap,
    expr: &Expr,
) -> Result<XPathValue, Error> {
    let ectx = EvalCtx::new(tree, schema, nsmap, ctx_node);
    let focus = Focus {
        item: Item::Node(ctx_node),
        pos: 1,
        size: 1,
    };
    eval_expr(&ectx, &focus, expr)
}

/// Boolean coercion of an evaluation result.
pub(crate) fn boolean(value: &XPathValue) -> bool {
    value_boolean(value)
}
