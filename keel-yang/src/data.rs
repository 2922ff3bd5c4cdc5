//
// Copyright (c) The Keel Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! Instance data trees.
//!
//! Nodes live in an arena and reference each other by index; the parent link
//! is a plain back-reference, never ownership. Diff state is kept in a
//! transient side-table ([`Marks`]) instead of on the nodes themselves, so a
//! tree outside a diff/validate/commit cycle carries no marker bits at all.

use std::collections::HashMap;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::schema::{Context, SchemaKind, SnodeId};

/// Index of a node inside a [`DataTree`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct NodeId(pub u32);

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct MarkFlags: u8 {
        const ADD = 0x01;
        const DEL = 0x02;
        const CHANGE = 0x04;
        const DEFAULT = 0x08;
        const MARK = 0x10;
    }
}

/// Transient per-node marker bits, keyed by node index. Valid only for the
/// duration of one diff/validate/commit cycle.
#[derive(Debug, Default)]
pub struct Marks(HashMap<NodeId, MarkFlags>);

#[derive(Clone, Debug)]
pub struct Node {
    pub name: String,
    pub namespace: Option<String>,
    pub snode: Option<SnodeId>,
    pub value: Option<String>,
    pub attrs: Vec<(String, String)>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// An ordered, typed, namespace-aware instance tree. Slot 0 is a sentinel
/// root whose children are the top-level data nodes. Unlinked subtrees
/// leave their arena slots behind; [`DataTree::duplicate`] compacts.
#[derive(Clone, Debug)]
pub struct DataTree {
    nodes: Vec<Node>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DiffOp {
    Create,
    Delete,
    Modify,
}

/// Result of [`DataTree::diff`]: the union of both trees with add/delete/
/// change marks on the side.
#[derive(Debug)]
pub struct DataDiff {
    pub tree: DataTree,
    pub marks: Marks,
}

// ===== impl Marks =====

impl Marks {
    pub fn get(&self, node: NodeId) -> MarkFlags {
        self.0.get(&node).copied().unwrap_or_default()
    }

    pub fn insert(&mut self, node: NodeId, flags: MarkFlags) {
        *self.0.entry(node).or_default() |= flags;
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ===== impl DataTree =====

impl DataTree {
    pub fn new() -> DataTree {
        DataTree {
            nodes: vec![Node {
                name: String::new(),
                namespace: None,
                snode: None,
                value: None,
                attrs: vec![],
                parent: None,
                children: vec![],
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    /// Whether the tree holds any data nodes at all.
    pub fn is_empty(&self) -> bool {
        self.node(self.root()).children.is_empty()
    }

    /// Appends a new child node. The namespace is inherited from the parent
    /// when not supplied.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        name: &str,
        namespace: Option<&str>,
    ) -> NodeId {
        let namespace = namespace
            .map(str::to_owned)
            .or_else(|| self.node(parent).namespace.clone());
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            name: name.to_owned(),
            namespace,
            snode: None,
            value: None,
            attrs: vec![],
            parent: Some(parent),
            children: vec![],
        });
        self.node_mut(parent).children.push(id);
        id
    }

    /// Inserts a new child node at the given position among its siblings.
    pub fn insert_child(
        &mut self,
        parent: NodeId,
        position: usize,
        name: &str,
        namespace: Option<&str>,
    ) -> NodeId {
        let id = self.add_child(parent, name, namespace);
        let children = &mut self.node_mut(parent).children;
        children.pop();
        let position = position.min(children.len());
        children.insert(position, id);
        id
    }

    /// Detaches a node (and its subtree) from the tree.
    pub fn unlink(&mut self, id: NodeId) {
        if let Some(parent) = self.node(id).parent {
            self.node_mut(parent).children.retain(|child| *child != id);
        }
        self.node_mut(id).parent = None;
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    /// First child matching name (and namespace, when supplied).
    pub fn find_child(
        &self,
        parent: NodeId,
        name: &str,
        namespace: Option<&str>,
    ) -> Option<NodeId> {
        self.node(parent)
            .children
            .iter()
            .copied()
            .find(|child| self.name_matches(*child, name, namespace))
    }

    /// All children matching name (list entries, leaf-list entries).
    pub fn find_children<'a>(
        &'a self,
        parent: NodeId,
        name: &'a str,
        namespace: Option<&'a str>,
    ) -> impl Iterator<Item = NodeId> + 'a {
        self.node(parent)
            .children
            .iter()
            .copied()
            .filter(move |child| self.name_matches(*child, name, namespace))
    }

    fn name_matches(
        &self,
        id: NodeId,
        name: &str,
        namespace: Option<&str>,
    ) -> bool {
        let node = self.node(id);
        node.name == name
            && namespace
                .is_none_or(|ns| node.namespace.as_deref() == Some(ns))
    }

    /// Preorder traversal of a subtree, including the starting node.
    pub fn descendants(&self, from: NodeId) -> Vec<NodeId> {
        let mut out = vec![];
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.node(id).children.iter().rev().copied());
        }
        out
    }

    /// Ancestors from the parent up to (excluding) the sentinel root.
    pub fn ancestors(&self, from: NodeId) -> Vec<NodeId> {
        let mut out = vec![];
        let mut current = self.node(from).parent;
        while let Some(id) = current {
            if id == self.root() {
                break;
            }
            out.push(id);
            current = self.node(id).parent;
        }
        out
    }

    pub fn attr_get(&self, id: NodeId, name: &str) -> Option<&str> {
        self.node(id)
            .attrs
            .iter()
            .find(|(attr, _)| attr == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn attr_set(&mut self, id: NodeId, name: &str, value: &str) {
        let node = self.node_mut(id);
        match node.attrs.iter_mut().find(|(attr, _)| attr == name) {
            Some((_, old)) => *old = value.to_owned(),
            None => node.attrs.push((name.to_owned(), value.to_owned())),
        }
    }

    /// XPath string-value: the node's body, or the concatenation of all
    /// descendant bodies in document order.
    pub fn string_value(&self, id: NodeId) -> String {
        let mut out = String::new();
        for node in self.descendants(id) {
            if let Some(value) = &self.node(node).value {
                out.push_str(value);
            }
        }
        out
    }

    /// Deep-copies a subtree from another tree under `parent`, returning the
    /// new root of the copy.
    pub fn copy_from(
        &mut self,
        parent: NodeId,
        other: &DataTree,
        src: NodeId,
    ) -> NodeId {
        let src_node = other.node(src);
        let id =
            self.add_child(parent, &src_node.name, src_node.namespace.as_deref());
        {
            let node = self.node_mut(id);
            node.snode = src_node.snode;
            node.value = src_node.value.clone();
            node.attrs = src_node.attrs.clone();
        }
        for child in &src_node.children {
            self.copy_from(id, other, *child);
        }
        id
    }

    /// Compact deep copy of the whole tree. Dead arena slots are dropped.
    pub fn duplicate(&self) -> DataTree {
        let mut copy = DataTree::new();
        for top in self.children(self.root()).to_vec() {
            copy.copy_from(copy.root(), self, top);
        }
        copy
    }

    /// Merges another tree into this one. Matching containers are merged
    /// recursively; matching leaves take the other tree's body; everything
    /// else is deep-copied in.
    pub fn merge(&mut self, ctx: Option<&Context>, other: &DataTree) {
        self.merge_children(ctx, self.root(), other, other.root());
    }

    fn merge_children(
        &mut self,
        ctx: Option<&Context>,
        parent: NodeId,
        other: &DataTree,
        other_parent: NodeId,
    ) {
        for src in other.children(other_parent).to_vec() {
            match self.match_child(ctx, parent, other, src) {
                Some(dst) => {
                    self.node_mut(dst).value =
                        other.node(src).value.clone();
                    self.merge_children(ctx, dst, other, src);
                }
                None => {
                    self.copy_from(parent, other, src);
                }
            }
        }
    }

    /// Finds the child of `parent` corresponding to `src` in `other`: same
    /// namespace and name, and the same instance identity (key tuple for
    /// list entries, body for leaf-list entries).
    pub fn match_child(
        &self,
        ctx: Option<&Context>,
        parent: NodeId,
        other: &DataTree,
        src: NodeId,
    ) -> Option<NodeId> {
        let src_node = other.node(src);
        let src_identity = other.instance_identity(ctx, src);
        let candidates = self
            .find_children(
                parent,
                &src_node.name,
                src_node.namespace.as_deref(),
            )
            .collect::<Vec<_>>();

        match src_identity {
            Some(identity) => candidates.into_iter().find(|candidate| {
                self.instance_identity(ctx, *candidate).as_ref()
                    == Some(&identity)
            }),
            // No instance identity: same-named siblings match positionally.
            None => {
                let position = other
                    .find_children(
                        other_parent_of(other, src),
                        &src_node.name,
                        src_node.namespace.as_deref(),
                    )
                    .position(|sibling| sibling == src)
                    .unwrap_or(0);
                candidates.get(position).copied()
            }
        }
    }

    // Identity of a node among same-named siblings: the key tuple for list
    // entries, the body for leaf-list entries, `None` otherwise.
    fn instance_identity(
        &self,
        ctx: Option<&Context>,
        id: NodeId,
    ) -> Option<Vec<String>> {
        let node = self.node(id);
        let ctx = ctx?;
        let snode = node.snode?;
        match ctx.snode(snode).kind {
            SchemaKind::List => Some(self.list_keys(ctx, id)),
            SchemaKind::LeafList => {
                Some(vec![node.value.clone().unwrap_or_default()])
            }
            _ => None,
        }
    }

    /// Key tuple of a list entry, in key declaration order.
    pub fn list_keys(&self, ctx: &Context, id: NodeId) -> Vec<String> {
        let Some(snode) = self.node(id).snode else {
            return vec![];
        };
        if !ctx.snode(snode).is_list() {
            return vec![];
        }
        ctx.snode(snode)
            .keys
            .iter()
            .filter_map(|key| {
                self.find_child(id, key, None)
                    .and_then(|child| self.node(child).value.clone())
            })
            .collect()
    }

    /// Instance path of a node ("/mod:list[key='v']/leaf"), used in error
    /// reports and access-control checks.
    pub fn path(&self, ctx: &Context, id: NodeId) -> String {
        let mut segments = vec![];
        let mut chain = self.ancestors(id);
        chain.reverse();
        chain.push(id);

        for node_id in chain {
            let node = self.node(node_id);
            let qualifier = match node.snode {
                Some(snode) => {
                    let snode = ctx.snode(snode);
                    let parent_module = self
                        .parent(node_id)
                        .filter(|parent| *parent != self.root())
                        .and_then(|parent| self.node(parent).snode)
                        .map(|parent| ctx.snode(parent).module);
                    if parent_module == Some(snode.module) {
                        None
                    } else {
                        Some(ctx.module(snode.module).name.clone())
                    }
                }
                None => None,
            };
            let mut segment = match qualifier {
                Some(module) => format!("{}:{}", module, node.name),
                None => node.name.clone(),
            };
            if let Some(snode) = node.snode
                && ctx.snode(snode).is_list()
            {
                let snode = ctx.snode(snode);
                for (key, value) in
                    snode.keys.iter().zip(self.list_keys(ctx, node_id))
                {
                    segment.push_str(&format!("[{}='{}']", key, value));
                }
            }
            segments.push(segment);
        }
        format!("/{}", segments.join("/"))
    }

    /// Attaches schema references top-down. Fails on the first element that
    /// does not bind.
    pub fn bind(&mut self, ctx: &Context) -> Result<(), Error> {
        let unbound = self.bind_partial(ctx);
        match unbound.first() {
            Some(id) => {
                let node = self.node(*id);
                match &node.namespace {
                    Some(ns) if ctx.find_module_by_namespace(ns).is_none() => {
                        Err(Error::UnknownNamespace(ns.clone()))
                    }
                    _ => Err(Error::UnknownElement(self.path(ctx, *id))),
                }
            }
            None => Ok(()),
        }
    }

    /// Attaches schema references top-down, returning the nodes that failed
    /// to bind (with their subtrees left unbound). Used by upgrade-on-load.
    pub fn bind_partial(&mut self, ctx: &Context) -> Vec<NodeId> {
        let mut unbound = vec![];
        for top in self.children(self.root()).to_vec() {
            self.bind_node(ctx, top, None, &mut unbound);
        }
        unbound
    }

    fn bind_node(
        &mut self,
        ctx: &Context,
        id: NodeId,
        parent_snode: Option<SnodeId>,
        unbound: &mut Vec<NodeId>,
    ) {
        let node = self.node(id);
        let snode = ctx.find_child_schema(
            parent_snode,
            &node.name,
            node.namespace.as_deref(),
        );
        match snode {
            Some(snode) => {
                self.node_mut(id).snode = Some(snode);
                for child in self.children(id).to_vec() {
                    self.bind_node(ctx, child, Some(snode), unbound);
                }
            }
            None => unbound.push(id),
        }
    }

    /// Reorders every subtree into canonical output order: keys of a list
    /// entry first (in key declaration order), then schema declaration
    /// order. Entries of a list keep insertion order unless the list is
    /// `ordered-by system`, in which case they sort by key tuple.
    pub fn sort_canonical(&mut self, ctx: &Context) {
        self.sort_children(ctx, self.root());
    }

    fn sort_children(&mut self, ctx: &Context, id: NodeId) {
        let children = self.children(id).to_vec();
        for child in &children {
            self.sort_children(ctx, *child);
        }

        let parent_snode = self.node(id).snode;
        let mut ranked: Vec<(u8, usize, Vec<String>, usize, NodeId)> = vec![];
        for (index, child) in children.iter().enumerate() {
            let node = self.node(*child);
            let (group, rank, tuple) = match node.snode {
                Some(snode_id) => {
                    let snode = ctx.snode(snode_id);
                    let rank = match parent_snode {
                        Some(parent) => schema_rank(ctx, parent, snode_id),
                        None => top_rank(ctx, snode_id),
                    };
                    if snode.is_key() {
                        let key_index = parent_snode
                            .map(|parent| {
                                ctx.snode(parent)
                                    .keys
                                    .iter()
                                    .position(|key| *key == snode.name)
                                    .unwrap_or(0)
                            })
                            .unwrap_or(0);
                        (0, key_index, vec![])
                    } else if snode.is_list()
                        && snode
                            .flags
                            .contains(crate::schema::SchemaFlags::ORDERED_BY_SYSTEM)
                    {
                        (1, rank, self.list_keys(ctx, *child))
                    } else {
                        (1, rank, vec![])
                    }
                }
                // Schemaless children keep insertion order.
                None => (1, usize::MAX, vec![]),
            };
            ranked.push((group, rank, tuple, index, *child));
        }
        ranked.sort();
        self.node_mut(id).children =
            ranked.into_iter().map(|(.., child)| child).collect();
    }

    /// Structural equality of two subtrees: same namespace and name, same
    /// instance identity, recursively equal bodies and children.
    pub fn subtree_eq(
        &self,
        id: NodeId,
        other: &DataTree,
        other_id: NodeId,
    ) -> bool {
        let a = self.node(id);
        let b = other.node(other_id);
        if a.name != b.name || a.namespace != b.namespace || a.value != b.value
        {
            return false;
        }
        if a.children.len() != b.children.len() {
            return false;
        }
        a.children
            .iter()
            .zip(b.children.iter())
            .all(|(ac, bc)| self.subtree_eq(*ac, other, *bc))
    }

    /// Diffs this tree (the old configuration) against `new`. The returned
    /// diff owns a merged tree: a copy of `new` extended with the deleted
    /// subtrees of `self`, with add/delete/change marks on the side.
    pub fn diff(&self, ctx: Option<&Context>, new: &DataTree) -> DataDiff {
        let mut diff = DataDiff {
            tree: new.duplicate(),
            marks: Marks::default(),
        };
        let merged_root = diff.tree.root();
        diff_children(
            ctx,
            self,
            self.root(),
            new,
            new.root(),
            &mut diff,
            merged_root,
        );
        diff
    }
}

// ===== impl DataDiff =====

impl DataDiff {
    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }

    /// Flattens the diff into (operation, instance path) pairs, in document
    /// order. Created subtrees yield one entry per descendant node.
    pub fn changes(&self, ctx: &Context) -> Vec<(DiffOp, String)> {
        let mut out = vec![];
        for id in self.tree.descendants(self.tree.root()) {
            if id == self.tree.root() {
                continue;
            }
            let marks = self.marks.get(id);
            let op = if marks.contains(MarkFlags::ADD) {
                DiffOp::Create
            } else if marks.contains(MarkFlags::DEL) {
                // A deleted subtree is reported once, at its topmost node.
                let parent_deleted = self
                    .tree
                    .parent(id)
                    .is_some_and(|p| self.marks.get(p).contains(MarkFlags::DEL));
                if parent_deleted {
                    continue;
                }
                DiffOp::Delete
            } else if marks.contains(MarkFlags::CHANGE) {
                DiffOp::Modify
            } else {
                continue;
            };
            out.push((op, self.tree.path(ctx, id)));
        }
        out
    }
}

// ===== helper functions =====

// Position of a child schema node in its parent's flattened (choice/case
// transparent) child list; used as the canonical ordering rank.
fn schema_rank(ctx: &Context, parent: SnodeId, child: SnodeId) -> usize {
    fn flatten(ctx: &Context, parent: SnodeId, out: &mut Vec<SnodeId>) {
        for id in &ctx.snode(parent).children {
            match ctx.snode(*id).kind {
                SchemaKind::Choice | SchemaKind::Case => flatten(ctx, *id, out),
                _ => out.push(*id),
            }
        }
    }
    let mut flat = vec![];
    flatten(ctx, parent, &mut flat);
    flat.iter().position(|id| *id == child).unwrap_or(usize::MAX)
}

fn top_rank(ctx: &Context, snode: SnodeId) -> usize {
    let module = ctx.snode(snode).module;
    ctx.module(module)
        .top
        .iter()
        .position(|id| *id == snode)
        .unwrap_or(usize::MAX)
}

// Parent of a node, falling back to the sentinel root.
fn other_parent_of(tree: &DataTree, id: NodeId) -> NodeId {
    tree.parent(id).unwrap_or(tree.root())
}

// Recursive diff walk: `merged_parent` mirrors `new_parent` inside the
// merged tree.
fn diff_children(
    ctx: Option<&Context>,
    old: &DataTree,
    old_parent: NodeId,
    new: &DataTree,
    new_parent: NodeId,
    diff: &mut DataDiff,
    merged_parent: NodeId,
) {
    // The merged tree was copied from `new`, so children correspond by
    // position.
    let merged_children = diff.tree.children(merged_parent).to_vec();
    let new_children = new.children(new_parent).to_vec();

    // Old nodes missing from the new tree: copy into the merged tree and
    // mark the whole subtree deleted.
    for old_child in old.children(old_parent).to_vec() {
        if new.match_child(ctx, new_parent, old, old_child).is_none() {
            let copied = diff.tree.copy_from(merged_parent, old, old_child);
            for id in diff.tree.descendants(copied) {
                diff.marks.insert(id, MarkFlags::DEL);
            }
        }
    }

    for (new_child, merged_child) in
        new_children.iter().zip(merged_children.iter())
    {
        match old.match_child(ctx, old_parent, new, *new_child) {
            // Node exists in both trees: compare bodies, recurse.
            Some(old_child) => {
                if old.node(old_child).value != new.node(*new_child).value {
                    diff.marks.insert(*merged_child, MarkFlags::CHANGE);
                }
                diff_children(
                    ctx,
                    old,
                    old_child,
                    new,
                    *new_child,
                    diff,
                    *merged_child,
                );
            }
            // New subtree: mark every node added.
            None => {
                for id in diff.tree.descendants(*merged_child) {
                    diff.marks.insert(id, MarkFlags::ADD);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(tree: &mut DataTree, parent: NodeId, name: &str, value: &str) {
        let id = tree.add_child(parent, name, None);
        tree.node_mut(id).value = Some(value.to_owned());
    }

    #[test]
    fn build_and_find() {
        let mut tree = DataTree::new();
        let root = tree.root();
        let top = tree.add_child(root, "top", Some("urn:example:test"));
        leaf(&mut tree, top, "x", "0");

        // Children inherit the parent namespace.
        let x = tree.find_child(top, "x", Some("urn:example:test")).unwrap();
        assert_eq!(tree.node(x).value.as_deref(), Some("0"));
        assert_eq!(tree.string_value(top), "0");
        assert_eq!(tree.ancestors(x), vec![top]);
    }

    #[test]
    fn unlink_detaches_subtree() {
        let mut tree = DataTree::new();
        let top = tree.add_child(tree.root(), "top", None);
        let a = tree.add_child(top, "a", None);
        leaf(&mut tree, a, "x", "1");

        tree.unlink(a);
        assert!(tree.find_child(top, "a", None).is_none());
        assert!(tree.children(top).is_empty());
    }

    #[test]
    fn merge_replaces_leaves() {
        let mut a = DataTree::new();
        let top = a.add_child(a.root(), "top", None);
        leaf(&mut a, top, "x", "1");

        let mut b = DataTree::new();
        let top_b = b.add_child(b.root(), "top", None);
        leaf(&mut b, top_b, "x", "2");
        leaf(&mut b, top_b, "y", "3");

        a.merge(None, &b);
        let top = a.find_child(a.root(), "top", None).unwrap();
        let x = a.find_child(top, "x", None).unwrap();
        let y = a.find_child(top, "y", None).unwrap();
        assert_eq!(a.node(x).value.as_deref(), Some("2"));
        assert_eq!(a.node(y).value.as_deref(), Some("3"));
    }

    #[test]
    fn diff_marks() {
        let mut old = DataTree::new();
        let top = old.add_child(old.root(), "top", None);
        leaf(&mut old, top, "x", "1");
        leaf(&mut old, top, "y", "2");

        let mut new = DataTree::new();
        let top_b = new.add_child(new.root(), "top", None);
        leaf(&mut new, top_b, "x", "9");
        leaf(&mut new, top_b, "z", "3");

        let diff = old.diff(None, &new);
        assert!(!diff.is_empty());

        let merged_top =
            diff.tree.find_child(diff.tree.root(), "top", None).unwrap();
        let x = diff.tree.find_child(merged_top, "x", None).unwrap();
        let y = diff.tree.find_child(merged_top, "y", None).unwrap();
        let z = diff.tree.find_child(merged_top, "z", None).unwrap();
        assert!(diff.marks.get(x).contains(MarkFlags::CHANGE));
        assert!(diff.marks.get(y).contains(MarkFlags::DEL));
        assert!(diff.marks.get(z).contains(MarkFlags::ADD));
    }

    #[test]
    fn diff_empty_for_equal_trees() {
        let mut a = DataTree::new();
        let top = a.add_child(a.root(), "top", None);
        leaf(&mut a, top, "x", "1");
        let b = a.duplicate();

        assert!(a.diff(None, &b).is_empty());
    }
}
