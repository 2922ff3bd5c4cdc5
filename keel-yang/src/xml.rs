//
// Copyright (c) The Keel Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! XML reader and writer for instance data (RFC 6241 encoding rules).
//!
//! The reader produces a schemaless tree; callers that supply a schema get
//! the references bound before the tree is returned. The writer emits
//! `xmlns` exactly when an element's namespace differs from its parent's
//! default namespace, preserves list entry insertion order, and optionally
//! pretty-prints (off for the wire, on for datastore files).

use std::collections::HashMap;

use crate::data::{DataTree, NodeId};
use crate::error::Error;
use crate::schema::Context;

struct Reader<'a> {
    input: &'a [u8],
    pos: usize,
    line: usize,
}

// ===== impl Reader =====

impl<'a> Reader<'a> {
    fn new(input: &'a str) -> Reader<'a> {
        Reader {
            input: input.as_bytes(),
            pos: 0,
            line: 1,
        }
    }

    fn error(&self, reason: impl Into<String>) -> Error {
        Error::MalformedMessage(format!(
            "line {}: {}",
            self.line,
            reason.into()
        ))
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let ch = self.peek()?;
        self.pos += 1;
        if ch == b'\n' {
            self.line += 1;
        }
        Some(ch)
    }

    fn starts_with(&self, prefix: &str) -> bool {
        self.input[self.pos..].starts_with(prefix.as_bytes())
    }

    fn skip(&mut self, count: usize) {
        for _ in 0..count {
            self.bump();
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|ch| ch.is_ascii_whitespace()) {
            self.bump();
        }
    }

    // Skips processing instructions, doctype and comments between elements.
    fn skip_misc(&mut self) -> Result<(), Error> {
        loop {
            self.skip_ws();
            if self.starts_with("<?") || self.starts_with("<!DOCTYPE") {
                while let Some(ch) = self.bump() {
                    if ch == b'>' {
                        break;
                    }
                }
            } else if self.starts_with("<!--") {
                self.skip(4);
                loop {
                    if self.starts_with("-->") {
                        self.skip(3);
                        break;
                    }
                    if self.bump().is_none() {
                        return Err(self.error("unterminated comment"));
                    }
                }
            } else {
                return Ok(());
            }
        }
    }

    fn read_name(&mut self) -> Result<String, Error> {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if ch.is_ascii_alphanumeric()
                || matches!(ch, b'-' | b'_' | b'.' | b':')
            {
                self.bump();
            } else {
                break;
            }
        }
        if start == self.pos {
            return Err(self.error("expected name"));
        }
        Ok(String::from_utf8_lossy(&self.input[start..self.pos]).into_owned())
    }

    fn read_quoted(&mut self) -> Result<String, Error> {
        let quote = match self.bump() {
            Some(q @ (b'"' | b'\'')) => q,
            _ => return Err(self.error("expected quoted value")),
        };
        let start = self.pos;
        loop {
            match self.peek() {
                Some(ch) if ch == quote => break,
                Some(_) => {
                    self.bump();
                }
                None => return Err(self.error("unterminated attribute value")),
            }
        }
        let raw =
            String::from_utf8_lossy(&self.input[start..self.pos]).into_owned();
        self.bump();
        unescape(&raw).ok_or_else(|| self.error("invalid character reference"))
    }

    // Parses one element into the tree. `scope` maps in-scope prefixes to
    // namespaces; the empty prefix is the default namespace.
    fn read_element(
        &mut self,
        tree: &mut DataTree,
        parent: NodeId,
        scope: &HashMap<String, String>,
    ) -> Result<NodeId, Error> {
        if self.bump() != Some(b'<') {
            return Err(self.error("expected element"));
        }
        let name = self.read_name()?;

        // Attributes, including namespace declarations.
        let mut scope = scope.clone();
        let mut attrs = vec![];
        let mut self_closing = false;
        loop {
            self.skip_ws();
            match self.peek() {
                Some(b'/') => {
                    self.bump();
                    if self.bump() != Some(b'>') {
                        return Err(self.error("expected '>' after '/'"));
                    }
                    self_closing = true;
                    break;
                }
                Some(b'>') => {
                    self.bump();
                    break;
                }
                Some(_) => {
                    let attr_name = self.read_name()?;
                    self.skip_ws();
                    if self.bump() != Some(b'=') {
                        return Err(self.error("expected '=' in attribute"));
                    }
                    self.skip_ws();
                    let value = self.read_quoted()?;
                    if attr_name == "xmlns" {
                        scope.insert(String::new(), value);
                    } else if let Some(prefix) = attr_name.strip_prefix("xmlns:")
                    {
                        scope.insert(prefix.to_owned(), value);
                    } else {
                        // Attribute prefixes are dropped; NETCONF attributes
                        // (e.g. "operation") are matched by local name.
                        let local = attr_name
                            .rsplit(':')
                            .next()
                            .unwrap_or(&attr_name)
                            .to_owned();
                        attrs.push((local, value));
                    }
                }
                None => return Err(self.error("unterminated element")),
            }
        }

        // Resolve the element namespace.
        let (prefix, local) = match name.split_once(':') {
            Some((prefix, local)) => (prefix, local),
            None => ("", name.as_str()),
        };
        let namespace = match scope.get(prefix) {
            Some(ns) => Some(ns.clone()),
            None if prefix.is_empty() => None,
            None => {
                return Err(Error::UnknownNamespace(prefix.to_owned()));
            }
        };

        let id = tree.add_child(parent, local, namespace.as_deref());
        // An element with no default namespace must not inherit one.
        if namespace.is_none() {
            tree.node_mut(id).namespace = None;
        }
        tree.node_mut(id).attrs = attrs;

        if self_closing {
            return Ok(id);
        }

        // Content: child elements and/or text.
        let mut text = Vec::new();
        loop {
            if self.starts_with("</") {
                self.skip(2);
                let close = self.read_name()?;
                if close != name {
                    return Err(self.error(format!(
                        "mismatched closing tag: expected {}, found {}",
                        name, close
                    )));
                }
                self.skip_ws();
                if self.bump() != Some(b'>') {
                    return Err(self.error("expected '>'"));
                }
                break;
            } else if self.starts_with("<!--") {
                self.skip_misc()?;
            } else if self.starts_with("<![CDATA[") {
                self.skip(9);
                let start = self.pos;
                loop {
                    if self.starts_with("]]>") {
                        text.extend_from_slice(&self.input[start..self.pos]);
                        self.skip(3);
                        break;
                    }
                    if self.bump().is_none() {
                        return Err(self.error("unterminated CDATA section"));
                    }
                }
            } else if self.peek() == Some(b'<') {
                self.read_element(tree, id, &scope)?;
            } else {
                match self.bump() {
                    Some(ch) => text.push(ch),
                    None => {
                        return Err(self.error("unterminated element content"));
                    }
                }
            }
        }
        let text = String::from_utf8_lossy(&text);

        // Body text is only meaningful on childless elements; whitespace
        // between child elements is insignificant.
        if tree.children(id).is_empty() {
            let text = unescape(&text)
                .ok_or_else(|| self.error("invalid character reference"))?;
            let text = text.trim();
            // `<x/>` and `<x></x>` are the same empty leaf.
            tree.node_mut(id).value =
                (!text.is_empty()).then(|| text.to_owned());
        } else if !text.trim().is_empty() {
            return Err(Error::BadElement {
                path: format!("/{}", local),
                reason: "mixed element and text content".to_owned(),
            });
        }

        Ok(id)
    }
}

// ===== helper functions =====

fn unescape(text: &str) -> Option<String> {
    if !text.contains('&') {
        return Some(text.to_owned());
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        let end = rest.find(';')?;
        let entity = &rest[1..end];
        match entity {
            "lt" => out.push('<'),
            "gt" => out.push('>'),
            "amp" => out.push('&'),
            "quot" => out.push('"'),
            "apos" => out.push('\''),
            _ => {
                let code = entity.strip_prefix('#')?;
                let value = match code.strip_prefix('x') {
                    Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                    None => code.parse().ok()?,
                };
                out.push(char::from_u32(value)?);
            }
        }
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    Some(out)
}

fn escape(text: &str, attribute: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' if attribute => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

fn write_node(
    tree: &DataTree,
    id: NodeId,
    inherited_ns: Option<&str>,
    pretty: bool,
    depth: usize,
    out: &mut String,
) {
    let node = tree.node(id);
    if pretty {
        out.push_str(&"  ".repeat(depth));
    }
    out.push('<');
    out.push_str(&node.name);
    if node.namespace.as_deref() != inherited_ns
        && let Some(ns) = &node.namespace
    {
        out.push_str(&format!(" xmlns=\"{}\"", escape(ns, true)));
    }
    for (name, value) in &node.attrs {
        out.push_str(&format!(" {}=\"{}\"", name, escape(value, true)));
    }

    let children = tree.children(id);
    if children.is_empty() {
        match node.value.as_deref().filter(|value| !value.is_empty()) {
            Some(value) => {
                out.push('>');
                out.push_str(&escape(value, false));
                out.push_str(&format!("</{}>", node.name));
            }
            None => out.push_str("/>"),
        }
    } else {
        out.push('>');
        if pretty {
            out.push('\n');
        }
        for child in children {
            write_node(
                tree,
                *child,
                node.namespace.as_deref(),
                pretty,
                depth + 1,
                out,
            );
        }
        if pretty {
            out.push_str(&"  ".repeat(depth));
        }
        out.push_str(&format!("</{}>", node.name));
    }
    if pretty {
        out.push('\n');
    }
}

// ===== global functions =====

/// Reads an XML document into a schemaless tree (mode `NONE`).
pub fn read(text: &str) -> Result<DataTree, Error> {
    let mut reader = Reader::new(text);
    let mut tree = DataTree::new();

    reader.skip_misc()?;
    if reader.peek().is_none() {
        return Err(reader.error("empty document"));
    }
    let root = tree.root();
    reader.read_element(&mut tree, root, &HashMap::new())?;
    reader.skip_misc()?;
    if reader.peek().is_some() {
        return Err(reader.error("trailing content after document element"));
    }

    Ok(tree)
}

/// Reads an XML document and binds schema references (mode `BIND`).
pub fn read_bound(ctx: &Context, text: &str) -> Result<DataTree, Error> {
    let mut tree = read(text)?;
    tree.bind(ctx)?;
    Ok(tree)
}

/// Writes a whole tree. The tree's top-level nodes become sibling document
/// elements, so callers normally hold a single top-level wrapper (e.g.
/// `<config>` or `<rpc-reply>`).
pub fn write(tree: &DataTree, pretty: bool) -> String {
    let mut out = String::new();
    for top in tree.children(tree.root()) {
        write_node(tree, *top, None, pretty, 0, &mut out);
    }
    out
}

/// Writes a single subtree.
pub fn write_subtree(tree: &DataTree, id: NodeId, pretty: bool) -> String {
    let mut out = String::new();
    let inherited = tree
        .parent(id)
        .and_then(|parent| tree.node(parent).namespace.clone());
    write_node(tree, id, inherited.as_deref(), pretty, 0, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_nested_namespaces() {
        let tree = read(
            r#"<config xmlns="urn:a"><x>1</x><y xmlns="urn:b"><z>2</z></y></config>"#,
        )
        .unwrap();
        let config = tree.children(tree.root())[0];
        let x = tree.find_child(config, "x", Some("urn:a")).unwrap();
        let y = tree.find_child(config, "y", Some("urn:b")).unwrap();
        let z = tree.find_child(y, "z", Some("urn:b")).unwrap();
        assert_eq!(tree.node(x).value.as_deref(), Some("1"));
        assert_eq!(tree.node(z).value.as_deref(), Some("2"));
    }

    #[test]
    fn read_prefixed_and_entities() {
        let tree = read(
            r#"<a:top xmlns:a="urn:a"><a:name>x &amp; &lt;y&gt;</a:name></a:top>"#,
        )
        .unwrap();
        let top = tree.children(tree.root())[0];
        assert_eq!(tree.node(top).namespace.as_deref(), Some("urn:a"));
        let name = tree.find_child(top, "name", Some("urn:a")).unwrap();
        assert_eq!(tree.node(name).value.as_deref(), Some("x & <y>"));
    }

    #[test]
    fn xmlns_emitted_on_namespace_change_only() {
        let tree = read(
            r#"<config xmlns="urn:a"><x>1</x><y xmlns="urn:b"/></config>"#,
        )
        .unwrap();
        let out = write(&tree, false);
        assert_eq!(
            out,
            r#"<config xmlns="urn:a"><x>1</x><y xmlns="urn:b"/></config>"#
        );
    }

    #[test]
    fn roundtrip_through_writer() {
        let input =
            r#"<top xmlns="urn:a"><if><name>eth0</name><mtu>1500</mtu></if></top>"#;
        let tree = read(input).unwrap();
        assert_eq!(write(&tree, false), input);
        // Pretty output parses back to an equal tree.
        let pretty = write(&tree, true);
        let reparsed = read(&pretty).unwrap();
        let a = tree.children(tree.root())[0];
        let b = reparsed.children(reparsed.root())[0];
        assert!(tree.subtree_eq(a, &reparsed, b));
    }

    #[test]
    fn mismatched_tags_rejected() {
        assert!(matches!(
            read("<a><b></a></b>"),
            Err(Error::MalformedMessage(_))
        ));
    }

    #[test]
    fn operation_attribute_kept() {
        let tree = read(
            r#"<config xmlns="urn:a"><x xmlns:nc="urn:ietf:params:xml:ns:netconf:base:1.0" nc:operation="delete"/></config>"#,
        )
        .unwrap();
        let config = tree.children(tree.root())[0];
        let x = tree.find_child(config, "x", Some("urn:a")).unwrap();
        assert_eq!(tree.attr_get(x, "operation"), Some("delete"));
    }
}
