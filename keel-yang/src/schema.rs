//
// Copyright (c) The Keel Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! Resolved YANG schema graph.
//!
//! Modules are parsed into statement trees, then cross-resolved once at
//! startup: imports, grouping expansion, augments, typedef chains, identity
//! derivation and leafref targets. The resulting [`Context`] is immutable and
//! freely shared.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use bitflags::bitflags;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Error;
use crate::parser::{self, Statement};
use crate::types::{BaseType, Pattern, TypeSpec};

/// Index of a module inside a [`Context`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct ModuleId(pub u32);

/// Index of a schema node inside a [`Context`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct SnodeId(pub u32);

/// Index of an identity inside a [`Context`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct IdentityId(pub u32);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SchemaKind {
    Container,
    List,
    Leaf,
    LeafList,
    Choice,
    Case,
    AnyData,
    Rpc,
    Input,
    Output,
    Notification,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct SchemaFlags: u8 {
        const CONFIG = 0x01;
        const MANDATORY = 0x02;
        const DEPRECATED = 0x04;
        const PRESENCE = 0x08;
        const KEY = 0x10;
        const ORDERED_BY_SYSTEM = 0x20;
    }
}

#[derive(Clone, Debug)]
pub struct Must {
    pub expr: String,
    pub error_message: Option<String>,
}

/// One node of the resolved schema graph.
#[derive(Clone, Debug)]
pub struct SchemaNode {
    pub kind: SchemaKind,
    pub name: String,
    // Module supplying the node's namespace (the augmenting module for
    // augment-added nodes, the using module for grouping-expanded nodes).
    pub module: ModuleId,
    // Module whose prefix scope resolves XPath expressions on this node.
    pub scope_module: ModuleId,
    pub parent: Option<SnodeId>,
    pub children: Vec<SnodeId>,
    pub flags: SchemaFlags,
    pub typ: Option<TypeSpec>,
    pub default: Option<String>,
    pub units: Option<String>,
    pub keys: Vec<String>,
    pub min_elements: Option<u32>,
    pub max_elements: Option<u32>,
    pub when: Option<String>,
    pub musts: Vec<Must>,
    // Stable data path ("/mod:name/child"), the key used for access-control
    // rule matching and callback dispatch.
    pub data_path: String,
}

#[derive(Clone, Debug)]
pub struct Module {
    pub name: String,
    pub namespace: String,
    pub prefix: String,
    pub revision: Option<String>,
    // prefix -> imported module.
    pub imports: Vec<(String, ModuleId)>,
    pub features: Vec<String>,
    // Top-level schema nodes, including RPCs and notifications.
    pub top: Vec<SnodeId>,
}

#[derive(Clone, Debug)]
pub struct Identity {
    pub name: String,
    pub module: ModuleId,
    pub bases: Vec<IdentityId>,
}

#[derive(Clone, Debug)]
pub struct Augment {
    pub module: ModuleId,
    pub target_path: String,
    pub target: SnodeId,
    pub added: Vec<SnodeId>,
}

/// Immutable, resolved schema graph shared by the whole engine.
#[derive(Debug, Default)]
pub struct Context {
    modules: Vec<Module>,
    snodes: Vec<SchemaNode>,
    identities: Vec<Identity>,
    augments: Vec<Augment>,
    enabled_features: BTreeSet<String>,
}

/// Collects module sources and enabled features, then runs the resolution
/// pipeline.
#[derive(Debug, Default)]
pub struct ContextBuilder {
    texts: Vec<String>,
    features: BTreeSet<String>,
}

// State shared by the resolution passes.
struct Resolver<'a> {
    ctx: Context,
    // module name -> parsed statement tree (submodules already folded in).
    stmts: HashMap<String, &'a Statement>,
    // module name -> typedef name -> statement.
    typedefs: HashMap<String, HashMap<String, &'a Statement>>,
    // module name -> grouping name -> statement.
    groupings: HashMap<String, HashMap<String, &'a Statement>>,
    // Deferred module-level augments: (module, statement).
    augments: Vec<(ModuleId, &'a Statement)>,
    // Deferred leafref resolutions.
    leafrefs: Vec<SnodeId>,
    // Schema paths pruned by a disabled feature; augments pointing under one
    // of these are skipped instead of failing.
    pruned: HashSet<String>,
}

// ===== impl ContextBuilder =====

impl ContextBuilder {
    pub fn new() -> ContextBuilder {
        ContextBuilder::default()
    }

    /// Adds a module or submodule source.
    #[must_use]
    pub fn module_text(mut self, text: impl Into<String>) -> ContextBuilder {
        self.texts.push(text.into());
        self
    }

    /// Loads all `*.yang` files from a directory.
    pub fn load_dir(
        mut self,
        dir: &std::path::Path,
    ) -> std::io::Result<ContextBuilder> {
        let mut paths = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "yang"))
            .collect::<Vec<_>>();
        paths.sort();
        for path in paths {
            self.texts.push(std::fs::read_to_string(path)?);
        }
        Ok(self)
    }

    /// Enables a feature, identified as "module:feature".
    #[must_use]
    pub fn enable_feature(
        mut self,
        module: &str,
        feature: &str,
    ) -> ContextBuilder {
        self.features.insert(format!("{}:{}", module, feature));
        self
    }

    /// Runs the resolution pipeline and returns the immutable context.
    pub fn build(self) -> Result<Arc<Context>, Error> {
        // Pass 1: parse every source and hash modules by name.
        let parsed = self
            .texts
            .iter()
            .map(|text| parser::parse_module(text))
            .collect::<Result<Vec<_>, _>>()?;

        let mut modules = HashMap::new();
        let mut submodules = HashMap::new();
        for stmt in &parsed {
            let name = stmt.arg().to_owned();
            if stmt.keyword == "module" {
                modules.insert(name, stmt.clone());
            } else {
                submodules.insert(name, stmt);
            }
        }

        // Pass 2a: fold included submodules into their parent module.
        let mut folded = Vec::new();
        for (name, stmt) in modules {
            let mut stmt = stmt;
            let includes = stmt
                .children_named("include")
                .map(|inc| inc.arg().to_owned())
                .collect::<Vec<_>>();
            for include in includes {
                let sub = submodules
                    .get(include.as_str())
                    .ok_or_else(|| Error::ModuleNotFound(include.clone()))?;
                let belongs = sub
                    .child("belongs-to")
                    .map(|stmt| stmt.arg().to_owned())
                    .unwrap_or_default();
                if belongs != name {
                    return Err(Error::SubmoduleMismatch {
                        submodule: include.clone(),
                        module: name.clone(),
                    });
                }
                stmt.children.extend(
                    sub.children
                        .iter()
                        .filter(|child| {
                            !matches!(
                                child.keyword.as_str(),
                                "belongs-to" | "yang-version" | "revision"
                            )
                        })
                        .cloned(),
                );
            }
            folded.push((name, stmt));
        }
        folded.sort_by(|(a, _), (b, _)| a.cmp(b));

        let stmts: HashMap<String, &Statement> = folded
            .iter()
            .map(|(name, stmt)| (name.clone(), stmt))
            .collect();

        // Pass 2b: detect circular imports.
        detect_import_cycles(&stmts)?;

        let mut resolver = Resolver {
            ctx: Context {
                enabled_features: self.features,
                ..Default::default()
            },
            stmts,
            typedefs: HashMap::new(),
            groupings: HashMap::new(),
            augments: Vec::new(),
            leafrefs: Vec::new(),
            pruned: HashSet::new(),
        };
        resolver.run()?;

        for module in &resolver.ctx.modules {
            debug!(name = %module.name, revision = ?module.revision,
                "YANG module loaded");
        }
        Ok(Arc::new(resolver.ctx))
    }
}

// ===== impl Resolver =====

impl<'a> Resolver<'a> {
    fn run(&mut self) -> Result<(), Error> {
        // Register module headers so imports can be cross-resolved.
        let mut names = self.stmts.keys().cloned().collect::<Vec<_>>();
        names.sort();
        for name in &names {
            let stmt = self.stmts[name.as_str()];
            let module = Module {
                name: name.clone(),
                namespace: stmt
                    .child_arg("namespace")
                    .unwrap_or_default()
                    .to_owned(),
                prefix: stmt.child_arg("prefix").unwrap_or_default().to_owned(),
                revision: latest_revision(stmt),
                imports: vec![],
                features: stmt
                    .children_named("feature")
                    .map(|feat| feat.arg().to_owned())
                    .collect(),
                top: vec![],
            };
            self.ctx.modules.push(module);
        }

        // Resolve import prefixes.
        for name in &names {
            let stmt = self.stmts[name.as_str()];
            let module_id = self.ctx.find_module_by_name(name).unwrap();
            let mut imports = vec![];
            for import in stmt.children_named("import") {
                let imported = self
                    .ctx
                    .find_module_by_name(import.arg())
                    .ok_or_else(|| {
                        Error::ModuleNotFound(import.arg().to_owned())
                    })?;
                let prefix = import
                    .child_arg("prefix")
                    .unwrap_or_default()
                    .to_owned();
                imports.push((prefix, imported));
            }
            self.ctx.modules[module_id.0 as usize].imports = imports;
        }

        // Index typedefs and groupings (any nesting depth) per module.
        for name in &names {
            let stmt = self.stmts[name.as_str()];
            let mut typedefs = HashMap::new();
            let mut groupings = HashMap::new();
            index_definitions(stmt, &mut typedefs, &mut groupings);
            self.typedefs.insert(name.clone(), typedefs);
            self.groupings.insert(name.clone(), groupings);
        }

        // Register identities, then resolve their derivation bases.
        for name in &names {
            let stmt = self.stmts[name.as_str()];
            let module_id = self.ctx.find_module_by_name(name).unwrap();
            for identity in stmt.children_named("identity") {
                if !self.feature_ok(identity, module_id) {
                    continue;
                }
                self.ctx.identities.push(Identity {
                    name: identity.arg().to_owned(),
                    module: module_id,
                    bases: vec![],
                });
            }
        }
        for id in 0..self.ctx.identities.len() {
            let module_id = self.ctx.identities[id].module;
            let name = self.ctx.identities[id].name.clone();
            let stmt = self.stmts[self.ctx.module(module_id).name.as_str()]
                .children_named("identity")
                .find(|stmt| stmt.arg() == name)
                .unwrap();
            let mut bases = vec![];
            for base in stmt.children_named("base") {
                let base_id = self
                    .ctx
                    .find_identity(module_id, base.arg())
                    .ok_or_else(|| Error::UnresolvedIdentity {
                        module: self.ctx.module(module_id).name.clone(),
                        name: base.arg().to_owned(),
                    })?;
                bases.push(base_id);
            }
            self.ctx.identities[id].bases = bases;
        }

        // Build the schema tree of every module, expanding groupings and
        // resolving typedef chains along the way. Module-level augments are
        // collected for the next pass.
        for name in &names {
            let stmt = self.stmts[name.as_str()];
            let module_id = self.ctx.find_module_by_name(name).unwrap();
            for child in &stmt.children {
                if child.keyword == "uses" {
                    let added =
                        self.expand_uses(child, None, module_id, module_id)?;
                    self.ctx.modules[module_id.0 as usize].top.extend(added);
                } else if is_data_def(&child.keyword)
                    || matches!(
                        child.keyword.as_str(),
                        "rpc" | "notification"
                    )
                {
                    if let Some(snode) =
                        self.build_snode(child, None, module_id, module_id)?
                    {
                        self.ctx.modules[module_id.0 as usize].top.push(snode);
                    }
                } else if child.keyword == "augment" {
                    self.augments.push((module_id, child));
                }
            }
        }

        // Apply module-level augments.
        let augments = std::mem::take(&mut self.augments);
        for (module_id, stmt) in augments {
            self.apply_augment(module_id, stmt)?;
        }

        // Compute stable data paths.
        let top = self
            .ctx
            .modules
            .iter()
            .flat_map(|module| module.top.clone())
            .collect::<Vec<_>>();
        for snode in top {
            self.assign_data_paths(snode, "");
        }

        // Resolve leafref targets.
        let leafrefs = std::mem::take(&mut self.leafrefs);
        for snode in leafrefs {
            self.resolve_leafref(snode)?;
        }

        Ok(())
    }

    fn feature_ok(&self, stmt: &Statement, module: ModuleId) -> bool {
        stmt.children_named("if-feature").all(|feat| {
            self.ctx.feature_enabled_in(module, feat.arg())
        })
    }

    // Builds one schema node (and its subtree). Returns None when the node is
    // pruned by a disabled feature.
    fn build_snode(
        &mut self,
        stmt: &Statement,
        parent: Option<SnodeId>,
        ns_module: ModuleId,
        scope_module: ModuleId,
    ) -> Result<Option<SnodeId>, Error> {
        if !self.feature_ok(stmt, scope_module) {
            self.pruned.insert(format!(
                "{}:{}",
                self.ctx.module(ns_module).name,
                stmt.arg()
            ));
            return Ok(None);
        }

        let kind = match stmt.keyword.as_str() {
            "container" => SchemaKind::Container,
            "list" => SchemaKind::List,
            "leaf" => SchemaKind::Leaf,
            "leaf-list" => SchemaKind::LeafList,
            "choice" => SchemaKind::Choice,
            "case" => SchemaKind::Case,
            "anydata" | "anyxml" => SchemaKind::AnyData,
            "rpc" | "action" => SchemaKind::Rpc,
            "input" => SchemaKind::Input,
            "output" => SchemaKind::Output,
            "notification" => SchemaKind::Notification,
            "uses" => {
                // Expanded nodes attach to the parent directly.
                self.expand_uses(stmt, parent, ns_module, scope_module)?;
                return Ok(None);
            }
            // description, reference, status, config, etc. are handled by the
            // enclosing node; unknown extension statements are ignored.
            _ => return Ok(None),
        };

        let mut flags = SchemaFlags::empty();
        // config is inherited; "config false" cuts the state subtree off.
        let config = match stmt.child_arg("config") {
            Some("false") => false,
            Some(_) => true,
            None => {
                parent.is_none_or(|p| self.ctx.snode(p).is_config())
                    && !matches!(
                        kind,
                        SchemaKind::Rpc
                            | SchemaKind::Input
                            | SchemaKind::Output
                            | SchemaKind::Notification
                    )
            }
        };
        flags.set(SchemaFlags::CONFIG, config);
        flags.set(
            SchemaFlags::MANDATORY,
            stmt.child_arg("mandatory") == Some("true"),
        );
        flags.set(
            SchemaFlags::DEPRECATED,
            matches!(stmt.child_arg("status"), Some("deprecated" | "obsolete")),
        );
        flags.set(
            SchemaFlags::PRESENCE,
            kind == SchemaKind::Container && stmt.child("presence").is_some(),
        );
        flags.set(
            SchemaFlags::ORDERED_BY_SYSTEM,
            kind == SchemaKind::List
                && stmt.child_arg("ordered-by") == Some("system"),
        );

        let typ = match kind {
            SchemaKind::Leaf | SchemaKind::LeafList => {
                let type_stmt = stmt.child("type").ok_or(Error::Parse {
                    line: stmt.line,
                    reason: format!("leaf {} has no type", stmt.arg()),
                })?;
                Some(self.resolve_type(type_stmt, scope_module)?)
            }
            _ => None,
        };

        let snode_id = SnodeId(self.ctx.snodes.len() as u32);
        self.ctx.snodes.push(SchemaNode {
            kind,
            name: stmt.arg().to_owned(),
            module: ns_module,
            scope_module,
            parent,
            children: vec![],
            flags,
            typ,
            default: stmt.child_arg("default").map(str::to_owned),
            units: stmt.child_arg("units").map(str::to_owned),
            keys: stmt
                .child_arg("key")
                .map(|keys| {
                    keys.split_ascii_whitespace().map(str::to_owned).collect()
                })
                .unwrap_or_default(),
            min_elements: stmt
                .child_arg("min-elements")
                .and_then(|arg| arg.parse().ok()),
            max_elements: stmt
                .child_arg("max-elements")
                .and_then(|arg| arg.parse().ok()),
            when: stmt.child_arg("when").map(str::to_owned),
            musts: stmt
                .children_named("must")
                .map(|must| Must {
                    expr: must.arg().to_owned(),
                    error_message: must
                        .child_arg("error-message")
                        .map(str::to_owned),
                })
                .collect(),
            data_path: String::new(),
        });
        if let Some(parent) = parent {
            self.ctx.snodes[parent.0 as usize].children.push(snode_id);
        }

        if self.ctx.snode(snode_id).typ.as_ref().is_some_and(has_leafref) {
            self.leafrefs.push(snode_id);
        }

        // Children. A data node directly under a choice gets an implicit
        // case wrapper (RFC 7950 section 7.9.2).
        for child in &stmt.children {
            if kind == SchemaKind::Choice && is_data_def(&child.keyword) {
                if child.keyword == "case" {
                    self.build_snode(
                        child,
                        Some(snode_id),
                        ns_module,
                        scope_module,
                    )?;
                } else {
                    let case_id = SnodeId(self.ctx.snodes.len() as u32);
                    self.ctx.snodes.push(SchemaNode {
                        kind: SchemaKind::Case,
                        name: child.arg().to_owned(),
                        module: ns_module,
                        scope_module,
                        parent: Some(snode_id),
                        children: vec![],
                        flags: SchemaFlags::CONFIG,
                        typ: None,
                        default: None,
                        units: None,
                        keys: vec![],
                        min_elements: None,
                        max_elements: None,
                        when: None,
                        musts: vec![],
                        data_path: String::new(),
                    });
                    self.ctx.snodes[snode_id.0 as usize]
                        .children
                        .push(case_id);
                    self.build_snode(
                        child,
                        Some(case_id),
                        ns_module,
                        scope_module,
                    )?;
                }
            } else if is_data_def(&child.keyword)
                || matches!(
                    child.keyword.as_str(),
                    "input" | "output" | "action" | "notification"
                )
            {
                self.build_snode(child, Some(snode_id), ns_module, scope_module)?;
            }
        }

        // Mark key leaves.
        if kind == SchemaKind::List {
            let keys = self.ctx.snode(snode_id).keys.clone();
            for key in keys {
                if let Some(child) = self
                    .ctx
                    .snode(snode_id)
                    .children
                    .iter()
                    .copied()
                    .find(|child| self.ctx.snode(*child).name == key)
                {
                    self.ctx.snodes[child.0 as usize]
                        .flags
                        .insert(SchemaFlags::KEY | SchemaFlags::MANDATORY);
                }
            }
        }

        Ok(Some(snode_id))
    }

    // Expands `uses <grouping>` into the current scope, applying refines and
    // uses-augments after expansion. Returns the expanded top nodes.
    fn expand_uses(
        &mut self,
        stmt: &Statement,
        parent: Option<SnodeId>,
        ns_module: ModuleId,
        scope_module: ModuleId,
    ) -> Result<Vec<SnodeId>, Error> {
        if !self.feature_ok(stmt, scope_module) {
            return Ok(vec![]);
        }

        let (def_module, grouping_name) =
            self.split_prefixed(scope_module, stmt.arg())?;
        let def_module_name = self.ctx.module(def_module).name.clone();
        let grouping = self
            .groupings
            .get(def_module_name.as_str())
            .and_then(|map| map.get(grouping_name.as_str()))
            .copied()
            .ok_or_else(|| Error::UnresolvedGrouping {
                module: def_module_name.clone(),
                name: grouping_name.clone(),
            })?;

        // Expand the grouping body. Nodes keep the using module's namespace
        // but resolve types and prefixes in the defining module's scope.
        let mut added = vec![];
        for child in &grouping.children {
            if is_data_def(&child.keyword) {
                if let Some(snode) =
                    self.build_snode(child, parent, ns_module, def_module)?
                {
                    added.push(snode);
                }
            }
        }

        // Refinements.
        for refine in stmt.children_named("refine") {
            if let Some(target) =
                self.find_descendant(parent, scope_module, refine.arg())
            {
                let snode = &mut self.ctx.snodes[target.0 as usize];
                if let Some(default) = refine.child_arg("default") {
                    snode.default = Some(default.to_owned());
                }
                if let Some(mandatory) = refine.child_arg("mandatory") {
                    snode
                        .flags
                        .set(SchemaFlags::MANDATORY, mandatory == "true");
                }
                if let Some(config) = refine.child_arg("config") {
                    snode.flags.set(SchemaFlags::CONFIG, config == "true");
                }
            }
        }

        // Uses-augments (relative to the expansion point).
        for augment in stmt.children_named("augment") {
            if let Some(target) =
                self.find_descendant(parent, scope_module, augment.arg())
            {
                for child in &augment.children {
                    if is_data_def(&child.keyword) {
                        self.build_snode(
                            child,
                            Some(target),
                            ns_module,
                            scope_module,
                        )?;
                    }
                }
            }
        }

        Ok(added)
    }

    fn apply_augment(
        &mut self,
        module_id: ModuleId,
        stmt: &Statement,
    ) -> Result<(), Error> {
        if !self.feature_ok(stmt, module_id) {
            return Ok(());
        }

        let target_path = stmt.arg().to_owned();
        let target = match self.resolve_schema_path(module_id, &target_path)? {
            Some(target) => target,
            None => {
                // Tolerated only when the target subtree was pruned by a
                // disabled feature.
                if self.path_pruned(module_id, &target_path) {
                    return Ok(());
                }
                return Err(Error::UnresolvedAugment {
                    module: self.ctx.module(module_id).name.clone(),
                    target: target_path,
                });
            }
        };

        let mut added = vec![];
        for child in &stmt.children {
            if is_data_def(&child.keyword) {
                if let Some(snode) = self.build_snode(
                    child,
                    Some(target),
                    module_id,
                    module_id,
                )? {
                    added.push(snode);
                }
            }
        }
        self.ctx.augments.push(Augment {
            module: module_id,
            target_path,
            target,
            added,
        });
        Ok(())
    }

    // Resolves "/pfx:node/pfx:node" in the prefix scope of `module`.
    fn resolve_schema_path(
        &self,
        module: ModuleId,
        path: &str,
    ) -> Result<Option<SnodeId>, Error> {
        let mut snode: Option<SnodeId> = None;
        for step in path.trim_start_matches('/').split('/') {
            if step.is_empty() {
                return Err(Error::BadSchemaPath(path.to_owned()));
            }
            let (step_module, name) = self.split_prefixed(module, step)?;
            let ns = self.ctx.module(step_module).namespace.clone();
            match self.ctx.find_child_schema(snode, &name, Some(&ns)) {
                Some(child) => snode = Some(child),
                None => return Ok(None),
            }
        }
        Ok(snode)
    }

    fn path_pruned(&self, module: ModuleId, path: &str) -> bool {
        path.trim_start_matches('/').split('/').any(|step| {
            self.split_prefixed(module, step)
                .ok()
                .map(|(step_module, name)| {
                    format!("{}:{}", self.ctx.module(step_module).name, name)
                })
                .is_some_and(|key| self.pruned.contains(&key))
        })
    }

    // Descendant schema-node lookup used by refine and uses-augment, where
    // the path is relative and prefixes are optional.
    fn find_descendant(
        &self,
        parent: Option<SnodeId>,
        module: ModuleId,
        path: &str,
    ) -> Option<SnodeId> {
        let mut snode = parent;
        for step in path.split('/') {
            let name = step.rsplit(':').next().unwrap_or(step);
            let children: Vec<SnodeId> = match snode {
                Some(snode) => self.ctx.snode(snode).children.clone(),
                None => self.ctx.module(module).top.clone(),
            };
            snode = children
                .into_iter()
                .find(|child| self.ctx.snode(*child).name == name);
            snode?;
        }
        snode
    }

    // Splits "prefix:name", resolving the prefix in the given module's
    // import scope. A missing prefix refers to the module itself.
    fn split_prefixed(
        &self,
        module: ModuleId,
        arg: &str,
    ) -> Result<(ModuleId, String), Error> {
        match arg.split_once(':') {
            Some((prefix, name)) => {
                let entry = self.ctx.module(module);
                if entry.prefix == prefix {
                    return Ok((module, name.to_owned()));
                }
                entry
                    .imports
                    .iter()
                    .find(|(import_prefix, _)| import_prefix == prefix)
                    .map(|(_, imported)| (*imported, name.to_owned()))
                    .ok_or_else(|| Error::UnknownPrefix {
                        module: entry.name.clone(),
                        prefix: prefix.to_owned(),
                    })
            }
            None => Ok((module, arg.to_owned())),
        }
    }

    // Resolves a type statement into a TypeSpec, following typedef chains
    // and merging facets along the way.
    fn resolve_type(
        &self,
        stmt: &Statement,
        module: ModuleId,
    ) -> Result<TypeSpec, Error> {
        self.resolve_type_guarded(stmt, module, &mut HashSet::new())
    }

    fn resolve_type_guarded(
        &self,
        stmt: &Statement,
        module: ModuleId,
        seen: &mut HashSet<(ModuleId, String)>,
    ) -> Result<TypeSpec, Error> {
        let name = stmt.arg();

        let mut spec = match BaseType::from_name(name) {
            Some(base) => {
                let mut spec = TypeSpec {
                    base: Some(base),
                    require_instance: true,
                    ..Default::default()
                };
                if base == BaseType::Decimal64 {
                    spec.fraction_digits = stmt
                        .child_arg("fraction-digits")
                        .and_then(|arg| arg.parse().ok())
                        .unwrap_or(2);
                }
                if base == BaseType::Union {
                    for member in stmt.children_named("type") {
                        spec.union_types.push(self.resolve_type_guarded(
                            member, module, seen,
                        )?);
                    }
                }
                spec
            }
            None => {
                // Typedef reference.
                let (def_module, type_name) =
                    self.split_prefixed(module, name)?;
                if !seen.insert((def_module, type_name.clone())) {
                    return Err(Error::UnresolvedTypedef {
                        module: self.ctx.module(def_module).name.clone(),
                        name: type_name,
                    });
                }
                let def_module_name =
                    self.ctx.module(def_module).name.clone();
                let typedef = self
                    .typedefs
                    .get(def_module_name.as_str())
                    .and_then(|map| map.get(type_name.as_str()))
                    .copied()
                    .ok_or_else(|| Error::UnresolvedTypedef {
                        module: def_module_name.clone(),
                        name: type_name.clone(),
                    })?;
                let inner_type =
                    typedef.child("type").ok_or(Error::Parse {
                        line: typedef.line,
                        reason: format!("typedef {} has no type", type_name),
                    })?;
                let spec =
                    self.resolve_type_guarded(inner_type, def_module, seen)?;
                // Only the active derivation chain counts towards a cycle.
                seen.remove(&(def_module, type_name));
                spec
            }
        };

        // Merge restriction facets of this type statement.
        if let Some(range) = stmt.child_arg("range") {
            spec.ranges = parse_ranges(range, &spec)?;
        }
        if let Some(length) = stmt.child_arg("length") {
            spec.lengths = parse_lengths(length)?;
        }
        for pattern in stmt.children_named("pattern") {
            let source = pattern.arg().to_owned();
            let anchored = format!("^(?:{})$", source);
            let regex = Regex::new(&anchored).map_err(|err| Error::Parse {
                line: pattern.line,
                reason: format!("invalid pattern: {}", err),
            })?;
            spec.patterns.push(Pattern {
                source,
                regex,
                invert: pattern.child_arg("modifier") == Some("invert-match"),
            });
        }
        if spec.base == Some(BaseType::Enumeration)
            && stmt.child("enum").is_some()
        {
            let mut next = 0;
            spec.enums = stmt
                .children_named("enum")
                .map(|en| {
                    let value = en
                        .child_arg("value")
                        .and_then(|arg| arg.parse().ok())
                        .unwrap_or(next);
                    next = value + 1;
                    (en.arg().to_owned(), value)
                })
                .collect();
        }
        if spec.base == Some(BaseType::Bits) && stmt.child("bit").is_some() {
            let mut next = 0;
            spec.bits = stmt
                .children_named("bit")
                .map(|bit| {
                    let position = bit
                        .child_arg("position")
                        .and_then(|arg| arg.parse().ok())
                        .unwrap_or(next);
                    next = position + 1;
                    (bit.arg().to_owned(), position)
                })
                .collect();
        }
        if let Some(path) = stmt.child_arg("path") {
            spec.leafref_path = Some(path.to_owned());
        }
        if let Some(base) = stmt.child_arg("base") {
            let identity = self
                .ctx
                .find_identity(module, base)
                .ok_or_else(|| Error::UnresolvedIdentity {
                    module: self.ctx.module(module).name.clone(),
                    name: base.to_owned(),
                })?;
            spec.identity_base = Some(identity);
        }
        if let Some(require) = stmt.child_arg("require-instance") {
            spec.require_instance = require != "false";
        }

        Ok(spec)
    }

    // Step 7: resolve the leafref path of a leaf to its target schema node,
    // chasing leafref-of-leafref chains and rejecting cycles.
    fn resolve_leafref(&mut self, snode_id: SnodeId) -> Result<(), Error> {
        let mut visited = HashSet::new();
        let mut current = snode_id;

        loop {
            if !visited.insert(current) {
                return Err(Error::CyclicLeafref(
                    self.ctx.snode(snode_id).data_path.clone(),
                ));
            }
            let path = match &self.ctx.snode(current).typ {
                Some(typ) if typ.base == Some(BaseType::Leafref) => {
                    typ.leafref_path.clone().ok_or_else(|| {
                        Error::UnresolvedLeafref {
                            path: self.ctx.snode(current).data_path.clone(),
                            target: String::new(),
                        }
                    })?
                }
                _ => break,
            };
            let target = self
                .leafref_target(current, &path)
                .ok_or_else(|| Error::UnresolvedLeafref {
                    path: self.ctx.snode(current).data_path.clone(),
                    target: path.clone(),
                })?;
            if current == snode_id {
                let typ =
                    self.ctx.snodes[snode_id.0 as usize].typ.as_mut().unwrap();
                typ.leafref_target = Some(target);
            }
            current = target;
        }

        // Cache the target's concrete type for value parsing.
        let target_type = self.ctx.snode(current).typ.clone();
        if current != snode_id
            && let Some(target_type) = target_type
        {
            let typ = self.ctx.snodes[snode_id.0 as usize].typ.as_mut().unwrap();
            typ.leafref_type = Some(Box::new(target_type));
        }
        Ok(())
    }

    // Walks a leafref path through the schema tree. Predicates only restrict
    // instances, never the target schema node, so they are skipped here.
    fn leafref_target(&self, from: SnodeId, path: &str) -> Option<SnodeId> {
        let scope = self.ctx.snode(from).scope_module;
        let absolute = path.starts_with('/');
        let mut snode = if absolute {
            None
        } else {
            self.ctx.data_parent(from)
        };

        for step in path.trim_start_matches('/').split('/') {
            let step = match step.find('[') {
                Some(pos) => &step[..pos],
                None => step,
            };
            if step.is_empty() {
                continue;
            }
            if step == ".." {
                snode = self.ctx.data_parent(snode?);
                continue;
            }
            let (step_module, name) = self.split_prefixed(scope, step).ok()?;
            let ns = self.ctx.module(step_module).namespace.clone();
            snode = self.ctx.find_child_schema(snode, &name, Some(&ns));
            snode?;
        }
        snode
    }

    fn assign_data_paths(&mut self, snode_id: SnodeId, parent_path: &str) {
        let snode = self.ctx.snode(snode_id);
        let path = if matches!(snode.kind, SchemaKind::Choice | SchemaKind::Case)
        {
            // Choice and case are invisible in data paths.
            parent_path.to_owned()
        } else {
            let qualify = match snode.parent.and_then(|p| self.ctx.data_parent_or_self(p))
            {
                Some(parent) => self.ctx.snode(parent).module != snode.module,
                None => true,
            };
            if qualify {
                format!(
                    "{}/{}:{}",
                    parent_path,
                    self.ctx.module(snode.module).name,
                    snode.name
                )
            } else {
                format!("{}/{}", parent_path, snode.name)
            }
        };
        self.ctx.snodes[snode_id.0 as usize].data_path = path.clone();
        for child in self.ctx.snode(snode_id).children.clone() {
            self.assign_data_paths(child, &path);
        }
    }
}

// ===== impl Context =====

impl Context {
    pub fn builder() -> ContextBuilder {
        ContextBuilder::new()
    }

    pub fn snode(&self, id: SnodeId) -> &SchemaNode {
        &self.snodes[id.0 as usize]
    }

    pub fn module(&self, id: ModuleId) -> &Module {
        &self.modules[id.0 as usize]
    }

    pub fn identity(&self, id: IdentityId) -> &Identity {
        &self.identities[id.0 as usize]
    }

    pub fn modules(&self) -> impl Iterator<Item = (ModuleId, &Module)> {
        self.modules
            .iter()
            .enumerate()
            .map(|(id, module)| (ModuleId(id as u32), module))
    }

    /// Iterates over every schema node in the graph.
    pub fn traverse(&self) -> impl Iterator<Item = SnodeId> + '_ {
        (0..self.snodes.len()).map(|id| SnodeId(id as u32))
    }

    pub fn find_module_by_name(&self, name: &str) -> Option<ModuleId> {
        self.modules
            .iter()
            .position(|module| module.name == name)
            .map(|id| ModuleId(id as u32))
    }

    pub fn find_module_by_name_revision(
        &self,
        name: &str,
        revision: &str,
    ) -> Option<ModuleId> {
        self.find_module_by_name(name).filter(|id| {
            self.module(*id).revision.as_deref() == Some(revision)
        })
    }

    pub fn find_module_by_namespace(&self, namespace: &str) -> Option<ModuleId> {
        self.modules
            .iter()
            .position(|module| module.namespace == namespace)
            .map(|id| ModuleId(id as u32))
    }

    pub fn find_module_by_prefix(&self, prefix: &str) -> Option<ModuleId> {
        self.modules
            .iter()
            .position(|module| module.prefix == prefix)
            .map(|id| ModuleId(id as u32))
    }

    /// Finds a child schema node by name (and namespace, when supplied),
    /// looking through choice and case layers. `parent` of `None` searches
    /// the top level of every module.
    pub fn find_child_schema(
        &self,
        parent: Option<SnodeId>,
        name: &str,
        namespace: Option<&str>,
    ) -> Option<SnodeId> {
        let children: Vec<SnodeId> = match parent {
            Some(parent) => self.snode(parent).children.clone(),
            None => self
                .modules
                .iter()
                .flat_map(|module| module.top.clone())
                .collect(),
        };

        for child_id in children {
            let child = self.snode(child_id);
            match child.kind {
                SchemaKind::Choice | SchemaKind::Case => {
                    if let Some(found) =
                        self.find_child_schema(Some(child_id), name, namespace)
                    {
                        return Some(found);
                    }
                }
                _ => {
                    if child.name == name
                        && namespace.is_none_or(|ns| {
                            self.module(child.module).namespace == ns
                        })
                    {
                        return Some(child_id);
                    }
                }
            }
        }
        None
    }

    /// Resolves a data path ("/mod:a/b") produced by
    /// [`SchemaNode::data_path`].
    pub fn find_path(&self, path: &str) -> Option<SnodeId> {
        let mut snode = None;
        let mut module: Option<ModuleId> = None;
        for step in path.trim_start_matches('/').split('/') {
            if step.is_empty() {
                return None;
            }
            let (step_module, name) = match step.split_once(':') {
                Some((module_name, name)) => {
                    (self.find_module_by_name(module_name)?, name)
                }
                None => (module?, step),
            };
            module = Some(step_module);
            let ns = self.module(step_module).namespace.clone();
            snode = self.find_child_schema(snode, name, Some(&ns));
            snode?;
        }
        snode
    }

    /// Nearest ancestor that is a data node (skips choice/case).
    pub fn data_parent(&self, snode: SnodeId) -> Option<SnodeId> {
        let mut parent = self.snode(snode).parent;
        while let Some(p) = parent {
            if !matches!(
                self.snode(p).kind,
                SchemaKind::Choice | SchemaKind::Case
            ) {
                return Some(p);
            }
            parent = self.snode(p).parent;
        }
        None
    }

    fn data_parent_or_self(&self, snode: SnodeId) -> Option<SnodeId> {
        if matches!(
            self.snode(snode).kind,
            SchemaKind::Choice | SchemaKind::Case
        ) {
            self.data_parent(snode)
        } else {
            Some(snode)
        }
    }

    /// Resolved type of a leaf or leaf-list.
    pub fn resolve_type(&self, snode: SnodeId) -> Option<&TypeSpec> {
        self.snode(snode).typ.as_ref()
    }

    /// Target schema node of a leafref-typed leaf.
    pub fn resolve_leafref(&self, snode: SnodeId) -> Option<SnodeId> {
        self.snode(snode)
            .typ
            .as_ref()
            .and_then(|typ| typ.leafref_target)
    }

    pub fn feature_enabled(&self, module: &str, feature: &str) -> bool {
        self.enabled_features
            .contains(&format!("{}:{}", module, feature))
    }

    // Feature check in a module's prefix scope ("pfx:feature" or "feature").
    fn feature_enabled_in(&self, module: ModuleId, arg: &str) -> bool {
        let (module, feature) = match arg.split_once(':') {
            Some((prefix, feature)) => {
                let entry = self.module(module);
                if entry.prefix == prefix {
                    (self.module(module).name.clone(), feature)
                } else {
                    match entry
                        .imports
                        .iter()
                        .find(|(import_prefix, _)| import_prefix == prefix)
                    {
                        Some((_, imported)) => {
                            (self.module(*imported).name.clone(), feature)
                        }
                        None => return false,
                    }
                }
            }
            None => (self.module(module).name.clone(), arg),
        };
        self.feature_enabled(&module, feature)
    }

    /// Checks transitive identity derivation.
    pub fn identity_derived_from(
        &self,
        identity: IdentityId,
        base: IdentityId,
    ) -> bool {
        if identity == base {
            return false;
        }
        let mut queue = vec![identity];
        while let Some(id) = queue.pop() {
            for b in &self.identity(id).bases {
                if *b == base {
                    return true;
                }
                queue.push(*b);
            }
        }
        false
    }

    /// Resolves "prefix:name", "module-name:name" or bare "name" to an
    /// identity, in the scope of `module`.
    pub fn find_identity(
        &self,
        module: ModuleId,
        arg: &str,
    ) -> Option<IdentityId> {
        let (def_module, name) = match arg.split_once(':') {
            Some((prefix, name)) => {
                let entry = self.module(module);
                let def = if entry.prefix == prefix {
                    Some(module)
                } else {
                    entry
                        .imports
                        .iter()
                        .find(|(import_prefix, _)| import_prefix == prefix)
                        .map(|(_, imported)| *imported)
                        .or_else(|| self.find_module_by_name(prefix))
                };
                (def?, name)
            }
            None => (module, arg),
        };
        self.identities
            .iter()
            .position(|identity| {
                identity.module == def_module && identity.name == name
            })
            .map(|id| IdentityId(id as u32))
    }

    /// Augments that were applied to the given target node.
    pub fn augments_applied_to(&self, target: SnodeId) -> Vec<&Augment> {
        self.augments
            .iter()
            .filter(|augment| augment.target == target)
            .collect()
    }

    /// Prefix-to-namespace map of a module's XPath scope, used to evaluate
    /// `when`/`must` expressions and leafref paths.
    pub fn module_nsmap(&self, module: ModuleId) -> BTreeMap<String, String> {
        let entry = self.module(module);
        let mut nsmap = BTreeMap::new();
        nsmap.insert(entry.prefix.clone(), entry.namespace.clone());
        for (prefix, imported) in &entry.imports {
            nsmap.insert(
                prefix.clone(),
                self.module(*imported).namespace.clone(),
            );
        }
        nsmap
    }
}

// ===== impl SchemaNode =====

impl SchemaNode {
    pub fn is_config(&self) -> bool {
        self.flags.contains(SchemaFlags::CONFIG)
    }

    pub fn is_mandatory(&self) -> bool {
        self.flags.contains(SchemaFlags::MANDATORY)
    }

    pub fn is_key(&self) -> bool {
        self.flags.contains(SchemaFlags::KEY)
    }

    pub fn is_list(&self) -> bool {
        self.kind == SchemaKind::List
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, SchemaKind::Leaf | SchemaKind::LeafList)
    }

    /// Whether instances of this node may carry child elements.
    pub fn has_children(&self) -> bool {
        matches!(
            self.kind,
            SchemaKind::Container
                | SchemaKind::List
                | SchemaKind::Rpc
                | SchemaKind::Input
                | SchemaKind::Output
                | SchemaKind::Notification
                | SchemaKind::AnyData
        )
    }
}

// ===== helper functions =====

fn is_data_def(keyword: &str) -> bool {
    matches!(
        keyword,
        "container"
            | "list"
            | "leaf"
            | "leaf-list"
            | "choice"
            | "case"
            | "anydata"
            | "anyxml"
            | "uses"
    )
}

fn latest_revision(stmt: &Statement) -> Option<String> {
    stmt.children_named("revision")
        .map(|revision| revision.arg().to_owned())
        .max()
}

fn index_definitions<'a>(
    stmt: &'a Statement,
    typedefs: &mut HashMap<String, &'a Statement>,
    groupings: &mut HashMap<String, &'a Statement>,
) {
    for child in &stmt.children {
        match child.keyword.as_str() {
            "typedef" => {
                typedefs.insert(child.arg().to_owned(), child);
            }
            "grouping" => {
                groupings.insert(child.arg().to_owned(), child);
            }
            _ => (),
        }
        index_definitions(child, typedefs, groupings);
    }
}

fn detect_import_cycles(
    stmts: &HashMap<String, &Statement>,
) -> Result<(), Error> {
    fn visit(
        name: &str,
        stmts: &HashMap<String, &Statement>,
        visiting: &mut HashSet<String>,
        done: &mut HashSet<String>,
    ) -> Result<(), Error> {
        if done.contains(name) {
            return Ok(());
        }
        if !visiting.insert(name.to_owned()) {
            return Err(Error::CircularImport(name.to_owned()));
        }
        if let Some(stmt) = stmts.get(name) {
            for import in stmt.children_named("import") {
                visit(import.arg(), stmts, visiting, done)?;
            }
        }
        visiting.remove(name);
        done.insert(name.to_owned());
        Ok(())
    }

    let mut done = HashSet::new();
    for name in stmts.keys() {
        visit(name, stmts, &mut HashSet::new(), &mut done)?;
    }
    Ok(())
}

fn has_leafref(typ: &TypeSpec) -> bool {
    typ.base == Some(BaseType::Leafref)
        || typ.union_types.iter().any(has_leafref)
}

// Parses a range argument ("1..20 | 250"). "min" and "max" refer to the
// bounds inherited from the base type (or from the previous restriction).
fn parse_ranges(arg: &str, spec: &TypeSpec) -> Result<Vec<(i128, i128)>, Error> {
    let (inherited_min, inherited_max) = spec
        .ranges
        .iter()
        .fold(None, |acc: Option<(i128, i128)>, (min, max)| match acc {
            Some((amin, amax)) => Some((amin.min(*min), amax.max(*max))),
            None => Some((*min, *max)),
        })
        .or_else(|| spec.base.and_then(|base| base.integer_bounds()))
        .unwrap_or((i64::MIN as i128, i64::MAX as i128));

    let parse_bound = |bound: &str| -> Result<i128, Error> {
        let bound = bound.trim();
        match bound {
            "min" => Ok(inherited_min),
            "max" => Ok(inherited_max),
            _ => {
                if spec.base == Some(BaseType::Decimal64) {
                    crate::types::parse_decimal64(bound, spec.fraction_digits)
                } else {
                    bound
                        .parse::<i128>()
                        .map_err(|_| format!("invalid range bound: {}", bound))
                }
                .map_err(|reason| Error::Parse { line: 0, reason })
            }
        }
    };

    let mut ranges = vec![];
    for part in arg.split('|') {
        let (min, max) = match part.split_once("..") {
            Some((min, max)) => (parse_bound(min)?, parse_bound(max)?),
            None => {
                let value = parse_bound(part)?;
                (value, value)
            }
        };
        ranges.push((min, max));
    }
    Ok(ranges)
}

fn parse_lengths(arg: &str) -> Result<Vec<(u64, u64)>, Error> {
    let parse_bound = |bound: &str| -> Result<u64, Error> {
        let bound = bound.trim();
        match bound {
            "min" => Ok(0),
            "max" => Ok(u64::MAX),
            _ => bound.parse::<u64>().map_err(|_| Error::Parse {
                line: 0,
                reason: format!("invalid length bound: {}", bound),
            }),
        }
    };

    let mut lengths = vec![];
    for part in arg.split('|') {
        let (min, max) = match part.split_once("..") {
            Some((min, max)) => (parse_bound(min)?, parse_bound(max)?),
            None => {
                let value = parse_bound(part)?;
                (value, value)
            }
        };
        lengths.push((min, max));
    }
    Ok(lengths)
}
