//
// Copyright (c) The Keel Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! Named configuration datastores.
//!
//! Each datastore owns an XML tree backed by a file (`<dir>/<db>_db`) that
//! is rewritten through a write-to-temp plus atomic-rename sequence, so no
//! partial file is ever observable. Reads are served from the in-memory
//! cache when enabled; writers mutate a copy and swap it in, which keeps
//! snapshots held by concurrent readers alive untouched.

#![warn(rust_2018_idioms)]

pub mod edit;
pub mod error;

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use keel_utils::SessionId;
use keel_yang::xpath::{NsMap, XPath};
use keel_yang::{Context, DataTree, NodeId, xml};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use crate::error::Error;

/// The named datastores of the engine.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum DbName {
    Running,
    Candidate,
    Startup,
    Tmp,
}

/// State of the edit cycle of one datastore.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum EditState {
    #[default]
    Idle,
    Applying,
    Dirty,
    Validated,
}

#[derive(Debug, Default)]
struct DbEntry {
    cache: Option<Arc<DataTree>>,
    dirty: bool,
    // Holder session, 0 when unlocked.
    lock: SessionId,
    mtime: Option<DateTime<Utc>>,
    state: EditState,
}

/// The set of datastores, their lock table and their backing files.
#[derive(Debug)]
pub struct Store {
    dir: PathBuf,
    cache_enabled: bool,
    entries: HashMap<DbName, DbEntry>,
}

// ===== impl DbName =====

impl DbName {
    pub const ALL: [DbName; 4] = [
        DbName::Running,
        DbName::Candidate,
        DbName::Startup,
        DbName::Tmp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DbName::Running => "running",
            DbName::Candidate => "candidate",
            DbName::Startup => "startup",
            DbName::Tmp => "tmp",
        }
    }
}

impl std::str::FromStr for DbName {
    type Err = ();

    fn from_str(s: &str) -> Result<DbName, ()> {
        match s {
            "running" => Ok(DbName::Running),
            "candidate" => Ok(DbName::Candidate),
            "startup" => Ok(DbName::Startup),
            "tmp" => Ok(DbName::Tmp),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for DbName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ===== impl Store =====

impl Store {
    /// Connects to the datastore directory, creating it when absent.
    pub fn connect(dir: &Path, cache_enabled: bool) -> Result<Store, Error> {
        fs::create_dir_all(dir)
            .map_err(|error| Error::Io(DbName::Running, error))?;
        let mut entries = HashMap::new();
        for db in DbName::ALL {
            entries.insert(db, DbEntry::default());
        }
        Ok(Store {
            dir: dir.to_owned(),
            cache_enabled,
            entries,
        })
    }

    /// Releases the in-memory trees. Files stay behind.
    pub fn disconnect(&mut self) {
        for entry in self.entries.values_mut() {
            entry.cache = None;
        }
    }

    pub fn file_path(&self, db: DbName) -> PathBuf {
        self.dir.join(format!("{}_db", db))
    }

    pub fn exists(&self, db: DbName) -> bool {
        self.file_path(db).exists()
    }

    /// Creates an empty datastore file.
    pub fn create(&mut self, db: DbName) -> Result<(), Error> {
        if !self.exists(db) {
            self.write_file(db, &DataTree::new())?;
        }
        Ok(())
    }

    /// Deletes a datastore: in-memory tree and backing file.
    pub fn delete(&mut self, db: DbName) -> Result<(), Error> {
        let entry = self.entry_mut(db);
        entry.cache = None;
        entry.dirty = false;
        entry.state = EditState::Idle;
        let path = self.file_path(db);
        if path.exists() {
            fs::remove_file(&path).map_err(|error| Error::Io(db, error))?;
        }
        debug!(%db, "datastore deleted");
        Ok(())
    }

    /// Copies one datastore over another (tree and file).
    pub fn copy(&mut self, ctx: &Context, from: DbName, to: DbName) -> Result<(), Error> {
        let tree = self.get(ctx, from)?;
        self.entry_mut(to).cache = None;
        self.put(ctx, to, tree.duplicate())?;
        self.entry_mut(to).state = EditState::Idle;
        debug!(%from, %to, "datastore copied");
        Ok(())
    }

    // --- lock table ---

    /// Takes the datastore lock for `holder`. Fails with the current
    /// holder's id when somebody else has it.
    pub fn lock(&mut self, db: DbName, holder: SessionId) -> Result<(), Error> {
        let entry = self.entry_mut(db);
        if entry.lock != 0 && entry.lock != holder {
            let error = Error::Locked {
                db,
                holder: entry.lock,
            };
            error.log();
            return Err(error);
        }
        entry.lock = holder;
        debug!(%db, %holder, "datastore locked");
        Ok(())
    }

    /// Releases the lock. Unlocking an unlocked datastore is a no-op.
    pub fn unlock(&mut self, db: DbName) {
        self.entry_mut(db).lock = 0;
    }

    /// Current lock holder, 0 when unlocked.
    pub fn islocked(&self, db: DbName) -> SessionId {
        self.entries.get(&db).map(|entry| entry.lock).unwrap_or(0)
    }

    /// Releases every lock held by a dying session.
    pub fn unlock_all(&mut self, holder: SessionId) {
        for (db, entry) in self.entries.iter_mut() {
            if entry.lock == holder {
                entry.lock = 0;
                debug!(%db, %holder, "lock released on session death");
            }
        }
    }

    /// Rejects writes to a datastore locked by another session.
    pub fn check_writable(
        &self,
        db: DbName,
        session: SessionId,
    ) -> Result<(), Error> {
        let holder = self.islocked(db);
        if holder != 0 && holder != session {
            return Err(Error::Locked { db, holder });
        }
        Ok(())
    }

    // --- trees ---

    /// Snapshot of a datastore tree. Served from cache when enabled; loaded
    /// from the backing file (with schema binding) otherwise.
    pub fn get(&mut self, ctx: &Context, db: DbName) -> Result<Arc<DataTree>, Error> {
        if let Some(cache) = &self.entries[&db].cache {
            return Ok(cache.clone());
        }
        let mut tree = self.load_raw(db)?;
        tree.bind(ctx)
            .map_err(|source| Error::Corrupt { db, source })?;
        let tree = Arc::new(tree);
        if self.cache_enabled {
            self.entry_mut(db).cache = Some(tree.clone());
        }
        Ok(tree)
    }

    /// Loads the backing file without schema binding. A missing file is an
    /// empty datastore.
    pub fn load_raw(&self, db: DbName) -> Result<DataTree, Error> {
        let path = self.file_path(db);
        if !path.exists() {
            return Ok(DataTree::new());
        }
        let text =
            fs::read_to_string(&path).map_err(|error| Error::Io(db, error))?;
        if text.trim().is_empty() {
            return Ok(DataTree::new());
        }
        let wrapped = xml::read(&text).map_err(|source| Error::Corrupt {
            db,
            source,
        })?;

        // The file holds a single <config> element wrapping the tree.
        let mut tree = DataTree::new();
        let config = wrapped.children(wrapped.root())[0];
        for child in wrapped.children(config) {
            tree.copy_from(tree.root(), &wrapped, *child);
        }
        Ok(tree)
    }

    /// Stores a tree: canonical ordering, serialization to the backing file
    /// via atomic rename, cache update.
    pub fn put(
        &mut self,
        ctx: &Context,
        db: DbName,
        mut tree: DataTree,
    ) -> Result<(), Error> {
        tree.sort_canonical(ctx);
        self.write_file(db, &tree)?;
        let cache_enabled = self.cache_enabled;
        let entry = self.entry_mut(db);
        if entry.cache.is_some() || cache_enabled {
            entry.cache = Some(Arc::new(tree));
        }
        Ok(())
    }

    /// Atomically replaces a datastore with an already-shared tree (the
    /// commit swap). Snapshots held by readers keep the previous tree alive
    /// until released.
    pub fn replace(
        &mut self,
        db: DbName,
        tree: Arc<DataTree>,
    ) -> Result<(), Error> {
        self.write_file(db, &tree)?;
        let entry = self.entry_mut(db);
        entry.cache = Some(tree);
        entry.dirty = false;
        entry.state = EditState::Idle;
        Ok(())
    }

    fn write_file(&mut self, db: DbName, tree: &DataTree) -> Result<(), Error> {
        let path = self.file_path(db);
        let tmp_path = self.dir.join(format!("{}_db.tmp", db));

        let mut text = String::from("<config>\n");
        for line in xml::write(tree, true).lines() {
            text.push_str("  ");
            text.push_str(line);
            text.push('\n');
        }
        text.push_str("</config>\n");

        let mut file =
            fs::File::create(&tmp_path).map_err(|error| Error::Io(db, error))?;
        file.write_all(text.as_bytes())
            .map_err(|error| Error::Io(db, error))?;
        file.sync_all().map_err(|error| Error::Io(db, error))?;
        drop(file);
        fs::rename(&tmp_path, &path).map_err(|error| Error::Io(db, error))?;

        let entry = self.entry_mut(db);
        entry.mtime = Some(Utc::now());
        Ok(())
    }

    // --- edit state machine ---

    pub fn state(&self, db: DbName) -> EditState {
        self.entries
            .get(&db)
            .map(|entry| entry.state)
            .unwrap_or_default()
    }

    pub fn set_state(&mut self, db: DbName, state: EditState) {
        self.entry_mut(db).state = state;
    }

    pub fn is_dirty(&self, db: DbName) -> bool {
        self.entries.get(&db).map(|entry| entry.dirty).unwrap_or(false)
    }

    pub fn mtime(&self, db: DbName) -> Option<DateTime<Utc>> {
        self.entries.get(&db).and_then(|entry| entry.mtime)
    }

    pub(crate) fn entry_mut(&mut self, db: DbName) -> &mut DbEntry {
        self.entries.entry(db).or_default()
    }

    pub(crate) fn mark_dirty(&mut self, db: DbName) {
        let entry = self.entry_mut(db);
        entry.dirty = true;
        entry.state = EditState::Dirty;
    }

    // --- filtered reads ---

    /// Returns the subtrees selected by an XPath filter, complete with their
    /// ancestor chains (list ancestors keep their keys). Without a filter,
    /// the whole tree is returned. `depth` bounds how deep below each
    /// selected node the copy goes.
    pub fn get_filtered(
        &mut self,
        ctx: &Context,
        db: DbName,
        filter: Option<&str>,
        nsmap: &NsMap,
        depth: Option<u32>,
    ) -> Result<DataTree, Error> {
        let snapshot = self.get(ctx, db)?;
        filter_tree(ctx, &snapshot, filter, nsmap, depth).map_err(|source| {
            Error::Corrupt { db, source }
        })
    }
}

// ===== global functions =====

/// XPath selection over a snapshot: matched nodes are copied out together
/// with their ancestor chain.
pub fn filter_tree(
    ctx: &Context,
    snapshot: &DataTree,
    filter: Option<&str>,
    nsmap: &NsMap,
    depth: Option<u32>,
) -> Result<DataTree, keel_yang::Error> {
    let Some(filter) = filter else {
        return Ok(snapshot.duplicate());
    };

    let xpath = XPath::compile(filter)?;
    let matches =
        xpath.eval_nodes(snapshot, Some(ctx), snapshot.root(), nsmap)?;

    let mut out = DataTree::new();
    for matched in matches {
        // Recreate the ancestor chain, including list keys so entries stay
        // addressable.
        let mut parent = out.root();
        let mut chain = snapshot.ancestors(matched);
        chain.reverse();
        for ancestor in chain {
            parent = match out.match_child(
                Some(ctx),
                parent,
                snapshot,
                ancestor,
            ) {
                Some(existing) => existing,
                None => {
                    let node = snapshot.node(ancestor);
                    let id = out.add_child(
                        parent,
                        &node.name,
                        node.namespace.as_deref(),
                    );
                    out.node_mut(id).snode = node.snode;
                    // Keys first, so the copied entry is identifiable.
                    if let Some(snode) = node.snode {
                        for key in &ctx.snode(snode).keys {
                            if let Some(key_node) =
                                snapshot.find_child(ancestor, key, None)
                            {
                                out.copy_from(id, snapshot, key_node);
                            }
                        }
                    }
                    id
                }
            };
        }
        if out.match_child(Some(ctx), parent, snapshot, matched).is_none() {
            let copied = out.copy_from(parent, snapshot, matched);
            if let Some(depth) = depth {
                prune_depth(&mut out, copied, depth);
            }
        }
    }
    Ok(out)
}

fn prune_depth(tree: &mut DataTree, from: NodeId, depth: u32) {
    if depth == 0 {
        for child in tree.children(from).to_vec() {
            tree.unlink(child);
        }
        return;
    }
    for child in tree.children(from).to_vec() {
        prune_depth(tree, child, depth - 1);
    }
}
