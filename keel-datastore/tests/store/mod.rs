//
// Copyright (c) The Keel Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock as Lazy};

use keel_datastore::edit::{DefaultOperation, ErrorOption, TestOption};
use keel_datastore::{DbName, EditState, Error, Store};
use keel_utils::netconf::ErrorTag;
use keel_yang::xpath::NsMap;
use keel_yang::{Context, DataTree, xml};

const MODULE: &str = r#"
module example {
  namespace "urn:example:test";
  prefix ex;

  container top {
    leaf x {
      type uint8;
    }
    list server {
      key "name";
      leaf name {
        type string;
      }
      leaf port {
        type uint16;
      }
    }
  }
}
"#;

static CTX: Lazy<Arc<Context>> =
    Lazy::new(|| Context::builder().module_text(MODULE).build().unwrap());

static DIR_SEQ: AtomicUsize = AtomicUsize::new(0);

fn test_store() -> Store {
    let dir = PathBuf::from(std::env::temp_dir()).join(format!(
        "keel-store-test-{}-{}",
        std::process::id(),
        DIR_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    Store::connect(&dir, true).unwrap()
}

fn config(xml_text: &str) -> DataTree {
    let mut tree = xml::read(xml_text).unwrap();
    tree.bind(&CTX).unwrap();
    tree
}

fn edit(
    store: &mut Store,
    db: DbName,
    xml_text: &str,
) -> Result<(), Vec<keel_utils::netconf::RpcError>> {
    store.edit_config(
        &CTX,
        db,
        &config(xml_text),
        DefaultOperation::Merge,
        TestOption::TestThenSet,
        ErrorOption::RollbackOnError,
    )
}

#[test]
fn edit_then_read_back() {
    let mut store = test_store();
    edit(
        &mut store,
        DbName::Candidate,
        r#"<top xmlns="urn:example:test"><x>7</x></top>"#,
    )
    .unwrap();
    assert_eq!(store.state(DbName::Candidate), EditState::Dirty);

    let tree = store.get(&CTX, DbName::Candidate).unwrap();
    let top = tree.children(tree.root())[0];
    let x = tree.find_child(top, "x", None).unwrap();
    assert_eq!(tree.node(x).value.as_deref(), Some("7"));
}

#[test]
fn file_backing_survives_cache_drop() {
    let mut store = test_store();
    edit(
        &mut store,
        DbName::Candidate,
        r#"<top xmlns="urn:example:test"><x>9</x></top>"#,
    )
    .unwrap();

    // Drop the in-memory trees; the next read reloads the backing file.
    store.disconnect();
    let tree = store.get(&CTX, DbName::Candidate).unwrap();
    let top = tree.children(tree.root())[0];
    let x = tree.find_child(top, "x", None).unwrap();
    assert_eq!(tree.node(x).value.as_deref(), Some("9"));

    // The file holds a single <config> wrapper.
    let text =
        std::fs::read_to_string(store.file_path(DbName::Candidate)).unwrap();
    assert!(text.starts_with("<config>"));
}

#[test]
fn create_fails_on_existing_data() {
    let mut store = test_store();
    edit(
        &mut store,
        DbName::Candidate,
        r#"<top xmlns="urn:example:test"><x>1</x></top>"#,
    )
    .unwrap();

    let content = config(
        r#"<top xmlns="urn:example:test"
               xmlns:nc="urn:ietf:params:xml:ns:netconf:base:1.0">
             <x nc:operation="create">2</x>
           </top>"#,
    );
    let errors = store
        .edit_config(
            &CTX,
            DbName::Candidate,
            &content,
            DefaultOperation::Merge,
            TestOption::TestThenSet,
            ErrorOption::RollbackOnError,
        )
        .unwrap_err();
    assert_eq!(errors[0].tag, ErrorTag::DataExists);

    // Rollback left the previous content in place.
    let tree = store.get(&CTX, DbName::Candidate).unwrap();
    let top = tree.children(tree.root())[0];
    let x = tree.find_child(top, "x", None).unwrap();
    assert_eq!(tree.node(x).value.as_deref(), Some("1"));
}

#[test]
fn delete_missing_data_fails() {
    let mut store = test_store();
    let content = config(
        r#"<top xmlns="urn:example:test"
               xmlns:nc="urn:ietf:params:xml:ns:netconf:base:1.0">
             <x nc:operation="delete">1</x>
           </top>"#,
    );
    let errors = store
        .edit_config(
            &CTX,
            DbName::Candidate,
            &content,
            DefaultOperation::Merge,
            TestOption::TestThenSet,
            ErrorOption::RollbackOnError,
        )
        .unwrap_err();
    assert_eq!(errors[0].tag, ErrorTag::DataMissing);

    // remove tolerates absence.
    let content = config(
        r#"<top xmlns="urn:example:test"
               xmlns:nc="urn:ietf:params:xml:ns:netconf:base:1.0">
             <x nc:operation="remove">1</x>
           </top>"#,
    );
    store
        .edit_config(
            &CTX,
            DbName::Candidate,
            &content,
            DefaultOperation::Merge,
            TestOption::TestThenSet,
            ErrorOption::RollbackOnError,
        )
        .unwrap();
}

#[test]
fn list_entries_merge_by_key() {
    let mut store = test_store();
    edit(
        &mut store,
        DbName::Candidate,
        r#"<top xmlns="urn:example:test">
             <server><name>a</name><port>80</port></server>
           </top>"#,
    )
    .unwrap();
    edit(
        &mut store,
        DbName::Candidate,
        r#"<top xmlns="urn:example:test">
             <server><name>a</name><port>443</port></server>
             <server><name>b</name><port>22</port></server>
           </top>"#,
    )
    .unwrap();

    let tree = store.get(&CTX, DbName::Candidate).unwrap();
    let top = tree.children(tree.root())[0];
    let servers: Vec<_> = tree.find_children(top, "server", None).collect();
    assert_eq!(servers.len(), 2);
    let a = servers
        .iter()
        .find(|id| tree.list_keys(&CTX, **id) == vec!["a".to_owned()])
        .unwrap();
    let port = tree.find_child(*a, "port", None).unwrap();
    assert_eq!(tree.node(port).value.as_deref(), Some("443"));
}

#[test]
fn invalid_edit_rolls_back() {
    let mut store = test_store();
    // 300 does not fit in uint8.
    let errors = edit(
        &mut store,
        DbName::Candidate,
        r#"<top xmlns="urn:example:test"><x>300</x></top>"#,
    )
    .unwrap_err();
    assert_eq!(errors[0].tag, ErrorTag::InvalidValue);
    assert!(store.get(&CTX, DbName::Candidate).unwrap().is_empty());
}

#[test]
fn lock_contention() {
    let mut store = test_store();
    store.lock(DbName::Running, 1).unwrap();

    // Re-locking by the same holder is fine; another session is denied and
    // learns the holder id.
    store.lock(DbName::Running, 1).unwrap();
    match store.lock(DbName::Running, 2) {
        Err(Error::Locked { holder, .. }) => assert_eq!(holder, 1),
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(store.islocked(DbName::Running), 1);

    // Holder death releases everything it held.
    store.lock(DbName::Candidate, 1).unwrap();
    store.unlock_all(1);
    assert_eq!(store.islocked(DbName::Running), 0);
    assert_eq!(store.islocked(DbName::Candidate), 0);

    // Unlocking an unlocked datastore is a silent no-op.
    store.unlock(DbName::Running);
}

#[test]
fn copy_and_delete() {
    let mut store = test_store();
    edit(
        &mut store,
        DbName::Candidate,
        r#"<top xmlns="urn:example:test"><x>5</x></top>"#,
    )
    .unwrap();

    store.copy(&CTX, DbName::Candidate, DbName::Startup).unwrap();
    assert!(store.exists(DbName::Startup));
    let tree = store.get(&CTX, DbName::Startup).unwrap();
    assert!(!tree.is_empty());

    store.delete(DbName::Startup).unwrap();
    assert!(!store.exists(DbName::Startup));
    assert!(store.get(&CTX, DbName::Startup).unwrap().is_empty());
}

#[test]
fn snapshots_survive_replace() {
    let mut store = test_store();
    edit(
        &mut store,
        DbName::Running,
        r#"<top xmlns="urn:example:test"><x>1</x></top>"#,
    )
    .unwrap();

    // Two readers take snapshots.
    let r1 = store.get(&CTX, DbName::Running).unwrap();
    let r2 = store.get(&CTX, DbName::Running).unwrap();

    // A writer swaps in a new tree.
    let mut new_tree = config(r#"<top xmlns="urn:example:test"><x>2</x></top>"#);
    new_tree.sort_canonical(&CTX);
    store.replace(DbName::Running, Arc::new(new_tree)).unwrap();

    // Old snapshots still observe the pre-commit tree.
    for snapshot in [&r1, &r2] {
        let top = snapshot.children(snapshot.root())[0];
        let x = snapshot.find_child(top, "x", None).unwrap();
        assert_eq!(snapshot.node(x).value.as_deref(), Some("1"));
    }

    // A new reader observes the new tree.
    let r3 = store.get(&CTX, DbName::Running).unwrap();
    let top = r3.children(r3.root())[0];
    let x = r3.find_child(top, "x", None).unwrap();
    assert_eq!(r3.node(x).value.as_deref(), Some("2"));
}

#[test]
fn filtered_get_keeps_ancestors_and_keys() {
    let mut store = test_store();
    edit(
        &mut store,
        DbName::Running,
        r#"<top xmlns="urn:example:test">
             <x>1</x>
             <server><name>a</name><port>80</port></server>
             <server><name>b</name><port>22</port></server>
           </top>"#,
    )
    .unwrap();

    let mut nsmap = NsMap::new();
    nsmap.insert("ex".to_owned(), "urn:example:test".to_owned());
    let result = store
        .get_filtered(
            &CTX,
            DbName::Running,
            Some("/ex:top/ex:server[ex:name='b']/ex:port"),
            &nsmap,
            None,
        )
        .unwrap();

    let top = result.children(result.root())[0];
    let servers: Vec<_> = result.find_children(top, "server", None).collect();
    assert_eq!(servers.len(), 1);
    assert_eq!(result.list_keys(&CTX, servers[0]), vec!["b".to_owned()]);
    let port = result.find_child(servers[0], "port", None).unwrap();
    assert_eq!(result.node(port).value.as_deref(), Some("22"));
    // The x leaf was not selected.
    assert!(result.find_child(top, "x", None).is_none());
}

#[test]
fn tmp_rejected_for_commit() {
    let store = test_store();
    assert!(matches!(
        store.check_commit_source(DbName::Tmp, "commit"),
        Err(Error::OperationNotSupported { .. })
    ));
    store.check_commit_source(DbName::Candidate, "commit").unwrap();
}
