//
// Copyright (c) The Keel Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use keel_daemon::config::Config;
use keel_daemon::northbound::Northbound;
use keel_daemon::northbound::session::PushMsg;
use keel_nacm::NacmMode;
use keel_northbound::PluginRegistry;
use keel_utils::SessionId;

const MODULE: &str = r#"
module ex {
  namespace "urn:example:ex";
  prefix ex;

  container top {
    leaf x {
      type uint8;
    }
  }

  list if {
    key "name";
    leaf name {
      type string;
    }
  }

  leaf ref {
    type leafref {
      path "/ex:if/ex:name";
    }
  }

  container private {
    leaf secret {
      type string;
    }
  }
}
"#;

static DIR_SEQ: AtomicUsize = AtomicUsize::new(0);

fn test_config() -> Config {
    let base = PathBuf::from(std::env::temp_dir()).join(format!(
        "keel-engine-test-{}-{}",
        std::process::id(),
        DIR_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    let yang_dir = base.join("yang");
    std::fs::create_dir_all(&yang_dir).unwrap();
    std::fs::write(yang_dir.join("ex.yang"), MODULE).unwrap();

    Config {
        yang_dirs: vec![yang_dir],
        xmldb_dir: base.join("db"),
        sock_path: base.join("keel.sock"),
        nacm_mode: NacmMode::Internal,
        nacm_recovery_user: Some("root".to_owned()),
        ..Config::default()
    }
}

fn engine() -> Northbound {
    let (nb, _provider_tx) =
        Northbound::init(test_config(), PluginRegistry::new()).unwrap();
    nb
}

fn rpc(
    nb: &mut Northbound,
    session: SessionId,
    user: &str,
    body: &str,
) -> String {
    let request = format!(
        r#"<rpc message-id="1" username="{}">{}</rpc>"#,
        user, body
    );
    nb.process_request(session, &request).0
}

fn edit_candidate(
    nb: &mut Northbound,
    session: SessionId,
    user: &str,
    config: &str,
) -> String {
    rpc(
        nb,
        session,
        user,
        &format!(
            "<edit-config><target><candidate/></target>\
             <config>{}</config></edit-config>",
            config
        ),
    )
}

fn assert_ok(reply: &str) {
    assert!(reply.contains("<ok/>"), "expected <ok/>, got: {}", reply);
}

#[tokio::test]
async fn edit_and_commit() {
    let mut nb = engine();
    let (session, _push) = nb.open_local_session();

    // Candidate starts empty.
    let reply = rpc(
        &mut nb,
        session,
        "root",
        r#"<get-config><source><candidate/></source></get-config>"#,
    );
    assert!(reply.contains("<data/>"), "got: {}", reply);

    assert_ok(&edit_candidate(
        &mut nb,
        session,
        "root",
        r#"<top xmlns="urn:example:ex"><x>0</x></top>"#,
    ));
    assert_ok(&rpc(&mut nb, session, "root", "<commit/>"));

    let reply = rpc(
        &mut nb,
        session,
        "root",
        r#"<get-config><source><running/></source>
           <filter type="xpath" select="/ex:top/ex:x"/></get-config>"#,
    );
    assert!(reply.contains("<x>0</x>"), "got: {}", reply);
}

#[tokio::test]
async fn dangling_leafref_fails_commit() {
    let mut nb = engine();
    let (session, _push) = nb.open_local_session();

    assert_ok(&edit_candidate(
        &mut nb,
        session,
        "root",
        r#"<ref xmlns="urn:example:ex">eth0</ref>"#,
    ));
    let reply = rpc(&mut nb, session, "root", "<commit/>");
    assert!(
        reply.contains("<error-tag>data-missing</error-tag>"),
        "got: {}",
        reply
    );

    // Running is unchanged.
    let reply = rpc(
        &mut nb,
        session,
        "root",
        r#"<get-config><source><running/></source></get-config>"#,
    );
    assert!(!reply.contains("<ref>"), "got: {}", reply);

    // Adding the interface makes the same commit valid.
    assert_ok(&edit_candidate(
        &mut nb,
        session,
        "root",
        r#"<if xmlns="urn:example:ex"><name>eth0</name></if>"#,
    ));
    assert_ok(&rpc(&mut nb, session, "root", "<commit/>"));
}

const NACM_RULES: &str = r#"
<nacm xmlns="urn:ietf:params:xml:ns:yang:ietf-netconf-acm">
  <groups>
    <group><name>guest</name><user-name>fred</user-name></group>
    <group><name>limited</name><user-name>joe</user-name></group>
  </groups>
  <rule-list>
    <name>guest-acl</name>
    <group>guest</group>
    <rule>
      <name>deny-writes</name>
      <module-name>*</module-name>
      <access-operations>create update delete</access-operations>
      <action>deny</action>
    </rule>
  </rule-list>
  <rule-list>
    <name>limited-acl</name>
    <group>limited</group>
    <rule>
      <name>hide-private</name>
      <module-name>ex</module-name>
      <path>/ex:private</path>
      <access-operations>read</access-operations>
      <action>deny</action>
    </rule>
  </rule-list>
</nacm>
"#;

#[tokio::test]
async fn nacm_denies_write() {
    let mut nb = engine();
    let (session, _push) = nb.open_local_session();

    // Install the access rules as the recovery user.
    assert_ok(&edit_candidate(&mut nb, session, "root", NACM_RULES));
    assert_ok(&rpc(&mut nb, session, "root", "<commit/>"));

    // A guest write is refused with an application-level access-denied.
    let reply = edit_candidate(
        &mut nb,
        session,
        "fred",
        r#"<top xmlns="urn:example:ex"><x>1</x></top>"#,
    );
    assert!(reply.contains("<error-tag>access-denied</error-tag>"));
    assert!(reply.contains("<error-type>application</error-type>"));
    assert!(reply.contains("<error-severity>error</error-severity>"));
    assert!(reply.contains("<error-message>access denied</error-message>"));
}

#[tokio::test]
async fn nacm_filters_reads_silently() {
    let mut nb = engine();
    let (session, _push) = nb.open_local_session();

    assert_ok(&edit_candidate(&mut nb, session, "root", NACM_RULES));
    assert_ok(&edit_candidate(
        &mut nb,
        session,
        "root",
        r#"<top xmlns="urn:example:ex"><x>5</x></top>
           <private xmlns="urn:example:ex"><secret>hunter2</secret></private>"#,
    ));
    assert_ok(&rpc(&mut nb, session, "root", "<commit/>"));

    // joe sees the tree minus the denied subtree, with no error anywhere.
    let reply = rpc(
        &mut nb,
        session,
        "joe",
        r#"<get-config><source><running/></source></get-config>"#,
    );
    assert!(reply.contains("<x>5</x>"), "got: {}", reply);
    assert!(!reply.contains("secret"), "got: {}", reply);
    assert!(!reply.contains("rpc-error"), "got: {}", reply);
}

#[tokio::test]
async fn lock_contention_reports_holder() {
    let mut nb = engine();
    let (session_a, _push_a) = nb.open_local_session();
    let (session_b, _push_b) = nb.open_local_session();

    assert_ok(&rpc(
        &mut nb,
        session_a,
        "root",
        "<lock><target><running/></target></lock>",
    ));
    let reply = rpc(
        &mut nb,
        session_b,
        "root",
        "<lock><target><running/></target></lock>",
    );
    assert!(reply.contains("<error-tag>lock-denied</error-tag>"));
    assert!(
        reply.contains(&format!("<session-id>{}</session-id>", session_a))
    );

    // A commit by the non-holder is also refused.
    let reply = rpc(&mut nb, session_b, "root", "<commit/>");
    assert!(reply.contains("<error-tag>lock-denied</error-tag>"));
}

#[tokio::test]
async fn kill_session_releases_locks() {
    let mut nb = engine();
    let (session_a, _push_a) = nb.open_local_session();
    let (session_b, _push_b) = nb.open_local_session();

    assert_ok(&rpc(
        &mut nb,
        session_a,
        "root",
        "<lock><target><running/></target></lock>",
    ));
    assert_ok(&rpc(
        &mut nb,
        session_b,
        "root",
        &format!(
            "<kill-session><session-id>{}</session-id></kill-session>",
            session_a
        ),
    ));
    assert_ok(&rpc(
        &mut nb,
        session_b,
        "root",
        "<lock><target><running/></target></lock>",
    ));
}

#[tokio::test]
async fn discard_changes_restores_candidate() {
    let mut nb = engine();
    let (session, _push) = nb.open_local_session();

    assert_ok(&edit_candidate(
        &mut nb,
        session,
        "root",
        r#"<top xmlns="urn:example:ex"><x>9</x></top>"#,
    ));
    assert_ok(&rpc(&mut nb, session, "root", "<discard-changes/>"));

    let reply = rpc(
        &mut nb,
        session,
        "root",
        r#"<get-config><source><candidate/></source></get-config>"#,
    );
    assert!(!reply.contains("<x>9</x>"), "got: {}", reply);
}

#[tokio::test]
async fn tmp_is_scratch_only() {
    let mut nb = engine();
    let (session, _push) = nb.open_local_session();

    assert_ok(&rpc(
        &mut nb,
        session,
        "root",
        r#"<edit-config><target><tmp/></target>
           <config><top xmlns="urn:example:ex"><x>3</x></top></config>
           </edit-config>"#,
    ));
    let reply = rpc(
        &mut nb,
        session,
        "root",
        "<validate><source><tmp/></source></validate>",
    );
    assert!(
        reply.contains("<error-tag>operation-not-supported</error-tag>"),
        "got: {}",
        reply
    );
}

#[tokio::test]
async fn subscription_receives_config_change() {
    let mut nb = engine();
    let (subscriber, mut push) = nb.open_local_session();
    let (editor, _push) = nb.open_local_session();

    assert_ok(&rpc(
        &mut nb,
        subscriber,
        "root",
        "<create-subscription \
           xmlns=\"urn:ietf:params:xml:ns:netconf:notification:1.0\"/>",
    ));

    assert_ok(&edit_candidate(
        &mut nb,
        editor,
        "root",
        r#"<top xmlns="urn:example:ex"><x>1</x></top>"#,
    ));
    assert_ok(&rpc(&mut nb, editor, "root", "<commit/>"));

    // The subscription task forwards the event asynchronously.
    let frame = tokio::time::timeout(Duration::from_secs(5), push.recv())
        .await
        .expect("timed out waiting for notification")
        .expect("push channel closed");
    match frame {
        PushMsg::Frame(frame) => {
            assert!(frame.contains("<notification"), "got: {}", frame);
            assert!(frame.contains("netconf-config-change"), "got: {}", frame);
            assert!(
                frame.contains(&format!(
                    "<session-id>{}</session-id>",
                    editor
                )),
                "got: {}",
                frame
            );
        }
        PushMsg::Close => panic!("unexpected close"),
    }
}
