//
// Copyright (c) The Keel Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::{Arc, LazyLock as Lazy};

use keel_nacm::{AccessOp, Nacm, NacmConfig, RuleAction};
use keel_utils::netconf::{ErrorTag, ErrorType};
use keel_utils::user::UserCtx;
use keel_yang::{Context, DataTree, xml};

const MODULE: &str = r#"
module nacm-example {
  namespace "urn:example:nacm";
  prefix nx;

  container x {
    leaf value {
      type string;
    }
    container secrets {
      leaf key {
        type string;
      }
    }
  }
}
"#;

static CTX: Lazy<Arc<Context>> = Lazy::new(|| {
    keel_yang::new_context_builder()
        .module_text(MODULE)
        .build()
        .unwrap()
});

fn data() -> DataTree {
    let mut tree = xml::read(
        r#"<x xmlns="urn:example:nacm">
             <value>public</value>
             <secrets><key>hunter2</key></secrets>
           </x>"#,
    )
    .unwrap();
    tree.bind(&CTX).unwrap();
    tree
}

fn nacm_from(nacm_xml: &str) -> Nacm {
    let tree = xml::read(nacm_xml).unwrap();
    let root = tree.children(tree.root())[0];
    Nacm::new(NacmConfig::from_tree(&tree, root), Some("root".to_owned()))
}

#[test]
fn deny_write_for_guest_group() {
    let mut nacm = nacm_from(
        r#"<nacm>
             <groups>
               <group><name>guest</name><user-name>fred</user-name></group>
             </groups>
             <rule-list>
               <name>guest-acl</name>
               <group>guest</group>
               <rule>
                 <name>deny-all</name>
                 <module-name>*</module-name>
                 <access-operations>*</access-operations>
                 <action>deny</action>
               </rule>
             </rule-list>
           </nacm>"#,
    );
    let tree = data();
    let user = UserCtx::new("fred");
    let x = tree.children(tree.root())[0];

    let error = nacm
        .check_data(&CTX, &user, &tree, x, AccessOp::UPDATE)
        .unwrap_err();
    assert_eq!(error.tag, ErrorTag::AccessDenied);
    assert_eq!(error.error_type, ErrorType::Application);
    assert_eq!(error.message.as_deref(), Some("access denied"));
    assert_eq!(nacm.counters().1, 1);
}

#[test]
fn read_filtering_prunes_silently() {
    let mut nacm = nacm_from(
        r#"<nacm>
             <read-default>permit</read-default>
             <groups>
               <group><name>limited</name><user-name>joe</user-name></group>
             </groups>
             <rule-list>
               <name>limited-acl</name>
               <group>limited</group>
               <rule>
                 <name>hide-secrets</name>
                 <module-name>nacm-example</module-name>
                 <path>/nacm-example:x/nacm-example:secrets</path>
                 <access-operations>read</access-operations>
                 <action>deny</action>
               </rule>
             </rule-list>
           </nacm>"#,
    );
    let tree = data();
    let user = UserCtx::new("joe");

    let filtered = nacm.filter_read(&CTX, &user, &tree);
    let x = filtered.children(filtered.root())[0];
    // The public leaf stays, the denied subtree is gone, no error anywhere.
    assert!(filtered.find_child(x, "value", None).is_some());
    assert!(filtered.find_child(x, "secrets", None).is_none());

    // The rule also covers descendants of the denied node for writes.
    let tree = data();
    let x = tree.children(tree.root())[0];
    let secrets = tree.find_child(x, "secrets", None).unwrap();
    let key = tree.find_child(secrets, "key", None).unwrap();
    assert!(
        nacm.check_data(&CTX, &user, &tree, key, AccessOp::READ)
            .is_err()
    );
}

#[test]
fn first_match_wins() {
    let mut nacm = nacm_from(
        r#"<nacm>
             <groups>
               <group><name>ops</name><user-name>anna</user-name></group>
             </groups>
             <rule-list>
               <name>ops-acl</name>
               <group>ops</group>
               <rule>
                 <name>permit-x</name>
                 <module-name>nacm-example</module-name>
                 <access-operations>update</access-operations>
                 <action>permit</action>
               </rule>
               <rule>
                 <name>deny-everything</name>
                 <module-name>*</module-name>
                 <access-operations>*</access-operations>
                 <action>deny</action>
               </rule>
             </rule-list>
           </nacm>"#,
    );
    let tree = data();
    let user = UserCtx::new("anna");
    let x = tree.children(tree.root())[0];

    // The earlier permit shadows the later deny.
    nacm.check_data(&CTX, &user, &tree, x, AccessOp::UPDATE)
        .unwrap();
    // Operations outside the first rule's bitset fall through to the deny.
    assert!(
        nacm.check_data(&CTX, &user, &tree, x, AccessOp::DELETE)
            .is_err()
    );
}

#[test]
fn rpc_rules_and_safety_net() {
    let mut nacm = nacm_from(
        r#"<nacm>
             <exec-default>deny</exec-default>
             <groups>
               <group><name>ops</name><user-name>anna</user-name></group>
             </groups>
             <rule-list>
               <name>ops-acl</name>
               <group>ops</group>
               <rule>
                 <name>permit-get</name>
                 <rpc-name>get-config</rpc-name>
                 <access-operations>exec</access-operations>
                 <action>permit</action>
               </rule>
             </rule-list>
           </nacm>"#,
    );
    let user = UserCtx::new("anna");

    nacm.check_rpc(&CTX, &user, "ietf-netconf", "get-config")
        .unwrap();
    let error = nacm
        .check_rpc(&CTX, &user, "ietf-netconf", "edit-config")
        .unwrap_err();
    assert_eq!(error.error_type, ErrorType::Protocol);
    assert_eq!(error.tag, ErrorTag::AccessDenied);

    // close-session always goes through.
    nacm.check_rpc(&CTX, &user, "ietf-netconf", "close-session")
        .unwrap();
}

#[test]
fn recovery_user_and_disabled_enforcement() {
    let mut nacm = nacm_from(
        r#"<nacm>
             <rule-list>
               <name>deny-all</name>
               <group>*</group>
               <rule>
                 <name>deny</name>
                 <access-operations>*</access-operations>
                 <action>deny</action>
               </rule>
             </rule-list>
           </nacm>"#,
    );
    let tree = data();
    let x = tree.children(tree.root())[0];

    // Recovery user bypasses every rule.
    let root = UserCtx::new("root");
    nacm.check_data(&CTX, &root, &tree, x, AccessOp::DELETE)
        .unwrap();

    // Disabled enforcement permits everything.
    nacm.config.enable_nacm = false;
    let user = UserCtx::new("nobody");
    nacm.check_data(&CTX, &user, &tree, x, AccessOp::DELETE)
        .unwrap();
}

#[test]
fn defaults_apply_without_matching_rules() {
    let mut nacm = Nacm::new(NacmConfig::default(), None);
    let tree = data();
    let user = UserCtx::new("someone");
    let x = tree.children(tree.root())[0];

    // RFC 8341 defaults: read permit, write deny, exec permit.
    assert_eq!(nacm.config.read_default, RuleAction::Permit);
    let filtered = nacm.filter_read(&CTX, &user, &tree);
    assert!(!filtered.is_empty());
    assert!(
        nacm.check_data(&CTX, &user, &tree, x, AccessOp::CREATE)
            .is_err()
    );
    nacm.check_rpc(&CTX, &user, "ietf-netconf", "get").unwrap();
}

#[test]
fn external_groups_toggle() {
    let mut nacm = nacm_from(
        r#"<nacm>
             <enable-external-groups>false</enable-external-groups>
             <rule-list>
               <name>admin-acl</name>
               <group>admin</group>
               <rule>
                 <name>permit-all</name>
                 <access-operations>*</access-operations>
                 <action>permit</action>
               </rule>
             </rule-list>
           </nacm>"#,
    );
    let tree = data();
    let x = tree.children(tree.root())[0];

    // The transport asserts membership of "admin", but external groups are
    // disabled, so the write falls through to write-default (deny).
    let user = UserCtx::new("eve").with_group("admin");
    assert!(
        nacm.check_data(&CTX, &user, &tree, x, AccessOp::UPDATE)
            .is_err()
    );

    nacm.config.enable_external_groups = true;
    nacm.check_data(&CTX, &user, &tree, x, AccessOp::UPDATE)
        .unwrap();
}
