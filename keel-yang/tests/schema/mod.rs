//
// Copyright (c) The Keel Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::{Arc, LazyLock as Lazy};

use keel_utils::netconf::ErrorTag;
use keel_yang::schema::SchemaFlags;
use keel_yang::xpath::{self, XPathValue};
use keel_yang::{Context, Error, SchemaKind, validation, xml};

const MOD_TYPES: &str = r#"
module example-types {
  namespace "urn:example:types";
  prefix et;

  identity interface-type;

  identity ethernet {
    base interface-type;
  }

  identity loopback {
    base interface-type;
  }

  typedef percent {
    type uint8 {
      range "0..100";
    }
  }

  grouping endpoint {
    leaf address {
      type string;
    }
    leaf port {
      type uint16;
    }
  }
}
"#;

const MOD_NET: &str = r#"
module example-net {
  namespace "urn:example:net";
  prefix net;

  import example-types {
    prefix et;
  }

  feature bonding;

  container interfaces {
    list interface {
      key "name";
      must "not(net:mtu) or net:mtu >= 68";
      leaf name {
        type string {
          length "1..15";
        }
      }
      leaf type {
        type identityref {
          base et:interface-type;
        }
      }
      leaf mtu {
        type uint16 {
          range "68..9216";
        }
        default "1500";
      }
      leaf enabled {
        type boolean;
        default "true";
      }
      leaf load {
        type et:percent;
      }
      container bond {
        if-feature bonding;
        leaf mode {
          type enumeration {
            enum active-backup;
            enum round-robin;
          }
        }
      }
      uses et:endpoint;
    }
  }

  container routing {
    leaf mode {
      type enumeration {
        enum static;
        enum dynamic;
      }
      default "static";
    }
    leaf default-interface {
      type leafref {
        path "/net:interfaces/net:interface/net:name";
      }
    }
    container static-routes {
      when "../net:mode = 'static'";
      list route {
        key "prefix";
        ordered-by system;
        leaf prefix {
          type string;
        }
        leaf next-hop {
          type string;
        }
      }
    }
  }
}
"#;

const MOD_QOS: &str = r#"
module example-qos {
  namespace "urn:example:qos";
  prefix qos;

  import example-net {
    prefix net;
  }

  augment "/net:interfaces/net:interface" {
    leaf priority {
      type uint8 {
        range "0..7";
      }
      default "0";
    }
  }
}
"#;

static CTX: Lazy<Arc<Context>> = Lazy::new(|| {
    Context::builder()
        .module_text(MOD_TYPES)
        .module_text(MOD_NET)
        .module_text(MOD_QOS)
        .build()
        .unwrap()
});

const CONFIG: &str = r#"
<interfaces xmlns="urn:example:net">
  <interface>
    <name>eth0</name>
    <type>example-types:ethernet</type>
    <mtu>1500</mtu>
    <address>192.0.2.1</address>
    <priority xmlns="urn:example:qos">3</priority>
  </interface>
  <interface>
    <name>lo</name>
    <type>example-types:loopback</type>
  </interface>
</interfaces>
"#;

fn wrap(config: &str) -> String {
    // Tests hold a single synthetic wrapper so sibling top-level subtrees
    // parse as one document.
    format!("<data xmlns=\"urn:example:net\">{}</data>", config)
}

fn load(config: &str) -> keel_yang::DataTree {
    let tree = xml::read(&wrap(config)).unwrap();
    let mut out = keel_yang::DataTree::new();
    let wrapper = tree.children(tree.root())[0];
    for child in tree.children(wrapper) {
        out.copy_from(out.root(), &tree, *child);
    }
    out.bind(&CTX).unwrap();
    out
}

// ===== module resolution =====

#[test]
fn module_lookups() {
    assert!(CTX.find_module_by_name("example-net").is_some());
    assert!(CTX.find_module_by_namespace("urn:example:types").is_some());
    assert!(CTX.find_module_by_prefix("qos").is_some());
    assert!(CTX.find_module_by_name("no-such-module").is_none());
}

#[test]
fn schema_paths_and_lookup() {
    let interface = CTX
        .find_path("/example-net:interfaces/interface")
        .unwrap();
    let snode = CTX.snode(interface);
    assert_eq!(snode.kind, SchemaKind::List);
    assert_eq!(snode.keys, vec!["name".to_owned()]);
    assert_eq!(snode.data_path, "/example-net:interfaces/interface");

    // Key leaves are marked and mandatory.
    let name = CTX
        .find_path("/example-net:interfaces/interface/name")
        .unwrap();
    assert!(CTX.snode(name).flags.contains(SchemaFlags::KEY));
    assert!(CTX.snode(name).is_mandatory());
}

#[test]
fn grouping_expanded_into_using_module() {
    // "uses et:endpoint" puts address/port under the interface list with the
    // using module's namespace.
    let address = CTX
        .find_path("/example-net:interfaces/interface/address")
        .unwrap();
    let module = CTX.snode(address).module;
    assert_eq!(CTX.module(module).name, "example-net");
}

#[test]
fn augment_applied_cross_module() {
    let priority = CTX
        .find_path("/example-net:interfaces/interface/example-qos:priority")
        .unwrap();
    assert_eq!(
        CTX.snode(priority).data_path,
        "/example-net:interfaces/interface/example-qos:priority"
    );

    let interface = CTX
        .find_path("/example-net:interfaces/interface")
        .unwrap();
    assert_eq!(CTX.augments_applied_to(interface).len(), 1);
}

#[test]
fn feature_pruning() {
    // "bonding" is not enabled, so the guarded container is absent.
    assert!(
        CTX.find_path("/example-net:interfaces/interface/bond")
            .is_none()
    );

    let ctx = Context::builder()
        .module_text(MOD_TYPES)
        .module_text(MOD_NET)
        .module_text(MOD_QOS)
        .enable_feature("example-net", "bonding")
        .build()
        .unwrap();
    assert!(ctx.feature_enabled("example-net", "bonding"));
    assert!(
        ctx.find_path("/example-net:interfaces/interface/bond")
            .is_some()
    );
}

#[test]
fn typedef_chain_restriction() {
    let load = CTX
        .find_path("/example-net:interfaces/interface/load")
        .unwrap();
    let typ = CTX.resolve_type(load).unwrap();
    let module = CTX.snode(load).module;
    assert!(typ.parse_value(&CTX, module, "100").is_ok());
    assert!(typ.parse_value(&CTX, module, "101").is_err());
}

#[test]
fn identity_derivation() {
    let net = CTX.find_module_by_name("example-net").unwrap();
    let base = CTX.find_identity(net, "et:interface-type").unwrap();
    let ethernet = CTX.find_identity(net, "et:ethernet").unwrap();
    assert!(CTX.identity_derived_from(ethernet, base));
    assert!(!CTX.identity_derived_from(base, ethernet));
}

#[test]
fn leafref_target_resolved() {
    let leafref = CTX
        .find_path("/example-net:routing/default-interface")
        .unwrap();
    let target = CTX.resolve_leafref(leafref).unwrap();
    assert_eq!(
        CTX.snode(target).data_path,
        "/example-net:interfaces/interface/name"
    );
}

#[test]
fn circular_import_fatal() {
    let a = r#"module a { namespace "urn:a"; prefix a; import b { prefix b; } }"#;
    let b = r#"module b { namespace "urn:b"; prefix b; import a { prefix a; } }"#;
    let result = Context::builder().module_text(a).module_text(b).build();
    assert!(matches!(result, Err(Error::CircularImport(_))));
}

#[test]
fn cyclic_leafref_fatal() {
    let module = r#"
    module cyc {
      namespace "urn:cyc";
      prefix cyc;
      leaf a { type leafref { path "/cyc:b"; } }
      leaf b { type leafref { path "/cyc:a"; } }
    }
    "#;
    let result = Context::builder().module_text(module).build();
    assert!(matches!(result, Err(Error::CyclicLeafref(_))));
}

// ===== validation =====

#[test]
fn valid_tree_passes() {
    let tree = load(CONFIG);
    validation::validate(&CTX, &tree).unwrap();
}

#[test]
fn unknown_element_rejected() {
    let tree = xml::read(&wrap("<interfaces><bogus>1</bogus></interfaces>"))
        .unwrap();
    let mut out = keel_yang::DataTree::new();
    let wrapper = tree.children(tree.root())[0];
    for child in tree.children(wrapper) {
        out.copy_from(out.root(), &tree, *child);
    }
    assert!(matches!(out.bind(&CTX), Err(Error::UnknownElement(_))));
}

#[test]
fn missing_key_rejected() {
    let tree = load("<interfaces><interface><mtu>1500</mtu></interface></interfaces>");
    let error = validation::validate(&CTX, &tree).unwrap_err();
    assert_eq!(error.tag, ErrorTag::MissingElement);
}

#[test]
fn duplicate_keys_rejected() {
    let tree = load(
        "<interfaces>\
           <interface><name>eth0</name></interface>\
           <interface><name>eth0</name></interface>\
         </interfaces>",
    );
    let error = validation::validate(&CTX, &tree).unwrap_err();
    assert_eq!(error.tag, ErrorTag::OperationFailed);
}

#[test]
fn bad_leaf_value_rejected() {
    let tree = load(
        "<interfaces><interface><name>eth0</name><mtu>20</mtu></interface></interfaces>",
    );
    let error = validation::validate(&CTX, &tree).unwrap_err();
    assert_eq!(error.tag, ErrorTag::InvalidValue);
    assert!(error.path.unwrap().contains("mtu"));
}

#[test]
fn dangling_leafref_rejected() {
    let tree = load(
        "<interfaces><interface><name>eth0</name></interface></interfaces>\
         <routing><default-interface>eth9</default-interface></routing>",
    );
    let error = validation::validate(&CTX, &tree).unwrap_err();
    assert_eq!(error.tag, ErrorTag::DataMissing);
}

#[test]
fn satisfied_leafref_passes() {
    let tree = load(
        "<interfaces><interface><name>eth0</name></interface></interfaces>\
         <routing><default-interface>eth0</default-interface></routing>",
    );
    validation::validate(&CTX, &tree).unwrap();
}

#[test]
fn when_false_rejected() {
    let tree = load(
        "<routing>\
           <mode>dynamic</mode>\
           <static-routes><route><prefix>10.0.0.0/8</prefix></route></static-routes>\
         </routing>",
    );
    let error = validation::validate(&CTX, &tree).unwrap_err();
    assert_eq!(error.tag, ErrorTag::OperationFailed);
    assert!(error.path.unwrap().contains("static-routes"));
}

#[test]
fn must_failure_reported_with_path() {
    let tree = load(
        "<interfaces><interface><name>eth0</name><mtu>68</mtu></interface></interfaces>",
    );
    validation::validate(&CTX, &tree).unwrap();
}

// ===== xpath =====

#[test]
fn xpath_predicates_and_functions() {
    let tree = load(CONFIG);
    let nsmap = CTX.module_nsmap(CTX.find_module_by_name("example-net").unwrap());

    let value = xpath::eval(
        &tree,
        Some(CTX.as_ref()),
        tree.root(),
        "count(/net:interfaces/net:interface)",
        &nsmap,
    )
    .unwrap();
    assert_eq!(value, XPathValue::Number(2.0));

    let value = xpath::eval(
        &tree,
        Some(CTX.as_ref()),
        tree.root(),
        "/net:interfaces/net:interface[net:name='eth0']/net:mtu",
        &nsmap,
    )
    .unwrap();
    let nodes = value.into_node_set().unwrap();
    assert_eq!(nodes.len(), 1);

    let value = xpath::eval(
        &tree,
        Some(CTX.as_ref()),
        tree.root(),
        "string(/net:interfaces/net:interface[1]/net:name)",
        &nsmap,
    )
    .unwrap();
    assert_eq!(value, XPathValue::String("eth0".to_owned()));

    // derived-from-or-self() on the identityref leaf.
    let value = xpath::eval(
        &tree,
        Some(CTX.as_ref()),
        tree.root(),
        "derived-from-or-self(/net:interfaces/net:interface[net:name='eth0']/net:type, 'example-types:ethernet')",
        &nsmap,
    )
    .unwrap();
    assert_eq!(value, XPathValue::Bool(true));
}

#[test]
fn xpath_unknown_prefix_is_typed_error() {
    let tree = load(CONFIG);
    let nsmap = xpath::NsMap::new();
    let result = xpath::eval(
        &tree,
        Some(CTX.as_ref()),
        tree.root(),
        "/bogus:interfaces",
        &nsmap,
    );
    assert!(matches!(result, Err(Error::XPathUnknownPrefix(_))));
}

#[test]
fn xpath_arithmetic_and_booleans() {
    let tree = load(CONFIG);
    let nsmap = CTX.module_nsmap(CTX.find_module_by_name("example-net").unwrap());

    let value = xpath::eval(
        &tree,
        Some(CTX.as_ref()),
        tree.root(),
        "sum(/net:interfaces/net:interface/net:mtu) + 1",
        &nsmap,
    )
    .unwrap();
    assert_eq!(value, XPathValue::Number(1501.0));

    let value = xpath::eval(
        &tree,
        Some(CTX.as_ref()),
        tree.root(),
        "not(/net:interfaces/net:interface[net:name='missing'])",
        &nsmap,
    )
    .unwrap();
    assert_eq!(value, XPathValue::Bool(true));
}

// ===== encoders =====

#[test]
fn xml_roundtrip_with_schema() {
    let tree = load(CONFIG);
    let encoded = xml::write(&tree, false);
    let reparsed = load(&encoded);
    let a = tree.children(tree.root())[0];
    let b = reparsed.children(reparsed.root())[0];
    assert!(tree.subtree_eq(a, &reparsed, b));
}

#[test]
fn json_roundtrip_with_schema() {
    let tree = load(CONFIG);
    let encoded = keel_yang::json::write(&tree, &CTX, false);
    let reparsed = keel_yang::json::read_bound(&CTX, &encoded).unwrap();
    let a = tree.children(tree.root())[0];
    let b = reparsed.children(reparsed.root())[0];
    assert!(tree.subtree_eq(a, &reparsed, b));
}

#[test]
fn json_wide_integers_quoted() {
    let module = r#"
    module wide {
      namespace "urn:wide";
      prefix w;
      leaf big { type uint64; }
      leaf small { type uint8; }
    }
    "#;
    let ctx = Context::builder().module_text(module).build().unwrap();
    let mut tree =
        xml::read(r#"<big xmlns="urn:wide">18446744073709551615</big>"#)
            .unwrap();
    tree.bind(&ctx).unwrap();
    let json = keel_yang::json::write(&tree, &ctx, false);
    assert!(json.contains("\"18446744073709551615\""));

    let mut tree = xml::read(r#"<small xmlns="urn:wide">7</small>"#).unwrap();
    tree.bind(&ctx).unwrap();
    let json = keel_yang::json::write(&tree, &ctx, false);
    assert!(json.contains(":7"));
}

#[test]
fn canonical_order_keys_first() {
    // mtu deliberately precedes name in the input.
    let mut tree = load(
        "<interfaces><interface><mtu>1500</mtu><name>eth0</name></interface></interfaces>",
    );
    tree.sort_canonical(&CTX);
    let interfaces = tree.children(tree.root())[0];
    let interface = tree.children(interfaces)[0];
    let first = tree.children(interface)[0];
    assert_eq!(tree.node(first).name, "name");
}

#[test]
fn system_ordered_list_sorted_by_key() {
    let mut tree = load(
        "<routing><static-routes>\
           <route><prefix>20.0.0.0/8</prefix></route>\
           <route><prefix>10.0.0.0/8</prefix></route>\
         </static-routes></routing>",
    );
    tree.sort_canonical(&CTX);
    let routing = tree.children(tree.root())[0];
    let static_routes = tree.find_child(routing, "static-routes", None).unwrap();
    let first = tree.children(static_routes)[0];
    assert_eq!(tree.list_keys(&CTX, first), vec!["10.0.0.0/8".to_owned()]);
}
