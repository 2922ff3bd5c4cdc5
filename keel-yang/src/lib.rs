//
// Copyright (c) The Keel Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![warn(rust_2018_idioms)]

pub mod data;
pub mod error;
pub mod json;
pub mod parser;
pub mod schema;
pub mod types;
pub mod validation;
pub mod xml;
pub mod xpath;

use std::collections::HashMap;
use std::sync::LazyLock as Lazy;

use maplit::hashmap;

pub use crate::data::{DataDiff, DataTree, DiffOp, MarkFlags, Marks, NodeId};
pub use crate::error::Error;
pub use crate::schema::{
    Context, ContextBuilder, IdentityId, ModuleId, SchemaKind, SnodeId,
};

// YANG modules the engine always implements, keyed by module name.
//
// Application modules are loaded from the configured directories; these ship
// with the engine because core subsystems depend on them.
pub static YANG_EMBEDDED_MODULES: Lazy<HashMap<&'static str, &'static str>> =
    Lazy::new(|| {
        hashmap! {
            "ietf-netconf-acm" =>
                include_str!("../modules/ietf/ietf-netconf-acm@2018-02-14.yang"),
        }
    });

/// Starts a context builder preloaded with the embedded modules.
pub fn new_context_builder() -> ContextBuilder {
    let mut builder = Context::builder();
    for text in YANG_EMBEDDED_MODULES.values() {
        builder = builder.module_text(*text);
    }
    builder
}
