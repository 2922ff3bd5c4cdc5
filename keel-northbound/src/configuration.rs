//
// Copyright (c) The Keel Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! Commit transaction dispatch.
//!
//! A configuration transaction walks four phases through every plugin in
//! registration order: `begin`, `validate`, `complete`, `commit`. A failure
//! in any phase dispatches `abort` to the plugins already notified, in
//! reverse order, and the transaction fails. After a successful commit the
//! `end` hook runs on every plugin.

use std::sync::Arc;

use keel_yang::{Context, DataDiff, DataTree};
use serde::{Deserialize, Serialize};

use crate::debug::Debug;
use crate::error::Error;
use crate::{Plugin, PluginRegistry};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum TransactionPhase {
    Begin,
    Validate,
    Complete,
    Commit,
    Abort,
    End,
}

/// Arguments handed to every transaction-phase callback.
pub struct TransactionArgs<'a> {
    pub id: u64,
    pub ctx: &'a Context,
    pub old_config: &'a Arc<DataTree>,
    pub new_config: &'a Arc<DataTree>,
    pub diff: &'a DataDiff,
}

pub struct StateDataArgs<'a> {
    pub ctx: &'a Context,
    // Optional path filter the caller is interested in.
    pub path: Option<&'a str>,
}

pub struct RpcArgs<'a> {
    pub ctx: &'a Context,
    // Local name and module namespace of the invoked RPC.
    pub name: &'a str,
    pub namespace: &'a str,
    pub input: &'a DataTree,
}

pub struct UpgradeArgs<'a> {
    pub ctx: &'a Context,
    // Namespace of the subtree that failed schema binding.
    pub namespace: &'a str,
    pub tree: &'a mut DataTree,
}

//
// Callback signatures of the capability record.
//
pub type StartCb = Box<dyn Fn() -> Result<(), String> + Send>;
pub type ExitCb = Box<dyn Fn() + Send>;
pub type TransactionCb =
    Box<dyn Fn(&TransactionArgs<'_>) -> Result<(), String> + Send>;
pub type TransactionHookCb = Box<dyn Fn(&TransactionArgs<'_>) + Send>;
pub type StateDataCb = Box<dyn Fn(&StateDataArgs<'_>) -> DataTree + Send>;
pub type RpcCb =
    Box<dyn Fn(&RpcArgs<'_>) -> Result<Option<DataTree>, String> + Send>;
pub type UpgradeCb =
    Box<dyn Fn(&mut UpgradeArgs<'_>) -> Result<(), String> + Send>;

/// Capability record of one plugin. Every entry is optional; plugins
/// implement only the hooks they care about.
#[derive(Default)]
pub struct Callbacks {
    pub on_start: Option<StartCb>,
    pub on_exit: Option<ExitCb>,
    pub on_begin: Option<TransactionCb>,
    pub on_validate: Option<TransactionCb>,
    pub on_complete: Option<TransactionCb>,
    pub on_commit: Option<TransactionCb>,
    pub on_abort: Option<TransactionHookCb>,
    pub on_end: Option<TransactionHookCb>,
    pub on_statedata: Option<StateDataCb>,
    pub on_rpc: Option<RpcCb>,
    pub on_upgrade: Option<UpgradeCb>,
}

#[derive(Default)]
pub struct CallbacksBuilder {
    callbacks: Callbacks,
}

// ===== impl Callbacks =====

impl Callbacks {
    pub fn builder() -> CallbacksBuilder {
        CallbacksBuilder::default()
    }

    fn phase_cb(&self, phase: TransactionPhase) -> Option<&TransactionCb> {
        match phase {
            TransactionPhase::Begin => self.on_begin.as_ref(),
            TransactionPhase::Validate => self.on_validate.as_ref(),
            TransactionPhase::Complete => self.on_complete.as_ref(),
            TransactionPhase::Commit => self.on_commit.as_ref(),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut hooks = vec![];
        if self.on_start.is_some() {
            hooks.push("start");
        }
        if self.on_begin.is_some() {
            hooks.push("begin");
        }
        if self.on_validate.is_some() {
            hooks.push("validate");
        }
        if self.on_complete.is_some() {
            hooks.push("complete");
        }
        if self.on_commit.is_some() {
            hooks.push("commit");
        }
        if self.on_abort.is_some() {
            hooks.push("abort");
        }
        if self.on_statedata.is_some() {
            hooks.push("statedata");
        }
        if self.on_rpc.is_some() {
            hooks.push("rpc");
        }
        write!(f, "Callbacks({:?})", hooks)
    }
}

// ===== impl CallbacksBuilder =====

impl CallbacksBuilder {
    #[must_use]
    pub fn on_start(mut self, cb: StartCb) -> Self {
        self.callbacks.on_start = Some(cb);
        self
    }

    #[must_use]
    pub fn on_exit(mut self, cb: ExitCb) -> Self {
        self.callbacks.on_exit = Some(cb);
        self
    }

    #[must_use]
    pub fn on_begin(mut self, cb: TransactionCb) -> Self {
        self.callbacks.on_begin = Some(cb);
        self
    }

    #[must_use]
    pub fn on_validate(mut self, cb: TransactionCb) -> Self {
        self.callbacks.on_validate = Some(cb);
        self
    }

    #[must_use]
    pub fn on_complete(mut self, cb: TransactionCb) -> Self {
        self.callbacks.on_complete = Some(cb);
        self
    }

    #[must_use]
    pub fn on_commit(mut self, cb: TransactionCb) -> Self {
        self.callbacks.on_commit = Some(cb);
        self
    }

    #[must_use]
    pub fn on_abort(mut self, cb: TransactionHookCb) -> Self {
        self.callbacks.on_abort = Some(cb);
        self
    }

    #[must_use]
    pub fn on_end(mut self, cb: TransactionHookCb) -> Self {
        self.callbacks.on_end = Some(cb);
        self
    }

    #[must_use]
    pub fn on_statedata(mut self, cb: StateDataCb) -> Self {
        self.callbacks.on_statedata = Some(cb);
        self
    }

    #[must_use]
    pub fn on_rpc(mut self, cb: RpcCb) -> Self {
        self.callbacks.on_rpc = Some(cb);
        self
    }

    #[must_use]
    pub fn on_upgrade(mut self, cb: UpgradeCb) -> Self {
        self.callbacks.on_upgrade = Some(cb);
        self
    }

    #[must_use]
    pub fn build(self) -> Callbacks {
        self.callbacks
    }
}

// ===== impl PluginRegistry =====

impl PluginRegistry {
    /// Runs a full configuration transaction through the plugins.
    ///
    /// Phases run in registration order; the first failure dispatches
    /// `abort` in reverse order to every plugin that saw `begin`, then
    /// surfaces as an error.
    pub fn transaction(
        &self,
        args: &TransactionArgs<'_>,
    ) -> Result<(), Error> {
        let mut notified: Vec<&Plugin> = vec![];

        for phase in [
            TransactionPhase::Begin,
            TransactionPhase::Validate,
            TransactionPhase::Complete,
            TransactionPhase::Commit,
        ] {
            for plugin in self.plugins() {
                if phase == TransactionPhase::Begin {
                    notified.push(plugin);
                }
                let Some(cb) = plugin.callbacks.phase_cb(phase) else {
                    continue;
                };
                Debug::TransactionCallback(&plugin.name, phase, args.id).log();
                if let Err(message) = (cb)(args) {
                    self.abort(args, &notified);
                    return Err(Error::TransactionCallback {
                        plugin: plugin.name.clone(),
                        phase,
                        message,
                    });
                }
            }
        }

        // All plugins committed; let them release transaction state.
        for plugin in self.plugins() {
            if let Some(cb) = &plugin.callbacks.on_end {
                Debug::TransactionCallback(
                    &plugin.name,
                    TransactionPhase::End,
                    args.id,
                )
                .log();
                (cb)(args);
            }
        }
        Ok(())
    }

    // Unwinds a failed transaction in reverse notification order.
    fn abort(&self, args: &TransactionArgs<'_>, notified: &[&Plugin]) {
        for plugin in notified.iter().rev() {
            if let Some(cb) = &plugin.callbacks.on_abort {
                Debug::TransactionCallback(
                    &plugin.name,
                    TransactionPhase::Abort,
                    args.id,
                )
                .log();
                (cb)(args);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn record(
        log: &Arc<Mutex<Vec<String>>>,
        plugin: &str,
        phase: &str,
    ) -> String {
        let entry = format!("{}:{}", plugin, phase);
        log.lock().unwrap().push(entry.clone());
        entry
    }

    fn test_plugin(
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail_validate: bool,
    ) -> Plugin {
        let log_begin = log.clone();
        let log_validate = log.clone();
        let log_commit = log.clone();
        let log_abort = log;
        let callbacks = Callbacks::builder()
            .on_begin(Box::new(move |_| {
                record(&log_begin, name, "begin");
                Ok(())
            }))
            .on_validate(Box::new(move |_| {
                record(&log_validate, name, "validate");
                if fail_validate {
                    Err("validation refused".to_owned())
                } else {
                    Ok(())
                }
            }))
            .on_commit(Box::new(move |_| {
                record(&log_commit, name, "commit");
                Ok(())
            }))
            .on_abort(Box::new(move |_| {
                record(&log_abort, name, "abort");
            }))
            .build();
        Plugin::new(name, callbacks)
    }

    #[test]
    fn phases_in_order_and_reverse_abort() {
        let ctx = Context::builder()
            .module_text(
                r#"module t { namespace "urn:t"; prefix t; leaf x { type string; } }"#,
            )
            .build()
            .unwrap();
        let old = Arc::new(DataTree::new());
        let new = Arc::new(DataTree::new());
        let diff = old.diff(Some(ctx.as_ref()), &new);
        let log = Arc::new(Mutex::new(vec![]));

        // Success path: begin/validate/commit per plugin, in order.
        let mut registry = PluginRegistry::new();
        registry.register(test_plugin("a", log.clone(), false));
        registry.register(test_plugin("b", log.clone(), false));
        let args = TransactionArgs {
            id: 1,
            ctx: &ctx,
            old_config: &old,
            new_config: &new,
            diff: &diff,
        };
        registry.transaction(&args).unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "a:begin", "b:begin", "a:validate", "b:validate", "a:commit",
                "b:commit"
            ]
        );

        // Failure path: b's validate fails, abort runs in reverse order.
        log.lock().unwrap().clear();
        let mut registry = PluginRegistry::new();
        registry.register(test_plugin("a", log.clone(), false));
        registry.register(test_plugin("b", log.clone(), true));
        let error = registry.transaction(&args).unwrap_err();
        assert!(matches!(error, Error::TransactionCallback { .. }));
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "a:begin", "b:begin", "a:validate", "b:validate", "b:abort",
                "a:abort"
            ]
        );
    }
}
