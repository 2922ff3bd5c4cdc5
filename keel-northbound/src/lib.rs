//
// Copyright (c) The Keel Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! Northbound interface towards the application plugins.
//!
//! Plugins own the device's actual configurable state. They register a
//! capability record of callbacks at startup; the engine dispatches the
//! transaction phases of every commit to the registered records in order,
//! and unwinds with `abort` in reverse order when a phase fails.

#![warn(rust_2018_idioms)]

mod debug;

pub mod api;
pub mod configuration;
pub mod error;
pub mod notification;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::configuration::{Callbacks, RpcArgs, StateDataArgs, UpgradeArgs};
use crate::debug::Debug;
use crate::error::Error;

//
// Useful type definitions.
//
pub type NbProviderSender = UnboundedSender<api::provider::Notification>;
pub type NbProviderReceiver = UnboundedReceiver<api::provider::Notification>;

/// One registered plugin: a name and its capability record.
pub struct Plugin {
    pub name: String,
    pub callbacks: Callbacks,
}

/// The ordered set of registered plugins. Dispatch is plain iteration in
/// registration order.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Plugin>,
}

// ===== impl Plugin =====

impl Plugin {
    pub fn new(name: impl Into<String>, callbacks: Callbacks) -> Plugin {
        Plugin {
            name: name.into(),
            callbacks,
        }
    }
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Plugin({})", self.name)
    }
}

// ===== impl PluginRegistry =====

impl PluginRegistry {
    pub fn new() -> PluginRegistry {
        PluginRegistry::default()
    }

    pub fn register(&mut self, plugin: Plugin) {
        Debug::PluginRegistered(&plugin.name).log();
        self.plugins.push(plugin);
    }

    pub fn plugins(&self) -> &[Plugin] {
        &self.plugins
    }

    /// Dispatches the start callbacks, in registration order. A failure at
    /// startup is fatal to the engine.
    pub fn start_all(&self) -> Result<(), Error> {
        for plugin in &self.plugins {
            if let Some(cb) = &plugin.callbacks.on_start {
                (cb)().map_err(|message| Error::StartCallback {
                    plugin: plugin.name.clone(),
                    message,
                })?;
            }
        }
        Ok(())
    }

    /// Dispatches the exit callbacks, in reverse registration order.
    pub fn exit_all(&self) {
        for plugin in self.plugins.iter().rev() {
            if let Some(cb) = &plugin.callbacks.on_exit {
                (cb)();
            }
        }
    }

    /// Collects operational state from every plugin and merges it into one
    /// tree.
    pub fn statedata(
        &self,
        args: &StateDataArgs<'_>,
    ) -> keel_yang::DataTree {
        let mut merged = keel_yang::DataTree::new();
        for plugin in &self.plugins {
            if let Some(cb) = &plugin.callbacks.on_statedata {
                Debug::StateDataCallback(&plugin.name).log();
                let state = (cb)(args);
                merged.merge(Some(args.ctx), &state);
            }
        }
        merged
    }

    /// Offers an RPC to the plugins, in registration order. The first
    /// plugin that takes it produces the reply.
    pub fn rpc(
        &self,
        args: &RpcArgs<'_>,
    ) -> Result<Option<keel_yang::DataTree>, Error> {
        for plugin in &self.plugins {
            if let Some(cb) = &plugin.callbacks.on_rpc {
                Debug::RpcCallback(&plugin.name, args.name).log();
                match (cb)(args) {
                    Ok(Some(reply)) => return Ok(Some(reply)),
                    Ok(None) => continue,
                    Err(message) => {
                        return Err(Error::RpcCallback {
                            plugin: plugin.name.clone(),
                            message,
                        });
                    }
                }
            }
        }
        Ok(None)
    }

    /// Offers a datastore subtree that failed schema binding to the
    /// upgrade callbacks.
    pub fn upgrade(&self, args: &mut UpgradeArgs<'_>) -> Result<(), Error> {
        for plugin in &self.plugins {
            if let Some(cb) = &plugin.callbacks.on_upgrade {
                Debug::UpgradeCallback(&plugin.name, args.namespace).log();
                (cb)(args).map_err(|message| Error::UpgradeCallback {
                    plugin: plugin.name.clone(),
                    message,
                })?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> =
            self.plugins.iter().map(|plugin| &plugin.name).collect();
        write!(f, "PluginRegistry({:?})", names)
    }
}
