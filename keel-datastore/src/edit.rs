//
// Copyright (c) The Keel Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! `edit-config` application (RFC 6241 section 7.2).
//!
//! The edit runs against a copy of the target tree; whether the (possibly
//! partial) result is stored back is decided by the test and error options.
//! Per-node operations override the default operation through the
//! `operation` attribute carried on the edit content.

use keel_utils::netconf::{ErrorTag, ErrorType, RpcError};
use keel_yang::{Context, DataTree, NodeId, validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{DbName, EditState, Error, Store};

/// Default operation of an `<edit-config>` (plus the per-node-only
/// operations, accepted for symmetry).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum DefaultOperation {
    #[default]
    Merge,
    Replace,
    Create,
    Delete,
    Remove,
    // Only explicitly marked nodes are touched.
    None,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum TestOption {
    #[default]
    TestThenSet,
    Set,
    TestOnly,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum ErrorOption {
    #[default]
    StopOnError,
    ContinueOnError,
    RollbackOnError,
}

struct EditCtx<'a> {
    ctx: &'a Context,
    error_option: ErrorOption,
    errors: Vec<RpcError>,
}

// ===== impl DefaultOperation =====

impl DefaultOperation {
    pub fn from_str(s: &str) -> Option<DefaultOperation> {
        let op = match s {
            "merge" => DefaultOperation::Merge,
            "replace" => DefaultOperation::Replace,
            "create" => DefaultOperation::Create,
            "delete" => DefaultOperation::Delete,
            "remove" => DefaultOperation::Remove,
            "none" => DefaultOperation::None,
            _ => return None,
        };
        Some(op)
    }
}

impl TestOption {
    pub fn from_str(s: &str) -> Option<TestOption> {
        let option = match s {
            "test-then-set" => TestOption::TestThenSet,
            "set" => TestOption::Set,
            "test-only" => TestOption::TestOnly,
            _ => return None,
        };
        Some(option)
    }
}

impl ErrorOption {
    pub fn from_str(s: &str) -> Option<ErrorOption> {
        let option = match s {
            "stop-on-error" => ErrorOption::StopOnError,
            "continue-on-error" => ErrorOption::ContinueOnError,
            "rollback-on-error" => ErrorOption::RollbackOnError,
            _ => return None,
        };
        Some(option)
    }
}

// ===== impl EditCtx =====

impl EditCtx<'_> {
    // Records an error. Returns true when processing must stop.
    fn fail(&mut self, error: RpcError) -> bool {
        self.errors.push(error);
        !matches!(self.error_option, ErrorOption::ContinueOnError)
    }
}

// ===== impl Store =====

impl Store {
    /// Applies an `<edit-config>` content tree to a datastore.
    ///
    /// On success the datastore moves to the DIRTY state. Errors follow the
    /// error option: the first aborts under `stop-on-error`, all are
    /// collected under `continue-on-error`, and `rollback-on-error` leaves
    /// the datastore untouched. Partial edits under the other options stay
    /// in place (the datastore remains the caller's working copy).
    pub fn edit_config(
        &mut self,
        ctx: &Context,
        db: DbName,
        config: &DataTree,
        default_operation: DefaultOperation,
        test_option: TestOption,
        error_option: ErrorOption,
    ) -> Result<(), Vec<RpcError>> {
        let snapshot = self
            .get(ctx, db)
            .map_err(|error| vec![error.to_rpc_error()])?;
        let mut work = snapshot.duplicate();
        self.set_state(db, EditState::Applying);

        let mut ectx = EditCtx {
            ctx,
            error_option,
            errors: vec![],
        };
        let work_root = work.root();
        apply_children(
            &mut ectx,
            &mut work,
            work_root,
            config,
            config.root(),
            default_operation,
        );

        // test-then-set and test-only run full validation on the result.
        if ectx.errors.is_empty()
            && matches!(
                test_option,
                TestOption::TestThenSet | TestOption::TestOnly
            )
            && let Err(error) = validation::validate(ctx, &work)
        {
            ectx.errors.push(error);
        }

        let store_result = ectx.errors.is_empty()
            || !matches!(error_option, ErrorOption::RollbackOnError);
        if test_option != TestOption::TestOnly && store_result {
            if let Err(error) = self.put(ctx, db, work) {
                self.set_state(db, EditState::Idle);
                return Err(vec![error.to_rpc_error()]);
            }
            self.mark_dirty(db);
        } else {
            // Nothing stored; return to the previous state.
            self.set_state(
                db,
                if self.is_dirty(db) {
                    EditState::Dirty
                } else {
                    EditState::Idle
                },
            );
        }

        if ectx.errors.is_empty() {
            debug!(%db, "edit applied");
            Ok(())
        } else {
            Err(ectx.errors)
        }
    }

    /// Rejects commit/validate against `tmp`, which is private scratch
    /// space and never takes part in a commit.
    pub fn check_commit_source(
        &self,
        db: DbName,
        operation: &'static str,
    ) -> Result<(), Error> {
        match db {
            DbName::Tmp => {
                Err(Error::OperationNotSupported { db, operation })
            }
            _ => Ok(()),
        }
    }
}

// ===== helper functions =====

// Walks the edit content against the target tree. Returns false when
// processing must stop.
fn apply_children(
    ectx: &mut EditCtx<'_>,
    target: &mut DataTree,
    target_parent: NodeId,
    config: &DataTree,
    config_parent: NodeId,
    inherited: DefaultOperation,
) -> bool {
    for src in config.children(config_parent).to_vec() {
        // Per-node override.
        let operation = config
            .attr_get(src, "operation")
            .and_then(DefaultOperation::from_str)
            .unwrap_or(inherited);

        let matched =
            target.match_child(Some(ectx.ctx), target_parent, config, src);

        match operation {
            DefaultOperation::Merge => match matched {
                Some(existing) => {
                    target.node_mut(existing).value =
                        config.node(src).value.clone();
                    if !apply_children(
                        ectx, target, existing, config, src, operation,
                    ) {
                        return false;
                    }
                }
                None => {
                    copy_edit_content(target, target_parent, config, src);
                }
            },
            DefaultOperation::Replace => {
                if let Some(existing) = matched {
                    target.unlink(existing);
                }
                copy_edit_content(target, target_parent, config, src);
            }
            DefaultOperation::Create => match matched {
                Some(existing) => {
                    let error = RpcError::new(
                        ErrorType::Application,
                        ErrorTag::DataExists,
                    )
                    .with_path(target.path(ectx.ctx, existing))
                    .with_message("data already exists");
                    if ectx.fail(error) {
                        return false;
                    }
                }
                None => {
                    copy_edit_content(target, target_parent, config, src);
                }
            },
            DefaultOperation::Delete => match matched {
                Some(existing) => target.unlink(existing),
                None => {
                    let error = RpcError::new(
                        ErrorType::Application,
                        ErrorTag::DataMissing,
                    )
                    .with_path(config.path(ectx.ctx, src))
                    .with_message("data is missing");
                    if ectx.fail(error) {
                        return false;
                    }
                }
            },
            DefaultOperation::Remove => {
                if let Some(existing) = matched {
                    target.unlink(existing);
                }
            }
            DefaultOperation::None => match matched {
                // Pure navigation: recurse without touching the node.
                Some(existing) => {
                    if !apply_children(
                        ectx, target, existing, config, src, operation,
                    ) {
                        return false;
                    }
                }
                None => {
                    // Descending through a non-existent branch is only an
                    // error if some descendant carries a real operation.
                    if subtree_has_operation(config, src) {
                        let error = RpcError::new(
                            ErrorType::Application,
                            ErrorTag::DataMissing,
                        )
                        .with_path(config.path(ectx.ctx, src))
                        .with_message("data is missing");
                        if ectx.fail(error) {
                            return false;
                        }
                    }
                }
            },
        }
    }
    true
}

// Deep copy of edit content, minus the operation attributes (they belong to
// the protocol, not the configuration).
fn copy_edit_content(
    target: &mut DataTree,
    parent: NodeId,
    config: &DataTree,
    src: NodeId,
) {
    let copied = target.copy_from(parent, config, src);
    for id in target.descendants(copied) {
        target.node_mut(id).attrs.retain(|(name, _)| name != "operation");
    }
}

fn subtree_has_operation(config: &DataTree, from: NodeId) -> bool {
    config
        .descendants(from)
        .into_iter()
        .skip(1)
        .any(|id| config.attr_get(id, "operation").is_some())
}
