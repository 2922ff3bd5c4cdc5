//
// Copyright (c) The Keel Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! The engine core: datastores, access control, the validate/commit
//! pipeline and the notification bus, multiplexed on one cooperative event
//! loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use keel_datastore::edit::{DefaultOperation, ErrorOption, TestOption};
use keel_datastore::{DbName, EditState, Store, filter_tree};
use keel_nacm::{AccessOp, Nacm, NacmConfig, NacmMode, global_nsmap};
use keel_northbound::configuration::{
    RpcArgs, StateDataArgs, TransactionArgs, UpgradeArgs,
};
use keel_northbound::{NbProviderReceiver, PluginRegistry, api as papi};
use keel_utils::SessionId;
use keel_utils::netconf::{ErrorTag, ErrorType, RpcError};
use keel_utils::task::{IntervalTask, Task};
use keel_utils::user::UserCtx;
use keel_yang::xpath::XPath;
use keel_yang::{Context, DataTree, validation};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{Config, StartupMode};
use crate::northbound::netconf::{self, Operation, RpcHeader};
use crate::northbound::session::{self, PushMsg, SessionMsg};
use crate::northbound::stream::{Bus, Event};
use crate::northbound::{Error, Result};

pub struct Northbound {
    config: Config,
    // Schema graph, read-only after init and freely shared.
    ctx: Arc<Context>,
    store: Store,
    plugins: PluginRegistry,
    nacm: Nacm,
    // Live front-end sessions.
    sessions: HashMap<SessionId, Session>,
    next_session_id: SessionId,
    next_transaction_id: u64,
    bus: Bus,
    // Channel used to receive messages from the session layer.
    rx_sessions: mpsc::Receiver<SessionMsg>,
    tx_sessions: mpsc::Sender<SessionMsg>,
    // Channel used to receive notifications from the plugins.
    rx_providers: NbProviderReceiver,
    // Periodic replay-buffer purge.
    rx_purge: mpsc::Receiver<()>,
    _purge_task: IntervalTask,
    _listener: Option<Task<()>>,
}

struct Session {
    // Identity asserted by the transport on the latest request.
    user: UserCtx,
    push_tx: mpsc::UnboundedSender<PushMsg>,
    _task: Option<Task<()>>,
}

enum Reply {
    Ok,
    Data(DataTree),
    // Reply with <ok/>, then tear the session down.
    Close,
}

// ===== impl Northbound =====

impl Northbound {
    /// Initializes the engine: schema, datastores, access control and
    /// plugins. Returns the sender plugins use to publish notifications.
    pub fn init(
        config: Config,
        plugins: PluginRegistry,
    ) -> Result<(Northbound, keel_northbound::NbProviderSender)> {
        // Build the schema graph.
        let mut builder = keel_yang::new_context_builder();
        for dir in &config.yang_dirs {
            builder = builder.load_dir(dir).map_err(Error::Io)?;
        }
        if let Some(file) = &config.yang_main_file {
            builder = builder
                .module_text(std::fs::read_to_string(file).map_err(Error::Io)?);
        }
        for (module, feature) in &config.features {
            builder = builder.enable_feature(module, feature);
        }
        let ctx = builder.build().map_err(Error::Yang)?;

        let mut store =
            Store::connect(&config.xmldb_dir, config.xmldb_cache)?;

        // Initialize running per the configured startup mode, then load it
        // with the upgrade-on-load path. A datastore that stays corrupt is
        // fatal: the engine must not accept edits over broken state.
        match config.startup_mode {
            StartupMode::None => {
                store.delete(DbName::Running)?;
            }
            StartupMode::Startup => {
                if store.exists(DbName::Startup) {
                    store.copy(&ctx, DbName::Startup, DbName::Running)?;
                }
            }
            StartupMode::Running => (),
        }
        let running = load_with_upgrade(&ctx, &mut store, &plugins, DbName::Running)?;
        store.put(&ctx, DbName::Running, running)?;

        // The candidate starts as a copy of running.
        store.copy(&ctx, DbName::Running, DbName::Candidate)?;

        // Access control.
        let running = store.get(&ctx, DbName::Running)?;
        let nacm_config = match config.nacm_mode {
            NacmMode::Disabled => NacmConfig {
                enable_nacm: false,
                ..Default::default()
            },
            NacmMode::External => match &config.nacm_file {
                Some(path) => {
                    NacmConfig::from_file(path).map_err(Error::Yang)?
                }
                None => NacmConfig::default(),
            },
            NacmMode::Internal => {
                NacmConfig::from_running(&running).unwrap_or_default()
            }
        };
        let nacm = Nacm::new(nacm_config, config.nacm_recovery_user.clone());

        // Plugins are live from here on.
        plugins.start_all().map_err(Error::Transaction)?;

        let (provider_tx, rx_providers) = mpsc::unbounded_channel();
        let (tx_sessions, rx_sessions) = mpsc::channel(16);
        let (purge_tx, rx_purge) = mpsc::channel(4);
        let purge_task =
            IntervalTask::new(Duration::from_secs(60), false, move || {
                let purge_tx = purge_tx.clone();
                async move {
                    let _ = purge_tx.send(()).await;
                }
            });

        let bus = Bus::new(Duration::from_secs(config.replay_window));
        let nb = Northbound {
            config,
            ctx,
            store,
            plugins,
            nacm,
            sessions: HashMap::new(),
            next_session_id: 1,
            next_transaction_id: 1,
            bus,
            rx_sessions,
            tx_sessions,
            rx_providers,
            rx_purge,
            _purge_task: purge_task,
            _listener: None,
        };
        Ok((nb, provider_tx))
    }

    /// Binds the front-end socket. Separated from `init` so in-process
    /// front-ends (and the tests) can drive the engine without one.
    pub fn listen(&mut self) -> Result<()> {
        let task =
            session::listen(&self.config.sock_path, self.tx_sessions.clone())?;
        self._listener = Some(task);
        Ok(())
    }

    /// Opens a session without a socket, for in-process front-ends. The
    /// returned receiver carries server-push frames (notifications).
    pub fn open_local_session(
        &mut self,
    ) -> (SessionId, mpsc::UnboundedReceiver<PushMsg>) {
        let id = self.next_session_id;
        self.next_session_id += 1;
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        self.sessions.insert(
            id,
            Session {
                user: UserCtx::default(),
                push_tx,
                _task: None,
            },
        );
        (id, push_rx)
    }

    // Main event loop.
    #[instrument(skip_all, name = "northbound")]
    pub async fn run(mut self) {
        info!("engine ready");
        loop {
            tokio::select! {
                msg = self.rx_sessions.recv() => match msg {
                    Some(msg) => self.process_session_msg(msg),
                    None => break,
                },
                msg = self.rx_providers.recv() => match msg {
                    Some(notification) => {
                        self.process_provider_msg(notification);
                    }
                    // All plugins have exited.
                    None => break,
                },
                Some(_) = self.rx_purge.recv() => {
                    self.bus.purge();
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutting down");
                    break;
                }
            }
        }
        self.plugins.exit_all();
    }

    fn process_session_msg(&mut self, msg: SessionMsg) {
        match msg {
            SessionMsg::Connected { stream } => {
                let id = self.next_session_id;
                self.next_session_id += 1;
                let (push_tx, push_rx) = mpsc::unbounded_channel();
                let task = session::start_session(
                    id,
                    stream,
                    self.tx_sessions.clone(),
                    push_rx,
                );
                self.sessions.insert(
                    id,
                    Session {
                        user: UserCtx::default(),
                        push_tx,
                        _task: Some(task),
                    },
                );
                debug!(session = %id, "session established");
            }
            SessionMsg::Request {
                session,
                xml,
                responder,
            } => {
                let (reply, close) = self.process_request(session, &xml);
                let _ = responder.send(reply);
                if close {
                    self.close_session(session);
                }
            }
            SessionMsg::Disconnected { session } => {
                self.close_session(session);
            }
        }
    }

    /// Processes one XML-encoded request. Returns the reply document and
    /// whether the session terminates afterwards.
    pub fn process_request(
        &mut self,
        session: SessionId,
        xml: &str,
    ) -> (String, bool) {
        let (header, operation) = match netconf::parse_rpc(xml) {
            Ok(parsed) => parsed,
            Err(err) => {
                return (
                    netconf::reply_errors(&RpcHeader::default(), &[err]),
                    false,
                );
            }
        };

        // Update the session identity from the transport assertion.
        let user = UserCtx {
            username: header
                .username
                .clone()
                .unwrap_or_else(|| "unknown".to_owned()),
            groups: header.groups.iter().cloned().collect(),
        };
        if let Some(entry) = self.sessions.get_mut(&session) {
            entry.user = user.clone();
        }

        // Access control on the protocol operation itself.
        let rpc_module = match &operation {
            Operation::PluginRpc { namespace, .. } => self
                .ctx
                .find_module_by_namespace(namespace)
                .map(|module| self.ctx.module(module).name.clone())
                .unwrap_or_default(),
            _ => "ietf-netconf".to_owned(),
        };
        if let Err(err) = self.nacm.check_rpc(
            &self.ctx,
            &user,
            &rpc_module,
            operation.rpc_name(),
        ) {
            return (netconf::reply_errors(&header, &[err]), false);
        }

        match self.dispatch(session, &user, operation) {
            Ok(Reply::Ok) => (netconf::reply_ok(&header), false),
            Ok(Reply::Data(data)) => {
                (netconf::reply_data(&header, &data), false)
            }
            Ok(Reply::Close) => (netconf::reply_ok(&header), true),
            Err(errors) => (netconf::reply_errors(&header, &errors), false),
        }
    }

    fn dispatch(
        &mut self,
        session: SessionId,
        user: &UserCtx,
        operation: Operation,
    ) -> std::result::Result<Reply, Vec<RpcError>> {
        match operation {
            Operation::Get { filter } => {
                self.process_get(user, filter.as_deref())
            }
            Operation::GetConfig { source, filter } => {
                self.process_get_config(user, source, filter.as_deref())
            }
            Operation::EditConfig {
                target,
                default_operation,
                test_option,
                error_option,
                config,
            } => self.process_edit_config(
                session,
                user,
                target,
                default_operation,
                test_option,
                error_option,
                config,
            ),
            Operation::CopyConfig { source, target } => {
                self.process_copy_config(session, source, target)
            }
            Operation::DeleteConfig { target } => {
                self.process_delete_config(session, target)
            }
            Operation::Lock { target } => {
                self.store
                    .lock(target, session)
                    .map_err(|err| vec![err.to_rpc_error()])?;
                Ok(Reply::Ok)
            }
            Operation::Unlock { target } => {
                let holder = self.store.islocked(target);
                if holder != 0 && holder != session {
                    return Err(vec![RpcError::lock_denied(holder)]);
                }
                self.store.unlock(target);
                Ok(Reply::Ok)
            }
            Operation::Commit => self.process_commit(session),
            Operation::DiscardChanges => {
                self.store
                    .copy(&self.ctx, DbName::Running, DbName::Candidate)
                    .map_err(|err| vec![err.to_rpc_error()])?;
                self.store.set_state(DbName::Candidate, EditState::Idle);
                Ok(Reply::Ok)
            }
            Operation::Validate { source } => self.process_validate(source),
            Operation::CloseSession => Ok(Reply::Close),
            Operation::KillSession { session_id } => {
                self.process_kill_session(session, session_id)
            }
            Operation::CreateSubscription {
                stream,
                filter,
                start_time,
                stop_time,
            } => self.process_create_subscription(
                session,
                &stream,
                filter.as_deref(),
                start_time,
                stop_time,
            ),
            Operation::PluginRpc {
                name,
                namespace,
                input,
            } => self.process_plugin_rpc(&name, &namespace, input),
        }
    }

    // <get>: running configuration plus plugin statedata, filtered.
    fn process_get(
        &mut self,
        user: &UserCtx,
        filter: Option<&str>,
    ) -> std::result::Result<Reply, Vec<RpcError>> {
        let snapshot = self
            .store
            .get(&self.ctx, DbName::Running)
            .map_err(|err| vec![err.to_rpc_error()])?;
        let mut merged = snapshot.duplicate();
        let state = self.plugins.statedata(&StateDataArgs {
            ctx: &self.ctx,
            path: filter,
        });
        merged.merge(Some(self.ctx.as_ref()), &state);

        let nsmap = global_nsmap(&self.ctx);
        let filtered = filter_tree(&self.ctx, &merged, filter, &nsmap, None)
            .map_err(|err| vec![err.to_rpc_error()])?;

        // Read access control prunes silently, after filtering.
        let visible = self.nacm.filter_read(&self.ctx, user, &filtered);
        Ok(Reply::Data(visible))
    }

    fn process_get_config(
        &mut self,
        user: &UserCtx,
        source: DbName,
        filter: Option<&str>,
    ) -> std::result::Result<Reply, Vec<RpcError>> {
        let nsmap = global_nsmap(&self.ctx);
        let filtered = self
            .store
            .get_filtered(&self.ctx, source, filter, &nsmap, None)
            .map_err(|err| vec![err.to_rpc_error()])?;
        let visible = self.nacm.filter_read(&self.ctx, user, &filtered);
        Ok(Reply::Data(visible))
    }

    #[allow(clippy::too_many_arguments)]
    fn process_edit_config(
        &mut self,
        session: SessionId,
        user: &UserCtx,
        target: DbName,
        default_operation: DefaultOperation,
        test_option: TestOption,
        error_option: ErrorOption,
        mut config: DataTree,
    ) -> std::result::Result<Reply, Vec<RpcError>> {
        // Edits go through candidate (or scratch space); running changes
        // only through commit.
        if target == DbName::Running {
            return Err(vec![
                RpcError::new(
                    ErrorType::Protocol,
                    ErrorTag::OperationNotSupported,
                )
                .with_message("writable-running is not supported"),
            ]);
        }
        self.store
            .check_writable(target, session)
            .map_err(|err| vec![err.to_rpc_error()])?;

        config.bind(&self.ctx).map_err(|err| vec![err.to_rpc_error()])?;

        // Access control on every touched node, before anything is applied.
        self.check_edit_access(user, &config, default_operation)
            .map_err(|err| vec![err])?;

        self.store
            .edit_config(
                &self.ctx,
                target,
                &config,
                default_operation,
                test_option,
                error_option,
            )
            .map_err(|errors| {
                warn!(%target, "edit-config failed");
                errors
            })?;
        Ok(Reply::Ok)
    }

    // NACM write check over the edit content.
    fn check_edit_access(
        &mut self,
        user: &UserCtx,
        config: &DataTree,
        default_operation: DefaultOperation,
    ) -> std::result::Result<(), RpcError> {
        for node in config.descendants(config.root()) {
            if node == config.root() {
                continue;
            }
            let operation = config
                .attr_get(node, "operation")
                .and_then(DefaultOperation::from_str)
                .unwrap_or(default_operation);
            let access = match operation {
                DefaultOperation::Create => AccessOp::CREATE,
                DefaultOperation::Delete | DefaultOperation::Remove => {
                    AccessOp::DELETE
                }
                DefaultOperation::None => continue,
                _ => AccessOp::UPDATE,
            };
            self.nacm.check_data(&self.ctx, user, config, node, access)?;
        }
        Ok(())
    }

    fn process_copy_config(
        &mut self,
        session: SessionId,
        source: DbName,
        target: DbName,
    ) -> std::result::Result<Reply, Vec<RpcError>> {
        if target == DbName::Running {
            return Err(vec![
                RpcError::new(
                    ErrorType::Protocol,
                    ErrorTag::OperationNotSupported,
                )
                .with_message("running is replaced through commit only"),
            ]);
        }
        if source == target {
            return Err(vec![
                RpcError::new(ErrorType::Protocol, ErrorTag::InvalidValue)
                    .with_message("source and target are the same datastore"),
            ]);
        }
        self.store
            .check_writable(target, session)
            .map_err(|err| vec![err.to_rpc_error()])?;
        self.store
            .copy(&self.ctx, source, target)
            .map_err(|err| vec![err.to_rpc_error()])?;
        Ok(Reply::Ok)
    }

    fn process_delete_config(
        &mut self,
        session: SessionId,
        target: DbName,
    ) -> std::result::Result<Reply, Vec<RpcError>> {
        if target == DbName::Running {
            return Err(vec![
                RpcError::new(
                    ErrorType::Protocol,
                    ErrorTag::OperationNotSupported,
                )
                .with_message("running cannot be deleted"),
            ]);
        }
        self.store
            .check_writable(target, session)
            .map_err(|err| vec![err.to_rpc_error()])?;
        self.store
            .delete(target)
            .map_err(|err| vec![err.to_rpc_error()])?;
        Ok(Reply::Ok)
    }

    // The six-stage validate/commit pipeline.
    fn process_commit(
        &mut self,
        session: SessionId,
    ) -> std::result::Result<Reply, Vec<RpcError>> {
        self.store
            .check_commit_source(DbName::Candidate, "commit")
            .map_err(|err| vec![err.to_rpc_error()])?;
        self.store
            .check_writable(DbName::Running, session)
            .map_err(|err| vec![err.to_rpc_error()])?;

        let candidate = self
            .store
            .get(&self.ctx, DbName::Candidate)
            .map_err(|err| vec![err.to_rpc_error()])?;
        let running = self
            .store
            .get(&self.ctx, DbName::Running)
            .map_err(|err| vec![err.to_rpc_error()])?;

        // Stages 1-4: structural, type, reference, when/must.
        if let Err(err) = validation::validate(&self.ctx, &candidate) {
            self.store.set_state(DbName::Candidate, EditState::Dirty);
            return Err(vec![err]);
        }
        self.store.set_state(DbName::Candidate, EditState::Validated);

        // Candidate diff against the reference.
        let diff = running.diff(Some(self.ctx.as_ref()), &candidate);
        if diff.is_empty() {
            self.store.set_state(DbName::Candidate, EditState::Idle);
            return Ok(Reply::Ok);
        }

        // Stage 5: plugin transaction.
        let transaction_id = self.next_transaction_id;
        self.next_transaction_id += 1;
        let args = TransactionArgs {
            id: transaction_id,
            ctx: &self.ctx,
            old_config: &running,
            new_config: &candidate,
            diff: &diff,
        };
        if let Err(err) = self.plugins.transaction(&args) {
            err.log();
            // The candidate stays as the user's working copy.
            self.store.set_state(DbName::Candidate, EditState::Dirty);
            return Err(vec![err.to_rpc_error()]);
        }

        // Stage 6: atomic swap. Readers holding the old running tree keep
        // it alive until they release their snapshots.
        self.store
            .replace(DbName::Running, candidate.clone())
            .map_err(|err| vec![err.to_rpc_error()])?;
        self.store.set_state(DbName::Candidate, EditState::Idle);
        info!(%transaction_id, "commit complete");

        // Access-control rules follow the new running configuration.
        if self.config.nacm_mode == NacmMode::Internal {
            self.nacm.config =
                NacmConfig::from_running(&candidate).unwrap_or_default();
        }

        self.publish_config_change(session);
        Ok(Reply::Ok)
    }

    fn process_validate(
        &mut self,
        source: DbName,
    ) -> std::result::Result<Reply, Vec<RpcError>> {
        self.store
            .check_commit_source(source, "validate")
            .map_err(|err| vec![err.to_rpc_error()])?;
        let tree = self
            .store
            .get(&self.ctx, source)
            .map_err(|err| vec![err.to_rpc_error()])?;
        if let Err(err) = validation::validate(&self.ctx, &tree) {
            if source == DbName::Candidate {
                self.store.set_state(source, EditState::Dirty);
            }
            return Err(vec![err]);
        }
        if source == DbName::Candidate {
            self.store.set_state(source, EditState::Validated);
        }
        Ok(Reply::Ok)
    }

    fn process_kill_session(
        &mut self,
        session: SessionId,
        victim: SessionId,
    ) -> std::result::Result<Reply, Vec<RpcError>> {
        if victim == session {
            return Err(vec![
                RpcError::new(ErrorType::Protocol, ErrorTag::InvalidValue)
                    .with_message("cannot kill own session"),
            ]);
        }
        let Some(entry) = self.sessions.get(&victim) else {
            return Err(vec![
                RpcError::new(ErrorType::Protocol, ErrorTag::InvalidValue)
                    .with_message(format!("unknown session {}", victim)),
            ]);
        };
        let _ = entry.push_tx.send(PushMsg::Close);
        self.close_session(victim);
        info!(%victim, by = %session, "session killed");
        Ok(Reply::Ok)
    }

    fn process_create_subscription(
        &mut self,
        session: SessionId,
        stream: &str,
        filter: Option<&str>,
        start_time: Option<chrono::DateTime<Utc>>,
        stop_time: Option<chrono::DateTime<Utc>>,
    ) -> std::result::Result<Reply, Vec<RpcError>> {
        if !self.bus.has_stream(stream) {
            return Err(vec![
                RpcError::new(ErrorType::Protocol, ErrorTag::InvalidValue)
                    .with_message(format!("unknown stream {}", stream)),
            ]);
        }
        let Some(entry) = self.sessions.get(&session) else {
            return Err(vec![
                RpcError::new(ErrorType::Protocol, ErrorTag::OperationFailed)
                    .with_message("session has no push channel"),
            ]);
        };

        let filter = match filter {
            Some(filter) => {
                let xpath = XPath::compile(filter)
                    .map_err(|err| vec![err.to_rpc_error()])?;
                Some((xpath, global_nsmap(&self.ctx)))
            }
            None => None,
        };
        self.bus.subscribe(
            self.ctx.clone(),
            session,
            stream,
            filter,
            start_time,
            stop_time,
            entry.push_tx.clone(),
        );
        Ok(Reply::Ok)
    }

    fn process_plugin_rpc(
        &mut self,
        name: &str,
        namespace: &str,
        input: DataTree,
    ) -> std::result::Result<Reply, Vec<RpcError>> {
        let args = RpcArgs {
            ctx: &self.ctx,
            name,
            namespace,
            input: &input,
        };
        match self.plugins.rpc(&args) {
            Ok(Some(reply)) => Ok(Reply::Data(reply)),
            Ok(None) => Err(vec![
                RpcError::new(
                    ErrorType::Protocol,
                    ErrorTag::OperationNotSupported,
                )
                .with_message(format!("unknown operation {}", name)),
            ]),
            Err(err) => {
                err.log();
                Err(vec![err.to_rpc_error()])
            }
        }
    }

    // Fans a plugin notification out to the subscriptions, applying
    // per-subscriber access control.
    fn process_provider_msg(&mut self, msg: papi::provider::Notification) {
        let event = Event {
            time: msg.time,
            payload: Arc::new(msg.data),
        };
        self.publish(&msg.stream, event);
    }

    fn publish(&mut self, stream: &str, event: Event) {
        let Northbound {
            bus,
            nacm,
            sessions,
            ctx,
            ..
        } = self;

        bus.publish(stream, event, |session, event| {
            let Some(entry) = sessions.get(&session) else {
                return false;
            };
            // Module and name of the event, for rule matching.
            let Some(top) =
                event.payload.children(event.payload.root()).first().copied()
            else {
                return false;
            };
            let name = event.payload.node(top).name.clone();
            let module = event
                .payload
                .node(top)
                .namespace
                .as_deref()
                .and_then(|ns| ctx.find_module_by_namespace(ns))
                .map(|module| ctx.module(module).name.clone())
                .unwrap_or_default();
            nacm.check_notification(ctx, &entry.user, &module, &name)
        });
    }

    // Emits a <netconf-config-change> event on the NETCONF stream after a
    // successful commit.
    fn publish_config_change(&mut self, session: SessionId) {
        let mut payload = DataTree::new();
        let root = payload.root();
        let change = payload.add_child(
            root,
            "netconf-config-change",
            Some("urn:ietf:params:xml:ns:yang:ietf-netconf-notifications"),
        );
        let changed_by = payload.add_child(change, "changed-by", None);
        let session_id = payload.add_child(changed_by, "session-id", None);
        payload.node_mut(session_id).value = Some(session.to_string());
        let datastore = payload.add_child(change, "datastore", None);
        payload.node_mut(datastore).value = Some("running".to_owned());

        let event = Event {
            time: Utc::now(),
            payload: Arc::new(payload),
        };
        self.publish("NETCONF", event);
    }

    // Releases everything a dying or killed session held.
    fn close_session(&mut self, session: SessionId) {
        if self.sessions.remove(&session).is_some() {
            self.store.unlock_all(session);
            self.bus.cancel_session(session);
            debug!(%session, "session closed");
        }
    }
}

// ===== helper functions =====

// Loads a datastore file, running the plugin upgrade hooks over subtrees
// that fail schema binding. Nodes that still fail afterwards are fatal.
fn load_with_upgrade(
    ctx: &Context,
    store: &mut Store,
    plugins: &PluginRegistry,
    db: DbName,
) -> Result<DataTree> {
    let mut tree = store.load_raw(db)?;
    let unbound = tree.bind_partial(ctx);
    if unbound.is_empty() {
        return Ok(tree);
    }

    // One upgrade pass per offending namespace.
    let mut namespaces: Vec<String> = unbound
        .iter()
        .filter_map(|id| tree.node(*id).namespace.clone())
        .collect();
    namespaces.sort();
    namespaces.dedup();
    for namespace in namespaces {
        warn!(%db, %namespace, "datastore content failed schema binding, \
               running upgrade hooks");
        let mut args = UpgradeArgs {
            ctx,
            namespace: &namespace,
            tree: &mut tree,
        };
        plugins
            .upgrade(&mut args)
            .map_err(Error::Transaction)?;
    }

    // Everything must bind after the upgrade pass.
    let unbound = tree.bind_partial(ctx);
    if let Some(first) = unbound.first() {
        let path = tree.path(ctx, *first);
        error!(%db, %path, "datastore content cannot be bound to the schema");
        return Err(Error::Datastore(keel_datastore::Error::Corrupt {
            db,
            source: keel_yang::Error::UnknownElement(path),
        }));
    }
    Ok(tree)
}
