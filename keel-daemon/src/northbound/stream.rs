//
// Copyright (c) The Keel Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! In-process event streams.
//!
//! Streams are named (`NETCONF` exists by default). Published events land in
//! a bounded, time-indexed replay buffer and fan out to the live
//! subscriptions. Each subscription is a task tied to its subscriber
//! session: it replays history from the requested start time, forwards live
//! events that pass its XPath filter, and terminates at its stop time or
//! when the subscriber goes away. A subscriber that stops draining its
//! bounded event window is dropped with a warning.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use keel_utils::SessionId;
use keel_utils::task::{Task, TimeoutTask};
use keel_yang::xpath::{NsMap, XPath};
use keel_yang::{Context, DataTree};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::northbound::netconf;
use crate::northbound::session::PushMsg;

// Events a slow subscriber may hold unread before it is dropped.
const BACKPRESSURE_WINDOW: usize = 64;

/// One published event.
#[derive(Clone, Debug)]
pub struct Event {
    pub time: DateTime<Utc>,
    pub payload: Arc<DataTree>,
}

#[derive(Debug, Default)]
struct StreamState {
    replay: VecDeque<Event>,
}

#[derive(Debug)]
pub struct Subscription {
    pub session: SessionId,
    pub stream: String,
    event_tx: mpsc::Sender<Event>,
    _task: Task<()>,
    // Fires once at the stop time; dropping it cancels the timer.
    _stop_timer: Option<TimeoutTask>,
}

/// The notification bus: named streams, replay buffers and live
/// subscriptions.
#[derive(Debug)]
pub struct Bus {
    streams: HashMap<String, StreamState>,
    subscriptions: Vec<Subscription>,
    replay_window: Duration,
}

// ===== impl Bus =====

impl Bus {
    pub fn new(replay_window: Duration) -> Bus {
        let mut streams = HashMap::new();
        streams.insert("NETCONF".to_owned(), StreamState::default());
        Bus {
            streams,
            subscriptions: vec![],
            replay_window,
        }
    }

    pub fn has_stream(&self, stream: &str) -> bool {
        self.streams.contains_key(stream)
    }

    /// Creates a subscription task for one session. Replay (from
    /// `start_time`) is handed to the task upfront; live events flow through
    /// a bounded channel afterwards.
    #[allow(clippy::too_many_arguments)]
    pub fn subscribe(
        &mut self,
        ctx: Arc<Context>,
        session: SessionId,
        stream: &str,
        filter: Option<(XPath, NsMap)>,
        start_time: Option<DateTime<Utc>>,
        stop_time: Option<DateTime<Utc>>,
        push_tx: mpsc::UnboundedSender<PushMsg>,
    ) {
        let replay: Vec<Event> = match start_time {
            Some(start) => self
                .streams
                .get(stream)
                .map(|state| {
                    state
                        .replay
                        .iter()
                        .filter(|event| event.time >= start)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default(),
            None => vec![],
        };

        let (event_tx, event_rx) = mpsc::channel(BACKPRESSURE_WINDOW);
        let replay_only = start_time.is_some()
            && stop_time.is_some_and(|stop| stop <= Utc::now());

        // The stop time is a one-shot timer feeding the subscription task.
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let stop_timer = stop_time
            .filter(|_| !replay_only)
            .map(|stop| {
                let remaining =
                    (stop - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                TimeoutTask::new(remaining, move || async move {
                    let _ = stop_tx.send(()).await;
                })
            });

        let task = Task::spawn(subscription_task(
            ctx,
            event_rx,
            push_tx,
            filter,
            replay,
            start_time.is_some(),
            stop_time,
            replay_only,
            stop_rx,
        ));

        debug!(%session, %stream, "subscription created");
        self.subscriptions.push(Subscription {
            session,
            stream: stream.to_owned(),
            event_tx,
            _task: task,
            _stop_timer: stop_timer,
        });
    }

    /// Publishes an event: appends it to the stream's replay buffer and
    /// fans it out. `deliver_to` decides per subscriber session whether the
    /// event may be seen (access control); the subscription task applies
    /// its own XPath filter afterwards.
    pub fn publish(
        &mut self,
        stream: &str,
        event: Event,
        mut deliver_to: impl FnMut(SessionId, &Event) -> bool,
    ) {
        let Some(state) = self.streams.get_mut(stream) else {
            return;
        };
        state.replay.push_back(event.clone());

        self.subscriptions.retain(|subscription| {
            if subscription.stream != stream {
                return true;
            }
            if !deliver_to(subscription.session, &event) {
                return true;
            }
            match subscription.event_tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        session = %subscription.session, %stream,
                        "subscriber not draining events, dropping subscription"
                    );
                    false
                }
                // Task ended (stop-time or session gone).
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    /// Drops replay entries older than the retention window.
    pub fn purge(&mut self) {
        let Ok(window) = chrono::Duration::from_std(self.replay_window) else {
            return;
        };
        let cutoff = Utc::now() - window;
        for state in self.streams.values_mut() {
            while state
                .replay
                .front()
                .is_some_and(|event| event.time < cutoff)
            {
                state.replay.pop_front();
            }
        }
    }

    /// Cancels the subscriptions of a closing session. Dropping the handles
    /// aborts the tasks.
    pub fn cancel_session(&mut self, session: SessionId) {
        self.subscriptions
            .retain(|subscription| subscription.session != session);
    }
}

// ===== helper functions =====

fn matches_filter(
    ctx: &Context,
    filter: &Option<(XPath, NsMap)>,
    event: &Event,
) -> bool {
    match filter {
        Some((xpath, nsmap)) => xpath
            .eval_bool(&event.payload, Some(ctx), event.payload.root(), nsmap)
            .unwrap_or(false),
        None => true,
    }
}

fn push_event(
    push_tx: &mpsc::UnboundedSender<PushMsg>,
    event: &Event,
) -> bool {
    let frame = netconf::notification(&event.time, &event.payload);
    push_tx.send(PushMsg::Frame(frame)).is_ok()
}

fn push_marker(
    push_tx: &mpsc::UnboundedSender<PushMsg>,
    name: &str,
) -> bool {
    let mut payload = DataTree::new();
    let root = payload.root();
    payload.add_child(
        root,
        name,
        Some(keel_utils::netconf::NS_NETCONF_NOTIFICATION),
    );
    let frame = netconf::notification(&Utc::now(), &payload);
    push_tx.send(PushMsg::Frame(frame)).is_ok()
}

// Resolves when the stop timer fires; pends forever without one.
async fn stop_fired(stop_rx: &mut Option<mpsc::Receiver<()>>) -> Option<()> {
    match stop_rx {
        Some(stop_rx) => stop_rx.recv().await,
        None => std::future::pending().await,
    }
}

#[allow(clippy::too_many_arguments)]
async fn subscription_task(
    ctx: Arc<Context>,
    mut event_rx: mpsc::Receiver<Event>,
    push_tx: mpsc::UnboundedSender<PushMsg>,
    filter: Option<(XPath, NsMap)>,
    replay: Vec<Event>,
    replaying: bool,
    stop_time: Option<DateTime<Utc>>,
    replay_only: bool,
    stop_rx: mpsc::Receiver<()>,
) {
    // Replay phase.
    for event in &replay {
        if stop_time.is_some_and(|stop| event.time > stop) {
            break;
        }
        if matches_filter(&ctx, &filter, event)
            && !push_event(&push_tx, event)
        {
            return;
        }
    }
    if replaying && !push_marker(&push_tx, "replayComplete") {
        return;
    }
    if replay_only {
        let _ = push_marker(&push_tx, "notificationComplete");
        return;
    }

    // Live phase, bounded by the stop timer when one is armed.
    let mut stop_rx = stop_time.map(|_| stop_rx);
    loop {
        tokio::select! {
            event = event_rx.recv() => {
                match event {
                    Some(event) => {
                        if matches_filter(&ctx, &filter, &event)
                            && !push_event(&push_tx, &event)
                        {
                            // Subscriber session is gone.
                            return;
                        }
                    }
                    None => return,
                }
            }
            Some(_) = stop_fired(&mut stop_rx) => {
                let _ = push_marker(&push_tx, "notificationComplete");
                return;
            }
        }
    }
}
