//! Election coordinator: one participant of a Bully election.
//!
//! [`Coordinator::start`] allocates the node's priority, subscribes to the
//! namespace and spawns the event loop. The application observes leadership
//! through a status watch and a stream of [`ElectionEvent`]s; it never
//! touches raw payloads or timers.

mod config;
mod effect;
mod r#loop;
mod state;
mod timers;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::info;

pub use config::ElectionConfig;
pub use effect::{ElectionEffect, TimerKind};
pub use state::ElectionState;

use crate::allocator::PriorityAllocator;
use crate::channel::Channel;
use crate::error::{AllocationError, NotifelectError};
use crate::types::{NodeState, Priority, Term};

use self::r#loop::ElectionLoop;
use self::timers::Timers;

// ── Status & events (runtime → app) ──────────────────────────────────

/// Snapshot of a node's view of the election.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LeadershipStatus {
    pub priority: Priority,
    pub state: NodeState,
    pub known_leader: Option<Priority>,
    pub term: Term,
}

impl LeadershipStatus {
    pub fn is_leader(&self) -> bool {
        self.state == NodeState::Leader
    }
}

/// Why a leader stopped leading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DemotionReason {
    /// A higher node stood for election.
    HigherChallenger,
    /// A higher node claimed leadership.
    HigherLeader,
    /// Too many consecutive publish failures.
    PublishFailures,
    /// The subscription was lost.
    Disconnected,
    /// The coordinator was shut down.
    Shutdown,
}

/// Leadership notifications for the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ElectionEvent {
    /// This node became leader.
    Elected { term: Term },
    /// This node stopped being leader.
    Demoted { reason: DemotionReason },
    /// Another node is now the known leader.
    LeaderChanged { leader: Priority, term: Term },
    /// The known leader went silent or resigned.
    LeaderLost { leader: Priority },
}

// ── Commands (app → runtime) ─────────────────────────────────────────

pub(crate) enum Command {
    /// Leave the election; `reply` fires once the loop has finished.
    Shutdown { reply: Option<oneshot::Sender<()>> },
}

// ── CoordinatorHandle ────────────────────────────────────────────────

/// Cloneable read-only view of a running coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    priority: Priority,
    status_rx: watch::Receiver<LeadershipStatus>,
}

impl CoordinatorHandle {
    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn status(&self) -> LeadershipStatus {
        *self.status_rx.borrow()
    }

    pub fn is_leader(&self) -> bool {
        self.status().is_leader()
    }

    /// A fresh receiver of status updates.
    pub fn watch(&self) -> watch::Receiver<LeadershipStatus> {
        self.status_rx.clone()
    }

    /// Wait until the status satisfies `pred`.
    ///
    /// Fails with [`NotifelectError::ShutDown`] once the coordinator is gone.
    pub async fn wait_for_status(
        &self,
        mut pred: impl FnMut(&LeadershipStatus) -> bool,
    ) -> Result<LeadershipStatus, NotifelectError> {
        let mut rx = self.status_rx.clone();
        let status = rx
            .wait_for(|status| pred(status))
            .await
            .map_err(|_| NotifelectError::ShutDown)?;
        Ok(*status)
    }
}

// ── Coordinator ──────────────────────────────────────────────────────

/// A running election participant. Dropping it shuts it down.
pub struct Coordinator {
    handle: CoordinatorHandle,
    cmd_tx: mpsc::Sender<Command>,
    events: Option<mpsc::Receiver<ElectionEvent>>,
    task: Option<JoinHandle<()>>,
}

impl Coordinator {
    /// Validate `config`, draw a priority from `allocator`, subscribe to the
    /// namespace on `channel` and spawn the event loop.
    ///
    /// Nothing is left running when any step fails.
    pub async fn start<C, A>(
        channel: C,
        allocator: &A,
        config: ElectionConfig,
    ) -> Result<Self, NotifelectError>
    where
        C: Channel,
        A: PriorityAllocator + ?Sized,
    {
        config.validate()?;

        let priority = allocator.allocate().await?;
        if !priority.is_assignable() {
            return Err(AllocationError::Reserved { priority }.into());
        }

        let subscription = channel.subscribe(&config.namespace).await?;
        info!(priority = %priority, namespace = %config.namespace, "coordinator started");

        let state = ElectionState::new(priority, config.clone());
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer);
        let (status_tx, status_rx) = watch::channel(state.status());

        let election = ElectionLoop {
            channel,
            subscription: Some(subscription),
            namespace: config.namespace.clone(),
            resubscribe_interval: config.heartbeat_interval,
            publish_timeout: config.heartbeat_interval,
            state,
            timers: Timers::new(),
            cmd_rx,
            event_tx,
            status_tx,
        };
        let task = tokio::spawn(election.run());

        Ok(Self {
            handle: CoordinatorHandle {
                priority,
                status_rx,
            },
            cmd_tx,
            events: Some(event_rx),
            task: Some(task),
        })
    }

    pub fn priority(&self) -> Priority {
        self.handle.priority()
    }

    pub fn status(&self) -> LeadershipStatus {
        self.handle.status()
    }

    pub fn is_leader(&self) -> bool {
        self.handle.is_leader()
    }

    pub fn handle(&self) -> CoordinatorHandle {
        self.handle.clone()
    }

    /// Take ownership of the event stream. `None` if already taken.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<ElectionEvent>> {
        self.events.take()
    }

    /// Next election event, or `None` when the stream is closed or taken.
    pub async fn next_event(&mut self) -> Option<ElectionEvent> {
        self.events.as_mut()?.recv().await
    }

    /// Leave the election: a leader resigns, timers stop, the subscription
    /// is released. Returns once the event loop has exited.
    pub async fn shutdown(mut self) -> Result<(), NotifelectError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let sent = self
            .cmd_tx
            .send(Command::Shutdown {
                reply: Some(reply_tx),
            })
            .await
            .is_ok();
        if sent {
            let _ = reply_rx.await;
        }
        if let Some(task) = self.task.take() {
            task.await.map_err(|_| NotifelectError::ShutDown)?;
        }
        Ok(())
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        if self
            .cmd_tx
            .try_send(Command::Shutdown { reply: None })
            .is_err()
        {
            task.abort();
        }
    }
}
