//! The election event loop.
//!
//! A single async task that owns the election state and multiplexes over
//! application commands, inbound channel events and timer expirations.
//! Transitions are pure; this module is the only place that touches I/O.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelEvent, Subscription};
use crate::message::ElectionMessage;
use crate::types::Namespace;

use super::effect::{ElectionEffect, TimerKind};
use super::state::ElectionState;
use super::timers::Timers;
use super::{Command, ElectionEvent, LeadershipStatus};

/// What woke the loop up.
enum Step {
    Command(Option<Command>),
    Inbound(Option<ChannelEvent>),
    Timer(TimerKind),
}

pub(super) struct ElectionLoop<C> {
    pub channel: C,
    pub subscription: Option<Subscription>,
    pub namespace: Namespace,
    pub resubscribe_interval: Duration,
    /// A publish still pending after this long counts as failed.
    pub publish_timeout: Duration,
    pub state: ElectionState,
    pub timers: Timers,
    pub cmd_rx: mpsc::Receiver<Command>,
    pub event_tx: mpsc::Sender<ElectionEvent>,
    pub status_tx: watch::Sender<LeadershipStatus>,
}

impl<C: Channel> ElectionLoop<C> {
    pub async fn run(mut self) {
        let effects = self.state.start();
        self.execute(effects).await;

        loop {
            let step = tokio::select! {
                cmd = self.cmd_rx.recv() => Step::Command(cmd),
                event = next_inbound(&mut self.subscription) => Step::Inbound(event),
                timer = self.timers.expired() => Step::Timer(timer),
            };

            match step {
                Step::Command(Some(Command::Shutdown { reply })) => {
                    self.shutdown().await;
                    if let Some(reply) = reply {
                        let _ = reply.send(());
                    }
                    return;
                }
                // Every sender dropped: nobody can observe us any more.
                Step::Command(None) => {
                    self.shutdown().await;
                    return;
                }
                Step::Inbound(Some(event)) => self.on_inbound(event).await,
                Step::Inbound(None) => self.on_subscription_lost().await,
                Step::Timer(TimerKind::Resubscribe) => self.resubscribe().await,
                Step::Timer(timer) => {
                    let effects = self.state.handle_timer(timer);
                    self.execute(effects).await;
                }
            }
        }
    }

    async fn on_inbound(&mut self, event: ChannelEvent) {
        match ElectionMessage::from_bytes(&event.payload) {
            Ok(msg) => {
                debug!(
                    kind = ?msg.kind,
                    sender = %msg.sender_priority,
                    term = %msg.term,
                    "received"
                );
                let effects = self.state.handle_message(msg);
                self.execute(effects).await;
            }
            Err(e) => debug!(namespace = %event.namespace, "dropping payload: {e}"),
        }
    }

    async fn on_subscription_lost(&mut self) {
        self.subscription = None;
        self.timers.arm(TimerKind::Resubscribe, self.resubscribe_interval);
        let effects = self.state.handle_disconnect();
        self.execute(effects).await;
    }

    async fn resubscribe(&mut self) {
        match self.channel.subscribe(&self.namespace).await {
            Ok(subscription) => {
                self.subscription = Some(subscription);
                let effects = self.state.handle_reconnect();
                self.execute(effects).await;
            }
            Err(e) => {
                warn!(namespace = %self.namespace, "re-subscribe failed: {e}");
                self.timers.arm(TimerKind::Resubscribe, self.resubscribe_interval);
            }
        }
    }

    async fn shutdown(&mut self) {
        let effects = self.state.shutdown();
        self.execute(effects).await;
        self.timers.cancel_all();
        self.subscription = None;
        info!(priority = %self.state.priority(), "coordinator stopped");
    }

    /// Execute effects in order. Publish outcomes are fed back to the state
    /// and their effects queued behind the remaining ones.
    async fn execute(&mut self, effects: Vec<ElectionEffect>) {
        let mut queue: VecDeque<ElectionEffect> = effects.into();
        while let Some(effect) = queue.pop_front() {
            match effect {
                ElectionEffect::Publish(msg) => {
                    let ok =
                        publish(&self.channel, &self.namespace, &msg, self.publish_timeout).await;
                    queue.extend(self.state.handle_publish_result(msg.kind, ok));
                }
                ElectionEffect::Arm { timer, after } => self.timers.arm(timer, after),
                ElectionEffect::Cancel(timer) => self.timers.cancel(timer),
                ElectionEffect::Emit(event) => {
                    // try_send: a slow consumer must never stall the election
                    if let Err(e) = self.event_tx.try_send(event) {
                        debug!("election event dropped: {e}");
                    }
                }
            }
        }

        let next = self.state.status();
        self.status_tx.send_if_modified(|status| {
            if *status == next {
                return false;
            }
            *status = next;
            true
        });
    }
}

async fn publish<C: Channel>(
    channel: &C,
    namespace: &Namespace,
    msg: &ElectionMessage,
    limit: Duration,
) -> bool {
    let bytes = match msg.to_bytes() {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(kind = ?msg.kind, "serialize failed: {e}");
            return false;
        }
    };
    match tokio::time::timeout(limit, channel.publish(namespace, bytes)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!(kind = ?msg.kind, "publish error: {e}");
            false
        }
        Err(_) => {
            warn!(kind = ?msg.kind, ?limit, "publish timed out");
            false
        }
    }
}

/// Next inbound event, or pending forever while unsubscribed.
async fn next_inbound(subscription: &mut Option<Subscription>) -> Option<ChannelEvent> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}
