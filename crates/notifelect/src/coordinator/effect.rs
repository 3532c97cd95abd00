use std::time::Duration;

use crate::message::ElectionMessage;

use super::ElectionEvent;

/// The election timers. At most one deadline per kind is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Follower without a leader: time to stand.
    Election,
    /// Candidate: stop waiting for higher challengers.
    Response,
    /// Follower with a leader: the leader went silent.
    LeaderLiveness,
    /// Leader: time to broadcast a heartbeat.
    HeartbeatSend,
    /// Disconnected: time to retry the subscription. Armed by the loop only.
    Resubscribe,
}

impl TimerKind {
    pub(crate) const ALL: [TimerKind; 5] = [
        TimerKind::Election,
        TimerKind::Response,
        TimerKind::LeaderLiveness,
        TimerKind::HeartbeatSend,
        TimerKind::Resubscribe,
    ];
}

/// Intention produced by the pure logic of [`ElectionState`](super::state::ElectionState).
///
/// Every `handle_*` method returns `Vec<ElectionEffect>`; the event loop
/// executes them against the channel, the timers and the event sender.
#[derive(Debug, Clone, PartialEq)]
pub enum ElectionEffect {
    /// Broadcast a message on the namespace.
    Publish(ElectionMessage),
    /// (Re)arm a timer; replaces any pending deadline of the same kind.
    Arm { timer: TimerKind, after: Duration },
    /// Cancel a pending timer.
    Cancel(TimerKind),
    /// Notify the application.
    Emit(ElectionEvent),
}
