use std::time::Duration;

use tokio::time::Instant;

use super::effect::TimerKind;

/// One-shot deadlines, at most one per [`TimerKind`].
#[derive(Debug, Default)]
pub(crate) struct Timers {
    deadlines: [Option<Instant>; TimerKind::ALL.len()],
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// (Re)arm `timer` to fire `after` from now.
    pub fn arm(&mut self, timer: TimerKind, after: Duration) {
        self.deadlines[slot(timer)] = Some(Instant::now() + after);
    }

    pub fn cancel(&mut self, timer: TimerKind) {
        self.deadlines[slot(timer)] = None;
    }

    pub fn cancel_all(&mut self) {
        self.deadlines = Default::default();
    }

    /// Earliest pending deadline. Ties go to the kind listed first in `TimerKind::ALL`.
    fn next(&self) -> Option<(TimerKind, Instant)> {
        TimerKind::ALL
            .into_iter()
            .filter_map(|kind| self.deadlines[slot(kind)].map(|at| (kind, at)))
            .min_by_key(|(_, at)| *at)
    }

    /// Wait for the earliest deadline, disarm it and return its kind.
    ///
    /// Pending forever when nothing is armed. Cancel-safe: the deadline is
    /// only cleared once it has fired.
    pub async fn expired(&mut self) -> TimerKind {
        let Some((kind, at)) = self.next() else {
            return std::future::pending().await;
        };
        tokio::time::sleep_until(at).await;
        self.deadlines[slot(kind)] = None;
        kind
    }
}

fn slot(timer: TimerKind) -> usize {
    match timer {
        TimerKind::Election => 0,
        TimerKind::Response => 1,
        TimerKind::LeaderLiveness => 2,
        TimerKind::HeartbeatSend => 3,
        TimerKind::Resubscribe => 4,
    }
}
