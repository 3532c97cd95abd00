//! In-process election simulation.
//!
//! Spawns N coordinators on one in-memory bus, each joining after a random
//! delay, optionally stops the leader mid-run, and reports whether the group
//! settled on its highest live priority.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use rand::Rng;

use notifelect::{
    Channel, Coordinator, ElectionConfig, ElectionMessage, MemoryBus, MemoryChannel,
    PriorityAllocator, SequenceAllocator, SequenceQueries, SqliteSequence,
};

use crate::events::{
    emit, now_iso, EventElection, EventMessage, EventNodeJoined, EventNodeStopped, EventStarted,
    EventSummary, EventUndecodable,
};

/// How the leader is taken down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum KillMode {
    /// Graceful shutdown: the leader broadcasts its resignation.
    Resign,
    /// Silent: the leader's outbound traffic is dropped, followers time out.
    Crash,
}

impl KillMode {
    fn as_str(self) -> &'static str {
        match self {
            KillMode::Resign => "resign",
            KillMode::Crash => "crash",
        }
    }
}

pub struct SimulateConfig {
    pub nodes: usize,
    pub election: ElectionConfig,
    pub max_start_delay: Duration,
    pub kill_leader_after: Option<Duration>,
    pub kill_mode: KillMode,
    pub duration: Duration,
    pub tap: bool,
    /// Draw priorities from this SQLite sequence instead of an in-process counter.
    pub db: Option<(PathBuf, String)>,
}

struct Node {
    coordinator: Coordinator,
    channel: MemoryChannel,
}

/// Run the simulation. Returns whether the final state converged.
pub async fn run(config: SimulateConfig) -> anyhow::Result<bool> {
    let start = Instant::now();
    let namespace = config.election.namespace.clone();

    let (allocator, allocator_name): (Arc<dyn PriorityAllocator>, &'static str) = match &config.db
    {
        Some((path, prefix)) => {
            let seq = SqliteSequence::open(path, SequenceQueries::with_prefix(prefix))
                .with_context(|| format!("open {}", path.display()))?;
            (Arc::new(seq), "sqlite")
        }
        None => (Arc::new(SequenceAllocator::new()), "counter"),
    };

    emit(&EventStarted::new(
        namespace.as_str(),
        config.nodes,
        allocator_name,
    ));

    let bus = MemoryBus::new();
    if config.tap {
        let subscription = bus.channel().subscribe(&namespace).await?;
        tokio::spawn(tap(subscription, start));
    }

    // ── Join with random start delays ───────────────────────────────
    let mut joins = Vec::with_capacity(config.nodes);
    for _ in 0..config.nodes {
        let delay = random_delay(config.max_start_delay);
        let channel = bus.channel();
        let allocator = Arc::clone(&allocator);
        let election = config.election.clone();
        joins.push(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let coordinator = Coordinator::start(channel.clone(), &*allocator, election).await?;
            emit(&EventNodeJoined {
                event: "node_joined",
                node: coordinator.priority().0,
                start_delay_ms: millis(delay),
                elapsed_s: start.elapsed().as_secs_f64(),
            });
            anyhow::Ok(Node {
                coordinator,
                channel,
            })
        }));
    }

    let mut nodes = Vec::with_capacity(config.nodes);
    for join in joins {
        let mut node = join.await??;
        if let Some(events) = node.coordinator.take_events() {
            tokio::spawn(forward_events(node.coordinator.priority().0, events, start));
        }
        nodes.push(node);
    }

    // ── Optional leader failure ─────────────────────────────────────
    let mut remaining = config.duration;
    if let Some(after) = config.kill_leader_after {
        tokio::time::sleep(after).await;
        remaining = remaining.saturating_sub(after);

        match nodes.iter().position(|n| n.coordinator.is_leader()) {
            Some(idx) => {
                let node = nodes.swap_remove(idx);
                let priority = node.coordinator.priority().0;
                if config.kill_mode == KillMode::Crash {
                    node.channel.set_muted(true);
                }
                node.coordinator.shutdown().await?;
                emit(&EventNodeStopped {
                    event: "node_stopped",
                    node: priority,
                    mode: config.kill_mode.as_str(),
                    elapsed_s: start.elapsed().as_secs_f64(),
                    timestamp: now_iso(),
                });
            }
            None => tracing::warn!("no leader to stop"),
        }
    }

    tokio::time::sleep(remaining).await;

    // ── Summary ─────────────────────────────────────────────────────
    let statuses: Vec<_> = nodes.iter().map(|n| n.coordinator.status()).collect();
    let leaders: Vec<i64> = statuses
        .iter()
        .filter(|s| s.is_leader())
        .map(|s| s.priority.0)
        .collect();
    let expected_leader = statuses.iter().map(|s| s.priority.0).max();
    let converged = match expected_leader {
        Some(expected) => {
            leaders == [expected]
                && statuses
                    .iter()
                    .all(|s| s.known_leader.map(|p| p.0) == Some(expected))
        }
        None => leaders.is_empty(),
    };

    emit(&EventSummary {
        event: "summary",
        nodes: statuses,
        leaders,
        expected_leader,
        converged,
        elapsed_s: start.elapsed().as_secs_f64(),
        timestamp: now_iso(),
    });

    for node in nodes {
        node.coordinator.shutdown().await?;
    }
    Ok(converged)
}

fn random_delay(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=millis(max)))
}

/// Whole milliseconds, saturating at `u64::MAX`.
fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

async fn forward_events(
    node: i64,
    mut events: tokio::sync::mpsc::Receiver<notifelect::ElectionEvent>,
    start: Instant,
) {
    while let Some(detail) = events.recv().await {
        emit(&EventElection {
            event: "election",
            node,
            detail,
            elapsed_s: start.elapsed().as_secs_f64(),
        });
    }
}

/// Print every payload published on the namespace.
async fn tap(mut subscription: notifelect::Subscription, start: Instant) {
    while let Some(event) = subscription.recv().await {
        let elapsed_s = start.elapsed().as_secs_f64();
        match ElectionMessage::from_bytes(&event.payload) {
            Ok(msg) => emit(&EventMessage {
                event: "message",
                kind: msg.kind,
                sender: msg.sender_priority.0,
                term: msg.term.0,
                resignation: msg.is_resignation(),
                elapsed_s,
            }),
            Err(e) => emit(&EventUndecodable {
                event: "undecodable",
                bytes: event.payload.len(),
                error: e.to_string(),
                elapsed_s,
            }),
        }
    }
}
