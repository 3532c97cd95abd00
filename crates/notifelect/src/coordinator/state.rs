use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::message::{ElectionMessage, MessageKind};
use crate::types::{Namespace, NodeState, Priority, Term};

use super::config::ElectionConfig;
use super::effect::{ElectionEffect, TimerKind};
use super::{DemotionReason, ElectionEvent, LeadershipStatus};

/// Number of senders whose term high-water mark is remembered.
const TERM_MARK_CAPACITY: usize = 1024;

/// Election state of one node. Pure logic: no async, no I/O, no clock.
///
/// Every `handle_*` method returns the effects the event loop must execute.
/// Timer deadlines live in the loop; this struct only says when to arm or
/// cancel them.
pub struct ElectionState {
    priority: Priority,
    namespace: Namespace,
    config: ElectionConfig,

    state: NodeState,
    known_leader: Option<Priority>,
    /// Term under which `known_leader` claimed leadership.
    leader_term: Term,
    current_term: Term,
    highest_challenger: Priority,
    /// Lower nodes that deferred to our current candidacy.
    responses: BTreeSet<Priority>,
    /// Highest term seen per sender; older Challenge/Claim/Heartbeat are dropped.
    term_marks: LruCache<Priority, Term>,

    challenge_published: bool,
    publish_failures: u32,
    connected: bool,
}

impl ElectionState {
    pub fn new(priority: Priority, config: ElectionConfig) -> Self {
        let capacity = NonZeroUsize::new(TERM_MARK_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            priority,
            namespace: config.namespace.clone(),
            config,
            state: NodeState::Follower,
            known_leader: None,
            leader_term: Term::ZERO,
            current_term: Term::ZERO,
            highest_challenger: priority,
            responses: BTreeSet::new(),
            term_marks: LruCache::new(capacity),
            challenge_published: false,
            publish_failures: 0,
            connected: true,
        }
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn known_leader(&self) -> Option<Priority> {
        self.known_leader
    }

    pub fn current_term(&self) -> Term {
        self.current_term
    }

    pub fn highest_challenger(&self) -> Priority {
        self.highest_challenger
    }

    pub fn responses(&self) -> &BTreeSet<Priority> {
        &self.responses
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn status(&self) -> LeadershipStatus {
        LeadershipStatus {
            priority: self.priority,
            state: self.state,
            known_leader: self.known_leader,
            term: self.current_term,
        }
    }

    // ── Start-up ─────────────────────────────────────────────────────────

    /// Join as a follower without a leader.
    pub fn start(&mut self) -> Vec<ElectionEffect> {
        info!(priority = %self.priority, namespace = %self.namespace, "joining election");
        vec![self.arm(TimerKind::Election, self.config.election_interval)]
    }

    // ── Inbound messages ─────────────────────────────────────────────────

    pub fn handle_message(&mut self, msg: ElectionMessage) -> Vec<ElectionEffect> {
        if msg.namespace != self.namespace {
            debug!(namespace = %msg.namespace, "dropping message for foreign namespace");
            return Vec::new();
        }
        if msg.is_resignation() {
            return self.on_resignation(msg.term);
        }
        if msg.sender_priority == self.priority {
            return Vec::new();
        }
        match msg.kind {
            MessageKind::Response => {
                self.on_response(&msg);
                Vec::new()
            }
            _ if self.is_stale(&msg) => {
                debug!(
                    kind = ?msg.kind,
                    sender = %msg.sender_priority,
                    term = %msg.term,
                    "dropping stale message"
                );
                Vec::new()
            }
            MessageKind::Challenge => self.on_challenge(&msg),
            MessageKind::Claim | MessageKind::Heartbeat => self.on_claim(&msg),
        }
    }

    fn is_stale(&mut self, msg: &ElectionMessage) -> bool {
        if let Some(mark) = self.term_marks.get(&msg.sender_priority) {
            if msg.term < *mark {
                return true;
            }
        }
        self.term_marks.put(msg.sender_priority, msg.term);
        false
    }

    fn on_challenge(&mut self, msg: &ElectionMessage) -> Vec<ElectionEffect> {
        let sender = msg.sender_priority;
        if sender > self.priority {
            debug!(challenger = %sender, term = %msg.term, "deferring to higher challenger");
            let mut effects = vec![self.publish(MessageKind::Response, msg.term)];
            if sender > self.highest_challenger {
                self.highest_challenger = sender;
            }
            match self.state {
                NodeState::Candidate => {
                    effects.push(self.arm(TimerKind::Response, self.config.response_timeout));
                }
                NodeState::Leader => {
                    effects.extend(self.step_down(DemotionReason::HigherChallenger));
                }
                NodeState::Follower => {}
            }
            return effects;
        }

        match self.state {
            NodeState::Candidate => Vec::new(),
            NodeState::Leader => vec![self.publish(MessageKind::Claim, self.current_term)],
            NodeState::Follower => {
                if self.may_stand() {
                    self.start_candidacy()
                } else {
                    Vec::new()
                }
            }
        }
    }

    fn on_response(&mut self, msg: &ElectionMessage) {
        if self.state != NodeState::Leader
            && msg.term == self.current_term
            && msg.sender_priority < self.priority
        {
            self.responses.insert(msg.sender_priority);
        }
    }

    fn on_claim(&mut self, msg: &ElectionMessage) -> Vec<ElectionEffect> {
        let sender = msg.sender_priority;
        if sender > self.priority {
            let accept = match self.known_leader {
                None => true,
                Some(leader) => sender >= leader,
            };
            if accept {
                return self.follow(sender, msg.term);
            }
            debug!(
                sender = %sender,
                leader = ?self.known_leader,
                "ignoring claim ranked below the known leader"
            );
            return Vec::new();
        }

        match self.state {
            NodeState::Leader => vec![self.publish(MessageKind::Claim, self.current_term)],
            NodeState::Candidate => Vec::new(),
            NodeState::Follower => {
                if self.may_stand() {
                    self.start_candidacy()
                } else {
                    Vec::new()
                }
            }
        }
    }

    fn on_resignation(&mut self, term: Term) -> Vec<ElectionEffect> {
        if self.state != NodeState::Follower {
            return Vec::new();
        }
        // A notice from a leader that was already replaced.
        if term < self.leader_term {
            debug!(term = %term, leader_term = %self.leader_term, "dropping stale resignation");
            return Vec::new();
        }
        let Some(leader) = self.known_leader.take() else {
            return Vec::new();
        };
        info!(leader = %leader, "leader resigned");
        vec![
            ElectionEffect::Cancel(TimerKind::LeaderLiveness),
            ElectionEffect::Emit(ElectionEvent::LeaderLost { leader }),
            self.arm(TimerKind::Election, self.jitter()),
        ]
    }

    // ── Timers ───────────────────────────────────────────────────────────

    pub fn handle_timer(&mut self, timer: TimerKind) -> Vec<ElectionEffect> {
        match timer {
            TimerKind::Election => {
                if self.state == NodeState::Follower && self.known_leader.is_none() {
                    self.start_candidacy()
                } else {
                    Vec::new()
                }
            }
            TimerKind::Response => self.on_response_timeout(),
            TimerKind::LeaderLiveness => {
                if self.state != NodeState::Follower {
                    return Vec::new();
                }
                let Some(leader) = self.known_leader.take() else {
                    return Vec::new();
                };
                warn!(leader = %leader, "leader heartbeat timed out");
                vec![
                    ElectionEffect::Emit(ElectionEvent::LeaderLost { leader }),
                    self.arm(TimerKind::Election, self.jitter()),
                ]
            }
            TimerKind::HeartbeatSend => {
                if self.state != NodeState::Leader {
                    return Vec::new();
                }
                vec![
                    self.publish(MessageKind::Heartbeat, self.current_term),
                    self.arm(TimerKind::HeartbeatSend, self.config.heartbeat_interval),
                ]
            }
            TimerKind::Resubscribe => Vec::new(),
        }
    }

    fn on_response_timeout(&mut self) -> Vec<ElectionEffect> {
        if self.state != NodeState::Candidate {
            return Vec::new();
        }
        if self.highest_challenger > self.priority {
            debug!(challenger = %self.highest_challenger, "candidacy outranked");
            self.state = NodeState::Follower;
            self.responses.clear();
            return vec![self.arm(TimerKind::Election, self.config.election_interval)];
        }
        if !self.challenge_published {
            warn!(term = %self.current_term, "challenge was never published, not claiming");
            self.state = NodeState::Follower;
            self.responses.clear();
            return vec![self.arm(TimerKind::Election, self.config.election_interval)];
        }

        self.current_term = self.current_term.next();
        self.state = NodeState::Leader;
        self.known_leader = Some(self.priority);
        self.publish_failures = 0;
        info!(
            priority = %self.priority,
            term = %self.current_term,
            deferred = self.responses.len(),
            "elected leader"
        );
        self.responses.clear();
        vec![
            self.publish(MessageKind::Claim, self.current_term),
            self.arm(TimerKind::HeartbeatSend, self.config.heartbeat_interval),
            ElectionEffect::Emit(ElectionEvent::Elected {
                term: self.current_term,
            }),
        ]
    }

    // ── Publish outcome ──────────────────────────────────────────────────

    /// Feed back the outcome of a `Publish` effect.
    pub fn handle_publish_result(&mut self, kind: MessageKind, ok: bool) -> Vec<ElectionEffect> {
        if ok {
            self.publish_failures = 0;
            if kind == MessageKind::Challenge && self.state == NodeState::Candidate {
                self.challenge_published = true;
            }
            return Vec::new();
        }

        self.publish_failures = self.publish_failures.saturating_add(1);
        warn!(
            kind = ?kind,
            failures = self.publish_failures,
            "publish failed"
        );
        if self.state == NodeState::Leader
            && self.publish_failures >= self.config.max_publish_failures
        {
            return self.step_down(DemotionReason::PublishFailures);
        }
        Vec::new()
    }

    // ── Connectivity ─────────────────────────────────────────────────────

    /// The subscription ended; nothing can be heard until re-subscribed.
    pub fn handle_disconnect(&mut self) -> Vec<ElectionEffect> {
        if !self.connected {
            return Vec::new();
        }
        self.connected = false;
        warn!(priority = %self.priority, "subscription lost");

        match self.state {
            NodeState::Leader => self.step_down(DemotionReason::Disconnected),
            NodeState::Candidate => {
                self.state = NodeState::Follower;
                self.responses.clear();
                vec![
                    ElectionEffect::Cancel(TimerKind::Response),
                    self.arm(TimerKind::Election, self.config.election_interval),
                ]
            }
            NodeState::Follower => {
                let mut effects = Vec::new();
                if let Some(leader) = self.known_leader.take() {
                    effects.push(ElectionEffect::Cancel(TimerKind::LeaderLiveness));
                    effects.push(ElectionEffect::Emit(ElectionEvent::LeaderLost { leader }));
                }
                effects.push(self.arm(TimerKind::Election, self.config.election_interval));
                effects
            }
        }
    }

    pub fn handle_reconnect(&mut self) -> Vec<ElectionEffect> {
        if self.connected {
            return Vec::new();
        }
        self.connected = true;
        info!(priority = %self.priority, "subscription restored");
        if self.state == NodeState::Follower && self.known_leader.is_none() {
            return vec![self.arm(TimerKind::Election, self.config.election_interval)];
        }
        Vec::new()
    }

    // ── Shutdown ─────────────────────────────────────────────────────────

    /// Leave the election. A leader announces its resignation.
    pub fn shutdown(&mut self) -> Vec<ElectionEffect> {
        let mut effects = Vec::new();
        if self.state == NodeState::Leader {
            info!(priority = %self.priority, term = %self.current_term, "resigning leadership");
            effects.push(ElectionEffect::Publish(ElectionMessage::resignation(
                self.namespace.clone(),
                self.current_term,
            )));
            effects.push(ElectionEffect::Emit(ElectionEvent::Demoted {
                reason: DemotionReason::Shutdown,
            }));
        }
        self.state = NodeState::Follower;
        self.known_leader = None;
        self.responses.clear();
        effects.extend(TimerKind::ALL.into_iter().map(ElectionEffect::Cancel));
        effects
    }

    // ── Transitions ──────────────────────────────────────────────────────

    /// A follower without a leader and without a pending higher challenger
    /// must not let a lower node lead.
    fn may_stand(&self) -> bool {
        self.known_leader.is_none() && self.highest_challenger <= self.priority
    }

    fn start_candidacy(&mut self) -> Vec<ElectionEffect> {
        if !self.connected {
            return vec![self.arm(TimerKind::Election, self.config.election_interval)];
        }
        self.current_term = self.current_term.next();
        self.state = NodeState::Candidate;
        self.known_leader = None;
        self.highest_challenger = self.priority;
        self.responses.clear();
        self.challenge_published = false;
        info!(priority = %self.priority, term = %self.current_term, "standing for election");
        vec![
            ElectionEffect::Cancel(TimerKind::Election),
            ElectionEffect::Cancel(TimerKind::LeaderLiveness),
            self.publish(MessageKind::Challenge, self.current_term),
            self.arm(TimerKind::Response, self.config.response_timeout),
        ]
    }

    fn follow(&mut self, leader: Priority, term: Term) -> Vec<ElectionEffect> {
        let mut effects = Vec::new();
        let previous_state = self.state;
        let previous_leader = self.known_leader;

        self.state = NodeState::Follower;
        self.known_leader = Some(leader);
        self.leader_term = if previous_leader == Some(leader) {
            self.leader_term.max(term)
        } else {
            term
        };
        self.current_term = self.current_term.max(term);
        self.highest_challenger = self.priority;
        self.responses.clear();

        match previous_state {
            NodeState::Candidate => effects.push(ElectionEffect::Cancel(TimerKind::Response)),
            NodeState::Leader => {
                effects.push(ElectionEffect::Cancel(TimerKind::HeartbeatSend));
                effects.push(ElectionEffect::Emit(ElectionEvent::Demoted {
                    reason: DemotionReason::HigherLeader,
                }));
            }
            NodeState::Follower => {
                if previous_leader.is_none() {
                    effects.push(ElectionEffect::Cancel(TimerKind::Election));
                }
            }
        }
        if previous_leader != Some(leader) {
            info!(leader = %leader, term = %self.current_term, "following new leader");
            effects.push(ElectionEffect::Emit(ElectionEvent::LeaderChanged {
                leader,
                term: self.current_term,
            }));
        }
        effects.push(self.arm(TimerKind::LeaderLiveness, self.config.leader_timeout));
        effects
    }

    fn step_down(&mut self, reason: DemotionReason) -> Vec<ElectionEffect> {
        warn!(priority = %self.priority, ?reason, "stepping down");
        self.state = NodeState::Follower;
        self.known_leader = None;
        self.responses.clear();
        self.publish_failures = 0;
        vec![
            ElectionEffect::Cancel(TimerKind::HeartbeatSend),
            self.arm(TimerKind::Election, self.config.election_interval),
            ElectionEffect::Emit(ElectionEvent::Demoted { reason }),
        ]
    }

    // ── Helpers ──────────────────────────────────────────────────────────

    fn publish(&self, kind: MessageKind, term: Term) -> ElectionEffect {
        ElectionEffect::Publish(ElectionMessage::new(
            kind,
            self.namespace.clone(),
            self.priority,
            term,
        ))
    }

    fn arm(&self, timer: TimerKind, after: Duration) -> ElectionEffect {
        ElectionEffect::Arm { timer, after }
    }

    /// Random delay in `[0, election_jitter]`.
    fn jitter(&self) -> Duration {
        let max = self.config.election_jitter;
        if max.is_zero() {
            return Duration::ZERO;
        }
        let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::rng().random_range(0..=max_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ElectionConfig {
        ElectionConfig {
            namespace: Namespace::from("test"),
            election_interval: Duration::from_millis(500),
            response_timeout: Duration::from_millis(100),
            heartbeat_interval: Duration::from_millis(100),
            leader_timeout: Duration::from_millis(300),
            election_jitter: Duration::ZERO,
            max_publish_failures: 2,
            event_buffer: 16,
        }
    }

    fn node(priority: i64) -> ElectionState {
        let mut state = ElectionState::new(Priority(priority), config());
        state.start();
        state
    }

    fn msg(kind: MessageKind, sender: i64, term: u64) -> ElectionMessage {
        ElectionMessage::new(kind, Namespace::from("test"), Priority(sender), Term(term))
    }

    fn published(effects: &[ElectionEffect]) -> Vec<(MessageKind, Priority, Term)> {
        effects
            .iter()
            .filter_map(|e| match e {
                ElectionEffect::Publish(m) => Some((m.kind, m.sender_priority, m.term)),
                _ => None,
            })
            .collect()
    }

    fn emitted(effects: &[ElectionEffect]) -> Vec<ElectionEvent> {
        effects
            .iter()
            .filter_map(|e| match e {
                ElectionEffect::Emit(ev) => Some(ev.clone()),
                _ => None,
            })
            .collect()
    }

    fn armed(effects: &[ElectionEffect], timer: TimerKind) -> Option<Duration> {
        effects.iter().find_map(|e| match e {
            ElectionEffect::Arm { timer: t, after } if *t == timer => Some(*after),
            _ => None,
        })
    }

    /// Drive a node from follower to leader with no competition.
    fn elect(state: &mut ElectionState) {
        state.handle_timer(TimerKind::Election);
        state.handle_publish_result(MessageKind::Challenge, true);
        state.handle_timer(TimerKind::Response);
        assert_eq!(state.state(), NodeState::Leader);
    }

    #[test]
    fn start_arms_election_timer() {
        let mut state = ElectionState::new(Priority(1), config());
        let effects = state.start();
        assert_eq!(
            effects,
            vec![ElectionEffect::Arm {
                timer: TimerKind::Election,
                after: Duration::from_millis(500)
            }]
        );
        assert_eq!(state.state(), NodeState::Follower);
        assert_eq!(state.known_leader(), None);
    }

    #[test]
    fn election_timer_starts_candidacy() {
        let mut state = node(5);
        let effects = state.handle_timer(TimerKind::Election);
        assert_eq!(state.state(), NodeState::Candidate);
        assert_eq!(state.current_term(), Term(1));
        assert_eq!(
            published(&effects),
            vec![(MessageKind::Challenge, Priority(5), Term(1))]
        );
        assert_eq!(armed(&effects, TimerKind::Response), Some(Duration::from_millis(100)));
        assert_eq!(state.highest_challenger(), Priority(5));
    }

    #[test]
    fn response_timeout_without_challenger_claims() {
        let mut state = node(5);
        state.handle_timer(TimerKind::Election);
        state.handle_publish_result(MessageKind::Challenge, true);
        let effects = state.handle_timer(TimerKind::Response);

        assert_eq!(state.state(), NodeState::Leader);
        assert_eq!(state.known_leader(), Some(Priority(5)));
        assert_eq!(state.current_term(), Term(2));
        assert_eq!(
            published(&effects),
            vec![(MessageKind::Claim, Priority(5), Term(2))]
        );
        assert!(armed(&effects, TimerKind::HeartbeatSend).is_some());
        assert_eq!(emitted(&effects), vec![ElectionEvent::Elected { term: Term(2) }]);
    }

    #[test]
    fn unpublished_challenge_never_claims() {
        let mut state = node(5);
        state.handle_timer(TimerKind::Election);
        state.handle_publish_result(MessageKind::Challenge, false);
        let effects = state.handle_timer(TimerKind::Response);

        assert_eq!(state.state(), NodeState::Follower);
        assert!(published(&effects).is_empty());
        assert_eq!(armed(&effects, TimerKind::Election), Some(Duration::from_millis(500)));
    }

    #[test]
    fn candidate_defers_to_higher_challenge() {
        let mut state = node(2);
        state.handle_timer(TimerKind::Election);

        let effects = state.handle_message(msg(MessageKind::Challenge, 3, 1));
        assert_eq!(
            published(&effects),
            vec![(MessageKind::Response, Priority(2), Term(1))]
        );
        assert!(armed(&effects, TimerKind::Response).is_some());
        assert_eq!(state.state(), NodeState::Candidate);
        assert_eq!(state.highest_challenger(), Priority(3));

        let effects = state.handle_timer(TimerKind::Response);
        assert_eq!(state.state(), NodeState::Follower);
        assert!(published(&effects).is_empty());
        assert_eq!(armed(&effects, TimerKind::Election), Some(Duration::from_millis(500)));
    }

    #[test]
    fn candidate_ignores_lower_challenge() {
        let mut state = node(5);
        state.handle_timer(TimerKind::Election);
        let effects = state.handle_message(msg(MessageKind::Challenge, 1, 1));
        assert!(effects.is_empty());
        assert_eq!(state.highest_challenger(), Priority(5));
    }

    #[test]
    fn responses_accumulate_for_current_term_only() {
        let mut state = node(5);
        state.handle_timer(TimerKind::Election);
        state.handle_message(msg(MessageKind::Response, 1, 1));
        state.handle_message(msg(MessageKind::Response, 2, 1));
        state.handle_message(msg(MessageKind::Response, 3, 0));
        state.handle_message(msg(MessageKind::Response, 9, 1));
        assert_eq!(
            state.responses().iter().copied().collect::<Vec<_>>(),
            vec![Priority(1), Priority(2)]
        );
    }

    #[test]
    fn own_echo_is_ignored() {
        let mut state = node(5);
        state.handle_timer(TimerKind::Election);
        let effects = state.handle_message(msg(MessageKind::Challenge, 5, 1));
        assert!(effects.is_empty());
        assert_eq!(state.state(), NodeState::Candidate);
    }

    #[test]
    fn foreign_namespace_is_ignored() {
        let mut state = node(1);
        let other = ElectionMessage::new(
            MessageKind::Claim,
            Namespace::from("other"),
            Priority(9),
            Term(1),
        );
        assert!(state.handle_message(other).is_empty());
        assert_eq!(state.known_leader(), None);
    }

    #[test]
    fn follower_accepts_higher_claim() {
        let mut state = node(1);
        let effects = state.handle_message(msg(MessageKind::Claim, 3, 4));

        assert_eq!(state.known_leader(), Some(Priority(3)));
        assert_eq!(state.current_term(), Term(4));
        assert!(effects.contains(&ElectionEffect::Cancel(TimerKind::Election)));
        assert_eq!(
            emitted(&effects),
            vec![ElectionEvent::LeaderChanged {
                leader: Priority(3),
                term: Term(4)
            }]
        );
        assert_eq!(
            armed(&effects, TimerKind::LeaderLiveness),
            Some(Duration::from_millis(300))
        );
    }

    #[test]
    fn repeated_heartbeat_is_idempotent() {
        let mut state = node(1);
        state.handle_message(msg(MessageKind::Claim, 3, 4));
        let before = state.status();

        let effects = state.handle_message(msg(MessageKind::Heartbeat, 3, 4));
        assert_eq!(
            effects,
            vec![ElectionEffect::Arm {
                timer: TimerKind::LeaderLiveness,
                after: Duration::from_millis(300)
            }]
        );
        assert_eq!(state.status(), before);
    }

    #[test]
    fn stale_term_is_dropped() {
        let mut state = node(1);
        state.handle_message(msg(MessageKind::Heartbeat, 3, 4));
        let effects = state.handle_message(msg(MessageKind::Heartbeat, 3, 2));
        assert!(effects.is_empty());
    }

    #[test]
    fn claim_below_known_leader_is_ignored() {
        let mut state = node(1);
        state.handle_message(msg(MessageKind::Claim, 5, 2));
        let effects = state.handle_message(msg(MessageKind::Claim, 3, 2));
        assert!(effects.is_empty());
        assert_eq!(state.known_leader(), Some(Priority(5)));

        // Once the leader is gone, the lower claimant is accepted.
        state.handle_timer(TimerKind::LeaderLiveness);
        state.handle_message(msg(MessageKind::Heartbeat, 3, 2));
        assert_eq!(state.known_leader(), Some(Priority(3)));
    }

    #[test]
    fn higher_claim_overrides_known_leader() {
        let mut state = node(1);
        state.handle_message(msg(MessageKind::Claim, 3, 2));
        let effects = state.handle_message(msg(MessageKind::Claim, 7, 3));
        assert_eq!(state.known_leader(), Some(Priority(7)));
        assert_eq!(emitted(&effects).len(), 1);
    }

    #[test]
    fn leader_rebroadcasts_claim_on_lower_claim_and_challenge() {
        let mut state = node(5);
        elect(&mut state);

        let effects = state.handle_message(msg(MessageKind::Heartbeat, 2, 9));
        assert_eq!(
            published(&effects),
            vec![(MessageKind::Claim, Priority(5), Term(2))]
        );

        let effects = state.handle_message(msg(MessageKind::Challenge, 1, 1));
        assert_eq!(
            published(&effects),
            vec![(MessageKind::Claim, Priority(5), Term(2))]
        );
        assert_eq!(state.state(), NodeState::Leader);
    }

    #[test]
    fn leader_steps_down_on_higher_challenge() {
        let mut state = node(5);
        elect(&mut state);

        let effects = state.handle_message(msg(MessageKind::Challenge, 8, 1));
        assert_eq!(state.state(), NodeState::Follower);
        assert_eq!(state.known_leader(), None);
        assert_eq!(
            published(&effects),
            vec![(MessageKind::Response, Priority(5), Term(1))]
        );
        assert!(effects.contains(&ElectionEffect::Cancel(TimerKind::HeartbeatSend)));
        assert_eq!(
            emitted(&effects),
            vec![ElectionEvent::Demoted {
                reason: DemotionReason::HigherChallenger
            }]
        );
    }

    #[test]
    fn leader_demoted_by_higher_claim() {
        let mut state = node(5);
        elect(&mut state);

        let effects = state.handle_message(msg(MessageKind::Claim, 8, 3));
        assert_eq!(state.state(), NodeState::Follower);
        assert_eq!(state.known_leader(), Some(Priority(8)));
        assert_eq!(
            emitted(&effects),
            vec![
                ElectionEvent::Demoted {
                    reason: DemotionReason::HigherLeader
                },
                ElectionEvent::LeaderChanged {
                    leader: Priority(8),
                    term: Term(3)
                },
            ]
        );
    }

    #[test]
    fn heartbeat_timer_publishes_and_rearms() {
        let mut state = node(5);
        elect(&mut state);
        let effects = state.handle_timer(TimerKind::HeartbeatSend);
        assert_eq!(
            published(&effects),
            vec![(MessageKind::Heartbeat, Priority(5), Term(2))]
        );
        assert!(armed(&effects, TimerKind::HeartbeatSend).is_some());
    }

    #[test]
    fn leader_timeout_clears_leader() {
        let mut state = node(1);
        state.handle_message(msg(MessageKind::Claim, 3, 2));
        let effects = state.handle_timer(TimerKind::LeaderLiveness);

        assert_eq!(state.known_leader(), None);
        assert_eq!(
            emitted(&effects),
            vec![ElectionEvent::LeaderLost {
                leader: Priority(3)
            }]
        );
        assert_eq!(armed(&effects, TimerKind::Election), Some(Duration::ZERO));
    }

    #[test]
    fn jitter_stays_within_bound() {
        let mut cfg = config();
        cfg.election_jitter = Duration::from_millis(50);
        let state = ElectionState::new(Priority(1), cfg);
        for _ in 0..100 {
            assert!(state.jitter() <= Duration::from_millis(50));
        }
    }

    #[test]
    fn follower_without_leader_bullies_lower_challenger() {
        let mut state = node(5);
        let effects = state.handle_message(msg(MessageKind::Challenge, 2, 1));
        assert_eq!(state.state(), NodeState::Candidate);
        assert_eq!(
            published(&effects),
            vec![(MessageKind::Challenge, Priority(5), Term(1))]
        );
    }

    #[test]
    fn follower_without_leader_bullies_lower_claim() {
        let mut state = node(5);
        state.handle_message(msg(MessageKind::Heartbeat, 2, 3));
        assert_eq!(state.state(), NodeState::Candidate);
    }

    #[test]
    fn follower_with_pending_challenger_stays_put() {
        let mut state = node(5);
        state.handle_message(msg(MessageKind::Challenge, 9, 1));
        assert_eq!(state.highest_challenger(), Priority(9));
        let effects = state.handle_message(msg(MessageKind::Challenge, 2, 1));
        assert!(effects.is_empty());
        assert_eq!(state.state(), NodeState::Follower);
    }

    #[test]
    fn resignation_triggers_immediate_reelection() {
        let mut state = node(1);
        state.handle_message(msg(MessageKind::Claim, 3, 2));
        let effects =
            state.handle_message(ElectionMessage::resignation(Namespace::from("test"), Term(2)));

        assert_eq!(state.known_leader(), None);
        assert!(effects.contains(&ElectionEffect::Cancel(TimerKind::LeaderLiveness)));
        assert_eq!(armed(&effects, TimerKind::Election), Some(Duration::ZERO));
    }

    #[test]
    fn late_resignation_keeps_successor() {
        let mut state = node(1);
        state.handle_message(msg(MessageKind::Claim, 3, 2));
        state.handle_message(ElectionMessage::resignation(Namespace::from("test"), Term(2)));
        state.handle_message(msg(MessageKind::Claim, 2, 4));
        assert_eq!(state.known_leader(), Some(Priority(2)));

        // Redelivered notice from the leader that resigned at term 2.
        let effects =
            state.handle_message(ElectionMessage::resignation(Namespace::from("test"), Term(2)));
        assert!(effects.is_empty());
        assert_eq!(state.known_leader(), Some(Priority(2)));

        let effects =
            state.handle_message(ElectionMessage::resignation(Namespace::from("test"), Term(4)));
        assert_eq!(state.known_leader(), None);
        assert_eq!(
            emitted(&effects),
            vec![ElectionEvent::LeaderLost {
                leader: Priority(2)
            }]
        );
    }

    #[test]
    fn resignation_ignored_without_leader() {
        let mut state = node(1);
        let effects =
            state.handle_message(ElectionMessage::resignation(Namespace::from("test"), Term(2)));
        assert!(effects.is_empty());
    }

    #[test]
    fn repeated_publish_failures_demote_leader() {
        let mut state = node(5);
        elect(&mut state);

        assert!(state
            .handle_publish_result(MessageKind::Heartbeat, false)
            .is_empty());
        let effects = state.handle_publish_result(MessageKind::Heartbeat, false);
        assert_eq!(state.state(), NodeState::Follower);
        assert_eq!(
            emitted(&effects),
            vec![ElectionEvent::Demoted {
                reason: DemotionReason::PublishFailures
            }]
        );
    }

    #[test]
    fn publish_success_resets_failure_count() {
        let mut state = node(5);
        elect(&mut state);
        state.handle_publish_result(MessageKind::Heartbeat, false);
        state.handle_publish_result(MessageKind::Heartbeat, true);
        state.handle_publish_result(MessageKind::Heartbeat, false);
        assert_eq!(state.state(), NodeState::Leader);
    }

    #[test]
    fn disconnected_leader_steps_down() {
        let mut state = node(5);
        elect(&mut state);
        let effects = state.handle_disconnect();
        assert_eq!(state.state(), NodeState::Follower);
        assert!(!state.is_connected());
        assert_eq!(
            emitted(&effects),
            vec![ElectionEvent::Demoted {
                reason: DemotionReason::Disconnected
            }]
        );
    }

    #[test]
    fn disconnected_node_never_stands() {
        let mut state = node(5);
        state.handle_disconnect();
        let effects = state.handle_timer(TimerKind::Election);
        assert_eq!(state.state(), NodeState::Follower);
        assert!(published(&effects).is_empty());
        assert!(armed(&effects, TimerKind::Election).is_some());

        state.handle_reconnect();
        state.handle_timer(TimerKind::Election);
        assert_eq!(state.state(), NodeState::Candidate);
    }

    #[test]
    fn shutdown_resigns_when_leader() {
        let mut state = node(5);
        elect(&mut state);
        let effects = state.shutdown();

        let resignation: Vec<_> = effects
            .iter()
            .filter_map(|e| match e {
                ElectionEffect::Publish(m) => Some(m.is_resignation()),
                _ => None,
            })
            .collect();
        assert_eq!(resignation, vec![true]);
        assert_eq!(state.state(), NodeState::Follower);
        for timer in TimerKind::ALL {
            assert!(effects.contains(&ElectionEffect::Cancel(timer)));
        }
    }

    #[test]
    fn shutdown_as_follower_publishes_nothing() {
        let mut state = node(1);
        let effects = state.shutdown();
        assert!(published(&effects).is_empty());
        assert!(emitted(&effects).is_empty());
    }
}
