use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::types::{Namespace, Priority, Term};

/// The four election message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// "I am standing for election." Broadcast when a node becomes candidate.
    Challenge,
    /// Deference from a lower node to a higher challenger.
    Response,
    /// "I am the leader." Broadcast once on winning an election.
    Claim,
    /// Periodic proof of leader liveness.
    Heartbeat,
}

/// Election protocol message — the only thing nodes ever exchange.
///
/// Serialized as MessagePack. Carries nothing beyond these four fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionMessage {
    pub kind: MessageKind,
    /// Election group this message belongs to.
    pub namespace: Namespace,
    /// Priority of the node that sent it.
    pub sender_priority: Priority,
    /// Sender's term, or for a `Response` the term of the challenge it answers.
    pub term: Term,
}

impl ElectionMessage {
    pub fn new(kind: MessageKind, namespace: Namespace, sender_priority: Priority, term: Term) -> Self {
        Self {
            kind,
            namespace,
            sender_priority,
            term,
        }
    }

    /// Resignation notice broadcast by a leader that is shutting down.
    pub fn resignation(namespace: Namespace, term: Term) -> Self {
        Self::new(MessageKind::Challenge, namespace, Priority::VACANT, term)
    }

    /// Whether this is a resignation notice rather than a real challenge.
    pub fn is_resignation(&self) -> bool {
        self.kind == MessageKind::Challenge && self.sender_priority == Priority::VACANT
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    /// Deserialize and validate from MessagePack bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let msg: Self = rmp_serde::from_slice(data)?;
        msg.validate()?;
        Ok(msg)
    }

    fn validate(&self) -> Result<(), DecodeError> {
        if self.is_resignation() || self.sender_priority.is_assignable() {
            return Ok(());
        }
        Err(DecodeError::Invalid {
            reason: format!(
                "{:?} from non-assignable priority {}",
                self.kind, self.sender_priority
            ),
        })
    }
}
