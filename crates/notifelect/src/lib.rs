//! notifelect: Bully leader election over a broadcast channel.
//!
//! Every participant draws a unique priority from a shared sequence, joins
//! a namespace on a publish/subscribe channel, and the highest live
//! priority leads. Failures are detected by timers only.
//!
//! Wire format: MessagePack (compact binary).
//! Priority source: any [`PriorityAllocator`]; SQLite sequence included.

pub mod allocator;
pub mod channel;
pub mod coordinator;
pub mod error;
pub mod message;
pub mod types;

pub use allocator::{PriorityAllocator, SequenceAllocator, SequenceQueries, SqliteSequence};
pub use channel::{Channel, ChannelEvent, MemoryBus, MemoryChannel, Subscription};
pub use coordinator::{
    Coordinator, CoordinatorHandle, DemotionReason, ElectionConfig, ElectionEffect, ElectionEvent,
    ElectionState, LeadershipStatus, TimerKind,
};
pub use error::{AllocationError, ChannelError, ConfigError, DecodeError, NotifelectError};
pub use message::{ElectionMessage, MessageKind};
pub use types::{Namespace, NodeState, Priority, Term};
