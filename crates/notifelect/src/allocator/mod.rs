//! Priority allocation — the single shared ordering source of an election.
//!
//! Injected into each Coordinator at start-up; never a process-wide global,
//! so isolated namespaces and test doubles can coexist in one process.

mod sqlite;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

pub use sqlite::{SequenceQueries, SqliteSequence};

use crate::error::AllocationError;
use crate::types::Priority;

/// Source of unique, increasing priorities.
///
/// Called exactly once per Coordinator, before it joins its namespace.
/// Implementations must be safe under concurrent calls from many nodes.
#[async_trait::async_trait]
pub trait PriorityAllocator: Send + Sync {
    async fn allocate(&self) -> Result<Priority, AllocationError>;
}

#[async_trait::async_trait]
impl<A: PriorityAllocator + ?Sized> PriorityAllocator for Arc<A> {
    async fn allocate(&self) -> Result<Priority, AllocationError> {
        (**self).allocate().await
    }
}

/// In-process atomic counter starting at 1.
///
/// Clones share the same counter, so every node of a simulation or test
/// can draw from one sequence.
#[derive(Debug, Clone)]
pub struct SequenceAllocator {
    next: Arc<AtomicI64>,
}

/// Counter value once `i64::MAX` has been handed out.
const EXHAUSTED: i64 = i64::MIN;

impl SequenceAllocator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Counter whose first allocation returns `first`. `i64::MIN` starts exhausted.
    pub fn starting_at(first: i64) -> Self {
        Self {
            next: Arc::new(AtomicI64::new(first)),
        }
    }
}

impl Default for SequenceAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PriorityAllocator for SequenceAllocator {
    async fn allocate(&self) -> Result<Priority, AllocationError> {
        let value = self
            .next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                (v != EXHAUSTED).then(|| v.checked_add(1).unwrap_or(EXHAUSTED))
            })
            .map_err(|_| AllocationError::Exhausted)?;
        Ok(Priority(value))
    }
}
