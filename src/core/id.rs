/*!
 * ID Generation
 * Type-safe monotonic identifiers for monitors and trace checkpoints
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
// Type-Safe ID Wrappers
// ============================================================================

/// Monitor identifier, unique for the life of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonitorId(pub u64);

/// Thread-trace checkpoint identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointId(pub u64);

impl fmt::Display for MonitorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for MonitorId {
    fn from(raw: u64) -> Self {
        MonitorId(raw)
    }
}

impl From<u64> for CheckpointId {
    fn from(raw: u64) -> Self {
        CheckpointId(raw)
    }
}

// ============================================================================
// Atomic Counter Generator
// ============================================================================

/// Lock-free monotonic counter
///
/// # Performance
/// - Cache-line aligned to prevent false sharing
#[repr(C, align(64))]
pub struct AtomicGenerator<T> {
    counter: AtomicU64,
    _marker: PhantomData<fn() -> T>,
}

impl<T: From<u64>> AtomicGenerator<T> {
    /// Create new generator starting at given value
    pub const fn new(start: u64) -> Self {
        Self {
            counter: AtomicU64::new(start),
            _marker: PhantomData,
        }
    }

    /// Generate next ID
    #[inline]
    pub fn next(&self) -> T {
        T::from(self.counter.fetch_add(1, Ordering::Relaxed))
    }

    /// Current counter value (for debugging)
    #[inline]
    pub fn current(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}

/// Process-wide monitor ID source
///
/// Shared by every registry so thread-local state keyed by monitor ID never
/// collides across agents.
pub static MONITOR_IDS: AtomicGenerator<MonitorId> = AtomicGenerator::new(1);

/// Process-wide checkpoint ID source
pub static CHECKPOINT_IDS: AtomicGenerator<CheckpointId> = AtomicGenerator::new(1);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic() {
        let gen: AtomicGenerator<MonitorId> = AtomicGenerator::new(5);
        assert_eq!(gen.next(), MonitorId(5));
        assert_eq!(gen.next(), MonitorId(6));
        assert_eq!(gen.current(), 7);
    }

    #[test]
    fn test_global_generators_distinct() {
        let a = CHECKPOINT_IDS.next();
        let b = CHECKPOINT_IDS.next();
        assert!(b > a);
    }
}
