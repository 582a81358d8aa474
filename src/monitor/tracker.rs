/*!
 * Thread Concurrency Tracker
 *
 * Ordered list of the threads currently inside a monitor, oldest first.
 * Stored as a slab of slots linked by prev/next indices so add, remove and
 * longest-running lookup are O(1) without pointer surgery.
 *
 * Re-entrancy is tracked per thread in a thread-local table keyed by monitor
 * ID. When a thread exits, the table's destructor detaches any slots that
 * thread still holds, so the list never reports dead threads.
 */

use crate::config::TrackerMode;
use crate::core::{Millis, MonitorId};
use ahash::RandomState;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, Thread};

/// Handle to a slot in the tracker list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlotHandle {
    index: usize,
    generation: u64,
}

/// A thread currently inside the monitor
#[derive(Debug, Clone)]
pub struct RunningThread {
    pub thread: Thread,
    pub start: Millis,
}

impl RunningThread {
    pub fn name(&self) -> Option<&str> {
        self.thread.name()
    }
}

#[derive(Debug)]
struct Slot {
    entry: Option<RunningThread>,
    generation: u64,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug, Default)]
struct TrackerList {
    slots: Vec<Slot>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl TrackerList {
    fn allocate(&mut self, entry: RunningThread) -> usize {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.entry = Some(entry);
                slot.generation += 1;
                slot.prev = None;
                slot.next = None;
                index
            }
            None => {
                self.slots.push(Slot {
                    entry: Some(entry),
                    generation: 0,
                    prev: None,
                    next: None,
                });
                self.slots.len() - 1
            }
        }
    }

    fn start_of(&self, index: usize) -> Millis {
        self.slots[index]
            .entry
            .as_ref()
            .map(|e| e.start)
            .unwrap_or(Millis::MIN)
    }

    /// Insert keeping the list ordered by start time.
    /// Entries usually arrive in order, so the walk from the tail is short.
    fn insert(&mut self, entry: RunningThread) -> SlotHandle {
        let start = entry.start;
        let index = self.allocate(entry);

        let mut after = self.tail;
        while let Some(candidate) = after {
            if self.start_of(candidate) <= start {
                break;
            }
            after = self.slots[candidate].prev;
        }

        match after {
            Some(prev) => {
                let next = self.slots[prev].next;
                self.slots[index].prev = Some(prev);
                self.slots[index].next = next;
                self.slots[prev].next = Some(index);
                match next {
                    Some(n) => self.slots[n].prev = Some(index),
                    None => self.tail = Some(index),
                }
            }
            None => {
                let old_head = self.head;
                self.slots[index].next = old_head;
                match old_head {
                    Some(h) => self.slots[h].prev = Some(index),
                    None => self.tail = Some(index),
                }
                self.head = Some(index);
            }
        }

        SlotHandle {
            index,
            generation: self.slots[index].generation,
        }
    }

    fn remove(&mut self, handle: SlotHandle) -> bool {
        let Some(slot) = self.slots.get(handle.index) else {
            return false;
        };
        if slot.generation != handle.generation || slot.entry.is_none() {
            return false;
        }

        let (prev, next) = (slot.prev, slot.next);
        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].prev = prev,
            None => self.tail = prev,
        }

        let slot = &mut self.slots[handle.index];
        slot.entry = None;
        slot.prev = None;
        slot.next = None;
        self.free.push(handle.index);
        true
    }

    fn iter(&self) -> impl Iterator<Item = &RunningThread> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let index = cursor?;
            cursor = self.slots[index].next;
            self.slots[index].entry.as_ref()
        })
    }
}

/// Per-monitor concurrency tracker
#[derive(Debug)]
pub struct ThreadConcurrencyTracker {
    mode: TrackerMode,
    list: Mutex<TrackerList>,
    active: AtomicU32,
}

impl ThreadConcurrencyTracker {
    pub fn new(mode: TrackerMode) -> Self {
        Self {
            mode,
            list: Mutex::new(TrackerList::default()),
            active: AtomicU32::new(0),
        }
    }

    pub fn mode(&self) -> TrackerMode {
        self.mode
    }

    /// Register a thread; returns the new active count and slot handle
    pub(crate) fn add_tracker(&self, thread: Thread, start: Millis) -> (u32, Option<SlotHandle>) {
        let count = self.active.fetch_add(1, Ordering::AcqRel) + 1;
        if self.mode == TrackerMode::CountOnly {
            return (count, None);
        }
        let handle = self.list.lock().insert(RunningThread { thread, start });
        (count, Some(handle))
    }

    pub(crate) fn remove_tracker(&self, handle: Option<SlotHandle>) {
        match handle {
            Some(handle) => {
                if self.list.lock().remove(handle) {
                    self.active.fetch_sub(1, Ordering::AcqRel);
                }
            }
            None => {
                // Count-only mode never hands out slots
                let _ = self
                    .active
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_sub(1));
            }
        }
    }

    /// Number of threads currently inside the monitor
    pub fn active_count(&self) -> u32 {
        self.active.load(Ordering::Acquire)
    }

    /// Oldest still-running thread
    pub fn longest_running(&self) -> Option<RunningThread> {
        let list = self.list.lock();
        list.head.and_then(|h| list.slots[h].entry.clone())
    }

    /// All running threads, oldest first
    pub fn all_running(&self) -> Vec<RunningThread> {
        self.list.lock().iter().cloned().collect()
    }
}

// ============================================================================
// Per-thread re-entrancy table
// ============================================================================

struct ThreadEntry {
    depth: u32,
    event_start: Millis,
    sql_start: Option<i64>,
    slot: Option<SlotHandle>,
    tracker: Weak<ThreadConcurrencyTracker>,
}

#[derive(Default)]
struct ThreadEntries {
    entries: HashMap<MonitorId, ThreadEntry, RandomState>,
}

impl Drop for ThreadEntries {
    fn drop(&mut self) {
        for entry in self.entries.values() {
            if entry.depth > 0 {
                if let Some(tracker) = entry.tracker.upgrade() {
                    tracker.remove_tracker(entry.slot);
                }
            }
        }
    }
}

thread_local! {
    static THREAD_ENTRIES: RefCell<ThreadEntries> = RefCell::new(ThreadEntries::default());
}

/// Result of entering a monitor on the current thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Entry {
    /// First (outermost) entry; carries the active thread count after registration
    Outermost { active_threads: u32 },
    Nested,
}

/// Result of an outermost exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Exit {
    pub event_start: Millis,
    pub sql_start: Option<i64>,
}

/// Enter `monitor` on the current thread
pub(crate) fn enter(
    monitor: MonitorId,
    tracker: &Arc<ThreadConcurrencyTracker>,
    now: Millis,
    sql_now: Option<i64>,
) -> Entry {
    THREAD_ENTRIES.with(|cell| {
        let mut table = cell.borrow_mut();
        let entry = table.entries.entry(monitor).or_insert_with(|| ThreadEntry {
            depth: 0,
            event_start: now,
            sql_start: None,
            slot: None,
            tracker: Arc::downgrade(tracker),
        });

        entry.depth += 1;
        if entry.depth > 1 {
            return Entry::Nested;
        }

        let (active_threads, slot) = tracker.add_tracker(thread::current(), now);
        entry.event_start = now;
        entry.sql_start = sql_now;
        entry.slot = slot;
        entry.tracker = Arc::downgrade(tracker);
        Entry::Outermost { active_threads }
    })
}

/// Leave `monitor` on the current thread; `Some` on the outermost exit
pub(crate) fn exit(monitor: MonitorId, tracker: &ThreadConcurrencyTracker) -> Option<Exit> {
    THREAD_ENTRIES.with(|cell| {
        let mut table = cell.borrow_mut();
        let entry = table.entries.get_mut(&monitor)?;
        if entry.depth == 0 {
            return None;
        }

        entry.depth -= 1;
        if entry.depth > 0 {
            return None;
        }

        tracker.remove_tracker(entry.slot.take());
        Some(Exit {
            event_start: entry.event_start,
            sql_start: entry.sql_start.take(),
        })
    })
}

/// Re-entrancy depth of the current thread in `monitor`
pub(crate) fn depth(monitor: MonitorId) -> u32 {
    THREAD_ENTRIES.with(|cell| {
        cell.borrow()
            .entries
            .get(&monitor)
            .map(|e| e.depth)
            .unwrap_or(0)
    })
}
