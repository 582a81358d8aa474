/*!
 * Thread Trace Data
 *
 * `TraceTree` is the mutable arena a trace is built in while it runs;
 * `ThreadTraceData` is the immutable tree handed to appenders or requesters.
 */

use crate::core::id::CHECKPOINT_IDS;
use crate::core::{CheckpointId, Millis};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Identifies one checkpoint across the start/stop boundary
///
/// Matched by ID, not by name, so the same monitor entered twice on one
/// thread yields distinct checkpoints.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UniqueTraceKey {
    name: Arc<str>,
    id: CheckpointId,
}

impl UniqueTraceKey {
    pub fn new(name: Arc<str>) -> Self {
        Self {
            name,
            id: CHECKPOINT_IDS.next(),
        }
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn id(&self) -> CheckpointId {
        self.id
    }
}

/// One captured checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceElement {
    pub name: Arc<str>,
    pub start: Millis,
    pub end: Millis,
    pub children: Vec<TraceElement>,
}

impl TraceElement {
    pub fn duration(&self) -> Millis {
        (self.end - self.start).max(0)
    }

    /// Number of elements in this subtree, including self
    pub fn element_count(&self) -> usize {
        1 + self.children.iter().map(TraceElement::element_count).sum::<usize>()
    }

    pub fn find(&self, name: &str) -> Option<&TraceElement> {
        if &*self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }
}

/// Completed thread trace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadTraceData {
    pub thread_name: Option<String>,
    /// Checkpoint limit was hit; the tree is truncated
    pub overflow: bool,
    /// Checkpoints counted but not materialized (overflow or depth limit)
    pub ignored_checkpoints: u64,
    pub root: TraceElement,
}

impl ThreadTraceData {
    pub fn monitor_name(&self) -> &str {
        &self.root.name
    }

    pub fn duration(&self) -> Millis {
        self.root.duration()
    }
}

#[derive(Debug)]
struct TraceNode {
    key: CheckpointId,
    name: Arc<str>,
    start: Millis,
    end: Option<Millis>,
    depth: u32,
    parent: Option<usize>,
    children: Vec<usize>,
}

/// Arena-backed trace under construction
#[derive(Debug)]
pub(crate) struct TraceTree {
    nodes: Vec<TraceNode>,
    /// Open checkpoints, innermost last
    open: Vec<usize>,
    max_elements: usize,
    max_depth: u32,
    overflow: bool,
    ignored_total: u64,
}

impl TraceTree {
    pub(crate) fn new(root: &UniqueTraceKey, now: Millis, max_elements: usize, max_depth: u32) -> Self {
        Self {
            nodes: vec![TraceNode {
                key: root.id,
                name: Arc::clone(&root.name),
                start: now,
                end: None,
                depth: 0,
                parent: None,
                children: Vec::new(),
            }],
            open: vec![0],
            max_elements: max_elements.max(1),
            max_depth,
            overflow: false,
            ignored_total: 0,
        }
    }

    pub(crate) fn root_key(&self) -> CheckpointId {
        self.nodes[0].key
    }

    #[cfg(test)]
    pub(crate) fn is_overflow(&self) -> bool {
        self.overflow
    }

    pub(crate) fn enter(&mut self, key: &UniqueTraceKey, now: Millis) {
        let parent = self.open.last().copied().unwrap_or(0);
        let depth = self.nodes[parent].depth + 1;

        if self.nodes.len() >= self.max_elements {
            self.overflow = true;
            self.ignored_total += 1;
            return;
        }
        if self.max_depth > 0 && depth > self.max_depth {
            self.ignored_total += 1;
            return;
        }

        let index = self.nodes.len();
        self.nodes.push(TraceNode {
            key: key.id,
            name: Arc::clone(&key.name),
            start: now,
            end: None,
            depth,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent].children.push(index);
        self.open.push(index);
    }

    /// Close a checkpoint. Checkpoints still open above it are mis-nested;
    /// its direct open children move up to its parent so they are not lost.
    /// Ignored checkpoints were never materialized, so their keys are not found.
    pub(crate) fn exit(&mut self, key: &UniqueTraceKey, now: Millis) {
        let Some(pos) = self.open.iter().rposition(|&i| self.nodes[i].key == key.id) else {
            return;
        };

        let index = self.open.remove(pos);
        self.nodes[index].end = Some(now);

        let orphans: Vec<usize> = self.open[pos..]
            .iter()
            .copied()
            .filter(|&i| self.nodes[i].parent == Some(index))
            .collect();
        if orphans.is_empty() {
            return;
        }

        let Some(grandparent) = self.nodes[index].parent else {
            return;
        };
        for orphan in orphans {
            self.nodes[index].children.retain(|&c| c != orphan);
            self.nodes[grandparent].children.push(orphan);
            self.nodes[orphan].parent = Some(grandparent);
            self.nodes[orphan].depth = self.nodes[grandparent].depth + 1;
        }
    }

    /// Close the root, ending any checkpoints left open, and build the output tree
    pub(crate) fn finish(mut self, now: Millis, thread_name: Option<String>) -> ThreadTraceData {
        for node in self.nodes.iter_mut() {
            if node.end.is_none() {
                node.end = Some(now);
            }
        }
        ThreadTraceData {
            thread_name,
            overflow: self.overflow,
            ignored_checkpoints: self.ignored_total,
            root: self.build(0),
        }
    }

    fn build(&self, index: usize) -> TraceElement {
        let node = &self.nodes[index];
        TraceElement {
            name: Arc::clone(&node.name),
            start: node.start,
            end: node.end.unwrap_or(node.start),
            children: node.children.iter().map(|&c| self.build(c)).collect(),
        }
    }
}
