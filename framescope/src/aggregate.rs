//! Turning flat event sequences into call trees.
//!
//! Events carry a depth but no parent link, so the builder keeps the path of
//! the currently active node for every open depth level: an event at depth
//! `d` becomes (or merges into) a child of the node at `path[d - 1]`.

use crate::event::Event;
use crate::node::{Node, NodePool, Tree};
use smallvec::SmallVec;

/// Aggregates events into a fresh call tree over one accounting window.
#[derive(Debug)]
pub struct TreeBuilder {
    roots: Vec<Box<Node>>,
    // Index of the active node at each depth, starting from `roots`.
    path: SmallVec<[usize; 32]>,
    next_sort_order: u64,
    max_depth: usize,
    pool: NodePool,
}

impl TreeBuilder {
    pub fn new(max_depth: usize, pool_capacity: usize) -> TreeBuilder {
        TreeBuilder {
            roots: Vec::new(),
            path: SmallVec::new(),
            next_sort_order: 0,
            max_depth,
            pool: NodePool::new(pool_capacity),
        }
    }

    /// Adds one batch of events.
    ///
    /// The events must be in begin order, parents before their children,
    /// and every batch must start at depth 0 (which is what recorders
    /// produce: they only flush with no scope open).
    pub fn ingest(&mut self, events: &[Event]) {
        self.path.clear();

        for event in events {
            let depth = event.depth as usize;

            if depth >= self.max_depth {
                warn_rate_limited!(
                    "skipping `{}`: depth {} exceeds the maximum tree depth of {}",
                    event.name,
                    depth,
                    self.max_depth
                );
                continue;
            }

            if depth > self.path.len() {
                warn_rate_limited!(
                    "`{}` at depth {} has no parent at depth {}, attaching it at depth {}",
                    event.name,
                    depth,
                    depth - 1,
                    self.path.len()
                );
            }

            self.path.truncate(depth);

            let recursion_depth = self.path.len() as u32;
            let siblings = children_at(&mut self.roots, &self.path);

            let index = match siblings.iter().position(|node| node.name == event.name) {
                Some(index) => index,
                None => {
                    let mut node = self.pool.allocate(event.name, recursion_depth);
                    node.sort_order = self.next_sort_order;
                    self.next_sort_order += 1;
                    siblings.push(node);
                    siblings.len() - 1
                }
            };

            siblings[index].stats.accumulate(event.duration());
            self.path.push(index);
        }
    }

    /// Whether anything has been ingested since the last `finish`.
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Computes the derived statistics over `frames` accounting frames and
    /// returns the finished tree, leaving the builder empty.
    pub fn finish(&mut self, frames: u32) -> Tree {
        let frames = frames.max(1) as f64;

        for root in &mut self.roots {
            finalize(root, frames);
        }
        self.roots.sort_by_key(|node| node.sort_order);

        self.path.clear();
        self.next_sort_order = 0;

        Tree {
            roots: std::mem::take(&mut self.roots),
        }
    }

    /// Discards everything ingested since the last `finish`.
    pub fn reset(&mut self) {
        self.pool.release_all(&mut self.roots);
        self.path.clear();
        self.next_sort_order = 0;
    }

    pub(crate) fn pool_mut(&mut self) -> &mut NodePool {
        &mut self.pool
    }

    pub(crate) fn pooled_nodes(&self) -> usize {
        self.pool.len()
    }
}

fn children_at<'a>(roots: &'a mut Vec<Box<Node>>, path: &[usize]) -> &'a mut Vec<Box<Node>> {
    let mut children = roots;
    for &index in path {
        children = &mut children[index].children;
    }
    children
}

fn finalize(node: &mut Node, frames: f64) {
    let mut children_total = 0.0;
    let mut children_avg = 0.0;

    for child in &mut node.children {
        finalize(child, frames);
        children_total += child.stats.total_time;
        children_avg += child.stats.avg_per_accounting_frame;
    }

    node.children.sort_by_key(|child| child.sort_order);

    let stats = &mut node.stats;
    stats.avg_per_instance = if stats.instance_count > 0 {
        stats.total_time / stats.instance_count as f64
    } else {
        0.0
    };
    stats.avg_per_accounting_frame = stats.total_time / frames;
    stats.self_time = stats.total_time - children_total;
    stats.self_avg_per_accounting_frame = stats.avg_per_accounting_frame - children_avg;
}

/// Merges a freshly finished window into the displayed siblings.
///
/// Matched nodes take the fresh statistics but keep their viewer state,
/// new nodes are grafted in, and nodes missing from the window age by one
/// frame and are released once they have been missing for more than
/// `keep_alive_frames` windows.
pub(crate) fn merge(
    displayed: &mut Vec<Box<Node>>,
    fresh: Vec<Box<Node>>,
    pool: &mut NodePool,
    keep_alive_frames: u32,
) {
    let mut seen: SmallVec<[bool; 16]> = SmallVec::from_elem(false, displayed.len());

    for mut fresh_node in fresh {
        match displayed.iter().position(|node| node.name == fresh_node.name) {
            Some(index) => {
                seen[index] = true;

                let node = &mut displayed[index];
                node.stats = fresh_node.stats.clone();
                node.sort_order = fresh_node.sort_order;
                node.recursion_depth = fresh_node.recursion_depth;
                node.frames_since_seen = 0;

                let fresh_children = std::mem::take(&mut fresh_node.children);
                merge(&mut node.children, fresh_children, pool, keep_alive_frames);
                pool.release(fresh_node);
            }
            None => {
                displayed.push(fresh_node);
                seen.push(true);
            }
        }
    }

    let mut index = 0;
    while index < displayed.len() {
        if !seen[index] && !age(&mut displayed[index], pool, keep_alive_frames) {
            pool.release(displayed.remove(index));
            seen.remove(index);
            continue;
        }
        index += 1;
    }

    // Nodes that were seen in this window come first, in first-seen order.
    displayed.sort_by_key(|node| (node.frames_since_seen > 0, node.sort_order));
}

/// Marks `node` and its subtree as missing for one more window. Returns
/// `false` if `node` itself should be evicted.
fn age(node: &mut Node, pool: &mut NodePool, keep_alive_frames: u32) -> bool {
    node.frames_since_seen += 1;
    node.stats = Default::default();

    let mut index = 0;
    while index < node.children.len() {
        if !age(&mut node.children[index], pool, keep_alive_frames) {
            pool.release(node.children.remove(index));
            continue;
        }
        index += 1;
    }

    node.frames_since_seen <= keep_alive_frames
}

/// Aggregates `events` (one recorder's events, in begin order) into a call
/// tree, averaging over `frames` accounting frames.
pub fn aggregate_events(events: &[Event], frames: u32) -> Tree {
    let mut builder = TreeBuilder::new(usize::MAX, 0);
    builder.ingest(events);
    builder.finish(frames)
}
