use crate::stringtable::Name;
use std::fmt;

/// Timing statistics of one call-tree node over an accounting window.
/// All times are in seconds.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeStats {
    pub total_time: f64,
    pub avg_per_instance: f64,
    pub avg_per_accounting_frame: f64,
    pub min_time: f64,
    pub max_time: f64,
    /// `total_time` minus the `total_time` of all children.
    pub self_time: f64,
    pub self_avg_per_accounting_frame: f64,
    pub instance_count: u64,
}

impl NodeStats {
    #[inline]
    pub(crate) fn accumulate(&mut self, duration: f64) {
        if self.instance_count == 0 {
            self.min_time = duration;
            self.max_time = duration;
        } else {
            self.min_time = self.min_time.min(duration);
            self.max_time = self.max_time.max(duration);
        }

        self.total_time += duration;
        self.instance_count += 1;
    }
}

/// One node of an aggregated call tree: all the events with the same name
/// under the same parent.
#[derive(Clone, Debug)]
pub struct Node {
    pub(crate) name: Name,
    pub(crate) sort_order: u64,
    pub(crate) recursion_depth: u32,
    pub(crate) stats: NodeStats,
    pub(crate) children: Vec<Box<Node>>,
    pub(crate) expanded: bool,
    pub(crate) selected: bool,
    pub(crate) frames_since_seen: u32,
}

impl Default for Node {
    fn default() -> Node {
        Node {
            name: Name::from_static(""),
            sort_order: 0,
            recursion_depth: 0,
            stats: NodeStats::default(),
            children: Vec::new(),
            expanded: true,
            selected: false,
            frames_since_seen: 0,
        }
    }
}

impl Node {
    /// Resets every field except the capacity of `children`, which must
    /// already be empty.
    pub(crate) fn reset(&mut self, name: Name, recursion_depth: u32) {
        debug_assert!(self.children.is_empty());

        self.name = name;
        self.sort_order = 0;
        self.recursion_depth = recursion_depth;
        self.stats = NodeStats::default();
        self.expanded = true;
        self.selected = false;
        self.frames_since_seen = 0;
    }

    pub fn name(&self) -> Name {
        self.name
    }

    /// Position of the node's first occurrence among its siblings within the
    /// window that produced its current statistics.
    pub fn sort_order(&self) -> u64 {
        self.sort_order
    }

    /// Depth of the node in its tree; roots have depth 0.
    pub fn recursion_depth(&self) -> u32 {
        self.recursion_depth
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    pub fn children(&self) -> impl ExactSizeIterator<Item = &Node> + '_ {
        self.children.iter().map(|child| &**child)
    }

    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children().find(|child| child.name == name)
    }

    pub fn expanded(&self) -> bool {
        self.expanded
    }

    pub fn selected(&self) -> bool {
        self.selected
    }

    /// Number of windows in a row this node has been missing from.
    pub fn frames_since_seen(&self) -> u32 {
        self.frames_since_seen
    }

    /// Depth-first search of this node and its descendants.
    pub fn find_recursive(&self, name: &str) -> Option<&Node> {
        if self.name == name {
            return Some(self);
        }

        self.children().find_map(|child| child.find_recursive(name))
    }

    pub(crate) fn find_recursive_mut(&mut self, name: &str) -> Option<&mut Node> {
        if self.name == name {
            return Some(self);
        }

        self.children
            .iter_mut()
            .find_map(|child| child.find_recursive_mut(name))
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn subtree_len(&self) -> usize {
        1 + self.children().map(Node::subtree_len).sum::<usize>()
    }
}

/// An aggregated call tree.
#[derive(Clone, Debug, Default)]
pub struct Tree {
    pub(crate) roots: Vec<Box<Node>>,
}

impl Tree {
    pub fn roots(&self) -> impl ExactSizeIterator<Item = &Node> + '_ {
        self.roots.iter().map(|root| &**root)
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Total number of nodes.
    pub fn len(&self) -> usize {
        self.roots().map(Node::subtree_len).sum()
    }

    /// Depth-first search for the first node named `name`.
    pub fn find(&self, name: &str) -> Option<&Node> {
        self.roots().find_map(|root| root.find_recursive(name))
    }

    /// Follows `path` from the roots, one name per level.
    pub fn get(&self, path: &[&str]) -> Option<&Node> {
        let (first, rest) = path.split_first()?;
        let mut node = self.roots().find(|root| root.name == *first)?;

        for name in rest {
            node = node.child(name)?;
        }

        Some(node)
    }

    pub(crate) fn get_mut(&mut self, path: &[&str]) -> Option<&mut Node> {
        let (first, rest) = path.split_first()?;
        let mut node: &mut Node = self
            .roots
            .iter_mut()
            .find(|root| root.name == *first)
            .map(|root| &mut **root)?;

        for name in rest {
            node = node
                .children
                .iter_mut()
                .find(|child| child.name == *name)
                .map(|child| &mut **child)?;
        }

        Some(node)
    }

    pub(crate) fn find_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.roots
            .iter_mut()
            .find_map(|root| root.find_recursive_mut(name))
    }
}

/// Renders the tree one node per line, indented by depth, with the
/// per-frame and per-instance averages in milliseconds.
impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write_node(f: &mut fmt::Formatter<'_>, node: &Node) -> fmt::Result {
            let indent = node.recursion_depth as usize * 2;
            let stats = &node.stats;

            writeln!(
                f,
                "{:indent$}{} {:.3} ms/frame ({} x {:.3} ms, self {:.3} ms)",
                "",
                node.name,
                stats.avg_per_accounting_frame * 1e3,
                stats.instance_count,
                stats.avg_per_instance * 1e3,
                stats.self_avg_per_accounting_frame * 1e3,
                indent = indent
            )?;

            for child in node.children() {
                write_node(f, child)?;
            }

            Ok(())
        }

        for root in self.roots() {
            write_node(f, root)?;
        }

        Ok(())
    }
}

/// Recycles the nodes released by a view.
#[derive(Debug)]
pub(crate) struct NodePool {
    free: Vec<Box<Node>>,
    capacity: usize,
}

impl NodePool {
    pub(crate) fn new(capacity: usize) -> NodePool {
        NodePool {
            free: Vec::new(),
            capacity,
        }
    }

    pub(crate) fn allocate(&mut self, name: Name, recursion_depth: u32) -> Box<Node> {
        let mut node = self.free.pop().unwrap_or_default();
        node.reset(name, recursion_depth);
        node
    }

    /// Returns `node` and its whole subtree to the pool. Nodes beyond the
    /// pool's capacity are freed.
    pub(crate) fn release(&mut self, mut node: Box<Node>) {
        while let Some(child) = node.children.pop() {
            self.release(child);
        }

        if self.free.len() < self.capacity {
            self.free.push(node);
        }
    }

    pub(crate) fn release_all(&mut self, nodes: &mut Vec<Box<Node>>) {
        for node in nodes.drain(..) {
            self.release(node);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.free.len()
    }
}
