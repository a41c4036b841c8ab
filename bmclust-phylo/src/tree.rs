//! Core phylogenetic tree data structures.
//!
//! Uses arena-style storage: nodes live in a flat `Vec<Node>` and are
//! referenced by `NodeId` (a `usize` index). Topology is fixed once built;
//! the estimators in this crate only rewrite branch lengths.

use bmclust_core::{BmclustError, Result, Summarizable};

/// Index into the tree's node arena.
pub type NodeId = usize;

/// A single node in a phylogenetic tree.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Node {
    /// Index of this node in the arena.
    pub id: NodeId,
    /// Parent node (None for root).
    pub parent: Option<NodeId>,
    /// Child nodes.
    pub children: Vec<NodeId>,
    /// Branch length from this node to its parent.
    pub branch_length: Option<f64>,
    /// Taxon or clade label.
    pub name: Option<String>,
    /// Set on tips that represent a directly sampled ancestor.
    pub is_ancestor: bool,
}

impl Node {
    /// True if this node has no children.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// True if this node has no parent.
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// True if this node has both parent and children.
    pub fn is_internal(&self) -> bool {
        !self.is_leaf() && !self.is_root()
    }

    /// A sampled ancestor that has no descendants of its own.
    pub fn is_childless_ancestor(&self) -> bool {
        self.is_ancestor && self.is_leaf()
    }
}

/// A rooted phylogenetic tree stored as an arena of nodes.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PhyloTree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl PhyloTree {
    /// Create a new tree with a single unnamed root node.
    pub fn new() -> Self {
        let root = Node {
            id: 0,
            parent: None,
            children: Vec::new(),
            branch_length: None,
            name: None,
            is_ancestor: false,
        };
        Self {
            nodes: vec![root],
            root: 0,
        }
    }

    /// Create a tree from pre-built nodes and a root index.
    ///
    /// This is used by the Newick parser.
    pub fn from_nodes(nodes: Vec<Node>, root: NodeId) -> Result<Self> {
        if nodes.is_empty() {
            return Err(BmclustError::InvalidInput("empty node list".into()));
        }
        if root >= nodes.len() {
            return Err(BmclustError::InvalidInput(format!(
                "root index {} out of range ({})",
                root,
                nodes.len()
            )));
        }
        Ok(Self { nodes, root })
    }

    /// Add a child to `parent` and return its `NodeId`.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        name: Option<String>,
        branch_length: Option<f64>,
    ) -> Result<NodeId> {
        if parent >= self.nodes.len() {
            return Err(BmclustError::InvalidInput(format!(
                "parent index {} out of range ({})",
                parent,
                self.nodes.len()
            )));
        }
        let id = self.nodes.len();
        self.nodes.push(Node {
            id,
            parent: Some(parent),
            children: Vec::new(),
            branch_length,
            name,
            is_ancestor: false,
        });
        self.nodes[parent].children.push(id);
        Ok(id)
    }

    /// Access a node by id.
    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Mutable access to a node by id.
    pub fn get_node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    /// Arena index access for ids already known to be valid.
    pub(crate) fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// The root node id.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Total number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of leaf nodes.
    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// All leaf node ids.
    pub fn leaves(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.is_leaf())
            .map(|n| n.id)
            .collect()
    }

    /// Children of `id`, or an empty slice for unknown ids.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(id)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    /// The other children of `id`'s parent.
    pub fn siblings(&self, id: NodeId) -> Vec<NodeId> {
        match self.nodes.get(id).and_then(|n| n.parent) {
            Some(p) => self.nodes[p]
                .children
                .iter()
                .copied()
                .filter(|&c| c != id)
                .collect(),
            None => Vec::new(),
        }
    }

    /// The single sibling of `id` under a bifurcating parent.
    pub fn sibling(&self, id: NodeId) -> Option<NodeId> {
        match self.siblings(id).as_slice() {
            [s] => Some(*s),
            _ => None,
        }
    }

    /// Flag every zero-length leaf as a sampled ancestor.
    ///
    /// Returns the number of leaves flagged.
    pub fn mark_sampled_ancestors(&mut self) -> usize {
        let mut marked = 0;
        for node in self.nodes.iter_mut() {
            if node.is_leaf() && !node.is_root() && node.branch_length == Some(0.0) {
                node.is_ancestor = true;
                marked += 1;
            }
        }
        marked
    }

    /// Pre-order (parent before children) traversal yielding node ids.
    pub fn iter_preorder(&self) -> PreorderIter<'_> {
        PreorderIter {
            tree: self,
            stack: vec![self.root],
        }
    }

    /// Post-order (children before parent) traversal yielding node ids.
    pub fn iter_postorder(&self) -> PostorderIter {
        // Build postorder sequence by reversing a modified preorder
        // (visit right children first, then reverse the whole thing).
        let mut result = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            result.push(id);
            for &child in &self.nodes[id].children {
                stack.push(child);
            }
        }
        result.reverse();
        PostorderIter {
            sequence: result,
            pos: 0,
        }
    }

    /// Sorted list of leaf names (leaves without names are excluded).
    pub fn leaf_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .nodes
            .iter()
            .filter(|n| n.is_leaf())
            .filter_map(|n| n.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Parse a Newick format string into a tree.
    pub fn from_newick(input: &str) -> Result<Self> {
        crate::newick::parse(input)
    }

    /// Serialize the tree to a Newick format string.
    pub fn to_newick(&self) -> String {
        crate::newick::write(self)
    }
}

impl Default for PhyloTree {
    fn default() -> Self {
        Self::new()
    }
}

impl Summarizable for PhyloTree {
    fn summary(&self) -> String {
        let leaves = self.leaf_count();
        let internal = self.node_count() - leaves;
        format!(
            "PhyloTree: {} nodes ({} leaves, {} internal)",
            self.node_count(),
            leaves,
            internal
        )
    }
}

/// Pre-order iterator over node ids.
pub struct PreorderIter<'a> {
    tree: &'a PhyloTree,
    stack: Vec<NodeId>,
}

impl<'a> Iterator for PreorderIter<'a> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        // Push children in reverse order so leftmost is visited first.
        for &child in self.tree.nodes[id].children.iter().rev() {
            self.stack.push(child);
        }
        Some(id)
    }
}

/// Post-order iterator over node ids.
pub struct PostorderIter {
    sequence: Vec<NodeId>,
    pos: usize,
}

impl Iterator for PostorderIter {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = *self.sequence.get(self.pos)?;
        self.pos += 1;
        Some(id)
    }
}
