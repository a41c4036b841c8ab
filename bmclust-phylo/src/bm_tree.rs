//! A fixed topology bound to tip trait data, ready for branch-length
//! estimation.
//!
//! [`BmTree`] validates the shape once (every non-root internal node is
//! bifurcating, the root has two or three children), classifies the root
//! into a [`RootShape`], caches both traversal orders and keeps each tip's
//! trait vector keyed by its arena index.

use bmclust_core::{BmclustError, Result, Summarizable};
use tracing::warn;

use crate::characters::TraitMatrix;
use crate::newick;
use crate::tree::{NodeId, PhyloTree};

/// Root arity classes. Each one has its own top-down and finalize rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RootShape {
    /// Three root children: the root is an ordinary tritomy.
    Unrooted,
    /// Two internal root children. Only their summed length is identifiable.
    Rooted,
    /// Two root children, at least one a pendant tip. Estimates around the
    /// root are approximate.
    DegenerateSingleTip,
}

impl RootShape {
    /// Classify the root of `tree`.
    pub fn classify(tree: &PhyloTree) -> Result<Self> {
        let children = tree.children(tree.root());
        match children.len() {
            3 => Ok(Self::Unrooted),
            2 if children.iter().all(|&c| !tree.children(c).is_empty()) => Ok(Self::Rooted),
            2 => Ok(Self::DegenerateSingleTip),
            n => Err(BmclustError::Topology(format!(
                "root has {} children, expected 2 or 3",
                n
            ))),
        }
    }
}

/// Topology plus tip data for one estimation problem.
#[derive(Debug, Clone)]
pub struct BmTree {
    tree: PhyloTree,
    shape: RootShape,
    preorder: Vec<NodeId>,
    postorder: Vec<NodeId>,
    tip_values: Vec<Vec<f64>>,
    n_sites: usize,
}

impl BmTree {
    /// Bind `traits` to the leaves of `tree` by name.
    ///
    /// # Errors
    ///
    /// `Topology` if a non-root internal node is not bifurcating or the root
    /// has neither 2 nor 3 children; `InvalidInput` if a leaf is unnamed,
    /// two leaves share a name, a name is missing from the matrix, or the
    /// matrix has no sites.
    pub fn new(tree: PhyloTree, traits: &TraitMatrix) -> Result<Self> {
        let shape = RootShape::classify(&tree)?;

        for id in tree.iter_preorder() {
            let arity = tree.children(id).len();
            if tree.node(id).is_internal() && arity != 2 {
                return Err(BmclustError::Topology(format!(
                    "internal node {} has {} children, expected 2",
                    id, arity
                )));
            }
        }

        let names = tree.leaf_names();
        if let Some(dup) = names.windows(2).find(|w| w[0] == w[1]) {
            return Err(BmclustError::InvalidInput(format!(
                "taxon '{}' labels more than one leaf",
                dup[0]
            )));
        }

        if traits.n_sites() == 0 {
            return Err(BmclustError::InvalidInput("trait matrix is empty".into()));
        }

        let mut tip_values = vec![Vec::new(); tree.node_count()];
        for leaf in tree.leaves() {
            let name = tree.node(leaf).name.as_deref().ok_or_else(|| {
                BmclustError::InvalidInput(format!("leaf {} has no name", leaf))
            })?;
            let values = traits.get(name).ok_or_else(|| {
                BmclustError::InvalidInput(format!("no trait values for taxon '{}'", name))
            })?;
            tip_values[leaf] = values.to_vec();
        }

        if shape == RootShape::DegenerateSingleTip {
            warn!(
                "root has a pendant tip child; branch lengths next to the root \
                 are folded and halved and should be treated as approximate"
            );
        }

        let preorder = tree.iter_preorder().collect();
        let postorder = tree.iter_postorder().collect();
        Ok(Self {
            tree,
            shape,
            preorder,
            postorder,
            tip_values,
            n_sites: traits.n_sites(),
        })
    }

    /// Parse `newick` and bind `traits` in one step.
    pub fn from_newick(newick: &str, traits: &TraitMatrix) -> Result<Self> {
        Self::new(PhyloTree::from_newick(newick)?, traits)
    }

    pub fn tree(&self) -> &PhyloTree {
        &self.tree
    }

    pub fn shape(&self) -> RootShape {
        self.shape
    }

    pub fn root(&self) -> NodeId {
        self.tree.root()
    }

    pub fn preorder(&self) -> &[NodeId] {
        &self.preorder
    }

    pub fn postorder(&self) -> &[NodeId] {
        &self.postorder
    }

    pub fn node_count(&self) -> usize {
        self.tree.node_count()
    }

    pub fn n_sites(&self) -> usize {
        self.n_sites
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.tree.children(id)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.tree.node(id).parent
    }

    /// Sibling under a bifurcating parent.
    pub fn sibling(&self, id: NodeId) -> Option<NodeId> {
        self.tree.sibling(id)
    }

    pub fn is_leaf(&self, id: NodeId) -> bool {
        self.tree.children(id).is_empty()
    }

    /// Trait vector of a tip; empty for internal nodes.
    pub fn tip_values(&self, id: NodeId) -> &[f64] {
        &self.tip_values[id]
    }

    /// True for a tip flagged as a sampled ancestor.
    pub fn is_childless_ancestor(&self, id: NodeId) -> bool {
        self.tree.node(id).is_childless_ancestor()
    }

    /// Branch lengths currently stored on the nodes, indexed by `NodeId`.
    ///
    /// Missing lengths read as `fallback`. The root entry is always 0.
    pub fn branch_lengths(&self, fallback: f64) -> Vec<f64> {
        let root = self.root();
        (0..self.node_count())
            .map(|id| {
                if id == root {
                    0.0
                } else {
                    self.tree.node(id).branch_length.unwrap_or(fallback)
                }
            })
            .collect()
    }

    /// Write `lengths` back onto every non-root node.
    pub fn set_branch_lengths(&mut self, lengths: &[f64]) -> Result<()> {
        if lengths.len() != self.node_count() {
            return Err(BmclustError::InvalidInput(format!(
                "expected {} branch lengths, got {}",
                self.node_count(),
                lengths.len()
            )));
        }
        let root = self.root();
        for (id, &len) in lengths.iter().enumerate() {
            if id != root {
                if let Some(node) = self.tree.get_node_mut(id) {
                    node.branch_length = Some(len);
                }
            }
        }
        Ok(())
    }

    /// Number of non-root edges.
    pub fn edge_count(&self) -> usize {
        self.node_count() - 1
    }

    /// Newick string of the topology carrying `lengths`.
    pub fn newick_with_lengths(&self, lengths: &[f64]) -> Result<String> {
        newick::write_with_lengths(&self.tree, lengths)
    }
}

impl Summarizable for BmTree {
    fn summary(&self) -> String {
        format!(
            "BmTree: {} tips, {} sites, {:?} root",
            self.tree.leaf_count(),
            self.n_sites,
            self.shape
        )
    }
}
