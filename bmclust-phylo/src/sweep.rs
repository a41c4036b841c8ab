//! One EM pass over a fixed topology.
//!
//! A sweep takes the current branch lengths and returns refined ones:
//!
//! 1. **Bottom-up.** In post-order every internal node gets the
//!    precision-weighted mean of its two children's values and a pruned
//!    length `1/(1/a + 1/b)`, where `a` and `b` are each child's branch
//!    length plus its own pruned length. Tips have pruned length 0.
//! 2. **Top-down.** In pre-order every non-root internal node combines the
//!    two sources of information from outside its subtree into an upward
//!    message, then re-estimates the three branches around it with
//!    [`tritomy::estimate`].
//! 3. **Root.** The root is finalized according to its [`RootShape`].
//!
//! All per-node values live in a [`Messages`] snapshot indexed by `NodeId`;
//! the tree itself is never mutated.

use bmclust_core::{BmclustError, Result};

use crate::bm_tree::{BmTree, RootShape};
use crate::tree::NodeId;
use crate::tritomy::{self, Neighbor, MIN_BRANCH_LENGTH};
use crate::weights::ActiveSites;

/// Bottom-up and top-down state for one sweep.
#[derive(Debug, Clone)]
pub struct Messages {
    /// Expected trait values at each node given its subtree.
    pub down: Vec<Vec<f64>>,
    /// Pruned length of each node's subtree (0 for tips).
    pub prune: Vec<f64>,
    /// Expected trait values at each node's parent given everything outside
    /// the node's subtree. Only filled for non-root internal nodes.
    pub up: Vec<Vec<f64>>,
    /// Variance attached to `up`.
    pub up_prune: Vec<f64>,
}

impl Messages {
    /// Run the bottom-up pass.
    pub fn downward(tree: &BmTree, lengths: &[f64]) -> Result<Self> {
        let n = tree.node_count();
        let mut down = vec![Vec::new(); n];
        let mut prune = vec![0.0; n];
        let root = tree.root();

        for &id in tree.postorder() {
            if tree.is_leaf(id) {
                down[id] = tree.tip_values(id).to_vec();
                continue;
            }
            if id == root && tree.shape() == RootShape::Unrooted {
                // The three root children are consumed directly.
                continue;
            }
            let (a, b) = pair(tree.children(id))?;
            let (values, len) = combine(
                (&down[a], lengths[a] + prune[a]),
                (&down[b], lengths[b] + prune[b]),
            )?;
            down[id] = values;
            prune[id] = len;
        }

        Ok(Self {
            down,
            prune,
            up: vec![Vec::new(); n],
            up_prune: vec![0.0; n],
        })
    }

    fn neighbor<'a>(&'a self, tree: &BmTree, id: NodeId) -> Neighbor<'a> {
        Neighbor::new(&self.down[id], self.prune[id]).ancestor(tree.is_childless_ancestor(id))
    }

    /// Value and total variance seen from across the branch above `id`.
    fn source(&self, lengths: &[f64], id: NodeId) -> (&[f64], f64) {
        (&self.down[id], lengths[id] + self.prune[id])
    }
}

/// Precision-weighted mean of two value vectors and their combined variance.
pub fn combine(a: (&[f64], f64), b: (&[f64], f64)) -> Result<(Vec<f64>, f64)> {
    let ((xa, va), (xb, vb)) = (a, b);
    if !(va > 0.0 && vb > 0.0) {
        return Err(BmclustError::Numerical(format!(
            "non-positive pruned length ({}, {})",
            va, vb
        )));
    }
    let (wa, wb) = (1.0 / va, 1.0 / vb);
    let total = wa + wb;
    let values = xa
        .iter()
        .zip(xb)
        .map(|(p, q)| (p * wa + q * wb) / total)
        .collect();
    Ok((values, 1.0 / total))
}

/// Run one EM iteration and return the refined lengths.
///
/// `lengths` is indexed by `NodeId`; the root entry is ignored and returned
/// unchanged.
///
/// # Errors
///
/// `InvalidInput` on a length vector of the wrong size, `Numerical` if a
/// pruned length is not positive or an estimate is NaN. Nothing is
/// returned on error.
pub fn sweep(tree: &BmTree, lengths: &[f64], sites: &ActiveSites) -> Result<Vec<f64>> {
    if lengths.len() != tree.node_count() {
        return Err(BmclustError::InvalidInput(format!(
            "expected {} branch lengths, got {}",
            tree.node_count(),
            lengths.len()
        )));
    }
    let root = tree.root();
    let mut next = lengths.to_vec();
    let mut messages = Messages::downward(tree, &next)?;

    for &id in tree.preorder() {
        if id == root || tree.is_leaf(id) {
            continue;
        }
        let (up, up_prune) = upward(tree, &next, &messages, id)?;
        let (a, b) = pair(tree.children(id))?;
        let estimate = tritomy::estimate(
            &[
                messages.neighbor(tree, a),
                messages.neighbor(tree, b),
                Neighbor::new(&up, up_prune),
            ],
            sites,
        )?;
        next[a] = estimate[0];
        next[b] = estimate[1];
        next[id] = estimate[2];
        messages.up[id] = up;
        messages.up_prune[id] = up_prune;
    }

    finalize_root(tree, &mut next, sites)?;
    Ok(next)
}

/// The upward message for a non-root internal node.
fn upward(
    tree: &BmTree,
    lengths: &[f64],
    messages: &Messages,
    id: NodeId,
) -> Result<(Vec<f64>, f64)> {
    let root = tree.root();
    let parent = tree
        .parent(id)
        .ok_or_else(|| BmclustError::Topology(format!("node {} has no parent", id)))?;

    if parent != root {
        let sibling = sibling_of(tree, id)?;
        return combine(
            messages.source(lengths, sibling),
            (&messages.up[parent], lengths[parent] + messages.up_prune[parent]),
        );
    }

    match tree.shape() {
        RootShape::Unrooted => {
            let others: Vec<NodeId> = tree
                .children(root)
                .iter()
                .copied()
                .filter(|&c| c != id)
                .collect();
            let (a, b) = pair(&others)?;
            combine(messages.source(lengths, a), messages.source(lengths, b))
        }
        RootShape::Rooted => {
            // The root is not a node of the unrooted tree: both root
            // branches form one edge, so the sibling's length is folded in.
            let sibling = sibling_of(tree, id)?;
            let (g1, g2) = pair(tree.children(sibling))?;
            let (values, prune) =
                combine(messages.source(lengths, g1), messages.source(lengths, g2))?;
            Ok((values, prune + lengths[sibling]))
        }
        RootShape::DegenerateSingleTip => {
            let pendant = sibling_of(tree, id)?;
            let (values, variance) = messages.source(lengths, pendant);
            Ok((values.to_vec(), variance))
        }
    }
}

fn finalize_root(tree: &BmTree, lengths: &mut [f64], sites: &ActiveSites) -> Result<()> {
    let root = tree.root();
    let children = tree.children(root);
    match tree.shape() {
        RootShape::Unrooted => {
            let messages = Messages::downward(tree, lengths)?;
            let &[a, b, c] = children else {
                return Err(BmclustError::Topology("unrooted root needs 3 children".into()));
            };
            let estimate = tritomy::estimate(
                &[
                    messages.neighbor(tree, a),
                    messages.neighbor(tree, b),
                    messages.neighbor(tree, c),
                ],
                sites,
            )?;
            lengths[a] = estimate[0];
            lengths[b] = estimate[1];
            lengths[c] = estimate[2];
        }
        RootShape::Rooted => {
            let (a, b) = pair(children)?;
            let mean = (lengths[a] + lengths[b]) / 2.0;
            lengths[a] = mean;
            lengths[b] = mean;
        }
        RootShape::DegenerateSingleTip => {
            let (a, b) = pair(children)?;
            let (pendant, other) = if tree.is_childless_ancestor(b) || !tree.is_leaf(a) {
                (b, a)
            } else {
                (a, b)
            };
            if tree.is_leaf(other) {
                // Two tips: the only identifiable quantity is their distance.
                let (xa, xb) = (tree.tip_values(pendant), tree.tip_values(other));
                lengths[other] = sites.mean_of(|i| (xa[i] - xb[i]).powi(2));
            } else {
                lengths[other] += lengths[pendant];
            }
            if tree.is_childless_ancestor(pendant) {
                // A sampled ancestor sits on the root; the sibling keeps the total.
                lengths[pendant] = MIN_BRANCH_LENGTH;
                lengths[other] = lengths[other].max(MIN_BRANCH_LENGTH);
            } else {
                let half = (lengths[other] / 2.0).max(MIN_BRANCH_LENGTH);
                lengths[pendant] = half;
                lengths[other] = half;
            }
        }
    }
    Ok(())
}

fn pair(ids: &[NodeId]) -> Result<(NodeId, NodeId)> {
    match *ids {
        [a, b] => Ok((a, b)),
        _ => Err(BmclustError::Topology(format!(
            "expected a bifurcation, found {} children",
            ids.len()
        ))),
    }
}

fn sibling_of(tree: &BmTree, id: NodeId) -> Result<NodeId> {
    tree.sibling(id)
        .ok_or_else(|| BmclustError::Topology(format!("node {} has no unique sibling", id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::characters::TraitMatrix;
    use crate::simulation::simulate_traits;
    use crate::tree::PhyloTree;
    use crate::weights::SiteWeights;

    fn converge(tree: &BmTree, start: Vec<f64>, iterations: usize) -> Vec<f64> {
        let sites = SiteWeights::all(tree.n_sites()).active();
        let mut lengths = start;
        for _ in 0..iterations {
            lengths = sweep(tree, &lengths, &sites).unwrap();
        }
        lengths
    }

    fn simulated(newick: &str, n_sites: usize, seed: u64) -> BmTree {
        let tree = PhyloTree::from_newick(newick).unwrap();
        let traits = simulate_traits(&tree, n_sites, seed).unwrap();
        BmTree::new(tree, &traits).unwrap()
    }

    #[test]
    fn cherry_prune_length_is_harmonic() {
        let traits =
            TraitMatrix::from_rows([("A", vec![1.0]), ("B", vec![5.0]), ("C", vec![0.0])])
                .unwrap();
        let tree = BmTree::from_newick("((A,B),C,D);", &traits.clone());
        assert!(tree.is_err(), "D has no data");

        let tree = BmTree::from_newick("((A,B),C);", &traits).unwrap();
        // ids: root 0, AB 1, A 2, B 3, C 4
        let lengths = vec![0.0, 0.5, 1.0, 3.0, 2.0];
        let messages = Messages::downward(&tree, &lengths).unwrap();
        assert!((messages.prune[1] - 0.75).abs() < 1e-12);
        assert_eq!(messages.prune[2], 0.0);
        // (1/1 + 5/3) / (1 + 1/3) = 2
        assert!((messages.down[1][0] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn zero_pruned_length_is_fatal() {
        let traits =
            TraitMatrix::from_rows([("A", vec![1.0]), ("B", vec![5.0]), ("C", vec![0.0])])
                .unwrap();
        let tree = BmTree::from_newick("((A,B),C);", &traits).unwrap();
        let err = Messages::downward(&tree, &[0.0, 0.5, 0.0, 1.0, 1.0]).unwrap_err();
        assert!(matches!(err, BmclustError::Numerical(_)));
    }

    #[test]
    fn three_taxon_star_is_solved_in_one_sweep() {
        let traits = TraitMatrix::from_rows([
            ("A", vec![1.0, 2.0, 0.5]),
            ("B", vec![0.0, 1.0, 1.5]),
            ("C", vec![3.0, -1.0, 2.0]),
        ])
        .unwrap();
        let tree = BmTree::from_newick("(A,B,C);", &traits).unwrap();
        let sites = SiteWeights::all(3).active();
        let once = sweep(&tree, &[0.0, 0.3, 0.3, 0.3], &sites).unwrap();
        assert!((once[1] - 2.5 / 3.0).abs() < 1e-12);
        assert!((once[2] - 0.5 / 3.0).abs() < 1e-12);
        assert!((once[3] - 12.75 / 3.0).abs() < 1e-12);
        let twice = sweep(&tree, &once, &sites).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn converged_unrooted_tree_is_a_fixed_point() {
        let tree = simulated("((A:0.3,B:0.2):0.4,(C:0.1,D:0.6):0.2,E:0.5);", 200, 7);
        let start = vec![0.5; tree.node_count()];
        let converged = converge(&tree, start, 2000);
        let sites = SiteWeights::all(tree.n_sites()).active();
        let again = sweep(&tree, &converged, &sites).unwrap();
        for (id, (a, b)) in converged.iter().zip(&again).enumerate() {
            assert!((a - b).abs() < 1e-6, "node {}: {} vs {}", id, a, b);
        }
    }

    #[test]
    fn converged_rooted_tree_is_a_fixed_point() {
        let tree = simulated("((A:0.3,B:0.2):0.4,(C:0.1,D:0.6):0.2);", 200, 11);
        assert_eq!(tree.shape(), RootShape::Rooted);
        let converged = converge(&tree, vec![0.5; tree.node_count()], 2000);
        let sites = SiteWeights::all(tree.n_sites()).active();
        let again = sweep(&tree, &converged, &sites).unwrap();
        for (a, b) in converged.iter().zip(&again) {
            assert!((a - b).abs() < 1e-6);
        }
        // Root branches share the identifiable total equally.
        let root_children = tree.children(tree.root());
        assert_eq!(converged[root_children[0]], converged[root_children[1]]);
    }

    #[test]
    fn estimates_recover_simulated_lengths() {
        let newick = "((A:0.3,B:0.2):0.4,(C:0.25,D:0.6):0.3,E:0.5);";
        let tree = simulated(newick, 4000, 42);
        let truth = PhyloTree::from_newick(newick).unwrap();
        let estimated = converge(&tree, vec![0.1; tree.node_count()], 500);
        for id in 1..tree.node_count() {
            let expected = truth.get_node(id).unwrap().branch_length.unwrap();
            let rel = (estimated[id] - expected).abs() / expected;
            assert!(rel < 0.25, "node {}: {} vs {}", id, estimated[id], expected);
        }
    }

    #[test]
    fn sampled_ancestor_tip_gets_floor_after_one_sweep() {
        let mut phylo =
            PhyloTree::from_newick("((A:0.3,B:0):0.2,C:0.4,(D:0.2,E:0.3):0.5);").unwrap();
        assert_eq!(phylo.mark_sampled_ancestors(), 1);
        let traits = simulate_traits(&phylo, 50, 3).unwrap();
        let tree = BmTree::new(phylo, &traits).unwrap();
        // ids: root 0, AB 1, A 2, B 3
        assert!(tree.is_childless_ancestor(3));
        let sites = SiteWeights::all(50).active();
        let once = sweep(&tree, &vec![0.5; tree.node_count()], &sites).unwrap();
        assert_eq!(once[3], MIN_BRANCH_LENGTH);
    }

    #[test]
    fn degenerate_root_folds_and_halves() {
        let tree = simulated("(A:0.4,(B:0.2,(C:0.3,D:0.1):0.2):0.3);", 100, 5);
        assert_eq!(tree.shape(), RootShape::DegenerateSingleTip);
        let sites = SiteWeights::all(100).active();
        let once = sweep(&tree, &vec![0.5; tree.node_count()], &sites).unwrap();
        // ids: root 0, A 1, (B,(C,D)) 2
        assert_eq!(once[1], once[2]);
        assert!(once.iter().skip(1).all(|&l| l > 0.0));
    }

    #[test]
    fn ancestor_pendant_on_degenerate_root_keeps_floor() {
        let mut phylo =
            PhyloTree::from_newick("(A:0,(B:0.2,(C:0.3,D:0.1):0.2):0.3);").unwrap();
        assert_eq!(phylo.mark_sampled_ancestors(), 1);
        let traits = simulate_traits(&phylo, 50, 9).unwrap();
        let tree = BmTree::new(phylo, &traits).unwrap();
        assert_eq!(tree.shape(), RootShape::DegenerateSingleTip);
        // ids: root 0, A 1, (B,(C,D)) 2
        assert!(tree.is_childless_ancestor(1));
        let sites = SiteWeights::all(50).active();
        let once = sweep(&tree, &vec![0.5; tree.node_count()], &sites).unwrap();
        assert_eq!(once[1], MIN_BRANCH_LENGTH);
        assert!(once[2] > MIN_BRANCH_LENGTH);
        let twice = sweep(&tree, &once, &sites).unwrap();
        assert_eq!(twice[1], MIN_BRANCH_LENGTH);
    }

    #[test]
    fn ancestor_in_two_tip_tree_takes_floor_in_either_position() {
        let traits = TraitMatrix::from_rows([("A", vec![0.0, 1.0]), ("B", vec![2.0, 1.0])])
            .unwrap();
        for (newick, ancestor, other) in [("(A:0,B:1);", 1, 2), ("(A:1,B:0);", 2, 1)] {
            let mut phylo = PhyloTree::from_newick(newick).unwrap();
            phylo.mark_sampled_ancestors();
            let tree = BmTree::new(phylo, &traits).unwrap();
            let sites = SiteWeights::all(2).active();
            let once = sweep(&tree, &[0.0, 0.3, 0.9], &sites).unwrap();
            assert_eq!(once[ancestor], MIN_BRANCH_LENGTH);
            assert_eq!(once[other], 2.0);
        }
    }

    #[test]
    fn two_tip_tree_uses_pairwise_distance() {
        let traits = TraitMatrix::from_rows([("A", vec![0.0, 1.0]), ("B", vec![2.0, 1.0])])
            .unwrap();
        let tree = BmTree::from_newick("(A,B);", &traits).unwrap();
        let sites = SiteWeights::all(2).active();
        let once = sweep(&tree, &[0.0, 0.3, 0.9], &sites).unwrap();
        // mean squared distance = 2, split evenly
        assert_eq!(once, vec![0.0, 1.0, 1.0]);
    }

    #[test]
    fn wrong_length_vector_is_rejected() {
        let tree = simulated("(A:1,B:1,C:1);", 5, 1);
        let sites = SiteWeights::all(5).active();
        assert!(sweep(&tree, &[0.1, 0.2], &sites).is_err());
    }
}
