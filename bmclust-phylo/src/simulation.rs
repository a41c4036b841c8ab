//! Continuous trait simulation and the random source used by EM restarts.
//!
//! Traits evolve by Brownian motion: starting from 0 at the root, each node's
//! value is its parent's plus a normal draw with variance equal to the
//! branch length. Sites are independent.

use bmclust_core::{BmclustError, Result};

use crate::characters::TraitMatrix;
use crate::tree::PhyloTree;

/// A source of uniform draws in `(0, 1]`.
pub trait UniformSource {
    fn next_f64(&mut self) -> f64;
}

/// Simple xorshift64 pseudo-random number generator.
#[derive(Debug, Clone)]
pub struct Xorshift64 {
    state: u64,
}

impl Xorshift64 {
    pub fn new(seed: u64) -> Self {
        // Ensure state is never zero (xorshift requires nonzero state).
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Standard normal draw (Box-Muller).
    pub fn next_normal(&mut self) -> f64 {
        let u1 = self.next_f64();
        let u2 = self.next_f64();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }
}

impl UniformSource for Xorshift64 {
    fn next_f64(&mut self) -> f64 {
        // The state is never zero, so the draw is never zero either.
        self.next_u64() as f64 / u64::MAX as f64
    }
}

/// Simulate `n_sites` independent Brownian-motion traits along `tree`.
///
/// Missing branch lengths count as 0. Leaves are labelled by name, or
/// `"leaf_{id}"` when unnamed.
///
/// # Errors
///
/// Returns an error if `n_sites` is zero, the tree has a single node, or a
/// branch length is negative.
pub fn simulate_traits(tree: &PhyloTree, n_sites: usize, seed: u64) -> Result<TraitMatrix> {
    if n_sites == 0 {
        return Err(BmclustError::InvalidInput("n_sites must be > 0".into()));
    }
    if tree.node_count() < 2 {
        return Err(BmclustError::InvalidInput("tree has no branches".into()));
    }

    let mut rng = Xorshift64::new(seed);
    let mut values: Vec<Vec<f64>> = vec![Vec::new(); tree.node_count()];
    values[tree.root()] = vec![0.0; n_sites];

    for id in tree.iter_preorder() {
        let Some(node) = tree.get_node(id) else {
            continue;
        };
        let Some(parent) = node.parent else {
            continue;
        };
        let len = node.branch_length.unwrap_or(0.0);
        if len < 0.0 {
            return Err(BmclustError::InvalidInput(format!(
                "node {} has negative branch length {}",
                id, len
            )));
        }
        let sd = len.sqrt();
        let evolved: Vec<f64> = values[parent]
            .iter()
            .map(|&x| x + sd * rng.next_normal())
            .collect();
        values[id] = evolved;
    }

    let mut matrix = TraitMatrix::new();
    for leaf in tree.leaves() {
        let name = tree
            .get_node(leaf)
            .and_then(|n| n.name.clone())
            .unwrap_or_else(|| format!("leaf_{}", leaf));
        matrix.insert(name, std::mem::take(&mut values[leaf]))?;
    }
    Ok(matrix)
}
