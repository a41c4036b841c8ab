//! Brownian-motion log-likelihood via independent contrasts.
//!
//! Computes the restricted (REML) log-likelihood of the tip values given
//! branch lengths, with unit rate per unit length. Felsenstein's contrasts
//! turn each site into `n_tips − 1` independent normal deviates
//!
//! ```text
//! u_k ~ N(0, v_k),    ln L_site = −½ Σ_k [ ln(2π v_k) + u_k² / v_k ]
//! ```
//!
//! The contrast variances `v_k` depend only on branch lengths, so they are
//! computed once and shared by all sites. The two branches at a bifurcating
//! root only enter through their sum.
//!
//! With the `parallel` feature the per-site sums run on rayon's pool.

use bmclust_core::{BmclustError, Result};

use crate::bm_tree::BmTree;
use crate::tree::NodeId;
use crate::weights::SiteWeights;

/// Scores a set of branch lengths against the tip data on a tree.
pub trait LikelihoodScorer {
    /// Log-likelihood of `lengths` (indexed by `NodeId`) over `sites`.
    fn log_likelihood(&self, tree: &BmTree, lengths: &[f64], sites: &SiteWeights) -> Result<f64>;
}

/// REML Brownian-motion likelihood from phylogenetic independent contrasts.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContrastLikelihood;

/// One contrast between the running value of `node` and one child.
#[derive(Debug, Clone, Copy)]
struct Step {
    node: NodeId,
    child: NodeId,
    /// Variance of the accumulated side before this child is merged.
    acc_var: f64,
    /// Branch length plus pruned length of the child.
    child_var: f64,
    /// First child of `node` seeds the accumulator.
    seeds: bool,
}

/// Site-independent contrast layout.
#[derive(Debug, Clone)]
struct ContrastPlan {
    steps: Vec<Step>,
    leaves: Vec<NodeId>,
    log_det: f64,
}

impl ContrastPlan {
    fn build(tree: &BmTree, lengths: &[f64]) -> Result<Self> {
        if lengths.len() != tree.node_count() {
            return Err(BmclustError::InvalidInput(format!(
                "expected {} branch lengths, got {}",
                tree.node_count(),
                lengths.len()
            )));
        }
        let root = tree.root();
        let mut extra = vec![0.0; tree.node_count()];
        let mut steps = Vec::new();
        let mut leaves = Vec::new();
        let mut log_det = 0.0;

        for &id in tree.postorder() {
            let children = tree.children(id);
            let Some((&first, rest)) = children.split_first() else {
                leaves.push(id);
                continue;
            };
            let mut acc_var = lengths[first] + extra[first];
            steps.push(Step {
                node: id,
                child: first,
                acc_var: 0.0,
                child_var: acc_var,
                seeds: true,
            });
            for &child in rest {
                let child_var = lengths[child] + extra[child];
                let v = acc_var + child_var;
                if !(acc_var > 0.0 && child_var > 0.0) || !v.is_finite() {
                    return Err(BmclustError::Numerical(format!(
                        "contrast at node {} has non-positive variance",
                        id
                    )));
                }
                log_det += (2.0 * std::f64::consts::PI * v).ln();
                steps.push(Step {
                    node: id,
                    child,
                    acc_var,
                    child_var,
                    seeds: false,
                });
                acc_var = acc_var * child_var / v;
            }
            if id != root {
                extra[id] = acc_var;
            }
        }
        Ok(Self {
            steps,
            leaves,
            log_det,
        })
    }

    /// Σ u_k² / v_k for one site.
    ///
    /// `value` is scratch space of `node_count` entries. Internal entries are
    /// written by their seeding step before they are read, so the buffer can
    /// be reused across sites without clearing.
    fn quadratic(&self, tree: &BmTree, site: usize, value: &mut [f64]) -> f64 {
        for &leaf in &self.leaves {
            value[leaf] = tree.tip_values(leaf)[site];
        }
        let mut quad = 0.0;
        for step in &self.steps {
            let x = value[step.child];
            if step.seeds {
                value[step.node] = x;
                continue;
            }
            let acc = value[step.node];
            let v = step.acc_var + step.child_var;
            quad += (acc - x).powi(2) / v;
            value[step.node] = (acc * step.child_var + x * step.acc_var) / v;
        }
        quad
    }

    fn site_log_likelihood(&self, tree: &BmTree, site: usize, value: &mut [f64]) -> f64 {
        -0.5 * (self.log_det + self.quadratic(tree, site, value))
    }
}

impl LikelihoodScorer for ContrastLikelihood {
    fn log_likelihood(&self, tree: &BmTree, lengths: &[f64], sites: &SiteWeights) -> Result<f64> {
        sites.validate(tree.n_sites())?;
        let plan = ContrastPlan::build(tree, lengths)?;
        let entries = sites.active().entries;

        let n = tree.node_count();

        #[cfg(feature = "parallel")]
        let total: f64 = {
            use rayon::prelude::*;
            entries
                .par_iter()
                .map_init(
                    || vec![0.0; n],
                    |value, &(site, w)| w * plan.site_log_likelihood(tree, site, value),
                )
                .sum()
        };

        #[cfg(not(feature = "parallel"))]
        let total: f64 = {
            let mut value = vec![0.0; n];
            entries
                .iter()
                .map(|&(site, w)| w * plan.site_log_likelihood(tree, site, &mut value))
                .sum()
        };

        if total.is_nan() {
            return Err(BmclustError::Numerical("log-likelihood is NaN".into()));
        }
        Ok(total)
    }
}
