//! Information criteria for scoring clusters and whole site partitions.
//!
//! Each cluster fits its own branch lengths on the shared topology, so its
//! parameter count is the number of identifiable branch lengths. The score
//! of a partition is the sum over its clusters.

use bmclust_core::{BmclustError, Result};

use crate::bm_tree::{BmTree, RootShape};
use crate::cluster::Cluster;
use crate::likelihood::LikelihoodScorer;

/// Fit statistics for one cluster.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClusterFit {
    pub name: String,
    pub log_likelihood: f64,
    pub n_params: usize,
    pub n_sites: usize,
    pub aic: f64,
    pub bic: f64,
}

/// Akaike Information Criterion: AIC = -2 ln(L) + 2k
pub fn aic(log_likelihood: f64, n_params: usize) -> f64 {
    -2.0 * log_likelihood + 2.0 * n_params as f64
}

/// Bayesian Information Criterion: BIC = -2 ln(L) + k ln(n)
pub fn bic(log_likelihood: f64, n_params: usize, n_sites: usize) -> f64 {
    -2.0 * log_likelihood + n_params as f64 * (n_sites as f64).ln()
}

/// Identifiable branch lengths on `tree`.
///
/// The two edges at a bifurcating root only enter the likelihood through
/// their sum and count once.
pub fn free_branch_count(tree: &BmTree) -> usize {
    match tree.shape() {
        RootShape::Unrooted => tree.edge_count(),
        RootShape::Rooted | RootShape::DegenerateSingleTip => tree.edge_count() - 1,
    }
}

/// Score one optimized cluster.
///
/// # Errors
///
/// `InvalidInput` if the cluster has no branch lengths yet.
pub fn cluster_fit<S: LikelihoodScorer>(
    cluster: &Cluster,
    tree: &BmTree,
    scorer: &S,
) -> Result<ClusterFit> {
    let lengths = cluster.branch_lengths().ok_or_else(|| {
        BmclustError::InvalidInput(format!(
            "cluster '{}' has no branch lengths",
            cluster.name()
        ))
    })?;
    let log_likelihood = scorer.log_likelihood(tree, lengths, cluster.sites())?;
    let n_params = free_branch_count(tree);
    let n_sites = cluster.size();
    Ok(ClusterFit {
        name: cluster.name().to_string(),
        log_likelihood,
        n_params,
        n_sites,
        aic: aic(log_likelihood, n_params),
        bic: bic(log_likelihood, n_params, n_sites),
    })
}

/// Summed AIC of a partition.
pub fn configuration_aic<S: LikelihoodScorer>(
    clusters: &[Cluster],
    tree: &BmTree,
    scorer: &S,
) -> Result<f64> {
    clusters
        .iter()
        .map(|c| cluster_fit(c, tree, scorer).map(|fit| fit.aic))
        .sum()
}
