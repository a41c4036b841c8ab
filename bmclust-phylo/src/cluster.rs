//! Clusters of trait sites and snapshots of a full site partition.
//!
//! A [`Cluster`] is the unit the EM driver optimizes: a site subset plus the
//! branch lengths from its last run. A [`SiteConfiguration`] records one
//! step of the clustering search so that successive steps can be compared
//! with [`SiteConfiguration::is_equivalent`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use bmclust_core::{BmclustError, Result, Scored, Summarizable};

use crate::bm_tree::BmTree;
use crate::likelihood::LikelihoodScorer;
use crate::model_selection::configuration_aic;
use crate::weights::SiteWeights;

/// AIC gap above which two configurations always differ.
pub const AIC_DISTINCT: f64 = 0.5;

/// AIC gap below which two configurations are always equivalent.
pub const AIC_INDISTINGUISHABLE: f64 = 0.01;

/// A named subset of sites with its own branch-length solution.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Cluster {
    name: String,
    sites: SiteWeights,
    branch_lengths: Option<Vec<f64>>,
}

impl Cluster {
    pub fn new(name: impl Into<String>, sites: SiteWeights) -> Self {
        Self {
            name: name.into(),
            sites,
            branch_lengths: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sites(&self) -> &SiteWeights {
        &self.sites
    }

    /// Replace the membership. Branch lengths are kept as a warm start.
    pub fn set_sites(&mut self, sites: SiteWeights) {
        self.sites = sites;
    }

    /// Lengths from the last EM run, indexed by `NodeId`.
    pub fn branch_lengths(&self) -> Option<&[f64]> {
        self.branch_lengths.as_deref()
    }

    pub fn set_branch_lengths(&mut self, lengths: Vec<f64>) {
        self.branch_lengths = Some(lengths);
    }

    /// Number of included sites.
    pub fn size(&self) -> usize {
        self.sites.len()
    }

    pub fn site_indices(&self) -> BTreeSet<usize> {
        self.sites.indices()
    }
}

/// One partition of the sites into clusters, with its score.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SiteConfiguration {
    aic: f64,
    clusters: Vec<BTreeSet<usize>>,
    tree_strings: Vec<String>,
    #[cfg_attr(feature = "serde", serde(skip))]
    size_counts: OnceLock<BTreeMap<usize, usize>>,
}

impl SiteConfiguration {
    pub fn new(aic: f64, clusters: Vec<BTreeSet<usize>>, tree_strings: Vec<String>) -> Self {
        Self {
            aic,
            clusters,
            tree_strings,
            size_counts: OnceLock::new(),
        }
    }

    /// Snapshot optimized clusters: membership, per-cluster Newick and the
    /// summed AIC.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if a cluster has not been optimized yet, plus any
    /// scorer error.
    pub fn from_clusters<S: LikelihoodScorer>(
        clusters: &[Cluster],
        tree: &BmTree,
        scorer: &S,
    ) -> Result<Self> {
        let aic = configuration_aic(clusters, tree, scorer)?;
        let mut sets = Vec::with_capacity(clusters.len());
        let mut tree_strings = Vec::with_capacity(clusters.len());
        for cluster in clusters {
            let lengths = cluster.branch_lengths().ok_or_else(|| {
                BmclustError::InvalidInput(format!(
                    "cluster '{}' has no branch lengths",
                    cluster.name()
                ))
            })?;
            tree_strings.push(tree.newick_with_lengths(lengths)?);
            sets.push(cluster.site_indices());
        }
        Ok(Self::new(aic, sets, tree_strings))
    }

    pub fn aic(&self) -> f64 {
        self.aic
    }

    pub fn clusters(&self) -> &[BTreeSet<usize>] {
        &self.clusters
    }

    pub fn tree_strings(&self) -> &[String] {
        &self.tree_strings
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    /// Cluster size → number of clusters with that size. Computed once.
    pub fn size_counts(&self) -> &BTreeMap<usize, usize> {
        self.size_counts.get_or_init(|| {
            let mut counts = BTreeMap::new();
            for c in &self.clusters {
                *counts.entry(c.len()).or_insert(0) += 1;
            }
            counts
        })
    }

    /// Whether two search steps landed on the same answer.
    ///
    /// The AIC gap decides outright when it is large (> [`AIC_DISTINCT`]) or
    /// negligible (< [`AIC_INDISTINGUISHABLE`]). Otherwise two single-cluster
    /// partitions are equivalent, and anything else must match cluster for
    /// cluster on exact site membership.
    pub fn is_equivalent(&self, other: &Self) -> bool {
        let gap = (self.aic - other.aic).abs();
        if gap > AIC_DISTINCT {
            return false;
        }
        if gap < AIC_INDISTINGUISHABLE {
            return true;
        }
        if self.cluster_count() == 1 && other.cluster_count() == 1 {
            return true;
        }
        if self.cluster_count() != other.cluster_count() {
            return false;
        }
        if self.size_counts() != other.size_counts() {
            return false;
        }

        let mut unmatched: Vec<&BTreeSet<usize>> = self.clusters.iter().collect();
        for theirs in &other.clusters {
            match unmatched
                .iter()
                .position(|ours| ours.len() == theirs.len() && *ours == theirs)
            {
                Some(i) => {
                    unmatched.swap_remove(i);
                }
                None => return false,
            }
        }
        true
    }
}

impl Scored for SiteConfiguration {
    fn score(&self) -> f64 {
        self.aic
    }
}

impl Summarizable for SiteConfiguration {
    fn summary(&self) -> String {
        format!(
            "SiteConfiguration: {} clusters, AIC {:.4}",
            self.clusters.len(),
            self.aic
        )
    }
}
