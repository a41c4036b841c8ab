//! Iterated branch-length estimation with random restarts.
//!
//! Two modes:
//!
//! - **Restart** — for each of `restarts` rounds, draw every non-root
//!   branch length uniformly from `(0, 1)`, run `iterations` sweeps and score
//!   the result. The best-scoring lengths are kept.
//! - **Warm start** — no randomization; `iterations` sweeps from the lengths
//!   already on the tree (or on the cluster). This is the cheap path for
//!   re-optimizing after a small membership change.
//!
//! The winning lengths are written back to the tree, and to the cluster when
//! one is given. On any error nothing is written.

use bmclust_core::{BmclustError, Result};
use tracing::{debug, info};

use crate::bm_tree::BmTree;
use crate::cluster::Cluster;
use crate::likelihood::{ContrastLikelihood, LikelihoodScorer};
use crate::simulation::{UniformSource, Xorshift64};
use crate::sweep::sweep;
use crate::tritomy::MIN_BRANCH_LENGTH;
use crate::weights::SiteWeights;

/// Run-length settings for the EM driver.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EmConfig {
    /// Number of random starting points in restart mode.
    pub restarts: usize,
    /// Sweeps per start.
    pub iterations: usize,
    /// Seed for the built-in restart generator.
    pub seed: u64,
}

impl Default for EmConfig {
    fn default() -> Self {
        Self {
            restarts: 10,
            iterations: 100,
            seed: 0x5eed,
        }
    }
}

impl EmConfig {
    pub fn with_restarts(mut self, restarts: usize) -> Self {
        self.restarts = restarts;
        self
    }

    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// How the driver picks its starting lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EmMode {
    Restart,
    WarmStart,
}

/// Result of one driver call.
#[derive(Debug, Clone)]
pub struct EmOutcome {
    /// Winning branch lengths, indexed by `NodeId` (root entry 0).
    pub branch_lengths: Vec<f64>,
    /// Log-likelihood of the winning lengths.
    pub log_likelihood: f64,
    /// Log-likelihood reached by every start, in order.
    pub start_log_likelihoods: Vec<f64>,
}

/// Branch-length optimizer over a fixed tree.
#[derive(Debug, Clone)]
pub struct EmDriver<S = ContrastLikelihood> {
    config: EmConfig,
    scorer: S,
}

impl EmDriver<ContrastLikelihood> {
    pub fn new(config: EmConfig) -> Self {
        Self::with_scorer(config, ContrastLikelihood)
    }
}

impl Default for EmDriver<ContrastLikelihood> {
    fn default() -> Self {
        Self::new(EmConfig::default())
    }
}

impl<S: LikelihoodScorer> EmDriver<S> {
    pub fn with_scorer(config: EmConfig, scorer: S) -> Self {
        Self { config, scorer }
    }

    pub fn config(&self) -> &EmConfig {
        &self.config
    }

    /// Restart mode with the generator seeded from the config.
    pub fn run_restarts(&self, tree: &mut BmTree, sites: &SiteWeights) -> Result<EmOutcome> {
        let mut rng = Xorshift64::new(self.config.seed);
        self.run_restarts_with(tree, sites, &mut rng)
    }

    /// Restart mode drawing starting lengths from `rng`.
    pub fn run_restarts_with<R: UniformSource>(
        &self,
        tree: &mut BmTree,
        sites: &SiteWeights,
        rng: &mut R,
    ) -> Result<EmOutcome> {
        if self.config.restarts == 0 {
            return Err(BmclustError::InvalidInput("restarts must be > 0".into()));
        }
        sites.validate(tree.n_sites())?;
        let root = tree.root();

        let mut best: Option<(Vec<f64>, f64)> = None;
        let mut scores = Vec::with_capacity(self.config.restarts);
        for restart in 0..self.config.restarts {
            let start: Vec<f64> = (0..tree.node_count())
                .map(|id| {
                    if id == root {
                        0.0
                    } else {
                        rng.next_f64().clamp(MIN_BRANCH_LENGTH, 1.0)
                    }
                })
                .collect();
            let (lengths, ll) = self.iterate(tree, start, sites)?;
            debug!(restart, log_likelihood = ll, "EM restart finished");
            scores.push(ll);
            if best.as_ref().map_or(true, |(_, b)| ll > *b) {
                best = Some((lengths, ll));
            }
        }

        let (branch_lengths, log_likelihood) = best
            .ok_or_else(|| BmclustError::Other("no restart produced a result".into()))?;
        tree.set_branch_lengths(&branch_lengths)?;
        info!(
            restarts = self.config.restarts,
            log_likelihood,
            tree = %tree.tree().to_newick(),
            "EM selected best restart"
        );
        Ok(EmOutcome {
            branch_lengths,
            log_likelihood,
            start_log_likelihoods: scores,
        })
    }

    /// Warm-start mode from the lengths currently on the tree.
    ///
    /// Missing or sub-floor lengths start at [`MIN_BRANCH_LENGTH`].
    pub fn run_warm(&self, tree: &mut BmTree, sites: &SiteWeights) -> Result<EmOutcome> {
        let start = tree.branch_lengths(MIN_BRANCH_LENGTH);
        self.run_warm_from(tree, start, sites)
    }

    fn run_warm_from(
        &self,
        tree: &mut BmTree,
        start: Vec<f64>,
        sites: &SiteWeights,
    ) -> Result<EmOutcome> {
        sites.validate(tree.n_sites())?;
        let root = tree.root();
        let start = start
            .into_iter()
            .enumerate()
            .map(|(id, len)| if id == root { 0.0 } else { len.max(MIN_BRANCH_LENGTH) })
            .collect();
        let (branch_lengths, log_likelihood) = self.iterate(tree, start, sites)?;
        tree.set_branch_lengths(&branch_lengths)?;
        debug!(log_likelihood, "EM warm start finished");
        Ok(EmOutcome {
            branch_lengths,
            log_likelihood,
            start_log_likelihoods: vec![log_likelihood],
        })
    }

    /// Optimize `cluster`'s branch lengths and store them on the cluster.
    ///
    /// A warm start begins from the cluster's previous lengths when it has
    /// any, otherwise from the tree.
    pub fn optimize_cluster(
        &self,
        tree: &mut BmTree,
        cluster: &mut Cluster,
        mode: EmMode,
    ) -> Result<EmOutcome> {
        let outcome = match mode {
            EmMode::Restart => self.run_restarts(tree, cluster.sites())?,
            EmMode::WarmStart => {
                let start = match cluster.branch_lengths() {
                    Some(prev) if prev.len() == tree.node_count() => prev.to_vec(),
                    _ => tree.branch_lengths(MIN_BRANCH_LENGTH),
                };
                self.run_warm_from(tree, start, cluster.sites())?
            }
        };
        cluster.set_branch_lengths(outcome.branch_lengths.clone());
        Ok(outcome)
    }

    fn iterate(
        &self,
        tree: &BmTree,
        start: Vec<f64>,
        sites: &SiteWeights,
    ) -> Result<(Vec<f64>, f64)> {
        let active = sites.active();
        let mut lengths = start;
        for _ in 0..self.config.iterations {
            lengths = sweep(tree, &lengths, &active)?;
        }
        let ll = self.scorer.log_likelihood(tree, &lengths, sites)?;
        Ok((lengths, ll))
    }
}
