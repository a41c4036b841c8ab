//! Brownian-motion branch lengths for clustering continuous trait sites.
//!
//! Given a fixed topology and per-tip trait values, estimates maximum
//! likelihood branch lengths under Brownian motion for any subset or
//! weighting of the trait sites, and scores site partitions so a clustering
//! search can tell when it has converged.
//!
//! - **Tree substrate** — arena [`PhyloTree`] with Newick I/O, bound to trait
//!   data as a [`BmTree`]
//! - **Tritomy estimator** — closed-form lengths around a three-way split
//! - **Prune sweep** — one bottom-up/top-down EM pass over the tree
//! - **EM driver** — random restarts or warm starts, best by log-likelihood
//! - **Configuration comparison** — AIC-aware partition equivalence
//!
//! # Quick start
//!
//! ```
//! use bmclust_phylo::{BmTree, EmConfig, EmDriver, SiteWeights, TraitMatrix};
//! use bmclust_phylo::tritomy::MIN_BRANCH_LENGTH;
//!
//! let traits = TraitMatrix::from_rows([
//!     ("A", vec![0.1, 1.2, -0.4]),
//!     ("B", vec![0.9, 0.3, 0.2]),
//!     ("C", vec![-0.5, 0.8, 1.1]),
//!     ("D", vec![0.4, -0.2, 0.7]),
//! ])
//! .unwrap();
//! let mut tree = BmTree::from_newick("((A,B),C,D);", &traits).unwrap();
//!
//! let driver = EmDriver::new(EmConfig::default().with_restarts(3).with_iterations(25));
//! let outcome = driver.run_restarts(&mut tree, &SiteWeights::all(3)).unwrap();
//! assert!(outcome.log_likelihood.is_finite());
//! assert!(outcome.branch_lengths[1..].iter().all(|&l| l >= MIN_BRANCH_LENGTH));
//! ```

pub mod bm_tree;
pub mod characters;
pub mod cluster;
pub mod em;
pub mod likelihood;
pub mod model_selection;
pub mod newick;
pub mod simulation;
pub mod sweep;
pub mod tree;
pub mod tritomy;
pub mod weights;

pub use bm_tree::{BmTree, RootShape};
pub use characters::TraitMatrix;
pub use cluster::{Cluster, SiteConfiguration};
pub use em::{EmConfig, EmDriver, EmMode, EmOutcome};
pub use likelihood::{ContrastLikelihood, LikelihoodScorer};
pub use model_selection::{aic, bic, cluster_fit, configuration_aic, free_branch_count, ClusterFit};
pub use simulation::{simulate_traits, UniformSource, Xorshift64};
pub use sweep::sweep;
pub use tree::{Node, NodeId, PhyloTree};
pub use weights::{ActiveSites, SiteWeights};
