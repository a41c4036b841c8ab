//! Site subsets and per-site weights.
//!
//! A cluster scores a tree against either a plain set of site indices or a
//! weight per site. Weight 0 removes a site entirely. Both forms flatten to
//! [`ActiveSites`], the list the estimators iterate over.

use std::collections::{BTreeMap, BTreeSet};

use bmclust_core::{BmclustError, Result};

/// The trait sites a computation runs over.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SiteWeights {
    /// Every listed site counts once; sums are averaged over the set size.
    Uniform(BTreeSet<usize>),
    /// Each site counts with its weight; sums are not renormalized.
    Weighted(BTreeMap<usize, f64>),
}

impl SiteWeights {
    /// All sites `0..n_sites`, unweighted.
    pub fn all(n_sites: usize) -> Self {
        Self::Uniform((0..n_sites).collect())
    }

    /// An unweighted subset.
    pub fn uniform(indices: impl IntoIterator<Item = usize>) -> Self {
        Self::Uniform(indices.into_iter().collect())
    }

    /// A weight per site.
    pub fn weighted(weights: impl IntoIterator<Item = (usize, f64)>) -> Self {
        Self::Weighted(weights.into_iter().collect())
    }

    /// Sites that take part in the computation (non-zero weight).
    pub fn indices(&self) -> BTreeSet<usize> {
        match self {
            Self::Uniform(set) => set.clone(),
            Self::Weighted(map) => map
                .iter()
                .filter(|(_, &w)| w != 0.0)
                .map(|(&i, _)| i)
                .collect(),
        }
    }

    /// Number of included sites.
    pub fn len(&self) -> usize {
        match self {
            Self::Uniform(set) => set.len(),
            Self::Weighted(map) => map.values().filter(|&&w| w != 0.0).count(),
        }
    }

    /// True if no site is included.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check the subset against a matrix with `n_sites` columns.
    ///
    /// # Errors
    ///
    /// Fails if no site is included, an index is out of range, or a weight
    /// is negative or non-finite.
    pub fn validate(&self, n_sites: usize) -> Result<()> {
        if self.is_empty() {
            return Err(BmclustError::InvalidInput("no sites selected".into()));
        }
        let max = match self {
            Self::Uniform(set) => set.iter().next_back().copied(),
            Self::Weighted(map) => {
                if let Some((i, w)) = map.iter().find(|(_, w)| !w.is_finite() || **w < 0.0) {
                    return Err(BmclustError::InvalidInput(format!(
                        "site {} has invalid weight {}",
                        i, w
                    )));
                }
                map.keys().next_back().copied()
            }
        };
        match max {
            Some(i) if i >= n_sites => Err(BmclustError::InvalidInput(format!(
                "site index {} out of range ({} sites)",
                i, n_sites
            ))),
            _ => Ok(()),
        }
    }

    /// Flatten into the form the estimators iterate over.
    pub fn active(&self) -> ActiveSites {
        match self {
            Self::Uniform(set) => ActiveSites {
                entries: set.iter().map(|&i| (i, 1.0)).collect(),
                normalizer: set.len() as f64,
            },
            Self::Weighted(map) => ActiveSites {
                entries: map
                    .iter()
                    .filter(|(_, &w)| w != 0.0)
                    .map(|(&i, &w)| (i, w))
                    .collect(),
                normalizer: 1.0,
            },
        }
    }
}

/// Included `(site, weight)` pairs and the divisor applied to weighted sums.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveSites {
    pub entries: Vec<(usize, f64)>,
    pub normalizer: f64,
}

impl ActiveSites {
    /// `Σ w_i · f(i) / normalizer` over the included sites.
    pub fn mean_of(&self, f: impl Fn(usize) -> f64) -> f64 {
        let sum: f64 = self.entries.iter().map(|&(i, w)| w * f(i)).sum();
        sum / self.normalizer
    }
}
