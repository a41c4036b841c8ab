//! Closed-form maximum-likelihood branch lengths for a three-way split.
//!
//! Around one node, three neighbours each present an expected trait vector
//! `x_k` and an accumulated variance offset (the pruned length of the
//! subtree behind them). Under Brownian motion the total variance on branch
//! `k` is estimated by
//!
//! ```text
//! v_k = Σ_i w_i (x_k,i − x_j,i)(x_k,i − x_m,i) / N
//! ```
//!
//! with `N` the site count for unweighted subsets and 1 for weighted ones.
//! The branch length is `v_k` minus the neighbour's offset, floored at
//! [`MIN_BRANCH_LENGTH`].
//!
//! When a variance comes out negative, or a neighbour is a sampled ancestor
//! tip, that branch is pinned to a tiny floor and the other two are
//! re-estimated as if the pinned neighbour sat at the centre of a star:
//! `v_j = Σ_i w_i (x_j,i − x_k,i)² / N`. Only one branch is corrected:
//! sampled ancestors first, then negative estimates, each in branch order.
//! Two estimates can never be negative together since `v_j + v_k` is the
//! mean squared distance between `x_j` and `x_k`.

use bmclust_core::{BmclustError, Result};

use crate::weights::ActiveSites;

/// Smallest branch length the estimator will return.
pub const MIN_BRANCH_LENGTH: f64 = 1e-4;
/// Variance assigned to a branch whose estimate came out negative.
pub const NEGATIVE_VARIANCE_FLOOR: f64 = 1e-6;
/// Variance assigned to the branch leading to a sampled ancestor tip.
pub const ANCESTOR_VARIANCE_FLOOR: f64 = 1e-13;

/// Order in which branches are checked for a correction.
const BRANCH_PRIORITY: [usize; 3] = [0, 1, 2];

/// One side of a tritomy.
#[derive(Debug, Clone, Copy)]
pub struct Neighbor<'a> {
    /// Expected trait values on this side, one per site.
    pub values: &'a [f64],
    /// Variance already accounted for behind this branch.
    pub offset: f64,
    /// The neighbour is a sampled ancestor with no descendants.
    pub sampled_ancestor: bool,
}

impl<'a> Neighbor<'a> {
    pub fn new(values: &'a [f64], offset: f64) -> Self {
        Self {
            values,
            offset,
            sampled_ancestor: false,
        }
    }

    pub fn ancestor(mut self, sampled_ancestor: bool) -> Self {
        self.sampled_ancestor = sampled_ancestor;
        self
    }
}

/// A correction to apply before lengths are derived.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Correction {
    /// Pin the branch to a sampled ancestor.
    SampledAncestor(usize),
    /// Pin a branch whose variance estimate is negative.
    NegativeVariance(usize),
}

impl Correction {
    fn branch(self) -> usize {
        match self {
            Self::SampledAncestor(k) | Self::NegativeVariance(k) => k,
        }
    }

    fn floor(self) -> f64 {
        match self {
            Self::SampledAncestor(_) => ANCESTOR_VARIANCE_FLOOR,
            Self::NegativeVariance(_) => NEGATIVE_VARIANCE_FLOOR,
        }
    }
}

type Strategy = fn(&[f64; 3], &[Neighbor<'_>; 3], usize) -> Option<Correction>;

/// Correction strategies, highest priority first. Each one scans the
/// branches in [`BRANCH_PRIORITY`] order before the next strategy runs, so a
/// sampled ancestor is always pinned even when another branch is negative.
// Ancestors go first: a sampled-ancestor tip must end at the floor even when
// a branch scanned earlier is negative, and only one pin is applied.
const STRATEGIES: [Strategy; 2] = [pin_ancestor, pin_negative];

fn pin_ancestor(_raw: &[f64; 3], neighbors: &[Neighbor<'_>; 3], k: usize) -> Option<Correction> {
    neighbors[k]
        .sampled_ancestor
        .then_some(Correction::SampledAncestor(k))
}

fn pin_negative(raw: &[f64; 3], _neighbors: &[Neighbor<'_>; 3], k: usize) -> Option<Correction> {
    (raw[k] < 0.0).then_some(Correction::NegativeVariance(k))
}

fn pick_correction(raw: &[f64; 3], neighbors: &[Neighbor<'_>; 3]) -> Option<Correction> {
    STRATEGIES.iter().find_map(|strategy| {
        BRANCH_PRIORITY
            .iter()
            .find_map(|&k| strategy(raw, neighbors, k))
    })
}

/// Estimate the three branch lengths around a tritomy.
///
/// Returns lengths in neighbour order, each at least [`MIN_BRANCH_LENGTH`].
///
/// # Errors
///
/// `InvalidInput` if a neighbour's vector does not cover an active site;
/// `Numerical` if any estimate is NaN.
pub fn estimate(neighbors: &[Neighbor<'_>; 3], sites: &ActiveSites) -> Result<[f64; 3]> {
    if let Some(&(max_site, _)) = sites.entries.iter().max_by_key(|(i, _)| *i) {
        if neighbors.iter().any(|n| n.values.len() <= max_site) {
            return Err(BmclustError::InvalidInput(format!(
                "trait vectors do not cover site {}",
                max_site
            )));
        }
    }

    let x = |k: usize, i: usize| neighbors[k].values[i];
    let mut raw = [0.0; 3];
    for (k, slot) in raw.iter_mut().enumerate() {
        let (j, m) = others(k);
        *slot = sites.mean_of(|i| (x(k, i) - x(j, i)) * (x(k, i) - x(m, i)));
    }

    if let Some(correction) = pick_correction(&raw, neighbors) {
        let k = correction.branch();
        raw[k] = correction.floor();
        let (j, m) = others(k);
        raw[j] = sites.mean_of(|i| (x(j, i) - x(k, i)).powi(2));
        raw[m] = sites.mean_of(|i| (x(m, i) - x(k, i)).powi(2));
    }

    let mut lengths = [0.0; 3];
    for k in 0..3 {
        let len = raw[k] - neighbors[k].offset;
        if len.is_nan() {
            return Err(BmclustError::Numerical(format!(
                "branch length estimate for tritomy branch {} is NaN",
                k
            )));
        }
        lengths[k] = len.max(MIN_BRANCH_LENGTH);
    }
    Ok(lengths)
}

fn others(k: usize) -> (usize, usize) {
    match k {
        0 => (1, 2),
        1 => (0, 2),
        _ => (0, 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weights::SiteWeights;

    const A: [f64; 3] = [1.0, 2.0, 0.5];
    const B: [f64; 3] = [0.0, 1.0, 1.5];
    const C: [f64; 3] = [3.0, -1.0, 2.0];

    fn star<'a>(a: &'a [f64], b: &'a [f64], c: &'a [f64]) -> [Neighbor<'a>; 3] {
        [Neighbor::new(a, 0.0), Neighbor::new(b, 0.0), Neighbor::new(c, 0.0)]
    }

    fn mean_sq_diff(p: &[f64], q: &[f64]) -> f64 {
        p.iter().zip(q).map(|(a, b)| (a - b).powi(2)).sum::<f64>() / p.len() as f64
    }

    #[test]
    fn three_taxon_star_matches_pairwise_solution() {
        let sites = SiteWeights::all(3).active();
        let lengths = estimate(&star(&A, &B, &C), &sites).unwrap();

        // v_A = (d_AB + d_AC − d_BC) / 2 and cyclic permutations.
        let d_ab = mean_sq_diff(&A, &B);
        let d_ac = mean_sq_diff(&A, &C);
        let d_bc = mean_sq_diff(&B, &C);
        let expected = [
            (d_ab + d_ac - d_bc) / 2.0,
            (d_ab + d_bc - d_ac) / 2.0,
            (d_ac + d_bc - d_ab) / 2.0,
        ];
        for k in 0..3 {
            assert!((lengths[k] - expected[k]).abs() < 1e-12, "{:?}", lengths);
        }
        assert!((lengths[0] - 2.5 / 3.0).abs() < 1e-12);
        assert!((lengths[1] - 0.5 / 3.0).abs() < 1e-12);
        assert!((lengths[2] - 12.75 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn offsets_are_subtracted() {
        let sites = SiteWeights::all(3).active();
        let neighbors = [
            Neighbor::new(&A, 0.5),
            Neighbor::new(&B, 0.0),
            Neighbor::new(&C, 1.0),
        ];
        let lengths = estimate(&neighbors, &sites).unwrap();
        assert!((lengths[0] - (2.5 / 3.0 - 0.5)).abs() < 1e-12);
        assert!((lengths[2] - (12.75 / 3.0 - 1.0)).abs() < 1e-12);
    }

    #[test]
    fn subset_only_uses_listed_sites() {
        // Site 2 alone is (0.5, 1.5, 2.0): B sits between A and C, so its
        // variance is negative and it becomes the star centre.
        let sites = SiteWeights::uniform([2]).active();
        let lengths = estimate(&star(&A, &B, &C), &sites).unwrap();
        assert_eq!(lengths[1], MIN_BRANCH_LENGTH);
        assert!((lengths[0] - 1.0).abs() < 1e-12);
        assert!((lengths[2] - 0.25).abs() < 1e-12);
    }

    #[test]
    fn negative_variance_switches_to_star_formula() {
        // raw = [-2, 3, 6]: branch 0 is pinned, others measured from x_0.
        let sites = SiteWeights::all(1).active();
        let lengths = estimate(&star(&[1.0], &[0.0], &[3.0]), &sites).unwrap();
        assert_eq!(lengths, [MIN_BRANCH_LENGTH, 1.0, 4.0]);
    }

    #[test]
    fn middle_branch_pinned_over_two_sites() {
        let a = [0.0, 10.0];
        let b = [5.0, 5.0];
        let c = [10.0, 0.0];
        // raw = [50, -25, 50]
        let sites = SiteWeights::all(2).active();
        let lengths = estimate(&star(&a, &b, &c), &sites).unwrap();
        assert_eq!(lengths[1], MIN_BRANCH_LENGTH);
        assert!((lengths[0] - 25.0).abs() < 1e-12);
        assert!((lengths[2] - 25.0).abs() < 1e-12);
    }

    #[test]
    fn ancestor_pin_outranks_negative_variance() {
        // Branch 0 is negative, but the ancestor on branch 2 is pinned.
        let sites = SiteWeights::all(1).active();
        let neighbors = [
            Neighbor::new(&[1.0], 0.0),
            Neighbor::new(&[0.0], 0.0),
            Neighbor::new(&[3.0], 0.0).ancestor(true),
        ];
        let lengths = estimate(&neighbors, &sites).unwrap();
        assert_eq!(lengths, [4.0, 9.0, MIN_BRANCH_LENGTH]);
    }

    #[test]
    fn sampled_ancestor_gets_exact_floor() {
        let sites = SiteWeights::all(3).active();
        let neighbors = [
            Neighbor::new(&A, 0.0),
            Neighbor::new(&B, 0.0).ancestor(true),
            Neighbor::new(&C, 0.0),
        ];
        let lengths = estimate(&neighbors, &sites).unwrap();
        assert_eq!(lengths[1], MIN_BRANCH_LENGTH);
        assert!((lengths[0] - mean_sq_diff(&A, &B)).abs() < 1e-12);
        assert!((lengths[2] - mean_sq_diff(&C, &B)).abs() < 1e-12);
    }

    #[test]
    fn weighted_sums_are_not_renormalized() {
        let sites = SiteWeights::weighted([(0, 0.0), (2, 2.0)]).active();
        let lengths = estimate(&star(&A, &B, &C), &sites).unwrap();
        assert_eq!(lengths[1], MIN_BRANCH_LENGTH);
        assert!((lengths[0] - 2.0).abs() < 1e-12);
        assert!((lengths[2] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn identical_values_floor_every_branch() {
        let v = [1.0, 2.0];
        let sites = SiteWeights::all(2).active();
        let lengths = estimate(&star(&v, &v, &v), &sites).unwrap();
        assert_eq!(lengths, [MIN_BRANCH_LENGTH; 3]);
    }

    #[test]
    fn nan_is_fatal() {
        let sites = SiteWeights::all(1).active();
        let err = estimate(&star(&[f64::NAN], &[0.0], &[1.0]), &sites).unwrap_err();
        assert!(matches!(err, BmclustError::Numerical(_)));
    }

    #[test]
    fn short_vectors_are_rejected() {
        let sites = SiteWeights::all(2).active();
        assert!(estimate(&star(&[1.0], &[0.0, 1.0], &[1.0, 2.0]), &sites).is_err());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use crate::weights::SiteWeights;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn lengths_are_always_positive(
            data in proptest::collection::vec((-50.0f64..50.0, -50.0f64..50.0, -50.0f64..50.0), 1..20),
            offsets in (0.0f64..10.0, 0.0f64..10.0, 0.0f64..10.0),
            ancestor in 0usize..4,
        ) {
            let a: Vec<f64> = data.iter().map(|t| t.0).collect();
            let b: Vec<f64> = data.iter().map(|t| t.1).collect();
            let c: Vec<f64> = data.iter().map(|t| t.2).collect();
            let neighbors = [
                Neighbor::new(&a, offsets.0).ancestor(ancestor == 0),
                Neighbor::new(&b, offsets.1).ancestor(ancestor == 1),
                Neighbor::new(&c, offsets.2).ancestor(ancestor == 2),
            ];
            let sites = SiteWeights::all(a.len()).active();
            let lengths = estimate(&neighbors, &sites).unwrap();
            for len in lengths {
                prop_assert!(len >= MIN_BRANCH_LENGTH);
            }
            if ancestor < 3 {
                prop_assert_eq!(lengths[ancestor], MIN_BRANCH_LENGTH);
            }
        }
    }
}
