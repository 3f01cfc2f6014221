//! Property tests for the geometric and bookkeeping invariants.

use proptest::prelude::*;

use rapidinv::bootstrap::{BootstrapEstimator, ConfidenceInterval, TraceMisfits};
use rapidinv::domain::{
    ConfidenceLevel, Distribution, SolutionRecord, SourceBase, Stage, sort_by_misfit,
};
use rapidinv::math::Mechanism;
use rapidinv::math::mechanism::{auxiliary_plane, normalize, to_moment_tensor};
use rapidinv::search::RefineAxis;
use rapidinv::solver::partition_even;

fn arb_mechanism() -> impl Strategy<Value = Mechanism> {
    (-720.0f64..720.0, -200.0f64..200.0, -540.0f64..540.0)
        .prop_map(|(s, d, r)| Mechanism::new(s, d, r))
}

/// Away from the horizontal and vertical planes, where angles degenerate.
fn arb_regular_plane() -> impl Strategy<Value = Mechanism> {
    (0.0f64..359.0, 5.0f64..85.0, -175.0f64..175.0).prop_map(|(s, d, r)| Mechanism::new(s, d, r))
}

fn tensors_close(a: [f64; 6], b: [f64; 6]) -> bool {
    a.iter().zip(&b).all(|(x, y)| (x - y).abs() < 1e-6)
}

fn record(misfit: f64) -> SolutionRecord {
    let mut base = SourceBase::new(Stage::PointSource);
    base.misfit = misfit;
    SolutionRecord::double_couple(base, Mechanism::new(0.0, 45.0, 90.0))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_normalize_is_canonical_and_idempotent(m in arb_mechanism(), moment in -1e20f64..1e20) {
        let (once, m0) = normalize(m, moment);
        prop_assert!(once.is_canonical(), "{once:?}");
        prop_assert!(m0 >= 0.0);
        let (twice, m1) = normalize(once, m0);
        prop_assert!((twice.strike - once.strike).abs() < 1e-9);
        prop_assert!((twice.dip - once.dip).abs() < 1e-9);
        prop_assert!((twice.rake - once.rake).abs() < 1e-9);
        prop_assert_eq!(m0, m1);
    }

    #[test]
    fn prop_normalize_keeps_the_moment_tensor(m in arb_regular_plane(), moment in 1e15f64..1e20) {
        let (canonical, m0) = normalize(m, -moment);
        let scale = moment;
        let a = to_moment_tensor(m, -moment).map(|c| c / scale);
        let b = to_moment_tensor(canonical, m0).map(|c| c / scale);
        prop_assert!(tensors_close(a, b));
    }

    #[test]
    fn prop_auxiliary_plane_describes_the_same_couple(m in arb_regular_plane()) {
        let aux = auxiliary_plane(m);
        prop_assert!(tensors_close(to_moment_tensor(m, 1.0), to_moment_tensor(aux, 1.0)));
        let back = auxiliary_plane(aux);
        prop_assert!(tensors_close(to_moment_tensor(m, 1.0), to_moment_tensor(back, 1.0)));
        prop_assert!((back.dip - m.dip).abs() < 1e-6);
    }

    #[test]
    fn prop_partition_covers_every_candidate_once(n in 0usize..500, parts in 0usize..32) {
        let shards = partition_even(n, parts);
        prop_assert!(shards.len() <= parts.max(1));
        prop_assert_eq!(shards.iter().map(|r| r.len()).sum::<usize>(), n);
        let mut next = 0;
        for r in &shards {
            prop_assert_eq!(r.start, next);
            prop_assert!(!r.is_empty());
            next = r.end;
        }
        if let (Some(max), Some(min)) = (
            shards.iter().map(|r| r.len()).max(),
            shards.iter().map(|r| r.len()).min(),
        ) {
            prop_assert!(max - min <= 1);
        }
    }

    #[test]
    fn prop_sort_by_misfit_orders_and_is_stable(misfits in proptest::collection::vec(0.0f64..10.0, 0..60)) {
        let mut records: Vec<SolutionRecord> = misfits.iter().map(|m| record(*m)).collect();
        sort_by_misfit(&mut records);
        prop_assert_eq!(records.len(), misfits.len());
        prop_assert!(records.windows(2).all(|w| w[0].misfit() <= w[1].misfit()));
        let again = {
            let mut r = records.clone();
            sort_by_misfit(&mut r);
            r
        };
        prop_assert_eq!(again, records);
    }

    #[test]
    fn prop_refine_window_never_grows(step in 1.0f64..5000.0, reduction in 1.0f64..8.0, irun in 1u32..10) {
        let now = RefineAxis::shrinking(step, irun, reduction);
        let later = RefineAxis::shrinking(step, irun + 1, reduction);
        prop_assert!(later.span <= now.span);
        prop_assert!(later.stride <= now.stride);
        prop_assert!(now.stride >= 1.0);
    }

    #[test]
    fn prop_empirical_interval_is_ordered(samples in proptest::collection::vec(-100.0f64..100.0, 1..200)) {
        let ci = ConfidenceInterval::from_samples(&samples, ConfidenceLevel::P95, Distribution::Empirical).unwrap();
        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        prop_assert!(ci.lower <= ci.upper);
        prop_assert!(ci.lower >= min && ci.upper <= max);
    }

    #[test]
    fn prop_bootstrap_winners_are_seed_reproducible(
        rows in proptest::collection::vec(proptest::collection::vec(0.01f64..5.0, 8), 1..12),
        seed in any::<u64>(),
    ) {
        let candidates: Vec<TraceMisfits> = rows
            .iter()
            .map(|r| TraceMisfits { misfits: r.clone(), normcoefs: vec![1.0; r.len()] })
            .collect();
        let a = BootstrapEstimator::seeded(50, seed).winners(&candidates).unwrap();
        let b = BootstrapEstimator::seeded(50, seed).winners(&candidates).unwrap();
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(a.len(), 50);
        prop_assert!(a.iter().all(|w| *w < candidates.len()));
    }
}

/// 21 candidates over 12 traces; every candidate wins on some traces, so the
/// bootstrap winners spread over several depths.
fn crossing_candidates() -> Vec<TraceMisfits> {
    (0..21)
        .map(|c| {
            let misfits = (0..12)
                .map(|t| {
                    let r = 1.0 + ((c * 5 + t * 7) % 11) as f64 / 10.0;
                    r * r
                })
                .collect();
            TraceMisfits { misfits, normcoefs: vec![1.0; 12] }
        })
        .collect()
}

/// Mean and seed-to-seed spread of the normal 95% interval width of the
/// winning depths.
fn interval_widths(candidates: &[TraceMisfits], draws: usize) -> (f64, f64) {
    let widths: Vec<f64> = (0..64u64)
        .map(|seed| {
            let winners = BootstrapEstimator::seeded(draws, seed).winners(candidates).unwrap();
            let depths: Vec<f64> = winners.iter().map(|w| 1000.0 * *w as f64).collect();
            ConfidenceInterval::from_samples(&depths, ConfidenceLevel::P95, Distribution::Normal)
                .unwrap()
                .width()
        })
        .collect();
    let mean = widths.iter().sum::<f64>() / widths.len() as f64;
    let var = widths.iter().map(|w| (w - mean).powi(2)).sum::<f64>() / widths.len() as f64;
    (mean, var.sqrt())
}

#[test]
fn interval_width_settles_as_draws_grow() {
    let candidates = crossing_candidates();
    let (few, few_spread) = interval_widths(&candidates, 50);
    let (many, many_spread) = interval_widths(&candidates, 2000);
    assert!(few > 0.0 && many > 0.0);
    // the population std is biased low on small samples; allow 15%
    assert!(many <= few * 1.15, "width grew from {few} to {many}");
    assert!(many_spread < few_spread, "spread {few_spread} -> {many_spread}");
}
