#![allow(
    clippy::uninlined_format_args,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss
)]
use approx::assert_abs_diff_eq;
use monopix_algorithms::{cluster_events, fit_scurves, ClusterizerConfig, FIT_SENTINEL};
use monopix_core::EventBatch;
use ndarray::Array3;

struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u32 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (self.0 >> 33) as u32
    }
}

fn generate_events(n_events: u64, seed: u64) -> EventBatch {
    let mut rng = Lcg(seed);
    let mut batch = EventBatch::default();
    for event in 0..n_events {
        let n_hits = rng.next() % 12;
        let (cx, cy) = (rng.next() % 500, rng.next() % 500);
        for _ in 0..n_hits {
            let col = (cx + rng.next() % 12) as u16;
            let row = (cy + rng.next() % 12) as u16;
            let charge = (rng.next() % 140) as u16;
            let frame = (rng.next() % 3) as u8;
            batch.push(event, event as u32, frame, col, row, charge, 0, 0);
        }
    }
    batch
}

#[test]
fn test_scenario_two_neighbouring_hits() {
    let mut batch = EventBatch::default();
    batch.push(0, 0, 0, 5, 10, 3, 0, 0);
    batch.push(0, 0, 0, 5, 11, 4, 0, 0);

    let (clusters, _) = cluster_events(&mut batch, &ClusterizerConfig::default()).unwrap();
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters.size[0], 2);
    assert_eq!(clusters.charge[0], 7);
    assert_eq!((clusters.seed_col[0], clusters.seed_row[0]), (5, 11));
    assert_abs_diff_eq!(clusters.mean_col[0], 5.0);
    assert_abs_diff_eq!(clusters.mean_row[0], 10.571, epsilon = 1e-3);
}

#[test]
fn test_membership_is_partition() {
    let config = ClusterizerConfig::default().with_ignore_same_hits(false);
    let mut batch = generate_events(500, 42);
    let (clusters, stats) = cluster_events(&mut batch, &config).unwrap();

    let clustered: Vec<usize> = (0..batch.len())
        .filter(|&i| batch.cluster_id[i] >= 0)
        .collect();
    assert_eq!(clustered.len() as u64, stats.clustered_hits);
    let rejected = (0..batch.len())
        .filter(|&i| !config.accepts_charge(batch.charge[i]))
        .count();
    assert_eq!(clustered.len() + rejected, batch.len());

    // every clustered hit belongs to exactly one cluster of its event
    let total_size: u64 = clusters.size.iter().map(|&s| u64::from(s)).sum();
    assert_eq!(total_size, stats.clustered_hits);
    for cluster in clusters.iter() {
        let members = clustered
            .iter()
            .filter(|&&i| {
                batch.event_number[i] == cluster.event_number
                    && batch.cluster_id[i] == i32::from(cluster.id)
            })
            .count();
        assert_eq!(members, usize::from(cluster.size));
    }
}

#[test]
fn test_seed_has_highest_charge() {
    let mut batch = generate_events(300, 7);
    let (clusters, _) = cluster_events(&mut batch, &ClusterizerConfig::default()).unwrap();

    for cluster in clusters.iter() {
        let members: Vec<usize> = (0..batch.len())
            .filter(|&i| {
                batch.event_number[i] == cluster.event_number
                    && batch.cluster_id[i] == i32::from(cluster.id)
            })
            .collect();
        let seed = members
            .iter()
            .find(|&&i| batch.col[i] == cluster.seed_col && batch.row[i] == cluster.seed_row)
            .copied()
            .unwrap();
        let max_charge = members.iter().map(|&i| batch.charge[i]).max().unwrap();
        assert_eq!(batch.charge[seed], max_charge);
        // first encountered among equals
        let first_max = members
            .iter()
            .find(|&&i| batch.charge[i] == max_charge)
            .unwrap();
        assert_eq!(*first_max, seed);

        let charge: u32 = members.iter().map(|&i| u32::from(batch.charge[i])).sum();
        assert_eq!(charge, cluster.charge);
    }
}

#[test]
fn test_cluster_ids_follow_first_member() {
    let mut batch = generate_events(200, 3);
    cluster_events(&mut batch, &ClusterizerConfig::default()).unwrap();
    for range in batch.event_ranges() {
        let mut next = 0;
        for i in range {
            let id = batch.cluster_id[i];
            if id < 0 {
                continue;
            }
            assert!(id <= next, "cluster id {} before {}", id, next);
            if id == next {
                next += 1;
            }
        }
    }
}

#[test]
fn test_scurve_scenario_threshold() {
    let mut occupancy = Array3::<u32>::zeros((1, 1, 7));
    for (p, &count) in [0, 0, 5, 50, 95, 100, 100].iter().enumerate() {
        occupancy[[0, 0, p]] = count;
    }
    let levels = [10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0];
    let maps = fit_scurves(occupancy.view(), &levels, 100.0).unwrap();
    assert_abs_diff_eq!(maps.threshold[[0, 0]], 40.0, epsilon = 0.5);
    assert!(maps.noise[[0, 0]] > 0.0);
    assert!(maps.chi2[[0, 0]] >= 0.0);
}

#[test]
fn test_all_zero_occupancy_is_sentinel() {
    let occupancy = Array3::<u32>::zeros((8, 8, 10));
    let levels: Vec<f64> = (0..10).map(f64::from).collect();
    let maps = fit_scurves(occupancy.view(), &levels, 100.0).unwrap();
    assert!(maps.threshold.iter().all(|&t| t == FIT_SENTINEL));
    assert!(maps.noise.iter().all(|&n| n == FIT_SENTINEL));
    assert_eq!(maps.failed, 64);
}

#[test]
fn test_fitter_idempotent() {
    let mut occupancy = Array3::<u32>::zeros((3, 3, 15));
    let mut rng = Lcg(9);
    for c in 0..3 {
        for r in 0..3 {
            for p in 0..15 {
                let expected = if p > 6 { 100 } else if p > 4 { 50 } else { 0 };
                occupancy[[c, r, p]] = (expected + rng.next() % 5).min(100);
            }
        }
    }
    let levels: Vec<f64> = (0..15).map(|p| f64::from(p) * 2.0).collect();
    let first = fit_scurves(occupancy.view(), &levels, 100.0).unwrap();
    let second = fit_scurves(occupancy.view(), &levels, 100.0).unwrap();
    assert_eq!(first, second);
}
