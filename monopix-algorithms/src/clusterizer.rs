//! Single-linkage clustering of event hits.
//!
//! Hits of one event (a contiguous run of equal `event_number`) are connected
//! when they are within the configured column, row and frame distance. The
//! connected components are the clusters.

use std::collections::HashSet;
use std::ops::Range;

use monopix_core::{
    ClusterBatch, ClusterHistograms, ClusterInfo, ClusterizerConfig, ClusteringStatistics,
    EventBatch, PixelCoord, Result,
};

use crate::calibration::TotCalibration;
use crate::graph::UnionFind;
use crate::shape::cluster_shape;
use crate::spatial::SpatialGrid;

/// Clusters event hits chunk by chunk and accumulates cluster histograms.
///
/// An event may continue in the next chunk, so [`Clusterizer::cluster_chunk`]
/// holds back the last event of every chunk until the following call.
#[derive(Debug)]
pub struct Clusterizer {
    config: ClusterizerConfig,
    calibration: Option<TotCalibration>,
    histograms: ClusterHistograms,
    statistics: ClusteringStatistics,
    uncalibrated_hits: u64,
    held: EventBatch,
    uf: UnionFind,
    grid: SpatialGrid<usize>,
    members: Vec<usize>,
    seen: HashSet<PixelCoord>,
}

impl Clusterizer {
    /// Creates a clusterizer working on raw ToT.
    ///
    /// # Errors
    /// Returns an error if the charge window of `config` is empty.
    pub fn new(config: ClusterizerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            grid: SpatialGrid::new(config.column_cluster_distance, config.row_cluster_distance),
            config,
            calibration: None,
            histograms: ClusterHistograms::new(false),
            statistics: ClusteringStatistics::default(),
            uncalibrated_hits: 0,
            held: EventBatch::default(),
            uf: UnionFind::default(),
            members: Vec::new(),
            seen: HashSet::new(),
        })
    }

    /// Converts ToT to charge before clustering. Switches the cluster charge
    /// histogram to the calibrated range.
    #[must_use]
    pub fn with_calibration(mut self, calibration: TotCalibration) -> Self {
        self.calibration = Some(calibration);
        self.histograms = ClusterHistograms::new(true);
        self
    }

    #[must_use]
    pub fn config(&self) -> &ClusterizerConfig {
        &self.config
    }

    #[must_use]
    pub fn is_calibrated(&self) -> bool {
        self.calibration.is_some()
    }

    #[must_use]
    pub fn histograms(&self) -> &ClusterHistograms {
        &self.histograms
    }

    #[must_use]
    pub fn statistics(&self) -> &ClusteringStatistics {
        &self.statistics
    }

    /// Hits whose pixel had no usable calibration.
    #[must_use]
    pub fn uncalibrated_hits(&self) -> u64 {
        self.uncalibrated_hits
    }

    /// Returns the accumulated histograms and counters.
    #[must_use]
    pub fn into_parts(self) -> (ClusterHistograms, ClusteringStatistics) {
        (self.histograms, self.statistics)
    }

    /// Clusters one chunk of event hits.
    ///
    /// The hits held back from the previous call are prepended. Unless
    /// `is_final`, the last event is held back again. Returns the clustered
    /// hits with `cluster_id` set and their clusters.
    pub fn cluster_chunk(&mut self, events: EventBatch, is_final: bool) -> (EventBatch, ClusterBatch) {
        let mut batch = std::mem::take(&mut self.held);
        if batch.is_empty() {
            batch = events;
        } else {
            batch.append(&events);
        }

        if !is_final {
            if let Some(last) = batch.event_ranges().pop() {
                self.held = batch.split_off(last.start);
            }
        }
        let clusters = self.cluster(&mut batch);
        (batch, clusters)
    }

    /// Clusters every event of `events` in place and fills the histograms.
    pub fn cluster(&mut self, events: &mut EventBatch) -> ClusterBatch {
        if let Some(calibration) = &self.calibration {
            self.uncalibrated_hits += calibration.apply(events) as u64;
        }
        let mut clusters = ClusterBatch::with_capacity(events.len() / 2);
        for range in events.event_ranges() {
            self.cluster_event(events, range, &mut clusters);
        }
        self.histograms.fill(&clusters);
        clusters
    }

    fn cluster_event(&mut self, events: &mut EventBatch, range: Range<usize>, out: &mut ClusterBatch) {
        let Self {
            config,
            statistics,
            uf,
            grid,
            members,
            seen,
            ..
        } = self;

        statistics.events += 1;
        members.clear();
        seen.clear();
        grid.clear();

        for i in range {
            events.cluster_id[i] = -1;
            if !config.accepts_charge(events.charge[i]) {
                statistics.rejected_charge += 1;
                continue;
            }
            if config.ignore_same_hits && !seen.insert(PixelCoord::new(events.col[i], events.row[i])) {
                statistics.same_hits += 1;
                continue;
            }
            members.push(i);
        }

        uf.reset(members.len());
        for (k, &i) in members.iter().enumerate() {
            let (col, row, frame) = (events.col[i], events.row[i], events.frame[i]);
            for &j in grid.query_neighborhood(i32::from(col), i32::from(row)) {
                let other = members[j];
                if events.col[other].abs_diff(col) <= config.column_cluster_distance
                    && events.row[other].abs_diff(row) <= config.row_cluster_distance
                    && events.frame[other].abs_diff(frame) <= config.frame_cluster_distance
                {
                    uf.union(k, j);
                }
            }
            grid.insert(i32::from(col), i32::from(row), k);
        }

        // Number clusters in order of their first member.
        let mut label = vec![usize::MAX; members.len()];
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for k in 0..members.len() {
            let root = uf.find(k);
            if label[root] == usize::MAX {
                label[root] = groups.len();
                groups.push(Vec::new());
            }
            let id = label[root];
            groups[id].push(members[k]);
            events.cluster_id[members[k]] = id as i32;
        }

        statistics.clusters += groups.len() as u64;
        statistics.clustered_hits += members.len() as u64;
        for (id, group) in groups.iter().enumerate() {
            out.push(&describe_cluster(events, group, id));
        }
    }
}

/// Computes the cluster record of the member hits `group` (non-empty, in
/// hit order).
fn describe_cluster(events: &EventBatch, group: &[usize], id: usize) -> ClusterInfo {
    let first = group[0];
    let mut seed = first;
    let mut charge_sum = 0u64;
    let (mut sum_col, mut sum_row) = (0.0, 0.0);
    let (mut weighted_col, mut weighted_row) = (0.0, 0.0);
    let (mut min_col, mut max_col) = (events.col[first], events.col[first]);
    let (mut min_row, mut max_row) = (events.row[first], events.row[first]);
    let mut pixels = Vec::with_capacity(group.len());

    for &i in group {
        let (col, row, charge) = (events.col[i], events.row[i], events.charge[i]);
        if charge > events.charge[seed] {
            seed = i;
        }
        charge_sum += u64::from(charge);
        sum_col += f64::from(col);
        sum_row += f64::from(row);
        weighted_col += f64::from(col) * f64::from(charge);
        weighted_row += f64::from(row) * f64::from(charge);
        min_col = min_col.min(col);
        max_col = max_col.max(col);
        min_row = min_row.min(row);
        max_row = max_row.max(row);
        pixels.push((col, row));
    }

    let size = group.len() as f64;
    let (mean_col, mean_row) = if charge_sum > 0 {
        let total = charge_sum as f64;
        (weighted_col / total, weighted_row / total)
    } else {
        (sum_col / size, sum_row / size)
    };

    ClusterInfo {
        event_number: events.event_number[first],
        id: u16::try_from(id).unwrap_or(u16::MAX),
        size: u16::try_from(group.len()).unwrap_or(u16::MAX),
        charge: u32::try_from(charge_sum).unwrap_or(u32::MAX),
        seed_col: events.col[seed],
        seed_row: events.row[seed],
        mean_col,
        mean_row,
        dist_col: max_col - min_col + 1,
        dist_row: max_row - min_row + 1,
        shape: cluster_shape(&pixels),
        scan_param_id: events.scan_param_id[first],
    }
}

/// Clusters `events` in place with a fresh [`Clusterizer`].
///
/// # Errors
/// Returns an error if the charge window of `config` is empty.
pub fn cluster_events(
    events: &mut EventBatch,
    config: &ClusterizerConfig,
) -> Result<(ClusterBatch, ClusteringStatistics)> {
    let mut clusterizer = Clusterizer::new(config.clone())?;
    let clusters = clusterizer.cluster(events);
    Ok((clusters, clusterizer.statistics))
}
