//! Cluster records and clustering configuration.

use crate::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Shape code of clusters that do not fit the 8x8 window.
pub const UNKNOWN_SHAPE: i64 = -1;

/// One cluster, as produced by the clusterizer.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClusterInfo {
    pub event_number: u64,
    /// Index of the cluster within its event.
    pub id: u16,
    /// Number of member hits.
    pub size: u16,
    /// Sum of member charges.
    pub charge: u32,
    pub seed_col: u16,
    pub seed_row: u16,
    /// Charge-weighted centroid column.
    pub mean_col: f64,
    /// Charge-weighted centroid row.
    pub mean_row: f64,
    /// Bounding box extent along columns, `max - min + 1`.
    pub dist_col: u16,
    /// Bounding box extent along rows.
    pub dist_row: u16,
    /// 8x8 occupancy code, [`UNKNOWN_SHAPE`] when it does not fit.
    pub shape: i64,
    pub scan_param_id: u32,
}

/// A batch of clusters stored in `SoA` format.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClusterBatch {
    pub event_number: Vec<u64>,
    pub id: Vec<u16>,
    pub size: Vec<u16>,
    pub charge: Vec<u32>,
    pub seed_col: Vec<u16>,
    pub seed_row: Vec<u16>,
    pub mean_col: Vec<f64>,
    pub mean_row: Vec<f64>,
    pub dist_col: Vec<u16>,
    pub dist_row: Vec<u16>,
    pub shape: Vec<i64>,
    pub scan_param_id: Vec<u32>,
}

impl ClusterBatch {
    /// Creates a new empty batch with specified capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            event_number: Vec::with_capacity(capacity),
            id: Vec::with_capacity(capacity),
            size: Vec::with_capacity(capacity),
            charge: Vec::with_capacity(capacity),
            seed_col: Vec::with_capacity(capacity),
            seed_row: Vec::with_capacity(capacity),
            mean_col: Vec::with_capacity(capacity),
            mean_row: Vec::with_capacity(capacity),
            dist_col: Vec::with_capacity(capacity),
            dist_row: Vec::with_capacity(capacity),
            shape: Vec::with_capacity(capacity),
            scan_param_id: Vec::with_capacity(capacity),
        }
    }

    /// Returns the number of clusters in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.id.len()
    }

    /// Returns true if the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.id.is_empty()
    }

    /// Appends one cluster.
    pub fn push(&mut self, cluster: &ClusterInfo) {
        self.event_number.push(cluster.event_number);
        self.id.push(cluster.id);
        self.size.push(cluster.size);
        self.charge.push(cluster.charge);
        self.seed_col.push(cluster.seed_col);
        self.seed_row.push(cluster.seed_row);
        self.mean_col.push(cluster.mean_col);
        self.mean_row.push(cluster.mean_row);
        self.dist_col.push(cluster.dist_col);
        self.dist_row.push(cluster.dist_row);
        self.shape.push(cluster.shape);
        self.scan_param_id.push(cluster.scan_param_id);
    }

    /// Returns cluster `i` as a row.
    #[must_use]
    pub fn get(&self, i: usize) -> Option<ClusterInfo> {
        if i >= self.len() {
            return None;
        }
        Some(ClusterInfo {
            event_number: self.event_number[i],
            id: self.id[i],
            size: self.size[i],
            charge: self.charge[i],
            seed_col: self.seed_col[i],
            seed_row: self.seed_row[i],
            mean_col: self.mean_col[i],
            mean_row: self.mean_row[i],
            dist_col: self.dist_col[i],
            dist_row: self.dist_row[i],
            shape: self.shape[i],
            scan_param_id: self.scan_param_id[i],
        })
    }

    /// Iterates over the clusters as rows.
    pub fn iter(&self) -> impl Iterator<Item = ClusterInfo> + '_ {
        (0..self.len()).filter_map(|i| self.get(i))
    }
}

/// Maximum (exclusive) hit charge for raw ToT values.
pub const MAX_RAW_CHARGE: u16 = 128;
/// Maximum (exclusive) hit charge once a ToT calibration is applied.
pub const MAX_CALIBRATED_CHARGE: u16 = 2048;

/// Configuration for the clusterizer.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClusterizerConfig {
    /// Maximum column distance between connected hits.
    pub column_cluster_distance: u16,
    /// Maximum row distance between connected hits.
    pub row_cluster_distance: u16,
    /// Maximum frame distance between connected hits.
    pub frame_cluster_distance: u8,
    /// Hits with a smaller charge are not clustered.
    pub min_hit_charge: u16,
    /// Hits with this charge or more are not clustered.
    pub max_hit_charge: u16,
    /// Skip a pixel that fires again inside the same event.
    pub ignore_same_hits: bool,
}

impl Default for ClusterizerConfig {
    fn default() -> Self {
        Self {
            column_cluster_distance: 5,
            row_cluster_distance: 5,
            frame_cluster_distance: 1,
            min_hit_charge: 0,
            max_hit_charge: MAX_RAW_CHARGE,
            ignore_same_hits: true,
        }
    }
}

impl ClusterizerConfig {
    /// Creates a new clusterizer configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults for calibrated charge input.
    #[must_use]
    pub fn calibrated() -> Self {
        Self {
            max_hit_charge: MAX_CALIBRATED_CHARGE,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_column_cluster_distance(mut self, distance: u16) -> Self {
        self.column_cluster_distance = distance;
        self
    }

    #[must_use]
    pub fn with_row_cluster_distance(mut self, distance: u16) -> Self {
        self.row_cluster_distance = distance;
        self
    }

    #[must_use]
    pub fn with_frame_cluster_distance(mut self, distance: u8) -> Self {
        self.frame_cluster_distance = distance;
        self
    }

    #[must_use]
    pub fn with_min_hit_charge(mut self, charge: u16) -> Self {
        self.min_hit_charge = charge;
        self
    }

    #[must_use]
    pub fn with_max_hit_charge(mut self, charge: u16) -> Self {
        self.max_hit_charge = charge;
        self
    }

    #[must_use]
    pub fn with_ignore_same_hits(mut self, ignore: bool) -> Self {
        self.ignore_same_hits = ignore;
        self
    }

    /// True if `charge` lies in `[min_hit_charge, max_hit_charge)`.
    #[inline]
    #[must_use]
    pub fn accepts_charge(&self, charge: u16) -> bool {
        charge >= self.min_hit_charge && charge < self.max_hit_charge
    }

    /// Checks that the charge window is not empty.
    ///
    /// # Errors
    /// Returns [`Error::ConfigError`] if `min_hit_charge >= max_hit_charge`.
    pub fn validate(&self) -> Result<()> {
        if self.min_hit_charge >= self.max_hit_charge {
            return Err(Error::ConfigError(format!(
                "min_hit_charge ({}) must be below max_hit_charge ({})",
                self.min_hit_charge, self.max_hit_charge
            )));
        }
        Ok(())
    }
}

/// Counters collected while clustering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClusteringStatistics {
    /// Events (groups of equal event number) processed.
    pub events: u64,
    /// Clusters produced.
    pub clusters: u64,
    /// Hits assigned to a cluster.
    pub clustered_hits: u64,
    /// Hits outside the charge window.
    pub rejected_charge: u64,
    /// Repeated pixels skipped inside an event.
    pub same_hits: u64,
}

impl ClusteringStatistics {
    /// Accumulates counters of another run.
    pub fn merge(&mut self, other: &Self) {
        self.events += other.events;
        self.clusters += other.clusters;
        self.clustered_hits += other.clustered_hits;
        self.rejected_charge += other.rejected_charge;
        self.same_hits += other.same_hits;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_batch_operations() {
        let mut batch = ClusterBatch::with_capacity(2);
        assert!(batch.is_empty());

        let info = ClusterInfo {
            event_number: 3,
            id: 0,
            size: 2,
            charge: 7,
            seed_col: 5,
            seed_row: 11,
            mean_col: 5.0,
            mean_row: 10.5,
            dist_col: 1,
            dist_row: 2,
            shape: 5,
            scan_param_id: 1,
        };
        batch.push(&info);

        assert_eq!(batch.len(), 1);
        assert_eq!(batch.get(0), Some(info));
        assert_eq!(batch.get(1), None);
        assert_eq!(batch.iter().count(), 1);
    }

    #[test]
    fn test_clusterizer_config() {
        let config = ClusterizerConfig::new()
            .with_column_cluster_distance(2)
            .with_row_cluster_distance(3)
            .with_frame_cluster_distance(4)
            .with_min_hit_charge(1)
            .with_max_hit_charge(64)
            .with_ignore_same_hits(false);

        assert_eq!(config.column_cluster_distance, 2);
        assert_eq!(config.row_cluster_distance, 3);
        assert_eq!(config.frame_cluster_distance, 4);
        assert!(config.accepts_charge(1));
        assert!(!config.accepts_charge(0));
        assert!(!config.accepts_charge(64));
        assert!(!config.ignore_same_hits);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_clusterizer_config_defaults() {
        let config = ClusterizerConfig::default();
        assert_eq!(config.column_cluster_distance, 5);
        assert_eq!(config.row_cluster_distance, 5);
        assert_eq!(config.frame_cluster_distance, 1);
        assert_eq!(config.max_hit_charge, MAX_RAW_CHARGE);
        assert!(config.ignore_same_hits);
        assert_eq!(
            ClusterizerConfig::calibrated().max_hit_charge,
            MAX_CALIBRATED_CHARGE
        );

        let empty_window = config.with_min_hit_charge(200);
        assert!(empty_window.validate().is_err());
    }
}
