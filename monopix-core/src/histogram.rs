//! Fixed-size histograms filled during interpretation and clustering.

use ndarray::{Array1, Array3, Axis};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::clustering::ClusterBatch;
use crate::hit::{N_COLUMNS, N_ROWS, TOT_MODULUS};

/// Number of TDC value bins (12-bit TDC).
pub const TDC_BINS: usize = 4096;
/// Number of cluster size bins.
pub const CLUSTER_SIZE_BINS: usize = 30;
/// Number of cluster charge bins for raw ToT.
pub const CLUSTER_CHARGE_BINS: usize = 256;
/// Number of cluster charge bins for calibrated charge.
pub const CLUSTER_CALIBRATED_CHARGE_BINS: usize = 2048;
/// Number of cluster shape bins.
pub const CLUSTER_SHAPE_BINS: usize = 300;

/// Per-pixel histograms produced by the interpreter.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PixelHistograms {
    /// Hits per `[col][row][scan_param_id]`.
    pub occupancy: Array3<u32>,
    /// ToT spectrum per `[col][row][tot]`, saturating.
    pub tot: Array3<u16>,
    /// TDC value spectrum.
    pub tdc: Array1<u32>,
}

impl PixelHistograms {
    /// Creates empty histograms for `n_scan_params` scan steps (at least one).
    #[must_use]
    pub fn new(n_scan_params: usize) -> Self {
        Self {
            occupancy: Array3::zeros((N_COLUMNS, N_ROWS, n_scan_params.max(1))),
            tot: Array3::zeros((N_COLUMNS, N_ROWS, usize::from(TOT_MODULUS))),
            tdc: Array1::zeros(TDC_BINS),
        }
    }

    /// Number of scan parameter slots of the occupancy histogram.
    #[must_use]
    pub fn n_scan_params(&self) -> usize {
        self.occupancy.len_of(Axis(2))
    }

    /// Counts one pixel hit. Returns false if the hit is outside the histogram.
    pub fn fill_hit(&mut self, col: u16, row: u16, scan_param_id: u32, tot: u8) -> bool {
        let (c, r) = (usize::from(col), usize::from(row));
        let Ok(p) = usize::try_from(scan_param_id) else {
            return false;
        };
        if c >= N_COLUMNS || r >= N_ROWS || p >= self.n_scan_params() {
            return false;
        }
        self.occupancy[[c, r, p]] += 1;
        let bin = &mut self.tot[[c, r, usize::from(tot) % usize::from(TOT_MODULUS)]];
        *bin = bin.saturating_add(1);
        true
    }

    /// Counts one TDC value.
    pub fn fill_tdc(&mut self, value: u16) {
        if let Some(bin) = self.tdc.get_mut(usize::from(value)) {
            *bin += 1;
        }
    }

    /// Total number of counted pixel hits.
    #[must_use]
    pub fn total_hits(&self) -> u64 {
        self.occupancy.iter().map(|&v| u64::from(v)).sum()
    }

    /// Occupancy summed over scan parameters, `[col][row]`.
    #[must_use]
    pub fn occupancy_sum(&self) -> ndarray::Array2<u64> {
        self.occupancy.map(|&v| u64::from(v)).sum_axis(Axis(2))
    }
}

/// Cluster histograms accumulated across chunks.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClusterHistograms {
    pub size: Array1<u32>,
    pub charge: Array1<u32>,
    pub shape: Array1<u32>,
}

impl ClusterHistograms {
    /// Empty histograms; `calibrated` widens the charge axis.
    #[must_use]
    pub fn new(calibrated: bool) -> Self {
        let charge_bins = if calibrated {
            CLUSTER_CALIBRATED_CHARGE_BINS
        } else {
            CLUSTER_CHARGE_BINS
        };
        Self {
            size: Array1::zeros(CLUSTER_SIZE_BINS),
            charge: Array1::zeros(charge_bins),
            shape: Array1::zeros(CLUSTER_SHAPE_BINS),
        }
    }

    /// Adds every cluster of `clusters`. Out-of-range values are skipped.
    pub fn fill(&mut self, clusters: &ClusterBatch) {
        for &size in &clusters.size {
            if let Some(bin) = self.size.get_mut(usize::from(size)) {
                *bin += 1;
            }
        }
        for &charge in &clusters.charge {
            if let Some(bin) = usize::try_from(charge)
                .ok()
                .and_then(|c| self.charge.get_mut(c))
            {
                *bin += 1;
            }
        }
        for &shape in &clusters.shape {
            if shape > 0 {
                if let Some(bin) = usize::try_from(shape)
                    .ok()
                    .and_then(|s| self.shape.get_mut(s))
                {
                    *bin += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::ClusterInfo;

    #[test]
    fn test_pixel_histograms_fill() {
        let mut hist = PixelHistograms::new(3);
        assert_eq!(hist.n_scan_params(), 3);

        assert!(hist.fill_hit(5, 10, 2, 3));
        assert!(hist.fill_hit(5, 10, 2, 3));
        assert!(!hist.fill_hit(512, 10, 0, 3));
        assert!(!hist.fill_hit(5, 10, 3, 3));

        assert_eq!(hist.occupancy[[5, 10, 2]], 2);
        assert_eq!(hist.tot[[5, 10, 3]], 2);
        assert_eq!(hist.total_hits(), 2);
        assert_eq!(hist.occupancy_sum()[[5, 10]], 2);

        hist.fill_tdc(4095);
        hist.fill_tdc(4096);
        assert_eq!(hist.tdc[4095], 1);
        assert_eq!(hist.tdc.sum(), 1);
    }

    #[test]
    fn test_tot_histogram_saturates() {
        let mut hist = PixelHistograms::new(1);
        hist.tot[[0, 0, 1]] = u16::MAX;
        hist.fill_hit(0, 0, 0, 1);
        assert_eq!(hist.tot[[0, 0, 1]], u16::MAX);
        assert_eq!(hist.occupancy[[0, 0, 0]], 1);
    }

    #[test]
    fn test_cluster_histograms_ranges() {
        let mut clusters = ClusterBatch::default();
        let base = ClusterInfo {
            event_number: 0,
            id: 0,
            size: 2,
            charge: 7,
            seed_col: 0,
            seed_row: 0,
            mean_col: 0.0,
            mean_row: 0.0,
            dist_col: 1,
            dist_row: 2,
            shape: 5,
            scan_param_id: 0,
        };
        clusters.push(&base);
        clusters.push(&ClusterInfo {
            size: 31,
            charge: 300,
            shape: -1,
            ..base
        });
        clusters.push(&ClusterInfo {
            shape: 300,
            ..base
        });

        let mut hist = ClusterHistograms::new(false);
        hist.fill(&clusters);
        assert_eq!(hist.size[2], 2);
        assert_eq!(hist.size.sum(), 2);
        assert_eq!(hist.charge[7], 2);
        assert_eq!(hist.charge.sum(), 2);
        assert_eq!(hist.shape[5], 1);
        assert_eq!(hist.shape.sum(), 1);

        let mut calibrated = ClusterHistograms::new(true);
        calibrated.fill(&clusters);
        assert_eq!(calibrated.charge.len(), CLUSTER_CALIBRATED_CHARGE_BINS);
        assert_eq!(calibrated.charge[300], 1);
    }
}
