//! monopix-algorithms: Clustering, charge calibration and s-curve fitting.
//!
//! This crate provides:
//! - **Clusterizer** - single-linkage clustering of event hits with union-find
//!   over a spatial grid, shape codes and cluster histograms
//! - **ToT calibration** - per-pixel inverse ToT response
//! - **S-curve fitter** - threshold and noise maps from injection scans,
//!   parallel over pixels
//!

pub mod calibration;
mod clusterizer;
mod graph;
pub mod scurve;
pub mod shape;
pub mod spatial;

pub use calibration::{inverse_tot_response, TotCalibration, UNCALIBRATED_CHARGE};
pub use clusterizer::{cluster_events, Clusterizer};
pub use graph::UnionFind;
pub use scurve::{fit_scurve, fit_scurves, ScurveFit, ScurveMaps, FIT_SENTINEL};
pub use shape::{cluster_shape, morton};
pub use spatial::SpatialGrid;

// Re-export core clustering types
pub use monopix_core::clustering::{ClusterizerConfig, ClusteringStatistics};
