//! monopix-core: Core types for monolithic pixel detector data processing.
//!
//! This crate provides the data layout shared by the raw word interpreter,
//! the event builder, the clusterizer and the output writers.
//!

pub mod clustering;
pub mod error;
pub mod histogram;
pub mod hit;
pub mod soa;

pub use clustering::{
    ClusterBatch, ClusterInfo, ClusterizerConfig, ClusteringStatistics, MAX_CALIBRATED_CHARGE,
    MAX_RAW_CHARGE, UNKNOWN_SHAPE,
};
pub use error::{Error, Result};
pub use histogram::{ClusterHistograms, PixelHistograms};
pub use hit::{tot, PixelCoord, N_COLUMNS, N_ROWS, TOT_MODULUS, TRIGGER_COLUMN};
pub use soa::{EventBatch, HitBatch};
