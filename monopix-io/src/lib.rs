//! monopix-io: file I/O and the analysis driver for monopix.
//!
//! Raw files are memory-mapped via memmap2 and read as little-endian words.
//! The run description next to each raw file supplies the meta table and
//! scan settings; [`analyze_file`] runs the full chain and streams its
//! tables to an output directory.
//!

pub mod analysis;
mod error;
#[cfg(feature = "hdf5")]
pub mod hdf5;
pub mod mask;
mod reader;
pub mod run;
pub mod writer;

pub use analysis::{
    analyze_file, analyze_file_with_run, analyze_files, load_calibration, AnalysisConfig,
    AnalysisOutput, AnalysisSummary, FitSummary,
};
pub use error::{Error, Result};
#[cfg(feature = "hdf5")]
pub use hdf5::{Hdf5Output, Hdf5WriteOptions};
pub use mask::{noisy_pixels, PixelMask};
pub use reader::{MappedFileReader, RawDataFile, WORD_BYTES};
pub use run::RunDescription;
pub use writer::{write_array, CsvTableWriter, OutputDirectory};
