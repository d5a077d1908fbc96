//! monopix-raw: raw word decoder, chunk scheduler and event builder.
//!
//! # Key Components
//!
//! - [`RawWord`] - Bit field extraction for the 32-bit readout words
//! - [`ChunkScheduler`] - Scan-parameter ranges cut into spans with carry-over
//! - [`RawDataInterpreter`] - Stateful decoder producing hits and histograms
//! - [`build_events`] - Assigns hits to trigger events
//!
//! # Processing Pipeline
//!
//! 1. The scheduler collapses the meta table into scan-parameter ranges and
//!    hands out spans of at most `chunk_size` words.
//! 2. The interpreter decodes each span; an open frame at the end of a span is
//!    handed back and re-read with the next one.
//! 3. Committed hits go to storage and to the event builder.

mod error;
pub mod events;
pub mod interpreter;
pub mod scheduler;
pub mod word;

pub use error::{Error, Result};
pub use events::{build_events, hits_as_events, EventBuilderConfig, EventState};
pub use interpreter::{
    interpret_source, ChunkOutcome, DecoderState, InterpreterConfig, InterpreterOutput,
    InterpreterStatistics, RawDataInterpreter,
};
pub use scheduler::{
    scan_param_ranges, ChunkScheduler, ChunkSpan, MetaEntry, ScanParamRange, WordSource,
    DEFAULT_CHUNK_SIZE,
};
pub use word::{RawWord, TriggerDataFormat};

// Re-export core types for convenience
pub use monopix_core::{HitBatch, PixelHistograms};
