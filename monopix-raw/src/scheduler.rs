//! Chunk scheduling over scan-parameter ranges.
//!
//! The meta table written by the DAQ lists one row per readout. Rows are
//! collapsed into one word range per scan parameter, and every range is cut
//! into spans of at most `chunk_size` words. After each span the interpreter
//! reports how many trailing words it wants to see again; the next span then
//! starts that many words earlier.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Default number of words per span.
pub const DEFAULT_CHUNK_SIZE: usize = 1_000_000;

/// One row of the readout meta table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaEntry {
    pub scan_param_id: u32,
    pub index_start: u64,
    pub index_stop: u64,
}

/// Word range belonging to one scan parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanParamRange {
    pub scan_param_id: u32,
    pub start: usize,
    pub stop: usize,
}

impl ScanParamRange {
    #[must_use]
    pub fn len(&self) -> usize {
        self.stop - self.start
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stop == self.start
    }
}

/// A window of raw words handed to the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub scan_param_id: u32,
    /// First word index (inclusive).
    pub start: usize,
    /// Last word index (exclusive).
    pub stop: usize,
    /// The interpreter may ask for a tail of this span to be re-read.
    pub carry_allowed: bool,
    /// Last span of the file; all pending state must be flushed.
    pub is_final: bool,
}

impl ChunkSpan {
    #[must_use]
    pub fn len(&self) -> usize {
        self.stop - self.start
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stop == self.start
    }

    #[must_use]
    pub fn range(&self) -> Range<usize> {
        self.start..self.stop
    }
}

/// Random access to the raw words of a file.
pub trait WordSource {
    /// Total number of words.
    fn word_count(&self) -> usize;

    /// Replaces the contents of `out` with the words of `range`.
    ///
    /// # Errors
    /// Returns an error if the range lies outside the source.
    fn read_words(&self, range: Range<usize>, out: &mut Vec<u32>) -> Result<()>;
}

impl WordSource for [u32] {
    fn word_count(&self) -> usize {
        self.len()
    }

    fn read_words(&self, range: Range<usize>, out: &mut Vec<u32>) -> Result<()> {
        let words = self.get(range.clone()).ok_or_else(|| {
            Error::CorruptOffsets(format!(
                "word range {}..{} outside source of {} words",
                range.start,
                range.end,
                self.len()
            ))
        })?;
        out.clear();
        out.extend_from_slice(words);
        Ok(())
    }
}

impl WordSource for Vec<u32> {
    fn word_count(&self) -> usize {
        self.len()
    }

    fn read_words(&self, range: Range<usize>, out: &mut Vec<u32>) -> Result<()> {
        self.as_slice().read_words(range, out)
    }
}

fn to_index(value: u64, what: &str) -> Result<usize> {
    usize::try_from(value)
        .map_err(|_| Error::CorruptOffsets(format!("{what} {value} does not fit in memory")))
}

/// Collapses consecutive meta rows of the same scan parameter into ranges.
///
/// A range starts at its first row's `index_start` and stops where the next
/// range starts; the last range stops at the last row's `index_stop`.
///
/// # Errors
/// Returns [`Error::CorruptOffsets`] if a row stops before it starts, if
/// ranges go backwards, or if a range ends beyond `n_words`.
pub fn scan_param_ranges(meta: &[MetaEntry], n_words: usize) -> Result<Vec<ScanParamRange>> {
    let mut ranges: Vec<ScanParamRange> = Vec::new();

    for (i, entry) in meta.iter().enumerate() {
        if entry.index_stop < entry.index_start {
            return Err(Error::CorruptOffsets(format!(
                "meta row {i}: index_stop {} < index_start {}",
                entry.index_stop, entry.index_start
            )));
        }
        let start = to_index(entry.index_start, "index_start")?;
        match ranges.last_mut() {
            Some(last) if last.scan_param_id == entry.scan_param_id => {}
            Some(last) => {
                if start < last.start {
                    return Err(Error::CorruptOffsets(format!(
                        "meta row {i}: scan parameter {} starts at {start}, before the previous range at {}",
                        entry.scan_param_id, last.start
                    )));
                }
                last.stop = start;
                ranges.push(ScanParamRange {
                    scan_param_id: entry.scan_param_id,
                    start,
                    stop: start,
                });
            }
            None => ranges.push(ScanParamRange {
                scan_param_id: entry.scan_param_id,
                start,
                stop: start,
            }),
        }
    }

    if let (Some(last), Some(entry)) = (ranges.last_mut(), meta.last()) {
        let stop = to_index(entry.index_stop, "index_stop")?;
        if stop < last.start {
            return Err(Error::CorruptOffsets(format!(
                "last range of scan parameter {} stops at {stop}, before its start {}",
                last.scan_param_id, last.start
            )));
        }
        last.stop = stop;
    }

    if let Some(last) = ranges.last() {
        if last.stop > n_words {
            return Err(Error::CorruptOffsets(format!(
                "meta data points to word {} but the file holds {n_words} words",
                last.stop
            )));
        }
        if last.stop < n_words {
            log::warn!(
                "{} words after the last meta data index are not interpreted",
                n_words - last.stop
            );
        }
        if let Some(first) = ranges.first() {
            if first.start > 0 {
                log::warn!(
                    "{} words before the first meta data index are not interpreted",
                    first.start
                );
            }
        }
    } else if n_words > 0 {
        log::warn!("no meta data; {n_words} words are not interpreted");
    }

    warn_empty_scan_params(&ranges);
    Ok(ranges)
}

fn warn_empty_scan_params(ranges: &[ScanParamRange]) {
    let Some(max_id) = ranges.iter().map(|r| r.scan_param_id).max() else {
        return;
    };
    let mut has_words = vec![false; max_id as usize + 1];
    for range in ranges.iter().filter(|r| !r.is_empty()) {
        has_words[range.scan_param_id as usize] = true;
    }
    let empty: Vec<usize> = has_words
        .iter()
        .enumerate()
        .filter_map(|(id, &has)| (!has).then_some(id))
        .collect();
    if !empty.is_empty() {
        log::warn!("no data for scan parameter ids {empty:?}");
    }
}

/// Produces [`ChunkSpan`]s lazily and accepts carried offsets.
#[derive(Debug, Clone)]
pub struct ChunkScheduler {
    ranges: Vec<ScanParamRange>,
    chunk_size: usize,
    n_scan_params: usize,
    range_index: usize,
    /// Nominal start of the next span in the current range.
    cursor: usize,
    carried_offset: i64,
    last_span: Option<ChunkSpan>,
}

impl ChunkScheduler {
    /// Builds a scheduler from the meta table of a file of `n_words` words.
    ///
    /// # Errors
    /// Returns [`Error::CorruptOffsets`] for inconsistent meta data and
    /// [`Error::InvalidConfig`] for a zero chunk size.
    pub fn new(meta: &[MetaEntry], n_words: usize, chunk_size: usize) -> Result<Self> {
        let ranges = scan_param_ranges(meta, n_words)?;
        Self::from_ranges(ranges, chunk_size)
    }

    /// Builds a scheduler from already collapsed ranges.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] for a zero chunk size.
    pub fn from_ranges(ranges: Vec<ScanParamRange>, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be > 0".into()));
        }
        let n_scan_params = ranges
            .iter()
            .map(|r| r.scan_param_id as usize + 1)
            .max()
            .unwrap_or(1);
        let ranges: Vec<ScanParamRange> = ranges.into_iter().filter(|r| !r.is_empty()).collect();
        let cursor = ranges.first().map_or(0, |r| r.start);
        Ok(Self {
            ranges,
            chunk_size,
            n_scan_params,
            range_index: 0,
            cursor,
            carried_offset: 0,
            last_span: None,
        })
    }

    /// Number of scan parameter slots, `max(scan_param_id) + 1`.
    #[must_use]
    pub fn n_scan_params(&self) -> usize {
        self.n_scan_params
    }

    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Non-empty word ranges in file order.
    #[must_use]
    pub fn ranges(&self) -> &[ScanParamRange] {
        &self.ranges
    }

    /// Number of words covered by all ranges.
    #[must_use]
    pub fn total_words(&self) -> usize {
        self.ranges.iter().map(ScanParamRange::len).sum()
    }

    /// Returns the next span, or `None` when all ranges are exhausted.
    pub fn next_span(&mut self) -> Option<ChunkSpan> {
        let range = *self.ranges.get(self.range_index)?;
        let start = self.cursor.saturating_add_signed(self.carried_offset as isize);
        let stop = (self.cursor + self.chunk_size).min(range.stop);
        let carry_allowed = stop < range.stop;
        let span = ChunkSpan {
            scan_param_id: range.scan_param_id,
            start,
            stop,
            carry_allowed,
            is_final: !carry_allowed && self.range_index + 1 == self.ranges.len(),
        };

        self.carried_offset = 0;
        if carry_allowed {
            self.cursor = stop;
        } else {
            self.range_index += 1;
            self.cursor = self.ranges.get(self.range_index).map_or(stop, |r| r.start);
        }
        self.last_span = Some(span);
        Some(span)
    }

    /// Records the carried offset reported for the last span.
    ///
    /// # Errors
    /// Returns [`Error::CorruptOffsets`] if the offset is positive, below
    /// `-chunk_size`, would not make progress, or targets a span that does not
    /// allow carrying.
    pub fn report(&mut self, carried_offset: i64) -> Result<()> {
        if carried_offset > 0 || carried_offset < -(self.chunk_size as i64) {
            return Err(Error::CorruptOffsets(format!(
                "carried offset {carried_offset} outside [-{}, 0]",
                self.chunk_size
            )));
        }
        if carried_offset == 0 {
            return Ok(());
        }
        let Some(span) = self.last_span else {
            return Err(Error::CorruptOffsets(
                "carried offset reported before any span".into(),
            ));
        };
        if !span.carry_allowed {
            return Err(Error::CorruptOffsets(format!(
                "carried offset {carried_offset} for span {}..{} that does not allow carrying",
                span.start, span.stop
            )));
        }
        if carried_offset.unsigned_abs() >= span.len() as u64 {
            return Err(Error::CorruptOffsets(format!(
                "carried offset {carried_offset} re-reads the whole span {}..{}",
                span.start, span.stop
            )));
        }
        self.carried_offset = carried_offset;
        Ok(())
    }
}
