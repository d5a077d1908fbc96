//! Stateful raw word interpreter.
//!
//! A pixel hit is built from a leading edge and a later trailing edge of the
//! same pixel. Everything the decoder needs to carry from one span to the next
//! lives in [`DecoderState`], so a span boundary never changes the decoded
//! hit stream.

use std::collections::BTreeMap;

use monopix_core::{HitBatch, PixelCoord, PixelHistograms, TRIGGER_COLUMN};
use serde::{Deserialize, Serialize};

use crate::scheduler::{ChunkScheduler, ChunkSpan, WordSource, DEFAULT_CHUNK_SIZE};
use crate::word::{RawWord, TriggerDataFormat, FRAME_TIMESTAMP_LOW_BITS};
use crate::{Error, Result};

/// Configuration for the raw data interpreter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterpreterConfig {
    /// Words per scheduled span.
    pub chunk_size: usize,
    /// Layout of trigger words.
    pub trigger_data_format: TriggerDataFormat,
    /// Scan parameter slots of the occupancy histogram.
    pub n_scan_params: usize,
    /// Longest tail that may be handed back to the scheduler.
    /// Defaults to `chunk_size`.
    pub max_carry: Option<usize>,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            trigger_data_format: TriggerDataFormat::default(),
            n_scan_params: 1,
            max_carry: None,
        }
    }
}

impl InterpreterConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    #[must_use]
    pub fn with_trigger_data_format(mut self, format: TriggerDataFormat) -> Self {
        self.trigger_data_format = format;
        self
    }

    #[must_use]
    pub fn with_n_scan_params(mut self, n_scan_params: usize) -> Self {
        self.n_scan_params = n_scan_params;
        self
    }

    #[must_use]
    pub fn with_max_carry(mut self, max_carry: usize) -> Self {
        self.max_carry = Some(max_carry);
        self
    }

    /// Longest tail that may be rolled back.
    #[must_use]
    pub fn effective_max_carry(&self) -> usize {
        self.max_carry.unwrap_or(self.chunk_size).min(self.chunk_size)
    }

    /// Capacity to reserve for the per-span hit buffer.
    #[must_use]
    pub fn hit_buffer_capacity(&self) -> usize {
        self.chunk_size.saturating_mul(4)
    }

    /// Checks the configuration.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] if `chunk_size` or `n_scan_params` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be > 0".into()));
        }
        if self.n_scan_params == 0 {
            return Err(Error::InvalidConfig("n_scan_params must be > 0".into()));
        }
        Ok(())
    }
}

/// Word and hit counters of an interpretation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterpreterStatistics {
    pub words: u64,
    pub frame_headers: u64,
    pub leading_edges: u64,
    pub trailing_edges: u64,
    pub timestamp_words: u64,
    pub trigger_words: u64,
    pub tdc_words: u64,
    pub unknown_words: u64,
    /// Pixel hits emitted, forced closures included.
    pub hits: u64,
    /// Pending hits closed without a trailing edge.
    pub forced_closures: u64,
    /// Leading edges for a pixel that was already pending.
    pub duplicate_leading_edges: u64,
    /// Trailing edges without a pending leading edge.
    pub orphan_trailing_edges: u64,
    /// Hits outside the occupancy histogram.
    pub histogram_overflows: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingHit {
    le: u8,
    scan_param_id: u32,
    timestamp: i64,
    trigger_number: u32,
}

/// Frame timestamp assembled from header and high words.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct FrameClock {
    high: i64,
    last_low: Option<u32>,
    high_since_header: bool,
    timestamp: i64,
}

impl FrameClock {
    fn header(&mut self, low: u32) {
        if let Some(previous) = self.last_low {
            if !self.high_since_header && low < previous {
                self.high += 1 << FRAME_TIMESTAMP_LOW_BITS;
            }
        }
        self.last_low = Some(low);
        self.high_since_header = false;
        self.timestamp = self.high | i64::from(low);
    }

    fn high_word(&mut self, high: u32) {
        self.high = i64::from(high) << FRAME_TIMESTAMP_LOW_BITS;
        self.high_since_header = true;
        self.timestamp = self.high | i64::from(self.last_low.unwrap_or(0));
    }
}

/// Extends a narrow counter by counting wrap-arounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Unwrapper {
    bits: u32,
    epoch: i64,
    last_raw: Option<u32>,
}

impl Unwrapper {
    fn new(bits: u32) -> Self {
        Self {
            bits,
            epoch: 0,
            last_raw: None,
        }
    }

    fn extend(&mut self, raw: u32) -> i64 {
        if let Some(last) = self.last_raw {
            if raw < last {
                self.epoch += 1 << self.bits;
            }
        }
        self.last_raw = Some(raw);
        self.epoch + i64::from(raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TriggerState {
    format: TriggerDataFormat,
    number: Option<Unwrapper>,
    timestamp: Option<Unwrapper>,
    count: u64,
    current_number: u32,
    current_timestamp: i64,
}

impl TriggerState {
    fn new(format: TriggerDataFormat) -> Self {
        Self {
            format,
            number: format.number_bits().map(Unwrapper::new),
            timestamp: format.timestamp_bits().map(Unwrapper::new),
            count: 0,
            current_number: 0,
            current_timestamp: 0,
        }
    }

    /// Returns the extended trigger number and timestamp.
    fn update(&mut self, number: u32, timestamp: u32, frame_timestamp: i64) -> (u32, i64) {
        let extended_number = match self.number.as_mut() {
            Some(unwrapper) => unwrapper.extend(number),
            None => self.count as i64,
        };
        self.current_number = extended_number as u32;
        self.current_timestamp = match self.timestamp.as_mut() {
            Some(unwrapper) => unwrapper.extend(timestamp),
            None => frame_timestamp,
        };
        self.count += 1;
        (self.current_number, self.current_timestamp)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct TdcState {
    timestamp: u16,
    value: u16,
}

/// Decoder state carried across spans.
#[derive(Debug, Clone, PartialEq)]
pub struct DecoderState {
    pending: BTreeMap<PixelCoord, PendingHit>,
    frame: FrameClock,
    trigger: TriggerState,
    tdc: TdcState,
    stats: InterpreterStatistics,
}

impl DecoderState {
    #[must_use]
    pub fn new(format: TriggerDataFormat) -> Self {
        Self {
            pending: BTreeMap::new(),
            frame: FrameClock::default(),
            trigger: TriggerState::new(format),
            tdc: TdcState::default(),
            stats: InterpreterStatistics::default(),
        }
    }

    /// Number of pixels with a leading edge but no trailing edge yet.
    #[must_use]
    pub fn pending_hits(&self) -> usize {
        self.pending.len()
    }

    /// Current extended frame timestamp.
    #[must_use]
    pub fn frame_timestamp(&self) -> i64 {
        self.frame.timestamp
    }

    /// Current extended trigger number.
    #[must_use]
    pub fn trigger_number(&self) -> u32 {
        self.trigger.current_number
    }

    #[must_use]
    pub fn trigger_format(&self) -> TriggerDataFormat {
        self.trigger.format
    }

    /// Last TDC `(timestamp, value)`.
    #[must_use]
    pub fn last_tdc(&self) -> (u16, u16) {
        (self.tdc.timestamp, self.tdc.value)
    }

    #[must_use]
    pub fn statistics(&self) -> &InterpreterStatistics {
        &self.stats
    }

    fn emit(&mut self, hits: &mut HitBatch, coord: PixelCoord, pending: PendingHit, te: u8) {
        hits.push(
            pending.scan_param_id,
            coord.col,
            coord.row,
            pending.le,
            te,
            pending.timestamp,
            pending.trigger_number,
        );
        self.stats.hits += 1;
    }

    fn force_close(&mut self, hits: &mut HitBatch, coord: PixelCoord, pending: PendingHit) {
        self.emit(hits, coord, pending, pending.le);
        self.stats.forced_closures += 1;
    }

    /// Force-closes every pending hit in pixel order.
    fn close_all(&mut self, hits: &mut HitBatch) {
        for (coord, pending) in std::mem::take(&mut self.pending) {
            self.force_close(hits, coord, pending);
        }
    }

    fn step(
        &mut self,
        word: RawWord,
        scan_param_id: u32,
        hits: &mut HitBatch,
        tdc_values: &mut Vec<u16>,
    ) {
        self.stats.words += 1;
        match word {
            RawWord::FrameHeader { timestamp_low } => {
                self.stats.frame_headers += 1;
                self.close_all(hits);
                self.frame.header(timestamp_low);
            }
            RawWord::LeadingEdge { col, row, le } => {
                self.stats.leading_edges += 1;
                let coord = PixelCoord::new(col, row);
                if let Some(older) = self.pending.remove(&coord) {
                    self.stats.duplicate_leading_edges += 1;
                    self.force_close(hits, coord, older);
                }
                self.pending.insert(
                    coord,
                    PendingHit {
                        le,
                        scan_param_id,
                        timestamp: self.frame.timestamp,
                        trigger_number: self.trigger.current_number,
                    },
                );
            }
            RawWord::TrailingEdge { col, row, te } => {
                self.stats.trailing_edges += 1;
                let coord = PixelCoord::new(col, row);
                match self.pending.remove(&coord) {
                    Some(pending) => self.emit(hits, coord, pending, te),
                    None => self.stats.orphan_trailing_edges += 1,
                }
            }
            RawWord::TimestampHigh { timestamp_high } => {
                self.stats.timestamp_words += 1;
                self.frame.high_word(timestamp_high);
            }
            RawWord::Trigger { number, timestamp } => {
                self.stats.trigger_words += 1;
                let (number, timestamp) =
                    self.trigger.update(number, timestamp, self.frame.timestamp);
                hits.push(scan_param_id, TRIGGER_COLUMN, 0, 0, 0, timestamp, number);
            }
            RawWord::Tdc { timestamp, value } => {
                self.stats.tdc_words += 1;
                self.tdc = TdcState { timestamp, value };
                tdc_values.push(value);
            }
            RawWord::Unknown(_) => self.stats.unknown_words += 1,
        }
    }
}

/// Result of interpreting one span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOutcome {
    /// Committed hits in the buffer, trigger pseudo-hits included.
    pub hits: usize,
    /// Zero, or minus the number of trailing words to re-read.
    pub carried_offset: i64,
}

/// Histograms and counters of a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct InterpreterOutput {
    pub histograms: PixelHistograms,
    pub statistics: InterpreterStatistics,
}

/// Snapshot taken just before the last frame header of a span.
struct Checkpoint {
    index: usize,
    state: DecoderState,
    hits_len: usize,
    tdc_len: usize,
}

/// Decodes spans of raw words into hits and fills the pixel histograms.
#[derive(Debug, Clone)]
pub struct RawDataInterpreter {
    config: InterpreterConfig,
    state: DecoderState,
    histograms: PixelHistograms,
    tdc_values: Vec<u16>,
    rolled_back_words: u64,
}

impl RawDataInterpreter {
    /// Creates an interpreter.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] for an invalid configuration.
    pub fn new(config: InterpreterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            state: DecoderState::new(config.trigger_data_format),
            histograms: PixelHistograms::new(config.n_scan_params),
            tdc_values: Vec::new(),
            rolled_back_words: 0,
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> &DecoderState {
        &self.state
    }

    #[must_use]
    pub fn histograms(&self) -> &PixelHistograms {
        &self.histograms
    }

    #[must_use]
    pub fn statistics(&self) -> &InterpreterStatistics {
        &self.state.stats
    }

    /// Words handed back to the scheduler so far.
    #[must_use]
    pub fn rolled_back_words(&self) -> u64 {
        self.rolled_back_words
    }

    /// A new hit buffer sized for this configuration.
    #[must_use]
    pub fn hit_buffer(&self) -> HitBatch {
        HitBatch::with_capacity(self.config.hit_buffer_capacity())
    }

    /// Decodes `words`, which must be the words of `span`, into `hits`.
    ///
    /// `hits` is cleared first. When the span allows carrying and ends inside
    /// a frame with open hits, the words from the last frame header on are
    /// rolled back and `carried_offset` tells the scheduler to re-read them.
    ///
    /// # Errors
    /// Returns [`Error::SpanMismatch`] if `words` does not cover the span.
    pub fn interpret(
        &mut self,
        words: &[u32],
        span: &ChunkSpan,
        hits: &mut HitBatch,
    ) -> Result<ChunkOutcome> {
        if words.len() != span.len() {
            return Err(Error::SpanMismatch {
                expected: span.len(),
                actual: words.len(),
            });
        }
        hits.clear();
        self.tdc_values.clear();

        let max_carry = self.config.effective_max_carry();
        let rollback_at = if span.carry_allowed {
            words
                .iter()
                .rposition(|&raw| RawWord::is_frame_header(raw))
                .filter(|&i| i > 0 && words.len() - i <= max_carry)
        } else {
            None
        };

        let format = self.config.trigger_data_format;
        let mut checkpoint = None;
        for (i, &raw) in words.iter().enumerate() {
            if rollback_at == Some(i) {
                checkpoint = Some(Checkpoint {
                    index: i,
                    state: self.state.clone(),
                    hits_len: hits.len(),
                    tdc_len: self.tdc_values.len(),
                });
            }
            self.state.step(
                RawWord::decode(raw, format),
                span.scan_param_id,
                hits,
                &mut self.tdc_values,
            );
        }

        let mut carried_offset = 0;
        if let Some(checkpoint) = checkpoint {
            if !self.state.pending.is_empty() {
                let tail = words.len() - checkpoint.index;
                self.state = checkpoint.state;
                hits.truncate(checkpoint.hits_len);
                self.tdc_values.truncate(checkpoint.tdc_len);
                self.rolled_back_words += tail as u64;
                carried_offset = -(tail as i64);
                log::trace!(
                    "span {}..{}: re-reading {tail} words after the last frame header",
                    span.start,
                    span.stop
                );
            }
        }

        if span.is_final {
            self.state.close_all(hits);
        }

        self.commit(hits);
        Ok(ChunkOutcome {
            hits: hits.len(),
            carried_offset,
        })
    }

    fn commit(&mut self, hits: &HitBatch) {
        for i in 0..hits.len() {
            if hits.is_trigger(i) {
                continue;
            }
            if !self
                .histograms
                .fill_hit(hits.col[i], hits.row[i], hits.scan_param_id[i], hits.tot(i))
            {
                self.state.stats.histogram_overflows += 1;
            }
        }
        for &value in &self.tdc_values {
            self.histograms.fill_tdc(value);
        }
    }

    /// Returns the histograms and counters of the run.
    #[must_use]
    pub fn finalize(self) -> InterpreterOutput {
        let stats = self.state.stats;
        if !self.state.pending.is_empty() {
            log::warn!(
                "{} pending hits were never closed; the final span was not interpreted",
                self.state.pending.len()
            );
        }
        if stats.orphan_trailing_edges > 0 || stats.duplicate_leading_edges > 0 {
            log::warn!(
                "{} trailing edges without leading edge, {} repeated leading edges",
                stats.orphan_trailing_edges,
                stats.duplicate_leading_edges
            );
        }
        if stats.unknown_words > 0 {
            log::warn!("{} unknown words", stats.unknown_words);
        }
        if stats.histogram_overflows > 0 {
            log::warn!(
                "{} hits outside the occupancy histogram",
                stats.histogram_overflows
            );
        }
        InterpreterOutput {
            histograms: self.histograms,
            statistics: stats,
        }
    }
}

/// Runs `interpreter` over every span of `scheduler`, reading from `source`.
///
/// `on_chunk` receives each span with its committed hits. Progress is logged
/// every tenth of the scheduled words.
///
/// # Errors
/// Propagates read, offset and callback errors.
pub fn interpret_source<S, E, F>(
    source: &S,
    scheduler: &mut ChunkScheduler,
    interpreter: &mut RawDataInterpreter,
    mut on_chunk: F,
) -> std::result::Result<u64, E>
where
    S: WordSource + ?Sized,
    E: From<Error>,
    F: FnMut(&ChunkSpan, &HitBatch) -> std::result::Result<(), E>,
{
    let total = scheduler.total_words().max(1) as u64;
    let mut words = Vec::with_capacity(scheduler.chunk_size() * 2);
    let mut hits = interpreter.hit_buffer();
    let mut hit_count = 0u64;
    let mut last_decile = 0;

    while let Some(span) = scheduler.next_span() {
        source.read_words(span.range(), &mut words)?;
        let outcome = interpreter.interpret(&words, &span, &mut hits)?;
        scheduler.report(outcome.carried_offset)?;
        hit_count += outcome.hits as u64;
        on_chunk(&span, &hits)?;

        let done = (span.stop as u64).saturating_sub(scheduler.ranges()[0].start as u64);
        let decile = (done * 10 / total).min(10);
        if decile > last_decile {
            last_decile = decile;
            log::info!(
                "interpreted {}% ({} of {} words, {} hits)",
                decile * 10,
                done.min(total),
                total,
                hit_count
            );
        }
    }
    Ok(hit_count)
}
