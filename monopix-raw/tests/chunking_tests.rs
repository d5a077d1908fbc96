#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::unreadable_literal
)]
use monopix_raw::{
    build_events, interpret_source, ChunkScheduler, Error, EventBuilderConfig, EventState,
    HitBatch, InterpreterConfig, InterpreterOutput, MetaEntry, RawDataInterpreter, RawWord,
    TriggerDataFormat,
};

const FMT: TriggerDataFormat = TriggerDataFormat::TriggerNumber;

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

struct Synthetic {
    words: Vec<u32>,
    leading_edges: u64,
    trailing_edges: u64,
    triggers: u64,
}

/// Frames of up to five hits, some without trailing edge, with triggers and
/// TDC words in between. Padded with TDC words to exactly `n_words`.
fn synthetic_stream(n_words: usize, seed: u64) -> Synthetic {
    let mut rng = Lcg(seed);
    let mut words = Vec::with_capacity(n_words);
    let (mut leading_edges, mut trailing_edges, mut triggers) = (0, 0, 0);
    let mut frame_ts = 0u32;
    let mut trigger_number = 0u32;

    loop {
        let n_hits = (rng.next() % 6) as u16;
        if words.len() + 3 + 2 * n_hits as usize > n_words {
            break;
        }
        words.push(RawWord::FrameHeader { timestamp_low: frame_ts }.encode(FMT));
        frame_ts = (frame_ts + 1) & 0x1FF_FFFF;
        if rng.next() % 8 == 0 {
            words.push(
                RawWord::Trigger {
                    number: trigger_number,
                    timestamp: 0,
                }
                .encode(FMT),
            );
            trigger_number += 1;
            triggers += 1;
        }
        let mut pixels = Vec::new();
        for j in 0..n_hits {
            let col = (rng.next() % 512) as u16;
            let row = j + 6 * (rng.next() % 80) as u16;
            let le = (rng.next() % 128) as u8;
            words.push(RawWord::LeadingEdge { col, row, le }.encode(FMT));
            leading_edges += 1;
            pixels.push((col, row, le));
        }
        for (col, row, le) in pixels {
            if rng.next() % 10 != 0 {
                let te = le.wrapping_add((rng.next() % 40) as u8) & 0x7F;
                words.push(RawWord::TrailingEdge { col, row, te }.encode(FMT));
                trailing_edges += 1;
            }
        }
        if rng.next() % 16 == 0 {
            words.push(
                RawWord::Tdc {
                    timestamp: 0,
                    value: (rng.next() % 4096) as u16,
                }
                .encode(FMT),
            );
        }
    }
    while words.len() < n_words {
        words.push(
            RawWord::Tdc {
                timestamp: 0,
                value: 1,
            }
            .encode(FMT),
        );
    }

    Synthetic {
        words,
        leading_edges,
        trailing_edges,
        triggers,
    }
}

fn meta_for(n_words: usize, n_params: usize) -> Vec<MetaEntry> {
    let step = n_words / n_params;
    (0..n_params)
        .map(|p| MetaEntry {
            scan_param_id: p as u32,
            index_start: (p * step) as u64,
            index_stop: if p + 1 == n_params {
                n_words as u64
            } else {
                ((p + 1) * step) as u64
            },
        })
        .collect()
}

fn run(words: &[u32], meta: &[MetaEntry], chunk_size: usize) -> (HitBatch, InterpreterOutput) {
    let mut scheduler = ChunkScheduler::new(meta, words.len(), chunk_size).unwrap();
    let config = InterpreterConfig::new()
        .with_chunk_size(chunk_size)
        .with_trigger_data_format(FMT)
        .with_n_scan_params(scheduler.n_scan_params());
    let mut interpreter = RawDataInterpreter::new(config).unwrap();
    let mut all_hits = HitBatch::default();
    interpret_source::<_, Error, _>(words, &mut scheduler, &mut interpreter, |_, hits| {
        all_hits.append(hits);
        Ok(())
    })
    .unwrap();
    (all_hits, interpreter.finalize())
}

#[test]
fn test_hits_independent_of_chunk_size() {
    let synthetic = synthetic_stream(1_000_000, 7);
    let meta = meta_for(synthetic.words.len(), 4);

    let (small_hits, small) = run(&synthetic.words, &meta, 10_000);
    let (large_hits, large) = run(&synthetic.words, &meta, 100_000);

    assert_eq!(small_hits.len(), large_hits.len());
    assert_eq!(small_hits, large_hits);
    assert_eq!(small.histograms.total_hits(), large.histograms.total_hits());
    assert_eq!(small.histograms.occupancy, large.histograms.occupancy);
    assert_eq!(small.histograms.tot, large.histograms.tot);
    assert_eq!(small.histograms.tdc, large.histograms.tdc);
    assert_eq!(small.statistics, large.statistics);
}

#[test]
fn test_hit_count_matches_edge_pairs() {
    let synthetic = synthetic_stream(200_000, 11);
    let meta = meta_for(synthetic.words.len(), 3);
    let (hits, output) = run(&synthetic.words, &meta, 7_000);
    let stats = output.statistics;

    assert_eq!(stats.words, synthetic.words.len() as u64);
    assert_eq!(stats.leading_edges, synthetic.leading_edges);
    assert_eq!(stats.trailing_edges, synthetic.trailing_edges);
    assert_eq!(stats.hits, synthetic.leading_edges);
    assert_eq!(
        stats.hits - stats.forced_closures,
        synthetic.trailing_edges
    );
    assert_eq!(stats.orphan_trailing_edges, 0);
    assert_eq!(hits.trigger_count() as u64, synthetic.triggers);
    assert_eq!(output.histograms.total_hits(), synthetic.leading_edges);

    for i in 0..hits.len() {
        assert!(u16::from(hits.tot(i)) < 128);
        if !hits.is_trigger(i) {
            assert!(hits.col[i] < 512 && hits.row[i] < 512);
        }
    }
}

#[test]
fn test_scan_param_ids_follow_meta() {
    let synthetic = synthetic_stream(40_000, 3);
    let meta = meta_for(synthetic.words.len(), 4);
    let (hits, output) = run(&synthetic.words, &meta, 3_000);

    assert_eq!(output.histograms.n_scan_params(), 4);
    assert!(hits.scan_param_id.iter().all(|&id| id < 4));
    for p in 0..4 {
        let occupancy: u64 = output
            .histograms
            .occupancy
            .index_axis(ndarray::Axis(2), p)
            .iter()
            .map(|&v| u64::from(v))
            .sum();
        assert!(occupancy > 0, "scan parameter {p} has no hits");
    }
}

#[test]
fn test_end_of_file_flush() {
    // The file ends inside a frame with an open leading edge.
    let words = vec![
        RawWord::FrameHeader { timestamp_low: 0 }.encode(FMT),
        RawWord::LeadingEdge {
            col: 1,
            row: 1,
            le: 10,
        }
        .encode(FMT),
        RawWord::TrailingEdge {
            col: 1,
            row: 1,
            te: 20,
        }
        .encode(FMT),
        RawWord::FrameHeader { timestamp_low: 1 }.encode(FMT),
        RawWord::LeadingEdge {
            col: 2,
            row: 2,
            le: 30,
        }
        .encode(FMT),
    ];
    let meta = meta_for(words.len(), 1);
    let (hits, output) = run(&words, &meta, 3);

    assert_eq!(hits.len(), 2);
    assert_eq!(hits.tot(0), 10);
    assert_eq!((hits.le[1], hits.te[1]), (30, 30));
    assert_eq!(output.statistics.forced_closures, 1);
}

#[test]
fn test_events_across_chunks() {
    let synthetic = synthetic_stream(50_000, 5);
    let meta = meta_for(synthetic.words.len(), 1);
    let mut scheduler = ChunkScheduler::new(&meta, synthetic.words.len(), 4_000).unwrap();
    let mut interpreter = RawDataInterpreter::new(
        InterpreterConfig::new()
            .with_chunk_size(4_000)
            .with_trigger_data_format(FMT),
    )
    .unwrap();

    let config = EventBuilderConfig::default();
    let mut state = EventState::default();
    let mut event_numbers = Vec::new();
    interpret_source::<_, Error, _>(
        &synthetic.words,
        &mut scheduler,
        &mut interpreter,
        |_, hits| {
            let (events, next) = build_events(hits, state, &config)?;
            state = next;
            event_numbers.extend_from_slice(&events.event_number);
            Ok(())
        },
    )
    .unwrap();

    assert!(!event_numbers.is_empty());
    assert!(event_numbers.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(state.event_number + 1, synthetic.triggers);
}

#[test]
fn test_corrupt_meta_is_fatal() {
    let meta = vec![MetaEntry {
        scan_param_id: 0,
        index_start: 10,
        index_stop: 2,
    }];
    assert!(matches!(
        ChunkScheduler::new(&meta, 100, 10),
        Err(Error::CorruptOffsets(_))
    ));
}
