//! Event building from the interpreted hit stream.
//!
//! Trigger pseudo-hits split the stream into events. The running event state
//! is passed in and returned so that events continue across chunks.

use monopix_core::{tot, EventBatch, HitBatch};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Largest frame index inside one event.
pub const MAX_FRAME: i64 = 255;

/// Configuration for event building.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBuilderConfig {
    /// Timestamp units per frame.
    pub frame_length: i64,
}

impl Default for EventBuilderConfig {
    fn default() -> Self {
        Self { frame_length: 1 }
    }
}

impl EventBuilderConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_frame_length(mut self, frame_length: i64) -> Self {
        self.frame_length = frame_length;
        self
    }

    /// # Errors
    /// Returns [`Error::InvalidConfig`] for a non-positive frame length.
    pub fn validate(&self) -> Result<()> {
        if self.frame_length <= 0 {
            return Err(Error::InvalidConfig(format!(
                "frame_length must be > 0, got {}",
                self.frame_length
            )));
        }
        Ok(())
    }
}

/// Running event state carried between chunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventState {
    /// Current event; meaningless until `started`.
    pub event_number: u64,
    pub trigger_number: u32,
    pub trigger_timestamp: i64,
    /// Timestamp of the first pixel hit of the current event.
    pub first_hit_timestamp: Option<i64>,
    /// A trigger has been seen.
    pub started: bool,
    /// Hits seen before the first trigger of the file.
    pub hits_before_first_trigger: u64,
}

impl EventState {
    fn open_event(&mut self, trigger_number: u32, trigger_timestamp: i64) {
        if self.started {
            self.event_number += 1;
        } else {
            self.started = true;
        }
        self.trigger_number = trigger_number;
        self.trigger_timestamp = trigger_timestamp;
        self.first_hit_timestamp = None;
    }
}

/// Assigns the hits of one chunk to events.
///
/// Hits before the first trigger of a chunk belong to the event carried in
/// `state`; hits before the first trigger of the file are counted and
/// dropped. Trigger pseudo-hits are not part of the output.
///
/// # Errors
/// Returns [`Error::NoTriggerData`] if a non-empty chunk holds no trigger
/// word, and [`Error::InvalidConfig`] for an invalid configuration.
pub fn build_events(
    hits: &HitBatch,
    state: EventState,
    config: &EventBuilderConfig,
) -> Result<(EventBatch, EventState)> {
    config.validate()?;
    let mut state = state;
    let mut events = EventBatch::with_capacity(hits.len());
    // A span without hits, such as one carried entirely into the next span,
    // says nothing about trigger data.
    if hits.is_empty() {
        return Ok((events, state));
    }
    if hits.trigger_count() == 0 {
        return Err(Error::NoTriggerData { hits: hits.len() });
    }

    for i in 0..hits.len() {
        if hits.is_trigger(i) {
            state.open_event(hits.trigger_number[i], hits.timestamp[i]);
            continue;
        }
        if !state.started {
            state.hits_before_first_trigger += 1;
            continue;
        }
        let timestamp = hits.timestamp[i];
        let first = *state.first_hit_timestamp.get_or_insert(timestamp);
        let frame = ((timestamp - first) / config.frame_length).clamp(0, MAX_FRAME) as u8;
        events.push(
            state.event_number,
            state.trigger_number,
            frame,
            hits.col[i],
            hits.row[i],
            u16::from(hits.tot(i)),
            timestamp,
            hits.scan_param_id[i],
        );
    }
    Ok((events, state))
}

/// Treats every pixel hit as its own event keyed by timestamp.
///
/// Used when the run has no trigger data: hits sharing a timestamp are
/// clustered together. The charge is the plain ToT, `(te - le) mod 128`,
/// the same as in [`build_events`], with no offset added.
#[must_use]
pub fn hits_as_events(hits: &HitBatch) -> EventBatch {
    let mut events = EventBatch::with_capacity(hits.len());
    for i in 0..hits.len() {
        if hits.is_trigger(i) {
            continue;
        }
        events.push(
            hits.timestamp[i].max(0) as u64,
            u32::MAX,
            0,
            hits.col[i],
            hits.row[i],
            u16::from(tot(hits.le[i], hits.te[i])),
            hits.timestamp[i],
            hits.scan_param_id[i],
        );
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use monopix_core::TRIGGER_COLUMN;

    fn stream(items: &[(bool, u16, i64, u32)]) -> HitBatch {
        let mut hits = HitBatch::default();
        for &(is_trigger, row, timestamp, number) in items {
            if is_trigger {
                hits.push(0, TRIGGER_COLUMN, 0, 0, 0, timestamp, number);
            } else {
                hits.push(0, 1, row, 2, 5, timestamp, number);
            }
        }
        hits
    }

    #[test]
    fn test_events_split_at_triggers() {
        let hits = stream(&[
            (false, 1, 0, 0),
            (true, 0, 10, 100),
            (false, 2, 10, 100),
            (false, 3, 12, 100),
            (true, 0, 20, 101),
            (false, 4, 21, 101),
        ]);
        let (events, state) =
            build_events(&hits, EventState::default(), &EventBuilderConfig::default()).unwrap();

        assert_eq!(events.len(), 3);
        assert_eq!(events.event_number, vec![0, 0, 1]);
        assert_eq!(events.trigger_number, vec![100, 100, 101]);
        assert_eq!(events.frame, vec![0, 2, 0]);
        assert_eq!(events.charge, vec![3, 3, 3]);
        assert_eq!(state.hits_before_first_trigger, 1);
        assert_eq!(state.event_number, 1);
        assert_eq!(state.trigger_timestamp, 20);
    }

    #[test]
    fn test_events_continue_across_chunks() {
        let config = EventBuilderConfig::default().with_frame_length(2);
        let first = stream(&[(true, 0, 0, 5), (false, 1, 100, 5)]);
        let (_, state) = build_events(&first, EventState::default(), &config).unwrap();

        let second = stream(&[(false, 2, 104, 5), (true, 0, 200, 6), (false, 3, 201, 6)]);
        let (events, state) = build_events(&second, state, &config).unwrap();
        assert_eq!(events.event_number, vec![0, 1]);
        assert_eq!(events.frame, vec![2, 0]);
        assert_eq!(state.trigger_number, 6);
    }

    #[test]
    fn test_frame_is_clamped() {
        let hits = stream(&[(true, 0, 0, 0), (false, 1, 0, 0), (false, 2, 10_000, 0)]);
        let (events, _) =
            build_events(&hits, EventState::default(), &EventBuilderConfig::default()).unwrap();
        assert_eq!(events.frame, vec![0, 255]);
    }

    #[test]
    fn test_chunk_without_trigger_fails() {
        let hits = stream(&[(false, 1, 0, 0)]);
        assert!(matches!(
            build_events(&hits, EventState::default(), &EventBuilderConfig::default()),
            Err(Error::NoTriggerData { hits: 1 })
        ));
        let (events, _) = build_events(
            &HitBatch::default(),
            EventState::default(),
            &EventBuilderConfig::default(),
        )
        .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_hits_as_events() {
        let hits = stream(&[(false, 1, 7, 0), (true, 0, 8, 1), (false, 2, 7, 1)]);
        let events = hits_as_events(&hits);
        assert_eq!(events.event_number, vec![7, 7]);
        assert_eq!(events.event_ranges().len(), 1);
        assert_eq!(events.frame, vec![0, 0]);
        assert_eq!(events.charge, vec![3, 3]);
    }
}
