//! Record transition timing
//!
//! The demuxer announces a record as soon as its metadata block arrives, but
//! the listener hears it only after the audio buffered ahead of it has
//! played. `RecordTracker` holds the announced record with a countdown and
//! switches the current record once the countdown reaches zero. Pure logic;
//! the session drives it from its timer thread.

use crate::config::playback::RECORD_DELAY_EPSILON;
use crate::stream::metadata::RecordInfo;

/// Outcome of a record switch
#[derive(Debug, Clone, PartialEq)]
pub struct RecordTransition {
    /// Previous record with its play time stamped as `duration`
    pub finished: Option<RecordInfo>,
    pub started: RecordInfo,
}

/// Current record plus the pending announcement
#[derive(Debug, Clone, Default)]
pub struct RecordTracker {
    current: RecordInfo,
    next: RecordInfo,
    next_delay: f64,
    record_play_time: f64,
}

impl RecordTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> &RecordInfo {
        &self.current
    }

    /// Announced record that is not audible yet (may equal `current`)
    pub fn next(&self) -> &RecordInfo {
        &self.next
    }

    /// Seconds until `next` becomes audible
    pub fn next_delay(&self) -> f64 {
        self.next_delay
    }

    /// Seconds the current record has been playing
    pub fn record_play_time(&self) -> f64 {
        self.record_play_time
    }

    /// Register an announcement. Returns true when the pending record changed.
    ///
    /// Re-announcing the pending record keeps its running countdown.
    pub fn announce(&mut self, record: RecordInfo, delay: f64) -> bool {
        if record.is_empty() || record == self.next {
            return false;
        }
        self.next = record;
        self.next_delay = delay.max(0.0);
        true
    }

    /// Account `dt` seconds of played audio.
    pub fn advance(&mut self, dt: f64) {
        self.record_play_time += dt;
        if self.next_delay > 0.0 {
            self.next_delay = (self.next_delay - dt).max(0.0);
        }
    }

    /// Switch to the pending record once its countdown ran out.
    pub fn take_transition(&mut self) -> Option<RecordTransition> {
        if self.next_delay >= RECORD_DELAY_EPSILON
            || self.next.is_empty()
            || self.next == self.current
        {
            return None;
        }

        let finished = self.finalize_current();
        self.current = self.next.clone();
        self.record_play_time = 0.0;
        Some(RecordTransition {
            finished,
            started: self.current.clone(),
        })
    }

    /// Current record with its duration stamped, for session end.
    pub fn finalize_current(&self) -> Option<RecordInfo> {
        if self.current.is_empty() {
            return None;
        }
        let mut record = self.current.clone();
        record.duration = self.record_play_time;
        Some(record)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Stamp `finished.duration` on the matching history entry (searched from the end).
pub fn stamp_duration(history: &mut [RecordInfo], finished: &RecordInfo) {
    if let Some(entry) = history.iter_mut().rev().find(|r| *r == finished) {
        entry.duration = finished.duration;
    }
}

/// Append `record` unless an equal entry is already there.
///
/// Returns false when the record was played before; the earlier entry is kept.
pub fn append_unique(history: &mut Vec<RecordInfo>, record: &RecordInfo) -> bool {
    if history.iter().any(|r| r == record) {
        return false;
    }
    history.push(record.clone());
    true
}
