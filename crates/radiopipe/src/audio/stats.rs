//! Player events and decoder counters
//!
//! `EventBus` broadcasts discrete `PlayerEvent`s to subscribers.
//! `DecoderStats` provides atomic counters for the hot decode path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::stream::metadata::RecordInfo;

/// Discrete events broadcast to subscribers.
///
/// Every event names the station it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    PlaybackStarted {
        station: String,
    },
    PlaybackEnded {
        station: String,
    },
    BufferingStarted {
        station: String,
    },
    BufferingEnded {
        station: String,
    },
    /// Pre-buffer fill level in `0.0..=1.0`
    BufferingProgress {
        station: String,
        progress: f32,
    },
    AudioStarted {
        station: String,
    },
    AudioEnded {
        station: String,
    },
    /// Seconds of audio played since the stream started
    AudioPlayTime {
        station: String,
        seconds: f64,
    },
    RecordChanged {
        station: String,
        record: RecordInfo,
    },
    /// Seconds the current record has been playing
    RecordPlayTime {
        station: String,
        seconds: f64,
    },
    NextRecordChanged {
        station: String,
        record: RecordInfo,
    },
    /// Seconds until the announced record becomes audible
    NextRecordDelayUpdated {
        station: String,
        delay: f64,
    },
    Error {
        station: String,
        message: String,
    },
}

impl PlayerEvent {
    /// Station the event belongs to
    pub fn station(&self) -> &str {
        match self {
            PlayerEvent::PlaybackStarted { station }
            | PlayerEvent::PlaybackEnded { station }
            | PlayerEvent::BufferingStarted { station }
            | PlayerEvent::BufferingEnded { station }
            | PlayerEvent::BufferingProgress { station, .. }
            | PlayerEvent::AudioStarted { station }
            | PlayerEvent::AudioEnded { station }
            | PlayerEvent::AudioPlayTime { station, .. }
            | PlayerEvent::RecordChanged { station, .. }
            | PlayerEvent::RecordPlayTime { station, .. }
            | PlayerEvent::NextRecordChanged { station, .. }
            | PlayerEvent::NextRecordDelayUpdated { station, .. }
            | PlayerEvent::Error { station, .. } => station,
        }
    }
}

/// Broadcast mechanism for player events
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<PlayerEvent>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a new event bus with no subscribers
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to events. Returns a receiver that will get all future events.
    pub fn subscribe(&self) -> Receiver<PlayerEvent> {
        let (tx, rx) = unbounded();
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }
        rx
    }

    /// Emit an event to all subscribers. Removes disconnected subscribers.
    pub fn emit(&self, event: PlayerEvent) {
        tracing::trace!(?event, "player event");
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}

/// Atomic counters for the hot decode path (lock-free)
#[derive(Debug, Default)]
pub struct DecoderStats {
    pub frames_decoded: AtomicU64,
    pub decode_errors: AtomicU64,
    pub underruns: AtomicU64,
}

impl DecoderStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_frame(&self) {
        self.frames_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Decoder input ran dry
    pub fn record_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    /// (frames, errors, underruns); not an atomic triple, fine for stats
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.frames_decoded.load(Ordering::Relaxed),
            self.decode_errors.load(Ordering::Relaxed),
            self.underruns.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ended(name: &str) -> PlayerEvent {
        PlayerEvent::PlaybackEnded {
            station: name.to_string(),
        }
    }

    #[test]
    fn event_names_station() {
        let evt = PlayerEvent::RecordChanged {
            station: "Radio X".to_string(),
            record: RecordInfo::from_icy_title("A - B"),
        };
        assert_eq!(evt.station(), "Radio X");
        assert_eq!(
            PlayerEvent::BufferingProgress {
                station: "Y".to_string(),
                progress: 0.5
            }
            .station(),
            "Y"
        );
    }

    #[test]
    fn event_bus_subscribe_and_emit() {
        let bus = EventBus::new();
        let rx = bus.subscribe();

        bus.emit(ended("s"));

        assert_eq!(rx.recv().unwrap(), ended("s"));
    }

    #[test]
    fn event_bus_multiple_subscribers() {
        let bus = EventBus::new();
        let rx1 = bus.subscribe();
        let rx2 = bus.subscribe();

        bus.emit(ended("s"));

        assert_eq!(rx1.recv().unwrap(), ended("s"));
        assert_eq!(rx2.recv().unwrap(), ended("s"));
    }

    #[test]
    fn event_bus_disconnected_subscriber_cleanup() {
        let bus = EventBus::new();
        let rx1 = bus.subscribe();
        let _rx2 = bus.subscribe();
        drop(rx1);

        bus.emit(ended("s"));

        let subs = bus.subscribers.lock().unwrap();
        assert_eq!(subs.len(), 1);
    }

    #[test]
    fn event_bus_no_subscribers() {
        let bus = EventBus::new();
        bus.emit(ended("s"));
    }

    #[test]
    fn event_bus_keeps_order() {
        let bus = EventBus::new();
        let rx = bus.subscribe();

        bus.emit(PlayerEvent::BufferingStarted {
            station: "s".to_string(),
        });
        bus.emit(PlayerEvent::Error {
            station: "s".to_string(),
            message: "err1".to_string(),
        });
        bus.emit(ended("s"));

        assert!(matches!(rx.recv().unwrap(), PlayerEvent::BufferingStarted { .. }));
        match rx.recv().unwrap() {
            PlayerEvent::Error { message, .. } => assert_eq!(message, "err1"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(rx.recv().unwrap(), ended("s"));
    }

    #[test]
    fn decoder_stats_counts() {
        let stats = DecoderStats::new();
        stats.record_frame();
        stats.record_error();
        stats.record_frame();
        stats.record_underrun();
        assert_eq!(stats.snapshot(), (2, 1, 1));
    }

    #[test]
    fn decoder_stats_arc_shared() {
        let stats = Arc::new(DecoderStats::new());
        let s2 = stats.clone();

        stats.record_frame();
        s2.record_frame();

        assert_eq!(stats.snapshot().0, 2);
    }
}
