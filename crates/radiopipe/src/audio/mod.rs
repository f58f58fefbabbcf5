//! Audio subsystem
//!
//! Codec probing and decoding, underrun monitoring, record timing and the
//! playback session that ties them to the ingest side.

pub mod decoder;
pub mod health;
pub mod probe;
pub mod records;
pub mod session;
pub mod stats;
pub mod types;

pub use decoder::{Decoder, DecoderFactory, Mp3Decoder, SymphoniaDecoderFactory, VorbisDecoder};
pub use health::{FailureReason, HealthState, UnderrunMonitor};
pub use records::{RecordTracker, RecordTransition};
pub use session::{AudioOutput, PlaybackSession};
pub use stats::{DecoderStats, EventBus, PlayerEvent};
pub use types::{CodecInfo, PlaybackState};
