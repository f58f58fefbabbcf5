//! Radiopipe: streaming internet radio ingest and decode
//!
//! Connects to Icecast/Shoutcast streams, strips ICY metadata into timed
//! record announcements, caches the audio bytes and decodes MP3 or Ogg
//! Vorbis into PCM for a host audio output.
//!
//! ## Quick start
//!
//! ```no_run
//! use radiopipe::audio::PlaybackSession;
//! use radiopipe::config::PlayerConfig;
//! use radiopipe::station::{AudioFormat, RadioStation};
//!
//! let mut session = PlaybackSession::with_defaults(PlayerConfig::default())?;
//! let station = RadioStation::new("Jazz", "http://jazz.example/stream", AudioFormat::Mp3);
//! session.play(station.shared())?;
//! let output = session.audio_output();
//! let mut pcm = vec![0.0f32; 4096];
//! loop {
//!     session.tick();
//!     output.pull_samples(&mut pcm);
//! #   break;
//! }
//! # Ok::<(), radiopipe::error::RadioError>(())
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod station;
pub mod stream;
