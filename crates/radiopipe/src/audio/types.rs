//! Shared audio types
//!
//! Pure data types used across the audio subsystem.

use std::fmt;

use crate::station::AudioCodec;

/// Playback session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    /// Ingest worker started, waiting for the first bytes
    Connecting,
    /// Filling the cache buffer up to the pre-buffer threshold
    PreBuffering,
    Playing,
    Stopped,
    Error,
}

impl PlaybackState {
    /// States from which `play` may start a new session
    pub fn can_start(&self) -> bool {
        matches!(
            self,
            PlaybackState::Idle | PlaybackState::Stopped | PlaybackState::Error
        )
    }

    /// A session is running (connecting, buffering or playing)
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PlaybackState::Connecting | PlaybackState::PreBuffering | PlaybackState::Playing
        )
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackState::Idle => write!(f, "Idle"),
            PlaybackState::Connecting => write!(f, "Connecting"),
            PlaybackState::PreBuffering => write!(f, "Buffering"),
            PlaybackState::Playing => write!(f, "Playing"),
            PlaybackState::Stopped => write!(f, "Stopped"),
            PlaybackState::Error => write!(f, "Error"),
        }
    }
}

/// Codec information for the current stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecInfo {
    pub codec: AudioCodec,
    pub channels: u16,
    pub sample_rate: u32,
    /// kbit/s, when known from the stream headers
    pub bitrate: Option<u32>,
}

impl fmt::Display for CodecInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let channel_str = if self.channels == 1 { "Mono" } else { "Stereo" };
        write!(f, "{}", self.codec)?;
        if let Some(br) = self.bitrate {
            write!(f, " · {} kbps", br)?;
        }
        write!(f, " · {} Hz · {}", self.sample_rate, channel_str)
    }
}
