//! Station records and cross-session statistics
//!
//! `RadioStation` is handed over by a station-list loader and survives across
//! playback sessions; the pipeline mutates its live statistics while playing.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::config::buffer::MAX_CACHE_STREAM_SIZE_KB;
use crate::config::station::{
    DEFAULT_BITRATE, DEFAULT_BUFFER_SIZE_KB, DEFAULT_CHANNELS, DEFAULT_CHUNK_SIZE_KB,
    DEFAULT_SAMPLE_RATE, MIN_OGG_BUFFER_SIZE_KB, UNKNOWN_NAME,
};
use crate::stream::metadata::RecordInfo;

const MP3_BITRATES: [u32; 14] = [32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320];
const OGG_BITRATES: [u32; 13] = [32, 45, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 500];

/// Container format announced for a station
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AudioFormat {
    Unknown,
    #[default]
    Mp3,
    Ogg,
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioFormat::Unknown => write!(f, "Unknown"),
            AudioFormat::Mp3 => write!(f, "MP3"),
            AudioFormat::Ogg => write!(f, "OGG"),
        }
    }
}

/// Decoder family resolved from an `AudioFormat`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AudioCodec {
    #[default]
    None,
    Mp3,
    Vorbis,
}

impl AudioCodec {
    /// Resolve the decoder for a container format.
    pub fn for_format(format: AudioFormat) -> Self {
        match format {
            AudioFormat::Mp3 => AudioCodec::Mp3,
            AudioFormat::Ogg => AudioCodec::Vorbis,
            AudioFormat::Unknown => AudioCodec::None,
        }
    }
}

impl fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioCodec::None => write!(f, "None"),
            AudioCodec::Mp3 => write!(f, "MP3"),
            AudioCodec::Vorbis => write!(f, "Vorbis"),
        }
    }
}

/// Extra HTTP header sent with the stream request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeader {
    pub key: String,
    pub value: String,
}

fn default_bitrate() -> u32 {
    DEFAULT_BITRATE
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE_KB
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE_KB
}

fn default_channels() -> u16 {
    DEFAULT_CHANNELS
}

fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

fn default_true() -> bool {
    true
}

/// An internet radio station plus its accumulated statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioStation {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub request_headers: Vec<RequestHeader>,
    /// Brand or network name
    #[serde(default)]
    pub station: String,
    #[serde(default)]
    pub genres: String,
    #[serde(default)]
    pub format: AudioFormat,
    /// Announced bitrate in kbit/s
    #[serde(default = "default_bitrate")]
    pub bitrate: u32,
    /// Network read size in KB
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Pre-buffer size in KB
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default)]
    pub excluded_codec: AudioCodec,
    /// Overwrite name, genres and bitrate from the ICY response headers
    #[serde(default = "default_true")]
    pub update_data_at_play: bool,
    #[serde(default = "default_channels")]
    pub channels: u16,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    #[serde(default)]
    pub total_data_size: u64,
    #[serde(default)]
    pub total_data_requests: u64,
    /// Seconds of audio played from this station
    #[serde(default)]
    pub total_play_time: f64,
    #[serde(default)]
    pub played_records: Vec<RecordInfo>,
    #[serde(default)]
    pub server_info: String,
}

/// Station shared between the caller and a playback session
pub type SharedStation = Arc<Mutex<RadioStation>>;

impl RadioStation {
    pub fn new(name: impl Into<String>, url: impl Into<String>, format: AudioFormat) -> Self {
        let name = name.into();
        Self {
            name: if name.trim().is_empty() {
                UNKNOWN_NAME.to_string()
            } else {
                name
            },
            url: url.into(),
            request_headers: Vec::new(),
            station: String::new(),
            genres: String::new(),
            format,
            bitrate: DEFAULT_BITRATE,
            chunk_size: DEFAULT_CHUNK_SIZE_KB,
            buffer_size: DEFAULT_BUFFER_SIZE_KB,
            excluded_codec: AudioCodec::None,
            update_data_at_play: true,
            channels: DEFAULT_CHANNELS,
            sample_rate: DEFAULT_SAMPLE_RATE,
            total_data_size: 0,
            total_data_requests: 0,
            total_play_time: 0.0,
            played_records: Vec::new(),
            server_info: String::new(),
        }
    }

    /// Wrap the station for sharing with a session.
    pub fn shared(self) -> SharedStation {
        Arc::new(Mutex::new(self))
    }

    /// Codec that will decode this station
    pub fn codec(&self) -> AudioCodec {
        AudioCodec::for_format(self.format)
    }

    /// True when the station has a playable URL and non-zero sizes.
    pub fn is_sane(&self) -> bool {
        let url = self.url.trim().to_ascii_lowercase();
        (url.starts_with("http://") || url.starts_with("https://"))
            && self.chunk_size > 0
            && self.buffer_size > 0
    }

    /// Clamp sizes and snap the bitrate to a standard value.
    pub fn sanitize(&mut self) {
        self.bitrate = if self.bitrate == 0 {
            DEFAULT_BITRATE
        } else {
            nearest_bitrate(self.bitrate, self.format)
        };

        if self.chunk_size == 0 {
            self.chunk_size = DEFAULT_CHUNK_SIZE_KB;
        }
        self.chunk_size = self.chunk_size.min(MAX_CACHE_STREAM_SIZE_KB);

        if self.buffer_size == 0 {
            self.buffer_size = DEFAULT_BUFFER_SIZE_KB;
        }
        match self.format {
            AudioFormat::Mp3 => {
                self.buffer_size = self.buffer_size.max(DEFAULT_BUFFER_SIZE_KB / 4);
            }
            AudioFormat::Ogg => {
                self.buffer_size = self.buffer_size.max(MIN_OGG_BUFFER_SIZE_KB);
            }
            AudioFormat::Unknown => {}
        }
        self.buffer_size = self.buffer_size.max(self.chunk_size);
        self.buffer_size = self.buffer_size.min(MAX_CACHE_STREAM_SIZE_KB);
    }

    pub fn chunk_size_bytes(&self) -> usize {
        self.chunk_size * 1024
    }

    pub fn buffer_size_bytes(&self) -> usize {
        self.buffer_size * 1024
    }

    /// Unread bytes required before audio starts: buffer plus one chunk.
    pub fn prebuffer_threshold(&self) -> usize {
        (self.buffer_size + self.chunk_size) * 1024
    }
}

impl fmt::Display for RadioStation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} · {} kbps)", self.name, self.format, self.bitrate)
    }
}

/// Snap a bitrate to the closest standard value for the format.
/// Ties resolve to the lower value.
pub fn nearest_bitrate(kbps: u32, format: AudioFormat) -> u32 {
    let table: &[u32] = match format {
        AudioFormat::Ogg => &OGG_BITRATES,
        _ => &MP3_BITRATES,
    };
    table
        .iter()
        .copied()
        .min_by_key(|&b| b.abs_diff(kbps))
        .unwrap_or(DEFAULT_BITRATE)
}

/// Statistics accumulated across all sessions of a process
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayerContext {
    pub total_play_time: f64,
    pub total_data_size: u64,
    pub total_data_requests: u64,
    pub all_played_records: Vec<RecordInfo>,
}

/// Thread-safe handle to the global context
pub type SharedContext = Arc<Mutex<PlayerContext>>;

/// Create a new shared context
pub fn new_shared_context() -> SharedContext {
    Arc::new(Mutex::new(PlayerContext::default()))
}
