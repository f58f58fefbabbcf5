//! Configuration for the radiopipe pipeline
//!
//! Compile-time defaults live in the constant modules; `PlayerConfig` carries
//! the runtime-tunable subset and can be loaded from JSON.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Station defaults and limits (sizes in KB, bitrates in kbit/s)
pub mod station {
    /// Name used when a station has none
    pub const UNKNOWN_NAME: &str = "Unknown radio station";

    /// Bitrate assumed when a station does not announce one
    pub const DEFAULT_BITRATE: u32 = 128;

    /// Network read size per ingest loop iteration
    pub const DEFAULT_CHUNK_SIZE_KB: usize = 32;

    /// Pre-buffer size on top of one chunk
    pub const DEFAULT_BUFFER_SIZE_KB: usize = 48;

    /// Smallest pre-buffer accepted for Ogg/Vorbis stations
    pub const MIN_OGG_BUFFER_SIZE_KB: usize = 64;

    /// Default channel count until the decoder reports one
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Default sample rate until the decoder reports one
    pub const DEFAULT_SAMPLE_RATE: u32 = 44100;
}

/// Network-related configuration
pub mod network {
    /// User agent for HTTP requests. Several Shoutcast servers only send ICY
    /// metadata to known player identities.
    pub const USER_AGENT: &str = "WinampMPEG/5.09";

    /// Connection timeout in seconds
    pub const CONNECT_TIMEOUT_SECS: u64 = 10;

    /// Read timeout in seconds
    pub const READ_TIMEOUT_SECS: u64 = 30;

    /// Time to wait for the ingest thread to exit on stop (milliseconds)
    pub const JOIN_TIMEOUT_MS: u64 = 2000;
}

/// Cache buffer configuration
pub mod buffer {
    /// Initial cache stream size (KB)
    pub const DEFAULT_CACHE_STREAM_SIZE_KB: usize = 1024;
    /// Hard cap for the cache stream (KB)
    pub const MAX_CACHE_STREAM_SIZE_KB: usize = 16384;
    /// Keep this many bytes before the read cursor on compaction (safety margin for rewinds)
    pub const COMPACTION_SAFETY_MARGIN: usize = 64 * 1024;
    /// Unread bytes the decoder waits for after running dry
    pub const MIN_DECODE_BYTES: usize = 8 * 1024;
    /// Largest MPEG layer III frame (320 kbit/s at 32 kHz, padded)
    pub const MAX_MP3_FRAME_BYTES: usize = 1441;
    /// Captured PCM stream bounds (KB)
    pub const MIN_DATA_STREAM_SIZE_KB: usize = 128;
    pub const MAX_DATA_STREAM_SIZE_KB: usize = 512;
}

/// Decoder configuration
pub mod decoder {
    /// Bytes read from the stream start to sniff codec headers
    pub const SNIFF_BYTES: usize = 16 * 1024;
    /// Malformed packets skipped in a row before decoding gives up
    pub const MAX_CONSECUTIVE_ERRORS: u32 = 100;
    /// Decoded packets queued ahead of the audio output
    pub const DECODE_QUEUE_PACKETS: usize = 16;
    /// Largest single read the decode thread takes from the cache buffer
    pub const FEED_READ_BYTES: usize = 2048;
    /// Poll period of the decode thread while the buffer is dry (milliseconds)
    pub const FEED_POLL_MS: u64 = 5;
    /// Time allowed for parsing the stream headers (milliseconds)
    pub const OPEN_TIMEOUT_MS: u64 = 5000;
}

/// Playback timing configuration
pub mod playback {
    /// Minimum interval between two `play` calls (milliseconds)
    pub const PLAY_CALL_INTERVAL_MS: u64 = 400;
    /// Wait used instead of pre-buffering when it is skipped (milliseconds)
    pub const SKIP_PRE_BUFFERING_DELAY_MS: u64 = 500;
    /// Delay before a scheduled restart (milliseconds)
    pub const RESTART_DELAY_MS: u64 = 200;
    /// Play-time timer period (milliseconds)
    pub const TIMER_INTERVAL_MS: u64 = 100;
    /// Reserve subtracted from the maximum play time (seconds)
    pub const MAX_PLAY_TIME_RESERVE_SECS: f64 = 120.0;
    /// Pending-record delay below which the record switches (seconds)
    pub const RECORD_DELAY_EPSILON: f64 = 0.0001;
}

/// Timeout configuration for underrun detection
pub mod timeouts {
    /// Time after audio start without any decoded sample before failing
    pub const NO_AUDIO_TIMEOUT_SECS: u64 = 10;

    /// Time without decoded samples, after audio flowed, before failing
    pub const UNDERRUN_TIMEOUT_SECS: u64 = 5;
}

fn default_cache_stream_size_kb() -> usize {
    buffer::DEFAULT_CACHE_STREAM_SIZE_KB
}

fn default_max_cache_stream_size_kb() -> usize {
    buffer::MAX_CACHE_STREAM_SIZE_KB
}

fn default_skip_delay_ms() -> u64 {
    playback::SKIP_PRE_BUFFERING_DELAY_MS
}

fn default_play_call_interval_ms() -> u64 {
    playback::PLAY_CALL_INTERVAL_MS
}

fn default_restart_delay_ms() -> u64 {
    playback::RESTART_DELAY_MS
}

fn default_timer_interval_ms() -> u64 {
    playback::TIMER_INTERVAL_MS
}

fn default_no_audio_timeout_ms() -> u64 {
    timeouts::NO_AUDIO_TIMEOUT_SECS * 1000
}

fn default_underrun_timeout_ms() -> u64 {
    timeouts::UNDERRUN_TIMEOUT_SECS * 1000
}

fn default_min_decode_bytes() -> usize {
    buffer::MIN_DECODE_BYTES
}

fn default_data_stream_size_kb() -> usize {
    buffer::MIN_DATA_STREAM_SIZE_KB
}

fn default_connect_timeout_secs() -> u64 {
    network::CONNECT_TIMEOUT_SECS
}

fn default_read_timeout_secs() -> u64 {
    network::READ_TIMEOUT_SECS
}

fn default_user_agent() -> String {
    network::USER_AGENT.to_string()
}

fn default_true() -> bool {
    true
}

/// Runtime settings for a playback session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    #[serde(default = "default_cache_stream_size_kb")]
    pub cache_stream_size_kb: usize,
    #[serde(default = "default_max_cache_stream_size_kb")]
    pub max_cache_stream_size_kb: usize,
    /// Copy bytes straight through without requesting or parsing ICY metadata
    #[serde(default)]
    pub legacy_mode: bool,
    #[serde(default)]
    pub skip_pre_buffering: bool,
    #[serde(default = "default_skip_delay_ms")]
    pub skip_pre_buffering_delay_ms: u64,
    /// Keep a rolling copy of the produced PCM
    #[serde(default)]
    pub capture_data_stream: bool,
    #[serde(default = "default_data_stream_size_kb")]
    pub data_stream_size_kb: usize,
    #[serde(default = "default_play_call_interval_ms")]
    pub play_call_interval_ms: u64,
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,
    #[serde(default = "default_timer_interval_ms")]
    pub timer_interval_ms: u64,
    #[serde(default = "default_no_audio_timeout_ms")]
    pub no_audio_timeout_ms: u64,
    #[serde(default = "default_underrun_timeout_ms")]
    pub underrun_timeout_ms: u64,
    #[serde(default = "default_min_decode_bytes")]
    pub min_decode_bytes: usize,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Run the connectivity preflight before connecting
    #[serde(default = "default_true")]
    pub check_connectivity: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            cache_stream_size_kb: default_cache_stream_size_kb(),
            max_cache_stream_size_kb: default_max_cache_stream_size_kb(),
            legacy_mode: false,
            skip_pre_buffering: false,
            skip_pre_buffering_delay_ms: default_skip_delay_ms(),
            capture_data_stream: false,
            data_stream_size_kb: default_data_stream_size_kb(),
            play_call_interval_ms: default_play_call_interval_ms(),
            restart_delay_ms: default_restart_delay_ms(),
            timer_interval_ms: default_timer_interval_ms(),
            no_audio_timeout_ms: default_no_audio_timeout_ms(),
            underrun_timeout_ms: default_underrun_timeout_ms(),
            min_decode_bytes: default_min_decode_bytes(),
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
            user_agent: default_user_agent(),
            check_connectivity: true,
        }
    }
}

impl PlayerConfig {
    /// Parse a config from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let mut config: Self = serde_json::from_str(json)?;
        config.sanitize();
        Ok(config)
    }

    /// Clamp sizes into their supported ranges.
    pub fn sanitize(&mut self) {
        if self.max_cache_stream_size_kb == 0 {
            self.max_cache_stream_size_kb = buffer::MAX_CACHE_STREAM_SIZE_KB;
        }
        if self.cache_stream_size_kb == 0 {
            self.cache_stream_size_kb = buffer::DEFAULT_CACHE_STREAM_SIZE_KB;
        }
        self.cache_stream_size_kb = self.cache_stream_size_kb.min(self.max_cache_stream_size_kb);
        self.data_stream_size_kb = self.data_stream_size_kb.clamp(
            buffer::MIN_DATA_STREAM_SIZE_KB,
            buffer::MAX_DATA_STREAM_SIZE_KB,
        );
        if self.timer_interval_ms == 0 {
            self.timer_interval_ms = playback::TIMER_INTERVAL_MS;
        }
        self.min_decode_bytes = self.min_decode_bytes.max(buffer::MAX_MP3_FRAME_BYTES);
    }

    pub fn cache_stream_size(&self) -> usize {
        self.cache_stream_size_kb * 1024
    }

    pub fn max_cache_stream_size(&self) -> usize {
        self.max_cache_stream_size_kb * 1024
    }

    pub fn play_call_interval(&self) -> Duration {
        Duration::from_millis(self.play_call_interval_ms)
    }

    pub fn skip_pre_buffering_delay(&self) -> Duration {
        Duration::from_millis(self.skip_pre_buffering_delay_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    pub fn timer_interval(&self) -> Duration {
        Duration::from_millis(self.timer_interval_ms)
    }

    pub fn no_audio_timeout(&self) -> Duration {
        Duration::from_millis(self.no_audio_timeout_ms)
    }

    pub fn underrun_timeout(&self) -> Duration {
        Duration::from_millis(self.underrun_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_defaults() {
        let config = PlayerConfig::from_json("{}").unwrap();
        assert_eq!(config.cache_stream_size_kb, 1024);
        assert_eq!(config.max_cache_stream_size_kb, 16384);
        assert_eq!(config.timer_interval_ms, 100);
        assert_eq!(config.user_agent, "WinampMPEG/5.09");
        assert!(config.check_connectivity);
        assert!(!config.legacy_mode);
    }

    #[test]
    fn partial_json_overrides_fields() {
        let config =
            PlayerConfig::from_json(r#"{"legacy_mode": true, "restart_delay_ms": 1500}"#).unwrap();
        assert!(config.legacy_mode);
        assert_eq!(config.restart_delay(), Duration::from_millis(1500));
        assert_eq!(config.play_call_interval_ms, 400);
    }

    #[test]
    fn sanitize_caps_cache_at_max() {
        let mut config = PlayerConfig {
            cache_stream_size_kb: 99999,
            max_cache_stream_size_kb: 2048,
            ..Default::default()
        };
        config.sanitize();
        assert_eq!(config.cache_stream_size_kb, 2048);
        assert_eq!(config.cache_stream_size(), 2048 * 1024);
    }

    #[test]
    fn sanitize_clamps_data_stream_size() {
        let mut config = PlayerConfig {
            data_stream_size_kb: 1,
            ..Default::default()
        };
        config.sanitize();
        assert_eq!(config.data_stream_size_kb, 128);

        config.data_stream_size_kb = 100_000;
        config.sanitize();
        assert_eq!(config.data_stream_size_kb, 512);
    }

    #[test]
    fn sanitize_raises_min_decode_bytes_to_one_frame() {
        let mut config = PlayerConfig::from_json(r#"{"min_decode_bytes": 1}"#).unwrap();
        config.sanitize();
        assert_eq!(config.min_decode_bytes, 1441);

        config.min_decode_bytes = 32 * 1024;
        config.sanitize();
        assert_eq!(config.min_decode_bytes, 32 * 1024);
    }

    #[test]
    fn invalid_json_is_error() {
        assert!(PlayerConfig::from_json("not json").is_err());
    }
}
