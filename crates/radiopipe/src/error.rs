//! Error types for radiopipe
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

use crate::station::AudioCodec;

/// Main error type for the playback pipeline
#[derive(Error, Debug)]
pub enum RadioError {
    #[error("{}", friendly_network_error(.0))]
    Network(#[from] reqwest::Error),

    #[error("Unsupported codec for format {0}")]
    UnsupportedCodec(String),

    #[error("Codec {0} is excluded for this station")]
    ExcludedCodecConflict(AudioCodec),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("No internet connection available")]
    NoInternet,

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("Buffer underrun: {0}")]
    BufferUnderrun(String),

    #[error("Unsupported sample rate: {0} Hz")]
    InvalidSampleRate(u32),

    #[error("Buffer overflow: {requested} bytes requested, {available} bytes free")]
    BufferOverflow { requested: usize, available: usize },

    #[error("Invalid station: {0}")]
    InvalidStation(String),

    #[error("Playback is already active")]
    AlreadyPlaying,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for radiopipe
pub type Result<T> = std::result::Result<T, RadioError>;

fn friendly_network_error(e: &reqwest::Error) -> String {
    if e.is_builder() {
        if let Some(url) = e.url() {
            return format!("Invalid URL: {url}");
        }
        return "Invalid URL".to_string();
    }
    if e.is_connect() {
        if let Some(url) = e.url() {
            return format!("Could not connect to {}", url.host_str().unwrap_or("server"));
        }
        return "Could not connect to server".to_string();
    }
    if e.is_timeout() {
        return "Connection timed out".to_string();
    }
    if e.is_status() {
        if let Some(status) = e.status() {
            return format!("Server responded with HTTP {status}");
        }
    }
    format!("Network error: {e}")
}
