//! ICY stream demuxing
//!
//! Icecast/Shoutcast servers interleave a metadata block after every
//! `icy-metaint` audio bytes: one length byte (×16) followed by that many
//! bytes of `key='value';` text. `IcyDemuxer` strips those blocks out of the
//! raw body, forwards the audio, and announces `StreamTitle` changes together
//! with the delay until they become audible.

use reqwest::header::HeaderMap;

use crate::error::Result;
use crate::stream::metadata::{parse_record, trim_padding, CharsetDetector, RecordInfo};

/// Headers parsed from an ICY stream response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IcyHeaders {
    /// Audio bytes between metadata blocks; `None` when the server sends none
    pub metaint: Option<usize>,
    pub name: Option<String>,
    pub genre: Option<String>,
    pub bitrate: Option<u32>,
    /// Server banner (`icy-notice2`)
    pub notice: Option<String>,
    pub content_type: Option<String>,
}

impl IcyHeaders {
    /// Read the ICY fields from an HTTP response header map.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let text = |key: &str| {
            headers
                .get(key)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };

        let metaint = text("icy-metaint")
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&v| v > 0);

        // Some servers send "128,128" or "128 kbps"
        let bitrate = text("icy-br").and_then(|v| {
            v.split(|c: char| !c.is_ascii_digit())
                .find(|s| !s.is_empty())
                .and_then(|s| s.parse::<u32>().ok())
        });

        Self {
            metaint,
            name: text("icy-name"),
            genre: text("icy-genre"),
            bitrate,
            notice: text("icy-notice2"),
            content_type: text("content-type"),
        }
    }
}

/// Receiver of demuxed output
pub trait DemuxSink {
    /// Store audio bytes, in stream order.
    fn write_audio(&mut self, bytes: &[u8]) -> Result<()>;

    /// Audio bytes buffered but not yet played.
    fn buffered_bytes(&self) -> usize;

    /// A record was announced; it becomes audible after `delay` seconds.
    fn on_record(&mut self, record: RecordInfo, delay: f64);
}

/// Seconds of audio held by `buffered_bytes` at `bitrate_kbps`.
pub fn buffered_delay(buffered_bytes: usize, bitrate_kbps: u32) -> f64 {
    if bitrate_kbps == 0 {
        return 0.0;
    }
    buffered_bytes as f64 / (bitrate_kbps as f64 * 125.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Audio bytes left before the next length byte
    Audio(usize),
    /// Next byte is the metadata length prefix
    Length,
    /// Collecting a metadata block of the given total size
    Metadata(usize),
}

/// Incremental ICY demuxer; one per playback attempt.
///
/// Chunks may split a metadata block anywhere, including between the length
/// byte and its payload; partial blocks are carried over to the next `feed`.
pub struct IcyDemuxer {
    metaint: Option<usize>,
    bitrate: u32,
    phase: Phase,
    meta_buf: Vec<u8>,
    charset: CharsetDetector,
    announced: bool,
    audio_bytes: u64,
    metadata_blocks: u64,
    records: u64,
}

impl IcyDemuxer {
    pub fn new(metaint: Option<usize>, bitrate_kbps: u32) -> Self {
        let metaint = metaint.filter(|&m| m > 0);
        Self {
            metaint,
            bitrate: bitrate_kbps,
            phase: Phase::Audio(metaint.unwrap_or(usize::MAX)),
            meta_buf: Vec::new(),
            charset: CharsetDetector::new(),
            announced: false,
            audio_bytes: 0,
            metadata_blocks: 0,
            records: 0,
        }
    }

    /// Update the bitrate used for delay conversion.
    pub fn set_bitrate(&mut self, bitrate_kbps: u32) {
        self.bitrate = bitrate_kbps;
    }

    /// Split one network chunk into audio and metadata.
    pub fn feed<S: DemuxSink + ?Sized>(&mut self, mut chunk: &[u8], sink: &mut S) -> Result<()> {
        let Some(metaint) = self.metaint else {
            sink.write_audio(chunk)?;
            self.audio_bytes += chunk.len() as u64;
            return Ok(());
        };

        while !chunk.is_empty() {
            match self.phase {
                Phase::Audio(remaining) => {
                    let n = remaining.min(chunk.len());
                    sink.write_audio(&chunk[..n])?;
                    self.audio_bytes += n as u64;
                    chunk = &chunk[n..];
                    self.phase = if n == remaining {
                        Phase::Length
                    } else {
                        Phase::Audio(remaining - n)
                    };
                }
                Phase::Length => {
                    let len = chunk[0] as usize * 16;
                    chunk = &chunk[1..];
                    if len == 0 {
                        self.phase = Phase::Audio(metaint);
                    } else {
                        self.meta_buf.clear();
                        self.phase = Phase::Metadata(len);
                    }
                }
                Phase::Metadata(len) => {
                    let n = (len - self.meta_buf.len()).min(chunk.len());
                    self.meta_buf.extend_from_slice(&chunk[..n]);
                    chunk = &chunk[n..];
                    if self.meta_buf.len() == len {
                        self.finish_block(sink);
                        self.phase = Phase::Audio(metaint);
                    }
                }
            }
        }
        Ok(())
    }

    fn finish_block<S: DemuxSink + ?Sized>(&mut self, sink: &mut S) {
        self.metadata_blocks += 1;
        let text = self.charset.decode(trim_padding(&self.meta_buf));
        let Some(record) = parse_record(&text) else {
            tracing::trace!(metadata = %text, "metadata block without StreamTitle");
            return;
        };

        let delay = if self.announced {
            buffered_delay(sink.buffered_bytes(), self.bitrate)
        } else {
            self.announced = true;
            0.0
        };
        self.records += 1;
        tracing::debug!(record = %record.info, delay, "record announced");
        sink.on_record(record, delay);
    }

    /// Audio bytes forwarded so far
    pub fn audio_bytes(&self) -> u64 {
        self.audio_bytes
    }

    /// Non-empty metadata blocks consumed so far
    pub fn metadata_blocks(&self) -> u64 {
        self.metadata_blocks
    }

    /// Records announced so far
    pub fn records(&self) -> u64 {
        self.records
    }
}
