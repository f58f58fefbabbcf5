//! Codec decoders over the cache buffer
//!
//! A `Decoder` turns the byte stream held by a `RingCacheBuffer` into
//! interleaved f32 PCM. Both codecs sniff their headers first (sample rate,
//! channels), rewind, and then hand the stream to symphonia.
//!
//! symphonia runs on its own thread behind a `FeedSource` that blocks while
//! the buffer is dry, so a packet is never cut short by an underrun. Decoded
//! packets travel to the output through a bounded queue; `read_samples` only
//! pops from that queue and returns `Ok(0)` when it is empty.
//!
//!   RingCacheBuffer → FeedSource → symphonia (radio-decoder thread)
//!                                       ↓ PcmChunk queue
//!                                  read_samples (audio pull)

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender, TryRecvError};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSourceStream, ReadOnlySource};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::config::buffer::MIN_DECODE_BYTES;
use crate::config::decoder::{
    DECODE_QUEUE_PACKETS, FEED_POLL_MS, FEED_READ_BYTES, MAX_CONSECUTIVE_ERRORS, OPEN_TIMEOUT_MS,
    SNIFF_BYTES,
};
use crate::error::{RadioError, Result};
use crate::station::AudioCodec;
use crate::stream::buffer::{RingCacheBuffer, RingReader};

use super::probe::{find_mp3_frame, find_vorbis_ident, Mp3FrameHeader, VorbisIdent, MP3_SAMPLE_RATES};
use super::stats::DecoderStats;
use super::types::CodecInfo;

/// PCM source pulled by the audio output
pub trait Decoder: Send {
    fn codec(&self) -> AudioCodec;

    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;

    /// Fill `out` with interleaved samples; returns how many were written.
    ///
    /// `Ok(0)` means no decodable data right now, not end of stream.
    fn read_samples(&mut self, out: &mut [f32]) -> Result<usize>;

    fn info(&self) -> CodecInfo {
        CodecInfo {
            codec: self.codec(),
            channels: self.channels(),
            sample_rate: self.sample_rate(),
            bitrate: None,
        }
    }

    /// Frame, error and underrun counters, when the decoder keeps them
    fn stats(&self) -> Option<Arc<DecoderStats>> {
        None
    }
}

/// Builds the decoder for a codec once the buffer is pre-filled
pub trait DecoderFactory: Send + Sync {
    fn create(&self, codec: AudioCodec, reader: RingReader) -> Result<Box<dyn Decoder>>;
}

/// Default factory: symphonia-backed MP3 and Vorbis decoders
#[derive(Debug, Clone)]
pub struct SymphoniaDecoderFactory {
    min_decode_bytes: usize,
}

impl Default for SymphoniaDecoderFactory {
    fn default() -> Self {
        Self::new(MIN_DECODE_BYTES)
    }
}

impl SymphoniaDecoderFactory {
    pub fn new(min_decode_bytes: usize) -> Self {
        Self { min_decode_bytes }
    }
}

impl DecoderFactory for SymphoniaDecoderFactory {
    fn create(&self, codec: AudioCodec, reader: RingReader) -> Result<Box<dyn Decoder>> {
        match codec {
            AudioCodec::Mp3 => Ok(Box::new(Mp3Decoder::new(reader, self.min_decode_bytes)?)),
            AudioCodec::Vorbis => Ok(Box::new(VorbisDecoder::new(reader, self.min_decode_bytes)?)),
            AudioCodec::None => Err(RadioError::UnsupportedCodec(
                "no decoder for this stream format".to_string(),
            )),
        }
    }
}

/// Read up to `SNIFF_BYTES` from the current position, then rewind to it.
fn sniff_head(reader: &mut RingReader) -> Result<Vec<u8>> {
    let start = reader.stream_position()?;
    let mut head = vec![0u8; SNIFF_BYTES];
    let mut filled = 0;
    while filled < head.len() {
        let n = reader.read(&mut head[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    head.truncate(filled);
    reader.seek(SeekFrom::Start(start))?;
    Ok(head)
}

/// Blocking byte source for the decode thread.
///
/// A dry buffer blocks the read until `min_decode_bytes` are buffered again;
/// only a finished buffer (or cancellation) ends the stream. Reads are capped
/// at `FEED_READ_BYTES` so symphonia never holds much more than one packet
/// ahead of what it decoded.
struct FeedSource {
    ring: Arc<RingCacheBuffer>,
    cancel: Arc<AtomicBool>,
    min_decode_bytes: usize,
    stats: Arc<DecoderStats>,
}

impl FeedSource {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn wait_for_data(&self) {
        let poll = Duration::from_millis(FEED_POLL_MS);
        let wanted = self.min_decode_bytes.max(1);
        loop {
            thread::sleep(poll);
            if self.cancelled() || self.ring.is_finished() || self.ring.len() >= wanted {
                return;
            }
        }
    }
}

impl Read for FeedSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let cap = buf.len().min(FEED_READ_BYTES);
        if cap == 0 {
            return Ok(0);
        }
        loop {
            // Checked before reading: the writer only finishes after its last write.
            let finished = self.ring.is_finished();
            let n = self.ring.read(&mut buf[..cap]);
            if n > 0 || finished || self.cancelled() {
                return Ok(n);
            }
            self.stats.record_underrun();
            self.wait_for_data();
        }
    }
}

/// One decoded packet on its way to the output
struct PcmChunk {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
    /// Buffer read position once the packet was pulled in
    end_position: u64,
}

/// Rate and channels declared by the selected track
type TrackParams = (Option<u32>, Option<u16>);

/// symphonia format reader + decoder pair, owned by the decode thread
struct PacketDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    track_id: u32,
    sample_buf: Option<SampleBuffer<f32>>,
    stats: Arc<DecoderStats>,
}

impl PacketDecoder {
    fn open(source: FeedSource, extension: &str) -> Result<Self> {
        let stats = source.stats.clone();
        let mss = MediaSourceStream::new(Box::new(ReadOnlySource::new(source)), Default::default());

        let mut hint = Hint::new();
        hint.with_extension(extension);

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| RadioError::DecodeError(format!("Probe error: {}", e)))?;

        let format = probed.format;
        let (track_id, decoder) = Self::make_decoder(format.as_ref())?;
        Ok(Self {
            format,
            decoder,
            track_id,
            sample_buf: None,
            stats,
        })
    }

    /// Pick the first audio track and build a decoder for it.
    fn make_decoder(
        format: &dyn FormatReader,
    ) -> Result<(u32, Box<dyn symphonia::core::codecs::Decoder>)> {
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| RadioError::DecodeError("No audio track found".to_string()))?;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| RadioError::DecodeError(format!("Decoder creation error: {}", e)))?;
        Ok((track.id, decoder))
    }

    /// Re-select the track after the format reader asked for a reset
    /// (chained Ogg streams start a new logical stream per song).
    fn reset_track(&mut self) -> Result<()> {
        let (track_id, decoder) = Self::make_decoder(self.format.as_ref())?;
        self.track_id = track_id;
        self.decoder = decoder;
        Ok(())
    }

    fn params(&self) -> TrackParams {
        let track_id = self.track_id;
        self.format
            .tracks()
            .iter()
            .find(|t| t.id == track_id)
            .map_or((None, None), |t| {
                (
                    t.codec_params.sample_rate,
                    t.codec_params.channels.map(|c| c.count() as u16),
                )
            })
    }

    /// Decode the next packet into interleaved samples. `Ok(None)` at end of stream.
    fn next_packet(&mut self) -> Result<Option<(Vec<f32>, u32, u16)>> {
        let mut errors = 0u32;
        loop {
            if errors > MAX_CONSECUTIVE_ERRORS {
                return Err(RadioError::DecodeError(format!(
                    "{} malformed packets in a row",
                    errors
                )));
            }

            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => {
                    tracing::debug!("format reader reset, rebuilding decoder");
                    self.reset_track()?;
                    continue;
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    tracing::debug!(error = e, "skipping malformed container data");
                    self.stats.record_error();
                    errors += 1;
                    continue;
                }
                Err(e) => return Err(RadioError::DecodeError(e.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let reuse = self
                        .sample_buf
                        .as_ref()
                        .is_some_and(|buf| buf.capacity() >= decoded.capacity() * spec.channels.count());
                    if !reuse {
                        self.sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
                    }
                    let Some(buf) = self.sample_buf.as_mut() else {
                        continue;
                    };
                    buf.copy_interleaved_ref(decoded);
                    self.stats.record_frame();
                    return Ok(Some((
                        buf.samples().to_vec(),
                        spec.rate,
                        spec.channels.count() as u16,
                    )));
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    tracing::debug!(error = e, "skipping undecodable packet");
                    self.stats.record_error();
                    errors += 1;
                }
                Err(SymphoniaError::ResetRequired) => self.reset_track()?,
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Ok(None);
                }
                Err(e) => return Err(RadioError::DecodeError(e.to_string())),
            }
        }
    }
}

/// Hand `message` to the output queue, waiting while it is full.
///
/// Returns false once the consumer is gone or the decoder was cancelled.
fn send_chunk(chunks: &Sender<Result<PcmChunk>>, mut message: Result<PcmChunk>, cancel: &AtomicBool) -> bool {
    let poll = Duration::from_millis(FEED_POLL_MS);
    loop {
        match chunks.send_timeout(message, poll) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(m)) => {
                if cancel.load(Ordering::SeqCst) {
                    return false;
                }
                message = m;
            }
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}

/// Body of the decode thread.
fn decode_loop(
    source: FeedSource,
    extension: &str,
    ready: Sender<Result<TrackParams>>,
    chunks: Sender<Result<PcmChunk>>,
) {
    let ring = source.ring.clone();
    let cancel = source.cancel.clone();
    let mut packets = match PacketDecoder::open(source, extension) {
        Ok(packets) => {
            let _ = ready.send(Ok(packets.params()));
            packets
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    while !cancel.load(Ordering::SeqCst) {
        let message = match packets.next_packet() {
            Ok(Some((samples, sample_rate, channels))) => Ok(PcmChunk {
                samples,
                sample_rate,
                channels,
                end_position: ring.position(),
            }),
            Ok(None) => {
                tracing::debug!("decoder reached end of stream");
                return;
            }
            Err(e) => Err(e),
        };
        let failed = message.is_err();
        if !send_chunk(&chunks, message, &cancel) || failed {
            return;
        }
    }
}

/// Output side of a symphonia decode thread
struct SymphoniaStream {
    chunks: Receiver<Result<PcmChunk>>,
    current: Option<PcmChunk>,
    offset: usize,
    channels: u16,
    sample_rate: u32,
    ring: Arc<RingCacheBuffer>,
    cancel: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    /// The decode thread finished and the queue is empty
    ended: bool,
    stats: Arc<DecoderStats>,
}

impl SymphoniaStream {
    /// Start the decode thread and wait until symphonia parsed the stream headers.
    fn open(
        reader: RingReader,
        extension: &'static str,
        min_decode_bytes: usize,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Self> {
        let ring = reader.buffer().clone();
        ring.set_consumed_position(ring.position());

        let cancel = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(DecoderStats::new());
        let source = FeedSource {
            ring: ring.clone(),
            cancel: cancel.clone(),
            min_decode_bytes,
            stats: stats.clone(),
        };
        let (ready_tx, ready_rx) = bounded(1);
        let (chunk_tx, chunk_rx) = bounded(DECODE_QUEUE_PACKETS);
        let worker = thread::Builder::new()
            .name("radio-decoder".to_string())
            .spawn(move || decode_loop(source, extension, ready_tx, chunk_tx))?;

        let mut stream = Self {
            chunks: chunk_rx,
            current: None,
            offset: 0,
            channels,
            sample_rate,
            ring,
            cancel,
            worker: Some(worker),
            ended: false,
            stats,
        };

        match ready_rx.recv_timeout(Duration::from_millis(OPEN_TIMEOUT_MS)) {
            Ok(Ok((rate, track_channels))) => {
                if let Some(rate) = rate {
                    stream.sample_rate = rate;
                }
                if let Some(track_channels) = track_channels {
                    stream.channels = track_channels;
                }
                Ok(stream)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(RadioError::DecodeError(
                "Timed out waiting for the stream headers".to_string(),
            )),
        }
    }

    fn read_samples(&mut self, out: &mut [f32]) -> Result<usize> {
        let mut written = 0;
        while written < out.len() {
            if let Some(chunk) = self.current.as_ref() {
                let pending = &chunk.samples[self.offset..];
                if !pending.is_empty() {
                    let n = pending.len().min(out.len() - written);
                    out[written..written + n].copy_from_slice(&pending[..n]);
                    self.offset += n;
                    written += n;
                    continue;
                }
                self.ring.set_consumed_position(chunk.end_position);
                self.current = None;
            }

            match self.chunks.try_recv() {
                Ok(Ok(chunk)) => {
                    self.sample_rate = chunk.sample_rate;
                    self.channels = chunk.channels;
                    self.offset = 0;
                    self.current = Some(chunk);
                }
                Ok(Err(e)) => return Err(e),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.ended = true;
                    break;
                }
            }
        }
        Ok(written)
    }
}

impl Drop for SymphoniaStream {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("decoder thread panicked");
            }
        }
    }
}

/// MPEG layer III decoder
pub struct Mp3Decoder {
    stream: SymphoniaStream,
    header: Mp3FrameHeader,
}

impl Mp3Decoder {
    /// Sniff the first frame header and check the sample rate.
    ///
    /// The reader is left where it was.
    pub fn probe(reader: &mut RingReader) -> Result<Mp3FrameHeader> {
        let head = sniff_head(reader)?;
        let (_, header) = find_mp3_frame(&head).ok_or_else(|| {
            RadioError::DecodeError(format!(
                "No MPEG audio frame in the first {} bytes",
                head.len()
            ))
        })?;

        if header.layer != 3 {
            return Err(RadioError::DecodeError(format!(
                "MPEG layer {} streams are not supported",
                header.layer
            )));
        }
        if !MP3_SAMPLE_RATES.contains(&header.sample_rate) {
            return Err(RadioError::InvalidSampleRate(header.sample_rate));
        }
        Ok(header)
    }

    pub fn new(mut reader: RingReader, min_decode_bytes: usize) -> Result<Self> {
        let header = Self::probe(&mut reader)?;
        tracing::debug!(
            sample_rate = header.sample_rate,
            channels = header.channels,
            bitrate = header.bitrate,
            "mp3 stream detected"
        );
        let stream = SymphoniaStream::open(
            reader,
            "mp3",
            min_decode_bytes,
            header.sample_rate,
            header.channels,
        )?;
        Ok(Self { stream, header })
    }

    pub fn header(&self) -> &Mp3FrameHeader {
        &self.header
    }
}

impl Decoder for Mp3Decoder {
    fn codec(&self) -> AudioCodec {
        AudioCodec::Mp3
    }

    fn sample_rate(&self) -> u32 {
        self.stream.sample_rate
    }

    fn channels(&self) -> u16 {
        self.stream.channels
    }

    fn read_samples(&mut self, out: &mut [f32]) -> Result<usize> {
        self.stream.read_samples(out)
    }

    fn info(&self) -> CodecInfo {
        CodecInfo {
            codec: AudioCodec::Mp3,
            channels: self.channels(),
            sample_rate: self.sample_rate(),
            bitrate: Some(self.header.bitrate),
        }
    }

    fn stats(&self) -> Option<Arc<DecoderStats>> {
        Some(self.stream.stats.clone())
    }
}

/// Ogg/Vorbis decoder
pub struct VorbisDecoder {
    stream: SymphoniaStream,
    ident: VorbisIdent,
}

impl VorbisDecoder {
    /// Sniff the identification header. The reader is left where it was.
    pub fn probe(reader: &mut RingReader) -> Result<VorbisIdent> {
        let head = sniff_head(reader)?;
        find_vorbis_ident(&head).ok_or_else(|| {
            RadioError::DecodeError("No Vorbis identification header found".to_string())
        })
    }

    pub fn new(mut reader: RingReader, min_decode_bytes: usize) -> Result<Self> {
        let ident = Self::probe(&mut reader)?;
        // The Ogg reader needs all three Vorbis headers from the first page on.
        reader.seek(SeekFrom::Start(0))?;
        tracing::debug!(
            sample_rate = ident.sample_rate,
            channels = ident.channels,
            "vorbis stream detected"
        );
        let stream = SymphoniaStream::open(
            reader,
            "ogg",
            min_decode_bytes,
            ident.sample_rate,
            ident.channels,
        )?;
        Ok(Self { stream, ident })
    }

    pub fn ident(&self) -> &VorbisIdent {
        &self.ident
    }
}

impl Decoder for VorbisDecoder {
    fn codec(&self) -> AudioCodec {
        AudioCodec::Vorbis
    }

    fn sample_rate(&self) -> u32 {
        self.stream.sample_rate
    }

    fn channels(&self) -> u16 {
        self.stream.channels
    }

    fn read_samples(&mut self, out: &mut [f32]) -> Result<usize> {
        self.stream.read_samples(out)
    }

    fn info(&self) -> CodecInfo {
        CodecInfo {
            codec: AudioCodec::Vorbis,
            channels: self.channels(),
            sample_rate: self.sample_rate(),
            bitrate: self.ident.nominal_bitrate.map(|b| b / 1000),
        }
    }

    fn stats(&self) -> Option<Arc<DecoderStats>> {
        Some(self.stream.stats.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::probe::tests::{mp3_frames, mpeg1_header, vorbis_ident_page};
    use std::time::Instant;

    /// Bytes per 128 kbps / 44.1 kHz frame from `mpeg1_header(0)`
    const FRAME_LEN: usize = 417;

    fn reader_with(data: &[u8]) -> RingReader {
        let ring = Arc::new(RingCacheBuffer::new(64 * 1024, 1024 * 1024));
        ring.write(data).unwrap();
        ring.set_probe_hold(true);
        RingReader::new(ring)
    }

    /// Pull whatever the decode thread has queued, giving it a moment to catch up.
    fn pull_available(decoder: &mut Mp3Decoder, out: &mut [f32]) -> usize {
        let mut total = 0;
        let mut idle = 0;
        while idle < 20 {
            let n = decoder.read_samples(out).unwrap();
            if n == 0 {
                idle += 1;
                thread::sleep(Duration::from_millis(2));
            } else {
                idle = 0;
                total += n;
            }
        }
        total
    }

    /// Pull until the decode thread reached the end of a finished buffer.
    fn pull_to_end(decoder: &mut Mp3Decoder, out: &mut [f32]) -> usize {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut total = 0;
        while Instant::now() < deadline {
            let n = decoder.read_samples(out).unwrap();
            total += n;
            if n == 0 {
                if decoder.stream.ended {
                    break;
                }
                thread::sleep(Duration::from_millis(1));
            }
        }
        total
    }

    #[test]
    fn mp3_probe_accepts_supported_rates() {
        for (idx, rate) in [(0u8, 44100u32), (1, 48000), (2, 32000)] {
            let mut reader = reader_with(&mp3_frames(mpeg1_header(idx), 4));
            let header = Mp3Decoder::probe(&mut reader).unwrap();
            assert_eq!(header.sample_rate, rate);
            assert_eq!(header.channels, 2);
        }
    }

    #[test]
    fn mp3_probe_rewinds() {
        let mut reader = reader_with(&mp3_frames(mpeg1_header(0), 4));
        Mp3Decoder::probe(&mut reader).unwrap();
        assert_eq!(reader.buffer().position(), 0);
        assert_eq!(reader.buffer().len(), FRAME_LEN * 4);
    }

    #[test]
    fn mp3_rejects_mpeg2_rates() {
        let header = [0xFF, 0xF3, 0x80, 0x00];
        let mut data = header.to_vec();
        data.resize(208, 0);
        let data = data.repeat(4);

        let result = Mp3Decoder::new(reader_with(&data), MIN_DECODE_BYTES);
        assert!(matches!(result, Err(RadioError::InvalidSampleRate(22050))));
    }

    #[test]
    fn mp3_rejects_non_mpeg_data() {
        let result = Mp3Decoder::new(reader_with(&[0x42; 4096]), MIN_DECODE_BYTES);
        assert!(matches!(result, Err(RadioError::DecodeError(_))));
    }

    #[test]
    fn mp3_rejects_layer2() {
        let mut reader = reader_with(&[0xFF, 0xFD, 0x90, 0x00, 0x00, 0x00]);
        assert!(matches!(
            Mp3Decoder::probe(&mut reader),
            Err(RadioError::DecodeError(_))
        ));
    }

    #[test]
    fn silent_mp3_frames_decode_then_starve() {
        let ring = Arc::new(RingCacheBuffer::new(64 * 1024, 1024 * 1024));
        ring.write(&mp3_frames(mpeg1_header(0), 20)).unwrap();
        let mut decoder = Mp3Decoder::new(RingReader::new(ring.clone()), 1024).unwrap();
        assert_eq!(decoder.sample_rate(), 44100);
        assert_eq!(decoder.codec(), AudioCodec::Mp3);

        let mut out = vec![1.0f32; 4096];
        let total = pull_available(&mut decoder, &mut out);
        assert!(total > 0);
        assert!(out.iter().all(|s| s.abs() < 1e-3 || *s == 1.0));

        // Running dry is not an error and does not end the stream
        assert_eq!(decoder.read_samples(&mut out).unwrap(), 0);
        assert!(!decoder.stream.ended);
        let stats = decoder.stats().unwrap();
        assert!(stats.snapshot().2 >= 1);
    }

    #[test]
    fn trickled_frames_decode_like_bulk_input() {
        let frames = mp3_frames(mpeg1_header(0), 200);
        let mut out = vec![0.0f32; 4096];

        let bulk_ring = Arc::new(RingCacheBuffer::new(64 * 1024, 1024 * 1024));
        bulk_ring.write(&frames).unwrap();
        bulk_ring.finish();
        let mut bulk = Mp3Decoder::new(RingReader::new(bulk_ring), 1).unwrap();
        let expected = pull_to_end(&mut bulk, &mut out);
        assert_eq!(expected, 200 * 1152 * 2);

        // Refills smaller than one frame, with the decoder pulled dry in between
        let ring = Arc::new(RingCacheBuffer::new(64 * 1024, 1024 * 1024));
        ring.write(&frames[..FRAME_LEN * 20]).unwrap();
        let mut decoder = Mp3Decoder::new(RingReader::new(ring.clone()), 1).unwrap();
        let mut total = 0;
        for piece in frames[FRAME_LEN * 20..].chunks(300) {
            loop {
                let n = decoder.read_samples(&mut out).unwrap();
                if n == 0 {
                    break;
                }
                total += n;
            }
            ring.write(piece).unwrap();
            thread::sleep(Duration::from_millis(1));
        }
        ring.finish();
        total += pull_to_end(&mut decoder, &mut out);

        assert_eq!(total, expected);
        assert_eq!(decoder.stats().unwrap().snapshot().0, 200);
    }

    #[test]
    fn consumed_position_trails_decoded_packets() {
        let frames = mp3_frames(mpeg1_header(0), 40);
        let ring = Arc::new(RingCacheBuffer::new(64 * 1024, 1024 * 1024));
        ring.write(&frames).unwrap();
        let mut decoder = Mp3Decoder::new(RingReader::new(ring.clone()), 1024).unwrap();

        // Let the decode thread run ahead, then play a single frame
        thread::sleep(Duration::from_millis(100));
        let mut out = vec![0.0f32; 1152 * 2];
        let deadline = Instant::now() + Duration::from_secs(2);
        while decoder.read_samples(&mut out).unwrap() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(ring.len() < frames.len());
        // Queued packets and symphonia's read-ahead still count as buffered
        assert!(ring.backlog() > ring.len());
        assert!(ring.backlog() <= frames.len());
    }

    #[test]
    fn dropping_a_starved_decoder_stops_its_thread() {
        let ring = Arc::new(RingCacheBuffer::new(64 * 1024, 1024 * 1024));
        ring.write(&mp3_frames(mpeg1_header(0), 10)).unwrap();
        let decoder = Mp3Decoder::new(RingReader::new(ring.clone()), 8 * 1024).unwrap();
        thread::sleep(Duration::from_millis(50));

        let start = Instant::now();
        drop(decoder);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn vorbis_probe_reads_ident() {
        let mut reader = reader_with(&vorbis_ident_page(2, 48000));
        let ident = VorbisDecoder::probe(&mut reader).unwrap();
        assert_eq!(ident.sample_rate, 48000);
        assert_eq!(ident.channels, 2);
        assert_eq!(reader.buffer().position(), 0);
    }

    #[test]
    fn vorbis_requires_ident_header() {
        let result = VorbisDecoder::new(reader_with(&[0u8; 2048]), MIN_DECODE_BYTES);
        assert!(matches!(result, Err(RadioError::DecodeError(_))));
    }

    #[test]
    fn vorbis_without_setup_headers_fails() {
        let reader = reader_with(&vorbis_ident_page(2, 44100));
        reader.buffer().finish();
        let result = VorbisDecoder::new(reader, MIN_DECODE_BYTES);
        assert!(result.is_err());
    }

    #[test]
    fn factory_rejects_unknown_codec() {
        let factory = SymphoniaDecoderFactory::default();
        let result = factory.create(AudioCodec::None, reader_with(&[0u8; 16]));
        assert!(matches!(result, Err(RadioError::UnsupportedCodec(_))));
    }

    #[test]
    fn factory_dispatches_on_codec() {
        let factory = SymphoniaDecoderFactory::default();
        let result = factory.create(AudioCodec::Mp3, reader_with(&[0x42; 512]));
        assert!(matches!(result, Err(RadioError::DecodeError(_))));
    }
}
