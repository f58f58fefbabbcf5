//! Playback session
//!
//! `PlaybackSession` coordinates one station at a time: it validates the
//! station, starts the ingest worker, waits for the pre-buffer, builds the
//! decoder and hands PCM to the host audio thread through `AudioOutput`.
//!
//! Architecture:
//!   play() → IngestWorker ("radio-ingest") → RingCacheBuffer
//!   tick() (host loop): faults, pre-buffer, underrun, restarts
//!   AudioOutput::pull_samples (host audio thread) → Decoder → PCM
//!   PlayTimer ("radio-timer"): play time + record transitions
//!
//! Lock order when more than one lock is taken: record tracker, then
//! station, then context. The tracker lock is released before the others
//! are taken.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::config::network::JOIN_TIMEOUT_MS;
use crate::config::playback::{MAX_PLAY_TIME_RESERVE_SECS, RECORD_DELAY_EPSILON};
use crate::config::PlayerConfig;
use crate::error::{RadioError, Result};
use crate::station::{new_shared_context, AudioCodec, SharedContext, SharedStation};
use crate::stream::buffer::{RingCacheBuffer, RingReader};
use crate::stream::connector::{Connector, HttpConnector};
use crate::stream::ingest::{IngestParams, IngestState, IngestWorker, RecordListener};
use crate::stream::metadata::RecordInfo;

use super::decoder::{Decoder, DecoderFactory, SymphoniaDecoderFactory};
use super::health::UnderrunMonitor;
use super::records::{append_unique, stamp_duration, RecordTracker, RecordTransition};
use super::stats::{DecoderStats, EventBus, PlayerEvent};
use super::types::{CodecInfo, PlaybackState};

/// Bounded store of the most recent PCM handed to the output
struct CaptureBuffer {
    samples: VecDeque<f32>,
    capacity: usize,
}

impl CaptureBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, data: &[f32]) {
        let data = &data[data.len().saturating_sub(self.capacity)..];
        let overflow = (self.samples.len() + data.len()).saturating_sub(self.capacity);
        self.samples.drain(..overflow);
        self.samples.extend(data.iter().copied());
    }
}

/// State shared with the ingest thread, the timer thread and the audio thread
struct SessionShared {
    station: Mutex<Option<SharedStation>>,
    context: SharedContext,
    decoder: Mutex<Option<Box<dyn Decoder>>>,
    buffering: AtomicBool,
    audio_playing: AtomicBool,
    records: Mutex<RecordTracker>,
    /// Seconds played in this session
    play_time: Mutex<f64>,
    samples_delivered: AtomicU64,
    capture: Option<Mutex<CaptureBuffer>>,
    faults: Sender<RadioError>,
    events: EventBus,
}

impl SessionShared {
    fn new(context: SharedContext, faults: Sender<RadioError>, capture: Option<usize>) -> Self {
        Self {
            station: Mutex::new(None),
            context,
            decoder: Mutex::new(None),
            buffering: AtomicBool::new(false),
            audio_playing: AtomicBool::new(false),
            records: Mutex::new(RecordTracker::new()),
            play_time: Mutex::new(0.0),
            samples_delivered: AtomicU64::new(0),
            capture: capture.map(|n| Mutex::new(CaptureBuffer::new(n))),
            faults,
            events: EventBus::new(),
        }
    }

    fn station(&self) -> Option<SharedStation> {
        self.station.lock().ok().and_then(|s| s.clone())
    }

    fn station_name(&self) -> String {
        self.station()
            .and_then(|s| s.lock().ok().map(|st| st.name.clone()))
            .unwrap_or_default()
    }

    /// Emit an event tagged with the current station name.
    fn emit(&self, make: impl FnOnce(String) -> PlayerEvent) {
        self.events.emit(make(self.station_name()));
    }

    fn play_time(&self) -> f64 {
        self.play_time.lock().map(|t| *t).unwrap_or(0.0)
    }

    fn tracker(&self) -> RecordTracker {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Clear per-session counters before a new session starts.
    fn reset(&self) {
        if let Ok(mut records) = self.records.lock() {
            records.reset();
        }
        if let Ok(mut t) = self.play_time.lock() {
            *t = 0.0;
        }
        if let Some(capture) = &self.capture {
            if let Ok(mut c) = capture.lock() {
                c.samples.clear();
            }
        }
        self.samples_delivered.store(0, Ordering::Relaxed);
        self.audio_playing.store(false, Ordering::SeqCst);
        self.buffering.store(true, Ordering::SeqCst);
    }

    /// Account `dt` seconds of played audio everywhere and switch records when due.
    fn advance(&self, dt: f64) {
        let transition = match self.records.lock() {
            Ok(mut records) => {
                records.advance(dt);
                records.take_transition()
            }
            Err(_) => None,
        };

        if let Ok(mut t) = self.play_time.lock() {
            *t += dt;
        }
        if let Some(station) = self.station() {
            if let Ok(mut st) = station.lock() {
                st.total_play_time += dt;
            }
        }
        if let Ok(mut ctx) = self.context.lock() {
            ctx.total_play_time += dt;
        }

        if let Some(transition) = transition {
            self.apply_transition(transition);
        }
    }

    /// Record histories and events for a record switch.
    fn apply_transition(&self, transition: RecordTransition) {
        let RecordTransition { finished, started } = transition;
        tracing::info!(record = %started.info, "record changed");

        if let Some(station) = self.station() {
            if let Ok(mut st) = station.lock() {
                if let Some(done) = &finished {
                    stamp_duration(&mut st.played_records, done);
                }
                append_unique(&mut st.played_records, &started);
            }
        }
        if let Ok(mut ctx) = self.context.lock() {
            if let Some(done) = &finished {
                stamp_duration(&mut ctx.all_played_records, done);
            }
            append_unique(&mut ctx.all_played_records, &started);
        }

        self.emit(|station| PlayerEvent::RecordChanged {
            station,
            record: started,
        });
    }

    /// Stamp the current record's play time into the histories at session end.
    fn finalize_record(&self) {
        let Some(done) = self.records.lock().ok().and_then(|r| r.finalize_current()) else {
            return;
        };
        if let Some(station) = self.station() {
            if let Ok(mut st) = station.lock() {
                stamp_duration(&mut st.played_records, &done);
            }
        }
        if let Ok(mut ctx) = self.context.lock() {
            stamp_duration(&mut ctx.all_played_records, &done);
        }
    }
}

impl RecordListener for SessionShared {
    fn on_record(&self, record: RecordInfo, delay: f64) {
        let (changed, transition) = match self.records.lock() {
            Ok(mut records) => {
                let changed = records.announce(record.clone(), delay);
                let transition = if changed && delay < RECORD_DELAY_EPSILON {
                    records.take_transition()
                } else {
                    None
                };
                (changed, transition)
            }
            Err(_) => return,
        };

        if changed {
            tracing::debug!(record = %record.info, delay, "next record announced");
            self.emit(|station| PlayerEvent::NextRecordChanged { station, record });
            self.emit(|station| PlayerEvent::NextRecordDelayUpdated { station, delay });
        }
        if let Some(transition) = transition {
            self.apply_transition(transition);
        }
    }
}

/// Handle the host audio thread pulls PCM from. Never blocks.
#[derive(Clone)]
pub struct AudioOutput {
    shared: Arc<SessionShared>,
}

impl AudioOutput {
    /// Fill `out` with interleaved PCM; silence where none is available.
    ///
    /// Returns the number of decoded samples written (the rest is zeros).
    pub fn pull_samples(&self, out: &mut [f32]) -> usize {
        out.fill(0.0);
        if !self.shared.audio_playing.load(Ordering::SeqCst)
            || self.shared.buffering.load(Ordering::SeqCst)
        {
            return 0;
        }

        // The session holds this lock only while installing or dropping the decoder.
        let Ok(mut guard) = self.shared.decoder.try_lock() else {
            return 0;
        };
        let Some(decoder) = guard.as_mut() else {
            return 0;
        };

        match decoder.read_samples(out) {
            Ok(n) => {
                if n > 0 {
                    self.shared
                        .samples_delivered
                        .fetch_add(n as u64, Ordering::Relaxed);
                    if let Some(capture) = &self.shared.capture {
                        if let Ok(mut c) = capture.try_lock() {
                            c.push(&out[..n]);
                        }
                    }
                }
                n
            }
            Err(e) => {
                // Drop the decoder so the remaining pulls stay silent until tick() tears down.
                guard.take();
                out.fill(0.0);
                let _ = self.shared.faults.send(e);
                0
            }
        }
    }

    /// Output format of the running decoder, if any
    pub fn format(&self) -> Option<(u32, u16)> {
        let guard = self.shared.decoder.try_lock().ok()?;
        guard.as_ref().map(|d| (d.sample_rate(), d.channels()))
    }
}

/// Play-time timer thread
struct PlayTimer {
    handle: Option<JoinHandle<()>>,
    stop_flag: Arc<AtomicBool>,
}

impl PlayTimer {
    fn spawn(shared: Arc<SessionShared>, interval: Duration) -> Result<Self> {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let flag = stop_flag.clone();
        let handle = thread::Builder::new()
            .name("radio-timer".to_string())
            .spawn(move || {
                let mut last = Instant::now();
                while !flag.load(Ordering::SeqCst) {
                    thread::sleep(interval);
                    let now = Instant::now();
                    let dt = now.duration_since(last).as_secs_f64();
                    last = now;
                    if flag.load(Ordering::SeqCst) {
                        break;
                    }
                    if !shared.buffering.load(Ordering::SeqCst) {
                        shared.advance(dt);
                    }
                }
            })?;
        Ok(Self {
            handle: Some(handle),
            stop_flag,
        })
    }

    fn join(mut self, timeout: Duration) -> bool {
        self.stop_flag.store(true, Ordering::SeqCst);
        let Some(handle) = self.handle.take() else {
            return true;
        };
        let start = Instant::now();
        while !handle.is_finished() {
            if start.elapsed() >= timeout {
                tracing::warn!("timer thread did not exit within {:?}, detaching", timeout);
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        handle.join().is_ok()
    }
}

impl Drop for PlayTimer {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }
}

/// Coordinates ingest, pre-buffering, decoding and play-time accounting
/// for one station at a time.
pub struct PlaybackSession {
    config: PlayerConfig,
    connector: Arc<dyn Connector>,
    decoders: Arc<dyn DecoderFactory>,
    shared: Arc<SessionShared>,
    faults: Receiver<RadioError>,
    state: PlaybackState,
    worker: Option<IngestWorker>,
    timer: Option<PlayTimer>,
    ring: Option<Arc<RingCacheBuffer>>,
    monitor: UnderrunMonitor,
    codec_info: Option<CodecInfo>,
    decoder_stats: Option<Arc<DecoderStats>>,
    last_error: Option<String>,
    last_play_call: Option<Instant>,
    buffering_since: Instant,
    buffer_progress: f32,
    max_play_time: f64,
    pending_restart: Option<(Instant, SharedStation)>,
    last_play_second: u64,
    last_delay_second: Option<u64>,
}

impl PlaybackSession {
    pub fn new(
        mut config: PlayerConfig,
        connector: Arc<dyn Connector>,
        decoders: Arc<dyn DecoderFactory>,
        context: SharedContext,
    ) -> Self {
        config.sanitize();
        let (fault_tx, faults) = unbounded();
        let capture = config
            .capture_data_stream
            .then(|| config.data_stream_size_kb * 1024 / std::mem::size_of::<f32>());
        let monitor = UnderrunMonitor::with_timeouts(config.no_audio_timeout(), config.underrun_timeout());

        Self {
            shared: Arc::new(SessionShared::new(context, fault_tx, capture)),
            config,
            connector,
            decoders,
            faults,
            state: PlaybackState::Idle,
            worker: None,
            timer: None,
            ring: None,
            monitor,
            codec_info: None,
            decoder_stats: None,
            last_error: None,
            last_play_call: None,
            buffering_since: Instant::now(),
            buffer_progress: 0.0,
            max_play_time: f64::MAX,
            pending_restart: None,
            last_play_second: 0,
            last_delay_second: None,
        }
    }

    /// Session with the reqwest connector and symphonia decoders.
    pub fn with_defaults(mut config: PlayerConfig) -> Result<Self> {
        config.sanitize();
        let connector = Arc::new(HttpConnector::new(&config)?);
        let decoders = Arc::new(SymphoniaDecoderFactory::new(config.min_decode_bytes));
        Ok(Self::new(config, connector, decoders, new_shared_context()))
    }

    /// Start playing `station`.
    ///
    /// Calls closer together than the configured play-call interval are ignored.
    pub fn play(&mut self, station: SharedStation) -> Result<()> {
        if !self.state.can_start() {
            return Err(RadioError::AlreadyPlaying);
        }
        let now = Instant::now();
        if let Some(last) = self.last_play_call {
            if now.duration_since(last) < self.config.play_call_interval() {
                tracing::debug!("play call ignored, too soon after the previous one");
                return Ok(());
            }
        }
        self.last_play_call = Some(now);
        self.pending_restart = None;
        self.begin(station)
    }

    fn begin(&mut self, station: SharedStation) -> Result<()> {
        if !self.state.can_start() {
            return Err(RadioError::AlreadyPlaying);
        }
        if let Ok(mut slot) = self.shared.station.lock() {
            *slot = Some(station.clone());
        }
        self.last_error = None;

        if let Err(e) = self.start(station) {
            self.report(&e);
            self.state = PlaybackState::Error;
            return Err(e);
        }
        Ok(())
    }

    fn start(&mut self, station: SharedStation) -> Result<()> {
        let (name, url, format, codec, excluded) = {
            let mut st = station
                .lock()
                .map_err(|_| RadioError::InvalidStation("station lock poisoned".to_string()))?;
            if !st.is_sane() {
                return Err(RadioError::InvalidStation(format!(
                    "{} has no playable URL ({})",
                    st.name, st.url
                )));
            }
            st.sanitize();
            (
                st.name.clone(),
                st.url.clone(),
                st.format,
                st.codec(),
                st.excluded_codec,
            )
        };

        if self.config.check_connectivity && !self.connector.is_online(&url) {
            return Err(RadioError::NoInternet);
        }
        if codec == AudioCodec::None {
            return Err(RadioError::UnsupportedCodec(format.to_string()));
        }
        if excluded != AudioCodec::None && excluded == codec {
            return Err(RadioError::ExcludedCodecConflict(codec));
        }

        while self.faults.try_recv().is_ok() {}
        self.shared.reset();

        let ring = Arc::new(RingCacheBuffer::new(
            self.config.cache_stream_size(),
            self.config.max_cache_stream_size(),
        ));
        let listener: Arc<dyn RecordListener> = self.shared.clone();
        let worker = IngestWorker::spawn(IngestParams {
            connector: self.connector.clone(),
            station,
            context: self.shared.context.clone(),
            ring: ring.clone(),
            listener,
            faults: self.shared.faults.clone(),
            legacy_mode: self.config.legacy_mode,
        })?;

        self.ring = Some(ring);
        self.worker = Some(worker);
        self.codec_info = None;
        self.decoder_stats = None;
        self.buffer_progress = 0.0;
        self.buffering_since = Instant::now();
        self.max_play_time = f64::MAX;
        self.last_play_second = 0;
        self.last_delay_second = None;
        self.state = PlaybackState::Connecting;

        tracing::info!(station = %name, url = %url, codec = %codec, "playback started");
        self.shared.emit(|station| PlayerEvent::PlaybackStarted { station });
        self.shared.emit(|station| PlayerEvent::BufferingStarted { station });
        self.shared.emit(|station| PlayerEvent::BufferingProgress {
            station,
            progress: 0.0,
        });
        Ok(())
    }

    /// Drive the session; call from the host loop (every ~50-100 ms).
    pub fn tick(&mut self) {
        if let Ok(fault) = self.faults.try_recv() {
            while self.faults.try_recv().is_ok() {}
            if self.state.is_active() {
                self.fail(fault);
            }
        }

        if let Some((at, _)) = &self.pending_restart {
            if Instant::now() >= *at {
                if let Some((_, station)) = self.pending_restart.take() {
                    tracing::info!("restarting playback");
                    // Failures are already reported as events.
                    let _ = self.begin(station);
                }
            }
        }

        match self.state {
            PlaybackState::Connecting => {
                let connected = self
                    .worker
                    .as_ref()
                    .is_some_and(|w| w.state() != IngestState::Connecting);
                if connected {
                    self.state = PlaybackState::PreBuffering;
                    self.buffering_since = Instant::now();
                    self.update_prebuffer();
                }
            }
            PlaybackState::PreBuffering => self.update_prebuffer(),
            PlaybackState::Playing => self.update_playing(),
            _ => {}
        }
    }

    fn update_prebuffer(&mut self) {
        let Some(ring) = self.ring.clone() else {
            return;
        };
        let threshold = self
            .shared
            .station()
            .and_then(|s| s.lock().ok().map(|st| st.prebuffer_threshold()))
            .unwrap_or(1)
            .max(1);

        let len = ring.len();
        let progress = (len as f32 / threshold as f32).min(1.0);
        if (progress - self.buffer_progress).abs() >= 0.01 {
            self.buffer_progress = progress;
            self.shared
                .emit(|station| PlayerEvent::BufferingProgress { station, progress });
        }

        if ring.is_finished() && ring.is_empty() {
            tracing::info!("stream ended before any audio arrived");
            self.stop();
            return;
        }

        let ready = ring.is_finished()
            || if self.config.skip_pre_buffering {
                self.buffering_since.elapsed() >= self.config.skip_pre_buffering_delay()
            } else {
                len >= threshold
            };
        if ready {
            if let Err(e) = self.start_audio(&ring) {
                self.fail(e);
            }
        }
    }

    fn start_audio(&mut self, ring: &Arc<RingCacheBuffer>) -> Result<()> {
        let Some(station) = self.shared.station() else {
            return Err(RadioError::InvalidStation("no station".to_string()));
        };
        let codec = station
            .lock()
            .map(|st| st.codec())
            .unwrap_or(AudioCodec::None);

        ring.set_probe_hold(true);
        let created = self.decoders.create(codec, RingReader::new(ring.clone()));
        ring.set_probe_hold(false);
        let decoder = created?;

        let sample_rate = decoder.sample_rate();
        let channels = decoder.channels();
        if sample_rate == 0 {
            return Err(RadioError::InvalidSampleRate(0));
        }
        if let Ok(mut st) = station.lock() {
            st.sample_rate = sample_rate;
            st.channels = channels;
        }
        self.max_play_time = i32::MAX as f64 / sample_rate as f64 - MAX_PLAY_TIME_RESERVE_SECS;
        self.codec_info = Some(decoder.info());
        self.decoder_stats = decoder.stats();
        tracing::info!(
            codec = %codec,
            sample_rate,
            channels,
            buffered = ring.len(),
            "audio started"
        );

        if let Ok(mut slot) = self.shared.decoder.lock() {
            *slot = Some(decoder);
        }
        self.monitor =
            UnderrunMonitor::with_timeouts(self.config.no_audio_timeout(), self.config.underrun_timeout());
        self.timer = Some(PlayTimer::spawn(
            self.shared.clone(),
            self.config.timer_interval(),
        )?);
        self.shared.buffering.store(false, Ordering::SeqCst);
        self.shared.audio_playing.store(true, Ordering::SeqCst);
        self.state = PlaybackState::Playing;

        self.buffer_progress = 1.0;
        self.shared.emit(|station| PlayerEvent::BufferingProgress {
            station,
            progress: 1.0,
        });
        self.shared
            .emit(|station| PlayerEvent::BufferingEnded { station });
        self.shared.emit(|station| PlayerEvent::AudioStarted { station });
        Ok(())
    }

    fn update_playing(&mut self) {
        let play_time = self.shared.play_time();
        let tracker = self.shared.tracker();

        let second = play_time as u64;
        if second != self.last_play_second {
            self.last_play_second = second;
            self.shared.emit(|station| PlayerEvent::AudioPlayTime {
                station,
                seconds: play_time,
            });
            let record_time = tracker.record_play_time();
            self.shared.emit(|station| PlayerEvent::RecordPlayTime {
                station,
                seconds: record_time,
            });
        }

        if !tracker.next().is_empty() && tracker.next() != tracker.current() {
            let delay = tracker.next_delay();
            let delay_second = delay.ceil() as u64;
            if self.last_delay_second != Some(delay_second) {
                self.last_delay_second = Some(delay_second);
                self.shared
                    .emit(|station| PlayerEvent::NextRecordDelayUpdated { station, delay });
            }
        } else {
            self.last_delay_second = None;
        }

        let drained = self.ring.as_ref().is_some_and(|r| r.is_drained());
        let samples = self.shared.samples_delivered.load(Ordering::Relaxed);
        if let Some(reason) = self.monitor.update(samples) {
            if drained {
                tracing::info!("stream ended");
                self.stop();
            } else {
                self.fail(RadioError::BufferUnderrun(reason.to_string()));
            }
            return;
        }
        let ended = drained
            && self
                .monitor
                .starved_for()
                .is_some_and(|d| d >= self.config.timer_interval() * 2);
        if ended {
            tracing::info!(play_time, "stream ended");
            self.stop();
            return;
        }

        if play_time >= self.max_play_time {
            tracing::info!(play_time, "maximum play time reached");
            self.restart(self.config.restart_delay());
        }
    }

    /// End the session; emits the ended events. No-op when nothing runs.
    pub fn stop(&mut self) {
        if !self.state.is_active() {
            return;
        }
        self.shutdown();
        self.state = PlaybackState::Stopped;
    }

    /// Stop, then play the same station again after `delay` (fired from `tick`).
    pub fn restart(&mut self, delay: Duration) {
        let Some(station) = self.shared.station() else {
            return;
        };
        self.stop();
        self.pending_restart = Some((Instant::now() + delay, station));
    }

    fn shutdown(&mut self) {
        let join_timeout = Duration::from_millis(JOIN_TIMEOUT_MS);
        if let Some(worker) = self.worker.take() {
            worker.join(join_timeout);
        }
        if let Some(timer) = self.timer.take() {
            timer.join(join_timeout);
        }

        let audio_started = self.shared.audio_playing.swap(false, Ordering::SeqCst);
        self.shared.buffering.store(false, Ordering::SeqCst);
        if let Ok(mut slot) = self.shared.decoder.lock() {
            slot.take();
        }
        if let Some(ring) = self.ring.take() {
            ring.clear();
        }
        self.shared.finalize_record();

        if let Some(stats) = &self.decoder_stats {
            let (frames, errors, underruns) = stats.snapshot();
            tracing::debug!(frames, errors, underruns, "decoder stats");
        }
        tracing::info!(play_time = self.shared.play_time(), "playback ended");
        self.shared.reset();
        self.shared.buffering.store(false, Ordering::SeqCst);
        if audio_started {
            self.shared.emit(|station| PlayerEvent::AudioEnded { station });
        }
        self.shared
            .emit(|station| PlayerEvent::PlaybackEnded { station });
    }

    fn report(&mut self, error: &RadioError) {
        let message = error.to_string();
        tracing::error!(station = %self.shared.station_name(), error = %message, "playback error");
        self.last_error = Some(message.clone());
        self.shared
            .emit(|station| PlayerEvent::Error { station, message });
    }

    fn fail(&mut self, error: RadioError) {
        self.report(&error);
        self.shutdown();
        self.state = PlaybackState::Error;
    }

    /// A restart is scheduled and fires on a later `tick`
    pub fn restart_pending(&self) -> bool {
        self.pending_restart.is_some()
    }

    /// Pull PCM on the session's own thread; see `AudioOutput::pull_samples`.
    pub fn pull_samples(&self, out: &mut [f32]) -> usize {
        self.audio_output().pull_samples(out)
    }

    pub fn audio_output(&self) -> AudioOutput {
        AudioOutput {
            shared: self.shared.clone(),
        }
    }

    /// Subscribe to player events
    pub fn events(&self) -> Receiver<PlayerEvent> {
        self.shared.events.subscribe()
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_buffering(&self) -> bool {
        matches!(
            self.state,
            PlaybackState::Connecting | PlaybackState::PreBuffering
        )
    }

    /// A session is running
    pub fn is_playback(&self) -> bool {
        self.state.is_active()
    }

    pub fn is_audio_playing(&self) -> bool {
        self.shared.audio_playing.load(Ordering::SeqCst)
    }

    /// Pre-buffer fill level in `0.0..=1.0`
    pub fn buffer_progress(&self) -> f32 {
        self.buffer_progress
    }

    /// Seconds played in the current session
    pub fn play_time(&self) -> f64 {
        self.shared.play_time()
    }

    pub fn record_play_time(&self) -> f64 {
        self.shared.tracker().record_play_time()
    }

    pub fn record_info(&self) -> RecordInfo {
        self.shared.tracker().current().clone()
    }

    pub fn next_record_info(&self) -> RecordInfo {
        self.shared.tracker().next().clone()
    }

    pub fn next_record_delay(&self) -> f64 {
        self.shared.tracker().next_delay()
    }

    /// Unread bytes in the cache buffer
    pub fn current_buffer_size(&self) -> usize {
        self.ring.as_ref().map_or(0, |r| r.len())
    }

    /// Download speed in bytes per second
    pub fn current_download_speed(&self) -> f64 {
        self.worker
            .as_ref()
            .map_or(0.0, |w| w.status().throughput.bytes_per_sec())
    }

    pub fn codec(&self) -> Option<CodecInfo> {
        self.codec_info.clone()
    }

    /// Counters of the current (or last) decoder
    pub fn decoder_stats(&self) -> Option<Arc<DecoderStats>> {
        self.decoder_stats.clone()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Most recent PCM handed to the output, when capture is enabled
    pub fn data_stream(&self) -> Vec<f32> {
        self.shared
            .capture
            .as_ref()
            .and_then(|c| c.lock().ok().map(|c| c.samples.iter().copied().collect()))
            .unwrap_or_default()
    }

    pub fn station(&self) -> Option<SharedStation> {
        self.shared.station()
    }

    pub fn context(&self) -> SharedContext {
        self.shared.context.clone()
    }
}
