//! Stream ingest worker
//!
//! A dedicated thread per playback attempt: connects, applies the ICY
//! response headers to the station, then reads `chunk_size` blocks from the
//! body, demuxes them and appends the audio to the cache buffer.
//!
//! States: `Connecting → Streaming → {Stopped | Error}`. The worker never
//! retries; failures go to the fault channel and the caller decides.

use std::fmt;
use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;

use crate::error::{RadioError, Result};
use crate::station::{nearest_bitrate, SharedContext, SharedStation};
use crate::stream::buffer::RingCacheBuffer;
use crate::stream::connector::{ConnectRequest, Connection, Connector};
use crate::stream::icy::{DemuxSink, IcyDemuxer};
use crate::stream::metadata::RecordInfo;

/// EMA smoothing factor for throughput (0.0–1.0)
const EMA_ALPHA_THROUGHPUT: f64 = 0.3;
/// Minimum interval between throughput samples (milliseconds)
const MIN_THROUGHPUT_INTERVAL_MS: f64 = 250.0;

/// Ingest worker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IngestState {
    #[default]
    Connecting,
    Streaming,
    Stopped,
    Error,
}

impl fmt::Display for IngestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestState::Connecting => write!(f, "Connecting"),
            IngestState::Streaming => write!(f, "Streaming"),
            IngestState::Stopped => write!(f, "Stopped"),
            IngestState::Error => write!(f, "Error"),
        }
    }
}

/// Receives record announcements from the ingest thread
pub trait RecordListener: Send + Sync {
    fn on_record(&self, record: RecordInfo, delay: f64);
}

/// Network throughput (EMA-smoothed)
#[derive(Debug, Clone)]
pub struct ThroughputMeter {
    throughput_ema: f64,
    last_sample: Instant,
    /// Bytes accumulated since last EMA update (filters burst reads)
    pending_bytes: usize,
}

impl Default for ThroughputMeter {
    fn default() -> Self {
        Self {
            throughput_ema: 0.0,
            last_sample: Instant::now(),
            pending_bytes: 0,
        }
    }
}

impl ThroughputMeter {
    /// Record a successful chunk read.
    pub fn record(&mut self, bytes: usize) {
        self.pending_bytes += bytes;
        let now = Instant::now();
        let elapsed_ms = now.duration_since(self.last_sample).as_secs_f64() * 1000.0;

        if elapsed_ms >= MIN_THROUGHPUT_INTERVAL_MS {
            let throughput = (self.pending_bytes as f64 / elapsed_ms) * 1000.0; // bytes/sec
            if self.throughput_ema == 0.0 {
                self.throughput_ema = throughput;
            } else {
                self.throughput_ema = EMA_ALPHA_THROUGHPUT * throughput
                    + (1.0 - EMA_ALPHA_THROUGHPUT) * self.throughput_ema;
            }
            self.pending_bytes = 0;
            self.last_sample = now;
        }
    }

    /// Smoothed download speed in bytes per second
    pub fn bytes_per_sec(&self) -> f64 {
        self.throughput_ema
    }
}

/// Snapshot of the worker, shared with the coordinator
#[derive(Debug, Clone, Default)]
pub struct IngestStatus {
    pub state: IngestState,
    pub bytes_received: u64,
    pub throughput: ThroughputMeter,
    pub error: Option<String>,
}

/// Thread-safe handle to the ingest status
pub type SharedIngestStatus = Arc<Mutex<IngestStatus>>;

/// Inputs of one ingest run
pub struct IngestParams {
    pub connector: Arc<dyn Connector>,
    pub station: SharedStation,
    pub context: SharedContext,
    pub ring: Arc<RingCacheBuffer>,
    pub listener: Arc<dyn RecordListener>,
    pub faults: Sender<RadioError>,
    /// Skip ICY metadata entirely and copy the body through
    pub legacy_mode: bool,
}

/// Handle to a running ingest thread
pub struct IngestWorker {
    handle: Option<JoinHandle<()>>,
    stop_flag: Arc<AtomicBool>,
    status: SharedIngestStatus,
}

impl IngestWorker {
    /// Start the worker thread.
    pub fn spawn(params: IngestParams) -> Result<Self> {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let status: SharedIngestStatus = Arc::new(Mutex::new(IngestStatus::default()));

        let thread_stop = stop_flag.clone();
        let thread_status = status.clone();
        let handle = thread::Builder::new()
            .name("radio-ingest".to_string())
            .spawn(move || run(params, thread_stop, thread_status))?;

        Ok(Self {
            handle: Some(handle),
            stop_flag,
            status,
        })
    }

    pub fn state(&self) -> IngestState {
        self.status().state
    }

    pub fn status(&self) -> IngestStatus {
        match self.status.lock() {
            Ok(s) => s.clone(),
            Err(e) => e.into_inner().clone(),
        }
    }

    /// Request cooperative cancellation.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    /// Stop and wait up to `timeout` for the thread to exit.
    ///
    /// Returns false if the thread is still blocked (e.g. in a socket read);
    /// it is then detached and exits on its next stop-flag check.
    pub fn join(mut self, timeout: Duration) -> bool {
        self.stop();
        let Some(handle) = self.handle.take() else {
            return true;
        };
        let start = Instant::now();
        while !handle.is_finished() {
            if start.elapsed() >= timeout {
                tracing::warn!("ingest thread did not exit within {:?}, detaching", timeout);
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
        handle.join().is_ok()
    }
}

impl Drop for IngestWorker {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }
}

/// Writes demuxed audio into the cache buffer and forwards records.
struct RingSink<'a> {
    ring: &'a RingCacheBuffer,
    listener: &'a dyn RecordListener,
}

impl DemuxSink for RingSink<'_> {
    fn write_audio(&mut self, bytes: &[u8]) -> Result<()> {
        self.ring.write(bytes)
    }

    fn buffered_bytes(&self) -> usize {
        self.ring.backlog()
    }

    fn on_record(&mut self, record: RecordInfo, delay: f64) {
        self.listener.on_record(record, delay);
    }
}

fn set_state(status: &SharedIngestStatus, state: IngestState) {
    if let Ok(mut s) = status.lock() {
        s.state = state;
    }
}

fn run(params: IngestParams, stop_flag: Arc<AtomicBool>, status: SharedIngestStatus) {
    let (request, chunk_size) = match params.station.lock() {
        Ok(station) => (
            ConnectRequest::for_station(&station, params.legacy_mode),
            station.chunk_size_bytes().max(1),
        ),
        Err(_) => return,
    };

    tracing::debug!(url = %request.url, legacy = params.legacy_mode, "ingest connecting");
    let connection = match params.connector.connect(&request) {
        Ok(connection) => connection,
        Err(e) => {
            if stop_flag.load(Ordering::SeqCst) {
                set_state(&status, IngestState::Stopped);
            } else {
                fail(&params, &status, e);
            }
            return;
        }
    };

    if stop_flag.load(Ordering::SeqCst) {
        set_state(&status, IngestState::Stopped);
        return;
    }

    let bitrate = apply_connection(&params, &connection);
    let metaint = if params.legacy_mode {
        None
    } else {
        connection.headers.metaint
    };
    set_state(&status, IngestState::Streaming);

    let mut demuxer = IcyDemuxer::new(metaint, bitrate);
    let mut sink = RingSink {
        ring: params.ring.as_ref(),
        listener: params.listener.as_ref(),
    };
    let mut body = connection.body;
    let mut chunk = vec![0u8; chunk_size];

    loop {
        if stop_flag.load(Ordering::SeqCst) {
            set_state(&status, IngestState::Stopped);
            break;
        }

        match body.read(&mut chunk) {
            Ok(0) => {
                tracing::info!(bytes = demuxer.audio_bytes(), "stream ended");
                params.ring.finish();
                set_state(&status, IngestState::Stopped);
                break;
            }
            Ok(n) => {
                count_bytes(&params, &status, n);
                if let Err(e) = demuxer.feed(&chunk[..n], &mut sink) {
                    fail(&params, &status, e);
                    break;
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                if stop_flag.load(Ordering::SeqCst) {
                    set_state(&status, IngestState::Stopped);
                } else {
                    fail(&params, &status, RadioError::Io(e));
                }
                break;
            }
        }
    }
}

/// Update the station from the response; returns the bitrate to use for delays.
fn apply_connection(params: &IngestParams, connection: &Connection) -> u32 {
    let headers = &connection.headers;
    let bitrate = match params.station.lock() {
        Ok(mut station) => {
            if let Some(notice) = &headers.notice {
                station.server_info = notice.clone();
            }
            if !connection.final_url.is_empty() {
                station.url = connection.final_url.clone();
            }
            if station.update_data_at_play {
                if let Some(name) = headers.name.as_deref().filter(|n| *n != "-") {
                    station.name = name.to_string();
                }
                if let Some(genre) = &headers.genre {
                    station.genres = genre.replace(',', " ");
                }
                if let Some(br) = headers.bitrate.filter(|&b| b > 0) {
                    station.bitrate = nearest_bitrate(br, station.format);
                }
            }
            station.total_data_requests += 1;
            station.bitrate
        }
        Err(_) => headers.bitrate.unwrap_or(0),
    };
    if let Ok(mut context) = params.context.lock() {
        context.total_data_requests += 1;
    }
    bitrate
}

fn count_bytes(params: &IngestParams, status: &SharedIngestStatus, n: usize) {
    if let Ok(mut station) = params.station.lock() {
        station.total_data_size += n as u64;
    }
    if let Ok(mut context) = params.context.lock() {
        context.total_data_size += n as u64;
    }
    if let Ok(mut s) = status.lock() {
        s.bytes_received += n as u64;
        s.throughput.record(n);
    }
}

fn fail(params: &IngestParams, status: &SharedIngestStatus, error: RadioError) {
    tracing::error!(error = %error, "ingest failed");
    params.ring.finish();
    if let Ok(mut s) = status.lock() {
        s.state = IngestState::Error;
        s.error = Some(error.to_string());
    }
    let _ = params.faults.send(error);
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::station::{new_shared_context, AudioFormat, RadioStation};
    use crate::stream::icy::tests::icy_stream;
    use crate::stream::icy::{buffered_delay, IcyHeaders};
    use crossbeam_channel::unbounded;
    use std::io::{self, Cursor};

    /// Connector serving a fixed body from memory
    pub(crate) struct MemoryConnector {
        pub headers: IcyHeaders,
        pub body: Vec<u8>,
        pub online: bool,
        pub requests: Mutex<Vec<ConnectRequest>>,
    }

    impl MemoryConnector {
        pub(crate) fn new(headers: IcyHeaders, body: Vec<u8>) -> Self {
            Self {
                headers,
                body,
                online: true,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    impl Connector for MemoryConnector {
        fn connect(&self, request: &ConnectRequest) -> Result<Connection> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(Connection {
                headers: self.headers.clone(),
                final_url: format!("{}?redirected", request.url),
                body: Box::new(Cursor::new(self.body.clone())),
            })
        }

        fn is_online(&self, _url: &str) -> bool {
            self.online
        }
    }

    struct FailingConnector;

    impl Connector for FailingConnector {
        fn connect(&self, request: &ConnectRequest) -> Result<Connection> {
            Err(RadioError::ConnectionFailed(format!("refused: {}", request.url)))
        }

        fn is_online(&self, _url: &str) -> bool {
            true
        }
    }

    /// A body that fails after producing some data
    struct FailAfterReader {
        remaining: usize,
    }

    impl Read for FailAfterReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.remaining == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "simulated network error",
                ));
            }
            let n = buf.len().min(self.remaining);
            buf[..n].fill(7);
            self.remaining -= n;
            Ok(n)
        }
    }

    struct FailAfterConnector;

    impl Connector for FailAfterConnector {
        fn connect(&self, _request: &ConnectRequest) -> Result<Connection> {
            Ok(Connection {
                headers: IcyHeaders::default(),
                final_url: String::new(),
                body: Box::new(FailAfterReader { remaining: 500 }),
            })
        }

        fn is_online(&self, _url: &str) -> bool {
            true
        }
    }

    #[derive(Default)]
    struct Records(Mutex<Vec<(RecordInfo, f64)>>);

    impl RecordListener for Records {
        fn on_record(&self, record: RecordInfo, delay: f64) {
            self.0.lock().unwrap().push((record, delay));
        }
    }

    fn params(
        connector: Arc<dyn Connector>,
        station: RadioStation,
        legacy_mode: bool,
    ) -> (
        IngestParams,
        Arc<Records>,
        crossbeam_channel::Receiver<RadioError>,
    ) {
        let (tx, rx) = unbounded();
        let records = Arc::new(Records::default());
        let params = IngestParams {
            connector,
            station: station.shared(),
            context: new_shared_context(),
            ring: Arc::new(RingCacheBuffer::new(1024, 1024 * 1024)),
            listener: records.clone(),
            faults: tx,
            legacy_mode,
        };
        (params, records, rx)
    }

    fn wait_done(worker: &IngestWorker) {
        let start = Instant::now();
        while matches!(
            worker.state(),
            IngestState::Connecting | IngestState::Streaming
        ) {
            assert!(start.elapsed() < Duration::from_secs(5), "worker hung");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn station() -> RadioStation {
        let mut s = RadioStation::new("Before", "http://radio.example/live", AudioFormat::Mp3);
        s.chunk_size = 1;
        s
    }

    #[test]
    fn streams_audio_and_records() {
        let (body, audio) = icy_stream(2000, &["A - One", "B - Two"]);
        let headers = IcyHeaders {
            metaint: Some(2000),
            ..Default::default()
        };
        let connector = Arc::new(MemoryConnector::new(headers, body.clone()));
        let (params, records, faults) = params(connector.clone(), station(), false);
        let ring = params.ring.clone();
        let station = params.station.clone();
        let context = params.context.clone();

        let worker = IngestWorker::spawn(params).unwrap();
        wait_done(&worker);

        assert_eq!(worker.state(), IngestState::Stopped);
        assert!(ring.is_finished());
        let mut out = vec![0u8; audio.len() + 10];
        assert_eq!(ring.read(&mut out), audio.len());
        assert_eq!(&out[..audio.len()], &audio[..]);

        let records = records.0.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].1, 0.0);
        assert!(records[1].1 > 0.0);

        let s = station.lock().unwrap();
        assert_eq!(s.total_data_size, body.len() as u64);
        assert_eq!(s.total_data_requests, 1);
        assert_eq!(s.url, "http://radio.example/live?redirected");
        let c = context.lock().unwrap();
        assert_eq!(c.total_data_size, body.len() as u64);
        assert_eq!(c.total_data_requests, 1);
        assert_eq!(worker.status().bytes_received, body.len() as u64);
        assert!(faults.try_recv().is_err());

        assert!(connector.requests.lock().unwrap()[0].icy_metadata);
    }

    #[test]
    fn legacy_mode_copies_metadata_bytes() {
        let (body, _) = icy_stream(100, &["A"]);
        let headers = IcyHeaders {
            metaint: Some(100),
            ..Default::default()
        };
        let connector = Arc::new(MemoryConnector::new(headers, body.clone()));
        let (params, records, _faults) = params(connector.clone(), station(), true);
        let ring = params.ring.clone();

        let worker = IngestWorker::spawn(params).unwrap();
        wait_done(&worker);

        assert_eq!(ring.len(), body.len());
        assert!(records.0.lock().unwrap().is_empty());
        assert!(!connector.requests.lock().unwrap()[0].icy_metadata);
    }

    #[test]
    fn headers_update_station_when_enabled() {
        let headers = IcyHeaders {
            name: Some("Renamed FM".to_string()),
            genre: Some("Rock,Pop".to_string()),
            bitrate: Some(190),
            notice: Some("Icecast 2.4".to_string()),
            ..Default::default()
        };
        let connector = Arc::new(MemoryConnector::new(headers, vec![1, 2, 3]));
        let (params, _, _) = params(connector, station(), false);
        let station = params.station.clone();
        let worker = IngestWorker::spawn(params).unwrap();
        wait_done(&worker);

        let s = station.lock().unwrap();
        assert_eq!(s.name, "Renamed FM");
        assert_eq!(s.genres, "Rock Pop");
        assert_eq!(s.bitrate, 192);
        assert_eq!(s.server_info, "Icecast 2.4");
    }

    #[test]
    fn headers_ignored_when_update_disabled() {
        let headers = IcyHeaders {
            name: Some("Renamed FM".to_string()),
            bitrate: Some(64),
            ..Default::default()
        };
        let mut s = station();
        s.update_data_at_play = false;
        let connector = Arc::new(MemoryConnector::new(headers, vec![1]));
        let (params, _, _) = params(connector, s, false);
        let station = params.station.clone();
        let worker = IngestWorker::spawn(params).unwrap();
        wait_done(&worker);

        let s = station.lock().unwrap();
        assert_eq!(s.name, "Before");
        assert_eq!(s.bitrate, 128);
    }

    #[test]
    fn dash_name_is_ignored() {
        let headers = IcyHeaders {
            name: Some("-".to_string()),
            ..Default::default()
        };
        let connector = Arc::new(MemoryConnector::new(headers, vec![1]));
        let (params, _, _) = params(connector, station(), false);
        let station = params.station.clone();
        let worker = IngestWorker::spawn(params).unwrap();
        wait_done(&worker);
        assert_eq!(station.lock().unwrap().name, "Before");
    }

    #[test]
    fn connect_failure_reports_fault() {
        let (params, _, faults) = params(Arc::new(FailingConnector), station(), false);
        let ring = params.ring.clone();
        let worker = IngestWorker::spawn(params).unwrap();
        wait_done(&worker);

        assert_eq!(worker.state(), IngestState::Error);
        assert!(matches!(
            faults.try_recv().unwrap(),
            RadioError::ConnectionFailed(_)
        ));
        assert!(ring.is_finished());
        assert!(worker.status().error.is_some());
    }

    #[test]
    fn read_error_keeps_received_bytes() {
        let (params, _, faults) = params(Arc::new(FailAfterConnector), station(), false);
        let ring = params.ring.clone();
        let worker = IngestWorker::spawn(params).unwrap();
        wait_done(&worker);

        assert_eq!(worker.state(), IngestState::Error);
        assert_eq!(ring.len(), 500);
        match faults.try_recv().unwrap() {
            RadioError::Io(e) => assert!(e.to_string().contains("simulated network error")),
            other => panic!("unexpected fault {other:?}"),
        }
    }

    #[test]
    fn overflow_is_reported() {
        let connector = Arc::new(MemoryConnector::new(IcyHeaders::default(), vec![0; 4096]));
        let (mut params, _, faults) = params(connector, station(), false);
        params.ring = Arc::new(RingCacheBuffer::new(16, 1000));
        let worker = IngestWorker::spawn(params).unwrap();
        wait_done(&worker);

        assert_eq!(worker.state(), IngestState::Error);
        assert!(matches!(
            faults.try_recv().unwrap(),
            RadioError::BufferOverflow { .. }
        ));
    }

    /// Body that never ends, yielding small reads
    struct EndlessReader;

    impl Read for EndlessReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            thread::sleep(Duration::from_millis(1));
            let n = buf.len().min(64);
            buf[..n].fill(1);
            Ok(n)
        }
    }

    struct EndlessConnector;

    impl Connector for EndlessConnector {
        fn connect(&self, _request: &ConnectRequest) -> Result<Connection> {
            Ok(Connection {
                headers: IcyHeaders::default(),
                final_url: String::new(),
                body: Box::new(EndlessReader),
            })
        }

        fn is_online(&self, _url: &str) -> bool {
            true
        }
    }

    #[test]
    fn record_delay_counts_decoder_read_ahead() {
        let ring = RingCacheBuffer::new(64 * 1024, 1024 * 1024);
        ring.write(&[0u8; 16_000]).unwrap();
        let mut taken = [0u8; 8000];
        ring.read(&mut taken);
        // The decoder has played only the first 2000 of the 8000 bytes it took
        ring.set_consumed_position(2000);

        let listener = Records::default();
        let sink = RingSink {
            ring: &ring,
            listener: &listener,
        };
        assert_eq!(sink.buffered_bytes(), 14_000);
        assert!((buffered_delay(sink.buffered_bytes(), 128) - 0.875).abs() < 1e-9);
    }

    #[test]
    fn stop_is_silent() {
        let (mut params, _, faults) = params(Arc::new(EndlessConnector), station(), false);
        params.ring = Arc::new(RingCacheBuffer::new(1024, 64 * 1024 * 1024));
        let worker = IngestWorker::spawn(params).unwrap();

        let start = Instant::now();
        while worker.state() != IngestState::Streaming {
            assert!(start.elapsed() < Duration::from_secs(5));
            thread::sleep(Duration::from_millis(5));
        }
        let status = worker.status.clone();
        assert!(worker.join(Duration::from_secs(2)));
        assert_eq!(status.lock().unwrap().state, IngestState::Stopped);
        assert!(faults.try_recv().is_err());
    }

    #[test]
    fn throughput_meter_starts_at_zero() {
        let mut meter = ThroughputMeter::default();
        assert_eq!(meter.bytes_per_sec(), 0.0);
        meter.record(100);
        // Below the sampling interval nothing is averaged yet
        assert_eq!(meter.bytes_per_sec(), 0.0);
    }

    #[test]
    fn throughput_meter_samples_after_interval() {
        let mut meter = ThroughputMeter::default();
        thread::sleep(Duration::from_millis(300));
        meter.record(16_000);
        assert!(meter.bytes_per_sec() > 0.0);
    }
}
