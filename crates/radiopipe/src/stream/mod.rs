//! Stream handling
//!
//! Network side of the pipeline: connects to Icecast/Shoutcast streams,
//! strips interleaved ICY metadata and stores the audio bytes in the cache
//! buffer the decoder reads from.

pub mod buffer;
pub mod connector;
pub mod icy;
pub mod ingest;
pub mod metadata;

pub use buffer::{RingCacheBuffer, RingReader};
pub use connector::{ConnectRequest, Connection, Connector, HttpConnector};
pub use icy::{buffered_delay, DemuxSink, IcyDemuxer, IcyHeaders};
pub use ingest::{IngestParams, IngestState, IngestStatus, IngestWorker, RecordListener};
pub use metadata::{CharsetDetector, MetadataCharset, RecordInfo};
