//! Stream connections
//!
//! `Connector` opens the HTTP stream for the ingest worker. `HttpConnector`
//! is the reqwest implementation; tests plug in in-memory connectors.

use std::io::Read;
use std::net::ToSocketAddrs;
use std::time::Duration;

use reqwest::blocking::Client;

use crate::config::PlayerConfig;
use crate::error::{RadioError, Result};
use crate::station::{RadioStation, RequestHeader};
use crate::stream::icy::IcyHeaders;

/// Everything needed to open one stream
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub url: String,
    pub headers: Vec<RequestHeader>,
    /// Ask the server to interleave ICY metadata
    pub icy_metadata: bool,
}

impl ConnectRequest {
    pub fn for_station(station: &RadioStation, legacy_mode: bool) -> Self {
        Self {
            url: station.url.clone(),
            headers: station.request_headers.clone(),
            icy_metadata: !legacy_mode,
        }
    }
}

/// An open stream: response headers plus the body reader
pub struct Connection {
    pub headers: IcyHeaders,
    /// URL after redirects
    pub final_url: String,
    pub body: Box<dyn Read + Send>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("headers", &self.headers)
            .field("final_url", &self.final_url)
            .finish()
    }
}

/// Opens stream connections for the ingest worker
pub trait Connector: Send + Sync {
    /// Open the stream; blocks until the response headers arrived.
    fn connect(&self, request: &ConnectRequest) -> Result<Connection>;

    /// Connectivity preflight for `url`.
    fn is_online(&self, url: &str) -> bool;
}

/// reqwest-based connector
pub struct HttpConnector {
    client: Client,
}

impl HttpConnector {
    pub fn new(config: &PlayerConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.read_timeout_secs))
            .build()?;
        Ok(Self { client })
    }
}

impl Connector for HttpConnector {
    fn connect(&self, request: &ConnectRequest) -> Result<Connection> {
        let mut builder = self.client.get(&request.url);
        if request.icy_metadata {
            builder = builder.header("Icy-MetaData", "1");
        }
        for header in &request.headers {
            builder = builder.header(header.key.as_str(), header.value.as_str());
        }

        let response = builder.send()?;
        if !response.status().is_success() {
            return Err(RadioError::ConnectionFailed(format!(
                "HTTP {} from {}",
                response.status(),
                request.url
            )));
        }

        let headers = IcyHeaders::from_headers(response.headers());
        let final_url = response.url().to_string();
        tracing::info!(
            url = %final_url,
            metaint = ?headers.metaint,
            name = ?headers.name,
            "stream connected"
        );

        Ok(Connection {
            headers,
            final_url,
            body: Box::new(response),
        })
    }

    fn is_online(&self, url: &str) -> bool {
        let Ok(parsed) = reqwest::Url::parse(url) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        let port = parsed.port_or_known_default().unwrap_or(80);
        match (host, port).to_socket_addrs() {
            Ok(mut addrs) => addrs.next().is_some(),
            Err(e) => {
                tracing::warn!(host, error = %e, "connectivity preflight failed");
                false
            }
        }
    }
}
