//! HTTP transport for the FDSN station and availability web services

use crate::config::Config;
use crate::days::{TimeInstant, format_fdsn_time};
use crate::errors::{AvailError, Result};
use crate::stations::{StationRecord, parse_station_text};
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::time::sleep;
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

/// Parameters of a station metadata query
#[derive(Debug, Clone)]
pub struct StationQuery {
    pub networks: Vec<String>,
    pub channels: Vec<String>,
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
    pub start: TimeInstant,
    pub end: TimeInstant,
}

impl StationQuery {
    pub fn from_config(config: &Config) -> Self {
        Self {
            networks: config.networks.clone(),
            channels: config.channels.clone(),
            min_latitude: config.min_latitude,
            max_latitude: config.max_latitude,
            min_longitude: config.min_longitude,
            max_longitude: config.max_longitude,
            start: config.start_time,
            end: config.stop_time,
        }
    }

    fn params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("net", self.networks.join(",")),
            ("cha", self.channels.join(",")),
            ("minlat", self.min_latitude.to_string()),
            ("maxlat", self.max_latitude.to_string()),
            ("minlon", self.min_longitude.to_string()),
            ("maxlon", self.max_longitude.to_string()),
            ("starttime", format_fdsn_time(self.start)),
            ("endtime", format_fdsn_time(self.end)),
            ("level", "channel".to_string()),
            ("format", "text".to_string()),
            ("nodata", "404".to_string()),
        ]
    }
}

/// Parameters of an availability query for one channel
#[derive(Debug, Clone)]
pub struct AvailabilityQuery {
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,
    pub start: TimeInstant,
    pub end: TimeInstant,
}

impl AvailabilityQuery {
    fn params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("net", self.network.clone()),
            ("sta", self.station.clone()),
            ("loc", self.location.clone()),
            ("cha", self.channel.clone()),
            ("start", format_fdsn_time(self.start)),
            ("end", format_fdsn_time(self.end)),
            ("nodata", "404".to_string()),
            ("format", "text".to_string()),
        ]
    }
}

/// Incremental line reader over a response body
pub struct LineStream {
    reader: BufReader<Box<dyn AsyncRead + Send + Unpin>>,
    lines_read: usize,
}

impl LineStream {
    pub fn new<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            reader: BufReader::new(Box::new(reader)),
            lines_read: 0,
        }
    }

    pub fn from_response(response: Response) -> Self {
        let chunks = response.bytes_stream().map(|chunk| chunk.map_err(io::Error::other)).boxed();
        Self::new(StreamReader::new(chunks))
    }

    /// Next line without its terminator, or `None` at end of body.
    ///
    /// A line that is not valid UTF-8 is consumed and reported as
    /// `AvailError::Parse`; the stream stays usable afterwards.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        let mut raw = Vec::new();
        if self.reader.read_until(b'\n', &mut raw).await? == 0 {
            return Ok(None);
        }
        self.lines_read += 1;

        let line = String::from_utf8(raw).map_err(|e| {
            AvailError::Parse(format!("non UTF-8 line {}: {}", self.lines_read, e))
        })?;

        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    pub fn lines_read(&self) -> usize {
        self.lines_read
    }
}

/// Client for FDSN web service queries
#[derive(Debug, Clone)]
pub struct FdsnClient {
    client: Client,
    station_url: String,
    availability_url: String,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl FdsnClient {
    /// Create a new client from the report configuration
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_endpoints(
            config.station_service_url.clone(),
            config.availability_service_url.clone(),
            config.http_timeout,
            config.max_retries,
            config.retry_backoff_ms,
        )
    }

    pub fn with_endpoints(
        station_url: String,
        availability_url: String,
        http_timeout: Duration,
        max_retries: u32,
        retry_backoff_ms: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(http_timeout)
            .user_agent(format!("seis_avail/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(AvailError::Http)?;

        Ok(Self {
            client,
            station_url,
            availability_url,
            max_retries,
            retry_backoff_ms,
        })
    }

    /// Fetch station and channel metadata; no data yields an empty list
    pub async fn query_stations(&self, query: &StationQuery) -> Result<Vec<StationRecord>> {
        let request = self.client.get(&self.station_url).query(&query.params());

        let Some(response) = self.send(request, &self.station_url).await? else {
            debug!("Station service returned no data");
            return Ok(Vec::new());
        };

        let body = response.text().await.map_err(AvailError::Http)?;
        parse_station_text(&body)
    }

    /// Open the availability listing for one channel as a line stream.
    ///
    /// Returns `None` when the service reports no data.
    pub async fn open_availability(&self, query: &AvailabilityQuery) -> Result<Option<LineStream>> {
        let request = self
            .client
            .get(&self.availability_url)
            .query(&query.params());

        debug!(
            "Requesting availability for {}.{}.{}.{}",
            query.network, query.station, query.location, query.channel
        );

        Ok(self
            .send(request, &self.availability_url)
            .await?
            .map(LineStream::from_response))
    }

    /// Send with retries; `None` for 204/404 no-data answers
    async fn send(&self, request: RequestBuilder, url: &str) -> Result<Option<Response>> {
        let mut attempt = 0;

        loop {
            let outcome = match request.try_clone() {
                Some(request) => self.send_attempt(request, url).await,
                None => return Err(AvailError::Other("request cannot be retried".to_string())),
            };

            match outcome {
                Ok(response) => return Ok(response),
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    let backoff_ms = self.retry_backoff_ms * 2_u64.pow(attempt - 1);
                    warn!(
                        "Request to {} failed (attempt {}), retrying in {}ms: {}",
                        url, attempt, backoff_ms, e
                    );
                    sleep(Duration::from_millis(backoff_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_attempt(&self, request: RequestBuilder, url: &str) -> Result<Option<Response>> {
        let response = request.send().await.map_err(AvailError::Http)?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND || status == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        if !status.is_success() {
            return Err(AvailError::Service {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        Ok(Some(response))
    }
}
