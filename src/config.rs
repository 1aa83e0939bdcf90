//! Configuration management for the availability report

use crate::coverage::{AggregationOptions, OverlapPolicy};
use crate::days::{TimeInstant, parse_fdsn_time};
use crate::stations::StationFilter;
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Report file, one line per station
    pub output_path: PathBuf,

    /// FDSN station service query endpoint
    pub station_service_url: String,

    /// FDSN availability service query endpoint
    pub availability_service_url: String,

    /// Network codes to search
    pub networks: Vec<String>,

    /// Candidate channel codes
    pub channels: Vec<String>,

    /// Location code passed to availability queries
    pub location: String,

    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,

    /// First day of the report window
    pub start_time: TimeInstant,

    /// Last day of the report window (inclusive)
    pub stop_time: TimeInstant,

    /// Stations whose first channel starts after this are skipped
    pub start_before: TimeInstant,

    /// Stations whose channels have all ended before this are skipped
    pub stop_after: TimeInstant,

    /// Only report channels with this nominal rate when set
    pub target_sampling_rate: Option<f64>,

    /// Reported intervals shorter than this are ignored
    pub min_interval: Duration,

    /// How overlapping intervals combine within a day
    pub overlap_policy: OverlapPolicy,

    /// HTTP timeout for service requests
    pub http_timeout: Duration,

    /// Maximum retry attempts for failed requests
    pub max_retries: u32,

    /// Retry backoff base
    pub retry_backoff_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from("avail.txt"),
            station_service_url: "https://service.iris.edu/fdsnws/station/1/query".to_string(),
            availability_service_url: "https://service.iris.edu/fdsnws/availability/1/query"
                .to_string(),
            networks: split_list("UW,PB,CC,CN,C8"),
            channels: split_list("BHN,BHE,BHZ,HHN,HHE,HHZ,EHN,EHE,EHZ"),
            location: "*".to_string(),
            min_latitude: 46.0,
            max_latitude: 51.0,
            min_longitude: -129.0,
            max_longitude: -121.5,
            start_time: midnight(2005, 1, 1),
            stop_time: midnight(2023, 6, 1),
            start_before: midnight(2010, 1, 1),
            stop_after: midnight(2020, 1, 1),
            target_sampling_rate: None,
            min_interval: Duration::from_secs(3600),
            overlap_policy: OverlapPolicy::Sum,
            http_timeout: Duration::from_secs(120),
            max_retries: 0,
            retry_backoff_ms: 1000,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Overlay defaults with values found through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(path) = lookup("OUTPUT_PATH") {
            config.output_path = PathBuf::from(path);
        }

        if let Some(url) = lookup("STATION_SERVICE_URL") {
            config.station_service_url = url;
        }

        if let Some(url) = lookup("AVAILABILITY_SERVICE_URL") {
            config.availability_service_url = url;
        }

        if let Some(networks) = lookup("NETWORKS") {
            config.networks = split_list(&networks);
        }

        if let Some(channels) = lookup("CHANNELS") {
            config.channels = split_list(&channels);
        }

        if let Some(location) = lookup("LOCATION") {
            config.location = location;
        }

        for (key, slot) in [
            ("MIN_LATITUDE", &mut config.min_latitude),
            ("MAX_LATITUDE", &mut config.max_latitude),
            ("MIN_LONGITUDE", &mut config.min_longitude),
            ("MAX_LONGITUDE", &mut config.max_longitude),
        ] {
            if let Some(value) = lookup(key) {
                match value.parse() {
                    Ok(degrees) => *slot = degrees,
                    Err(_) => warn!("Ignoring invalid {}: {}", key, value),
                }
            }
        }

        for (key, slot) in [
            ("START_TIME", &mut config.start_time),
            ("STOP_TIME", &mut config.stop_time),
            ("START_BEFORE", &mut config.start_before),
            ("STOP_AFTER", &mut config.stop_after),
        ] {
            if let Some(value) = lookup(key) {
                match parse_fdsn_time(&value) {
                    Ok(time) => *slot = time,
                    Err(e) => warn!("Ignoring invalid {}: {}", key, e),
                }
            }
        }

        if let Some(rate) = lookup("TARGET_SAMPLING_RATE") {
            if let Ok(rate) = rate.parse() {
                config.target_sampling_rate = Some(rate);
            }
        }

        if let Some(seconds) = lookup("MIN_INTERVAL_SECONDS") {
            if let Ok(seconds) = seconds.parse::<u64>() {
                config.min_interval = Duration::from_secs(seconds);
            }
        }

        if let Some(policy) = lookup("OVERLAP_POLICY") {
            match policy.parse() {
                Ok(policy) => config.overlap_policy = policy,
                Err(e) => warn!("Ignoring OVERLAP_POLICY: {}", e),
            }
        }

        if let Some(timeout) = lookup("HTTP_TIMEOUT_SECONDS") {
            if let Ok(seconds) = timeout.parse::<u64>() {
                config.http_timeout = Duration::from_secs(seconds);
            }
        }

        if let Some(max_retries) = lookup("MAX_RETRIES") {
            if let Ok(retries) = max_retries.parse() {
                config.max_retries = retries;
            }
        }

        if let Some(backoff) = lookup("RETRY_BACKOFF_MS") {
            if let Ok(ms) = backoff.parse() {
                config.retry_backoff_ms = ms;
            }
        }

        config
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.output_path.as_os_str().is_empty() {
            return Err("output_path cannot be empty".to_string());
        }

        if self.station_service_url.is_empty() || self.availability_service_url.is_empty() {
            return Err("service URLs cannot be empty".to_string());
        }

        if self.networks.is_empty() {
            return Err("at least one network must be specified".to_string());
        }

        if self.channels.is_empty() {
            return Err("at least one channel must be specified".to_string());
        }

        if self.location.is_empty() {
            return Err("location cannot be empty, use '*' for any".to_string());
        }

        if !(-90.0..=90.0).contains(&self.min_latitude)
            || !(-90.0..=90.0).contains(&self.max_latitude)
            || self.min_latitude > self.max_latitude
        {
            return Err("latitude bounds must satisfy -90 <= min <= max <= 90".to_string());
        }

        if !(-180.0..=180.0).contains(&self.min_longitude)
            || !(-180.0..=180.0).contains(&self.max_longitude)
            || self.min_longitude > self.max_longitude
        {
            return Err("longitude bounds must satisfy -180 <= min <= max <= 180".to_string());
        }

        if self.stop_time < self.start_time {
            return Err("stop_time must not precede start_time".to_string());
        }

        if let Some(rate) = self.target_sampling_rate {
            if rate <= 0.0 {
                return Err("target_sampling_rate must be greater than 0".to_string());
            }
        }

        Ok(())
    }

    pub fn aggregation_options(&self) -> AggregationOptions {
        AggregationOptions {
            min_duration_secs: self.min_interval.as_secs_f64(),
            overlap: self.overlap_policy,
            ..AggregationOptions::default()
        }
    }

    pub fn station_filter(&self) -> StationFilter {
        StationFilter {
            window_start: self.start_time,
            window_stop: self.stop_time,
            start_before: self.start_before,
            stop_after: self.stop_after,
        }
    }
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn midnight(year: i32, month: u32, day: u32) -> TimeInstant {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0)
        .single()
        .unwrap_or_default()
}
