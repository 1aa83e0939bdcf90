//! Availability interval records and the response line parser

use crate::days::{TimeInstant, parse_fdsn_time, seconds_between};
use crate::errors::{AvailError, Result};
use serde::{Deserialize, Serialize};

/// One reported span of continuous recording for a channel
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Interval {
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,
    pub quality: Option<String>,
    pub sample_rate: f64,
    pub start: TimeInstant,
    pub stop: TimeInstant,
}

impl Interval {
    pub fn new(channel: &str, sample_rate: f64, start: TimeInstant, stop: TimeInstant) -> Self {
        Self {
            network: String::new(),
            station: String::new(),
            location: String::new(),
            channel: channel.to_string(),
            quality: None,
            sample_rate,
            start,
            stop,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        seconds_between(self.start, self.stop)
    }
}

/// Whether a response line carries no interval (blank or `#` header)
pub fn is_header_line(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with('#')
}

/// Parser for the whitespace-delimited availability text format:
///
/// ```text
/// #Network Station Location Channel Quality SampleRate Earliest Latest
/// UW DOSE -- BHZ M 40.0 2019-05-03T01:20:59.315000Z 2019-05-03T01:23:10.740000Z
/// ```
///
/// The quality column is optional. Identity fields must echo the query.
#[derive(Debug, Clone)]
pub struct AvailabilityLineParser {
    network: String,
    station: String,
    channel: String,
}

impl AvailabilityLineParser {
    pub fn new(network: &str, station: &str, channel: &str) -> Self {
        Self {
            network: network.to_string(),
            station: station.to_string(),
            channel: channel.to_string(),
        }
    }

    pub fn parse_line(&self, line: &str) -> Result<Interval> {
        let fields: Vec<&str> = line.split_whitespace().collect();

        let (quality, rate_at) = match fields.len() {
            8 => (Some(fields[4].to_string()), 5),
            7 => (None, 4),
            n => {
                return Err(AvailError::Parse(format!(
                    "expected 7 or 8 fields, found {} in '{}'",
                    n,
                    line.trim()
                )));
            }
        };

        self.check("network", &self.network, fields[0])?;
        self.check("station", &self.station, fields[1])?;
        self.check("channel", &self.channel, fields[3])?;

        let sample_rate: f64 = fields[rate_at].parse().map_err(|_| {
            AvailError::Parse(format!("invalid sample rate '{}'", fields[rate_at]))
        })?;

        let start = parse_fdsn_time(fields[rate_at + 1])?;
        let stop = parse_fdsn_time(fields[rate_at + 2])?;

        if stop < start {
            return Err(AvailError::Parse(format!(
                "interval stop {} precedes start {}",
                fields[rate_at + 2],
                fields[rate_at + 1]
            )));
        }

        let location = match fields[2] {
            "--" => String::new(),
            loc => loc.to_string(),
        };

        Ok(Interval {
            network: fields[0].to_string(),
            station: fields[1].to_string(),
            location,
            channel: fields[3].to_string(),
            quality,
            sample_rate,
            start,
            stop,
        })
    }

    fn check(&self, field: &'static str, expected: &str, found: &str) -> Result<()> {
        if expected == found {
            Ok(())
        } else {
            Err(AvailError::FieldMismatch {
                field,
                expected: expected.to_string(),
                found: found.to_string(),
            })
        }
    }
}
