//! Station and channel metadata from the FDSN station service

use crate::days::{TimeInstant, parse_fdsn_time};
use crate::errors::{AvailError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChannelRecord {
    pub location: String,
    pub code: String,
    pub latitude: f64,
    pub longitude: f64,
    pub sample_rate: f64,
    pub start_date: TimeInstant,
    /// `None` while the channel is still operating
    pub end_date: Option<TimeInstant>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StationRecord {
    pub network: String,
    pub code: String,
    pub latitude: f64,
    pub longitude: f64,
    pub channels: Vec<ChannelRecord>,
}

/// Channel identity used for one aggregation: code plus integer sample rate
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelKey {
    pub code: String,
    pub rate: u32,
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.code, self.rate)
    }
}

impl StationRecord {
    /// `NET.STA`
    pub fn id(&self) -> String {
        format!("{}.{}", self.network, self.code)
    }

    /// Distinct channel keys, ordered by code then rate
    pub fn channel_keys(&self) -> BTreeSet<ChannelKey> {
        self.channels
            .iter()
            .map(|channel| ChannelKey {
                code: channel.code.clone(),
                rate: channel.sample_rate as u32,
            })
            .collect()
    }

    /// Earliest channel start and latest channel end within the report window.
    ///
    /// The earliest start is seeded with `window_stop` and the latest end with
    /// `window_start`. The latest end is `None` as soon as one channel is
    /// still open.
    pub fn operational_span(
        &self,
        window_start: TimeInstant,
        window_stop: TimeInstant,
    ) -> (TimeInstant, Option<TimeInstant>) {
        let mut earliest = window_stop;
        let mut latest = Some(window_start);

        for channel in &self.channels {
            earliest = earliest.min(channel.start_date);
            latest = match (latest, channel.end_date) {
                (Some(current), Some(end)) => Some(current.max(end)),
                _ => None,
            };
        }

        (earliest, latest)
    }
}

/// Reason a station was left out of the report
#[derive(Clone, Debug, PartialEq)]
pub enum Exclusion {
    StartedTooLate { earliest: TimeInstant },
    EndedTooEarly { latest: TimeInstant },
}

impl fmt::Display for Exclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exclusion::StartedTooLate { earliest } => {
                write!(f, "first channel started {}", earliest.format("%Y-%m-%d"))
            }
            Exclusion::EndedTooEarly { latest } => {
                write!(f, "last channel ended {}", latest.format("%Y-%m-%d"))
            }
        }
    }
}

/// Keeps stations whose operation starts early and lasts long enough
#[derive(Clone, Debug)]
pub struct StationFilter {
    pub window_start: TimeInstant,
    pub window_stop: TimeInstant,
    pub start_before: TimeInstant,
    pub stop_after: TimeInstant,
}

impl StationFilter {
    pub fn admits(&self, station: &StationRecord) -> std::result::Result<(), Exclusion> {
        let (earliest, latest) = station.operational_span(self.window_start, self.window_stop);

        if earliest > self.start_before {
            return Err(Exclusion::StartedTooLate { earliest });
        }

        if let Some(latest) = latest {
            if latest < self.stop_after {
                return Err(Exclusion::EndedTooEarly { latest });
            }
        }

        Ok(())
    }
}

const STATION_TEXT_FIELDS: usize = 17;

/// Parse a `level=channel&format=text` station service response.
///
/// Channels are grouped into stations in order of first appearance.
pub fn parse_station_text(body: &str) -> Result<Vec<StationRecord>> {
    let mut stations: Vec<StationRecord> = Vec::new();
    let mut positions: HashMap<(String, String), usize> = HashMap::new();

    for (number, line) in body.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = trimmed.split('|').map(str::trim).collect();
        if fields.len() < STATION_TEXT_FIELDS {
            return Err(AvailError::Parse(format!(
                "station line {} has {} fields, expected {}",
                number + 1,
                fields.len(),
                STATION_TEXT_FIELDS
            )));
        }

        let channel = ChannelRecord {
            location: fields[2].to_string(),
            code: fields[3].to_string(),
            latitude: parse_number(fields[4], "latitude")?,
            longitude: parse_number(fields[5], "longitude")?,
            sample_rate: parse_number(fields[14], "sample rate")?,
            start_date: parse_fdsn_time(fields[15])?,
            end_date: match fields[16] {
                "" => None,
                end => Some(parse_fdsn_time(end)?),
            },
        };

        let key = (fields[0].to_string(), fields[1].to_string());
        let position = *positions.entry(key).or_insert_with(|| {
            stations.push(StationRecord {
                network: fields[0].to_string(),
                code: fields[1].to_string(),
                latitude: channel.latitude,
                longitude: channel.longitude,
                channels: Vec::new(),
            });
            stations.len() - 1
        });

        stations[position].channels.push(channel);
    }

    Ok(stations)
}

fn parse_number(field: &str, name: &str) -> Result<f64> {
    field
        .parse()
        .map_err(|_| AvailError::Parse(format!("invalid {} '{}'", name, field)))
}
