//! Report driver: stations, then channels, then interval lines, in sequence

use crate::config::Config;
use crate::coverage::{CoverageAccumulator, Fold, SkipReason};
use crate::days::DayIndex;
use crate::errors::{AvailError, Result};
use crate::interval::{AvailabilityLineParser, is_header_line};
use crate::output::{ReportWriter, StationLine};
use crate::stations::{ChannelKey, StationRecord};
use crate::transport::{AvailabilityQuery, FdsnClient, StationQuery};

use serde::Serialize;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Drives one availability report run
pub struct AvailabilityReporter {
    config: Config,
    client: FdsnClient,
    run_id: String,
}

/// A station that could not be reported
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StationFailure {
    pub station: String,
    pub error: String,
}

/// A channel left out of its station line
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SkippedChannel {
    pub station: String,
    pub channel: String,
    pub reason: String,
}

/// Outcome of a report run
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReportSummary {
    pub run_id: String,
    pub stations_found: usize,
    pub stations_excluded: usize,
    pub stations_reported: usize,
    pub failed_stations: Vec<StationFailure>,
    pub skipped_channels: Vec<SkippedChannel>,
    pub rejected_lines: usize,
    pub rate_mismatches: usize,
    pub short_intervals: usize,
}

impl ReportSummary {
    pub fn is_complete(&self) -> bool {
        self.failed_stations.is_empty()
    }
}

/// Per-channel counters folded into the summary
#[derive(Debug, Default)]
struct ChannelTally {
    rejected_lines: usize,
    rate_mismatches: usize,
    short_intervals: usize,
}

impl AvailabilityReporter {
    /// Create a new reporter
    pub fn new(config: Config) -> Result<Self> {
        config.validate().map_err(AvailError::Config)?;

        let client = FdsnClient::new(&config)?;

        Ok(Self {
            config,
            client,
            run_id: Uuid::new_v4().to_string(),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Run the whole report and write the output file
    #[instrument(skip(self), fields(run_id = %self.run_id))]
    pub async fn run(&self) -> Result<ReportSummary> {
        let mut summary = ReportSummary {
            run_id: self.run_id.clone(),
            ..ReportSummary::default()
        };

        let stations = self
            .client
            .query_stations(&StationQuery::from_config(&self.config))
            .await?;
        summary.stations_found = stations.len();
        info!("Station service returned {} stations", stations.len());

        let filter = self.config.station_filter();
        let stations: Vec<StationRecord> = stations
            .into_iter()
            .filter(|station| match filter.admits(station) {
                Ok(()) => true,
                Err(exclusion) => {
                    debug!("Excluding {}: {}", station.id(), exclusion);
                    false
                }
            })
            .collect();
        summary.stations_excluded = summary.stations_found - stations.len();

        let day_index = DayIndex::new(self.config.start_time, self.config.stop_time)?;
        info!(
            "Reporting {} stations over {} days",
            stations.len(),
            day_index.len()
        );

        let mut writer = ReportWriter::create(&self.config.output_path).await?;

        for station in &stations {
            let timer = Instant::now();

            match self.report_station(station, &day_index, &mut summary).await {
                Ok(line) => {
                    writer.write_station(&line).await?;
                    summary.stations_reported += 1;
                    info!(
                        "It took {:.2}s for {}:{}",
                        timer.elapsed().as_secs_f64(),
                        station.network,
                        station.code
                    );
                }
                Err(e) => {
                    error!("Station {} failed: {}", station.id(), e);
                    summary.failed_stations.push(StationFailure {
                        station: station.id(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let path = writer.finish().await?;
        info!(
            "Wrote {} station lines to {}",
            summary.stations_reported,
            path.display()
        );

        Ok(summary)
    }

    /// Aggregate every channel key of one station
    #[instrument(skip(self, station, day_index, summary), fields(station = %station.id()))]
    async fn report_station(
        &self,
        station: &StationRecord,
        day_index: &DayIndex,
        summary: &mut ReportSummary,
    ) -> Result<StationLine> {
        let mut channels = Vec::new();

        for key in station.channel_keys() {
            if let Some(target) = self.config.target_sampling_rate {
                if f64::from(key.rate) != target {
                    debug!("Skipping {} at non-target rate", key);
                    continue;
                }
            }

            let mut tally = ChannelTally::default();
            let result = self.aggregate_channel(station, &key, day_index, &mut tally).await;

            summary.rejected_lines += tally.rejected_lines;
            summary.rate_mismatches += tally.rate_mismatches;
            summary.short_intervals += tally.short_intervals;

            match result {
                Ok(total_days) => channels.push((key, total_days)),
                Err(e) if e.is_channel_scoped() => {
                    warn!(
                        "Channel {} of {} skipped: interval outside requested window ({})",
                        key,
                        station.id(),
                        e
                    );
                    summary.skipped_channels.push(SkippedChannel {
                        station: station.id(),
                        channel: key.to_string(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        Ok(StationLine {
            network: station.network.clone(),
            station: station.code.clone(),
            channels,
        })
    }

    /// Stream one channel's availability and return its covered day total
    async fn aggregate_channel(
        &self,
        station: &StationRecord,
        key: &ChannelKey,
        day_index: &DayIndex,
        tally: &mut ChannelTally,
    ) -> Result<f64> {
        let query = AvailabilityQuery {
            network: station.network.clone(),
            station: station.code.clone(),
            location: self.config.location.clone(),
            channel: key.code.clone(),
            start: day_index.first(),
            end: day_index.last(),
        };

        let mut accumulator = CoverageAccumulator::new(
            day_index,
            vec![key.code.clone()],
            f64::from(key.rate),
            self.config.aggregation_options(),
        );

        let Some(mut lines) = self.client.open_availability(&query).await? else {
            debug!("No availability reported for {}", key);
            return Ok(0.0);
        };

        let parser = AvailabilityLineParser::new(&station.network, &station.code, &key.code);

        loop {
            // The first line of a listing is always its column header
            let parsed = match lines.next_line().await {
                Ok(None) => break,
                Ok(Some(line)) if lines.lines_read() == 1 || is_header_line(&line) => continue,
                Ok(Some(line)) => parser.parse_line(&line),
                Err(e) => Err(e),
            };

            let interval = match parsed {
                Ok(interval) => interval,
                Err(AvailError::Parse(msg)) => {
                    warn!("Rejecting line {} for {}: {}", lines.lines_read(), key, msg);
                    tally.rejected_lines += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            if let Fold::Skipped(reason) = accumulator.fold(&interval)? {
                debug!("Ignoring interval for {}: {}", key, reason);
                match reason {
                    SkipReason::RateMismatch { .. } => tally.rate_mismatches += 1,
                    SkipReason::TooShort { .. } => tally.short_intervals += 1,
                }
            }
        }

        let matrix = accumulator.finish()?;
        Ok(matrix.column_total(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::days::parse_fdsn_time;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const STATION_HEADER: &str = "#Network | Station | Location | Channel | Latitude | Longitude | Elevation | Depth | Azimuth | Dip | SensorDescription | Scale | ScaleFreq | ScaleUnits | SampleRate | StartTime | EndTime";
    const AVAIL_HEADER: &str = "#Network Station Location Channel Quality SampleRate Earliest Latest";

    fn station_line(net: &str, sta: &str, cha: &str, rate: &str, start: &str, end: &str) -> String {
        format!(
            "{}|{}||{}|47.7|-122.9|420.0|0.0|0.0|-90.0|Sensor|1.0E9|1.0|M/S|{}|{}|{}",
            net, sta, cha, rate, start, end
        )
    }

    fn test_config(server: &MockServer, output: &std::path::Path) -> Config {
        Config {
            output_path: output.to_path_buf(),
            station_service_url: format!("{}/fdsnws/station/1/query", server.uri()),
            availability_service_url: format!("{}/fdsnws/availability/1/query", server.uri()),
            start_time: parse_fdsn_time("2020-01-01").unwrap(),
            stop_time: parse_fdsn_time("2020-01-05").unwrap(),
            start_before: parse_fdsn_time("2020-01-02").unwrap(),
            stop_after: parse_fdsn_time("2020-01-03").unwrap(),
            ..Config::default()
        }
    }

    async fn mount_stations(server: &MockServer, lines: &[String]) {
        let body = format!("{}\n{}\n", STATION_HEADER, lines.join("\n"));
        Mock::given(method("GET"))
            .and(path("/fdsnws/station/1/query"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    async fn mount_availability(server: &MockServer, sta: &str, cha: &str, template: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path("/fdsnws/availability/1/query"))
            .and(query_param("sta", sta))
            .and(query_param("cha", cha))
            .respond_with(template)
            .mount(server)
            .await;
    }

    fn avail_body(lines: &[&str]) -> ResponseTemplate {
        let body = format!("{}\n{}\n", AVAIL_HEADER, lines.join("\n"));
        ResponseTemplate::new(200).set_body_string(body)
    }

    #[tokio::test]
    async fn test_run_writes_station_totals() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("avail.txt");

        mount_stations(
            &server,
            &[
                station_line("UW", "DOSE", "BHZ", "40.0", "2019-01-01T00:00:00", ""),
                station_line("UW", "DOSE", "HHZ", "100.0", "2019-01-01T00:00:00", ""),
                // starts after start_before, excluded
                station_line("UW", "LATE", "BHZ", "40.0", "2020-01-04T00:00:00", ""),
            ],
        )
        .await;

        mount_availability(
            &server,
            "DOSE",
            "BHZ",
            avail_body(&[
                "UW DOSE -- BHZ M 40.0 2020-01-01T02:00:00.000000Z 2020-01-01T05:00:00.000000Z",
                "UW DOSE -- BHZ M 40.0 2020-01-02T22:00:00.000000Z 2020-01-04T03:00:00.000000Z",
                "UW DOSE -- BHZ M 40.0 2020-01-05T01:00:00.000000Z 2020-01-05T01:30:00.000000Z",
                "UW DOSE -- BHZ M 20.0 2020-01-05T00:00:00.000000Z 2020-01-05T12:00:00.000000Z",
                "UW DOSE -- BHZ M not-a-rate 2020-01-05T00:00:00Z 2020-01-05T12:00:00Z",
            ]),
        )
        .await;
        mount_availability(&server, "DOSE", "HHZ", ResponseTemplate::new(404)).await;

        let reporter = AvailabilityReporter::new(test_config(&server, &output)).unwrap();
        let summary = reporter.run().await.unwrap();

        assert_eq!(summary.stations_found, 2);
        assert_eq!(summary.stations_excluded, 1);
        assert_eq!(summary.stations_reported, 1);
        assert!(summary.is_complete());
        assert_eq!(summary.rejected_lines, 1);
        assert_eq!(summary.rate_mismatches, 1);
        assert_eq!(summary.short_intervals, 1);

        // 3/24 + 29/24 = 32/24
        let contents = std::fs::read_to_string(&output).unwrap();
        assert_eq!(contents, "UW.DOSE | BHZ:40=1.3333 HHZ:100=0.0000 \n");
    }

    #[tokio::test]
    async fn test_failed_station_does_not_stop_run() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("avail.txt");

        mount_stations(
            &server,
            &[
                station_line("UW", "DOSE", "BHZ", "40.0", "2019-01-01T00:00:00", ""),
                station_line("UW", "LON", "BHZ", "40.0", "2019-01-01T00:00:00", ""),
                station_line("UW", "RAT", "BHZ", "40.0", "2019-01-01T00:00:00", ""),
            ],
        )
        .await;

        mount_availability(&server, "DOSE", "BHZ", ResponseTemplate::new(500)).await;
        mount_availability(
            &server,
            "LON",
            "BHZ",
            avail_body(&["UW LON -- BHZ M 40.0 2020-01-02T00:00:00Z 2020-01-03T00:00:00Z"]),
        )
        .await;
        // identity mismatch in the response fails the station
        mount_availability(
            &server,
            "RAT",
            "BHZ",
            avail_body(&["UW LON -- BHZ M 40.0 2020-01-02T00:00:00Z 2020-01-03T00:00:00Z"]),
        )
        .await;

        let reporter = AvailabilityReporter::new(test_config(&server, &output)).unwrap();
        let summary = reporter.run().await.unwrap();

        assert_eq!(summary.stations_reported, 1);
        assert!(!summary.is_complete());
        let failed: Vec<&str> = summary
            .failed_stations
            .iter()
            .map(|f| f.station.as_str())
            .collect();
        assert_eq!(failed, vec!["UW.DOSE", "UW.RAT"]);

        let contents = std::fs::read_to_string(&output).unwrap();
        assert_eq!(contents, "UW.LON | BHZ:40=1.0000 \n");
    }

    #[tokio::test]
    async fn test_out_of_window_channel_is_skipped() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("avail.txt");

        mount_stations(
            &server,
            &[
                station_line("UW", "DOSE", "BHE", "40.0", "2019-01-01T00:00:00", ""),
                station_line("UW", "DOSE", "BHZ", "40.0", "2019-01-01T00:00:00", ""),
            ],
        )
        .await;

        mount_availability(
            &server,
            "DOSE",
            "BHE",
            avail_body(&["UW DOSE -- BHE M 40.0 2019-12-31T12:00:00Z 2020-01-01T12:00:00Z"]),
        )
        .await;
        mount_availability(
            &server,
            "DOSE",
            "BHZ",
            avail_body(&["UW DOSE -- BHZ M 40.0 2020-01-01T00:00:00Z 2020-01-01T12:00:00Z"]),
        )
        .await;

        let reporter = AvailabilityReporter::new(test_config(&server, &output)).unwrap();
        let summary = reporter.run().await.unwrap();

        assert!(summary.is_complete());
        assert_eq!(summary.skipped_channels.len(), 1);
        assert_eq!(summary.skipped_channels[0].channel, "BHE:40");

        let contents = std::fs::read_to_string(&output).unwrap();
        assert_eq!(contents, "UW.DOSE | BHZ:40=0.5000 \n");
    }

    #[tokio::test]
    async fn test_unmarked_header_and_undecodable_line_are_skipped() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("avail.txt");

        mount_stations(
            &server,
            &[station_line("UW", "DOSE", "BHZ", "40.0", "2019-01-01T00:00:00", "")],
        )
        .await;

        let mut body = b"Network Station Location Channel Quality SampleRate Earliest Latest\n".to_vec();
        body.extend_from_slice(b"UW DOSE -- BHZ M 40.0 \xff\xfe\n");
        body.extend_from_slice(b"UW DOSE -- BHZ M 40.0 2020-01-02T00:00:00Z 2020-01-03T00:00:00Z\n");
        mount_availability(
            &server,
            "DOSE",
            "BHZ",
            ResponseTemplate::new(200).set_body_bytes(body),
        )
        .await;

        let reporter = AvailabilityReporter::new(test_config(&server, &output)).unwrap();
        let summary = reporter.run().await.unwrap();

        assert!(summary.is_complete());
        assert_eq!(summary.rejected_lines, 1);

        let contents = std::fs::read_to_string(&output).unwrap();
        assert_eq!(contents, "UW.DOSE | BHZ:40=1.0000 \n");
    }

    #[tokio::test]
    async fn test_target_rate_limits_channels() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("avail.txt");

        mount_stations(
            &server,
            &[
                station_line("UW", "DOSE", "BHZ", "40.0", "2019-01-01T00:00:00", ""),
                station_line("UW", "DOSE", "HHZ", "100.0", "2019-01-01T00:00:00", ""),
            ],
        )
        .await;
        mount_availability(&server, "DOSE", "BHZ", ResponseTemplate::new(404)).await;

        let mut config = test_config(&server, &output);
        config.target_sampling_rate = Some(40.0);

        let summary = AvailabilityReporter::new(config).unwrap().run().await.unwrap();
        assert_eq!(summary.stations_reported, 1);

        let contents = std::fs::read_to_string(&output).unwrap();
        assert_eq!(contents, "UW.DOSE | BHZ:40=0.0000 \n");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = Config::default();
        config.networks.clear();

        assert!(matches!(
            AvailabilityReporter::new(config),
            Err(AvailError::Config(_))
        ));
    }
}
