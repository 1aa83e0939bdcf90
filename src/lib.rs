//! Seismic Station Availability Library
//!
//! This library computes per-day data availability for seismic station
//! channels from FDSN availability listings and writes a per-station report.

pub mod config;
pub mod coverage;
pub mod days;
pub mod errors;
pub mod interval;
pub mod output;
pub mod reporter;
pub mod stations;
pub mod transport;

pub use config::Config;
pub use coverage::{AggregationOptions, CoverageAccumulator, CoverageMatrix, OverlapPolicy, compute_availability};
pub use days::{DayIndex, TimeInstant};
pub use errors::{AvailError, Result};
pub use interval::{AvailabilityLineParser, Interval};
pub use reporter::{AvailabilityReporter, ReportSummary};
