//! Interval-to-day coverage aggregation
//!
//! Reported recording intervals are split at UTC midnights and folded into a
//! `days × channels` matrix of day fractions. A single-day interval adds its
//! length to one cell. A multi-day interval adds a partial first day, exactly
//! `1.0` for every whole day in between, and a partial last day.

use crate::days::{DayIndex, SECONDS_PER_DAY, TimeInstant, next_midnight, seconds_between, truncate_to_day};
use crate::errors::{AvailError, Result};
use crate::interval::Interval;
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How contributions of overlapping intervals combine within a cell
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum OverlapPolicy {
    /// Contributions add up; overlaps can push a day above 1.0
    #[default]
    Sum,
    /// Contributions add up, then every cell is capped at 1.0
    Clamp,
    /// Overlapping or touching intervals are merged before they are spread
    Merge,
}

impl fmt::Display for OverlapPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverlapPolicy::Sum => write!(f, "sum"),
            OverlapPolicy::Clamp => write!(f, "clamp"),
            OverlapPolicy::Merge => write!(f, "merge"),
        }
    }
}

impl FromStr for OverlapPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sum" => Ok(OverlapPolicy::Sum),
            "clamp" => Ok(OverlapPolicy::Clamp),
            "merge" => Ok(OverlapPolicy::Merge),
            other => Err(format!(
                "unknown overlap policy '{}' (expected sum, clamp or merge)",
                other
            )),
        }
    }
}

/// Filtering and combination rules for one aggregation
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AggregationOptions {
    /// Intervals shorter than this are treated as noise
    pub min_duration_secs: f64,

    pub overlap: OverlapPolicy,

    /// Largest reported/expected sample rate difference still accepted
    pub rate_tolerance: f64,
}

impl Default for AggregationOptions {
    fn default() -> Self {
        Self {
            min_duration_secs: 3600.0,
            overlap: OverlapPolicy::Sum,
            rate_tolerance: 1e-6,
        }
    }
}

/// Per-day coverage fractions, one row per indexed day, one column per channel
#[derive(Clone, Debug, PartialEq)]
pub struct CoverageMatrix {
    days: usize,
    channels: Vec<String>,
    cells: Vec<f64>,
}

impl CoverageMatrix {
    pub fn new(days: usize, channels: Vec<String>) -> Self {
        Self {
            cells: vec![0.0; days * channels.len()],
            days,
            channels,
        }
    }

    /// (rows, columns)
    pub fn shape(&self) -> (usize, usize) {
        (self.days, self.channels.len())
    }

    pub fn column_of(&self, channel: &str) -> Option<usize> {
        self.channels.iter().position(|c| c == channel)
    }

    pub fn get(&self, row: usize, column: usize) -> f64 {
        self.cells[row * self.channels.len() + column]
    }

    fn add(&mut self, row: usize, column: usize, value: f64) {
        let width = self.channels.len();
        self.cells[row * width + column] += value;
    }

    pub fn column(&self, column: usize) -> impl Iterator<Item = f64> + '_ {
        let width = self.channels.len();
        self.cells.iter().skip(column).step_by(width).copied()
    }

    /// Covered days for one channel over the whole window
    pub fn column_total(&self, column: usize) -> f64 {
        self.column(column).sum()
    }

    pub fn total(&self) -> f64 {
        self.cells.iter().sum()
    }

    fn clamp_cells(&mut self, max: f64) {
        for cell in &mut self.cells {
            *cell = cell.min(max);
        }
    }
}

/// Why an interval did not contribute
#[derive(Clone, Debug, PartialEq)]
pub enum SkipReason {
    RateMismatch { reported: f64, expected: f64 },
    TooShort { seconds: f64 },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::RateMismatch { reported, expected } => {
                write!(f, "sample rate {} differs from expected {}", reported, expected)
            }
            SkipReason::TooShort { seconds } => {
                write!(f, "interval of {:.1}s is below the minimum duration", seconds)
            }
        }
    }
}

/// Outcome of folding one interval
#[derive(Clone, Debug, PartialEq)]
pub enum Fold {
    /// Contribution written to this many day rows
    Applied { days: usize },
    /// Accepted and held back until `finish` (merge policy)
    Deferred,
    Skipped(SkipReason),
}

/// Rows an interval touches, resolved before anything is written
struct Spread {
    first: (usize, f64),
    whole: std::ops::Range<usize>,
    last: Option<(usize, f64)>,
}

impl Spread {
    fn rows(&self) -> usize {
        1 + self.whole.len() + usize::from(self.last.is_some())
    }
}

/// Incremental aggregation over a stream of intervals.
///
/// Intervals are folded one at a time and dropped afterwards, so a response
/// never has to be held in memory.
pub struct CoverageAccumulator<'a> {
    day_index: &'a DayIndex,
    matrix: CoverageMatrix,
    expected_rate: f64,
    options: AggregationOptions,
    pending: Vec<Vec<(TimeInstant, TimeInstant)>>,
}

impl<'a> CoverageAccumulator<'a> {
    pub fn new(
        day_index: &'a DayIndex,
        channels: Vec<String>,
        expected_rate: f64,
        options: AggregationOptions,
    ) -> Self {
        let pending = vec![Vec::new(); channels.len()];
        Self {
            matrix: CoverageMatrix::new(day_index.len(), channels),
            day_index,
            expected_rate,
            options,
            pending,
        }
    }

    pub fn fold(&mut self, interval: &Interval) -> Result<Fold> {
        let column = self
            .matrix
            .column_of(&interval.channel)
            .ok_or_else(|| AvailError::UnknownChannel(interval.channel.clone()))?;

        if interval.stop < interval.start {
            return Err(AvailError::Parse(format!(
                "interval for {} stops before it starts",
                interval.channel
            )));
        }

        if (interval.sample_rate - self.expected_rate).abs() > self.options.rate_tolerance {
            return Ok(Fold::Skipped(SkipReason::RateMismatch {
                reported: interval.sample_rate,
                expected: self.expected_rate,
            }));
        }

        let seconds = interval.duration_secs();
        if seconds < self.options.min_duration_secs {
            return Ok(Fold::Skipped(SkipReason::TooShort { seconds }));
        }

        if self.options.overlap == OverlapPolicy::Merge {
            self.pending[column].push((interval.start, interval.stop));
            return Ok(Fold::Deferred);
        }

        let days = self.spread(column, interval.start, interval.stop)?;
        Ok(Fold::Applied { days })
    }

    /// Apply deferred merges and clamping, and hand back the matrix
    pub fn finish(mut self) -> Result<CoverageMatrix> {
        if self.options.overlap == OverlapPolicy::Merge {
            let pending = std::mem::take(&mut self.pending);
            for (column, spans) in pending.into_iter().enumerate() {
                for (start, stop) in merge_spans(spans) {
                    self.spread(column, start, stop)?;
                }
            }
        }

        if self.options.overlap == OverlapPolicy::Clamp {
            self.matrix.clamp_cells(1.0);
        }

        Ok(self.matrix)
    }

    fn spread(&mut self, column: usize, start: TimeInstant, stop: TimeInstant) -> Result<usize> {
        let spread = self.plan(start, stop)?;

        let (row, fraction) = spread.first;
        self.matrix.add(row, column, fraction);
        for row in spread.whole.clone() {
            self.matrix.add(row, column, 1.0);
        }
        if let Some((row, fraction)) = spread.last {
            self.matrix.add(row, column, fraction);
        }

        Ok(spread.rows())
    }

    fn plan(&self, start: TimeInstant, stop: TimeInstant) -> Result<Spread> {
        let day0 = truncate_to_day(start);
        let day1 = truncate_to_day(stop);
        let first_row = self.day_index.require(day0)?;

        if day0 == day1 {
            return Ok(Spread {
                first: (first_row, seconds_between(start, stop) / SECONDS_PER_DAY),
                whole: 0..0,
                last: None,
            });
        }

        let mut current = next_midnight(start);
        let first = (first_row, seconds_between(start, current) / SECONDS_PER_DAY);

        let whole_days = (stop - current).num_days();
        let whole = if whole_days > 0 {
            let row = self.day_index.require(current)?;
            let end = row + whole_days as usize;
            if end > self.day_index.len() {
                return Err(AvailError::OutOfWindow {
                    day: current + TimeDelta::days(whole_days - 1),
                });
            }
            current += TimeDelta::days(whole_days);
            row..end
        } else {
            0..0
        };

        // an interval ending exactly at midnight leaves nothing for its last day
        let remainder = seconds_between(current, stop);
        let last = if remainder > 0.0 {
            Some((self.day_index.require(current)?, remainder / SECONDS_PER_DAY))
        } else {
            None
        };

        Ok(Spread { first, whole, last })
    }
}

/// Sort spans and merge the ones that overlap or touch
fn merge_spans(mut spans: Vec<(TimeInstant, TimeInstant)>) -> Vec<(TimeInstant, TimeInstant)> {
    spans.sort_by_key(|&(start, _)| start);

    let mut merged: Vec<(TimeInstant, TimeInstant)> = Vec::with_capacity(spans.len());
    for (start, stop) in spans {
        match merged.last_mut() {
            Some((_, last_stop)) if start <= *last_stop => {
                *last_stop = (*last_stop).max(stop);
            }
            _ => merged.push((start, stop)),
        }
    }
    merged
}

/// Fold a whole sequence of intervals into a fresh coverage matrix.
///
/// Each interval is assigned to the column named by its channel. Fails with
/// `AvailError::OutOfWindow` as soon as an interval touches a day the index
/// does not contain.
pub fn compute_availability<'i, I>(
    intervals: I,
    day_index: &DayIndex,
    channels: &[String],
    expected_rate: f64,
    options: &AggregationOptions,
) -> Result<CoverageMatrix>
where
    I: IntoIterator<Item = &'i Interval>,
{
    let mut accumulator =
        CoverageAccumulator::new(day_index, channels.to_vec(), expected_rate, options.clone());

    for interval in intervals {
        accumulator.fold(interval)?;
    }

    accumulator.finish()
}
