//! Report file output

use crate::errors::Result;
use crate::stations::ChannelKey;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

/// Availability totals for one station, in covered days per channel key
#[derive(Debug, Clone, PartialEq)]
pub struct StationLine {
    pub network: String,
    pub station: String,
    pub channels: Vec<(ChannelKey, f64)>,
}

impl fmt::Display for StationLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} | ", self.network, self.station)?;
        for (key, total_days) in &self.channels {
            write!(f, "{}={:.4} ", key, total_days)?;
        }
        writeln!(f)
    }
}

/// Append-only writer holding the report file open for the whole run
pub struct ReportWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    lines: usize,
}

impl ReportWriter {
    /// Create (or truncate) the report file
    pub async fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).await?;
        debug!("Opened report file {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            lines: 0,
        })
    }

    /// Append one station line and flush it to disk
    pub async fn write_station(&mut self, line: &StationLine) -> Result<()> {
        self.writer.write_all(line.to_string().as_bytes()).await?;
        self.writer.flush().await?;
        self.lines += 1;
        Ok(())
    }

    pub fn lines_written(&self) -> usize {
        self.lines
    }

    /// Flush and close the file
    pub async fn finish(mut self) -> Result<PathBuf> {
        self.writer.flush().await?;
        self.writer.into_inner().sync_all().await?;
        Ok(self.path)
    }
}
