use std::io::Write;

use anyhow::{Context, Result};
use serde::Deserialize;

use sinktap_types::MatchedLine;

/// How matched lines are rendered
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One human readable sentence per line
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Writes matched lines to a sink, one record per line
pub struct LineWriter<W: Write> {
    writer: W,
    format: OutputFormat,
}

impl<W: Write> LineWriter<W> {
    pub fn new(writer: W, format: OutputFormat) -> Self {
        Self { writer, format }
    }

    pub fn write_line(&mut self, line: &MatchedLine) -> Result<()> {
        match self.format {
            OutputFormat::Text => writeln!(self.writer, "{}", line)?,
            OutputFormat::Json => {
                serde_json::to_writer(&mut self.writer, line)
                    .context("Failed to serialize matched line")?;
                writeln!(self.writer)?;
            }
        }
        // Keep output live when piped
        self.writer.flush()?;
        Ok(())
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.writer
    }
}
