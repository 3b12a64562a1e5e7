//! Flat tabular view over trials, for console summaries and plotting tools.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::Path;

use sx_types::{ParameterValue, SxError, SxResult};

/// One row per trial, one column per field. Missing cells are `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialsFrame {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<ParameterValue>>>,
}

impl TrialsFrame {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Append a row; short rows are padded with empty cells.
    pub fn push_row(&mut self, mut row: Vec<Option<ParameterValue>>) {
        row.resize(self.columns.len(), None);
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All cells of one column, top to bottom.
    pub fn column(&self, name: &str) -> Option<Vec<Option<&ParameterValue>>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().map(|row| row[idx].as_ref()).collect())
    }

    /// Numeric view of a column; non-numeric or empty cells become `None`.
    pub fn numeric_column(&self, name: &str) -> Option<Vec<Option<f64>>> {
        self.column(name)
            .map(|cells| cells.into_iter().map(|c| c.and_then(ParameterValue::as_f64)).collect())
    }

    pub fn to_csv_writer<W: Write>(&self, writer: W) -> SxResult<()> {
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record(&self.columns)
            .map_err(|e| SxError::Csv(e.to_string()))?;
        for row in &self.rows {
            let cells = row
                .iter()
                .map(|cell| cell.as_ref().map(ToString::to_string).unwrap_or_default());
            csv.write_record(cells)
                .map_err(|e| SxError::Csv(e.to_string()))?;
        }
        csv.flush()?;
        Ok(())
    }

    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> SxResult<()> {
        let file = std::fs::File::create(path)?;
        self.to_csv_writer(file)
    }
}

fn render(cell: &Option<ParameterValue>) -> String {
    match cell {
        Some(ParameterValue::Float(v)) => format!("{v:.4}"),
        Some(other) => other.to_string(),
        None => "-".to_string(),
    }
}

impl fmt::Display for TrialsFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|row| row.iter().map(render).collect())
            .collect();
        let widths: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, name)| {
                rendered
                    .iter()
                    .map(|row| row[i].len())
                    .fold(name.len(), usize::max)
            })
            .collect();

        let header: Vec<String> = self
            .columns
            .iter()
            .zip(&widths)
            .map(|(name, &w)| format!("{name:>w$}"))
            .collect();
        writeln!(f, "{}", header.join("  "))?;
        for row in &rendered {
            let line: Vec<String> = row
                .iter()
                .zip(&widths)
                .map(|(cell, &w)| format!("{cell:>w$}"))
                .collect();
            writeln!(f, "{}", line.join("  "))?;
        }
        Ok(())
    }
}
