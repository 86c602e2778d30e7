use crate::error::IbsError;
use log::warn;

/// Similarity metric columns the oracle may emit. The column order in the
/// response is not guaranteed, so every lookup goes through the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Metric {
    Identity,
    Jaccard,
    Cosine,
    Dice,
}

impl Metric {
    pub fn column_name(&self) -> &'static str {
        match self {
            Metric::Identity => "estimated.identity",
            Metric::Jaccard => "jaccard.similarity",
            Metric::Cosine => "cosine.similarity",
            Metric::Dice => "dice.similarity",
        }
    }
}

/// One window's tab-separated oracle response: a header line and data rows,
/// kept as raw fields. Column semantics are resolved by name via
/// [`SimilarityTable::column`].
#[derive(Debug, Clone)]
pub struct SimilarityTable {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl SimilarityTable {
    /// Parse tab-separated text. The first non-empty line is the header.
    /// Rows with a field count different from the header are dropped with a
    /// warning; a missing header is a contract violation.
    pub fn parse(text: &str) -> Result<Self, IbsError> {
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());
        let header: Vec<String> = match lines.next() {
            Some(line) => line.split('\t').map(|s| s.to_string()).collect(),
            None => {
                return Err(IbsError::Schema {
                    column: "<empty response>".to_string(),
                })
            }
        };

        let mut rows = Vec::new();
        for line in lines {
            let fields: Vec<String> = line.split('\t').map(|s| s.to_string()).collect();
            if fields.len() != header.len() {
                warn!(
                    "Skipping row with {} fields (header has {}): {}",
                    fields.len(),
                    header.len(),
                    line
                );
                continue;
            }
            rows.push(fields);
        }

        Ok(SimilarityTable { header, rows })
    }

    /// Resolve a column index by name.
    pub fn column(&self, name: &str) -> Result<usize, IbsError> {
        self.header
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| IbsError::Schema {
                column: name.to_string(),
            })
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }
}
