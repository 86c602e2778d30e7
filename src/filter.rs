use crate::error::IbsError;
use crate::table::{Metric, SimilarityTable};
use log::warn;

/// What to do with rows whose groups arrive in non-canonical order
/// (`group.a > group.b`). `Reject` keeps one direction and drops the other,
/// which is lossless because the oracle emits both directions per pair;
/// `Swap` relabels instead, for oracles that emit a single direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CanonicalPolicy {
    #[default]
    Reject,
    Swap,
}

/// Row-admission configuration for one pipeline run.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Inclusive metric cutoff: rows pass when `value >= cutoff`.
    pub cutoff: f64,
    pub metric: Metric,
    pub exclude_self_pairs: bool,
    /// When set, rows involving this assembly (matched as the exact
    /// PanSN prefix `name#`) are rejected.
    pub exclude_reference: Option<String>,
    pub canonical: CanonicalPolicy,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            cutoff: 1.0,
            metric: Metric::Identity,
            exclude_self_pairs: true,
            exclude_reference: None,
            canonical: CanonicalPolicy::Reject,
        }
    }
}

/// A filtered, canonicalized pairwise row: the unit the segment accumulator
/// consumes. Invariants: `group_a != group_b` (when self-exclusion is on)
/// and `group_a <= group_b`.
#[derive(Debug, Clone, PartialEq)]
pub struct IbsRecord {
    pub chrom: String,
    pub start: u64,
    pub end: u64,
    pub group_a: String,
    pub group_b: String,
    pub metric_value: f64,
}

/// Apply the admission rules to one window's oracle response and project the
/// surviving rows to [`IbsRecord`]s. Column resolution happens once per
/// table; a missing required column is a schema violation and aborts the
/// whole run. Rows with unparsable numeric cells are skipped with a warning.
pub fn filter_table(
    table: &SimilarityTable,
    config: &FilterConfig,
) -> Result<Vec<IbsRecord>, IbsError> {
    let chrom_col = table.column("chrom")?;
    let start_col = table.column("start")?;
    let end_col = table.column("end")?;
    let group_a_col = table.column("group.a")?;
    let group_b_col = table.column("group.b")?;
    let metric_col = table.column(config.metric.column_name())?;

    let reference_prefix = config
        .exclude_reference
        .as_ref()
        .map(|name| format!("{name}#"));

    let mut records = Vec::new();
    for row in table.rows() {
        // NaN compares false against any cutoff, so a non-finite cell is
        // malformed data, not an admissible value
        let value = match row[metric_col].parse::<f64>() {
            Ok(v) if v.is_finite() => v,
            _ => {
                warn!(
                    "Skipping row with unusable {} '{}'",
                    config.metric.column_name(),
                    row[metric_col]
                );
                continue;
            }
        };
        if value < config.cutoff {
            continue;
        }

        let group_a = row[group_a_col].as_str();
        let group_b = row[group_b_col].as_str();

        if config.exclude_self_pairs && group_a == group_b {
            continue;
        }

        if let Some(prefix) = &reference_prefix {
            if group_a.starts_with(prefix.as_str()) || group_b.starts_with(prefix.as_str()) {
                continue;
            }
        }

        let (group_a, group_b) = if group_a <= group_b {
            (group_a.to_string(), group_b.to_string())
        } else {
            match config.canonical {
                CanonicalPolicy::Reject => continue,
                CanonicalPolicy::Swap => (group_b.to_string(), group_a.to_string()),
            }
        };

        let (start, end) = match (row[start_col].parse::<u64>(), row[end_col].parse::<u64>()) {
            (Ok(start), Ok(end)) if start >= 1 && end >= start => (start, end),
            _ => {
                warn!(
                    "Skipping row with malformed interval {}:{}-{}",
                    row[chrom_col], row[start_col], row[end_col]
                );
                continue;
            }
        };

        records.push(IbsRecord {
            chrom: row[chrom_col].clone(),
            start,
            end,
            group_a,
            group_b,
            metric_value: value,
        });
    }

    Ok(records)
}
