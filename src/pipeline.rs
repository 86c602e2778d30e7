use crate::error::IbsError;
use crate::filter::{filter_table, FilterConfig, IbsRecord};
use crate::merge::{IbsSegment, MergeMode, SegmentAccumulator};
use crate::oracle::SimilarityOracle;
use crate::region::{tile, Region};
use crate::table::Metric;
use log::{debug, info, warn};
use rayon::prelude::*;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

/// What a failed oracle call for one window does to the run. Skipping leaves
/// a gap in any segment spanning the failed window, so `Abort` is the
/// default. Schema violations abort under both policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum WindowFailurePolicy {
    #[default]
    Abort,
    Skip,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub window_size: u64,
    pub filter: FilterConfig,
    pub merge_mode: MergeMode,
    pub failure_policy: WindowFailurePolicy,
    /// When false, filtered records are written directly, one row per
    /// window per pair, without segment merging.
    pub collapse: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub windows_total: usize,
    pub windows_failed: usize,
    pub records_kept: usize,
    pub segments_emitted: usize,
}

/// Output header: fixed interval/pair columns plus the selected metric's
/// column name (the value is the segment minimum when collapsing, the row
/// value otherwise).
fn output_header(metric: Metric) -> String {
    format!("chrom\tstart\tend\tgroup.a\tgroup.b\t{}", metric.column_name())
}

/// Drive the full pipeline for one region: tile into windows, query the
/// oracle per window (fan out across a chunk with rayon, results restored to
/// window order), filter each response, and either merge into segments or
/// emit the filtered records as-is.
///
/// `cancel` is checked between oracle chunks; a raised flag stops the run
/// before the next window is queried.
pub fn run<W: Write>(
    region: &Region,
    config: &PipelineConfig,
    oracle: &dyn SimilarityOracle,
    sink: &mut W,
    cancel: Option<&AtomicBool>,
) -> Result<RunSummary, IbsError> {
    let windows = tile(region, config.window_size)?;
    info!(
        "Processing {} in {} windows of up to {} bp",
        region,
        windows.len(),
        config.window_size
    );

    let mut summary = RunSummary {
        windows_total: windows.len(),
        ..Default::default()
    };
    let mut accumulator = SegmentAccumulator::new(config.merge_mode);

    writeln!(sink, "{}", output_header(config.filter.metric))?;

    let chunk_size = rayon::current_num_threads().max(1);
    for chunk in windows.chunks(chunk_size) {
        if let Some(cancel) = cancel {
            if cancel.load(Ordering::Relaxed) {
                return Err(IbsError::Cancelled {
                    window: chunk[0].to_string(),
                });
            }
        }

        // Oracle calls are independent; order is restored by collect.
        let responses: Vec<_> = chunk.par_iter().map(|w| oracle.query(w)).collect();

        for (window, response) in chunk.iter().zip(responses) {
            let table = match response {
                Ok(table) => table,
                Err(e) if config.failure_policy == WindowFailurePolicy::Skip
                    && e.is_window_local() =>
                {
                    warn!("Skipping window {window}: {e}");
                    summary.windows_failed += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            // Schema errors here are fatal regardless of the window policy:
            // column identity is a contract, not a data anomaly.
            let records = filter_table(&table, &config.filter)?;
            debug!("Window {} kept {} rows", window, records.len());
            summary.records_kept += records.len();

            for record in records {
                if config.collapse {
                    if let Some(closed) = accumulator.push(record) {
                        write_segment(sink, &closed)?;
                        summary.segments_emitted += 1;
                    }
                } else {
                    write_record(sink, &record)?;
                }
            }
        }
    }

    if config.collapse {
        for segment in accumulator.finish() {
            write_segment(sink, &segment)?;
            summary.segments_emitted += 1;
        }
    }
    sink.flush()?;

    info!(
        "Done: {} windows ({} failed), {} rows kept, {} segments",
        summary.windows_total, summary.windows_failed, summary.records_kept, summary.segments_emitted
    );

    Ok(summary)
}

fn write_segment<W: Write>(sink: &mut W, segment: &IbsSegment) -> std::io::Result<()> {
    writeln!(
        sink,
        "{}\t{}\t{}\t{}\t{}\t{}",
        segment.chrom,
        segment.start,
        segment.end,
        segment.group_a,
        segment.group_b,
        format_value(segment.min_identity)
    )
}

fn write_record<W: Write>(sink: &mut W, record: &IbsRecord) -> std::io::Result<()> {
    writeln!(
        sink,
        "{}\t{}\t{}\t{}\t{}\t{}",
        record.chrom,
        record.start,
        record.end,
        record.group_a,
        record.group_b,
        format_value(record.metric_value)
    )
}

/// Fixed-precision float with trailing zeros trimmed, `1` not `1.0000000`.
fn format_value(value: f64) -> String {
    let formatted = format!("{value:.7}");
    let trimmed = formatted.trim_end_matches('0');
    trimmed.trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::SimilarityTable;
    use rustc_hash::FxHashMap;

    /// Scripted oracle: maps window start coordinates to canned responses.
    struct FakeOracle {
        responses: FxHashMap<u64, String>,
        fail_on: Option<u64>,
    }

    impl FakeOracle {
        fn new(responses: &[(u64, &str)]) -> Self {
            FakeOracle {
                responses: responses
                    .iter()
                    .map(|(start, text)| (*start, text.to_string()))
                    .collect(),
                fail_on: None,
            }
        }
    }

    impl SimilarityOracle for FakeOracle {
        fn query(&self, window: &Region) -> Result<SimilarityTable, IbsError> {
            if self.fail_on == Some(window.start) {
                return Err(IbsError::OracleInvocation {
                    window: window.to_string(),
                    reason: "scripted failure".to_string(),
                });
            }
            let text = self
                .responses
                .get(&window.start)
                .cloned()
                .unwrap_or_else(|| header_only());
            SimilarityTable::parse(&text).map_err(|_| IbsError::OracleInvocation {
                window: window.to_string(),
                reason: "no tabular output".to_string(),
            })
        }
    }

    fn header_only() -> String {
        "chrom\tstart\tend\tgroup.a\tgroup.b\testimated.identity\n".to_string()
    }

    fn rows(window: (u64, u64), pairs: &[(&str, &str, f64)]) -> String {
        let mut text = header_only();
        for (a, b, ident) in pairs {
            text.push_str(&format!(
                "chr20\t{}\t{}\t{}\t{}\t{}\n",
                window.0, window.1, a, b, ident
            ));
            // the oracle emits both directions of every pair
            text.push_str(&format!(
                "chr20\t{}\t{}\t{}\t{}\t{}\n",
                window.0, window.1, b, a, ident
            ));
        }
        text
    }

    fn config(cutoff: f64) -> PipelineConfig {
        PipelineConfig {
            window_size: 5000,
            filter: FilterConfig {
                cutoff,
                ..Default::default()
            },
            merge_mode: MergeMode::Batch,
            failure_policy: WindowFailurePolicy::Abort,
            collapse: true,
        }
    }

    fn run_to_string(
        region: &Region,
        config: &PipelineConfig,
        oracle: &FakeOracle,
    ) -> (RunSummary, String) {
        let mut out = Vec::new();
        let summary = run(region, config, oracle, &mut out, None).unwrap();
        (summary, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_three_window_scenario_chr20() {
        // window [1,5000]: (H1,H2) passes 0.95 cutoff, (H1,H3) does not;
        // window [5001,10000] extends (H1,H2); window [10001,15000] breaks it
        let oracle = FakeOracle::new(&[
            (1, &rows((1, 5000), &[("H1", "H2", 0.999), ("H1", "H3", 0.80)])),
            (5001, &rows((5001, 10000), &[("H1", "H2", 0.97)])),
            (10001, &rows((10001, 15000), &[("H1", "H2", 0.50)])),
        ]);
        let region = Region::new("chr20", 1, 15000).unwrap();
        let (summary, output) = run_to_string(&region, &config(0.95), &oracle);

        assert_eq!(summary.windows_total, 3);
        assert_eq!(summary.segments_emitted, 1);
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(
            lines[0],
            "chrom\tstart\tend\tgroup.a\tgroup.b\testimated.identity"
        );
        assert_eq!(lines[1], "chr20\t1\t10000\tH1\tH2\t0.97");
    }

    #[test]
    fn test_windowed_run_matches_unsplit_run() {
        // same pair above cutoff throughout; any window size must reproduce
        // the single unsplit segment
        let region = Region::new("chr20", 1, 12000).unwrap();
        for window_size in [1u64, 3000, 5000, 12000, 50000] {
            let windows = tile(&region, window_size).unwrap();
            let responses: Vec<(u64, String)> = windows
                .iter()
                .map(|w| (w.start, rows((w.start, w.end), &[("H1", "H2", 1.0)])))
                .collect();
            let oracle = FakeOracle::new(
                &responses
                    .iter()
                    .map(|(s, t)| (*s, t.as_str()))
                    .collect::<Vec<_>>(),
            );
            let mut cfg = config(1.0);
            cfg.window_size = window_size;
            let (summary, output) = run_to_string(&region, &cfg, &oracle);

            assert_eq!(summary.segments_emitted, 1, "window_size={window_size}");
            assert!(output.lines().nth(1).unwrap().starts_with("chr20\t1\t12000\tH1\tH2"));
        }
    }

    #[test]
    fn test_streaming_and_batch_emit_same_rows() {
        let oracle = FakeOracle::new(&[
            (1, &rows((1, 5000), &[("H1", "H2", 1.0), ("H2", "H3", 1.0)])),
            (5001, &rows((5001, 10000), &[("H1", "H2", 1.0)])),
        ]);
        let region = Region::new("chr20", 1, 10000).unwrap();

        let (_, batch) = run_to_string(&region, &config(1.0), &oracle);
        let mut streaming_cfg = config(1.0);
        streaming_cfg.merge_mode = MergeMode::Streaming;
        let (_, streaming) = run_to_string(&region, &streaming_cfg, &oracle);

        let mut batch_rows: Vec<&str> = batch.lines().skip(1).collect();
        let mut streaming_rows: Vec<&str> = streaming.lines().skip(1).collect();
        batch_rows.sort_unstable();
        streaming_rows.sort_unstable();
        assert_eq!(batch_rows, streaming_rows);
    }

    #[test]
    fn test_skip_policy_leaves_a_gap() {
        let mut oracle = FakeOracle::new(&[
            (1, &rows((1, 5000), &[("H1", "H2", 1.0)])),
            (5001, &rows((5001, 10000), &[("H1", "H2", 1.0)])),
            (10001, &rows((10001, 15000), &[("H1", "H2", 1.0)])),
        ]);
        oracle.fail_on = Some(5001);
        let region = Region::new("chr20", 1, 15000).unwrap();

        let mut cfg = config(1.0);
        cfg.failure_policy = WindowFailurePolicy::Skip;
        let (summary, output) = run_to_string(&region, &cfg, &oracle);

        assert_eq!(summary.windows_failed, 1);
        assert_eq!(summary.segments_emitted, 2);
        let lines: Vec<&str> = output.lines().collect();
        assert!(lines[1].starts_with("chr20\t1\t5000"));
        assert!(lines[2].starts_with("chr20\t10001\t15000"));
    }

    #[test]
    fn test_abort_policy_propagates_window_failure() {
        let mut oracle = FakeOracle::new(&[(1, &rows((1, 5000), &[("H1", "H2", 1.0)]))]);
        oracle.fail_on = Some(5001);
        let region = Region::new("chr20", 1, 10000).unwrap();

        let mut out = Vec::new();
        let result = run(&region, &config(1.0), &oracle, &mut out, None);
        assert!(matches!(result, Err(IbsError::OracleInvocation { .. })));
    }

    #[test]
    fn test_schema_error_is_fatal_even_under_skip() {
        let oracle = FakeOracle::new(&[(
            1,
            "chrom\tstart\tend\tgroup.a\tgroup.b\n\
             chr20\t1\t5000\tH1\tH2\n",
        )]);
        let region = Region::new("chr20", 1, 5000).unwrap();

        let mut cfg = config(1.0);
        cfg.failure_policy = WindowFailurePolicy::Skip;
        let mut out = Vec::new();
        let result = run(&region, &cfg, &oracle, &mut out, None);
        assert!(matches!(result, Err(IbsError::Schema { .. })));
    }

    #[test]
    fn test_no_collapse_emits_per_window_rows() {
        let oracle = FakeOracle::new(&[
            (1, &rows((1, 5000), &[("H1", "H2", 0.999)])),
            (5001, &rows((5001, 10000), &[("H1", "H2", 0.98)])),
        ]);
        let region = Region::new("chr20", 1, 10000).unwrap();

        let mut cfg = config(0.95);
        cfg.collapse = false;
        let (summary, output) = run_to_string(&region, &cfg, &oracle);

        assert_eq!(summary.segments_emitted, 0);
        assert_eq!(summary.records_kept, 2);
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines[1], "chr20\t1\t5000\tH1\tH2\t0.999");
        assert_eq!(lines[2], "chr20\t5001\t10000\tH1\tH2\t0.98");
    }

    #[test]
    fn test_cancellation_stops_before_next_chunk() {
        let oracle = FakeOracle::new(&[(1, &rows((1, 5000), &[("H1", "H2", 1.0)]))]);
        let region = Region::new("chr20", 1, 5000).unwrap();
        let cancel = AtomicBool::new(true);

        let mut out = Vec::new();
        let result = run(&region, &config(1.0), &oracle, &mut out, Some(&cancel));
        assert!(matches!(result, Err(IbsError::Cancelled { .. })));
    }

    #[test]
    fn test_header_names_selected_metric() {
        let oracle = FakeOracle::new(&[(
            1,
            "chrom\tstart\tend\tgroup.a\tgroup.b\tjaccard.similarity\n\
             chr20\t1\t5000\tH1\tH2\t0.9\n",
        )]);
        let region = Region::new("chr20", 1, 5000).unwrap();

        let mut cfg = config(0.5);
        cfg.filter.metric = Metric::Jaccard;
        let (_, output) = run_to_string(&region, &cfg, &oracle);

        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(
            lines[0],
            "chrom\tstart\tend\tgroup.a\tgroup.b\tjaccard.similarity"
        );
        assert_eq!(lines[1], "chr20\t1\t5000\tH1\tH2\t0.9");
    }

    #[test]
    fn test_format_value_trims_trailing_zeros() {
        assert_eq!(format_value(1.0), "1");
        assert_eq!(format_value(0.97), "0.97");
        assert_eq!(format_value(0.1234567), "0.1234567");
    }
}
