use crate::filter::IbsRecord;
use rustc_hash::FxHashMap;
use std::cmp::Ordering;

/// A maximal merged run of windows over which one haplotype pair stayed at
/// or above the cutoff. `min_identity` is the lowest metric value observed
/// across the merged records, so collapsed output still carries a
/// conservative identity figure.
#[derive(Debug, Clone, PartialEq)]
pub struct IbsSegment {
    pub chrom: String,
    pub start: u64,
    pub end: u64,
    pub group_a: String,
    pub group_b: String,
    pub min_identity: f64,
}

impl IbsSegment {
    fn from_record(record: &IbsRecord) -> Self {
        IbsSegment {
            chrom: record.chrom.clone(),
            start: record.start,
            end: record.end,
            group_a: record.group_a.clone(),
            group_b: record.group_b.clone(),
            min_identity: record.metric_value,
        }
    }

    /// Merge predicate: same chromosome and pair, and the record starts at
    /// or before `end + 1`. The `+ 1` absorbs the seam between abutting
    /// windows, which always tile as `end + 1 == next.start`.
    fn can_absorb(&self, record: &IbsRecord) -> bool {
        self.chrom == record.chrom
            && self.group_a == record.group_a
            && self.group_b == record.group_b
            && record.start <= self.end + 1
    }

    fn absorb(&mut self, record: &IbsRecord) {
        self.end = self.end.max(record.end);
        self.min_identity = self.min_identity.min(record.metric_value);
    }
}

/// Ordering used for batch output and for the streaming end-of-input flush:
/// natural chromosome order, then pair, then start.
fn compare_keys(
    a: (&String, &String, &String, u64),
    b: (&String, &String, &String, u64),
) -> Ordering {
    natord::compare(a.0, b.0)
        .then_with(|| a.1.cmp(b.1))
        .then_with(|| a.2.cmp(b.2))
        .then_with(|| a.3.cmp(&b.3))
}

/// How the accumulator trades memory against latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum MergeMode {
    /// Collect everything, sort, then scan once. Correct under any input
    /// order; the default.
    #[default]
    Batch,
    /// Merge incrementally against the full open-segment set. Requires
    /// ascending-window input; emits each segment as soon as it closes, so
    /// emission order is closure order rather than fully sorted (remaining
    /// open segments are flushed in sorted order at end of input).
    Streaming,
}

/// Merges a stream of per-window records into maximal segments. Owns all
/// cross-window state in the pipeline; both modes yield the same segment set
/// for the same total record set.
pub struct SegmentAccumulator {
    mode: MergeMode,
    // streaming: one open segment per (chrom, pair) key
    open: FxHashMap<(String, String, String), IbsSegment>,
    // batch: the full record collection, sorted at finish
    pending: Vec<IbsRecord>,
}

impl SegmentAccumulator {
    pub fn new(mode: MergeMode) -> Self {
        SegmentAccumulator {
            mode,
            open: FxHashMap::default(),
            pending: Vec::new(),
        }
    }

    /// Ingest one record. In streaming mode this returns the segment the
    /// record closed, if any; a record touches only its own key, so at most
    /// one segment can close per push. Batch mode always returns None.
    pub fn push(&mut self, record: IbsRecord) -> Option<IbsSegment> {
        match self.mode {
            MergeMode::Batch => {
                self.pending.push(record);
                None
            }
            MergeMode::Streaming => {
                let key = (
                    record.chrom.clone(),
                    record.group_a.clone(),
                    record.group_b.clone(),
                );
                if let Some(open) = self.open.get_mut(&key) {
                    if open.can_absorb(&record) {
                        open.absorb(&record);
                        return None;
                    }
                }
                // non-mergeable: the displaced segment (if any) is closed
                self.open.insert(key, IbsSegment::from_record(&record))
            }
        }
    }

    /// Flush all remaining state and return the final segments, in sorted
    /// order (batch: the whole output; streaming: the still-open tail).
    pub fn finish(self) -> Vec<IbsSegment> {
        match self.mode {
            MergeMode::Batch => {
                let mut records = self.pending;
                records.sort_by(|a, b| {
                    compare_keys(
                        (&a.chrom, &a.group_a, &a.group_b, a.start),
                        (&b.chrom, &b.group_a, &b.group_b, b.start),
                    )
                });

                let mut segments = Vec::new();
                let mut open: Option<IbsSegment> = None;
                for record in &records {
                    match open.as_mut() {
                        Some(segment) if segment.can_absorb(record) => segment.absorb(record),
                        Some(_) => {
                            segments.push(open.take().unwrap());
                            open = Some(IbsSegment::from_record(record));
                        }
                        None => open = Some(IbsSegment::from_record(record)),
                    }
                }
                if let Some(segment) = open {
                    segments.push(segment);
                }
                segments
            }
            MergeMode::Streaming => {
                let mut segments: Vec<IbsSegment> = self.open.into_values().collect();
                segments.sort_by(|a, b| {
                    compare_keys(
                        (&a.chrom, &a.group_a, &a.group_b, a.start),
                        (&b.chrom, &b.group_a, &b.group_b, b.start),
                    )
                });
                segments
            }
        }
    }
}
