use clap::Parser;
use ibseg::error::IbsError;
use ibseg::filter::{CanonicalPolicy, FilterConfig};
use ibseg::merge::MergeMode;
use ibseg::oracle::{ImpgOracle, OracleConfig};
use ibseg::pipeline::{self, PipelineConfig, WindowFailurePolicy};
use ibseg::region::parse_region;
use ibseg::table::Metric;
use log::{error, info};
use rayon::ThreadPoolBuilder;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::num::NonZeroUsize;
use std::time::Duration;

/// Call identity-by-state segments across a reference window grid by
/// driving an external pairwise-similarity oracle.
#[derive(Parser, Debug)]
#[command(author, version, about, disable_help_subcommand = true)]
struct Args {
    /// Reference assembly name used for region labels and reference-pair
    /// exclusion (e.g. CHM13)
    #[clap(short = 'R', long, value_parser)]
    reference: String,

    /// Region as `chrom:start-end` (1-based inclusive), or a bare
    /// chromosome name together with --chrom-length
    #[clap(short = 'r', long, value_parser)]
    region: String,

    /// Total chromosome length, required when --region is a bare name
    #[clap(long, value_parser)]
    chrom_length: Option<u64>,

    /// Window size in bp for per-window oracle queries
    #[clap(short = 'w', long, value_parser, default_value_t = 5000)]
    window_size: u64,

    /// Alignment/sequence source passed to the oracle
    #[clap(short = 'p', long, value_parser)]
    sequence_source: String,

    /// Path to a list of haplotype names to restrict comparisons to
    #[clap(short = 's', long, value_parser)]
    subset: Option<String>,

    /// Output TSV path; stdout when omitted
    #[clap(short = 'o', long, value_parser)]
    output: Option<String>,

    /// Inclusive identity cutoff for keeping a pairwise row
    #[clap(short = 'c', long, value_parser, default_value_t = 1.0)]
    min_identity: f64,

    /// Similarity column used for the cutoff
    #[clap(long, value_enum, default_value = "identity")]
    metric: Metric,

    /// Emit filtered per-window rows without merging them into segments
    #[clap(long, action)]
    no_collapse: bool,

    /// Keep rows comparing a haplotype against itself
    #[clap(long, action)]
    keep_self_pairs: bool,

    /// Keep rows involving the reference assembly
    #[clap(long, action)]
    keep_reference_pairs: bool,

    /// Handling of rows with group.a > group.b
    #[clap(long, value_enum, default_value = "reject")]
    canonical_policy: CanonicalPolicy,

    /// Segment merging strategy
    #[clap(long, value_enum, default_value = "batch")]
    merge_mode: MergeMode,

    /// Skip windows whose oracle call fails instead of aborting the run
    #[clap(long, action)]
    skip_failed_windows: bool,

    /// Pass the oracle's large-region override
    #[clap(long, action)]
    force_large: bool,

    /// Oracle program name or path
    #[clap(long, value_parser, default_value = "impg")]
    oracle_bin: String,

    /// Haplotype index of the reference in PanSN region labels
    #[clap(long, value_parser, default_value_t = 0)]
    hap_index: u32,

    /// Per-window oracle timeout in seconds (no limit when omitted)
    #[clap(long, value_parser)]
    timeout_secs: Option<u64>,

    /// Number of threads for parallel oracle queries
    #[clap(short = 't', long, value_parser, default_value_t = NonZeroUsize::new(4).unwrap())]
    num_threads: NonZeroUsize,

    /// Verbosity level (0 = error, 1 = info, 2 = debug)
    #[clap(short, long, default_value = "0")]
    verbose: u8,
}

fn main() {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(match args.verbose {
            0 => log::LevelFilter::Error,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .init();

    if let Err(e) = run(args) {
        error!("{e}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), IbsError> {
    ThreadPoolBuilder::new()
        .num_threads(args.num_threads.into())
        .build_global()
        .map_err(|e| IbsError::Config(format!("failed to build thread pool: {e}")))?;

    let region = parse_region(&args.region, args.chrom_length)?;

    let config = PipelineConfig {
        window_size: args.window_size,
        filter: FilterConfig {
            cutoff: args.min_identity,
            metric: args.metric,
            exclude_self_pairs: !args.keep_self_pairs,
            exclude_reference: if args.keep_reference_pairs {
                None
            } else {
                Some(args.reference.clone())
            },
            canonical: args.canonical_policy,
        },
        merge_mode: args.merge_mode,
        failure_policy: if args.skip_failed_windows {
            WindowFailurePolicy::Skip
        } else {
            WindowFailurePolicy::Abort
        },
        collapse: !args.no_collapse,
    };

    let oracle = ImpgOracle::new(OracleConfig {
        bin: args.oracle_bin,
        sequence_source: args.sequence_source,
        subset_list: args.subset,
        reference: args.reference,
        hap_index: args.hap_index,
        force_large: args.force_large,
        timeout: args.timeout_secs.map(Duration::from_secs),
    });

    let summary = match &args.output {
        Some(path) => {
            let file = File::create(path).map_err(|e| {
                IbsError::Config(format!("cannot create output file '{path}': {e}"))
            })?;
            let mut writer = BufWriter::new(file);
            pipeline::run(&region, &config, &oracle, &mut writer, None)?
        }
        None => {
            let stdout = io::stdout();
            let mut writer = BufWriter::new(stdout.lock());
            let summary = pipeline::run(&region, &config, &oracle, &mut writer, None)?;
            writer.flush()?;
            summary
        }
    };

    info!(
        "Processed {} windows ({} skipped), emitted {} segments",
        summary.windows_total, summary.windows_failed, summary.segments_emitted
    );

    Ok(())
}
