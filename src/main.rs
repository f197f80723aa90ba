//! mutprofiler: gene-level annotation of breseq variant calls and
//! cross-sample mutation profiling.
//!
//! Two-stage batch workflow:
//! 1. `annotate` — resolve each called mutation in a breseq output directory
//!    to its coding feature, classify it, and write one annotated CSV per
//!    sample.
//! 2. `combine` — merge a directory of annotated CSVs into a concatenated
//!    detail table and a locus-by-sample mutation matrix.

use anyhow::{ensure, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use log::info;
use std::fs;
use std::path::PathBuf;

mod annotate;
mod combine;
mod gd;
mod genbank;
mod gff;
mod stats;

use crate::annotate::Annotator;
use crate::gd::Mode;
use crate::genbank::LocusMap;
use crate::gff::FeatureIndex;
use crate::stats::RunStats;

/// Annotate breseq variant calls and build cross-sample mutation profiles
#[derive(Parser, Debug)]
#[command(name = "mutprofiler")]
#[command(version)]
#[command(about = "Gene-level annotation of breseq variant calls and cross-sample mutation profiling")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Annotate one breseq output directory into a per-sample CSV
    Annotate(AnnotateArgs),

    /// Combine per-sample CSVs into detail and matrix summaries
    Combine(CombineArgs),
}

#[derive(Parser, Debug)]
struct AnnotateArgs {
    /// breseq output directory (expects data/reference.gff3 and data/annotated.gd)
    #[arg(short, long)]
    breseq_dir: PathBuf,

    /// Output directory for the per-sample annotated CSV
    #[arg(short, long)]
    output: PathBuf,

    /// GenBank flat file supplying legacy (old) locus tags
    #[arg(long)]
    genbank: Option<PathBuf>,

    /// The breseq run used this external GFF annotation; gene/product become
    /// placeholders and only the interval index is consulted
    #[arg(long)]
    gff: Option<PathBuf>,

    /// breseq run mode
    #[arg(short, long, value_enum, default_value_t = Mode::Clone)]
    mode: Mode,

    /// Write a JSON run summary to this path
    #[arg(long)]
    stats: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct CombineArgs {
    /// Directory holding the per-sample annotated CSVs; outputs land here too
    #[arg(short, long)]
    input: PathBuf,

    /// Mode the samples were annotated with
    #[arg(short, long, value_enum, default_value_t = Mode::Clone)]
    mode: Mode,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Annotate(args)) => run_annotate(args),
        Some(Commands::Combine(args)) => run_combine(args),
        None => {
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();
}

fn run_annotate(args: AnnotateArgs) -> Result<()> {
    init_logging(args.verbose);
    info!("mutprofiler annotate v{}", env!("CARGO_PKG_VERSION"));

    let gff_path = args.breseq_dir.join("data").join("reference.gff3");
    let gd_path = args.breseq_dir.join("data").join("annotated.gd");

    // Required references must all be present before anything is written.
    ensure!(
        gff_path.is_file(),
        "Reference annotation not found: {}",
        gff_path.display()
    );
    ensure!(
        gd_path.is_file(),
        "Genome diff not found: {}",
        gd_path.display()
    );
    if let Some(path) = &args.gff {
        ensure!(
            path.is_file(),
            "External GFF not found: {}",
            path.display()
        );
    }

    let external_annotation = args.gff.is_some();
    let index = FeatureIndex::from_file(&gff_path, external_annotation)?;

    // Legacy locus tags only apply when the run used the bundled annotation.
    let loci = match (&args.genbank, external_annotation) {
        (Some(path), false) => LocusMap::from_file(path)?,
        _ => LocusMap::default(),
    };

    if loci.is_empty() {
        info!("No legacy locus tags loaded; the old_locus column will be '-'");
    }

    let table = gd::load_gd(&gd_path, args.mode)?;
    if table.is_empty() {
        log::warn!("No records parsed from {}", gd_path.display());
    }

    let sample = args
        .breseq_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "sample".to_string());

    let annotator = Annotator::new(args.breseq_dir.display().to_string(), &index, &loci);
    let mut run_stats = RunStats::new(sample.clone());
    let rows = annotator.annotate_table(&table, &mut run_stats);

    fs::create_dir_all(&args.output)
        .with_context(|| format!("Failed to create output directory: {}", args.output.display()))?;
    let out_path = args.output.join(format!("{sample}.csv"));
    annotate::write_sample_csv(&out_path, &rows)?;

    if let Some(path) = &args.stats {
        run_stats.save(path)?;
        info!("Run summary written to {}", path.display());
    }

    Ok(())
}

fn run_combine(args: CombineArgs) -> Result<()> {
    init_logging(args.verbose);
    info!("mutprofiler combine v{}", env!("CARGO_PKG_VERSION"));

    ensure!(
        args.input.is_dir(),
        "Input directory not found: {}",
        args.input.display()
    );

    combine::run(&args.input, args.mode)
}
