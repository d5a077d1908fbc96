//! monopix command-line interface.
//!
//! Analyses raw data files, prints file information and derives noisy-pixel
//! masks. Logging goes through `env_logger`; set `RUST_LOG` to change the
//! level (default `info`).
#![allow(
    clippy::uninlined_format_args,
    clippy::cast_precision_loss,
    clippy::too_many_lines
)]

use clap::{Args, Parser, Subcommand};

use monopix_algorithms::ClusterizerConfig;
use monopix_io::{
    analyze_files, noisy_pixels, AnalysisConfig, PixelMask, RawDataFile, RunDescription,
};
use monopix_raw::{
    interpret_source, scan_param_ranges, ChunkScheduler, EventBuilderConfig, InterpreterConfig,
    RawDataInterpreter, WordSource, DEFAULT_CHUNK_SIZE,
};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    MonopixIo(#[from] monopix_io::Error),

    #[error("raw data error: {0}")]
    Raw(#[from] monopix_raw::Error),

    #[error("core error: {0}")]
    Core(#[from] monopix_core::Error),

    #[error("{failed} of {total} files failed")]
    BatchFailed { failed: usize, total: usize },
}

/// Raw data interpretation, clustering and s-curve fitting for monolithic
/// pixel detectors.
#[derive(Parser)]
#[command(name = "monopix")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interpret raw data files; the run description `<stem>.json` must sit
    /// next to each file
    Analyze(AnalyzeArgs),

    /// Show the run description and scan parameter ranges of a raw file
    Info {
        /// Raw data file
        input: PathBuf,

        /// Run description (default: `<stem>.json`)
        #[arg(long)]
        run: Option<PathBuf>,
    },

    /// Write a mask of pixels with more than `min-occupancy` hits
    NoisyPixels {
        /// Raw data file
        input: PathBuf,

        /// Mask file to write
        #[arg(short, long)]
        output: PathBuf,

        /// Hits above which a pixel counts as noisy
        #[arg(long, default_value = "0")]
        min_occupancy: u64,

        /// Existing mask whose pixels are kept
        #[arg(long)]
        merge: Option<PathBuf>,

        /// Run description (default: `<stem>.json`)
        #[arg(long)]
        run: Option<PathBuf>,

        /// Raw words per chunk
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
    },
}

#[derive(Args)]
struct AnalyzeArgs {
    /// Raw data file(s)
    #[arg(required = true)]
    input: Vec<PathBuf>,

    /// Directory receiving the `<stem>_interpreted` output directories
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Raw words per chunk
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Do not write hits.csv
    #[arg(long)]
    no_hits: bool,

    /// Split hits into events at trigger words
    #[arg(long)]
    events: bool,

    /// Cluster hits (per event, or per timestamp without --events)
    #[arg(long)]
    cluster: bool,

    /// Timestamp units per event frame
    #[arg(long, default_value = "1")]
    frame_length: i64,

    /// ToT calibration CSV (`col,row,a,b,c`)
    #[arg(long)]
    calibration: Option<PathBuf>,

    /// Maximum column distance of connected hits
    #[arg(long, default_value = "5")]
    column_distance: u16,

    /// Maximum row distance of connected hits
    #[arg(long, default_value = "5")]
    row_distance: u16,

    /// Maximum frame distance of connected hits
    #[arg(long, default_value = "1")]
    frame_distance: u8,

    /// Smallest hit charge that is clustered
    #[arg(long, default_value = "0")]
    min_charge: u16,

    /// Hit charge limit (exclusive); 128 raw, 2048 with --calibration
    #[arg(long)]
    max_charge: Option<u16>,

    /// Also cluster repeated hits of a pixel inside one event
    #[arg(long)]
    keep_same_hits: bool,

    /// Skip the s-curve fit of threshold scans
    #[arg(long)]
    no_fit: bool,

    /// Also write `<stem>_interpreted.h5`
    #[cfg(feature = "hdf5")]
    #[arg(long)]
    hdf5: bool,
}

impl AnalyzeArgs {
    fn config(&self) -> AnalysisConfig {
        let base = if self.calibration.is_some() {
            ClusterizerConfig::calibrated()
        } else {
            ClusterizerConfig::new()
        };
        let mut clusterizer = base
            .with_column_cluster_distance(self.column_distance)
            .with_row_cluster_distance(self.row_distance)
            .with_frame_cluster_distance(self.frame_distance)
            .with_min_hit_charge(self.min_charge)
            .with_ignore_same_hits(!self.keep_same_hits);
        if let Some(max) = self.max_charge {
            clusterizer = clusterizer.with_max_hit_charge(max);
        }

        let mut config = AnalysisConfig::new()
            .with_chunk_size(self.chunk_size)
            .with_store_hits(!self.no_hits)
            .with_build_events(self.events)
            .with_cluster_hits(self.cluster)
            .with_event_builder(EventBuilderConfig::new().with_frame_length(self.frame_length))
            .with_clusterizer(clusterizer)
            .with_fit_scurves(!self.no_fit);
        if let Some(path) = &self.calibration {
            config = config.with_calibration_file(path);
        }
        if let Some(path) = &self.output {
            config = config.with_output_root(path);
        }
        #[cfg(feature = "hdf5")]
        {
            config = config.with_hdf5(self.hdf5);
        }
        config
    }
}

fn load_run(input: &Path, run: Option<&Path>) -> Result<RunDescription> {
    let path = run.map_or_else(|| RunDescription::default_path(input), Path::to_path_buf);
    Ok(RunDescription::load(path)?)
}

fn analyze(args: &AnalyzeArgs) -> Result<()> {
    let config = args.config();
    config.validate()?;

    let start = Instant::now();
    let results = analyze_files(&args.input, &config);
    let elapsed = start.elapsed();

    let mut failed = 0;
    for (path, result) in &results {
        match result {
            Ok(summary) => {
                println!("{}", path.display());
                println!("  output:   {}", summary.output_dir.display());
                println!("  hits:     {}", summary.hits);
                println!("  triggers: {}", summary.triggers);
                if args.cluster {
                    println!("  clusters: {}", summary.clusters);
                }
                if let Some(fit) = &summary.fit {
                    println!(
                        "  s-curves: {} fitted, {} failed",
                        fit.fitted_pixels, fit.failed_pixels
                    );
                    if let (Some(threshold), Some(noise)) = (fit.mean_threshold, fit.mean_noise) {
                        println!("  mean threshold {:.2}, mean noise {:.2}", threshold, noise);
                    }
                }
            }
            Err(e) => {
                failed += 1;
                println!("{}: FAILED ({})", path.display(), e);
            }
        }
    }
    println!(
        "Processed {} files in {:.2}s",
        results.len(),
        elapsed.as_secs_f64()
    );

    if failed > 0 {
        return Err(CliError::BatchFailed {
            failed,
            total: results.len(),
        });
    }
    Ok(())
}

fn info(input: &Path, run: Option<&Path>) -> Result<()> {
    let raw = RawDataFile::open(input)?;
    let run = load_run(input, run)?;

    println!("File: {}", input.display());
    println!(
        "Size: {} bytes ({:.2} MB)",
        raw.file_size(),
        raw.file_size() as f64 / 1_000_000.0
    );
    println!("Words: {}", raw.word_count());
    println!("Scan: {}", run.scan_id());
    println!("Trigger data format: {}", u8::from(run.tlu.data_format));
    println!("Meta data rows: {}", run.meta_data.len());

    let ranges = scan_param_ranges(&run.meta_data, raw.word_count())?;
    println!("Scan parameters: {}", run.n_scan_params());
    for range in &ranges {
        println!(
            "  {:>4}: words {}..{} ({})",
            range.scan_param_id,
            range.start,
            range.stop,
            range.len()
        );
    }
    match run.injection_levels() {
        Ok(Some(levels)) => println!("Injection levels: {:?}", levels),
        Ok(None) => {}
        Err(e) => println!("Injection levels: unavailable ({})", e),
    }
    if !run.chip_settings.is_empty() {
        println!(
            "Chip settings: {}",
            serde_json::Value::Object(run.chip_settings.clone())
        );
    }
    Ok(())
}

fn write_noisy_pixels(
    input: &Path,
    output: &Path,
    min_occupancy: u64,
    merge: Option<&Path>,
    run: Option<&Path>,
    chunk_size: usize,
) -> Result<()> {
    let raw = RawDataFile::open(input)?;
    let run = load_run(input, run)?;
    let mut scheduler = ChunkScheduler::new(&run.meta_data, raw.word_count(), chunk_size)?;
    let mut interpreter = RawDataInterpreter::new(
        InterpreterConfig::new()
            .with_chunk_size(chunk_size)
            .with_trigger_data_format(run.tlu.data_format)
            .with_n_scan_params(scheduler.n_scan_params()),
    )?;
    interpret_source(&raw, &mut scheduler, &mut interpreter, |_, _| {
        Ok::<(), monopix_raw::Error>(())
    })?;
    let output_histograms = interpreter.finalize().histograms;

    let mut mask = noisy_pixels(output_histograms.occupancy_sum().view(), min_occupancy);
    let found = mask.len();
    if let Some(path) = merge {
        let existing = PixelMask::load(path)?;
        mask.merge(&existing);
    }
    mask.save(
        output,
        &format!(
            "noisy pixels of {} (more than {} hits)",
            input.display(),
            min_occupancy
        ),
    )?;
    println!(
        "{} noisy pixels, {} masked in total, written to {}",
        found,
        mask.len(),
        output.display()
    );
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Analyze(args) => analyze(args),
        Commands::Info { input, run } => info(input, run.as_deref()),
        Commands::NoisyPixels {
            input,
            output,
            min_occupancy,
            merge,
            run,
            chunk_size,
        } => write_noisy_pixels(
            input,
            output,
            *min_occupancy,
            merge.as_deref(),
            run.as_deref(),
            *chunk_size,
        ),
    };
    if let Err(e) = &result {
        log::error!("{e}");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyze_args_to_config() {
        let cli = Cli::parse_from([
            "monopix",
            "analyze",
            "a.bin",
            "b.bin",
            "--events",
            "--cluster",
            "--no-hits",
            "--frame-length",
            "4",
            "--column-distance",
            "2",
            "--max-charge",
            "64",
        ]);
        let Commands::Analyze(args) = cli.command else {
            panic!("expected analyze");
        };
        assert_eq!(args.input.len(), 2);
        let config = args.config();
        assert!(config.build_events && config.cluster_hits && !config.store_hits);
        assert_eq!(config.event_builder.frame_length, 4);
        let clusterizer = config.clusterizer.unwrap();
        assert_eq!(clusterizer.column_cluster_distance, 2);
        assert_eq!(clusterizer.row_cluster_distance, 5);
        assert_eq!(clusterizer.max_hit_charge, 64);
        assert!(clusterizer.ignore_same_hits);
    }

    #[test]
    fn test_calibrated_charge_window() {
        let cli = Cli::parse_from(["monopix", "analyze", "a.bin", "--calibration", "cal.csv"]);
        let Commands::Analyze(args) = cli.command else {
            panic!("expected analyze");
        };
        let config = args.config();
        assert_eq!(config.calibration_file, Some(PathBuf::from("cal.csv")));
        assert_eq!(config.clusterizer.unwrap().max_hit_charge, 2048);
    }
}
