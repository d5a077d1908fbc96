//! Per-file analysis pipeline and batch driver.
//!
//! One raw file is read in chunks, interpreted into hits, optionally built
//! into events and clustered, and every table is streamed to the output
//! directory as it is produced. Histograms, s-curve maps and a JSON summary
//! are written at the end.

use crate::reader::RawDataFile;
use crate::run::RunDescription;
use crate::writer::{
    write_array, CsvTableWriter, OutputDirectory, CHI2_MAP_BIN, CLUSTERS_CSV, EVENTS_CSV,
    HIST_CLUSTER_CHARGE_BIN, HIST_CLUSTER_SHAPE_BIN, HIST_CLUSTER_SIZE_BIN, HIST_OCC_BIN,
    HIST_TDC_BIN, HIST_TOT_BIN, HITS_CSV, NOISE_MAP_BIN, SUMMARY_JSON, THRESHOLD_MAP_BIN,
};
use crate::{Error, Result};
use monopix_algorithms::{fit_scurves, Clusterizer, ClusterizerConfig, ScurveMaps, TotCalibration};
use monopix_core::{
    ClusterBatch, ClusterHistograms, ClusteringStatistics, EventBatch, HitBatch,
    PixelHistograms,
};
use monopix_raw::{
    build_events, hits_as_events, interpret_source, ChunkScheduler, EventBuilderConfig,
    EventState, InterpreterConfig, InterpreterStatistics, RawDataInterpreter, WordSource,
    DEFAULT_CHUNK_SIZE,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[cfg(feature = "hdf5")]
use crate::hdf5::{Hdf5Output, Hdf5TableWriter, Hdf5WriteOptions};

/// Options of the analysis chain.
#[derive(Debug, Clone, PartialEq)]
#[allow(clippy::struct_excessive_bools)]
pub struct AnalysisConfig {
    /// Raw words per chunk.
    pub chunk_size: usize,
    /// Write `hits.csv`.
    pub store_hits: bool,
    /// Split hits at trigger words; otherwise hits sharing a timestamp form
    /// an event.
    pub build_events: bool,
    pub cluster_hits: bool,
    pub event_builder: EventBuilderConfig,
    /// Defaults to the raw or calibrated preset depending on `calibration_file`.
    pub clusterizer: Option<ClusterizerConfig>,
    /// `col,row,a,b,c` ToT calibration table.
    pub calibration_file: Option<PathBuf>,
    /// Parent of the per-file output directories; defaults to the raw file's
    /// directory.
    pub output_root: Option<PathBuf>,
    /// Fit s-curves for threshold scans.
    pub fit_scurves: bool,
    /// Also write everything to `<stem>_interpreted.h5`.
    #[cfg(feature = "hdf5")]
    pub write_hdf5: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            store_hits: true,
            build_events: false,
            cluster_hits: false,
            event_builder: EventBuilderConfig::default(),
            clusterizer: None,
            calibration_file: None,
            output_root: None,
            fit_scurves: true,
            #[cfg(feature = "hdf5")]
            write_hdf5: false,
        }
    }
}

impl AnalysisConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    #[must_use]
    pub fn with_store_hits(mut self, store_hits: bool) -> Self {
        self.store_hits = store_hits;
        self
    }

    #[must_use]
    pub fn with_build_events(mut self, build_events: bool) -> Self {
        self.build_events = build_events;
        self
    }

    #[must_use]
    pub fn with_cluster_hits(mut self, cluster_hits: bool) -> Self {
        self.cluster_hits = cluster_hits;
        self
    }

    #[must_use]
    pub fn with_event_builder(mut self, config: EventBuilderConfig) -> Self {
        self.event_builder = config;
        self
    }

    #[must_use]
    pub fn with_clusterizer(mut self, config: ClusterizerConfig) -> Self {
        self.clusterizer = Some(config);
        self
    }

    #[must_use]
    pub fn with_calibration_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.calibration_file = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_output_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_root = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_fit_scurves(mut self, fit: bool) -> Self {
        self.fit_scurves = fit;
        self
    }

    #[cfg(feature = "hdf5")]
    #[must_use]
    pub fn with_hdf5(mut self, write_hdf5: bool) -> Self {
        self.write_hdf5 = write_hdf5;
        self
    }

    /// Output directory for `raw_path`.
    #[must_use]
    pub fn output_dir(&self, raw_path: &Path) -> PathBuf {
        let root = self.output_root.clone().unwrap_or_else(|| {
            raw_path
                .parent()
                .map_or_else(PathBuf::new, Path::to_path_buf)
        });
        root.join(OutputDirectory::default_name(raw_path))
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error for a zero chunk size or invalid stage settings.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidFormat("chunk_size must be > 0".into()));
        }
        self.event_builder.validate()?;
        if let Some(config) = &self.clusterizer {
            config.validate()?;
        }
        Ok(())
    }
}

/// Summary of the s-curve fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitSummary {
    pub injection_levels: Vec<f64>,
    pub n_injections: u32,
    pub fitted_pixels: usize,
    pub failed_pixels: usize,
    /// Mean over fitted pixels, `None` if no pixel was fitted.
    pub mean_threshold: Option<f64>,
    pub mean_noise: Option<f64>,
}

impl FitSummary {
    fn new(maps: &ScurveMaps, injection_levels: Vec<f64>, n_injections: u32) -> Self {
        let fitted: Vec<(f64, f64)> = maps
            .threshold
            .iter()
            .zip(maps.noise.iter())
            .filter(|&(&t, _)| t != monopix_algorithms::FIT_SENTINEL)
            .map(|(&t, &n)| (t, n))
            .collect();
        let n = fitted.len();
        let mean = |sum: f64| (n > 0).then(|| sum / n as f64);
        Self {
            mean_threshold: mean(fitted.iter().map(|f| f.0).sum()),
            mean_noise: mean(fitted.iter().map(|f| f.1).sum()),
            fitted_pixels: n,
            failed_pixels: maps.failed,
            injection_levels,
            n_injections,
        }
    }
}

/// Everything `summary.json` records about one analysed file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub raw_file: PathBuf,
    pub output_dir: PathBuf,
    pub scan_id: String,
    pub words: usize,
    pub interpreted_words: usize,
    pub n_scan_params: usize,
    pub hits: u64,
    pub triggers: u64,
    pub event_hits: u64,
    pub hits_before_first_trigger: u64,
    pub clusters: u64,
    pub uncalibrated_hits: u64,
    pub rolled_back_words: u64,
    pub interpreter: InterpreterStatistics,
    pub clustering: ClusteringStatistics,
    pub occupancy_shape: Vec<usize>,
    pub tot_shape: Vec<usize>,
    pub tdc_shape: Vec<usize>,
    pub cluster_charge_bins: usize,
    pub fit: Option<FitSummary>,
}

/// Results held in memory after a file has been analysed.
#[derive(Debug, Clone)]
pub struct AnalysisOutput {
    pub summary: AnalysisSummary,
    pub histograms: PixelHistograms,
    pub cluster_histograms: Option<ClusterHistograms>,
    pub scurves: Option<ScurveMaps>,
}

/// Table sinks of one file.
struct TableSinks {
    hits: Option<CsvTableWriter<HitBatch>>,
    events: Option<CsvTableWriter<EventBatch>>,
    clusters: Option<CsvTableWriter<ClusterBatch>>,
    #[cfg(feature = "hdf5")]
    hdf5: Option<Hdf5Tables>,
}

#[cfg(feature = "hdf5")]
struct Hdf5Tables {
    output: Hdf5Output,
    hits: Option<Hdf5TableWriter<HitBatch>>,
    events: Option<Hdf5TableWriter<EventBatch>>,
    clusters: Option<Hdf5TableWriter<ClusterBatch>>,
}

impl TableSinks {
    fn create(config: &AnalysisConfig, out: &OutputDirectory) -> Result<Self> {
        let hits = config
            .store_hits
            .then(|| CsvTableWriter::create(out.path(HITS_CSV)))
            .transpose()?;
        let events = (config.build_events || config.cluster_hits)
            .then(|| CsvTableWriter::create(out.path(EVENTS_CSV)))
            .transpose()?;
        let clusters = config
            .cluster_hits
            .then(|| CsvTableWriter::create(out.path(CLUSTERS_CSV)))
            .transpose()?;
        Ok(Self {
            hits,
            events,
            clusters,
            #[cfg(feature = "hdf5")]
            hdf5: Self::create_hdf5(config, out)?,
        })
    }

    #[cfg(feature = "hdf5")]
    fn create_hdf5(config: &AnalysisConfig, out: &OutputDirectory) -> Result<Option<Hdf5Tables>> {
        if !config.write_hdf5 {
            return Ok(None);
        }
        let name = out
            .root()
            .file_name()
            .map_or_else(|| "interpreted".into(), |n| n.to_string_lossy().into_owned());
        let output = Hdf5Output::create(out.path(&format!("{name}.h5")), Hdf5WriteOptions::default())?;
        Ok(Some(Hdf5Tables {
            hits: config.store_hits.then(|| output.table()).transpose()?,
            events: (config.build_events || config.cluster_hits)
                .then(|| output.table())
                .transpose()?,
            clusters: config.cluster_hits.then(|| output.table()).transpose()?,
            output,
        }))
    }

    fn write_hits(&mut self, hits: &HitBatch) -> Result<()> {
        if let Some(writer) = &mut self.hits {
            writer.append(hits)?;
        }
        #[cfg(feature = "hdf5")]
        if let Some(table) = self.hdf5.as_mut().and_then(|h| h.hits.as_mut()) {
            table.append(hits)?;
        }
        Ok(())
    }

    fn write_events(&mut self, events: &EventBatch) -> Result<()> {
        if let Some(writer) = &mut self.events {
            writer.append(events)?;
        }
        #[cfg(feature = "hdf5")]
        if let Some(table) = self.hdf5.as_mut().and_then(|h| h.events.as_mut()) {
            table.append(events)?;
        }
        Ok(())
    }

    fn write_clusters(&mut self, clusters: &ClusterBatch) -> Result<()> {
        if let Some(writer) = &mut self.clusters {
            writer.append(clusters)?;
        }
        #[cfg(feature = "hdf5")]
        if let Some(table) = self.hdf5.as_mut().and_then(|h| h.clusters.as_mut()) {
            table.append(clusters)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(writer) = &mut self.hits {
            writer.flush()?;
        }
        if let Some(writer) = &mut self.events {
            writer.flush()?;
        }
        if let Some(writer) = &mut self.clusters {
            writer.flush()?;
        }
        Ok(())
    }
}

/// Per-chunk stages after interpretation.
struct ChunkStages {
    event_config: EventBuilderConfig,
    build_events: bool,
    event_state: EventState,
    clusterizer: Option<Clusterizer>,
    hits: u64,
    triggers: u64,
    event_hits: u64,
}

impl ChunkStages {
    fn process(&mut self, hits: &HitBatch, is_final: bool, sinks: &mut TableSinks) -> Result<()> {
        let triggers = hits.trigger_count();
        self.triggers += triggers as u64;
        self.hits += (hits.len() - triggers) as u64;
        sinks.write_hits(hits)?;

        let cluster_stage = self.clusterizer.is_some();
        if !self.build_events && !cluster_stage {
            return Ok(());
        }
        let events = if self.build_events {
            let (events, state) = build_events(hits, self.event_state, &self.event_config)?;
            self.event_state = state;
            events
        } else {
            hits_as_events(hits)
        };

        let events = match &mut self.clusterizer {
            Some(clusterizer) => {
                let (events, clusters) = clusterizer.cluster_chunk(events, is_final);
                sinks.write_clusters(&clusters)?;
                events
            }
            None => events,
        };
        self.event_hits += events.len() as u64;
        sinks.write_events(&events)
    }
}

/// Analyses one raw file whose run description sits next to it.
///
/// # Errors
/// See [`analyze_file_with_run`].
pub fn analyze_file(raw_path: &Path, config: &AnalysisConfig) -> Result<AnalysisOutput> {
    let run = RunDescription::load(RunDescription::default_path(raw_path))?;
    analyze_file_with_run(raw_path, &run, config)
}

/// Analyses one raw file with the given run description.
///
/// Tables written before a failure are flushed and kept.
///
/// # Errors
/// Returns an error for missing or malformed inputs, corrupt meta data,
/// missing trigger words when events are built, and failed writes.
#[allow(clippy::too_many_lines)]
pub fn analyze_file_with_run(
    raw_path: &Path,
    run: &RunDescription,
    config: &AnalysisConfig,
) -> Result<AnalysisOutput> {
    config.validate()?;
    let raw = RawDataFile::open(raw_path)?;
    let out = OutputDirectory::create(config.output_dir(raw_path))?;
    log::info!(
        "analysing {} ({} words, scan {:?}) into {}",
        raw_path.display(),
        raw.word_count(),
        run.scan_id(),
        out.root().display()
    );
    if run.meta_data.is_empty() {
        log::warn!("{}: run description has no meta data", raw_path.display());
    }

    let mut scheduler = ChunkScheduler::new(&run.meta_data, raw.word_count(), config.chunk_size)?;
    let interpreted_words = scheduler.total_words();
    let n_scan_params = scheduler.n_scan_params();
    let mut interpreter = RawDataInterpreter::new(
        InterpreterConfig::new()
            .with_chunk_size(config.chunk_size)
            .with_trigger_data_format(run.tlu.data_format)
            .with_n_scan_params(n_scan_params),
    )?;

    let clusterizer = if config.cluster_hits {
        Some(build_clusterizer(config)?)
    } else {
        None
    };
    let mut stages = ChunkStages {
        event_config: config.event_builder,
        build_events: config.build_events,
        event_state: EventState::default(),
        clusterizer,
        hits: 0,
        triggers: 0,
        event_hits: 0,
    };
    let mut sinks = TableSinks::create(config, &out)?;

    let result = interpret_source(&raw, &mut scheduler, &mut interpreter, |span, hits| {
        stages.process(hits, span.is_final, &mut sinks)
    });
    sinks.flush()?;
    if let Err(e) = result {
        if matches!(e, Error::RawError(monopix_raw::Error::NoTriggerData { .. })) {
            log::error!(
                "{}: no trigger words found; check the data or disable event building",
                raw_path.display()
            );
        }
        return Err(e);
    }

    let rolled_back_words = interpreter.rolled_back_words();
    let output = interpreter.finalize();
    let histograms = output.histograms;
    write_array(out.path(HIST_OCC_BIN), histograms.occupancy.view())?;
    write_array(out.path(HIST_TOT_BIN), histograms.tot.view())?;
    write_array(out.path(HIST_TDC_BIN), histograms.tdc.view())?;

    let (uncalibrated_hits, cluster_parts) = match stages.clusterizer.take() {
        Some(clusterizer) => {
            let uncalibrated = clusterizer.uncalibrated_hits();
            (uncalibrated, Some(clusterizer.into_parts()))
        }
        None => (0, None),
    };
    if let Some((cluster_hist, _)) = &cluster_parts {
        write_array(out.path(HIST_CLUSTER_SIZE_BIN), cluster_hist.size.view())?;
        write_array(out.path(HIST_CLUSTER_CHARGE_BIN), cluster_hist.charge.view())?;
        write_array(out.path(HIST_CLUSTER_SHAPE_BIN), cluster_hist.shape.view())?;
    }

    let scurves = if config.fit_scurves && run.is_threshold_scan() {
        Some(fit_threshold_scan(run, &histograms)?)
    } else {
        None
    };
    if let Some((maps, _)) = &scurves {
        write_array(out.path(THRESHOLD_MAP_BIN), maps.threshold.view())?;
        write_array(out.path(NOISE_MAP_BIN), maps.noise.view())?;
        write_array(out.path(CHI2_MAP_BIN), maps.chi2.view())?;
    }

    #[cfg(feature = "hdf5")]
    if let Some(hdf5) = &sinks.hdf5 {
        write_hdf5_arrays(
            &hdf5.output,
            run,
            &histograms,
            cluster_parts.as_ref().map(|(h, _)| h),
            scurves.as_ref().map(|(m, _)| m),
        )?;
    }

    let (cluster_histograms, clustering) = match cluster_parts {
        Some((h, s)) => (Some(h), s),
        None => (None, ClusteringStatistics::default()),
    };
    let (scurves, fit) = match scurves {
        Some((maps, fit)) => (Some(maps), Some(fit)),
        None => (None, None),
    };
    let summary = AnalysisSummary {
        raw_file: raw_path.to_path_buf(),
        output_dir: out.root().to_path_buf(),
        scan_id: run.scan_id().to_string(),
        words: raw.word_count(),
        interpreted_words,
        n_scan_params,
        hits: stages.hits,
        triggers: stages.triggers,
        event_hits: stages.event_hits,
        hits_before_first_trigger: stages.event_state.hits_before_first_trigger,
        clusters: clustering.clusters,
        uncalibrated_hits,
        rolled_back_words,
        interpreter: output.statistics,
        clustering,
        occupancy_shape: histograms.occupancy.shape().to_vec(),
        tot_shape: histograms.tot.shape().to_vec(),
        tdc_shape: histograms.tdc.shape().to_vec(),
        cluster_charge_bins: cluster_histograms.as_ref().map_or(0, |h| h.charge.len()),
        fit,
    };
    std::fs::write(out.path(SUMMARY_JSON), serde_json::to_string_pretty(&summary)?)?;
    log::info!(
        "{}: {} hits, {} triggers, {} clusters",
        raw_path.display(),
        summary.hits,
        summary.triggers,
        summary.clusters
    );

    Ok(AnalysisOutput {
        summary,
        histograms,
        cluster_histograms,
        scurves,
    })
}

fn build_clusterizer(config: &AnalysisConfig) -> Result<Clusterizer> {
    let Some(path) = &config.calibration_file else {
        let cluster_config = config.clusterizer.clone().unwrap_or_default();
        return Ok(Clusterizer::new(cluster_config)?);
    };
    let calibration = load_calibration(path)?;
    let cluster_config = config
        .clusterizer
        .clone()
        .unwrap_or_else(ClusterizerConfig::calibrated);
    Ok(Clusterizer::new(cluster_config)?.with_calibration(calibration))
}

/// Reads a `col,row,a,b,c` ToT calibration file.
///
/// # Errors
/// Returns [`Error::MissingFile`] if the file does not exist and a core
/// calibration error for malformed lines.
pub fn load_calibration(path: &Path) -> Result<TotCalibration> {
    let text =
        std::fs::read_to_string(path).map_err(|e| crate::error::open_error(e, path))?;
    let calibration = TotCalibration::parse_csv(&text)?;
    log::info!(
        "loaded ToT calibration for {} pixels from {}",
        calibration.calibrated_pixels(),
        path.display()
    );
    Ok(calibration)
}

fn fit_threshold_scan(
    run: &RunDescription,
    histograms: &PixelHistograms,
) -> Result<(ScurveMaps, FitSummary)> {
    let levels = run.injection_levels()?.unwrap_or_default();
    let n_injections = run.scan_config.n_injections.ok_or_else(|| {
        Error::InvalidFormat(format!("scan_config.n_injections is required for {}", run.scan_id()))
    })?;
    log::info!(
        "fitting s-curves over {} injection levels ({n_injections} injections)",
        levels.len()
    );
    let maps = fit_scurves(histograms.occupancy.view(), &levels, f64::from(n_injections))?;
    let fit = FitSummary::new(&maps, levels, n_injections);
    log::info!(
        "s-curve fit: {} pixels fitted, {} failed",
        fit.fitted_pixels,
        fit.failed_pixels
    );
    Ok((maps, fit))
}

#[cfg(feature = "hdf5")]
fn write_hdf5_arrays(
    output: &Hdf5Output,
    run: &RunDescription,
    histograms: &PixelHistograms,
    cluster_histograms: Option<&ClusterHistograms>,
    scurves: Option<&ScurveMaps>,
) -> Result<()> {
    output.set_attr("scan_id", run.scan_id())?;
    output.set_attr("run_description", &serde_json::to_string(run)?)?;
    output.write_array("HistOcc", histograms.occupancy.view())?;
    output.write_array("HistTot", histograms.tot.view())?;
    output.write_array("HistTdc", histograms.tdc.view())?;
    if let Some(h) = cluster_histograms {
        output.write_array("HistClusterSize", h.size.view())?;
        output.write_array("HistClusterTot", h.charge.view())?;
        output.write_array("HistClusterShape", h.shape.view())?;
    }
    if let Some(maps) = scurves {
        output.write_array("ThresholdMap", maps.threshold.view())?;
        output.write_array("NoiseMap", maps.noise.view())?;
        output.write_array("Chi2Map", maps.chi2.view())?;
    }
    Ok(())
}

/// Analyses several files in parallel. A failing file is logged and does
/// not stop the others.
#[must_use]
pub fn analyze_files(
    raw_paths: &[PathBuf],
    config: &AnalysisConfig,
) -> Vec<(PathBuf, Result<AnalysisSummary>)> {
    raw_paths
        .par_iter()
        .map(|path| {
            let result = analyze_file(path, config).map(|output| output.summary);
            if let Err(e) = &result {
                log::error!("{}: analysis failed: {e}", path.display());
            }
            (path.clone(), result)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder_and_validation() {
        let config = AnalysisConfig::new()
            .with_chunk_size(1000)
            .with_build_events(true)
            .with_cluster_hits(true)
            .with_store_hits(false)
            .with_fit_scurves(false)
            .with_output_root("/tmp/out");
        assert_eq!(config.chunk_size, 1000);
        assert!(config.build_events && config.cluster_hits);
        assert!(!config.store_hits && !config.fit_scurves);
        assert!(config.validate().is_ok());

        assert!(AnalysisConfig::new().with_chunk_size(0).validate().is_err());
        assert!(AnalysisConfig::new()
            .with_event_builder(EventBuilderConfig::new().with_frame_length(0))
            .validate()
            .is_err());
        assert!(AnalysisConfig::new()
            .with_clusterizer(ClusterizerConfig::new().with_max_hit_charge(0))
            .validate()
            .is_err());
    }

    #[test]
    fn test_output_dir() {
        let config = AnalysisConfig::new();
        assert_eq!(
            config.output_dir(Path::new("/data/run_3.bin")),
            PathBuf::from("/data/run_3_interpreted")
        );
        let config = config.with_output_root("/results");
        assert_eq!(
            config.output_dir(Path::new("/data/run_3.bin")),
            PathBuf::from("/results/run_3_interpreted")
        );
    }

    #[test]
    fn test_fit_summary_means() {
        let mut maps = ScurveMaps {
            threshold: ndarray::Array2::from_elem((2, 2), monopix_algorithms::FIT_SENTINEL),
            noise: ndarray::Array2::from_elem((2, 2), monopix_algorithms::FIT_SENTINEL),
            chi2: ndarray::Array2::from_elem((2, 2), monopix_algorithms::FIT_SENTINEL),
            failed: 2,
        };
        maps.threshold[[0, 0]] = 40.0;
        maps.noise[[0, 0]] = 2.0;
        maps.threshold[[1, 1]] = 50.0;
        maps.noise[[1, 1]] = 4.0;

        let fit = FitSummary::new(&maps, vec![10.0, 20.0], 100);
        assert_eq!(fit.fitted_pixels, 2);
        assert_eq!(fit.failed_pixels, 2);
        approx::assert_relative_eq!(fit.mean_threshold.unwrap(), 45.0);
        approx::assert_relative_eq!(fit.mean_noise.unwrap(), 3.0);

        maps.threshold.fill(monopix_algorithms::FIT_SENTINEL);
        assert_eq!(FitSummary::new(&maps, vec![], 100).mean_threshold, None);
    }
}
