//! Run description: the JSON sidecar written next to every raw data file.
//!
//! It carries the scan identity, the scan settings needed to derive injection
//! levels, the trigger word layout and the readout meta table.

use crate::error::open_error;
use crate::{Error, Result};
use monopix_raw::{MetaEntry, TriggerDataFormat};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Scans whose occupancy is fitted with s-curves over `VCAL_LOW`.
pub const VCAL_LOW_SCANS: [&str; 2] = ["threshold_scan", "calibrate_tot"];
/// Scan that sweeps `VCAL_HIGH` and `VCAL_MED` per scan parameter.
pub const AUTORANGE_SCAN: &str = "autorange_threshold_scan";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub scan_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Scan settings. Only the injection settings are interpreted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_injections: Option<u32>,
    #[serde(rename = "VCAL_HIGH", default, skip_serializing_if = "Option::is_none")]
    pub vcal_high: Option<i64>,
    #[serde(rename = "VCAL_LOW_start", default, skip_serializing_if = "Option::is_none")]
    pub vcal_low_start: Option<i64>,
    #[serde(rename = "VCAL_LOW_stop", default, skip_serializing_if = "Option::is_none")]
    pub vcal_low_stop: Option<i64>,
    #[serde(rename = "VCAL_LOW_step", default, skip_serializing_if = "Option::is_none")]
    pub vcal_low_step: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Trigger logic unit settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TluConfig {
    #[serde(rename = "DATA_FORMAT", default)]
    pub data_format: TriggerDataFormat,
}

/// Register values stored for one scan parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanParameterValues {
    pub scan_param_id: u32,
    #[serde(flatten)]
    pub values: BTreeMap<String, f64>,
}

/// Contents of a run description file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunDescription {
    #[serde(default)]
    pub run_config: RunConfig,
    #[serde(default)]
    pub scan_config: ScanConfig,
    #[serde(default)]
    pub chip_settings: Map<String, Value>,
    #[serde(default)]
    pub tlu: TluConfig,
    #[serde(default)]
    pub scan_parameters: Vec<ScanParameterValues>,
    #[serde(default)]
    pub meta_data: Vec<MetaEntry>,
}

impl RunDescription {
    /// Default location of the run description of `raw_path`: same stem,
    /// `.json` extension.
    #[must_use]
    pub fn default_path(raw_path: &Path) -> PathBuf {
        raw_path.with_extension("json")
    }

    /// Parses a run description from JSON text.
    ///
    /// # Errors
    /// Returns [`Error::Json`] for malformed JSON or unknown trigger formats.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Loads a run description file.
    ///
    /// # Errors
    /// Returns [`Error::MissingFile`] if the file does not exist and
    /// [`Error::Json`] if it cannot be parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| open_error(e, path))?;
        Self::from_json(&text)
    }

    /// Writes the description as pretty-printed JSON.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    #[must_use]
    pub fn scan_id(&self) -> &str {
        &self.run_config.scan_id
    }

    /// Number of scan parameter slots, `max(scan_param_id) + 1`.
    #[must_use]
    pub fn n_scan_params(&self) -> usize {
        self.meta_data
            .iter()
            .map(|m| m.scan_param_id as usize + 1)
            .max()
            .unwrap_or(1)
    }

    /// True if the scan's occupancy should be fitted with s-curves.
    #[must_use]
    pub fn is_threshold_scan(&self) -> bool {
        VCAL_LOW_SCANS.contains(&self.scan_id()) || self.scan_id() == AUTORANGE_SCAN
    }

    /// Values of register `name` ordered by scan parameter id, if every
    /// stored scan parameter has it.
    #[must_use]
    pub fn scan_parameter_values(&self, name: &str) -> Option<Vec<f64>> {
        let mut rows: Vec<&ScanParameterValues> = self.scan_parameters.iter().collect();
        rows.sort_by_key(|r| r.scan_param_id);
        rows.iter().map(|r| r.values.get(name).copied()).collect()
    }

    /// Injected charge (in DAC units) of each scan parameter, `None` for
    /// scans that are not fitted.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFormat`] if the settings needed for the scan
    /// are missing or the `VCAL_LOW` step is zero.
    pub fn injection_levels(&self) -> Result<Option<Vec<f64>>> {
        if VCAL_LOW_SCANS.contains(&self.scan_id()) {
            let scan = &self.scan_config;
            let missing = |what: &str| {
                Error::InvalidFormat(format!("scan_config.{what} is required for {}", self.scan_id()))
            };
            let high = scan.vcal_high.ok_or_else(|| missing("VCAL_HIGH"))?;
            let start = scan.vcal_low_start.ok_or_else(|| missing("VCAL_LOW_start"))?;
            let stop = scan.vcal_low_stop.ok_or_else(|| missing("VCAL_LOW_stop"))?;
            let step = scan.vcal_low_step.ok_or_else(|| missing("VCAL_LOW_step"))?;
            let levels = stepped_range(start, stop, step)
                .ok_or_else(|| Error::InvalidFormat("scan_config.VCAL_LOW_step is zero".into()))?
                .map(|low| (high - low) as f64)
                .collect();
            return Ok(Some(levels));
        }
        if self.scan_id() == AUTORANGE_SCAN {
            let high = self.scan_parameter_values("vcal_high");
            let med = self.scan_parameter_values("vcal_med");
            let (Some(high), Some(med)) = (high, med) else {
                return Err(Error::InvalidFormat(
                    "scan_parameters need vcal_high and vcal_med for an autorange scan".into(),
                ));
            };
            return Ok(Some(high.iter().zip(&med).map(|(h, m)| h - m).collect()));
        }
        Ok(None)
    }
}

/// Integers from `start` towards `stop` (exclusive) in steps of `step`,
/// for either sign of `step`.
fn stepped_range(start: i64, stop: i64, step: i64) -> Option<impl Iterator<Item = i64>> {
    if step == 0 {
        return None;
    }
    let mut next = start;
    Some(std::iter::from_fn(move || {
        let more = if step > 0 { next < stop } else { next > stop };
        if !more {
            return None;
        }
        let value = next;
        next += step;
        Some(value)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD_RUN: &str = r#"{
        "run_config": {"scan_id": "threshold_scan", "run_name": "20240101_threshold_scan", "chip_sn": "W8R13"},
        "scan_config": {"n_injections": 100, "VCAL_HIGH": 140, "VCAL_LOW_start": 100,
                        "VCAL_LOW_stop": 40, "VCAL_LOW_step": -20, "start_column": 0},
        "chip_settings": {"ITHR": 64, "IBIAS": 50},
        "tlu": {"DATA_FORMAT": 2},
        "meta_data": [
            {"scan_param_id": 0, "index_start": 0, "index_stop": 10},
            {"scan_param_id": 1, "index_start": 10, "index_stop": 20},
            {"scan_param_id": 2, "index_start": 20, "index_stop": 30}
        ]
    }"#;

    #[test]
    fn test_parse_threshold_run() {
        let run = RunDescription::from_json(THRESHOLD_RUN).unwrap();
        assert_eq!(run.scan_id(), "threshold_scan");
        assert_eq!(run.tlu.data_format, TriggerDataFormat::Combined);
        assert_eq!(run.scan_config.n_injections, Some(100));
        assert_eq!(run.meta_data.len(), 3);
        assert_eq!(run.n_scan_params(), 3);
        assert!(run.run_config.extra.contains_key("chip_sn"));
        assert!(run.is_threshold_scan());
        assert_eq!(run.injection_levels().unwrap(), Some(vec![40.0, 60.0, 80.0]));
    }

    #[test]
    fn test_defaults_for_sparse_run() {
        let run = RunDescription::from_json(r#"{"run_config": {"scan_id": "source_scan"}}"#).unwrap();
        assert_eq!(run.tlu.data_format, TriggerDataFormat::TriggerNumber);
        assert!(run.meta_data.is_empty());
        assert_eq!(run.n_scan_params(), 1);
        assert!(!run.is_threshold_scan());
        assert_eq!(run.injection_levels().unwrap(), None);
    }

    #[test]
    fn test_unknown_trigger_format_rejected() {
        assert!(RunDescription::from_json(r#"{"tlu": {"DATA_FORMAT": 7}}"#).is_err());
    }

    #[test]
    fn test_missing_vcal_settings() {
        let run = RunDescription::from_json(
            r#"{"run_config": {"scan_id": "calibrate_tot"}, "scan_config": {"VCAL_HIGH": 140}}"#,
        )
        .unwrap();
        assert!(matches!(run.injection_levels(), Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn test_autorange_levels() {
        let run = RunDescription::from_json(
            r#"{
                "run_config": {"scan_id": "autorange_threshold_scan"},
                "scan_parameters": [
                    {"scan_param_id": 1, "vcal_high": 90, "vcal_med": 40},
                    {"scan_param_id": 0, "vcal_high": 60, "vcal_med": 40}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(run.injection_levels().unwrap(), Some(vec![20.0, 50.0]));
    }

    #[test]
    fn test_stepped_range() {
        assert_eq!(stepped_range(0, 5, 2).unwrap().collect::<Vec<_>>(), vec![0, 2, 4]);
        assert_eq!(stepped_range(5, 0, -2).unwrap().collect::<Vec<_>>(), vec![5, 3, 1]);
        assert_eq!(stepped_range(5, 5, 1).unwrap().count(), 0);
        assert!(stepped_range(0, 5, 0).is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = RunDescription::default_path(&dir.path().join("run_1.bin"));
        assert_eq!(path.file_name().unwrap(), "run_1.json");

        let run = RunDescription::from_json(THRESHOLD_RUN).unwrap();
        run.save(&path).unwrap();
        assert_eq!(RunDescription::load(&path).unwrap(), run);
        assert!(matches!(
            RunDescription::load(dir.path().join("missing.json")),
            Err(Error::MissingFile(_))
        ));
    }
}
