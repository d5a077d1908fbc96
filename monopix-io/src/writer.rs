//! File writers for interpreted data.
//!
//! Tables (hits, events, clusters) are streamed as CSV, chunk by chunk.
//! Histograms and maps are written as flat little-endian arrays in logical
//! (row-major) order; their shapes go to the analysis summary.

use crate::Result;
use monopix_core::{ClusterBatch, EventBatch, HitBatch};
use ndarray::{ArrayView, Dimension};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

pub const HITS_CSV: &str = "hits.csv";
pub const EVENTS_CSV: &str = "events.csv";
pub const CLUSTERS_CSV: &str = "clusters.csv";
pub const HIST_OCC_BIN: &str = "hist_occ.bin";
pub const HIST_TOT_BIN: &str = "hist_tot.bin";
pub const HIST_TDC_BIN: &str = "hist_tdc.bin";
pub const HIST_CLUSTER_SIZE_BIN: &str = "hist_cluster_size.bin";
pub const HIST_CLUSTER_CHARGE_BIN: &str = "hist_cluster_charge.bin";
pub const HIST_CLUSTER_SHAPE_BIN: &str = "hist_cluster_shape.bin";
pub const THRESHOLD_MAP_BIN: &str = "threshold_map.bin";
pub const NOISE_MAP_BIN: &str = "noise_map.bin";
pub const CHI2_MAP_BIN: &str = "chi2_map.bin";
pub const SUMMARY_JSON: &str = "summary.json";

/// A batch type that can be written as CSV rows.
pub trait CsvRows {
    /// Column names, comma separated.
    const HEADER: &'static str;

    /// Writes one line per row.
    ///
    /// # Errors
    /// Returns an error if writing fails.
    fn write_rows<W: Write>(&self, out: &mut W) -> std::io::Result<()>;

    fn row_count(&self) -> usize;
}

impl CsvRows for HitBatch {
    const HEADER: &'static str = "scan_param_id,col,row,le,te,timestamp,trigger_number";

    fn write_rows<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        for i in 0..self.len() {
            writeln!(
                out,
                "{},{},{},{},{},{},{}",
                self.scan_param_id[i],
                self.col[i],
                self.row[i],
                self.le[i],
                self.te[i],
                self.timestamp[i],
                self.trigger_number[i]
            )?;
        }
        Ok(())
    }

    fn row_count(&self) -> usize {
        self.len()
    }
}

impl CsvRows for EventBatch {
    const HEADER: &'static str = "event_number,trigger_number,frame,column,row,charge,timestamp";

    fn write_rows<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        for i in 0..self.len() {
            writeln!(
                out,
                "{},{},{},{},{},{},{}",
                self.event_number[i],
                self.trigger_number[i],
                self.frame[i],
                self.col[i],
                self.row[i],
                self.charge[i],
                self.timestamp[i]
            )?;
        }
        Ok(())
    }

    fn row_count(&self) -> usize {
        self.len()
    }
}

impl CsvRows for ClusterBatch {
    const HEADER: &'static str = "event_number,id,size,charge,seed_col,seed_row,mean_col,mean_row,dist_col,dist_row,shape,scan_param_id";

    fn write_rows<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        for c in self.iter() {
            writeln!(
                out,
                "{},{},{},{},{},{},{},{},{},{},{},{}",
                c.event_number,
                c.id,
                c.size,
                c.charge,
                c.seed_col,
                c.seed_row,
                c.mean_col,
                c.mean_row,
                c.dist_col,
                c.dist_row,
                c.shape,
                c.scan_param_id
            )?;
        }
        Ok(())
    }

    fn row_count(&self) -> usize {
        self.len()
    }
}

/// Streaming CSV writer for one table.
pub struct CsvTableWriter<B> {
    writer: BufWriter<File>,
    rows: u64,
    _rows: PhantomData<fn(&B)>,
}

impl<B: CsvRows> CsvTableWriter<B> {
    /// Creates the file and writes the header line.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", B::HEADER)?;
        Ok(Self {
            writer,
            rows: 0,
            _rows: PhantomData,
        })
    }

    /// Appends every row of `batch`.
    ///
    /// # Errors
    /// Returns an error if writing fails.
    pub fn append(&mut self, batch: &B) -> Result<()> {
        batch.write_rows(&mut self.writer)?;
        self.rows += batch.row_count() as u64;
        Ok(())
    }

    /// Rows written so far.
    #[must_use]
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Flushes the writer.
    ///
    /// # Errors
    /// Returns an error if flushing fails.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Element types of binary arrays.
pub trait LeBytes: Copy {
    fn write_le<W: Write>(self, out: &mut W) -> std::io::Result<()>;
}

macro_rules! impl_le_bytes {
    ($($t:ty),*) => {
        $(impl LeBytes for $t {
            fn write_le<W: Write>(self, out: &mut W) -> std::io::Result<()> {
                out.write_all(&self.to_le_bytes())
            }
        })*
    };
}

impl_le_bytes!(u16, u32, u64, i32, i64, f64);

/// Writes `array` as little-endian values in logical order.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn write_array<T, D, P>(path: P, array: ArrayView<'_, T, D>) -> Result<()>
where
    T: LeBytes,
    D: Dimension,
    P: AsRef<Path>,
{
    let mut writer = BufWriter::new(File::create(path)?);
    for &value in &array {
        value.write_le(&mut writer)?;
    }
    writer.flush()?;
    Ok(())
}

/// Output directory of one analysed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDirectory {
    root: PathBuf,
}

impl OutputDirectory {
    /// Default output directory name for a raw file: `<stem>_interpreted`.
    #[must_use]
    pub fn default_name(raw_path: &Path) -> String {
        let stem = raw_path
            .file_stem()
            .map_or_else(|| "raw".into(), |s| s.to_string_lossy());
        format!("{stem}_interpreted")
    }

    /// Creates `root` and missing parents.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub fn create<P: AsRef<Path>>(root: P) -> Result<Self> {
        std::fs::create_dir_all(root.as_ref())?;
        Ok(Self {
            root: root.as_ref().to_path_buf(),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}
