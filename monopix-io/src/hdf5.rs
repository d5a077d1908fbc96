//! HDF5 output: hit, event and cluster tables plus histograms and maps in
//! one file.
//!
//! Tables are groups with one extendable dataset per column (`Dut`, `Hits`,
//! `Cluster`); histograms and maps are fixed-shape datasets at the root.

use crate::{Error, Result};
use hdf5::types::{H5Type, VarLenUnicode};
use hdf5::{Dataset, File, Group};
use monopix_core::{ClusterBatch, EventBatch, HitBatch};
use ndarray::{s, ArrayView, ArrayView1, Dimension};
use std::marker::PhantomData;
use std::path::Path;
use std::str::FromStr;

pub const FORMAT_VERSION: &str = "0.1";

/// Dataset layout options.
#[derive(Clone, Debug)]
pub struct Hdf5WriteOptions {
    /// Rows per chunk of the table columns.
    pub chunk_rows: usize,
    pub compression: Option<u8>,
    pub shuffle: bool,
}

impl Default for Hdf5WriteOptions {
    fn default() -> Self {
        Self {
            chunk_rows: 100_000,
            compression: Some(1),
            shuffle: true,
        }
    }
}

/// A batch type stored as an HDF5 table group.
pub trait Hdf5Table {
    /// Group name.
    const NAME: &'static str;

    /// Creates the empty column datasets, in the order `append_columns` uses.
    ///
    /// # Errors
    /// Returns an error if a dataset cannot be created.
    fn create_columns(group: &Group, options: &Hdf5WriteOptions) -> Result<Vec<Dataset>>;

    /// Writes the batch at row `offset`.
    ///
    /// # Errors
    /// Returns an error if HDF5 I/O fails.
    fn append_columns(&self, columns: &[Dataset], offset: usize) -> Result<()>;

    fn row_count(&self) -> usize;
}

impl Hdf5Table for HitBatch {
    const NAME: &'static str = "Dut";

    fn create_columns(group: &Group, options: &Hdf5WriteOptions) -> Result<Vec<Dataset>> {
        Ok(vec![
            create_extendable_dataset::<u32>(group, "scan_param_id", options)?,
            create_extendable_dataset::<u16>(group, "col", options)?,
            create_extendable_dataset::<u16>(group, "row", options)?,
            create_extendable_dataset::<u8>(group, "le", options)?,
            create_extendable_dataset::<u8>(group, "te", options)?,
            create_extendable_dataset::<i64>(group, "timestamp", options)?,
            create_extendable_dataset::<u32>(group, "trigger_number", options)?,
        ])
    }

    fn append_columns(&self, columns: &[Dataset], offset: usize) -> Result<()> {
        append_slice(&columns[0], offset, &self.scan_param_id)?;
        append_slice(&columns[1], offset, &self.col)?;
        append_slice(&columns[2], offset, &self.row)?;
        append_slice(&columns[3], offset, &self.le)?;
        append_slice(&columns[4], offset, &self.te)?;
        append_slice(&columns[5], offset, &self.timestamp)?;
        append_slice(&columns[6], offset, &self.trigger_number)
    }

    fn row_count(&self) -> usize {
        self.len()
    }
}

impl Hdf5Table for EventBatch {
    const NAME: &'static str = "Hits";

    fn create_columns(group: &Group, options: &Hdf5WriteOptions) -> Result<Vec<Dataset>> {
        Ok(vec![
            create_extendable_dataset::<u64>(group, "event_number", options)?,
            create_extendable_dataset::<u32>(group, "trigger_number", options)?,
            create_extendable_dataset::<u8>(group, "frame", options)?,
            create_extendable_dataset::<u16>(group, "column", options)?,
            create_extendable_dataset::<u16>(group, "row", options)?,
            create_extendable_dataset::<u16>(group, "charge", options)?,
            create_extendable_dataset::<i64>(group, "timestamp", options)?,
            create_extendable_dataset::<u32>(group, "scan_param_id", options)?,
            create_extendable_dataset::<i32>(group, "cluster_id", options)?,
        ])
    }

    fn append_columns(&self, columns: &[Dataset], offset: usize) -> Result<()> {
        append_slice(&columns[0], offset, &self.event_number)?;
        append_slice(&columns[1], offset, &self.trigger_number)?;
        append_slice(&columns[2], offset, &self.frame)?;
        append_slice(&columns[3], offset, &self.col)?;
        append_slice(&columns[4], offset, &self.row)?;
        append_slice(&columns[5], offset, &self.charge)?;
        append_slice(&columns[6], offset, &self.timestamp)?;
        append_slice(&columns[7], offset, &self.scan_param_id)?;
        append_slice(&columns[8], offset, &self.cluster_id)
    }

    fn row_count(&self) -> usize {
        self.len()
    }
}

impl Hdf5Table for ClusterBatch {
    const NAME: &'static str = "Cluster";

    fn create_columns(group: &Group, options: &Hdf5WriteOptions) -> Result<Vec<Dataset>> {
        Ok(vec![
            create_extendable_dataset::<u64>(group, "event_number", options)?,
            create_extendable_dataset::<u16>(group, "id", options)?,
            create_extendable_dataset::<u16>(group, "size", options)?,
            create_extendable_dataset::<u32>(group, "charge", options)?,
            create_extendable_dataset::<u16>(group, "seed_column", options)?,
            create_extendable_dataset::<u16>(group, "seed_row", options)?,
            create_extendable_dataset::<f64>(group, "mean_column", options)?,
            create_extendable_dataset::<f64>(group, "mean_row", options)?,
            create_extendable_dataset::<u16>(group, "dist_column", options)?,
            create_extendable_dataset::<u16>(group, "dist_row", options)?,
            create_extendable_dataset::<i64>(group, "cluster_shape", options)?,
            create_extendable_dataset::<u32>(group, "scan_param_id", options)?,
        ])
    }

    fn append_columns(&self, columns: &[Dataset], offset: usize) -> Result<()> {
        append_slice(&columns[0], offset, &self.event_number)?;
        append_slice(&columns[1], offset, &self.id)?;
        append_slice(&columns[2], offset, &self.size)?;
        append_slice(&columns[3], offset, &self.charge)?;
        append_slice(&columns[4], offset, &self.seed_col)?;
        append_slice(&columns[5], offset, &self.seed_row)?;
        append_slice(&columns[6], offset, &self.mean_col)?;
        append_slice(&columns[7], offset, &self.mean_row)?;
        append_slice(&columns[8], offset, &self.dist_col)?;
        append_slice(&columns[9], offset, &self.dist_row)?;
        append_slice(&columns[10], offset, &self.shape)?;
        append_slice(&columns[11], offset, &self.scan_param_id)
    }

    fn row_count(&self) -> usize {
        self.len()
    }
}

/// Streaming writer for one table group.
pub struct Hdf5TableWriter<B> {
    columns: Vec<Dataset>,
    rows: usize,
    _rows: PhantomData<fn(&B)>,
}

impl<B: Hdf5Table> Hdf5TableWriter<B> {
    /// Appends a batch.
    ///
    /// # Errors
    /// Returns an error if HDF5 I/O fails.
    pub fn append(&mut self, batch: &B) -> Result<()> {
        if batch.row_count() == 0 {
            return Ok(());
        }
        batch.append_columns(&self.columns, self.rows)?;
        self.rows += batch.row_count();
        Ok(())
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }
}

/// One HDF5 output file.
pub struct Hdf5Output {
    file: File,
    options: Hdf5WriteOptions,
}

impl Hdf5Output {
    /// Creates (truncates) the file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P, options: Hdf5WriteOptions) -> Result<Self> {
        let file = File::create(path)?;
        set_attr_str(&file, "monopix_format_version", FORMAT_VERSION)?;
        Ok(Self { file, options })
    }

    /// Creates the table group of `B`.
    ///
    /// # Errors
    /// Returns an error if the group already exists or cannot be created.
    pub fn table<B: Hdf5Table>(&self) -> Result<Hdf5TableWriter<B>> {
        let group = self.file.create_group(B::NAME)?;
        let columns = B::create_columns(&group, &self.options)?;
        Ok(Hdf5TableWriter {
            columns,
            rows: 0,
            _rows: PhantomData,
        })
    }

    /// Writes a fixed-shape dataset at the root.
    ///
    /// # Errors
    /// Returns an error if the dataset cannot be created or written.
    pub fn write_array<T, D>(&self, name: &str, array: ArrayView<'_, T, D>) -> Result<()>
    where
        T: H5Type,
        D: Dimension,
    {
        let array = array.as_standard_layout();
        let dataset = self
            .file
            .new_dataset::<T>()
            .shape(array.shape().to_vec())
            .create(name)?;
        dataset.write(&array)?;
        Ok(())
    }

    /// Stores a string attribute on the file root.
    ///
    /// # Errors
    /// Returns an error if the attribute cannot be written.
    pub fn set_attr(&self, name: &str, value: &str) -> Result<()> {
        set_attr_str(&self.file, name, value)
    }
}

/// Reads a one-dimensional dataset, e.g. `Dut/col` or `HistClusterSize`.
///
/// # Errors
/// Returns an error if the dataset is missing or has another type.
pub fn read_dataset_vec<T: H5Type, P: AsRef<Path>>(path: P, name: &str) -> Result<Vec<T>> {
    let file = File::open(path)?;
    let dataset = file.dataset(name)?;
    Ok(dataset.read_raw::<T>()?)
}

/// Reads a string attribute of the file root.
///
/// # Errors
/// Returns an error if the attribute is missing.
pub fn read_attr_str<P: AsRef<Path>>(path: P, name: &str) -> Result<String> {
    let file = File::open(path)?;
    let value: VarLenUnicode = file.attr(name)?.read_scalar()?;
    Ok(value.to_string())
}

fn create_extendable_dataset<T: H5Type>(
    group: &Group,
    name: &str,
    options: &Hdf5WriteOptions,
) -> Result<Dataset> {
    let mut builder = group
        .new_dataset::<T>()
        .shape((0..,))
        .chunk((options.chunk_rows,));

    if let Some(level) = options.compression {
        builder = builder.deflate(level);
    }

    if options.shuffle {
        builder = builder.shuffle();
    }

    Ok(builder.create(name)?)
}

fn append_slice<T: H5Type>(dataset: &Dataset, offset: usize, data: &[T]) -> Result<()> {
    if data.is_empty() {
        return Ok(());
    }
    let new_len = offset + data.len();
    dataset.resize((new_len,))?;
    let view = ArrayView1::from(data);
    dataset.write_slice(view, s![offset..new_len])?;
    Ok(())
}

fn set_attr_str(group: &Group, name: &str, value: &str) -> Result<()> {
    let value = VarLenUnicode::from_str(value)
        .map_err(|e| Error::InvalidFormat(format!("invalid utf-8 attribute: {e}")))?;
    group
        .new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}
