//! Pixel mask files and noisy-pixel detection.
//!
//! A mask file is plain text with one `row col [value]` line per masked
//! pixel. The value is a measured quantity such as a hit count, rate or
//! threshold. Lines starting with `#` are comments.

use crate::error::open_error;
use crate::{Error, Result};
use monopix_core::{PixelCoord, N_COLUMNS, N_ROWS};
use ndarray::ArrayView2;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

/// Value written for a masked pixel when none is given.
pub const DEFAULT_MASK_VALUE: f64 = 0.0;

/// A set of masked pixels with an optional per-pixel value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PixelMask {
    pixels: BTreeMap<PixelCoord, f64>,
}

impl PixelMask {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pixel; an existing entry takes the new value.
    ///
    /// # Errors
    /// Returns an error if the pixel lies outside the matrix or the value
    /// is not finite.
    pub fn insert(&mut self, col: u16, row: u16, value: f64) -> Result<()> {
        if !value.is_finite() {
            return Err(Error::InvalidFormat(format!(
                "mask value {value} of pixel ({col}, {row}) is not finite"
            )));
        }
        let pixel = PixelCoord::new(col, row);
        if !pixel.is_in_matrix() {
            return Err(monopix_core::Error::InvalidCoordinate { col, row }.into());
        }
        self.pixels.insert(pixel, value);
        Ok(())
    }

    #[must_use]
    pub fn contains(&self, col: u16, row: u16) -> bool {
        self.pixels.contains_key(&PixelCoord::new(col, row))
    }

    #[must_use]
    pub fn value(&self, col: u16, row: u16) -> Option<f64> {
        self.pixels.get(&PixelCoord::new(col, row)).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Masked pixels with their values, ordered by column then row.
    pub fn iter(&self) -> impl Iterator<Item = (PixelCoord, f64)> + '_ {
        self.pixels.iter().map(|(&p, &v)| (p, v))
    }

    /// Adds every pixel of `other`.
    pub fn merge(&mut self, other: &PixelMask) {
        self.pixels.extend(other.iter());
    }

    /// Parses mask file text.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFormat`] for malformed lines and a core error
    /// for pixels outside the matrix.
    pub fn parse(text: &str) -> Result<Self> {
        let mut mask = Self::new();
        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let bad = || Error::InvalidFormat(format!("mask line {}: {line:?}", line_no + 1));
            let fields: Vec<&str> = line.split_whitespace().collect();
            if !(2..=3).contains(&fields.len()) {
                return Err(bad());
            }
            let row: u16 = fields[0].parse().map_err(|_| bad())?;
            let col: u16 = fields[1].parse().map_err(|_| bad())?;
            let value = match fields.get(2) {
                Some(v) => v.parse().map_err(|_| bad())?,
                None => DEFAULT_MASK_VALUE,
            };
            mask.insert(col, row, value)?;
        }
        Ok(mask)
    }

    /// Reads a mask file.
    ///
    /// # Errors
    /// Returns [`Error::MissingFile`] if the file does not exist, and the
    /// errors of [`PixelMask::parse`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| open_error(e, path))?;
        Self::parse(&text)
    }

    /// Renders the mask in file format, with a comment header.
    #[must_use]
    pub fn to_text(&self, comment: &str) -> String {
        let mut text = String::new();
        for line in comment.lines() {
            let _ = writeln!(text, "# {line}");
        }
        let _ = writeln!(text, "# row col value");
        for (pixel, value) in self.iter() {
            let _ = writeln!(text, "{} {} {value}", pixel.row, pixel.col);
        }
        text
    }

    /// Writes the mask file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P, comment: &str) -> Result<()> {
        std::fs::write(path, self.to_text(comment))?;
        Ok(())
    }
}

/// Pixels whose summed occupancy exceeds `min_occupancy`, valued with their
/// hit count.
///
/// `occupancy` is indexed `[col][row]`, as returned by
/// [`monopix_core::PixelHistograms::occupancy_sum`].
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn noisy_pixels(occupancy: ArrayView2<'_, u64>, min_occupancy: u64) -> PixelMask {
    let mut mask = PixelMask::new();
    for ((col, row), &count) in occupancy.indexed_iter() {
        if count > min_occupancy && col < N_COLUMNS && row < N_ROWS {
            mask.pixels
                .insert(PixelCoord::new(col as u16, row as u16), count as f64);
        }
    }
    if !mask.is_empty() {
        log::info!(
            "{} noisy pixels with more than {min_occupancy} hits",
            mask.len()
        );
    }
    mask
}
