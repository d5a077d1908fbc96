//! Per-pixel ToT to charge calibration.
//!
//! The ToT response of a pixel is modelled as `tot = a*q + b - c/q`. The
//! physical root of that equation gives the charge of a measured ToT.

use monopix_core::{Error, EventBatch, Result, N_COLUMNS, N_ROWS};
use ndarray::Array2;

/// Charge assigned to hits of pixels without a usable calibration. It is
/// above every charge window, so such hits are never clustered.
pub const UNCALIBRATED_CHARGE: u16 = u16::MAX;

/// Inverse of `tot = a*q + b - c/q`.
#[inline]
#[must_use]
pub fn inverse_tot_response(tot: f64, a: f64, b: f64, c: f64) -> f64 {
    let shifted = tot - b;
    (shifted + (shifted * shifted + 4.0 * a * c).sqrt()) / (2.0 * a)
}

/// Calibration parameters `a, b, c` per pixel, `[col][row]`.
#[derive(Debug, Clone, PartialEq)]
pub struct TotCalibration {
    a: Array2<f64>,
    b: Array2<f64>,
    c: Array2<f64>,
}

impl Default for TotCalibration {
    fn default() -> Self {
        Self::new()
    }
}

impl TotCalibration {
    /// A calibration with every pixel unset.
    #[must_use]
    pub fn new() -> Self {
        Self {
            a: Array2::from_elem((N_COLUMNS, N_ROWS), f64::NAN),
            b: Array2::from_elem((N_COLUMNS, N_ROWS), f64::NAN),
            c: Array2::from_elem((N_COLUMNS, N_ROWS), f64::NAN),
        }
    }

    /// Sets the parameters of one pixel.
    ///
    /// # Errors
    /// Returns [`Error::InvalidCoordinate`] outside the matrix.
    pub fn set(&mut self, col: u16, row: u16, a: f64, b: f64, c: f64) -> Result<()> {
        let (ci, ri) = (usize::from(col), usize::from(row));
        if ci >= N_COLUMNS || ri >= N_ROWS {
            return Err(Error::InvalidCoordinate { col, row });
        }
        self.a[[ci, ri]] = a;
        self.b[[ci, ri]] = b;
        self.c[[ci, ri]] = c;
        Ok(())
    }

    /// Parses `col,row,a,b,c` lines. Blank lines, `#` comments and a
    /// leading non-numeric header line are skipped.
    ///
    /// # Errors
    /// Returns [`Error::CalibrationError`] for malformed lines.
    pub fn parse_csv(text: &str) -> Result<Self> {
        let mut calibration = Self::new();
        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            if line_no == 0 && fields.first().is_some_and(|f| f.parse::<f64>().is_err()) {
                continue;
            }
            if fields.len() != 5 {
                return Err(Error::CalibrationError(format!(
                    "line {}: expected 5 fields, got {}",
                    line_no + 1,
                    fields.len()
                )));
            }
            let bad = |what: &str| {
                Error::CalibrationError(format!("line {}: invalid {what}", line_no + 1))
            };
            let col: u16 = fields[0].parse().map_err(|_| bad("column"))?;
            let row: u16 = fields[1].parse().map_err(|_| bad("row"))?;
            let a: f64 = fields[2].parse().map_err(|_| bad("a"))?;
            let b: f64 = fields[3].parse().map_err(|_| bad("b"))?;
            let c: f64 = fields[4].parse().map_err(|_| bad("c"))?;
            calibration.set(col, row, a, b, c)?;
        }
        Ok(calibration)
    }

    /// Number of pixels with finite parameters and `a != 0`.
    #[must_use]
    pub fn calibrated_pixels(&self) -> usize {
        self.a
            .iter()
            .zip(self.b.iter())
            .zip(self.c.iter())
            .filter(|((a, b), c)| a.is_finite() && **a != 0.0 && b.is_finite() && c.is_finite())
            .count()
    }

    /// Charge of a ToT measured in a pixel, `None` if the pixel is not
    /// calibrated or the result is not a finite non-negative number.
    #[must_use]
    pub fn charge(&self, col: u16, row: u16, tot: f64) -> Option<f64> {
        let idx = [usize::from(col), usize::from(row)];
        let (a, b, c) = (*self.a.get(idx)?, *self.b.get(idx)?, *self.c.get(idx)?);
        if a == 0.0 {
            return None;
        }
        let q = inverse_tot_response(tot, a, b, c);
        (q.is_finite() && q >= 0.0).then_some(q)
    }

    /// Replaces the ToT in `events.charge` by the rounded calibrated charge.
    ///
    /// Returns the number of hits that got [`UNCALIBRATED_CHARGE`].
    pub fn apply(&self, events: &mut EventBatch) -> usize {
        let mut uncalibrated = 0;
        for i in 0..events.len() {
            let tot = f64::from(events.charge[i]);
            events.charge[i] = match self.charge(events.col[i], events.row[i], tot) {
                Some(q) => q.round().min(f64::from(UNCALIBRATED_CHARGE - 1)) as u16,
                None => {
                    uncalibrated += 1;
                    UNCALIBRATED_CHARGE
                }
            };
        }
        uncalibrated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_inverse_response_roundtrip() {
        let (a, b, c) = (0.2, 3.0, 40.0);
        for q in [10.0, 55.5, 300.0] {
            let tot = a * q + b - c / q;
            assert_relative_eq!(inverse_tot_response(tot, a, b, c), q, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_parse_csv() {
        let text = "col,row,a,b,c\n# comment\n1,2,0.5,1.0,0.0\n\n3,4,1.0,0.0,0.0\n";
        let calibration = TotCalibration::parse_csv(text).unwrap();
        assert_eq!(calibration.calibrated_pixels(), 2);
        assert_relative_eq!(calibration.charge(1, 2, 11.0).unwrap(), 20.0);
        assert_relative_eq!(calibration.charge(3, 4, 7.0).unwrap(), 7.0);
        assert!(calibration.charge(0, 0, 7.0).is_none());
        assert!(calibration.charge(600, 0, 7.0).is_none());
    }

    #[test]
    fn test_parse_csv_errors() {
        assert!(TotCalibration::parse_csv("1,2,3\n").is_err());
        assert!(TotCalibration::parse_csv("1,2,x,1,1\n").is_err());
        assert!(TotCalibration::parse_csv("600,2,1,1,1\n").is_err());
    }

    #[test]
    fn test_apply_marks_uncalibrated() {
        let mut calibration = TotCalibration::new();
        calibration.set(1, 1, 0.5, 0.0, 0.0).unwrap();
        let mut events = EventBatch::default();
        events.push(0, 0, 0, 1, 1, 10, 0, 0);
        events.push(0, 0, 0, 2, 2, 10, 0, 0);

        assert_eq!(calibration.apply(&mut events), 1);
        assert_eq!(events.charge, vec![20, UNCALIBRATED_CHARGE]);
    }
}
