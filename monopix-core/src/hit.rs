//! Pixel addressing and per-hit helpers.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Number of pixel columns of the matrix.
pub const N_COLUMNS: usize = 512;
/// Number of pixel rows of the matrix.
pub const N_ROWS: usize = 512;
/// Column value that marks a trigger pseudo-hit in the hit stream.
pub const TRIGGER_COLUMN: u16 = 1023;
/// Leading and trailing edges are 7-bit counters.
pub const TOT_MODULUS: u16 = 128;

/// Time over threshold from the 7-bit edges, `(te - le) mod 128`.
#[inline]
#[must_use]
pub fn tot(le: u8, te: u8) -> u8 {
    te.wrapping_sub(le) & 0x7F
}

/// Pixel coordinate on the matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PixelCoord {
    /// Column.
    pub col: u16,
    /// Row.
    pub row: u16,
}

impl PixelCoord {
    /// Creates a new pixel coordinate.
    #[inline]
    #[must_use]
    pub fn new(col: u16, row: u16) -> Self {
        Self { col, row }
    }

    /// True if the coordinate addresses a real pixel.
    #[inline]
    #[must_use]
    pub fn is_in_matrix(&self) -> bool {
        usize::from(self.col) < N_COLUMNS && usize::from(self.row) < N_ROWS
    }

    /// Chebyshev-style neighbourhood test with separate column and row reach.
    #[inline]
    #[must_use]
    pub fn is_within(&self, other: &Self, col_distance: u16, row_distance: u16) -> bool {
        self.col.abs_diff(other.col) <= col_distance && self.row.abs_diff(other.row) <= row_distance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tot_wraps_modulo_128() {
        assert_eq!(tot(10, 15), 5);
        assert_eq!(tot(120, 3), 11);
        assert_eq!(tot(7, 7), 0);
        for le in 0..128u8 {
            for te in 0..128u8 {
                assert!(u16::from(tot(le, te)) < TOT_MODULUS);
            }
        }
    }

    #[test]
    fn test_pixel_coord_matrix_bounds() {
        assert!(PixelCoord::new(0, 0).is_in_matrix());
        assert!(PixelCoord::new(511, 511).is_in_matrix());
        assert!(!PixelCoord::new(512, 0).is_in_matrix());
        assert!(!PixelCoord::new(TRIGGER_COLUMN, 0).is_in_matrix());
    }

    #[test]
    fn test_pixel_coord_neighbourhood() {
        let center = PixelCoord::new(10, 10);
        assert!(center.is_within(&PixelCoord::new(15, 5), 5, 5));
        assert!(!center.is_within(&PixelCoord::new(16, 10), 5, 5));
        assert!(center.is_within(&PixelCoord::new(11, 10), 1, 0));
        assert!(!center.is_within(&PixelCoord::new(10, 11), 1, 0));
    }
}
