//! Cluster shape codes.
//!
//! A cluster that fits into an 8x8 window anchored at its bounding box
//! minimum is encoded as the sum of `1 << morton(dx, dy)` over its occupied
//! cells. Column offsets go to the even bits, row offsets to the odd bits.

use monopix_core::UNKNOWN_SHAPE;

/// Side of the shape window.
pub const SHAPE_WINDOW: u16 = 8;

/// Interleaves the low bits of `x` (even positions) and `y` (odd positions).
#[must_use]
pub fn morton(x: u32, y: u32) -> u64 {
    fn spread(v: u32) -> u64 {
        let mut v = u64::from(v);
        v = (v | (v << 16)) & 0x0000_FFFF_0000_FFFF;
        v = (v | (v << 8)) & 0x00FF_00FF_00FF_00FF;
        v = (v | (v << 4)) & 0x0F0F_0F0F_0F0F_0F0F;
        v = (v | (v << 2)) & 0x3333_3333_3333_3333;
        v = (v | (v << 1)) & 0x5555_5555_5555_5555;
        v
    }
    spread(x) | (spread(y) << 1)
}

/// Shape code of the given member pixels, [`UNKNOWN_SHAPE`] if the bounding
/// box exceeds the window or the far corner cell (7, 7) is occupied.
#[must_use]
pub fn cluster_shape(pixels: &[(u16, u16)]) -> i64 {
    let Some(min_col) = pixels.iter().map(|p| p.0).min() else {
        return UNKNOWN_SHAPE;
    };
    let min_row = pixels.iter().map(|p| p.1).min().unwrap_or(0);
    let max_col = pixels.iter().map(|p| p.0).max().unwrap_or(0);
    let max_row = pixels.iter().map(|p| p.1).max().unwrap_or(0);
    if max_col - min_col >= SHAPE_WINDOW || max_row - min_row >= SHAPE_WINDOW {
        return UNKNOWN_SHAPE;
    }

    let mut occupied = 0u64;
    for &(col, row) in pixels {
        let bit = morton(u32::from(col - min_col), u32::from(row - min_row));
        occupied |= 1 << bit;
    }
    if occupied & (1 << 63) != 0 {
        return UNKNOWN_SHAPE;
    }
    occupied as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_morton_interleaving() {
        assert_eq!(morton(0, 0), 0);
        assert_eq!(morton(1, 0), 1);
        assert_eq!(morton(0, 1), 2);
        assert_eq!(morton(1, 1), 3);
        assert_eq!(morton(2, 0), 4);
        assert_eq!(morton(7, 7), 63);
    }

    #[test]
    fn test_cluster_shapes() {
        assert_eq!(cluster_shape(&[(5, 10)]), 1);
        // vertical pair: (0,0) and (0,1)
        assert_eq!(cluster_shape(&[(5, 10), (5, 11)]), 5);
        // horizontal pair: (0,0) and (1,0)
        assert_eq!(cluster_shape(&[(5, 10), (6, 10)]), 3);
        // repeated pixel counts once
        assert_eq!(cluster_shape(&[(5, 10), (5, 10)]), 1);
    }

    #[test]
    fn test_unknown_shapes() {
        assert_eq!(cluster_shape(&[]), UNKNOWN_SHAPE);
        assert_eq!(cluster_shape(&[(0, 0), (8, 0)]), UNKNOWN_SHAPE);
        assert_eq!(cluster_shape(&[(0, 0), (7, 7)]), UNKNOWN_SHAPE);
        assert_ne!(cluster_shape(&[(0, 0), (7, 6)]), UNKNOWN_SHAPE);
    }
}
