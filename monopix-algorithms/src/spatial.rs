//! Spatial indexing for efficient neighbor lookup.

use std::collections::HashMap;

/// Spatial grid for 2D neighbor queries.
///
/// Cells are `(col_reach + 1) x (row_reach + 1)` pixels, so every point within
/// the reach of a query lies in the 3x3 cell neighborhood around it.
#[derive(Debug, Default)]
pub struct SpatialGrid<T> {
    cell_width: i32,
    cell_height: i32,
    cells: HashMap<(i32, i32), Vec<T>>,
}

impl<T> SpatialGrid<T> {
    /// Create a grid for neighbor queries up to the given reach.
    #[must_use]
    pub fn new(col_reach: u16, row_reach: u16) -> Self {
        Self {
            cell_width: i32::from(col_reach) + 1,
            cell_height: i32::from(row_reach) + 1,
            cells: HashMap::new(),
        }
    }

    /// Clear all data, keeping the cell allocations.
    pub fn clear(&mut self) {
        self.cells.values_mut().for_each(Vec::clear);
    }

    #[inline]
    fn cell(&self, x: i32, y: i32) -> (i32, i32) {
        (x.div_euclid(self.cell_width), y.div_euclid(self.cell_height))
    }

    /// Insert a value at the given coordinates.
    pub fn insert(&mut self, x: i32, y: i32, value: T) {
        let cell = self.cell(x, y);
        self.cells.entry(cell).or_default().push(value);
    }

    /// Values stored in the 3x3 cell neighborhood around a point.
    pub fn query_neighborhood(&self, x: i32, y: i32) -> impl Iterator<Item = &T> + '_ {
        let (cx, cy) = self.cell(x, y);
        (-1..=1)
            .flat_map(move |dx| (-1..=1).map(move |dy| (cx + dx, cy + dy)))
            .filter_map(|cell| self.cells.get(&cell))
            .flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spatial_grid() {
        let mut grid: SpatialGrid<usize> = SpatialGrid::new(5, 5);
        grid.insert(100, 100, 0);
        grid.insert(105, 95, 1);
        grid.insert(300, 300, 2);

        let neighbors: Vec<_> = grid.query_neighborhood(100, 100).collect();
        assert!(neighbors.contains(&&0));
        assert!(neighbors.contains(&&1));
        assert!(!neighbors.contains(&&2));

        grid.clear();
        assert_eq!(grid.query_neighborhood(100, 100).count(), 0);
    }

    #[test]
    fn test_reach_is_covered() {
        let mut grid: SpatialGrid<(i32, i32)> = SpatialGrid::new(2, 0);
        for x in 0..20 {
            grid.insert(x, 7, (x, 7));
        }
        for x in 0..20 {
            let found: Vec<_> = grid.query_neighborhood(x, 7).collect();
            for dx in -2..=2 {
                if (0..20).contains(&(x + dx)) {
                    assert!(found.contains(&&(x + dx, 7)));
                }
            }
        }
    }
}
