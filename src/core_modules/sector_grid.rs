// THEORY:
// The `SectorGrid` partitions every frame into a fixed `rows x columns` table of
// axis-aligned rectangles, each of which can be switched off on its own. It is
// how calibration masks out everything beyond the projection area, and how an
// operator silences one corner of the room that keeps glinting without touching
// the rest of the view.
//
// Key architectural principles:
// 1.  **Configuration, not state**: the grid is never written by frame
//     processing. Calibration and operators flip flags; every frame pass reads.
// 2.  **Atomic flags**: each cell is an `AtomicBool`, so a runtime update is seen
//     whole by the next frame and never tears a frame mid-computation.
// 3.  **Frame snapshots**: a frame takes a `SectorMask` copy once, up front, so
//     every stage of that frame agrees on which sectors are live.
// 4.  **Pure partition**: sector bounds are derived from the frame size with
//     integer arithmetic; neighbouring sectors share an edge but no pixel, and
//     together they cover the whole frame.

use crate::error::{DetectionError, Result};
use std::sync::atomic::{AtomicBool, Ordering};

/// Largest grid dimension accepted on either axis.
pub const MAX_SECTOR_DIMENSION: usize = 32;

/// Pixel rectangle `[x0, x1) x [y0, y1)` covered by one sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorBounds {
    pub row: usize,
    pub column: usize,
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl SectorBounds {
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x0 as f64 && x < self.x1 as f64 && y >= self.y0 as f64 && y < self.y1 as f64
    }

    pub fn width(&self) -> u32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> u32 {
        self.y1 - self.y0
    }
}

fn edge(index: usize, count: usize, extent: u32) -> u32 {
    (index as u64 * extent as u64 / count as u64) as u32
}

/// The shared, runtime-adjustable sector table.
#[derive(Debug)]
pub struct SectorGrid {
    rows: usize,
    columns: usize,
    enabled: Vec<AtomicBool>,
}

impl SectorGrid {
    /// A grid with every sector enabled.
    pub fn new(rows: usize, columns: usize) -> Result<Self> {
        if !(1..=MAX_SECTOR_DIMENSION).contains(&rows)
            || !(1..=MAX_SECTOR_DIMENSION).contains(&columns)
        {
            return Err(DetectionError::rejected(
                "sector_grid",
                format!("{rows}x{columns} is outside 1..={MAX_SECTOR_DIMENSION}"),
            ));
        }
        let enabled = (0..rows * columns).map(|_| AtomicBool::new(true)).collect();
        Ok(Self {
            rows,
            columns,
            enabled,
        })
    }

    /// Builds a grid from a row-major table of flags, e.g. a calibration result.
    pub fn from_mask(mask: &[Vec<bool>]) -> Result<Self> {
        let columns = mask.first().map(Vec::len).unwrap_or(0);
        let grid = Self::new(mask.len(), columns)?;
        grid.apply_mask(mask)?;
        Ok(grid)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    fn index(&self, row: usize, column: usize) -> Option<usize> {
        (row < self.rows && column < self.columns).then(|| row * self.columns + column)
    }

    /// Out-of-range cells read as disabled.
    pub fn is_enabled(&self, row: usize, column: usize) -> bool {
        self.index(row, column)
            .map(|i| self.enabled[i].load(Ordering::Acquire))
            .unwrap_or(false)
    }

    pub fn set_enabled(&self, row: usize, column: usize, enabled: bool) -> Result<()> {
        let index = self.index(row, column).ok_or_else(|| {
            DetectionError::rejected(
                "sector",
                format!(
                    "({row}, {column}) is outside the {}x{} grid",
                    self.rows, self.columns
                ),
            )
        })?;
        self.enabled[index].store(enabled, Ordering::Release);
        log::debug!("sector ({row}, {column}) enabled = {enabled}");
        Ok(())
    }

    pub fn set_all(&self, enabled: bool) {
        for flag in &self.enabled {
            flag.store(enabled, Ordering::Release);
        }
    }

    /// Applies a whole table. A table of the wrong shape is rejected untouched.
    pub fn apply_mask(&self, mask: &[Vec<bool>]) -> Result<()> {
        let shape_ok =
            mask.len() == self.rows && mask.iter().all(|row| row.len() == self.columns);
        if !shape_ok {
            return Err(DetectionError::rejected(
                "sector_mask",
                format!("mask shape does not match the {}x{} grid", self.rows, self.columns),
            ));
        }
        for (row, flags) in mask.iter().enumerate() {
            for (column, &enabled) in flags.iter().enumerate() {
                self.enabled[row * self.columns + column].store(enabled, Ordering::Release);
            }
        }
        Ok(())
    }

    pub fn snapshot(&self) -> SectorMask {
        SectorMask {
            rows: self.rows,
            columns: self.columns,
            enabled: self
                .enabled
                .iter()
                .map(|flag| flag.load(Ordering::Acquire))
                .collect(),
        }
    }
}

/// A frame-local copy of the grid's flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectorMask {
    rows: usize,
    columns: usize,
    enabled: Vec<bool>,
}

impl SectorMask {
    pub fn all_enabled(rows: usize, columns: usize) -> Self {
        Self {
            rows,
            columns,
            enabled: vec![true; rows * columns],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn is_enabled(&self, row: usize, column: usize) -> bool {
        row < self.rows && column < self.columns && self.enabled[row * self.columns + column]
    }

    pub fn any_enabled(&self) -> bool {
        self.enabled.iter().any(|&e| e)
    }

    pub fn bounds(&self, row: usize, column: usize, width: u32, height: u32) -> SectorBounds {
        SectorBounds {
            row,
            column,
            x0: edge(column, self.columns, width),
            x1: edge(column + 1, self.columns, width),
            y0: edge(row, self.rows, height),
            y1: edge(row + 1, self.rows, height),
        }
    }

    /// Pixel rows `[y0, y1)` of each sector row.
    pub fn row_bands(&self, height: u32) -> Vec<(u32, u32)> {
        (0..self.rows)
            .map(|row| (edge(row, self.rows, height), edge(row + 1, self.rows, height)))
            .collect()
    }

    /// The sector a point falls in, or `None` outside the frame.
    pub fn sector_of(&self, x: f64, y: f64, width: u32, height: u32) -> Option<(usize, usize)> {
        if !(x >= 0.0 && y >= 0.0 && x < width as f64 && y < height as f64) {
            return None;
        }
        let row = (0..self.rows).find(|&r| y < edge(r + 1, self.rows, height) as f64)?;
        let column = (0..self.columns).find(|&c| x < edge(c + 1, self.columns, width) as f64)?;
        Some((row, column))
    }

    /// True when the point lies inside an enabled sector.
    pub fn admits(&self, x: f64, y: f64, width: u32, height: u32) -> bool {
        self.sector_of(x, y, width, height)
            .is_some_and(|(row, column)| self.is_enabled(row, column))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sectors_partition_the_frame() {
        let mask = SectorMask::all_enabled(3, 3);
        let (width, height) = (641, 479);
        let mut covered = vec![0u8; (width * height) as usize];
        for row in 0..3 {
            for column in 0..3 {
                let b = mask.bounds(row, column, width, height);
                for y in b.y0..b.y1 {
                    for x in b.x0..b.x1 {
                        covered[(y * width + x) as usize] += 1;
                    }
                }
            }
        }
        assert!(covered.iter().all(|&c| c == 1));
    }

    #[test]
    fn sector_of_agrees_with_bounds() {
        let mask = SectorMask::all_enabled(3, 3);
        for &(x, y) in &[(0.0, 0.0), (213.0, 159.0), (213.4, 160.0), (639.9, 479.9), (427.0, 320.0)] {
            let (row, column) = mask.sector_of(x, y, 640, 480).unwrap();
            assert!(mask.bounds(row, column, 640, 480).contains(x, y), "{x},{y}");
        }
        assert_eq!(mask.sector_of(640.0, 10.0, 640, 480), None);
        assert_eq!(mask.sector_of(-0.5, 10.0, 640, 480), None);
    }

    #[test]
    fn disabling_a_sector_is_visible_in_the_next_snapshot() {
        let grid = SectorGrid::new(3, 3).unwrap();
        let before = grid.snapshot();
        grid.set_enabled(0, 2, false).unwrap();

        assert!(before.is_enabled(0, 2));
        assert!(!grid.snapshot().is_enabled(0, 2));
        assert!(!grid.snapshot().admits(600.0, 10.0, 640, 480));
        assert!(grid.snapshot().admits(10.0, 10.0, 640, 480));
    }

    #[test]
    fn invalid_updates_are_rejected() {
        let grid = SectorGrid::new(3, 3).unwrap();
        assert!(grid.set_enabled(3, 0, false).is_err());
        assert!(grid.apply_mask(&[vec![false; 3]]).is_err());
        assert!(grid.snapshot().any_enabled());
        assert!(SectorGrid::new(0, 3).is_err());
        assert!(!grid.is_enabled(7, 7));
    }

    #[test]
    fn from_mask_keeps_shape_and_flags() {
        let mut table = vec![vec![true; 3]; 3];
        table[0] = vec![false; 3];
        let grid = SectorGrid::from_mask(&table).unwrap();
        assert!(!grid.is_enabled(0, 1));
        assert!(grid.is_enabled(1, 1));
        grid.set_all(true);
        assert!(grid.is_enabled(0, 1));
    }
}
