use ndarray::{s, Array2, Axis};

use super::fixed::FixedShort;
use super::stats::{ColumnTotal, StatsHelper};
use super::tiling::FixedShortBlockMatrix;
use crate::prelude::{CoreError, CoreResult, ReadingKind};

/// NaN-aware column reducer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reducer {
    Minimum,
    Maximum,
    Average,
}

impl Reducer {
    pub fn reduce<I: IntoIterator<Item = FixedShort>>(self, values: I) -> FixedShort {
        match self {
            Reducer::Minimum => StatsHelper::nan_min(values),
            Reducer::Maximum => StatsHelper::nan_max(values),
            Reducer::Average => StatsHelper::nan_mean(values),
        }
    }
}

impl From<ReadingKind> for Reducer {
    fn from(kind: ReadingKind) -> Self {
        match kind {
            ReadingKind::Minimum => Reducer::Minimum,
            ReadingKind::Maximum => Reducer::Maximum,
            ReadingKind::Average => Reducer::Average,
        }
    }
}

/// Dense `rows x cols` matrix of fixed-precision readings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedShortBlock {
    pub(crate) cells: Array2<i16>,
}

impl FixedShortBlock {
    pub fn new(rows: usize, cols: usize, fill: FixedShort) -> Self {
        Self {
            cells: Array2::from_elem((rows, cols), fill.raw()),
        }
    }

    /// Block with every cell marked as not measured.
    pub fn nan(rows: usize, cols: usize) -> Self {
        Self::new(rows, cols, FixedShort::NAN)
    }

    pub fn from_rows(rows: &[Vec<FixedShort>]) -> CoreResult<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        let mut block = Self::nan(rows.len(), cols);
        for (r, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(CoreError::Tiling(format!(
                    "row {} has {} cells, expected {}",
                    r,
                    row.len(),
                    cols
                )));
            }
            for (c, value) in row.iter().enumerate() {
                block.cells[(r, c)] = value.raw();
            }
        }
        Ok(block)
    }

    pub fn rows(&self) -> usize {
        self.cells.nrows()
    }

    pub fn cols(&self) -> usize {
        self.cells.ncols()
    }

    pub fn get(&self, row: usize, col: usize) -> CoreResult<FixedShort> {
        self.cells
            .get((row, col))
            .map(|&raw| FixedShort::from_raw(raw))
            .ok_or_else(|| self.out_of_bounds(row, col))
    }

    pub fn set(&mut self, row: usize, col: usize, value: FixedShort) -> CoreResult<()> {
        let error = self.out_of_bounds(row, col);
        let cell = self.cells.get_mut((row, col)).ok_or(error)?;
        *cell = value.raw();
        Ok(())
    }

    pub fn row(&self, row: usize) -> CoreResult<Vec<FixedShort>> {
        if row >= self.rows() {
            return Err(self.out_of_bounds(row, 0));
        }
        Ok(self
            .cells
            .row(row)
            .iter()
            .map(|&raw| FixedShort::from_raw(raw))
            .collect())
    }

    /// Number of cells holding a real reading.
    pub fn covered_cells(&self) -> usize {
        self.cells.iter().filter(|&&raw| raw != i16::MIN).count()
    }

    /// Collapse every column to one value; all-NaN columns stay NaN.
    pub fn reduce_columns(&self, reducer: Reducer) -> Vec<FixedShort> {
        self.cells
            .axis_iter(Axis(1))
            .map(|column| reducer.reduce(column.iter().map(|&raw| FixedShort::from_raw(raw))))
            .collect()
    }

    pub fn column_totals(&self) -> Vec<ColumnTotal> {
        self.cells
            .axis_iter(Axis(1))
            .map(|column| StatsHelper::nan_total(column.iter().map(|&raw| FixedShort::from_raw(raw))))
            .collect()
    }

    /// Cut the block into equal tiles, returned in row-major tile order.
    pub fn split(&self, rows_per_tile: usize, cols_per_tile: usize) -> CoreResult<FixedShortBlockMatrix> {
        let (rows, cols) = self.cells.dim();
        if rows_per_tile == 0 || cols_per_tile == 0 {
            return Err(CoreError::Tiling("tile dimensions must be non-zero".into()));
        }
        if rows == 0 || cols == 0 {
            return Err(CoreError::Tiling(format!("cannot tile an empty {}x{} block", rows, cols)));
        }
        if rows % rows_per_tile != 0 || cols % cols_per_tile != 0 {
            return Err(CoreError::Tiling(format!(
                "{}x{} block does not divide into {}x{} tiles",
                rows, cols, rows_per_tile, cols_per_tile
            )));
        }

        let tiles_down = rows / rows_per_tile;
        let tiles_across = cols / cols_per_tile;
        let mut tiles = Vec::with_capacity(tiles_down * tiles_across);
        for tile_row in 0..tiles_down {
            for tile_col in 0..tiles_across {
                let r0 = tile_row * rows_per_tile;
                let c0 = tile_col * cols_per_tile;
                let cells = self
                    .cells
                    .slice(s![r0..r0 + rows_per_tile, c0..c0 + cols_per_tile])
                    .to_owned();
                tiles.push(FixedShortBlock { cells });
            }
        }
        FixedShortBlockMatrix::from_tiles(tiles_down, tiles_across, tiles)
    }

    fn out_of_bounds(&self, row: usize, col: usize) -> CoreError {
        CoreError::OutOfBounds {
            row,
            col,
            rows: self.rows(),
            cols: self.cols(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db(value: f32) -> FixedShort {
        FixedShort::from_db(value)
    }

    #[test]
    fn new_block_is_prefilled() {
        let block = FixedShortBlock::nan(2, 3);
        assert_eq!(block.covered_cells(), 0);
        assert!(block.get(1, 2).unwrap().is_nan());

        let zeros = FixedShortBlock::new(2, 2, db(0.0));
        assert_eq!(zeros.covered_cells(), 4);
    }

    #[test]
    fn access_is_bounds_checked() {
        let mut block = FixedShortBlock::nan(2, 2);
        assert!(matches!(block.get(2, 0), Err(CoreError::OutOfBounds { row: 2, .. })));
        assert!(block.set(0, 5, db(1.0)).is_err());
        block.set(1, 1, db(-42.5)).unwrap();
        assert_eq!(block.get(1, 1).unwrap().to_db(), -42.5);
    }

    #[test]
    fn all_nan_column_reduces_to_nan_for_every_reducer() {
        let mut block = FixedShortBlock::nan(3, 2);
        block.set(0, 1, db(-80.0)).unwrap();
        for reducer in [Reducer::Minimum, Reducer::Maximum, Reducer::Average] {
            let row = block.reduce_columns(reducer);
            assert!(row[0].is_nan(), "{:?} fabricated a value", reducer);
        }
    }

    #[test]
    fn single_reading_column_reduces_to_that_reading() {
        let mut block = FixedShortBlock::nan(4, 1);
        block.set(2, 0, db(-61.25)).unwrap();
        for reducer in [Reducer::Minimum, Reducer::Maximum, Reducer::Average] {
            assert_eq!(block.reduce_columns(reducer)[0].to_db(), -61.25);
        }
    }

    #[test]
    fn column_totals_skip_missing_cells() {
        let block = FixedShortBlock::from_rows(&[
            vec![db(10.0), FixedShort::NAN],
            vec![db(20.0), FixedShort::NAN],
        ])
        .unwrap();
        let totals = block.column_totals();
        assert_eq!(totals[0], ColumnTotal { sum: 3000, count: 2 });
        assert_eq!(totals[1], ColumnTotal::default());
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let rows = vec![vec![db(1.0), db(2.0)], vec![db(3.0)]];
        assert!(FixedShortBlock::from_rows(&rows).is_err());
    }
}
