use ndarray::s;

use super::block::FixedShortBlock;
use crate::prelude::{CoreError, CoreResult};

/// One logical region stored as equal-size tiles in row-major order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedShortBlockMatrix {
    tiles_down: usize,
    tiles_across: usize,
    tiles: Vec<FixedShortBlock>,
}

impl FixedShortBlockMatrix {
    /// Validate a tile list, e.g. one read back from storage.
    pub fn from_tiles(
        tiles_down: usize,
        tiles_across: usize,
        tiles: Vec<FixedShortBlock>,
    ) -> CoreResult<Self> {
        if tiles_down == 0 || tiles_across == 0 {
            return Err(CoreError::Tiling("tile grid must be non-empty".into()));
        }
        if tiles.len() != tiles_down * tiles_across {
            return Err(CoreError::Tiling(format!(
                "expected {} tiles for a {}x{} grid, got {}",
                tiles_down * tiles_across,
                tiles_down,
                tiles_across,
                tiles.len()
            )));
        }
        let shape = (tiles[0].rows(), tiles[0].cols());
        if let Some(index) = tiles.iter().position(|t| (t.rows(), t.cols()) != shape) {
            return Err(CoreError::Tiling(format!(
                "tile {} is {}x{}, expected {}x{}",
                index,
                tiles[index].rows(),
                tiles[index].cols(),
                shape.0,
                shape.1
            )));
        }
        Ok(Self {
            tiles_down,
            tiles_across,
            tiles,
        })
    }

    pub fn tiles_down(&self) -> usize {
        self.tiles_down
    }

    pub fn tiles_across(&self) -> usize {
        self.tiles_across
    }

    /// `(rows, cols)` of every tile.
    pub fn tile_shape(&self) -> (usize, usize) {
        (self.tiles[0].rows(), self.tiles[0].cols())
    }

    pub fn tiles(&self) -> &[FixedShortBlock] {
        &self.tiles
    }

    pub fn into_tiles(self) -> Vec<FixedShortBlock> {
        self.tiles
    }

    pub fn tile(&self, tile_row: usize, tile_col: usize) -> Option<&FixedShortBlock> {
        if tile_row >= self.tiles_down || tile_col >= self.tiles_across {
            return None;
        }
        self.tiles.get(tile_row * self.tiles_across + tile_col)
    }

    /// Reassemble the tiles into one block; inverse of [`FixedShortBlock::split`].
    pub fn fuse(&self) -> CoreResult<FixedShortBlock> {
        let (tile_rows, tile_cols) = self.tile_shape();
        let mut fused = FixedShortBlock::nan(tile_rows * self.tiles_down, tile_cols * self.tiles_across);
        for (index, tile) in self.tiles.iter().enumerate() {
            let r0 = (index / self.tiles_across) * tile_rows;
            let c0 = (index % self.tiles_across) * tile_cols;
            fused
                .cells
                .slice_mut(s![r0..r0 + tile_rows, c0..c0 + tile_cols])
                .assign(&tile.cells);
        }
        Ok(fused)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::FixedShort;

    fn numbered(rows: usize, cols: usize) -> FixedShortBlock {
        let mut block = FixedShortBlock::nan(rows, cols);
        for r in 0..rows {
            for c in 0..cols {
                // Leave a diagonal of NaN so missing cells travel through the tiles too.
                if r != c {
                    block.set(r, c, FixedShort::from_raw((r * 100 + c) as i16)).unwrap();
                }
            }
        }
        block
    }

    #[test]
    fn fuse_inverts_split_for_every_dividing_tile_size() {
        let block = numbered(6, 8);
        for rows_per_tile in [1, 2, 3, 6] {
            for cols_per_tile in [1, 2, 4, 8] {
                let tiled = block.split(rows_per_tile, cols_per_tile).unwrap();
                assert_eq!(tiled.fuse().unwrap(), block);
            }
        }
    }

    #[test]
    fn split_orders_tiles_row_major() {
        let block = numbered(4, 4);
        let tiled = block.split(2, 2).unwrap();
        assert_eq!(tiled.tiles().len(), 4);
        // Second tile covers rows 0..2, cols 2..4.
        assert_eq!(tiled.tiles()[1].get(0, 0).unwrap(), block.get(0, 2).unwrap());
        // Third tile covers rows 2..4, cols 0..2.
        assert_eq!(tiled.tile(1, 0).unwrap().get(1, 1).unwrap(), block.get(3, 1).unwrap());
    }

    #[test]
    fn uneven_tiling_is_rejected() {
        let block = numbered(4, 6);
        assert!(matches!(block.split(3, 2), Err(CoreError::Tiling(_))));
        assert!(matches!(block.split(2, 4), Err(CoreError::Tiling(_))));
        assert!(matches!(block.split(0, 2), Err(CoreError::Tiling(_))));
    }

    #[test]
    fn mismatched_tiles_are_rejected() {
        let tiles = vec![FixedShortBlock::nan(2, 2), FixedShortBlock::nan(2, 3)];
        assert!(FixedShortBlockMatrix::from_tiles(1, 2, tiles).is_err());
        assert!(FixedShortBlockMatrix::from_tiles(1, 3, vec![FixedShortBlock::nan(2, 2)]).is_err());
    }
}
