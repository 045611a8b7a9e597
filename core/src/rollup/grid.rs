use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::prelude::{CoreError, CoreResult};

/// Global frequency grid shared by every station and resolution.
///
/// Bin `b` covers `[b * bin_width_hz, (b + 1) * bin_width_hz)`; tile `t` holds
/// bins `t * tile_bins .. (t + 1) * tile_bins`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrequencyGrid {
    pub bin_width_hz: u64,
    pub tile_bins: usize,
}

impl Default for FrequencyGrid {
    fn default() -> Self {
        Self {
            bin_width_hz: 100_000,
            tile_bins: 64,
        }
    }
}

impl FrequencyGrid {
    pub fn new(bin_width_hz: u64, tile_bins: usize) -> CoreResult<Self> {
        let grid = Self {
            bin_width_hz,
            tile_bins,
        };
        grid.validate()?;
        Ok(grid)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.bin_width_hz == 0 || self.tile_bins == 0 {
            return Err(CoreError::Configuration(format!(
                "frequency grid needs a non-zero bin width and tile size (got {} Hz x {})",
                self.bin_width_hz, self.tile_bins
            )));
        }
        Ok(())
    }

    pub fn bin_of(&self, frequency_hz: u64) -> u64 {
        frequency_hz / self.bin_width_hz
    }

    pub fn tile_of(&self, bin: u64) -> u64 {
        bin / self.tile_bins as u64
    }

    /// Column of `bin` inside its tile.
    pub fn offset_in_tile(&self, bin: u64) -> usize {
        // Always below `tile_bins`, so the cast cannot truncate.
        (bin % self.tile_bins as u64) as usize
    }

    /// Lower edge of `bin`.
    pub fn bin_frequency(&self, bin: u64) -> u64 {
        bin.saturating_mul(self.bin_width_hz)
    }

    pub fn first_bin_of_tile(&self, tile: u64) -> u64 {
        tile.saturating_mul(self.tile_bins as u64)
    }

    /// Tiles touched by the bins in `bins`.
    pub fn tiles_for(&self, bins: RangeInclusive<u64>) -> RangeInclusive<u64> {
        self.tile_of(*bins.start())..=self.tile_of(*bins.end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequencies_land_in_aligned_bins_and_tiles() {
        let grid = FrequencyGrid::new(1_000, 4).unwrap();
        assert_eq!(grid.bin_of(999), 0);
        assert_eq!(grid.bin_of(1_000), 1);
        assert_eq!(grid.tile_of(3), 0);
        assert_eq!(grid.tile_of(4), 1);
        assert_eq!(grid.first_bin_of_tile(2), 8);
        assert_eq!(grid.offset_in_tile(9), 1);
        assert_eq!(grid.tiles_for(3..=9), 0..=2);
    }

    #[test]
    fn degenerate_grids_are_rejected() {
        assert!(FrequencyGrid::new(0, 4).is_err());
        assert!(FrequencyGrid::new(10, 0).is_err());
    }
}
