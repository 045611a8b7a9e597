use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::grid::FrequencyGrid;
use crate::math::{ColumnTotal, FixedShort, FixedShortBlock, FixedShortBlockMatrix, Reducer};
use crate::prelude::{CoreError, CoreResult, ReadingKind, Resolution};
use crate::store::MetadataStore;

/// Identity of one rollup bucket.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BucketKey {
    pub station_id: String,
    pub resolution: Resolution,
    pub bucket_start: DateTime<Utc>,
}

impl BucketKey {
    pub fn new(station_id: impl Into<String>, resolution: Resolution, bucket_start: DateTime<Utc>) -> Self {
        Self {
            station_id: station_id.into(),
            resolution,
            bucket_start,
        }
    }

    /// Key of the bucket `timestamp` falls into.
    pub fn containing(station_id: &str, resolution: Resolution, timestamp: DateTime<Utc>) -> CoreResult<Self> {
        Ok(Self::new(station_id, resolution, resolution.bucket_start(timestamp)?))
    }

    /// Name of the lock object guarding this bucket.
    pub fn lock_name(&self) -> String {
        format!(
            "{}/{}/{}",
            self.station_id,
            self.resolution,
            self.bucket_start.format("%Y%m%dT%H%M%S%.3fZ")
        )
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} @ {}",
            self.station_id,
            self.resolution,
            self.bucket_start.to_rfc3339()
        )
    }
}

/// One file's reduced readings for one tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileContribution {
    pub tile_index: u64,
    pub source_id: String,
    pub minimum: Vec<FixedShort>,
    pub maximum: Vec<FixedShort>,
    pub totals: Vec<ColumnTotal>,
}

impl TileContribution {
    /// Reduce a `rows x tile_bins` block (one row per spectral block).
    pub fn from_block(tile_index: u64, source_id: &str, block: &FixedShortBlock) -> Self {
        Self {
            tile_index,
            source_id: source_id.to_string(),
            minimum: block.reduce_columns(Reducer::Minimum),
            maximum: block.reduce_columns(Reducer::Maximum),
            totals: block.column_totals(),
        }
    }

    pub fn has_coverage(&self) -> bool {
        self.totals.iter().any(|t| t.count > 0)
    }
}

/// Persisted state of one frequency tile of a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollupTile {
    pub tile_index: u64,
    pub minimum: Vec<FixedShort>,
    pub maximum: Vec<FixedShort>,
    pub totals: Vec<ColumnTotal>,
    /// Files already folded into this tile.
    pub sources: BTreeSet<String>,
    pub updated_at: DateTime<Utc>,
}

impl RollupTile {
    pub fn empty(tile_index: u64, bins: usize, now: DateTime<Utc>) -> Self {
        Self {
            tile_index,
            minimum: vec![FixedShort::NAN; bins],
            maximum: vec![FixedShort::NAN; bins],
            totals: vec![ColumnTotal::default(); bins],
            sources: BTreeSet::new(),
            updated_at: now,
        }
    }

    pub fn bins(&self) -> usize {
        self.totals.len()
    }

    /// Fold `contribution` in. Returns `false` and leaves the tile untouched
    /// when that source was merged before.
    pub fn merge(&mut self, contribution: &TileContribution, now: DateTime<Utc>) -> CoreResult<bool> {
        if contribution.tile_index != self.tile_index || contribution.totals.len() != self.bins() {
            return Err(CoreError::Tiling(format!(
                "contribution for tile {} ({} bins) does not fit tile {} ({} bins)",
                contribution.tile_index,
                contribution.totals.len(),
                self.tile_index,
                self.bins()
            )));
        }
        if self.sources.contains(&contribution.source_id) {
            return Ok(false);
        }
        for bin in 0..self.bins() {
            self.minimum[bin] = Reducer::Minimum.reduce([self.minimum[bin], contribution.minimum[bin]]);
            self.maximum[bin] = Reducer::Maximum.reduce([self.maximum[bin], contribution.maximum[bin]]);
            self.totals[bin] = self.totals[bin].merge(contribution.totals[bin]);
        }
        self.sources.insert(contribution.source_id.clone());
        self.updated_at = now;
        Ok(true)
    }

    pub fn reading(&self, kind: ReadingKind, offset: usize) -> Option<FixedShort> {
        match kind {
            ReadingKind::Minimum => self.minimum.get(offset).copied(),
            ReadingKind::Maximum => self.maximum.get(offset).copied(),
            ReadingKind::Average => self.totals.get(offset).map(|t| t.mean()),
        }
    }

    /// `3 x bins` block with Minimum, Maximum and Average rows.
    pub fn summary(&self) -> CoreResult<FixedShortBlock> {
        let average: Vec<FixedShort> = self.totals.iter().map(|t| t.mean()).collect();
        FixedShortBlock::from_rows(&[self.minimum.clone(), self.maximum.clone(), average])
    }
}

/// Assembled view of a bucket: every tile from the lowest to the highest
/// stored one, fused into one summary block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollupBucket {
    pub key: BucketKey,
    pub grid: FrequencyGrid,
    pub first_bin: u64,
    /// Rows follow [`ReadingKind::ALL`].
    pub summary: FixedShortBlock,
    pub counts: Vec<u32>,
    pub sources: BTreeSet<String>,
}

impl RollupBucket {
    pub fn assemble(key: BucketKey, grid: FrequencyGrid, mut tiles: Vec<RollupTile>) -> CoreResult<Self> {
        tiles.sort_by_key(|t| t.tile_index);
        let (first, last) = match (tiles.first(), tiles.last()) {
            (Some(first), Some(last)) => (first.tile_index, last.tile_index),
            _ => return Err(CoreError::Tiling(format!("bucket {} has no tiles", key))),
        };

        let mut stored = tiles.into_iter().peekable();
        let mut blocks = Vec::new();
        let mut counts = Vec::new();
        let mut sources = BTreeSet::new();
        for index in first..=last {
            let tile = if stored.peek().map(|t| t.tile_index) == Some(index) {
                stored.next()
            } else {
                None
            };
            let tile = tile.unwrap_or_else(|| RollupTile::empty(index, grid.tile_bins, key.bucket_start));
            if tile.bins() != grid.tile_bins {
                return Err(CoreError::Tiling(format!(
                    "tile {} of {} has {} bins, grid expects {}",
                    index,
                    key,
                    tile.bins(),
                    grid.tile_bins
                )));
            }
            blocks.push(tile.summary()?);
            counts.extend(tile.totals.iter().map(|t| t.count));
            sources.extend(tile.sources.iter().cloned());
        }

        let tiles_across = blocks.len();
        let summary = FixedShortBlockMatrix::from_tiles(1, tiles_across, blocks)?.fuse()?;
        Ok(Self {
            first_bin: grid.first_bin_of_tile(first),
            key,
            grid,
            summary,
            counts,
            sources,
        })
    }

    /// Read and assemble a bucket; `None` when nothing was stored for it.
    pub async fn load(store: &dyn MetadataStore, key: &BucketKey, grid: FrequencyGrid) -> CoreResult<Option<Self>> {
        let tiles = store.rollup_tiles(key, 0..=u64::MAX).await?;
        if tiles.is_empty() {
            return Ok(None);
        }
        Self::assemble(key.clone(), grid, tiles).map(Some)
    }

    fn column_of(&self, frequency_hz: u64) -> Option<usize> {
        let bin = self.grid.bin_of(frequency_hz);
        let offset = usize::try_from(bin.checked_sub(self.first_bin)?).ok()?;
        (offset < self.counts.len()).then_some(offset)
    }

    pub fn reading_at(&self, kind: ReadingKind, frequency_hz: u64) -> Option<FixedShort> {
        let column = self.column_of(frequency_hz)?;
        let row = match kind {
            ReadingKind::Minimum => 0,
            ReadingKind::Maximum => 1,
            ReadingKind::Average => 2,
        };
        self.summary.get(row, column).ok()
    }

    pub fn count_at(&self, frequency_hz: u64) -> u32 {
        self.column_of(frequency_hz)
            .and_then(|column| self.counts.get(column).copied())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap()
    }

    fn contribution(tile: u64, source: &str, rows: &[Vec<f32>]) -> TileContribution {
        let rows: Vec<Vec<FixedShort>> = rows
            .iter()
            .map(|r| r.iter().map(|&v| FixedShort::from_db(v)).collect())
            .collect();
        TileContribution::from_block(tile, source, &FixedShortBlock::from_rows(&rows).unwrap())
    }

    #[test]
    fn merging_keeps_extremes_and_weighted_mean() {
        let mut tile = RollupTile::empty(0, 2, now());
        let heavy = contribution(0, "a", &[vec![-90.0, f32::NAN], vec![-90.0, -50.0], vec![-90.0, f32::NAN]]);
        let light = contribution(0, "b", &[vec![-60.0, f32::NAN]]);
        assert!(tile.merge(&heavy, now()).unwrap());
        assert!(tile.merge(&light, now()).unwrap());

        assert_eq!(tile.reading(ReadingKind::Minimum, 0).unwrap().to_db(), -90.0);
        assert_eq!(tile.reading(ReadingKind::Maximum, 0).unwrap().to_db(), -60.0);
        assert_eq!(tile.reading(ReadingKind::Average, 0).unwrap().to_db(), -82.5);
        assert_eq!(tile.totals[1].count, 1);
    }

    #[test]
    fn merging_the_same_source_twice_is_a_no_op() {
        let mut tile = RollupTile::empty(3, 1, now());
        let once = contribution(3, "file-1", &[vec![-70.0]]);
        assert!(tile.merge(&once, now()).unwrap());
        let snapshot = tile.clone();
        assert!(!tile.merge(&once, now()).unwrap());
        assert_eq!(tile, snapshot);
    }

    #[test]
    fn sources_grow_by_one_per_distinct_file() {
        let mut tile = RollupTile::empty(0, 1, now());
        for round in 0..3 {
            for file in 0..4 {
                let source = format!("scans/st/{}.bin", file);
                tile.merge(&contribution(0, &source, &[vec![-60.0 - round as f32]]), now())
                    .unwrap();
            }
        }
        assert_eq!(tile.sources.len(), 4);
        assert_eq!(tile.totals[0].count, 4);
    }

    #[test]
    fn mismatched_contribution_is_rejected() {
        let mut tile = RollupTile::empty(0, 2, now());
        assert!(tile.merge(&contribution(1, "x", &[vec![1.0, 2.0]]), now()).is_err());
        assert!(tile.merge(&contribution(0, "x", &[vec![1.0]]), now()).is_err());
    }

    #[test]
    fn assembled_bucket_fills_gaps_with_nan() {
        let grid = FrequencyGrid::new(1_000, 2).unwrap();
        let key = BucketKey::new("st", Resolution::Hourly, now());
        let mut low = RollupTile::empty(1, 2, now());
        low.merge(&contribution(1, "f", &[vec![-10.0, -20.0]]), now()).unwrap();
        let mut high = RollupTile::empty(3, 2, now());
        high.merge(&contribution(3, "f", &[vec![-30.0, f32::NAN]]), now()).unwrap();

        let bucket = RollupBucket::assemble(key, grid, vec![high, low]).unwrap();
        assert_eq!(bucket.first_bin, 2);
        assert_eq!(bucket.summary.cols(), 6);
        assert_eq!(bucket.reading_at(ReadingKind::Average, 3_500).unwrap().to_db(), -20.0);
        assert!(bucket.reading_at(ReadingKind::Average, 4_000).unwrap().is_nan());
        assert_eq!(bucket.reading_at(ReadingKind::Maximum, 6_999).unwrap().to_db(), -30.0);
        assert_eq!(bucket.count_at(5_000), 0);
        assert!(bucket.reading_at(ReadingKind::Average, 1_000).is_none());
        assert!(bucket.reading_at(ReadingKind::Average, 8_000).is_none());
    }

    #[test]
    fn lock_names_separate_resolutions() {
        let hourly = BucketKey::new("st", Resolution::Hourly, now()).lock_name();
        let daily = BucketKey::new("st", Resolution::Daily, now()).lock_name();
        assert_ne!(hourly, daily);
        assert_eq!(hourly, "st/hourly/20240701T000000.000Z");
    }
}
