//! Aggregation rules: fold newly decoded spectral blocks into the rollup
//! buckets of each resolution.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::bucket::{BucketKey, RollupTile, TileContribution};
use super::grid::FrequencyGrid;
use crate::capture::SpectralDataBlock;
use crate::clock::Clock;
use crate::lease::{with_lock, LeaseLock};
use crate::math::{ColumnTotal, FixedShort, FixedShortBlock};
use crate::prelude::{CoreError, CoreResult, Resolution};
use crate::store::MetadataStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleExecution {
    #[default]
    Sequential,
    /// One task per rule.
    Concurrent,
}

/// Blocks of one capture file, shared by every rule.
#[derive(Debug, Clone)]
pub struct RuleInput {
    pub station_id: String,
    /// Identifies the file for idempotent merging, normally its location.
    pub source_id: String,
    pub blocks: Vec<SpectralDataBlock>,
}

/// Storage handles a rule needs; cheap to clone into tasks.
#[derive(Clone)]
pub struct RuleContext {
    pub metadata: Arc<dyn MetadataStore>,
    pub lock: Arc<dyn LeaseLock>,
    pub clock: Arc<dyn Clock>,
    pub grid: FrequencyGrid,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuleOutcome {
    pub buckets: usize,
    pub tiles_written: usize,
    /// Tiles that already contained this source.
    pub tiles_skipped: usize,
}

impl RuleOutcome {
    fn absorb(&mut self, other: RuleOutcome) {
        self.buckets += other.buckets;
        self.tiles_written += other.tiles_written;
        self.tiles_skipped += other.tiles_skipped;
    }
}

#[async_trait]
pub trait AggregationRule: Send + Sync {
    fn resolution(&self) -> Resolution;

    async fn apply(&self, input: &RuleInput, ctx: &RuleContext) -> CoreResult<RuleOutcome>;
}

/// Readings of one block averaged onto grid bins.
type BinnedBlock = BTreeMap<u64, FixedShort>;

fn resample(block: &SpectralDataBlock, grid: &FrequencyGrid) -> BinnedBlock {
    let mut bins: BTreeMap<u64, ColumnTotal> = BTreeMap::new();
    for segment in &block.segments {
        for (frequency, reading) in segment.points() {
            bins.entry(grid.bin_of(frequency)).or_default().add(reading);
        }
    }
    bins.into_iter()
        .filter(|(_, total)| total.count > 0)
        .map(|(bin, total)| (bin, total.mean()))
        .collect()
}

/// Rolls blocks up into buckets of one resolution.
#[derive(Debug, Clone, Copy)]
pub struct ResolutionRule {
    resolution: Resolution,
}

impl ResolutionRule {
    pub fn new(resolution: Resolution) -> Self {
        Self { resolution }
    }

    /// Build one contribution per tile that holds a reading. Rows are the
    /// blocks of the bucket; tiles nothing landed in are never allocated.
    fn contributions(
        &self,
        source_id: &str,
        blocks: &[BinnedBlock],
        grid: &FrequencyGrid,
    ) -> CoreResult<Vec<TileContribution>> {
        let mut touched: BTreeMap<u64, FixedShortBlock> = BTreeMap::new();
        for (row, binned) in blocks.iter().enumerate() {
            for (&bin, &reading) in binned {
                touched
                    .entry(grid.tile_of(bin))
                    .or_insert_with(|| FixedShortBlock::nan(blocks.len(), grid.tile_bins))
                    .set(row, grid.offset_in_tile(bin), reading)?;
            }
        }
        Ok(touched
            .iter()
            .map(|(&tile_index, tile)| TileContribution::from_block(tile_index, source_id, tile))
            .filter(TileContribution::has_coverage)
            .collect())
    }

    async fn merge_bucket(
        &self,
        key: &BucketKey,
        contributions: &[TileContribution],
        ctx: &RuleContext,
    ) -> CoreResult<RuleOutcome> {
        let (Some(first), Some(last)) = (contributions.first(), contributions.last()) else {
            return Ok(RuleOutcome::default());
        };
        let range = first.tile_index..=last.tile_index;
        let proposed_id = Uuid::new_v4().to_string();

        with_lock(ctx.lock.as_ref(), &key.lock_name(), &proposed_id, None, || async {
            let mut stored: HashMap<u64, RollupTile> = ctx
                .metadata
                .rollup_tiles(key, range.clone())
                .await?
                .into_iter()
                .map(|tile| (tile.tile_index, tile))
                .collect();

            let now = ctx.clock.now();
            let mut outcome = RuleOutcome {
                buckets: 1,
                ..RuleOutcome::default()
            };
            let mut changed = Vec::new();
            for contribution in contributions {
                let mut tile = stored
                    .remove(&contribution.tile_index)
                    .unwrap_or_else(|| RollupTile::empty(contribution.tile_index, ctx.grid.tile_bins, now));
                if tile.merge(contribution, now)? {
                    changed.push(tile);
                } else {
                    outcome.tiles_skipped += 1;
                }
            }
            outcome.tiles_written = changed.len();
            if !changed.is_empty() {
                ctx.metadata.upsert_rollup_tiles(key, changed).await?;
            }
            Ok::<RuleOutcome, CoreError>(outcome)
        })
        .await
    }
}

#[async_trait]
impl AggregationRule for ResolutionRule {
    fn resolution(&self) -> Resolution {
        self.resolution
    }

    async fn apply(&self, input: &RuleInput, ctx: &RuleContext) -> CoreResult<RuleOutcome> {
        let mut buckets: BTreeMap<DateTime<Utc>, Vec<BinnedBlock>> = BTreeMap::new();
        for block in &input.blocks {
            let start = self.resolution.bucket_start(block.timestamp)?;
            buckets
                .entry(start)
                .or_default()
                .push(resample(block, &ctx.grid));
        }

        let mut outcome = RuleOutcome::default();
        for (start, blocks) in buckets {
            let key = BucketKey::new(input.station_id.as_str(), self.resolution, start);
            let contributions = self.contributions(&input.source_id, &blocks, &ctx.grid)?;
            if contributions.is_empty() {
                debug!("{} has no readings from {}", key, input.source_id);
                continue;
            }
            let merged = self.merge_bucket(&key, &contributions, ctx).await?;
            debug!(
                "{}: {} tiles written, {} already held {}",
                key, merged.tiles_written, merged.tiles_skipped, input.source_id
            );
            outcome.absorb(merged);
        }
        Ok(outcome)
    }
}

/// Ordered rules, one per resolution.
#[derive(Clone)]
pub struct RuleSet {
    rules: Vec<Arc<dyn AggregationRule>>,
}

impl RuleSet {
    pub fn new(rules: Vec<Arc<dyn AggregationRule>>) -> Self {
        Self { rules }
    }

    /// Raw, hourly, daily, weekly and monthly rollups.
    pub fn standard() -> Self {
        Self::new(
            Resolution::ALL
                .iter()
                .map(|&r| Arc::new(ResolutionRule::new(r)) as Arc<dyn AggregationRule>)
                .collect(),
        )
    }

    pub fn resolutions(&self) -> Vec<Resolution> {
        self.rules.iter().map(|r| r.resolution()).collect()
    }

    /// Apply every rule. A failing rule does not stop its siblings; results
    /// come back in rule order either way.
    pub async fn run(
        &self,
        input: Arc<RuleInput>,
        ctx: &RuleContext,
        execution: RuleExecution,
    ) -> Vec<(Resolution, CoreResult<RuleOutcome>)> {
        let mut results = Vec::with_capacity(self.rules.len());
        match execution {
            RuleExecution::Sequential => {
                for rule in &self.rules {
                    results.push((rule.resolution(), rule.apply(&input, ctx).await));
                }
            }
            RuleExecution::Concurrent => {
                let handles: Vec<_> = self
                    .rules
                    .iter()
                    .map(|rule| {
                        let rule = rule.clone();
                        let input = input.clone();
                        let ctx = ctx.clone();
                        let resolution = rule.resolution();
                        (
                            resolution,
                            tokio::spawn(async move { rule.apply(&input, &ctx).await }),
                        )
                    })
                    .collect();
                for (resolution, handle) in handles {
                    let result = handle
                        .await
                        .unwrap_or_else(|e| Err(CoreError::Task(format!("{} rule: {}", resolution, e))));
                    results.push((resolution, result));
                }
            }
        }
        info!(
            "{} rules ran for {} ({:?})",
            results.len(),
            input.source_id,
            execution
        );
        results
    }
}
