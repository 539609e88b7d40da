//! Access-pattern resolution
//!
//! An [`AccessPlanner`] computes the file offset for each successive operation
//! of one worker. The pattern is a closed set:
//!
//! - **Sequential**: advance by one block, wrapping to offset 0 when the next
//!   block would cross the end of the file (ring-buffer file semantics).
//! - **Random**: walk a shared, pre-shuffled permutation of all block-aligned
//!   offsets. One full traversal visits every block exactly once, unlike
//!   draw-per-call randomness which repeats and skips.
//! - **Repeat**: hammer the configured start offset, for worst-case
//!   single-block contention measurements.
//! - **Zipf**: skewed hot-spot access over block indices, biased toward low
//!   offsets.
//!
//! All offsets returned are block-aligned, which keeps them valid for
//! O_DIRECT without further adjustment.

use crate::Result;
use anyhow::Context;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Zipf};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Zipf exponent for the skewed pattern. Biases heavily toward low block
/// indices while keeping a long tail.
pub const ZIPF_SKEW: f64 = 1.07;

/// Which offset each successive operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AccessPattern {
    Sequential,
    Random,
    Repeat,
    Zipf,
}

impl std::fmt::Display for AccessPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AccessPattern::Sequential => "sequential",
            AccessPattern::Random => "random",
            AccessPattern::Repeat => "repeat",
            AccessPattern::Zipf => "zipf",
        };
        f.write_str(name)
    }
}

/// Shuffled permutation of every block-aligned offset in a file.
///
/// Built once, single-threaded, then shared read-only across all workers on
/// the same file. Workers keep independent cursors into it, so they avoid
/// lock-step collisions while each still covers every offset over one full
/// traversal.
#[derive(Debug)]
pub struct RandomMap {
    blocks: Vec<u64>,
    block_size: u64,
}

impl RandomMap {
    /// Shuffle the block indices `0..file_size / block_size`.
    pub fn new(file_size: u64, block_size: u64) -> Self {
        assert!(block_size > 0, "block size must be nonzero");
        let num_blocks = (file_size / block_size).max(1);

        let mut blocks: Vec<u64> = (0..num_blocks).collect();
        let mut rng = Xoshiro256PlusPlus::from_entropy();
        blocks.shuffle(&mut rng);

        Self { blocks, block_size }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Byte offset for the given cursor, wrapping modulo the map length.
    pub fn offset_at(&self, cursor: usize) -> u64 {
        self.blocks[cursor % self.blocks.len()] * self.block_size
    }
}

enum PlannerState {
    Sequential { position: u64 },
    Random { map: Arc<RandomMap>, cursor: usize },
    Repeat,
    Zipf { dist: Zipf<f64>, rng: Xoshiro256PlusPlus },
}

/// Per-worker offset generator.
///
/// Owns only private cursor state; the random permutation itself is shared
/// read-only. Never performs I/O and never fails after construction.
pub struct AccessPlanner {
    block_size: u64,
    file_size: u64,
    start_offset: u64,
    state: PlannerState,
}

impl AccessPlanner {
    /// Build a planner for one worker.
    ///
    /// `Random` requires the shared map built for the same file/block size;
    /// the worker's cursor is seeded at an independent random start index.
    pub fn new(
        pattern: AccessPattern,
        block_size: u64,
        file_size: u64,
        start_offset: u64,
        random_map: Option<Arc<RandomMap>>,
    ) -> Result<Self> {
        let state = match pattern {
            AccessPattern::Sequential => PlannerState::Sequential {
                position: start_offset,
            },
            AccessPattern::Random => {
                let map = random_map.context("random pattern requires a shared offset map")?;
                let mut rng = Xoshiro256PlusPlus::from_entropy();
                let cursor = rng.gen_range(0..map.len());
                PlannerState::Random { map, cursor }
            }
            AccessPattern::Repeat => PlannerState::Repeat,
            AccessPattern::Zipf => {
                let num_blocks = (file_size / block_size).max(1);
                let dist = Zipf::new(num_blocks, ZIPF_SKEW)
                    .map_err(|e| anyhow::anyhow!("zipf construction failed: {}", e))?;
                PlannerState::Zipf {
                    dist,
                    rng: Xoshiro256PlusPlus::from_entropy(),
                }
            }
        };

        Ok(Self {
            block_size,
            file_size,
            start_offset,
            state,
        })
    }

    /// Offset for the next operation. Always block-aligned and within
    /// `[0, file_size - block_size]` for files at least one block long.
    pub fn next_offset(&mut self) -> u64 {
        match &mut self.state {
            PlannerState::Sequential { position } => {
                if *position + self.block_size > self.file_size {
                    *position = 0;
                }
                let offset = *position;
                *position += self.block_size;
                offset
            }
            PlannerState::Random { map, cursor } => {
                let offset = map.offset_at(*cursor);
                *cursor = (*cursor + 1) % map.len();
                offset
            }
            PlannerState::Repeat => self.start_offset,
            PlannerState::Zipf { dist, rng } => {
                // Zipf ranks are 1-based; rank 1 is the hottest block.
                let rank = dist.sample(rng) as u64;
                (rank - 1) * self.block_size
            }
        }
    }

    /// Rewind to offset 0 after a reader hit end-of-file.
    pub fn rewind(&mut self) {
        if let PlannerState::Sequential { position } = &mut self.state {
            *position = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn random_map_covers_every_block_once() {
        let map = RandomMap::new(64 * 4096, 4096);
        assert_eq!(map.len(), 64);

        // From any starting cursor, one full traversal hits each offset
        // exactly once.
        for start in [0usize, 17, 63] {
            let seen: HashSet<u64> = (0..map.len()).map(|i| map.offset_at(start + i)).collect();
            assert_eq!(seen.len(), 64);
            for block in 0..64u64 {
                assert!(seen.contains(&(block * 4096)));
            }
        }
    }

    #[test]
    fn sequential_advances_then_wraps() {
        let mut planner =
            AccessPlanner::new(AccessPattern::Sequential, 4096, 3 * 4096, 0, None).unwrap();

        assert_eq!(planner.next_offset(), 0);
        assert_eq!(planner.next_offset(), 4096);
        assert_eq!(planner.next_offset(), 8192);
        // Next block would cross the end of the file: wrap before the op.
        assert_eq!(planner.next_offset(), 0);
    }

    #[test]
    fn sequential_wraps_on_unaligned_tail() {
        // File is not a whole number of blocks; the partial tail is never
        // targeted.
        let mut planner =
            AccessPlanner::new(AccessPattern::Sequential, 4096, 2 * 4096 + 100, 0, None).unwrap();

        assert_eq!(planner.next_offset(), 0);
        assert_eq!(planner.next_offset(), 4096);
        assert_eq!(planner.next_offset(), 0);
    }

    #[test]
    fn sequential_honors_start_offset() {
        let mut planner =
            AccessPlanner::new(AccessPattern::Sequential, 4096, 8 * 4096, 2 * 4096, None).unwrap();
        assert_eq!(planner.next_offset(), 8192);
        assert_eq!(planner.next_offset(), 12288);
    }

    #[test]
    fn rewind_resets_sequential_position() {
        let mut planner =
            AccessPlanner::new(AccessPattern::Sequential, 4096, 8 * 4096, 4 * 4096, None).unwrap();
        planner.next_offset();
        planner.rewind();
        assert_eq!(planner.next_offset(), 0);
    }

    #[test]
    fn repeat_targets_fixed_offset() {
        let mut planner =
            AccessPlanner::new(AccessPattern::Repeat, 4096, 1024 * 4096, 7 * 4096, None).unwrap();
        for _ in 0..32 {
            assert_eq!(planner.next_offset(), 7 * 4096);
        }
    }

    #[test]
    fn random_requires_map() {
        assert!(AccessPlanner::new(AccessPattern::Random, 4096, 4096 * 16, 0, None).is_err());
    }

    #[test]
    fn random_traversal_covers_map() {
        let map = Arc::new(RandomMap::new(32 * 512, 512));
        let mut planner =
            AccessPlanner::new(AccessPattern::Random, 512, 32 * 512, 0, Some(map.clone())).unwrap();

        let seen: HashSet<u64> = (0..map.len()).map(|_| planner.next_offset()).collect();
        assert_eq!(seen.len(), map.len());
    }

    #[test]
    fn zipf_offsets_are_aligned_and_bounded() {
        let mut planner =
            AccessPlanner::new(AccessPattern::Zipf, 4096, 1024 * 4096, 0, None).unwrap();

        for _ in 0..1000 {
            let offset = planner.next_offset();
            assert_eq!(offset % 4096, 0);
            assert!(offset < 1024 * 4096);
        }
    }

    #[test]
    fn zipf_is_skewed_toward_low_blocks() {
        let mut planner =
            AccessPlanner::new(AccessPattern::Zipf, 4096, 1000 * 4096, 0, None).unwrap();

        let mut low = 0u32;
        let mut high = 0u32;
        for _ in 0..10_000 {
            let block = planner.next_offset() / 4096;
            if block < 100 {
                low += 1;
            } else if block >= 900 {
                high += 1;
            }
        }
        assert!(
            low > high * 2,
            "zipf skew missing: low={} high={}",
            low,
            high
        );
    }
}
