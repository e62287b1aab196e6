//! Slot selection for new captures under a per-callback fixture cap.
//!
//! Below the cap every invocation gets the next slot. At the cap, crawl
//! captures fall back to reservoir sampling over everything seen so far in
//! the directory, so each arrival is kept with probability `max / seen`.
//! Parse and update captures never sample. A forced update slot is
//! overwritten in place; any other update takes the next free slot on disk
//! while the directory is below its cap.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// Ordinary capture during a crawl.
    Crawl,
    /// Capture driven by the `parse` command: sequential slots only.
    Parse,
    /// Re-capture driven by `update`; `slot` overwrites that fixture in place.
    Update { slot: Option<usize> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotDecision {
    /// Write a new fixture with this number.
    Append(usize),
    /// Replace the existing fixture with this number.
    Overwrite(usize),
    Discard,
}

impl SlotDecision {
    pub fn slot(self) -> Option<usize> {
        match self {
            Self::Append(slot) | Self::Overwrite(slot) => Some(slot),
            Self::Discard => None,
        }
    }
}

pub struct SamplingController<R = StdRng> {
    seen: HashMap<PathBuf, usize>,
    rng: R,
}

impl SamplingController<StdRng> {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }
}

impl Default for SamplingController<StdRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rng> SamplingController<R> {
    pub fn with_rng(rng: R) -> Self {
        Self {
            seen: HashMap::new(),
            rng,
        }
    }

    pub fn is_seeded(&self, dir: &Path) -> bool {
        self.seen.contains_key(dir)
    }

    /// Seed the counter of `dir` from its on-disk fixture count. Only the
    /// first call per directory has an effect.
    pub fn seed(&mut self, dir: &Path, on_disk: usize) {
        self.seen.entry(dir.to_path_buf()).or_insert(on_disk);
    }

    pub fn seen(&self, dir: &Path) -> usize {
        self.seen.get(dir).copied().unwrap_or(0)
    }

    /// Pick a slot for the next capture in `dir`, which currently holds
    /// `on_disk` fixtures.
    pub fn decide(
        &mut self,
        dir: &Path,
        on_disk: usize,
        max_fixtures: usize,
        mode: CaptureMode,
    ) -> SlotDecision {
        let seen = self.seen(dir);
        match mode {
            CaptureMode::Update { slot: Some(slot) } => SlotDecision::Overwrite(slot),
            CaptureMode::Update { slot: None } if on_disk < max_fixtures => {
                SlotDecision::Append(on_disk + 1)
            }
            CaptureMode::Update { slot: None } => SlotDecision::Discard,
            CaptureMode::Parse if seen < max_fixtures => SlotDecision::Append(seen + 1),
            CaptureMode::Parse => SlotDecision::Discard,
            CaptureMode::Crawl if seen < max_fixtures => SlotDecision::Append(seen + 1),
            CaptureMode::Crawl => {
                let r = self.rng.gen_range(0..=seen);
                if r < max_fixtures {
                    SlotDecision::Overwrite(r + 1)
                } else {
                    SlotDecision::Discard
                }
            }
        }
    }

    /// Count one more invocation for `dir`, whether or not it was kept.
    pub fn record_arrival(&mut self, dir: &Path) {
        *self.seen.entry(dir.to_path_buf()).or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::{CaptureMode, SamplingController, SlotDecision};
    use std::path::Path;

    #[test]
    fn fills_sequential_slots_below_capacity() {
        let dir = Path::new("/t/shop/parse");
        let mut sampler = SamplingController::seeded(7);
        sampler.seed(dir, 2);
        assert_eq!(sampler.decide(dir, 2, 10, CaptureMode::Crawl), SlotDecision::Append(3));
        sampler.record_arrival(dir);
        assert_eq!(sampler.decide(dir, 3, 10, CaptureMode::Crawl), SlotDecision::Append(4));
    }

    #[test]
    fn seeding_happens_once_per_directory() {
        let dir = Path::new("/t/shop/parse");
        let mut sampler = SamplingController::seeded(7);
        sampler.seed(dir, 4);
        sampler.record_arrival(dir);
        sampler.seed(dir, 0);
        assert_eq!(sampler.seen(dir), 5);
        assert!(sampler.is_seeded(dir));
    }

    #[test]
    fn forced_update_slots_are_always_overwritten() {
        let dir = Path::new("/t/shop/parse");
        let mut sampler = SamplingController::seeded(1);
        sampler.seed(dir, 500);
        for _ in 0..100 {
            assert_eq!(
                sampler.decide(dir, 10, 10, CaptureMode::Update { slot: Some(3) }),
                SlotDecision::Overwrite(3)
            );
        }
    }

    #[test]
    fn unforced_updates_follow_the_disk_not_the_counter() {
        let dir = Path::new("/t/shop/parse");
        let mut sampler = SamplingController::seeded(1);
        sampler.seed(dir, 1);
        // An earlier arrival was counted but never reached the disk.
        sampler.record_arrival(dir);
        assert_eq!(
            sampler.decide(dir, 1, 10, CaptureMode::Update { slot: None }),
            SlotDecision::Append(2)
        );
        assert_eq!(
            sampler.decide(dir, 10, 10, CaptureMode::Update { slot: None }),
            SlotDecision::Discard
        );
    }

    #[test]
    fn parse_mode_fills_sequentially_then_stops() {
        let dir = Path::new("/t/shop/parse");
        let mut sampler = SamplingController::seeded(9);
        sampler.seed(dir, 8);
        let mut decisions = Vec::new();
        for n in 8..13 {
            decisions.push(sampler.decide(dir, n.min(10), 10, CaptureMode::Parse));
            sampler.record_arrival(dir);
        }
        assert_eq!(
            decisions,
            vec![
                SlotDecision::Append(9),
                SlotDecision::Append(10),
                SlotDecision::Discard,
                SlotDecision::Discard,
                SlotDecision::Discard,
            ]
        );
    }

    #[test]
    fn at_capacity_slots_stay_within_range() {
        let dir = Path::new("/t/shop/parse");
        let mut sampler = SamplingController::seeded(42);
        sampler.seed(dir, 10);
        for _ in 0..1000 {
            if let Some(slot) = sampler.decide(dir, 10, 10, CaptureMode::Crawl).slot() {
                assert!((1..=10).contains(&slot));
            }
            sampler.record_arrival(dir);
        }
    }

    #[test]
    fn reservoir_retention_is_uniform_across_arrivals() {
        const ARRIVALS: usize = 20;
        const CAPACITY: usize = 5;
        const TRIALS: usize = 20_000;

        let dir = Path::new("/t/uniform");
        let mut sampler = SamplingController::seeded(8675309);
        let mut kept = [0usize; ARRIVALS];

        for _ in 0..TRIALS {
            sampler = SamplingController::with_rng(sampler.rng);
            sampler.seed(dir, 0);
            let mut slots = [usize::MAX; CAPACITY];
            for arrival in 0..ARRIVALS {
                let on_disk = arrival.min(CAPACITY);
                if let Some(slot) = sampler.decide(dir, on_disk, CAPACITY, CaptureMode::Crawl).slot() {
                    slots[slot - 1] = arrival;
                }
                sampler.record_arrival(dir);
            }
            for arrival in slots {
                kept[arrival] += 1;
            }
        }

        let expected = CAPACITY as f64 / ARRIVALS as f64;
        for (arrival, count) in kept.iter().enumerate() {
            let observed = *count as f64 / TRIALS as f64;
            assert!(
                (observed - expected).abs() < 0.02,
                "arrival {arrival} kept with p={observed:.3}, expected {expected:.3}"
            );
        }
    }
}
