use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::ops::Range;
use std::sync::Mutex;

const VOLUME_RANGE: Range<u32> = 100..5_000;
const OPEN_INTEREST_RANGE: Range<u32> = 500..20_000;
const IMPLIED_VOLATILITY_RANGE: Range<f64> = 0.20..0.60;

/// Decorative fields of a synthetic contract. Nothing downstream may make decisions
/// on these values.
pub trait FillerSource: Send + Sync {
    fn volume(&self) -> u32;
    fn open_interest(&self) -> u32;
    fn implied_volatility(&self) -> f64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RandomFiller;

impl FillerSource for RandomFiller {
    fn volume(&self) -> u32 {
        rand::thread_rng().gen_range(VOLUME_RANGE)
    }

    fn open_interest(&self) -> u32 {
        rand::thread_rng().gen_range(OPEN_INTEREST_RANGE)
    }

    fn implied_volatility(&self) -> f64 {
        let iv = rand::thread_rng().gen_range(IMPLIED_VOLATILITY_RANGE);
        (iv * 10_000.0).round() / 10_000.0
    }
}

/// Reproducible filler for demos and tests.
#[derive(Debug)]
pub struct SeededFiller {
    rng: Mutex<StdRng>,
}

impl SeededFiller {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut guard = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

impl FillerSource for SeededFiller {
    fn volume(&self) -> u32 {
        self.with_rng(|rng| rng.gen_range(VOLUME_RANGE))
    }

    fn open_interest(&self) -> u32 {
        self.with_rng(|rng| rng.gen_range(OPEN_INTEREST_RANGE))
    }

    fn implied_volatility(&self) -> f64 {
        let iv = self.with_rng(|rng| rng.gen_range(IMPLIED_VOLATILITY_RANGE));
        (iv * 10_000.0).round() / 10_000.0
    }
}
