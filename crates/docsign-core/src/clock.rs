//! Time and randomness sources injected into the engine

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rand_core::{OsRng, RngCore};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for deterministic tests and replays
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub trait CodeGenerator: Send + Sync {
    /// A uniformly distributed code in `000000..=999999`
    fn six_digits(&self) -> String;
}

/// Codes drawn from the operating system RNG
#[derive(Debug, Default, Clone, Copy)]
pub struct OsCodeGenerator;

impl CodeGenerator for OsCodeGenerator {
    fn six_digits(&self) -> String {
        format!("{:06}", uniform_below(&mut OsRng, 1_000_000))
    }
}

/// Rejection sampling so every value below `bound` is equally likely
fn uniform_below<R: RngCore>(rng: &mut R, bound: u32) -> u32 {
    let zone = u32::MAX - (u32::MAX % bound);
    loop {
        let candidate = rng.next_u32();
        if candidate < zone {
            return candidate % bound;
        }
    }
}
