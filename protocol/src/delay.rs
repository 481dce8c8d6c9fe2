//! Simulated processing cost before a cohort replies

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use twopc_core::ProtocolConfig;

/// Source of the pause a cohort takes before voting or acknowledging
pub trait ProcessingDelay: Send {
    fn next_delay(&mut self) -> Duration;
}

impl<F> ProcessingDelay for F
where
    F: FnMut() -> Duration + Send,
{
    fn next_delay(&mut self) -> Duration {
        self()
    }
}

/// Replies immediately
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelay;

impl ProcessingDelay for NoDelay {
    fn next_delay(&mut self) -> Duration {
        Duration::ZERO
    }
}

/// Uniform jitter over `min, min + step, ..., max`
#[derive(Debug)]
pub struct JitterDelay {
    rng: StdRng,
    min_ms: u64,
    step_ms: u64,
    steps: u64,
}

impl JitterDelay {
    pub fn new(min_ms: u64, max_ms: u64, step_ms: u64, seed: u64) -> Self {
        let steps = if step_ms == 0 || max_ms <= min_ms {
            0
        } else {
            (max_ms - min_ms) / step_ms
        };

        Self {
            rng: StdRng::seed_from_u64(seed),
            min_ms,
            step_ms,
            steps,
        }
    }

    pub fn from_config(config: &ProtocolConfig, seed: u64) -> Self {
        Self::new(config.min_delay_ms, config.max_delay_ms, config.delay_step_ms, seed)
    }
}

impl ProcessingDelay for JitterDelay {
    fn next_delay(&mut self) -> Duration {
        let step = self.rng.gen_range(0..=self.steps);
        Duration::from_millis(self.min_ms + step * self.step_ms)
    }
}
