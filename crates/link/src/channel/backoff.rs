// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use rand::Rng;

/// Delay between a channel closing and the next connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    Fixed { delay: Duration },
    /// Doubles per consecutive failure up to `max`, with +/-20% jitter.
    Exponential { initial: Duration, max: Duration },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::Fixed { delay: Duration::from_secs(1) }
    }
}

impl ReconnectPolicy {
    /// Delay before jitter, after `failures` consecutive failed connects.
    pub fn base_delay(&self, failures: u32) -> Duration {
        match *self {
            Self::Fixed { delay } => delay,
            Self::Exponential { initial, max } => {
                let shift = failures.saturating_sub(1).min(16);
                initial.saturating_mul(1 << shift).min(max)
            }
        }
    }

    /// Delay to sleep before the next attempt.
    pub fn delay(&self, failures: u32) -> Duration {
        let base = self.base_delay(failures);
        match *self {
            Self::Fixed { .. } => base,
            Self::Exponential { max, .. } => {
                let factor = rand::rng().random_range(0.8..=1.2);
                base.mul_f64(factor).min(max)
            }
        }
    }
}

#[cfg(test)]
#[path = "backoff_tests.rs"]
mod tests;
