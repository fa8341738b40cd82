//! Delay policies shared by the retry queue and listener reconnects.

use std::time::Duration;

/// Delay before attempt `n` (1-based count of failures so far).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `base * attempt`
    Linear { base: Duration },
    /// `base * 2^attempt`, capped at `max`
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Linear { base } => base.saturating_mul(attempt),
            Backoff::Exponential { base, max } => {
                let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
                base.saturating_mul(factor).min(max)
            }
        }
    }
}
