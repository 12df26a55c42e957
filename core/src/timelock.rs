//! Timelock-asymmetry policy: the quote-side lock must always outlive the
//! native-side lock by at least a safety buffer, or a counterparty can
//! observe the secret on one chain and let the other time out for free.

use std::time::Duration;

use crate::error::{Error, Result};

/// Native-chain timelock expressed in blocks, quote-chain timelock expressed
/// in wall-clock seconds (the two chains don't share a clock).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelockPolicy {
    pub native_blocks: u32,
    pub quote_seconds: u64,
    /// Average seconds per native block, used to convert `native_blocks`
    /// into an equivalent wall-clock duration for the comparison.
    pub native_block_seconds: u64,
    /// Minimum safety margin the quote-side expiry must exceed the
    /// (converted) native-side expiry by.
    pub buffer_seconds: u64,
}

impl TimelockPolicy {
    /// Validate `T_quote >= T_native + buffer`, converting the native block
    /// count to wall-clock time via `native_block_seconds`.
    ///
    /// Returns `Err(Error::TimelockViolated)` — never panics — so callers at
    /// swap-initialization time can surface exit code 3 per the documented
    /// CLI contract.
    pub fn validate(&self) -> Result<()> {
        let native_equiv = self.native_blocks as u64 * self.native_block_seconds;
        let required = native_equiv.saturating_add(self.buffer_seconds);
        if self.quote_seconds < required {
            return Err(Error::TimelockViolated(format!(
                "quote timelock {}s is less than native timelock ({} blocks ~= {}s) + buffer {}s = {}s",
                self.quote_seconds, self.native_blocks, native_equiv, self.buffer_seconds, required
            )));
        }
        Ok(())
    }

    pub fn native_equivalent_duration(&self) -> Duration {
        Duration::from_secs(self.native_blocks as u64 * self.native_block_seconds)
    }

    pub fn quote_duration(&self) -> Duration {
        Duration::from_secs(self.quote_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A native timelock of 300 blocks and a quote timelock of 14400 seconds
    /// is a policy violation (300 blocks * ~600s/block = 180000s, far beyond
    /// 14400s of quote-side runway) and must be rejected at init time.
    #[test]
    fn violating_policy_is_rejected_at_init() {
        let policy = TimelockPolicy {
            native_blocks: 300,
            quote_seconds: 14_400,
            native_block_seconds: 600,
            buffer_seconds: 3_600,
        };
        let err = policy.validate().unwrap_err();
        assert!(matches!(err, Error::TimelockViolated(_)));
    }

    #[test]
    fn sufficient_quote_timelock_is_accepted() {
        let policy = TimelockPolicy {
            native_blocks: 6,
            quote_seconds: 100_000,
            native_block_seconds: 600,
            buffer_seconds: 3_600,
        };
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn exact_boundary_is_accepted_strictly() {
        // native_equiv + buffer == quote_seconds exactly: the inequality is
        // non-strict (>=), so this must pass.
        let policy = TimelockPolicy {
            native_blocks: 10,
            quote_seconds: 10 * 600 + 3_600,
            native_block_seconds: 600,
            buffer_seconds: 3_600,
        };
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn one_second_under_boundary_is_rejected() {
        let policy = TimelockPolicy {
            native_blocks: 10,
            quote_seconds: 10 * 600 + 3_600 - 1,
            native_block_seconds: 600,
            buffer_seconds: 3_600,
        };
        assert!(policy.validate().is_err());
    }
}
