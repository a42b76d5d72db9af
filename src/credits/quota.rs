//! Derived quota math.
//!
//! Credits are a locally computed view of the server-owned daily token
//! counter; nothing here is persisted, every field is recomputed on read.

use serde::Serialize;

use crate::config::QuotaConfig;

/// Point-in-time quota view consumed by the status display and the
/// generation gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaSnapshot {
    /// Server-confirmed tokens consumed today.
    pub tokens_used: u64,
    /// Daily token allowance.
    pub max_tokens: u64,
    /// Whole credits remaining.
    pub credits_available: u64,
    /// How many test-case generations the remaining credits cover.
    pub max_test_cases_allowed: u64,
    /// The daily allowance is spent.
    pub is_exhausted: bool,
}

/// Compute the derived quota view for a token counter.
pub fn snapshot(tokens_used: u64, quota: &QuotaConfig) -> QuotaSnapshot {
    let credits_available = if quota.tokens_per_credit == 0 {
        0
    } else {
        quota.max_tokens.saturating_sub(tokens_used) / quota.tokens_per_credit
    };
    let max_test_cases_allowed = if quota.cost_per_generation == 0 {
        0
    } else {
        credits_available / quota.cost_per_generation
    };

    QuotaSnapshot {
        tokens_used,
        max_tokens: quota.max_tokens,
        credits_available,
        max_test_cases_allowed,
        is_exhausted: tokens_used >= quota.max_tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> QuotaConfig {
        QuotaConfig::default()
    }

    #[test]
    fn credits_at_known_points() {
        assert_eq!(snapshot(0, &defaults()).credits_available, 100);
        assert_eq!(snapshot(7_500, &defaults()).credits_available, 50);
        assert_eq!(snapshot(15_000, &defaults()).credits_available, 0);
    }

    #[test]
    fn credits_never_negative_past_the_cap() {
        let view = snapshot(20_000, &defaults());
        assert_eq!(view.credits_available, 0);
        assert_eq!(view.max_test_cases_allowed, 0);
    }

    #[test]
    fn credits_are_monotonically_non_increasing() {
        let mut previous = u64::MAX;
        for used in (0..=16_000).step_by(37) {
            let current = snapshot(used, &defaults()).credits_available;
            assert!(current <= previous, "regressed at tokens_used={used}");
            previous = current;
        }
    }

    #[test]
    fn test_case_allowance_floors() {
        // 50 credits / 8 per generation → 6
        assert_eq!(snapshot(7_500, &defaults()).max_test_cases_allowed, 6);
        // 7 credits → 0
        let view = snapshot(13_950, &defaults());
        assert_eq!(view.credits_available, 7);
        assert_eq!(view.max_test_cases_allowed, 0);
    }

    #[test]
    fn exhaustion_at_the_boundary() {
        assert!(!snapshot(14_999, &defaults()).is_exhausted);
        assert!(snapshot(15_000, &defaults()).is_exhausted);
        assert!(snapshot(15_001, &defaults()).is_exhausted);
    }

    #[test]
    fn degenerate_config_yields_zero_credits() {
        let quota = QuotaConfig {
            max_tokens: 1_000,
            tokens_per_credit: 0,
            cost_per_generation: 0,
        };
        let view = snapshot(0, &quota);
        assert_eq!(view.credits_available, 0);
        assert_eq!(view.max_test_cases_allowed, 0);
    }
}
