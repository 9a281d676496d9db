//! Usage metering and tier gating
//!
//! A free account moves through three bands of cumulative minutes:
//! `[0, free]` unwatermarked, `(free, watermark]` watermarked, and beyond that
//! nothing is admitted until the account upgrades. Paid accounts bypass the
//! bands entirely.

use serde::Serialize;

use crate::config::LimitsConfig;
use crate::ledger::{Account, PlanTier};

/// Minutes a free account may caption without a watermark
pub const FREE_LIMIT: f64 = 5.0;
/// Minutes a free account may caption at all
pub const WATERMARK_LIMIT: f64 = 10.0;

/// Outcome of the tier gate for one proposed job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    pub watermarked: bool,
}

impl Admission {
    const REJECTED: Admission = Admission {
        allowed: false,
        watermarked: false,
    };
}

/// Thresholds applied by the gate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    pub free: f64,
    pub watermark: f64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            free: FREE_LIMIT,
            watermark: WATERMARK_LIMIT,
        }
    }
}

impl From<LimitsConfig> for Limits {
    fn from(config: LimitsConfig) -> Self {
        Self {
            free: config.free_minutes,
            watermark: config.watermark_minutes,
        }
    }
}

impl Limits {
    /// Decide admission and watermarking from the usage snapshot.
    ///
    /// The watermark is binary per job: a job that crosses the free threshold
    /// is watermarked in full.
    pub fn admit(&self, used: f64, duration: f64, paid: bool) -> Admission {
        if paid {
            return Admission {
                allowed: true,
                watermarked: false,
            };
        }

        let projected = used + duration;
        if projected > self.watermark {
            return Admission::REJECTED;
        }

        Admission {
            allowed: true,
            watermarked: projected > self.free,
        }
    }

    pub fn summarize(&self, account: &Account) -> UsageSummary {
        let used = account.total_minutes;
        let is_paid = account.is_paid();

        UsageSummary {
            total_minutes: used,
            free_remaining: (self.free - used).max(0.0),
            watermark_remaining: (self.watermark - used).max(0.0),
            is_paid,
            plan_tier: account.plan_tier,
            is_over_limit: used >= self.watermark && !is_paid,
            free_allowance: self.free,
            watermark_allowance: self.watermark,
        }
    }
}

/// [`Limits::admit`] with the default thresholds
pub fn admit(used: f64, duration: f64, paid: bool) -> Admission {
    Limits::default().admit(used, duration, paid)
}

/// Usage figures derived from an account
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub total_minutes: f64,
    pub free_remaining: f64,
    pub watermark_remaining: f64,
    pub is_paid: bool,
    pub plan_tier: PlanTier,
    pub is_over_limit: bool,
    pub free_allowance: f64,
    pub watermark_allowance: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(used: f64, tier: PlanTier) -> Account {
        let mut account = Account::new("ana@example.com");
        account.total_minutes = used;
        account.plan_tier = tier;
        account
    }

    #[test]
    fn test_free_band_is_clean() {
        assert_eq!(
            admit(0.0, 5.0, false),
            Admission {
                allowed: true,
                watermarked: false
            }
        );
        assert_eq!(
            admit(1.0, 2.0, false),
            Admission {
                allowed: true,
                watermarked: false
            }
        );
    }

    #[test]
    fn test_crossing_free_threshold_watermarks_whole_job() {
        // 4.0 used + 2.0 requested lands at 6.0
        assert_eq!(
            admit(4.0, 2.0, false),
            Admission {
                allowed: true,
                watermarked: true
            }
        );
    }

    #[test]
    fn test_watermark_limit_is_inclusive() {
        assert_eq!(
            admit(8.0, 2.0, false),
            Admission {
                allowed: true,
                watermarked: true
            }
        );
    }

    #[test]
    fn test_exceeding_watermark_limit_is_rejected() {
        // 9.5 used + 1.0 requested lands at 10.5
        assert_eq!(admit(9.5, 1.0, false), Admission::REJECTED);
        assert_eq!(admit(0.0, 10.5, false), Admission::REJECTED);
    }

    #[test]
    fn test_paid_always_admitted_clean() {
        for (used, duration) in [(0.0, 1.0), (9.5, 1.0), (250.0, 90.0)] {
            assert_eq!(
                admit(used, duration, true),
                Admission {
                    allowed: true,
                    watermarked: false
                }
            );
        }
    }

    #[test]
    fn test_gate_bands_over_a_grid() {
        let mut used = 0.0;
        while used <= 12.0 {
            let mut duration = 0.25;
            while duration <= 12.0 {
                let projected = used + duration;
                let admission = admit(used, duration, false);

                assert_eq!(admission.allowed, projected <= WATERMARK_LIMIT);
                if admission.allowed {
                    assert_eq!(admission.watermarked, projected > FREE_LIMIT);
                } else {
                    assert!(!admission.watermarked);
                }
                duration += 0.25;
            }
            used += 0.25;
        }
    }

    #[test]
    fn test_custom_limits() {
        let limits = Limits {
            free: 1.0,
            watermark: 2.0,
        };
        assert!(limits.admit(0.5, 1.0, false).watermarked);
        assert!(!limits.admit(1.5, 1.0, false).allowed);
    }

    #[test]
    fn test_summary_for_fresh_account() {
        let summary = Limits::default().summarize(&account(0.0, PlanTier::Free));

        assert_eq!(summary.free_remaining, 5.0);
        assert_eq!(summary.watermark_remaining, 10.0);
        assert!(!summary.is_over_limit);
    }

    #[test]
    fn test_summary_clamps_at_zero() {
        let summary = Limits::default().summarize(&account(12.0, PlanTier::Free));

        assert_eq!(summary.free_remaining, 0.0);
        assert_eq!(summary.watermark_remaining, 0.0);
        assert!(summary.is_over_limit);
    }

    #[test]
    fn test_paid_account_never_over_limit() {
        let summary = Limits::default().summarize(&account(40.0, PlanTier::Paid));
        assert!(summary.is_paid);
        assert!(!summary.is_over_limit);
    }
}
