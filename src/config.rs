use chrono::Duration;
use tracing::warn;

const MAX_REVOKE_WINDOW_HOURS: i64 = 24 * 365;

/// How much of a paid resource's price reaches its uploader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaidShare {
    /// The uploader receives the full price
    FullPrice,
    /// `max(floor(cost * percent / 100), minimum)`
    Percent { percent: i64, minimum: i64 },
}

impl PaidShare {
    pub fn apply(&self, points_cost: i64) -> i64 {
        match *self {
            Self::FullPrice => points_cost,
            Self::Percent { percent, minimum } => (points_cost * percent / 100).max(minimum),
        }
    }
}

/// Fixed rewards and paid share used by the earnings calculator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EarningsPolicy {
    pub free_reward: i64,
    pub vip_only_reward: i64,
    pub paid_share: PaidShare,
}

impl Default for EarningsPolicy {
    fn default() -> Self {
        Self {
            free_reward: 2,
            vip_only_reward: 10,
            paid_share: PaidShare::FullPrice,
        }
    }
}

/// Limits on admin balance adjustments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdjustmentPolicy {
    pub max_single_adjustment: i64,
    pub approval_threshold: i64,
    pub batch_approval_users: usize,
    pub revoke_window: Duration,
}

impl Default for AdjustmentPolicy {
    fn default() -> Self {
        Self {
            max_single_adjustment: 10_000,
            approval_threshold: 1_000,
            batch_approval_users: 100,
            revoke_window: Duration::hours(24),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerConfig {
    pub earnings: EarningsPolicy,
    pub adjustments: AdjustmentPolicy,
}

impl LedgerConfig {
    /// Load configuration from environment variables.
    /// Missing or unparseable values fall back to the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parse = |key: &str, default: i64| -> i64 {
            lookup(key)
                .and_then(|value| value.trim().parse::<i64>().ok())
                .unwrap_or(default)
        };
        // Rewards and shares must stay positive
        let positive = |key: &str, default: i64| -> i64 {
            match parse(key, default) {
                value if value > 0 => value,
                value => {
                    warn!(key, value, default, "Ignoring non-positive setting");
                    default
                }
            }
        };

        let paid_share = match lookup("EARNINGS_PAID_SHARE_PERCENT")
            .and_then(|value| value.trim().parse::<i64>().ok())
        {
            Some(percent) if (1..=100).contains(&percent) => PaidShare::Percent {
                percent,
                minimum: positive("EARNINGS_PAID_SHARE_MINIMUM", 2),
            },
            Some(percent) => {
                warn!(percent, "EARNINGS_PAID_SHARE_PERCENT out of range, paying full price");
                PaidShare::FullPrice
            }
            None => PaidShare::FullPrice,
        };

        Self {
            earnings: EarningsPolicy {
                free_reward: positive("EARNINGS_FREE_REWARD", defaults.earnings.free_reward),
                vip_only_reward: positive(
                    "EARNINGS_VIP_ONLY_REWARD",
                    defaults.earnings.vip_only_reward,
                ),
                paid_share,
            },
            adjustments: AdjustmentPolicy {
                max_single_adjustment: parse(
                    "POINTS_MAX_SINGLE_ADJUSTMENT",
                    defaults.adjustments.max_single_adjustment,
                ),
                approval_threshold: parse(
                    "POINTS_APPROVAL_THRESHOLD",
                    defaults.adjustments.approval_threshold,
                ),
                batch_approval_users: parse(
                    "POINTS_BATCH_APPROVAL_USERS",
                    defaults.adjustments.batch_approval_users as i64,
                )
                .max(0) as usize,
                revoke_window: Duration::hours(
                    parse("POINTS_REVOKE_WINDOW_HOURS", 24).clamp(0, MAX_REVOKE_WINDOW_HOURS),
                ),
            },
        }
    }
}
