//! Plan catalog and billing cycle arithmetic.

use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};

/// Subscription plan tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    Starter,
    Pro,
    Business,
}

impl PlanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::Starter => "starter",
            PlanType::Pro => "pro",
            PlanType::Business => "business",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "pro" => PlanType::Pro,
            "business" => PlanType::Business,
            _ => PlanType::Starter,
        }
    }

    /// Monthly base price in the smallest currency unit.
    pub fn monthly_amount(&self) -> i64 {
        match self {
            PlanType::Starter => 9_900,
            PlanType::Pro => 29_900,
            PlanType::Business => 59_900,
        }
    }

    /// Amount charged per billing period. Yearly billing is priced at
    /// ten months (two months free).
    pub fn amount_for(&self, cycle: BillingCycle) -> i64 {
        match cycle {
            BillingCycle::Monthly => self.monthly_amount(),
            BillingCycle::Yearly => self.monthly_amount() * 10,
        }
    }

    /// Monthly comment quota for the plan.
    pub fn comment_limit(&self) -> i64 {
        match self {
            PlanType::Starter => 10_000,
            PlanType::Pro => 100_000,
            PlanType::Business => 1_000_000,
        }
    }
}

/// Billing cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    Monthly,
    Yearly,
}

impl BillingCycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingCycle::Monthly => "monthly",
            BillingCycle::Yearly => "yearly",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "yearly" => BillingCycle::Yearly,
            _ => BillingCycle::Monthly,
        }
    }

    /// One period after `from`, anchored to `from` itself so repeated
    /// advancement never drifts with late sweeps. Month-end dates clamp
    /// (Jan 31 + 1 month = Feb 28/29).
    pub fn advance(&self, from: NaiveDate) -> NaiveDate {
        match self {
            BillingCycle::Monthly => from + Months::new(1),
            BillingCycle::Yearly => from + Months::new(12),
        }
    }

    /// One period before `from`; used to recover the current period's
    /// start from its end when computing proration.
    pub fn rewind(&self, from: NaiveDate) -> NaiveDate {
        match self {
            BillingCycle::Monthly => from - Months::new(1),
            BillingCycle::Yearly => from - Months::new(12),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn monthly_advance_is_anchored_to_prior_date() {
        assert_eq!(
            BillingCycle::Monthly.advance(date(2026, 3, 15)),
            date(2026, 4, 15)
        );
    }

    #[test]
    fn monthly_advance_clamps_month_end() {
        assert_eq!(
            BillingCycle::Monthly.advance(date(2026, 1, 31)),
            date(2026, 2, 28)
        );
        assert_eq!(
            BillingCycle::Monthly.advance(date(2024, 1, 31)),
            date(2024, 2, 29)
        );
    }

    #[test]
    fn yearly_advance_adds_twelve_months() {
        assert_eq!(
            BillingCycle::Yearly.advance(date(2026, 5, 1)),
            date(2027, 5, 1)
        );
    }

    #[test]
    fn yearly_amount_is_ten_months() {
        assert_eq!(
            PlanType::Pro.amount_for(BillingCycle::Yearly),
            PlanType::Pro.monthly_amount() * 10
        );
    }
}
