use std::cmp::Ordering;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{DiscountTier, PaymentTerm};

/// the tier that applies to a payment made on a given date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicableTier {
    /// position of the tier in the payment term
    pub index: usize,
    pub tier: DiscountTier,
    pub deadline: NaiveDate,
}

/// picks the most favourable tier that is still open
pub struct TierSelector;

impl TierSelector {
    /// best tier among those whose deadline is on or after `ref_date`
    ///
    /// highest percentage wins, then the smallest `days`, then insertion order.
    pub fn select(tiers: &[DiscountTier], issue_date: NaiveDate, ref_date: NaiveDate) -> Option<ApplicableTier> {
        let best = tiers
            .iter()
            .enumerate()
            .map(|(index, tier)| ApplicableTier {
                index,
                tier: *tier,
                deadline: tier.deadline(issue_date),
            })
            .filter(|candidate| candidate.deadline >= ref_date)
            .fold(None::<ApplicableTier>, |best, candidate| match best {
                None => Some(candidate),
                Some(current) => {
                    if Self::preference(&candidate, &current) == Ordering::Greater {
                        Some(candidate)
                    } else {
                        Some(current)
                    }
                }
            });

        if let Some(selected) = &best {
            debug!(
                percentage = %selected.tier.percentage,
                deadline = %selected.deadline,
                ref_date = %ref_date,
                "selected discount tier"
            );
        }

        best
    }

    /// `Greater` when `a` should be preferred over `b`
    fn preference(a: &ApplicableTier, b: &ApplicableTier) -> Ordering {
        a.tier
            .percentage
            .cmp(&b.tier.percentage)
            .then_with(|| b.tier.days.cmp(&a.tier.days))
            .then_with(|| b.index.cmp(&a.index))
    }

    /// any tier still open at `ref_date`
    pub fn any_open(tiers: &[DiscountTier], issue_date: NaiveDate, ref_date: NaiveDate) -> bool {
        tiers.iter().any(|tier| tier.deadline(issue_date) >= ref_date)
    }
}

/// applicable tier of a payment term, `None` when every tier has expired
pub fn select(term: &PaymentTerm, issue_date: NaiveDate, ref_date: NaiveDate) -> Option<ApplicableTier> {
    TierSelector::select(&term.tiers, issue_date, ref_date)
}
