use chrono::{Datelike, Days, Months, NaiveDate};

use crate::types::DelayRule;

/// last calendar day of the month containing `date`
pub fn end_of_month(date: NaiveDate) -> NaiveDate {
    let first = NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date);
    first
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(date)
}

/// apply a delay rule of `days` to a reference date
///
/// month arithmetic clamps to the last valid day (31 Jan + 1 month = 28/29 Feb).
pub fn apply_delay(rule: DelayRule, days: u32, reference: NaiveDate) -> NaiveDate {
    let anchor = match rule {
        DelayRule::DaysAfterIssue => reference,
        DelayRule::DaysAfterEndOfMonth => end_of_month(reference),
        DelayRule::DaysAfterEndOfNextMonth => {
            let next_month = reference
                .checked_add_months(Months::new(1))
                .unwrap_or(reference);
            end_of_month(next_month)
        }
    };

    anchor
        .checked_add_days(Days::new(days as u64))
        .unwrap_or(NaiveDate::MAX)
}
