//! Membership reconstruction from booked fee months.
//!
//! The finance stage records which months each account paid membership fees
//! for; this stage merges those months into closed-open intervals and emits
//! one membership per interval. The globally latest covered month counts as
//! "current", so the interval containing it stays open-ended.

use chrono::NaiveDate;
use serde::Serialize;
use tracing::debug;

use crate::importer::context::{Context, IntermediateData};
use crate::importer::error::ImportError;
use crate::target::{Membership, TargetEntity};

pub(crate) const MEMBER_GROUP: &str = "member";

/// One month covered by a membership fee, e.g. `2018-08`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct FeeMonth {
    year: i32,
    month: u32,
}

impl FeeMonth {
    /// `month` must be in `1..=12`; [`FeeMonth::parse`] is the checked path.
    pub fn new(year: i32, month: u32) -> Self {
        debug_assert!((1..=12).contains(&month));
        Self { year, month }
    }

    /// Parses the `YYYY-MM` suffix of a membership fee description.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let (year, month) = raw
            .split_once('-')
            .ok_or_else(|| format!("no year-month separator in {raw:?}"))?;
        let year: i32 = year
            .trim()
            .parse()
            .map_err(|_| format!("invalid year in {raw:?}"))?;
        let month: u32 = month
            .trim()
            .parse()
            .map_err(|_| format!("invalid month in {raw:?}"))?;
        if !(1..=12).contains(&month) {
            return Err(format!("month out of range in {raw:?}"));
        }
        Ok(Self { year, month })
    }

    pub fn beginning(self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .expect("month validated on construction")
    }

    /// First day of the following month.
    pub fn next_beginning(self) -> NaiveDate {
        if self.month == 12 {
            FeeMonth::new(self.year + 1, 1).beginning()
        } else {
            FeeMonth::new(self.year, self.month + 1).beginning()
        }
    }

    fn follows(self, earlier: FeeMonth) -> bool {
        earlier.next_beginning() == self.beginning()
    }
}

/// Merges covered months into closed-open validity intervals.
///
/// A run of consecutive months folds into one interval; the interval whose
/// last month equals `latest` gets no end date.
pub fn month_intervals(
    months: &[FeeMonth],
    latest: Option<FeeMonth>,
) -> Vec<(NaiveDate, Option<NaiveDate>)> {
    let mut months: Vec<FeeMonth> = months.to_vec();
    months.sort_unstable();
    months.dedup();

    let mut intervals = Vec::new();
    let mut run: Option<(FeeMonth, FeeMonth)> = None;
    for &month in &months {
        run = match run {
            None => Some((month, month)),
            Some((start, last)) if month.follows(last) => Some((start, month)),
            Some((start, last)) => {
                intervals.push(close_run(start, last, latest));
                Some((month, month))
            }
        };
    }
    if let Some((start, last)) = run {
        intervals.push(close_run(start, last, latest));
    }
    intervals
}

fn close_run(
    start: FeeMonth,
    last: FeeMonth,
    latest: Option<FeeMonth>,
) -> (NaiveDate, Option<NaiveDate>) {
    let open_ended = latest == Some(last);
    (
        start.beginning(),
        if open_ended {
            None
        } else {
            Some(last.next_beginning())
        },
    )
}

pub fn translate_memberships(
    _ctx: &Context,
    data: &mut IntermediateData,
) -> Result<Vec<TargetEntity>, ImportError> {
    let latest = data.fee_months().values().flatten().copied().max();
    let by_account: Vec<(String, Vec<FeeMonth>)> = data
        .fee_months()
        .iter()
        .map(|(account, months)| (account.clone(), months.clone()))
        .collect();

    let mut objs = Vec::new();
    for (account, months) in by_account {
        let Some(handle) = data.user(&account) else {
            // The finance stage only records months for accounts it resolved,
            // so a miss here means the pipeline is miswired.
            return Err(ImportError::LookupMissing {
                map: "users",
                key: account,
            });
        };
        let intervals = month_intervals(&months, latest);
        debug!(
            event = "membership_intervals",
            account = %account,
            intervals = intervals.len(),
        );
        for (starts_at, ends_at) in intervals {
            objs.push(TargetEntity::Membership(Membership {
                id: data.ids.mint(),
                user: handle.user,
                group: MEMBER_GROUP.to_string(),
                starts_at,
                ends_at,
            }));
        }
    }
    Ok(objs)
}
