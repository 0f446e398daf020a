//! Fiscal calendar arithmetic.
//!
//! A filer's fiscal year is defined by its fiscal-year-end month. Fiscal years
//! are numbered by the calendar year in which they end, so a year ending
//! 2023-01-31 is fiscal 2023. Quarters end every three months counting back
//! from the year end. Filers on a 52/53-week year close a few days either side
//! of the nominal month end, so dates are matched to the nearest nominal
//! quarter end within [`MATCH_TOLERANCE_DAYS`].

use chrono::{Datelike, Duration, NaiveDate};
use quarterly_core::{FilingRef, FiscalYearEnd, QuarterlyError, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Maximum distance in days between a reported date and a nominal quarter end.
pub const MATCH_TOLERANCE_DAYS: i64 = 20;

/// Earliest calendar year a range may start in.
pub const MIN_YEAR: i32 = 1900;

/// Latest calendar year a range may end in.
pub const MAX_YEAR: i32 = 2200;

/// Checks that `[start_year, end_year]` is ordered and lies within
/// [`MIN_YEAR`]..=[`MAX_YEAR`].
///
/// # Errors
/// Returns [`QuarterlyError::InvalidParameter`] otherwise.
pub fn check_year_range(start_year: i32, end_year: i32) -> Result<()> {
    if start_year > end_year {
        return Err(QuarterlyError::InvalidParameter(format!(
            "start year {} is after end year {}",
            start_year, end_year
        )));
    }
    for year in [start_year, end_year] {
        if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
            return Err(QuarterlyError::InvalidParameter(format!(
                "year {} outside supported range {}-{}",
                year, MIN_YEAR, MAX_YEAR
            )));
        }
    }
    Ok(())
}

/// Intersects a range with [`MIN_YEAR`]..=[`MAX_YEAR`]; `None` when empty.
fn clamp_range(start_year: i32, end_year: i32) -> Option<(i32, i32)> {
    let start = start_year.max(MIN_YEAR);
    let end = end_year.min(MAX_YEAR);
    (start <= end).then_some((start, end))
}

/// Returns the calendar-quarter shorthand `(quarter, year)` for a period end.
///
/// Periods ending in March through May are the first quarter, June through
/// August the second, September through November the third, and December the
/// fourth. January and February ends belong to the fourth quarter of the
/// previous year.
#[must_use]
pub fn shorthand(period_end: NaiveDate) -> (u8, i32) {
    let month = period_end.month();
    let quarter = ((month + 9) % 12) / 3 + 1;
    let year = if month <= 2 {
        period_end.year() - 1
    } else {
        period_end.year()
    };
    (quarter as u8, year)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        2 if NaiveDate::from_ymd_opt(year, 2, 29).is_some() => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

/// One fiscal quarter with its period end date.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FiscalQuarter {
    /// Fiscal year (numbered by the calendar year it ends in).
    pub fiscal_year: i32,
    /// Quarter within the fiscal year (1-4).
    pub quarter: u8,
    /// Last day of the quarter.
    pub period_end: NaiveDate,
}

impl FiscalQuarter {
    /// Returns `(fiscal_year, quarter)`.
    #[must_use]
    pub const fn key(&self) -> (i32, u8) {
        (self.fiscal_year, self.quarter)
    }

    /// Year of the column label (see [`shorthand`]).
    #[must_use]
    pub fn label_year(&self) -> i32 {
        shorthand(self.period_end).1
    }

    /// Short column label such as `1Q22`.
    #[must_use]
    pub fn label(&self) -> String {
        let (quarter, year) = shorthand(self.period_end);
        format!("{quarter}Q{:02}", year.rem_euclid(100))
    }

    /// Column header such as `1Q22 (2022-04-30)`.
    #[must_use]
    pub fn header(&self) -> String {
        format!("{} ({})", self.label(), self.period_end.format("%Y-%m-%d"))
    }
}

impl fmt::Display for FiscalQuarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FY{} Q{}", self.fiscal_year, self.quarter)
    }
}

/// Nominal quarter boundaries derived from a fiscal-year end.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FiscalCalendar {
    year_end: FiscalYearEnd,
}

impl FiscalCalendar {
    /// Creates a calendar for the given fiscal-year end.
    #[must_use]
    pub const fn new(year_end: FiscalYearEnd) -> Self {
        Self { year_end }
    }

    /// Returns the fiscal-year end this calendar is built on.
    #[must_use]
    pub const fn year_end(&self) -> FiscalYearEnd {
        self.year_end
    }

    /// Nominal last day of quarter `quarter` of `fiscal_year`.
    ///
    /// `fiscal_year` is clamped to within two years of
    /// [`MIN_YEAR`]..=[`MAX_YEAR`].
    #[must_use]
    pub fn nominal_quarter_end(&self, fiscal_year: i32, quarter: u8) -> NaiveDate {
        let fiscal_year = fiscal_year.clamp(MIN_YEAR - 2, MAX_YEAR + 2);
        let months_back = 3 * (4 - i32::from(quarter.clamp(1, 4)));
        let index = fiscal_year * 12 + self.year_end.month as i32 - 1 - months_back;
        let year = index.div_euclid(12);
        let month = index.rem_euclid(12) as u32 + 1;
        let last = days_in_month(year, month);
        // Days from the 28th on are treated as "last day of the month".
        let day = if self.year_end.day >= 28 {
            last
        } else {
            self.year_end.day.min(last)
        };
        // In range for chrono: the year is clamped and the day is capped.
        NaiveDate::from_ymd_opt(year, month, day).unwrap_or(NaiveDate::MIN)
    }

    /// First day of `fiscal_year`.
    #[must_use]
    pub fn fiscal_year_start(&self, fiscal_year: i32) -> NaiveDate {
        self.nominal_quarter_end(fiscal_year - 1, 4) + Duration::days(1)
    }

    /// Finds the fiscal quarter whose nominal end is nearest to `date`, if it
    /// lies within [`MATCH_TOLERANCE_DAYS`].
    #[must_use]
    pub fn locate(&self, date: NaiveDate) -> Option<(i32, u8)> {
        let mut best: Option<(i64, i32, u8)> = None;
        for fiscal_year in date.year() - 1..=date.year() + 1 {
            for quarter in 1..=4 {
                let distance = (date - self.nominal_quarter_end(fiscal_year, quarter))
                    .num_days()
                    .abs();
                if best.is_none_or(|(d, _, _)| distance < d) {
                    best = Some((distance, fiscal_year, quarter));
                }
            }
        }
        best.filter(|(d, _, _)| *d <= MATCH_TOLERANCE_DAYS)
            .map(|(_, fiscal_year, quarter)| (fiscal_year, quarter))
    }

    /// Fiscal years with at least one quarter whose nominal label year lies in
    /// `[start_year, end_year]`, intersected with [`MIN_YEAR`]..=[`MAX_YEAR`].
    #[must_use]
    pub fn fiscal_years_for_range(&self, start_year: i32, end_year: i32) -> Vec<i32> {
        let Some((start_year, end_year)) = clamp_range(start_year, end_year) else {
            return Vec::new();
        };
        let mut years = BTreeSet::new();
        for fiscal_year in start_year - 1..=end_year + 1 {
            for quarter in 1..=4 {
                let end = self.nominal_quarter_end(fiscal_year, quarter);
                let year = shorthand(end).1;
                if (start_year..=end_year).contains(&year) {
                    years.insert(fiscal_year);
                }
            }
        }
        years.into_iter().collect()
    }
}

/// Actual quarter ends for one filer, taken from its filings where available.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuarterSchedule {
    calendar: FiscalCalendar,
    period_ends: BTreeMap<(i32, u8), NaiveDate>,
}

impl QuarterSchedule {
    /// Creates a schedule that uses nominal quarter ends only.
    #[must_use]
    pub const fn new(calendar: FiscalCalendar) -> Self {
        Self {
            calendar,
            period_ends: BTreeMap::new(),
        }
    }

    /// Creates a schedule using each filing's reported period end.
    ///
    /// Original filings take precedence; an amendment only supplies the date
    /// for a quarter with no original filing.
    #[must_use]
    pub fn from_filings(calendar: FiscalCalendar, filings: &[FilingRef]) -> Self {
        let mut schedule = Self::new(calendar);
        let (originals, amendments): (Vec<&FilingRef>, Vec<&FilingRef>) =
            filings.iter().partition(|f| !f.amendment);
        for filing in originals {
            if let Some(key) = calendar.locate(filing.report_date) {
                schedule.period_ends.insert(key, filing.report_date);
            }
        }
        for filing in amendments {
            if let Some(key) = calendar.locate(filing.report_date) {
                schedule.period_ends.entry(key).or_insert(filing.report_date);
            }
        }
        schedule
    }

    /// Returns the underlying calendar.
    #[must_use]
    pub const fn calendar(&self) -> &FiscalCalendar {
        &self.calendar
    }

    /// Returns one quarter, using the reported end date when known.
    #[must_use]
    pub fn quarter(&self, fiscal_year: i32, quarter: u8) -> FiscalQuarter {
        let period_end = self
            .period_ends
            .get(&(fiscal_year, quarter))
            .copied()
            .unwrap_or_else(|| self.calendar.nominal_quarter_end(fiscal_year, quarter));
        FiscalQuarter {
            fiscal_year,
            quarter,
            period_end,
        }
    }

    /// Quarters whose label year lies in `[start_year, end_year]`, oldest first.
    ///
    /// The range is intersected with [`MIN_YEAR`]..=[`MAX_YEAR`].
    #[must_use]
    pub fn quarters_in_range(&self, start_year: i32, end_year: i32) -> Vec<FiscalQuarter> {
        let Some((start_year, end_year)) = clamp_range(start_year, end_year) else {
            return Vec::new();
        };
        let mut quarters: Vec<FiscalQuarter> = (start_year - 1..=end_year + 1)
            .flat_map(|fy| (1..=4).map(move |q| (fy, q)))
            .map(|(fy, q)| self.quarter(fy, q))
            .filter(|q| (start_year..=end_year).contains(&q.label_year()))
            .collect();
        quarters.sort_by_key(|q| q.period_end);
        quarters
    }
}
