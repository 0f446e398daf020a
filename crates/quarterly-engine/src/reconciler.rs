//! Period reconciliation.
//!
//! Filings report flows over overlapping windows: a 10-Q carries the quarter
//! just ended and the year to date, a 10-K carries only the full year. The
//! reconciler turns every series of observations into exactly one value per
//! fiscal quarter:
//!
//! - instants are taken as reported at the quarter end and never derived
//! - flows use the single-quarter value when one was reported, otherwise the
//!   difference of two reported cumulative values
//! - anything else is [`QuarterValue::Indeterminate`], never zero
//!
//! All arithmetic is in [`Decimal`] on values already scaled to whole units.

use quarterly_core::{
    ConceptId, ConceptNature, Issue, LineItemObservation, ReconciliationLog, StatementKind,
};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

use crate::calendar::{FiscalCalendar, FiscalQuarter, MATCH_TOLERANCE_DAYS, QuarterSchedule};
use crate::resolver::ResolvedSet;
use crate::taxonomy::{CanonicalConcept, Taxonomy};

/// Shortest duration, in days, treated as a single quarter.
pub const QUARTER_MIN_DAYS: i64 = 70;
/// Longest duration, in days, treated as a single quarter.
pub const QUARTER_MAX_DAYS: i64 = 110;

/// Identity of one output row.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum RowKey {
    /// A canonical concept.
    Concept(ConceptId),
    /// An unresolved label, kept as reported.
    Unclassified {
        /// Statement the label was reported on.
        statement: StatementKind,
        /// Label as reported.
        label: String,
        /// True for point-in-time balances.
        instant: bool,
    },
    /// A caption row without values, introducing the rows after it.
    Heading(String),
}

impl RowKey {
    /// Returns true for unresolved labels.
    #[must_use]
    pub const fn is_unclassified(&self) -> bool {
        matches!(self, Self::Unclassified { .. })
    }

    /// Returns true for caption rows.
    #[must_use]
    pub const fn is_heading(&self) -> bool {
        matches!(self, Self::Heading(_))
    }
}

/// An observation with the rank of the synonym it resolved through.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RankedObservation {
    /// The observation.
    pub observation: LineItemObservation,
    /// Synonym rank (0 is best). Unclassified observations use 0.
    pub rank: usize,
}

/// All observations feeding one output row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Series {
    /// Row identity.
    pub key: RowKey,
    /// Row caption.
    pub label: String,
    /// Statement the row belongs to.
    pub statement: StatementKind,
    /// Instant or flow.
    pub nature: ConceptNature,
    /// Whether quarters may be derived from cumulative values.
    pub additive: bool,
    /// Observations from every filing.
    pub observations: Vec<RankedObservation>,
}

impl Series {
    /// Creates an empty series for a canonical concept.
    #[must_use]
    pub fn for_concept(concept: &CanonicalConcept) -> Self {
        Self {
            key: RowKey::Concept(concept.id.clone()),
            label: concept.label.clone(),
            statement: concept.statement,
            nature: concept.nature,
            additive: concept.additive,
            observations: Vec::new(),
        }
    }

    /// Creates an empty series for an unresolved label.
    #[must_use]
    pub fn unclassified(statement: StatementKind, label: impl Into<String>, instant: bool) -> Self {
        let label = label.into();
        Self {
            key: RowKey::Unclassified {
                statement,
                label: label.clone(),
                instant,
            },
            label,
            statement,
            nature: ConceptNature::of(instant),
            additive: true,
            observations: Vec::new(),
        }
    }

    /// Adds an observation.
    pub fn push(&mut self, observation: LineItemObservation, rank: usize) {
        self.observations.push(RankedObservation { observation, rank });
    }
}

/// Groups resolved and unresolved observations into series.
///
/// Concept series come first in taxonomy order, followed by unclassified
/// series sorted by key. Unclassified series are additive unless one of their
/// observations carries a ratio unit.
#[must_use]
pub fn build_series(taxonomy: &Taxonomy, resolved: ResolvedSet) -> Vec<Series> {
    let mut concepts: BTreeMap<usize, Series> = BTreeMap::new();
    for item in resolved.resolved {
        let Some(id) = item.observation.canonical_concept.as_ref() else {
            continue;
        };
        let (Some(position), Some(concept)) = (taxonomy.position(id), taxonomy.concept(id)) else {
            continue;
        };
        concepts
            .entry(position)
            .or_insert_with(|| Series::for_concept(concept))
            .push(item.observation, item.rank);
    }

    let mut unclassified: BTreeMap<RowKey, Series> = BTreeMap::new();
    for observation in resolved.unresolved {
        let statement = observation.statement_kind;
        let label = observation.raw_label.clone();
        let instant = observation.is_instant;
        let key = RowKey::Unclassified {
            statement,
            label: label.clone(),
            instant,
        };
        unclassified
            .entry(key)
            .or_insert_with(|| Series::unclassified(statement, label, instant))
            .push(observation, 0);
    }
    for series in unclassified.values_mut() {
        series.additive = !series
            .observations
            .iter()
            .any(|o| o.observation.is_ratio_unit());
    }

    concepts
        .into_values()
        .chain(unclassified.into_values())
        .collect()
}

/// How a derived value was computed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Derivation {
    /// Year-to-date through quarter `n` less year-to-date through `n - 1`.
    CumulativeDifference(u8),
    /// Annual total less the nine-month year-to-date value.
    AnnualLessNineMonths,
}

impl fmt::Display for Derivation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CumulativeDifference(2) => f.write_str("six months less Q1"),
            Self::CumulativeDifference(n) => write!(f, "YTD Q{n} less YTD Q{}", n - 1),
            Self::AnnualLessNineMonths => f.write_str("annual less nine months"),
        }
    }
}

/// Whether a value was reported or derived.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Provenance {
    /// Reported for exactly this quarter.
    Direct,
    /// Computed from reported cumulative values.
    Derived(Derivation),
}

impl Provenance {
    /// Returns true for derived values.
    #[must_use]
    pub const fn is_derived(&self) -> bool {
        matches!(self, Self::Derived(_))
    }
}

/// The value of one row in one quarter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum QuarterValue {
    /// A reported or derived amount.
    Known {
        /// Amount in whole units.
        value: Decimal,
        /// How the amount was obtained.
        provenance: Provenance,
        /// Accession numbers of the filings the amount came from.
        sources: Vec<String>,
    },
    /// No value could be established.
    Indeterminate {
        /// Which inputs were missing.
        reason: String,
    },
}

impl QuarterValue {
    fn indeterminate(reason: impl Into<String>) -> Self {
        Self::Indeterminate {
            reason: reason.into(),
        }
    }

    /// Returns the amount, if known.
    #[must_use]
    pub const fn value(&self) -> Option<Decimal> {
        match self {
            Self::Known { value, .. } => Some(*value),
            Self::Indeterminate { .. } => None,
        }
    }

    /// Returns the provenance, if known.
    #[must_use]
    pub const fn provenance(&self) -> Option<Provenance> {
        match self {
            Self::Known { provenance, .. } => Some(*provenance),
            Self::Indeterminate { .. } => None,
        }
    }

    /// Returns true if an amount is known.
    #[must_use]
    pub const fn is_known(&self) -> bool {
        matches!(self, Self::Known { .. })
    }
}

/// One row's value in one fiscal quarter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReconciledValue {
    /// Row identity.
    pub key: RowKey,
    /// Quarter the value belongs to.
    pub quarter: FiscalQuarter,
    /// The value.
    pub value: QuarterValue,
}

/// All reconciled values for one row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconciledRow {
    /// Row identity.
    pub key: RowKey,
    /// Row caption.
    pub label: String,
    /// Statement the row belongs to.
    pub statement: StatementKind,
    /// Instant or flow.
    pub nature: ConceptNature,
    /// Values by `(fiscal_year, quarter)`.
    pub values: BTreeMap<(i32, u8), ReconciledValue>,
}

impl ReconciledRow {
    /// Returns the value for one quarter, if the quarter's fiscal year was reconciled.
    #[must_use]
    pub fn value(&self, fiscal_year: i32, quarter: u8) -> Option<&QuarterValue> {
        self.values.get(&(fiscal_year, quarter)).map(|v| &v.value)
    }
}

/// Result of reconciling every series.
#[derive(Clone, Debug, Default)]
pub struct Reconciliation {
    rows: BTreeMap<RowKey, ReconciledRow>,
    /// Conflicts, unit mismatches and annual mismatches found.
    pub log: ReconciliationLog,
}

impl Reconciliation {
    /// Returns all rows, ordered by key.
    pub fn rows(&self) -> impl Iterator<Item = &ReconciledRow> {
        self.rows.values()
    }

    /// Returns one row.
    #[must_use]
    pub fn row(&self, key: &RowKey) -> Option<&ReconciledRow> {
        self.rows.get(key)
    }

    /// Returns the value of a concept in one quarter.
    #[must_use]
    pub fn concept_value(&self, id: &str, fiscal_year: i32, quarter: u8) -> Option<&QuarterValue> {
        self.rows
            .get(&RowKey::Concept(ConceptId::new(id)))
            .and_then(|row| row.value(fiscal_year, quarter))
    }
}

impl PartialEq for Reconciliation {
    fn eq(&self, other: &Self) -> bool {
        self.rows == other.rows && self.log.iter().eq(other.log.iter())
    }
}

/// Comparison tolerance: `max(absolute, relative × |reference|)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tolerance {
    /// Absolute floor, in whole units.
    pub absolute: Decimal,
    /// Fraction of the reference value.
    pub relative: Decimal,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            absolute: Decimal::ONE,
            relative: Decimal::new(1, 3),
        }
    }
}

impl Tolerance {
    /// Returns true if `other` is within tolerance of `reference`.
    #[must_use]
    pub fn allows(&self, reference: Decimal, other: Decimal) -> bool {
        let bound = self.absolute.max(self.relative * reference.abs());
        (reference - other).abs() <= bound
    }
}

/// Where an observation sits within its fiscal year.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Span {
    Instant(u8),
    Quarter(u8),
    Cumulative(u8),
}

fn classify(observation: &LineItemObservation, calendar: &FiscalCalendar) -> Option<(i32, Span)> {
    let (fiscal_year, quarter) = calendar.locate(observation.period_end)?;
    if observation.is_instant {
        return Some((fiscal_year, Span::Instant(quarter)));
    }
    let days = observation.duration_days();
    if (QUARTER_MIN_DAYS..=QUARTER_MAX_DAYS).contains(&days) {
        return Some((fiscal_year, Span::Quarter(quarter)));
    }
    let start = calendar.fiscal_year_start(fiscal_year);
    if quarter >= 2 && (observation.period_start - start).num_days().abs() <= MATCH_TOLERANCE_DAYS {
        return Some((fiscal_year, Span::Cumulative(quarter)));
    }
    None
}

/// The observation chosen for one span.
#[derive(Clone, Debug)]
struct Chosen {
    value: Decimal,
    filing: String,
}

fn cumulative_name(quarter: u8) -> String {
    match quarter {
        1 => "the Q1 value".to_string(),
        4 => "the annual total".to_string(),
        n => format!("year-to-date through Q{n}"),
    }
}

fn sources(a: &Chosen, b: &Chosen) -> Vec<String> {
    let mut sources = vec![a.filing.clone(), b.filing.clone()];
    sources.sort();
    sources.dedup();
    sources
}

/// Converts series into per-quarter values.
#[derive(Clone, Copy, Debug, Default)]
pub struct Reconciler {
    tolerance: Tolerance,
}

impl Reconciler {
    /// Creates a reconciler with the given tolerance.
    #[must_use]
    pub const fn new(tolerance: Tolerance) -> Self {
        Self { tolerance }
    }

    /// Returns the comparison tolerance.
    #[must_use]
    pub const fn tolerance(&self) -> Tolerance {
        self.tolerance
    }

    /// Reconciles every series over the given fiscal years.
    ///
    /// A series produces values only for fiscal years in which it has at least
    /// one usable observation; within such a year every quarter gets a value.
    #[must_use]
    pub fn reconcile(
        &self,
        series: &[Series],
        schedule: &QuarterSchedule,
        fiscal_years: &[i32],
    ) -> Reconciliation {
        let years: BTreeSet<i32> = fiscal_years.iter().copied().collect();
        let mut reconciliation = Reconciliation::default();

        for item in series {
            let mut log = ReconciliationLog::new();
            let values = self.reconcile_series(item, schedule, &years, &mut log);
            reconciliation.log.merge(log);
            if values.is_empty() {
                continue;
            }
            reconciliation.rows.insert(
                item.key.clone(),
                ReconciledRow {
                    key: item.key.clone(),
                    label: item.label.clone(),
                    statement: item.statement,
                    nature: item.nature,
                    values: values
                        .into_iter()
                        .map(|v| (v.quarter.key(), v))
                        .collect(),
                },
            );
        }

        debug!(
            rows = reconciliation.rows.len(),
            issues = reconciliation.log.len(),
            "Reconciled series"
        );
        reconciliation
    }

    /// Reconciles one series, returning its values for the requested years.
    pub fn reconcile_series(
        &self,
        series: &Series,
        schedule: &QuarterSchedule,
        fiscal_years: &BTreeSet<i32>,
        log: &mut ReconciliationLog,
    ) -> Vec<ReconciledValue> {
        let calendar = schedule.calendar();
        let classified: Vec<(i32, Span, &RankedObservation)> = series
            .observations
            .iter()
            .filter(|o| o.observation.is_instant == series.nature.is_instant())
            .filter_map(|o| {
                classify(&o.observation, calendar).map(|(fy, span)| (fy, span, o))
            })
            .filter(|(fy, _, _)| fiscal_years.contains(fy))
            .collect();

        let classified = self.drop_minority_units(series, classified, log);

        let mut by_year: BTreeMap<i32, BTreeMap<Span, Vec<&RankedObservation>>> = BTreeMap::new();
        for (fiscal_year, span, observation) in classified {
            by_year
                .entry(fiscal_year)
                .or_default()
                .entry(span)
                .or_default()
                .push(observation);
        }

        let mut values = Vec::new();
        for (fiscal_year, spans) in by_year {
            let quarters = if series.nature.is_instant() {
                self.instant_year(series, fiscal_year, &spans, schedule, log)
            } else if series.additive {
                self.additive_year(series, fiscal_year, &spans, schedule, log)
            } else {
                self.direct_only_year(series, &spans, schedule, log)
            };
            values.extend(quarters.into_iter().enumerate().map(|(i, value)| {
                ReconciledValue {
                    key: series.key.clone(),
                    quarter: schedule.quarter(fiscal_year, i as u8 + 1),
                    value,
                }
            }));
        }
        values
    }

    fn drop_minority_units<'a>(
        &self,
        series: &Series,
        classified: Vec<(i32, Span, &'a RankedObservation)>,
        log: &mut ReconciliationLog,
    ) -> Vec<(i32, Span, &'a RankedObservation)> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for (_, _, o) in &classified {
            *counts.entry(o.observation.unit.as_str()).or_default() += 1;
        }
        // Most frequent unit; ties go to the alphabetically first.
        let Some(dominant) = counts
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(unit, _)| (*unit).to_string())
        else {
            return classified;
        };

        let mut reported = BTreeSet::new();
        classified
            .into_iter()
            .filter(|(_, _, o)| {
                if o.observation.unit == dominant {
                    return true;
                }
                let filing = o.observation.source_filing_id.clone();
                if reported.insert((o.observation.unit.clone(), filing.clone())) {
                    log.push(Issue::UnitMismatch {
                        row: series.label.clone(),
                        unit: o.observation.unit.clone(),
                        expected_unit: dominant.clone(),
                        filing_id: filing,
                    });
                }
                false
            })
            .collect()
    }

    /// Picks one value for a span.
    ///
    /// Within a filing the best-ranked synonym wins. Across filings the most
    /// recently filed one wins; for instants a filing whose own period is the
    /// quarter in question is preferred first. Disagreeing losers are logged.
    fn choose(
        &self,
        series: &Series,
        candidates: Option<&Vec<&RankedObservation>>,
        primary: Option<(i32, u8)>,
        calendar: &FiscalCalendar,
        log: &mut ReconciliationLog,
    ) -> Option<Chosen> {
        let candidates = candidates?;

        let mut per_filing: BTreeMap<&str, (&RankedObservation, Decimal)> = BTreeMap::new();
        for &candidate in candidates {
            let value = candidate.observation.normalized_value();
            let filing = candidate.observation.source_filing_id.as_str();
            let better = per_filing.get(filing).is_none_or(|(current, current_value)| {
                (candidate.rank, value) < (current.rank, *current_value)
            });
            if better {
                per_filing.insert(filing, (candidate, value));
            }
        }

        let precedence = |o: &LineItemObservation| {
            let is_primary = primary.is_some_and(|p| calendar.locate(o.filing_period_end) == Some(p));
            (is_primary, o.filed_on, o.source_filing_id.clone())
        };
        let (winner, winner_value) = per_filing
            .values()
            .max_by_key(|(o, _)| precedence(&o.observation))
            .copied()?;

        for (loser, loser_value) in per_filing.values() {
            if loser.observation.source_filing_id == winner.observation.source_filing_id
                || self.tolerance.allows(winner_value, *loser_value)
            {
                continue;
            }
            log.push(Issue::ConflictingObservation {
                row: series.label.clone(),
                period_end: winner.observation.period_end,
                kept_value: winner_value,
                kept_filing: winner.observation.source_filing_id.clone(),
                discarded_value: *loser_value,
                discarded_filing: loser.observation.source_filing_id.clone(),
            });
        }

        Some(Chosen {
            value: winner_value,
            filing: winner.observation.source_filing_id.clone(),
        })
    }

    fn instant_year(
        &self,
        series: &Series,
        fiscal_year: i32,
        spans: &BTreeMap<Span, Vec<&RankedObservation>>,
        schedule: &QuarterSchedule,
        log: &mut ReconciliationLog,
    ) -> Vec<QuarterValue> {
        (1..=4)
            .map(|q| {
                match self.choose(
                    series,
                    spans.get(&Span::Instant(q)),
                    Some((fiscal_year, q)),
                    schedule.calendar(),
                    log,
                ) {
                    Some(chosen) => QuarterValue::Known {
                        value: chosen.value,
                        provenance: Provenance::Direct,
                        sources: vec![chosen.filing],
                    },
                    None => QuarterValue::indeterminate("no balance reported at the quarter end"),
                }
            })
            .collect()
    }

    fn direct_only_year(
        &self,
        series: &Series,
        spans: &BTreeMap<Span, Vec<&RankedObservation>>,
        schedule: &QuarterSchedule,
        log: &mut ReconciliationLog,
    ) -> Vec<QuarterValue> {
        (1..=4)
            .map(|q| {
                match self.choose(series, spans.get(&Span::Quarter(q)), None, schedule.calendar(), log)
                {
                    Some(chosen) => QuarterValue::Known {
                        value: chosen.value,
                        provenance: Provenance::Direct,
                        sources: vec![chosen.filing],
                    },
                    None => QuarterValue::indeterminate(
                        "no value reported for the quarter and the item cannot be derived from year-to-date totals",
                    ),
                }
            })
            .collect()
    }

    fn additive_year(
        &self,
        series: &Series,
        fiscal_year: i32,
        spans: &BTreeMap<Span, Vec<&RankedObservation>>,
        schedule: &QuarterSchedule,
        log: &mut ReconciliationLog,
    ) -> Vec<QuarterValue> {
        let calendar = schedule.calendar();
        let mut direct: [Option<Chosen>; 5] = Default::default();
        let mut cumulative: [Option<Chosen>; 5] = Default::default();
        for q in 1..=4u8 {
            direct[q as usize] = self.choose(series, spans.get(&Span::Quarter(q)), None, calendar, log);
            if q >= 2 {
                cumulative[q as usize] =
                    self.choose(series, spans.get(&Span::Cumulative(q)), None, calendar, log);
            }
        }
        // The first quarter's value is also its year-to-date value.
        cumulative[1] = direct[1].clone();

        let quarters: Vec<QuarterValue> = (1..=4u8)
            .map(|q| {
                let n = q as usize;
                if let Some(chosen) = &direct[n] {
                    return QuarterValue::Known {
                        value: chosen.value,
                        provenance: Provenance::Direct,
                        sources: vec![chosen.filing.clone()],
                    };
                }
                if q == 1 {
                    return QuarterValue::indeterminate("no value reported for the first quarter");
                }
                match (&cumulative[n], &cumulative[n - 1]) {
                    (Some(through), Some(before)) => QuarterValue::Known {
                        value: through.value - before.value,
                        provenance: Provenance::Derived(if q == 4 {
                            Derivation::AnnualLessNineMonths
                        } else {
                            Derivation::CumulativeDifference(q)
                        }),
                        sources: sources(through, before),
                    },
                    (None, None) => QuarterValue::indeterminate(format!(
                        "no quarterly value, and neither {} nor {} was reported",
                        cumulative_name(q),
                        cumulative_name(q - 1)
                    )),
                    (None, Some(_)) => QuarterValue::indeterminate(format!(
                        "no quarterly value, and {} was not reported",
                        cumulative_name(q)
                    )),
                    (Some(_), None) => QuarterValue::indeterminate(format!(
                        "no quarterly value, and {} was not reported",
                        cumulative_name(q - 1)
                    )),
                }
            })
            .collect();

        if let Some(annual) = &cumulative[4]
            && let Some(total) = quarters
                .iter()
                .map(QuarterValue::value)
                .sum::<Option<Decimal>>()
            && !self.tolerance.allows(annual.value, total)
        {
            log.push(Issue::AnnualMismatch {
                row: series.label.clone(),
                fiscal_year,
                quarters_total: total,
                annual_total: annual.value,
            });
        }

        quarters
    }
}
