//! Line-item resolution.
//!
//! Maps reported labels onto canonical concepts in three tiers:
//!
//! 1. exact match against the synonym table
//! 2. match on the normalized label (see [`normalize_label`])
//! 3. whole-word containment of an allow-listed fuzzy pattern
//!
//! A candidate whose nature (instant or flow) disagrees with the observation
//! is rejected and the next tier is tried.

use quarterly_core::{ConceptId, ConceptNature, LineItemObservation, ReconciliationLog};
use serde::Serialize;
use tracing::debug;

use crate::taxonomy::{FuzzyRule, SynonymEntry, Taxonomy};

/// Token sequences rewritten during normalization.
const ABBREVIATIONS: &[(&[&str], &[&str])] = &[
    (&["sg", "and", "a"], &["selling", "general", "and", "administrative"]),
    (&["s", "g", "and", "a"], &["selling", "general", "and", "administrative"]),
    (&["r", "and", "d"], &["research", "and", "development"]),
    (&["pp", "and", "e"], &["property", "plant", "and", "equipment"]),
    (&["ppe"], &["property", "plant", "and", "equipment"]),
    (&["eps"], &["earnings", "per", "share"]),
    (&["shareholders"], &["stockholders"]),
    (&["shareowners"], &["stockholders"]),
    (&["amort"], &["amortization"]),
    (&["depr"], &["depreciation"]),
    (&["equiv"], &["equivalents"]),
    (&["equivs"], &["equivalents"]),
    (&["oper"], &["operating"]),
    (&["incl"], &["including"]),
    (&["excl"], &["excluding"]),
    (&["tot"], &["total"]),
];

/// Normalizes a label for tier-two matching.
///
/// Drops an XBRL namespace prefix (`us-gaap:`), splits camel case, folds case,
/// turns `&` into `and`, drops apostrophes and periods, treats every other
/// punctuation character as a word break, and expands common abbreviations.
/// Words in the result are separated by single spaces.
///
/// ```
/// use quarterly_engine::resolver::normalize_label;
///
/// assert_eq!(normalize_label("us-gaap:NetIncomeLoss"), "net income loss");
/// assert_eq!(normalize_label("Net income (loss)"), "net income loss");
/// assert_eq!(normalize_label("SG&A"), "selling general and administrative");
/// ```
#[must_use]
pub fn normalize_label(label: &str) -> String {
    let label = strip_namespace(label.trim());
    let spaced = split_camel_case(label);

    let mut cleaned = String::with_capacity(spaced.len() + 8);
    for c in spaced.chars() {
        match c {
            '&' => cleaned.push_str(" and "),
            '\'' | '\u{2019}' | '.' => {}
            c if c.is_alphanumeric() => cleaned.extend(c.to_lowercase()),
            _ => cleaned.push(' '),
        }
    }

    let tokens: Vec<&str> = cleaned.split_whitespace().collect();
    let mut expanded: Vec<&str> = Vec::with_capacity(tokens.len());
    let mut i = 0;
    'outer: while i < tokens.len() {
        for (from, to) in ABBREVIATIONS {
            if tokens[i..].starts_with(from) {
                expanded.extend_from_slice(to);
                i += from.len();
                continue 'outer;
            }
        }
        expanded.push(tokens[i]);
        i += 1;
    }
    expanded.join(" ")
}

fn strip_namespace(label: &str) -> &str {
    match label.split_once(':') {
        Some((prefix, rest))
            if !prefix.is_empty()
                && prefix
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_') =>
        {
            rest
        }
        _ => label,
    }
}

fn split_camel_case(label: &str) -> String {
    let chars: Vec<char> = label.chars().collect();
    let mut out = String::with_capacity(label.len() + 8);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_lower)
            {
                out.push(' ');
            }
        }
        out.push(c);
    }
    out
}

/// Which tier produced a resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum MatchTier {
    /// Label equals a synonym.
    Exact,
    /// Normalized label equals a normalized synonym.
    Normalized,
    /// Normalized label contains an allow-listed pattern.
    Fuzzy,
}

/// A successful resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    /// Concept the label resolved to.
    pub concept: ConceptId,
    /// Tier that matched.
    pub tier: MatchTier,
    /// Preference of the matched synonym within its concept (0 is best).
    pub rank: usize,
}

/// An observation together with how it was resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedObservation {
    /// The observation, with `canonical_concept` set.
    pub observation: LineItemObservation,
    /// Tier that matched.
    pub tier: MatchTier,
    /// Synonym rank (0 is best).
    pub rank: usize,
}

/// Output of [`Resolver::resolve_all`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolvedSet {
    /// Observations mapped to a concept.
    pub resolved: Vec<ResolvedObservation>,
    /// Observations kept under their reported label.
    pub unresolved: Vec<LineItemObservation>,
}

/// Resolves labels against a [`Taxonomy`].
#[derive(Clone, Copy, Debug)]
pub struct Resolver<'a> {
    taxonomy: &'a Taxonomy,
}

impl<'a> Resolver<'a> {
    /// Creates a resolver over `taxonomy`.
    #[must_use]
    pub const fn new(taxonomy: &'a Taxonomy) -> Self {
        Self { taxonomy }
    }

    /// Resolves one observation.
    #[must_use]
    pub fn resolve(&self, observation: &LineItemObservation) -> Option<Resolution> {
        self.resolve_label(
            &observation.raw_label,
            ConceptNature::of(observation.is_instant),
        )
    }

    /// Resolves a label reported with the given nature.
    #[must_use]
    pub fn resolve_label(&self, label: &str, nature: ConceptNature) -> Option<Resolution> {
        if let Some(entry) = self.taxonomy.exact_match(label)
            && let Some(resolution) = self.accept(entry, MatchTier::Exact, nature)
        {
            return Some(resolution);
        }

        let key = normalize_label(label);
        if key.is_empty() {
            return None;
        }
        if let Some(entry) = self.taxonomy.normalized_match(&key)
            && let Some(resolution) = self.accept(entry, MatchTier::Normalized, nature)
        {
            return Some(resolution);
        }

        self.fuzzy_match(&key, nature)
    }

    fn accept(
        &self,
        entry: SynonymEntry,
        tier: MatchTier,
        nature: ConceptNature,
    ) -> Option<Resolution> {
        let concept = self.taxonomy.concept_at(entry.concept);
        (concept.nature == nature).then(|| Resolution {
            concept: concept.id.clone(),
            tier,
            rank: entry.rank,
        })
    }

    fn fuzzy_match(&self, key: &str, nature: ConceptNature) -> Option<Resolution> {
        let padded = format!(" {key} ");
        let mut best: Option<&FuzzyRule> = None;
        let mut ambiguous = false;

        for rule in self.taxonomy.fuzzy_rules() {
            if self.taxonomy.concept_at(rule.entry.concept).nature != nature
                || !padded.contains(&format!(" {} ", rule.pattern))
            {
                continue;
            }
            match best {
                None => best = Some(rule),
                Some(current) if rule.pattern.len() > current.pattern.len() => {
                    best = Some(rule);
                    ambiguous = false;
                }
                Some(current)
                    if rule.pattern.len() == current.pattern.len()
                        && rule.entry.concept != current.entry.concept =>
                {
                    ambiguous = true;
                }
                Some(_) => {}
            }
        }

        if ambiguous {
            debug!(label = key, "Ambiguous fuzzy match");
            return None;
        }
        best.and_then(|rule| self.accept(rule.entry, MatchTier::Fuzzy, nature))
    }

    /// Resolves every observation, recording unresolved labels in `log`.
    pub fn resolve_all(
        &self,
        observations: Vec<LineItemObservation>,
        log: &mut ReconciliationLog,
    ) -> ResolvedSet {
        let mut set = ResolvedSet::default();
        for observation in observations {
            match self.resolve(&observation) {
                Some(resolution) => set.resolved.push(ResolvedObservation {
                    observation: observation.with_concept(resolution.concept),
                    tier: resolution.tier,
                    rank: resolution.rank,
                }),
                None => {
                    log.record_unresolved(
                        &observation.raw_label,
                        observation.statement_kind,
                        &observation.source_filing_id,
                    );
                    set.unresolved.push(observation);
                }
            }
        }
        debug!(
            resolved = set.resolved.len(),
            unresolved = set.unresolved.len(),
            "Resolved observations"
        );
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use quarterly_core::{FilingRef, FormType, StatementKind};
    use rust_decimal_macros::dec;

    fn taxonomy() -> Taxonomy {
        Taxonomy::builtin().unwrap()
    }

    fn resolve(label: &str, nature: ConceptNature) -> Option<Resolution> {
        Resolver::new(&taxonomy()).resolve_label(label, nature)
    }

    #[test]
    fn test_normalize_label() {
        assert_eq!(normalize_label("us-gaap:NetIncomeLoss"), "net income loss");
        assert_eq!(
            normalize_label("Total shareholders\u{2019} equity"),
            "total stockholders equity"
        );
        assert_eq!(
            normalize_label("  Research & Development  "),
            "research and development"
        );
        assert_eq!(normalize_label("PP&E, net"), "property plant and equipment net");
        assert_eq!(normalize_label("EPS - diluted"), "earnings per share diluted");
        assert_eq!(normalize_label("Note: see below"), "note see below");
        assert_eq!(normalize_label("---"), "");
    }

    #[test]
    fn test_net_revenues_and_total_net_sales_resolve_to_revenue() {
        for label in ["Net revenues", "Total net sales"] {
            let resolution = resolve(label, ConceptNature::Flow).unwrap();
            assert_eq!(resolution.concept.as_str(), "Revenue");
            assert_eq!(resolution.tier, MatchTier::Exact);
        }
    }

    #[test]
    fn test_xbrl_element_names_are_exact() {
        let resolution = resolve("us-gaap:Revenues", ConceptNature::Flow).unwrap();
        assert_eq!(resolution.concept.as_str(), "Revenue");
        assert_eq!(resolution.rank, 0);

        let resolution =
            resolve("us-gaap:RevenueFromContractWithCustomerExcludingAssessedTax", ConceptNature::Flow)
                .unwrap();
        assert_eq!(resolution.concept.as_str(), "Revenue");
        assert!(resolution.rank > 0);
    }

    #[test]
    fn test_normalized_tier() {
        let resolution = resolve("TOTAL REVENUES.", ConceptNature::Flow).unwrap();
        assert_eq!(resolution.concept.as_str(), "Revenue");
        assert_eq!(resolution.tier, MatchTier::Normalized);

        let resolution = resolve("ifrs-full:Goodwill", ConceptNature::Instant).unwrap();
        assert_eq!(resolution.concept.as_str(), "Goodwill");
        assert_eq!(resolution.tier, MatchTier::Normalized);

        let resolution =
            resolve("Total Shareholders\u{2019} Equity", ConceptNature::Instant).unwrap();
        assert_eq!(resolution.concept.as_str(), "StockholdersEquity");
    }

    #[test]
    fn test_fuzzy_tier_prefers_longest_pattern() {
        let resolution = resolve(
            "Total revenues, including membership fees",
            ConceptNature::Flow,
        )
        .unwrap();
        assert_eq!(resolution.concept.as_str(), "Revenue");
        assert_eq!(resolution.tier, MatchTier::Fuzzy);

        let resolution = resolve(
            "Total liabilities and equity (deficit)",
            ConceptNature::Instant,
        )
        .unwrap();
        assert_eq!(resolution.concept.as_str(), "LiabilitiesAndEquity");
        assert_eq!(resolution.tier, MatchTier::Fuzzy);
    }

    #[test]
    fn test_fuzzy_requires_whole_words() {
        assert!(resolve("Subtotal assets of subsidiaries", ConceptNature::Instant).is_none());
    }

    #[test]
    fn test_nature_mismatch_is_unresolved() {
        assert!(resolve("Total assets", ConceptNature::Flow).is_none());
        assert!(resolve("Net income", ConceptNature::Instant).is_none());
    }

    #[test]
    fn test_equal_length_fuzzy_matches_are_ambiguous() {
        let text = r#"
version = "t"
[[concept]]
id = "A"
label = "A"
statement = "income"
nature = "flow"
fuzzy = ["alpha fee"]
[[concept]]
id = "B"
label = "B"
statement = "income"
nature = "flow"
fuzzy = ["gamma fee"]
"#;
        let taxonomy = Taxonomy::from_toml_str(text).unwrap();
        let resolver = Resolver::new(&taxonomy);
        assert!(
            resolver
                .resolve_label("alpha fee and gamma fee", ConceptNature::Flow)
                .is_none()
        );
        assert_eq!(
            resolver
                .resolve_label("alpha fee income", ConceptNature::Flow)
                .unwrap()
                .concept
                .as_str(),
            "A"
        );
    }

    #[test]
    fn test_resolve_all_keeps_and_logs_unresolved() {
        let date = |m, d| NaiveDate::from_ymd_opt(2022, m, d).unwrap();
        let filing = FilingRef::new("f1", FormType::Quarterly, date(6, 3), date(4, 30));
        let observations = vec![
            LineItemObservation::flow(
                "us-gaap:Revenues",
                dec!(141569000000),
                date(2, 1),
                date(4, 30),
                StatementKind::Income,
                &filing,
            ),
            LineItemObservation::flow(
                "wmt:MembershipAndOtherIncome",
                dec!(1),
                date(2, 1),
                date(4, 30),
                StatementKind::Income,
                &filing,
            ),
            LineItemObservation::flow(
                "wmt:MembershipAndOtherIncome",
                dec!(2),
                date(2, 1),
                date(4, 30),
                StatementKind::Income,
                &filing,
            ),
        ];

        let taxonomy = taxonomy();
        let mut log = ReconciliationLog::new();
        let set = Resolver::new(&taxonomy).resolve_all(observations, &mut log);

        assert_eq!(set.resolved.len(), 1);
        assert_eq!(
            set.resolved[0].observation.canonical_concept,
            Some(ConceptId::from("Revenue"))
        );
        assert_eq!(set.unresolved.len(), 2);
        assert_eq!(log.count("unresolved"), 1);
    }
}
