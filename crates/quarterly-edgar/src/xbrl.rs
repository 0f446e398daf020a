//! XBRL instance parsing.

use chrono::NaiveDate;
use quarterly_core::{
    FilingDocument, FilingRef, LineItemObservation, QuarterlyError, Result, StatementKind,
    StatementParser,
};
use roxmltree::{Document, Node};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use tracing::debug;

const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// Units kept by the parser; everything else (`pure`, ratios, counts) is skipped.
const SUPPORTED_UNITS: [&str; 3] = ["USD", "shares", "USD/shares"];

/// Namespaces whose facts describe the document rather than the statements.
const SKIPPED_PREFIXES: [&str; 2] = ["dei", "srt"];

/// Element names that are structure, not facts.
const NON_FACT_ELEMENTS: [&str; 4] = ["context", "unit", "schemaRef", "footnoteLink"];

/// Local-name fragments that place a duration fact on the cash flow statement.
const CASH_FLOW_MARKERS: [&str; 6] = [
    "CashProvidedBy",
    "Payments",
    "Proceeds",
    "IncreaseDecrease",
    "Depreciation",
    "ShareBasedCompensation",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ContextPeriod {
    Instant(NaiveDate),
    Duration(NaiveDate, NaiveDate),
}

/// Parses XBRL instance documents into observations.
///
/// Only non-dimensional contexts are read: facts qualified by a segment or
/// scenario describe a breakdown, not the statement line itself. Labels are
/// reported as `prefix:LocalName` (e.g. `us-gaap:Revenues`) with scale 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct XbrlInstanceParser;

impl XbrlInstanceParser {
    /// Creates a parser.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl StatementParser for XbrlInstanceParser {
    fn parse(
        &self,
        filing: &FilingRef,
        document: &FilingDocument,
    ) -> Result<Vec<LineItemObservation>> {
        let text = std::str::from_utf8(&document.content).map_err(|e| {
            QuarterlyError::Parse(format!("{} is not valid UTF-8: {}", filing.accession, e))
        })?;
        let xml = Document::parse(text)
            .map_err(|e| QuarterlyError::Parse(format!("{}: {}", filing.accession, e)))?;

        let root = xml.root_element();
        let contexts = read_contexts(root);
        let units = read_units(root);

        let mut seen = HashSet::new();
        let mut observations = Vec::new();

        for node in root.children().filter(Node::is_element) {
            let name = node.tag_name().name();
            if NON_FACT_ELEMENTS.contains(&name) {
                continue;
            }
            let (Some(context_ref), Some(unit_ref)) =
                (node.attribute("contextRef"), node.attribute("unitRef"))
            else {
                continue;
            };
            let Some(prefix) = node
                .tag_name()
                .namespace()
                .and_then(|ns| node.lookup_prefix(ns))
            else {
                continue;
            };
            if SKIPPED_PREFIXES.contains(&prefix)
                || node.attribute((XSI_NAMESPACE, "nil")) == Some("true")
            {
                continue;
            }
            let (Some(period), Some(unit)) = (contexts.get(context_ref), units.get(unit_ref)) else {
                continue;
            };
            if !SUPPORTED_UNITS.contains(&unit.as_str()) {
                continue;
            }
            let Some(value) = node.text().and_then(parse_value) else {
                continue;
            };

            let label = format!("{}:{}", prefix, name);
            if !seen.insert((label.clone(), *period, unit.clone())) {
                // Inline filings repeat facts wherever they are displayed.
                continue;
            }

            let observation = match *period {
                ContextPeriod::Instant(date) => LineItemObservation::instant(
                    label,
                    value,
                    date,
                    StatementKind::Balance,
                    filing,
                ),
                ContextPeriod::Duration(start, end) => LineItemObservation::flow(
                    label,
                    value,
                    start,
                    end,
                    classify_duration(name),
                    filing,
                ),
            };
            observations.push(observation.with_unit(unit.clone()));
        }

        debug!(
            accession = %filing.accession,
            "Parsed {} observations from {} contexts",
            observations.len(),
            contexts.len()
        );
        Ok(observations)
    }
}

fn classify_duration(local_name: &str) -> StatementKind {
    if CASH_FLOW_MARKERS.iter().any(|m| local_name.contains(m)) {
        StatementKind::CashFlow
    } else {
        StatementKind::Income
    }
}

fn parse_value(text: &str) -> Option<Decimal> {
    let text = text.trim();
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .ok()
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").ok()
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|c| c.is_element() && c.tag_name().name() == name)
}

/// Reads non-dimensional contexts keyed by id.
fn read_contexts(root: Node<'_, '_>) -> HashMap<String, ContextPeriod> {
    let mut contexts = HashMap::new();

    for context in root
        .children()
        .filter(|n| n.is_element() && n.tag_name().name() == "context")
    {
        let Some(id) = context.attribute("id") else {
            continue;
        };
        let dimensional = context.descendants().any(|n| {
            n.is_element() && matches!(n.tag_name().name(), "segment" | "scenario")
        });
        if dimensional {
            continue;
        }
        let Some(period) = child(context, "period") else {
            continue;
        };

        let date_of = |name: &str| child(period, name).and_then(|n| n.text()).and_then(parse_date);
        let parsed = match date_of("instant") {
            Some(date) => Some(ContextPeriod::Instant(date)),
            None => date_of("startDate")
                .zip(date_of("endDate"))
                .map(|(start, end)| ContextPeriod::Duration(start, end)),
        };
        if let Some(parsed) = parsed {
            contexts.insert(id.to_string(), parsed);
        }
    }

    contexts
}

/// Reads units keyed by id, as `USD`, `shares` or `numerator/denominator`.
fn read_units(root: Node<'_, '_>) -> HashMap<String, String> {
    let mut units = HashMap::new();

    for unit in root
        .children()
        .filter(|n| n.is_element() && n.tag_name().name() == "unit")
    {
        let Some(id) = unit.attribute("id") else {
            continue;
        };
        let measure = match child(unit, "divide") {
            Some(divide) => {
                let numerator = child(divide, "unitNumerator").and_then(measure_of);
                let denominator = child(divide, "unitDenominator").and_then(measure_of);
                numerator
                    .zip(denominator)
                    .map(|(n, d)| format!("{}/{}", n, d))
            }
            None => measure_of(unit).map(str::to_string),
        };
        if let Some(measure) = measure {
            units.insert(id.to_string(), measure);
        }
    }

    units
}

fn measure_of<'a>(node: Node<'a, '_>) -> Option<&'a str> {
    child(node, "measure")
        .and_then(|m| m.text())
        .map(strip_measure_prefix)
}

fn strip_measure_prefix(measure: &str) -> &str {
    let measure = measure.trim();
    measure.rsplit_once(':').map_or(measure, |(_, local)| local)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarterly_core::FormType;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn filing() -> FilingRef {
        FilingRef::new(
            "0000104169-22-000040",
            FormType::Quarterly,
            date(2022, 6, 3),
            date(2022, 4, 30),
        )
    }

    const INSTANCE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<xbrli:xbrl xmlns:xbrli="http://www.xbrl.org/2003/instance"
    xmlns:us-gaap="http://fasb.org/us-gaap/2022"
    xmlns:dei="http://xbrl.sec.gov/dei/2022"
    xmlns:wmt="http://www.walmart.com/20220430"
    xmlns:iso4217="http://www.xbrl.org/2003/iso4217"
    xmlns:xbrldi="http://xbrl.org/2006/xbrldi"
    xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <xbrli:context id="q1">
    <xbrli:entity><xbrli:identifier scheme="http://www.sec.gov/CIK">0000104169</xbrli:identifier></xbrli:entity>
    <xbrli:period><xbrli:startDate>2022-02-01</xbrli:startDate><xbrli:endDate>2022-04-30</xbrli:endDate></xbrli:period>
  </xbrli:context>
  <xbrli:context id="i1">
    <xbrli:entity><xbrli:identifier scheme="http://www.sec.gov/CIK">0000104169</xbrli:identifier></xbrli:entity>
    <xbrli:period><xbrli:instant>2022-04-30</xbrli:instant></xbrli:period>
  </xbrli:context>
  <xbrli:context id="seg">
    <xbrli:entity>
      <xbrli:identifier scheme="http://www.sec.gov/CIK">0000104169</xbrli:identifier>
      <xbrli:segment><xbrldi:explicitMember dimension="us-gaap:StatementBusinessSegmentsAxis">wmt:SamsClubMember</xbrldi:explicitMember></xbrli:segment>
    </xbrli:entity>
    <xbrli:period><xbrli:startDate>2022-02-01</xbrli:startDate><xbrli:endDate>2022-04-30</xbrli:endDate></xbrli:period>
  </xbrli:context>
  <xbrli:unit id="usd"><xbrli:measure>iso4217:USD</xbrli:measure></xbrli:unit>
  <xbrli:unit id="shares"><xbrli:measure>xbrli:shares</xbrli:measure></xbrli:unit>
  <xbrli:unit id="usdPerShare">
    <xbrli:divide>
      <xbrli:unitNumerator><xbrli:measure>iso4217:USD</xbrli:measure></xbrli:unitNumerator>
      <xbrli:unitDenominator><xbrli:measure>xbrli:shares</xbrli:measure></xbrli:unitDenominator>
    </xbrli:divide>
  </xbrli:unit>
  <xbrli:unit id="pure"><xbrli:measure>xbrli:pure</xbrli:measure></xbrli:unit>
  <dei:EntityCommonStockSharesOutstanding contextRef="i1" unitRef="shares" decimals="INF">2724000000</dei:EntityCommonStockSharesOutstanding>
  <us-gaap:Revenues contextRef="q1" unitRef="usd" decimals="-6">141569000000</us-gaap:Revenues>
  <us-gaap:Revenues contextRef="q1" unitRef="usd" decimals="-6">141569000000</us-gaap:Revenues>
  <us-gaap:Revenues contextRef="seg" unitRef="usd" decimals="-6">19608000000</us-gaap:Revenues>
  <us-gaap:Assets contextRef="i1" unitRef="usd" decimals="-6">249000000000</us-gaap:Assets>
  <us-gaap:EarningsPerShareDiluted contextRef="q1" unitRef="usdPerShare" decimals="2">0.74</us-gaap:EarningsPerShareDiluted>
  <us-gaap:NetCashProvidedByUsedInOperatingActivities contextRef="q1" unitRef="usd" decimals="-6">-2003000000</us-gaap:NetCashProvidedByUsedInOperatingActivities>
  <us-gaap:PaymentsToAcquirePropertyPlantAndEquipment contextRef="q1" unitRef="usd" decimals="-6">3395000000</us-gaap:PaymentsToAcquirePropertyPlantAndEquipment>
  <us-gaap:EffectiveIncomeTaxRateContinuingOperations contextRef="q1" unitRef="pure" decimals="3">0.259</us-gaap:EffectiveIncomeTaxRateContinuingOperations>
  <wmt:OtherGainsAndLosses contextRef="q1" unitRef="usd" xsi:nil="true"/>
  <us-gaap:SegmentReportingDisclosureTextBlock contextRef="q1">&lt;p&gt;text&lt;/p&gt;</us-gaap:SegmentReportingDisclosureTextBlock>
</xbrli:xbrl>
"#;

    fn parse(content: &str) -> Result<Vec<LineItemObservation>> {
        XbrlInstanceParser::new().parse(
            &filing(),
            &FilingDocument::new("0000104169-22-000040", content.as_bytes().to_vec()),
        )
    }

    fn find<'a>(observations: &'a [LineItemObservation], label: &str) -> &'a LineItemObservation {
        observations
            .iter()
            .find(|o| o.raw_label == label)
            .unwrap_or_else(|| panic!("missing {label}"))
    }

    #[test]
    fn test_parses_non_dimensional_facts() {
        let observations = parse(INSTANCE).unwrap();
        assert_eq!(observations.len(), 5);

        let revenue = find(&observations, "us-gaap:Revenues");
        assert_eq!(revenue.value, dec!(141569000000));
        assert_eq!(revenue.period_start, date(2022, 2, 1));
        assert_eq!(revenue.period_end, date(2022, 4, 30));
        assert_eq!(revenue.statement_kind, StatementKind::Income);
        assert!(!revenue.is_instant);
        assert_eq!(revenue.unit, "USD");
        assert_eq!(revenue.scale, 0);
        assert_eq!(revenue.source_filing_id, "0000104169-22-000040");
        assert_eq!(revenue.filing_period_end, date(2022, 4, 30));

        let assets = find(&observations, "us-gaap:Assets");
        assert!(assets.is_instant);
        assert_eq!(assets.statement_kind, StatementKind::Balance);
        assert_eq!(assets.period_start, assets.period_end);

        let eps = find(&observations, "us-gaap:EarningsPerShareDiluted");
        assert_eq!(eps.unit, "USD/shares");
        assert_eq!(eps.value, dec!(0.74));
    }

    #[test]
    fn test_cash_flow_classification() {
        let observations = parse(INSTANCE).unwrap();
        let ocf = find(&observations, "us-gaap:NetCashProvidedByUsedInOperatingActivities");
        assert_eq!(ocf.statement_kind, StatementKind::CashFlow);
        assert_eq!(ocf.value, dec!(-2003000000));
        assert_eq!(
            find(&observations, "us-gaap:PaymentsToAcquirePropertyPlantAndEquipment")
                .statement_kind,
            StatementKind::CashFlow
        );
    }

    #[test]
    fn test_skips_dei_pure_nil_and_text() {
        let observations = parse(INSTANCE).unwrap();
        for label in [
            "dei:EntityCommonStockSharesOutstanding",
            "us-gaap:EffectiveIncomeTaxRateContinuingOperations",
            "wmt:OtherGainsAndLosses",
            "us-gaap:SegmentReportingDisclosureTextBlock",
        ] {
            assert!(observations.iter().all(|o| o.raw_label != label), "{label}");
        }
    }

    #[test]
    fn test_invalid_document_is_parse_error() {
        let err = parse("<xbrl><unclosed></xbrl>").unwrap_err();
        assert!(matches!(err, QuarterlyError::Parse(_)));

        let err = XbrlInstanceParser::new()
            .parse(&filing(), &FilingDocument::new("x", vec![0xff, 0xfe]))
            .unwrap_err();
        assert!(matches!(err, QuarterlyError::Parse(_)));
    }

    #[test]
    fn test_parse_value_forms() {
        assert_eq!(parse_value(" 1200 "), Some(dec!(1200)));
        assert_eq!(parse_value("-3.5"), Some(dec!(-3.5)));
        assert_eq!(parse_value("1.5e3"), Some(dec!(1500)));
        assert_eq!(parse_value("n/a"), None);
    }

    #[test]
    fn test_classify_duration() {
        assert_eq!(classify_duration("Revenues"), StatementKind::Income);
        assert_eq!(
            classify_duration("IncreaseDecreaseInInventories"),
            StatementKind::CashFlow
        );
        assert_eq!(
            classify_duration("ProceedsFromIssuanceOfLongTermDebt"),
            StatementKind::CashFlow
        );
        for name in [
            "DepreciationDepletionAndAmortization",
            "DepreciationAndAmortization",
            "ShareBasedCompensation",
            "AllocatedShareBasedCompensationExpense",
            "CashAndCashEquivalentsPeriodIncreaseDecrease",
        ] {
            assert_eq!(classify_duration(name), StatementKind::CashFlow, "{name}");
        }
        assert_eq!(classify_duration("NetIncomeLoss"), StatementKind::Income);
    }
}
