//! Canonical concept taxonomy.
//!
//! The taxonomy is configuration data: a versioned TOML table of canonical
//! concepts, each with its statement, nature, ordered synonym list and an
//! optional fuzzy allow-list. A default table is embedded in the crate and can
//! be replaced with [`Taxonomy::from_path`].

use quarterly_core::{ConceptId, ConceptNature, QuarterlyError, Result, StatementKind};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::resolver::normalize_label;

/// The taxonomy embedded in the crate.
pub const BUILTIN_TAXONOMY: &str = include_str!("taxonomy.toml");

#[derive(Debug, Deserialize)]
struct TaxonomyFile {
    version: String,
    #[serde(rename = "concept", default)]
    concepts: Vec<ConceptEntry>,
}

#[derive(Debug, Deserialize)]
struct ConceptEntry {
    id: String,
    label: String,
    statement: StatementKind,
    nature: ConceptNature,
    #[serde(default = "default_additive")]
    additive: bool,
    #[serde(default)]
    headline: bool,
    #[serde(default)]
    synonyms: Vec<String>,
    #[serde(default)]
    fuzzy: Vec<String>,
}

const fn default_additive() -> bool {
    true
}

/// A canonical line item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CanonicalConcept {
    /// Stable identifier.
    pub id: ConceptId,
    /// Display label used as the row caption.
    pub label: String,
    /// Statement the concept belongs to.
    pub statement: StatementKind,
    /// Instant or flow.
    pub nature: ConceptNature,
    /// Whether quarters may be derived by subtracting cumulative values.
    pub additive: bool,
    /// Whether the concept is its statement's headline on the summary.
    pub headline: bool,
}

/// Position of a synonym: the concept it maps to and its preference rank.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SynonymEntry {
    pub(crate) concept: usize,
    pub(crate) rank: usize,
}

/// A fuzzy allow-list entry, already normalized.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct FuzzyRule {
    pub(crate) pattern: String,
    pub(crate) entry: SynonymEntry,
}

/// Versioned set of canonical concepts and their synonyms.
#[derive(Clone, Debug)]
pub struct Taxonomy {
    version: String,
    concepts: Vec<CanonicalConcept>,
    by_id: HashMap<ConceptId, usize>,
    exact: HashMap<String, SynonymEntry>,
    normalized: HashMap<String, SynonymEntry>,
    fuzzy: Vec<FuzzyRule>,
}

impl Taxonomy {
    /// Loads the taxonomy embedded in the crate.
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN_TAXONOMY)
    }

    /// Loads a taxonomy from a TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            QuarterlyError::Config(format!("Failed to read taxonomy {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Parses and validates a taxonomy.
    ///
    /// Fails if a concept id is declared twice, or if one synonym (exactly or
    /// after normalization) maps to two different concepts.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: TaxonomyFile = toml::from_str(text)
            .map_err(|e| QuarterlyError::Config(format!("Invalid taxonomy: {e}")))?;

        let mut taxonomy = Self {
            version: file.version,
            concepts: Vec::with_capacity(file.concepts.len()),
            by_id: HashMap::new(),
            exact: HashMap::new(),
            normalized: HashMap::new(),
            fuzzy: Vec::new(),
        };

        for entry in file.concepts {
            let index = taxonomy.concepts.len();
            let id = ConceptId::new(entry.id.trim());
            if id.as_str().is_empty() {
                return Err(QuarterlyError::Config(
                    "Taxonomy concept with empty id".to_string(),
                ));
            }
            if taxonomy.by_id.insert(id.clone(), index).is_some() {
                return Err(QuarterlyError::Config(format!(
                    "Duplicate taxonomy concept: {id}"
                )));
            }

            for (rank, synonym) in entry.synonyms.iter().enumerate() {
                let slot = SynonymEntry {
                    concept: index,
                    rank,
                };
                taxonomy.insert_exact(synonym, slot)?;
                taxonomy.insert_normalized(synonym, slot)?;
            }

            for (offset, pattern) in entry.fuzzy.iter().enumerate() {
                let pattern = normalize_label(pattern);
                if let Some(other) = taxonomy
                    .fuzzy
                    .iter()
                    .find(|r| r.pattern == pattern && r.entry.concept != index)
                {
                    return Err(QuarterlyError::Config(format!(
                        "Fuzzy pattern \"{pattern}\" is allow-listed for both {} and {id}",
                        taxonomy.concepts[other.entry.concept].id
                    )));
                }
                taxonomy.fuzzy.push(FuzzyRule {
                    pattern,
                    entry: SynonymEntry {
                        concept: index,
                        rank: entry.synonyms.len() + offset,
                    },
                });
            }

            taxonomy.concepts.push(CanonicalConcept {
                id,
                label: entry.label,
                statement: entry.statement,
                nature: entry.nature,
                additive: entry.additive,
                headline: entry.headline,
            });
        }

        Ok(taxonomy)
    }

    fn insert_exact(&mut self, synonym: &str, slot: SynonymEntry) -> Result<()> {
        let key = synonym.trim().to_string();
        match self.exact.get(&key).copied() {
            None => {
                self.exact.insert(key, slot);
                Ok(())
            }
            Some(existing) if existing.concept == slot.concept => Ok(()),
            Some(existing) => Err(QuarterlyError::Config(format!(
                "Synonym \"{synonym}\" maps to both {} and {}",
                self.concept_name(existing.concept),
                self.concept_name(slot.concept),
            ))),
        }
    }

    fn insert_normalized(&mut self, synonym: &str, slot: SynonymEntry) -> Result<()> {
        let key = normalize_label(synonym);
        if key.is_empty() {
            return Ok(());
        }
        match self.normalized.get(&key).copied() {
            None => {
                self.normalized.insert(key, slot);
                Ok(())
            }
            Some(existing) if existing.concept == slot.concept => Ok(()),
            Some(existing) => Err(QuarterlyError::Config(format!(
                "Synonym \"{synonym}\" normalizes to \"{key}\", already used by {}",
                self.concept_name(existing.concept)
            ))),
        }
    }

    // Concepts are pushed after their synonyms, so the one being inserted may
    // not be in `concepts` yet.
    fn concept_name(&self, index: usize) -> String {
        self.concepts.get(index).map_or_else(
            || format!("concept #{}", index + 1),
            |c| c.id.to_string(),
        )
    }

    /// Version string declared by the taxonomy file.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// All concepts, in report order.
    #[must_use]
    pub fn concepts(&self) -> &[CanonicalConcept] {
        &self.concepts
    }

    /// Looks up a concept by id.
    #[must_use]
    pub fn concept(&self, id: &ConceptId) -> Option<&CanonicalConcept> {
        self.by_id.get(id).map(|&i| &self.concepts[i])
    }

    /// Report-order position of a concept.
    #[must_use]
    pub fn position(&self, id: &ConceptId) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    /// All headline concepts, in report order.
    pub fn headlines(&self) -> impl Iterator<Item = &CanonicalConcept> {
        self.concepts.iter().filter(|c| c.headline)
    }

    /// The first headline concept of a statement, if one is marked.
    #[must_use]
    pub fn headline(&self, statement: StatementKind) -> Option<&CanonicalConcept> {
        self.concepts
            .iter()
            .find(|c| c.headline && c.statement == statement)
    }

    /// Number of concepts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.concepts.len()
    }

    /// Returns true if the taxonomy declares no concepts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }

    pub(crate) fn concept_at(&self, index: usize) -> &CanonicalConcept {
        &self.concepts[index]
    }

    pub(crate) fn exact_match(&self, label: &str) -> Option<SynonymEntry> {
        self.exact.get(label.trim()).copied()
    }

    pub(crate) fn normalized_match(&self, key: &str) -> Option<SynonymEntry> {
        self.normalized.get(key).copied()
    }

    pub(crate) fn fuzzy_rules(&self) -> &[FuzzyRule] {
        &self.fuzzy
    }
}
