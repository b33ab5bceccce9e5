use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::model::{format_timestamp, parse_timestamp, Compound};
use crate::error::ConfigurationError;

/// Rule table shipped with the crate, used when no table is configured.
pub const DEFAULT_RULES_TOML: &str = include_str!("../../config/rules.toml");

// ---------------------------------------------------------------------------
// Rule identity and kind
// ---------------------------------------------------------------------------

/// Stable index of a rule within its table, recorded on every record the
/// rule touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub u32);

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

/// What a rule does to a record that falls inside its window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RuleKind {
    /// Divide the mixing ratio by `factor`.
    ScaleFactor { factor: f64 },
    /// Drop the record.
    Removal,
    /// Replace values below `limit` with `limit / 2`.
    DetectionLimit { limit: f64 },
    /// Annotate only; the value is on a different reference scale.
    ScaleHarmonization { note: String },
}

/// Payload-free discriminant of [`RuleKind`]; windows may only overlap
/// across different tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RuleKindTag {
    ScaleFactor,
    Removal,
    DetectionLimit,
    ScaleHarmonization,
}

impl RuleKind {
    pub fn tag(&self) -> RuleKindTag {
        match self {
            RuleKind::ScaleFactor { .. } => RuleKindTag::ScaleFactor,
            RuleKind::Removal => RuleKindTag::Removal,
            RuleKind::DetectionLimit { .. } => RuleKindTag::DetectionLimit,
            RuleKind::ScaleHarmonization { .. } => RuleKindTag::ScaleHarmonization,
        }
    }

    fn parameter(&self) -> Option<f64> {
        match self {
            RuleKind::ScaleFactor { factor } => Some(*factor),
            RuleKind::DetectionLimit { limit } => Some(*limit),
            RuleKind::Removal | RuleKind::ScaleHarmonization { .. } => None,
        }
    }
}

impl fmt::Display for RuleKindTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuleKindTag::ScaleFactor => "scale-factor",
            RuleKindTag::Removal => "removal",
            RuleKindTag::DetectionLimit => "detection-limit",
            RuleKindTag::ScaleHarmonization => "scale-harmonization",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Effective window
// ---------------------------------------------------------------------------

/// Half-open validity window `[from, until)`; a missing bound is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Window {
    pub from: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl Window {
    pub const ALWAYS: Window = Window {
        from: None,
        until: None,
    };

    pub fn new(from: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Self {
        Self { from, until }
    }

    pub fn until(until: DateTime<Utc>) -> Self {
        Self::new(None, Some(until))
    }

    pub fn between(from: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self::new(Some(from), Some(until))
    }

    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        self.from.is_none_or(|from| *ts >= from) && self.until.is_none_or(|until| *ts < until)
    }

    pub fn overlaps(&self, other: &Window) -> bool {
        starts_before_end(self.from, other.until) && starts_before_end(other.from, self.until)
    }

    fn is_empty(&self) -> bool {
        matches!((self.from, self.until), (Some(from), Some(until)) if from >= until)
    }
}

fn starts_before_end(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> bool {
    match (start, end) {
        (Some(start), Some(end)) => start < end,
        _ => true,
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let from = self.from.as_ref().map(format_timestamp);
        let until = self.until.as_ref().map(format_timestamp);
        write!(
            f,
            "[{}, {})",
            from.as_deref().unwrap_or("open"),
            until.as_deref().unwrap_or("open")
        )
    }
}

// ---------------------------------------------------------------------------
// CorrectionRule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionRule {
    pub id: RuleId,
    pub compound: Compound,
    pub window: Window,
    pub kind: RuleKind,
}

impl CorrectionRule {
    pub fn applies_at(&self, ts: &DateTime<Utc>) -> bool {
        self.window.contains(ts)
    }
}

// ---------------------------------------------------------------------------
// Rule document – the on-disk schema
// ---------------------------------------------------------------------------

/// Top-level rule document:
///
/// ```toml
/// [compounds."CFC-11"]
/// rules = [{ kind = "scale-factor", until = "2018-12-01", factor = 1.016 }]
///
/// [compounds.ethane]
/// rules = []
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleDocument {
    #[serde(default)]
    pub compounds: BTreeMap<String, CompoundRules>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompoundRules {
    #[serde(default)]
    pub rules: Vec<RuleEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<String>,
    #[serde(flatten)]
    pub kind: RuleKind,
}

// ---------------------------------------------------------------------------
// RuleTable – validated, compound-indexed, immutable
// ---------------------------------------------------------------------------

/// The validated rule table. Immutable once built, so one table can be
/// shared between concurrent runs.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: Vec<CorrectionRule>,
    by_compound: BTreeMap<Compound, Vec<usize>>,
}

impl RuleTable {
    pub fn builder() -> RuleTableBuilder {
        RuleTableBuilder::default()
    }

    /// Validate a parsed document.
    pub fn from_document(doc: &RuleDocument) -> Result<Self, ConfigurationError> {
        let mut builder = RuleTable::builder();
        for (name, entry) in &doc.compounds {
            let compound = Compound::parse(name)
                .ok_or_else(|| ConfigurationError::UnknownCompound(name.clone()))?;
            builder = builder.compound(compound);
            for rule in &entry.rules {
                let window = Window::new(
                    parse_bound(name, rule.from.as_deref())?,
                    parse_bound(name, rule.until.as_deref())?,
                );
                builder = builder.rule(compound, window, rule.kind.clone());
            }
        }
        builder.build()
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigurationError> {
        let doc: RuleDocument =
            toml::from_str(text).map_err(|e| ConfigurationError::Parse(e.to_string()))?;
        Self::from_document(&doc)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigurationError> {
        let doc: RuleDocument =
            serde_json::from_str(text).map_err(|e| ConfigurationError::Parse(e.to_string()))?;
        Self::from_document(&doc)
    }

    /// The table compiled into the binary from `config/rules.toml`.
    pub fn embedded() -> Result<Self, ConfigurationError> {
        Self::from_toml_str(DEFAULT_RULES_TOML)
    }

    /// Load a rule table from disk. Dispatch by extension (`.toml`, `.json`).
    pub fn load(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading rule table {}", path.display()))?;

        let table = match ext.as_str() {
            "toml" => Self::from_toml_str(&text),
            "json" => Self::from_json_str(&text),
            other => bail!("Unsupported rule table extension: .{other}"),
        }
        .with_context(|| format!("validating rule table {}", path.display()))?;

        log::info!(
            "Loaded {} rules for {} compounds from {}",
            table.len(),
            table.compound_count(),
            path.display()
        );
        Ok(table)
    }

    /// Whether `compound` is in the table's domain (possibly with no rules).
    pub fn contains(&self, compound: Compound) -> bool {
        self.by_compound.contains_key(&compound)
    }

    /// Rules for one compound, or `None` if it is outside the domain.
    pub fn rules_for(&self, compound: Compound) -> Option<impl Iterator<Item = &CorrectionRule>> {
        self.by_compound
            .get(&compound)
            .map(|indices| indices.iter().map(|&i| &self.rules[i]))
    }

    pub fn compounds(&self) -> impl Iterator<Item = Compound> + '_ {
        self.by_compound.keys().copied()
    }

    pub fn compound_count(&self) -> usize {
        self.by_compound.len()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn parse_bound(compound: &str, value: Option<&str>) -> Result<Option<DateTime<Utc>>, ConfigurationError> {
    match value {
        None => Ok(None),
        Some(s) => parse_timestamp(s)
            .map(Some)
            .ok_or_else(|| ConfigurationError::InvalidDate {
                compound: compound.to_string(),
                value: s.to_string(),
            }),
    }
}

// ---------------------------------------------------------------------------
// Builder – all table invariants are checked once, in `build`
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct RuleTableBuilder {
    entries: BTreeMap<Compound, Vec<(Window, RuleKind)>>,
}

impl RuleTableBuilder {
    /// Add `compound` to the domain without any rule.
    pub fn compound(mut self, compound: Compound) -> Self {
        self.entries.entry(compound).or_default();
        self
    }

    pub fn rule(mut self, compound: Compound, window: Window, kind: RuleKind) -> Self {
        self.entries.entry(compound).or_default().push((window, kind));
        self
    }

    pub fn build(self) -> Result<RuleTable, ConfigurationError> {
        let mut rules = Vec::new();
        let mut by_compound = BTreeMap::new();

        for (compound, entries) in self.entries {
            validate_compound(compound, &entries)?;

            let indices = by_compound.entry(compound).or_insert_with(Vec::new);
            for (window, kind) in entries {
                indices.push(rules.len());
                rules.push(CorrectionRule {
                    id: RuleId(rules.len() as u32),
                    compound,
                    window,
                    kind,
                });
            }
        }

        Ok(RuleTable { rules, by_compound })
    }
}

fn validate_compound(compound: Compound, entries: &[(Window, RuleKind)]) -> Result<(), ConfigurationError> {
    for (window, kind) in entries {
        if window.is_empty() {
            return Err(ConfigurationError::InvalidWindow {
                compound: compound.to_string(),
                kind: kind.tag(),
                window: window.to_string(),
            });
        }
        if let Some(value) = kind.parameter() {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigurationError::InvalidParameter {
                    compound: compound.to_string(),
                    kind: kind.tag(),
                    value,
                });
            }
        }
    }

    for (i, (first, first_kind)) in entries.iter().enumerate() {
        for (second, second_kind) in &entries[i + 1..] {
            if first_kind.tag() == second_kind.tag() && first.overlaps(second) {
                return Err(ConfigurationError::OverlappingRuleWindow {
                    compound: compound.to_string(),
                    kind: first_kind.tag(),
                    first: first.to_string(),
                    second: second.to_string(),
                });
            }
        }
    }
    Ok(())
}
