use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::{MergeError, MergeResult};
use crate::index::RecordComparator;
use crate::resolve::ConflictResolver;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergeConfig {
    /// Fields whose values identify the same entity across sources.
    pub key_fields: Vec<String>,
    #[serde(default)]
    pub conflict_strategy: ConflictStrategy,
    #[serde(default)]
    pub timestamp_field: Option<String>,
    /// Required by [`ConflictStrategy::Custom`]; attached in code only.
    #[serde(skip)]
    pub custom_resolver: Option<CustomResolver>,
    /// Orders records inside an exact-key group before positional pairing.
    #[serde(skip)]
    pub group_comparator: Option<GroupComparator>,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default = "default_merge_similar")]
    pub merge_similar: bool,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default)]
    pub source_priority: Option<Vec<SourceSide>>,
    #[serde(default)]
    pub ignored_fields: BTreeSet<String>,
    /// Fuzzy matches scoring below `similarity_threshold + margin` are reported as warnings.
    #[serde(default = "default_near_threshold_margin")]
    pub near_threshold_margin: f64,
}

fn default_merge_similar() -> bool {
    true
}

fn default_similarity_threshold() -> f64 {
    0.9
}

fn default_near_threshold_margin() -> f64 {
    0.05
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum ConflictStrategy {
    #[default]
    #[serde(rename = "newest")]
    KeepNewest,
    #[serde(rename = "oldest")]
    KeepOldest,
    #[serde(rename = "source_a")]
    KeepSourceA,
    #[serde(rename = "source_b")]
    KeepSourceB,
    #[serde(rename = "most_complete")]
    KeepMostComplete,
    #[serde(rename = "combine")]
    Combine,
    #[serde(rename = "custom")]
    Custom,
}

impl ConflictStrategy {
    pub fn is_timestamp_based(&self) -> bool {
        matches!(self, Self::KeepNewest | Self::KeepOldest)
    }
}

impl std::fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KeepNewest => write!(f, "newest"),
            Self::KeepOldest => write!(f, "oldest"),
            Self::KeepSourceA => write!(f, "source_a"),
            Self::KeepSourceB => write!(f, "source_b"),
            Self::KeepMostComplete => write!(f, "most_complete"),
            Self::Combine => write!(f, "combine"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

// ---------------------------------------------------------------------------
// Source sides
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceSide {
    A,
    B,
}

impl SourceSide {
    pub fn label(&self) -> char {
        match self {
            Self::A => 'A',
            Self::B => 'B',
        }
    }
}

impl std::fmt::Display for SourceSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

// ---------------------------------------------------------------------------
// Pluggable hooks
// ---------------------------------------------------------------------------

/// Shared handle to a caller-supplied resolver.
#[derive(Clone)]
pub struct CustomResolver(pub Arc<dyn ConflictResolver>);

impl std::fmt::Debug for CustomResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CustomResolver(..)")
    }
}

/// Shared handle to a caller-supplied group ordering.
#[derive(Clone)]
pub struct GroupComparator(pub Arc<dyn RecordComparator>);

impl std::fmt::Debug for GroupComparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("GroupComparator(..)")
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

impl MergeConfig {
    pub fn new<I, S>(key_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key_fields: key_fields.into_iter().map(Into::into).collect(),
            conflict_strategy: ConflictStrategy::default(),
            timestamp_field: None,
            custom_resolver: None,
            group_comparator: None,
            case_sensitive: false,
            merge_similar: default_merge_similar(),
            similarity_threshold: default_similarity_threshold(),
            source_priority: None,
            ignored_fields: BTreeSet::new(),
            near_threshold_margin: default_near_threshold_margin(),
        }
    }

    pub fn with_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.conflict_strategy = strategy;
        self
    }

    pub fn with_timestamp_field(mut self, field: impl Into<String>) -> Self {
        self.timestamp_field = Some(field.into());
        self
    }

    pub fn with_custom_resolver(mut self, resolver: impl ConflictResolver + 'static) -> Self {
        self.custom_resolver = Some(CustomResolver(Arc::new(resolver)));
        self
    }

    pub fn with_group_comparator(mut self, comparator: impl RecordComparator + 'static) -> Self {
        self.group_comparator = Some(GroupComparator(Arc::new(comparator)));
        self
    }

    pub fn with_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    pub fn with_merge_similar(mut self, merge_similar: bool) -> Self {
        self.merge_similar = merge_similar;
        self
    }

    pub fn with_similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_source_priority(mut self, priority: Vec<SourceSide>) -> Self {
        self.source_priority = Some(priority);
        self
    }

    pub fn with_ignored_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_near_threshold_margin(mut self, margin: f64) -> Self {
        self.near_threshold_margin = margin;
        self
    }

    /// Side that wins undecidable ties. Source A unless `source_priority` says otherwise.
    pub fn preferred_side(&self) -> SourceSide {
        self.source_priority
            .as_ref()
            .and_then(|p| p.first().copied())
            .unwrap_or(SourceSide::A)
    }
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl MergeConfig {
    /// Parse a TOML config. Everything except the custom resolver is validated here.
    pub fn from_toml(input: &str) -> MergeResult<Self> {
        let config: MergeConfig =
            toml::from_str(input).map_err(|e| MergeError::ConfigParse(e.to_string()))?;
        config.validate_static()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> MergeResult<Self> {
        let input = std::fs::read_to_string(path)?;
        Self::from_toml(&input)
    }

    /// Full validation, run once before any matching begins.
    pub fn validate(&self) -> MergeResult<()> {
        self.validate_static()?;

        if self.conflict_strategy == ConflictStrategy::Custom && self.custom_resolver.is_none() {
            return Err(MergeError::MissingCustomResolver);
        }

        Ok(())
    }

    /// Rules that can be checked on a config parsed from TOML.
    fn validate_static(&self) -> MergeResult<()> {
        if self.key_fields.is_empty() {
            return Err(MergeError::EmptyKeyFields);
        }

        if self.conflict_strategy.is_timestamp_based() && self.timestamp_field.is_none() {
            return Err(MergeError::MissingTimestampField {
                strategy: self.conflict_strategy,
            });
        }

        // NaN fails `contains` too
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(MergeError::ThresholdOutOfRange(self.similarity_threshold));
        }

        if !(0.0..=1.0).contains(&self.near_threshold_margin) {
            return Err(MergeError::MarginOutOfRange(self.near_threshold_margin));
        }

        if let Some(ref priority) = self.source_priority {
            if priority.len() > 2 {
                return Err(MergeError::InvalidSourcePriority(format!(
                    "at most 2 sources, got {}",
                    priority.len()
                )));
            }
            if priority.len() == 2 && priority[0] == priority[1] {
                return Err(MergeError::InvalidSourcePriority(format!(
                    "source {} listed twice",
                    priority[0]
                )));
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
