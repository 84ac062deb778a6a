use serde::Serialize;

use crate::config::ConflictStrategy;

/// Error produced by a caller-supplied resolver.
pub type ResolverError = Box<dyn std::error::Error + Send + Sync>;

/// Broad class of a [`MergeError`], as reported in the merge outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Config rejected before any matching began.
    Validation,
    /// Failure while resolving a matched pair.
    Processing,
    /// Config could not be read or parsed.
    Config,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Processing => write!(f, "processing"),
            Self::Config => write!(f, "config"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    /// A merge needs at least one key field.
    #[error("key_fields must name at least one field")]
    EmptyKeyFields,

    /// Timestamp-based strategy without a `timestamp_field`.
    #[error("strategy '{strategy}' requires timestamp_field")]
    MissingTimestampField { strategy: ConflictStrategy },

    /// `custom` strategy without a resolver attached.
    #[error("strategy 'custom' requires a custom_resolver")]
    MissingCustomResolver,

    #[error("similarity_threshold must be within [0, 1], got {0}")]
    ThresholdOutOfRange(f64),

    #[error("near_threshold_margin must be within [0, 1], got {0}")]
    MarginOutOfRange(f64),

    /// `source_priority` lists a side twice or more than two sides.
    #[error("invalid source_priority: {0}")]
    InvalidSourcePriority(String),

    /// Matched record lacks a usable timestamp value.
    #[error("source {side} record #{index}: timestamp field '{field}' is missing or null")]
    MissingTimestamp {
        side: char,
        index: usize,
        field: String,
    },

    /// Timestamps on a matched pair cannot be ordered against each other.
    #[error("records A#{a_index} / B#{b_index}: cannot compare timestamp values {a} and {b}")]
    IncomparableTimestamps {
        a_index: usize,
        b_index: usize,
        a: String,
        b: String,
    },

    /// COMBINE on two scalar values.
    #[error("cannot combine scalar values for field '{field}': {a} / {b}")]
    Uncombinable { field: String, a: String, b: String },

    /// The caller's resolver failed.
    #[error("custom resolver failed on records A#{a_index} / B#{b_index}: {source}")]
    CustomResolver {
        a_index: usize,
        b_index: usize,
        #[source]
        source: ResolverError,
    },

    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    ConfigParse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MergeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyKeyFields
            | Self::MissingTimestampField { .. }
            | Self::MissingCustomResolver
            | Self::ThresholdOutOfRange(_)
            | Self::MarginOutOfRange(_)
            | Self::InvalidSourcePriority(_) => ErrorKind::Validation,
            Self::MissingTimestamp { .. }
            | Self::IncomparableTimestamps { .. }
            | Self::Uncombinable { .. }
            | Self::CustomResolver { .. } => ErrorKind::Processing,
            Self::ConfigParse(_) | Self::Io(_) => ErrorKind::Config,
        }
    }
}

pub type MergeResult<T> = Result<T, MergeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_variant_class() {
        assert_eq!(MergeError::EmptyKeyFields.kind(), ErrorKind::Validation);
        assert_eq!(MergeError::ThresholdOutOfRange(1.5).kind(), ErrorKind::Validation);
        let err = MergeError::Uncombinable {
            field: "v".into(),
            a: "1".into(),
            b: "2".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Processing);
        assert_eq!(MergeError::ConfigParse("x".into()).kind(), ErrorKind::Config);
    }

    #[test]
    fn custom_resolver_error_keeps_source() {
        let err = MergeError::CustomResolver {
            a_index: 0,
            b_index: 3,
            source: "boom".into(),
        };
        assert_eq!(err.to_string(), "custom resolver failed on records A#0 / B#3: boom");
        assert!(std::error::Error::source(&err).is_some());
    }
}
