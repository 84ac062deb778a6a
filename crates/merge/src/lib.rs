//! `dao-merge`: two-source record matching and conflict-resolution engine.
//!
//! Pure engine crate: receives pre-loaded records from two sources, pairs
//! them by exact or approximate key, resolves field disagreements under a
//! configured strategy, and returns one merged collection with a conflict
//! log and statistics. No CLI or format adapters.

pub mod config;
pub mod conflict;
pub mod engine;
pub mod error;
pub mod index;
pub mod key;
pub mod matcher;
pub mod model;
pub mod resolve;
pub mod similarity;
pub mod stats;

pub use config::{ConflictStrategy, MergeConfig, SourceSide};
pub use conflict::ConflictDetector;
pub use engine::{merge, MergeEngine};
pub use error::{ErrorKind, MergeError, MergeResult, ResolverError};
pub use index::{ExactIndex, RecordComparator};
pub use key::KeyExtractor;
pub use model::{
    Conflict, ConflictEntry, Key, MatchKind, MatchedPair, MergeOutcome, MergeStatistics, Record,
    ResolutionSource, Value,
};
pub use resolve::{BuiltinResolver, ConflictResolver};
