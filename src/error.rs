use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the engine. Configuration and persistence failures are
/// fatal to the caller; the index-range variants double as the per-pair fault
/// channel during a training sweep, where they are logged and counted instead
/// of aborting the sweep.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no POIs were supplied")]
    EmptyItems,

    #[error("no users were supplied")]
    EmptyUsers,

    #[error("no feedback pairs were supplied")]
    EmptyFeedback,

    #[error("only {available} nearest neighbors available, {required} required")]
    InsufficientNeighbors { available: usize, required: usize },

    #[error("neighbor count k1={k1} must be at least the embedding dimension K={k}")]
    NeighborCountBelowDimension { k1: usize, k: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("user index {user} out of range ({num_users} users)")]
    UserOutOfRange { user: usize, num_users: usize },

    #[error("item index {item} out of range ({num_items} items)")]
    ItemOutOfRange { item: usize, num_items: usize },

    #[error("non-finite update step for user {user}, items {item} and {candidate}")]
    NonFiniteUpdate {
        user: usize,
        item: usize,
        candidate: usize,
    },

    #[error("scores requested before any training iteration produced them")]
    ScoresUnavailable,

    #[error("model file not found: {0}")]
    ModelFileNotFound(PathBuf),

    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("model encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("report encoding error: {0}")]
    Report(#[from] serde_json::Error),
}
