//! Error types for the workflow engine

use augflow_contracts::{AugmentationError, DatasetError, RegistryError};
use thiserror::Error;

/// Errors raised while compiling a workflow definition
///
/// Compilation errors are fatal for workflow construction: no partial
/// graph is ever returned.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Shares list length does not match the next list length
    #[error("node '{node}' declares {shares} shares for {branches} branches")]
    ShareCountMismatch {
        node: String,
        shares: usize,
        branches: usize,
    },

    /// Filters list length does not match the branch count
    #[error("source '{node}' declares {filters} filters for {branches} branches")]
    FilterCountMismatch {
        node: String,
        filters: usize,
        branches: usize,
    },

    /// Shares sum to zero or less and cannot be normalized
    #[error("shares of node '{0}' sum to zero or less")]
    NonPositiveShares(String),

    /// Two nodes declare the same id
    #[error("duplicate node id '{0}'")]
    DuplicateNodeId(String),

    /// A next reference points at a node that does not exist
    #[error("node '{node}' references unknown node '{target}'")]
    UnknownNode { node: String, target: String },

    /// No node with an empty next list exists
    #[error("workflow has no sink node")]
    NoSink,

    /// All sources together declare zero total items
    #[error("sources declare zero total items")]
    NoSourceItems,

    /// Branch expansion closed a cycle in the operator graph
    #[error("workflow graph contains a cycle")]
    CyclicGraph,

    /// A bound augmentation declares a fan-in outside (0, 1]
    #[error("augmentation '{kind}' declares illegal fan-in {fan_in}")]
    IllegalFanIn { kind: String, fan_in: f64 },

    /// A source references a dataset the agent does not hold
    #[error("source '{node}' references unknown dataset '{dataset}'")]
    UnknownDataset { node: String, dataset: String },

    /// Node params failed to deserialize into the expected shape
    #[error("invalid parameters for node '{node}': {reason}")]
    MalformedParams { node: String, reason: String },

    /// Binding an augmentation kind failed
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Errors raised during a single fetch
///
/// Fetch errors abort only the current call; the compiled graph and
/// the agent remain usable afterwards.
#[derive(Debug, Error)]
pub enum FetchError {
    /// A source's dataset yielded nothing for its filter
    #[error("source fetch failed: {0}")]
    EmptySource(#[from] DatasetError),

    /// An augmentation application failed
    #[error(transparent)]
    Augmentation(#[from] AugmentationError),

    /// A should-never-happen scheduling defect (sink unreached,
    /// confluent overflow, missing buffer entry)
    #[error("scheduler invariant violated: {0}")]
    SchedulerInvariant(String),
}

impl FetchError {
    /// Create a scheduler invariant violation with a message
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::SchedulerInvariant(msg.into())
    }
}
