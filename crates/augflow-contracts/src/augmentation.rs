//! Augmentation contract and kind registry
//!
//! An `Augmentation` is an opaque capability: it declares its fan-in
//! (outputs per input; 1/k means it consumes k samples to emit one)
//! and applies itself to a batch of samples. The registry maps kind
//! names from workflow definitions to factories that construct bound
//! augmentation instances from kind-specific parameters.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::data::Sample;

/// Errors raised while applying an augmentation
#[derive(Debug, Error)]
pub enum AugmentationError {
    /// The batch size did not match the declared fan-in
    #[error("augmentation '{kind}' expected {expected} inputs, got {got}")]
    ArityMismatch {
        kind: String,
        expected: usize,
        got: usize,
    },

    /// The augmentation itself failed
    #[error("augmentation failed: {0}")]
    Failed(String),
}

/// Errors raised while binding a kind name to an instance
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown augmentation kind '{0}'")]
    UnknownKind(String),

    #[error("invalid parameters for augmentation '{kind}': {reason}")]
    InvalidParams { kind: String, reason: String },
}

/// A bound augmentation instance
///
/// Implementations must be pure with respect to shared state: the
/// engine may apply the same instance concurrently from multiple
/// fetches.
pub trait Augmentation: Send + Sync {
    /// Kind name this instance was constructed from
    fn kind(&self) -> &str;

    /// Ratio of outputs to required inputs; 1 for pass-through
    /// transforms, 1/k for confluent operators (e.g. a 4-way stitch
    /// reports 0.25). Must be in (0, 1].
    fn fan_in(&self) -> f64 {
        1.0
    }

    /// Apply to a batch of `round(1/fan_in)` samples, producing one
    fn apply(&self, inputs: Vec<Sample>) -> Result<Sample, AugmentationError>;
}

impl fmt::Debug for dyn Augmentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Augmentation")
            .field("kind", &self.kind())
            .field("fan_in", &self.fan_in())
            .finish_non_exhaustive()
    }
}

/// Constructs augmentation instances from kind-specific parameters
pub trait AugmentationFactory: Send + Sync {
    fn create(&self, params: &serde_json::Value) -> Result<Arc<dyn Augmentation>, RegistryError>;
}

struct FnFactory<F> {
    f: F,
}

impl<F> AugmentationFactory for FnFactory<F>
where
    F: Fn(&serde_json::Value) -> Result<Arc<dyn Augmentation>, RegistryError> + Send + Sync,
{
    fn create(&self, params: &serde_json::Value) -> Result<Arc<dyn Augmentation>, RegistryError> {
        (self.f)(params)
    }
}

/// Registry of augmentation kinds
///
/// Registries can be composed by merging, so embedders can extend the
/// built-in catalog with their own kinds.
#[derive(Default)]
pub struct AugmentationRegistry {
    entries: HashMap<String, Arc<dyn AugmentationFactory>>,
}

impl AugmentationRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kind with its factory
    pub fn register(&mut self, kind: impl Into<String>, factory: Arc<dyn AugmentationFactory>) {
        self.entries.insert(kind.into(), factory);
    }

    /// Register a kind using a closure factory
    pub fn register_fn<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&serde_json::Value) -> Result<Arc<dyn Augmentation>, RegistryError>
            + Send
            + Sync
            + 'static,
    {
        self.register(kind, Arc::new(FnFactory { f: factory }));
    }

    /// Bind a kind name and parameters to a constructed instance
    pub fn bind(
        &self,
        kind: &str,
        params: &serde_json::Value,
    ) -> Result<Arc<dyn Augmentation>, RegistryError> {
        let factory = self
            .entries
            .get(kind)
            .ok_or_else(|| RegistryError::UnknownKind(kind.to_owned()))?;
        factory.create(params)
    }

    /// Check whether a kind is registered
    pub fn has_kind(&self, kind: &str) -> bool {
        self.entries.contains_key(kind)
    }

    /// List all registered kind names
    pub fn kinds(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Merge another registry into this one; entries from `other`
    /// override same-named entries in `self`
    pub fn merge(&mut self, other: AugmentationRegistry) {
        self.entries.extend(other.entries);
    }
}
