//! Dataset collaborator contract
//!
//! A `Dataset` hands out one `Sample` per fetch, chosen at random
//! from its items. Selection honors an optional filter (a named
//! pre-computed subset) and a configured background fraction: with
//! that probability a fetch returns an item carrying no annotations,
//! sampled independently of the filter.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::Rng;
use thiserror::Error;

use crate::data::Sample;

/// Errors surfaced by dataset fetches
#[derive(Debug, Error)]
pub enum DatasetError {
    /// The dataset (or the filtered subset) has nothing to offer
    #[error("dataset '{dataset}' yields no data for filter {filter:?}")]
    Empty {
        dataset: String,
        filter: Option<String>,
    },

    /// A fetch named a filter the dataset does not know
    #[error("dataset '{dataset}' has no filter '{filter}'")]
    UnknownFilter { dataset: String, filter: String },
}

/// Random-access source of samples
///
/// Implementations must be safe for concurrent readers; all mutable
/// fetch state lives in the caller-provided RNG.
pub trait Dataset: Send + Sync {
    /// Stable dataset identifier referenced by workflow sources
    fn id(&self) -> &str;

    /// Total number of items
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Draw one sample, honoring the given filter and the dataset's
    /// background fraction
    fn fetch(&self, filter: Option<&str>, rng: &mut StdRng) -> Result<Sample, DatasetError>;
}

/// In-memory dataset with per-filter index lists and a background
/// fraction
///
/// Filters are resolved to index lists once at construction, so a
/// fetch is a single weighted draw plus an index lookup.
pub struct MemoryDataset {
    id: String,
    records: Vec<Sample>,
    filters: HashMap<String, Vec<usize>>,
    annotated: Vec<usize>,
    background: Vec<usize>,
    background_share: f64,
}

impl MemoryDataset {
    pub fn new(id: impl Into<String>, records: Vec<Sample>) -> Self {
        let mut annotated = Vec::new();
        let mut background = Vec::new();
        for (index, record) in records.iter().enumerate() {
            if record.annotations.is_background() {
                background.push(index);
            } else {
                annotated.push(index);
            }
        }
        Self {
            id: id.into(),
            records,
            filters: HashMap::new(),
            annotated,
            background,
            background_share: 0.0,
        }
    }

    /// Register a named filter as an explicit index list
    pub fn with_filter(mut self, filter: impl Into<String>, indices: Vec<usize>) -> Self {
        self.filters.insert(filter.into(), indices);
        self
    }

    /// Register a named filter from a predicate over records
    pub fn with_filter_fn(
        mut self,
        filter: impl Into<String>,
        predicate: impl Fn(&Sample) -> bool,
    ) -> Self {
        let indices = self
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| predicate(r))
            .map(|(i, _)| i)
            .collect();
        self.filters.insert(filter.into(), indices);
        self
    }

    /// Fraction of fetches answered with a background item
    pub fn with_background_share(mut self, share: f64) -> Self {
        self.background_share = share.clamp(0.0, 1.0);
        self
    }

    fn pick(&self, pool: &[usize], rng: &mut StdRng) -> Option<Sample> {
        if pool.is_empty() {
            return None;
        }
        let index = pool[rng.random_range(0..pool.len())];
        self.records.get(index).cloned()
    }
}

impl Dataset for MemoryDataset {
    fn id(&self) -> &str {
        &self.id
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn fetch(&self, filter: Option<&str>, rng: &mut StdRng) -> Result<Sample, DatasetError> {
        let empty = || DatasetError::Empty {
            dataset: self.id.clone(),
            filter: filter.map(str::to_owned),
        };

        // Background draw happens before and independently of the
        // filter, per the dataset contract.
        if self.background_share > 0.0 && rng.random::<f64>() < self.background_share {
            if let Some(sample) = self.pick(&self.background, rng) {
                return Ok(sample);
            }
            return Err(empty());
        }

        let pool: &[usize] = match filter {
            Some(name) => self
                .filters
                .get(name)
                .ok_or_else(|| DatasetError::UnknownFilter {
                    dataset: self.id.clone(),
                    filter: name.to_owned(),
                })?,
            // With a background fraction configured the unfiltered
            // pool excludes background items; otherwise everything
            // is fair game.
            None if self.background_share > 0.0 => &self.annotated,
            None => return self.pick_all(rng).ok_or_else(empty),
        };
        self.pick(pool, rng).ok_or_else(empty)
    }
}

impl MemoryDataset {
    fn pick_all(&self, rng: &mut StdRng) -> Option<Sample> {
        if self.records.is_empty() {
            return None;
        }
        let index = rng.random_range(0..self.records.len());
        self.records.get(index).cloned()
    }
}
