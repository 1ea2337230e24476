//! Agent facade
//!
//! The agent owns the compiled graph, the bound datasets and the RNG,
//! and exposes the one-call surface embedding code uses: build once,
//! then `fetch()` augmented samples forever. All randomness flows
//! through a single seeded generator behind a mutex, so a seeded
//! agent is reproducible and still shareable across threads.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use augflow_contracts::{AugmentationRegistry, Dataset, Sample};
use log::info;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{ConfigError, FetchError};
use crate::executor::Executor;
use crate::graph::{compile, CompiledGraph};
use crate::workflow::{NodeType, SourceParams, WorkflowSpec};

/// Compiled, ready-to-fetch augmentation workflow
pub struct Agent {
    executor: Executor,
    rng: Mutex<StdRng>,
    seed: u64,
}

impl Agent {
    /// Build an agent with a seed drawn from the thread RNG
    pub fn new(
        spec: &WorkflowSpec,
        registry: &AugmentationRegistry,
        datasets: Vec<Arc<dyn Dataset>>,
    ) -> Result<Self, ConfigError> {
        let seed = rand::rng().random::<u64>();
        Self::with_seed(spec, registry, datasets, seed)
    }

    /// Build an agent with an explicit seed for reproducible runs
    pub fn with_seed(
        spec: &WorkflowSpec,
        registry: &AugmentationRegistry,
        datasets: Vec<Arc<dyn Dataset>>,
        seed: u64,
    ) -> Result<Self, ConfigError> {
        let datasets: HashMap<String, Arc<dyn Dataset>> = datasets
            .into_iter()
            .map(|d| (d.id().to_owned(), d))
            .collect();
        check_dataset_bindings(spec, &datasets)?;

        let graph = Arc::new(compile(spec, registry)?);
        info!(
            "agent ready: {} operators, {} sources, {} sinks, seed {seed}",
            graph.len(),
            graph.sources().len(),
            graph.sinks().len()
        );
        Ok(Self {
            executor: Executor::new(graph, datasets),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            seed,
        })
    }

    /// Seed of this agent's generator
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn graph(&self) -> &CompiledGraph {
        self.executor.graph()
    }

    /// Produce one augmented sample
    pub fn fetch(&self) -> Result<Sample, FetchError> {
        let mut rng = self.rng.lock();
        self.executor.fetch(&mut rng)
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("seed", &self.seed)
            .field("operators", &self.executor.graph().len())
            .finish_non_exhaustive()
    }
}

/// Every source node must name a dataset the agent actually holds
fn check_dataset_bindings(
    spec: &WorkflowSpec,
    datasets: &HashMap<String, Arc<dyn Dataset>>,
) -> Result<(), ConfigError> {
    for node in &spec.nodes {
        if node.node_type != NodeType::Source {
            continue;
        }
        let params: SourceParams =
            serde_json::from_value(node.params.clone()).map_err(|err| {
                ConfigError::MalformedParams {
                    node: node.id.clone(),
                    reason: err.to_string(),
                }
            })?;
        if !datasets.contains_key(&params.dataset_id) {
            return Err(ConfigError::UnknownDataset {
                node: node.id.clone(),
                dataset: params.dataset_id,
            });
        }
    }
    Ok(())
}
