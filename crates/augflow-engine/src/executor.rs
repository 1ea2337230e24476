//! Per-fetch scheduler
//!
//! The executor drives one sampled path to completion: it seeds every
//! source the required number of times, propagates each buffered
//! sample downstream along the path's recorded routes, pauses
//! confluent operators until their full fan-in batch has arrived, and
//! captures the sink's output as the fetch result.
//!
//! The compiled graph is never mutated; everything mutable — the data
//! buffer, confluent pending lists, route queues, the data-id counter
//! — lives in a call-scoped `FetchState`, so concurrent fetches over
//! one shared graph are safe.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use augflow_contracts::{Dataset, Sample};
use log::debug;
use rand::rngs::StdRng;
use rand::Rng;

use crate::error::FetchError;
use crate::graph::{CompiledGraph, OpId, OpKind};
use crate::path::{sample, ExecutionPath};

/// Synthetic id of one buffered intermediate result
type DataId = u64;

/// Call-scoped scratch state for one fetch
struct FetchState {
    buffer: HashMap<DataId, Sample>,
    pending: BTreeMap<OpId, Vec<DataId>>,
    routes: BTreeMap<OpId, VecDeque<OpId>>,
    next_data_id: DataId,
    result: Option<Sample>,
}

impl FetchState {
    fn new(routes: BTreeMap<OpId, VecDeque<OpId>>) -> Self {
        Self {
            buffer: HashMap::new(),
            pending: BTreeMap::new(),
            routes,
            next_data_id: 0,
            result: None,
        }
    }

    fn insert(&mut self, sample: Sample) -> DataId {
        let id = self.next_data_id;
        self.next_data_id += 1;
        self.buffer.insert(id, sample);
        id
    }

    /// Remove a buffered entry; a miss is a scheduling defect
    fn take(&mut self, id: DataId) -> Result<Sample, FetchError> {
        self.buffer
            .remove(&id)
            .ok_or_else(|| FetchError::invariant(format!("missing buffer entry {id}")))
    }

    fn route_from(&mut self, op: OpId) -> Option<OpId> {
        self.routes.get_mut(&op).and_then(VecDeque::pop_front)
    }
}

/// Drives sampled paths over a compiled graph
///
/// One executor serves arbitrarily many fetches; a failed fetch
/// leaves it fully reusable.
pub struct Executor {
    graph: Arc<CompiledGraph>,
    datasets: HashMap<String, Arc<dyn Dataset>>,
}

impl Executor {
    pub fn new(graph: Arc<CompiledGraph>, datasets: HashMap<String, Arc<dyn Dataset>>) -> Self {
        Self { graph, datasets }
    }

    pub fn graph(&self) -> &CompiledGraph {
        &self.graph
    }

    /// Sample one path and execute it to produce one sample
    pub fn fetch(&self, rng: &mut StdRng) -> Result<Sample, FetchError> {
        let path = sample(&self.graph, rng);
        debug!(
            "sampled path: sink {}, {} sources ({} uses), {} transforms",
            path.sink,
            path.sources.len(),
            path.total_uses(),
            path.transforms.len()
        );
        self.execute(&path, rng)
    }

    fn execute(&self, path: &ExecutionPath, rng: &mut StdRng) -> Result<Sample, FetchError> {
        let mut state = FetchState::new(path.routes.clone());

        for (&source_id, &uses) in &path.sources {
            let OpKind::Source(source) = &self.graph.op(source_id).kind else {
                return Err(FetchError::invariant(format!(
                    "path lists operator {source_id} as a source"
                )));
            };
            let dataset = self.datasets.get(&source.dataset_id).ok_or_else(|| {
                FetchError::invariant(format!("dataset '{}' is not bound", source.dataset_id))
            })?;
            for _ in 0..uses {
                let drawn = dataset.fetch(source.filter.as_deref(), rng)?;
                let data_id = state.insert(drawn);
                self.propagate(source_id, data_id, &mut state, rng)?;
            }
        }

        state
            .result
            .take()
            .ok_or_else(|| FetchError::invariant("sink was never reached"))
    }

    /// Push one buffered sample through an operator and onward along
    /// its recorded route
    fn propagate(
        &self,
        op_id: OpId,
        data_id: DataId,
        state: &mut FetchState,
        rng: &mut StdRng,
    ) -> Result<(), FetchError> {
        let op = self.graph.op(op_id);

        let out_id = match &op.kind {
            OpKind::Source(_) => {
                // Rebind under a fresh id to decouple the value from
                // the seed entry.
                let drawn = state.take(data_id)?;
                state.insert(drawn)
            }
            OpKind::Transform(transform) => {
                if transform.fan_in < 1.0 {
                    let threshold = op.required_inputs();
                    let queue = state.pending.entry(op_id).or_default();
                    queue.push(data_id);
                    match queue.len().cmp(&threshold) {
                        // Still waiting for the rest of the batch.
                        Ordering::Less => return Ok(()),
                        Ordering::Greater => {
                            let got = queue.len();
                            return Err(FetchError::invariant(format!(
                                "confluent operator {op_id} holds {got} inputs, threshold {threshold}"
                            )));
                        }
                        Ordering::Equal => {}
                    }
                    let ids = std::mem::take(queue);
                    state.pending.remove(&op_id);
                    let mut inputs = Vec::with_capacity(ids.len());
                    for id in ids {
                        inputs.push(state.take(id)?);
                    }
                    if rng.random::<f64>() < transform.fire_prob {
                        state.insert(transform.augmentation.apply(inputs)?)
                    } else {
                        // A skipped confluence still consumes the
                        // whole batch and forwards its first member,
                        // keeping the declared output/input ratio.
                        let first = inputs.into_iter().next().ok_or_else(|| {
                            FetchError::invariant(format!(
                                "confluent operator {op_id} fired on an empty batch"
                            ))
                        })?;
                        state.insert(first)
                    }
                } else {
                    let input = state.take(data_id)?;
                    if rng.random::<f64>() < transform.fire_prob {
                        state.insert(transform.augmentation.apply(vec![input])?)
                    } else {
                        state.insert(input)
                    }
                }
            }
        };

        if op.is_sink() {
            if state.result.is_some() {
                return Err(FetchError::invariant("sink produced more than one result"));
            }
            state.result = Some(state.take(out_id)?);
            return Ok(());
        }

        let Some(target) = state.route_from(op_id) else {
            return Err(FetchError::invariant(format!(
                "no route out of operator {op_id}"
            )));
        };
        self.propagate(target, out_id, state, rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::WorkflowBuilder;
    use crate::graph::compile;
    use crate::test_support::{labeled_dataset, register_stub, CountingDataset};
    use crate::workflow::WorkflowSpec;
    use augflow_contracts::{AugmentationRegistry, MemoryDataset};
    use rand::SeedableRng;
    use std::sync::atomic::Ordering as AtomicOrdering;

    fn executor_for(
        spec: &WorkflowSpec,
        registry: &AugmentationRegistry,
        datasets: Vec<Arc<dyn Dataset>>,
    ) -> Executor {
        let graph = Arc::new(compile(spec, registry).unwrap());
        let datasets = datasets
            .into_iter()
            .map(|d| (d.id().to_owned(), d))
            .collect();
        Executor::new(graph, datasets)
    }

    fn has_marker(sample: &Sample, kind: &str) -> bool {
        let marker = format!("aug:{kind}");
        sample
            .annotations
            .annotations
            .iter()
            .any(|a| a.label == marker)
    }

    #[test]
    fn scenario_a_transform_with_certain_fire_always_applies() {
        let mut registry = AugmentationRegistry::new();
        let probe = register_stub(&mut registry, "mark", 1.0);
        let spec = WorkflowBuilder::new()
            .source("src", "d", 100)
            .next_to(&[("t", 1.0)])
            .transform("t", "mark", 1.0)
            .build();
        let executor = executor_for(&spec, &registry, vec![Arc::new(labeled_dataset("d", "cat", 5))]);
        let mut rng = StdRng::seed_from_u64(1);

        for _ in 0..10 {
            let out = executor.fetch(&mut rng).unwrap();
            assert!(has_marker(&out, "mark"));
        }
        assert_eq!(probe.calls.load(AtomicOrdering::SeqCst), 10);
    }

    #[test]
    fn scenario_b_source_selection_follows_dataset_size() {
        let mut registry = AugmentationRegistry::new();
        register_stub(&mut registry, "mark", 1.0);
        let spec = WorkflowBuilder::new()
            .source("small", "d1", 100)
            .next_to(&[("t", 1.0)])
            .source("large", "d2", 300)
            .next_to(&[("t", 1.0)])
            .transform("t", "mark", 1.0)
            .build();
        let executor = executor_for(
            &spec,
            &registry,
            vec![
                Arc::new(labeled_dataset("d1", "cat", 5)),
                Arc::new(labeled_dataset("d2", "dog", 5)),
            ],
        );
        let mut rng = StdRng::seed_from_u64(2);

        let rounds = 4000;
        let mut dogs = 0usize;
        for _ in 0..rounds {
            let out = executor.fetch(&mut rng).unwrap();
            if out.annotations.annotations.iter().any(|a| a.label == "dog") {
                dogs += 1;
            }
        }
        let fraction = dogs as f64 / rounds as f64;
        assert!((fraction - 0.75).abs() < 0.05, "fraction was {fraction}");
    }

    #[test]
    fn scenario_c_confluence_draws_four_sources_and_applies_once() {
        let mut registry = AugmentationRegistry::new();
        let probe = register_stub(&mut registry, "stitch4", 0.25);
        let spec = WorkflowBuilder::new()
            .source("src", "d", 100)
            .next_to(&[("stitch", 1.0)])
            .transform("stitch", "stitch4", 1.0)
            .build();
        let dataset = Arc::new(CountingDataset::new(labeled_dataset("d", "cat", 5)));
        let fetches = Arc::clone(&dataset.fetches);
        let executor = executor_for(&spec, &registry, vec![dataset]);
        let mut rng = StdRng::seed_from_u64(3);

        let out = executor.fetch(&mut rng).unwrap();
        assert!(has_marker(&out, "stitch4"));
        assert_eq!(probe.calls.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(probe.last_batch.load(AtomicOrdering::SeqCst), 4);
        assert_eq!(fetches.load(AtomicOrdering::SeqCst), 4);
    }

    #[test]
    fn scenario_d_zero_fire_probability_passes_data_through() {
        let mut registry = AugmentationRegistry::new();
        let probe = register_stub(&mut registry, "mark", 1.0);
        let spec = WorkflowBuilder::new()
            .source("src", "d", 100)
            .next_to(&[("t", 1.0)])
            .transform("t", "mark", 0.0)
            .build();
        let dataset = labeled_dataset("d", "cat", 1);
        let mut probe_rng = StdRng::seed_from_u64(0);
        let original = dataset.fetch(None, &mut probe_rng).unwrap();
        let executor = executor_for(&spec, &registry, vec![Arc::new(dataset)]);
        let mut rng = StdRng::seed_from_u64(4);

        for _ in 0..10 {
            let out = executor.fetch(&mut rng).unwrap();
            assert_eq!(out.annotations, original.annotations);
        }
        assert_eq!(probe.calls.load(AtomicOrdering::SeqCst), 0);
    }

    #[test]
    fn confluence_waits_below_threshold_without_output_or_error() {
        let mut registry = AugmentationRegistry::new();
        let probe = register_stub(&mut registry, "stitch4", 0.25);
        let spec = WorkflowBuilder::new()
            .source("src", "d", 100)
            .next_to(&[("stitch", 1.0)])
            .transform("stitch", "stitch4", 1.0)
            .build();
        let executor = executor_for(&spec, &registry, vec![Arc::new(labeled_dataset("d", "cat", 5))]);
        let stitch = executor.graph().sinks()[0];
        let mut rng = StdRng::seed_from_u64(5);
        let mut state = FetchState::new(BTreeMap::new());

        let sample = labeled_dataset("probe", "cat", 1)
            .fetch(None, &mut rng)
            .unwrap();
        for _ in 0..3 {
            let id = state.insert(sample.clone());
            executor.propagate(stitch, id, &mut state, &mut rng).unwrap();
        }
        // Three of four inputs supplied: waiting, no output, no call.
        assert!(state.result.is_none());
        assert_eq!(state.pending[&stitch].len(), 3);
        assert_eq!(probe.calls.load(AtomicOrdering::SeqCst), 0);

        let id = state.insert(sample);
        executor.propagate(stitch, id, &mut state, &mut rng).unwrap();
        assert!(state.result.is_some());
        assert_eq!(probe.calls.load(AtomicOrdering::SeqCst), 1);
        assert!(state.pending.get(&stitch).is_none());
    }

    #[test]
    fn skipped_confluence_still_consumes_the_full_batch() {
        let mut registry = AugmentationRegistry::new();
        let probe = register_stub(&mut registry, "stitch4", 0.25);
        let spec = WorkflowBuilder::new()
            .source("src", "d", 100)
            .next_to(&[("stitch", 1.0)])
            .transform("stitch", "stitch4", 0.0)
            .build();
        let dataset = Arc::new(CountingDataset::new(labeled_dataset("d", "cat", 5)));
        let fetches = Arc::clone(&dataset.fetches);
        let executor = executor_for(&spec, &registry, vec![dataset]);
        let mut rng = StdRng::seed_from_u64(6);

        let out = executor.fetch(&mut rng).unwrap();
        // Never fired, but the batch was still gathered and exactly
        // one member forwarded.
        assert!(!has_marker(&out, "stitch4"));
        assert_eq!(probe.calls.load(AtomicOrdering::SeqCst), 0);
        assert_eq!(fetches.load(AtomicOrdering::SeqCst), 4);
    }

    #[test]
    fn fetch_is_deterministic_for_a_given_seed() {
        let mut registry = AugmentationRegistry::new();
        register_stub(&mut registry, "mark", 1.0);
        let spec = WorkflowBuilder::new()
            .source("a", "d1", 100)
            .next_to(&[("t", 1.0)])
            .source("b", "d2", 300)
            .next_to(&[("t", 1.0)])
            .transform("t", "mark", 0.5)
            .build();
        let datasets: Vec<Arc<dyn Dataset>> = vec![
            Arc::new(labeled_dataset("d1", "cat", 8)),
            Arc::new(labeled_dataset("d2", "dog", 8)),
        ];
        let first = executor_for(&spec, &registry, datasets.clone());
        let second = executor_for(&spec, &registry, datasets);
        let mut rng_a = StdRng::seed_from_u64(99);
        let mut rng_b = StdRng::seed_from_u64(99);

        for _ in 0..50 {
            let a = first.fetch(&mut rng_a).unwrap();
            let b = second.fetch(&mut rng_b).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn empty_dataset_fails_the_fetch_but_not_the_executor() {
        let mut registry = AugmentationRegistry::new();
        register_stub(&mut registry, "mark", 1.0);
        let spec = WorkflowBuilder::new()
            .source("src", "d", 100)
            .next_to(&[("t", 1.0)])
            .transform("t", "mark", 1.0)
            .build();
        let executor = executor_for(
            &spec,
            &registry,
            vec![Arc::new(MemoryDataset::new("d", vec![]))],
        );
        let mut rng = StdRng::seed_from_u64(7);

        let err = executor.fetch(&mut rng).unwrap_err();
        assert!(matches!(err, FetchError::EmptySource(_)));
        // The executor stays usable for the next call.
        let err = executor.fetch(&mut rng).unwrap_err();
        assert!(matches!(err, FetchError::EmptySource(_)));
    }

    #[test]
    fn unbound_dataset_is_a_scheduler_invariant() {
        let mut registry = AugmentationRegistry::new();
        register_stub(&mut registry, "mark", 1.0);
        let spec = WorkflowBuilder::new()
            .source("src", "missing", 100)
            .next_to(&[("t", 1.0)])
            .transform("t", "mark", 1.0)
            .build();
        let executor = executor_for(&spec, &registry, vec![]);
        let mut rng = StdRng::seed_from_u64(8);

        let err = executor.fetch(&mut rng).unwrap_err();
        assert!(matches!(err, FetchError::SchedulerInvariant(_)));
    }
}
