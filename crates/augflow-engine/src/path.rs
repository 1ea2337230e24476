//! Path sampling over the compiled graph
//!
//! A fetch begins by sampling one sink-to-source walk: pick a sink
//! weighted by reach probability, then repeatedly pick predecessors
//! weighted by their reach. A confluent operator (fan-in < 1)
//! performs `round(1/fan_in)` independent draws with replacement, so
//! the same source may be chosen more than once — it then has to
//! supply that many independent samples.
//!
//! Besides the visited operators, the path records one **route**
//! entry per drawn edge: a FIFO queue on each upstream operator
//! naming the downstream consumer that drew it. The executor forwards
//! each produced sample along the next recorded route, which keeps
//! sample counts balanced even when several walks share operator
//! instances (the original design tracked only per-source use
//! counters, which drift apart on shared instances).

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use rand::rngs::StdRng;
use rand::Rng;

use crate::graph::{CompiledGraph, OpId};

/// One sampled execution path, created fresh per fetch
#[derive(Debug, Clone)]
pub struct ExecutionPath {
    /// Chosen sink operator
    pub sink: OpId,
    /// Sources on the path, with how many independent samples each
    /// must supply
    pub sources: BTreeMap<OpId, usize>,
    /// Transforms on the path
    pub transforms: BTreeSet<OpId>,
    /// Downstream routing, one entry per drawn edge, consumed FIFO
    pub routes: BTreeMap<OpId, VecDeque<OpId>>,
}

impl ExecutionPath {
    /// Total number of dataset draws this path requires
    pub fn total_uses(&self) -> usize {
        self.sources.values().sum()
    }
}

/// Pick an index from a non-empty weight list, proportionally to the
/// weights (they need not be normalized)
pub(crate) fn pick_weighted(weights: &[f64], rng: &mut StdRng) -> usize {
    let total: f64 = weights.iter().sum();
    if !(total > 0.0) {
        // Degenerate mass; fall back to uniform.
        return rng.random_range(0..weights.len());
    }
    let target = rng.random::<f64>() * total;
    let mut cumulative = 0.0;
    for (index, weight) in weights.iter().enumerate() {
        cumulative += weight;
        if target < cumulative {
            return index;
        }
    }
    // Floating tolerance can leave target a hair above the sum.
    weights.len() - 1
}

/// Sample one execution path from the compiled graph
///
/// All draws come from the caller's RNG handle, so repeated calls
/// with the same seeded generator reproduce the same paths.
pub fn sample(graph: &CompiledGraph, rng: &mut StdRng) -> ExecutionPath {
    let sinks = graph.sinks();
    let weights: Vec<f64> = sinks.iter().map(|&id| graph.op(id).reach_prob).collect();
    let sink = sinks[pick_weighted(&weights, rng)];

    let mut path = ExecutionPath {
        sink,
        sources: BTreeMap::new(),
        transforms: BTreeSet::new(),
        routes: BTreeMap::new(),
    };
    walk_upstream(graph, sink, &mut path, rng);
    path
}

fn walk_upstream(graph: &CompiledGraph, id: OpId, path: &mut ExecutionPath, rng: &mut StdRng) {
    let op = graph.op(id);
    if op.is_source() {
        // Each visit is one more independent sample this source must
        // supply within the fetch.
        *path.sources.entry(id).or_insert(0) += 1;
        return;
    }
    path.transforms.insert(id);

    // One draw for pass-through operators, round(1/fan_in) draws with
    // replacement for confluent ones.
    for _ in 0..op.required_inputs() {
        let weights: Vec<f64> = op.prev.iter().map(|&p| graph.op(p).reach_prob).collect();
        let chosen = op.prev[pick_weighted(&weights, rng)];
        path.routes.entry(chosen).or_default().push_back(id);
        walk_upstream(graph, chosen, path, rng);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::WorkflowBuilder;
    use crate::graph::compile;
    use crate::test_support::register_stub;
    use augflow_contracts::AugmentationRegistry;
    use rand::SeedableRng;

    fn registry() -> AugmentationRegistry {
        let mut registry = AugmentationRegistry::new();
        register_stub(&mut registry, "mark", 1.0);
        register_stub(&mut registry, "stitch4", 0.25);
        registry
    }

    #[test]
    fn pick_weighted_respects_mass() {
        let mut rng = StdRng::seed_from_u64(11);
        let weights = [0.25, 0.75];
        let mut counts = [0usize; 2];
        for _ in 0..4000 {
            counts[pick_weighted(&weights, &mut rng)] += 1;
        }
        let fraction = counts[1] as f64 / 4000.0;
        assert!((fraction - 0.75).abs() < 0.05, "fraction was {fraction}");
    }

    #[test]
    fn linear_path_covers_all_operators() {
        let spec = WorkflowBuilder::new()
            .source("src", "d", 100)
            .next_to(&[("t", 1.0)])
            .transform("t", "mark", 1.0)
            .build();
        let graph = compile(&spec, &registry()).unwrap();
        let mut rng = StdRng::seed_from_u64(1);

        let path = sample(&graph, &mut rng);
        assert_eq!(path.sources.len(), 1);
        assert_eq!(path.transforms.len(), 1);
        assert_eq!(path.total_uses(), 1);

        let (&src, &uses) = path.sources.iter().next().unwrap();
        assert_eq!(uses, 1);
        assert_eq!(path.routes[&src].len(), 1);
        assert_eq!(path.routes[&src][0], path.sink);
    }

    #[test]
    fn confluent_operator_draws_with_replacement() {
        let spec = WorkflowBuilder::new()
            .source("src", "d", 100)
            .next_to(&[("stitch", 1.0)])
            .transform("stitch", "stitch4", 1.0)
            .build();
        let graph = compile(&spec, &registry()).unwrap();
        let mut rng = StdRng::seed_from_u64(2);

        let path = sample(&graph, &mut rng);
        // The single source is drawn four times; its uses counter
        // and route queue both reflect that.
        assert_eq!(path.total_uses(), 4);
        let (&src, &uses) = path.sources.iter().next().unwrap();
        assert_eq!(uses, 4);
        assert_eq!(path.routes[&src].len(), 4);
        assert!(path.routes[&src].iter().all(|&t| t == path.sink));
    }

    #[test]
    fn sampling_is_deterministic_for_a_given_seed() {
        let spec = WorkflowBuilder::new()
            .source("a", "d1", 100)
            .next_to(&[("t", 1.0)])
            .source("b", "d2", 300)
            .next_to(&[("t", 1.0)])
            .transform("t", "mark", 1.0)
            .build();
        let graph = compile(&spec, &registry()).unwrap();

        let mut first = StdRng::seed_from_u64(42);
        let mut second = StdRng::seed_from_u64(42);
        for _ in 0..50 {
            let a = sample(&graph, &mut first);
            let b = sample(&graph, &mut second);
            assert_eq!(a.sources, b.sources);
            assert_eq!(a.routes, b.routes);
        }
    }

    #[test]
    fn predecessor_choice_follows_reach_probability() {
        let spec = WorkflowBuilder::new()
            .source("a", "d1", 100)
            .next_to(&[("t", 1.0)])
            .source("b", "d2", 300)
            .next_to(&[("t", 1.0)])
            .transform("t", "mark", 1.0)
            .build();
        let graph = compile(&spec, &registry()).unwrap();
        let mut rng = StdRng::seed_from_u64(3);

        // Identify the heavy source (weight 0.75).
        let heavy = *graph
            .sources()
            .iter()
            .find(|&&id| graph.op(id).reach_prob > 0.5)
            .unwrap();

        let rounds = 4000;
        let mut heavy_hits = 0usize;
        for _ in 0..rounds {
            let path = sample(&graph, &mut rng);
            if path.sources.contains_key(&heavy) {
                heavy_hits += 1;
            }
        }
        let fraction = heavy_hits as f64 / rounds as f64;
        assert!((fraction - 0.75).abs() < 0.05, "fraction was {fraction}");
    }
}
