//! Compiled operator graph and the workflow compiler
//!
//! Compilation expands the raw node list (where one node may declare
//! several weighted branches) into a concrete operator graph: every
//! branch becomes its own resolved operator instance, structurally
//! identical instances reached via different branches are merged, and
//! reach probability is propagated from sources to sinks. The result
//! is immutable and shared read-only across fetches; all per-fetch
//! state lives in the executor's scratch structures.
//!
//! Operators are stored index-based in a vector and referenced by
//! `OpId`, so deduplication is a keyed lookup and no object graph
//! with reference cycles ever exists.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use augflow_contracts::{Augmentation, AugmentationRegistry};
use log::debug;

use crate::error::ConfigError;
use crate::workflow::{NodeType, SourceParams, TransformParams, WorkflowSpec};

/// Index of an operator within a compiled graph
pub type OpId = usize;

/// Source operator: binds a branch of a declared source node to its
/// dataset and optional filter
#[derive(Debug, Clone)]
pub struct SourceOp {
    /// Dataset referenced by the declaring node
    pub dataset_id: String,
    /// Filter chosen for this branch, if the node declared filters
    pub filter: Option<String>,
    /// Total item count of the referenced dataset
    pub total_items: u64,
    /// Items effectively behind this branch: total × resolved share
    pub branch_items: f64,
    /// Dataset weight: total items / Σ totals over all sources
    pub weight: f64,
}

/// Transform operator: binds a branch of a declared transform node to
/// its constructed augmentation
#[derive(Clone)]
pub struct TransformOp {
    /// Augmentation kind name
    pub kind: String,
    /// Kind-specific parameters the instance was constructed from
    pub params: serde_json::Value,
    /// Probability the transform fires instead of passing through
    pub fire_prob: f64,
    /// Outputs per input; < 1 marks a confluent operator
    pub fan_in: f64,
    /// The bound augmentation capability
    pub augmentation: Arc<dyn Augmentation>,
}

impl fmt::Debug for TransformOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformOp")
            .field("kind", &self.kind)
            .field("fire_prob", &self.fire_prob)
            .field("fan_in", &self.fan_in)
            .finish_non_exhaustive()
    }
}

/// Category-specific payload of an operator
#[derive(Debug, Clone)]
pub enum OpKind {
    Source(SourceOp),
    Transform(TransformOp),
}

/// One resolved operator instance in the compiled graph
#[derive(Debug, Clone)]
pub struct Operator {
    /// Instance id, equal to the operator's index in the graph
    pub id: OpId,
    /// Upstream operator instances (empty only for sources)
    pub prev: Vec<OpId>,
    /// Downstream operator instances; empty marks a sink
    pub next: Vec<OpId>,
    /// Resolved branch share
    pub share: f64,
    /// Probability a random fetch reaches and executes this instance
    pub reach_prob: f64,
    pub kind: OpKind,
}

impl Operator {
    pub fn is_source(&self) -> bool {
        matches!(self.kind, OpKind::Source(_))
    }

    pub fn is_sink(&self) -> bool {
        self.next.is_empty()
    }

    /// Outputs per input; sources always pass data through 1:1
    pub fn fan_in(&self) -> f64 {
        match &self.kind {
            OpKind::Source(_) => 1.0,
            OpKind::Transform(t) => t.fan_in,
        }
    }

    /// Upstream samples this operator consumes per emitted output
    pub fn required_inputs(&self) -> usize {
        let fan_in = self.fan_in();
        if fan_in < 1.0 {
            (1.0 / fan_in).round() as usize
        } else {
            1
        }
    }
}

/// The compiled, probability-annotated operator graph
///
/// Immutable after compilation; safe for concurrent readers.
#[derive(Debug)]
pub struct CompiledGraph {
    ops: Vec<Operator>,
    sources: Vec<OpId>,
    sinks: Vec<OpId>,
}

impl CompiledGraph {
    pub fn op(&self, id: OpId) -> &Operator {
        &self.ops[id]
    }

    pub fn ops(&self) -> &[Operator] {
        &self.ops
    }

    pub fn sources(&self) -> &[OpId] {
        &self.sources
    }

    pub fn sinks(&self) -> &[OpId] {
        &self.sinks
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Compile a workflow definition into an operator graph
///
/// Fails with `ConfigError` on malformed shares, dangling references,
/// missing sinks, unknown augmentation kinds, or illegal fan-in. No
/// partial graph is returned on failure.
pub fn compile(
    spec: &WorkflowSpec,
    registry: &AugmentationRegistry,
) -> Result<CompiledGraph, ConfigError> {
    let protos = parse_protos(spec, registry)?;

    if !protos.values().any(|p| p.next.is_empty()) {
        return Err(ConfigError::NoSink);
    }

    // Dataset size determines how often each source is sampled.
    let total_items: u64 = protos
        .values()
        .filter_map(|p| match &p.payload {
            ProtoPayload::Source { total_items, .. } => Some(*total_items),
            ProtoPayload::Transform { .. } => None,
        })
        .sum();
    if total_items == 0 {
        return Err(ConfigError::NoSourceItems);
    }

    let mut assembler = Assembler {
        protos: &protos,
        total_items,
        ops: Vec::new(),
        dedup: HashMap::new(),
    };
    // Expansion starts from every source, in declaration order.
    for node in &spec.nodes {
        if node.node_type == NodeType::Source {
            assembler.expand(&node.id, None, None)?;
        }
    }

    let mut ops = assembler.ops;
    check_acyclic(&ops)?;
    propagate_reach(&mut ops);

    let sources = ops.iter().filter(|o| o.is_source()).map(|o| o.id).collect();
    let sinks: Vec<OpId> = ops.iter().filter(|o| o.is_sink()).map(|o| o.id).collect();
    debug!(
        "compiled workflow: {} operators ({} raw nodes), {} sinks",
        ops.len(),
        spec.nodes.len(),
        sinks.len()
    );

    Ok(CompiledGraph {
        ops,
        sources,
        sinks,
    })
}

/// Unresolved operator prototype, one per raw node
struct Proto {
    id: String,
    next: Vec<String>,
    /// Normalized shares; always at least one entry (sinks get [1.0])
    shares: Vec<f64>,
    payload: ProtoPayload,
}

enum ProtoPayload {
    Source {
        dataset_id: String,
        total_items: u64,
        filters: Option<Vec<String>>,
    },
    Transform {
        kind: String,
        params: serde_json::Value,
        fire_prob: f64,
        fan_in: f64,
        augmentation: Arc<dyn Augmentation>,
    },
}

fn parse_protos(
    spec: &WorkflowSpec,
    registry: &AugmentationRegistry,
) -> Result<HashMap<String, Proto>, ConfigError> {
    let mut protos: HashMap<String, Proto> = HashMap::new();

    for node in &spec.nodes {
        if protos.contains_key(&node.id) {
            return Err(ConfigError::DuplicateNodeId(node.id.clone()));
        }

        let shares = normalize_shares(&node.id, &node.next, &node.shares)?;

        let payload = match node.node_type {
            NodeType::Source => {
                let params: SourceParams = serde_json::from_value(node.params.clone())
                    .map_err(|e| ConfigError::MalformedParams {
                        node: node.id.clone(),
                        reason: e.to_string(),
                    })?;
                if let Some(filters) = &params.filters {
                    if filters.len() != shares.len() {
                        return Err(ConfigError::FilterCountMismatch {
                            node: node.id.clone(),
                            filters: filters.len(),
                            branches: shares.len(),
                        });
                    }
                }
                ProtoPayload::Source {
                    dataset_id: params.dataset_id,
                    total_items: params.total_item_count,
                    filters: params.filters,
                }
            }
            NodeType::Transform => {
                let params: TransformParams = serde_json::from_value(node.params.clone())
                    .map_err(|e| ConfigError::MalformedParams {
                        node: node.id.clone(),
                        reason: e.to_string(),
                    })?;
                let augmentation = registry.bind(&params.kind, &params.params)?;
                let fan_in = augmentation.fan_in();
                // An operator can only consume more than it emits,
                // never invent data.
                if !(fan_in > 0.0 && fan_in <= 1.0) {
                    return Err(ConfigError::IllegalFanIn {
                        kind: params.kind.clone(),
                        fan_in,
                    });
                }
                ProtoPayload::Transform {
                    kind: params.kind,
                    params: params.params,
                    fire_prob: params.fire_probability,
                    fan_in,
                    augmentation,
                }
            }
        };

        protos.insert(
            node.id.clone(),
            Proto {
                id: node.id.clone(),
                next: node.next.clone(),
                shares,
                payload,
            },
        );
    }

    // Every declared next must reference an existing node.
    for node in &spec.nodes {
        for target in &node.next {
            if !protos.contains_key(target) {
                return Err(ConfigError::UnknownNode {
                    node: node.id.clone(),
                    target: target.clone(),
                });
            }
        }
    }

    Ok(protos)
}

/// Renormalize a share list so it sums exactly to 1
fn normalize_shares(
    node: &str,
    next: &[String],
    shares: &[f64],
) -> Result<Vec<f64>, ConfigError> {
    if next.is_empty() {
        // A sink has a single implicit branch.
        if shares.len() > 1 {
            return Err(ConfigError::ShareCountMismatch {
                node: node.to_owned(),
                shares: shares.len(),
                branches: 0,
            });
        }
        return Ok(vec![1.0]);
    }
    if shares.len() != next.len() {
        return Err(ConfigError::ShareCountMismatch {
            node: node.to_owned(),
            shares: shares.len(),
            branches: next.len(),
        });
    }
    let sum: f64 = shares.iter().sum();
    if !(sum > 0.0) || shares.iter().any(|s| *s <= 0.0) {
        return Err(ConfigError::NonPositiveShares(node.to_owned()));
    }
    Ok(shares.iter().map(|s| s / sum).collect())
}

/// Structural identity of a resolved transform instance; the dedup
/// key. Two instances with the same key are interchangeable and get
/// merged, combining their probability mass.
#[derive(PartialEq, Eq, Hash)]
struct TransformKey {
    kind: String,
    params: String,
    fire_bits: u64,
    share_bits: u64,
    /// Resolved downstream raw node; keeps equal-looking transforms
    /// on diverging chains from merging
    next_raw: Option<String>,
}

struct Assembler<'a> {
    protos: &'a HashMap<String, Proto>,
    total_items: u64,
    ops: Vec<Operator>,
    dedup: HashMap<TransformKey, OpId>,
}

impl<'a> Assembler<'a> {
    /// Instantiate every branch of a raw node, wiring each resolved
    /// copy below `prev`
    fn expand(
        &mut self,
        raw_id: &str,
        prev: Option<OpId>,
        from: Option<&str>,
    ) -> Result<(), ConfigError> {
        // parse_protos has already checked every reference, so this
        // lookup only fails on a defect upstream.
        let proto = self
            .protos
            .get(raw_id)
            .ok_or_else(|| ConfigError::UnknownNode {
                node: from.unwrap_or_default().to_owned(),
                target: raw_id.to_owned(),
            })?;
        for branch in 0..proto.shares.len() {
            self.expand_branch(proto, branch, prev)?;
        }
        Ok(())
    }

    fn expand_branch(
        &mut self,
        proto: &'a Proto,
        branch: usize,
        prev: Option<OpId>,
    ) -> Result<OpId, ConfigError> {
        let share = proto.shares[branch];
        let next_raw = proto.next.get(branch).cloned();

        if let ProtoPayload::Transform {
            kind,
            params,
            fire_prob,
            ..
        } = &proto.payload
        {
            let key = TransformKey {
                kind: kind.clone(),
                params: params.to_string(),
                fire_bits: fire_prob.to_bits(),
                share_bits: share.to_bits(),
                next_raw: next_raw.clone(),
            };
            if let Some(&existing) = self.dedup.get(&key) {
                // Reconverging branches share one instance; only the
                // new upstream edge is added.
                if let Some(p) = prev {
                    self.link(p, existing);
                }
                debug!("dedup: node '{}' branch {branch} reuses operator {existing}", proto.id);
                return Ok(existing);
            }
            let id = self.push_transform(proto, share)?;
            self.dedup.insert(key, id);
            if let Some(p) = prev {
                self.link(p, id);
            }
            if let Some(next_raw) = next_raw {
                self.expand(&next_raw, Some(id), Some(&proto.id))?;
            }
            return Ok(id);
        }

        // Sources are never merged: two sources are distinct even
        // when structurally identical.
        let id = self.push_source(proto, branch, share)?;
        if let Some(p) = prev {
            self.link(p, id);
        }
        if let Some(next_raw) = next_raw {
            self.expand(&next_raw, Some(id), Some(&proto.id))?;
        }
        Ok(id)
    }

    fn push_transform(&mut self, proto: &Proto, share: f64) -> Result<OpId, ConfigError> {
        let ProtoPayload::Transform {
            kind,
            params,
            fire_prob,
            fan_in,
            augmentation,
        } = &proto.payload
        else {
            return Err(ConfigError::MalformedParams {
                node: proto.id.clone(),
                reason: "expected transform payload".to_owned(),
            });
        };
        let id = self.ops.len();
        self.ops.push(Operator {
            id,
            prev: Vec::new(),
            next: Vec::new(),
            share,
            reach_prob: 0.0,
            kind: OpKind::Transform(TransformOp {
                kind: kind.clone(),
                params: params.clone(),
                fire_prob: *fire_prob,
                fan_in: *fan_in,
                augmentation: Arc::clone(augmentation),
            }),
        });
        Ok(id)
    }

    fn push_source(&mut self, proto: &Proto, branch: usize, share: f64) -> Result<OpId, ConfigError> {
        let ProtoPayload::Source {
            dataset_id,
            total_items,
            filters,
        } = &proto.payload
        else {
            return Err(ConfigError::MalformedParams {
                node: proto.id.clone(),
                reason: "expected source payload".to_owned(),
            });
        };
        let weight = *total_items as f64 / self.total_items as f64;
        let id = self.ops.len();
        self.ops.push(Operator {
            id,
            prev: Vec::new(),
            next: Vec::new(),
            share,
            // Source reach is known up front: dataset weight times
            // the resolved branch share.
            reach_prob: weight * share,
            kind: OpKind::Source(SourceOp {
                dataset_id: dataset_id.clone(),
                filter: filters.as_ref().map(|f| f[branch].clone()),
                total_items: *total_items,
                branch_items: *total_items as f64 * share,
                weight,
            }),
        });
        Ok(id)
    }

    fn link(&mut self, upstream: OpId, downstream: OpId) {
        if !self.ops[upstream].next.contains(&downstream) {
            self.ops[upstream].next.push(downstream);
        }
        if !self.ops[downstream].prev.contains(&upstream) {
            self.ops[downstream].prev.push(upstream);
        }
    }
}

/// Kahn-style topological pass over the expanded graph. Dedup can
/// close a cycle even when the raw node list declares a sink, and a
/// cyclic graph would recurse forever in reach propagation and path
/// sampling, so leftovers after the pass are a hard error.
fn check_acyclic(ops: &[Operator]) -> Result<(), ConfigError> {
    let mut indegree: Vec<usize> = ops.iter().map(|o| o.prev.len()).collect();
    let mut ready: Vec<OpId> = ops
        .iter()
        .filter(|o| o.prev.is_empty())
        .map(|o| o.id)
        .collect();
    let mut visited = 0usize;
    while let Some(id) = ready.pop() {
        visited += 1;
        for &next in &ops[id].next {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                ready.push(next);
            }
        }
    }
    if visited != ops.len() {
        return Err(ConfigError::CyclicGraph);
    }
    Ok(())
}

/// Bottom-up reach probability: a non-source operator is reached with
/// the summed reach of its predecessors, scaled by its own resolved
/// share. Memoized so reconverging paths are computed once.
fn propagate_reach(ops: &mut [Operator]) {
    let mut memo: Vec<Option<f64>> = vec![None; ops.len()];
    for id in 0..ops.len() {
        reach_of(ops, id, &mut memo);
    }
    for (id, op) in ops.iter_mut().enumerate() {
        if let Some(reach) = memo[id] {
            op.reach_prob = reach;
        }
    }
}

fn reach_of(ops: &[Operator], id: OpId, memo: &mut Vec<Option<f64>>) -> f64 {
    if let Some(reach) = memo[id] {
        return reach;
    }
    let reach = match &ops[id].kind {
        OpKind::Source(_) => ops[id].reach_prob,
        OpKind::Transform(_) => {
            let mut prev_sum = 0.0;
            for index in 0..ops[id].prev.len() {
                let p = ops[id].prev[index];
                prev_sum += reach_of(ops, p, memo);
            }
            prev_sum * ops[id].share
        }
    };
    memo[id] = Some(reach);
    reach
}
