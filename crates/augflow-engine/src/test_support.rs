//! Shared helpers for engine tests: stub augmentations with call
//! probes, and small in-memory datasets.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use augflow_contracts::{
    Annotation, AnnotationSet, Augmentation, AugmentationError, AugmentationRegistry, BoundingBox,
    Dataset, DatasetError, Image, MemoryDataset, Sample,
};
use rand::rngs::StdRng;

/// Observable counters for one registered stub kind
pub(crate) struct AugProbe {
    /// Number of `apply` invocations
    pub calls: Arc<AtomicUsize>,
    /// Batch size of the most recent `apply`
    pub last_batch: Arc<AtomicUsize>,
}

struct StubAugmentation {
    kind: String,
    fan_in: f64,
    calls: Arc<AtomicUsize>,
    last_batch: Arc<AtomicUsize>,
}

impl Augmentation for StubAugmentation {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn fan_in(&self) -> f64 {
        self.fan_in
    }

    fn apply(&self, inputs: Vec<Sample>) -> Result<Sample, AugmentationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.last_batch.store(inputs.len(), Ordering::SeqCst);
        let mut out = inputs
            .into_iter()
            .next()
            .ok_or_else(|| AugmentationError::ArityMismatch {
                kind: self.kind.clone(),
                expected: 1,
                got: 0,
            })?;
        // Leave a detectable trace so tests can tell fired from
        // passed-through.
        out.annotations.annotations.push(Annotation::new(
            format!("aug:{}", self.kind),
            BoundingBox::new(0.0, 0.0, 1.0, 1.0),
        ));
        Ok(out)
    }
}

/// Register a stub augmentation kind and return its probe
pub(crate) fn register_stub(
    registry: &mut AugmentationRegistry,
    kind: &str,
    fan_in: f64,
) -> AugProbe {
    let calls = Arc::new(AtomicUsize::new(0));
    let last_batch = Arc::new(AtomicUsize::new(0));
    let probe = AugProbe {
        calls: Arc::clone(&calls),
        last_batch: Arc::clone(&last_batch),
    };
    let kind = kind.to_owned();
    registry.register_fn(kind.clone(), move |_params| {
        Ok(Arc::new(StubAugmentation {
            kind: kind.clone(),
            fan_in,
            calls: Arc::clone(&calls),
            last_batch: Arc::clone(&last_batch),
        }) as Arc<dyn Augmentation>)
    });
    probe
}

/// A dataset of `n` identical labeled samples
pub(crate) fn labeled_dataset(id: &str, label: &str, n: usize) -> MemoryDataset {
    let sample = Sample::new(
        Image::blank(4, 4, 1),
        AnnotationSet::from_annotations(vec![Annotation::new(
            label,
            BoundingBox::new(0.0, 0.0, 1.0, 1.0),
        )]),
    );
    MemoryDataset::new(id, vec![sample; n])
}

/// Dataset wrapper counting fetch invocations
pub(crate) struct CountingDataset {
    inner: MemoryDataset,
    pub fetches: Arc<AtomicUsize>,
}

impl CountingDataset {
    pub fn new(inner: MemoryDataset) -> Self {
        Self {
            inner,
            fetches: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Dataset for CountingDataset {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn fetch(&self, filter: Option<&str>, rng: &mut StdRng) -> Result<Sample, DatasetError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch(filter, rng)
    }
}
