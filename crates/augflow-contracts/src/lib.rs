//! Contracts shared between the augflow engine and its collaborators
//!
//! This crate defines the data model flowing through an augmentation
//! workflow and the two collaborator seams the engine consumes:
//!
//! - `Dataset`: weighted-random access to (image, annotation-set)
//!   pairs, honoring optional filters and a background fraction
//! - `Augmentation` + `AugmentationRegistry`: a catalog of named
//!   augmentation kinds, each declaring its fan-in and an `apply`
//!   capability
//!
//! The engine never inspects pixels or clips geometry; it only moves
//! `Sample` values between operators. Concrete geometric transforms
//! live behind the `Augmentation` trait in downstream crates.

pub mod augmentation;
pub mod data;
pub mod dataset;

pub use augmentation::{
    Augmentation, AugmentationError, AugmentationFactory, AugmentationRegistry, RegistryError,
};
pub use data::{Annotation, AnnotationSet, BoundingBox, Image, Sample};
pub use dataset::{Dataset, DatasetError, MemoryDataset};
