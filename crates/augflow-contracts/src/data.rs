//! Image and annotation data model
//!
//! These types are deliberately opaque to the engine: an `Image` is a
//! pixel buffer with dimensions, an `AnnotationSet` a list of labeled
//! boxes. Both are value-comparable so tests and callers can check
//! that a pass-through really left the data untouched.

use serde::{Deserialize, Serialize};

/// An opaque pixel buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Channels per pixel (1 = gray, 3 = RGB, 4 = RGBA)
    pub channels: u8,
    /// Raw pixel bytes, row-major
    pub pixels: Vec<u8>,
}

impl Image {
    /// Create an image from raw parts
    pub fn new(width: u32, height: u32, channels: u8, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            channels,
            pixels,
        }
    }

    /// Create a zero-filled image (useful for tests and placeholders)
    pub fn blank(width: u32, height: u32, channels: u8) -> Self {
        let len = width as usize * height as usize * channels as usize;
        Self {
            width,
            height,
            channels,
            pixels: vec![0; len],
        }
    }
}

/// Axis-aligned bounding box in normalized [0, 1] coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl BoundingBox {
    pub fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }
}

/// One labeled region on an image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    /// Class label
    pub label: String,
    /// Region covered by the label
    pub bbox: BoundingBox,
}

impl Annotation {
    pub fn new(label: impl Into<String>, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            bbox,
        }
    }
}

/// All annotations attached to one image
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotationSet {
    pub annotations: Vec<Annotation>,
}

impl AnnotationSet {
    /// An annotation set with no entries (a "background" image)
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_annotations(annotations: Vec<Annotation>) -> Self {
        Self { annotations }
    }

    /// True when the set carries no annotations
    pub fn is_background(&self) -> bool {
        self.annotations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }
}

/// The unit of data flowing through a workflow: one image with its
/// annotation set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub image: Image,
    pub annotations: AnnotationSet,
}

impl Sample {
    pub fn new(image: Image, annotations: AnnotationSet) -> Self {
        Self { image, annotations }
    }

    /// A background sample: image only, no annotations
    pub fn background(image: Image) -> Self {
        Self {
            image,
            annotations: AnnotationSet::empty(),
        }
    }
}
