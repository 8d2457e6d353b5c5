//! Image decoding and the input side of the Xception feature extractor.

use std::fs;
use std::path::Path;

use image::imageops::{self, FilterType};
use image::DynamicImage;

use crate::error::{CaptionError, ModelError};

/// Side of the square input the extractor was trained on.
pub const IMAGE_SIZE: usize = 299;
/// Length of the pooled Xception embedding.
pub const FEATURE_SIZE: usize = 2048;
const CHANNELS: usize = 3;

/// Normalized pixels in NHWC layout with a batch of one.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    data: Vec<f32>,
}

impl ImageTensor {
    pub const SHAPE: [usize; 4] = [1, IMAGE_SIZE, IMAGE_SIZE, CHANNELS];

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn pixel(&self, x: usize, y: usize) -> [f32; 3] {
        let base = (y * IMAGE_SIZE + x) * CHANNELS;
        [self.data[base], self.data[base + 1], self.data[base + 2]]
    }
}

/// Fixed-length visual summary of one image.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Embedding(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A pretrained image network reduced to its pooled output.
pub trait FeatureExtractor {
    fn extract(&self, input: &ImageTensor) -> Result<Embedding, ModelError>;
}

pub fn load_image(bytes: &[u8]) -> Result<DynamicImage, CaptionError> {
    Ok(image::load_from_memory(bytes)?)
}

pub fn open_image<P: AsRef<Path>>(path: P) -> Result<DynamicImage, CaptionError> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|source| CaptionError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    load_image(&bytes)
}

/// Builds the extractor input: first three channels only, 299x299, values in [-1, 1].
pub fn preprocess(img: &DynamicImage) -> ImageTensor {
    let rgb = img.to_rgb8();
    let rgb = imageops::resize(
        &rgb,
        IMAGE_SIZE as u32,
        IMAGE_SIZE as u32,
        FilterType::CatmullRom,
    );

    let mut data = vec![0.; IMAGE_SIZE * IMAGE_SIZE * CHANNELS];
    for (x, y, pixel) in rgb.enumerate_pixels() {
        let base = (y as usize * IMAGE_SIZE + x as usize) * CHANNELS;
        for c in 0..CHANNELS {
            data[base + c] = pixel.0[c] as f32 / 127.5 - 1.0;
        }
    }
    ImageTensor { data }
}
