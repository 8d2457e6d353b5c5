use std::path::Path;

use image::DynamicImage;
use tracing::{debug, info};

use crate::config::ModelConfig;
use crate::decoder::{self, Decoded, SequenceModel};
use crate::error::{CaptionError, LoadError};
use crate::features::{self, FeatureExtractor};
use crate::model;
use crate::vocab::Vocabulary;

/// Everything one caption needs, loaded once and then only read.
pub struct CaptionContext {
    vocab: Vocabulary,
    extractor: Box<dyn FeatureExtractor>,
    model: Box<dyn SequenceModel>,
    max_length: usize,
}

impl CaptionContext {
    pub fn new(
        vocab: Vocabulary,
        extractor: Box<dyn FeatureExtractor>,
        model: Box<dyn SequenceModel>,
        max_length: usize,
    ) -> Self {
        Self {
            vocab,
            extractor,
            model,
            max_length,
        }
    }

    /// Loads the vocabulary and both networks described by `config`.
    pub fn load(config: &ModelConfig) -> Result<Self, LoadError> {
        let vocab = Vocabulary::load(&config.vocabulary)?;
        let (extractor, model) = model::load_backends(config)?;
        info!(words = vocab.len(), max_length = config.max_length, "caption context ready");
        Ok(Self::new(vocab, extractor, model, config.max_length))
    }

    pub fn describe(&self, img: &DynamicImage) -> Result<Decoded, CaptionError> {
        let input = features::preprocess(img);
        let photo = self.extractor.extract(&input)?;
        debug!(features = photo.len(), "extracted image features");
        Ok(decoder::generate(
            &*self.model,
            &self.vocab,
            &photo,
            self.max_length,
        )?)
    }

    pub fn caption_image(&self, img: &DynamicImage) -> Result<String, CaptionError> {
        Ok(self.describe(img)?.caption())
    }

    /// Decodes `bytes` as an image first; nothing reaches the models if that fails.
    pub fn caption_bytes(&self, bytes: &[u8]) -> Result<String, CaptionError> {
        let img = features::load_image(bytes)?;
        self.caption_image(&img)
    }

    pub fn caption_path<P: AsRef<Path>>(&self, path: P) -> Result<String, CaptionError> {
        let img = features::open_image(path)?;
        self.caption_image(&img)
    }
}
