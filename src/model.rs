//! Menoh (ONNX) implementations of [`FeatureExtractor`] and [`SequenceModel`].
//!
//! Both graphs are exported from the trained Keras models with the input/output names
//! below. A `menoh::Model` is driven through `&mut` and is not shared between threads,
//! so each backend keeps it in a `RefCell` and is owned by the inference worker.

use crate::config::ModelConfig;
use crate::decoder::SequenceModel;
use crate::error::ModelError;
use crate::features::FeatureExtractor;

#[cfg(feature = "menoh")]
pub use self::onnx::{MenohCaptionModel, MenohFeatureExtractor};

pub type Backends = (Box<dyn FeatureExtractor>, Box<dyn SequenceModel>);

#[cfg(feature = "menoh")]
pub fn load_backends(config: &ModelConfig) -> Result<Backends, ModelError> {
    use tracing::info;

    for path in &[&config.feature_model, &config.caption_model] {
        if !path.exists() {
            return Err(ModelError::MissingWeights(path.to_path_buf()));
        }
    }

    let extractor = MenohFeatureExtractor::from_onnx(
        &config.feature_model,
        &config.backend,
        &config.backend_config,
    )?;
    info!(path = %config.feature_model.display(), backend = %config.backend, "loaded feature extractor");

    let model = MenohCaptionModel::from_onnx(
        &config.caption_model,
        config.max_length,
        &config.backend,
        &config.backend_config,
    )?;
    info!(path = %config.caption_model.display(), max_length = config.max_length, "loaded caption model");

    Ok((Box::new(extractor), Box::new(model)))
}

#[cfg(not(feature = "menoh"))]
pub fn load_backends(_config: &ModelConfig) -> Result<Backends, ModelError> {
    Err(ModelError::Unavailable)
}

#[cfg(feature = "menoh")]
mod onnx {
    use std::cell::RefCell;
    use std::path::Path;

    use crate::decoder::SequenceModel;
    use crate::error::ModelError;
    use crate::features::{Embedding, FeatureExtractor, ImageTensor, FEATURE_SIZE};

    const EXTRACT_IN: &str = "xception_in";
    const EXTRACT_OUT: &str = "xception_out";
    const PHOTO_IN: &str = "photo_in";
    const SEQUENCE_IN: &str = "sequence_in";
    const CAPTION_OUT: &str = "caption_out";

    pub struct MenohFeatureExtractor {
        model: RefCell<menoh::Model>,
    }

    impl MenohFeatureExtractor {
        pub fn from_onnx<P>(path: P, backend: &str, backend_config: &str) -> Result<Self, ModelError>
        where
            P: AsRef<Path>,
        {
            let model = menoh::Builder::from_onnx(path)?
                .add_input::<f32>(EXTRACT_IN, &ImageTensor::SHAPE)?
                .add_output(EXTRACT_OUT)?
                .build(backend, backend_config)?;
            Ok(Self {
                model: RefCell::new(model),
            })
        }
    }

    impl FeatureExtractor for MenohFeatureExtractor {
        fn extract(&self, input: &ImageTensor) -> Result<Embedding, ModelError> {
            let mut model = self.model.borrow_mut();
            {
                let in_ = model.get_variable_mut::<f32>(EXTRACT_IN)?.1;
                check_len(in_.len(), input.as_slice().len())?;
                in_.copy_from_slice(input.as_slice());
            }
            model.run()?;
            let out = model.get_variable::<f32>(EXTRACT_OUT)?.1;
            check_len(FEATURE_SIZE, out.len())?;
            Ok(Embedding::new(out.to_vec()))
        }
    }

    pub struct MenohCaptionModel {
        model: RefCell<menoh::Model>,
        max_length: usize,
    }

    impl MenohCaptionModel {
        pub fn from_onnx<P>(
            path: P,
            max_length: usize,
            backend: &str,
            backend_config: &str,
        ) -> Result<Self, ModelError>
        where
            P: AsRef<Path>,
        {
            let model = menoh::Builder::from_onnx(path)?
                .add_input::<f32>(PHOTO_IN, &[1, FEATURE_SIZE])?
                .add_input::<f32>(SEQUENCE_IN, &[1, max_length])?
                .add_output(CAPTION_OUT)?
                .build(backend, backend_config)?;
            Ok(Self {
                model: RefCell::new(model),
                max_length,
            })
        }
    }

    impl SequenceModel for MenohCaptionModel {
        fn predict(&self, photo: &Embedding, sequence: &[u32]) -> Result<Vec<f32>, ModelError> {
            check_len(FEATURE_SIZE, photo.len())?;
            check_len(self.max_length, sequence.len())?;

            let mut model = self.model.borrow_mut();
            model
                .get_variable_mut::<f32>(PHOTO_IN)?
                .1
                .copy_from_slice(photo.as_slice());
            {
                let in_ = model.get_variable_mut::<f32>(SEQUENCE_IN)?.1;
                for (dst, &id) in in_.iter_mut().zip(sequence) {
                    *dst = id as f32;
                }
            }
            model.run()?;
            Ok(model.get_variable::<f32>(CAPTION_OUT)?.1.to_vec())
        }
    }

    fn check_len(expected: usize, actual: usize) -> Result<(), ModelError> {
        if expected == actual {
            Ok(())
        } else {
            Err(ModelError::Shape { expected, actual })
        }
    }
}
