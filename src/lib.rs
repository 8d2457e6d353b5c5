//! Image captioning on a pretrained Xception encoder and a recurrent caption model.
//!
//! The pipeline is `image bytes -> features::preprocess -> FeatureExtractor ->
//! decoder::generate -> decoder::clean_caption`. [`context::CaptionContext`] bundles
//! the loaded vocabulary and backends; [`worker::InferenceWorker`] serializes access
//! to it for the HTTP server in [`server`].

extern crate axum;
extern crate base64;
extern crate bincode;
extern crate chrono;
extern crate docopt;
extern crate image;
#[cfg(feature = "menoh")]
extern crate menoh;
extern crate parking_lot;
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate serde_json;
extern crate thiserror;
extern crate tokio;
extern crate tower_http;
extern crate tracing;
extern crate uuid;

pub mod config;
pub mod context;
pub mod decoder;
pub mod error;
pub mod features;
pub mod history;
pub mod model;
pub mod server;
pub mod vocab;
pub mod worker;

pub use config::{ModelConfig, ServerConfig, VocabularyPaths};
pub use context::CaptionContext;
pub use decoder::{Decoded, SequenceModel, StopReason};
pub use error::{CaptionError, HistoryError, LoadError, ModelError};
pub use features::{Embedding, FeatureExtractor, ImageTensor};
pub use history::{HistoryEntry, HistoryStore};
pub use vocab::Vocabulary;
pub use worker::InferenceWorker;
