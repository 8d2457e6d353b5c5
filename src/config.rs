use std::net::SocketAddr;
use std::path::PathBuf;

use docopt::ArgvMap;

use crate::decoder::DEFAULT_MAX_LENGTH;
use crate::history::DEFAULT_HISTORY_LIMIT;

/// docopt option block shared by both binaries, read back by [`ModelConfig::from_argv`].
pub const MODEL_OPTIONS: &str = "
Model options:
  --tokenizer=<path>         Keras tokenizer json [default: tokenizer.json]
  --legacy-tokenizer=<path>  Binary vocabulary, read when the json is absent [default: tokenizer.bin]
  --vocab=<path>             Word list, read when both tokenizers are absent [default: vocab.txt]
  --model=<path>             Caption model (ONNX) [default: models/caption.onnx]
  --extractor=<path>         Xception feature extractor (ONNX) [default: models/xception.onnx]
  --backend=<name>           Menoh backend [default: mkldnn]
  --max-length=<n>           Maximum caption length in words [default: 32]
";

/// Where the tokenizer may live, in the order the formats are tried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VocabularyPaths {
    pub json: PathBuf,
    pub binary: PathBuf,
    pub word_list: PathBuf,
}

impl Default for VocabularyPaths {
    fn default() -> Self {
        Self {
            json: PathBuf::from("tokenizer.json"),
            binary: PathBuf::from("tokenizer.bin"),
            word_list: PathBuf::from("vocab.txt"),
        }
    }
}

impl VocabularyPaths {
    pub fn tiers(&self) -> [&PathBuf; 3] {
        [&self.json, &self.binary, &self.word_list]
    }
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub vocabulary: VocabularyPaths,
    /// ONNX export of the caption (sequence) model.
    pub caption_model: PathBuf,
    /// ONNX export of the Xception feature extractor.
    pub feature_model: PathBuf,
    /// Menoh backend name, e.g. `mkldnn`.
    pub backend: String,
    pub backend_config: String,
    pub max_length: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            vocabulary: VocabularyPaths::default(),
            caption_model: PathBuf::from("models/caption.onnx"),
            feature_model: PathBuf::from("models/xception.onnx"),
            backend: "mkldnn".to_string(),
            backend_config: String::new(),
            max_length: DEFAULT_MAX_LENGTH,
        }
    }
}

impl ModelConfig {
    /// Reads the [`MODEL_OPTIONS`] flags out of parsed arguments.
    pub fn from_argv(argv: &ArgvMap) -> Result<Self, docopt::Error> {
        let max_length = argv.get_str("--max-length");
        let max_length = max_length.parse().map_err(|_| {
            docopt::Error::Argv(format!("--max-length expects a number, got {:?}", max_length))
        })?;
        Ok(Self {
            vocabulary: VocabularyPaths {
                json: argv.get_str("--tokenizer").into(),
                binary: argv.get_str("--legacy-tokenizer").into(),
                word_list: argv.get_str("--vocab").into(),
            },
            caption_model: argv.get_str("--model").into(),
            feature_model: argv.get_str("--extractor").into(),
            backend: argv.get_str("--backend").to_string(),
            max_length,
            ..Self::default()
        })
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub history_path: PathBuf,
    pub history_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            history_path: PathBuf::from("history.json"),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}
