//! Word <-> id mapping for the caption model.
//!
//! The vocabulary is built offline together with the model weights; this module only
//! reads it. Three on-disk forms are understood, tried in order by [`Vocabulary::load`]:
//!
//! 1. `tokenizer.json` as written by the Keras `Tokenizer.to_json()`,
//! 2. a bincode-encoded [`Vocabulary`] (`tokenizer.bin`, see [`Vocabulary::write_binary`]),
//! 3. a plain word list, one word per line, line `n` getting id `n + 1`.
//!
//! Id `0` is reserved for padding and never maps to a word.

use std::collections::HashMap;
use std::fs;
use std::io::{self, BufRead};
use std::path::Path;

use serde::de::{DeserializeOwned, Error as _};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::VocabularyPaths;
use crate::error::LoadError;

/// Characters Keras strips from text before splitting it into words.
pub const DEFAULT_FILTERS: &str = "!\"#$%&()*+,-./:;<=>?@[\\]^_`{|}~\t\n";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vocabulary {
    word_index: HashMap<String, u32>,
    index_word: HashMap<u32, String>,
    filters: String,
    lower: bool,
    split: String,
    char_level: bool,
    num_words: Option<usize>,
    oov_token: Option<String>,
}

#[derive(Deserialize)]
struct KerasTokenizer {
    #[serde(default)]
    class_name: Option<String>,
    config: KerasTokenizerConfig,
}

#[derive(Deserialize)]
struct KerasTokenizerConfig {
    #[serde(default)]
    num_words: Option<usize>,
    #[serde(default = "default_filters")]
    filters: String,
    #[serde(default = "default_true")]
    lower: bool,
    #[serde(default = "default_split")]
    split: String,
    #[serde(default)]
    char_level: bool,
    #[serde(default)]
    oov_token: Option<String>,
    word_index: Value,
    #[serde(default)]
    index_word: Option<Value>,
}

fn default_filters() -> String {
    DEFAULT_FILTERS.to_string()
}

fn default_true() -> bool {
    true
}

fn default_split() -> String {
    " ".to_string()
}

/// Keras stores the mappings either inline or as JSON documents inside strings.
fn nested<T: DeserializeOwned>(value: Value) -> serde_json::Result<T> {
    match value {
        Value::String(text) => serde_json::from_str(&text),
        other => serde_json::from_value(other),
    }
}

impl Vocabulary {
    /// Keras' default text settings over the given mappings.
    fn from_maps(word_index: HashMap<String, u32>, index_word: HashMap<u32, String>) -> Self {
        Self {
            word_index,
            index_word,
            filters: default_filters(),
            lower: true,
            split: default_split(),
            char_level: false,
            num_words: None,
            oov_token: None,
        }
    }

    /// Numbers `words` by position from 1 upwards.
    ///
    /// Every position keeps its id even when a word repeats; the word itself maps back to
    /// its first position.
    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut word_index = HashMap::new();
        let mut index_word = HashMap::new();
        for (i, word) in words.into_iter().enumerate() {
            let id = i as u32 + 1;
            let word = word.into();
            word_index.entry(word.clone()).or_insert(id);
            index_word.insert(id, word);
        }
        Self::from_maps(word_index, index_word)
    }

    pub fn with_oov_token<S: Into<String>>(mut self, token: S) -> Self {
        self.oov_token = Some(token.into());
        self
    }

    pub fn with_num_words(mut self, num_words: usize) -> Self {
        self.num_words = Some(num_words).filter(|&n| n > 0);
        self
    }

    pub fn from_keras_json(bytes: &[u8]) -> serde_json::Result<Self> {
        let tokenizer: KerasTokenizer = serde_json::from_slice(bytes)?;
        if let Some(class_name) = &tokenizer.class_name {
            if class_name != "Tokenizer" {
                return Err(serde_json::Error::custom(format!(
                    "expected a Tokenizer, found {}",
                    class_name
                )));
            }
        }
        let config = tokenizer.config;
        if config.split.is_empty() {
            return Err(serde_json::Error::custom("split must not be empty"));
        }

        let word_index: HashMap<String, u32> = nested(config.word_index)?;
        let index_word = match config.index_word {
            Some(value) => {
                let raw: HashMap<String, String> = nested(value)?;
                let mut index_word = HashMap::with_capacity(raw.len());
                for (key, word) in raw {
                    let id = key.parse::<u32>().map_err(|_| {
                        serde_json::Error::custom(format!("index_word key {:?} is not an id", key))
                    })?;
                    index_word.insert(id, word);
                }
                index_word
            }
            None => word_index
                .iter()
                .map(|(word, &id)| (id, word.clone()))
                .collect(),
        };

        Ok(Self {
            filters: config.filters,
            lower: config.lower,
            split: config.split,
            char_level: config.char_level,
            num_words: config.num_words.filter(|&n| n > 0),
            oov_token: config.oov_token,
            ..Self::from_maps(word_index, index_word)
        })
    }

    pub fn from_binary(bytes: &[u8]) -> bincode::Result<Self> {
        bincode::deserialize(bytes)
    }

    pub fn to_binary(&self) -> bincode::Result<Vec<u8>> {
        bincode::serialize(self)
    }

    /// Writes the legacy binary form read by the second loading tier.
    pub fn write_binary<P: AsRef<Path>>(&self, path: P) -> Result<(), LoadError> {
        let path = path.as_ref();
        let bytes = self.to_binary().map_err(|source| LoadError::Binary {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, bytes).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads the first vocabulary form present on disk.
    ///
    /// Only a missing file moves on to the next form; a file that exists but does not
    /// parse is reported as is.
    pub fn load(paths: &VocabularyPaths) -> Result<Self, LoadError> {
        if let Some(bytes) = read_if_present(&paths.json)? {
            let vocab = Self::from_keras_json(&bytes).map_err(|source| LoadError::Json {
                path: paths.json.clone(),
                source,
            })?;
            info!(path = %paths.json.display(), words = vocab.len(), "loaded tokenizer json");
            return Ok(vocab);
        }

        if let Some(bytes) = read_if_present(&paths.binary)? {
            let vocab = Self::from_binary(&bytes).map_err(|source| LoadError::Binary {
                path: paths.binary.clone(),
                source,
            })?;
            info!(path = %paths.binary.display(), words = vocab.len(), "loaded binary vocabulary");
            return Ok(vocab);
        }

        if let Some(bytes) = read_if_present(&paths.word_list)? {
            let mut words = Vec::new();
            for line in io::BufReader::new(&bytes[..]).lines() {
                let line = line.map_err(|source| LoadError::Io {
                    path: paths.word_list.clone(),
                    source,
                })?;
                words.push(line);
            }
            if words.is_empty() {
                return Err(LoadError::InvalidTokenizer(format!(
                    "{} is empty",
                    paths.word_list.display()
                )));
            }
            let vocab = Self::from_words(words);
            info!(path = %paths.word_list.display(), words = vocab.len(), "loaded word list");
            return Ok(vocab);
        }

        Err(LoadError::VocabularyMissing {
            tried: paths.tiers().iter().map(|p| p.to_path_buf()).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.word_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.word_index.is_empty()
    }

    /// Width of the model's output distribution.
    pub fn output_size(&self) -> usize {
        match self.num_words {
            Some(n) => n,
            None => self.index_word.keys().max().map_or(1, |&id| id as usize + 1),
        }
    }

    pub fn id_to_word(&self, id: u32) -> Option<&str> {
        self.index_word.get(&id).map(String::as_str)
    }

    pub fn word_to_id(&self, word: &str) -> Option<u32> {
        self.word_index.get(word).copied()
    }

    /// Maps already split words to ids.
    ///
    /// Words outside the vocabulary (or past `num_words`) become the oov id when an oov
    /// token is configured and are dropped otherwise.
    pub fn word_ids<I, S>(&self, words: I) -> Vec<u32>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let oov = self
            .oov_token
            .as_deref()
            .and_then(|token| self.word_index.get(token))
            .copied();
        words
            .into_iter()
            .filter_map(|word| match self.word_index.get(word.as_ref()) {
                Some(&id) if self.num_words.map_or(true, |n| (id as usize) < n) => Some(id),
                _ => oov,
            })
            .collect()
    }

    /// Tokenizes `text` the way the vocabulary was built, then maps it to ids.
    pub fn text_to_sequence(&self, text: &str) -> Vec<u32> {
        let text = if self.lower {
            text.to_lowercase()
        } else {
            text.to_string()
        };
        if self.char_level {
            return self.word_ids(text.chars().map(String::from));
        }

        let mut normalized = String::with_capacity(text.len());
        for c in text.chars() {
            if self.filters.contains(c) {
                normalized.push_str(&self.split);
            } else {
                normalized.push(c);
            }
        }
        self.word_ids(
            normalized
                .split(self.split.as_str())
                .filter(|word| !word.is_empty()),
        )
    }
}

fn read_if_present(path: &Path) -> Result<Option<Vec<u8>>, LoadError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(ref err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "vocabulary file absent, trying next form");
            Ok(None)
        }
        Err(source) => Err(LoadError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn keras_json() -> String {
        let word_index = r#"{"start": 1, "end": 2, "a": 3, "dog": 4, "runs": 5}"#;
        let index_word = r#"{"1": "start", "2": "end", "3": "a", "4": "dog", "5": "runs"}"#;
        serde_json::json!({
            "class_name": "Tokenizer",
            "config": {
                "num_words": null,
                "filters": DEFAULT_FILTERS,
                "lower": true,
                "split": " ",
                "char_level": false,
                "oov_token": null,
                "document_count": 3,
                "word_counts": "{}",
                "word_index": word_index,
                "index_word": index_word,
            }
        })
        .to_string()
    }

    fn paths_in(dir: &Path) -> VocabularyPaths {
        VocabularyPaths {
            json: dir.join("tokenizer.json"),
            binary: dir.join("tokenizer.bin"),
            word_list: dir.join("vocab.txt"),
        }
    }

    #[test]
    fn parses_string_encoded_keras_mappings() {
        let vocab = Vocabulary::from_keras_json(keras_json().as_bytes()).unwrap();
        assert_eq!(vocab.len(), 5);
        assert_eq!(vocab.word_to_id("dog"), Some(4));
        assert_eq!(vocab.id_to_word(5), Some("runs"));
        assert_eq!(vocab.output_size(), 6);
    }

    #[test]
    fn parses_inline_mappings_and_derives_index_word() {
        let text = r#"{"config": {"word_index": {"start": 1, "cat": 2}}}"#;
        let vocab = Vocabulary::from_keras_json(text.as_bytes()).unwrap();
        assert_eq!(vocab.id_to_word(2), Some("cat"));
        assert_eq!(vocab.text_to_sequence("start cat"), vec![1, 2]);
    }

    #[test]
    fn rejects_other_keras_classes() {
        let text = r#"{"class_name": "Sequential", "config": {"word_index": {}}}"#;
        assert!(Vocabulary::from_keras_json(text.as_bytes()).is_err());
    }

    #[test]
    fn id_lookup_outside_vocabulary_is_absent() {
        let vocab = Vocabulary::from_keras_json(keras_json().as_bytes()).unwrap();
        assert_eq!(vocab.id_to_word(0), None);
        assert_eq!(vocab.id_to_word(6), None);
        assert_eq!(vocab.id_to_word(u32::MAX), None);
    }

    #[test]
    fn tokenization_lowercases_and_strips_filters() {
        let vocab = Vocabulary::from_keras_json(keras_json().as_bytes()).unwrap();
        assert_eq!(vocab.text_to_sequence("Start, A  DOG!runs"), vec![1, 3, 4, 5]);
    }

    #[test]
    fn unknown_words_are_dropped_without_oov_token() {
        let vocab = Vocabulary::from_words(vec!["start", "dog"]);
        assert_eq!(vocab.text_to_sequence("start zebra dog"), vec![1, 2]);
    }

    #[test]
    fn unknown_and_capped_words_map_to_oov() {
        let vocab = Vocabulary::from_words(vec!["<unk>", "start", "dog", "rare"])
            .with_oov_token("<unk>")
            .with_num_words(4);
        assert_eq!(vocab.word_ids(["start", "zebra", "rare", "dog"]), vec![2, 1, 1, 3]);
        assert_eq!(vocab.output_size(), 4);
    }

    #[test]
    fn capped_words_are_dropped_without_oov() {
        let vocab = Vocabulary::from_words(vec!["start", "dog", "rare"]).with_num_words(3);
        assert_eq!(vocab.word_ids(["start", "rare", "dog"]), vec![1, 2]);
    }

    #[test]
    fn load_prefers_json() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());
        fs::write(&paths.json, keras_json()).unwrap();
        fs::write(&paths.word_list, "only\n").unwrap();

        let vocab = Vocabulary::load(&paths).unwrap();
        assert_eq!(vocab.word_to_id("dog"), Some(4));
    }

    #[test]
    fn load_falls_back_to_binary_when_json_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());
        let original = Vocabulary::from_keras_json(keras_json().as_bytes()).unwrap();
        original.write_binary(&paths.binary).unwrap();

        assert_eq!(Vocabulary::load(&paths).unwrap(), original);
    }

    #[test]
    fn load_falls_back_to_word_list_last() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());
        fs::write(&paths.word_list, "start\nend\nbird\n").unwrap();

        let vocab = Vocabulary::load(&paths).unwrap();
        assert_eq!(vocab.id_to_word(3), Some("bird"));
    }

    #[test]
    fn repeated_word_list_lines_keep_their_position() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());
        fs::write(&paths.word_list, "start\nend\nend\nbird\n").unwrap();

        let vocab = Vocabulary::load(&paths).unwrap();
        assert_eq!(vocab.id_to_word(3), Some("end"));
        assert_eq!(vocab.id_to_word(4), Some("bird"));
        assert_eq!(vocab.word_to_id("end"), Some(2));
        assert_eq!(vocab.word_to_id("bird"), Some(4));
        assert_eq!(vocab.output_size(), 5);
    }

    #[test]
    fn invalid_utf8_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());
        let text = keras_json().replace("\"split\":\" \"", "\"split\":\"\u{1}\"");
        let mut bytes = text.into_bytes();
        let at = bytes.iter().position(|&b| b == 1).unwrap();
        bytes[at] = 0xff;
        fs::write(&paths.json, bytes).unwrap();

        match Vocabulary::load(&paths) {
            Err(LoadError::Json { path, .. }) => assert_eq!(path, paths.json),
            other => panic!("expected json error, got {:?}", other),
        }
    }

    #[test]
    fn malformed_json_does_not_fall_back() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());
        fs::write(&paths.json, "{not json").unwrap();
        fs::write(&paths.word_list, "start\n").unwrap();

        match Vocabulary::load(&paths) {
            Err(LoadError::Json { path, .. }) => assert_eq!(path, paths.json),
            other => panic!("expected json error, got {:?}", other),
        }
    }

    #[test]
    fn load_reports_every_missing_tier() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());

        match Vocabulary::load(&paths) {
            Err(LoadError::VocabularyMissing { tried }) => {
                let expected: Vec<PathBuf> =
                    vec![paths.json.clone(), paths.binary.clone(), paths.word_list.clone()];
                assert_eq!(tried, expected);
            }
            other => panic!("expected missing vocabulary, got {:?}", other),
        }
    }
}
