//! Greedy caption decoding.
//!
//! Starting from the `start` sentinel, the whole prefix is re-tokenized, padded to
//! `max_length` and fed to the sequence model together with the image embedding; the
//! most probable next word is appended until the `end` sentinel, an id without a word,
//! or `max_length` steps.

use std::cmp;

use tracing::debug;

use crate::error::ModelError;
use crate::features::Embedding;
use crate::vocab::Vocabulary;

pub const START_TOKEN: &str = "start";
pub const END_TOKEN: &str = "end";
pub const DEFAULT_MAX_LENGTH: usize = 32;

/// Next-word distribution given an image and a padded id prefix.
pub trait SequenceModel {
    fn predict(&self, photo: &Embedding, sequence: &[u32]) -> Result<Vec<f32>, ModelError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The `end` sentinel was produced (and appended).
    EndToken,
    /// The model picked an id that has no word.
    UnknownId,
    /// `max_length` steps ran without an `end` sentinel.
    MaxLength,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    /// Starts with the `start` sentinel.
    pub tokens: Vec<String>,
    pub steps: usize,
    pub stop: StopReason,
}

impl Decoded {
    pub fn caption(&self) -> String {
        clean_caption(&self.tokens)
    }
}

/// Pre-pads with id 0 and keeps the last `max_length` ids when longer.
pub fn pad_sequence(ids: &[u32], max_length: usize) -> Vec<u32> {
    let keep = cmp::min(ids.len(), max_length);
    let mut padded = vec![0; max_length - keep];
    padded.extend_from_slice(&ids[ids.len() - keep..]);
    padded
}

/// Index of the greatest probability; the lowest index wins ties and NaN never wins.
pub fn argmax(probs: &[f32]) -> Result<u32, ModelError> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &p) in probs.iter().enumerate() {
        if p.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if p <= b => {}
            _ => best = Some((i, p)),
        }
    }
    best.map(|(i, _)| i as u32).ok_or(ModelError::EmptyPrediction)
}

pub fn generate<M>(
    model: &M,
    vocab: &Vocabulary,
    photo: &Embedding,
    max_length: usize,
) -> Result<Decoded, ModelError>
where
    M: SequenceModel + ?Sized,
{
    let width = vocab.output_size();
    let mut tokens = vec![START_TOKEN.to_string()];
    let mut stop = StopReason::MaxLength;
    let mut steps = 0;

    while steps < max_length {
        steps += 1;
        let ids = vocab.text_to_sequence(&tokens.join(" "));
        let sequence = pad_sequence(&ids, max_length);
        let probs = model.predict(photo, &sequence)?;
        if probs.len() != width {
            return Err(ModelError::Shape {
                expected: width,
                actual: probs.len(),
            });
        }
        let id = argmax(&probs)?;

        let word = match vocab.id_to_word(id) {
            Some(word) => word,
            None => {
                stop = StopReason::UnknownId;
                break;
            }
        };
        tokens.push(word.to_string());
        if word == END_TOKEN {
            stop = StopReason::EndToken;
            break;
        }
    }

    debug!(steps, ?stop, "decoded caption");
    Ok(Decoded {
        tokens,
        steps,
        stop,
    })
}

/// Joins the tokens and removes every `start` / `end` occurrence, then trims.
///
/// Removal repeats until nothing changes so that cutting one sentinel out cannot leave
/// another one behind (`"staendrt"`).
pub fn clean_caption<S: AsRef<str>>(tokens: &[S]) -> String {
    let mut text = tokens
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(" ");
    loop {
        let cleaned = text.replace(START_TOKEN, "").replace(END_TOKEN, "");
        if cleaned == text {
            break;
        }
        text = cleaned;
    }
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    /// Returns one-hot distributions over `width` ids following `script`, repeating the
    /// last entry once the script runs out.
    struct ScriptedModel {
        script: Vec<u32>,
        width: usize,
        calls: Cell<usize>,
        seen: RefCell<Vec<Vec<u32>>>,
    }

    impl ScriptedModel {
        fn new(script: Vec<u32>, width: usize) -> Self {
            Self {
                script,
                width,
                calls: Cell::new(0),
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl SequenceModel for ScriptedModel {
        fn predict(&self, _photo: &Embedding, sequence: &[u32]) -> Result<Vec<f32>, ModelError> {
            let step = self.calls.get();
            self.calls.set(step + 1);
            self.seen.borrow_mut().push(sequence.to_vec());
            let id = self.script[cmp::min(step, self.script.len() - 1)] as usize;
            let mut probs = vec![0.01; self.width];
            probs[id] = 0.9;
            Ok(probs)
        }
    }

    struct FailingModel;

    impl SequenceModel for FailingModel {
        fn predict(&self, _: &Embedding, _: &[u32]) -> Result<Vec<f32>, ModelError> {
            Err(ModelError::Backend("graph not loaded".into()))
        }
    }

    // start=1 end=2 a=3 dog=4 runs=5 on=6 grass=7
    fn vocab() -> Vocabulary {
        Vocabulary::from_words(vec!["start", "end", "a", "dog", "runs", "on", "grass"])
    }

    fn photo() -> Embedding {
        Embedding::new(vec![0.5; 8])
    }

    #[test]
    fn decodes_until_end_token() {
        let model = ScriptedModel::new(vec![3, 4, 5, 2], 8);
        let decoded = generate(&model, &vocab(), &photo(), 32).unwrap();
        assert_eq!(decoded.stop, StopReason::EndToken);
        assert_eq!(decoded.steps, 4);
        assert_eq!(decoded.tokens, ["start", "a", "dog", "runs", "end"]);
        assert_eq!(decoded.caption(), "a dog runs");
    }

    #[test]
    fn feeds_pre_padded_prefixes() {
        let model = ScriptedModel::new(vec![3, 4, 2], 8);
        generate(&model, &vocab(), &photo(), 6).unwrap();
        let seen = model.seen.borrow();
        assert_eq!(seen[0], vec![0, 0, 0, 0, 0, 1]);
        assert_eq!(seen[1], vec![0, 0, 0, 0, 1, 3]);
        assert_eq!(seen[2], vec![0, 0, 0, 1, 3, 4]);
    }

    #[test]
    fn immediate_end_gives_empty_caption() {
        let model = ScriptedModel::new(vec![2], 8);
        let decoded = generate(&model, &vocab(), &photo(), 32).unwrap();
        assert_eq!(decoded.steps, 1);
        assert_eq!(decoded.caption(), "");
    }

    #[test]
    fn unknown_id_stops_without_error() {
        // ids 8 and 9 are inside the output but have no word
        let vocab = vocab().with_num_words(10);
        let model = ScriptedModel::new(vec![9, 3], 10);
        let decoded = generate(&model, &vocab, &photo(), 32).unwrap();
        assert_eq!(decoded.stop, StopReason::UnknownId);
        assert_eq!(decoded.steps, 1);
        assert_eq!(decoded.tokens, vec!["start".to_string()]);
        assert_eq!(decoded.caption(), "");
    }

    #[test]
    fn padding_id_is_not_a_word() {
        let model = ScriptedModel::new(vec![0], 8);
        let decoded = generate(&model, &vocab(), &photo(), 32).unwrap();
        assert_eq!(decoded.stop, StopReason::UnknownId);
    }

    #[test]
    fn runs_exactly_max_length_steps_without_end() {
        let model = ScriptedModel::new(vec![3, 4, 5, 6, 7], 8);
        let decoded = generate(&model, &vocab(), &photo(), 32).unwrap();
        assert_eq!(decoded.stop, StopReason::MaxLength);
        assert_eq!(decoded.steps, 32);
        assert_eq!(model.calls.get(), 32);
        assert_eq!(decoded.caption().split_whitespace().count(), 32);
    }

    #[test]
    fn decoding_is_deterministic() {
        let run = || {
            let model = ScriptedModel::new(vec![3, 4, 6, 3, 7, 2], 8);
            generate(&model, &vocab(), &photo(), 32).unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn output_width_must_match_vocabulary() {
        let model = ScriptedModel::new(vec![3, 2], 12);
        match generate(&model, &vocab(), &photo(), 32) {
            Err(ModelError::Shape { expected, actual }) => assert_eq!((expected, actual), (8, 12)),
            other => panic!("expected shape error, got {:?}", other),
        }
    }

    #[test]
    fn zero_max_length_never_calls_model() {
        let decoded = generate(&FailingModel, &vocab(), &photo(), 0).unwrap();
        assert_eq!(decoded.steps, 0);
        assert_eq!(decoded.caption(), "");
    }

    #[test]
    fn model_failure_is_reported() {
        match generate(&FailingModel, &vocab(), &photo(), 32) {
            Err(ModelError::Backend(msg)) => assert_eq!(msg, "graph not loaded"),
            other => panic!("expected backend error, got {:?}", other),
        }
    }

    #[test]
    fn argmax_prefers_lowest_id_on_ties() {
        assert_eq!(argmax(&[0.1, 0.4, 0.4, 0.1]).unwrap(), 1);
        assert_eq!(argmax(&[f32::NAN, 0.2, 0.3]).unwrap(), 2);
        assert!(argmax(&[]).is_err());
        assert!(argmax(&[f32::NAN]).is_err());
    }

    #[test]
    fn pad_sequence_handles_exact_and_empty() {
        assert_eq!(pad_sequence(&[], 3), vec![0, 0, 0]);
        assert_eq!(pad_sequence(&[5, 6, 7], 3), vec![5, 6, 7]);
        assert_eq!(pad_sequence(&[4, 5, 6, 7], 3), vec![5, 6, 7]);
    }

    #[test]
    fn caption_never_contains_sentinels() {
        assert_eq!(clean_caption(&["start", "a", "weekend", "end"]), "a week");
        assert_eq!(clean_caption(&["start", "staendrt", "end"]), "");
        let cleaned = clean_caption(&["start", "stendart", "legend", "end"]);
        assert!(!cleaned.contains(START_TOKEN));
        assert!(!cleaned.contains(END_TOKEN));
    }
}
