use std::io;

use bitflags::bitflags;
use ndarray::{s, Array4, Array5};

use super::options::{DmvOptions, FUNCTION_TAGS};
use crate::corpus::Sentence;
use crate::params::{direction, ParameterStore, CONTINUE};
use crate::parser::SentenceScores;
use crate::tag_index::TagIndex;

bitflags! {
    /// Structural masks applied to score tables
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Mask: u32 {
        /// Function tags never head a dependency
        const FUNCTION = 0x01;
        /// Tags outside the restricted vocabulary only attach at valence 0
        /// among themselves and always stop after their first child
        const SPECIFY = 0x02;
    }
}

/// Log-probability tables of a batch
///
/// * `attach[sentence, head, child, valence]`
/// * `decision[sentence, position, direction, valence, outcome]`
///
/// Tables are padded to the longest sentence of the batch; padding and
/// structurally impossible cells are `-inf`.
#[derive(Debug, Clone)]
pub struct ScoreTables {
    pub attach: Array4<f64>,
    pub decision: Array5<f64>,
    /// Number of positions (ROOT included) of every sentence
    pub lengths: Vec<usize>,
}

impl ScoreTables {
    pub fn batch_size(&self) -> usize {
        self.lengths.len()
    }

    /// Unpadded view of the tables of one sentence
    pub fn sentence(&self, index: usize) -> io::Result<SentenceScores<'_>> {
        let len = *self.lengths.get(index).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("sentence index {} out of range", index),
            )
        })?;
        SentenceScores::new(
            self.attach.slice(s![index, ..len, ..len, ..]),
            self.decision.slice(s![index, ..len, .., .., ..]),
        )
    }
}

/// Turns the current parameters into the score tables the parser consumes
#[derive(Debug, Clone)]
pub struct ScoreEvaluator {
    mask: Mask,
    /// Function tag flag per full tag id
    function: Vec<bool>,
    /// Restricted vocabulary flag per full tag id
    specify: Vec<bool>,
}

impl ScoreEvaluator {
    /// Resolve the masks requested by `options` against a tag index.
    ///
    /// Unknown tags in the restricted vocabulary are an error; function tags
    /// that do not occur in the index are ignored.
    pub fn new(tag_index: &TagIndex, options: &DmvOptions) -> io::Result<Self> {
        let mut mask = Mask::empty();
        let mut function = vec![false; tag_index.len()];
        let mut specify = vec![false; tag_index.len()];

        if options.function_mask() {
            mask |= Mask::FUNCTION;
            for tag in FUNCTION_TAGS {
                if let Some(id) = tag_index.tag_id(tag) {
                    function[id as usize] = true;
                }
            }
        }
        if !options.specify_tags().is_empty() {
            if options.d_valency() < 2 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "specify_tags requires d_valency 2",
                ));
            }
            mask |= Mask::SPECIFY;
            for tag in options.specify_tags() {
                let id = tag_index.tag_id(tag).ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("unknown tag in specify_tags: {}", tag),
                    )
                })?;
                specify[id as usize] = true;
            }
        }

        Ok(Self {
            mask,
            function,
            specify,
        })
    }

    pub fn mask(&self) -> Mask {
        self.mask
    }

    /// Log-probability tables of a batch.
    ///
    /// A sentence uses its per-sentence variant when one exists and the store
    /// is past its first M-step, the global tensors otherwise.
    pub fn evaluate(
        &self,
        tag_index: &TagIndex,
        params: &ParameterStore,
        batch: &[Sentence],
    ) -> io::Result<ScoreTables> {
        if batch.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty batch",
            ));
        }
        if params.num_tags() != tag_index.len() || self.function.len() != tag_index.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "parameter store does not match the tag index",
            ));
        }
        for sentence in batch {
            sentence.validate(tag_index)?;
        }

        let cvalency = params.cvalency();
        let dvalency = params.dvalency();
        let max_len = batch.iter().map(Sentence::len).max().unwrap_or(0);
        let mut attach =
            Array4::from_elem((batch.len(), max_len, max_len, cvalency), f64::NEG_INFINITY);
        let mut decision =
            Array5::from_elem((batch.len(), max_len, 2, dvalency, 2), f64::NEG_INFINITY);

        for (b, sentence) in batch.iter().enumerate() {
            let (trans_param, decision_param) = match params.sentence_params(sentence.id) {
                Some(variant) if !params.is_initial() => (&variant.trans, &variant.decision),
                _ => (params.trans(), params.decision()),
            };
            let tags = &sentence.tags;
            let n = sentence.len();

            decision.slice_mut(s![b, 0, .., .., ..]).fill(0.0);
            for i in 1..n {
                let pos = tag_index.to_decision(tags[i]).ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("tag {} has no decision id", tags[i]),
                    )
                })? as usize;
                decision
                    .slice_mut(s![b, i, .., .., ..])
                    .assign(&decision_param.slice(s![pos, .., .., ..]).mapv(f64::ln));
            }

            for i in 0..n {
                let head = tags[i] as usize;
                for j in 1..n {
                    if i == j {
                        continue;
                    }
                    let dir = direction(i, j);
                    for v in 0..cvalency {
                        attach[[b, i, j, v]] = trans_param[[head, tags[j] as usize, dir, v]].ln();
                    }
                }
            }

            if self.mask.contains(Mask::FUNCTION) {
                for i in 0..n {
                    if self.function[tags[i] as usize] {
                        attach.slice_mut(s![b, i, .., ..]).fill(f64::NEG_INFINITY);
                    }
                }
            }
            if self.mask.contains(Mask::SPECIFY) {
                for i in 0..n {
                    if self.specify[tags[i] as usize] {
                        continue;
                    }
                    if i > 0 {
                        for dir in 0..2 {
                            for v in 1..dvalency {
                                decision[[b, i, dir, v, CONTINUE]] = f64::NEG_INFINITY;
                            }
                        }
                    }
                    for j in 1..n {
                        if !self.specify[tags[j] as usize] {
                            for v in 1..cvalency {
                                attach[[b, i, j, v]] = f64::NEG_INFINITY;
                            }
                        }
                    }
                }
            }
        }

        Ok(ScoreTables {
            attach,
            decision,
            lengths: batch.iter().map(Sentence::len).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{LEFT, RIGHT, STOP};
    use crate::train::HarmonicInitializer;

    fn setup() -> (TagIndex, ParameterStore, Vec<Sentence>) {
        let index = TagIndex::with_root(["DET", "NOUN", "VERB"]).unwrap();
        let sentences = vec![
            Sentence::from_tags(0, 0, &[1, 2, 3]),
            Sentence::from_tags(1, 0, &[2, 3]),
        ];
        let mut params = ParameterStore::new(index.len(), index.num_decision(), 2, 2, None);
        HarmonicInitializer::new(&index, 0.1)
            .initialize(&mut params, &sentences)
            .unwrap();
        (index, params, sentences)
    }

    #[test]
    fn test_impossible_cells() {
        let (index, params, sentences) = setup();
        let evaluator = ScoreEvaluator::new(&index, &DmvOptions::default()).unwrap();
        let tables = evaluator.evaluate(&index, &params, &sentences).unwrap();
        assert_eq!(tables.attach.shape(), &[2, 4, 4, 2]);
        assert_eq!(tables.decision.shape(), &[2, 4, 2, 2, 2]);

        for b in 0..2 {
            for i in 0..4 {
                for v in 0..2 {
                    assert_eq!(tables.attach[[b, i, 0, v]], f64::NEG_INFINITY);
                    assert_eq!(tables.attach[[b, i, i, v]], f64::NEG_INFINITY);
                }
            }
        }
        // Padding of the shorter sentence
        assert_eq!(tables.attach[[1, 1, 3, 0]], f64::NEG_INFINITY);
        assert_eq!(tables.decision[[1, 3, LEFT, 0, STOP]], f64::NEG_INFINITY);

        let expected = params.trans()[[2, 3, RIGHT, 1]].ln();
        assert!((tables.attach[[0, 2, 3, 1]] - expected).abs() < 1e-12);
        assert_eq!(tables.decision[[0, 0, RIGHT, 1, CONTINUE]], 0.0);

        let again = evaluator.evaluate(&index, &params, &sentences).unwrap();
        assert_eq!(tables.attach, again.attach);
        assert_eq!(tables.decision, again.decision);

        let scores = tables.sentence(1).unwrap();
        assert_eq!(scores.len(), 3);
    }

    #[test]
    fn test_function_mask() {
        let (index, params, sentences) = setup();
        let mut options = DmvOptions::default();
        options.set_function_mask(true);
        let evaluator = ScoreEvaluator::new(&index, &options).unwrap();
        assert_eq!(evaluator.mask(), Mask::FUNCTION);
        let tables = evaluator.evaluate(&index, &params, &sentences).unwrap();
        assert!(tables
            .attach
            .slice(s![0, 1, .., ..])
            .iter()
            .all(|&v| v == f64::NEG_INFINITY));
        assert!(tables.attach[[0, 2, 1, 0]].is_finite());
    }

    #[test]
    fn test_specify_mask() {
        let (index, params, sentences) = setup();
        let mut options = DmvOptions::default();
        options.set_specify_tags(["VERB"]).unwrap();
        let evaluator = ScoreEvaluator::new(&index, &options).unwrap();
        let tables = evaluator.evaluate(&index, &params, &sentences).unwrap();

        // DET -> NOUN, both outside the restricted vocabulary
        assert!(tables.attach[[0, 2, 1, 0]].is_finite());
        assert_eq!(tables.attach[[0, 2, 1, 1]], f64::NEG_INFINITY);
        // VERB heads keep every valence
        assert!(tables.attach[[0, 3, 2, 1]].is_finite());
        assert_eq!(tables.decision[[0, 1, LEFT, 1, CONTINUE]], f64::NEG_INFINITY);
        assert!(tables.decision[[0, 3, LEFT, 1, CONTINUE]].is_finite());

        options.set_specify_tags(["ADJ"]).unwrap();
        assert!(ScoreEvaluator::new(&index, &options).is_err());
    }

    #[test]
    fn test_specify_mask_needs_decision_valence() {
        let (index, _, _) = setup();
        let mut options = DmvOptions::default();
        options.set_specify_tags(["VERB"]).unwrap();
        options.set_c_valency(1).unwrap();
        options.set_d_valency(1).unwrap();
        let err = ScoreEvaluator::new(&index, &options).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert_eq!(err.to_string(), "specify_tags requires d_valency 2");

        // One attachment valence still leaves the decision mask in effect
        options.set_d_valency(2).unwrap();
        assert!(ScoreEvaluator::new(&index, &options).is_ok());
    }

    #[test]
    fn test_sentence_variant_after_first_mstep() {
        let (index, mut params, sentences) = setup();
        let trans = params.trans().mapv(|p| p * 0.5);
        let decision = params.decision().clone();
        params.set_sentence_params(0, trans, decision).unwrap();
        let evaluator = ScoreEvaluator::new(&index, &DmvOptions::default()).unwrap();

        let initial = evaluator.evaluate(&index, &params, &sentences).unwrap();
        params.set_initial(false);
        let later = evaluator.evaluate(&index, &params, &sentences).unwrap();
        let diff = initial.attach[[0, 2, 3, 0]] - later.attach[[0, 2, 3, 0]];
        assert!((diff - 2f64.ln()).abs() < 1e-12);
        assert_eq!(initial.attach[[1, 1, 2, 0]], later.attach[[1, 1, 2, 0]]);
    }
}
