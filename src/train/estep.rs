use std::io;

use log::{debug, info, warn};
use ndarray::{Array2, Array4};

use super::options::{DmvOptions, EmType};
use super::score::ScoreTables;
use crate::corpus::Sentence;
use crate::params::{direction, ParameterStore, CONTINUE, LEFT, RIGHT, STOP};
use crate::parser::{ChartParser, EisnerParser, SpanIndex};
use crate::tag_index::TagIndex;

/// Key of a decision sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleKey {
    /// Keyed by decision id (separate decision network)
    Decision(u32),
    /// Keyed by full tag id (unified network)
    Tag(u32),
}

/// How decision samples are keyed, fixed at configuration time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleKeying {
    #[default]
    Decision,
    Tag,
}

impl SampleKeying {
    #[inline]
    pub fn key(self, tag: u32, decision_id: u32) -> SampleKey {
        match self {
            SampleKeying::Decision => SampleKey::Decision(decision_id),
            SampleKeying::Tag => SampleKey::Tag(tag),
        }
    }
}

/// One attachment event
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSample {
    pub head_tag: u32,
    pub child_tag: u32,
    pub direction: usize,
    pub valence: usize,
    pub sentence: usize,
    /// 1.0 for Viterbi counts, the expected count in soft mode
    pub weight: f64,
}

/// One stop/continue event
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionSample {
    pub key: SampleKey,
    pub direction: usize,
    pub valence: usize,
    pub outcome: usize,
    pub sentence: usize,
    pub weight: f64,
}

/// Training samples for an external network
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Samples {
    pub rules: Vec<RuleSample>,
    pub decisions: Vec<DecisionSample>,
}

impl Samples {
    pub fn len(&self) -> usize {
        self.rules.len() + self.decisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty() && self.decisions.is_empty()
    }

    pub fn clear(&mut self) {
        self.rules.clear();
        self.decisions.clear();
    }
}

/// Sufficient statistics accumulated by the E-step
///
/// Shapes mirror the parameter tensors. Owned by the caller; the E-step only
/// adds into them.
#[derive(Debug, Clone, PartialEq)]
pub struct Counters {
    pub trans: Array4<f64>,
    pub decision: Array4<f64>,
    pub lex: Option<Array2<f64>>,
    pub samples: Option<Samples>,
}

impl Counters {
    /// Zeroed counters shaped like `params`
    pub fn new(params: &ParameterStore, with_samples: bool) -> Self {
        Self {
            trans: Array4::zeros(params.trans().raw_dim()),
            decision: Array4::zeros(params.decision().raw_dim()),
            lex: params.lex().map(|lex| Array2::zeros(lex.raw_dim())),
            samples: with_samples.then(Samples::default),
        }
    }

    pub fn reset(&mut self) {
        self.trans.fill(0.0);
        self.decision.fill(0.0);
        if let Some(lex) = &mut self.lex {
            lex.fill(0.0);
        }
        if let Some(samples) = &mut self.samples {
            samples.clear();
        }
    }

    /// Add another set of counters into this one
    pub fn merge(&mut self, other: Counters) -> io::Result<()> {
        if self.trans.shape() != other.trans.shape()
            || self.decision.shape() != other.decision.shape()
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot merge counters of different shapes",
            ));
        }
        match (&mut self.lex, &other.lex) {
            (Some(lex), Some(other_lex)) if lex.shape() == other_lex.shape() => {
                *lex += other_lex;
            }
            (None, None) => {}
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "cannot merge counters of different shapes",
                ))
            }
        }
        self.trans += &other.trans;
        self.decision += &other.decision;
        if let Some(other_samples) = other.samples {
            let samples = self.samples.get_or_insert_with(Samples::default);
            samples.rules.extend(other_samples.rules);
            samples.decisions.extend(other_samples.decisions);
        }
        Ok(())
    }

    pub(crate) fn check_shapes(&self, params: &ParameterStore) -> io::Result<()> {
        let lex_ok = match (&self.lex, params.lex()) {
            (Some(counts), Some(lex)) => counts.shape() == lex.shape(),
            (None, None) => true,
            _ => false,
        };
        if self.trans.shape() != params.trans().shape()
            || self.decision.shape() != params.decision().shape()
            || !lex_ok
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "counters do not match the parameter store",
            ));
        }
        Ok(())
    }
}

/// Result of one E-step over a batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchLikelihood {
    /// Sum of sentence log-probabilities, `-inf` if any sentence has no parse
    pub log_likelihood: f64,
    /// Ids of sentences without any finite-score parse
    pub degenerate: Vec<usize>,
}

fn decision_id(tag_index: &TagIndex, tag: u32) -> io::Result<usize> {
    tag_index
        .to_decision(tag)
        .map(|id| id as usize)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("tag {} has no decision id", tag),
            )
        })
}

/// Computes sufficient statistics from score tables with a chart parser
#[derive(Debug, Clone)]
pub struct ExpectationEngine<P = EisnerParser> {
    parser: P,
    em_type: EmType,
    keying: SampleKeying,
    verbose: bool,
}

impl ExpectationEngine<EisnerParser> {
    pub fn new(options: &DmvOptions) -> Self {
        Self::with_parser(EisnerParser::new(), options)
    }
}

impl<P: ChartParser> ExpectationEngine<P> {
    pub fn with_parser(parser: P, options: &DmvOptions) -> Self {
        let keying = if options.unified_network() {
            SampleKeying::Tag
        } else {
            SampleKeying::Decision
        };
        Self {
            parser,
            em_type: options.em_type(),
            keying,
            verbose: options.verbose(),
        }
    }

    pub fn em_type(&self) -> EmType {
        self.em_type
    }

    pub fn keying(&self) -> SampleKeying {
        self.keying
    }

    /// Accumulate the counts of `batch` into `counters`.
    ///
    /// `tables` must have been evaluated for the same batch. Sentences without
    /// a parse contribute `-inf` to the likelihood and nothing to the counters.
    pub fn run(
        &self,
        tag_index: &TagIndex,
        params: &ParameterStore,
        batch: &[Sentence],
        tables: &ScoreTables,
        counters: &mut Counters,
    ) -> io::Result<BatchLikelihood> {
        counters.check_shapes(params)?;
        if tables.batch_size() != batch.len()
            || batch
                .iter()
                .zip(&tables.lengths)
                .any(|(sentence, &len)| sentence.len() != len)
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "score tables do not match the batch",
            ));
        }
        if let Some(lex) = params.lex() {
            let vocab_size = lex.shape()[1];
            for sentence in batch {
                if sentence.words.iter().flatten().any(|&w| w as usize >= vocab_size) {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("sentence {} has a word outside the vocabulary", sentence.id),
                    ));
                }
            }
        }

        let mut result = BatchLikelihood {
            log_likelihood: 0.0,
            degenerate: Vec::new(),
        };
        for (b, sentence) in batch.iter().enumerate() {
            let log_prob = match self.em_type {
                EmType::Viterbi => self.viterbi(tag_index, params, sentence, tables, b, counters)?,
                EmType::Em => self.inside_outside(tag_index, params, sentence, tables, b, counters)?,
            };
            match log_prob {
                Some(log_prob) => result.log_likelihood += log_prob,
                None => {
                    warn!("sentence {} has no valid parse", sentence.id);
                    result.log_likelihood = f64::NEG_INFINITY;
                    result.degenerate.push(sentence.id);
                }
            }
        }

        if self.verbose {
            info!(
                "e-step ({}) over {} sentences: log-likelihood = {:.6}, {} degenerate",
                self.em_type,
                batch.len(),
                result.log_likelihood,
                result.degenerate.len()
            );
        } else {
            debug!(
                "e-step ({}) over {} sentences: log-likelihood = {:.6}, {} degenerate",
                self.em_type,
                batch.len(),
                result.log_likelihood,
                result.degenerate.len()
            );
        }
        Ok(result)
    }

    /// Hard counts of the best parse; `None` if the sentence has no parse
    fn viterbi(
        &self,
        tag_index: &TagIndex,
        params: &ParameterStore,
        sentence: &Sentence,
        tables: &ScoreTables,
        b: usize,
        counters: &mut Counters,
    ) -> io::Result<Option<f64>> {
        let scores = tables.sentence(b)?;
        let tree = self.parser.best_parse(&scores)?;
        if !tree.is_valid() {
            return Ok(None);
        }

        let cvalency = params.cvalency();
        let dvalency = params.dvalency();
        let trans = params.trans();
        let decision = params.decision();
        let tags = &sentence.tags;
        let n = sentence.len();
        if tree.heads.len() != n || tree.head_valence.len() != n || tree.valence.len() != n {
            return Err(io::Error::other(format!(
                "parser returned a tree of the wrong length for sentence {}",
                sentence.id
            )));
        }

        // Resolve the whole tree before any count is added
        let mut heads = vec![0; n];
        let mut dec_ids = vec![0; n];
        for m in 1..n {
            heads[m] = tree.heads[m]
                .filter(|&h| h < n && h != m)
                .ok_or_else(|| {
                    io::Error::other(format!(
                        "parser left token {} of sentence {} without a valid head",
                        m, sentence.id
                    ))
                })?;
            dec_ids[m] = decision_id(tag_index, tags[m])?;
        }

        let mut log_prob = 0.0;
        for m in 1..n {
            let h = heads[m];
            let dir = direction(h, m);
            let head_valence = tree.head_valence[m];
            let child_valence = head_valence.min(cvalency - 1);
            let head_tag = tags[h] as usize;
            let child_tag = tags[m] as usize;
            let child_dec = dec_ids[m];

            counters.trans[[head_tag, child_tag, dir, child_valence]] += 1.0;
            log_prob += trans[[head_tag, child_tag, dir, child_valence]].ln();
            if let Some(samples) = &mut counters.samples {
                samples.rules.push(RuleSample {
                    head_tag: tags[h],
                    child_tag: tags[m],
                    direction: dir,
                    valence: child_valence,
                    sentence: sentence.id,
                    weight: 1.0,
                });
            }

            for d in [LEFT, RIGHT] {
                let v = tree.valence[m][d].min(dvalency - 1);
                counters.decision[[child_dec, d, v, STOP]] += 1.0;
                log_prob += decision[[child_dec, d, v, STOP]].ln();
                if let Some(samples) = &mut counters.samples {
                    samples.decisions.push(DecisionSample {
                        key: self.keying.key(tags[m], child_dec as u32),
                        direction: d,
                        valence: v,
                        outcome: STOP,
                        sentence: sentence.id,
                        weight: 1.0,
                    });
                }
            }

            if h > 0 {
                let head_dec = dec_ids[h];
                let v = head_valence.min(dvalency - 1);
                counters.decision[[head_dec, dir, v, CONTINUE]] += 1.0;
                log_prob += decision[[head_dec, dir, v, CONTINUE]].ln();
                if let Some(samples) = &mut counters.samples {
                    samples.decisions.push(DecisionSample {
                        key: self.keying.key(tags[h], head_dec as u32),
                        direction: dir,
                        valence: v,
                        outcome: CONTINUE,
                        sentence: sentence.id,
                        weight: 1.0,
                    });
                }
            }

            if let (Some(lex_counts), Some(lex), Some(word)) =
                (&mut counters.lex, params.lex(), sentence.words[m])
            {
                lex_counts[[child_tag, word as usize]] += 1.0;
                log_prob += lex[[child_tag, word as usize]].ln();
            }
        }
        Ok(Some(log_prob))
    }

    /// Expected counts from inside-outside; `None` if the sentence has no parse
    fn inside_outside(
        &self,
        tag_index: &TagIndex,
        params: &ParameterStore,
        sentence: &Sentence,
        tables: &ScoreTables,
        b: usize,
        counters: &mut Counters,
    ) -> io::Result<Option<f64>> {
        let scores = tables.sentence(b)?;
        let n = sentence.len();
        let spans = SpanIndex::new(n);
        let (inside, total) = self.parser.inside(&scores, &spans)?;
        if !total.is_finite() {
            return Ok(None);
        }
        let outside = self.parser.outside(&inside, &scores, &spans)?;

        let cvalency = params.cvalency();
        let dvalency = params.dvalency();
        let tags = &sentence.tags;

        for h in 0..n {
            for m in 1..n {
                if h == m {
                    continue;
                }
                let dir = direction(h, m);
                let id = if dir == LEFT {
                    spans.id(m, h, LEFT)
                } else {
                    spans.id(h, m, RIGHT)
                };
                let mut attach = [0.0; 2];
                let mut cont = [0.0; 2];
                for a in 0..2 {
                    let count =
                        (inside.incomplete[[id, a]] + outside.incomplete[[id, a]] - total).exp();
                    attach[a.min(cvalency - 1)] += count;
                    cont[a.min(dvalency - 1)] += count;
                }

                let head_tag = tags[h] as usize;
                let child_tag = tags[m] as usize;
                for v in 0..cvalency {
                    counters.trans[[head_tag, child_tag, dir, v]] += attach[v];
                    if let Some(samples) = &mut counters.samples {
                        samples.rules.push(RuleSample {
                            head_tag: tags[h],
                            child_tag: tags[m],
                            direction: dir,
                            valence: v,
                            sentence: sentence.id,
                            weight: attach[v],
                        });
                    }
                }

                if h > 0 {
                    let head_dec = decision_id(tag_index, tags[h])?;
                    for v in 0..dvalency {
                        counters.decision[[head_dec, dir, v, CONTINUE]] += cont[v];
                        if let Some(samples) = &mut counters.samples {
                            samples.decisions.push(DecisionSample {
                                key: self.keying.key(tags[h], head_dec as u32),
                                direction: dir,
                                valence: v,
                                outcome: CONTINUE,
                                sentence: sentence.id,
                                weight: cont[v],
                            });
                        }
                    }
                }
            }
        }

        for m in 1..n {
            let child_dec = decision_id(tag_index, tags[m])?;
            for d in [LEFT, RIGHT] {
                let id = spans.id(m, m, d);
                let mut stop = [0.0; 2];
                for bit in 0..2 {
                    let count =
                        (inside.complete[[id, bit]] + outside.complete[[id, bit]] - total).exp();
                    stop[bit.min(dvalency - 1)] += count;
                }
                for v in 0..dvalency {
                    counters.decision[[child_dec, d, v, STOP]] += stop[v];
                    if let Some(samples) = &mut counters.samples {
                        samples.decisions.push(DecisionSample {
                            key: self.keying.key(tags[m], child_dec as u32),
                            direction: d,
                            valence: v,
                            outcome: STOP,
                            sentence: sentence.id,
                            weight: stop[v],
                        });
                    }
                }
            }

            if let (Some(lex_counts), Some(word)) = (&mut counters.lex, sentence.words[m]) {
                lex_counts[[tags[m] as usize, word as usize]] += 1.0;
            }
        }

        Ok(Some(total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_keying() {
        assert_eq!(SampleKeying::Decision.key(3, 2), SampleKey::Decision(2));
        assert_eq!(SampleKeying::Tag.key(3, 2), SampleKey::Tag(3));
    }

    #[test]
    fn test_counters_merge_and_reset() {
        let params = ParameterStore::new(3, 2, 2, 1, Some(4));
        let mut a = Counters::new(&params, true);
        let mut b = Counters::new(&params, true);
        b.trans[[0, 1, RIGHT, 0]] = 2.0;
        b.decision[[1, LEFT, 0, STOP]] = 0.5;
        if let Some(lex) = &mut b.lex {
            lex[[1, 3]] = 1.0;
        }
        if let Some(samples) = &mut b.samples {
            samples.rules.push(RuleSample {
                head_tag: 0,
                child_tag: 1,
                direction: RIGHT,
                valence: 0,
                sentence: 0,
                weight: 1.0,
            });
        }
        a.merge(b.clone()).unwrap();
        a.merge(b).unwrap();
        assert_eq!(a.trans[[0, 1, RIGHT, 0]], 4.0);
        assert_eq!(a.decision[[1, LEFT, 0, STOP]], 1.0);
        assert_eq!(a.lex.as_ref().unwrap()[[1, 3]], 2.0);
        assert_eq!(a.samples.as_ref().unwrap().len(), 2);

        a.reset();
        assert_eq!(a.trans.sum(), 0.0);
        assert!(a.samples.as_ref().unwrap().is_empty());

        let other = Counters::new(&ParameterStore::new(2, 1, 1, 1, None), false);
        assert!(a.merge(other).is_err());
    }
}
