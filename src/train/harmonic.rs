use std::io;

use log::info;
use ndarray::{Array2, Array4, Axis, Zip};

use super::mstep::normalize;
use crate::corpus::Sentence;
use crate::params::{direction, ParameterStore, CONTINUE, RIGHT, STOP};
use crate::tag_index::TagIndex;

/// Bias applied to the first-child stop/continue evidence
const FIRST_CHILD_BIAS: f64 = 0.9;

/// Harmonic (Klein & Manning) initializer
///
/// Every word attaches to every other word of its sentence with a weight
/// inversely proportional to their distance, ROOT attaches uniformly. The
/// result depends only on the order of `sentences`.
#[derive(Debug, Clone)]
pub struct HarmonicInitializer<'a> {
    tag_index: &'a TagIndex,
    count_smoothing: f64,
}

impl<'a> HarmonicInitializer<'a> {
    pub fn new(tag_index: &'a TagIndex, count_smoothing: f64) -> Self {
        Self {
            tag_index,
            count_smoothing,
        }
    }

    /// Replace the attachment and decision tensors of `params` with the
    /// harmonic estimate over `sentences`
    pub fn initialize(&self, params: &mut ParameterStore, sentences: &[Sentence]) -> io::Result<()> {
        let num_tags = params.num_tags();
        let num_decision = params.num_decision();
        let cvalency = params.cvalency();
        let dvalency = params.dvalency();
        if num_tags != self.tag_index.len() || num_decision != self.tag_index.num_decision() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "parameter store does not match the tag index",
            ));
        }
        let root = self.tag_index.root() as usize;

        let mut trans = Array4::<f64>::zeros((num_tags, num_tags, 2, cvalency));
        let mut decision = Array4::<f64>::zeros((num_decision, 2, dvalency, 2));
        let mut norm_counter = Array4::<f64>::zeros((num_decision, 2, dvalency, 2));

        for sentence in sentences {
            sentence.validate(self.tag_index)?;
            let tags = &sentence.tags;
            let n = sentence.num_words();
            let word_num = n as f64;

            for &tag in &tags[1..] {
                for v in 0..cvalency {
                    trans[[root, tag as usize, RIGHT, v]] += 1.0 / word_num;
                }
            }

            // Attachment pressure per head position and direction
            let mut change = Array2::<f64>::zeros((n + 1, 2));
            for j in 1..=n {
                let child_sum: f64 = (1..=n)
                    .filter(|&i| i != j)
                    .map(|i| 1.0 / i.abs_diff(j) as f64)
                    .sum();
                let scale = if child_sum > 0.0 {
                    (word_num - 1.0) / word_num * (1.0 / child_sum)
                } else {
                    0.0
                };
                for i in (1..=n).filter(|&i| i != j) {
                    let dir = direction(i, j);
                    let weight = scale / i.abs_diff(j) as f64;
                    for v in 0..cvalency {
                        trans[[tags[i] as usize, tags[j] as usize, dir, v]] += weight;
                    }
                    change[[i, dir]] += weight;
                }
            }
            self.seed_decision(sentence, &change, &mut decision, &mut norm_counter);
        }

        trans += self.count_smoothing;
        decision += self.count_smoothing;
        let es = first_child_update(&decision, &norm_counter);
        let pr_first_kid = FIRST_CHILD_BIAS * es;
        Zip::from(&mut decision)
            .and(&norm_counter)
            .for_each(|d, &n| *d += n * pr_first_kid);

        trans.index_axis_mut(Axis(1), root).fill(0.0);
        normalize(&mut trans, Axis(1), "attachment")?;
        normalize(&mut decision, Axis(3), "decision")?;

        params.set_trans(trans)?;
        params.set_decision(decision)?;
        info!(
            "harmonic initialization over {} sentences (first child bias {:.4})",
            sentences.len(),
            pr_first_kid
        );
        Ok(())
    }

    fn seed_decision(
        &self,
        sentence: &Sentence,
        change: &Array2<f64>,
        decision: &mut Array4<f64>,
        norm_counter: &mut Array4<f64>,
    ) {
        let high = 1.min(decision.shape()[2] - 1);
        for i in 1..sentence.len() {
            let Some(pos) = self.tag_index.to_decision(sentence.tags[i]) else {
                continue;
            };
            let pos = pos as usize;
            for dir in 0..2 {
                let pressure = change[[i, dir]];
                if pressure > 0.0 {
                    norm_counter[[pos, dir, 0, CONTINUE]] += 1.0;
                    norm_counter[[pos, dir, high, CONTINUE]] -= 1.0;
                    decision[[pos, dir, high, CONTINUE]] += pressure;

                    norm_counter[[pos, dir, 0, STOP]] -= 1.0;
                    norm_counter[[pos, dir, high, STOP]] += 1.0;
                }
                decision[[pos, dir, 0, STOP]] += 1.0;
            }
        }
    }
}

/// Largest factor (at most 1) by which `norm_counter` can be added to
/// `decision` without driving a positive entry negative
fn first_child_update(decision: &Array4<f64>, norm_counter: &Array4<f64>) -> f64 {
    let mut es = 1.0;
    Zip::from(decision).and(norm_counter).for_each(|&p, &n| {
        if p > 0.0 && n < 0.0 {
            let ratio = -p / n;
            if es > ratio {
                es = ratio;
            }
        }
    });
    es
}
