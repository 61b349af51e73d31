use std::io;

use log::info;
use ndarray::{s, Array, Array1, Axis, RemoveAxis};

use super::estep::Counters;
use super::options::DmvOptions;
use super::prior::{ModeFinder, ModifiedDirichlet};
use crate::params::ParameterStore;
use crate::tag_index::TagIndex;

/// Normalize `counts` in place so that every slice along `axis` sums to one.
///
/// A zero or non-finite normalizer means the counters are malformed.
pub(crate) fn normalize<D: RemoveAxis>(
    counts: &mut Array<f64, D>,
    axis: Axis,
    what: &str,
) -> io::Result<()> {
    let sums = counts.sum_axis(axis);
    if sums.iter().any(|&s| !(s > 0.0) || !s.is_finite()) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("zero normalizer in {} counts", what),
        ));
    }
    *counts /= &sums.insert_axis(axis);
    Ok(())
}

/// Re-estimates the parameter tensors from accumulated counts
#[derive(Debug, Clone)]
pub struct MaximizationEngine<M = ModifiedDirichlet> {
    finder: M,
    param_smoothing: f64,
    prior_alpha: f64,
    prior_epsilon: f64,
    lex_prior_alpha: f64,
    lex_epsilon: f64,
}

impl MaximizationEngine<ModifiedDirichlet> {
    pub fn new(options: &DmvOptions) -> Self {
        Self::with_mode_finder(ModifiedDirichlet::new(), options)
    }
}

impl<M: ModeFinder> MaximizationEngine<M> {
    pub fn with_mode_finder(finder: M, options: &DmvOptions) -> Self {
        Self {
            finder,
            param_smoothing: options.param_smoothing(),
            prior_alpha: options.prior_alpha(),
            prior_epsilon: options.prior_epsilon(),
            lex_prior_alpha: options.lex_prior_alpha(),
            lex_epsilon: options.lex_epsilon(),
        }
    }

    /// Replace the tensors of `params` with smoothed, normalized counts.
    ///
    /// Counts of ROOT as a child are dropped. Clears the initial flag.
    pub fn maximize(
        &self,
        tag_index: &TagIndex,
        params: &mut ParameterStore,
        counters: &Counters,
    ) -> io::Result<()> {
        counters.check_shapes(params)?;
        let smoothing = self.param_smoothing;

        let mut trans = &counters.trans + smoothing;
        trans
            .index_axis_mut(Axis(1), tag_index.root() as usize)
            .fill(0.0);
        normalize(&mut trans, Axis(1), "attachment")?;

        let mut decision = &counters.decision + smoothing;
        normalize(&mut decision, Axis(3), "decision")?;

        let lex = match &counters.lex {
            Some(lex_counts) => {
                let mut lex = lex_counts + smoothing;
                normalize(&mut lex, Axis(1), "lexical")?;
                Some(lex)
            }
            None => None,
        };

        params.set_trans(trans)?;
        params.set_decision(decision)?;
        if let Some(lex) = lex {
            params.set_lex(lex)?;
        }
        params.set_initial(false);
        info!(
            "m-step: {:.3} attachment and {:.3} decision counts",
            counters.trans.sum(),
            counters.decision.sum()
        );
        Ok(())
    }

    /// Replace attachment (and lexical) counts with their posterior mode
    /// under the Dirichlet prior anchored at the first counts seen.
    ///
    /// The lexical prior is applied only when `lex_prior_alpha > 0`.
    pub fn apply_prior(&self, params: &ParameterStore, counters: &mut Counters) -> io::Result<()> {
        counters.check_shapes(params)?;

        let trans_alpha = match params.trans_alpha() {
            Some(alpha) => alpha,
            None => {
                let mean = counters.trans.mean_axis(Axis(1)).ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidData, "empty attachment counts")
                })?;
                params.trans_alpha_or_init(|| mean * -self.prior_alpha)
            }
        };

        let (num_tags, _, _, cvalency) = counters.trans.dim();
        for h in 0..num_tags {
            for dir in 0..2 {
                for c in 0..cvalency {
                    let alpha = trans_alpha[[h, dir, c]];
                    let perturbed: Vec<f64> = counters
                        .trans
                        .slice(s![h, .., dir, c])
                        .iter()
                        .map(|&count| count + alpha)
                        .collect();
                    let mode = self.finder.mode(num_tags, &perturbed, self.prior_epsilon)?;
                    counters
                        .trans
                        .slice_mut(s![h, .., dir, c])
                        .assign(&Array1::from(mode));
                }
            }
        }

        if self.lex_prior_alpha > 0.0 {
            if let Some(lex_counts) = &mut counters.lex {
                let lex_alpha = match params.lex_alpha() {
                    Some(alpha) => alpha,
                    None => {
                        let mean = lex_counts.mean_axis(Axis(1)).ok_or_else(|| {
                            io::Error::new(io::ErrorKind::InvalidData, "empty lexical counts")
                        })?;
                        params.lex_alpha_or_init(|| mean * -self.lex_prior_alpha)
                    }
                };
                let vocab_size = lex_counts.shape()[1];
                for p in 0..lex_counts.shape()[0] {
                    let alpha = lex_alpha[p];
                    let perturbed: Vec<f64> =
                        lex_counts.row(p).iter().map(|&count| count + alpha).collect();
                    let mode = self.finder.mode(vocab_size, &perturbed, self.lex_epsilon)?;
                    lex_counts.row_mut(p).assign(&Array1::from(mode));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{CONTINUE, LEFT, RIGHT, STOP};
    use ndarray::Array2;

    fn setup(cv: usize, dv: usize, vocab: Option<usize>) -> (TagIndex, ParameterStore) {
        let index = TagIndex::with_root(["A", "B"]).unwrap();
        let params = ParameterStore::new(index.len(), index.num_decision(), cv, dv, vocab);
        (index, params)
    }

    #[test]
    fn test_normalize() {
        let mut counts = Array2::from_shape_vec((2, 2), vec![1.0, 3.0, 2.0, 2.0]).unwrap();
        normalize(&mut counts, Axis(1), "test").unwrap();
        assert_eq!(counts[[0, 1]], 0.75);
        assert_eq!(counts[[1, 0]], 0.5);

        let mut zero = Array2::<f64>::zeros((2, 2));
        let err = normalize(&mut zero, Axis(0), "test").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_maximize() {
        let (index, mut params) = setup(1, 2, Some(3));
        let mut counters = Counters::new(&params, false);
        counters.trans[[1, 2, RIGHT, 0]] = 3.0;
        counters.trans[[1, 0, RIGHT, 0]] = 5.0;
        counters.decision[[0, LEFT, 0, STOP]] = 4.0;
        if let Some(lex) = &mut counters.lex {
            lex[[1, 2]] = 1.0;
        }

        let mut options = DmvOptions::default();
        options.set_param_smoothing(1.0).unwrap();
        MaximizationEngine::new(&options)
            .maximize(&index, &mut params, &counters)
            .unwrap();

        assert!(!params.is_initial());
        assert!(params.is_normalized(index.root(), 1e-12));
        let trans = params.trans();
        assert_eq!(trans[[1, 0, RIGHT, 0]], 0.0);
        assert!((trans[[1, 2, RIGHT, 0]] - 0.8).abs() < 1e-12);
        let decision = params.decision();
        assert!((decision[[0, LEFT, 0, STOP]] - 5.0 / 6.0).abs() < 1e-12);
        assert!((decision[[0, LEFT, 0, CONTINUE]] - 1.0 / 6.0).abs() < 1e-12);
        let lex = params.lex().unwrap();
        assert!((lex[[1, 2]] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_maximize_is_idempotent_on_normalized_counts() {
        let (index, mut params) = setup(2, 2, None);
        let mut counters = Counters::new(&params, false);
        for h in 0..3 {
            for d in 0..2 {
                for v in 0..2 {
                    counters.trans[[h, 1, d, v]] = 0.25;
                    counters.trans[[h, 2, d, v]] = 0.75;
                }
            }
        }
        counters.decision.fill(0.5);

        let mut options = DmvOptions::default();
        options.set_param_smoothing(0.0).unwrap();
        MaximizationEngine::new(&options)
            .maximize(&index, &mut params, &counters)
            .unwrap();
        assert_eq!(params.trans(), &counters.trans);
        assert_eq!(params.decision(), &counters.decision);
    }

    #[test]
    fn test_zero_normalizer_is_fatal() {
        let (index, mut params) = setup(1, 1, None);
        let counters = Counters::new(&params, false);
        let mut options = DmvOptions::default();
        options.set_param_smoothing(0.0).unwrap();
        let err = MaximizationEngine::new(&options)
            .maximize(&index, &mut params, &counters)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(params.is_initial());
    }

    #[test]
    fn test_apply_prior_keeps_proportional_counts() {
        let (_, params) = setup(1, 1, None);
        let mut counters = Counters::new(&params, false);
        for h in 0..3 {
            for d in 0..2 {
                counters.trans[[h, 0, d, 0]] = 0.0;
                counters.trans[[h, 1, d, 0]] = 6.0;
                counters.trans[[h, 2, d, 0]] = 3.0;
            }
        }
        let mut options = DmvOptions::default();
        options.set_prior_alpha(0.0).unwrap();
        options.set_prior_epsilon(0.01).unwrap();
        let engine = MaximizationEngine::new(&options);
        engine.apply_prior(&params, &mut counters).unwrap();

        let alpha = params.trans_alpha().unwrap();
        assert_eq!(alpha.shape(), &[3, 2, 1]);
        let mass = 9.0;
        assert!((counters.trans[[1, 1, RIGHT, 0]] - 0.99 * 6.0).abs() < 1e-3);
        assert!((counters.trans[[1, 0, RIGHT, 0]] - 0.01 * mass).abs() < 1e-3);
        let slice_sum: f64 = counters.trans.slice(s![2, .., LEFT, 0]).sum();
        assert!((slice_sum - mass).abs() < 1e-6);
    }
}
