use std::collections::HashMap;
use std::io;

use ndarray::{Array1, Array2, Array3, Array4, Axis, Zip};
use once_cell::unsync::OnceCell;

/// Direction index of a child preceding its head
pub const LEFT: usize = 0;
/// Direction index of a child following its head
pub const RIGHT: usize = 1;
/// Decision outcome index for "stop attaching"
pub const STOP: usize = 0;
/// Decision outcome index for "attach another child"
pub const CONTINUE: usize = 1;

/// Direction of the attachment `head -> child` by sentence position
#[inline]
pub fn direction(head: usize, child: usize) -> usize {
    if child < head {
        LEFT
    } else {
        RIGHT
    }
}

/// Attachment and decision tensors of a single sentence
#[derive(Debug, Clone, PartialEq)]
pub struct SentenceParams {
    pub trans: Array4<f64>,
    pub decision: Array4<f64>,
}

/// Holds the DMV multinomials and everything derived from them
///
/// * `trans[head_tag, child_tag, direction, child_valence]`
/// * `decision[decision_tag, direction, valence, outcome]`
/// * `lex[tag, word]` when lexical modeling is enabled
///
/// The M-step replaces tensors wholesale through the `set_*` methods; they are
/// never updated in place while an E-step could observe them.
#[derive(Debug, Clone)]
pub struct ParameterStore {
    trans: Array4<f64>,
    decision: Array4<f64>,
    lex: Option<Array2<f64>>,
    sentence: HashMap<usize, SentenceParams>,
    /// Dirichlet anchor for attachments, `[head_tag, direction, child_valence]`
    trans_alpha: OnceCell<Array3<f64>>,
    /// Dirichlet anchor for the lexicon, `[tag]`
    lex_alpha: OnceCell<Array1<f64>>,
    initial: bool,
}

impl ParameterStore {
    /// Create zero-filled tensors.
    ///
    /// `vocab_size` enables the lexical tensor, which starts uniform.
    pub fn new(
        num_tags: usize,
        num_decision: usize,
        cvalency: usize,
        dvalency: usize,
        vocab_size: Option<usize>,
    ) -> Self {
        let lex = vocab_size.map(|v| {
            let fill = if v > 0 { 1.0 / v as f64 } else { 0.0 };
            Array2::from_elem((num_tags, v), fill)
        });
        Self {
            trans: Array4::zeros((num_tags, num_tags, 2, cvalency)),
            decision: Array4::zeros((num_decision, 2, dvalency, 2)),
            lex,
            sentence: HashMap::new(),
            trans_alpha: OnceCell::new(),
            lex_alpha: OnceCell::new(),
            initial: true,
        }
    }

    pub fn num_tags(&self) -> usize {
        self.trans.shape()[0]
    }

    pub fn num_decision(&self) -> usize {
        self.decision.shape()[0]
    }

    pub fn cvalency(&self) -> usize {
        self.trans.shape()[3]
    }

    pub fn dvalency(&self) -> usize {
        self.decision.shape()[2]
    }

    pub fn trans(&self) -> &Array4<f64> {
        &self.trans
    }

    pub fn decision(&self) -> &Array4<f64> {
        &self.decision
    }

    pub fn lex(&self) -> Option<&Array2<f64>> {
        self.lex.as_ref()
    }

    /// Replace the attachment tensor
    pub fn set_trans(&mut self, trans: Array4<f64>) -> io::Result<()> {
        check_shape("trans", trans.shape(), self.trans.shape())?;
        self.trans = trans;
        Ok(())
    }

    /// Replace the decision tensor
    pub fn set_decision(&mut self, decision: Array4<f64>) -> io::Result<()> {
        check_shape("decision", decision.shape(), self.decision.shape())?;
        self.decision = decision;
        Ok(())
    }

    /// Replace the lexical tensor; fails if lexical modeling is disabled
    pub fn set_lex(&mut self, lex: Array2<f64>) -> io::Result<()> {
        match &mut self.lex {
            Some(current) => {
                check_shape("lex", lex.shape(), current.shape())?;
                *current = lex;
                Ok(())
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "lexical modeling is disabled",
            )),
        }
    }

    /// `true` until the first M-step has replaced the initial tensors
    pub fn is_initial(&self) -> bool {
        self.initial
    }

    pub fn set_initial(&mut self, initial: bool) {
        self.initial = initial;
    }

    /// Per-sentence variant, if one has been stored
    pub fn sentence_params(&self, sentence_id: usize) -> Option<&SentenceParams> {
        self.sentence.get(&sentence_id)
    }

    /// Store (or overwrite) the variant of one sentence
    pub fn set_sentence_params(
        &mut self,
        sentence_id: usize,
        trans: Array4<f64>,
        decision: Array4<f64>,
    ) -> io::Result<()> {
        check_shape("sentence trans", trans.shape(), self.trans.shape())?;
        check_shape("sentence decision", decision.shape(), self.decision.shape())?;
        self.sentence
            .insert(sentence_id, SentenceParams { trans, decision });
        Ok(())
    }

    /// Store `weight * given + (1 - weight) * global` as the variant of one sentence
    pub fn blend_sentence_params(
        &mut self,
        sentence_id: usize,
        trans: &Array4<f64>,
        decision: &Array4<f64>,
        weight: f64,
    ) -> io::Result<()> {
        if !(0.0..=1.0).contains(&weight) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "blend weight must be within [0, 1]",
            ));
        }
        check_shape("sentence trans", trans.shape(), self.trans.shape())?;
        check_shape("sentence decision", decision.shape(), self.decision.shape())?;
        let mut blended_trans = self.trans.clone();
        Zip::from(&mut blended_trans)
            .and(trans)
            .for_each(|g, &s| *g = weight * s + (1.0 - weight) * *g);
        let mut blended_decision = self.decision.clone();
        Zip::from(&mut blended_decision)
            .and(decision)
            .for_each(|g, &s| *g = weight * s + (1.0 - weight) * *g);
        self.sentence.insert(
            sentence_id,
            SentenceParams {
                trans: blended_trans,
                decision: blended_decision,
            },
        );
        Ok(())
    }

    pub fn num_sentence_params(&self) -> usize {
        self.sentence.len()
    }

    pub fn clear_sentence_params(&mut self) {
        self.sentence.clear();
    }

    /// Attachment prior anchor, once computed
    pub fn trans_alpha(&self) -> Option<&Array3<f64>> {
        self.trans_alpha.get()
    }

    /// Lexical prior anchor, once computed
    pub fn lex_alpha(&self) -> Option<&Array1<f64>> {
        self.lex_alpha.get()
    }

    pub(crate) fn trans_alpha_or_init<F>(&self, init: F) -> &Array3<f64>
    where
        F: FnOnce() -> Array3<f64>,
    {
        self.trans_alpha.get_or_init(init)
    }

    pub(crate) fn lex_alpha_or_init<F>(&self, init: F) -> &Array1<f64>
    where
        F: FnOnce() -> Array1<f64>,
    {
        self.lex_alpha.get_or_init(init)
    }

    /// Check both distribution invariants within `tol`: attachments sum to one
    /// over children with ROOT never a child, and stop + continue sum to one.
    pub fn is_normalized(&self, root: u32, tol: f64) -> bool {
        let root = root as usize;
        if self
            .trans
            .index_axis(Axis(1), root)
            .iter()
            .any(|&p| p != 0.0)
        {
            return false;
        }
        let trans_ok = self
            .trans
            .sum_axis(Axis(1))
            .iter()
            .all(|&s| (s - 1.0).abs() < tol);
        let decision_ok = self
            .decision
            .sum_axis(Axis(3))
            .iter()
            .all(|&s| (s - 1.0).abs() < tol);
        trans_ok && decision_ok
    }
}

fn check_shape(name: &str, got: &[usize], expected: &[usize]) -> io::Result<()> {
    if got != expected {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "{} tensor has shape {:?}, expected {:?}",
                name, got, expected
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_shapes() {
        let store = ParameterStore::new(4, 3, 2, 1, Some(10));
        assert_eq!(store.trans().shape(), &[4, 4, 2, 2]);
        assert_eq!(store.decision().shape(), &[3, 2, 1, 2]);
        let lex = store.lex().unwrap();
        assert_eq!(lex.shape(), &[4, 10]);
        assert!((lex.sum_axis(Axis(1))[1] - 1.0).abs() < 1e-12);
        assert!(store.is_initial());
    }

    #[test]
    fn test_set_rejects_wrong_shape() {
        let mut store = ParameterStore::new(3, 2, 1, 1, None);
        assert!(store.set_trans(Array4::zeros((3, 3, 2, 2))).is_err());
        assert!(store.set_trans(Array4::zeros((3, 3, 2, 1))).is_ok());
        assert!(store.set_lex(Array2::zeros((3, 4))).is_err());
    }

    #[test]
    fn test_blend_sentence_params() {
        let mut store = ParameterStore::new(2, 1, 1, 1, None);
        store.set_trans(Array4::from_elem((2, 2, 2, 1), 1.0)).unwrap();
        let trans = Array4::from_elem((2, 2, 2, 1), 3.0);
        let decision = Array4::from_elem((1, 2, 1, 2), 0.5);
        store.blend_sentence_params(7, &trans, &decision, 0.25).unwrap();

        let variant = store.sentence_params(7).unwrap();
        assert!((variant.trans[[0, 1, 1, 0]] - 1.5).abs() < 1e-12);
        assert!((variant.decision[[0, 0, 0, 0]] - 0.125).abs() < 1e-12);
        assert!(store.sentence_params(8).is_none());
        assert!(store
            .blend_sentence_params(7, &trans, &decision, 1.5)
            .is_err());
    }

    #[test]
    fn test_prior_anchor_is_set_once() {
        let store = ParameterStore::new(2, 1, 1, 1, None);
        assert!(store.trans_alpha().is_none());
        let first = store.trans_alpha_or_init(|| Array3::from_elem((2, 2, 1), -1.0))[[0, 0, 0]];
        let second = store.trans_alpha_or_init(|| Array3::from_elem((2, 2, 1), -9.0))[[0, 0, 0]];
        assert_eq!(first, -1.0);
        assert_eq!(second, -1.0);
    }

    #[test]
    fn test_direction() {
        assert_eq!(direction(3, 1), LEFT);
        assert_eq!(direction(1, 3), RIGHT);
        assert_eq!(direction(0, 2), RIGHT);
    }
}
