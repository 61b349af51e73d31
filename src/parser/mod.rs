//! Chart parsing collaborators consumed by the EM engine
//!
//! The engine only talks to a [`ChartParser`]: given the log-probability
//! tables of one sentence it asks for the best projective parse (Viterbi
//! mode) or for inside and outside charts (soft mode). [`EisnerParser`] is the
//! default implementation.

use std::io;

use ndarray::{Array2, ArrayView3, ArrayView4};

use crate::params::{CONTINUE, STOP};

mod eisner;
mod span;

pub use self::eisner::EisnerParser;
pub use self::span::{Span, SpanIndex};

/// Score tables of a single sentence
///
/// * `attach[head, child, valence]`
/// * `decision[position, direction, valence, outcome]`
///
/// Impossible events are `-inf`. Valence bits used by the parser are mapped
/// onto the tables with `min(bit, valency - 1)`.
#[derive(Debug, Clone, Copy)]
pub struct SentenceScores<'a> {
    pub attach: ArrayView3<'a, f64>,
    pub decision: ArrayView4<'a, f64>,
}

impl<'a> SentenceScores<'a> {
    pub fn new(attach: ArrayView3<'a, f64>, decision: ArrayView4<'a, f64>) -> io::Result<Self> {
        let scores = Self { attach, decision };
        scores.validate()?;
        Ok(scores)
    }

    fn validate(&self) -> io::Result<()> {
        let a = self.attach.shape();
        let d = self.decision.shape();
        if a[0] != a[1] || a[0] != d[0] || d[1] != 2 || d[3] != 2 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("inconsistent score tables {:?} and {:?}", a, d),
            ));
        }
        if a[2] == 0 || d[2] == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "score tables need at least one valence",
            ));
        }
        if a[0] < 2 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "sentence must contain at least one word",
            ));
        }
        Ok(())
    }

    /// Number of positions, ROOT included
    #[inline]
    pub fn len(&self) -> usize {
        self.attach.shape()[0]
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn cvalency(&self) -> usize {
        self.attach.shape()[2]
    }

    #[inline]
    pub fn dvalency(&self) -> usize {
        self.decision.shape()[2]
    }

    #[inline]
    pub fn attach(&self, head: usize, child: usize, bit: usize) -> f64 {
        self.attach[[head, child, bit.min(self.cvalency() - 1)]]
    }

    #[inline]
    pub fn stop(&self, position: usize, direction: usize, bit: usize) -> f64 {
        self.decision[[position, direction, bit.min(self.dvalency() - 1), STOP]]
    }

    #[inline]
    pub fn cont(&self, position: usize, direction: usize, bit: usize) -> f64 {
        self.decision[[position, direction, bit.min(self.dvalency() - 1), CONTINUE]]
    }
}

/// Best projective parse of a sentence
#[derive(Debug, Clone, PartialEq)]
pub struct ParseTree {
    /// Head position of every token; `None` for ROOT (and for every token
    /// when the sentence has no finite-score parse)
    pub heads: Vec<Option<usize>>,
    /// Whether the head already had a nearer child on the same side when
    /// this token was attached
    pub head_valence: Vec<usize>,
    /// Whether the token has children on its `[left, right]` side, i.e. the
    /// valence of its two stop decisions
    pub valence: Vec<[usize; 2]>,
    /// Log score of the parse, `-inf` when no parse exists
    pub score: f64,
}

impl ParseTree {
    pub(crate) fn empty(len: usize) -> Self {
        Self {
            heads: vec![None; len],
            head_valence: vec![0; len],
            valence: vec![[0, 0]; len],
            score: f64::NEG_INFINITY,
        }
    }

    /// Returns `true` if a finite-score parse was found
    pub fn is_valid(&self) -> bool {
        self.score.is_finite()
    }
}

/// Inside or outside chart of a sentence, in log space
///
/// Rows are [`SpanIndex`] ids, columns the two valence bits. For complete
/// spans the bit is the stop valence the head commits to in the span's
/// direction; for incomplete spans it is whether the head already had a
/// nearer child when attaching the span's other end.
#[derive(Debug, Clone, PartialEq)]
pub struct Chart {
    pub complete: Array2<f64>,
    pub incomplete: Array2<f64>,
}

impl Chart {
    pub fn new(num_spans: usize) -> Self {
        Self {
            complete: Array2::from_elem((num_spans, 2), f64::NEG_INFINITY),
            incomplete: Array2::from_elem((num_spans, 2), f64::NEG_INFINITY),
        }
    }
}

/// Dynamic-programming parser used by the expectation step
pub trait ChartParser {
    /// Best projective parse under the scores
    fn best_parse(&self, scores: &SentenceScores<'_>) -> io::Result<ParseTree>;

    /// Inside chart and total sentence log-probability
    fn inside(&self, scores: &SentenceScores<'_>, spans: &SpanIndex) -> io::Result<(Chart, f64)>;

    /// Outside chart matching an inside chart
    fn outside(
        &self,
        inside: &Chart,
        scores: &SentenceScores<'_>,
        spans: &SpanIndex,
    ) -> io::Result<Chart>;
}
