use std::io;

use ndarray::Array2;

use super::{Chart, ChartParser, ParseTree, SentenceScores, SpanIndex};
use crate::params::{LEFT, RIGHT};

const NEG_INF: f64 = f64::NEG_INFINITY;

/// Log-sum-exp of two values.
///
/// Returns the other operand when one of them is NEG_INFINITY.
#[inline]
pub(crate) fn log_add(a: f64, b: f64) -> f64 {
    if a == NEG_INF {
        return b;
    }
    if b == NEG_INF {
        return a;
    }
    let (hi, lo) = if a > b { (a, b) } else { (b, a) };
    hi + (lo - hi).exp().ln_1p()
}

#[inline]
fn bit(cond: bool) -> usize {
    cond as usize
}

/// First-order projective parser for DMV with valence (Eisner's algorithm)
///
/// Complete spans are split-head: the stop decision of a head is charged in
/// the trivial span `(h, h)` with the valence the head commits to, so the
/// chart never needs to know how many children a head ends up with. ROOT
/// attaches exactly one child.
#[derive(Debug, Clone, Copy, Default)]
pub struct EisnerParser;

impl EisnerParser {
    pub fn new() -> Self {
        Self
    }
}

fn check_spans(spans: &SpanIndex, len: usize) -> io::Result<()> {
    if spans.sentence_len() != len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "span index built for length {}, sentence has length {}",
                spans.sentence_len(),
                len
            ),
        ));
    }
    Ok(())
}

/// Backpointer of a complete span: the child position and its attachment bit
#[derive(Debug, Clone, Copy, Default)]
struct Back {
    split: usize,
    bit: usize,
}

/// Max-product chart with backpointers
struct ViterbiChart<'s> {
    spans: &'s SpanIndex,
    complete: Array2<f64>,
    incomplete: Array2<f64>,
    complete_back: Vec<Back>,
    incomplete_back: Vec<usize>,
}

impl<'s> ViterbiChart<'s> {
    fn fill(scores: &SentenceScores<'_>, spans: &'s SpanIndex) -> Self {
        let n = scores.len();
        let mut chart = Self {
            spans,
            complete: Array2::from_elem((spans.len(), 2), NEG_INF),
            incomplete: Array2::from_elem((spans.len(), 2), NEG_INF),
            complete_back: vec![Back::default(); spans.len() * 2],
            incomplete_back: vec![0; spans.len() * 2],
        };
        let cc = &mut chart.complete;
        let ic = &mut chart.incomplete;

        for i in 1..n {
            for d in 0..2 {
                for b in 0..2 {
                    cc[[spans.id(i, i, d), b]] = scores.stop(i, d, b);
                }
            }
        }
        cc[[spans.id(0, 0, RIGHT), 0]] = 0.0;

        for width in 1..n {
            for i in 0..n - width {
                let j = i + width;
                let right = spans.id(i, j, RIGHT);
                let left = spans.id(i, j, LEFT);

                if i == 0 {
                    ic[[right, 0]] =
                        scores.attach(0, j, 0) + cc[[spans.id(1, j, LEFT), bit(1 < j)]];
                    if j == n - 1 {
                        let mut best = NEG_INF;
                        let mut back = Back::default();
                        for k in 1..=j {
                            let s = ic[[spans.id(0, k, RIGHT), 0]]
                                + cc[[spans.id(k, j, RIGHT), bit(k < j)]];
                            if s > best {
                                best = s;
                                back = Back { split: k, bit: 0 };
                            }
                        }
                        cc[[right, 1]] = best;
                        chart.complete_back[right * 2 + 1] = back;
                    }
                    continue;
                }

                for a in 0..2 {
                    let mut best = NEG_INF;
                    let mut split = i;
                    for r in i..j {
                        if bit(r > i) != a {
                            continue;
                        }
                        let s = cc[[spans.id(i, r, RIGHT), 1]]
                            + cc[[spans.id(r + 1, j, LEFT), bit(r + 1 < j)]];
                        if s > best {
                            best = s;
                            split = r;
                        }
                    }
                    ic[[right, a]] = best + scores.attach(i, j, a) + scores.cont(i, RIGHT, a);
                    chart.incomplete_back[right * 2 + a] = split;

                    let mut best = NEG_INF;
                    let mut split = i;
                    for r in i..j {
                        if bit(r + 1 < j) != a {
                            continue;
                        }
                        let s = cc[[spans.id(i, r, RIGHT), bit(r > i)]]
                            + cc[[spans.id(r + 1, j, LEFT), 1]];
                        if s > best {
                            best = s;
                            split = r;
                        }
                    }
                    ic[[left, a]] = best + scores.attach(j, i, a) + scores.cont(j, LEFT, a);
                    chart.incomplete_back[left * 2 + a] = split;
                }

                let mut best = NEG_INF;
                let mut back = Back::default();
                for k in i + 1..=j {
                    for a in 0..2 {
                        let s = ic[[spans.id(i, k, RIGHT), a]]
                            + cc[[spans.id(k, j, RIGHT), bit(k < j)]];
                        if s > best {
                            best = s;
                            back = Back { split: k, bit: a };
                        }
                    }
                }
                cc[[right, 1]] = best;
                chart.complete_back[right * 2 + 1] = back;

                let mut best = NEG_INF;
                let mut back = Back::default();
                for k in i..j {
                    for a in 0..2 {
                        let s = cc[[spans.id(i, k, LEFT), bit(i < k)]]
                            + ic[[spans.id(k, j, LEFT), a]];
                        if s > best {
                            best = s;
                            back = Back { split: k, bit: a };
                        }
                    }
                }
                cc[[left, 1]] = best;
                chart.complete_back[left * 2 + 1] = back;
            }
        }
        chart
    }

    fn trace_complete(&self, i: usize, j: usize, d: usize, b: usize, tree: &mut ParseTree) {
        if i == j {
            tree.valence[i][d] = b;
            return;
        }
        let back = self.complete_back[self.spans.id(i, j, d) * 2 + 1];
        let k = back.split;
        if d == RIGHT {
            tree.heads[k] = Some(i);
            tree.head_valence[k] = back.bit;
            self.trace_incomplete(i, k, RIGHT, back.bit, tree);
            self.trace_complete(k, j, RIGHT, bit(k < j), tree);
        } else {
            tree.heads[k] = Some(j);
            tree.head_valence[k] = back.bit;
            self.trace_complete(i, k, LEFT, bit(i < k), tree);
            self.trace_incomplete(k, j, LEFT, back.bit, tree);
        }
    }

    fn trace_incomplete(&self, i: usize, j: usize, d: usize, a: usize, tree: &mut ParseTree) {
        if i == 0 {
            self.trace_complete(1, j, LEFT, bit(1 < j), tree);
            return;
        }
        let r = self.incomplete_back[self.spans.id(i, j, d) * 2 + a];
        if d == RIGHT {
            self.trace_complete(i, r, RIGHT, 1, tree);
            self.trace_complete(r + 1, j, LEFT, bit(r + 1 < j), tree);
        } else {
            self.trace_complete(i, r, RIGHT, bit(r > i), tree);
            self.trace_complete(r + 1, j, LEFT, 1, tree);
        }
    }
}

impl ChartParser for EisnerParser {
    fn best_parse(&self, scores: &SentenceScores<'_>) -> io::Result<ParseTree> {
        let n = scores.len();
        let spans = SpanIndex::new(n);
        let chart = ViterbiChart::fill(scores, &spans);
        let score = chart.complete[[spans.id(0, n - 1, RIGHT), 1]];

        let mut tree = ParseTree::empty(n);
        if score == NEG_INF {
            return Ok(tree);
        }
        tree.score = score;
        chart.trace_complete(0, n - 1, RIGHT, 1, &mut tree);
        Ok(tree)
    }

    fn inside(&self, scores: &SentenceScores<'_>, spans: &SpanIndex) -> io::Result<(Chart, f64)> {
        let n = scores.len();
        check_spans(spans, n)?;
        let mut chart = Chart::new(spans.len());
        let Chart {
            complete: cc,
            incomplete: ic,
        } = &mut chart;

        for i in 1..n {
            for d in 0..2 {
                for b in 0..2 {
                    cc[[spans.id(i, i, d), b]] = scores.stop(i, d, b);
                }
            }
        }
        cc[[spans.id(0, 0, RIGHT), 0]] = 0.0;

        for width in 1..n {
            for i in 0..n - width {
                let j = i + width;
                let right = spans.id(i, j, RIGHT);
                let left = spans.id(i, j, LEFT);

                if i == 0 {
                    ic[[right, 0]] =
                        scores.attach(0, j, 0) + cc[[spans.id(1, j, LEFT), bit(1 < j)]];
                    if j == n - 1 {
                        let mut acc = NEG_INF;
                        for k in 1..=j {
                            acc = log_add(
                                acc,
                                ic[[spans.id(0, k, RIGHT), 0]]
                                    + cc[[spans.id(k, j, RIGHT), bit(k < j)]],
                            );
                        }
                        cc[[right, 1]] = acc;
                    }
                    continue;
                }

                for a in 0..2 {
                    let mut acc = NEG_INF;
                    for r in i..j {
                        if bit(r > i) != a {
                            continue;
                        }
                        acc = log_add(
                            acc,
                            cc[[spans.id(i, r, RIGHT), 1]]
                                + cc[[spans.id(r + 1, j, LEFT), bit(r + 1 < j)]],
                        );
                    }
                    ic[[right, a]] = acc + scores.attach(i, j, a) + scores.cont(i, RIGHT, a);

                    let mut acc = NEG_INF;
                    for r in i..j {
                        if bit(r + 1 < j) != a {
                            continue;
                        }
                        acc = log_add(
                            acc,
                            cc[[spans.id(i, r, RIGHT), bit(r > i)]]
                                + cc[[spans.id(r + 1, j, LEFT), 1]],
                        );
                    }
                    ic[[left, a]] = acc + scores.attach(j, i, a) + scores.cont(j, LEFT, a);
                }

                let mut acc = NEG_INF;
                for k in i + 1..=j {
                    for a in 0..2 {
                        acc = log_add(
                            acc,
                            ic[[spans.id(i, k, RIGHT), a]]
                                + cc[[spans.id(k, j, RIGHT), bit(k < j)]],
                        );
                    }
                }
                cc[[right, 1]] = acc;

                let mut acc = NEG_INF;
                for k in i..j {
                    for a in 0..2 {
                        acc = log_add(
                            acc,
                            cc[[spans.id(i, k, LEFT), bit(i < k)]] + ic[[spans.id(k, j, LEFT), a]],
                        );
                    }
                }
                cc[[left, 1]] = acc;
            }
        }

        let total = cc[[spans.id(0, n - 1, RIGHT), 1]];
        Ok((chart, total))
    }

    fn outside(
        &self,
        inside: &Chart,
        scores: &SentenceScores<'_>,
        spans: &SpanIndex,
    ) -> io::Result<Chart> {
        let n = scores.len();
        check_spans(spans, n)?;
        if inside.complete.shape() != [spans.len(), 2]
            || inside.incomplete.shape() != [spans.len(), 2]
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "inside chart does not match the span index",
            ));
        }
        let cc = &inside.complete;
        let ic = &inside.incomplete;

        let mut chart = Chart::new(spans.len());
        let Chart {
            complete: oc,
            incomplete: oi,
        } = &mut chart;
        oc[[spans.id(0, n - 1, RIGHT), 1]] = 0.0;

        for width in (1..n).rev() {
            for i in 0..n - width {
                let j = i + width;

                if i == 0 {
                    if j == n - 1 {
                        let t = oc[[spans.id(0, j, RIGHT), 1]];
                        for k in 1..=j {
                            let inc = spans.id(0, k, RIGHT);
                            let rest = spans.id(k, j, RIGHT);
                            let rb = bit(k < j);
                            oi[[inc, 0]] = log_add(oi[[inc, 0]], t + cc[[rest, rb]]);
                            oc[[rest, rb]] = log_add(oc[[rest, rb]], t + ic[[inc, 0]]);
                        }
                    }
                    let t = oi[[spans.id(0, j, RIGHT), 0]];
                    let child = spans.id(1, j, LEFT);
                    let cb = bit(1 < j);
                    oc[[child, cb]] = log_add(oc[[child, cb]], t + scores.attach(0, j, 0));
                    continue;
                }

                // Complete spans first: they feed incomplete spans of equal width.
                let t = oc[[spans.id(i, j, RIGHT), 1]];
                if t > NEG_INF {
                    for k in i + 1..=j {
                        let rest = spans.id(k, j, RIGHT);
                        let rb = bit(k < j);
                        let inc = spans.id(i, k, RIGHT);
                        for a in 0..2 {
                            oi[[inc, a]] = log_add(oi[[inc, a]], t + cc[[rest, rb]]);
                            oc[[rest, rb]] = log_add(oc[[rest, rb]], t + ic[[inc, a]]);
                        }
                    }
                }
                let t = oc[[spans.id(i, j, LEFT), 1]];
                if t > NEG_INF {
                    for k in i..j {
                        let first = spans.id(i, k, LEFT);
                        let fb = bit(i < k);
                        let inc = spans.id(k, j, LEFT);
                        for a in 0..2 {
                            oc[[first, fb]] = log_add(oc[[first, fb]], t + ic[[inc, a]]);
                            oi[[inc, a]] = log_add(oi[[inc, a]], t + cc[[first, fb]]);
                        }
                    }
                }

                for a in 0..2 {
                    let t = oi[[spans.id(i, j, RIGHT), a]]
                        + scores.attach(i, j, a)
                        + scores.cont(i, RIGHT, a);
                    if t > NEG_INF {
                        for r in i..j {
                            if bit(r > i) != a {
                                continue;
                            }
                            let head_side = spans.id(i, r, RIGHT);
                            let child_side = spans.id(r + 1, j, LEFT);
                            let cb = bit(r + 1 < j);
                            oc[[head_side, 1]] =
                                log_add(oc[[head_side, 1]], t + cc[[child_side, cb]]);
                            oc[[child_side, cb]] =
                                log_add(oc[[child_side, cb]], t + cc[[head_side, 1]]);
                        }
                    }

                    let t = oi[[spans.id(i, j, LEFT), a]]
                        + scores.attach(j, i, a)
                        + scores.cont(j, LEFT, a);
                    if t > NEG_INF {
                        for r in i..j {
                            if bit(r + 1 < j) != a {
                                continue;
                            }
                            let child_side = spans.id(i, r, RIGHT);
                            let cb = bit(r > i);
                            let head_side = spans.id(r + 1, j, LEFT);
                            oc[[child_side, cb]] =
                                log_add(oc[[child_side, cb]], t + cc[[head_side, 1]]);
                            oc[[head_side, 1]] =
                                log_add(oc[[head_side, 1]], t + cc[[child_side, cb]]);
                        }
                    }
                }
            }
        }

        Ok(chart)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::direction;
    use ndarray::{Array3, Array4};

    fn toy_tables(n: usize, cv: usize, dv: usize) -> (Array3<f64>, Array4<f64>) {
        let mut attach = Array3::from_elem((n, n, cv), NEG_INF);
        let mut decision = Array4::from_elem((n, 2, dv, 2), NEG_INF);
        for h in 0..n {
            for m in 1..n {
                if h == m {
                    continue;
                }
                for v in 0..cv {
                    attach[[h, m, v]] = -0.1 - ((h * 7 + m * 3 + v * 5) % 11) as f64 * 0.17;
                }
            }
        }
        for i in 0..n {
            for d in 0..2 {
                for v in 0..dv {
                    for o in 0..2 {
                        decision[[i, d, v, o]] = if i == 0 {
                            0.0
                        } else {
                            -0.2 - ((i * 5 + d * 3 + v * 2 + o) % 7) as f64 * 0.21
                        };
                    }
                }
            }
        }
        (attach, decision)
    }

    /// Generative DMV score of a head assignment, children taken nearest first
    fn tree_score(scores: &SentenceScores<'_>, heads: &[usize]) -> f64 {
        let n = scores.len();
        let mut total = 0.0;
        for h in 0..n {
            for d in [LEFT, RIGHT] {
                let mut kids: Vec<usize> = (1..n)
                    .filter(|&m| m != h && heads[m] == h && direction(h, m) == d)
                    .collect();
                if d == LEFT {
                    kids.reverse();
                }
                if h == 0 {
                    total += kids.iter().map(|&m| scores.attach(0, m, 0)).sum::<f64>();
                    continue;
                }
                for (t, &m) in kids.iter().enumerate() {
                    let v = bit(t > 0);
                    total += scores.cont(h, d, v) + scores.attach(h, m, v);
                }
                total += scores.stop(h, d, bit(!kids.is_empty()));
            }
        }
        total
    }

    fn dominates(heads: &[usize], ancestor: usize, mut node: usize) -> bool {
        for _ in 0..heads.len() {
            if node == ancestor {
                return true;
            }
            if node == 0 {
                return false;
            }
            node = heads[node];
        }
        false
    }

    /// Every single-root projective tree over `n` positions
    fn all_trees(n: usize) -> Vec<Vec<usize>> {
        let words = n - 1;
        let mut trees = Vec::new();
        let total = n.pow(words as u32);
        for code in 0..total {
            let mut heads = vec![0; n];
            let mut c = code;
            for m in 1..n {
                heads[m] = c % n;
                c /= n;
            }
            if (1..n).any(|m| heads[m] == m) {
                continue;
            }
            if (1..n).filter(|&m| heads[m] == 0).count() != 1 {
                continue;
            }
            if !(1..n).all(|m| dominates(&heads, 0, m)) {
                continue;
            }
            let projective = (1..n).all(|m| {
                let h = heads[m];
                let (lo, hi) = if h < m { (h, m) } else { (m, h) };
                (lo + 1..hi).all(|k| dominates(&heads, h, k))
            });
            if projective {
                trees.push(heads);
            }
        }
        trees
    }

    fn log_sum(values: impl Iterator<Item = f64>) -> f64 {
        values.fold(NEG_INF, log_add)
    }

    fn check_against_enumeration(n: usize, cv: usize, dv: usize) {
        let (attach, decision) = toy_tables(n, cv, dv);
        let scores = SentenceScores::new(attach.view(), decision.view()).unwrap();
        let parser = EisnerParser::new();
        let spans = SpanIndex::new(n);
        let trees = all_trees(n);
        let tree_scores: Vec<f64> = trees.iter().map(|t| tree_score(&scores, t)).collect();

        let (inside, total) = parser.inside(&scores, &spans).unwrap();
        let expected_total = log_sum(tree_scores.iter().copied());
        assert!((total - expected_total).abs() < 1e-9, "{} vs {}", total, expected_total);

        let best = parser.best_parse(&scores).unwrap();
        let expected_best = tree_scores.iter().copied().fold(NEG_INF, f64::max);
        assert!((best.score - expected_best).abs() < 1e-9);
        let best_heads: Vec<usize> = best.heads.iter().map(|h| h.unwrap_or(0)).collect();
        assert!((tree_score(&scores, &best_heads) - best.score).abs() < 1e-9);
        assert!(best.heads[0].is_none());

        let outside = parser.outside(&inside, &scores, &spans).unwrap();
        for h in 0..n {
            for m in 1..n {
                if h == m {
                    continue;
                }
                let d = direction(h, m);
                let id = if d == LEFT {
                    spans.id(m, h, LEFT)
                } else {
                    spans.id(h, m, RIGHT)
                };
                let marginal: f64 = (0..2)
                    .map(|a| (inside.incomplete[[id, a]] + outside.incomplete[[id, a]] - total).exp())
                    .sum();
                let expected: f64 = trees
                    .iter()
                    .zip(&tree_scores)
                    .filter(|(t, _)| t[m] == h)
                    .map(|(_, s)| (s - total).exp())
                    .sum();
                assert!((marginal - expected).abs() < 1e-9, "arc {} -> {}", h, m);
            }
        }
        for m in 1..n {
            for d in 0..2 {
                let id = spans.id(m, m, d);
                let stops: f64 = (0..2)
                    .map(|b| (inside.complete[[id, b]] + outside.complete[[id, b]] - total).exp())
                    .sum();
                assert!((stops - 1.0).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_matches_enumeration_two_valences() {
        for n in 2..=5 {
            check_against_enumeration(n, 2, 2);
        }
    }

    #[test]
    fn test_matches_enumeration_mixed_valences() {
        check_against_enumeration(5, 1, 2);
        check_against_enumeration(4, 2, 1);
        check_against_enumeration(4, 1, 1);
    }

    #[test]
    fn test_best_parse_valences() {
        let (attach, decision) = toy_tables(5, 2, 2);
        let scores = SentenceScores::new(attach.view(), decision.view()).unwrap();
        let tree = EisnerParser::new().best_parse(&scores).unwrap();
        assert!(tree.is_valid());
        for m in 1..5 {
            for d in [LEFT, RIGHT] {
                let has_kids = (1..5).any(|c| tree.heads[c] == Some(m) && direction(m, c) == d);
                assert_eq!(tree.valence[m][d], bit(has_kids));
            }
            let h = tree.heads[m].unwrap();
            let d = direction(h, m);
            let nearer = (1..5).any(|c| {
                c != m
                    && tree.heads[c] == Some(h)
                    && direction(h, c) == d
                    && (c as isize - h as isize).abs() < (m as isize - h as isize).abs()
            });
            if h > 0 {
                assert_eq!(tree.head_valence[m], bit(nearer));
            }
        }
    }

    #[test]
    fn test_no_parse() {
        let (mut attach, decision) = toy_tables(4, 2, 2);
        attach.fill(NEG_INF);
        let scores = SentenceScores::new(attach.view(), decision.view()).unwrap();
        let parser = EisnerParser::new();
        let tree = parser.best_parse(&scores).unwrap();
        assert!(!tree.is_valid());
        assert!(tree.heads.iter().all(|h| h.is_none()));
        let (_, total) = parser.inside(&scores, &SpanIndex::new(4)).unwrap();
        assert_eq!(total, NEG_INF);
    }

    #[test]
    fn test_mismatched_span_index() {
        let (attach, decision) = toy_tables(4, 1, 1);
        let scores = SentenceScores::new(attach.view(), decision.view()).unwrap();
        assert!(EisnerParser::new()
            .inside(&scores, &SpanIndex::new(5))
            .is_err());
    }

    #[test]
    fn test_log_add() {
        assert_eq!(log_add(NEG_INF, NEG_INF), NEG_INF);
        assert_eq!(log_add(NEG_INF, -1.0), -1.0);
        let v = log_add(0.5f64.ln(), 0.25f64.ln());
        assert!((v - 0.75f64.ln()).abs() < 1e-12);
    }
}
