/// A constituent of the chart: `start..=end` headed at `start` when
/// `direction` is [`RIGHT`](crate::params::RIGHT), at `end` when it is
/// [`LEFT`](crate::params::LEFT)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub direction: usize,
}

/// Bijection between chart spans and dense row ids for a sentence length
///
/// Rows are ordered by span width, then start position, then direction, so
/// iterating ids in increasing order visits every span after all of its
/// sub-spans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanIndex {
    sentence_len: usize,
    /// First id of each span width
    offsets: Vec<usize>,
    spans: Vec<Span>,
}

impl SpanIndex {
    pub fn new(sentence_len: usize) -> Self {
        let mut offsets = Vec::with_capacity(sentence_len);
        let mut spans = Vec::with_capacity(sentence_len * (sentence_len + 1));
        for width in 0..sentence_len {
            offsets.push(spans.len());
            for start in 0..sentence_len - width {
                for direction in 0..2 {
                    spans.push(Span {
                        start,
                        end: start + width,
                        direction,
                    });
                }
            }
        }
        Self {
            sentence_len,
            offsets,
            spans,
        }
    }

    /// Number of span ids
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Sentence length (ROOT included) this index was built for
    pub fn sentence_len(&self) -> usize {
        self.sentence_len
    }

    /// Row id of a span, `None` when it does not fit the sentence
    pub fn span_to_id(&self, start: usize, end: usize, direction: usize) -> Option<usize> {
        if start > end || end >= self.sentence_len || direction > 1 {
            return None;
        }
        Some(self.id(start, end, direction))
    }

    /// Row id of a span known to be valid
    #[inline]
    pub(crate) fn id(&self, start: usize, end: usize, direction: usize) -> usize {
        debug_assert!(start <= end && end < self.sentence_len && direction < 2);
        self.offsets[end - start] + start * 2 + direction
    }

    pub fn id_to_span(&self, id: usize) -> Option<Span> {
        self.spans.get(id).copied()
    }

    /// Iterate over `(id, span)` in id order
    pub fn iter(&self) -> impl Iterator<Item = (usize, Span)> + '_ {
        self.spans.iter().copied().enumerate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_index_is_bijection() {
        let index = SpanIndex::new(5);
        assert_eq!(index.len(), 5 * 6);
        for (id, span) in index.iter() {
            assert_eq!(
                index.span_to_id(span.start, span.end, span.direction),
                Some(id)
            );
            assert_eq!(index.id_to_span(id), Some(span));
        }
        assert_eq!(index.span_to_id(3, 2, 0), None);
        assert_eq!(index.span_to_id(0, 5, 0), None);
        assert_eq!(index.id_to_span(30), None);
    }

    #[test]
    fn test_span_index_orders_by_width() {
        let index = SpanIndex::new(4);
        let widths: Vec<usize> = index.iter().map(|(_, s)| s.end - s.start).collect();
        assert!(widths.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(index, SpanIndex::new(4));
    }
}
