use std::io;

use crate::dictionary::Dictionary;

/// Tag name of the implicit root token at position 0 of every sentence.
pub const ROOT_TAG: &str = "ROOT-POS";

/// Bidirectional mapping between part-of-speech tags and integer ids
///
/// Every tag has a *full* id. Every tag except ROOT additionally has a
/// *decision* id in a dense space of size `len() - 1`, used to index the
/// stop/continue parameters (ROOT never makes such a decision).
///
/// Ids follow the order of the tag list the index was built from, so two
/// indices built from the same list are identical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagIndex {
    tags: Dictionary,
    root: u32,
    to_decision: Vec<Option<u32>>,
    from_decision: Vec<u32>,
}

impl TagIndex {
    /// Build a tag index from an ordered tag list, which must contain
    /// [`ROOT_TAG`] exactly once and at least one other tag.
    pub fn new<I, S>(tags: I) -> io::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut dict = Dictionary::new();
        for tag in tags {
            let tag = tag.as_ref();
            if tag.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "empty tags are not allowed",
                ));
            }
            if dict.contains(tag) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("duplicate tag: {}", tag),
                ));
            }
            dict.get_or_insert(tag);
        }
        let root = dict
            .get(ROOT_TAG)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "missing ROOT tag"))?;
        if dict.len() < 2 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "tag index needs at least one tag besides ROOT",
            ));
        }

        let mut to_decision = Vec::with_capacity(dict.len());
        let mut from_decision = Vec::with_capacity(dict.len() - 1);
        for (_, id) in dict.iter() {
            if id == root {
                to_decision.push(None);
            } else {
                to_decision.push(Some(from_decision.len() as u32));
                from_decision.push(id);
            }
        }

        Ok(Self {
            tags: dict,
            root,
            to_decision,
            from_decision,
        })
    }

    /// Build a tag index with ROOT first, followed by `tags` in order.
    pub fn with_root<I, S>(tags: I) -> io::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let all: Vec<String> = std::iter::once(ROOT_TAG.to_string())
            .chain(tags.into_iter().map(|t| t.as_ref().to_string()))
            .collect();
        Self::new(all)
    }

    /// Number of tags, ROOT included
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Always false: a valid index holds ROOT and at least one other tag
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Number of decision ids (tags other than ROOT)
    pub fn num_decision(&self) -> usize {
        self.from_decision.len()
    }

    /// Full id of ROOT
    pub fn root(&self) -> u32 {
        self.root
    }

    pub fn is_root(&self, id: u32) -> bool {
        id == self.root
    }

    pub fn tag_id(&self, tag: &str) -> Option<u32> {
        self.tags.get(tag)
    }

    pub fn tag_name(&self, id: u32) -> Option<&str> {
        self.tags.get_name(id)
    }

    /// Decision id of a full id; `None` for ROOT or unknown ids
    pub fn to_decision(&self, id: u32) -> Option<u32> {
        self.to_decision.get(id as usize).copied().flatten()
    }

    /// Full id of a decision id
    pub fn from_decision(&self, decision_id: u32) -> Option<u32> {
        self.from_decision.get(decision_id as usize).copied()
    }

    /// Iterate over (tag, full id) pairs in id order
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> + '_ {
        self.tags.iter()
    }

    pub(crate) fn dictionary(&self) -> &Dictionary {
        &self.tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_ids_skip_root() {
        let index = TagIndex::new(["NOUN", ROOT_TAG, "VERB", "DET"]).unwrap();
        assert_eq!(index.len(), 4);
        assert_eq!(index.num_decision(), 3);
        assert_eq!(index.to_decision(index.root()), None);

        let mut seen = vec![false; index.num_decision()];
        for (tag, id) in index.iter() {
            assert_eq!(index.tag_id(tag), Some(id));
            match index.to_decision(id) {
                Some(did) => {
                    assert!(!seen[did as usize]);
                    seen[did as usize] = true;
                    assert_eq!(index.from_decision(did), Some(id));
                }
                None => assert_eq!(tag, ROOT_TAG),
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_missing_root() {
        let err = TagIndex::new(["NOUN", "VERB"]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert_eq!(err.to_string(), "missing ROOT tag");
    }

    #[test]
    fn test_duplicate_and_root_only() {
        assert!(TagIndex::new([ROOT_TAG, "NOUN", "NOUN"]).is_err());
        assert!(TagIndex::new([ROOT_TAG]).is_err());
    }

    #[test]
    fn test_deterministic_construction() {
        let a = TagIndex::with_root(["DET", "NOUN", "VERB"]).unwrap();
        let b = TagIndex::with_root(["DET", "NOUN", "VERB"]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.root(), 0);
        assert_eq!(a.tag_name(2), Some("NOUN"));
    }
}
