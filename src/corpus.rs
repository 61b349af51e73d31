use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use bstr::ByteSlice;

use crate::dictionary::Dictionary;
use crate::tag_index::{TagIndex, ROOT_TAG};

/// A POS-tagged sentence
///
/// Position 0 is the implicit ROOT token; real tokens start at position 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    /// Sentence id, used to address per-sentence parameter variants
    pub id: usize,
    /// Full tag id per position, `tags[0]` is ROOT
    pub tags: Vec<u32>,
    /// Word id per position, `None` when no surface form is known (always `None` at 0)
    pub words: Vec<Option<u32>>,
}

impl Sentence {
    /// Create a sentence from tag ids of the real tokens (ROOT is prepended)
    pub fn from_tags(id: usize, root: u32, tags: &[u32]) -> Self {
        let mut all = Vec::with_capacity(tags.len() + 1);
        all.push(root);
        all.extend_from_slice(tags);
        Self {
            id,
            words: vec![None; all.len()],
            tags: all,
        }
    }

    /// Number of positions, ROOT included
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Returns `true` if the sentence has no real tokens
    pub fn is_empty(&self) -> bool {
        self.tags.len() < 2
    }

    /// Number of real tokens
    pub fn num_words(&self) -> usize {
        self.tags.len().saturating_sub(1)
    }

    /// Check that the sentence is well formed against a tag index
    pub fn validate(&self, tag_index: &TagIndex) -> io::Result<()> {
        if self.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("sentence {} has no tokens", self.id),
            ));
        }
        if self.words.len() != self.tags.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("sentence {} has mismatched word and tag counts", self.id),
            ));
        }
        if !tag_index.is_root(self.tags[0]) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("sentence {} does not start with ROOT", self.id),
            ));
        }
        for &tag in &self.tags[1..] {
            if tag_index.is_root(tag) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "ROOT tag is only allowed at position 0",
                ));
            }
            if tag as usize >= tag_index.len() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("sentence {} has unknown tag id {}", self.id, tag),
                ));
            }
        }
        Ok(())
    }
}

/// A corpus of sentences with a frozen tag index and word vocabulary
#[derive(Debug, Clone)]
pub struct Corpus {
    tag_index: TagIndex,
    vocab: Dictionary,
    sentences: Vec<Sentence>,
}

impl Corpus {
    pub fn tag_index(&self) -> &TagIndex {
        &self.tag_index
    }

    pub fn vocab(&self) -> &Dictionary {
        &self.vocab
    }

    pub fn sentences(&self) -> &[Sentence] {
        &self.sentences
    }

    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }

    /// Split the corpus into consecutive batches of at most `size` sentences
    pub fn batches(&self, size: usize) -> impl Iterator<Item = &[Sentence]> + '_ {
        self.sentences.chunks(size.max(1))
    }
}

/// Incrementally collects tagged sentences and builds a [`Corpus`]
#[derive(Debug, Clone)]
pub struct CorpusBuilder {
    tags: Dictionary,
    words: Dictionary,
    sentences: Vec<Sentence>,
}

impl CorpusBuilder {
    pub fn new() -> Self {
        let mut tags = Dictionary::new();
        tags.get_or_insert(ROOT_TAG);
        Self {
            tags,
            words: Dictionary::new(),
            sentences: Vec::new(),
        }
    }

    /// Number of sentences appended so far
    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }

    /// Append a sentence given only its tag sequence
    pub fn append<T: AsRef<str>>(&mut self, tags: &[T]) -> io::Result<()> {
        let tokens: Vec<(Option<&str>, &str)> = tags.iter().map(|t| (None, t.as_ref())).collect();
        self.push_tokens(&tokens)
    }

    /// Append a sentence of (word, tag) pairs
    pub fn append_with_words<W, T>(&mut self, tokens: &[(W, T)]) -> io::Result<()>
    where
        W: AsRef<str>,
        T: AsRef<str>,
    {
        let tokens: Vec<(Option<&str>, &str)> = tokens
            .iter()
            .map(|(w, t)| (Some(w.as_ref()), t.as_ref()))
            .collect();
        self.push_tokens(&tokens)
    }

    fn push_tokens(&mut self, tokens: &[(Option<&str>, &str)]) -> io::Result<()> {
        if tokens.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty sentences are not allowed",
            ));
        }
        if tokens.iter().any(|(_, tag)| *tag == ROOT_TAG) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "ROOT tag is only allowed at position 0",
            ));
        }
        if tokens.iter().any(|(_, tag)| tag.is_empty()) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty tags are not allowed",
            ));
        }

        let root = self.tags.get_or_insert(ROOT_TAG);
        let mut tags = Vec::with_capacity(tokens.len() + 1);
        let mut words = Vec::with_capacity(tokens.len() + 1);
        tags.push(root);
        words.push(None);
        for (word, tag) in tokens {
            tags.push(self.tags.get_or_insert(tag));
            words.push(word.map(|w| self.words.get_or_insert(w)));
        }

        self.sentences.push(Sentence {
            id: self.sentences.len(),
            tags,
            words,
        });
        Ok(())
    }

    /// Append every sentence of a CoNLL-X / CoNLL-U document.
    ///
    /// Uses the FORM (2nd) and UPOS (4th) columns. Comment lines, multiword
    /// token ranges (`1-2`) and empty nodes (`1.1`) are skipped. Returns the
    /// number of sentences appended.
    pub fn read_conll<R: Read>(&mut self, mut reader: R) -> io::Result<usize> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;

        let before = self.sentences.len();
        let mut tokens: Vec<(String, String)> = Vec::new();
        for (lineno, line) in data.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                if !tokens.is_empty() {
                    self.append_with_words(&tokens)?;
                    tokens.clear();
                }
                continue;
            }
            if line.starts_with(b"#") {
                continue;
            }
            let fields: Vec<&[u8]> = line.split_str("\t").collect();
            if fields.len() < 4 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("line {}: expected at least 4 tab-separated columns", lineno + 1),
                ));
            }
            if fields[0].contains(&b'-') || fields[0].contains(&b'.') {
                continue;
            }
            let form = fields[1].to_str().map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("line {}: invalid UTF-8 in FORM", lineno + 1),
                )
            })?;
            let upos = fields[3].to_str().map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("line {}: invalid UTF-8 in UPOS", lineno + 1),
                )
            })?;
            tokens.push((form.to_string(), upos.to_string()));
        }
        if !tokens.is_empty() {
            self.append_with_words(&tokens)?;
        }
        Ok(self.sentences.len() - before)
    }

    /// Append every sentence of a CoNLL file on disk
    pub fn read_conll_file<P: AsRef<Path>>(&mut self, path: P) -> io::Result<usize> {
        let file = File::open(path)?;
        self.read_conll(io::BufReader::new(file))
    }

    /// Freeze the tag index and vocabulary
    pub fn build(self) -> io::Result<Corpus> {
        if self.sentences.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "no sentences in corpus",
            ));
        }
        let tag_index = TagIndex::new(self.tags.iter().map(|(tag, _)| tag))?;
        Ok(Corpus {
            tag_index,
            vocab: self.words,
            sentences: self.sentences,
        })
    }
}

impl Default for CorpusBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONLLU: &str = "# sent_id = 1\n\
1\tThe\tthe\tDET\tDT\t_\t2\tdet\t_\t_\n\
2\tdog\tdog\tNOUN\tNN\t_\t3\tnsubj\t_\t_\n\
3\tbarks\tbark\tVERB\tVBZ\t_\t0\troot\t_\t_\n\
\n\
1-2\tdon't\t_\t_\t_\t_\t_\t_\t_\t_\n\
1\tdo\tdo\tAUX\tVBP\t_\t3\taux\t_\t_\n\
2\tn't\tnot\tPART\tRB\t_\t3\tadvmod\t_\t_\n\
3\trun\trun\tVERB\tVB\t_\t0\troot\t_\t_\n";

    #[test]
    fn test_builder_assigns_root_first() {
        let mut builder = CorpusBuilder::new();
        builder.append(&["DET", "NOUN", "VERB"]).unwrap();
        builder.append(&["NOUN", "VERB"]).unwrap();
        let corpus = builder.build().unwrap();

        let index = corpus.tag_index();
        assert_eq!(index.root(), 0);
        assert_eq!(index.len(), 4);

        let first = &corpus.sentences()[0];
        assert_eq!(first.id, 0);
        assert_eq!(first.len(), 4);
        assert_eq!(first.num_words(), 3);
        assert_eq!(first.tags[0], index.root());
        assert_eq!(first.tags[2], index.tag_id("NOUN").unwrap());
        assert!(first.words.iter().all(|w| w.is_none()));
        assert_eq!(corpus.sentences()[1].id, 1);
    }

    #[test]
    fn test_builder_rejects_bad_sentences() {
        let mut builder = CorpusBuilder::new();
        let empty: [&str; 0] = [];
        let err = builder.append(&empty).unwrap_err();
        assert!(err.to_string().contains("empty"));
        assert!(builder.append(&["NOUN", ROOT_TAG]).is_err());
        assert!(builder.build().is_err());
    }

    #[test]
    fn test_validate() {
        let index = TagIndex::with_root(["NOUN", "VERB"]).unwrap();
        assert!(Sentence::from_tags(0, 0, &[1, 2]).validate(&index).is_ok());
        assert!(Sentence::from_tags(0, 0, &[1, 0]).validate(&index).is_err());
        assert!(Sentence::from_tags(0, 0, &[7]).validate(&index).is_err());
        assert!(Sentence::from_tags(0, 1, &[2]).validate(&index).is_err());
        assert!(Sentence::from_tags(0, 0, &[]).validate(&index).is_err());
    }

    #[test]
    fn test_read_conll() {
        let mut builder = CorpusBuilder::new();
        let n = builder.read_conll(CONLLU.as_bytes()).unwrap();
        assert_eq!(n, 2);
        let corpus = builder.build().unwrap();

        let second = &corpus.sentences()[1];
        assert_eq!(second.num_words(), 3);
        let aux = corpus.tag_index().tag_id("AUX").unwrap();
        assert_eq!(second.tags[1], aux);
        assert_eq!(second.words[1], corpus.vocab().get("do"));
        assert_eq!(corpus.vocab().len(), 6);
    }

    #[test]
    fn test_batches() {
        let mut builder = CorpusBuilder::new();
        for _ in 0..5 {
            builder.append(&["NOUN"]).unwrap();
        }
        let corpus = builder.build().unwrap();
        let sizes: Vec<usize> = corpus.batches(2).map(|b| b.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }
}
