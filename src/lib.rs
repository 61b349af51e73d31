//! Expectation-Maximization for the Dependency Model with Valence (DMV)
//!
//! This library estimates the attachment and stop/continue multinomials of a
//! DMV grammar from part-of-speech tagged sentences, with Viterbi (hard) or
//! inside-outside (soft) E-steps over a projective Eisner chart.
//!
//! # Examples
//!
//! ## Training
//!
//! ```no_run
//! use dmv_em::train::DmvOptions;
//! use dmv_em::{CorpusBuilder, DmvModel};
//!
//! let mut builder = CorpusBuilder::new();
//! builder.read_conll_file("train.conllu")?;
//! let corpus = builder.build()?;
//!
//! let mut options = DmvOptions::default();
//! options.set("em_type", "em")?;
//! options.set("function_mask", "true")?;
//!
//! let mut model = DmvModel::from_corpus(&corpus, options)?;
//! model.init_param(corpus.sentences())?;
//! let history = model.train(corpus.sentences(), 64, 10)?;
//! println!("final log-likelihood: {:?}", history.last());
//! model.save("grammar.dmv")?;
//! # Ok::<(), std::io::Error>(())
//! ```
//!
//! ## Driving the EM loop by hand
//!
//! ```no_run
//! use dmv_em::train::DmvOptions;
//! use dmv_em::{CorpusBuilder, DmvModel};
//!
//! let mut builder = CorpusBuilder::new();
//! builder.append(&["DET", "NOUN", "VERB"])?;
//! let corpus = builder.build()?;
//!
//! let mut model = DmvModel::from_corpus(&corpus, DmvOptions::default())?;
//! model.init_param(corpus.sentences())?;
//! let mut counters = model.new_counters();
//! for batch in corpus.batches(32) {
//!     model.em_e(batch, &mut counters)?;
//! }
//! model.em_m(&counters)?;
//! # Ok::<(), std::io::Error>(())
//! ```

mod checkpoint;
mod corpus;
mod dictionary;
mod model;
mod params;
mod tag_index;

/// Chart parsing collaborators
pub mod parser;
/// EM training components
pub mod train;

pub use self::checkpoint::{Checkpoint, CheckpointWriter};
pub use self::corpus::{Corpus, CorpusBuilder, Sentence};
pub use self::dictionary::Dictionary;
pub use self::model::DmvModel;
pub use self::params::{direction, ParameterStore, SentenceParams, CONTINUE, LEFT, RIGHT, STOP};
pub use self::tag_index::{TagIndex, ROOT_TAG};
