use std::fs;
use std::io;
use std::path::Path;

use log::{info, warn};

use crate::checkpoint::{Checkpoint, CheckpointWriter};
use crate::corpus::{Corpus, Sentence};
use crate::params::ParameterStore;
use crate::tag_index::TagIndex;
use crate::train::{
    BatchLikelihood, Counters, DmvOptions, ExpectationEngine, HarmonicInitializer,
    MaximizationEngine, ScoreEvaluator, ScoreTables,
};

/// A DMV grammar under EM training
///
/// Owns the tag index, the run options and the parameter store, and wires
/// them to the evaluator and the E/M engines.
#[derive(Debug, Clone)]
pub struct DmvModel {
    tag_index: TagIndex,
    options: DmvOptions,
    params: ParameterStore,
    evaluator: ScoreEvaluator,
    estep: ExpectationEngine,
    mstep: MaximizationEngine,
}

impl DmvModel {
    /// Create a model with zeroed tensors.
    ///
    /// `vocab_size` sizes the lexical tensor and is required when
    /// `use_lex` is enabled; it is ignored otherwise.
    pub fn new(
        tag_index: TagIndex,
        options: DmvOptions,
        vocab_size: Option<usize>,
    ) -> io::Result<Self> {
        let vocab_size = if options.use_lex() {
            match vocab_size {
                Some(size) if size > 0 => Some(size),
                _ => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "use_lex requires a non-empty vocabulary",
                    ))
                }
            }
        } else {
            None
        };
        let params = ParameterStore::new(
            tag_index.len(),
            tag_index.num_decision(),
            options.c_valency(),
            options.d_valency(),
            vocab_size,
        );
        Self::with_params(tag_index, options, params)
    }

    /// Create a model sized for the tags and words of `corpus`
    pub fn from_corpus(corpus: &Corpus, options: DmvOptions) -> io::Result<Self> {
        Self::new(
            corpus.tag_index().clone(),
            options,
            Some(corpus.vocab().len()),
        )
    }

    fn with_params(
        tag_index: TagIndex,
        options: DmvOptions,
        params: ParameterStore,
    ) -> io::Result<Self> {
        let evaluator = ScoreEvaluator::new(&tag_index, &options)?;
        let estep = ExpectationEngine::new(&options);
        let mstep = MaximizationEngine::new(&options);
        Ok(Self {
            tag_index,
            options,
            params,
            evaluator,
            estep,
            mstep,
        })
    }

    pub fn tag_index(&self) -> &TagIndex {
        &self.tag_index
    }

    pub fn options(&self) -> &DmvOptions {
        &self.options
    }

    pub fn params(&self) -> &ParameterStore {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut ParameterStore {
        &mut self.params
    }

    /// Seed the tensors with the harmonic initializer
    pub fn init_param(&mut self, sentences: &[Sentence]) -> io::Result<()> {
        HarmonicInitializer::new(&self.tag_index, self.options.count_smoothing())
            .initialize(&mut self.params, sentences)
    }

    /// Log-probability tables of a batch under the current parameters
    pub fn evaluate(&self, batch: &[Sentence]) -> io::Result<ScoreTables> {
        self.evaluator.evaluate(&self.tag_index, &self.params, batch)
    }

    /// Zeroed counters shaped like the parameters; samples are collected
    /// when `use_neural` is enabled
    pub fn new_counters(&self) -> Counters {
        Counters::new(&self.params, self.options.use_neural())
    }

    /// E-step over one batch
    pub fn em_e(&self, batch: &[Sentence], counters: &mut Counters) -> io::Result<BatchLikelihood> {
        let tables = self.evaluate(batch)?;
        self.estep
            .run(&self.tag_index, &self.params, batch, &tables, counters)
    }

    /// Replace attachment counts with their posterior mode under the prior
    pub fn apply_prior(&self, counters: &mut Counters) -> io::Result<()> {
        self.mstep.apply_prior(&self.params, counters)
    }

    /// M-step from accumulated counters
    pub fn em_m(&mut self, counters: &Counters) -> io::Result<()> {
        self.mstep
            .maximize(&self.tag_index, &mut self.params, counters)
    }

    /// Run `iterations` EM iterations over `sentences`, `batch_size`
    /// sentences per E-step call.
    ///
    /// Returns the corpus log-likelihood of every iteration, measured under
    /// the parameters that iteration started from.
    pub fn train(
        &mut self,
        sentences: &[Sentence],
        batch_size: usize,
        iterations: usize,
    ) -> io::Result<Vec<f64>> {
        if sentences.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "no training data",
            ));
        }
        if batch_size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "batch_size must be positive",
            ));
        }

        let mut history = Vec::with_capacity(iterations);
        let mut counters = self.new_counters();
        for iteration in 1..=iterations {
            counters.reset();
            let mut log_likelihood = 0.0;
            let mut degenerate = 0;
            for batch in sentences.chunks(batch_size) {
                let result = self.em_e(batch, &mut counters)?;
                log_likelihood += result.log_likelihood;
                degenerate += result.degenerate.len();
            }
            if degenerate > 0 {
                warn!(
                    "iteration {}: {} sentences without a parse",
                    iteration, degenerate
                );
            }
            if self.options.use_prior() {
                self.apply_prior(&mut counters)?;
            }
            self.em_m(&counters)?;
            info!(
                "iteration {}: log-likelihood = {:.6}",
                iteration, log_likelihood
            );
            history.push(log_likelihood);
        }
        Ok(history)
    }

    /// Write the tag index and tensors to `path` atomically
    pub fn save<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        CheckpointWriter::write(path.as_ref(), &self.tag_index, &self.params)
    }

    /// Restore a model saved with [`DmvModel::save`].
    ///
    /// The valencies and lexical setting of `options` must agree with the
    /// checkpoint.
    pub fn load<P: AsRef<Path>>(path: P, options: DmvOptions) -> io::Result<Self> {
        let buf = fs::read(path)?;
        let checkpoint = Checkpoint::new(&buf)?;
        if checkpoint.cvalency() != options.c_valency()
            || checkpoint.dvalency() != options.d_valency()
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "checkpoint valency does not match options",
            ));
        }
        if checkpoint.vocab_size().is_some() != options.use_lex() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "checkpoint lexical tensor does not match use_lex",
            ));
        }
        let tag_index = checkpoint.tag_index()?;
        let params = checkpoint.params()?;
        Self::with_params(tag_index, options, params)
    }
}
