//! EM training machinery for the Dependency Model with Valence
//!
//! One EM iteration is: [`ScoreEvaluator::evaluate`] turns the current
//! parameters into log-probability tables, [`ExpectationEngine::run`]
//! accumulates (hard or expected) counts into caller-owned [`Counters`],
//! optionally [`MaximizationEngine::apply_prior`] replaces the attachment
//! counts with their posterior mode, and [`MaximizationEngine::maximize`]
//! writes freshly normalized tensors back into the parameter store.

mod estep;
mod harmonic;
mod mstep;
mod options;
mod prior;
mod score;

pub use self::estep::{
    BatchLikelihood, Counters, DecisionSample, ExpectationEngine, RuleSample, SampleKey,
    SampleKeying, Samples,
};
pub use self::harmonic::HarmonicInitializer;
pub use self::mstep::MaximizationEngine;
pub use self::options::{DmvOptions, EmType, FUNCTION_TAGS};
pub use self::prior::{ModeFinder, ModifiedDirichlet};
pub use self::score::{Mask, ScoreEvaluator, ScoreTables};
