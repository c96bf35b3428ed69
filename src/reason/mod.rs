//! Rule-based reasoning over Notation3 documents.
//!
//! The policy operations never reason themselves: they assemble a knowledge
//! document, hand it to a [`Reasoner`], and read the answer back as Turtle.
//! [`RuleReasoner`](engine::RuleReasoner) is the in-process implementation;
//! anything honoring the same contract (for example an external EYE
//! process) can take its place.

pub mod builtins;
pub mod engine;
pub mod n3;
pub mod rules;

use serde::{Deserialize, Serialize};

use crate::error::ReasonError;
use crate::graph::PolicyDocument;

/// Result type for reasoning operations.
pub type ReasonResult<T> = std::result::Result<T, ReasonError>;

/// Evaluates N3 facts and rules, optionally against a goal query.
pub trait Reasoner: Send + Sync {
    /// Run `document` to its deductive closure.
    ///
    /// With a `query` (a document of rules whose heads describe the wanted
    /// triples), only the instantiated query heads are returned. Without
    /// one, the newly derived facts are returned. The output is Turtle.
    fn evaluate(
        &self,
        document: &PolicyDocument,
        query: Option<&PolicyDocument>,
    ) -> ReasonResult<PolicyDocument>;
}

/// Limits for the in-process rule reasoner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasonerConfig {
    /// Maximum fixpoint rounds per stratum (default: 64).
    pub max_iterations: usize,
    /// Hard cap on derived facts per evaluation (default: 100 000).
    pub max_derived_facts: usize,
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 64,
            max_derived_facts: 100_000,
        }
    }
}
