//! Forward-chaining rule reasoner.
//!
//! Runs compiled N3 rules to a fixpoint, in two strata: rules without
//! negation first, then every rule once the positive closure is known, so
//! `log:notIncludes` sees a stable fact base.

use std::collections::{HashMap, HashSet};

use oxigraph::model::{BlankNode, NamedNode, Term, Triple};
use tracing::{debug, trace};

use crate::error::ReasonError;
use crate::graph::{PolicyDocument, subject_term, write_turtle};

use super::n3::Program;
use super::rules::{Filter, Formula, InferenceRule, RuleTerm, TriplePattern};
use super::{ReasonResult, Reasoner, ReasonerConfig};

/// Variable (or body blank node) bindings of one solution.
type Solution = HashMap<String, Term>;

// ---------------------------------------------------------------------------
// Fact base
// ---------------------------------------------------------------------------

/// Deduplicated facts in insertion order, indexed by predicate.
#[derive(Debug, Clone, Default)]
pub struct FactBase {
    triples: Vec<Triple>,
    seen: HashSet<Triple>,
    by_predicate: HashMap<NamedNode, Vec<usize>>,
    input_len: usize,
}

impl FactBase {
    /// Seed the base with input facts; duplicates collapse.
    pub fn from_facts(facts: impl IntoIterator<Item = Triple>) -> Self {
        let mut base = Self::default();
        for triple in facts {
            base.insert(triple);
        }
        base.input_len = base.triples.len();
        base
    }

    /// Returns `true` if the triple was not already present.
    pub fn insert(&mut self, triple: Triple) -> bool {
        if self.seen.contains(&triple) {
            return false;
        }
        self.by_predicate
            .entry(triple.predicate.clone())
            .or_default()
            .push(self.triples.len());
        self.seen.insert(triple.clone());
        self.triples.push(triple);
        true
    }

    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    pub fn contains(&self, triple: &Triple) -> bool {
        self.seen.contains(triple)
    }

    /// Facts added after the input, in derivation order.
    pub fn derived(&self) -> &[Triple] {
        &self.triples[self.input_len..]
    }

    pub fn triples(&self) -> &[Triple] {
        &self.triples
    }

    /// Facts that could match `pattern` under `solution`.
    fn candidates<'a>(
        &'a self,
        pattern: &TriplePattern,
        solution: &Solution,
    ) -> Box<dyn Iterator<Item = &'a Triple> + 'a> {
        let predicate = match resolve(&pattern.predicate, solution) {
            Some(Term::NamedNode(node)) => Some(node),
            Some(_) => return Box::new(std::iter::empty()),
            None => None,
        };
        match predicate {
            Some(node) => match self.by_predicate.get(&node) {
                Some(indices) => Box::new(indices.iter().map(|&i| &self.triples[i])),
                None => Box::new(std::iter::empty()),
            },
            None => Box::new(self.triples.iter()),
        }
    }
}

/// The bound value of a rule term, if any.
fn resolve(term: &RuleTerm, solution: &Solution) -> Option<Term> {
    match term {
        RuleTerm::Constant(value) => Some(value.clone()),
        other => other
            .binding_key()
            .and_then(|key| solution.get(&key).cloned()),
    }
}

/// Match one term against a concrete value, recording new bindings.
fn match_term(
    term: &RuleTerm,
    value: &Term,
    existing: &Solution,
    new_bindings: &mut Vec<(String, Term)>,
) -> bool {
    let Some(key) = term.binding_key() else {
        return matches!(term, RuleTerm::Constant(c) if c == value);
    };
    if let Some(bound) = existing.get(&key) {
        return bound == value;
    }
    if let Some((_, bound)) = new_bindings.iter().find(|(k, _)| *k == key) {
        return bound == value;
    }
    new_bindings.push((key, value.clone()));
    true
}

fn match_triple(pattern: &TriplePattern, triple: &Triple, solution: &Solution) -> Option<Solution> {
    let values = [
        subject_term(triple),
        Term::from(triple.predicate.clone()),
        triple.object.clone(),
    ];
    let mut new_bindings = Vec::new();
    for (term, value) in pattern.terms().into_iter().zip(values.iter()) {
        if !match_term(term, value, solution, &mut new_bindings) {
            return None;
        }
    }
    let mut extended = solution.clone();
    extended.extend(new_bindings);
    Some(extended)
}

// ---------------------------------------------------------------------------
// Skolemization
// ---------------------------------------------------------------------------

/// Fresh blank nodes for head blank nodes: one per rule, label and distinct
/// tuple of head-variable values, stable across fixpoint rounds.
#[derive(Debug, Default)]
struct SkolemTable {
    nodes: HashMap<(usize, String, Vec<Option<Term>>), BlankNode>,
}

impl SkolemTable {
    fn node(&mut self, rule: usize, label: &str, key: &[Option<Term>]) -> BlankNode {
        self.nodes
            .entry((rule, label.to_string(), key.to_vec()))
            .or_default()
            .clone()
    }
}

// ---------------------------------------------------------------------------
// Reasoner
// ---------------------------------------------------------------------------

/// In-process N3 forward-chaining reasoner.
#[derive(Debug, Clone, Default)]
pub struct RuleReasoner {
    config: ReasonerConfig,
    base_iri: Option<String>,
}

impl RuleReasoner {
    pub fn new(config: ReasonerConfig, base_iri: Option<String>) -> Self {
        Self { config, base_iri }
    }

    pub fn config(&self) -> &ReasonerConfig {
        &self.config
    }

    /// Parse `document` and run its rules to a fixpoint.
    pub fn closure(&self, document: &PolicyDocument) -> ReasonResult<(FactBase, Program)> {
        let program = Program::parse(document.as_str(), self.base_iri.as_deref())?;
        let mut facts = FactBase::from_facts(program.facts.iter().cloned());
        self.saturate(&mut facts, &program.rules)?;
        Ok((facts, program))
    }

    /// Apply `rules` to `facts` until nothing new is derived.
    pub fn saturate(&self, facts: &mut FactBase, rules: &[InferenceRule]) -> ReasonResult<()> {
        let mut skolems = SkolemTable::default();
        let indexed: Vec<(usize, &InferenceRule)> = rules.iter().enumerate().collect();
        let positive: Vec<(usize, &InferenceRule)> = indexed
            .iter()
            .copied()
            .filter(|(_, rule)| !rule.is_stratified())
            .collect();

        self.run_stratum(&positive, facts, &mut skolems)?;
        if positive.len() < indexed.len() {
            self.run_stratum(&indexed, facts, &mut skolems)?;
        }
        Ok(())
    }

    /// Naive evaluation: every round fires each rule against the whole fact
    /// base, and the stratum ends at the first round that adds nothing.
    fn run_stratum(
        &self,
        rules: &[(usize, &InferenceRule)],
        facts: &mut FactBase,
        skolems: &mut SkolemTable,
    ) -> ReasonResult<()> {
        if rules.is_empty() {
            return Ok(());
        }
        for round in 1..=self.config.max_iterations {
            let mut added = 0;
            for &(index, rule) in rules {
                for triple in self.fire(index, rule, facts, skolems)? {
                    if facts.insert(triple) {
                        added += 1;
                        if facts.derived().len() > self.config.max_derived_facts {
                            return Err(ReasonError::MaxFacts {
                                limit: self.config.max_derived_facts,
                            });
                        }
                    }
                }
            }
            trace!(round, added, total = facts.len(), "fixpoint round");
            if added == 0 {
                return Ok(());
            }
        }
        Err(ReasonError::MaxIterations {
            max_iterations: self.config.max_iterations,
        })
    }

    /// Instantiate the head of `rule` for every body solution.
    fn fire(
        &self,
        index: usize,
        rule: &InferenceRule,
        facts: &FactBase,
        skolems: &mut SkolemTable,
    ) -> ReasonResult<Vec<Triple>> {
        let head_variables = rule.head_variables();
        let mut produced = Vec::new();
        for solution in self.solve(&rule.body, facts, Solution::new())? {
            let key: Vec<Option<Term>> = head_variables
                .iter()
                .map(|var| solution.get(var).cloned())
                .collect();
            for pattern in &rule.head {
                if let Some(triple) = instantiate(pattern, &solution, |label| {
                    skolems.node(index, label, &key)
                }) {
                    produced.push(triple);
                }
            }
        }
        Ok(produced)
    }

    /// All solutions of `formula` extending `seed`.
    fn solve(&self, formula: &Formula, facts: &FactBase, seed: Solution) -> ReasonResult<Vec<Solution>> {
        let mut solutions = vec![seed];
        for pattern in &formula.patterns {
            let mut next = Vec::new();
            for solution in &solutions {
                next.extend(
                    facts
                        .candidates(pattern, solution)
                        .filter_map(|triple| match_triple(pattern, triple, solution)),
                );
            }
            solutions = next;
            if solutions.is_empty() {
                return Ok(solutions);
            }
        }

        let mut kept = Vec::with_capacity(solutions.len());
        for solution in solutions {
            if self.passes(&formula.filters, facts, &solution)? {
                kept.push(solution);
            }
        }
        Ok(kept)
    }

    fn passes(&self, filters: &[Filter], facts: &FactBase, solution: &Solution) -> ReasonResult<bool> {
        for filter in filters {
            let holds = match filter {
                Filter::Compare {
                    builtin,
                    left,
                    right,
                } => {
                    let unbound = || ReasonError::Builtin {
                        builtin: builtin.name().to_string(),
                        message: "argument is not bound by the rule body".into(),
                    };
                    let left = resolve(left, solution).ok_or_else(unbound)?;
                    let right = resolve(right, solution).ok_or_else(unbound)?;
                    builtin.holds(&left, &right)?
                }
                Filter::NotIncludes(nested) => {
                    self.solve(nested, facts, solution.clone())?.is_empty()
                }
            };
            if !holds {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Build a concrete triple from a head pattern. Unbound variables, literal
/// subjects and non-IRI predicates yield nothing.
fn instantiate(
    pattern: &TriplePattern,
    solution: &Solution,
    mut skolem: impl FnMut(&str) -> BlankNode,
) -> Option<Triple> {
    let mut value = |term: &RuleTerm| match term {
        RuleTerm::Blank(label) => Some(Term::from(skolem(label))),
        other => resolve(other, solution),
    };
    let subject = value(&pattern.subject)?;
    let predicate = match value(&pattern.predicate)? {
        Term::NamedNode(node) => node,
        _ => return None,
    };
    let object = value(&pattern.object)?;
    match subject {
        Term::NamedNode(node) => Some(Triple::new(node, predicate, object)),
        Term::BlankNode(node) => Some(Triple::new(node, predicate, object)),
        _ => None,
    }
}

impl Reasoner for RuleReasoner {
    fn evaluate(
        &self,
        document: &PolicyDocument,
        query: Option<&PolicyDocument>,
    ) -> ReasonResult<PolicyDocument> {
        let (facts, program) = self.closure(document)?;

        let output: Vec<Triple> = match query {
            None => facts.derived().to_vec(),
            Some(query) => {
                let goals = Program::parse(query.as_str(), self.base_iri.as_deref())?;
                let mut skolems = SkolemTable::default();
                let mut answers = FactBase::default();
                for (index, rule) in goals.rules.iter().enumerate() {
                    for triple in self.fire(index, rule, &facts, &mut skolems)? {
                        answers.insert(triple);
                    }
                }
                answers.triples
            }
        };

        debug!(
            rules = program.rules.len(),
            input_facts = program.facts.len(),
            closure = facts.len(),
            output = output.len(),
            with_query = query.is_some(),
            "reasoning complete"
        );
        Ok(write_turtle(&output)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{FactGraph, term_value};

    const PREFIXES: &str = "@prefix : <http://x/> .\n\
        @prefix log: <http://www.w3.org/2000/10/swap/log#> .\n\
        @prefix math: <http://www.w3.org/2000/10/swap/math#> .\n";

    fn reasoner() -> RuleReasoner {
        RuleReasoner::default()
    }

    fn closure(body: &str) -> FactBase {
        let doc = PolicyDocument::new(format!("{PREFIXES}{body}"));
        reasoner().closure(&doc).unwrap().0
    }

    fn node(iri: &str) -> NamedNode {
        NamedNode::new(iri).unwrap()
    }

    #[test]
    fn transitive_closure_reaches_fixpoint() {
        let facts = closure(
            ":a :next :b . :b :next :c . :c :next :d .\n\
             { ?x :next ?y } => { ?x :reach ?y } .\n\
             { ?x :reach ?y . ?y :next ?z } => { ?x :reach ?z } .",
        );
        let reach = facts
            .triples()
            .iter()
            .filter(|t| t.predicate == node("http://x/reach"))
            .count();
        assert_eq!(reach, 6);
        assert!(facts.contains(&Triple::new(
            node("http://x/a"),
            node("http://x/reach"),
            node("http://x/d")
        )));
    }

    #[test]
    fn negation_waits_for_positive_closure() {
        let facts = closure(
            ":a a :Item . :b a :Item . :a :tag :t .\n\
             { ?x :tag ?t } => { ?x :flagged true } .\n\
             { ?x a :Item . _:s log:notIncludes { ?x :flagged true } } => { ?x :clean true } .",
        );
        let clean: Vec<String> = facts
            .derived()
            .iter()
            .filter(|t| t.predicate == node("http://x/clean"))
            .map(|t| term_value(&subject_term(t)))
            .collect();
        assert_eq!(clean, vec!["http://x/b"]);
    }

    #[test]
    fn builtins_filter_solutions() {
        let facts = closure(
            ":a :n 3 . :b :n 12 .\n\
             { ?x :n ?v . ?v math:greaterThan 10 } => { ?x :big true } .",
        );
        let big: Vec<String> = facts
            .derived()
            .iter()
            .map(|t| term_value(&subject_term(t)))
            .collect();
        assert_eq!(big, vec!["http://x/b"]);
    }

    #[test]
    fn head_blank_nodes_are_fresh_per_binding_and_stable_across_rounds() {
        let facts = closure(
            ":p1 a :Port . :p2 a :Port .\n\
             { ?p a :Port } => { _:d :derivedFor ?p ; a :Derived } .",
        );
        assert_eq!(facts.derived().len(), 4);
        let subjects: HashSet<Term> = facts.derived().iter().map(subject_term).collect();
        assert_eq!(subjects.len(), 2);
        assert!(subjects.iter().all(|s| matches!(s, Term::BlankNode(_))));
    }

    #[test]
    fn query_returns_only_goal_heads() {
        let doc = PolicyDocument::new(format!(
            "{PREFIXES}:a :next :b . :b :next :c .\n\
             {{ ?x :next ?y }} => {{ ?x :reach ?y }} ."
        ));
        let query = PolicyDocument::new(format!(
            "{PREFIXES}{{ ?x :reach ?y }} => {{ ?x :answer ?y }} ."
        ));
        let out = reasoner().evaluate(&doc, Some(&query)).unwrap();
        let graph = FactGraph::parse(&out, None).unwrap();
        assert_eq!(graph.len(), 2);
        assert!(graph
            .iter()
            .all(|t| t.predicate == node("http://x/answer")));
    }

    #[test]
    fn without_query_only_new_facts_are_returned() {
        let doc = PolicyDocument::new(format!(
            "{PREFIXES}:a :next :b .\n{{ ?x :next ?y }} => {{ ?y :prev ?x }} ."
        ));
        let out = reasoner().evaluate(&doc, None).unwrap();
        let graph = FactGraph::parse(&out, None).unwrap();
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.triples()[0].predicate, node("http://x/prev"));
    }

    #[test]
    fn runaway_rules_hit_the_iteration_cap() {
        let doc = PolicyDocument::new(format!(
            "{PREFIXES}:a :next :b .\n{{ ?x :next ?y }} => {{ ?y :next _:n }} ."
        ));
        let bounded = RuleReasoner::new(
            ReasonerConfig {
                max_iterations: 5,
                max_derived_facts: 1_000,
            },
            None,
        );
        let err = bounded.evaluate(&doc, None).unwrap_err();
        assert!(matches!(err, ReasonError::MaxIterations { max_iterations: 5 }));
    }

    #[test]
    fn a_stratum_ends_only_after_a_round_that_adds_nothing() {
        let doc = PolicyDocument::new(format!(
            "{PREFIXES}:a :p :b .\n{{ ?x :p ?y }} => {{ ?x :q ?y }} ."
        ));
        let rounds = |max_iterations| {
            RuleReasoner::new(
                ReasonerConfig {
                    max_iterations,
                    max_derived_facts: 1_000,
                },
                None,
            )
            .evaluate(&doc, None)
        };
        // Round one derives `:a :q :b`; round two re-fires the rule over
        // every fact and confirms nothing is new.
        assert!(matches!(
            rounds(1).unwrap_err(),
            ReasonError::MaxIterations { max_iterations: 1 }
        ));
        assert_eq!(FactGraph::parse(&rounds(2).unwrap(), None).unwrap().len(), 1);
    }

    #[test]
    fn fact_cap_is_enforced() {
        let doc = PolicyDocument::new(format!(
            "{PREFIXES}:a :next :b .\n{{ ?x :next ?y }} => {{ ?y :next _:n }} ."
        ));
        let bounded = RuleReasoner::new(
            ReasonerConfig {
                max_iterations: 100,
                max_derived_facts: 3,
            },
            None,
        );
        let err = bounded.evaluate(&doc, None).unwrap_err();
        assert!(matches!(err, ReasonError::MaxFacts { limit: 3 }));
    }

    #[test]
    fn malformed_document_is_a_syntax_error() {
        let err = reasoner()
            .evaluate(&PolicyDocument::new("{ ?x <http://x/p> ?y "), None)
            .unwrap_err();
        assert!(matches!(err, ReasonError::Syntax { .. }));
    }
}
