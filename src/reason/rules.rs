//! Data model of N3 inference rules.
//!
//! Rules are data, not code: they arrive inside knowledge documents as
//! `{ body } => { head } .` statements and are compiled into these structs
//! by [`super::n3`].

use std::collections::BTreeSet;

use oxigraph::model::Term;

use super::builtins::Builtin;

// ---------------------------------------------------------------------------
// Rule term
// ---------------------------------------------------------------------------

/// A term in a rule pattern: constant, universally quantified variable, or
/// blank node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RuleTerm {
    /// A concrete RDF term.
    Constant(Term),
    /// A `?x` variable, scoped to the whole rule.
    Variable(String),
    /// A `_:x` or `[]` blank node. Acts as a variable in a body and is
    /// skolemized (one fresh node per distinct head binding) in a head.
    Blank(String),
}

impl RuleTerm {
    /// Returns `true` if this term is a variable.
    pub fn is_variable(&self) -> bool {
        matches!(self, Self::Variable(_))
    }

    /// The binding key for variables and blank nodes.
    pub(crate) fn binding_key(&self) -> Option<String> {
        match self {
            Self::Constant(_) => None,
            Self::Variable(name) => Some(name.clone()),
            Self::Blank(label) => Some(format!("_:{label}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Triple pattern
// ---------------------------------------------------------------------------

/// A triple pattern in a rule body or head.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TriplePattern {
    pub subject: RuleTerm,
    pub predicate: RuleTerm,
    pub object: RuleTerm,
}

impl TriplePattern {
    pub fn new(subject: RuleTerm, predicate: RuleTerm, object: RuleTerm) -> Self {
        Self {
            subject,
            predicate,
            object,
        }
    }

    pub fn terms(&self) -> [&RuleTerm; 3] {
        [&self.subject, &self.predicate, &self.object]
    }
}

// ---------------------------------------------------------------------------
// Filters and formulas
// ---------------------------------------------------------------------------

/// A body condition evaluated after all triple patterns are joined.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// A binary comparison builtin (`?a math:lessThan ?b`).
    Compare {
        builtin: Builtin,
        left: RuleTerm,
        right: RuleTerm,
    },
    /// `_:s log:notIncludes { ... }`: holds when the nested formula has no
    /// solution extending the current bindings.
    NotIncludes(Formula),
}

/// A conjunction of triple patterns plus filters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Formula {
    pub patterns: Vec<TriplePattern>,
    pub filters: Vec<Filter>,
}

impl Formula {
    /// Whether any filter (at any nesting depth) is a negation.
    pub fn has_negation(&self) -> bool {
        self.filters.iter().any(|f| matches!(f, Filter::NotIncludes(_)))
    }
}

// ---------------------------------------------------------------------------
// Inference rule
// ---------------------------------------------------------------------------

/// A single inference rule: match the body, produce the head.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRule {
    /// Position-derived name (`rule@<byte offset>`), used in logs.
    pub name: String,
    pub body: Formula,
    pub head: Vec<TriplePattern>,
}

impl InferenceRule {
    /// Variables occurring in the head, sorted. Skolem blank nodes are keyed
    /// by the values of exactly these variables.
    pub fn head_variables(&self) -> Vec<String> {
        self.head
            .iter()
            .flat_map(|p| p.terms())
            .filter_map(|t| match t {
                RuleTerm::Variable(name) => Some(name.clone()),
                _ => None,
            })
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Whether the rule must wait for the positive closure (it negates).
    pub fn is_stratified(&self) -> bool {
        self.body.has_negation()
    }
}
