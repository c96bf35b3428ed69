//! Per-port partitioning of derived documents.
//!
//! A derived fact `(s, dtou:port, P)` attributes the subject `s` to the port
//! whose `dtou:name` is stated on `P`. Every fact about `s` then lands in
//! that port's bucket. Facts about subjects without a port link are
//! reasoning scaffolding and belong to no bucket.

use std::collections::{BTreeMap, HashSet};

use oxigraph::model::{Term, Triple};

use crate::graph::{FactGraph, GraphResult, PolicyDocument, subject_term, term_value, write_turtle};
use crate::vocab;

/// Port name → facts attributed to that port, in document order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortPartition {
    buckets: BTreeMap<String, Vec<Triple>>,
}

impl PortPartition {
    /// Facts of `port`; empty when the port has none.
    pub fn get(&self, port: &str) -> &[Triple] {
        self.buckets.get(port).map(Vec::as_slice).unwrap_or_default()
    }

    /// Port names with at least one fact, sorted.
    pub fn ports(&self) -> impl Iterator<Item = &str> {
        self.buckets.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// The bucket of `port` as a Turtle document.
    pub fn to_document(&self, port: &str) -> GraphResult<PolicyDocument> {
        write_turtle(self.get(port))
    }

    pub fn into_inner(self) -> BTreeMap<String, Vec<Triple>> {
        self.buckets
    }
}

/// Splits derived documents by port.
#[derive(Debug, Clone, Default)]
pub struct ResultPartitioner {
    base_iri: Option<String>,
}

impl ResultPartitioner {
    pub fn new(base_iri: Option<String>) -> Self {
        Self { base_iri }
    }

    pub fn partition(&self, derived: &PolicyDocument) -> GraphResult<PortPartition> {
        let graph = FactGraph::parse(derived, self.base_iri.as_deref())?;
        Ok(partition_graph(&graph))
    }

    /// Facts attributed to `port`; an unknown port yields an empty vector.
    pub fn select_port(&self, derived: &PolicyDocument, port: &str) -> GraphResult<Vec<Triple>> {
        Ok(self.partition(derived)?.get(port).to_vec())
    }
}

/// Partition an already parsed graph.
pub fn partition_graph(graph: &FactGraph) -> PortPartition {
    let mut buckets: BTreeMap<String, Vec<Triple>> = BTreeMap::new();
    let mut assigned: HashSet<(String, Term)> = HashSet::new();

    for link in graph.iter().filter(|t| t.predicate.as_ref() == vocab::PORT_REL) {
        // A port node without a name cannot be addressed.
        let Some(name) = graph.objects(&link.object, vocab::NAME).next().map(term_value) else {
            continue;
        };
        let subject = subject_term(link);
        if !assigned.insert((name.clone(), subject.clone())) {
            continue;
        }
        buckets
            .entry(name)
            .or_default()
            .extend(graph.iter().filter(|t| subject_term(t) == subject).cloned());
    }

    PortPartition { buckets }
}
