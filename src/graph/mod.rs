//! RDF documents and fact graphs.
//!
//! - [`PolicyDocument`]: an immutable Turtle text, the unit exchanged with
//!   storage, the reasoner and callers.
//! - [`FactGraph`]: the parsed triples of a document, kept in document order
//!   so that tie-breaks ("first match wins") and partition buckets are
//!   deterministic.
//! - [`sparql`]: the [`GraphQuery`](sparql::GraphQuery) capability backed by oxigraph.

pub mod sparql;

use std::fmt;

use oxigraph::io::{RdfFormat, RdfParser, RdfSerializer};
use oxigraph::model::{NamedNodeRef, Term, Triple};
use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::vocab::{DTOU_NS, DTOU_PREFIX, XSD_NS};

/// Result type for graph operations.
pub type GraphResult<T> = std::result::Result<T, GraphError>;

/// An RDF graph serialized as Turtle text. Immutable once constructed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyDocument(String);

impl PolicyDocument {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the document has no content at all (not even prefixes).
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for PolicyDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for PolicyDocument {
    fn from(text: String) -> Self {
        Self(text)
    }
}

impl From<&str> for PolicyDocument {
    fn from(text: &str) -> Self {
        Self(text.to_string())
    }
}

/// The lexical value of a term: IRI string, blank node id, or literal value.
pub fn term_value(term: &Term) -> String {
    match term {
        Term::NamedNode(node) => node.as_str().to_string(),
        Term::BlankNode(node) => node.as_str().to_string(),
        Term::Literal(literal) => literal.value().to_string(),
        #[allow(unreachable_patterns)]
        other => other.to_string(),
    }
}

/// The subject of a triple as a general [`Term`].
pub fn subject_term(triple: &Triple) -> Term {
    triple.subject.clone().into()
}

/// Parsed triples of one document, in document order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FactGraph {
    triples: Vec<Triple>,
}

impl FactGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_triples(triples: Vec<Triple>) -> Self {
        Self { triples }
    }

    /// Parse a Turtle document, resolving relative IRIs against `base_iri`.
    pub fn parse(document: &PolicyDocument, base_iri: Option<&str>) -> GraphResult<Self> {
        Self::parse_str(document.as_str(), base_iri)
    }

    pub fn parse_str(text: &str, base_iri: Option<&str>) -> GraphResult<Self> {
        let mut parser = RdfParser::from_format(RdfFormat::Turtle);
        if let Some(base) = base_iri {
            parser = parser
                .with_base_iri(base)
                .map_err(|e| GraphError::InvalidIri {
                    iri: base.to_string(),
                    message: e.to_string(),
                })?;
        }

        let mut triples = Vec::new();
        for quad in parser.for_reader(text.as_bytes()) {
            let quad = quad.map_err(|e| GraphError::Parse {
                message: e.to_string(),
            })?;
            triples.push(Triple::new(quad.subject, quad.predicate, quad.object));
        }
        Ok(Self { triples })
    }

    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Triple> {
        self.triples.iter()
    }

    pub fn triples(&self) -> &[Triple] {
        &self.triples
    }

    pub fn into_triples(self) -> Vec<Triple> {
        self.triples
    }

    /// Objects of `(subject, predicate, ?)` in document order.
    pub fn objects<'a>(
        &'a self,
        subject: &'a Term,
        predicate: NamedNodeRef<'a>,
    ) -> impl Iterator<Item = &'a Term> + 'a {
        self.triples
            .iter()
            .filter(move |t| t.predicate.as_ref() == predicate && &subject_term(t) == subject)
            .map(|t| &t.object)
    }

    /// Index of the first triple mentioning `term` in subject or object position.
    pub fn first_mention(&self, term: &Term) -> Option<usize> {
        self.triples
            .iter()
            .position(|t| &t.object == term || &subject_term(t) == term)
    }

    /// Serialize as Turtle with the `dtou:` and `xsd:` prefixes declared.
    pub fn to_document(&self) -> GraphResult<PolicyDocument> {
        write_turtle(self.triples.iter())
    }
}

impl<'a> IntoIterator for &'a FactGraph {
    type Item = &'a Triple;
    type IntoIter = std::slice::Iter<'a, Triple>;

    fn into_iter(self) -> Self::IntoIter {
        self.triples.iter()
    }
}

/// Serialize triples as a Turtle document.
pub fn write_turtle<'a>(triples: impl IntoIterator<Item = &'a Triple>) -> GraphResult<PolicyDocument> {
    let mut writer = RdfSerializer::from_format(RdfFormat::Turtle)
        .with_prefix(DTOU_PREFIX, DTOU_NS)
        .map_err(serialize_error)?
        .with_prefix("xsd", XSD_NS)
        .map_err(serialize_error)?
        .for_writer(Vec::new());
    for triple in triples {
        writer.serialize_triple(triple).map_err(serialize_error)?;
    }
    let bytes = writer.finish().map_err(serialize_error)?;
    String::from_utf8(bytes)
        .map(PolicyDocument::from)
        .map_err(serialize_error)
}

fn serialize_error(e: impl fmt::Display) -> GraphError {
    GraphError::Serialize {
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocab;

    const APP: &str = r#"
        @prefix dtou: <http://example.org/ns#> .
        <#app> a dtou:AppPolicy ;
            dtou:output_spec [ dtou:port [ a dtou:Port ; dtou:name "out1" ] ] .
    "#;

    #[test]
    fn parse_resolves_relative_iris_against_base() {
        let graph = FactGraph::parse_str(APP, Some("http://localhost:3000/apps/a")).unwrap();
        assert_eq!(graph.len(), 5);
        let first = subject_term(&graph.triples()[0]);
        assert_eq!(term_value(&first), "http://localhost:3000/apps/a#app");
    }

    #[test]
    fn parse_rejects_malformed_turtle() {
        let err = FactGraph::parse_str("<a> <b> .", None).unwrap_err();
        assert!(matches!(err, GraphError::Parse { .. }));
    }

    #[test]
    fn objects_follow_document_order() {
        let doc = r#"
            @prefix dtou: <http://example.org/ns#> .
            <http://x/s> dtou:data <http://d/2>, <http://d/1> .
        "#;
        let graph = FactGraph::parse_str(doc, None).unwrap();
        let s = Term::from(oxigraph::model::NamedNode::new("http://x/s").unwrap());
        let objects: Vec<String> = graph.objects(&s, vocab::DATA).map(term_value).collect();
        assert_eq!(objects, vec!["http://d/2", "http://d/1"]);
    }

    #[test]
    fn serialized_document_parses_back_to_same_facts() {
        let graph = FactGraph::parse_str(APP, Some("http://localhost:3000/")).unwrap();
        let doc = graph.to_document().unwrap();
        assert!(doc.as_str().contains("dtou:"));
        let reparsed = FactGraph::parse(&doc, None).unwrap();
        assert_eq!(reparsed.len(), graph.len());
    }

    #[test]
    fn empty_graph_serializes_to_factless_document() {
        let doc = FactGraph::new().to_document().unwrap();
        assert!(FactGraph::parse(&doc, None).unwrap().is_empty());
    }
}
