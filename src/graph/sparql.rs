//! SPARQL pattern queries over policy documents, backed by oxigraph.
//!
//! [`GraphQuery`] is the capability the registry uses to pull typed
//! identifiers out of application policies. [`SparqlGraphQuery`] loads each
//! document into a throwaway in-memory [`SparqlStore`] and evaluates the
//! query there; any engine that returns the same bindings can replace it.

use oxigraph::model::{GraphNameRef, Term, Triple};
use oxigraph::sparql::QueryResults;
use oxigraph::store::Store;

use crate::error::GraphError;
use crate::vocab;

use super::{FactGraph, GraphResult, PolicyDocument, term_value};

/// One solution of a SELECT query: variable name → bound term.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    values: Vec<(String, Term)>,
}

impl Bindings {
    pub fn new(values: Vec<(String, Term)>) -> Self {
        Self { values }
    }

    /// The term bound to `var` (without the leading `?`).
    pub fn get(&self, var: &str) -> Option<&Term> {
        self.values
            .iter()
            .find(|(name, _)| name == var)
            .map(|(_, term)| term)
    }

    /// The lexical value bound to `var`.
    pub fn value(&self, var: &str) -> Option<String> {
        self.get(var).map(term_value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Term)> {
        self.values.iter().map(|(name, term)| (name.as_str(), term))
    }
}

/// Pattern-matches a graph document against a declarative query.
pub trait GraphQuery: Send + Sync {
    /// Evaluate a SPARQL SELECT query against `document`.
    ///
    /// No results is an empty vector, never an error.
    fn select(&self, document: &PolicyDocument, query: &str) -> GraphResult<Vec<Bindings>>;
}

/// [`GraphQuery`] over a fresh in-memory oxigraph store per document.
#[derive(Debug, Clone, Default)]
pub struct SparqlGraphQuery {
    base_iri: Option<String>,
}

impl SparqlGraphQuery {
    pub fn new(base_iri: Option<String>) -> Self {
        Self { base_iri }
    }
}

impl GraphQuery for SparqlGraphQuery {
    fn select(&self, document: &PolicyDocument, query: &str) -> GraphResult<Vec<Bindings>> {
        let graph = FactGraph::parse(document, self.base_iri.as_deref())?;
        let store = SparqlStore::in_memory()?;
        store.load(&graph)?;
        store.query_select(&format!("{}{query}", vocab::sparql_prologue()))
    }
}

/// In-memory SPARQL-capable RDF store.
pub struct SparqlStore {
    store: Store,
}

impl SparqlStore {
    /// Create a new in-memory SPARQL store.
    pub fn in_memory() -> GraphResult<Self> {
        let store = Store::new().map_err(|e| GraphError::Sparql {
            message: format!("failed to create oxigraph store: {e}"),
        })?;
        Ok(Self { store })
    }

    /// Insert a triple into the default graph.
    pub fn insert_triple(&self, triple: &Triple) -> GraphResult<()> {
        self.store
            .insert(triple.as_ref().in_graph(GraphNameRef::DefaultGraph))
            .map_err(|e| GraphError::Sparql {
                message: format!("insert failed: {e}"),
            })?;
        Ok(())
    }

    /// Insert every triple of a parsed document.
    pub fn load(&self, graph: &FactGraph) -> GraphResult<usize> {
        for triple in graph {
            self.insert_triple(triple)?;
        }
        Ok(graph.len())
    }

    /// Execute a SPARQL SELECT query and return one [`Bindings`] per solution.
    pub fn query_select(&self, sparql: &str) -> GraphResult<Vec<Bindings>> {
        let results = self.store.query(sparql).map_err(|e| GraphError::Sparql {
            message: format!("SPARQL query failed: {e}"),
        })?;

        match results {
            QueryResults::Solutions(solutions) => {
                let mut rows = Vec::new();
                for solution in solutions {
                    let solution = solution.map_err(|e| GraphError::Sparql {
                        message: format!("solution error: {e}"),
                    })?;
                    let values = solution
                        .iter()
                        .map(|(var, term)| (var.as_str().to_string(), term.clone()))
                        .collect();
                    rows.push(Bindings::new(values));
                }
                Ok(rows)
            }
            QueryResults::Boolean(_) | QueryResults::Graph(_) => Err(GraphError::Sparql {
                message: "only SELECT queries are supported".into(),
            }),
        }
    }

    /// Execute a SPARQL ASK query.
    pub fn query_ask(&self, sparql: &str) -> GraphResult<bool> {
        let results = self.store.query(sparql).map_err(|e| GraphError::Sparql {
            message: format!("SPARQL query failed: {e}"),
        })?;
        match results {
            QueryResults::Boolean(b) => Ok(b),
            _ => Err(GraphError::Sparql {
                message: "expected boolean result from ASK query".into(),
            }),
        }
    }

    /// Get the number of triples in the store.
    pub fn len(&self) -> GraphResult<usize> {
        self.store.len().map_err(|e| GraphError::Sparql {
            message: format!("count failed: {e}"),
        })
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> GraphResult<bool> {
        self.len().map(|n| n == 0)
    }
}

impl std::fmt::Debug for SparqlStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SparqlStore").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const APP: &str = r#"
        @prefix dtou: <http://example.org/ns#> .
        <http://apps/a#app> a dtou:AppPolicy ;
            dtou:output_spec <http://apps/a#out> .
        <http://apps/a#in1> a dtou:InputSpec ; dtou:data <http://d/1> .
        <http://apps/a#out> dtou:port <http://apps/a#p1> .
        <http://apps/a#p1> a dtou:Port ; dtou:name "out1" .
    "#;

    #[test]
    fn load_and_count() {
        let store = SparqlStore::in_memory().unwrap();
        let graph = FactGraph::parse_str(APP, None).unwrap();
        assert_eq!(store.load(&graph).unwrap(), 7);
        assert_eq!(store.len().unwrap(), 7);
        assert!(!store.is_empty().unwrap());
    }

    #[test]
    fn select_with_declared_prefix() {
        let query = SparqlGraphQuery::default();
        let rows = query
            .select(&APP.into(), "SELECT ?n WHERE { ?p a dtou:Port ; dtou:name ?n }")
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value("n").as_deref(), Some("out1"));
    }

    #[test]
    fn select_without_matches_is_empty() {
        let query = SparqlGraphQuery::default();
        let rows = query
            .select(&APP.into(), "SELECT ?s WHERE { ?s a dtou:UsageContext }")
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn invalid_query_is_an_error() {
        let query = SparqlGraphQuery::default();
        let err = query.select(&APP.into(), "SELECT WHERE {").unwrap_err();
        assert!(matches!(err, GraphError::Sparql { .. }));
    }

    #[test]
    fn ask_query() {
        let store = SparqlStore::in_memory().unwrap();
        store
            .load(&FactGraph::parse_str(APP, None).unwrap())
            .unwrap();
        let prologue = vocab::sparql_prologue();
        assert!(store
            .query_ask(&format!("{prologue}ASK {{ ?s a dtou:InputSpec }}"))
            .unwrap());
        assert!(!store
            .query_ask(&format!("{prologue}ASK {{ ?s a dtou:Conflict }}"))
            .unwrap());
    }
}
