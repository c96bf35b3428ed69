//! Application policy registry.
//!
//! The [`PolicyRegistry`] caches one [`AppPolicyRecord`] per application:
//! the registered policy document plus the identifiers the reasoning
//! operations need (policy node, referenced data URLs, output ports).
//! Records live in a `DashMap`, so registrations for different applications
//! never contend and a lookup that starts after `register` returns always
//! sees the new record.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use oxigraph::model::vocab::rdf;
use oxigraph::model::{NamedNode, Term};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{PolicyError, PolicyResult};
use crate::graph::sparql::GraphQuery;
use crate::graph::{FactGraph, PolicyDocument, subject_term, term_value};
use crate::vocab;

const POLICY_NODE_QUERY: &str = "SELECT ?s WHERE { ?s a dtou:AppPolicy }";
const DATA_URL_QUERY: &str = "SELECT ?o WHERE { ?s a dtou:InputSpec ; dtou:data ?o }";
const OUTPUT_PORT_QUERY: &str = "SELECT ?n WHERE { \
     ?p a dtou:AppPolicy ; dtou:output_spec ?os . \
     ?os dtou:port ?pt . ?pt dtou:name ?n }";

/// Opaque identifier of a registered application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApplicationId(String);

impl ApplicationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ApplicationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ApplicationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// What the registry knows about one application.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppPolicyRecord {
    pub application_id: ApplicationId,
    pub policy_document: PolicyDocument,
    /// IRI of the node typed `dtou:AppPolicy`.
    pub policy_node: String,
    /// Data URLs attached to input specifications, in document order.
    pub data_urls: Vec<String>,
    /// Names of the ports declared under the policy's output specification.
    pub output_ports: BTreeSet<String>,
}

/// Owned store of application policy records keyed by [`ApplicationId`].
pub struct PolicyRegistry {
    records: DashMap<ApplicationId, Arc<AppPolicyRecord>>,
    query: Arc<dyn GraphQuery>,
    base_iri: Option<String>,
}

impl PolicyRegistry {
    /// Create an empty registry extracting identifiers with `query`.
    pub fn new(query: Arc<dyn GraphQuery>, base_iri: Option<String>) -> Self {
        Self {
            records: DashMap::new(),
            query,
            base_iri,
        }
    }

    /// Extract the record for `policy_document` and store it, replacing any
    /// previous record for the same application wholesale.
    ///
    /// Nothing is stored when extraction fails.
    pub fn register(
        &self,
        application_id: ApplicationId,
        policy_document: PolicyDocument,
    ) -> PolicyResult<Arc<AppPolicyRecord>> {
        let record = Arc::new(self.extract(application_id, policy_document)?);
        let replaced = self
            .records
            .insert(record.application_id.clone(), Arc::clone(&record))
            .is_some();
        info!(
            app = %record.application_id,
            policy_node = %record.policy_node,
            data_urls = record.data_urls.len(),
            ports = record.output_ports.len(),
            replaced,
            "registered application policy"
        );
        Ok(record)
    }

    /// The current record for `application_id`, if any.
    pub fn lookup(&self, application_id: &ApplicationId) -> Option<Arc<AppPolicyRecord>> {
        self.records.get(application_id).map(|r| Arc::clone(r.value()))
    }

    /// Like [`lookup`](Self::lookup), failing with `UnregisteredApplication`.
    pub fn require(&self, application_id: &ApplicationId) -> PolicyResult<Arc<AppPolicyRecord>> {
        self.lookup(application_id)
            .ok_or_else(|| PolicyError::UnregisteredApplication {
                application_id: application_id.to_string(),
            })
    }

    /// Registered application ids, sorted.
    pub fn application_ids(&self) -> Vec<ApplicationId> {
        let mut ids: Vec<ApplicationId> = self.records.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Build a record without storing it.
    pub fn extract(
        &self,
        application_id: ApplicationId,
        policy_document: PolicyDocument,
    ) -> PolicyResult<AppPolicyRecord> {
        let graph = FactGraph::parse(&policy_document, self.base_iri.as_deref())?;
        let policy_node = self.policy_node(&application_id, &policy_document, &graph)?;

        let mut data_urls: Vec<(usize, Term)> = self
            .query
            .select(&policy_document, DATA_URL_QUERY)?
            .into_iter()
            .filter_map(|row| row.get("o").cloned())
            .map(|term| (graph.first_mention(&term).unwrap_or(usize::MAX), term))
            .collect();
        data_urls.sort_by_key(|(position, _)| *position);
        let mut seen = BTreeSet::new();
        let data_urls = data_urls
            .into_iter()
            .map(|(_, term)| term_value(&term))
            .filter(|url| seen.insert(url.clone()))
            .collect();

        let output_ports = self
            .query
            .select(&policy_document, OUTPUT_PORT_QUERY)?
            .into_iter()
            .filter_map(|row| row.value("n"))
            .collect();

        Ok(AppPolicyRecord {
            application_id,
            policy_document,
            policy_node,
            data_urls,
            output_ports,
        })
    }

    /// The first IRI-named `dtou:AppPolicy` node in document order.
    fn policy_node(
        &self,
        application_id: &ApplicationId,
        document: &PolicyDocument,
        graph: &FactGraph,
    ) -> PolicyResult<String> {
        let mut blank = false;
        let mut candidates: Vec<(usize, NamedNode)> = Vec::new();
        for row in self.query.select(document, POLICY_NODE_QUERY)? {
            match row.get("s") {
                Some(Term::NamedNode(node)) => {
                    candidates.push((type_position(graph, node), node.clone()));
                }
                Some(_) => blank = true,
                None => {}
            }
        }
        candidates.sort_by_key(|(position, _)| *position);

        if candidates.len() > 1 {
            warn!(
                app = %application_id,
                candidates = candidates.len(),
                "several AppPolicy nodes declared, using the first in document order"
            );
        }

        candidates
            .into_iter()
            .next()
            .map(|(_, node)| node.into_string())
            .ok_or_else(|| PolicyError::MissingPolicyNode {
                application_id: application_id.to_string(),
                detail: if blank {
                    "the AppPolicy node is a blank node and cannot be referenced".into()
                } else {
                    "no node is typed dtou:AppPolicy".into()
                },
            })
    }
}

/// Index of the `(node, rdf:type, dtou:AppPolicy)` triple.
fn type_position(graph: &FactGraph, node: &NamedNode) -> usize {
    let node = Term::from(node.clone());
    graph
        .iter()
        .position(|t| {
            t.predicate.as_ref() == rdf::TYPE
                && matches!(&t.object, Term::NamedNode(o) if o.as_ref() == vocab::APP_POLICY)
                && subject_term(t) == node
        })
        .unwrap_or(usize::MAX)
}

impl fmt::Debug for PolicyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyRegistry")
            .field("count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::sparql::SparqlGraphQuery;

    const BASE: &str = "http://localhost:3000/";

    const APP: &str = r#"
        @prefix dtou: <http://example.org/ns#> .
        <#app> a dtou:AppPolicy ;
            dtou:input_spec <#in1>, <#in2> ;
            dtou:output_spec <#out> .
        <#in1> a dtou:InputSpec ; dtou:data <http://d/2> .
        <#in2> a dtou:InputSpec ; dtou:data <http://d/1> .
        <#out> dtou:port <#p1>, <#p2> .
        <#p1> a dtou:Port ; dtou:name "out1" .
        <#p2> a dtou:Port ; dtou:name "out2" .
    "#;

    const OTHER: &str = r#"
        @prefix dtou: <http://example.org/ns#> .
        <#other> a dtou:AppPolicy ; dtou:output_spec [ dtou:port [ dtou:name "only" ] ] .
    "#;

    fn registry() -> PolicyRegistry {
        let base = Some(BASE.to_string());
        PolicyRegistry::new(Arc::new(SparqlGraphQuery::new(base.clone())), base)
    }

    #[test]
    fn register_and_lookup() {
        let reg = registry();
        let id = ApplicationId::from("app-1");
        reg.register(id.clone(), APP.into()).unwrap();

        let record = reg.lookup(&id).unwrap();
        assert_eq!(record.policy_node, "http://localhost:3000/#app");
        assert_eq!(record.data_urls, vec!["http://d/2", "http://d/1"]);
        assert_eq!(
            record.output_ports.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["out1", "out2"]
        );
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn reregistration_replaces_the_record() {
        let reg = registry();
        let id = ApplicationId::from("app-1");
        reg.register(id.clone(), APP.into()).unwrap();
        reg.register(id.clone(), OTHER.into()).unwrap();

        let record = reg.lookup(&id).unwrap();
        assert_eq!(record.policy_node, "http://localhost:3000/#other");
        assert!(record.data_urls.is_empty());
        assert_eq!(record.output_ports.len(), 1);
        assert!(record.output_ports.contains("only"));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn missing_policy_node_caches_nothing() {
        let reg = registry();
        let id = ApplicationId::from("app-1");
        let doc = "@prefix dtou: <http://example.org/ns#> . <#x> a dtou:InputSpec .";
        let err = reg.register(id.clone(), doc.into()).unwrap_err();
        assert!(matches!(err, PolicyError::MissingPolicyNode { .. }));
        assert!(reg.lookup(&id).is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn blank_policy_node_is_rejected() {
        let reg = registry();
        let doc = "@prefix dtou: <http://example.org/ns#> . [] a dtou:AppPolicy .";
        let err = reg.register("app".into(), doc.into()).unwrap_err();
        let PolicyError::MissingPolicyNode { detail, .. } = err else {
            panic!("expected MissingPolicyNode");
        };
        assert!(detail.contains("blank"));
    }

    #[test]
    fn first_policy_node_in_document_order_wins() {
        let reg = registry();
        let doc = r#"
            @prefix dtou: <http://example.org/ns#> .
            <#zeta> a dtou:AppPolicy .
            <#alpha> a dtou:AppPolicy .
        "#;
        let record = reg.register("app".into(), doc.into()).unwrap();
        assert_eq!(record.policy_node, "http://localhost:3000/#zeta");
    }

    #[test]
    fn malformed_document_is_rejected() {
        let reg = registry();
        let err = reg.register("app".into(), "<#a> a".into()).unwrap_err();
        assert!(matches!(err, PolicyError::MalformedDocument { .. }));
        assert!(reg.is_empty());
    }

    #[test]
    fn require_reports_unregistered() {
        let reg = registry();
        let err = reg.require(&"ghost".into()).unwrap_err();
        assert!(matches!(
            err,
            PolicyError::UnregisteredApplication { application_id } if application_id == "ghost"
        ));
    }

    #[test]
    fn concurrent_registrations_do_not_interfere() {
        let reg = Arc::new(registry());
        std::thread::scope(|scope| {
            for i in 0..8 {
                let reg = Arc::clone(&reg);
                scope.spawn(move || {
                    reg.register(ApplicationId::new(format!("app-{i}")), APP.into())
                        .unwrap();
                });
            }
        });
        assert_eq!(reg.len(), 8);
        assert_eq!(reg.application_ids()[0].as_str(), "app-0");
    }
}
