//! Usage context of a single request.

use chrono::{DateTime, SecondsFormat, Utc};
use oxigraph::model::vocab::{rdf, xsd};
use oxigraph::model::{BlankNode, Literal, NamedNode, Triple};

use crate::error::GraphError;
use crate::graph::{GraphResult, PolicyDocument, write_turtle};
use crate::vocab;

/// Facts about the current access attempt. Built fresh per request and
/// never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageContext {
    pub timestamp: DateTime<Utc>,
    pub user: Option<String>,
    /// IRI of the application's `dtou:AppPolicy` node.
    pub app_policy_node: String,
}

impl UsageContext {
    pub fn new(timestamp: DateTime<Utc>, user: Option<String>, app_policy_node: impl Into<String>) -> Self {
        Self {
            timestamp,
            user,
            app_policy_node: app_policy_node.into(),
        }
    }

    /// The `time` literal: RFC 3339, millisecond precision, UTC `Z`.
    pub fn time_literal(&self) -> Literal {
        Literal::new_typed_literal(
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            xsd::DATE_TIME,
        )
    }

    /// The context graph. The application-info node is a fresh blank node.
    pub fn to_triples(&self) -> GraphResult<Vec<Triple>> {
        let context = NamedNode::new(vocab::USAGE_CONTEXT_NODE).map_err(|e| GraphError::InvalidIri {
            iri: vocab::USAGE_CONTEXT_NODE.to_string(),
            message: e.to_string(),
        })?;
        let policy = NamedNode::new(self.app_policy_node.as_str()).map_err(|e| GraphError::InvalidIri {
            iri: self.app_policy_node.clone(),
            message: e.to_string(),
        })?;
        let app = BlankNode::default();

        let mut triples = vec![
            Triple::new(context.clone(), rdf::TYPE.into_owned(), vocab::USAGE_CONTEXT.into_owned()),
            Triple::new(context.clone(), vocab::TIME.into_owned(), self.time_literal()),
        ];
        if let Some(user) = &self.user {
            triples.push(Triple::new(
                context.clone(),
                vocab::USER.into_owned(),
                Literal::new_simple_literal(user),
            ));
        }
        triples.extend([
            Triple::new(context, vocab::APP.into_owned(), app.clone()),
            Triple::new(app.clone(), rdf::TYPE.into_owned(), vocab::APP_INFO.into_owned()),
            Triple::new(app, vocab::POLICY.into_owned(), policy),
        ]);
        Ok(triples)
    }

    pub fn to_document(&self) -> GraphResult<PolicyDocument> {
        write_turtle(&self.to_triples()?)
    }
}

/// Materializes usage contexts as Turtle documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextBuilder;

impl ContextBuilder {
    pub fn build(
        &self,
        timestamp: DateTime<Utc>,
        user: Option<&str>,
        app_policy_node: &str,
    ) -> GraphResult<PolicyDocument> {
        UsageContext::new(timestamp, user.map(str::to_string), app_policy_node).to_document()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{FactGraph, subject_term, term_value};
    use chrono::TimeZone;
    use oxigraph::model::Term;

    const POLICY: &str = "http://localhost:3000/apps/a#app";

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 17, 8, 30, 0).unwrap()
    }

    #[test]
    fn time_is_millisecond_utc() {
        let ctx = UsageContext::new(at(), None, POLICY);
        assert_eq!(ctx.time_literal().value(), "2024-05-17T08:30:00.000Z");
        assert_eq!(ctx.time_literal().datatype(), xsd::DATE_TIME);
    }

    #[test]
    fn document_links_context_to_policy_through_app_info() {
        let doc = ContextBuilder.build(at(), Some("alice"), POLICY).unwrap();
        let graph = FactGraph::parse(&doc, None).unwrap();
        assert_eq!(graph.len(), 6);

        let context = Term::from(NamedNode::new(vocab::USAGE_CONTEXT_NODE).unwrap());
        let app: Vec<&Term> = graph.objects(&context, vocab::APP).collect();
        assert_eq!(app.len(), 1);
        assert!(matches!(app[0], Term::BlankNode(_)));

        let policy: Vec<String> = graph.objects(app[0], vocab::POLICY).map(term_value).collect();
        assert_eq!(policy, vec![POLICY]);

        let user: Vec<String> = graph.objects(&context, vocab::USER).map(term_value).collect();
        assert_eq!(user, vec!["alice"]);
    }

    #[test]
    fn user_is_optional() {
        let triples = UsageContext::new(at(), None, POLICY).to_triples().unwrap();
        assert_eq!(triples.len(), 5);
        assert!(triples.iter().all(|t| t.predicate.as_ref() != vocab::USER));
    }

    #[test]
    fn app_info_nodes_are_fresh_per_call() {
        let ctx = UsageContext::new(at(), None, POLICY);
        let app_node = |triples: Vec<Triple>| {
            triples
                .into_iter()
                .find(|t| t.predicate.as_ref() == vocab::POLICY)
                .map(|t| subject_term(&t))
                .unwrap()
        };
        let first = app_node(ctx.to_triples().unwrap());
        let second = app_node(ctx.to_triples().unwrap());
        assert_ne!(first, second);
    }

    #[test]
    fn invalid_policy_node_is_an_error() {
        let err = UsageContext::new(at(), None, "not an iri").to_triples().unwrap_err();
        assert!(matches!(err, GraphError::InvalidIri { .. }));
    }
}
