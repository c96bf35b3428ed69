//! Rich diagnostic error types for the dtou engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so callers know exactly
//! which stage of the policy pipeline failed and why.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the dtou engine.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text, sources) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum DtouError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Reason(#[from] ReasonError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Graph errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("failed to parse RDF document: {message}")]
    #[diagnostic(
        code(dtou::graph::parse),
        help(
            "Policy documents must be valid Turtle. Relative IRIs are resolved \
             against the configured `base_iri`; check prefixes and statement terminators."
        )
    )]
    Parse { message: String },

    #[error("SPARQL query error: {message}")]
    #[diagnostic(
        code(dtou::graph::sparql),
        help(
            "The SPARQL query failed. Check the query syntax; the `dtou:` prefix \
             is declared automatically."
        )
    )]
    Sparql { message: String },

    #[error("failed to serialize RDF document: {message}")]
    #[diagnostic(
        code(dtou::graph::serialize),
        help("The fact set could not be written as Turtle. This indicates an invalid term.")
    )]
    Serialize { message: String },

    #[error("invalid IRI <{iri}>: {message}")]
    #[diagnostic(
        code(dtou::graph::invalid_iri),
        help("IRIs must be absolute, e.g. `http://example.org/ns#AppPolicy`.")
    )]
    InvalidIri { iri: String, message: String },
}

// ---------------------------------------------------------------------------
// Reasoning errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ReasonError {
    #[error("rule syntax error at byte {offset}: {message}")]
    #[diagnostic(
        code(dtou::reason::syntax),
        help(
            "Rules use the N3 form `{{ body }} => {{ head }} .` with `?var` variables. \
             Check for balanced braces and that every statement ends with `.`."
        )
    )]
    Syntax { offset: usize, message: String },

    #[error("unknown prefix `{prefix}:`")]
    #[diagnostic(
        code(dtou::reason::unknown_prefix),
        help("Declare the prefix with `@prefix {prefix}: <...> .` before using it.")
    )]
    UnknownPrefix { prefix: String },

    #[error("unsupported construct: {construct}")]
    #[diagnostic(
        code(dtou::reason::unsupported),
        help(
            "The embedded reasoner supports plain triple patterns, `;`/`,` lists, \
             variables, blank nodes and the log:/math: comparison builtins. \
             Plug in a different `Reasoner` for full N3."
        )
    )]
    Unsupported { construct: String },

    #[error("builtin {builtin} cannot be evaluated: {message}")]
    #[diagnostic(
        code(dtou::reason::builtin),
        help("Builtin arguments must be bound by earlier patterns in the rule body.")
    )]
    Builtin { builtin: String, message: String },

    #[error("reasoning did not reach a fixpoint within {max_iterations} iterations")]
    #[diagnostic(
        code(dtou::reason::max_iterations),
        help(
            "Increase `reasoner.max_iterations` in the configuration or review the \
             rule modules for non-terminating chains."
        )
    )]
    MaxIterations { max_iterations: usize },

    #[error("reasoning derived more than {limit} facts")]
    #[diagnostic(
        code(dtou::reason::max_facts),
        help(
            "Increase `reasoner.max_derived_facts` or check for rules that keep \
             minting fresh blank nodes."
        )
    )]
    MaxFacts { limit: usize },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("I/O error: {source}")]
    #[diagnostic(
        code(dtou::store::io),
        help(
            "A filesystem operation failed. Check that the data directory exists, \
             has correct permissions, and that the disk is not full."
        )
    )]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("redb transaction error: {message}")]
    #[diagnostic(
        code(dtou::store::redb),
        help(
            "The embedded database encountered a transaction error. \
             This may indicate corruption; try a fresh data directory."
        )
    )]
    Redb { message: String },

    #[error("HTTP request for {url} failed: {message}")]
    #[diagnostic(
        code(dtou::store::http),
        help("Check that the resource server is reachable and accepts text/turtle.")
    )]
    Http { url: String, message: String },

    #[error("resource {url} is not valid UTF-8")]
    #[diagnostic(
        code(dtou::store::encoding),
        help("Policy resources must be UTF-8 encoded Turtle documents.")
    )]
    Encoding { url: String },
}

// ---------------------------------------------------------------------------
// Policy (orchestration) errors
// ---------------------------------------------------------------------------

/// Outcomes of the registration and reasoning operations.
///
/// Every variant is a distinct, client-addressable kind; none of them is
/// retried by the engine.
#[derive(Debug, Error, Diagnostic)]
pub enum PolicyError {
    #[error("application policy for \"{application_id}\" has no usable AppPolicy node: {detail}")]
    #[diagnostic(
        code(dtou::policy::missing_policy_node),
        help(
            "The registered document must contain exactly one IRI-named node typed \
             `dtou:AppPolicy`, e.g. `<#app> a dtou:AppPolicy .`"
        )
    )]
    MissingPolicyNode {
        application_id: String,
        detail: String,
    },

    #[error("application \"{application_id}\" is not registered")]
    #[diagnostic(
        code(dtou::policy::unregistered),
        help("Register the application policy (`POST /dtou`) before checking or deriving.")
    )]
    UnregisteredApplication { application_id: String },

    #[error("a port is required to commit derived policies")]
    #[diagnostic(
        code(dtou::policy::missing_port),
        help("Address the commit to a port, e.g. `/dtou/derived-policies/out1`.")
    )]
    MissingPort,

    #[error("data policy {policy_url} for {data_url} is unavailable: {detail}")]
    #[diagnostic(
        code(dtou::policy::data_policy_unavailable),
        help(
            "Every data URL referenced by the application policy needs a paired \
             usage policy. Attach one at the listed location."
        )
    )]
    DataPolicyUnavailable {
        data_url: String,
        policy_url: String,
        detail: String,
    },

    #[error("{operation} reasoning failed")]
    #[diagnostic(
        code(dtou::policy::reasoning_failure),
        help(
            "The reasoner rejected the assembled knowledge. The input is deterministic, \
             so retrying will not help; inspect the rule modules and policies."
        )
    )]
    ReasoningFailure {
        operation: String,
        #[source]
        source: ReasonError,
    },

    #[error("malformed policy document")]
    #[diagnostic(code(dtou::policy::malformed_document))]
    MalformedDocument {
        #[source]
        source: GraphError,
    },

    #[error("failed to persist derived policy at {url}")]
    #[diagnostic(
        code(dtou::policy::storage),
        help("The storage collaborator rejected the write; check its logs.")
    )]
    Storage {
        url: String,
        #[source]
        source: StoreError,
    },

    #[error("internal error: {message}")]
    #[diagnostic(code(dtou::policy::internal))]
    Internal { message: String },
}

impl From<GraphError> for PolicyError {
    fn from(source: GraphError) -> Self {
        Self::MalformedDocument { source }
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}")]
    #[diagnostic(
        code(dtou::config::read),
        help("Check that the file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration in {path}: {message}")]
    #[diagnostic(
        code(dtou::config::parse),
        help("The configuration is TOML. See `EngineConfig` for the accepted keys.")
    )]
    Parse { path: String, message: String },

    #[error("failed to load knowledge module {path}")]
    #[diagnostic(
        code(dtou::config::knowledge),
        help(
            "A `knowledge_dir` must contain ontology.n3, lang.n3, rules-compliance.n3, \
             rules-obligation.n3, rules-derivation.n3, query-conflict.n3 and query-obligation.n3."
        )
    )]
    Knowledge {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {message}")]
    #[diagnostic(code(dtou::config::invalid), help("Check the EngineConfig fields. {message}"))]
    Invalid { message: String },
}

/// Convenience alias for functions returning dtou results.
pub type DtouResult<T> = std::result::Result<T, DtouError>;

/// Result type for registry and orchestration operations.
pub type PolicyResult<T> = std::result::Result<T, PolicyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_error_converts_to_dtou_error() {
        let err = GraphError::Parse {
            message: "unexpected end".into(),
        };
        let dtou: DtouError = err.into();
        assert!(matches!(dtou, DtouError::Graph(GraphError::Parse { .. })));
    }

    #[test]
    fn graph_error_becomes_malformed_document_policy_error() {
        let err: PolicyError = GraphError::Parse {
            message: "bad".into(),
        }
        .into();
        assert!(matches!(err, PolicyError::MalformedDocument { .. }));
    }

    #[test]
    fn reasoning_failure_keeps_source_chain() {
        let err = PolicyError::ReasoningFailure {
            operation: "compliance".into(),
            source: ReasonError::MaxIterations { max_iterations: 3 },
        };
        let source = std::error::Error::source(&err).unwrap();
        assert!(source.to_string().contains("3 iterations"));
    }

    #[test]
    fn error_display_messages_are_descriptive() {
        let err = PolicyError::DataPolicyUnavailable {
            data_url: "http://d/1".into(),
            policy_url: "http://d/1.dtou".into(),
            detail: "not found".into(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("http://d/1.dtou"));
        assert!(msg.contains("not found"));
    }
}
