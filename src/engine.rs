//! Engine facade: top-level API for the dtou policy engine.
//!
//! The `PolicyEngine` owns the registry and the reasoning pipeline and
//! answers the three policy operations for a registered application:
//! compliance, activated obligations, and per-port policy derivation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use oxigraph::model::vocab::rdf;
use oxigraph::model::{NamedNode, Term, Triple};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::context::ContextBuilder;
use crate::error::{ConfigError, DtouResult, GraphError, PolicyError, PolicyResult};
use crate::graph::{FactGraph, PolicyDocument, write_turtle};
use crate::graph::sparql::{GraphQuery, SparqlGraphQuery};
use crate::knowledge::{KnowledgeAssembler, OperationKind, StaticKnowledge};
use crate::partition::ResultPartitioner;
use crate::paths::DtouPaths;
use crate::reason::engine::RuleReasoner;
use crate::reason::{Reasoner, ReasonerConfig};
use crate::registry::{AppPolicyRecord, ApplicationId, PolicyRegistry};
use crate::store::{
    DurableResourceStore, HttpResourceStore, MemResourceStore, ResourceStore, paired_policy_url,
};
use crate::vocab;

/// Which [`ResourceStore`] backs data-policy reads and derived-policy writes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Process-local; lost on exit.
    #[default]
    Memory,
    /// redb database in `path` (default: the XDG data directory).
    Durable {
        #[serde(default)]
        path: Option<PathBuf>,
    },
    /// Remote resource server.
    Http {
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
}

fn default_timeout_secs() -> u64 {
    10
}

/// Configuration for the dtou engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base for relative IRIs in policy documents
    /// (default: `http://localhost:3000/`).
    pub base_iri: String,
    /// Token appended to a data URL to locate its usage policy (default: `dtou`).
    pub policy_suffix: String,
    /// Directory overriding the bundled knowledge modules.
    pub knowledge_dir: Option<PathBuf>,
    pub store: StoreConfig,
    pub reasoner: ReasonerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_iri: "http://localhost:3000/".into(),
            policy_suffix: "dtou".into(),
            knowledge_dir: None,
            store: StoreConfig::default(),
            reasoner: ReasonerConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a TOML configuration. Missing keys take their defaults.
    pub fn from_toml(text: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse the TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text, &path.display().to_string())
    }

    /// `path` if it exists, otherwise the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        NamedNode::new(self.base_iri.as_str()).map_err(|e| ConfigError::Invalid {
            message: format!("base_iri <{}> is not an absolute IRI: {e}", self.base_iri),
        })?;
        if self.policy_suffix.is_empty() || self.policy_suffix.contains('/') {
            return Err(ConfigError::Invalid {
                message: format!(
                    "policy_suffix \"{}\" must be a non-empty path-free token",
                    self.policy_suffix
                ),
            });
        }
        if self.reasoner.max_iterations == 0 {
            return Err(ConfigError::Invalid {
                message: "reasoner.max_iterations must be > 0".into(),
            });
        }
        Ok(())
    }
}

/// Who is asking, and when. Built fresh for every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub application_id: ApplicationId,
    pub user: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl RequestContext {
    pub fn new(
        application_id: impl Into<ApplicationId>,
        user: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            application_id: application_id.into(),
            user,
            timestamp,
        }
    }

    /// A context stamped with the current time.
    pub fn now(application_id: impl Into<ApplicationId>, user: Option<String>) -> Self {
        Self::new(application_id, user, Utc::now())
    }
}

/// Where a commit wrote derived policies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitReport {
    pub port: String,
    /// Paired policy URLs written, in target order.
    pub written: Vec<String>,
}

/// The dtou usage-control policy engine.
///
/// Owns the application registry and the reasoning collaborators. Every
/// operation assembles its own reasoning input, so concurrent calls share
/// nothing but the registry.
pub struct PolicyEngine {
    config: EngineConfig,
    registry: PolicyRegistry,
    contexts: ContextBuilder,
    assembler: KnowledgeAssembler,
    reasoner: Arc<dyn Reasoner>,
    partitioner: ResultPartitioner,
    store: Arc<dyn ResourceStore>,
}

impl PolicyEngine {
    /// Create an engine with the collaborators named by `config`.
    pub fn new(config: EngineConfig) -> DtouResult<Self> {
        config.validate()?;

        let store: Arc<dyn ResourceStore> = match &config.store {
            StoreConfig::Memory => Arc::new(MemResourceStore::new()),
            StoreConfig::Durable { path } => {
                let dir = match path {
                    Some(path) => path.clone(),
                    None => DtouPaths::resolve()
                        .map_err(|e| ConfigError::Invalid {
                            message: format!("no durable store path configured and {e}"),
                        })?
                        .store_dir(),
                };
                Arc::new(DurableResourceStore::open(&dir)?)
            }
            StoreConfig::Http { timeout_secs } => {
                Arc::new(HttpResourceStore::new(Duration::from_secs(*timeout_secs)))
            }
        };
        let knowledge = StaticKnowledge::from_dir(config.knowledge_dir.as_deref())?;
        let base = Some(config.base_iri.clone());
        let reasoner = Arc::new(RuleReasoner::new(config.reasoner, base.clone()));
        let query = Arc::new(SparqlGraphQuery::new(base));

        info!(
            base_iri = %config.base_iri,
            suffix = %config.policy_suffix,
            store = ?config.store,
            knowledge = ?knowledge.source(),
            "initializing dtou engine"
        );
        Ok(Self::with_components(config, store, reasoner, query, knowledge))
    }

    /// Create an engine around explicit collaborators.
    pub fn with_components(
        config: EngineConfig,
        store: Arc<dyn ResourceStore>,
        reasoner: Arc<dyn Reasoner>,
        query: Arc<dyn GraphQuery>,
        knowledge: StaticKnowledge,
    ) -> Self {
        let base = Some(config.base_iri.clone());
        Self {
            registry: PolicyRegistry::new(query, base.clone()),
            contexts: ContextBuilder,
            assembler: KnowledgeAssembler::new(Arc::new(knowledge))
                .with_base_iri(config.base_iri.clone()),
            reasoner,
            partitioner: ResultPartitioner::new(base),
            store,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.store
    }

    /// Register (or replace) the policy of `application_id`.
    pub fn register(
        &self,
        application_id: impl Into<ApplicationId>,
        policy: impl Into<PolicyDocument>,
    ) -> PolicyResult<Arc<AppPolicyRecord>> {
        self.registry.register(application_id.into(), policy.into())
    }

    pub fn lookup(&self, application_id: &ApplicationId) -> Option<Arc<AppPolicyRecord>> {
        self.registry.lookup(application_id)
    }

    /// Conflicts between the application's declared usage and its data
    /// policies, as Turtle.
    pub fn check_compliance(&self, request: &RequestContext) -> PolicyResult<PolicyDocument> {
        self.reason(OperationKind::Compliance, request)
    }

    /// Obligations activated by the usage, as Turtle.
    pub fn check_obligations(&self, request: &RequestContext) -> PolicyResult<PolicyDocument> {
        self.reason(OperationKind::Obligation, request)
    }

    /// Derived policies: the sub-graph of `port`, or every derived fact
    /// when no port is given. An unknown port yields an empty document.
    pub fn derive_policies(
        &self,
        request: &RequestContext,
        port: Option<&str>,
    ) -> PolicyResult<PolicyDocument> {
        let derived = self.reason(OperationKind::Derivation, request)?;
        let Some(port) = port else {
            return Ok(derived);
        };
        let partition = self.partitioner.partition(&derived).map_err(internal)?;
        info!(
            app = %request.application_id,
            port,
            facts = partition.get(port).len(),
            "selected derived port"
        );
        partition.to_document(port).map_err(internal)
    }

    /// Derive the policy of `port` and write it to the paired policy
    /// location of every target URL. Each stored copy names its target URL
    /// as `dtou:target` of every derived policy, so applications later
    /// reading that URL are governed by it.
    ///
    /// Fails with `MissingPort` before any reasoning when `port` is absent,
    /// and with `MalformedDocument` before any write when a target is not
    /// an absolute IRI. Writes stop at the first failing target.
    pub fn commit_derived_policies(
        &self,
        request: &RequestContext,
        port: Option<&str>,
        targets: &[String],
    ) -> PolicyResult<CommitReport> {
        let port = port.ok_or(PolicyError::MissingPort)?;
        let document = self.derive_policies(request, Some(port))?;
        let port_policy =
            FactGraph::parse(&document, Some(self.config.base_iri.as_str())).map_err(internal)?;
        let documents = targets
            .iter()
            .map(|target| Ok((target, targeted_policy(&port_policy, target)?)))
            .collect::<PolicyResult<Vec<_>>>()?;

        let mut written = Vec::with_capacity(documents.len());
        for (target, document) in documents {
            let url = paired_policy_url(target, &self.config.policy_suffix);
            self.store
                .put(&url, &document)
                .map_err(|source| PolicyError::Storage {
                    url: url.clone(),
                    source,
                })?;
            written.push(url);
        }
        info!(
            app = %request.application_id,
            port,
            targets = written.len(),
            "committed derived policies"
        );
        Ok(CommitReport {
            port: port.to_string(),
            written,
        })
    }

    fn reason(&self, kind: OperationKind, request: &RequestContext) -> PolicyResult<PolicyDocument> {
        let record = self.registry.require(&request.application_id)?;
        let data_policies = self.fetch_data_policies(&record)?;
        let usage_context = self
            .contexts
            .build(request.timestamp, request.user.as_deref(), &record.policy_node)
            .map_err(internal)?;

        let bundle = self.assembler.assemble(
            kind,
            &data_policies,
            &record.policy_document,
            &usage_context,
        );
        let query = self.assembler.knowledge().goal_query(kind);
        let output = self
            .reasoner
            .evaluate(&bundle.to_document(), query)
            .map_err(|source| PolicyError::ReasoningFailure {
                operation: kind.to_string(),
                source,
            })?;

        info!(
            app = %request.application_id,
            operation = %kind,
            data_policies = data_policies.len(),
            bytes = output.as_str().len(),
            "policy operation complete"
        );
        Ok(output)
    }

    /// Fetch the paired policy of every data URL in parallel. The first
    /// failure, in data-URL order, aborts the whole operation.
    fn fetch_data_policies(&self, record: &AppPolicyRecord) -> PolicyResult<Vec<PolicyDocument>> {
        let fetched: Vec<PolicyResult<PolicyDocument>> = record
            .data_urls
            .par_iter()
            .map(|data_url| {
                let policy_url = paired_policy_url(data_url, &self.config.policy_suffix);
                let detail = match self.store.get(&policy_url) {
                    Ok(Some(document)) => return Ok(document),
                    Ok(None) => "not found".to_string(),
                    Err(e) => e.to_string(),
                };
                warn!(
                    app = %record.application_id,
                    data_url = %data_url,
                    policy_url = %policy_url,
                    detail = %detail,
                    "data policy unavailable"
                );
                Err(PolicyError::DataPolicyUnavailable {
                    data_url: data_url.clone(),
                    policy_url,
                    detail,
                })
            })
            .collect();
        fetched.into_iter().collect()
    }
}

/// `port_policy` with `target` added as a `dtou:target` of every derived
/// policy in it.
fn targeted_policy(port_policy: &FactGraph, target: &str) -> PolicyResult<PolicyDocument> {
    let target = NamedNode::new(target).map_err(|e| GraphError::InvalidIri {
        iri: target.to_string(),
        message: e.to_string(),
    })?;
    let mut tags: Vec<Triple> = Vec::new();
    for triple in port_policy {
        let derived = triple.predicate.as_ref() == rdf::TYPE
            && matches!(&triple.object, Term::NamedNode(class) if class.as_ref() == vocab::DERIVED_POLICY);
        if derived && tags.iter().all(|tag| tag.subject != triple.subject) {
            tags.push(Triple::new(
                triple.subject.clone(),
                vocab::TARGET.into_owned(),
                target.clone(),
            ));
        }
    }
    Ok(write_turtle(port_policy.iter().chain(&tags))?)
}

fn internal(e: impl std::fmt::Display) -> PolicyError {
    PolicyError::Internal {
        message: e.to_string(),
    }
}

impl std::fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyEngine")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish()
    }
}
