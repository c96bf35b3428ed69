//! Static knowledge modules and per-operation knowledge assembly.
//!
//! Every reasoning call sees one document built from six fragments in a
//! fixed order: ontology, the rules of the requested operation, the shared
//! language module, the referenced data policies, the application policy,
//! and the usage context. Later fragments may use terms the earlier ones
//! define, so the order is part of the contract.
//!
//! The static modules are N3 files bundled with the binary via
//! `include_str!`; a `knowledge_dir` can replace them at startup.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::graph::PolicyDocument;

const ONTOLOGY: &str = include_str!("../data/knowledge/ontology.n3");
const LANGUAGE: &str = include_str!("../data/knowledge/lang.n3");
const COMPLIANCE_RULES: &str = include_str!("../data/knowledge/rules-compliance.n3");
const OBLIGATION_RULES: &str = include_str!("../data/knowledge/rules-obligation.n3");
const DERIVATION_RULES: &str = include_str!("../data/knowledge/rules-derivation.n3");
const CONFLICT_QUERY: &str = include_str!("../data/knowledge/query-conflict.n3");
const OBLIGATION_QUERY: &str = include_str!("../data/knowledge/query-obligation.n3");

/// The three reasoning operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Compliance,
    Obligation,
    Derivation,
}

impl OperationKind {
    pub const ALL: [Self; 3] = [Self::Compliance, Self::Obligation, Self::Derivation];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Compliance => "compliance",
            Self::Obligation => "obligation",
            Self::Derivation => "derivation",
        }
    }

    /// File name of the operation's rule module inside a knowledge directory.
    pub fn rules_file(self) -> &'static str {
        match self {
            Self::Compliance => "rules-compliance.n3",
            Self::Obligation => "rules-obligation.n3",
            Self::Derivation => "rules-derivation.n3",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the static modules were loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KnowledgeSource {
    Bundled,
    Directory(PathBuf),
}

/// The static, operation-independent inputs of every reasoning call.
#[derive(Debug, Clone)]
pub struct StaticKnowledge {
    ontology: String,
    language: String,
    compliance_rules: String,
    obligation_rules: String,
    derivation_rules: String,
    conflict_query: PolicyDocument,
    obligation_query: PolicyDocument,
    source: KnowledgeSource,
}

impl StaticKnowledge {
    /// The modules compiled into the binary.
    pub fn bundled() -> Self {
        Self {
            ontology: ONTOLOGY.to_string(),
            language: LANGUAGE.to_string(),
            compliance_rules: COMPLIANCE_RULES.to_string(),
            obligation_rules: OBLIGATION_RULES.to_string(),
            derivation_rules: DERIVATION_RULES.to_string(),
            conflict_query: PolicyDocument::new(CONFLICT_QUERY),
            obligation_query: PolicyDocument::new(OBLIGATION_QUERY),
            source: KnowledgeSource::Bundled,
        }
    }

    /// Load every module from `dir`. All seven files must be present.
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let read = |name: &str| {
            let path = dir.join(name);
            std::fs::read_to_string(&path).map_err(|source| ConfigError::Knowledge {
                path: path.display().to_string(),
                source,
            })
        };
        let knowledge = Self {
            ontology: read("ontology.n3")?,
            language: read("lang.n3")?,
            compliance_rules: read(OperationKind::Compliance.rules_file())?,
            obligation_rules: read(OperationKind::Obligation.rules_file())?,
            derivation_rules: read(OperationKind::Derivation.rules_file())?,
            conflict_query: read("query-conflict.n3")?.into(),
            obligation_query: read("query-obligation.n3")?.into(),
            source: KnowledgeSource::Directory(dir.to_path_buf()),
        };
        debug!(dir = %dir.display(), "loaded knowledge modules");
        Ok(knowledge)
    }

    /// Bundled modules, or the ones in `dir` when given.
    pub fn from_dir(dir: Option<&Path>) -> Result<Self, ConfigError> {
        match dir {
            Some(dir) => Self::load(dir),
            None => Ok(Self::bundled()),
        }
    }

    pub fn ontology(&self) -> &str {
        &self.ontology
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn rules(&self, kind: OperationKind) -> &str {
        match kind {
            OperationKind::Compliance => &self.compliance_rules,
            OperationKind::Obligation => &self.obligation_rules,
            OperationKind::Derivation => &self.derivation_rules,
        }
    }

    /// The goal query of `kind`; derivation has none and returns every
    /// derived fact.
    pub fn goal_query(&self, kind: OperationKind) -> Option<&PolicyDocument> {
        match kind {
            OperationKind::Compliance => Some(&self.conflict_query),
            OperationKind::Obligation => Some(&self.obligation_query),
            OperationKind::Derivation => None,
        }
    }

    pub fn source(&self) -> &KnowledgeSource {
        &self.source
    }
}

impl Default for StaticKnowledge {
    fn default() -> Self {
        Self::bundled()
    }
}

/// Role of a fragment within a [`KnowledgeBundle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentRole {
    Ontology,
    Rules,
    Language,
    DataPolicies,
    AppPolicy,
    UsageContext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub role: FragmentRole,
    pub text: String,
}

/// The ordered reasoning input of one operation.
#[derive(Debug, Clone)]
pub struct KnowledgeBundle {
    kind: OperationKind,
    fragments: Vec<Fragment>,
}

impl KnowledgeBundle {
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    pub fn roles(&self) -> Vec<FragmentRole> {
        self.fragments.iter().map(|f| f.role).collect()
    }

    /// All fragments joined into one document.
    pub fn to_document(&self) -> PolicyDocument {
        let text: Vec<&str> = self.fragments.iter().map(|f| f.text.as_str()).collect();
        PolicyDocument::new(text.join("\n"))
    }
}

/// Builds [`KnowledgeBundle`]s from the static modules.
#[derive(Debug, Clone)]
pub struct KnowledgeAssembler {
    knowledge: Arc<StaticKnowledge>,
    base_iri: Option<String>,
}

impl KnowledgeAssembler {
    pub fn new(knowledge: Arc<StaticKnowledge>) -> Self {
        Self {
            knowledge,
            base_iri: None,
        }
    }

    /// Restore `base_iri` at the start of every data policy, the app policy
    /// and the usage context, so a `@base` inside one document never
    /// changes how the next one resolves.
    pub fn with_base_iri(mut self, base_iri: impl Into<String>) -> Self {
        self.base_iri = Some(base_iri.into());
        self
    }

    pub fn knowledge(&self) -> &StaticKnowledge {
        &self.knowledge
    }

    /// Data policies are concatenated in the given order, never reordered
    /// or deduplicated.
    pub fn assemble(
        &self,
        kind: OperationKind,
        data_policies: &[PolicyDocument],
        app_policy: &PolicyDocument,
        usage_context: &PolicyDocument,
    ) -> KnowledgeBundle {
        let fragment = |role, text: &str| Fragment {
            role,
            text: text.to_string(),
        };
        let rebased = |document: &PolicyDocument| match &self.base_iri {
            Some(base) => format!("@base <{base}> .\n{document}"),
            None => document.as_str().to_string(),
        };
        let data: Vec<String> = data_policies.iter().map(rebased).collect();
        let fragments = vec![
            fragment(FragmentRole::Ontology, self.knowledge.ontology()),
            fragment(FragmentRole::Rules, self.knowledge.rules(kind)),
            fragment(FragmentRole::Language, self.knowledge.language()),
            fragment(FragmentRole::DataPolicies, &data.join("\n")),
            fragment(FragmentRole::AppPolicy, &rebased(app_policy)),
            fragment(FragmentRole::UsageContext, &rebased(usage_context)),
        ];
        debug!(
            operation = %kind,
            data_policies = data_policies.len(),
            bytes = fragments.iter().map(|f| f.text.len()).sum::<usize>(),
            "assembled knowledge bundle"
        );
        KnowledgeBundle { kind, fragments }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reason::n3::Program;

    fn assembler() -> KnowledgeAssembler {
        KnowledgeAssembler::new(Arc::new(StaticKnowledge::bundled()))
    }

    #[test]
    fn fragments_follow_the_fixed_order() {
        let bundle = assembler().assemble(
            OperationKind::Compliance,
            &[PolicyDocument::new("# d1"), PolicyDocument::new("# d2")],
            &"# app".into(),
            &"# ctx".into(),
        );
        assert_eq!(
            bundle.roles(),
            vec![
                FragmentRole::Ontology,
                FragmentRole::Rules,
                FragmentRole::Language,
                FragmentRole::DataPolicies,
                FragmentRole::AppPolicy,
                FragmentRole::UsageContext,
            ]
        );
        assert_eq!(bundle.fragments()[1].text, COMPLIANCE_RULES);
        assert_eq!(bundle.fragments()[4].text, "# app");
    }

    #[test]
    fn only_the_rule_fragment_depends_on_the_operation() {
        let docs = [PolicyDocument::new("# d")];
        let a = assembler().assemble(OperationKind::Compliance, &docs, &"# a".into(), &"# c".into());
        let b = assembler().assemble(OperationKind::Derivation, &docs, &"# a".into(), &"# c".into());
        for (i, (x, y)) in a.fragments().iter().zip(b.fragments()).enumerate() {
            if i == 1 {
                assert_ne!(x.text, y.text);
            } else {
                assert_eq!(x, y);
            }
        }
    }

    #[test]
    fn data_policies_keep_caller_order_and_duplicates() {
        let docs = ["# second", "# first", "# second"].map(PolicyDocument::new);
        let bundle = assembler().assemble(OperationKind::Derivation, &docs, &"".into(), &"".into());
        assert_eq!(bundle.fragments()[3].text, "# second\n# first\n# second");
    }

    #[test]
    fn base_iri_is_restored_before_each_caller_document() {
        let assembler = assembler().with_base_iri("http://localhost:3000/");
        let docs = [PolicyDocument::new("# d1"), PolicyDocument::new("@base <http://d/2> .")];
        let bundle = assembler.assemble(OperationKind::Compliance, &docs, &"# app".into(), &"# ctx".into());
        let base = "@base <http://localhost:3000/> .\n";
        assert_eq!(
            bundle.fragments()[3].text,
            format!("{base}# d1\n{base}@base <http://d/2> .")
        );
        assert_eq!(bundle.fragments()[4].text, format!("{base}# app"));
        assert_eq!(bundle.fragments()[5].text, format!("{base}# ctx"));
        assert_eq!(bundle.fragments()[2].text, assembler.knowledge().language());
    }

    #[test]
    fn relative_iris_resolve_against_the_base_despite_earlier_base() {
        let assembler = assembler().with_base_iri("http://localhost:3000/");
        let data = PolicyDocument::new("@base <http://d/1> .\n<#policy> <http://example.org/ns#target> <> .");
        let bundle = assembler.assemble(
            OperationKind::Derivation,
            &[data],
            &"<#app> a <http://example.org/ns#AppPolicy> .".into(),
            &"".into(),
        );
        let program = Program::parse(bundle.to_document().as_str(), None).unwrap();
        let subjects: Vec<String> = program
            .facts
            .iter()
            .map(|t| crate::graph::term_value(&crate::graph::subject_term(t)))
            .collect();
        assert!(subjects.contains(&"http://d/1#policy".to_string()));
        assert!(subjects.contains(&"http://localhost:3000/#app".to_string()));
    }

    #[test]
    fn bundled_modules_are_valid_n3() {
        let knowledge = StaticKnowledge::bundled();
        assert!(!Program::parse(knowledge.ontology(), None).unwrap().facts.is_empty());
        assert!(!Program::parse(knowledge.language(), None).unwrap().rules.is_empty());
        for kind in OperationKind::ALL {
            let rules = Program::parse(knowledge.rules(kind), None).unwrap();
            assert!(!rules.rules.is_empty(), "{kind} has no rules");
            if let Some(query) = knowledge.goal_query(kind) {
                assert_eq!(Program::parse(query.as_str(), None).unwrap().rules.len(), 1);
            }
        }
        assert!(knowledge.goal_query(OperationKind::Derivation).is_none());
    }

    #[test]
    fn load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "ontology.n3",
            "lang.n3",
            "rules-compliance.n3",
            "rules-obligation.n3",
            "rules-derivation.n3",
            "query-conflict.n3",
            "query-obligation.n3",
        ] {
            std::fs::write(dir.path().join(name), format!("# {name}")).unwrap();
        }
        let knowledge = StaticKnowledge::load(dir.path()).unwrap();
        assert_eq!(knowledge.rules(OperationKind::Obligation), "# rules-obligation.n3");
        assert_eq!(
            knowledge.source(),
            &KnowledgeSource::Directory(dir.path().to_path_buf())
        );
    }

    #[test]
    fn missing_module_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = StaticKnowledge::load(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Knowledge { path, .. } if path.ends_with("ontology.n3")));
    }
}
