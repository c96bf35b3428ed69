// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # dtou-engine
//!
//! A usage-control ("Data Terms of Use") policy engine. Applications declare
//! how they intend to use data; data resources carry usage policies. The
//! engine reasons over both to report conflicts, activated obligations and
//! the policies that propagate to each of the application's output ports.
//!
//! ## Architecture
//!
//! - **Registry** (`registry`): per-application policy records with extracted identifiers
//! - **Knowledge** (`knowledge`): static N3 modules and the fixed-order bundle assembler
//! - **Context** (`context`): per-request usage context documents
//! - **Reasoning** (`reason`): the `Reasoner` seam and an in-process N3 rule engine
//! - **Partitioning** (`partition`): per-port split of derived facts
//! - **Storage** (`store`): paired policy resources in memory, redb or over HTTP
//! - **Graphs** (`graph`): Turtle documents and SPARQL over oxigraph
//!
//! ## Library usage
//!
//! ```no_run
//! use dtou_engine::engine::{EngineConfig, PolicyEngine, RequestContext};
//!
//! let engine = PolicyEngine::new(EngineConfig::default()).unwrap();
//! engine
//!     .register(
//!         "app-1",
//!         "@prefix dtou: <http://example.org/ns#> . <#app> a dtou:AppPolicy .",
//!     )
//!     .unwrap();
//! let conflicts = engine
//!     .check_compliance(&RequestContext::now("app-1", None))
//!     .unwrap();
//! println!("{conflicts}");
//! ```

pub mod context;
pub mod engine;
pub mod error;
pub mod graph;
pub mod knowledge;
pub mod partition;
pub mod paths;
pub mod reason;
pub mod registry;
pub mod store;
pub mod vocab;
