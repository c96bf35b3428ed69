//! Resource storage for data and usage policies.
//!
//! The engine only needs two things from storage: read the usage policy
//! paired with a data resource, and write derived policies to the pairs of
//! target resources. Three backends implement [`ResourceStore`]:
//!
//! - [`MemResourceStore`]: process-local, backed by `DashMap`
//! - [`DurableResourceStore`]: survives restarts, backed by redb
//! - [`HttpResourceStore`]: remote resources over HTTP (`text/turtle`)

pub mod durable;
pub mod http;
pub mod mem;

pub use durable::DurableResourceStore;
pub use http::HttpResourceStore;
pub use mem::MemResourceStore;

use crate::error::StoreError;
use crate::graph::PolicyDocument;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Key-value access to policy resources addressed by URL.
pub trait ResourceStore: Send + Sync {
    /// Read the document at `url`. A missing resource is `Ok(None)`.
    fn get(&self, url: &str) -> StoreResult<Option<PolicyDocument>>;

    /// Create or replace the document at `url`.
    fn put(&self, url: &str, document: &PolicyDocument) -> StoreResult<()>;
}

/// Location of the usage policy paired with `data_url`: the URL with
/// `.<token>` appended. Pure: the same inputs always give the same URL.
pub fn paired_policy_url(data_url: &str, token: &str) -> String {
    format!("{data_url}.{token}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paired_url_appends_token() {
        assert_eq!(paired_policy_url("http://d/1", "dtou"), "http://d/1.dtou");
        assert_eq!(
            paired_policy_url("http://d/1", "dtou"),
            paired_policy_url("http://d/1", "dtou")
        );
        assert_eq!(paired_policy_url("http://d/a.ttl", "acl"), "http://d/a.ttl.acl");
    }
}
