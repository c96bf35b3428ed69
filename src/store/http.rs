//! Remote resources over HTTP.
//!
//! Policies live next to their data on a resource server: `GET` reads a
//! paired policy, `PUT` writes a committed derived policy. Both exchange
//! `text/turtle`.

use std::time::Duration;

use crate::error::StoreError;
use crate::graph::PolicyDocument;

use super::{ResourceStore, StoreResult};

const TURTLE: &str = "text/turtle";

/// [`ResourceStore`] over a blocking HTTP agent.
#[derive(Debug, Clone)]
pub struct HttpResourceStore {
    agent: ureq::Agent,
}

impl HttpResourceStore {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self { agent }
    }
}

impl Default for HttpResourceStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl ResourceStore for HttpResourceStore {
    fn get(&self, url: &str) -> StoreResult<Option<PolicyDocument>> {
        match self.agent.get(url).set("Accept", TURTLE).call() {
            Ok(response) => response
                .into_string()
                .map(|body| Some(PolicyDocument::new(body)))
                .map_err(|_| StoreError::Encoding { url: url.into() }),
            Err(ureq::Error::Status(404 | 410, _)) => Ok(None),
            Err(e) => Err(StoreError::Http {
                url: url.into(),
                message: e.to_string(),
            }),
        }
    }

    fn put(&self, url: &str, document: &PolicyDocument) -> StoreResult<()> {
        self.agent
            .put(url)
            .set("Content-Type", TURTLE)
            .send_string(document.as_str())
            .map_err(|e| StoreError::Http {
                url: url.into(),
                message: e.to_string(),
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_server_is_an_http_error() {
        let store = HttpResourceStore::new(Duration::from_millis(200));
        let err = store.get("http://127.0.0.1:9/d/1.dtou").unwrap_err();
        assert!(matches!(err, StoreError::Http { url, .. } if url.ends_with(".dtou")));
    }
}
