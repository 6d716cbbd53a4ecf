//! Registry of proxiable upstreams, persisted in the `APIS` namespace.

use crate::error::GatewayError;
use crate::store::{Store, StoreError, APIS_NAMESPACE, SESSIONS_NAMESPACE};
use crate::validation::{validate_endpoint_id, validate_upstream_url};

/// One proxiable upstream and the account credited for its use.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Endpoint {
    pub id: String,
    pub url: String,
    pub address: String,
}

impl Endpoint {
    pub fn new(id: impl Into<String>, url: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            address: address.into(),
        }
    }

    /// Check the record before it is written.
    pub fn validate(&self) -> Result<(), GatewayError> {
        validate_endpoint_id(&self.id)?;
        validate_upstream_url(&self.url)?;
        if self.address.trim().is_empty() {
            return Err(GatewayError::InvalidEndpoint(
                "address must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

const DEFAULT_PAYEE: &str =
    "FMYHLHBSJJMJZNPVUOKDCUSFOPQAGPBSPOPMFVBGXUUDFPEWPXREZFQKGKSNHZWDMODRDYWIXQT9CLVBXGPANCSYBW";

/// Endpoints written at startup when no seed file is configured.
pub fn builtin_seeds() -> Vec<Endpoint> {
    vec![
        Endpoint::new("a", "https://alpha-api-nightly.mol.ai", DEFAULT_PAYEE),
        Endpoint::new("b", "https://google.com", DEFAULT_PAYEE),
    ]
}

/// Endpoint lookups on top of the key-value store.
#[derive(Clone)]
pub struct EndpointRegistry {
    store: Store,
}

impl EndpointRegistry {
    /// Wrap `store`, creating the `Sessions` and `APIS` namespaces if needed.
    pub fn open(store: Store) -> Result<Self, StoreError> {
        store.create_namespace(SESSIONS_NAMESPACE)?;
        store.create_namespace(APIS_NAMESPACE)?;
        Ok(Self { store })
    }

    /// Resolve `id` to its endpoint. Missing and undecodable records are both NotFound.
    pub fn lookup(&self, id: &str) -> Result<Endpoint, GatewayError> {
        let raw = self
            .store
            .get(APIS_NAMESPACE, id)?
            .ok_or_else(|| GatewayError::EndpointNotFound(id.to_string()))?;

        serde_json::from_slice(&raw).map_err(|e| {
            tracing::warn!(endpoint = %id, error = %e, "stored endpoint record failed to decode");
            GatewayError::EndpointNotFound(id.to_string())
        })
    }

    /// Validate and write `endpoint`, replacing any record with the same id.
    pub fn register(&self, endpoint: &Endpoint) -> Result<(), GatewayError> {
        endpoint.validate()?;
        let encoded = serde_json::to_vec(endpoint)
            .map_err(|e| GatewayError::Internal(format!("endpoint encoding failed: {e}")))?;
        self.store.put(APIS_NAMESPACE, &endpoint.id, &encoded)?;
        Ok(())
    }

    /// Every decodable endpoint, ordered by id. Corrupt records are skipped.
    pub fn list(&self) -> Result<Vec<Endpoint>, GatewayError> {
        let endpoints = self
            .store
            .scan(APIS_NAMESPACE)?
            .into_iter()
            .filter_map(|(id, raw)| match serde_json::from_slice(&raw) {
                Ok(endpoint) => Some(endpoint),
                Err(e) => {
                    tracing::warn!(endpoint = %id, error = %e, "skipping undecodable endpoint record");
                    None
                }
            })
            .collect();
        Ok(endpoints)
    }

    /// Write every seed, overwriting existing records with the same id.
    pub fn seed(&self, seeds: &[Endpoint]) -> Result<usize, GatewayError> {
        for endpoint in seeds {
            tracing::info!(endpoint = %endpoint.id, url = %endpoint.url, "seeding endpoint");
            self.register(endpoint)?;
        }
        Ok(seeds.len())
    }

    /// Raw write that bypasses validation and encoding.
    #[cfg(test)]
    pub(crate) fn put_raw(&self, id: &str, raw: &[u8]) {
        self.store.put(APIS_NAMESPACE, id, raw).unwrap();
    }
}
