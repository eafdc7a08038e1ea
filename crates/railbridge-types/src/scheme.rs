//! Scheme handler trait and registry.
//!
//! A scheme handler owns verification and settlement for one payment scheme
//! on one chain. Handlers are registered once at construction into a
//! [`SchemeRegistry`] keyed by `(scheme, network)`; runtime mutation is not
//! supported.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::chain::ChainId;
use crate::proto;
use crate::proto::PaymentError;

/// Verification and settlement for a single (scheme, chain) pair.
///
/// Handlers receive raw requests and deserialize the typed shape they own.
/// A [`PaymentError`] return value means the payment was rejected for a
/// protocol-level reason; it is mapped to an `isValid: false` /
/// `success: false` envelope by the orchestrator, never to an HTTP error.
#[async_trait]
pub trait SchemeFacilitator: Send + Sync {
    async fn verify(
        &self,
        request: &proto::RawVerifyRequest,
    ) -> Result<proto::VerifyResponse, PaymentError>;

    async fn settle(
        &self,
        request: &proto::RawSettleRequest,
    ) -> Result<proto::SettleResponse, PaymentError>;

    async fn supported(&self) -> Result<proto::SupportedResponse, PaymentError>;
}

/// Immutable table of scheme handlers, keyed by `(scheme name, chain id)`.
///
/// Built once at boot through [`SchemeRegistryBuilder`]; lookups drive
/// request dispatch in the orchestrator.
pub struct SchemeRegistry {
    handlers: HashMap<(String, ChainId), Arc<dyn SchemeFacilitator>>,
    extensions: Vec<String>,
}

impl SchemeRegistry {
    pub fn builder() -> SchemeRegistryBuilder {
        SchemeRegistryBuilder {
            handlers: HashMap::new(),
            extensions: Vec::new(),
        }
    }

    /// Looks up the handler for a dispatch key.
    pub fn by_key(&self, key: &proto::DispatchKey) -> Option<&Arc<dyn SchemeFacilitator>> {
        self.handlers.get(&(key.scheme.clone(), key.network.clone()))
    }

    /// All registered handlers.
    pub fn values(&self) -> impl Iterator<Item = &Arc<dyn SchemeFacilitator>> {
        self.handlers.values()
    }

    /// Extension keys declared by this facilitator.
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }
}

/// Builder consuming a static scheme table at construction.
pub struct SchemeRegistryBuilder {
    handlers: HashMap<(String, ChainId), Arc<dyn SchemeFacilitator>>,
    extensions: Vec<String>,
}

impl SchemeRegistryBuilder {
    /// Registers a handler for `(scheme, network)`. Later registrations for
    /// the same key replace earlier ones.
    pub fn register<S: Into<String>>(
        mut self,
        scheme: S,
        network: ChainId,
        handler: Arc<dyn SchemeFacilitator>,
    ) -> Self {
        self.handlers.insert((scheme.into(), network), handler);
        self
    }

    /// Declares a protocol extension key served by this facilitator.
    pub fn declare_extension<S: Into<String>>(mut self, key: S) -> Self {
        let key = key.into();
        if !self.extensions.contains(&key) {
            self.extensions.push(key);
        }
        self
    }

    pub fn build(self) -> SchemeRegistry {
        SchemeRegistry {
            handlers: self.handlers,
            extensions: self.extensions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{DispatchKey, RawVerifyRequest, SupportedResponse, VerifyResponse};

    struct AlwaysValid;

    #[async_trait]
    impl SchemeFacilitator for AlwaysValid {
        async fn verify(
            &self,
            _request: &RawVerifyRequest,
        ) -> Result<VerifyResponse, PaymentError> {
            Ok(VerifyResponse::valid("0x0".into()))
        }

        async fn settle(
            &self,
            _request: &RawVerifyRequest,
        ) -> Result<proto::SettleResponse, PaymentError> {
            Err(PaymentError::UnsupportedScheme)
        }

        async fn supported(&self) -> Result<SupportedResponse, PaymentError> {
            Ok(SupportedResponse::default())
        }
    }

    #[test]
    fn registry_lookup_by_scheme_and_network() {
        let base_sepolia = ChainId::new("eip155", "84532");
        let registry = SchemeRegistry::builder()
            .register("exact", base_sepolia.clone(), Arc::new(AlwaysValid))
            .declare_extension("cross-chain")
            .build();

        let hit = DispatchKey {
            scheme: "exact".into(),
            network: base_sepolia.clone(),
        };
        assert!(registry.by_key(&hit).is_some());

        let miss = DispatchKey {
            scheme: "upto".into(),
            network: base_sepolia,
        };
        assert!(registry.by_key(&miss).is_none());
        assert_eq!(registry.extensions(), ["cross-chain"]);
    }
}
