//! The orchestrator: scheme dispatch plus lifecycle hooks.
//!
//! Routes each request to the scheme handler registered for the
//! `(scheme, network)` pair named in the payment requirements. Payment-level
//! failures never become errors here: they are folded into the response
//! envelope with a stable reason code, exactly as clients expect. Only
//! malformed bodies and infrastructure faults surface as
//! [`FacilitatorError`].

use std::sync::Arc;
use tracing::instrument;

use railbridge_types::facilitator::Facilitator;
use railbridge_types::proto;
use railbridge_types::proto::{ErrorReason, PaymentError};
use railbridge_types::scheme::SchemeRegistry;

use crate::hooks::{FacilitatorHooks, HookOutcome, PaymentContext};

/// Errors that surface as non-200 HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum FacilitatorError {
    /// The request body does not carry a recognizable payment shape.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// The local facilitator implementation backing the HTTP surface.
pub struct FacilitatorLocal {
    schemes: SchemeRegistry,
    hooks: Vec<Arc<dyn FacilitatorHooks>>,
}

impl FacilitatorLocal {
    pub fn new(schemes: SchemeRegistry, hooks: Vec<Arc<dyn FacilitatorHooks>>) -> Self {
        Self { schemes, hooks }
    }

    fn dispatch_key(
        &self,
        request: &proto::RawVerifyRequest,
    ) -> Result<proto::DispatchKey, FacilitatorError> {
        request.dispatch_key().ok_or_else(|| {
            FacilitatorError::InvalidRequest(
                "body must carry paymentPayload and paymentRequirements".into(),
            )
        })
    }
}

impl Facilitator for FacilitatorLocal {
    type Error = FacilitatorError;

    #[instrument(skip_all)]
    async fn verify(
        &self,
        request: &proto::RawVerifyRequest,
    ) -> Result<proto::VerifyResponse, Self::Error> {
        let key = self.dispatch_key(request)?;
        let ctx = PaymentContext {
            scheme: &key.scheme,
            network: &key.network,
            request,
        };

        for hook in &self.hooks {
            if let HookOutcome::Abort { reason } = hook.on_before_verify(&ctx).await {
                return Ok(proto::VerifyResponse::invalid(reason));
            }
        }

        let Some(handler) = self.schemes.by_key(&key) else {
            let reason = ErrorReason::UnsupportedScheme;
            for hook in &self.hooks {
                hook.on_verify_failure(&ctx, &reason).await;
            }
            return Ok(proto::VerifyResponse::invalid(reason));
        };

        match handler.verify(request).await {
            Ok(response) => {
                for hook in &self.hooks {
                    hook.on_after_verify(&ctx, &response).await;
                }
                Ok(response)
            }
            Err(error) => {
                let reason = payment_failure(&key, "verify", &error);
                for hook in &self.hooks {
                    hook.on_verify_failure(&ctx, &reason).await;
                }
                Ok(proto::VerifyResponse::invalid(reason))
            }
        }
    }

    #[instrument(skip_all)]
    async fn settle(
        &self,
        request: &proto::RawSettleRequest,
    ) -> Result<proto::SettleResponse, Self::Error> {
        let key = self.dispatch_key(request)?;
        let ctx = PaymentContext {
            scheme: &key.scheme,
            network: &key.network,
            request,
        };

        for hook in &self.hooks {
            if let HookOutcome::Abort { reason } = hook.on_before_settle(&ctx).await {
                return Ok(proto::SettleResponse::failed(&key.network, reason));
            }
        }

        let Some(handler) = self.schemes.by_key(&key) else {
            let reason = ErrorReason::UnsupportedScheme;
            for hook in &self.hooks {
                hook.on_settle_failure(&ctx, &reason).await;
            }
            return Ok(proto::SettleResponse::failed(&key.network, reason));
        };

        match handler.settle(request).await {
            Ok(response) => {
                for hook in &self.hooks {
                    hook.on_after_settle(&ctx, &response).await;
                }
                Ok(response)
            }
            Err(error) => {
                let reason = payment_failure(&key, "settle", &error);
                for hook in &self.hooks {
                    hook.on_settle_failure(&ctx, &reason).await;
                }
                Ok(proto::SettleResponse::failed(&key.network, reason))
            }
        }
    }

    async fn supported(&self) -> Result<proto::SupportedResponse, Self::Error> {
        let mut response = proto::SupportedResponse {
            extensions: self.schemes.extensions().to_vec(),
            ..Default::default()
        };
        for handler in self.schemes.values() {
            if let Ok(mut supported) = handler.supported().await {
                response.kinds.append(&mut supported.kinds);
                for (chain_id, signer_addresses) in supported.signers {
                    response.signers.entry(chain_id).or_insert(signer_addresses);
                }
            }
        }
        Ok(response)
    }
}

/// Logs a payment rejection and extracts its wire reason.
fn payment_failure(key: &proto::DispatchKey, operation: &str, error: &PaymentError) -> ErrorReason {
    let reason = error.reason();
    tracing::info!(
        scheme = %key.scheme,
        network = %key.network,
        operation,
        reason = %reason,
        detail = %error,
        "payment rejected"
    );
    reason
}
