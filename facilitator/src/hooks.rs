//! Lifecycle hooks around verification and settlement.
//!
//! Hooks observe (and can abort) the payment lifecycle without living inside
//! any scheme handler. Outcomes are a closed union, so the orchestrator's
//! dispatch is exhaustive.

use async_trait::async_trait;

use railbridge_types::chain::ChainId;
use railbridge_types::proto::{ErrorReason, RawVerifyRequest, SettleResponse, VerifyResponse};

/// What the orchestrator knows about a payment when hooks run.
pub struct PaymentContext<'a> {
    pub scheme: &'a str,
    pub network: &'a ChainId,
    pub request: &'a RawVerifyRequest,
}

/// Decision returned from a before-hook.
pub enum HookOutcome {
    Continue,
    Abort { reason: ErrorReason },
}

/// Observer of the payment lifecycle. All methods default to no-ops so
/// implementations override only what they care about.
#[async_trait]
pub trait FacilitatorHooks: Send + Sync {
    async fn on_before_verify(&self, _ctx: &PaymentContext<'_>) -> HookOutcome {
        HookOutcome::Continue
    }

    async fn on_after_verify(&self, _ctx: &PaymentContext<'_>, _response: &VerifyResponse) {}

    async fn on_verify_failure(&self, _ctx: &PaymentContext<'_>, _reason: &ErrorReason) {}

    async fn on_before_settle(&self, _ctx: &PaymentContext<'_>) -> HookOutcome {
        HookOutcome::Continue
    }

    async fn on_after_settle(&self, _ctx: &PaymentContext<'_>, _response: &SettleResponse) {}

    async fn on_settle_failure(&self, _ctx: &PaymentContext<'_>, _reason: &ErrorReason) {}
}

/// Hook logging every lifecycle step with the request's dispatch context.
#[derive(Default)]
pub struct AuditHooks;

#[async_trait]
impl FacilitatorHooks for AuditHooks {
    async fn on_after_verify(&self, ctx: &PaymentContext<'_>, response: &VerifyResponse) {
        tracing::info!(
            scheme = ctx.scheme,
            network = %ctx.network,
            payer = response.payer.as_deref().unwrap_or(""),
            "payment verified"
        );
    }

    async fn on_verify_failure(&self, ctx: &PaymentContext<'_>, reason: &ErrorReason) {
        tracing::info!(
            scheme = ctx.scheme,
            network = %ctx.network,
            reason = %reason,
            "payment verification rejected"
        );
    }

    async fn on_after_settle(&self, ctx: &PaymentContext<'_>, response: &SettleResponse) {
        tracing::info!(
            scheme = ctx.scheme,
            network = %ctx.network,
            transaction = %response.transaction,
            success = response.success,
            "payment settled"
        );
    }

    async fn on_settle_failure(&self, ctx: &PaymentContext<'_>, reason: &ErrorReason) {
        tracing::warn!(
            scheme = ctx.scheme,
            network = %ctx.network,
            reason = %reason,
            "payment settlement rejected"
        );
    }
}
