//! Core trait defining the verification and settlement interface of the
//! facilitator.
//!
//! Implementors validate incoming payment payloads against the declared
//! requirements ([`Facilitator::verify`]) and execute on-chain transfers
//! ([`Facilitator::settle`]). Failed verifications and settlements are
//! expected outcomes carried inside the response types; `Self::Error` is
//! reserved for malformed requests and infrastructure faults.

use std::fmt::{Debug, Display};
use std::sync::Arc;

use crate::proto;

/// Asynchronous interface of a payment facilitator.
pub trait Facilitator {
    /// The error type returned for malformed requests or infrastructure
    /// failures. Payment-level failures are not errors.
    type Error: Debug + Display;

    /// Verifies a proposed payment payload against its requirements.
    ///
    /// This includes payload integrity, signature validity, balance
    /// sufficiency, network compatibility, and compliance with the declared
    /// payment requirements.
    fn verify(
        &self,
        request: &proto::RawVerifyRequest,
    ) -> impl Future<Output = Result<proto::VerifyResponse, Self::Error>> + Send;

    /// Executes an on-chain settlement for a payment.
    ///
    /// Re-validates the payment and, if valid, submits the transfer on the
    /// source chain. The facilitator never retries settlement internally;
    /// the buyer's authorization has a single attempt.
    fn settle(
        &self,
        request: &proto::RawSettleRequest,
    ) -> impl Future<Output = Result<proto::SettleResponse, Self::Error>> + Send;

    /// Reports the payment kinds, extensions, and signers this facilitator
    /// supports.
    fn supported(
        &self,
    ) -> impl Future<Output = Result<proto::SupportedResponse, Self::Error>> + Send;
}

impl<T: Facilitator> Facilitator for Arc<T> {
    type Error = T::Error;

    fn verify(
        &self,
        request: &proto::RawVerifyRequest,
    ) -> impl Future<Output = Result<proto::VerifyResponse, Self::Error>> + Send {
        self.as_ref().verify(request)
    }

    fn settle(
        &self,
        request: &proto::RawSettleRequest,
    ) -> impl Future<Output = Result<proto::SettleResponse, Self::Error>> + Send {
        self.as_ref().settle(request)
    }

    fn supported(
        &self,
    ) -> impl Future<Output = Result<proto::SupportedResponse, Self::Error>> + Send {
        self.as_ref().supported()
    }
}
