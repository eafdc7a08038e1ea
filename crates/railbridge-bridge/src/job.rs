//! The durable unit of cross-chain work.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use railbridge_types::chain::ChainId;
use railbridge_types::timestamp::UnixTimestamp;

/// Lifecycle states of a bridge job.
///
/// `Completed`, `Failed`, and `Cancelled` are terminal; a job never leaves
/// them. `Cancelled` is reachable only from `Pending` through the admin
/// surface, since a `Bridging` job may already have burned on the source
/// chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeJobStatus {
    Pending,
    Bridging,
    Completed,
    Failed,
    Cancelled,
}

impl BridgeJobStatus {
    /// Whether this state admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BridgeJobStatus::Completed | BridgeJobStatus::Failed | BridgeJobStatus::Cancelled
        )
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(&self, next: BridgeJobStatus) -> bool {
        match (self, next) {
            (BridgeJobStatus::Pending, BridgeJobStatus::Bridging) => true,
            (BridgeJobStatus::Pending, BridgeJobStatus::Cancelled) => true,
            (BridgeJobStatus::Pending, BridgeJobStatus::Failed) => true,
            // Retry loop stays in Bridging.
            (BridgeJobStatus::Bridging, BridgeJobStatus::Bridging) => true,
            (BridgeJobStatus::Bridging, BridgeJobStatus::Completed) => true,
            (BridgeJobStatus::Bridging, BridgeJobStatus::Failed) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeJobStatus::Pending => "pending",
            BridgeJobStatus::Bridging => "bridging",
            BridgeJobStatus::Completed => "completed",
            BridgeJobStatus::Failed => "failed",
            BridgeJobStatus::Cancelled => "cancelled",
        }
    }
}

impl Display for BridgeJobStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BridgeJobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BridgeJobStatus::Pending),
            "bridging" => Ok(BridgeJobStatus::Bridging),
            "completed" => Ok(BridgeJobStatus::Completed),
            "failed" => Ok(BridgeJobStatus::Failed),
            "cancelled" => Ok(BridgeJobStatus::Cancelled),
            other => Err(format!("unknown bridge job status: {other}")),
        }
    }
}

/// A durable record of one cross-chain transfer obligation.
///
/// Exclusively owned by the job store; all mutation goes through
/// `BridgeJobStore::update`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeJob {
    /// Opaque job id.
    pub id: String,
    /// `sourceNetwork:sourceTxHash:destinationNetwork`; unique per job.
    pub idempotency_key: String,
    pub source_network: ChainId,
    pub destination_network: ChainId,
    /// The settled source-chain transaction that funded the facilitator.
    pub source_tx_hash: String,
    /// Amount in atomic units, as a decimal string.
    pub amount: String,
    pub destination_asset: String,
    pub destination_pay_to: String,
    pub status: BridgeJobStatus,
    /// Number of bridge attempts made so far; never decreases.
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Source-chain burn transaction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bridge_tx_hash: Option<String>,
    /// Destination-chain mint transaction; set iff status is `completed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_tx_hash: Option<String>,
    /// Bridge-level message identifier, when the provider exposes one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub created_at: UnixTimestamp,
    pub updated_at: UnixTimestamp,
}

impl BridgeJob {
    /// Computes the idempotency key collapsing duplicate submissions.
    pub fn idempotency_key(
        source_network: &ChainId,
        source_tx_hash: &str,
        destination_network: &ChainId,
    ) -> String {
        format!("{source_network}:{source_tx_hash}:{destination_network}")
    }

    /// Creates a fresh `pending` job.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source_network: ChainId,
        destination_network: ChainId,
        source_tx_hash: String,
        amount: String,
        destination_asset: String,
        destination_pay_to: String,
    ) -> Self {
        let now = UnixTimestamp::now();
        let idempotency_key =
            Self::idempotency_key(&source_network, &source_tx_hash, &destination_network);
        Self {
            id: fresh_job_id(),
            idempotency_key,
            source_network,
            destination_network,
            source_tx_hash,
            amount,
            destination_asset,
            destination_pay_to,
            status: BridgeJobStatus::Pending,
            attempts: 0,
            last_error: None,
            bridge_tx_hash: None,
            destination_tx_hash: None,
            message_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies a status transition in place, bumping `updated_at`.
    ///
    /// Returns `false` without mutating when the transition is illegal.
    pub fn transition(&mut self, next: BridgeJobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        self.updated_at = UnixTimestamp::now();
        true
    }
}

/// Random 16-byte hex job id, prefixed for log readability.
fn fresh_job_id() -> String {
    let mut bytes = [0u8; 16];
    rand::fill(&mut bytes);
    format!("bj_{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> BridgeJob {
        BridgeJob::new(
            ChainId::new("eip155", "84532"),
            ChainId::new("eip155", "11155111"),
            "0xabc".into(),
            "10000".into(),
            "0x1c7D4B196Cb0C7B01d743Fbc6116a902379C7238".into(),
            "0x209693Bc6afc0C5328bA36FaF03C514EF312287C".into(),
        )
    }

    #[test]
    fn idempotency_key_format() {
        let job = job();
        assert_eq!(job.idempotency_key, "eip155:84532:0xabc:eip155:11155111");
    }

    #[test]
    fn fresh_jobs_are_pending() {
        let job = job();
        assert_eq!(job.status, BridgeJobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert!(job.last_error.is_none());
        assert!(job.id.starts_with("bj_"));
    }

    #[test]
    fn terminal_states_are_sticky() {
        for terminal in [
            BridgeJobStatus::Completed,
            BridgeJobStatus::Failed,
            BridgeJobStatus::Cancelled,
        ] {
            assert!(terminal.is_terminal());
            for next in [
                BridgeJobStatus::Pending,
                BridgeJobStatus::Bridging,
                BridgeJobStatus::Completed,
                BridgeJobStatus::Failed,
                BridgeJobStatus::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn cancellation_only_from_pending() {
        assert!(BridgeJobStatus::Pending.can_transition_to(BridgeJobStatus::Cancelled));
        assert!(!BridgeJobStatus::Bridging.can_transition_to(BridgeJobStatus::Cancelled));
    }

    #[test]
    fn retry_loop_stays_in_bridging() {
        assert!(BridgeJobStatus::Bridging.can_transition_to(BridgeJobStatus::Bridging));
        assert!(!BridgeJobStatus::Bridging.can_transition_to(BridgeJobStatus::Pending));
    }

    #[test]
    fn transition_rejects_illegal_moves() {
        let mut job = job();
        assert!(job.transition(BridgeJobStatus::Bridging));
        assert!(job.transition(BridgeJobStatus::Completed));
        assert!(!job.transition(BridgeJobStatus::Failed));
        assert_eq!(job.status, BridgeJobStatus::Completed);
    }
}
