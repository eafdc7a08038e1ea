//! EIP-712 domain reconstruction for EIP-3009 tokens.
//!
//! Tokens disagree about which domain fields they use. The canonical layout
//! is `{name, version, chainId, verifyingContract}`, but several deployments
//! replace `chainId` with a `salt` derived from it, and bridged tokens
//! occasionally drop fields altogether. The merchant can pin the exact
//! layout through `extra.domain`; otherwise the facilitator reconstructs the
//! default layout, compares its separator against the token's on-chain
//! `DOMAIN_SEPARATOR()`, and probes a short list of known alternatives on
//! mismatch. The winning layout is cached per (chain, asset) so the probe
//! happens once per process lifetime.

use alloy_primitives::{Address, B256, U256};
use alloy_provider::Provider;
use alloy_sol_types::Eip712Domain;
use dashmap::DashMap;
use tracing::instrument;

use railbridge_types::proto::PaymentError;

use crate::chain::Eip155ChainReference;
use crate::exact::types::{DomainHints, ExactExtra, IEIP3009};

/// Domain field bits, per ERC-5267's `eip712Domain().fields` encoding.
pub const FIELD_NAME: u8 = 0x01;
pub const FIELD_VERSION: u8 = 0x02;
pub const FIELD_CHAIN_ID: u8 = 0x04;
pub const FIELD_VERIFYING_CONTRACT: u8 = 0x08;
pub const FIELD_SALT: u8 = 0x10;

/// The canonical four-field layout.
pub const DEFAULT_FIELDS: u8 = FIELD_NAME | FIELD_VERSION | FIELD_CHAIN_ID | FIELD_VERIFYING_CONTRACT;

/// Salt-keyed layout used by tokens that fold the chain id into `salt`.
pub const SALT_FIELDS: u8 = FIELD_NAME | FIELD_VERSION | FIELD_VERIFYING_CONTRACT | FIELD_SALT;

/// Published probe order for tokens whose separator does not match the
/// canonical layout. Probing stops at the first match.
pub const CANDIDATE_FIELD_SETS: &[u8] = &[
    DEFAULT_FIELDS,
    SALT_FIELDS,
    FIELD_NAME | FIELD_VERSION | FIELD_CHAIN_ID,
    FIELD_NAME | FIELD_CHAIN_ID | FIELD_VERIFYING_CONTRACT,
    FIELD_NAME | FIELD_VERSION | FIELD_CHAIN_ID | FIELD_VERIFYING_CONTRACT | FIELD_SALT,
];

/// Cache of the winning field mask per (chain id, token address).
pub type DomainCache = DashMap<(u64, Address), u8>;

/// The salt convention observed in the wild: the numeric chain id,
/// big-endian, left-padded to 32 bytes.
pub fn chain_id_salt(chain_id: u64) -> B256 {
    B256::from(U256::from(chain_id))
}

/// Assembles an [`Eip712Domain`] containing exactly the fields in `mask`.
pub fn domain_from_mask(
    mask: u8,
    name: &str,
    version: &str,
    chain_id: u64,
    verifying_contract: Address,
    salt: Option<B256>,
) -> Eip712Domain {
    Eip712Domain::new(
        (mask & FIELD_NAME != 0).then(|| name.to_string().into()),
        (mask & FIELD_VERSION != 0).then(|| version.to_string().into()),
        (mask & FIELD_CHAIN_ID != 0).then(|| U256::from(chain_id)),
        (mask & FIELD_VERIFYING_CONTRACT != 0).then_some(verifying_contract),
        (mask & FIELD_SALT != 0).then(|| salt.unwrap_or_else(|| chain_id_salt(chain_id))),
    )
}

/// Extracts the mandatory `name`/`version` pair from `extra`.
///
/// # Errors
///
/// [`PaymentError::MissingEip712Domain`] when either value is absent.
pub fn require_name_version(extra: &Option<ExactExtra>) -> Result<(String, String), PaymentError> {
    let extra = extra.as_ref().ok_or(PaymentError::MissingEip712Domain)?;
    match (&extra.name, &extra.version) {
        (Some(name), Some(version)) => Ok((name.clone(), version.clone())),
        _ => Err(PaymentError::MissingEip712Domain),
    }
}

/// Field mask implied by the hints when no explicit bitmask is given:
/// canonical layout, except that a provided `salt` switches to the
/// salt-keyed layout without `chainId`. The asymmetry exists because
/// salt-based tokens key the salt to the chain id and never carry both.
fn implied_mask(hints: Option<&DomainHints>) -> Option<u8> {
    let hints = hints?;
    if let Some(fields) = hints.fields {
        return Some(fields);
    }
    if hints.salt.is_some() {
        return Some(SALT_FIELDS);
    }
    None
}

/// Reconstructs the EIP-712 domain for a verification or settlement.
///
/// When the merchant supplied an `extra.domain` override the layout is
/// taken as-is without an on-chain comparison. Otherwise the canonical
/// layout is checked against the token's `DOMAIN_SEPARATOR()` and the
/// candidate enumeration is probed on mismatch.
///
/// # Errors
///
/// - [`PaymentError::MissingEip712Domain`] when `extra.name`/`version` are absent
/// - [`PaymentError::DomainSeparatorMismatch`] when no candidate matches
/// - [`PaymentError::Onchain`] when the separator read itself fails
#[instrument(skip_all, err, fields(chain = %chain, asset = %asset))]
pub async fn resolve_domain<P: Provider>(
    contract: &IEIP3009::IEIP3009Instance<P>,
    chain: Eip155ChainReference,
    asset: Address,
    extra: &Option<ExactExtra>,
    cache: &DomainCache,
) -> Result<Eip712Domain, PaymentError> {
    let (name, version) = require_name_version(extra)?;
    let hints = extra.as_ref().and_then(|e| e.domain.as_ref());
    let chain_id = hints.and_then(|h| h.chain_id).unwrap_or(chain.inner());
    let salt = hints.and_then(|h| h.salt);

    if let Some(mask) = implied_mask(hints) {
        return Ok(domain_from_mask(mask, &name, &version, chain_id, asset, salt));
    }

    if let Some(mask) = cache.get(&(chain.inner(), asset)).map(|entry| *entry) {
        return Ok(domain_from_mask(mask, &name, &version, chain_id, asset, salt));
    }

    let onchain_separator = contract
        .DOMAIN_SEPARATOR()
        .call()
        .await
        .map_err(|e| PaymentError::Onchain(format!("DOMAIN_SEPARATOR: {e}")))?;

    for mask in CANDIDATE_FIELD_SETS {
        let candidate = domain_from_mask(*mask, &name, &version, chain_id, asset, salt);
        if candidate.separator() == onchain_separator {
            cache.insert((chain.inner(), asset), *mask);
            if *mask != DEFAULT_FIELDS {
                tracing::info!(chain = %chain, %asset, mask, "non-canonical EIP-712 domain layout");
            }
            return Ok(candidate);
        }
    }

    Err(PaymentError::DomainSeparatorMismatch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;
    use railbridge_types::proto::ErrorReason;

    const ASSET: Address = address!("0x036CbD53842c5426634e7929541eC2318f3dCF7e");

    #[test]
    fn default_mask_has_four_fields() {
        let domain = domain_from_mask(DEFAULT_FIELDS, "USDC", "2", 84532, ASSET, None);
        assert_eq!(domain.name.as_deref(), Some("USDC"));
        assert_eq!(domain.version.as_deref(), Some("2"));
        assert_eq!(domain.chain_id, Some(U256::from(84532u64)));
        assert_eq!(domain.verifying_contract, Some(ASSET));
        assert!(domain.salt.is_none());
    }

    #[test]
    fn salt_layout_drops_chain_id() {
        let domain = domain_from_mask(SALT_FIELDS, "USDC", "2", 84532, ASSET, None);
        assert!(domain.chain_id.is_none());
        assert_eq!(domain.salt, Some(chain_id_salt(84532)));
    }

    #[test]
    fn mask_selects_exactly_requested_fields() {
        let domain = domain_from_mask(
            FIELD_NAME | FIELD_CHAIN_ID,
            "USDC",
            "2",
            1,
            ASSET,
            None,
        );
        assert!(domain.name.is_some());
        assert!(domain.version.is_none());
        assert!(domain.chain_id.is_some());
        assert!(domain.verifying_contract.is_none());
        assert!(domain.salt.is_none());
    }

    #[test]
    fn separators_differ_between_layouts() {
        let canonical = domain_from_mask(DEFAULT_FIELDS, "USDC", "2", 84532, ASSET, None);
        let salted = domain_from_mask(SALT_FIELDS, "USDC", "2", 84532, ASSET, None);
        assert_ne!(canonical.separator(), salted.separator());
    }

    #[test]
    fn implied_mask_prefers_explicit_fields() {
        let hints = DomainHints {
            fields: Some(FIELD_NAME | FIELD_VERSION),
            chain_id: None,
            salt: Some(B256::ZERO),
        };
        assert_eq!(implied_mask(Some(&hints)), Some(FIELD_NAME | FIELD_VERSION));
    }

    #[test]
    fn implied_mask_switches_on_salt() {
        let hints = DomainHints {
            fields: None,
            chain_id: None,
            salt: Some(B256::ZERO),
        };
        assert_eq!(implied_mask(Some(&hints)), Some(SALT_FIELDS));
        assert_eq!(implied_mask(None), None);
    }

    #[test]
    fn missing_name_or_version_is_rejected() {
        let err = require_name_version(&None).unwrap_err();
        assert_eq!(err.reason(), ErrorReason::MissingEip712Domain);

        let only_name = Some(ExactExtra {
            name: Some("USDC".into()),
            version: None,
            domain: None,
        });
        let err = require_name_version(&only_name).unwrap_err();
        assert_eq!(err.reason(), ErrorReason::MissingEip712Domain);
    }
}
