//! Voiding. A consent counts as voided when either its own chain or its
//! parent request's chain ends in `VOIDED`, so voiding a request once
//! invalidates every consent issued against it without touching their chains.
use super::consent::ConsentRecordStore;
use super::error::{ConsentError, Result};
use super::ledger::TransactionLedger;
use super::registry::ConsentRequestRegistry;
use super::types::TxnStatus;
use tracing::{debug, info};

#[derive(Clone)]
pub struct VoidPropagation {
    ledger: TransactionLedger,
    consents: ConsentRecordStore,
    registry: ConsentRequestRegistry,
}

impl VoidPropagation {
    pub fn new(
        ledger: TransactionLedger,
        consents: ConsentRecordStore,
        registry: ConsentRequestRegistry,
    ) -> Self {
        Self {
            ledger,
            consents,
            registry,
        }
    }

    pub fn is_voided(&self, consent_id: &str) -> Result<bool> {
        let consent = self.consents.require(consent_id)?;
        if self.ledger.read_latest(&consent.chain_id)?.status == TxnStatus::Voided {
            return Ok(true);
        }

        let request = self
            .registry
            .read(&consent.consent_request_id)?
            .ok_or_else(|| {
                ConsentError::Storage(format!(
                    "consent {consent_id} references missing request {}",
                    consent.consent_request_id
                ))
            })?;
        let voided = self.ledger.read_latest(&request.chain_id)?.status == TxnStatus::Voided;

        debug!(consent_id, voided, "checked consent void state");
        Ok(voided)
    }

    /// Idempotent: a second call appends nothing and succeeds.
    pub fn void_consent(&self, consent_id: &str) -> Result<()> {
        if self.consents.void(consent_id)?.is_some() {
            info!(consent_id, "voided consent");
        }
        Ok(())
    }

    /// Idempotent: a second call appends nothing and succeeds.
    pub fn void_consent_request(&self, request_id: &str) -> Result<()> {
        self.registry.void(request_id)
    }
}
